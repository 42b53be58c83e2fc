//! Processor Trait
//!
//! A processor turns one changed item into a work-queue submission through
//! four isolated steps. The dispatcher only ever calls [`Processor::process`],
//! which composes them and folds every failure into a [`ProcessOutcome`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::collaborators::WorkQueue;
use crate::directives::Directives;
use crate::model::{Item, SubmissionResult, WorkRecord};
use super::error::{ProcessorError, ProcessorResult};

/// Everything a processor factory gets to build a processor instance
#[derive(Clone)]
pub struct ProcessorContext {
    /// Queue the processor submits to
    pub queue_name: String,

    /// Directives from the subscription's client state
    pub directives: Directives,

    pub work_queue: Arc<dyn WorkQueue>,

    /// Deadline for a single submission
    pub submit_timeout: Duration,
}

/// Result of one `process()` call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ProcessOutcome {
    /// Record accepted by the work queue
    Submitted { processor: String, queue: String, submission: SubmissionResult },

    /// Processor declined the item
    Skipped { processor: String, reason: String },

    /// Item failed validation
    Rejected { processor: String, error: String },

    /// Transform or submission failed
    Failed { processor: String, error: String },
}

impl ProcessOutcome {
    pub fn is_submitted(&self) -> bool {
        matches!(self, ProcessOutcome::Submitted { .. })
    }

    pub fn processor(&self) -> &str {
        match self {
            ProcessOutcome::Submitted { processor, .. }
            | ProcessOutcome::Skipped { processor, .. }
            | ProcessOutcome::Rejected { processor, .. }
            | ProcessOutcome::Failed { processor, .. } => processor,
        }
    }
}

#[async_trait]
pub trait Processor: Send + Sync {
    fn name(&self) -> &str;

    /// Queue this instance submits to
    fn queue_name(&self) -> &str;

    /// Cheap pre-filter; `false` skips the item without error
    fn should_process(&self, item: &Item) -> bool;

    fn validate(&self, item: &Item) -> ProcessorResult<()>;

    fn transform(&self, item: &Item) -> ProcessorResult<WorkRecord>;

    async fn submit(&self, record: WorkRecord) -> ProcessorResult<SubmissionResult>;

    /// Run all four steps; never returns an error
    async fn process(&self, item: &Item) -> ProcessOutcome {
        let processor = self.name().to_string();

        if !self.should_process(item) {
            debug!("Processor '{}' skipped item {}", processor, item.id);
            return ProcessOutcome::Skipped { processor, reason: "item not applicable".to_string() };
        }

        if let Err(e) = self.validate(item) {
            warn!("Processor '{}' rejected item {}: {}", processor, item.id, e);
            return ProcessOutcome::Rejected { processor, error: e.to_string() };
        }

        let record = match self.transform(item) {
            Ok(record) => record,
            Err(e) => return ProcessOutcome::Failed { processor, error: e.to_string() },
        };

        match self.submit(record).await {
            Ok(submission) if submission.success => ProcessOutcome::Submitted {
                processor,
                queue: self.queue_name().to_string(),
                submission,
            },
            Ok(submission) => {
                let error = submission.error.unwrap_or_else(|| "submission not accepted".to_string());
                ProcessOutcome::Failed { processor, error: ProcessorError::submission(error).to_string() }
            }
            Err(e) => {
                warn!("Processor '{}' failed to submit item {}: {}", processor, item.id, e);
                ProcessOutcome::Failed { processor, error: e.to_string() }
            }
        }
    }
}
