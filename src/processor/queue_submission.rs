//! Queue Submission Processor
//!
//! The built-in, resource-agnostic processor: projects an item's fields into a
//! work record and submits it to the queue named by the `uipath` directive (or
//! the configured default queue). Registered last with a catch-all predicate,
//! so any more specific processor wins resolution.

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use crate::error::with_timeout;
use crate::model::{Item, SubmissionResult, WorkRecord};
use super::error::{ProcessorError, ProcessorResult};
use super::registry::ProcessorDescriptor;
use super::traits::{Processor, ProcessorContext};

pub const QUEUE_PROCESSOR_NAME: &str = "queue";

pub struct QueueSubmissionProcessor {
    context: ProcessorContext,
}

impl QueueSubmissionProcessor {
    pub fn new(context: ProcessorContext) -> Self {
        Self { context }
    }

    /// Catch-all descriptor for this processor
    pub fn descriptor() -> ProcessorDescriptor {
        ProcessorDescriptor::new(QUEUE_PROCESSOR_NAME, |context| {
            Box::new(QueueSubmissionProcessor::new(context))
        })
        .with_predicate(|_, _, _| true)
    }

    fn allow_list(&self) -> Option<&[String]> {
        self.context.directives.fields.as_deref()
    }
}

#[async_trait]
impl Processor for QueueSubmissionProcessor {
    fn name(&self) -> &str {
        QUEUE_PROCESSOR_NAME
    }

    fn queue_name(&self) -> &str {
        &self.context.queue_name
    }

    fn should_process(&self, item: &Item) -> bool {
        if item.is_folder {
            return false;
        }
        if self.context.directives.detect_changes() {
            // An item never modified after creation carries no change to act on
            return match item.created_at {
                Some(created_at) => item.modified_at > created_at,
                None => true,
            };
        }
        true
    }

    fn validate(&self, item: &Item) -> ProcessorResult<()> {
        if item.id.trim().is_empty() {
            return Err(ProcessorError::validation("item has no identifier"));
        }

        if let Some(fields) = self.allow_list() {
            let missing: Vec<&str> = fields
                .iter()
                .filter(|field| !item.fields.contains_key(field.as_str()))
                .map(String::as_str)
                .collect();
            if !missing.is_empty() {
                return Err(ProcessorError::validation(format!("missing fields: {}", missing.join(", "))));
            }
        }

        Ok(())
    }

    fn transform(&self, item: &Item) -> ProcessorResult<WorkRecord> {
        let mut payload: Map<String, Value> = match self.allow_list() {
            Some(fields) => fields
                .iter()
                .filter_map(|field| item.fields.get(field).map(|v| (field.clone(), v.clone())))
                .collect(),
            None => item.fields.clone(),
        };

        payload.insert("itemId".to_string(), json!(item.id));
        payload.insert("resource".to_string(), json!(item.resource_path));
        payload.insert("modifiedAt".to_string(), json!(item.modified_at.to_rfc3339()));
        if let Some(list) = &item.list_display_name {
            payload.insert("list".to_string(), json!(list));
        }

        Ok(WorkRecord {
            reference: format!("{}#{}", item.resource_path, item.id),
            processor: QUEUE_PROCESSOR_NAME.to_string(),
            queue_name: self.context.queue_name.clone(),
            payload,
        })
    }

    async fn submit(&self, record: WorkRecord) -> ProcessorResult<SubmissionResult> {
        with_timeout(
            "submit",
            self.context.submit_timeout,
            self.context.work_queue.submit(&self.context.queue_name, &record),
        )
        .await
        .map_err(|e| ProcessorError::submission(e.to_string()))
    }
}
