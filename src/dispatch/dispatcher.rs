//! Notification Dispatcher
//!
//! Handles one inbound intake request: answers the provider's validation
//! handshake, rejects malformed batches, suppresses loops, and fans each novel
//! event out to its consumers.
//!
//! For every novel event the forward and queue branches run concurrently and
//! neither can fail the other. Tracking record updates (notification count,
//! last forward time) run afterwards as separate best-effort side tasks,
//! merged per subscription across the whole batch so that concurrent events
//! for one subscription never race each other's read-modify-write.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::collaborators::{find_record, Forwarder, ItemSource, TrackingStore, WorkQueue};
use crate::directives::Directives;
use crate::error::{with_timeout, SubsyncError, SubsyncResult};
use crate::model::{Notification, RecordPatch, StoredRecord, TrackingStatus};
use crate::processor::{ProcessOutcome, ProcessorContext, ProcessorRegistry};
use crate::resolver::ItemResolver;
use super::dedup::{DedupKey, DedupStore, DedupTable};
use super::envelope::ForwardEnvelope;

/// Tunables for the dispatcher
#[derive(Debug, Clone)]
pub struct DispatchSettings {
    /// Value of the envelope `source` field
    pub source_name: String,

    /// Queue used when a directive enables processing without naming one
    pub default_queue: String,

    pub forward_timeout: Duration,

    /// Deadline for tracking store, item source and work queue calls
    pub upstream_timeout: Duration,

    /// Tracking store scope searched for records
    pub record_scope: String,

    /// How long a `(subscription, resource)` pair stays suppressed
    pub dedup_window: Duration,

    /// Bound on remembered dedup keys
    pub dedup_max_entries: usize,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            source_name: "subsync".to_string(),
            default_queue: "default".to_string(),
            forward_timeout: Duration::from_secs(10),
            upstream_timeout: Duration::from_secs(30),
            record_scope: String::new(),
            dedup_window: Duration::from_secs(300),
            dedup_max_entries: 10_000,
        }
    }
}

/// One inbound request as the hosting layer received it
#[derive(Debug, Clone, Default)]
pub struct IntakeRequest {
    /// Provider handshake token, from the query string
    pub validation_token: Option<String>,

    /// Raw request body
    pub body: Option<String>,
}

impl IntakeRequest {
    pub fn validation(token: &str) -> Self {
        Self { validation_token: Some(token.to_string()), body: None }
    }

    pub fn batch<S: Into<String>>(body: S) -> Self {
        Self { validation_token: None, body: Some(body.into()) }
    }
}

/// Reply for the hosting layer to send back
#[derive(Debug, Clone, PartialEq)]
pub struct IntakeResponse {
    pub status: u16,
    pub content_type: &'static str,
    pub body: String,
}

/// What the dispatcher did with a well-formed request
#[derive(Debug, Clone, PartialEq)]
pub enum IntakeOutcome {
    /// Handshake answered; carries the token to echo
    Validated(String),

    Batch(BatchReport),
}

/// Result for one event in a batch
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemOutcome {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subscription_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource: Option<String>,

    /// Whether the event reached dispatch
    pub processed: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    #[serde(default)]
    pub forwarded: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processing: Option<ProcessOutcome>,
}

impl ItemOutcome {
    fn skipped(notification: Option<&Notification>, reason: &str) -> Self {
        Self {
            subscription_id: notification.map(|n| n.subscription_id.clone()),
            resource: notification.map(|n| n.resource_path.clone()),
            reason: Some(reason.to_string()),
            ..Default::default()
        }
    }

    fn failed(error: String) -> Self {
        Self { error: Some(error), ..Default::default() }
    }
}

/// Best-effort tracking record update run after an event's primary path
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "task", rename_all = "snake_case")]
pub enum SideTask {
    /// Add `by` to the notification count
    IncrementCounter { subscription_id: String, by: u64 },
    StampForwarded { subscription_id: String, at: DateTime<Utc> },
}

impl SideTask {
    pub fn subscription_id(&self) -> &str {
        match self {
            SideTask::IncrementCounter { subscription_id, .. }
            | SideTask::StampForwarded { subscription_id, .. } => subscription_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SideTaskOutcome {
    Applied,
    /// Record is Deleted and must not change
    SkippedDeleted,
    /// No tracking record exists for the subscription
    SkippedUntracked,
    Failed { error: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SideTaskReport {
    #[serde(flatten)]
    pub task: SideTask,
    pub result: SideTaskOutcome,
}

/// Aggregate result for one batch
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchReport {
    pub received: usize,
    pub processed: usize,
    pub duplicates: usize,
    pub items: Vec<ItemOutcome>,
    #[serde(default)]
    pub side_tasks: Vec<SideTaskReport>,
}

/// Routes inbound change events to forward destinations and processors
pub struct NotificationDispatcher {
    store: Arc<dyn TrackingStore>,
    forwarder: Arc<dyn Forwarder>,
    work_queue: Arc<dyn WorkQueue>,
    resolver: ItemResolver,
    registry: Arc<ProcessorRegistry>,
    dedup: Arc<dyn DedupStore>,
    settings: DispatchSettings,
}

impl NotificationDispatcher {
    pub fn new(
        store: Arc<dyn TrackingStore>,
        forwarder: Arc<dyn Forwarder>,
        items: Arc<dyn ItemSource>,
        work_queue: Arc<dyn WorkQueue>,
        registry: Arc<ProcessorRegistry>,
        settings: DispatchSettings,
    ) -> Self {
        Self {
            store,
            forwarder,
            work_queue,
            resolver: ItemResolver::new(items, settings.upstream_timeout),
            registry,
            dedup: Arc::new(DedupTable::new(settings.dedup_window, settings.dedup_max_entries)),
            settings,
        }
    }

    /// Replace the dedup table, e.g. to share one across dispatchers
    pub fn with_dedup(mut self, dedup: Arc<dyn DedupStore>) -> Self {
        self.dedup = dedup;
        self
    }

    pub fn settings(&self) -> &DispatchSettings {
        &self.settings
    }

    /// Handle a request and render the reply; never fails
    pub async fn respond(&self, request: IntakeRequest) -> IntakeResponse {
        match self.handle(request).await {
            Ok(IntakeOutcome::Validated(token)) => IntakeResponse {
                status: 200,
                content_type: "text/plain",
                body: token,
            },
            Ok(IntakeOutcome::Batch(report)) => match serde_json::to_string(&report) {
                Ok(body) => IntakeResponse { status: 200, content_type: "application/json", body },
                Err(e) => IntakeResponse {
                    status: 500,
                    content_type: "text/plain",
                    body: format!("failed to render report: {}", e),
                },
            },
            Err(e) => IntakeResponse {
                status: if e.is_validation() { 400 } else { 500 },
                content_type: "text/plain",
                body: e.to_string(),
            },
        }
    }

    /// Handle a request; only a malformed request is an error
    pub async fn handle(&self, request: IntakeRequest) -> SubsyncResult<IntakeOutcome> {
        let body = request.body.as_deref().map(str::trim).unwrap_or("");

        if body.is_empty() {
            return match request.validation_token {
                Some(token) => {
                    info!("Answering subscription validation handshake");
                    Ok(IntakeOutcome::Validated(token))
                }
                None => Err(SubsyncError::validation("request has neither body nor validation token")),
            };
        }

        let payload: Value = serde_json::from_str(body)
            .map_err(|e| SubsyncError::validation(format!("malformed payload: {}", e)))?;

        self.dispatch_batch(&payload).await.map(IntakeOutcome::Batch)
    }

    /// Dispatch a parsed `{"value": [...]}` batch
    pub async fn dispatch_batch(&self, payload: &Value) -> SubsyncResult<BatchReport> {
        let events = payload
            .get("value")
            .and_then(Value::as_array)
            .ok_or_else(|| SubsyncError::validation("payload has no 'value' event array"))?;

        debug!("Dispatching batch of {} events", events.len());

        let results = join_all(events.iter().map(|event| self.dispatch_event(event))).await;

        let mut report = BatchReport { received: events.len(), ..Default::default() };
        let mut pending = Vec::new();
        for (outcome, side_tasks) in results {
            if outcome.processed {
                report.processed += 1;
            } else if outcome.reason.as_deref() == Some(REASON_DUPLICATE) {
                report.duplicates += 1;
            }
            report.items.push(outcome);
            pending.extend(side_tasks);
        }

        // Subscriptions update concurrently; one subscription's tasks run in order
        let groups = coalesce_side_tasks(pending);
        report.side_tasks = join_all(groups.into_iter().map(|group| async move {
            let mut reports = Vec::with_capacity(group.len());
            for task in group {
                reports.push(self.run_side_task(task).await);
            }
            reports
        }))
        .await
        .into_iter()
        .flatten()
        .collect();

        info!(
            "Batch done: {} received, {} processed, {} duplicates",
            report.received, report.processed, report.duplicates
        );
        Ok(report)
    }

    async fn dispatch_event(&self, event: &Value) -> (ItemOutcome, Vec<SideTask>) {
        let notification: Notification = match serde_json::from_value(event.clone()) {
            Ok(notification) => notification,
            Err(e) => {
                warn!("Skipping malformed notification: {}", e);
                return (ItemOutcome::failed(format!("malformed notification: {}", e)), Vec::new());
            }
        };

        let key = DedupKey::new(&notification.subscription_id, &notification.resource_path);
        if !self.dedup.check_and_record(&key) {
            return (ItemOutcome::skipped(Some(&notification), REASON_DUPLICATE), Vec::new());
        }

        let record = self.lookup_record(&notification.subscription_id).await;
        let raw_client_state = match notification.client_state.as_deref() {
            Some(raw) if !raw.trim().is_empty() => raw.to_string(),
            _ => record
                .and_then(|stored| stored.record.client_state)
                .unwrap_or_default(),
        };
        let directives = Directives::parse(&raw_client_state);

        let (forward, processing) = tokio::join!(
            self.forward_branch(event, &notification, &directives),
            self.queue_branch(&notification, &directives, &raw_client_state),
        );

        let mut outcome = ItemOutcome {
            subscription_id: Some(notification.subscription_id.clone()),
            resource: Some(notification.resource_path.clone()),
            processed: true,
            ..Default::default()
        };

        let mut errors = Vec::new();
        let mut tasks = vec![SideTask::IncrementCounter {
            subscription_id: notification.subscription_id.clone(),
            by: 1,
        }];

        match forward {
            ForwardResult::NotRequested => {}
            ForwardResult::Delivered(at) => {
                outcome.forwarded = true;
                tasks.push(SideTask::StampForwarded {
                    subscription_id: notification.subscription_id.clone(),
                    at,
                });
            }
            ForwardResult::Failed(error) => errors.push(format!("forward: {}", error)),
        }

        match processing {
            QueueResult::NotRequested => {}
            QueueResult::Skipped(reason) => outcome.reason = Some(reason),
            QueueResult::Processed(process_outcome) => {
                match &process_outcome {
                    ProcessOutcome::Rejected { error, .. } | ProcessOutcome::Failed { error, .. } => {
                        errors.push(format!("processor {}: {}", process_outcome.processor(), error));
                    }
                    ProcessOutcome::Skipped { reason, .. } => outcome.reason = Some(reason.clone()),
                    ProcessOutcome::Submitted { .. } => {}
                }
                outcome.processing = Some(process_outcome);
            }
        }

        if !errors.is_empty() {
            outcome.error = Some(errors.join("; "));
        }

        (outcome, tasks)
    }

    async fn lookup_record(&self, subscription_id: &str) -> Option<StoredRecord> {
        let lookup = with_timeout(
            "list_records",
            self.settings.upstream_timeout,
            find_record(self.store.as_ref(), &self.settings.record_scope, subscription_id),
        ).await;

        match lookup {
            Ok(record) => record,
            Err(e) => {
                warn!("Tracking record lookup for {} failed: {}", subscription_id, e);
                None
            }
        }
    }

    async fn forward_branch(&self, event: &Value, notification: &Notification, directives: &Directives) -> ForwardResult {
        let Some(url) = directives.forward.as_deref() else {
            return ForwardResult::NotRequested;
        };

        let now = Utc::now();
        let envelope = ForwardEnvelope::new(&self.settings.source_name, event.clone(), notification, directives, now);

        match with_timeout("forward", self.settings.forward_timeout, self.forwarder.forward(url, &envelope)).await {
            Ok(()) => {
                debug!("Forwarded notification for {} to {}", notification.subscription_id, url);
                ForwardResult::Delivered(now)
            }
            Err(e) => {
                warn!("Forwarding notification for {} to {} failed: {}", notification.subscription_id, url, e);
                ForwardResult::Failed(e.to_string())
            }
        }
    }

    async fn queue_branch(&self, notification: &Notification, directives: &Directives, raw_client_state: &str) -> QueueResult {
        if !directives.requests_processing() {
            return QueueResult::NotRequested;
        }
        let Some(queue_name) = directives.target_queue(&self.settings.default_queue) else {
            return QueueResult::NotRequested;
        };

        let Some(item) = self.resolver
            .resolve(&notification.resource_path, notification.resource_data.as_ref())
            .await
        else {
            return QueueResult::Skipped("item could not be resolved".to_string());
        };

        let Some(resolution) = self.registry.resolve(raw_client_state, &notification.resource_path, Some(&item)) else {
            debug!("No processor matched {} for {}", item.id, notification.resource_path);
            return QueueResult::Skipped("no matching processor".to_string());
        };

        let processor = resolution.descriptor.build(ProcessorContext {
            queue_name,
            directives: directives.clone(),
            work_queue: Arc::clone(&self.work_queue),
            submit_timeout: self.settings.upstream_timeout,
        });

        QueueResult::Processed(processor.process(&item).await)
    }

    async fn run_side_task(&self, task: SideTask) -> SideTaskReport {
        let result = self.apply_side_task(&task).await;
        SideTaskReport { task, result }
    }

    async fn apply_side_task(&self, task: &SideTask) -> SideTaskOutcome {
        let subscription_id = task.subscription_id();

        // Re-read so the increment starts from the freshest count
        let lookup = with_timeout(
            "list_records",
            self.settings.upstream_timeout,
            find_record(self.store.as_ref(), &self.settings.record_scope, subscription_id),
        ).await;

        let stored = match lookup {
            Ok(Some(stored)) => stored,
            Ok(None) => {
                debug!("No tracking record for {}, skipping {:?}", subscription_id, task);
                return SideTaskOutcome::SkippedUntracked;
            }
            Err(e) => return SideTaskOutcome::Failed { error: e.to_string() },
        };

        if stored.record.status == TrackingStatus::Deleted {
            warn!("Tracking record for {} is Deleted, not updating it", subscription_id);
            return SideTaskOutcome::SkippedDeleted;
        }

        let patch = match task {
            SideTask::IncrementCounter { by, .. } => RecordPatch {
                notification_count: Some(stored.record.notification_count.saturating_add(*by)),
                ..Default::default()
            },
            SideTask::StampForwarded { at, .. } => RecordPatch {
                last_forwarded_at: Some(*at),
                ..Default::default()
            },
        };

        match with_timeout("patch_record", self.settings.upstream_timeout, self.store.patch_record(&stored.id, patch)).await {
            Ok(_) => SideTaskOutcome::Applied,
            Err(e) => {
                warn!("Failed to update tracking record for {}: {}", subscription_id, e);
                SideTaskOutcome::Failed { error: e.to_string() }
            }
        }
    }
}

const REASON_DUPLICATE: &str = "duplicate";

/// Merge a batch's side tasks into one group per subscription
///
/// Counter increments are summed and only the latest forward time is kept.
/// Groups keep first-seen subscription order; within a group the counter
/// comes before the stamp.
fn coalesce_side_tasks(tasks: Vec<SideTask>) -> Vec<Vec<SideTask>> {
    let mut order: Vec<String> = Vec::new();
    let mut counts: HashMap<String, u64> = HashMap::new();
    let mut stamps: HashMap<String, DateTime<Utc>> = HashMap::new();

    for task in tasks {
        let subscription_id = task.subscription_id().to_string();
        if !counts.contains_key(&subscription_id) && !stamps.contains_key(&subscription_id) {
            order.push(subscription_id.clone());
        }
        match task {
            SideTask::IncrementCounter { by, .. } => {
                *counts.entry(subscription_id).or_insert(0) += by;
            }
            SideTask::StampForwarded { at, .. } => {
                let latest = stamps.entry(subscription_id).or_insert(at);
                if at > *latest {
                    *latest = at;
                }
            }
        }
    }

    order
        .into_iter()
        .map(|subscription_id| {
            let mut group = Vec::with_capacity(2);
            if let Some(by) = counts.remove(&subscription_id) {
                group.push(SideTask::IncrementCounter { subscription_id: subscription_id.clone(), by });
            }
            if let Some(at) = stamps.remove(&subscription_id) {
                group.push(SideTask::StampForwarded { subscription_id, at });
            }
            group
        })
        .collect()
}

enum ForwardResult {
    NotRequested,
    Delivered(DateTime<Utc>),
    Failed(String),
}

enum QueueResult {
    NotRequested,
    Skipped(String),
    Processed(ProcessOutcome),
}
