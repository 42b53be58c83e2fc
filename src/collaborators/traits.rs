//! Collaborator Traits
//!
//! Interfaces to everything outside the routing engine: the change-notification
//! provider, the tracking store, the item source, work queues, and forward
//! destinations. Implementations are expected to be cheap to share behind an
//! `Arc`; the engine applies its own deadlines around every call.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::dispatch::envelope::ForwardEnvelope;
use crate::error::SubsyncResult;
use crate::model::{
    Item, RecordPatch, ResourceInfo, StoredRecord, SubmissionResult, Subscription,
    SubscriptionRequest, TrackingRecord, WorkRecord,
};

/// The external provider that owns subscriptions
#[async_trait]
pub trait SubscriptionSource: Send + Sync {
    /// List every live subscription
    async fn list_subscriptions(&self) -> SubsyncResult<Vec<Subscription>>;

    /// Register a new subscription
    async fn create_subscription(&self, request: SubscriptionRequest) -> SubsyncResult<Subscription>;

    /// Move a subscription's expiry forward
    async fn renew_subscription(&self, id: &str, expires_at: DateTime<Utc>) -> SubsyncResult<Subscription>;

    /// Remove a subscription
    async fn delete_subscription(&self, id: &str) -> SubsyncResult<()>;
}

/// Durable list-like store of tracking records
///
/// The store cannot filter on subscription id, so callers list a scope and
/// filter in memory.
#[async_trait]
pub trait TrackingStore: Send + Sync {
    /// List records whose resource path falls under `scope` (empty = all)
    async fn list_records(&self, scope: &str) -> SubsyncResult<Vec<StoredRecord>>;

    async fn create_record(&self, record: TrackingRecord) -> SubsyncResult<StoredRecord>;

    /// Apply a partial update to the record with store id `id`
    async fn patch_record(&self, id: &str, patch: RecordPatch) -> SubsyncResult<StoredRecord>;
}

/// Source of the items that notifications refer to
#[async_trait]
pub trait ItemSource: Send + Sync {
    async fn get_item(&self, resource_path: &str, item_id: &str) -> SubsyncResult<Option<Item>>;

    /// Items under `resource_path`, most recently modified first
    async fn list_recently_modified(&self, resource_path: &str, limit: usize) -> SubsyncResult<Vec<Item>>;

    /// Kind and display name of a monitored resource
    async fn describe_resource(&self, resource_path: &str) -> SubsyncResult<ResourceInfo>;
}

/// Automation target consumed by processors
#[async_trait]
pub trait WorkQueue: Send + Sync {
    async fn submit(&self, queue_name: &str, record: &WorkRecord) -> SubsyncResult<SubmissionResult>;
}

/// Destination for enriched forward envelopes
#[async_trait]
pub trait Forwarder: Send + Sync {
    async fn forward(&self, url: &str, envelope: &ForwardEnvelope) -> SubsyncResult<()>;
}

/// Find the tracking record for a subscription by listing and filtering
pub async fn find_record(
    store: &dyn TrackingStore,
    scope: &str,
    subscription_id: &str,
) -> SubsyncResult<Option<StoredRecord>> {
    let records = store.list_records(scope).await?;
    Ok(records
        .into_iter()
        .find(|stored| stored.record.subscription_id == subscription_id))
}
