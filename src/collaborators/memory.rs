//! In-Memory Collaborators
//!
//! Process-local implementations of every collaborator trait. They back the
//! command line tool (through a JSON snapshot, see [`LocalState`]) and the test
//! suites, and support simple failure injection.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::debug;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

use crate::collaborators::traits::{Forwarder, ItemSource, SubscriptionSource, TrackingStore, WorkQueue};
use crate::dispatch::envelope::ForwardEnvelope;
use crate::error::{SubsyncError, SubsyncResult};
use crate::model::{
    Item, RecordPatch, ResourceInfo, StoredRecord, SubmissionResult, Subscription,
    SubscriptionRequest, TrackingRecord, WorkRecord,
};

/// In-memory change-notification provider
pub struct MemoryProvider {
    subscriptions: RwLock<HashMap<String, Subscription>>,
    max_lifetime: chrono::Duration,
    failing_renewals: RwLock<HashSet<String>>,
    list_failure: RwLock<Option<String>>,
    renew_calls: Mutex<Vec<(String, DateTime<Utc>)>>,
}

impl MemoryProvider {
    pub fn new(max_lifetime: chrono::Duration) -> Self {
        Self {
            subscriptions: RwLock::new(HashMap::new()),
            max_lifetime,
            failing_renewals: RwLock::new(HashSet::new()),
            list_failure: RwLock::new(None),
            renew_calls: Mutex::new(Vec::new()),
        }
    }

    pub fn with_subscriptions(max_lifetime: chrono::Duration, subscriptions: Vec<Subscription>) -> Self {
        let provider = Self::new(max_lifetime);
        for subscription in subscriptions {
            provider.insert(subscription);
        }
        provider
    }

    pub fn insert(&self, subscription: Subscription) {
        self.subscriptions.write().insert(subscription.id.clone(), subscription);
    }

    /// Drop a subscription as if it had expired upstream
    pub fn expire(&self, id: &str) {
        self.subscriptions.write().remove(id);
    }

    pub fn get(&self, id: &str) -> Option<Subscription> {
        self.subscriptions.read().get(id).cloned()
    }

    /// Make renewals of `id` fail
    pub fn fail_renewal_of(&self, id: &str) {
        self.failing_renewals.write().insert(id.to_string());
    }

    /// Make listing fail with `message`
    pub fn fail_listing(&self, message: &str) {
        *self.list_failure.write() = Some(message.to_string());
    }

    /// Every renewal request received, in order
    pub fn renew_calls(&self) -> Vec<(String, DateTime<Utc>)> {
        self.renew_calls.lock().clone()
    }

    pub fn snapshot(&self) -> Vec<Subscription> {
        let mut subscriptions: Vec<Subscription> = self.subscriptions.read().values().cloned().collect();
        subscriptions.sort_by(|a, b| a.id.cmp(&b.id));
        subscriptions
    }

    fn check_expiry(&self, expires_at: DateTime<Utc>) -> SubsyncResult<()> {
        // Allow a little clock skew between caller and provider
        let limit = Utc::now() + self.max_lifetime + chrono::Duration::seconds(5);
        if expires_at > limit {
            return Err(SubsyncError::upstream(
                "subscription_expiry",
                format!("expiration {} exceeds maximum lifetime", expires_at.to_rfc3339()),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl SubscriptionSource for MemoryProvider {
    async fn list_subscriptions(&self) -> SubsyncResult<Vec<Subscription>> {
        if let Some(message) = self.list_failure.read().clone() {
            return Err(SubsyncError::upstream("list_subscriptions", message));
        }
        Ok(self.snapshot())
    }

    async fn create_subscription(&self, request: SubscriptionRequest) -> SubsyncResult<Subscription> {
        self.check_expiry(request.expires_at)?;

        let subscription = Subscription {
            id: uuid::Uuid::new_v4().to_string(),
            resource_path: request.resource_path,
            change_type: request.change_type,
            notification_url: request.notification_url,
            expires_at: request.expires_at,
            client_state: request.client_state,
        };
        self.insert(subscription.clone());
        debug!("Memory provider created subscription {}", subscription.id);
        Ok(subscription)
    }

    async fn renew_subscription(&self, id: &str, expires_at: DateTime<Utc>) -> SubsyncResult<Subscription> {
        self.renew_calls.lock().push((id.to_string(), expires_at));

        if self.failing_renewals.read().contains(id) {
            return Err(SubsyncError::upstream("renew_subscription", format!("provider rejected renewal of {}", id)));
        }
        self.check_expiry(expires_at)?;

        let mut subscriptions = self.subscriptions.write();
        let subscription = subscriptions
            .get_mut(id)
            .ok_or_else(|| SubsyncError::not_found(format!("subscription {}", id)))?;
        subscription.expires_at = expires_at;
        Ok(subscription.clone())
    }

    async fn delete_subscription(&self, id: &str) -> SubsyncResult<()> {
        match self.subscriptions.write().remove(id) {
            Some(_) => Ok(()),
            None => Err(SubsyncError::not_found(format!("subscription {}", id))),
        }
    }
}

/// In-memory tracking store
#[derive(Default)]
pub struct MemoryTrackingStore {
    records: RwLock<Vec<StoredRecord>>,
    writes: Mutex<u64>,
    fail_patches: RwLock<bool>,
}

impl MemoryTrackingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_records(records: Vec<StoredRecord>) -> Self {
        let store = Self::new();
        *store.records.write() = records;
        store
    }

    /// Insert a record with a generated store id
    pub fn seed(&self, record: TrackingRecord) -> String {
        let id = uuid::Uuid::now_v7().to_string();
        self.records.write().push(StoredRecord { id: id.clone(), record });
        id
    }

    pub fn find(&self, subscription_id: &str) -> Option<TrackingRecord> {
        self.records
            .read()
            .iter()
            .find(|stored| stored.record.subscription_id == subscription_id)
            .map(|stored| stored.record.clone())
    }

    pub fn snapshot(&self) -> Vec<StoredRecord> {
        self.records.read().clone()
    }

    /// Number of create and patch calls served
    pub fn write_count(&self) -> u64 {
        *self.writes.lock()
    }

    /// Make every patch call fail
    pub fn fail_patches(&self, fail: bool) {
        *self.fail_patches.write() = fail;
    }
}

#[async_trait]
impl TrackingStore for MemoryTrackingStore {
    async fn list_records(&self, scope: &str) -> SubsyncResult<Vec<StoredRecord>> {
        Ok(self.records
            .read()
            .iter()
            .filter(|stored| stored.record.resource_path.starts_with(scope))
            .cloned()
            .collect())
    }

    async fn create_record(&self, record: TrackingRecord) -> SubsyncResult<StoredRecord> {
        let stored = StoredRecord {
            id: uuid::Uuid::now_v7().to_string(),
            record,
        };
        self.records.write().push(stored.clone());
        *self.writes.lock() += 1;
        Ok(stored)
    }

    async fn patch_record(&self, id: &str, patch: RecordPatch) -> SubsyncResult<StoredRecord> {
        if *self.fail_patches.read() {
            return Err(SubsyncError::upstream("patch_record", "tracking store unavailable"));
        }

        let mut records = self.records.write();
        let stored = records
            .iter_mut()
            .find(|stored| stored.id == id)
            .ok_or_else(|| SubsyncError::not_found(format!("tracking record {}", id)))?;
        patch.apply_to(&mut stored.record);
        *self.writes.lock() += 1;
        Ok(stored.clone())
    }
}

/// In-memory item source keyed by resource path
#[derive(Default)]
pub struct MemoryItemSource {
    items: RwLock<HashMap<String, Vec<Item>>>,
    resources: RwLock<HashMap<String, ResourceInfo>>,
}

impl MemoryItemSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_item(&self, item: Item) {
        self.items
            .write()
            .entry(item.resource_path.clone())
            .or_default()
            .push(item);
    }

    pub fn describe(&self, resource_path: &str, info: ResourceInfo) {
        self.resources.write().insert(resource_path.to_string(), info);
    }

    pub fn items(&self) -> Vec<Item> {
        self.items.read().values().flatten().cloned().collect()
    }

    pub fn resources(&self) -> HashMap<String, ResourceInfo> {
        self.resources.read().clone()
    }
}

#[async_trait]
impl ItemSource for MemoryItemSource {
    async fn get_item(&self, resource_path: &str, item_id: &str) -> SubsyncResult<Option<Item>> {
        Ok(self.items
            .read()
            .get(resource_path)
            .and_then(|items| items.iter().find(|item| item.id == item_id))
            .cloned())
    }

    async fn list_recently_modified(&self, resource_path: &str, limit: usize) -> SubsyncResult<Vec<Item>> {
        let mut items = self.items.read().get(resource_path).cloned().unwrap_or_default();
        items.sort_by(|a, b| b.modified_at.cmp(&a.modified_at));
        items.truncate(limit);
        Ok(items)
    }

    async fn describe_resource(&self, resource_path: &str) -> SubsyncResult<ResourceInfo> {
        self.resources
            .read()
            .get(resource_path)
            .cloned()
            .ok_or_else(|| SubsyncError::not_found(format!("resource {}", resource_path)))
    }
}

/// Work queue that records submissions
#[derive(Default)]
pub struct MemoryWorkQueue {
    submissions: Mutex<Vec<(String, WorkRecord)>>,
    rejected_queues: RwLock<HashSet<String>>,
}

impl MemoryWorkQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make submissions to `queue_name` fail
    pub fn reject_queue(&self, queue_name: &str) {
        self.rejected_queues.write().insert(queue_name.to_string());
    }

    pub fn submissions(&self) -> Vec<(String, WorkRecord)> {
        self.submissions.lock().clone()
    }
}

#[async_trait]
impl WorkQueue for MemoryWorkQueue {
    async fn submit(&self, queue_name: &str, record: &WorkRecord) -> SubsyncResult<SubmissionResult> {
        if self.rejected_queues.read().contains(queue_name) {
            return Err(SubsyncError::upstream("submit", format!("queue '{}' rejected the item", queue_name)));
        }

        let mut submissions = self.submissions.lock();
        submissions.push((queue_name.to_string(), record.clone()));
        Ok(SubmissionResult::accepted(format!("{}-{}", queue_name, submissions.len())))
    }
}

/// Forwarder that records envelopes instead of sending them
#[derive(Default)]
pub struct RecordingForwarder {
    deliveries: Mutex<Vec<(String, ForwardEnvelope)>>,
    failing_urls: RwLock<HashSet<String>>,
    delay: RwLock<Option<Duration>>,
}

impl RecordingForwarder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_url(&self, url: &str) {
        self.failing_urls.write().insert(url.to_string());
    }

    /// Delay every delivery, to exercise deadlines
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.write() = Some(delay);
    }

    pub fn deliveries(&self) -> Vec<(String, ForwardEnvelope)> {
        self.deliveries.lock().clone()
    }
}

#[async_trait]
impl Forwarder for RecordingForwarder {
    async fn forward(&self, url: &str, envelope: &ForwardEnvelope) -> SubsyncResult<()> {
        let delay = *self.delay.read();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing_urls.read().contains(url) {
            return Err(SubsyncError::upstream("forward", format!("{} returned 502", url)));
        }
        self.deliveries.lock().push((url.to_string(), envelope.clone()));
        Ok(())
    }
}

/// Serializable snapshot of the local collaborators
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalState {
    #[serde(default)]
    pub subscriptions: Vec<Subscription>,
    #[serde(default)]
    pub records: Vec<StoredRecord>,
    #[serde(default)]
    pub items: Vec<Item>,
    #[serde(default)]
    pub resources: HashMap<String, ResourceInfo>,
    #[serde(default)]
    pub submissions: Vec<QueuedSubmission>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedSubmission {
    pub queue_name: String,
    pub record: WorkRecord,
}

impl LocalState {
    /// Load a snapshot; a missing file is an empty state
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!("State file {} not found, starting empty", path.display());
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read state file: {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse state file: {}", path.display()))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self).context("Failed to serialize state")?;
        fs::write(path, content)
            .with_context(|| format!("Failed to write state file: {}", path.display()))
    }
}

/// The full set of local collaborators built from one snapshot
pub struct LocalCollaborators {
    pub provider: Arc<MemoryProvider>,
    pub store: Arc<MemoryTrackingStore>,
    pub items: Arc<MemoryItemSource>,
    pub queue: Arc<MemoryWorkQueue>,
    previous_submissions: Vec<QueuedSubmission>,
}

impl LocalCollaborators {
    pub fn from_state(state: LocalState, max_lifetime: chrono::Duration) -> Self {
        let items = MemoryItemSource::new();
        for item in state.items {
            items.add_item(item);
        }
        for (path, info) in state.resources {
            items.describe(&path, info);
        }

        Self {
            provider: Arc::new(MemoryProvider::with_subscriptions(max_lifetime, state.subscriptions)),
            store: Arc::new(MemoryTrackingStore::with_records(state.records)),
            items: Arc::new(items),
            queue: Arc::new(MemoryWorkQueue::new()),
            previous_submissions: state.submissions,
        }
    }

    pub fn to_state(&self) -> LocalState {
        let mut submissions = self.previous_submissions.clone();
        submissions.extend(
            self.queue
                .submissions()
                .into_iter()
                .map(|(queue_name, record)| QueuedSubmission { queue_name, record }),
        );

        LocalState {
            subscriptions: self.provider.snapshot(),
            records: self.store.snapshot(),
            items: self.items.items(),
            resources: self.items.resources(),
            submissions,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ResourceKind, TrackingStatus};
    use tempfile::TempDir;

    fn record(subscription_id: &str, path: &str) -> TrackingRecord {
        TrackingRecord {
            subscription_id: subscription_id.to_string(),
            resource_path: path.to_string(),
            resource_display_name: "Docs".to_string(),
            resource_kind: ResourceKind::List,
            status: TrackingStatus::Active,
            change_type: "updated".to_string(),
            expires_at: None,
            notification_count: 0,
            last_forwarded_at: None,
            client_state: None,
            forwarding_url: None,
            is_proxy: false,
        }
    }

    #[tokio::test]
    async fn test_store_scope_and_patch() {
        let store = MemoryTrackingStore::new();
        let id = store.seed(record("S1", "sites/a/lists/1"));
        store.seed(record("S2", "sites/b/lists/2"));

        assert_eq!(store.list_records("").await.unwrap().len(), 2);
        assert_eq!(store.list_records("sites/a").await.unwrap().len(), 1);

        let patched = store
            .patch_record(&id, RecordPatch { notification_count: Some(3), ..Default::default() })
            .await
            .unwrap();
        assert_eq!(patched.record.notification_count, 3);
        assert_eq!(store.write_count(), 1);

        let missing = store.patch_record("nope", RecordPatch::default()).await;
        assert!(matches!(missing, Err(SubsyncError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_provider_rejects_excessive_expiry() {
        let provider = MemoryProvider::new(chrono::Duration::days(3));
        let request = SubscriptionRequest {
            resource_path: "sites/a/lists/1".to_string(),
            change_type: "updated".to_string(),
            notification_url: "https://hook.example".to_string(),
            expires_at: Utc::now() + chrono::Duration::days(10),
            client_state: None,
        };

        assert!(provider.create_subscription(request.clone()).await.is_err());

        let request = SubscriptionRequest { expires_at: Utc::now() + chrono::Duration::days(1), ..request };
        let created = provider.create_subscription(request).await.unwrap();
        assert!(provider.get(&created.id).is_some());

        provider.delete_subscription(&created.id).await.unwrap();
        assert!(provider.delete_subscription(&created.id).await.is_err());
    }

    #[test]
    fn test_local_state_round_trip() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("state.json");

        let empty = LocalState::load(&path).unwrap();
        assert!(empty.subscriptions.is_empty());

        let mut state = LocalState::default();
        state.records.push(StoredRecord { id: "r1".to_string(), record: record("S1", "sites/a/lists/1") });
        state.save(&path).unwrap();

        let loaded = LocalState::load(&path).unwrap();
        assert_eq!(loaded.records.len(), 1);
        assert_eq!(loaded.records[0].record.subscription_id, "S1");
    }
}
