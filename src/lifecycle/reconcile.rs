//! Reconciler
//!
//! Aligns the tracking store with the provider's live subscription set:
//!
//! - live subscription, no record: create an `Active` record with zero counters
//! - live subscription, record: refresh upstream-owned fields only
//! - record, no live subscription: mark it `Deleted`
//!
//! Locally owned fields (`client_state`, `forwarding_url`, `is_proxy`,
//! `notification_count`, `last_forwarded_at`) are never overwritten once set.
//! The only time upstream data reaches them is when a record has no client
//! state at all. Running a pass twice against unchanged inputs writes nothing
//! the second time.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::collaborators::{ItemSource, SubscriptionSource, TrackingStore};
use crate::directives::Directives;
use crate::error::with_timeout;
use crate::model::{RecordPatch, StoredRecord, Subscription, TrackingRecord, TrackingStatus};
use crate::resolver::ItemResolver;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub deleted_marked: usize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

impl SyncReport {
    /// Number of store writes the pass performed
    pub fn writes(&self) -> usize {
        self.created + self.updated + self.deleted_marked
    }
}

enum SyncAction {
    Created,
    Updated,
    Unchanged,
    DeletedMarked,
    Failed(String),
}

pub struct Reconciler {
    source: Arc<dyn SubscriptionSource>,
    store: Arc<dyn TrackingStore>,
    resolver: ItemResolver,
    scope: String,
    timeout: Duration,
}

impl Reconciler {
    pub fn new(
        source: Arc<dyn SubscriptionSource>,
        store: Arc<dyn TrackingStore>,
        items: Arc<dyn ItemSource>,
        timeout: Duration,
    ) -> Self {
        Self {
            source,
            store,
            resolver: ItemResolver::new(items, timeout),
            scope: String::new(),
            timeout,
        }
    }

    /// Restrict the pass to records under a resource path prefix
    pub fn with_scope(mut self, scope: &str) -> Self {
        self.scope = scope.to_string();
        self
    }

    /// Read both sides and reconcile them
    pub async fn sync(&self) -> SyncReport {
        let (live, records) = tokio::join!(
            with_timeout("list_subscriptions", self.timeout, self.source.list_subscriptions()),
            with_timeout("list_records", self.timeout, self.store.list_records(&self.scope)),
        );

        // Without both sides a pass would wrongly mark everything Deleted
        let live = match live {
            Ok(live) => live,
            Err(e) => {
                warn!("Reconciliation skipped, cannot list subscriptions: {}", e);
                return SyncReport { errors: vec![e.to_string()], ..Default::default() };
            }
        };
        let records = match records {
            Ok(records) => records,
            Err(e) => {
                warn!("Reconciliation skipped, cannot list tracking records: {}", e);
                return SyncReport { errors: vec![e.to_string()], ..Default::default() };
            }
        };

        let live: Vec<Subscription> = live
            .into_iter()
            .filter(|subscription| subscription.resource_path.starts_with(&self.scope))
            .collect();

        self.reconcile(&live, &records).await
    }

    /// Three-way diff of `live` against `records`
    pub async fn reconcile(&self, live: &[Subscription], records: &[StoredRecord]) -> SyncReport {
        let live_ids: HashSet<&str> = live.iter().map(|s| s.id.as_str()).collect();

        let upserts = join_all(live.iter().map(|subscription| {
            let existing = records
                .iter()
                .find(|stored| stored.record.subscription_id == subscription.id);
            self.upsert(subscription, existing)
        }));

        let orphans = join_all(
            records
                .iter()
                .filter(|stored| !live_ids.contains(stored.record.subscription_id.as_str()))
                .map(|stored| self.mark_deleted(stored)),
        );

        let (upserts, orphans) = tokio::join!(upserts, orphans);

        let mut report = SyncReport::default();
        for action in upserts.into_iter().chain(orphans) {
            match action {
                SyncAction::Created => report.created += 1,
                SyncAction::Updated => report.updated += 1,
                SyncAction::Unchanged => report.unchanged += 1,
                SyncAction::DeletedMarked => report.deleted_marked += 1,
                SyncAction::Failed(error) => report.errors.push(error),
            }
        }

        info!(
            "Reconciliation: {} created, {} updated, {} unchanged, {} marked deleted, {} errors",
            report.created, report.updated, report.unchanged, report.deleted_marked, report.errors.len()
        );
        report
    }

    async fn upsert(&self, subscription: &Subscription, existing: Option<&StoredRecord>) -> SyncAction {
        match existing {
            None => self.create(subscription).await,
            Some(stored) => self.refresh(subscription, stored).await,
        }
    }

    async fn create(&self, subscription: &Subscription) -> SyncAction {
        let info = self.resolver.describe(&subscription.resource_path).await;
        let directives = Directives::parse_optional(subscription.client_state.as_deref());

        let record = TrackingRecord {
            subscription_id: subscription.id.clone(),
            resource_path: subscription.resource_path.clone(),
            resource_display_name: info.display_name,
            resource_kind: info.kind,
            status: TrackingStatus::Active,
            change_type: subscription.change_type.clone(),
            expires_at: Some(subscription.expires_at),
            notification_count: 0,
            last_forwarded_at: None,
            client_state: subscription.client_state.clone(),
            is_proxy: directives.forward.is_some(),
            forwarding_url: directives.forward,
        };

        match with_timeout("create_record", self.timeout, self.store.create_record(record)).await {
            Ok(_) => {
                debug!("Created tracking record for {}", subscription.id);
                SyncAction::Created
            }
            Err(e) => {
                warn!("Failed to create tracking record for {}: {}", subscription.id, e);
                SyncAction::Failed(format!("create {}: {}", subscription.id, e))
            }
        }
    }

    async fn refresh(&self, subscription: &Subscription, stored: &StoredRecord) -> SyncAction {
        let mut patch = upstream_patch(subscription, &stored.record);

        if stored.record.resource_display_name == crate::model::UNRESOLVED_DISPLAY_NAME {
            let info = self.resolver.describe(&subscription.resource_path).await;
            if !info.is_placeholder() {
                patch.resource_display_name = Some(info.display_name);
                if info.kind != stored.record.resource_kind {
                    patch.resource_kind = Some(info.kind);
                }
            }
        }

        if patch.is_empty() {
            return SyncAction::Unchanged;
        }

        match with_timeout("patch_record", self.timeout, self.store.patch_record(&stored.id, patch)).await {
            Ok(_) => {
                debug!("Refreshed tracking record for {}", subscription.id);
                SyncAction::Updated
            }
            Err(e) => {
                warn!("Failed to update tracking record for {}: {}", subscription.id, e);
                SyncAction::Failed(format!("update {}: {}", subscription.id, e))
            }
        }
    }

    async fn mark_deleted(&self, stored: &StoredRecord) -> SyncAction {
        if stored.record.status == TrackingStatus::Deleted {
            return SyncAction::Unchanged;
        }

        let patch = RecordPatch { status: Some(TrackingStatus::Deleted), ..Default::default() };
        match with_timeout("patch_record", self.timeout, self.store.patch_record(&stored.id, patch)).await {
            Ok(_) => {
                info!("Subscription {} is gone, marked its record Deleted", stored.record.subscription_id);
                SyncAction::DeletedMarked
            }
            Err(e) => {
                warn!("Failed to mark {} Deleted: {}", stored.record.subscription_id, e);
                SyncAction::Failed(format!("mark deleted {}: {}", stored.record.subscription_id, e))
            }
        }
    }
}

/// Patch carrying only the upstream-owned fields that differ
fn upstream_patch(subscription: &Subscription, record: &TrackingRecord) -> RecordPatch {
    let mut patch = RecordPatch::default();

    if record.resource_path != subscription.resource_path {
        patch.resource_path = Some(subscription.resource_path.clone());
    }
    if record.change_type != subscription.change_type {
        patch.change_type = Some(subscription.change_type.clone());
    }
    if record.expires_at != Some(subscription.expires_at) {
        patch.expires_at = Some(subscription.expires_at);
    }
    if record.status == TrackingStatus::Deleted {
        // Same id seen live again: reuse the record, counters intact
        patch.status = Some(TrackingStatus::Active);
    }

    if record.client_state.is_none() {
        if let Some(client_state) = &subscription.client_state {
            let directives = Directives::parse(client_state);
            patch.client_state = Some(client_state.clone());
            if record.forwarding_url.is_none() && directives.forward.is_some() {
                // A locally set proxy flag is never cleared from here
                if !record.is_proxy {
                    patch.is_proxy = Some(true);
                }
                patch.forwarding_url = directives.forward;
            }
        }
    }

    patch
}
