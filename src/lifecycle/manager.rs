//! Subscription Manager
//!
//! Facade over the provider and tracking store for the whole subscription
//! lifecycle: registration, deletion, and the periodic maintenance pass
//! (renew, then reconcile).

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::collaborators::{find_record, ItemSource, SubscriptionSource, TrackingStore};
use crate::directives::Directives;
use crate::error::{with_timeout, SubsyncError, SubsyncResult};
use crate::model::{
    RecordPatch, StoredRecord, Subscription, SubscriptionRequest, TrackingRecord, TrackingStatus,
};
use crate::resolver::ItemResolver;
use super::reconcile::{Reconciler, SyncReport};
use super::renewal::{RenewalReport, SubscriptionRenewer};

/// Lifecycle tunables
#[derive(Debug, Clone)]
pub struct LifecycleSettings {
    /// Longest lifetime the provider grants
    pub max_lifetime: chrono::Duration,

    /// Renew when less than this remains
    pub renewal_threshold: chrono::Duration,

    /// Deadline for each collaborator call
    pub upstream_timeout: Duration,

    /// Endpoint the provider should notify, used when a request has none
    pub notification_url: Option<String>,

    /// Tracking store scope
    pub record_scope: String,
}

impl Default for LifecycleSettings {
    fn default() -> Self {
        Self {
            max_lifetime: chrono::Duration::days(3),
            renewal_threshold: chrono::Duration::hours(24),
            upstream_timeout: Duration::from_secs(30),
            notification_url: None,
            record_scope: String::new(),
        }
    }
}

/// Result of one maintenance pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MaintenanceReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub renewal: RenewalReport,
    pub sync: SyncReport,
}

/// A newly registered subscription and its tracking record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedSubscription {
    pub subscription: Subscription,

    /// `None` when the record write failed; the next reconciliation creates it
    pub record: Option<StoredRecord>,
}

pub struct SubscriptionManager {
    source: Arc<dyn SubscriptionSource>,
    store: Arc<dyn TrackingStore>,
    resolver: ItemResolver,
    renewer: SubscriptionRenewer,
    reconciler: Reconciler,
    settings: LifecycleSettings,
}

impl SubscriptionManager {
    pub fn new(
        source: Arc<dyn SubscriptionSource>,
        store: Arc<dyn TrackingStore>,
        items: Arc<dyn ItemSource>,
        settings: LifecycleSettings,
    ) -> Self {
        let renewer = SubscriptionRenewer::new(source.clone(), settings.max_lifetime, settings.upstream_timeout);
        let reconciler = Reconciler::new(source.clone(), store.clone(), items.clone(), settings.upstream_timeout)
            .with_scope(&settings.record_scope);

        Self {
            resolver: ItemResolver::new(items, settings.upstream_timeout),
            source,
            store,
            renewer,
            reconciler,
            settings,
        }
    }

    pub fn settings(&self) -> &LifecycleSettings {
        &self.settings
    }

    pub fn renewer(&self) -> &SubscriptionRenewer {
        &self.renewer
    }

    pub fn reconciler(&self) -> &Reconciler {
        &self.reconciler
    }

    /// Register a subscription and start tracking it
    ///
    /// The requested expiry is replaced with `now + max_lifetime`; an empty
    /// notification URL falls back to the configured one.
    pub async fn create_subscription(&self, mut request: SubscriptionRequest) -> SubsyncResult<CreatedSubscription> {
        if request.resource_path.trim().is_empty() {
            return Err(SubsyncError::validation("resource path is required"));
        }
        if request.change_type.trim().is_empty() {
            return Err(SubsyncError::validation("change type is required"));
        }

        if request.notification_url.trim().is_empty() {
            request.notification_url = self.settings.notification_url.clone().ok_or_else(|| {
                SubsyncError::validation("no notification URL given and none configured")
            })?;
        }
        validate_url("notification URL", &request.notification_url)?;

        let directives = Directives::parse_optional(request.client_state.as_deref());
        if let Some(forward) = &directives.forward {
            validate_url("forward directive", forward)?;
        }

        request.expires_at = Utc::now() + self.settings.max_lifetime;
        let client_state = request.client_state.clone();

        let subscription = with_timeout(
            "create_subscription",
            self.settings.upstream_timeout,
            self.source.create_subscription(request),
        ).await?;
        info!("Created subscription {} on {}", subscription.id, subscription.resource_path);

        let info = self.resolver.describe(&subscription.resource_path).await;
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
            client_state,
            is_proxy: directives.forward.is_some(),
            forwarding_url: directives.forward,
        };

        let record = match with_timeout("create_record", self.settings.upstream_timeout, self.store.create_record(record)).await {
            Ok(stored) => Some(stored),
            Err(e) => {
                warn!("Subscription {} created but its tracking record was not: {}", subscription.id, e);
                None
            }
        };

        Ok(CreatedSubscription { subscription, record })
    }

    /// Delete a subscription and mark its record Deleted
    ///
    /// Returns whether a tracking record changed. A subscription the provider
    /// no longer knows is treated as already deleted.
    pub async fn delete_subscription(&self, id: &str) -> SubsyncResult<bool> {
        match with_timeout("delete_subscription", self.settings.upstream_timeout, self.source.delete_subscription(id)).await {
            Ok(()) => info!("Deleted subscription {}", id),
            Err(SubsyncError::NotFound { .. }) => debug!("Subscription {} already gone upstream", id),
            Err(e) => return Err(e),
        }

        let stored = with_timeout(
            "list_records",
            self.settings.upstream_timeout,
            find_record(self.store.as_ref(), &self.settings.record_scope, id),
        ).await?;

        match stored {
            Some(stored) if stored.record.is_active() => {
                let patch = RecordPatch { status: Some(TrackingStatus::Deleted), ..Default::default() };
                with_timeout("patch_record", self.settings.upstream_timeout, self.store.patch_record(&stored.id, patch)).await?;
                Ok(true)
            }
            Some(_) => Ok(false),
            None => {
                debug!("No tracking record for deleted subscription {}", id);
                Ok(false)
            }
        }
    }

    /// Renew then reconcile; never fails
    pub async fn run_maintenance(&self) -> MaintenanceReport {
        let started_at = Utc::now();
        let renewal = self.renewer.renew_expiring(self.settings.renewal_threshold).await;
        let sync = self.reconciler.sync().await;

        MaintenanceReport { started_at, finished_at: Utc::now(), renewal, sync }
    }

    /// Run maintenance every `interval` until `cancel` fires
    pub fn spawn_periodic(self: Arc<Self>, interval: Duration, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        info!("Periodic maintenance stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        let report = self.run_maintenance().await;
                        log_maintenance(&report);
                    }
                }
            }
        })
    }
}

fn log_maintenance(report: &MaintenanceReport) {
    info!(
        "Maintenance: renewed {}/{} ({} failed), sync +{} ~{} -{}",
        report.renewal.renewed,
        report.renewal.checked,
        report.renewal.failed,
        report.sync.created,
        report.sync.updated,
        report.sync.deleted_marked,
    );
    if let Some(e) = &report.renewal.error {
        error!("Maintenance renewal pass failed: {}", e);
    }
    for e in &report.sync.errors {
        error!("Maintenance reconciliation error: {}", e);
    }
}

fn validate_url(what: &str, value: &str) -> SubsyncResult<()> {
    let parsed = url::Url::parse(value)
        .map_err(|e| SubsyncError::validation(format!("{} '{}' is not a valid URL: {}", what, value, e)))?;
    match parsed.scheme() {
        "http" | "https" => Ok(()),
        scheme => Err(SubsyncError::validation(format!("{} must be http(s), got '{}'", what, scheme))),
    }
}
