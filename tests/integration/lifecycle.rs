//! Lifecycle Integration Tests
//!
//! Renewal, reconciliation and registration against the in-memory provider
//! and tracking store.

use std::sync::Arc;
use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};

use subsync::collaborators::{MemoryItemSource, MemoryProvider, MemoryTrackingStore};
use subsync::lifecycle::{LifecycleSettings, RenewalStatus, SubscriptionManager};
use subsync::model::{
    ResourceInfo, ResourceKind, Subscription, SubscriptionRequest, TrackingRecord, TrackingStatus,
};

const MAX_LIFETIME_DAYS: i64 = 3;

struct World {
    provider: Arc<MemoryProvider>,
    store: Arc<MemoryTrackingStore>,
    items: Arc<MemoryItemSource>,
    manager: SubscriptionManager,
}

fn world(live: Vec<Subscription>) -> World {
    let provider = Arc::new(MemoryProvider::with_subscriptions(ChronoDuration::days(MAX_LIFETIME_DAYS), live));
    let store = Arc::new(MemoryTrackingStore::new());
    let items = Arc::new(MemoryItemSource::new());

    let manager = SubscriptionManager::new(
        provider.clone(),
        store.clone(),
        items.clone(),
        LifecycleSettings {
            max_lifetime: ChronoDuration::days(MAX_LIFETIME_DAYS),
            renewal_threshold: ChronoDuration::hours(24),
            upstream_timeout: Duration::from_secs(2),
            notification_url: Some("https://hooks.example/notify".to_string()),
            record_scope: String::new(),
        },
    );

    World { provider, store, items, manager }
}

fn subscription(id: &str, expires_in: ChronoDuration) -> Subscription {
    Subscription {
        id: id.to_string(),
        resource_path: format!("sites/contoso/lists/{}", id.to_lowercase()),
        change_type: "updated".to_string(),
        notification_url: "https://hooks.example/notify".to_string(),
        expires_at: Utc::now() + expires_in,
        client_state: None,
    }
}

fn mirror(subscription: &Subscription, count: u64) -> TrackingRecord {
    TrackingRecord {
        subscription_id: subscription.id.clone(),
        resource_path: subscription.resource_path.clone(),
        resource_display_name: format!("List {}", subscription.id),
        resource_kind: ResourceKind::List,
        status: TrackingStatus::Active,
        change_type: subscription.change_type.clone(),
        expires_at: Some(subscription.expires_at),
        notification_count: count,
        last_forwarded_at: None,
        client_state: subscription.client_state.clone(),
        forwarding_url: None,
        is_proxy: false,
    }
}

#[tokio::test]
async fn test_renewal_never_exceeds_max_lifetime() {
    let healthy = subscription("B", ChronoDuration::hours(30));
    let w = world(vec![
        subscription("A", ChronoDuration::hours(3)),
        healthy.clone(),
        subscription("C", ChronoDuration::minutes(-5)),
    ]);

    let now = Utc::now();
    let report = w.manager.renewer().renew_expiring_at(ChronoDuration::hours(24), now).await;

    assert_eq!(report.checked, 3);
    assert_eq!(report.renewed, 2);
    assert_eq!(report.skipped, 1);
    assert_eq!(report.failed, 0);

    let bound = now + ChronoDuration::days(MAX_LIFETIME_DAYS);
    for (id, expires_at) in w.provider.renew_calls() {
        assert!(expires_at <= bound, "{} renewed past the maximum lifetime", id);
    }
    for detail in &report.details {
        if let RenewalStatus::Renewed { expires_at } = detail.status {
            assert_eq!(expires_at, bound);
        }
    }
    assert_eq!(w.provider.get("B").unwrap().expires_at, healthy.expires_at);
}

#[tokio::test]
async fn test_upstream_absent_records_marked_deleted() {
    let a = subscription("A", ChronoDuration::days(2));
    let b = subscription("B", ChronoDuration::days(2));
    let c = subscription("C", ChronoDuration::days(2));

    let w = world(vec![a.clone(), b.clone()]);
    for s in [&a, &b, &c] {
        w.store.seed(mirror(s, 4));
    }

    let report = w.manager.reconciler().sync().await;
    assert_eq!(report.deleted_marked, 1);
    assert_eq!(report.created, 0);
    assert!(report.errors.is_empty(), "{:?}", report.errors);

    let deleted = w.store.find("C").unwrap();
    assert_eq!(deleted.status, TrackingStatus::Deleted);
    assert_eq!(deleted.notification_count, 4);

    for s in [&a, &b] {
        let record = w.store.find(&s.id).unwrap();
        assert_eq!(record, mirror(s, 4));
    }
}

#[tokio::test]
async fn test_reconcile_is_idempotent() {
    let w = world(vec![
        subscription("A", ChronoDuration::days(2)),
        subscription("B", ChronoDuration::days(1)),
    ]);
    w.items.describe("sites/contoso/lists/a", ResourceInfo {
        kind: ResourceKind::List,
        display_name: "Invoices".to_string(),
    });

    let first = w.manager.reconciler().sync().await;
    assert_eq!(first.created, 2);
    assert_eq!(w.store.find("A").unwrap().resource_display_name, "Invoices");

    let writes = w.store.write_count();
    let second = w.manager.reconciler().sync().await;
    assert_eq!(second.writes(), 0);
    assert_eq!(second.unchanged, 2);
    assert_eq!(w.store.write_count(), writes);
}

#[tokio::test]
async fn test_reconcile_preserves_local_fields() {
    let mut live = subscription("A", ChronoDuration::days(3));
    live.change_type = "updated,deleted".to_string();
    let w = world(vec![live.clone()]);

    let mut stale = mirror(&subscription("A", ChronoDuration::hours(1)), 9);
    stale.last_forwarded_at = Some(Utc::now() - ChronoDuration::minutes(10));
    stale.client_state = Some("forward:https://x.example/y".to_string());
    stale.forwarding_url = Some("https://x.example/y".to_string());
    stale.is_proxy = true;
    w.store.seed(stale.clone());

    let report = w.manager.reconciler().sync().await;
    assert_eq!(report.updated, 1);

    let record = w.store.find("A").unwrap();
    assert_eq!(record.expires_at, Some(live.expires_at));
    assert_eq!(record.change_type, "updated,deleted");
    assert_eq!(record.notification_count, 9);
    assert_eq!(record.last_forwarded_at, stale.last_forwarded_at);
    assert_eq!(record.client_state, stale.client_state);
    assert_eq!(record.forwarding_url, stale.forwarding_url);
    assert!(record.is_proxy);
}

#[tokio::test]
async fn test_deleted_records_stay_deleted() {
    let gone = subscription("C", ChronoDuration::days(2));
    let w = world(Vec::new());
    let mut record = mirror(&gone, 2);
    record.status = TrackingStatus::Deleted;
    w.store.seed(record);

    let writes = w.store.write_count();
    let report = w.manager.reconciler().sync().await;
    assert_eq!(report.deleted_marked, 0);
    assert_eq!(w.store.write_count(), writes);
    assert_eq!(w.store.find("C").unwrap().status, TrackingStatus::Deleted);
}

#[tokio::test]
async fn test_listing_failure_leaves_records_alone() {
    let a = subscription("A", ChronoDuration::days(2));
    let w = world(vec![a.clone()]);
    w.store.seed(mirror(&a, 1));
    w.provider.fail_listing("provider unavailable");

    let report = w.manager.reconciler().sync().await;
    assert_eq!(report.writes(), 0);
    assert_eq!(report.errors.len(), 1);
    assert_eq!(w.store.find("A").unwrap().status, TrackingStatus::Active);
}

#[tokio::test]
async fn test_create_and_delete_subscription() {
    let w = world(Vec::new());
    w.items.describe("sites/contoso/lists/invoices", ResourceInfo {
        kind: ResourceKind::List,
        display_name: "Invoices".to_string(),
    });

    let request = SubscriptionRequest {
        resource_path: "sites/contoso/lists/invoices".to_string(),
        change_type: "updated".to_string(),
        notification_url: String::new(),
        expires_at: Utc::now() + ChronoDuration::days(30),
        client_state: Some("forward:https://x.example/y;uipath:QueueA".to_string()),
    };
    let created = w.manager.create_subscription(request).await.unwrap();

    let subscription = &created.subscription;
    assert_eq!(subscription.notification_url, "https://hooks.example/notify");
    assert!(subscription.expires_at <= Utc::now() + ChronoDuration::days(MAX_LIFETIME_DAYS));

    let stored = created.record.expect("tracking record should be written");
    assert_eq!(stored.record.resource_display_name, "Invoices");
    assert_eq!(stored.record.forwarding_url.as_deref(), Some("https://x.example/y"));
    assert!(stored.record.is_proxy);

    assert!(w.manager.delete_subscription(&subscription.id).await.unwrap());
    assert!(w.provider.get(&subscription.id).is_none());
    assert_eq!(w.store.find(&subscription.id).unwrap().status, TrackingStatus::Deleted);

    // Second delete: provider no longer knows it and the record is already Deleted
    assert!(!w.manager.delete_subscription(&subscription.id).await.unwrap());
}

#[tokio::test]
async fn test_create_rejects_bad_forward_url() {
    let w = world(Vec::new());
    let request = SubscriptionRequest {
        resource_path: "sites/contoso/lists/invoices".to_string(),
        change_type: "updated".to_string(),
        notification_url: "https://hooks.example/notify".to_string(),
        expires_at: Utc::now(),
        client_state: Some("forward:not a url".to_string()),
    };

    let result = w.manager.create_subscription(request).await;
    assert!(matches!(result, Err(ref e) if e.is_validation()), "{:?}", result);
    assert!(w.provider.snapshot().is_empty());
}
