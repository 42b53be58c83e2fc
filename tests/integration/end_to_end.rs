//! End-to-End Integration Tests
//!
//! Intake request to forward delivery, work-queue submission and tracking
//! record side effects, wired over the in-memory collaborators.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::{json, Map, Value};

use subsync::collaborators::{MemoryItemSource, MemoryTrackingStore, MemoryWorkQueue, RecordingForwarder};
use subsync::directives::{Directives, QueueHint};
use subsync::dispatch::{
    DispatchSettings, IntakeOutcome, IntakeRequest, NotificationDispatcher, SideTaskOutcome,
};
use subsync::model::{Item, ResourceKind, TrackingRecord, TrackingStatus};
use subsync::processor::{default_registry, ProcessOutcome, QUEUE_PROCESSOR_NAME};

const RESOURCE: &str = "sites/contoso/lists/invoices";

struct Harness {
    store: Arc<MemoryTrackingStore>,
    forwarder: Arc<RecordingForwarder>,
    items: Arc<MemoryItemSource>,
    queue: Arc<MemoryWorkQueue>,
    dispatcher: NotificationDispatcher,
}

fn harness() -> Harness {
    let store = Arc::new(MemoryTrackingStore::new());
    let forwarder = Arc::new(RecordingForwarder::new());
    let items = Arc::new(MemoryItemSource::new());
    let queue = Arc::new(MemoryWorkQueue::new());

    let dispatcher = NotificationDispatcher::new(
        store.clone(),
        forwarder.clone(),
        items.clone(),
        queue.clone(),
        Arc::new(default_registry()),
        DispatchSettings {
            source_name: "subsync-test".to_string(),
            default_queue: "Fallback".to_string(),
            forward_timeout: Duration::from_millis(500),
            upstream_timeout: Duration::from_secs(2),
            record_scope: String::new(),
            dedup_window: Duration::from_secs(60),
            dedup_max_entries: 1000,
        },
    );

    Harness { store, forwarder, items, queue, dispatcher }
}

fn tracking_record(subscription_id: &str, status: TrackingStatus, count: u64, client_state: Option<&str>) -> TrackingRecord {
    TrackingRecord {
        subscription_id: subscription_id.to_string(),
        resource_path: RESOURCE.to_string(),
        resource_display_name: "Invoices".to_string(),
        resource_kind: ResourceKind::List,
        status,
        change_type: "updated".to_string(),
        expires_at: Some(Utc::now() + chrono::Duration::days(2)),
        notification_count: count,
        last_forwarded_at: None,
        client_state: client_state.map(str::to_string),
        forwarding_url: None,
        is_proxy: false,
    }
}

fn invoice_item(id: &str) -> Item {
    let mut fields = Map::new();
    fields.insert("Title".to_string(), json!("INV-001"));
    fields.insert("Amount".to_string(), json!(125.5));

    Item {
        id: id.to_string(),
        resource_path: RESOURCE.to_string(),
        list_display_name: Some("Invoices".to_string()),
        fields,
        is_folder: false,
        created_at: Some(Utc::now() - chrono::Duration::hours(1)),
        modified_at: Utc::now(),
    }
}

fn notification(subscription_id: &str, client_state: Option<&str>, item_id: Option<&str>) -> Value {
    let mut event = json!({
        "subscriptionId": subscription_id,
        "resource": RESOURCE,
        "changeType": "updated",
        "tenantId": "tenant-1",
    });
    if let Some(state) = client_state {
        event["clientState"] = json!(state);
    }
    if let Some(id) = item_id {
        event["resourceData"] = json!({ "id": id });
    }
    event
}

fn batch(events: Vec<Value>) -> String {
    json!({ "value": events }).to_string()
}

async fn dispatch(h: &Harness, body: String) -> subsync::dispatch::BatchReport {
    match h.dispatcher.handle(IntakeRequest::batch(body)).await.unwrap() {
        IntakeOutcome::Batch(report) => report,
        other => panic!("expected a batch report, got {:?}", other),
    }
}

#[tokio::test]
async fn test_forward_and_queue_directives_fan_out() {
    let raw = "forward:https://x.example/y;uipath:QueueA";
    let directives = Directives::parse(raw);
    assert_eq!(directives.forward.as_deref(), Some("https://x.example/y"));
    assert_eq!(directives.queue, Some(QueueHint::Named("QueueA".to_string())));
    assert_eq!(directives.to_json(), json!({"forward": "https://x.example/y", "uipathQueue": "QueueA"}));

    let h = harness();
    h.store.seed(tracking_record("S1", TrackingStatus::Active, 0, Some(raw)));
    h.items.add_item(invoice_item("42"));

    let event = notification("S1", Some(raw), Some("42"));
    let report = dispatch(&h, batch(vec![event.clone()])).await;

    assert_eq!(report.received, 1);
    assert_eq!(report.processed, 1);
    let outcome = &report.items[0];
    assert!(outcome.forwarded);
    match outcome.processing.as_ref() {
        Some(ProcessOutcome::Submitted { processor, queue, .. }) => {
            assert_eq!(processor, QUEUE_PROCESSOR_NAME);
            assert_eq!(queue, "QueueA");
        }
        other => panic!("expected a submission, got {:?}", other),
    }

    let deliveries = h.forwarder.deliveries();
    assert_eq!(deliveries.len(), 1);
    let (url, envelope) = &deliveries[0];
    assert_eq!(url, "https://x.example/y");
    assert_eq!(envelope.source, "subsync-test");
    assert_eq!(envelope.original_event, event);
    assert_eq!(envelope.metadata.subscription_id, "S1");
    assert_eq!(envelope.metadata.tenant_id.as_deref(), Some("tenant-1"));

    let submissions = h.queue.submissions();
    assert_eq!(submissions.len(), 1);
    assert_eq!(submissions[0].0, "QueueA");

    let record = h.store.find("S1").unwrap();
    assert_eq!(record.notification_count, 1);
    assert!(record.last_forwarded_at.is_some());
}

#[tokio::test]
async fn test_counter_increments_only_for_active_records() {
    let h = harness();
    h.store.seed(tracking_record("S1", TrackingStatus::Active, 5, None));

    let report = dispatch(&h, batch(vec![notification("S1", None, None)])).await;
    assert_eq!(report.processed, 1);
    assert_eq!(h.store.find("S1").unwrap().notification_count, 6);

    let h = harness();
    h.store.seed(tracking_record("S1", TrackingStatus::Deleted, 5, None));
    let writes_before = h.store.write_count();

    let report = dispatch(&h, batch(vec![notification("S1", None, None)])).await;
    let record = h.store.find("S1").unwrap();
    assert_eq!(record.notification_count, 5);
    assert_eq!(record.status, TrackingStatus::Deleted);
    assert_eq!(h.store.write_count(), writes_before);
    assert!(report
        .side_tasks
        .iter()
        .any(|task| task.result == SideTaskOutcome::SkippedDeleted));
}

#[tokio::test]
async fn test_validation_handshake_echoes_token() {
    let h = harness();

    let response = h.dispatcher.respond(IntakeRequest::validation("Validation: token/with spaces")).await;
    assert_eq!(response.status, 200);
    assert_eq!(response.content_type, "text/plain");
    assert_eq!(response.body, "Validation: token/with spaces");

    assert!(h.forwarder.deliveries().is_empty());
    assert_eq!(h.store.write_count(), 0);
}

#[tokio::test]
async fn test_forwarded_echo_is_suppressed() {
    let h = harness();
    let raw = "forward:https://x.example/y";
    h.store.seed(tracking_record("S1", TrackingStatus::Active, 0, Some(raw)));

    let first = dispatch(&h, batch(vec![notification("S1", Some(raw), None)])).await;
    assert_eq!(first.processed, 1);
    assert_eq!(first.duplicates, 0);

    // The destination routes the same change straight back to us
    let echo = dispatch(&h, batch(vec![notification("S1", Some(raw), None)])).await;
    assert_eq!(echo.processed, 0);
    assert_eq!(echo.duplicates, 1);
    assert_eq!(echo.items[0].reason.as_deref(), Some("duplicate"));

    assert_eq!(h.forwarder.deliveries().len(), 1);
    assert_eq!(h.store.find("S1").unwrap().notification_count, 1);
}

#[tokio::test]
async fn test_malformed_requests_are_rejected() {
    let h = harness();

    for body in ["{not json", r#"{"value": "nope"}"#, r#"{"events": []}"#] {
        let response = h.dispatcher.respond(IntakeRequest::batch(body)).await;
        assert_eq!(response.status, 400, "body {:?} should be rejected", body);
    }
    assert_eq!(h.dispatcher.respond(IntakeRequest::default()).await.status, 400);
}

#[tokio::test]
async fn test_batch_reply_is_json_report() {
    let h = harness();
    h.store.seed(tracking_record("S1", TrackingStatus::Active, 0, None));

    let body = batch(vec![notification("S1", None, None), json!({"unexpected": true})]);
    let response = h.dispatcher.respond(IntakeRequest::batch(body)).await;
    assert_eq!(response.status, 200);
    assert_eq!(response.content_type, "application/json");

    let report: Value = serde_json::from_str(&response.body).unwrap();
    assert_eq!(report["received"], 2);
    assert_eq!(report["processed"], 1);
    assert!(report["items"][1]["error"].is_string());
}
