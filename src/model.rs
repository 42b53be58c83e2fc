//! Data Model
//!
//! Subscriptions as the provider reports them, tracking records as the local
//! store keeps them, and the transient notification and item shapes that flow
//! through the dispatcher.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Display name used when resource metadata cannot be resolved
pub const UNRESOLVED_DISPLAY_NAME: &str = "(unresolved resource)";

/// A live subscription held by the change-notification provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subscription {
    pub id: String,

    /// Monitored resource path (e.g. `sites/{site}/lists/{list}`)
    #[serde(rename = "resource")]
    pub resource_path: String,

    pub change_type: String,

    pub notification_url: String,

    #[serde(rename = "expirationDateTime")]
    pub expires_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_state: Option<String>,
}

impl Subscription {
    /// Lifetime left before the provider drops this subscription
    pub fn remaining_lifetime(&self, now: DateTime<Utc>) -> Duration {
        self.expires_at - now
    }

    /// Whether the provider has already let this subscription lapse
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// Registration request sent to the provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionRequest {
    #[serde(rename = "resource")]
    pub resource_path: String,
    pub change_type: String,
    pub notification_url: String,
    #[serde(rename = "expirationDateTime")]
    pub expires_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_state: Option<String>,
}

/// Tracking record status; only ever moves Active -> Deleted implicitly
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrackingStatus {
    Active,
    Deleted,
}

impl fmt::Display for TrackingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrackingStatus::Active => write!(f, "Active"),
            TrackingStatus::Deleted => write!(f, "Deleted"),
        }
    }
}

/// Kind of resource a subscription monitors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    List,
    DocumentLibrary,
    Mailbox,
    Calendar,
    Unknown,
}

impl ResourceKind {
    /// Infer the kind from the shape of a resource path
    pub fn from_path(resource_path: &str) -> Self {
        let path = resource_path.trim_matches('/').to_lowercase();
        let segments: Vec<&str> = path.split('/').collect();

        if segments.contains(&"lists") {
            ResourceKind::List
        } else if segments.contains(&"drive") || segments.contains(&"drives") {
            ResourceKind::DocumentLibrary
        } else if segments.contains(&"messages") || segments.contains(&"mailfolders") {
            ResourceKind::Mailbox
        } else if segments.contains(&"events") || segments.contains(&"calendar") {
            ResourceKind::Calendar
        } else {
            ResourceKind::Unknown
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ResourceKind::List => "list",
            ResourceKind::DocumentLibrary => "document_library",
            ResourceKind::Mailbox => "mailbox",
            ResourceKind::Calendar => "calendar",
            ResourceKind::Unknown => "unknown",
        };
        write!(f, "{}", name)
    }
}

/// Display metadata for a monitored resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceInfo {
    pub kind: ResourceKind,
    pub display_name: String,
}

impl ResourceInfo {
    /// Placeholder used when the item source cannot describe the resource
    pub fn placeholder(resource_path: &str) -> Self {
        Self {
            kind: ResourceKind::from_path(resource_path),
            display_name: UNRESOLVED_DISPLAY_NAME.to_string(),
        }
    }

    pub fn is_placeholder(&self) -> bool {
        self.display_name == UNRESOLVED_DISPLAY_NAME
    }
}

/// Durable mirror of one subscription
///
/// `client_state`, `forwarding_url`, `is_proxy`, `notification_count` and
/// `last_forwarded_at` are owned locally; the provider never echoes them back
/// reliably, so reconciliation must not overwrite them once set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackingRecord {
    pub subscription_id: String,
    pub resource_path: String,
    pub resource_display_name: String,
    pub resource_kind: ResourceKind,
    pub status: TrackingStatus,
    pub change_type: String,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,

    // Locally owned
    #[serde(default)]
    pub notification_count: u64,
    #[serde(default)]
    pub last_forwarded_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub client_state: Option<String>,
    #[serde(default)]
    pub forwarding_url: Option<String>,
    #[serde(default)]
    pub is_proxy: bool,
}

impl TrackingRecord {
    pub fn is_active(&self) -> bool {
        self.status == TrackingStatus::Active
    }
}

/// Tracking record as stored, with the store's own row identifier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredRecord {
    pub id: String,
    pub record: TrackingRecord,
}

/// Partial update for a tracking record; `None` leaves a field untouched
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource_display_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource_kind: Option<ResourceKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<TrackingStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub change_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notification_count: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_forwarded_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_state: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub forwarding_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_proxy: Option<bool>,
}

impl RecordPatch {
    pub fn is_empty(&self) -> bool {
        *self == RecordPatch::default()
    }

    /// Apply every set field to `record`
    pub fn apply_to(&self, record: &mut TrackingRecord) {
        if let Some(value) = &self.resource_path {
            record.resource_path = value.clone();
        }
        if let Some(value) = &self.resource_display_name {
            record.resource_display_name = value.clone();
        }
        if let Some(value) = self.resource_kind {
            record.resource_kind = value;
        }
        if let Some(value) = self.status {
            record.status = value;
        }
        if let Some(value) = &self.change_type {
            record.change_type = value.clone();
        }
        if let Some(value) = self.expires_at {
            record.expires_at = Some(value);
        }
        if let Some(value) = self.notification_count {
            record.notification_count = value;
        }
        if let Some(value) = self.last_forwarded_at {
            record.last_forwarded_at = Some(value);
        }
        if let Some(value) = &self.client_state {
            record.client_state = Some(value.clone());
        }
        if let Some(value) = &self.forwarding_url {
            record.forwarding_url = Some(value.clone());
        }
        if let Some(value) = self.is_proxy {
            record.is_proxy = value;
        }
    }
}

/// One change event delivered by the provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub subscription_id: String,

    /// Path of the changed resource
    #[serde(rename = "resource")]
    pub resource_path: String,

    #[serde(default)]
    pub change_type: String,

    #[serde(default)]
    pub resource_data: Option<Value>,

    #[serde(default)]
    pub client_state: Option<String>,

    #[serde(default)]
    pub tenant_id: Option<String>,
}

impl Notification {
    /// Explicit item identifier carried in `resourceData`, if any
    pub fn item_id(&self) -> Option<String> {
        self.resource_data.as_ref().and_then(item_id_from_resource_data)
    }
}

/// Item identifier from a notification's `resourceData`, when present
pub fn item_id_from_resource_data(data: &Value) -> Option<String> {
    ["id", "itemId", "ItemId"]
        .iter()
        .find_map(|key| match data.get(*key) {
            Some(Value::String(s)) if !s.trim().is_empty() => Some(s.trim().to_string()),
            Some(Value::Number(n)) => Some(n.to_string()),
            _ => None,
        })
}

/// A concrete item fetched from the item source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Item {
    pub id: String,
    pub resource_path: String,

    /// Display name of the containing list or library, when known
    #[serde(default)]
    pub list_display_name: Option<String>,

    #[serde(default)]
    pub fields: Map<String, Value>,

    #[serde(default)]
    pub is_folder: bool,

    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,

    pub modified_at: DateTime<Utc>,
}

impl Item {
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }
}

/// Record produced by a processor for a work queue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkRecord {
    /// Reference back to the originating item
    pub reference: String,
    pub processor: String,
    pub queue_name: String,
    pub payload: Map<String, Value>,
}

/// Outcome of submitting a work record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SubmissionResult {
    pub fn accepted<S: Into<String>>(id: S) -> Self {
        Self { success: true, id: Some(id.into()), error: None }
    }

    pub fn rejected<S: Into<String>>(error: S) -> Self {
        Self { success: false, id: None, error: Some(error.into()) }
    }
}
