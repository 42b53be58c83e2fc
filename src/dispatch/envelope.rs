//! Forward Envelope
//!
//! Shape posted to a `forward:` destination: the original event untouched,
//! plus enough metadata for the receiver to route it without re-parsing the
//! client state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::directives::Directives;
use crate::model::Notification;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForwardEnvelope {
    pub timestamp: DateTime<Utc>,
    pub source: String,
    pub original_event: Value,
    pub metadata: EnvelopeMetadata,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvelopeMetadata {
    pub subscription_id: String,
    pub resource: String,
    pub change_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
    pub directives: Value,
}

impl ForwardEnvelope {
    pub fn new(
        source: &str,
        original_event: Value,
        notification: &Notification,
        directives: &Directives,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            timestamp,
            source: source.to_string(),
            original_event,
            metadata: EnvelopeMetadata {
                subscription_id: notification.subscription_id.clone(),
                resource: notification.resource_path.clone(),
                change_type: notification.change_type.clone(),
                tenant_id: notification.tenant_id.clone(),
                directives: directives.to_json(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_envelope_serialization() {
        let raw = json!({
            "subscriptionId": "S1",
            "resource": "sites/a/lists/b",
            "changeType": "updated",
            "clientState": "forward:https://x.example/y"
        });
        let notification: Notification = serde_json::from_value(raw.clone()).unwrap();
        let directives = Directives::parse("forward:https://x.example/y");

        let envelope = ForwardEnvelope::new("subsync", raw.clone(), &notification, &directives, Utc::now());
        let value = serde_json::to_value(&envelope).unwrap();

        assert_eq!(value["source"], "subsync");
        assert_eq!(value["originalEvent"], raw);
        assert_eq!(value["metadata"]["subscriptionId"], "S1");
        assert_eq!(value["metadata"]["resource"], "sites/a/lists/b");
        assert_eq!(value["metadata"]["directives"]["forward"], "https://x.example/y");
        assert!(value["metadata"].get("tenantId").is_none());
        assert!(value.get("timestamp").is_some());
    }
}
