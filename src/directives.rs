//! Client State Directives
//!
//! Every subscription carries an opaque `clientState` string that the provider
//! echoes back on each notification. We use it as a tiny routing language:
//!
//! ```text
//! forward:https://x.example/y;uipath:QueueA;fields:Title,Status
//! ```
//!
//! Segments are separated by `;` and split on the first `:` only, so URL
//! values keep their own colons. Segments without a `:` are ignored. Keys we
//! don't understand, and recognized keys whose value we can't use, are kept
//! verbatim so the string survives a parse/serialize round trip.

use serde_json::{json, Map, Value};

pub const KEY_FORWARD: &str = "forward";
pub const KEY_PROCESSOR: &str = "processor";
pub const KEY_UIPATH: &str = "uipath";
pub const KEY_QUEUE: &str = "queue";
pub const KEY_DETECT_CHANGES: &str = "detectChanges";
pub const KEY_FIELDS: &str = "fields";

const SEGMENT_SEPARATOR: char = ';';
const KEY_VALUE_SEPARATOR: char = ':';

/// Queue routing requested by the `uipath` (or `queue`) directive
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueHint {
    /// `uipath:true` - route to the configured default queue
    Enabled,
    /// `uipath:false`
    Disabled,
    /// `uipath:<QueueName>` - route to a literal queue
    Named(String),
}

impl QueueHint {
    fn parse(value: &str) -> Self {
        let value = value.trim();
        match value.to_lowercase().as_str() {
            "" | "true" | "yes" | "1" | "on" => QueueHint::Enabled,
            "false" | "no" | "0" | "off" => QueueHint::Disabled,
            _ => QueueHint::Named(value.to_string()),
        }
    }

    fn as_value(&self) -> String {
        match self {
            QueueHint::Enabled => "true".to_string(),
            QueueHint::Disabled => "false".to_string(),
            QueueHint::Named(name) => name.clone(),
        }
    }
}

/// Parsed routing directives
///
/// Derived purely from the raw string and never persisted on its own.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Directives {
    /// Destination for the enriched forward envelope
    pub forward: Option<String>,

    /// Explicit processor name
    pub processor: Option<String>,

    /// Work-queue routing hint
    pub queue: Option<QueueHint>,

    /// Only process items that actually changed since creation
    pub detect_changes: Option<bool>,

    /// Field allow-list for transformed records
    pub fields: Option<Vec<String>>,

    /// Unrecognized segments, verbatim and in original order
    pub unknown: Vec<(String, String)>,
}

impl Directives {
    /// Parse a raw client state string. Never fails.
    pub fn parse(raw: &str) -> Self {
        let mut directives = Directives::default();

        for segment in raw.split(SEGMENT_SEPARATOR) {
            let Some((key, value)) = segment.split_once(KEY_VALUE_SEPARATOR) else {
                continue;
            };

            if !directives.apply(key, value) {
                directives.unknown.push((key.to_string(), value.to_string()));
            }
        }

        directives
    }

    /// Parse an optional client state; `None` behaves like the empty string
    pub fn parse_optional(raw: Option<&str>) -> Self {
        raw.map(Self::parse).unwrap_or_default()
    }

    /// Interpret one segment; returns false when it must be kept verbatim.
    /// Later occurrences of a recognized key replace earlier ones.
    fn apply(&mut self, key: &str, value: &str) -> bool {
        let trimmed = value.trim();

        match key.trim().to_lowercase().as_str() {
            "forward" => {
                if trimmed.is_empty() {
                    return false;
                }
                self.forward = Some(trimmed.to_string());
            }
            "processor" => {
                if trimmed.is_empty() {
                    return false;
                }
                self.processor = Some(trimmed.to_string());
            }
            "uipath" | "queue" => {
                self.queue = Some(QueueHint::parse(trimmed));
            }
            "detectchanges" => match parse_bool(trimmed) {
                Some(flag) => self.detect_changes = Some(flag),
                None => return false,
            },
            "fields" => {
                let fields: Vec<String> = trimmed
                    .split(',')
                    .map(str::trim)
                    .filter(|f| !f.is_empty())
                    .map(str::to_string)
                    .collect();
                if fields.is_empty() {
                    return false;
                }
                self.fields = Some(fields);
            }
            _ => return false,
        }

        true
    }

    /// Serialize back into a client state string
    ///
    /// Recognized keys come first in a fixed order, then unknown segments in
    /// their original order.
    pub fn to_client_state(&self) -> String {
        let mut segments = Vec::new();

        if let Some(forward) = &self.forward {
            segments.push(format!("{}:{}", KEY_FORWARD, forward));
        }
        if let Some(processor) = &self.processor {
            segments.push(format!("{}:{}", KEY_PROCESSOR, processor));
        }
        if let Some(queue) = &self.queue {
            segments.push(format!("{}:{}", KEY_UIPATH, queue.as_value()));
        }
        if let Some(detect) = self.detect_changes {
            segments.push(format!("{}:{}", KEY_DETECT_CHANGES, detect));
        }
        if let Some(fields) = &self.fields {
            segments.push(format!("{}:{}", KEY_FIELDS, fields.join(",")));
        }
        for (key, value) in &self.unknown {
            segments.push(format!("{}:{}", key, value));
        }

        segments.join(";")
    }

    /// Literal queue name from `uipath:<Name>`, if one was given
    pub fn uipath_queue(&self) -> Option<&str> {
        match &self.queue {
            Some(QueueHint::Named(name)) => Some(name.as_str()),
            _ => None,
        }
    }

    /// Whether the event should go through the processor registry
    pub fn requests_processing(&self) -> bool {
        match &self.queue {
            Some(QueueHint::Enabled) | Some(QueueHint::Named(_)) => true,
            Some(QueueHint::Disabled) => false,
            None => self.processor.is_some(),
        }
    }

    /// Target queue for processed items
    pub fn target_queue(&self, default_queue: &str) -> Option<String> {
        match &self.queue {
            Some(QueueHint::Named(name)) => Some(name.clone()),
            Some(QueueHint::Enabled) => Some(default_queue.to_string()),
            Some(QueueHint::Disabled) => None,
            None if self.processor.is_some() => Some(default_queue.to_string()),
            None => None,
        }
    }

    pub fn detect_changes(&self) -> bool {
        self.detect_changes.unwrap_or(false)
    }

    pub fn is_empty(&self) -> bool {
        *self == Directives::default()
    }

    /// JSON view used by the CLI and forward envelope metadata
    pub fn to_json(&self) -> Value {
        let mut map = Map::new();
        if let Some(forward) = &self.forward {
            map.insert(KEY_FORWARD.to_string(), json!(forward));
        }
        if let Some(processor) = &self.processor {
            map.insert(KEY_PROCESSOR.to_string(), json!(processor));
        }
        match &self.queue {
            Some(QueueHint::Named(name)) => {
                map.insert("uipathQueue".to_string(), json!(name));
            }
            Some(hint) => {
                map.insert(KEY_UIPATH.to_string(), json!(*hint == QueueHint::Enabled));
            }
            None => {}
        }
        if let Some(detect) = self.detect_changes {
            map.insert(KEY_DETECT_CHANGES.to_string(), json!(detect));
        }
        if let Some(fields) = &self.fields {
            map.insert(KEY_FIELDS.to_string(), json!(fields));
        }
        if !self.unknown.is_empty() {
            let unknown: Map<String, Value> = self.unknown
                .iter()
                .map(|(k, v)| (k.clone(), json!(v)))
                .collect();
            map.insert("unknown".to_string(), Value::Object(unknown));
        }
        Value::Object(map)
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_lowercase().as_str() {
        "true" | "yes" | "1" | "on" => Some(true),
        "false" | "no" | "0" | "off" => Some(false),
        _ => None,
    }
}

/// Case-insensitive check for a bare token anywhere in a raw client state
pub fn contains_token(raw: &str, token: &str) -> bool {
    if token.is_empty() {
        return false;
    }
    raw.to_lowercase().contains(&token.to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_forward_and_named_queue() {
        let directives = Directives::parse("forward:https://x.example/y;uipath:QueueA");

        assert_eq!(directives.forward.as_deref(), Some("https://x.example/y"));
        assert_eq!(directives.uipath_queue(), Some("QueueA"));
        assert!(directives.requests_processing());
        assert_eq!(directives.target_queue("default").as_deref(), Some("QueueA"));
        assert!(directives.unknown.is_empty());
    }

    #[test]
    fn test_url_colons_preserved() {
        let directives = Directives::parse("forward:https://host.example:8443/path?a=b:c");
        assert_eq!(directives.forward.as_deref(), Some("https://host.example:8443/path?a=b:c"));
    }

    #[test]
    fn test_empty_and_colonless_input() {
        assert!(Directives::parse("").is_empty());
        assert!(Directives::parse("justtext").is_empty());
        assert!(Directives::parse(";;;").is_empty());

        let directives = Directives::parse("garbage;processor:invoices;more garbage");
        assert_eq!(directives.processor.as_deref(), Some("invoices"));
        assert!(directives.unknown.is_empty());
    }

    #[test]
    fn test_queue_hint_values() {
        let enabled = Directives::parse("uipath:true");
        assert_eq!(enabled.queue, Some(QueueHint::Enabled));
        assert_eq!(enabled.target_queue("Default").as_deref(), Some("Default"));

        let disabled = Directives::parse("uipath:false;processor:x");
        assert_eq!(disabled.queue, Some(QueueHint::Disabled));
        assert!(!disabled.requests_processing());
        assert!(disabled.target_queue("Default").is_none());

        let aliased = Directives::parse("queue:Payables");
        assert_eq!(aliased.uipath_queue(), Some("Payables"));

        let processor_only = Directives::parse("processor:contracts");
        assert!(processor_only.requests_processing());
        assert_eq!(processor_only.target_queue("Default").as_deref(), Some("Default"));

        assert!(!Directives::parse("forward:https://a.example").requests_processing());
    }

    #[test]
    fn test_detect_changes_and_fields() {
        let directives = Directives::parse("detectChanges:true;fields: Title , Status,,Amount");
        assert!(directives.detect_changes());
        assert_eq!(
            directives.fields,
            Some(vec!["Title".to_string(), "Status".to_string(), "Amount".to_string()])
        );

        // Unusable values are kept verbatim rather than interpreted
        let directives = Directives::parse("detectChanges:sometimes;fields:");
        assert_eq!(directives.detect_changes, None);
        assert_eq!(directives.fields, None);
        assert_eq!(directives.unknown.len(), 2);
    }

    #[test]
    fn test_unknown_keys_round_trip() {
        let raw = "env:prod;forward:https://x.example/y;team:finance";
        let directives = Directives::parse(raw);

        assert_eq!(
            directives.unknown,
            vec![("env".to_string(), "prod".to_string()), ("team".to_string(), "finance".to_string())]
        );

        let serialized = directives.to_client_state();
        assert_eq!(serialized, "forward:https://x.example/y;env:prod;team:finance");
        assert_eq!(Directives::parse(&serialized), directives);
    }

    #[test]
    fn test_last_recognized_key_wins() {
        let directives = Directives::parse("processor:a;processor:b");
        assert_eq!(directives.processor.as_deref(), Some("b"));
    }

    #[test]
    fn test_keys_are_case_insensitive() {
        let directives = Directives::parse("Forward:https://a.example;DETECTCHANGES:yes;UiPath:Q1");
        assert_eq!(directives.forward.as_deref(), Some("https://a.example"));
        assert!(directives.detect_changes());
        assert_eq!(directives.uipath_queue(), Some("Q1"));
    }

    #[test]
    fn test_json_view() {
        let value = Directives::parse("forward:https://x.example/y;uipath:QueueA").to_json();
        assert_eq!(value["forward"], "https://x.example/y");
        assert_eq!(value["uipathQueue"], "QueueA");

        let value = Directives::parse("uipath:true").to_json();
        assert_eq!(value["uipath"], true);
    }

    #[test]
    fn test_contains_token() {
        assert!(contains_token("project:Invoices;uipath:true", "invoices"));
        assert!(!contains_token("uipath:true", "contracts"));
        assert!(!contains_token("anything", ""));
    }

    proptest! {
        #[test]
        fn prop_parse_is_deterministic(raw in "[a-zA-Z0-9:;,/. _-]{0,64}") {
            prop_assert_eq!(Directives::parse(&raw), Directives::parse(&raw));
        }

        #[test]
        fn prop_serialize_round_trips(raw in "[a-zA-Z0-9:;,/. _-]{0,64}") {
            let parsed = Directives::parse(&raw);
            let reparsed = Directives::parse(&parsed.to_client_state());
            prop_assert_eq!(reparsed, parsed);
        }

        #[test]
        fn prop_colonless_segments_are_ignored(words in proptest::collection::vec("[a-zA-Z0-9 ]{0,12}", 0..6)) {
            let raw = words.join(";");
            prop_assert!(Directives::parse(&raw).is_empty());
        }
    }
}
