use chrono::{DateTime, SecondsFormat, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Event types producers may publish and endpoints may subscribe to.
pub const EVENT_TYPES: &[&str] = &[
    "content.created",
    "content.updated",
    "content.deleted",
    "content.published",
    "content.unpublished",
    "content_type.created",
    "content_type.updated",
    "content_type.deleted",
    "media.uploaded",
    "media.updated",
    "media.deleted",
    "translation.completed",
    "translation.failed",
    "user.created",
    "user.updated",
    "user.deleted",
    "webhook.test",
];

pub const TEST_EVENT_TYPE: &str = "webhook.test";

static EVENT_TYPE_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-z][a-z0-9_]*\.[a-z][a-z0-9_]*$").expect("Invalid event type regex pattern")
});

/// Dot-namespaced `resource.action`.
pub fn is_well_formed_event_type(event_type: &str) -> bool {
    EVENT_TYPE_REGEX.is_match(event_type)
}

pub fn is_known_event_type(event_type: &str) -> bool {
    EVENT_TYPES.contains(&event_type)
}

/// An immutable fact published by a producer. This is also the JSON body
/// receivers see.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Event {
    pub event_id: String,
    pub event_type: String,
    #[serde(with = "wire_timestamp")]
    pub timestamp: DateTime<Utc>,
    pub organization_id: String,
    pub data: serde_json::Value,
}

impl Event {
    pub fn new(
        event_type: impl Into<String>,
        organization_id: impl Into<String>,
        data: serde_json::Value,
    ) -> Self {
        Self {
            event_id: new_event_id(),
            event_type: event_type.into(),
            timestamp: Utc::now(),
            organization_id: organization_id.into(),
            data,
        }
    }

    /// Serialized body; signed and stored as-is.
    pub fn to_body(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

pub fn new_event_id() -> String {
    format!("evt_{}", uuid::Uuid::new_v4().simple())
}

mod wire_timestamp {
    use super::*;
    use serde::{Deserializer, Serializer};

    pub fn serialize<S: Serializer>(ts: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&ts.to_rfc3339_opts(SecondsFormat::Secs, true))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(d)?;
        DateTime::parse_from_rfc3339(&raw)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(serde::de::Error::custom)
    }
}
