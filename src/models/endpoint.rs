use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const MAX_RETRIES_LIMIT: u32 = 10;

/// A tenant-configured destination for webhook deliveries.
///
/// The secret is never serialized; it leaves the process only through
/// [`CreatedEndpoint`] and [`RotatedSecret`], each returned exactly once.
#[derive(Debug, Clone, Serialize)]
pub struct Endpoint {
    pub id: String,
    pub organization_id: String,
    pub name: Option<String>,
    pub description: Option<String>,
    pub url: String,
    #[serde(skip_serializing)]
    pub secret: String,
    pub subscribed_events: Vec<String>,
    pub custom_headers: BTreeMap<String, String>,
    pub active: bool,
    pub max_retries: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Endpoint {
    /// An empty subscription list matches nothing.
    pub fn handles_event(&self, event_type: &str) -> bool {
        self.subscribed_events.iter().any(|e| e == event_type)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewEndpoint {
    pub url: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default, alias = "events")]
    pub subscribed_events: Vec<String>,
    #[serde(default)]
    pub custom_headers: BTreeMap<String, String>,
    #[serde(default)]
    pub max_retries: Option<u32>,
    #[serde(default)]
    pub active: Option<bool>,
}

impl NewEndpoint {
    pub fn new(url: impl Into<String>, events: &[&str]) -> Self {
        Self {
            url: url.into(),
            name: None,
            description: None,
            subscribed_events: events.iter().map(|e| e.to_string()).collect(),
            custom_headers: BTreeMap::new(),
            max_retries: None,
            active: None,
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.custom_headers.insert(name.into(), value.into());
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn inactive(mut self) -> Self {
        self.active = Some(false);
        self
    }
}

/// Partial update; absent fields keep their stored value.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EndpointUpdate {
    pub url: Option<String>,
    pub name: Option<String>,
    pub description: Option<String>,
    #[serde(alias = "events")]
    pub subscribed_events: Option<Vec<String>>,
    pub custom_headers: Option<BTreeMap<String, String>>,
    pub max_retries: Option<u32>,
    pub active: Option<bool>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CreatedEndpoint {
    #[serde(flatten)]
    pub endpoint: Endpoint,
    pub secret: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RotatedSecret {
    pub endpoint_id: String,
    pub secret: String,
}
