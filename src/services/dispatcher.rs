use crate::config::DeliveryConfig;
use crate::error::{WebhookError, WebhookResult};
use crate::models::{Delivery, DeliveryStatus, Endpoint, Event, TEST_EVENT_TYPE};
use crate::services::deliveries::{self, AttemptRecord};
use crate::services::{endpoints, signing};
use crate::Database;
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use serde::Serialize;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;

pub const HEADER_SIGNATURE: &str = "X-Webhook-Signature";
pub const HEADER_WEBHOOK_ID: &str = "X-Webhook-ID";
pub const HEADER_EVENT_TYPE: &str = "X-Event-Type";
pub const HEADER_EVENT_ID: &str = "X-Event-ID";
pub const HEADER_DELIVERY_ID: &str = "X-Delivery-ID";
pub const HEADER_DELIVERY_ATTEMPT: &str = "X-Delivery-Attempt";

/// Delay before retry `attempt` (1-based): `base * 2^(attempt - 1)`.
pub fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    let exponent = attempt.max(1) - 1;
    1u32.checked_shl(exponent)
        .and_then(|factor| base.checked_mul(factor))
        .unwrap_or(Duration::MAX)
}

/// A 2xx response.
#[derive(Debug, Clone)]
pub struct AttemptSuccess {
    pub status: u16,
    pub body: String,
}

/// Why an attempt did not succeed. The tag decides the state transition.
#[derive(Debug, Clone)]
pub enum AttemptFailure {
    /// Non-2xx, timeout, connection or TLS failure. Retried while the
    /// record has attempts left.
    Recoverable {
        status: Option<u16>,
        body: Option<String>,
        error: String,
    },
    /// The request cannot be built from the stored configuration; trying
    /// again would fail the same way.
    Terminal { error: String },
}

impl AttemptFailure {
    pub fn error(&self) -> &str {
        match self {
            Self::Recoverable { error, .. } | Self::Terminal { error } => error,
        }
    }
}

pub type AttemptResult = Result<AttemptSuccess, AttemptFailure>;

/// Compute what to write back after an attempt on `delivery`.
pub fn next_state(
    delivery: &Delivery,
    result: &AttemptResult,
    now: DateTime<Utc>,
    backoff_base: Duration,
    body_limit: usize,
) -> AttemptRecord {
    let attempt_count = delivery.attempt_count + 1;

    match result {
        Ok(success) => AttemptRecord {
            status: DeliveryStatus::Success,
            attempt_count,
            next_attempt_at: None,
            response_status: Some(success.status),
            response_body: Some(truncate_body(&success.body, body_limit)),
            error: None,
        },
        Err(AttemptFailure::Terminal { error }) => AttemptRecord {
            status: DeliveryStatus::Failed,
            attempt_count,
            next_attempt_at: None,
            response_status: None,
            response_body: None,
            error: Some(error.clone()),
        },
        Err(AttemptFailure::Recoverable { status, body, error }) => {
            let (status_after, next_attempt_at) = if delivery.exhausted_after(attempt_count) {
                (DeliveryStatus::Failed, None)
            } else {
                let delay = chrono::Duration::from_std(backoff_delay(backoff_base, attempt_count))
                    .unwrap_or_else(|_| chrono::Duration::days(365));
                (DeliveryStatus::Retrying, Some(now + delay))
            };
            AttemptRecord {
                status: status_after,
                attempt_count,
                next_attempt_at,
                response_status: *status,
                response_body: body.as_deref().map(|b| truncate_body(b, body_limit)),
                error: Some(error.clone()),
            }
        }
    }
}

/// Keep at most `limit` characters.
pub fn truncate_body(body: &str, limit: usize) -> String {
    match body.char_indices().nth(limit) {
        Some((idx, _)) => body[..idx].to_string(),
        None => body.to_string(),
    }
}

#[derive(Debug, Clone)]
pub struct DispatcherSettings {
    pub request_timeout: Duration,
    pub backoff_base: Duration,
    pub response_body_limit: usize,
    pub user_agent: String,
    /// Requests this dispatcher may have open at once, across workers,
    /// replays and test sends.
    pub max_in_flight: usize,
}

impl From<&DeliveryConfig> for DispatcherSettings {
    fn from(config: &DeliveryConfig) -> Self {
        Self {
            request_timeout: config.request_timeout(),
            backoff_base: config.backoff_base(),
            response_body_limit: config.response_body_limit,
            user_agent: config.user_agent.clone(),
            max_in_flight: config.workers,
        }
    }
}

#[derive(Debug)]
pub enum DispatchOutcome {
    /// The record was not dispatchable or another worker holds it.
    Skipped,
    /// One attempt ran; the record as stored afterwards.
    Attempted(Delivery),
}

/// Result of a synchronous test send. Nothing is persisted.
#[derive(Debug, Clone, Serialize)]
pub struct TestDeliveryResult {
    pub success: bool,
    pub event_id: String,
    pub status_code: Option<u16>,
    pub response_body: Option<String>,
    pub error: Option<String>,
    pub duration_ms: u64,
}

struct WireRequest<'a> {
    endpoint: &'a Endpoint,
    body: &'a str,
    event_type: &'a str,
    event_id: &'a str,
    delivery_id: &'a str,
    attempt: u32,
}

/// Performs HTTP delivery attempts and records their outcome.
pub struct Dispatcher {
    db: Database,
    client: reqwest::Client,
    settings: DispatcherSettings,
    in_flight: Semaphore,
}

impl Dispatcher {
    pub fn new(db: Database, settings: DispatcherSettings) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(settings.request_timeout)
            .user_agent(settings.user_agent.clone())
            .redirect(reqwest::redirect::Policy::none())
            .build()?;
        let in_flight = Semaphore::new(settings.max_in_flight.clamp(1, Semaphore::MAX_PERMITS));
        Ok(Self {
            db,
            client,
            settings,
            in_flight,
        })
    }

    pub fn settings(&self) -> &DispatcherSettings {
        &self.settings
    }

    /// Claim a due record and run one attempt. A record that is not due, is
    /// terminal, or is held by another worker is skipped.
    pub async fn dispatch(&self, delivery_id: &str) -> WebhookResult<DispatchOutcome> {
        let Some(delivery) = deliveries::claim_delivery(&self.db, delivery_id, Utc::now(), true)? else {
            tracing::debug!(delivery_id = %delivery_id, "Delivery not claimable, skipping");
            return Ok(DispatchOutcome::Skipped);
        };
        self.attempt_claimed(delivery).await.map(DispatchOutcome::Attempted)
    }

    /// Operator-triggered replay.
    ///
    /// A `pending`/`retrying` record is attempted now regardless of its
    /// schedule. A `failed` record stays terminal; its event is re-sent as a
    /// new record. A `success` record cannot be replayed.
    pub async fn replay(&self, delivery_id: &str, org_id: &str) -> WebhookResult<Delivery> {
        let delivery = deliveries::get_delivery(&self.db, delivery_id, org_id)?;

        let target = match delivery.status {
            DeliveryStatus::Success => {
                return Err(WebhookError::Conflict("delivery already succeeded".to_string()))
            }
            DeliveryStatus::Delivering => {
                return Err(WebhookError::Conflict("delivery attempt already in flight".to_string()))
            }
            DeliveryStatus::Failed => {
                let endpoint = endpoints::get_endpoint(&self.db, &delivery.endpoint_id, org_id)?;
                let fresh = deliveries::insert_replay(&self.db, &delivery, endpoint.max_retries)?;
                tracing::info!(
                    delivery_id = %fresh.id,
                    replay_of = %delivery.id,
                    event_id = %delivery.event_id,
                    "Replaying failed delivery as a new record"
                );
                fresh.id
            }
            DeliveryStatus::Pending | DeliveryStatus::Retrying => delivery.id,
        };

        match deliveries::claim_delivery(&self.db, &target, Utc::now(), false)? {
            Some(claimed) => self.attempt_claimed(claimed).await,
            None => Err(WebhookError::Conflict("delivery attempt already in flight".to_string())),
        }
    }

    /// Send a signed sample event to `endpoint` and report what happened.
    pub async fn test_endpoint(
        &self,
        endpoint: &Endpoint,
        sample: Option<serde_json::Value>,
    ) -> WebhookResult<TestDeliveryResult> {
        let data = sample.unwrap_or_else(|| {
            serde_json::json!({
                "message": "This is a test delivery",
                "endpoint_id": endpoint.id,
            })
        });
        let event = Event::new(TEST_EVENT_TYPE, endpoint.organization_id.clone(), data);
        let body = event.to_body()?;
        let delivery_id = format!("test_{}", uuid::Uuid::new_v4().simple());

        let started = Instant::now();
        let result = self
            .send(&WireRequest {
                endpoint,
                body: &body,
                event_type: &event.event_type,
                event_id: &event.event_id,
                delivery_id: &delivery_id,
                attempt: 1,
            })
            .await;
        let duration_ms = started.elapsed().as_millis() as u64;
        let limit = self.settings.response_body_limit;

        Ok(match result {
            Ok(success) => TestDeliveryResult {
                success: true,
                event_id: event.event_id,
                status_code: Some(success.status),
                response_body: Some(truncate_body(&success.body, limit)),
                error: None,
                duration_ms,
            },
            Err(failure) => {
                let (status_code, response_body) = match &failure {
                    AttemptFailure::Recoverable { status, body, .. } => {
                        (*status, body.as_deref().map(|b| truncate_body(b, limit)))
                    }
                    AttemptFailure::Terminal { .. } => (None, None),
                };
                TestDeliveryResult {
                    success: false,
                    event_id: event.event_id,
                    status_code,
                    response_body,
                    error: Some(failure.error().to_string()),
                    duration_ms,
                }
            }
        })
    }

    async fn attempt_claimed(&self, delivery: Delivery) -> WebhookResult<Delivery> {
        let attempt = delivery.next_attempt_number();

        let result = match endpoints::find_endpoint(&self.db, &delivery.endpoint_id)? {
            Some(endpoint) => {
                self.send(&WireRequest {
                    endpoint: &endpoint,
                    body: &delivery.payload,
                    event_type: &delivery.event_type,
                    event_id: &delivery.event_id,
                    delivery_id: &delivery.id,
                    attempt,
                })
                .await
            }
            None => Err(AttemptFailure::Terminal {
                error: "endpoint no longer exists".to_string(),
            }),
        };

        let record = next_state(
            &delivery,
            &result,
            Utc::now(),
            self.settings.backoff_base,
            self.settings.response_body_limit,
        );
        log_attempt(&delivery, attempt, &record);

        match deliveries::record_attempt(&self.db, &delivery.id, &record) {
            Ok(true) => {}
            Ok(false) => tracing::warn!(
                delivery_id = %delivery.id,
                attempt,
                "Delivery claim was lost before the outcome could be recorded"
            ),
            Err(e) => {
                tracing::error!(
                    delivery_id = %delivery.id,
                    attempt,
                    error = %e,
                    "Failed to record delivery outcome; the claim will be recovered"
                );
                return Err(e);
            }
        }

        deliveries::find_delivery(&self.db, &delivery.id)?.ok_or(WebhookError::NotFound("delivery"))
    }

    async fn send(&self, request: &WireRequest<'_>) -> AttemptResult {
        let headers = build_headers(request)?;

        // Held until the response body has been read or abandoned.
        let _permit = self.in_flight.acquire().await.map_err(|_| AttemptFailure::Recoverable {
            status: None,
            body: None,
            error: "dispatcher is shutting down".to_string(),
        })?;

        let response = self
            .client
            .post(&request.endpoint.url)
            .headers(headers)
            .body(request.body.to_string())
            .send()
            .await
            .map_err(classify_transport_error)?;

        let status = response.status().as_u16();
        let body = read_capped_body(response, self.settings.response_body_limit).await;

        if (200..300).contains(&status) {
            Ok(AttemptSuccess { status, body })
        } else {
            Err(AttemptFailure::Recoverable {
                status: Some(status),
                body: Some(body),
                error: format!("endpoint responded with HTTP {}", status),
            })
        }
    }
}

/// Read at most enough of the body to fill `limit` characters, then drop the
/// connection. A read error keeps whatever arrived before it.
async fn read_capped_body(mut response: reqwest::Response, limit: usize) -> String {
    // UTF-8 needs at most four bytes per character.
    let max_bytes = limit.saturating_mul(4);
    let mut buf: Vec<u8> = Vec::new();
    while buf.len() < max_bytes {
        match response.chunk().await {
            Ok(Some(chunk)) => {
                let take = chunk.len().min(max_bytes - buf.len());
                buf.extend_from_slice(&chunk[..take]);
            }
            Ok(None) => break,
            Err(e) => {
                tracing::debug!(error = %e, "Response body read ended early");
                break;
            }
        }
    }
    truncate_body(&String::from_utf8_lossy(&buf), limit)
}

/// Custom headers first, so the engine's own headers always win.
fn build_headers(request: &WireRequest<'_>) -> Result<HeaderMap, AttemptFailure> {
    let mut headers = HeaderMap::new();

    for (name, value) in &request.endpoint.custom_headers {
        let name = HeaderName::from_bytes(name.as_bytes()).map_err(|_| AttemptFailure::Terminal {
            error: format!("invalid custom header name '{}'", name),
        })?;
        let value = HeaderValue::from_str(value).map_err(|_| AttemptFailure::Terminal {
            error: format!("invalid value for custom header '{}'", name),
        })?;
        headers.insert(name, value);
    }

    let signature = signing::signature_header(request.body.as_bytes(), &request.endpoint.secret);
    let wire = [
        (HEADER_SIGNATURE, signature),
        (HEADER_WEBHOOK_ID, request.endpoint.id.clone()),
        (HEADER_EVENT_TYPE, request.event_type.to_string()),
        (HEADER_EVENT_ID, request.event_id.to_string()),
        (HEADER_DELIVERY_ID, request.delivery_id.to_string()),
        (HEADER_DELIVERY_ATTEMPT, request.attempt.to_string()),
    ];
    for (name, value) in wire {
        let invalid = || AttemptFailure::Terminal {
            error: format!("invalid value for header '{}'", name),
        };
        let name = HeaderName::from_bytes(name.as_bytes()).map_err(|_| invalid())?;
        let value = HeaderValue::from_str(&value).map_err(|_| invalid())?;
        headers.insert(name, value);
    }
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

    Ok(headers)
}

fn classify_transport_error(e: reqwest::Error) -> AttemptFailure {
    if e.is_builder() {
        return AttemptFailure::Terminal {
            error: format!("request could not be built: {}", e),
        };
    }
    let error = if e.is_timeout() {
        "request timed out".to_string()
    } else if e.is_connect() {
        format!("connection failed: {}", e)
    } else {
        format!("transport error: {}", e)
    };
    AttemptFailure::Recoverable {
        status: None,
        body: None,
        error,
    }
}

fn log_attempt(delivery: &Delivery, attempt: u32, record: &AttemptRecord) {
    match record.status {
        DeliveryStatus::Success => tracing::info!(
            delivery_id = %delivery.id,
            endpoint_id = %delivery.endpoint_id,
            event_type = %delivery.event_type,
            attempt,
            status = ?record.response_status,
            "Webhook delivered"
        ),
        DeliveryStatus::Retrying => tracing::warn!(
            delivery_id = %delivery.id,
            endpoint_id = %delivery.endpoint_id,
            event_type = %delivery.event_type,
            attempt,
            error = record.error.as_deref().unwrap_or(""),
            next_attempt_at = ?record.next_attempt_at,
            "Webhook attempt failed, retry scheduled"
        ),
        _ => tracing::warn!(
            delivery_id = %delivery.id,
            endpoint_id = %delivery.endpoint_id,
            event_type = %delivery.event_type,
            attempt,
            error = record.error.as_deref().unwrap_or(""),
            "Webhook delivery failed permanently"
        ),
    }
}
