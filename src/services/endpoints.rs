use crate::db::{format_timestamp, parse_timestamp};
use crate::error::{WebhookError, WebhookResult};
use crate::models::{
    is_known_event_type, CreatedEndpoint, Endpoint, EndpointUpdate, NewEndpoint, RotatedSecret,
    DEFAULT_MAX_RETRIES, MAX_RETRIES_LIMIT,
};
use crate::services::signing;
use crate::Database;
use chrono::Utc;
use reqwest::header::{HeaderName, HeaderValue};
use rusqlite::{Connection, TransactionBehavior};
use std::collections::BTreeMap;

const ENDPOINT_COLUMNS: &str = "id, organization_id, name, description, url, secret, subscribed_events,
     custom_headers, active, max_retries, created_at, updated_at";

/// Headers the delivery engine owns on the wire.
const RESERVED_HEADERS: [&str; 7] = [
    "content-type",
    "x-webhook-signature",
    "x-webhook-id",
    "x-event-type",
    "x-event-id",
    "x-delivery-id",
    "x-delivery-attempt",
];

/// Register a new endpoint for `org_id`. The generated secret is returned
/// here and never again.
pub fn create_endpoint(db: &Database, org_id: &str, new: NewEndpoint) -> WebhookResult<CreatedEndpoint> {
    validate_url(&new.url)?;
    let max_retries = new.max_retries.unwrap_or(DEFAULT_MAX_RETRIES);
    validate_max_retries(max_retries)?;
    let events = normalize_events(new.subscribed_events)?;
    validate_headers(&new.custom_headers)?;

    let id = uuid::Uuid::new_v4().to_string();
    let secret = signing::generate_secret();
    let now = format_timestamp(Utc::now());

    let conn = db.get()?;
    conn.execute(
        "INSERT INTO webhook_endpoints
            (id, organization_id, name, description, url, secret, subscribed_events,
             custom_headers, active, max_retries, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?11)",
        rusqlite::params![
            id,
            org_id,
            new.name,
            new.description,
            new.url.trim(),
            secret,
            serde_json::to_string(&events)?,
            serde_json::to_string(&new.custom_headers)?,
            new.active.unwrap_or(true),
            max_retries,
            now,
        ],
    )?;
    drop(conn);

    let endpoint = get_endpoint(db, &id, org_id)?;
    tracing::info!(endpoint_id = %endpoint.id, organization_id = %org_id, "Webhook endpoint created");
    Ok(CreatedEndpoint { endpoint, secret })
}

/// Fetch an endpoint owned by `org_id`. Cross-tenant lookups are `NotFound`.
pub fn get_endpoint(db: &Database, id: &str, org_id: &str) -> WebhookResult<Endpoint> {
    let conn = db.get()?;
    load_endpoint(&conn, id, org_id)
}

fn load_endpoint(conn: &Connection, id: &str, org_id: &str) -> WebhookResult<Endpoint> {
    let sql = format!(
        "SELECT {} FROM webhook_endpoints WHERE id = ?1 AND organization_id = ?2",
        ENDPOINT_COLUMNS
    );
    match conn.query_row(&sql, [id, org_id], row_to_endpoint) {
        Ok(endpoint) => Ok(endpoint),
        Err(rusqlite::Error::QueryReturnedNoRows) => Err(WebhookError::NotFound("endpoint")),
        Err(e) => Err(e.into()),
    }
}

/// Fetch an endpoint by id regardless of tenant. Used by the dispatcher,
/// which only ever holds ids taken from its own delivery records.
pub fn find_endpoint(db: &Database, id: &str) -> WebhookResult<Option<Endpoint>> {
    let conn = db.get()?;
    let sql = format!("SELECT {} FROM webhook_endpoints WHERE id = ?1", ENDPOINT_COLUMNS);
    match conn.query_row(&sql, [id], row_to_endpoint) {
        Ok(endpoint) => Ok(Some(endpoint)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

pub fn update_endpoint(
    db: &Database,
    id: &str,
    org_id: &str,
    update: EndpointUpdate,
) -> WebhookResult<Endpoint> {
    let mut conn = db.get()?;
    // Write lock up front so a concurrent update cannot land between the read
    // and the write below.
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let mut endpoint = load_endpoint(&tx, id, org_id)?;

    if let Some(url) = update.url {
        validate_url(&url)?;
        endpoint.url = url.trim().to_string();
    }
    if let Some(max_retries) = update.max_retries {
        validate_max_retries(max_retries)?;
        endpoint.max_retries = max_retries;
    }
    if let Some(events) = update.subscribed_events {
        endpoint.subscribed_events = normalize_events(events)?;
    }
    if let Some(headers) = update.custom_headers {
        validate_headers(&headers)?;
        endpoint.custom_headers = headers;
    }
    if let Some(name) = update.name {
        endpoint.name = Some(name).filter(|n| !n.trim().is_empty());
    }
    if let Some(description) = update.description {
        endpoint.description = Some(description).filter(|d| !d.trim().is_empty());
    }
    if let Some(active) = update.active {
        endpoint.active = active;
    }

    tx.execute(
        "UPDATE webhook_endpoints
         SET name = ?1, description = ?2, url = ?3, subscribed_events = ?4, custom_headers = ?5,
             active = ?6, max_retries = ?7, updated_at = ?8
         WHERE id = ?9 AND organization_id = ?10",
        rusqlite::params![
            endpoint.name,
            endpoint.description,
            endpoint.url,
            serde_json::to_string(&endpoint.subscribed_events)?,
            serde_json::to_string(&endpoint.custom_headers)?,
            endpoint.active,
            endpoint.max_retries,
            format_timestamp(Utc::now()),
            id,
            org_id,
        ],
    )?;
    let endpoint = load_endpoint(&tx, id, org_id)?;
    tx.commit()?;

    Ok(endpoint)
}

/// Replace the endpoint's secret. Signatures made with the old secret stop
/// verifying for every delivery sent after this returns.
pub fn regenerate_secret(db: &Database, id: &str, org_id: &str) -> WebhookResult<RotatedSecret> {
    let secret = signing::generate_secret();
    let conn = db.get()?;
    let affected = conn.execute(
        "UPDATE webhook_endpoints SET secret = ?1, updated_at = ?2 WHERE id = ?3 AND organization_id = ?4",
        rusqlite::params![secret, format_timestamp(Utc::now()), id, org_id],
    )?;
    if affected == 0 {
        return Err(WebhookError::NotFound("endpoint"));
    }

    tracing::info!(endpoint_id = %id, "Webhook secret regenerated");
    Ok(RotatedSecret {
        endpoint_id: id.to_string(),
        secret,
    })
}

/// Delete an endpoint; its delivery history goes with it.
pub fn delete_endpoint(db: &Database, id: &str, org_id: &str) -> WebhookResult<()> {
    let conn = db.get()?;
    let affected = conn.execute(
        "DELETE FROM webhook_endpoints WHERE id = ?1 AND organization_id = ?2",
        [id, org_id],
    )?;
    if affected == 0 {
        return Err(WebhookError::NotFound("endpoint"));
    }
    tracing::info!(endpoint_id = %id, "Webhook endpoint deleted");
    Ok(())
}

pub fn list_endpoints(db: &Database, org_id: &str, active_only: bool) -> WebhookResult<Vec<Endpoint>> {
    let conn = db.get()?;
    let sql = format!(
        "SELECT {} FROM webhook_endpoints
         WHERE organization_id = ?1 AND (?2 = 0 OR active = 1)
         ORDER BY created_at DESC, id",
        ENDPOINT_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let endpoints = stmt
        .query_map(rusqlite::params![org_id, active_only], row_to_endpoint)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(endpoints)
}

/// Active endpoints in `org_id` whose subscription list contains `event_type`.
pub fn subscribed_endpoints(db: &Database, org_id: &str, event_type: &str) -> WebhookResult<Vec<Endpoint>> {
    let conn = db.get()?;
    let sql = format!(
        "SELECT {} FROM webhook_endpoints
         WHERE organization_id = ?1
           AND active = 1
           AND EXISTS (SELECT 1 FROM json_each(webhook_endpoints.subscribed_events) WHERE value = ?2)
         ORDER BY created_at, id",
        ENDPOINT_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let endpoints = stmt
        .query_map([org_id, event_type], row_to_endpoint)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(endpoints)
}

pub fn validate_url(raw: &str) -> WebhookResult<()> {
    let parsed = url::Url::parse(raw.trim())
        .map_err(|e| WebhookError::validation(format!("invalid url '{}': {}", raw, e)))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(WebhookError::validation(format!(
            "url must use http or https, got '{}'",
            parsed.scheme()
        )));
    }
    if parsed.host_str().map_or(true, str::is_empty) {
        return Err(WebhookError::validation("url must include a host"));
    }
    Ok(())
}

pub fn validate_max_retries(max_retries: u32) -> WebhookResult<()> {
    if max_retries > MAX_RETRIES_LIMIT {
        return Err(WebhookError::validation(format!(
            "max_retries must be between 0 and {}, got {}",
            MAX_RETRIES_LIMIT, max_retries
        )));
    }
    Ok(())
}

fn normalize_events(events: Vec<String>) -> WebhookResult<Vec<String>> {
    let mut normalized: Vec<String> = Vec::with_capacity(events.len());
    for event in events {
        let event = event.trim().to_string();
        if !is_known_event_type(&event) {
            return Err(WebhookError::validation(format!("unknown event type '{}'", event)));
        }
        if !normalized.contains(&event) {
            normalized.push(event);
        }
    }
    Ok(normalized)
}

fn validate_headers(headers: &BTreeMap<String, String>) -> WebhookResult<()> {
    for (name, value) in headers {
        let header = HeaderName::from_bytes(name.as_bytes())
            .map_err(|_| WebhookError::validation(format!("invalid header name '{}'", name)))?;
        if RESERVED_HEADERS.contains(&header.as_str()) {
            return Err(WebhookError::validation(format!(
                "header '{}' is set by the delivery engine",
                name
            )));
        }
        HeaderValue::from_str(value)
            .map_err(|_| WebhookError::validation(format!("invalid value for header '{}'", name)))?;
    }
    Ok(())
}

fn row_to_endpoint(row: &rusqlite::Row<'_>) -> rusqlite::Result<Endpoint> {
    let events: String = row.get(6)?;
    let headers: String = row.get(7)?;
    let created_at: String = row.get(10)?;
    let updated_at: String = row.get(11)?;

    Ok(Endpoint {
        id: row.get(0)?,
        organization_id: row.get(1)?,
        name: row.get(2)?,
        description: row.get(3)?,
        url: row.get(4)?,
        secret: row.get(5)?,
        subscribed_events: decode_json(6, &events)?,
        custom_headers: decode_json(7, &headers)?,
        active: row.get(8)?,
        max_retries: row.get(9)?,
        created_at: parse_timestamp(10, &created_at)?,
        updated_at: parse_timestamp(11, &updated_at)?,
    })
}

fn decode_json<T: serde::de::DeserializeOwned>(idx: usize, raw: &str) -> rusqlite::Result<T> {
    serde_json::from_str(raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}
