//! Delivery record store.
//!
//! Every state change goes through a conditional `UPDATE` keyed by id and
//! expected prior status, so two workers racing on one record cannot both
//! win: the loser sees zero affected rows.

use crate::db::{format_timestamp, parse_timestamp};
use crate::error::{WebhookError, WebhookResult};
use crate::models::{Delivery, DeliveryPage, DeliveryStatus, Endpoint, Event};
use crate::services::endpoints;
use crate::Database;
use chrono::{DateTime, Utc};

const DELIVERY_COLUMNS: &str = "id, endpoint_id, organization_id, event_id, event_type, payload, status,
     attempt_count, max_attempts, next_attempt_at, last_response_status, last_response_body,
     last_error, created_at, updated_at";

/// Outcome of one attempt, written back onto a claimed record.
#[derive(Debug, Clone)]
pub struct AttemptRecord {
    pub status: DeliveryStatus,
    pub attempt_count: u32,
    pub next_attempt_at: Option<DateTime<Utc>>,
    pub response_status: Option<u16>,
    pub response_body: Option<String>,
    pub error: Option<String>,
}

/// Create a `pending` record for `endpoint`, due immediately. `max_attempts`
/// is frozen from the endpoint's current retry policy.
pub fn insert_delivery(
    db: &Database,
    endpoint: &Endpoint,
    event: &Event,
    payload: &str,
) -> WebhookResult<Delivery> {
    insert_record(
        db,
        &endpoint.id,
        &endpoint.organization_id,
        &event.event_id,
        &event.event_type,
        payload,
        endpoint.max_retries,
    )
}

/// Fresh `pending` record carrying the same event and payload as `original`.
pub fn insert_replay(db: &Database, original: &Delivery, max_attempts: u32) -> WebhookResult<Delivery> {
    insert_record(
        db,
        &original.endpoint_id,
        &original.organization_id,
        &original.event_id,
        &original.event_type,
        &original.payload,
        max_attempts,
    )
}

fn insert_record(
    db: &Database,
    endpoint_id: &str,
    org_id: &str,
    event_id: &str,
    event_type: &str,
    payload: &str,
    max_attempts: u32,
) -> WebhookResult<Delivery> {
    let id = uuid::Uuid::new_v4().to_string();
    let now = format_timestamp(Utc::now());

    let conn = db.get()?;
    conn.execute(
        "INSERT INTO webhook_deliveries
            (id, endpoint_id, organization_id, event_id, event_type, payload, status,
             attempt_count, max_attempts, next_attempt_at, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'pending', 0, ?7, ?8, ?8, ?8)",
        rusqlite::params![id, endpoint_id, org_id, event_id, event_type, payload, max_attempts, now],
    )?;
    drop(conn);

    find_delivery(db, &id)?.ok_or(WebhookError::NotFound("delivery"))
}

pub fn find_delivery(db: &Database, id: &str) -> WebhookResult<Option<Delivery>> {
    let conn = db.get()?;
    let sql = format!("SELECT {} FROM webhook_deliveries WHERE id = ?1", DELIVERY_COLUMNS);
    match conn.query_row(&sql, [id], row_to_delivery) {
        Ok(delivery) => Ok(Some(delivery)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Tenant-scoped lookup; other organizations' records are `NotFound`.
pub fn get_delivery(db: &Database, id: &str, org_id: &str) -> WebhookResult<Delivery> {
    match find_delivery(db, id)? {
        Some(delivery) if delivery.organization_id == org_id => Ok(delivery),
        _ => Err(WebhookError::NotFound("delivery")),
    }
}

/// Newest first.
pub fn list_deliveries(
    db: &Database,
    endpoint_id: &str,
    org_id: &str,
    limit: usize,
    offset: usize,
) -> WebhookResult<DeliveryPage> {
    endpoints::get_endpoint(db, endpoint_id, org_id)?;

    let conn = db.get()?;
    let total: i64 = conn.query_row(
        "SELECT COUNT(*) FROM webhook_deliveries WHERE endpoint_id = ?1",
        [endpoint_id],
        |row| row.get(0),
    )?;

    let sql = format!(
        "SELECT {} FROM webhook_deliveries WHERE endpoint_id = ?1
         ORDER BY created_at DESC, id LIMIT ?2 OFFSET ?3",
        DELIVERY_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let deliveries = stmt
        .query_map(
            rusqlite::params![
                endpoint_id,
                i64::try_from(limit).unwrap_or(i64::MAX),
                i64::try_from(offset).unwrap_or(i64::MAX)
            ],
            row_to_delivery,
        )?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(DeliveryPage { deliveries, total })
}

/// Ids of dispatchable records due at `now`, oldest due first, at most `limit`.
pub fn due_deliveries(db: &Database, now: DateTime<Utc>, limit: usize) -> WebhookResult<Vec<String>> {
    let conn = db.get()?;
    let mut stmt = conn.prepare(
        "SELECT id FROM webhook_deliveries
         WHERE status IN ('pending', 'retrying') AND next_attempt_at <= ?1
         ORDER BY next_attempt_at, id
         LIMIT ?2",
    )?;
    let ids = stmt
        .query_map(
            rusqlite::params![format_timestamp(now), limit as i64],
            |row| row.get::<_, String>(0),
        )?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(ids)
}

/// Atomically move a record from `pending`/`retrying` to `delivering`.
///
/// With `only_if_due` the record must also have `next_attempt_at <= now`;
/// manual replay passes `false` to skip the schedule. Returns `None` when
/// another worker already holds the record or it is not dispatchable.
pub fn claim_delivery(
    db: &Database,
    id: &str,
    now: DateTime<Utc>,
    only_if_due: bool,
) -> WebhookResult<Option<Delivery>> {
    let now = format_timestamp(now);
    let conn = db.get()?;
    let affected = conn.execute(
        "UPDATE webhook_deliveries
         SET status = 'delivering', updated_at = ?1
         WHERE id = ?2
           AND status IN ('pending', 'retrying')
           AND (?3 = 0 OR next_attempt_at <= ?1)",
        rusqlite::params![now, id, only_if_due],
    )?;
    drop(conn);

    if affected != 1 {
        return Ok(None);
    }
    find_delivery(db, id)
}

/// Write an attempt outcome onto a record this worker has claimed.
/// Returns `false` if the record is no longer `delivering`.
pub fn record_attempt(db: &Database, id: &str, attempt: &AttemptRecord) -> WebhookResult<bool> {
    let conn = db.get()?;
    let affected = conn.execute(
        "UPDATE webhook_deliveries
         SET status = ?1, attempt_count = ?2, next_attempt_at = ?3, last_response_status = ?4,
             last_response_body = ?5, last_error = ?6, updated_at = ?7
         WHERE id = ?8 AND status = 'delivering'",
        rusqlite::params![
            attempt.status.as_str(),
            attempt.attempt_count,
            attempt.next_attempt_at.map(format_timestamp),
            attempt.response_status,
            attempt.response_body,
            attempt.error,
            format_timestamp(Utc::now()),
            id,
        ],
    )?;
    Ok(affected == 1)
}

/// Return claims older than `claimed_before` to `retrying`, due at `now`.
/// An attempt whose outcome was never recorded is sent again.
pub fn recover_stale_claims(
    db: &Database,
    claimed_before: DateTime<Utc>,
    now: DateTime<Utc>,
) -> WebhookResult<usize> {
    let now = format_timestamp(now);
    let conn = db.get()?;
    let affected = conn.execute(
        "UPDATE webhook_deliveries
         SET status = 'retrying', next_attempt_at = ?1, updated_at = ?1,
             last_error = 'delivery claim expired before an outcome was recorded'
         WHERE status = 'delivering' AND updated_at < ?2",
        rusqlite::params![now, format_timestamp(claimed_before)],
    )?;
    Ok(affected)
}

fn row_to_delivery(row: &rusqlite::Row<'_>) -> rusqlite::Result<Delivery> {
    let status: String = row.get(6)?;
    let status = status.parse::<DeliveryStatus>().map_err(|_| {
        rusqlite::Error::FromSqlConversionFailure(
            6,
            rusqlite::types::Type::Text,
            format!("unknown delivery status '{}'", status).into(),
        )
    })?;
    let next_attempt_at: Option<String> = row.get(9)?;
    let created_at: String = row.get(13)?;
    let updated_at: String = row.get(14)?;

    Ok(Delivery {
        id: row.get(0)?,
        endpoint_id: row.get(1)?,
        organization_id: row.get(2)?,
        event_id: row.get(3)?,
        event_type: row.get(4)?,
        payload: row.get(5)?,
        status,
        attempt_count: row.get(7)?,
        max_attempts: row.get(8)?,
        next_attempt_at: next_attempt_at
            .as_deref()
            .map(|ts| parse_timestamp(9, ts))
            .transpose()?,
        last_response_status: row.get(10)?,
        last_response_body: row.get(11)?,
        last_error: row.get(12)?,
        created_at: parse_timestamp(13, &created_at)?,
        updated_at: parse_timestamp(14, &updated_at)?,
    })
}
