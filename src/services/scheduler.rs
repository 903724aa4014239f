use crate::config::DeliveryConfig;
use crate::error::WebhookResult;
use crate::services::deliveries;
use crate::services::queue::{DeliveryQueue, Enqueued};
use crate::Database;
use chrono::{DateTime, Utc};
use std::time::Duration;
use tokio::sync::watch;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanReport {
    /// Expired `delivering` claims returned to `retrying`.
    pub recovered: usize,
    pub due: usize,
    pub enqueued: usize,
    /// Due records left for the next scan because the queue was full.
    pub deferred: usize,
}

/// Periodically finds due records and offers them to the worker pool.
pub struct RetryScheduler {
    db: Database,
    queue: DeliveryQueue,
    poll_interval: Duration,
    batch_size: usize,
    stale_after: Duration,
}

impl RetryScheduler {
    pub fn new(db: Database, queue: DeliveryQueue, config: &DeliveryConfig) -> Self {
        Self {
            db,
            queue,
            poll_interval: config.poll_interval(),
            batch_size: config.scan_batch_size,
            stale_after: config.stale_after(),
        }
    }

    /// One pass: recover expired claims, then enqueue up to one batch of due
    /// records.
    pub fn scan_once(&self, now: DateTime<Utc>) -> WebhookResult<ScanReport> {
        let mut report = ScanReport::default();

        let lease = chrono::Duration::from_std(self.stale_after).unwrap_or_else(|_| chrono::Duration::days(1));
        report.recovered = deliveries::recover_stale_claims(&self.db, now - lease, now)?;
        if report.recovered > 0 {
            tracing::warn!(recovered = report.recovered, "Recovered expired delivery claims");
        }

        let due = deliveries::due_deliveries(&self.db, now, self.batch_size)?;
        report.due = due.len();

        for (idx, id) in due.iter().enumerate() {
            match self.queue.enqueue(id) {
                Enqueued::Queued => report.enqueued += 1,
                Enqueued::AlreadyQueued => {}
                Enqueued::Full | Enqueued::Closed => {
                    report.deferred = due.len() - idx;
                    break;
                }
            }
        }

        Ok(report)
    }

    /// Scan every poll interval until `shutdown` flips or its sender drops.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.poll_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {}
                _ = shutdown.changed() => break,
            }
            if *shutdown.borrow() {
                break;
            }

            match self.scan_once(Utc::now()) {
                Ok(report) if report.due > 0 || report.recovered > 0 => tracing::info!(
                    due = report.due,
                    enqueued = report.enqueued,
                    deferred = report.deferred,
                    recovered = report.recovered,
                    "Retry scheduler scan"
                ),
                Ok(_) => {}
                Err(e) => tracing::error!(error = %e, "Retry scheduler scan failed"),
            }
        }

        tracing::info!("Retry scheduler stopped");
    }
}
