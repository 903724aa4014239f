use crate::config::DeliveryConfig;
use crate::error::WebhookResult;
use crate::models::Delivery;
use crate::services::dispatcher::{Dispatcher, DispatcherSettings};
use crate::services::publisher::Publisher;
use crate::services::queue::{DeliveryQueue, QueueReceiver};
use crate::services::scheduler::RetryScheduler;
use crate::Database;
use anyhow::Result;
use std::sync::Arc;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinHandle;

/// Pull delivery ids off the queue and dispatch each on its own task, at
/// most `workers` at a time. On shutdown, stops taking work and waits for
/// in-flight attempts to finish.
pub fn spawn_worker_pool(
    dispatcher: Arc<Dispatcher>,
    mut jobs: QueueReceiver,
    workers: usize,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    let workers = workers.max(1);
    let permits = Arc::new(Semaphore::new(workers));

    tokio::spawn(async move {
        loop {
            let delivery_id = tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                job = jobs.recv() => match job {
                    Some(id) => id,
                    None => break,
                },
            };

            let Ok(permit) = permits.clone().acquire_owned().await else {
                break;
            };
            let dispatcher = dispatcher.clone();
            tokio::spawn(async move {
                let _permit = permit;
                if let Err(e) = dispatcher.dispatch(&delivery_id).await {
                    tracing::error!(delivery_id = %delivery_id, error = %e, "Dispatch failed");
                }
            });
        }

        let _ = permits.acquire_many(workers as u32).await;
        tracing::info!("Delivery workers stopped");
    })
}

/// The running delivery engine: publisher, worker pool and retry scheduler
/// sharing one bounded queue.
pub struct Engine {
    publisher: Publisher,
    dispatcher: Arc<Dispatcher>,
    scheduler_db: Database,
    queue: DeliveryQueue,
    config: DeliveryConfig,
    shutdown: watch::Sender<bool>,
    workers: JoinHandle<()>,
    scheduler: JoinHandle<()>,
}

impl Engine {
    /// Must be called inside a tokio runtime.
    pub fn start(db: Database, config: &DeliveryConfig) -> Result<Self> {
        config.validate()?;

        let (queue, jobs) = DeliveryQueue::bounded(config.queue_capacity);
        let (shutdown, shutdown_rx) = watch::channel(false);

        let dispatcher = Arc::new(Dispatcher::new(db.clone(), DispatcherSettings::from(config))?);
        let publisher = Publisher::new(db.clone()).with_queue(queue.clone());

        let workers = spawn_worker_pool(dispatcher.clone(), jobs, config.workers, shutdown_rx.clone());
        let scheduler = RetryScheduler::new(db.clone(), queue.clone(), config);
        let scheduler = tokio::spawn(scheduler.run(shutdown_rx));

        tracing::info!(
            workers = config.workers,
            queue_capacity = config.queue_capacity,
            poll_interval_secs = config.poll_interval_secs,
            "Delivery engine started"
        );

        Ok(Self {
            publisher,
            dispatcher,
            scheduler_db: db,
            queue,
            config: config.clone(),
            shutdown,
            workers,
            scheduler,
        })
    }

    pub fn publisher(&self) -> &Publisher {
        &self.publisher
    }

    pub fn dispatcher(&self) -> Arc<Dispatcher> {
        self.dispatcher.clone()
    }

    /// Run a scheduler pass now instead of waiting for the next tick.
    pub fn scan_now(&self) -> WebhookResult<crate::services::scheduler::ScanReport> {
        RetryScheduler::new(self.scheduler_db.clone(), self.queue.clone(), &self.config)
            .scan_once(chrono::Utc::now())
    }

    /// Manual "retry now" for one record, bypassing its schedule.
    pub async fn retry_now(&self, delivery_id: &str, org_id: &str) -> WebhookResult<Delivery> {
        self.dispatcher.replay(delivery_id, org_id).await
    }

    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        let _ = self.scheduler.await;
        let _ = self.workers.await;
        tracing::info!("Delivery engine stopped");
    }
}
