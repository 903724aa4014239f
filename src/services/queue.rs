use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// Result of offering a delivery id to the dispatch queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enqueued {
    Queued,
    /// Already waiting in the queue; not added twice.
    AlreadyQueued,
    /// Queue at capacity. The record stays due and the next scheduler
    /// scan offers it again.
    Full,
    Closed,
}

/// Bounded channel of delivery ids between the publisher / scheduler and
/// the worker pool. Ids waiting in the queue are tracked so repeated scans
/// do not stack duplicates.
#[derive(Clone)]
pub struct DeliveryQueue {
    tx: mpsc::Sender<String>,
    queued: Arc<Mutex<HashSet<String>>>,
}

pub struct QueueReceiver {
    rx: mpsc::Receiver<String>,
    queued: Arc<Mutex<HashSet<String>>>,
}

impl DeliveryQueue {
    pub fn bounded(capacity: usize) -> (Self, QueueReceiver) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let queued = Arc::new(Mutex::new(HashSet::new()));
        (
            Self {
                tx,
                queued: queued.clone(),
            },
            QueueReceiver { rx, queued },
        )
    }

    /// Never waits; a full queue is reported, not blocked on.
    pub fn enqueue(&self, delivery_id: &str) -> Enqueued {
        let mut queued = self.queued.lock().unwrap_or_else(|e| e.into_inner());
        if queued.contains(delivery_id) {
            return Enqueued::AlreadyQueued;
        }

        match self.tx.try_send(delivery_id.to_string()) {
            Ok(()) => {
                queued.insert(delivery_id.to_string());
                Enqueued::Queued
            }
            Err(mpsc::error::TrySendError::Full(_)) => Enqueued::Full,
            Err(mpsc::error::TrySendError::Closed(_)) => Enqueued::Closed,
        }
    }

    pub fn len(&self) -> usize {
        self.queued.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl QueueReceiver {
    pub async fn recv(&mut self) -> Option<String> {
        let id = self.rx.recv().await?;
        self.queued
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&id);
        Some(id)
    }
}
