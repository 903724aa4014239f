use crate::error::{WebhookError, WebhookResult};
use crate::models::{is_well_formed_event_type, Event};
use crate::services::deliveries;
use crate::services::endpoints;
use crate::services::queue::{DeliveryQueue, Enqueued};
use crate::Database;
use serde::Serialize;

/// What a publish call fanned out to.
#[derive(Debug, Clone, Serialize)]
pub struct PublishReceipt {
    pub event_id: String,
    pub event_type: String,
    /// Delivery records created, one per matching endpoint.
    pub deliveries: Vec<String>,
    /// Matching endpoints whose record could not be created.
    pub failed: usize,
}

/// Fans events out to subscribed endpoints and hands the new records to the
/// worker pool. Without a queue the records simply wait for the scheduler.
#[derive(Clone)]
pub struct Publisher {
    db: Database,
    queue: Option<DeliveryQueue>,
}

impl Publisher {
    pub fn new(db: Database) -> Self {
        Self { db, queue: None }
    }

    pub fn with_queue(mut self, queue: DeliveryQueue) -> Self {
        self.queue = Some(queue);
        self
    }

    /// Producer entry point. Never fails the caller: problems are logged and
    /// stay inside the webhook subsystem.
    pub fn publish_event(&self, event_type: &str, organization_id: &str, data: serde_json::Value) {
        if let Err(e) = self.publish(event_type, organization_id, data) {
            tracing::error!(
                event_type = %event_type,
                organization_id = %organization_id,
                error = %e,
                "Failed to publish webhook event"
            );
        }
    }

    /// Create one `pending` record per active, subscribed endpoint in the
    /// event's organization, then offer each to the dispatch queue.
    ///
    /// Records are created independently: a failure on one endpoint does not
    /// undo the others.
    pub fn publish(
        &self,
        event_type: &str,
        organization_id: &str,
        data: serde_json::Value,
    ) -> WebhookResult<PublishReceipt> {
        if !is_well_formed_event_type(event_type) {
            return Err(WebhookError::validation(format!(
                "event type '{}' must look like 'resource.action'",
                event_type
            )));
        }
        if organization_id.trim().is_empty() {
            return Err(WebhookError::validation("organization_id is required"));
        }

        let event = Event::new(event_type, organization_id, data);
        let mut receipt = PublishReceipt {
            event_id: event.event_id.clone(),
            event_type: event.event_type.clone(),
            deliveries: Vec::new(),
            failed: 0,
        };

        let matches = endpoints::subscribed_endpoints(&self.db, organization_id, event_type)?;
        if matches.is_empty() {
            tracing::debug!(event_type = %event_type, organization_id = %organization_id, "No endpoints subscribed");
            return Ok(receipt);
        }

        let payload = event.to_body()?;
        for endpoint in &matches {
            match deliveries::insert_delivery(&self.db, endpoint, &event, &payload) {
                Ok(delivery) => receipt.deliveries.push(delivery.id),
                Err(e) => {
                    receipt.failed += 1;
                    tracing::error!(
                        endpoint_id = %endpoint.id,
                        event_id = %event.event_id,
                        error = %e,
                        "Failed to create delivery record"
                    );
                }
            }
        }

        for delivery_id in &receipt.deliveries {
            self.offer(delivery_id);
        }

        tracing::info!(
            event_id = %event.event_id,
            event_type = %event_type,
            scheduled = receipt.deliveries.len(),
            failed = receipt.failed,
            "Webhook event published"
        );
        Ok(receipt)
    }

    fn offer(&self, delivery_id: &str) {
        let Some(queue) = &self.queue else {
            return;
        };
        match queue.enqueue(delivery_id) {
            Enqueued::Queued | Enqueued::AlreadyQueued => {}
            Enqueued::Full => {
                tracing::debug!(delivery_id = %delivery_id, "Dispatch queue full, deferring to scheduler")
            }
            Enqueued::Closed => {
                tracing::warn!(delivery_id = %delivery_id, "Dispatch queue closed, deferring to scheduler")
            }
        }
    }
}
