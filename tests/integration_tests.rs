mod common;

use chrono::{Duration as ChronoDuration, Utc};
use common::{create_endpoint, create_test_db, ORG, OTHER_ORG};
use pebble_relay::config::DeliveryConfig;
use pebble_relay::models::{DeliveryStatus, EndpointUpdate, NewEndpoint};
use pebble_relay::services::deliveries::{self, AttemptRecord};
use pebble_relay::services::endpoints;
use pebble_relay::services::publisher::Publisher;
use pebble_relay::services::queue::DeliveryQueue;
use pebble_relay::services::scheduler::RetryScheduler;
use pebble_relay::WebhookError;
use serde_json::json;

const URL: &str = "https://hooks.example.com/relay";

mod registry_tests {
    use super::*;

    #[test]
    fn test_create_and_get_endpoint() {
        let db = create_test_db();
        let new = NewEndpoint::new(URL, &["content.created", "content.deleted"])
            .with_name("CRM sync")
            .with_header("X-Tenant", "acme")
            .with_max_retries(5);

        let created = endpoints::create_endpoint(&db, ORG, new).expect("Failed to create endpoint");
        assert!(created.secret.starts_with("whsec_"));
        assert_eq!(created.endpoint.secret, created.secret);

        let endpoint = endpoints::get_endpoint(&db, &created.endpoint.id, ORG).expect("Failed to get endpoint");
        assert_eq!(endpoint.url, URL);
        assert_eq!(endpoint.name.as_deref(), Some("CRM sync"));
        assert_eq!(endpoint.max_retries, 5);
        assert!(endpoint.active);
        assert_eq!(endpoint.subscribed_events, vec!["content.created", "content.deleted"]);
        assert_eq!(endpoint.custom_headers.get("X-Tenant").map(String::as_str), Some("acme"));
    }

    #[test]
    fn test_default_max_retries() {
        let db = create_test_db();
        let created = create_endpoint(&db, URL, &["content.created"]);
        assert_eq!(created.endpoint.max_retries, 3);
    }

    #[test]
    fn test_secret_not_serialized() {
        let db = create_test_db();
        let created = create_endpoint(&db, URL, &["content.created"]);

        let endpoint = serde_json::to_value(&created.endpoint).unwrap();
        assert!(endpoint.get("secret").is_none());

        let once = serde_json::to_value(&created).unwrap();
        assert_eq!(once["secret"], created.secret);
    }

    #[test]
    fn test_duplicate_subscriptions_collapse() {
        let db = create_test_db();
        let created = create_endpoint(&db, URL, &["content.created", "content.created"]);
        assert_eq!(created.endpoint.subscribed_events, vec!["content.created"]);
    }

    #[test]
    fn test_rejects_invalid_url() {
        let db = create_test_db();
        for url in ["not a url", "ftp://files.example.com/hook", "mailto:ops@example.com"] {
            let result = endpoints::create_endpoint(&db, ORG, NewEndpoint::new(url, &["content.created"]));
            assert!(
                matches!(result, Err(WebhookError::Validation(_))),
                "accepted {}",
                url
            );
        }
    }

    #[test]
    fn test_rejects_out_of_range_max_retries() {
        let db = create_test_db();
        let result = endpoints::create_endpoint(
            &db,
            ORG,
            NewEndpoint::new(URL, &["content.created"]).with_max_retries(11),
        );
        assert!(matches!(result, Err(WebhookError::Validation(_))));

        let ok = endpoints::create_endpoint(
            &db,
            ORG,
            NewEndpoint::new(URL, &["content.created"]).with_max_retries(0),
        );
        assert!(ok.is_ok());
    }

    #[test]
    fn test_rejects_unknown_event_type() {
        let db = create_test_db();
        let result = endpoints::create_endpoint(&db, ORG, NewEndpoint::new(URL, &["invoice.paid"]));
        assert!(matches!(result, Err(WebhookError::Validation(_))));
    }

    #[test]
    fn test_rejects_reserved_custom_header() {
        let db = create_test_db();
        let new = NewEndpoint::new(URL, &["content.created"]).with_header("X-Webhook-Signature", "forged");
        let result = endpoints::create_endpoint(&db, ORG, new);
        assert!(matches!(result, Err(WebhookError::Validation(_))));
    }

    #[test]
    fn test_update_endpoint() {
        let db = create_test_db();
        let created = create_endpoint(&db, URL, &["content.created"]);

        let updated = endpoints::update_endpoint(
            &db,
            &created.endpoint.id,
            ORG,
            EndpointUpdate {
                url: Some("https://hooks.example.com/v2".to_string()),
                subscribed_events: Some(vec!["media.uploaded".to_string()]),
                active: Some(false),
                ..Default::default()
            },
        )
        .expect("Failed to update endpoint");

        assert_eq!(updated.url, "https://hooks.example.com/v2");
        assert_eq!(updated.subscribed_events, vec!["media.uploaded"]);
        assert!(!updated.active);
        assert_eq!(updated.max_retries, 3);
        assert_eq!(updated.secret, created.secret);
    }

    #[test]
    fn test_update_validates() {
        let db = create_test_db();
        let created = create_endpoint(&db, URL, &["content.created"]);

        let result = endpoints::update_endpoint(
            &db,
            &created.endpoint.id,
            ORG,
            EndpointUpdate {
                max_retries: Some(42),
                ..Default::default()
            },
        );
        assert!(matches!(result, Err(WebhookError::Validation(_))));

        let endpoint = endpoints::get_endpoint(&db, &created.endpoint.id, ORG).unwrap();
        assert_eq!(endpoint.max_retries, 3);
    }

    #[test]
    fn test_concurrent_updates_keep_both_fields() {
        let dir = std::env::temp_dir().join(format!("pebble-relay-{}", uuid::Uuid::new_v4().simple()));
        let path = dir.join("relay.db");
        let db = pebble_relay::Database::open(path.to_str().unwrap()).unwrap();
        db.migrate().unwrap();
        let id = create_endpoint(&db, URL, &["content.created"]).endpoint.id;

        let rounds = 50;
        let writers: Vec<_> = ["name", "description"]
            .into_iter()
            .map(|field| {
                let db = db.clone();
                let id = id.clone();
                std::thread::spawn(move || {
                    for n in 0..rounds {
                        let value = Some(format!("{}-{}", field, n));
                        let update = if field == "name" {
                            EndpointUpdate { name: value, ..Default::default() }
                        } else {
                            EndpointUpdate { description: value, ..Default::default() }
                        };
                        endpoints::update_endpoint(&db, &id, ORG, update).unwrap();
                    }
                })
            })
            .collect();
        for writer in writers {
            writer.join().unwrap();
        }

        let endpoint = endpoints::get_endpoint(&db, &id, ORG).unwrap();
        drop(db);
        std::fs::remove_dir_all(&dir).ok();

        assert_eq!(endpoint.name, Some(format!("name-{}", rounds - 1)));
        assert_eq!(endpoint.description, Some(format!("description-{}", rounds - 1)));
    }

    #[test]
    fn test_regenerate_secret() {
        let db = create_test_db();
        let created = create_endpoint(&db, URL, &["content.created"]);

        let rotated = endpoints::regenerate_secret(&db, &created.endpoint.id, ORG).unwrap();
        assert_ne!(rotated.secret, created.secret);

        let endpoint = endpoints::get_endpoint(&db, &created.endpoint.id, ORG).unwrap();
        assert_eq!(endpoint.secret, rotated.secret);
    }

    #[test]
    fn test_list_endpoints_active_only() {
        let db = create_test_db();
        create_endpoint(&db, URL, &["content.created"]);
        endpoints::create_endpoint(&db, ORG, NewEndpoint::new(URL, &["content.created"]).inactive()).unwrap();

        assert_eq!(endpoints::list_endpoints(&db, ORG, false).unwrap().len(), 2);
        assert_eq!(endpoints::list_endpoints(&db, ORG, true).unwrap().len(), 1);
    }

    #[test]
    fn test_delete_endpoint_removes_history() {
        let db = create_test_db();
        let created = create_endpoint(&db, URL, &["content.created"]);
        let receipt = Publisher::new(db.clone())
            .publish("content.created", ORG, json!({}))
            .unwrap();
        assert_eq!(receipt.deliveries.len(), 1);

        endpoints::delete_endpoint(&db, &created.endpoint.id, ORG).unwrap();

        assert!(matches!(
            endpoints::get_endpoint(&db, &created.endpoint.id, ORG),
            Err(WebhookError::NotFound(_))
        ));
        assert!(deliveries::find_delivery(&db, &receipt.deliveries[0]).unwrap().is_none());
        assert!(matches!(
            endpoints::delete_endpoint(&db, &created.endpoint.id, ORG),
            Err(WebhookError::NotFound(_))
        ));
    }
}

mod tenant_tests {
    use super::*;

    #[test]
    fn test_endpoints_are_scoped_to_organization() {
        let db = create_test_db();
        let created = create_endpoint(&db, URL, &["content.created"]);
        let id = &created.endpoint.id;

        assert!(matches!(
            endpoints::get_endpoint(&db, id, OTHER_ORG),
            Err(WebhookError::NotFound(_))
        ));
        assert!(endpoints::list_endpoints(&db, OTHER_ORG, false).unwrap().is_empty());
        assert!(matches!(
            endpoints::update_endpoint(&db, id, OTHER_ORG, EndpointUpdate::default()),
            Err(WebhookError::NotFound(_))
        ));
        assert!(matches!(
            endpoints::regenerate_secret(&db, id, OTHER_ORG),
            Err(WebhookError::NotFound(_))
        ));
        assert!(matches!(
            endpoints::delete_endpoint(&db, id, OTHER_ORG),
            Err(WebhookError::NotFound(_))
        ));
        assert!(endpoints::get_endpoint(&db, id, ORG).is_ok());
    }

    #[test]
    fn test_events_only_reach_own_organization() {
        let db = create_test_db();
        create_endpoint(&db, URL, &["content.created"]);

        let receipt = Publisher::new(db.clone())
            .publish("content.created", OTHER_ORG, json!({}))
            .unwrap();
        assert!(receipt.deliveries.is_empty());
    }

    #[test]
    fn test_deliveries_are_scoped_to_organization() {
        let db = create_test_db();
        let created = create_endpoint(&db, URL, &["content.created"]);
        let receipt = Publisher::new(db.clone())
            .publish("content.created", ORG, json!({}))
            .unwrap();
        let delivery_id = &receipt.deliveries[0];

        assert!(deliveries::get_delivery(&db, delivery_id, ORG).is_ok());
        assert!(matches!(
            deliveries::get_delivery(&db, delivery_id, OTHER_ORG),
            Err(WebhookError::NotFound(_))
        ));
        assert!(matches!(
            deliveries::list_deliveries(&db, &created.endpoint.id, OTHER_ORG, 10, 0),
            Err(WebhookError::NotFound(_))
        ));
    }
}

mod publish_tests {
    use super::*;

    #[test]
    fn test_publish_creates_pending_record_per_subscriber() {
        let db = create_test_db();
        let a = create_endpoint(&db, URL, &["content.created"]);
        let b = create_endpoint(&db, "https://other.example.com/hook", &["content.created", "media.uploaded"]);
        create_endpoint(&db, "https://third.example.com/hook", &["media.uploaded"]);

        let receipt = Publisher::new(db.clone())
            .publish("content.created", ORG, json!({"id": 1, "title": "Hello"}))
            .unwrap();
        assert_eq!(receipt.deliveries.len(), 2);
        assert_eq!(receipt.failed, 0);

        let mut endpoint_ids = Vec::new();
        for id in &receipt.deliveries {
            let delivery = deliveries::find_delivery(&db, id).unwrap().unwrap();
            assert_eq!(delivery.status, DeliveryStatus::Pending);
            assert_eq!(delivery.attempt_count, 0);
            assert_eq!(delivery.event_id, receipt.event_id);
            assert_eq!(delivery.max_attempts, 3);
            assert!(delivery.next_attempt_at.is_some());

            let body: serde_json::Value = serde_json::from_str(&delivery.payload).unwrap();
            assert_eq!(body["event_id"], receipt.event_id);
            assert_eq!(body["event_type"], "content.created");
            assert_eq!(body["organization_id"], ORG);
            assert_eq!(body["data"]["title"], "Hello");
            endpoint_ids.push(delivery.endpoint_id);
        }
        endpoint_ids.sort();
        let mut expected = vec![a.endpoint.id, b.endpoint.id];
        expected.sort();
        assert_eq!(endpoint_ids, expected);
    }

    #[test]
    fn test_unsubscribed_event_creates_nothing() {
        let db = create_test_db();
        create_endpoint(&db, URL, &["content.created"]);

        let receipt = Publisher::new(db.clone())
            .publish("user.created", ORG, json!({}))
            .unwrap();
        assert!(receipt.deliveries.is_empty());
        assert!(receipt.event_id.starts_with("evt_"));
    }

    #[test]
    fn test_inactive_endpoint_skipped() {
        let db = create_test_db();
        endpoints::create_endpoint(&db, ORG, NewEndpoint::new(URL, &["content.created"]).inactive()).unwrap();

        let receipt = Publisher::new(db.clone())
            .publish("content.created", ORG, json!({}))
            .unwrap();
        assert!(receipt.deliveries.is_empty());
    }

    #[test]
    fn test_publish_rejects_malformed_event_type() {
        let db = create_test_db();
        let publisher = Publisher::new(db);
        assert!(matches!(
            publisher.publish("ContentCreated", ORG, json!({})),
            Err(WebhookError::Validation(_))
        ));
        assert!(matches!(
            publisher.publish("content.created", "  ", json!({})),
            Err(WebhookError::Validation(_))
        ));
    }

    #[test]
    fn test_publish_event_never_fails_the_caller() {
        let db = create_test_db();
        let publisher = Publisher::new(db);
        publisher.publish_event("not-an-event", ORG, json!({}));
    }

    #[tokio::test]
    async fn test_publish_offers_records_to_queue() {
        let db = create_test_db();
        create_endpoint(&db, URL, &["content.created"]);
        let (queue, mut rx) = DeliveryQueue::bounded(8);

        let receipt = Publisher::new(db.clone())
            .with_queue(queue.clone())
            .publish("content.created", ORG, json!({}))
            .unwrap();

        assert_eq!(queue.len(), 1);
        assert_eq!(rx.recv().await, Some(receipt.deliveries[0].clone()));
    }

    #[test]
    fn test_retry_budget_frozen_at_creation() {
        let db = create_test_db();
        let created = create_endpoint(&db, URL, &["content.created"]);
        let receipt = Publisher::new(db.clone())
            .publish("content.created", ORG, json!({}))
            .unwrap();

        endpoints::update_endpoint(
            &db,
            &created.endpoint.id,
            ORG,
            EndpointUpdate {
                max_retries: Some(7),
                ..Default::default()
            },
        )
        .unwrap();

        let delivery = deliveries::find_delivery(&db, &receipt.deliveries[0]).unwrap().unwrap();
        assert_eq!(delivery.max_attempts, 3);
    }
}

mod store_tests {
    use super::*;

    fn publish_one(db: &pebble_relay::Database) -> String {
        create_endpoint(db, URL, &["content.created"]);
        let receipt = Publisher::new(db.clone())
            .publish("content.created", ORG, json!({}))
            .unwrap();
        receipt.deliveries[0].clone()
    }

    #[test]
    fn test_claim_is_exclusive() {
        let db = create_test_db();
        let id = publish_one(&db);
        let now = Utc::now();

        let first = deliveries::claim_delivery(&db, &id, now, true).unwrap();
        assert_eq!(first.map(|d| d.status), Some(DeliveryStatus::Delivering));
        assert!(deliveries::claim_delivery(&db, &id, now, true).unwrap().is_none());
        assert!(deliveries::claim_delivery(&db, &id, now, false).unwrap().is_none());
    }

    #[test]
    fn test_concurrent_claims_have_one_winner() {
        let db = create_test_db();
        let id = publish_one(&db);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let db = db.clone();
                let id = id.clone();
                std::thread::spawn(move || {
                    deliveries::claim_delivery(&db, &id, Utc::now(), true)
                        .unwrap()
                        .is_some()
                })
            })
            .collect();

        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(winners, 1);
    }

    #[test]
    fn test_claim_respects_schedule() {
        let db = create_test_db();
        let id = publish_one(&db);
        let earlier = Utc::now() - ChronoDuration::minutes(5);

        assert!(deliveries::claim_delivery(&db, &id, earlier, true).unwrap().is_none());
        assert!(deliveries::claim_delivery(&db, &id, earlier, false).unwrap().is_some());
    }

    #[test]
    fn test_record_attempt_requires_claim() {
        let db = create_test_db();
        let id = publish_one(&db);
        let record = AttemptRecord {
            status: DeliveryStatus::Success,
            attempt_count: 1,
            next_attempt_at: None,
            response_status: Some(200),
            response_body: Some("ok".to_string()),
            error: None,
        };

        assert!(!deliveries::record_attempt(&db, &id, &record).unwrap());

        deliveries::claim_delivery(&db, &id, Utc::now(), true).unwrap().unwrap();
        assert!(deliveries::record_attempt(&db, &id, &record).unwrap());
        assert!(!deliveries::record_attempt(&db, &id, &record).unwrap());

        let delivery = deliveries::find_delivery(&db, &id).unwrap().unwrap();
        assert_eq!(delivery.status, DeliveryStatus::Success);
        assert_eq!(delivery.attempt_count, 1);
        assert_eq!(delivery.last_response_status, Some(200));
        assert!(delivery.next_attempt_at.is_none());

        assert!(deliveries::claim_delivery(&db, &id, Utc::now(), false).unwrap().is_none());
    }

    #[test]
    fn test_due_deliveries() {
        let db = create_test_db();
        let id = publish_one(&db);

        let past = Utc::now() - ChronoDuration::minutes(5);
        assert!(deliveries::due_deliveries(&db, past, 10).unwrap().is_empty());
        assert_eq!(deliveries::due_deliveries(&db, Utc::now(), 10).unwrap(), vec![id.clone()]);

        deliveries::claim_delivery(&db, &id, Utc::now(), true).unwrap();
        assert!(deliveries::due_deliveries(&db, Utc::now(), 10).unwrap().is_empty());
    }

    #[test]
    fn test_list_deliveries_paginates() {
        let db = create_test_db();
        let created = create_endpoint(&db, URL, &["content.created"]);
        let publisher = Publisher::new(db.clone());
        for n in 0..5 {
            publisher.publish("content.created", ORG, json!({ "n": n })).unwrap();
        }

        let page = deliveries::list_deliveries(&db, &created.endpoint.id, ORG, 2, 0).unwrap();
        assert_eq!(page.total, 5);
        assert_eq!(page.deliveries.len(), 2);

        let last = deliveries::list_deliveries(&db, &created.endpoint.id, ORG, 2, 4).unwrap();
        assert_eq!(last.deliveries.len(), 1);
    }
}

mod scheduler_tests {
    use super::*;

    #[tokio::test]
    async fn test_scan_enqueues_due_records_once() {
        let db = create_test_db();
        create_endpoint(&db, URL, &["content.created"]);
        let publisher = Publisher::new(db.clone());
        publisher.publish("content.created", ORG, json!({})).unwrap();
        publisher.publish("content.created", ORG, json!({})).unwrap();

        let (queue, _rx) = DeliveryQueue::bounded(16);
        let scheduler = RetryScheduler::new(db.clone(), queue.clone(), &DeliveryConfig::default());

        let report = scheduler.scan_once(Utc::now()).unwrap();
        assert_eq!(report.due, 2);
        assert_eq!(report.enqueued, 2);

        let again = scheduler.scan_once(Utc::now()).unwrap();
        assert_eq!(again.due, 2);
        assert_eq!(again.enqueued, 0);
        assert_eq!(queue.len(), 2);
    }

    #[tokio::test]
    async fn test_scan_defers_when_queue_full() {
        let db = create_test_db();
        create_endpoint(&db, URL, &["content.created"]);
        let publisher = Publisher::new(db.clone());
        for _ in 0..3 {
            publisher.publish("content.created", ORG, json!({})).unwrap();
        }

        let (queue, _rx) = DeliveryQueue::bounded(1);
        let report = RetryScheduler::new(db, queue, &DeliveryConfig::default())
            .scan_once(Utc::now())
            .unwrap();
        assert_eq!(report.enqueued, 1);
        assert_eq!(report.deferred, 2);
    }

    #[tokio::test]
    async fn test_scan_recovers_expired_claims() {
        let db = create_test_db();
        create_endpoint(&db, URL, &["content.created"]);
        let receipt = Publisher::new(db.clone())
            .publish("content.created", ORG, json!({}))
            .unwrap();
        let id = &receipt.deliveries[0];

        let claimed_at = Utc::now() - ChronoDuration::minutes(10);
        deliveries::claim_delivery(&db, id, claimed_at, false).unwrap().unwrap();

        let (queue, _rx) = DeliveryQueue::bounded(16);
        let report = RetryScheduler::new(db.clone(), queue, &DeliveryConfig::default())
            .scan_once(Utc::now())
            .unwrap();
        assert_eq!(report.recovered, 1);
        assert_eq!(report.enqueued, 1);

        let delivery = deliveries::find_delivery(&db, id).unwrap().unwrap();
        assert_eq!(delivery.status, DeliveryStatus::Retrying);
        assert_eq!(delivery.attempt_count, 0);
        assert!(delivery.last_error.is_some());
    }

    #[tokio::test]
    async fn test_scan_leaves_fresh_claims_alone() {
        let db = create_test_db();
        create_endpoint(&db, URL, &["content.created"]);
        let receipt = Publisher::new(db.clone())
            .publish("content.created", ORG, json!({}))
            .unwrap();
        deliveries::claim_delivery(&db, &receipt.deliveries[0], Utc::now(), true)
            .unwrap()
            .unwrap();

        let (queue, _rx) = DeliveryQueue::bounded(16);
        let report = RetryScheduler::new(db, queue, &DeliveryConfig::default())
            .scan_once(Utc::now())
            .unwrap();
        assert_eq!(report.recovered, 0);
        assert_eq!(report.due, 0);
    }
}
