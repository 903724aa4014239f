use crate::models::Delivery;
use crate::services::deliveries;
use crate::services::dispatcher::{Dispatcher, DispatcherSettings};
use crate::{Config, Database};
use anyhow::Result;
use std::path::Path;

pub async fn list(config_path: &Path, org: &str, endpoint_id: &str, limit: usize) -> Result<()> {
    let config = Config::load(config_path)?;
    let db = Database::open(&config.database.path)?;

    let page = deliveries::list_deliveries(&db, endpoint_id, org, limit.max(1), 0)?;

    println!(
        "{:<38} {:<22} {:<11} {:<9} {}",
        "ID", "EVENT", "STATUS", "ATTEMPTS", "CREATED"
    );
    println!("{}", "-".repeat(105));
    for delivery in &page.deliveries {
        println!(
            "{:<38} {:<22} {:<11} {:<9} {}",
            delivery.id,
            delivery.event_type,
            delivery.status,
            format!("{}/{}", delivery.attempt_count, delivery.max_attempts + 1),
            delivery.created_at.format("%Y-%m-%d %H:%M:%S")
        );
    }
    println!();
    println!("  Showing {} of {} deliveries", page.deliveries.len(), page.total);

    Ok(())
}

pub async fn show(config_path: &Path, org: &str, delivery_id: &str) -> Result<()> {
    let config = Config::load(config_path)?;
    let db = Database::open(&config.database.path)?;

    let delivery = deliveries::get_delivery(&db, delivery_id, org)?;
    print_delivery(&delivery);

    Ok(())
}

pub async fn retry(config_path: &Path, org: &str, delivery_id: &str) -> Result<()> {
    let config = Config::load(config_path)?;
    let db = Database::open(&config.database.path)?;

    let dispatcher = Dispatcher::new(db, DispatcherSettings::from(&config.delivery))?;
    let delivery = dispatcher.replay(delivery_id, org).await?;

    if delivery.id != delivery_id {
        tracing::info!("Replayed '{}' as new delivery '{}'", delivery_id, delivery.id);
    }
    print_delivery(&delivery);

    Ok(())
}

fn print_delivery(delivery: &Delivery) {
    println!("  ID:           {}", delivery.id);
    println!("  Endpoint:     {}", delivery.endpoint_id);
    println!("  Event:        {} ({})", delivery.event_type, delivery.event_id);
    println!("  Status:       {}", delivery.status);
    println!(
        "  Attempts:     {} of {}",
        delivery.attempt_count,
        delivery.max_attempts + 1
    );
    if let Some(at) = delivery.next_attempt_at {
        println!("  Next attempt: {}", at.to_rfc3339());
    }
    if let Some(status) = delivery.last_response_status {
        println!("  Last status:  {}", status);
    }
    if let Some(error) = &delivery.last_error {
        println!("  Last error:   {}", error);
    }
    if let Some(body) = delivery.last_response_body.as_deref().filter(|b| !b.is_empty()) {
        println!("  Last body:    {}", body);
    }
    println!("  Created:      {}", delivery.created_at.to_rfc3339());
    println!("  Updated:      {}", delivery.updated_at.to_rfc3339());
}
