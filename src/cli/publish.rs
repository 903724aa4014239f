use crate::models::EVENT_TYPES;
use crate::services::publisher::Publisher;
use crate::{Config, Database};
use anyhow::{Context, Result};
use std::path::Path;

/// Records are created `pending`; a running `serve` picks them up on its
/// next scheduler pass.
pub async fn run(config_path: &Path, org: &str, event_type: &str, data: Option<&str>) -> Result<()> {
    let config = Config::load(config_path)?;
    let db = Database::open(&config.database.path)?;

    let data = match data {
        Some(raw) => serde_json::from_str(raw).context("--data must be valid JSON")?,
        None => serde_json::json!({}),
    };

    let receipt = Publisher::new(db).publish(event_type, org, data)?;

    tracing::info!(
        "Published {} ({}) to {} endpoint(s)",
        receipt.event_type,
        receipt.event_id,
        receipt.deliveries.len()
    );
    for id in &receipt.deliveries {
        println!("  {}", id);
    }
    if receipt.failed > 0 {
        tracing::warn!("{} delivery record(s) could not be created", receipt.failed);
    }

    Ok(())
}

pub fn list_event_types() {
    for event_type in EVENT_TYPES {
        println!("{}", event_type);
    }
}
