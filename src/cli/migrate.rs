use crate::cli::MigrateCommand;
use crate::{Config, Database};
use anyhow::Result;
use std::path::Path;

pub async fn run(config_path: &Path, command: Option<MigrateCommand>) -> Result<()> {
    let config = Config::load(config_path)?;
    let db = Database::open(&config.database.path)?;

    match command {
        None => {
            db.migrate()?;
            tracing::info!("Schema is up to date at {}", config.database.path);
        }
        Some(MigrateCommand::Status) => print_status(&db, &config.database.path)?,
    }

    Ok(())
}

fn print_status(db: &Database, path: &str) -> Result<()> {
    let statuses = db.get_migration_status()?;
    let pending: Vec<i32> = statuses
        .iter()
        .filter(|(_, _, applied_at)| applied_at.is_none())
        .map(|(version, _, _)| *version)
        .collect();

    println!("Database: {}", path);
    println!();
    for (version, description, applied_at) in &statuses {
        let state = applied_at.as_deref().unwrap_or("pending");
        println!("  [{:03}] {:<42} {}", version, description, state);
    }
    println!();

    match pending.as_slice() {
        [] => println!("Schema current ({} migration(s) applied).", statuses.len()),
        versions => println!(
            "{} migration(s) pending: {:?}. Run `pebble-relay migrate` to apply.",
            versions.len(),
            versions
        ),
    }

    Ok(())
}
