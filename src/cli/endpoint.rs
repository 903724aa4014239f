use crate::models::{Endpoint, EndpointUpdate, NewEndpoint};
use crate::services::dispatcher::{Dispatcher, DispatcherSettings};
use crate::services::endpoints;
use crate::{Config, Database};
use anyhow::Result;
use std::path::Path;

use super::EndpointCommand;

pub async fn run(config_path: &Path, command: EndpointCommand) -> Result<()> {
    let config = Config::load(config_path)?;
    let db = Database::open(&config.database.path)?;

    match command {
        EndpointCommand::Add {
            org,
            url,
            events,
            headers,
            max_retries,
            name,
            description,
        } => {
            let new = NewEndpoint {
                url,
                name,
                description,
                subscribed_events: events,
                custom_headers: headers.into_iter().collect(),
                max_retries,
                active: None,
            };
            let created = endpoints::create_endpoint(&db, &org, new)?;
            tracing::info!("Endpoint '{}' created", created.endpoint.id);
            print_endpoint(&created.endpoint);
            println!();
            println!("  Signing secret (shown once): {}", created.secret);
        }
        EndpointCommand::List { org, active_only } => {
            let list = endpoints::list_endpoints(&db, &org, active_only)?;
            println!("{:<38} {:<8} {:<8} {}", "ID", "ACTIVE", "RETRIES", "URL");
            println!("{}", "-".repeat(90));
            for endpoint in list {
                println!(
                    "{:<38} {:<8} {:<8} {}",
                    endpoint.id,
                    if endpoint.active { "yes" } else { "no" },
                    endpoint.max_retries,
                    endpoint.url
                );
            }
        }
        EndpointCommand::Show { org, id } => {
            let endpoint = endpoints::get_endpoint(&db, &id, &org)?;
            print_endpoint(&endpoint);
        }
        EndpointCommand::Update {
            org,
            id,
            url,
            events,
            max_retries,
            name,
            active,
        } => {
            let update = EndpointUpdate {
                url,
                name,
                subscribed_events: events,
                max_retries,
                active,
                ..Default::default()
            };
            let endpoint = endpoints::update_endpoint(&db, &id, &org, update)?;
            tracing::info!("Endpoint '{}' updated", endpoint.id);
            print_endpoint(&endpoint);
        }
        EndpointCommand::Remove { org, id } => {
            endpoints::delete_endpoint(&db, &id, &org)?;
            tracing::info!("Endpoint '{}' removed", id);
        }
        EndpointCommand::RotateSecret { org, id } => {
            let rotated = endpoints::regenerate_secret(&db, &id, &org)?;
            tracing::info!("Secret rotated for endpoint '{}'", rotated.endpoint_id);
            println!("New signing secret (shown once): {}", rotated.secret);
        }
        EndpointCommand::Test { org, id } => {
            let endpoint = endpoints::get_endpoint(&db, &id, &org)?;
            let dispatcher = Dispatcher::new(db, DispatcherSettings::from(&config.delivery))?;
            let result = dispatcher.test_endpoint(&endpoint, None).await?;

            if result.success {
                println!(
                    "\x1b[32m✓\x1b[0m {} responded {} in {}ms",
                    endpoint.url,
                    result.status_code.unwrap_or_default(),
                    result.duration_ms
                );
            } else {
                println!(
                    "\x1b[31m✗\x1b[0m {} failed after {}ms: {}",
                    endpoint.url,
                    result.duration_ms,
                    result.error.as_deref().unwrap_or("unknown error")
                );
            }
            if let Some(body) = result.response_body.filter(|b| !b.is_empty()) {
                println!("  Response: {}", body);
            }
        }
    }

    Ok(())
}

fn print_endpoint(endpoint: &Endpoint) {
    println!("  ID:          {}", endpoint.id);
    if let Some(name) = &endpoint.name {
        println!("  Name:        {}", name);
    }
    if let Some(description) = &endpoint.description {
        println!("  Description: {}", description);
    }
    println!("  URL:         {}", endpoint.url);
    println!("  Events:      {}", endpoint.subscribed_events.join(", "));
    println!("  Active:      {}", endpoint.active);
    println!("  Max retries: {}", endpoint.max_retries);
    for (name, value) in &endpoint.custom_headers {
        println!("  Header:      {}: {}", name, value);
    }
    println!("  Created:     {}", endpoint.created_at.to_rfc3339());
}
