use clap::Parser;
use pebble_relay::cli::{Cli, Commands};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pebble_relay=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Init { path }) => {
            pebble_relay::cli::init::run(path).await?;
        }
        Some(Commands::Serve { host, port }) => {
            pebble_relay::cli::serve::run(&cli.config, host, port).await?;
        }
        Some(Commands::Migrate { command }) => {
            pebble_relay::cli::migrate::run(&cli.config, command).await?;
        }
        Some(Commands::Endpoint { command }) => {
            pebble_relay::cli::endpoint::run(&cli.config, command).await?;
        }
        Some(Commands::Deliveries {
            org,
            endpoint_id,
            limit,
        }) => {
            pebble_relay::cli::delivery::list(&cli.config, &org, &endpoint_id, limit).await?;
        }
        Some(Commands::Delivery { org, delivery_id }) => {
            pebble_relay::cli::delivery::show(&cli.config, &org, &delivery_id).await?;
        }
        Some(Commands::Retry { org, delivery_id }) => {
            pebble_relay::cli::delivery::retry(&cli.config, &org, &delivery_id).await?;
        }
        Some(Commands::Publish {
            org,
            event_type,
            data,
        }) => {
            pebble_relay::cli::publish::run(&cli.config, &org, &event_type, data.as_deref()).await?;
        }
        Some(Commands::Events) => {
            pebble_relay::cli::publish::list_event_types();
        }
        None => {
            // No subcommand provided, print help
            use clap::CommandFactory;
            Cli::command().print_help()?;
        }
    }

    Ok(())
}
