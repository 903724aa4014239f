pub mod delivery;
pub mod endpoint;
pub mod init;
pub mod migrate;
pub mod publish;
pub mod serve;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "pebble-relay")]
#[command(version)]
#[command(about = "A webhook delivery engine", long_about = None)]
pub struct Cli {
    #[arg(short, long, env = "RELAY_CONFIG", default_value = "relay.toml")]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Write a default relay.toml
    Init {
        #[arg(default_value = ".")]
        path: PathBuf,
    },
    /// Run the delivery engine and the HTTP API
    Serve {
        #[arg(short = 'H', long)]
        host: Option<String>,
        #[arg(short, long)]
        port: Option<u16>,
    },
    Migrate {
        #[command(subcommand)]
        command: Option<MigrateCommand>,
    },
    /// Manage webhook endpoints
    Endpoint {
        #[command(subcommand)]
        command: EndpointCommand,
    },
    /// List recent deliveries for an endpoint
    Deliveries {
        #[arg(long)]
        org: String,
        endpoint_id: String,
        #[arg(long, default_value = "20")]
        limit: usize,
    },
    /// Show one delivery record
    Delivery {
        #[arg(long)]
        org: String,
        delivery_id: String,
    },
    /// Replay a delivery now
    Retry {
        #[arg(long)]
        org: String,
        delivery_id: String,
    },
    /// Publish an event to subscribed endpoints
    Publish {
        #[arg(long)]
        org: String,
        #[arg(long)]
        event_type: String,
        /// JSON payload for the event's `data` field
        #[arg(long)]
        data: Option<String>,
    },
    /// List supported event types
    Events,
}

#[derive(Subcommand)]
pub enum MigrateCommand {
    Status,
}

#[derive(Subcommand)]
pub enum EndpointCommand {
    Add {
        #[arg(long)]
        org: String,
        #[arg(long)]
        url: String,
        #[arg(long, value_delimiter = ',')]
        events: Vec<String>,
        /// Extra request header, NAME=VALUE (repeatable)
        #[arg(long = "header", value_parser = parse_header)]
        headers: Vec<(String, String)>,
        #[arg(long)]
        max_retries: Option<u32>,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        description: Option<String>,
    },
    List {
        #[arg(long)]
        org: String,
        #[arg(long)]
        active_only: bool,
    },
    Show {
        #[arg(long)]
        org: String,
        id: String,
    },
    Update {
        #[arg(long)]
        org: String,
        id: String,
        #[arg(long)]
        url: Option<String>,
        #[arg(long, value_delimiter = ',')]
        events: Option<Vec<String>>,
        #[arg(long)]
        max_retries: Option<u32>,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        active: Option<bool>,
    },
    Remove {
        #[arg(long)]
        org: String,
        id: String,
    },
    RotateSecret {
        #[arg(long)]
        org: String,
        id: String,
    },
    /// Send a signed test event without recording a delivery
    Test {
        #[arg(long)]
        org: String,
        id: String,
    },
}

fn parse_header(raw: &str) -> Result<(String, String), String> {
    let (name, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=VALUE, got '{}'", raw))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(format!("header name missing in '{}'", raw));
    }
    Ok((name.to_string(), value.trim().to_string()))
}
