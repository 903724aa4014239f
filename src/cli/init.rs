use anyhow::Result;
use std::path::PathBuf;

pub async fn run(path: PathBuf) -> Result<()> {
    std::fs::create_dir_all(&path)?;
    std::fs::create_dir_all(path.join("data"))?;

    let config_path = path.join("relay.toml");
    if config_path.exists() {
        anyhow::bail!("{} already exists", config_path.display());
    }

    let config = format!(
        r#"[server]
host = "127.0.0.1"
port = 3000

[database]
path = "./data/relay.db"
pool_size = 10

[delivery]
workers = 16
queue_capacity = 1024
request_timeout_secs = 30
backoff_base_secs = 60
poll_interval_secs = 30
scan_batch_size = 100
stale_after_secs = 300
response_body_limit = 2048
user_agent = "pebble-relay/{}"

[api]
default_page_size = 20
max_page_size = 100
"#,
        env!("CARGO_PKG_VERSION")
    );

    std::fs::write(&config_path, config)?;

    tracing::info!("Created relay config at {:?}", config_path);
    tracing::info!("Run 'pebble-relay migrate' to set up the database");
    tracing::info!("Run 'pebble-relay serve' to start delivering");

    Ok(())
}
