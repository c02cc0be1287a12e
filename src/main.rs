//! campd - campaign combat session daemon

use anyhow::Result;
use campd::{Config, Server};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "campd=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut config = Config::default();
    if let Ok(addr) = std::env::var("CAMPD_BIND_ADDR") {
        config.bind_addr = addr.parse()?;
    }
    if let Ok(path) = std::env::var("CAMPD_DB_PATH") {
        config.db_path = Some(path);
    }

    let server = Server::new(config).await?;
    server.run().await?;

    Ok(())
}
