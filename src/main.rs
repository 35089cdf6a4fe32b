/// Bucket Gateway - multi-tenant object storage
///
/// Stores uploaded files per tenant and keeps a durable hash -> path
/// reference index in rotating JSON segment files.

mod api;
mod atomic_file;
mod blob_store;
mod config;
mod context;
mod error;
mod hashing;
mod metadata;
mod metrics;
mod reference_store;
mod resolver;
mod server;
mod tenant;

use config::GatewayConfig;
use context::AppContext;
use error::GatewayResult;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> GatewayResult<()> {
    // Load configuration
    let config = GatewayConfig::from_env()?;

    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(&config.logging.level))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Print banner
    print_banner(&config.service.version);

    // Create application context
    let ctx = AppContext::new(config).await?;

    // Start server
    server::serve(ctx).await?;

    Ok(())
}

fn print_banner(version: &str) {
    println!(
        r#"
    ____             __        __     ______      __
   / __ )__  _______/ /_____  / /_   / ____/___ _/ /____ _      ______ ___  __
  / __  / / / / ___/ //_/ _ \/ __/  / / __/ __ `/ __/ _ \ | /| / / __ `/ / / /
 / /_/ / /_/ / /__/ ,< /  __/ /_   / /_/ / /_/ / /_/  __/ |/ |/ / /_/ / /_/ /
/_____/\__,_/\___/_/|_|\___/\__/   \____/\__,_/\__/\___/|__/|__/\__,_/\__, /
                                                                      /____/
        Multi-tenant object storage gateway v{}
        "#,
        version
    );
}
