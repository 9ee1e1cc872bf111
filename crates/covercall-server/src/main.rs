use clap::Parser;
use tracing_subscriber::EnvFilter;

use covercall_server::{CovercallServer, ServerConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,covercall=debug")),
        )
        .init();

    let config = ServerConfig::parse();
    let server = CovercallServer::build(config).await?;
    server.run().await
}
