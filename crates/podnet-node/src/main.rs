//! Pod Node binary
//!
//! A pod of the test network.

use podnet_node::{NodeConfig, PodNode};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pod_node=info,podnet=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Pod Node");

    let config = NodeConfig::from_env()?;

    let node = PodNode::new(config)?;
    node.run().await?;

    Ok(())
}
