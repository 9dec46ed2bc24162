//! Stream Bridge Worker - runs the configured consumers.
//!
//! Every `[[consumers]]` entry gets its own polling task that logs delivered
//! events through [`LogHandler`]. All tasks share one Redis pool and stop
//! together on SIGINT/SIGTERM after finishing their current cycle.
//!
//! ## Configuration
//!
//! - `STREAMBRIDGE_CONFIG`: path to the TOML file (default: `config/streambridge.toml`)
//! - `RUST_LOG`: Logging level (default: "info")

use std::sync::Arc;
use tracing::{error, info, warn};

use streambridge::config::BridgeConfig;
use streambridge::consumer::{ConsumerHandle, StreamConsumer};
use streambridge::handler::{EventHandler, LogHandler};
use streambridge::shutdown::ShutdownSignal;
use streambridge::RedisConnector;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    streambridge::init_logging();

    let config = BridgeConfig::load()?;
    if config.consumers.is_empty() {
        warn!("No consumers configured, nothing to do");
        return Ok(());
    }

    info!(consumers = config.consumers.len(), "Stream Bridge Worker starting");

    let connector = RedisConnector::from_config(&config.redis);
    let store = connector.store().await?;
    let handler: Arc<dyn EventHandler> = Arc::new(LogHandler::new());
    let shutdown = ShutdownSignal::new();

    let mut handles: Vec<ConsumerHandle> = Vec::with_capacity(config.consumers.len());
    for endpoint in &config.consumers {
        let consumer = match StreamConsumer::start(
            Arc::clone(&store),
            Arc::clone(&handler),
            endpoint,
            &config.bridge.global_header_filters,
        )
        .await
        {
            Ok(consumer) => consumer,
            Err(e) => {
                error!(stream = %endpoint.stream, error = %e, "Failed to start consumer");
                shutdown.trigger();
                for handle in handles {
                    handle.join().await;
                }
                return Err(e.into());
            }
        };
        handles.push(consumer.spawn_with(shutdown.clone()));
    }

    info!(running = handles.len(), "Listening for events");

    shutdown.wait().await;
    info!("Shutdown signal received, finishing current cycles...");

    let drain = async {
        for handle in handles {
            handle.join().await;
        }
    };
    if tokio::time::timeout(shutdown.timeout(), drain).await.is_err() {
        warn!(
            timeout_secs = shutdown.timeout().as_secs(),
            "Shutdown timeout reached, exiting with consumers still running"
        );
    }

    info!("Worker shutdown complete");
    Ok(())
}
