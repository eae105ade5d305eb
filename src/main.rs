//! bucketlens -- region-aware S3 bucket browser and metadata search server.
//!
//! SIGTERM/SIGINT handlers stop accepting connections and wait for in-flight
//! requests up to `server.shutdown_timeout` before exiting.

use std::future::IntoFuture;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use bucketlens::browse::BrowserService;
use bucketlens::config::{Config, LoggingConfig};
use bucketlens::storage::aws::AwsClientFactory;
use bucketlens::storage::backend::ClientFactory;
use bucketlens::storage::memory::MemoryCluster;

/// Command-line arguments for the bucketlens server.
#[derive(Parser, Debug)]
#[command(
    name = "bucketlens",
    version,
    about = "Region-aware S3 bucket browser and metadata search"
)]
struct Cli {
    /// Path to the YAML configuration file.
    #[arg(short, long, default_value = "bucketlens.yaml")]
    config: String,

    /// Override the bind address (host:port).
    #[arg(short, long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config_found = std::path::Path::new(&cli.config).exists();
    let mut config = if config_found {
        bucketlens::config::load_config(&cli.config)?
    } else {
        Config::default()
    };
    bucketlens::config::apply_env_overrides(
        &mut config,
        std::env::var("AWS_REGION").ok(),
        std::env::var("PORT").ok(),
    )?;

    init_tracing(&config.logging);
    if config_found {
        info!("Configuration loaded from {}", cli.config);
    } else {
        warn!("No configuration file at {}, using defaults", cli.config);
    }

    let bind_addr = cli.bind.unwrap_or_else(|| config.server.bind_addr());

    if config.observability.metrics {
        bucketlens::metrics::init_metrics()?;
        bucketlens::metrics::describe_metrics();
        info!("Prometheus metrics initialized");
    }

    let factory: Arc<dyn ClientFactory> = match config.storage.backend.as_str() {
        "memory" => {
            let cluster = match &config.storage.memory.fixture {
                Some(path) => {
                    info!("Seeding memory storage from {}", path);
                    MemoryCluster::from_fixture(path)?
                }
                None => MemoryCluster::new(),
            };
            Arc::new(cluster)
        }
        "aws" => {
            let factory = AwsClientFactory::load(
                config.storage.endpoint(),
                config.storage.force_path_style,
            )
            .await;
            info!(
                "AWS storage initialized: default_region={} endpoint='{}'",
                config.storage.default_region, config.storage.endpoint_url
            );
            Arc::new(factory)
        }
        other => anyhow::bail!("unknown storage.backend '{other}' (expected aws or memory)"),
    };

    let service = BrowserService::new(
        factory,
        &config.storage.default_region,
        config.search.clone(),
    );
    let shutdown_timeout = Duration::from_secs(config.server.shutdown_timeout);

    let state = Arc::new(bucketlens::AppState {
        config,
        service: Arc::new(service),
    });

    let app = bucketlens::server::app(state);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("bucketlens listening on {}", bind_addr);

    let server = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .into_future();
    let drained = async {
        shutdown_signal().await;
        tokio::time::sleep(shutdown_timeout).await;
    };

    tokio::select! {
        result = server => result?,
        _ = drained => warn!("Shutdown timeout of {:?} elapsed, exiting", shutdown_timeout),
    }

    info!("bucketlens shut down");

    Ok(())
}

/// Install the global tracing subscriber.  `RUST_LOG` wins over
/// `logging.level`.
fn init_tracing(logging: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    if logging.format == "json" {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Wait for SIGTERM or SIGINT (Ctrl+C), then return to trigger graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received SIGINT, shutting down");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, shutting down");
        },
    }
}
