//! FleetSim server - device engine binary
//!
//! Simulates large populations of IoT devices publishing telemetry over
//! MQTT, CoAP or HTTP, with a REST control plane and an InfluxDB-compatible
//! metrics sink. All configuration comes from environment variables; see
//! `config.rs` for the variable names and defaults.

mod config;

use config::ServerConfig;
use fleetsim_api::handlers::AppState;
use fleetsim_api::create_router;
use fleetsim_manager::DeviceManager;
use fleetsim_sink::MetricsSink;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

fn log_level(config: &ServerConfig) -> Level {
    match config.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ServerConfig::from_env();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level(&config))
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("Failed to set subscriber");

    info!("Starting FleetSim v{}", env!("CARGO_PKG_VERSION"));
    info!("Model directory: {:?}", config.model_dir);
    if config.influxdb_url.is_empty() {
        info!("Metrics sink disabled (INFLUXDB_URL not set)");
    } else {
        info!("Metrics sink: {}", config.influxdb_url);
    }

    let sink = MetricsSink::from_config(config.to_sink_config());
    let manager = DeviceManager::new(config.to_manager_config(), sink.clone())?;

    let app = create_router(
        AppState {
            manager: manager.clone(),
        },
        config.request_timeout,
    );

    let addr: SocketAddr = format!("{}:{}", config.http_host, config.http_port).parse()?;
    let listener = TcpListener::bind(addr).await?;
    info!("Server listening on http://{}", addr);
    info!("Health check: GET http://{}/health", addr);

    // Shutdown on SIGINT or SIGTERM: stop devices first, then flush the sink
    let shutdown_manager = manager.clone();
    let shutdown_sink = sink.clone();
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        let terminate = async {
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("failed to install SIGTERM handler")
                .recv()
                .await;
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {
                info!("SIGINT received, shutting down gracefully...");
            }
            _ = terminate => {
                info!("SIGTERM received, shutting down gracefully...");
            }
        }

        shutdown_manager.shutdown().await;
        shutdown_sink.shutdown().await;
        info!("Shutdown complete");
        std::process::exit(0);
    });

    axum::serve(listener, app).await?;
    Ok(())
}
