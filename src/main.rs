//! CS2 GW - Rust implementation
//!
//! Gateway between a web control surface and a Märklin CS2 command station.

use anyhow::{Context, Result};
use clap::Parser;
use crossbeam::channel::RecvTimeoutError;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cs2_gw::bus::Subscription;
use cs2_gw::config::GatewayConfig;
use cs2_gw::gateway::Gateway;
use cs2_gw::shutdown::Shutdown;
use cs2_gw::sniffer;
use cs2_gw::state::Event;

/// CS2 Gateway - bridge a web control surface to a CS2 command station
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: String,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short, long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// CS2 address (overrides udp.target_host)
    #[arg(long, env = "CS2_UDP_IP")]
    udp_ip: Option<String>,

    /// CS2 receive port (overrides udp.tx_port)
    #[arg(long)]
    tx_port: Option<u16>,

    /// Local status port (overrides udp.rx_port)
    #[arg(long)]
    rx_port: Option<u16>,

    /// Run in sniffer mode
    #[arg(long)]
    sniffer: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let args = Args::parse();

    init_logging(&args.log_level)?;

    info!("Starting CS2 GW v{}...", env!("CARGO_PKG_VERSION"));
    info!("Configuration file: {}", args.config);

    let mut config = GatewayConfig::load_or_default(&args.config)?;
    if let Some(ip) = args.udp_ip {
        config.udp.target_host = ip;
    }
    if let Some(port) = args.tx_port {
        config.udp.tx_port = port;
    }
    if let Some(port) = args.rx_port {
        config.udp.rx_port = port;
    }
    config.validate()?;

    if args.sniffer {
        return run_sniffer(&config).await;
    }

    run_app(config).await?;

    info!("CS2 GW shutdown complete");
    Ok(())
}

async fn run_sniffer(config: &GatewayConfig) -> Result<()> {
    let bind = config.bind_addr()?;
    let recv_timeout = config.recv_timeout();
    let shutdown = Shutdown::new();

    let token = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        token.trigger();
    });

    tokio::task::spawn_blocking(move || sniffer::run_cli_sniffer(bind, recv_timeout, shutdown))
        .await
        .context("Sniffer task failed")?
}

async fn run_app(config: GatewayConfig) -> Result<()> {
    let mut gateway = Gateway::new(config)?;
    gateway.start()?;

    let health = gateway.health();
    info!(
        "Gateway ready: {} locos, target {}, system {}",
        health.loco_count, health.udp_target, health.system_state
    );

    // Mirror the event stream into the log
    let events = gateway.subscribe();
    let token = gateway.shutdown_token();
    let forwarder = tokio::task::spawn_blocking(move || log_events(events, token));

    shutdown_signal().await;

    gateway.shutdown();
    if let Err(e) = forwarder.await {
        warn!("Event log task failed: {}", e);
    }
    Ok(())
}

fn log_events(events: Subscription, shutdown: Shutdown) {
    while !shutdown.is_triggered() {
        match events.recv_timeout(Duration::from_millis(500)) {
            Ok(msg) => match serde_json::from_str::<Event>(&msg) {
                Ok(Event::Error { message }) => warn!("Gateway error: {}", message),
                _ => debug!("Event: {}", msg),
            },
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => {
                warn!("Event log subscriber was dropped");
                break;
            }
        }
    }
}

fn init_logging(level: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_thread_ids(false)
                .with_thread_names(false),
        )
        .init();

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for Ctrl+C: {}", e);
        return;
    }
    info!("Shutdown signal received");
}
