//! ConsultEase coordinator daemon
//!
//! Routes consultation requests to faculty terminals, tracks their
//! presence, and serves local clients over IPC.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ce_core::bus::{BusClient, MemoryBroker, MqttTransport};
use ce_core::config::{self, CoordinatorConfig};
use ce_coordinator::ipc::{BroadcastListener, IpcServer};
use ce_coordinator::{demo, Coordinator, MemoryRegistry};
use ce_terminal::input;

/// Capacity of the IPC event broadcast channel
const IPC_EVENT_CAPACITY: usize = 1024;

#[derive(Parser)]
#[command(name = "ce-coordinator")]
#[command(about = "ConsultEase coordinator daemon")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// MQTT broker address (host or host:port)
    #[arg(short, long, env = "CONSULTEASE_BROKER")]
    broker: Option<String>,

    /// Run every terminal in-process over a memory bus (single-host demo)
    #[arg(long, conflicts_with = "broker")]
    memory_bus: bool,

    /// IPC port (overrides config)
    #[arg(long)]
    ipc_port: Option<u16>,

    /// Run in foreground with verbose output
    #[arg(short, long)]
    foreground: bool,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.foreground {
        "debug"
    } else {
        &args.log_level
    };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| log_level.into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("ConsultEase coordinator starting...");

    // The faculty directory only comes from the config file
    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| config::default_config_path("coordinator"));
    let mut config: CoordinatorConfig = config::load_config(&config_path)
        .with_context(|| format!("Failed to load config from {:?}", config_path))?;

    if let Some(broker) = &args.broker {
        config.bus.set_broker(broker)?;
    }
    if let Some(port) = args.ipc_port {
        config.ipc_port = port;
    }
    if let Err(e) = config.validate() {
        tracing::error!("Invalid configuration: {}", e);
        return Err(e).context("Invalid coordinator configuration");
    }
    tracing::info!("Loaded {} faculty from {:?}", config.faculty.len(), config_path);

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut signal) => {
                    signal.recv().await;
                }
                Err(e) => {
                    tracing::warn!("Failed to install SIGTERM handler: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {
                tracing::info!("Received Ctrl+C, initiating shutdown...");
            }
            _ = terminate => {
                tracing::info!("Received SIGTERM, initiating shutdown...");
            }
        }

        shutdown.cancel();
    });

    let bus = if args.memory_bus {
        let broker = MemoryBroker::new();
        let terminals = demo::spawn_terminals(&broker, &config, &cancel)
            .context("Failed to start demo terminals")?;
        if let Some(first) = terminals.into_iter().next() {
            tracing::info!("Operator input on stdin drives the first demo terminal");
            tokio::spawn(input::run_stdin(first.handle, first.switch, cancel.clone()));
        }
        BusClient::connect(broker.transport("ce-coordinator"), &config.bus, cancel.clone())
    } else {
        let client_id = config.bus.client_id_or("ce-coordinator");
        tracing::info!("Broker {}:{}", config.bus.host, config.bus.port);
        BusClient::connect(
            MqttTransport::new(&config.bus, client_id),
            &config.bus,
            cancel.clone(),
        )
    };

    let listener = BroadcastListener::new(IPC_EVENT_CAPACITY);
    let ipc_address = config.ipc_address();
    let coordinator = Coordinator::start(
        config,
        bus,
        Arc::new(MemoryRegistry::new()),
        Arc::new(listener.clone()),
        cancel.clone(),
    )
    .await
    .context("Failed to start coordinator")?;

    let server = IpcServer::bind(&ipc_address, coordinator, listener.sender()).await?;
    server.run(cancel).await?;

    tracing::info!("Coordinator shutdown complete");
    Ok(())
}
