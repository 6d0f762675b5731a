//! ConsultEase terminal daemon
//!
//! Runs on a faculty member's desk unit: detects their beacon, keeps the
//! clock in sync, and shows consultation requests routed by the coordinator.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ce_core::bus::{BusClient, MqttTransport};
use ce_core::config::{self, ScannerConfig, TerminalConfig};
use ce_terminal::display::LogDisplay;
use ce_terminal::presence::{BeaconScanner, CommandScanner, NullScanner, PresenceDetector};
use ce_terminal::timesync::{SntpClient, TimeSyncManager};
use ce_terminal::{input, OverrideSwitch, PresenceEvent, TerminalAgent};

#[derive(Parser)]
#[command(name = "ce-terminal")]
#[command(about = "ConsultEase faculty terminal")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// MQTT broker address (host or host:port)
    #[arg(short, long, env = "CONSULTEASE_BROKER")]
    broker: Option<String>,

    /// Report the faculty member as always available
    #[arg(long)]
    always_available: bool,

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

    tracing::info!("ConsultEase terminal starting...");

    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| config::default_config_path("terminal"));
    let mut config: TerminalConfig = config::load_config(&config_path)
        .with_context(|| format!("Failed to load config from {:?}", config_path))?;

    if let Some(broker) = args.broker {
        config.bus.set_broker(&broker)?;
    }
    if args.always_available {
        config.presence.always_available = true;
    }
    if let Err(e) = config.validate() {
        tracing::error!("Invalid configuration: {}", e);
        return Err(e).context("Invalid terminal configuration");
    }

    let identity = config.identity()?.clone();
    tracing::info!(
        "Faculty {} ({}), broker {}:{}",
        identity.name,
        identity.id,
        config.bus.host,
        config.bus.port
    );

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Shutting down...");
            shutdown.cancel();
        }
    });

    let client_id = config
        .bus
        .client_id_or(&format!("ce-terminal-{}", identity.id.as_u32()));
    let bus = BusClient::connect(
        MqttTransport::new(&config.bus, client_id),
        &config.bus,
        cancel.clone(),
    );

    let time_sync = TimeSyncManager::new(SntpClient::new(), config.time_sync.clone());
    let clock = time_sync.clock();
    tokio::spawn(time_sync.run(cancel.clone()));

    let (presence_tx, presence_rx) = mpsc::unbounded_channel();
    let switch = match &config.scanner {
        ScannerConfig::None => spawn_detector(
            NullScanner,
            &config,
            &identity.beacon_address,
            clock.clone(),
            presence_tx,
            &cancel,
        ),
        ScannerConfig::Command {
            program,
            args,
            timeout,
        } => spawn_detector(
            CommandScanner::new(program.clone(), args.clone(), *timeout),
            &config,
            &identity.beacon_address,
            clock.clone(),
            presence_tx,
            &cancel,
        ),
    };

    let (agent, handle) = TerminalAgent::new(&config, bus, clock, LogDisplay::new(), presence_rx)
        .context("Failed to create terminal agent")?;
    tokio::spawn(input::run_stdin(handle, switch, cancel.clone()));

    agent.run(cancel).await.context("Terminal agent failed")?;
    Ok(())
}

fn spawn_detector<S: BeaconScanner>(
    scanner: S,
    config: &TerminalConfig,
    beacon: &str,
    clock: ce_terminal::ClockHandle,
    events: mpsc::UnboundedSender<PresenceEvent>,
    cancel: &CancellationToken,
) -> OverrideSwitch {
    let detector = PresenceDetector::new(scanner, beacon, config.presence.clone(), clock, events);
    let switch = detector.override_switch();
    tokio::spawn(detector.run(cancel.clone()));
    switch
}
