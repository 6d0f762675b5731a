//! Single-host demo
//!
//! Runs one in-process terminal per configured faculty member on the same
//! memory broker as the coordinator. Terminals report themselves as always
//! available and log what they would show.

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use ce_core::bus::{BusClient, MemoryBroker};
use ce_core::config::{CoordinatorConfig, TerminalConfig};
use ce_core::error::ConfigError;
use ce_terminal::display::LogDisplay;
use ce_terminal::presence::NullScanner;
use ce_terminal::{ClockHandle, OverrideSwitch, PresenceDetector, TerminalAgent, TerminalHandle};

/// A running demo terminal
pub struct DemoTerminal {
    pub handle: TerminalHandle,
    pub switch: OverrideSwitch,
}

/// Terminal configuration mirroring the coordinator's view of `faculty`
fn terminal_config(config: &CoordinatorConfig, index: usize) -> TerminalConfig {
    let mut terminal = TerminalConfig {
        faculty: config.faculty.get(index).cloned(),
        bus: config.bus.clone(),
        request_timeout: config.request_timeout,
        ..TerminalConfig::default()
    };
    terminal.presence.always_available = true;
    terminal.presence.keepalive_interval = config.keepalive_interval;
    terminal
}

/// Start a terminal for every faculty member in `config`
pub fn spawn_terminals(
    broker: &MemoryBroker,
    config: &CoordinatorConfig,
    cancel: &CancellationToken,
) -> Result<Vec<DemoTerminal>, ConfigError> {
    let mut terminals = Vec::with_capacity(config.faculty.len());

    for (index, identity) in config.faculty.iter().enumerate() {
        let terminal_config = terminal_config(config, index);
        terminal_config.validate()?;

        let client_id = format!("ce-terminal-{}", identity.id.as_u32());
        let bus = BusClient::connect(broker.transport(client_id), &terminal_config.bus, cancel.clone());
        let clock = ClockHandle::local();

        let (presence_tx, presence_rx) = mpsc::unbounded_channel();
        let detector = PresenceDetector::new(
            NullScanner,
            &identity.beacon_address,
            terminal_config.presence.clone(),
            clock.clone(),
            presence_tx,
        );
        let switch = detector.override_switch();
        tokio::spawn(detector.run(cancel.clone()));

        let (agent, handle) =
            TerminalAgent::new(&terminal_config, bus, clock, LogDisplay::new(), presence_rx)?;
        let agent_cancel = cancel.clone();
        let faculty_id = identity.id;
        tokio::spawn(async move {
            if let Err(e) = agent.run(agent_cancel).await {
                tracing::error!(faculty = %faculty_id, "Demo terminal stopped: {}", e);
            }
        });

        tracing::info!(faculty = %identity.id, "Demo terminal for {} started", identity.name);
        terminals.push(DemoTerminal { handle, switch });
    }

    Ok(terminals)
}
