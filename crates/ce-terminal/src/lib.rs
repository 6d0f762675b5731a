//! ce-terminal: per-faculty terminal for ConsultEase
//!
//! The terminal watches for its faculty member's proximity beacon, keeps a
//! best-effort synchronized clock, and surfaces consultation requests routed
//! to it by the coordinator, publishing the operator's decision back.

pub mod agent;
pub mod display;
pub mod input;
pub mod presence;
pub mod timesync;

pub use agent::{AgentStopped, OperatorAction, TerminalAgent, TerminalHandle};
pub use presence::{OverrideSwitch, PresenceDetector, PresenceEvent};
pub use timesync::{ClockHandle, TimeSyncManager};
