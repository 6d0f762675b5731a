//! Beacon-based presence detection

mod detector;
mod scanner;

pub use detector::{Hysteresis, OverrideSwitch, PresenceDetector, PresenceEvent};
pub use scanner::{BeaconScanner, CommandScanner, NullScanner, ScanError, ScriptedScanner};
