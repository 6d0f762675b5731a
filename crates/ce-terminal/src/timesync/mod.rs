//! Best-effort clock synchronization

mod manager;
mod sntp;

pub use manager::{ClockHandle, ClockState, TimeSyncManager};
pub use sntp::{SntpClient, TimeSource};
