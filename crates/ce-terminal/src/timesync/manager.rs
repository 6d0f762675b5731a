//! Time sync manager and the clock handle it feeds

use std::time::Duration;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use ce_core::config::TimeSyncConfig;
use ce_core::error::SyncFailure;
use ce_core::time::{apply_offset, current_time_millis};
use ce_protocol::{ClockConfidence, Timestamp};

use super::sntp::TimeSource;

/// Current knowledge about the local clock
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClockState {
    /// Milliseconds to add to the local clock. Kept from the last
    /// successful sync while in fallback.
    pub offset_ms: i64,
    pub confidence: ClockConfidence,
    /// Corrected time of the last successful sync (Unix millis)
    pub last_sync: Option<u64>,
    /// Consecutive failed sync rounds since the last success or long wait
    pub retries: u32,
}

impl Default for ClockState {
    fn default() -> Self {
        Self {
            offset_ms: 0,
            confidence: ClockConfidence::Fallback,
            last_sync: None,
            retries: 0,
        }
    }
}

/// Read side of the synchronized clock
#[derive(Debug, Clone)]
pub struct ClockHandle {
    state: watch::Receiver<ClockState>,
}

impl ClockHandle {
    /// A free-running local clock that never syncs
    pub fn local() -> Self {
        let (_, state) = watch::channel(ClockState::default());
        Self { state }
    }

    /// Current corrected time, tagged with its confidence
    pub fn now(&self) -> Timestamp {
        let state = *self.state.borrow();
        let millis = apply_offset(current_time_millis(), state.offset_ms);
        match state.confidence {
            ClockConfidence::Synced => Timestamp::synced(millis),
            ClockConfidence::Fallback => Timestamp::unsynced(millis),
        }
    }

    pub fn state(&self) -> ClockState {
        *self.state.borrow()
    }
}

/// Periodically measures the clock offset against an ordered server list
pub struct TimeSyncManager<S> {
    source: S,
    config: TimeSyncConfig,
    state_tx: watch::Sender<ClockState>,
    state_rx: watch::Receiver<ClockState>,
}

impl<S: TimeSource> TimeSyncManager<S> {
    pub fn new(source: S, config: TimeSyncConfig) -> Self {
        let (state_tx, state_rx) = watch::channel(ClockState::default());
        Self {
            source,
            config,
            state_tx,
            state_rx,
        }
    }

    pub fn clock(&self) -> ClockHandle {
        ClockHandle {
            state: self.state_rx.clone(),
        }
    }

    pub fn state(&self) -> ClockState {
        *self.state_rx.borrow()
    }

    /// Try every server once, in order; returns the delay until the next round.
    ///
    /// Success resets the retry counter and waits `sync_interval`. A failed
    /// round drops to fallback and retries after `retry_interval`, up to
    /// `max_retries` times in a row, after which the counter resets and the
    /// manager waits the full `sync_interval`.
    pub async fn sync_once(&self) -> Duration {
        for server in &self.config.servers {
            match self.source.offset(server, self.config.timeout).await {
                Ok(offset) => {
                    let synced_at = apply_offset(current_time_millis(), offset);
                    self.state_tx.send_modify(|state| {
                        state.offset_ms = offset;
                        state.confidence = ClockConfidence::Synced;
                        state.last_sync = Some(synced_at);
                        state.retries = 0;
                    });
                    tracing::info!(server = %server, offset_ms = offset, "Clock synchronized");
                    return self.config.sync_interval;
                }
                Err(e) => {
                    tracing::debug!(error = %e, "Time server failed");
                }
            }
        }

        let failure = SyncFailure::AllServersFailed {
            attempted: self.config.servers.len(),
        };
        let max_retries = self.config.max_retries;
        let mut next = self.config.retry_interval;
        self.state_tx.send_modify(|state| {
            state.confidence = ClockConfidence::Fallback;
            state.retries += 1;
            if state.retries > max_retries {
                state.retries = 0;
                next = self.config.sync_interval;
            }
        });

        tracing::warn!(
            error = %failure,
            "Clock running unsynchronized, next attempt in {:?}",
            next
        );
        next
    }

    /// Sync until cancelled
    pub async fn run(self, cancel: CancellationToken) {
        loop {
            let next = self.sync_once().await;
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(next) => {}
            }
        }
    }
}
