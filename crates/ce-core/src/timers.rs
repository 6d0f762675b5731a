//! Per-request timeout timers

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use ce_protocol::RequestId;

struct ArmedTimer {
    generation: u64,
    cancel: CancellationToken,
}

/// At most one running timer per request.
///
/// A fired timer only reports the request id on the supplied channel; the
/// owner decides what the expiry means. Disarming is best-effort: a timer
/// that already fired may still deliver, so the owner must treat expiry of
/// a resolved request as a no-op.
#[derive(Clone, Default)]
pub struct PendingTimers {
    armed: Arc<DashMap<RequestId, ArmedTimer>>,
    generation: Arc<AtomicU64>,
}

impl PendingTimers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start (or restart) the timer for `id`
    pub fn arm(&self, id: RequestId, after: Duration, fired: mpsc::UnboundedSender<RequestId>) {
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        let cancel = CancellationToken::new();
        if let Some(previous) = self.armed.insert(
            id,
            ArmedTimer {
                generation,
                cancel: cancel.clone(),
            },
        ) {
            previous.cancel.cancel();
        }

        let armed = Arc::clone(&self.armed);
        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = tokio::time::sleep(after) => {
                    armed.remove_if(&id, |_, timer| timer.generation == generation);
                    let _ = fired.send(id);
                }
            }
        });
    }

    /// Stop the timer for `id`; returns whether one was running
    pub fn disarm(&self, id: &RequestId) -> bool {
        match self.armed.remove(id) {
            Some((_, timer)) => {
                timer.cancel.cancel();
                true
            }
            None => false,
        }
    }

    pub fn is_armed(&self, id: &RequestId) -> bool {
        self.armed.contains_key(id)
    }

    /// Stop every timer
    pub fn disarm_all(&self) {
        self.armed.retain(|_, timer| {
            timer.cancel.cancel();
            false
        });
    }

    pub fn len(&self) -> usize {
        self.armed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.armed.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_fires_once_after_deadline() {
        let timers = PendingTimers::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let id = RequestId::generate();

        timers.arm(id, Duration::from_secs(60), tx);
        tokio::time::sleep(Duration::from_secs(59)).await;
        assert!(rx.try_recv().is_err());

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(rx.try_recv().unwrap(), id);
        assert!(!timers.is_armed(&id));
    }

    #[tokio::test(start_paused = true)]
    async fn test_disarm_prevents_firing() {
        let timers = PendingTimers::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let id = RequestId::generate();

        timers.arm(id, Duration::from_secs(10), tx);
        assert!(timers.disarm(&id));
        assert!(!timers.disarm(&id));

        tokio::time::sleep(Duration::from_secs(20)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_rearm_replaces_previous_timer() {
        let timers = PendingTimers::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let id = RequestId::generate();

        timers.arm(id, Duration::from_secs(10), tx.clone());
        timers.arm(id, Duration::from_secs(30), tx);
        assert_eq!(timers.len(), 1);

        tokio::time::sleep(Duration::from_secs(15)).await;
        assert!(rx.try_recv().is_err());
        tokio::time::sleep(Duration::from_secs(20)).await;
        assert_eq!(rx.try_recv().unwrap(), id);
        assert!(rx.try_recv().is_err());
    }
}
