//! Presence detector with hysteresis and override mode

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::{interval, interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use ce_core::config::PresenceConfig;
use ce_protocol::{Presence, PresenceSource, PresenceState};

use super::scanner::BeaconScanner;
use crate::timesync::ClockHandle;

/// Emitted by the detector on presence transitions and override keepalives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenceEvent {
    Changed(PresenceState),
    Keepalive { as_of: u64 },
}

/// Consecutive-scan debouncing.
///
/// `enter` strong readings in a row make the state Available; `exit` weak
/// or missing readings in a row make it Unavailable. Unknown is left by
/// whichever run completes first.
#[derive(Debug, Clone)]
pub struct Hysteresis {
    threshold: i16,
    enter: u32,
    exit: u32,
    state: Presence,
    strong_run: u32,
    weak_run: u32,
}

impl Hysteresis {
    pub fn new(threshold: i16, enter: u32, exit: u32) -> Self {
        Self {
            threshold,
            enter: enter.max(1),
            exit: exit.max(1),
            state: Presence::Unknown,
            strong_run: 0,
            weak_run: 0,
        }
    }

    pub fn from_config(config: &PresenceConfig) -> Self {
        Self::new(config.rssi_threshold, config.enter_scans, config.exit_scans)
    }

    pub fn state(&self) -> Presence {
        self.state
    }

    /// Feed one scan result; returns the new state on a transition
    pub fn observe(&mut self, rssi: Option<i16>) -> Option<Presence> {
        let strong = matches!(rssi, Some(level) if level >= self.threshold);

        if strong {
            self.weak_run = 0;
            self.strong_run = self.strong_run.saturating_add(1);
            if self.state != Presence::Available && self.strong_run >= self.enter {
                self.state = Presence::Available;
                return Some(self.state);
            }
        } else {
            self.strong_run = 0;
            self.weak_run = self.weak_run.saturating_add(1);
            if self.state != Presence::Unavailable && self.weak_run >= self.exit {
                self.state = Presence::Unavailable;
                return Some(self.state);
            }
        }
        None
    }
}

/// Runtime toggle for "always available" mode
#[derive(Debug, Clone)]
pub struct OverrideSwitch {
    tx: Arc<watch::Sender<bool>>,
}

impl OverrideSwitch {
    pub fn set(&self, enabled: bool) {
        self.tx.send_if_modified(|current| {
            let changed = *current != enabled;
            *current = enabled;
            changed
        });
    }

    pub fn is_enabled(&self) -> bool {
        *self.tx.borrow()
    }
}

/// Scans for one beacon and reports presence transitions.
///
/// While override is on, scans continue (and keep the hysteresis current)
/// but the emitted state stays Available and a keepalive goes out every
/// `keepalive_interval`. Scans run in their own task so a slow scanner
/// never delays a keepalive.
pub struct PresenceDetector<S> {
    scanner: Option<S>,
    beacon: String,
    config: PresenceConfig,
    hysteresis: Hysteresis,
    clock: ClockHandle,
    events: mpsc::UnboundedSender<PresenceEvent>,
    override_tx: Arc<watch::Sender<bool>>,
    current: PresenceState,
}

impl<S: BeaconScanner> PresenceDetector<S> {
    pub fn new(
        scanner: S,
        beacon: impl Into<String>,
        config: PresenceConfig,
        clock: ClockHandle,
        events: mpsc::UnboundedSender<PresenceEvent>,
    ) -> Self {
        let (override_tx, _) = watch::channel(config.always_available);
        Self {
            scanner: Some(scanner),
            beacon: beacon.into(),
            hysteresis: Hysteresis::from_config(&config),
            config,
            clock,
            events,
            override_tx: Arc::new(override_tx),
            current: PresenceState::unknown(),
        }
    }

    pub fn override_switch(&self) -> OverrideSwitch {
        OverrideSwitch {
            tx: Arc::clone(&self.override_tx),
        }
    }

    pub fn current(&self) -> PresenceState {
        self.current
    }

    pub async fn run(mut self, cancel: CancellationToken) {
        let scan_cancel = cancel.child_token();
        let (reading_tx, mut readings) = mpsc::channel(4);
        if let Some(scanner) = self.scanner.take() {
            tokio::spawn(scan_loop(
                scanner,
                self.beacon.clone(),
                self.config.scan_interval,
                reading_tx,
                scan_cancel.clone(),
            ));
        }

        let keepalive_every = self.config.keepalive_interval;
        let mut keepalive_tick = interval_at(Instant::now() + keepalive_every, keepalive_every);
        keepalive_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut override_rx = self.override_tx.subscribe();
        let mut override_on = *override_rx.borrow_and_update();
        if override_on {
            self.enter_override();
        }

        tracing::info!(
            beacon = %self.beacon,
            override_on,
            "Presence detector started"
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,

                reading = readings.recv() => match reading {
                    Some(reading) => self.observe(reading, override_on),
                    None => break,
                },

                _ = keepalive_tick.tick() => {
                    if override_on {
                        let as_of = self.next_as_of();
                        self.current.as_of = as_of;
                        let _ = self.events.send(PresenceEvent::Keepalive { as_of });
                    }
                }

                changed = override_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let enabled = *override_rx.borrow_and_update();
                    if enabled == override_on {
                        continue;
                    }
                    override_on = enabled;
                    if enabled {
                        keepalive_tick.reset();
                        self.enter_override();
                    } else {
                        self.leave_override();
                    }
                }
            }
        }

        scan_cancel.cancel();
        tracing::debug!("Presence detector stopped");
    }

    fn observe(&mut self, reading: Option<i16>, override_on: bool) {
        if let Some(presence) = self.hysteresis.observe(reading) {
            if override_on {
                tracing::debug!("Beacon indicates {} (override active)", presence);
            } else {
                self.transition(presence, PresenceSource::Beacon);
            }
        }
    }

    fn enter_override(&mut self) {
        tracing::info!("Override enabled, presence locked to available");
        if self.current.presence != Presence::Available {
            self.transition(Presence::Available, PresenceSource::Override);
        } else {
            self.current.source = PresenceSource::Override;
        }
    }

    fn leave_override(&mut self) {
        let beacon_view = self.hysteresis.state();
        tracing::info!("Override disabled, beacon reports {}", beacon_view);
        if self.current.presence != beacon_view {
            self.transition(beacon_view, PresenceSource::Beacon);
        } else {
            self.current.source = PresenceSource::Beacon;
        }
    }

    fn transition(&mut self, presence: Presence, source: PresenceSource) {
        let as_of = self.next_as_of();
        let previous = self.current.presence;
        self.current = PresenceState {
            presence,
            as_of,
            source,
        };
        tracing::info!("Presence {} -> {}", previous, presence);
        let _ = self.events.send(PresenceEvent::Changed(self.current));
    }

    /// Strictly increasing, even if the corrected clock steps backwards
    fn next_as_of(&self) -> u64 {
        self.clock.now().millis.max(self.current.as_of + 1)
    }
}

/// Scan every `every`, one scan at a time, and hand readings to the detector
async fn scan_loop<S: BeaconScanner>(
    mut scanner: S,
    beacon: String,
    every: Duration,
    readings: mpsc::Sender<Option<i16>>,
    cancel: CancellationToken,
) {
    let mut tick = interval(every);
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tick.tick() => {}
        }
        let result = tokio::select! {
            _ = cancel.cancelled() => break,
            result = scanner.scan(&beacon) => result,
        };
        let reading = match result {
            Ok(reading) => reading,
            Err(e) => {
                tracing::warn!(error = %e, "Beacon scan failed, counting as absent");
                None
            }
        };
        tracing::trace!(rssi = ?reading, "Beacon scan");
        if readings.send(reading).await.is_err() {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::presence::ScriptedScanner;
    use crate::presence::ScanError;
    use async_trait::async_trait;
    use proptest::prelude::*;

    const THRESHOLD: i16 = -80;
    const STRONG: Option<i16> = Some(-60);
    const WEAK: Option<i16> = Some(-95);

    fn config(always_available: bool) -> PresenceConfig {
        PresenceConfig {
            scan_interval: Duration::from_secs(1),
            rssi_threshold: THRESHOLD,
            enter_scans: 2,
            exit_scans: 3,
            always_available,
            keepalive_interval: Duration::from_secs(10),
        }
    }

    fn spawn_detector<S: BeaconScanner>(
        scanner: S,
        always_available: bool,
    ) -> (
        OverrideSwitch,
        mpsc::UnboundedReceiver<PresenceEvent>,
        CancellationToken,
    ) {
        let (tx, rx) = mpsc::unbounded_channel();
        let detector = PresenceDetector::new(
            scanner,
            "AA:BB:CC:DD:EE:FF",
            config(always_available),
            ClockHandle::local(),
            tx,
        );
        let switch = detector.override_switch();
        let cancel = CancellationToken::new();
        tokio::spawn(detector.run(cancel.clone()));
        (switch, rx, cancel)
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<PresenceEvent>) -> Vec<PresenceEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    fn changes(events: &[PresenceEvent]) -> Vec<Presence> {
        events
            .iter()
            .filter_map(|e| match e {
                PresenceEvent::Changed(state) => Some(state.presence),
                PresenceEvent::Keepalive { .. } => None,
            })
            .collect()
    }

    #[test]
    fn test_enter_and_exit_counts() {
        let mut h = Hysteresis::new(THRESHOLD, 2, 3);
        assert_eq!(h.observe(STRONG), None);
        assert_eq!(h.observe(STRONG), Some(Presence::Available));
        assert_eq!(h.observe(STRONG), None);
        assert_eq!(h.observe(None), None);
        assert_eq!(h.observe(WEAK), None);
        assert_eq!(h.observe(None), Some(Presence::Unavailable));
        assert_eq!(h.observe(None), None);
    }

    #[test]
    fn test_threshold_is_inclusive() {
        let mut h = Hysteresis::new(THRESHOLD, 1, 1);
        assert_eq!(h.observe(Some(THRESHOLD)), Some(Presence::Available));
        assert_eq!(h.observe(Some(THRESHOLD - 1)), Some(Presence::Unavailable));
    }

    #[test]
    fn test_unknown_leaves_after_absent_run() {
        let mut h = Hysteresis::new(THRESHOLD, 2, 3);
        assert_eq!(h.observe(None), None);
        assert_eq!(h.observe(None), None);
        assert_eq!(h.observe(None), Some(Presence::Unavailable));
    }

    proptest! {
        #[test]
        fn prop_single_outlier_never_flips(
            enter in 2u32..6,
            exit in 2u32..6,
            before in 0usize..6,
            after in 0usize..6,
        ) {
            // Settle into Available, then inject one weak reading inside a strong run
            let mut h = Hysteresis::new(THRESHOLD, enter, exit);
            for _ in 0..enter {
                h.observe(STRONG);
            }
            prop_assert_eq!(h.state(), Presence::Available);

            for _ in 0..before {
                prop_assert_eq!(h.observe(STRONG), None);
            }
            prop_assert_eq!(h.observe(WEAK), None);
            for _ in 0..after {
                prop_assert_eq!(h.observe(STRONG), None);
            }
            prop_assert_eq!(h.state(), Presence::Available);
        }

        #[test]
        fn prop_single_strong_reading_never_enters(
            enter in 2u32..6,
            exit in 1u32..6,
            run in 0usize..6,
        ) {
            // One strong reading inside an absent run of length < enter + 1
            let mut h = Hysteresis::new(THRESHOLD, enter, exit);
            for _ in 0..exit {
                h.observe(None);
            }
            prop_assert_eq!(h.state(), Presence::Unavailable);

            prop_assert_eq!(h.observe(STRONG), None);
            for _ in 0..run {
                prop_assert_eq!(h.observe(None), None);
            }
            prop_assert_eq!(h.state(), Presence::Unavailable);
        }

        #[test]
        fn prop_transitions_need_full_runs(readings in prop::collection::vec(prop::option::of(-100i16..-40), 0..64)) {
            let mut h = Hysteresis::new(THRESHOLD, 2, 3);
            let mut strong_run = 0u32;
            let mut weak_run = 0u32;
            for reading in readings {
                let strong = matches!(reading, Some(level) if level >= THRESHOLD);
                if strong { strong_run += 1; weak_run = 0; } else { weak_run += 1; strong_run = 0; }
                match h.observe(reading) {
                    Some(Presence::Available) => prop_assert!(strong_run >= 2),
                    Some(Presence::Unavailable) => prop_assert!(weak_run >= 3),
                    Some(Presence::Unknown) => prop_assert!(false, "never transitions to unknown"),
                    None => {}
                }
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_detector_emits_only_on_transitions() {
        let scanner = ScriptedScanner::new([STRONG, STRONG, STRONG, STRONG]);
        scanner.extend([None, None, None, None]);
        let (_switch, mut rx, cancel) = spawn_detector(scanner, false);

        tokio::time::sleep(Duration::from_millis(8_500)).await;
        let events = drain(&mut rx);
        assert_eq!(
            changes(&events),
            vec![Presence::Available, Presence::Unavailable]
        );
        assert!(events
            .iter()
            .all(|e| !matches!(e, PresenceEvent::Keepalive { .. })));
        cancel.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_override_locks_available_and_sends_keepalives() {
        let scanner = ScriptedScanner::new([]);
        scanner.set(WEAK);
        let (_switch, mut rx, cancel) = spawn_detector(scanner, true);

        tokio::time::sleep(Duration::from_millis(35_500)).await;
        let events = drain(&mut rx);

        assert_eq!(changes(&events), vec![Presence::Available]);
        match events[0] {
            PresenceEvent::Changed(state) => assert_eq!(state.source, PresenceSource::Override),
            other => panic!("unexpected first event {:?}", other),
        }
        let keepalives: Vec<u64> = events
            .iter()
            .filter_map(|e| match e {
                PresenceEvent::Keepalive { as_of } => Some(*as_of),
                _ => None,
            })
            .collect();
        assert_eq!(keepalives.len(), 3);
        assert!(keepalives.windows(2).all(|w| w[0] < w[1]));
        cancel.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_override_toggle_at_runtime() {
        let scanner = ScriptedScanner::new([]);
        scanner.set(None);
        let (switch, mut rx, cancel) = spawn_detector(scanner, false);

        tokio::time::sleep(Duration::from_millis(3_500)).await;
        assert_eq!(changes(&drain(&mut rx)), vec![Presence::Unavailable]);

        switch.set(true);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(changes(&drain(&mut rx)), vec![Presence::Available]);

        switch.set(false);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(changes(&drain(&mut rx)), vec![Presence::Unavailable]);
        assert!(!switch.is_enabled());
        cancel.cancel();
    }

    /// Takes four seconds per scan and always sees a strong beacon
    struct SlowScanner {
        scans: Arc<std::sync::atomic::AtomicU32>,
    }

    #[async_trait]
    impl BeaconScanner for SlowScanner {
        async fn scan(&mut self, _beacon: &str) -> Result<Option<i16>, ScanError> {
            tokio::time::sleep(Duration::from_secs(4)).await;
            self.scans.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Ok(STRONG)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_scans_do_not_delay_keepalives() {
        let scans = Arc::new(std::sync::atomic::AtomicU32::new(0));
        let scanner = SlowScanner {
            scans: Arc::clone(&scans),
        };
        let (_switch, mut rx, cancel) = spawn_detector(scanner, true);

        tokio::time::sleep(Duration::from_millis(60_500)).await;
        let events = drain(&mut rx);
        let keepalives = events
            .iter()
            .filter(|e| matches!(e, PresenceEvent::Keepalive { .. }))
            .count();

        assert!(keepalives >= 6, "only {} keepalives in 60s", keepalives);
        assert!(scans.load(std::sync::atomic::Ordering::SeqCst) >= 10);
        cancel.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_scans_still_drive_transitions() {
        let scanner = SlowScanner {
            scans: Arc::new(std::sync::atomic::AtomicU32::new(0)),
        };
        let (_switch, mut rx, cancel) = spawn_detector(scanner, false);

        tokio::time::sleep(Duration::from_millis(8_500)).await;
        assert_eq!(changes(&drain(&mut rx)), vec![Presence::Available]);
        cancel.cancel();
    }
}
