//! Coordinator-side mirror of terminal presence
//!
//! Updated only from received presence and keepalive messages, plus the
//! staleness sweep that downgrades silent terminals to Unknown.

use std::time::Duration;

use dashmap::DashMap;
use tokio::time::Instant;

use ce_protocol::{FacultyId, Presence, PresenceSource, PresenceState, Timestamp};

#[derive(Debug, Clone, Copy)]
struct MirrorEntry {
    state: PresenceState,
    /// Origin of the last accepted report
    origin: Option<Timestamp>,
    last_heard: Option<Instant>,
}

impl Default for MirrorEntry {
    fn default() -> Self {
        Self {
            state: PresenceState::unknown(),
            origin: None,
            last_heard: None,
        }
    }
}

/// Last known presence per faculty member
#[derive(Debug, Default)]
pub struct PresenceMirror {
    entries: DashMap<FacultyId, MirrorEntry>,
}

impl PresenceMirror {
    pub fn new(faculty: impl IntoIterator<Item = FacultyId>) -> Self {
        let mirror = Self::default();
        for id in faculty {
            mirror.entries.insert(id, MirrorEntry::default());
        }
        mirror
    }

    /// Mirrored state; Unknown for faculty never heard from
    pub fn get(&self, faculty_id: FacultyId) -> PresenceState {
        self.entries
            .get(&faculty_id)
            .map(|e| e.state)
            .unwrap_or_default()
    }

    /// Apply a presence report; returns the new state if the presence value changed.
    ///
    /// A report older than the one already applied is ignored, but only when
    /// both came from synchronized clocks. Otherwise arrival order wins.
    pub fn apply_report(
        &self,
        faculty_id: FacultyId,
        state: PresenceState,
        origin: Timestamp,
    ) -> Option<PresenceState> {
        let mut entry = self.entries.entry(faculty_id).or_default();
        entry.last_heard = Some(Instant::now());

        if let Some(previous) = entry.origin {
            if origin.comparable_with(&previous) && state.as_of < entry.state.as_of {
                tracing::debug!(
                    faculty = %faculty_id,
                    "Ignoring out-of-order presence report ({} < {})",
                    state.as_of,
                    entry.state.as_of
                );
                return None;
            }
        }

        let changed = entry.state.presence != state.presence;
        entry.state = state;
        entry.origin = Some(origin);
        changed.then_some(state)
    }

    /// Record a keepalive; a stale-downgraded terminal becomes Available again
    pub fn keepalive(
        &self,
        faculty_id: FacultyId,
        as_of: u64,
        origin: Timestamp,
    ) -> Option<PresenceState> {
        let mut entry = self.entries.entry(faculty_id).or_default();
        entry.last_heard = Some(Instant::now());

        match entry.state.presence {
            Presence::Unknown => {
                entry.state = PresenceState {
                    presence: Presence::Available,
                    as_of: as_of.max(entry.state.as_of),
                    source: PresenceSource::Keepalive,
                };
                entry.origin = Some(origin);
                Some(entry.state)
            }
            Presence::Available => {
                entry.state.as_of = entry.state.as_of.max(as_of);
                None
            }
            Presence::Unavailable => {
                tracing::debug!(faculty = %faculty_id, "Keepalive from terminal reported unavailable");
                None
            }
        }
    }

    /// Downgrade every terminal silent for longer than `window` to Unknown
    pub fn expire_stale(&self, window: Duration) -> Vec<(FacultyId, PresenceState)> {
        let mut expired = Vec::new();
        for mut entry in self.entries.iter_mut() {
            let silent = entry
                .last_heard
                .map(|heard| heard.elapsed() > window)
                .unwrap_or(false);
            if silent && entry.state.presence != Presence::Unknown {
                entry.state.presence = Presence::Unknown;
                expired.push((*entry.key(), entry.state));
            }
        }
        expired
    }

    /// Every mirrored faculty member, ordered by id
    pub fn snapshot(&self) -> Vec<(FacultyId, PresenceState)> {
        let mut all: Vec<_> = self.entries.iter().map(|e| (*e.key(), e.state)).collect();
        all.sort_by_key(|(id, _)| *id);
        all
    }
}
