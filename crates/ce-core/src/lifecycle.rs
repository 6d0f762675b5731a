//! Consultation request lifecycle
//!
//! ```text
//! Created ──route──▶ Pending ──accept──▶ Accepted
//!                       │ ├──decline──▶ Declined
//!                       │ ├──timeout──▶ TimedOut
//!                       │ └──cancel───▶ Cancelled
//! ```
//!
//! Terminal statuses are absorbing. Re-entering the status a request already
//! holds is reported as [`TransitionOutcome::Duplicate`] so callers can drop
//! redelivered events without side effects; every other move out of a
//! terminal status is an [`InvalidTransition`].

use ce_protocol::{ConsultationRequest, RequestId, RequestStatus};

use crate::error::InvalidTransition;

/// Result of an accepted transition check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionOutcome {
    /// The status changed
    Applied {
        from: RequestStatus,
        to: RequestStatus,
    },
    /// The request already held this terminal status
    Duplicate(RequestStatus),
}

impl TransitionOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, TransitionOutcome::Applied { .. })
    }
}

/// Decide whether `id` may move from `from` to `to`
pub fn check_transition(
    id: RequestId,
    from: RequestStatus,
    to: RequestStatus,
) -> Result<TransitionOutcome, InvalidTransition> {
    use RequestStatus::*;

    if from.is_terminal() {
        return if from == to {
            Ok(TransitionOutcome::Duplicate(to))
        } else {
            Err(InvalidTransition::AlreadyTerminal {
                id,
                current: from,
                attempted: to,
            })
        };
    }

    match (from, to) {
        (Created, Pending) | (Pending, Accepted | Declined | TimedOut | Cancelled) => {
            Ok(TransitionOutcome::Applied { from, to })
        }
        _ => Err(InvalidTransition::NotAllowed { id, from, to }),
    }
}

/// Apply a transition to `request` in place.
///
/// On entering a terminal status, `resolved_at` is stamped with `at_millis`
/// and `response_message` (if any) is kept. A duplicate leaves the request
/// untouched.
pub fn apply(
    request: &mut ConsultationRequest,
    to: RequestStatus,
    at_millis: u64,
    response_message: Option<String>,
) -> Result<TransitionOutcome, InvalidTransition> {
    let outcome = check_transition(request.id, request.status, to)?;
    if outcome.is_applied() {
        request.status = to;
        if to.is_terminal() {
            request.resolved_at = Some(at_millis);
            if response_message.is_some() {
                request.response_message = response_message;
            }
        }
    }
    Ok(outcome)
}
