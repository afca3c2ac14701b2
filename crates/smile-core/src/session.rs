use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::status::RecognitionStatus;

/// What observing a status did to the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Observation {
    /// The state changed.
    Transition {
        from: RecognitionStatus,
        to: RecognitionStatus,
    },
    /// Same state re-published; nothing to do.
    Heartbeat(RecognitionStatus),
    /// The session already resolved; the status is dropped.
    Ignored(RecognitionStatus),
}

impl Observation {
    /// The status that became current, if this observation changed anything.
    pub fn entered(&self) -> Option<RecognitionStatus> {
        match self {
            Observation::Transition { to, .. } => Some(*to),
            _ => None,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("illegal recognition transition {from} -> {to}")]
pub struct InvalidTransition {
    pub from: RecognitionStatus,
    pub to: RecognitionStatus,
}

/// State of one recognition attempt.
///
/// The recognizer drives it forward with [`advance`](Self::advance); the logon
/// side keeps a mirror and feeds it whatever arrives over the status channel
/// with [`observe`](Self::observe). Terminal states are absorbing: nothing is
/// acted upon after one until [`reset`](Self::reset).
#[derive(Debug, Clone)]
pub struct RecognitionSession {
    state: RecognitionStatus,
    started_at: DateTime<Utc>,
    cancel_requested: bool,
}

impl Default for RecognitionSession {
    fn default() -> Self {
        Self::new()
    }
}

impl RecognitionSession {
    pub fn new() -> Self {
        Self {
            state: RecognitionStatus::Idle,
            started_at: Utc::now(),
            cancel_requested: false,
        }
    }

    /// Start a fresh attempt.
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    pub fn state(&self) -> RecognitionStatus {
        self.state
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn is_resolved(&self) -> bool {
        self.state.is_terminal()
    }

    pub fn request_cancel(&mut self) {
        self.cancel_requested = true;
    }

    pub fn cancel_requested(&self) -> bool {
        self.cancel_requested
    }

    /// Record a status received from the producer.
    ///
    /// Lenient about ordering (a lossy transport may skip intermediate
    /// states) but strict about terminal states.
    pub fn observe(&mut self, status: RecognitionStatus) -> Observation {
        if self.state.is_terminal() {
            return Observation::Ignored(status);
        }
        if self.state == status {
            return Observation::Heartbeat(status);
        }
        let from = self.state;
        self.state = status;
        Observation::Transition { from, to: status }
    }

    /// Move the producer-side state machine forward.
    ///
    /// Re-entering the current state is a heartbeat. Anything after a
    /// terminal state, and backwards moves to `Idle`, are rejected.
    pub fn advance(&mut self, next: RecognitionStatus) -> Result<Observation, InvalidTransition> {
        use RecognitionStatus::*;

        let from = self.state;
        let legal = match (from, next) {
            (f, _) if f.is_terminal() => false,
            (f, n) if f == n => return Ok(Observation::Heartbeat(n)),
            (_, n) if n.is_terminal() => true,
            (Idle, Recognizing) => true,
            (Recognizing, FaceDetected) => true,
            (FaceDetected, Recognizing) => true,
            _ => false,
        };
        if !legal {
            return Err(InvalidTransition { from, to: next });
        }
        self.state = next;
        Ok(Observation::Transition { from, to: next })
    }
}
