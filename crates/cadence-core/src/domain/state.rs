//! Worker loop state machine.

use serde::{Deserialize, Serialize};

/// State of one worker loop.
///
/// State transitions:
/// - Idle -> Claiming (after the idle sleep)
/// - Claiming -> Idle (no candidate, claim lost, provider error)
/// - Claiming -> Handling (entity claimed)
/// - Handling -> Idle (handler returned, failed or panicked)
///
/// There is no terminal state; the loop runs until its pump is stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LoopState {
    Idle,
    Claiming,
    Handling,
}

/// Why a worker is idle. Decides how long the idle sleep lasts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IdleReason {
    /// First poll after the pump started.
    Started,

    /// Nothing due (includes a claim lost to another claimant).
    NoCandidate,

    /// Just finished an entity; more may be due.
    Handled,

    /// The provider failed; back off.
    ProviderUnavailable,

    /// All in-flight permits are taken.
    Throttled,
}

impl IdleReason {
    /// Whether the next poll should wait a full poll interval.
    pub fn waits_full_interval(self) -> bool {
        matches!(self, IdleReason::NoCandidate | IdleReason::Throttled)
    }
}
