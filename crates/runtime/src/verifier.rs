//! Task verification.
//!
//! A verifier reads the action log and the playfield through shared
//! references and decides whether the task has been solved. Both stores are
//! internally synchronized, so a verifier may run while programs are active.

use std::fmt;

use serde::Serialize;
use world_core::{ActionLog, Playfield};

/// Verdict of a [`TaskVerifier`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub enum VerificationStatus {
    /// Not enough has happened yet to decide.
    Undecided,
    Successful,
    Failed(String),
}

impl VerificationStatus {
    pub fn failed(reason: impl Into<String>) -> Self {
        Self::Failed(reason.into())
    }
}

impl fmt::Display for VerificationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Undecided => write!(f, "undecided"),
            Self::Successful => write!(f, "successful"),
            Self::Failed(reason) => write!(f, "failed: {reason}"),
        }
    }
}

/// Decides pass/fail from the recorded history and the current world.
pub trait TaskVerifier: Send + Sync {
    fn verify(&self, log: &ActionLog, playfield: &Playfield) -> VerificationStatus;
}

impl<F> TaskVerifier for F
where
    F: Fn(&ActionLog, &Playfield) -> VerificationStatus + Send + Sync,
{
    fn verify(&self, log: &ActionLog, playfield: &Playfield) -> VerificationStatus {
        self(log, playfield)
    }
}
