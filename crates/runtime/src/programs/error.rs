use world_core::{ErrorSeverity, SimError};

use crate::actor::ActionError;
use crate::clock::ClockError;

/// Error returned by a program body.
///
/// Cancellation (an interrupted primitive, or [`ProgramError::Interrupted`])
/// ends the program as Killed without being reported as a failure.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ProgramError {
    #[error("program interrupted")]
    Interrupted,

    #[error(transparent)]
    Action(#[from] ActionError),

    #[error("program failed: {0}")]
    Failed(String),
}

impl ProgramError {
    pub fn failed(reason: impl Into<String>) -> Self {
        Self::Failed(reason.into())
    }

    pub fn is_cancellation(&self) -> bool {
        self.severity().is_cancellation()
    }
}

impl From<ClockError> for ProgramError {
    fn from(err: ClockError) -> Self {
        Self::Action(ActionError::Clock(err))
    }
}

impl SimError for ProgramError {
    fn severity(&self) -> ErrorSeverity {
        match self {
            Self::Interrupted => ErrorSeverity::Cancellation,
            Self::Action(err) => err.severity(),
            Self::Failed(_) => ErrorSeverity::Defect,
        }
    }

    fn error_code(&self) -> &'static str {
        match self {
            Self::Interrupted => "PROGRAM_INTERRUPTED",
            Self::Action(err) => err.error_code(),
            Self::Failed(_) => "PROGRAM_FAILED",
        }
    }
}

/// Why a program cannot be started right now.
#[derive(Clone, Copy, Debug, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum CannotRunReason {
    /// The single-instance program is already running.
    AlreadyRunning,
    /// The entity already has a program that has not finished.
    EntityBusy,
    /// The program does not accept this entity.
    RejectedEntity,
}

/// Failures of [`ProgramRunner::run`](super::ProgramRunner::run).
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum RunError {
    #[error("no such program: {name}")]
    NoSuchProgram { name: String },

    #[error("cannot run {name}: {reason}")]
    CannotRun { name: String, reason: CannotRunReason },

    #[error("no tokio runtime available to run programs")]
    NoRuntime,
}

impl SimError for RunError {
    fn severity(&self) -> ErrorSeverity {
        match self {
            Self::NoSuchProgram { .. } | Self::NoRuntime => ErrorSeverity::Precondition,
            Self::CannotRun { .. } => ErrorSeverity::DomainRule,
        }
    }

    fn error_code(&self) -> &'static str {
        match self {
            Self::NoSuchProgram { .. } => "RUN_NO_SUCH_PROGRAM",
            Self::CannotRun { .. } => "RUN_CANNOT_RUN",
            Self::NoRuntime => "RUN_NO_RUNTIME",
        }
    }
}

/// Failures of [`ProgramRegistry`](super::ProgramRegistry) registration.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("program name already used: {name}")]
    NameInUse { name: String },
}

impl SimError for RegistryError {
    fn severity(&self) -> ErrorSeverity {
        ErrorSeverity::Precondition
    }

    fn error_code(&self) -> &'static str {
        "REGISTRY_NAME_IN_USE"
    }
}
