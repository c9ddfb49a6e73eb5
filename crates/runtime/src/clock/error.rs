use world_core::{ErrorSeverity, SimError};

/// Failures raised by [`Clock`](super::Clock) control and the scheduling barrier.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ClockError {
    #[error("clock is already running")]
    AlreadyRunning,

    /// The waiting task's cancel token fired while it was blocked on the barrier.
    #[error("interrupted while waiting for a tick")]
    Interrupted,

    #[error("clock has been shut down")]
    ShutDown,

    #[error("operation completed exceptionally: {reason}")]
    OperationFailed { reason: String },

    #[error("render listener is already set")]
    ListenerAlreadySet,

    #[error("no tokio runtime available to drive the clock")]
    NoRuntime,
}

impl SimError for ClockError {
    fn severity(&self) -> ErrorSeverity {
        match self {
            Self::Interrupted | Self::ShutDown => ErrorSeverity::Cancellation,
            Self::OperationFailed { .. } => ErrorSeverity::DomainRule,
            Self::AlreadyRunning | Self::ListenerAlreadySet | Self::NoRuntime => {
                ErrorSeverity::Precondition
            }
        }
    }

    fn error_code(&self) -> &'static str {
        match self {
            Self::AlreadyRunning => "CLOCK_ALREADY_RUNNING",
            Self::Interrupted => "CLOCK_INTERRUPTED",
            Self::ShutDown => "CLOCK_SHUT_DOWN",
            Self::OperationFailed { .. } => "CLOCK_OPERATION_FAILED",
            Self::ListenerAlreadySet => "CLOCK_LISTENER_ALREADY_SET",
            Self::NoRuntime => "CLOCK_NO_RUNTIME",
        }
    }
}
