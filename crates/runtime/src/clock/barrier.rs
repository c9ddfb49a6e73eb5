//! The scheduling barrier.
//!
//! A caller that wants to mutate the world at tick `N` registers a
//! [`ScheduledOperation`] listener and suspends. When the clock reaches `N`
//! the listener releases the caller through the start signal and then holds
//! the clock's timer task until the caller resolves its [`OperationHandle`].
//! Listeners run one at a time in registration order, so operations for the
//! same tick complete in the order they were scheduled.

use async_trait::async_trait;
use tokio::sync::{oneshot, watch};
use tracing::{debug, warn};
use world_core::Tick;

use super::error::ClockError;
use super::listener::TickListener;

type Outcome = Result<(), String>;

/// Creates a linked completion pair for one scheduled operation.
///
/// The caller keeps the [`OperationHandle`] and passes the [`Completion`] to
/// [`Clock::schedule_operation_at_tick`](super::Clock::schedule_operation_at_tick).
pub fn operation() -> (OperationHandle, Completion) {
    let (tx, rx) = oneshot::channel();
    (OperationHandle { tx }, Completion { rx })
}

/// Caller side of a scheduled operation. The clock stays at the target tick
/// until this is resolved or dropped.
#[derive(Debug)]
pub struct OperationHandle {
    tx: oneshot::Sender<Outcome>,
}

impl OperationHandle {
    /// Releases the clock after a successful mutation.
    pub fn complete(self) {
        let _ = self.tx.send(Ok(()));
    }

    /// Releases the clock and records that the mutation failed.
    pub fn fail(self, reason: impl Into<String>) {
        let _ = self.tx.send(Err(reason.into()));
    }
}

/// Clock side of a scheduled operation.
#[derive(Debug)]
pub struct Completion {
    rx: oneshot::Receiver<Outcome>,
}

pub(crate) type StartSignal = oneshot::Sender<Result<(), ClockError>>;

/// Listener that opens the barrier for one caller at its target tick.
pub(crate) struct ScheduledOperation {
    target: Tick,
    start: Option<StartSignal>,
    completion: Option<Completion>,
    shutdown: watch::Receiver<bool>,
}

impl ScheduledOperation {
    pub(crate) fn new(
        target: Tick,
        start: StartSignal,
        completion: Completion,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            target,
            start: Some(start),
            completion: Some(completion),
            shutdown,
        }
    }
}

#[async_trait]
impl TickListener for ScheduledOperation {
    async fn on_tick(&mut self, tick: Tick) -> bool {
        if tick < self.target {
            return true;
        }
        let (Some(start), Some(mut completion)) = (self.start.take(), self.completion.take())
        else {
            return false;
        };

        match completion.rx.try_recv() {
            Ok(Ok(())) => {
                let _ = start.send(Ok(()));
                return false;
            }
            Ok(Err(reason)) => {
                let _ = start.send(Err(ClockError::OperationFailed { reason }));
                return false;
            }
            Err(oneshot::error::TryRecvError::Closed) => {
                let _ = start.send(Err(ClockError::OperationFailed {
                    reason: "operation handle dropped before its tick".to_string(),
                }));
                return false;
            }
            Err(oneshot::error::TryRecvError::Empty) => {}
        }

        if start.send(Ok(())).is_err() {
            // Caller stopped waiting; nobody will complete this operation.
            debug!(target: "runtime::clock", %tick, "scheduled operation abandoned by caller");
            return false;
        }

        tokio::select! {
            outcome = &mut completion.rx => match outcome {
                Ok(Ok(())) => {}
                Ok(Err(reason)) => {
                    warn!(target: "runtime::clock", %tick, %reason, "operation completed exceptionally");
                }
                Err(_) => {
                    debug!(target: "runtime::clock", %tick, "operation handle dropped without completing");
                }
            },
            _ = super::wait_for_flag(&mut self.shutdown) => {
                debug!(target: "runtime::clock", %tick, "barrier released by shutdown");
            }
        }
        false
    }
}
