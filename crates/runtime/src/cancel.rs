//! Cooperative cancellation for program tasks.
//!
//! Every program body runs inside [`CancelToken::scope`]. Clock waits pick up
//! the token of the current task and return
//! [`ClockError::Interrupted`](crate::clock::ClockError::Interrupted) once it
//! fires, so a blocked primitive unwinds instead of hanging.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::watch;

tokio::task_local! {
    static CURRENT_CANCEL: CancelToken;
}

/// Shared cancellation flag. Clones observe the same flag.
#[derive(Clone, Debug)]
pub struct CancelToken {
    flag: Arc<watch::Sender<bool>>,
}

impl CancelToken {
    pub fn new() -> Self {
        let (flag, _) = watch::channel(false);
        Self {
            flag: Arc::new(flag),
        }
    }

    /// Requests cancellation. Idempotent.
    pub fn cancel(&self) {
        self.flag.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.flag.borrow()
    }

    /// Resolves once [`CancelToken::cancel`] has been called.
    pub async fn cancelled(&self) {
        let mut rx = self.flag.subscribe();
        crate::clock::wait_for_flag(&mut rx).await;
    }

    /// Runs `future` with this token installed as the task's current token.
    pub async fn scope<F: Future>(self, future: F) -> F::Output {
        CURRENT_CANCEL.scope(self, future).await
    }

    /// Token installed by the innermost enclosing [`CancelToken::scope`].
    pub fn current() -> Option<CancelToken> {
        CURRENT_CANCEL.try_with(Clone::clone).ok()
    }

    /// True if the current task runs under a cancelled token.
    pub fn current_is_cancelled() -> bool {
        Self::current().is_some_and(|token| token.is_cancelled())
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn scope_installs_current_token() {
        assert!(CancelToken::current().is_none());

        let token = CancelToken::new();
        let observed = token
            .clone()
            .scope(async {
                let current = CancelToken::current().unwrap();
                current.cancel();
                CancelToken::current_is_cancelled()
            })
            .await;

        assert!(observed);
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn cancelled_wakes_waiters() {
        let token = CancelToken::new();
        let waiter = tokio::spawn({
            let token = token.clone();
            async move { token.cancelled().await }
        });
        tokio::task::yield_now().await;
        token.cancel();
        waiter.await.unwrap();
    }
}
