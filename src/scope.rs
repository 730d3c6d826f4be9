//! Shared cancellation signal for one race.

use tokio_util::sync::{CancellationToken, DropGuard, WaitForCancellationFuture};

/// One-way ACTIVE -> CANCELLED signal shared by every attempt of a race.
///
/// Cloning yields another handle to the same signal. Attempts only observe it;
/// the dispatcher that created it is the one that cancels.
#[derive(Debug, Clone, Default)]
pub struct CancellationScope {
    token: CancellationToken,
}

impl CancellationScope {
    pub fn new() -> Self {
        Self::default()
    }

    /// Moves the scope to CANCELLED. Calling it again has no effect.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once the scope is cancelled, immediately if it already is.
    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.token.cancelled()
    }

    /// Returns a guard that cancels the scope when dropped.
    ///
    /// Held for the lifetime of a race so that every exit path, including the
    /// caller dropping the race future, tears the scope down.
    pub fn teardown_guard(&self) -> DropGuard {
        self.token.clone().drop_guard()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_is_idempotent() {
        let scope = CancellationScope::new();
        assert!(!scope.is_cancelled());
        scope.cancel();
        scope.cancel();
        assert!(scope.is_cancelled());
    }

    #[test]
    fn clones_observe_the_same_state() {
        let scope = CancellationScope::new();
        let observer = scope.clone();
        scope.cancel();
        assert!(observer.is_cancelled());
    }

    #[test]
    fn teardown_guard_cancels_on_drop() {
        let scope = CancellationScope::new();
        {
            let _guard = scope.teardown_guard();
            assert!(!scope.is_cancelled());
        }
        assert!(scope.is_cancelled());
    }

    #[tokio::test]
    async fn cancelled_resolves_for_waiting_tasks() {
        let scope = CancellationScope::new();
        let observer = scope.clone();
        let waiter = tokio::spawn(async move { observer.cancelled().await });
        scope.cancel();
        waiter.await.unwrap();
    }
}
