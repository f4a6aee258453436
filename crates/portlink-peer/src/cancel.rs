use std::fmt;
use std::sync::{Arc, OnceLock};

use portlink_wire::DEFAULT_ABORT_REASON;
use tokio_util::sync::CancellationToken;

/// Cooperative cancellation signal with a reason.
///
/// The requester passes one in [`RequestOptions`](crate::RequestOptions) to
/// abandon a call; the receiving side hands one to handlers through
/// [`HandlerContext::signal`](crate::HandlerContext::signal) when the
/// requester asked for cancellation to be propagated. Clones observe the
/// same state.
#[derive(Clone, Default)]
pub struct CancelToken {
    token: CancellationToken,
    reason: Arc<OnceLock<String>>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancel with the default reason (`"Abort"`).
    pub fn cancel(&self) {
        self.cancel_with(DEFAULT_ABORT_REASON);
    }

    /// Cancel with `reason`. Only the first cancellation's reason is kept.
    pub fn cancel_with(&self, reason: impl Into<String>) {
        // Reason is stored before the token fires so waiters always see it.
        let _ = self.reason.set(reason.into());
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// The cancellation reason, once cancelled.
    pub fn reason(&self) -> Option<String> {
        if !self.is_cancelled() {
            return None;
        }
        Some(self.current_reason())
    }

    /// Wait until cancelled and return the reason.
    pub async fn cancelled(&self) -> String {
        self.token.cancelled().await;
        self.current_reason()
    }

    fn current_reason(&self) -> String {
        self.reason
            .get()
            .cloned()
            .unwrap_or_else(|| DEFAULT_ABORT_REASON.to_string())
    }
}

impl fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelToken")
            .field("cancelled", &self.is_cancelled())
            .field("reason", &self.reason.get())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_reason_is_abort() {
        let token = CancelToken::new();
        assert!(token.reason().is_none());
        token.cancel();
        assert!(token.is_cancelled());
        assert_eq!(token.reason().as_deref(), Some("Abort"));
    }

    #[test]
    fn first_reason_wins() {
        let token = CancelToken::new();
        let clone = token.clone();
        clone.cancel_with("navigated away");
        token.cancel_with("second");
        assert_eq!(token.reason().as_deref(), Some("navigated away"));
    }

    #[tokio::test]
    async fn waiters_observe_reason() {
        let token = CancelToken::new();
        let waiter = tokio::spawn({
            let token = token.clone();
            async move { token.cancelled().await }
        });
        tokio::task::yield_now().await;
        token.cancel_with("stop");
        assert_eq!(waiter.await.expect("waiter should finish"), "stop");
    }
}
