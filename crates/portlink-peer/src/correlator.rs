use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use serde_json::Value;
use tokio::sync::oneshot;

use crate::error::{PeerError, Result};
use crate::lock;

pub(crate) type Reply = oneshot::Receiver<Result<Vec<Value>>>;

struct PendingRequest {
    event_name: String,
    reply: oneshot::Sender<Result<Vec<Value>>>,
}

/// Pending outbound requests keyed by sequence.
///
/// Every record leaves the map through exactly one of [`settle`](Self::settle),
/// [`forget`](Self::forget) or [`fail_all`](Self::fail_all).
pub(crate) struct Correlator {
    next_sequence: AtomicU64,
    pending: Mutex<HashMap<u64, PendingRequest>>,
}

impl Correlator {
    pub(crate) fn new() -> Self {
        Self {
            next_sequence: AtomicU64::new(1),
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Allocate the next sequence and record a pending request for it.
    pub(crate) fn register(&self, event_name: &str) -> (u64, Reply) {
        let sequence = self.next_sequence.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        lock(&self.pending).insert(
            sequence,
            PendingRequest {
                event_name: event_name.to_string(),
                reply: tx,
            },
        );
        (sequence, rx)
    }

    /// Complete the request `sequence`. Returns `false` when no such request
    /// is pending.
    pub(crate) fn settle(&self, sequence: u64, outcome: Result<Vec<Value>>) -> bool {
        let Some(request) = lock(&self.pending).remove(&sequence) else {
            return false;
        };
        // The caller may have stopped waiting; the record is gone either way.
        let _ = request.reply.send(outcome);
        true
    }

    /// Drop the request `sequence` without completing it.
    pub(crate) fn forget(&self, sequence: u64) -> bool {
        lock(&self.pending).remove(&sequence).is_some()
    }

    /// Fail every pending request with [`PeerError::Disconnected`].
    pub(crate) fn fail_all(&self, reason: &str) -> usize {
        let drained: Vec<_> = lock(&self.pending).drain().collect();
        let count = drained.len();
        for (sequence, request) in drained {
            tracing::debug!(sequence, event = %request.event_name, reason, "pending request failed");
            let _ = request
                .reply
                .send(Err(PeerError::Disconnected(reason.to_string())));
        }
        count
    }

    #[cfg(test)]
    pub(crate) fn is_pending(&self, sequence: u64) -> bool {
        lock(&self.pending).contains_key(&sequence)
    }

    pub(crate) fn pending_count(&self) -> usize {
        lock(&self.pending).len()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn sequences_start_at_one_and_increase() {
        let correlator = Correlator::new();
        let (a, _ra) = correlator.register("a");
        let (b, _rb) = correlator.register("b");
        assert_eq!((a, b), (1, 2));
        assert_eq!(correlator.pending_count(), 2);
    }

    #[tokio::test]
    async fn settles_matching_sequence() {
        let correlator = Correlator::new();
        let (seq, reply) = correlator.register("load");

        assert!(correlator.settle(seq, Ok(vec![json!({ "a": 1 })])));
        assert_eq!(reply.await.unwrap().unwrap(), vec![json!({ "a": 1 })]);
        assert_eq!(correlator.pending_count(), 0);
    }

    #[tokio::test]
    async fn ignores_unknown_sequence() {
        let correlator = Correlator::new();
        for _ in 0..4 {
            let (seq, _reply) = correlator.register("warmup");
            correlator.forget(seq);
        }
        let (seq, mut reply) = correlator.register("load");
        assert_eq!(seq, 5);

        assert!(!correlator.settle(105, Ok(vec![])));
        assert!(correlator.is_pending(5));
        assert!(reply.try_recv().is_err());
    }

    #[test]
    fn settle_only_once() {
        let correlator = Correlator::new();
        let (seq, _reply) = correlator.register("e");
        assert!(correlator.settle(seq, Err(PeerError::Remote("boom".into()))));
        assert!(!correlator.settle(seq, Ok(vec![])));
        assert!(!correlator.forget(seq));
    }

    #[tokio::test]
    async fn fail_all_disconnects_waiters() {
        let correlator = Correlator::new();
        let (_, first) = correlator.register("a");
        let (_, second) = correlator.register("b");

        assert_eq!(correlator.fail_all("host dropped"), 2);
        for reply in [first, second] {
            assert!(matches!(
                reply.await.unwrap(),
                Err(PeerError::Disconnected(reason)) if reason == "host dropped"
            ));
        }
        assert_eq!(correlator.pending_count(), 0);
    }
}
