use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::oneshot;

/// What a waiter receives when its correlation id resolves (§4.7).
#[derive(Debug, Clone)]
pub enum CorrelatedReply {
    /// A parsed `client-response` payload.
    Message(Value),
    /// A pong marker — the correlator's other client, the Background Pinger,
    /// only cares that *something* answered, not what.
    Pong,
}

/// Maps a request id to the task awaiting its response (§4.7). Implemented
/// with `oneshot` channels rather than a polled map, per the "polling waits"
/// design note: `register` hands the caller a receiver to await directly
/// instead of a key to poll.
#[derive(Default)]
pub struct Correlator {
    waiters: Mutex<HashMap<String, oneshot::Sender<CorrelatedReply>>>,
}

impl Correlator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a waiter for `id`, returning the receiver half to await.
    pub fn register(&self, id: String) -> oneshot::Receiver<CorrelatedReply> {
        let (tx, rx) = oneshot::channel();
        self.waiters.lock().unwrap().insert(id, tx);
        rx
    }

    /// Resolve `id` if a waiter is registered for it. Returns the reply back
    /// to the caller if nothing was waiting — the caller can then decide
    /// whether an unclaimed reply should be routed elsewhere (e.g. to the
    /// `on_pubsub_response` hook, per the pub/sub-response branch in §3).
    pub fn resolve(&self, id: &str, reply: CorrelatedReply) -> Option<CorrelatedReply> {
        let sender = self.waiters.lock().unwrap().remove(id);
        match sender {
            Some(tx) => match tx.send(reply) {
                Ok(()) => None,
                // Waiter already timed out and dropped its receiver.
                Err(unsent) => Some(unsent),
            },
            None => Some(reply),
        }
    }

    /// True if a waiter is currently registered for `id`, without consuming it.
    pub fn is_awaited(&self, id: &str) -> bool {
        self.waiters.lock().unwrap().contains_key(id)
    }

    /// Wait for `id` to resolve, up to `timeout`. On timeout the registration
    /// is dropped (and `resolve` against it will simply find nothing to send
    /// to) — no separate cleanup pass is needed, unlike a polled
    /// `responses_received` map which must have its key popped explicitly.
    pub async fn wait(
        &self,
        id: String,
        timeout: Duration,
    ) -> Option<CorrelatedReply> {
        let rx = self.register(id.clone());
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(reply)) => Some(reply),
            _ => {
                self.waiters.lock().unwrap().remove(&id);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn resolve_wakes_a_registered_waiter() {
        let correlator = Correlator::new();
        let rx = correlator.register("id-1".into());

        assert!(correlator.resolve("id-1", CorrelatedReply::Pong).is_none());

        match rx.await.unwrap() {
            CorrelatedReply::Pong => {}
            _ => panic!("expected Pong"),
        }
    }

    #[tokio::test]
    async fn resolve_with_no_waiter_hands_the_reply_back() {
        let correlator = Correlator::new();
        let reply = CorrelatedReply::Message(serde_json::json!({"x": 1}));
        let bounced = correlator.resolve("nobody-waiting", reply);
        assert!(bounced.is_some());
    }

    #[tokio::test]
    async fn wait_times_out_and_cleans_up_the_key() {
        let correlator = Correlator::new();
        let result = correlator.wait("id-2".into(), Duration::from_millis(10)).await;
        assert!(result.is_none());
        assert!(!correlator.is_awaited("id-2"));
    }

    #[tokio::test]
    async fn wait_resolves_before_timeout() {
        let correlator = std::sync::Arc::new(Correlator::new());
        let c2 = correlator.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            c2.resolve("id-3", CorrelatedReply::Pong);
        });

        let result = correlator
            .wait("id-3".into(), Duration::from_millis(200))
            .await;
        assert!(matches!(result, Some(CorrelatedReply::Pong)));
    }

    #[tokio::test]
    async fn is_awaited_reflects_registration_state() {
        let correlator = Correlator::new();
        assert!(!correlator.is_awaited("id-4"));
        let _rx = correlator.register("id-4".into());
        assert!(correlator.is_awaited("id-4"));
    }
}
