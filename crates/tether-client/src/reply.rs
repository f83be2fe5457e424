//! Reply correlation: at-most-once outcome delivery and correlation codes.

use rand::Rng;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use tokio::sync::{oneshot, Mutex};
use tracing::debug;

/// The result of a command send, delivered at most once.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandOutcome {
    /// Whether the send produced a reply (or, for fire-and-forget sends,
    /// whether the relay accepted the command).
    pub success: bool,
    /// The reply payload, when one exists.
    pub payload: Option<serde_json::Value>,
}

impl CommandOutcome {
    /// A successful outcome with an optional payload.
    pub fn success(payload: Option<serde_json::Value>) -> Self {
        Self {
            success: true,
            payload,
        }
    }

    /// A failure carrying the device's error payload convention.
    pub fn error(message: &str) -> Self {
        Self {
            success: false,
            payload: Some(serde_json::json!({
                "Status": "Error",
                "ErrorText": message,
            })),
        }
    }

    /// The outcome of a long-poll window that expired with no reply.
    pub fn disconnected() -> Self {
        Self {
            success: false,
            payload: Some(serde_json::json!({ "Status": "Disconnected" })),
        }
    }

    /// The payload's Status field, when present.
    pub fn status(&self) -> Option<&str> {
        self.payload.as_ref()?.get("Status")?.as_str()
    }
}

/// Single-assignment cell the racing transport completions resolve into.
///
/// The fire request and the long-poll for the same send both hold the slot;
/// whichever settles first delivers the outcome, later resolutions are
/// dropped.
pub(crate) struct ReplySlot {
    tx: Mutex<Option<oneshot::Sender<CommandOutcome>>>,
}

impl ReplySlot {
    /// Create a slot and the pending reply the caller awaits.
    pub fn new() -> (Arc<Self>, PendingReply) {
        let (tx, rx) = oneshot::channel();
        (
            Arc::new(Self {
                tx: Mutex::new(Some(tx)),
            }),
            PendingReply { rx },
        )
    }

    /// Deliver an outcome. Returns false when the slot already resolved.
    pub async fn resolve(&self, outcome: CommandOutcome) -> bool {
        let Some(tx) = self.tx.lock().await.take() else {
            debug!("reply already delivered, dropping late outcome");
            return false;
        };
        // The receiver side may be gone if the caller dropped the reply.
        let _ = tx.send(outcome);
        true
    }
}

/// Handle to a command's eventual outcome.
pub struct PendingReply {
    rx: oneshot::Receiver<CommandOutcome>,
}

impl PendingReply {
    /// Wait for the outcome of the send.
    pub async fn outcome(self) -> CommandOutcome {
        self.rx
            .await
            .unwrap_or_else(|_| CommandOutcome::error("reply channel closed"))
    }
}

fn code_counter() -> &'static AtomicU64 {
    static COUNTER: OnceLock<AtomicU64> = OnceLock::new();
    COUNTER.get_or_init(|| {
        let seed = rand::thread_rng().gen_range(10_000_000_000_000u64..90_000_000_000_000u64);
        AtomicU64::new(seed)
    })
}

/// Next correlation code for long-poll reply matching.
///
/// Monotonic from a random 14-digit base: unique for the process lifetime,
/// plain numbers on the wire.
pub(crate) fn next_response_code() -> u64 {
    code_counter().fetch_add(1, Ordering::Relaxed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn first_resolution_wins() {
        let (slot, reply) = ReplySlot::new();

        assert!(slot.resolve(CommandOutcome::success(Some(json!({"n": 1})))).await);
        assert!(!slot.resolve(CommandOutcome::error("late")).await);

        let outcome = reply.outcome().await;
        assert!(outcome.success);
        assert_eq!(outcome.payload, Some(json!({"n": 1})));
    }

    #[tokio::test]
    async fn dropped_slot_yields_a_failed_outcome() {
        let (slot, reply) = ReplySlot::new();
        drop(slot);

        let outcome = reply.outcome().await;
        assert!(!outcome.success);
        assert_eq!(outcome.status(), Some("Error"));
    }

    #[test]
    fn error_outcome_follows_device_convention() {
        let outcome = CommandOutcome::error("boom");
        assert!(!outcome.success);
        assert_eq!(outcome.status(), Some("Error"));
        assert_eq!(outcome.payload.unwrap()["ErrorText"], "boom");
    }

    #[test]
    fn disconnected_outcome_payload() {
        let outcome = CommandOutcome::disconnected();
        assert!(!outcome.success);
        assert_eq!(outcome.payload, Some(json!({"Status": "Disconnected"})));
    }

    #[test]
    fn correlation_codes_are_monotonic() {
        let first = next_response_code();
        let second = next_response_code();
        assert!(second > first);
        assert!(first >= 10_000_000_000_000);
    }
}
