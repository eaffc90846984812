//! Callback-id correlation between dispatched probes and their
//! replies.
//!
//! The dispatcher registers a oneshot per callback id before sending a
//! validate request; the connection reader completes it when the reply
//! arrives. Replies for ids that were never registered, already
//! completed, or abandoned after timeout are dropped on the floor.

use std::collections::HashMap;
use std::sync::Mutex;

use tokio::sync::oneshot;
use uuid::Uuid;

use super::messages::ValidateReply;

#[derive(Default)]
pub struct PendingProbes {
    inner: Mutex<HashMap<Uuid, oneshot::Sender<ValidateReply>>>,
}

impl PendingProbes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback id and get the receiver its reply will
    /// arrive on.
    pub fn register(&self, callback_id: Uuid) -> oneshot::Receiver<ValidateReply> {
        let (tx, rx) = oneshot::channel();
        if let Ok(mut pending) = self.inner.lock() {
            pending.insert(callback_id, tx);
        }
        rx
    }

    /// Route a reply to its waiting dispatcher. Returns false for
    /// stale or unknown callback ids.
    pub fn complete(&self, callback_id: Uuid, reply: ValidateReply) -> bool {
        let sender = match self.inner.lock() {
            Ok(mut pending) => pending.remove(&callback_id),
            Err(_) => None,
        };
        match sender {
            Some(tx) => tx.send(reply).is_ok(),
            None => false,
        }
    }

    /// Forget a callback id whose probe timed out.
    pub fn abandon(&self, callback_id: Uuid) {
        if let Ok(mut pending) = self.inner.lock() {
            pending.remove(&callback_id);
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().map(|p| p.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
