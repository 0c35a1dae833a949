//! Request/response correlator.
//!
//! Each in-flight request resolves exactly once: by a matching response,
//! by the caller's timeout removing it, or by `drain` on disconnect.

use std::{
    collections::HashMap,
    sync::{
        Mutex,
        atomic::{AtomicU64, Ordering},
    },
    time::{SystemTime, UNIX_EPOCH},
};

use {
    tokio::sync::oneshot,
    tracing::{debug, warn},
};

use crate::error::ClientError;

type Outcome = Result<serde_json::Value, ClientError>;

#[derive(Default)]
pub(crate) struct PendingRequests {
    seq: AtomicU64,
    inflight: Mutex<HashMap<String, oneshot::Sender<Outcome>>>,
}

impl PendingRequests {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a request id and register the response channel.
    ///
    /// Ids combine epoch millis with a monotonic counter, which makes them
    /// unique for the lifetime of this client.
    pub fn register(&self) -> (String, oneshot::Receiver<Outcome>) {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed) + 1;
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis();
        let id = format!("{millis}-{seq}");

        let (tx, rx) = oneshot::channel();
        self.inflight.lock().unwrap().insert(id.clone(), tx);
        (id, rx)
    }

    /// Resolve the entry for `id` from an inbound response frame. Unknown
    /// ids (e.g. a response landing after its timeout) are dropped.
    pub fn resolve(&self, id: &str, outcome: Outcome) {
        let Some(tx) = self.inflight.lock().unwrap().remove(id) else {
            debug!(id, "response for untracked request dropped");
            return;
        };
        // A dropped receiver means the caller wanted no callback; fine.
        let _ = tx.send(outcome);
    }

    /// Remove an entry whose caller-side timeout fired.
    pub fn remove(&self, id: &str) {
        self.inflight.lock().unwrap().remove(id);
    }

    /// Reject every in-flight request, e.g. on disconnect.
    pub fn drain(&self, error: ClientError) {
        let entries: Vec<_> = {
            let mut inflight = self.inflight.lock().unwrap();
            inflight.drain().collect()
        };
        if !entries.is_empty() {
            warn!(count = entries.len(), %error, "rejecting in-flight requests");
        }
        for (_, tx) in entries {
            let _ = tx.send(Err(error.clone()));
        }
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.inflight.lock().unwrap().len()
    }
}
