//! Callers currently interested in the connection.
//!
//! Membership alone decides whether the transport should be open. A caller
//! dropping its status receiver does not detach it.

use std::collections::HashMap;

use tokio::sync::mpsc;
use tracing::debug;

use crate::status::Status;

/// Identity of an attached caller
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CallerId(String);

impl CallerId {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CallerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for CallerId {
    fn from(s: String) -> Self {
        CallerId(s)
    }
}

impl From<&str> for CallerId {
    fn from(s: &str) -> Self {
        CallerId(s.to_string())
    }
}

#[derive(Debug, Default)]
pub struct SubscriberRegistry {
    subscribers: HashMap<CallerId, mpsc::UnboundedSender<Status>>,
}

impl SubscriberRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `caller`, or replace its status sender if it is already attached.
    ///
    /// Returns `true` if the caller was not attached before.
    pub fn attach(&mut self, caller: CallerId, status_tx: mpsc::UnboundedSender<Status>) -> bool {
        let added = self.subscribers.insert(caller.clone(), status_tx).is_none();
        debug!(%caller, added, total = self.subscribers.len(), "Caller attached");
        added
    }

    /// Remove `caller`. Returns `true` if it was attached.
    pub fn detach(&mut self, caller: &CallerId) -> bool {
        let removed = self.subscribers.remove(caller).is_some();
        debug!(%caller, removed, total = self.subscribers.len(), "Caller detached");
        removed
    }

    /// Deliver `status` to every attached caller.
    pub fn broadcast(&self, status: Status) {
        for tx in self.subscribers.values() {
            let _ = tx.send(status);
        }
    }

    #[must_use]
    pub fn contains(&self, caller: &CallerId) -> bool {
        self.subscribers.contains_key(caller)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.subscribers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }
}
