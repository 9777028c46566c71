//! Delayed callbacks owned by one connection.
//!
//! Each timer is a small task that sleeps and then reports its id on a
//! channel. The registry is the source of truth: a fire for an id that is no
//! longer registered (cancelled, or already fired) is stale and must be
//! ignored by the receiver, which makes cancellation race-free.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tracing::trace;
use vts_rpc::RequestId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(u64);

/// What a timer does when it fires
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimerKind {
    CallTimeout(RequestId),
    Reconnect,
    CheckActive,
    Authenticate,
}

impl TimerKind {
    /// Timers that drive the authentication handshake
    #[must_use]
    pub fn is_handshake(&self) -> bool {
        matches!(self, TimerKind::CheckActive | TimerKind::Authenticate)
    }
}

#[derive(Debug)]
struct Entry {
    kind: TimerKind,
    handle: AbortHandle,
}

#[derive(Debug)]
pub struct TimerRegistry {
    tx: mpsc::UnboundedSender<TimerId>,
    timers: HashMap<TimerId, Entry>,
    next_id: u64,
}

impl TimerRegistry {
    #[must_use]
    pub fn new(tx: mpsc::UnboundedSender<TimerId>) -> Self {
        Self {
            tx,
            timers: HashMap::new(),
            next_id: 1,
        }
    }

    /// Schedule `kind` to fire after `delay`.
    pub fn schedule(&mut self, kind: TimerKind, delay: Duration) -> TimerId {
        let id = TimerId(self.next_id);
        self.next_id += 1;

        let tx = self.tx.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(id);
        })
        .abort_handle();

        trace!(?id, ?kind, ?delay, "Timer scheduled");
        self.timers.insert(id, Entry { kind, handle });
        id
    }

    /// Claim a fired timer.
    ///
    /// Returns `None` for stale ids; the timer is removed otherwise.
    pub fn fire(&mut self, id: TimerId) -> Option<TimerKind> {
        self.timers.remove(&id).map(|entry| entry.kind)
    }

    /// Cancel one timer. Returns `false` if it was not registered.
    pub fn cancel(&mut self, id: TimerId) -> bool {
        match self.timers.remove(&id) {
            Some(entry) => {
                entry.handle.abort();
                true
            }
            None => false,
        }
    }

    /// Cancel every timer whose kind matches `pred`.
    pub fn cancel_where(&mut self, mut pred: impl FnMut(&TimerKind) -> bool) -> usize {
        let ids: Vec<TimerId> = self
            .timers
            .iter()
            .filter(|(_, entry)| pred(&entry.kind))
            .map(|(id, _)| *id)
            .collect();
        for id in &ids {
            self.cancel(*id);
        }
        ids.len()
    }

    /// Cancel everything.
    pub fn cancel_all(&mut self) -> usize {
        let count = self.timers.len();
        for (_, entry) in self.timers.drain() {
            entry.handle.abort();
        }
        count
    }

    #[must_use]
    pub fn contains(&self, kind: &TimerKind) -> bool {
        self.timers.values().any(|entry| &entry.kind == kind)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.timers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.timers.is_empty()
    }
}

impl Drop for TimerRegistry {
    fn drop(&mut self) {
        self.cancel_all();
    }
}
