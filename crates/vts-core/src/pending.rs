//! Correlation of in-flight requests with their waiting responders.
//!
//! An entry lives from dispatch until exactly one of: the matching response
//! arrives, its timeout fires, the send fails, or the connection goes away.
//! Removal happens in the same step as the lookup, so whichever of those
//! outcomes claims the entry first is the only one that resolves it.

use std::collections::HashMap;

use vts_rpc::RequestId;

use crate::timers::TimerId;

/// One in-flight request
#[derive(Debug)]
pub struct PendingCall<R> {
    pub responder: R,
    /// Timeout timer to cancel when the call settles
    pub timeout: TimerId,
}

#[derive(Debug)]
pub struct PendingCalls<R> {
    entries: HashMap<RequestId, PendingCall<R>>,
}

impl<R> Default for PendingCalls<R> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }
}

impl<R> PendingCalls<R> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a call under `id`.
    ///
    /// # Errors
    ///
    /// Hands the entry back if `id` is already pending; an existing entry is
    /// never overwritten.
    pub fn register(
        &mut self,
        id: RequestId,
        responder: R,
        timeout: TimerId,
    ) -> Result<(), PendingCall<R>> {
        let call = PendingCall { responder, timeout };
        if self.entries.contains_key(&id) {
            return Err(call);
        }
        self.entries.insert(id, call);
        Ok(())
    }

    /// Claim the entry for `id`, if it is still pending.
    pub fn take(&mut self, id: &RequestId) -> Option<PendingCall<R>> {
        self.entries.remove(id)
    }

    /// Claim every pending entry, leaving the table empty.
    pub fn drain(&mut self) -> Vec<(RequestId, PendingCall<R>)> {
        self.entries.drain().collect()
    }

    #[must_use]
    pub fn contains(&self, id: &RequestId) -> bool {
        self.entries.contains_key(id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timers::{TimerKind, TimerRegistry};
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn timer(timers: &mut TimerRegistry) -> TimerId {
        timers.schedule(TimerKind::Reconnect, Duration::from_secs(60))
    }

    #[tokio::test(start_paused = true)]
    async fn test_register_and_take_once() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut timers = TimerRegistry::new(tx);
        let mut pending = PendingCalls::new();

        let t = timer(&mut timers);
        pending.register("a".into(), "responder-a", t).unwrap();
        assert!(pending.contains(&"a".into()));

        let call = pending.take(&"a".into()).unwrap();
        assert_eq!(call.responder, "responder-a");
        assert_eq!(call.timeout, t);

        assert!(pending.take(&"a".into()).is_none());
        assert!(pending.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_id_is_refused() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut timers = TimerRegistry::new(tx);
        let mut pending = PendingCalls::new();

        pending.register("dup".into(), 1, timer(&mut timers)).unwrap();
        let rejected = pending
            .register("dup".into(), 2, timer(&mut timers))
            .unwrap_err();

        assert_eq!(rejected.responder, 2);
        assert_eq!(pending.take(&"dup".into()).unwrap().responder, 1);
    }

    #[test]
    fn test_take_unknown_is_none() {
        let mut pending: PendingCalls<()> = PendingCalls::new();
        assert!(pending.take(&"nope".into()).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_drain_empties_table() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut timers = TimerRegistry::new(tx);
        let mut pending = PendingCalls::new();

        for i in 0..3 {
            pending
                .register(format!("r{i}").into(), i, timer(&mut timers))
                .unwrap();
        }

        let drained = pending.drain();
        assert_eq!(drained.len(), 3);
        assert!(pending.is_empty());
        assert!(pending.drain().is_empty());
    }
}
