//! Pending-call table of a client.
//!
//! Maps each in-flight CallId to the sink that will receive its result.
//! Kept in a `BTreeMap` so a disconnect flushes calls in ascending id order.

use std::collections::BTreeMap;

use bytes::Bytes;
use tokio::task::JoinHandle;

use crate::status::CallResult;

/// Type-erased result sink. Decodes the response body and hands the typed
/// result to the caller.
pub(crate) type ResultSink = Box<dyn FnOnce(CallResult<Bytes>)>;

/// One outstanding call.
pub(crate) struct PendingCall {
    sink: ResultSink,
    /// Timeout task, if the client has a call timeout.
    timer: Option<JoinHandle<()>>,
}

impl PendingCall {
    /// Resolve the call. Must not be invoked while the table is borrowed.
    pub(crate) fn resolve(self, result: CallResult<Bytes>) {
        if let Some(timer) = self.timer {
            timer.abort();
        }
        (self.sink)(result);
    }
}

/// Outstanding calls keyed by CallId.
pub(crate) struct PendingCalls {
    calls: BTreeMap<u32, PendingCall>,
    next_id: u32,
}

impl PendingCalls {
    pub(crate) fn new() -> Self {
        Self {
            calls: BTreeMap::new(),
            next_id: 1,
        }
    }

    /// Next free CallId. Wraps around, skipping 0 and ids still pending.
    pub(crate) fn allocate_id(&mut self) -> u32 {
        loop {
            let id = self.next_id;
            self.next_id = match self.next_id.wrapping_add(1) {
                0 => 1,
                n => n,
            };
            if id != 0 && !self.calls.contains_key(&id) {
                return id;
            }
        }
    }

    pub(crate) fn insert(&mut self, id: u32, sink: ResultSink) {
        self.calls.insert(id, PendingCall { sink, timer: None });
    }

    /// Attach a timeout task. Aborts it if the call already resolved.
    pub(crate) fn set_timer(&mut self, id: u32, timer: JoinHandle<()>) {
        match self.calls.get_mut(&id) {
            Some(call) => call.timer = Some(timer),
            None => timer.abort(),
        }
    }

    pub(crate) fn take(&mut self, id: u32) -> Option<PendingCall> {
        self.calls.remove(&id)
    }

    /// Remove every call, in ascending id order.
    pub(crate) fn drain(&mut self) -> Vec<PendingCall> {
        std::mem::take(&mut self.calls).into_values().collect()
    }

    #[cfg(test)]
    pub(crate) fn contains(&self, id: u32) -> bool {
        self.calls.contains_key(&id)
    }

    pub(crate) fn len(&self) -> usize {
        self.calls.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::CallError;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn recording_sink(log: &Rc<RefCell<Vec<u32>>>, id: u32) -> ResultSink {
        let log = log.clone();
        Box::new(move |_| log.borrow_mut().push(id))
    }

    #[test]
    fn test_ids_start_at_one() {
        let mut table = PendingCalls::new();
        assert_eq!(table.allocate_id(), 1);
        assert_eq!(table.allocate_id(), 2);
    }

    #[test]
    fn test_wraparound_skips_zero_and_pending() {
        let mut table = PendingCalls::new();
        let log = Rc::new(RefCell::new(Vec::new()));
        table.insert(1, recording_sink(&log, 1));

        table.next_id = u32::MAX;
        assert_eq!(table.allocate_id(), u32::MAX);
        assert_eq!(table.allocate_id(), 2);
    }

    #[test]
    fn test_drain_is_ascending() {
        let mut table = PendingCalls::new();
        let log = Rc::new(RefCell::new(Vec::new()));
        for id in [7, 3, 9, 1] {
            table.insert(id, recording_sink(&log, id));
        }

        for call in table.drain() {
            call.resolve(Err(CallError::connection_lost()));
        }

        assert_eq!(*log.borrow(), vec![1, 3, 7, 9]);
        assert_eq!(table.len(), 0);
    }

    #[test]
    fn test_take_removes_entry() {
        let mut table = PendingCalls::new();
        let log = Rc::new(RefCell::new(Vec::new()));
        table.insert(5, recording_sink(&log, 5));

        assert!(table.contains(5));
        assert!(table.take(5).is_some());
        assert!(table.take(5).is_none());
        assert!(!table.contains(5));
    }
}
