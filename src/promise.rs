//! Pending promise bookkeeping.
//!
//! A [`CdmPromise`] wraps a single completion handler that is consumed by the
//! first resolve or reject. [`PromiseAdapter`] parks promises under numeric ids
//! so completions can arrive later, by id, from another layer. Taking a promise
//! out of the table is what completes it, so a second completion for the same
//! id finds nothing and is ignored.
use std::collections::HashMap;
use std::fmt;

use crate::error::{CdmException, ExceptionKind};

/// Identifier of a pending promise. `0` is never issued.
pub type PromiseId = u32;

/// Sentinel for "no promise".
pub const INVALID_PROMISE_ID: PromiseId = 0;

/// Value a promise resolves with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromiseValue {
    Void,
    SessionId(String),
}

type Completion = Box<dyn FnOnce(Result<PromiseValue, CdmException>) + Send>;

/// A completion handler that fires exactly once.
///
/// Dropping a promise that was never resolved or rejected is a contract
/// violation: it is logged, and debug builds panic.
pub struct CdmPromise {
    completion: Option<Completion>,
}

impl CdmPromise {
    /// Build a promise from separate resolve and reject callbacks.
    pub fn new<R, J>(resolve: R, reject: J) -> Self
    where
        R: FnOnce(PromiseValue) + Send + 'static,
        J: FnOnce(CdmException) + Send + 'static,
    {
        Self::from_fn(move |result| match result {
            Ok(value) => resolve(value),
            Err(exception) => reject(exception),
        })
    }

    /// Build a promise from a single completion callback.
    pub fn from_fn<F>(completion: F) -> Self
    where
        F: FnOnce(Result<PromiseValue, CdmException>) + Send + 'static,
    {
        Self {
            completion: Some(Box::new(completion)),
        }
    }

    /// Resolve without a value.
    pub fn resolve(self) {
        self.complete(Ok(PromiseValue::Void));
    }

    /// Resolve with a value.
    pub fn resolve_with(self, value: PromiseValue) {
        self.complete(Ok(value));
    }

    /// Reject with an exception.
    pub fn reject(self, exception: CdmException) {
        self.complete(Err(exception));
    }

    fn complete(mut self, result: Result<PromiseValue, CdmException>) {
        if let Some(completion) = self.completion.take() {
            completion(result);
        }
    }
}

impl fmt::Debug for CdmPromise {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CdmPromise")
            .field("pending", &self.completion.is_some())
            .finish()
    }
}

impl Drop for CdmPromise {
    fn drop(&mut self) {
        if self.completion.is_some() && !std::thread::panicking() {
            error!("CdmPromise dropped without being resolved or rejected");
            debug_assert!(false, "CdmPromise dropped without being resolved or rejected");
        }
    }
}

/// Table of pending promises keyed by [`PromiseId`].
///
/// Ids increase monotonically per adapter, skip `0`, and never collide with an
/// id that is still pending. Dropping the adapter rejects whatever is left.
#[derive(Debug)]
pub struct PromiseAdapter {
    next_id: PromiseId,
    pending: HashMap<PromiseId, CdmPromise>,
}

impl Default for PromiseAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl PromiseAdapter {
    pub fn new() -> Self {
        Self {
            next_id: 1,
            pending: HashMap::new(),
        }
    }

    /// Park a promise and return its id.
    pub fn save(&mut self, promise: CdmPromise) -> PromiseId {
        let id = self.allocate_id();
        self.pending.insert(id, promise);
        id
    }

    /// Resolve a pending promise without a value.
    ///
    /// Returns `false` (and does nothing) if `id` is not pending.
    pub fn resolve(&mut self, id: PromiseId) -> bool {
        self.resolve_with(id, PromiseValue::Void)
    }

    /// Resolve a pending promise with a value.
    pub fn resolve_with(&mut self, id: PromiseId, value: PromiseValue) -> bool {
        match self.take(id) {
            Some(promise) => {
                promise.resolve_with(value);
                true
            }
            None => false,
        }
    }

    /// Reject a pending promise.
    pub fn reject(
        &mut self,
        id: PromiseId,
        kind: ExceptionKind,
        system_code: u32,
        message: impl Into<String>,
    ) -> bool {
        match self.take(id) {
            Some(promise) => {
                promise.reject(CdmException::new(kind, system_code, message));
                true
            }
            None => false,
        }
    }

    /// Reject every pending promise as aborted and empty the table.
    pub fn clear(&mut self) {
        let mut pending: Vec<_> = self.pending.drain().collect();
        pending.sort_by_key(|(id, _)| *id);
        for (_, promise) in pending {
            promise.reject(CdmException::aborted());
        }
    }

    pub fn is_pending(&self, id: PromiseId) -> bool {
        self.pending.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    fn take(&mut self, id: PromiseId) -> Option<CdmPromise> {
        let promise = self.pending.remove(&id);
        if promise.is_none() {
            warn!("Promise {} is not pending; ignoring completion", id);
        }
        promise
    }

    fn allocate_id(&mut self) -> PromiseId {
        loop {
            let id = self.next_id;
            self.next_id = self.next_id.wrapping_add(1);
            if id != INVALID_PROMISE_ID && !self.pending.contains_key(&id) {
                return id;
            }
        }
    }
}

impl Drop for PromiseAdapter {
    fn drop(&mut self) {
        self.clear();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::{CdmPromise, PromiseAdapter, PromiseValue, INVALID_PROMISE_ID};
    use crate::error::{CdmException, ExceptionKind};

    type Log = Arc<Mutex<Vec<Result<PromiseValue, CdmException>>>>;

    fn recording_promise(log: &Log) -> CdmPromise {
        let log = Arc::clone(log);
        CdmPromise::from_fn(move |result| log.lock().expect("log lock").push(result))
    }

    #[test]
    fn ids_are_nonzero_and_increasing() {
        let log = Log::default();
        let mut adapter = PromiseAdapter::new();
        let first = adapter.save(recording_promise(&log));
        let second = adapter.save(recording_promise(&log));

        assert_ne!(first, INVALID_PROMISE_ID);
        assert!(second > first);
        assert_eq!(adapter.len(), 2);
        adapter.clear();
    }

    #[test]
    fn resolve_fires_exactly_once() {
        let log = Log::default();
        let mut adapter = PromiseAdapter::new();
        let id = adapter.save(recording_promise(&log));

        assert!(adapter.resolve_with(id, PromiseValue::SessionId("1".to_string())));
        assert!(!adapter.resolve(id));
        assert!(!adapter.reject(id, ExceptionKind::Unknown, 0, "late"));

        let log = log.lock().expect("log lock");
        assert_eq!(log.len(), 1);
        assert_eq!(log[0], Ok(PromiseValue::SessionId("1".to_string())));
    }

    #[test]
    fn reject_carries_exception_triple() {
        let log = Log::default();
        let mut adapter = PromiseAdapter::new();
        let id = adapter.save(recording_promise(&log));

        assert!(adapter.reject(id, ExceptionKind::InvalidAccess, 7, "bad response"));
        assert!(adapter.is_empty());

        let log = log.lock().expect("log lock");
        let exception = log[0].clone().expect_err("promise was rejected");
        assert_eq!(exception.kind, ExceptionKind::InvalidAccess);
        assert_eq!(exception.system_code, 7);
        assert_eq!(exception.message, "bad response");
    }

    #[test]
    fn unknown_id_is_ignored() {
        let mut adapter = PromiseAdapter::new();
        assert!(!adapter.resolve(42));
        assert!(!adapter.resolve(INVALID_PROMISE_ID));
    }

    #[test]
    fn clear_rejects_every_pending_promise_once() {
        let log = Log::default();
        let mut adapter = PromiseAdapter::new();
        let resolved = adapter.save(recording_promise(&log));
        adapter.save(recording_promise(&log));
        adapter.save(recording_promise(&log));
        adapter.resolve(resolved);

        adapter.clear();
        assert!(adapter.is_empty());

        let log = log.lock().expect("log lock");
        assert_eq!(log.len(), 3);
        assert_eq!(log.iter().filter(|r| r.is_err()).count(), 2);
    }

    #[test]
    fn drop_rejects_pending_promises() {
        let log = Log::default();
        {
            let mut adapter = PromiseAdapter::new();
            adapter.save(recording_promise(&log));
        }
        let log = log.lock().expect("log lock");
        assert_eq!(log.len(), 1);
        assert_eq!(
            log[0].clone().expect_err("aborted").kind,
            ExceptionKind::InvalidState
        );
    }

    #[test]
    fn separate_callbacks_route_by_outcome() {
        let resolved = Arc::new(Mutex::new(false));
        let rejected = Arc::new(Mutex::new(false));
        let r = Arc::clone(&resolved);
        let j = Arc::clone(&rejected);
        let promise = CdmPromise::new(
            move |_| *r.lock().expect("lock") = true,
            move |_| *j.lock().expect("lock") = true,
        );
        promise.reject(CdmException::not_supported("nope"));

        assert!(!*resolved.lock().expect("lock"));
        assert!(*rejected.lock().expect("lock"));
    }
}
