//! Instrumented archive store.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

use crate::store::{ArchiveStore, StoreError};

/// A store operation, for call-log assertions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    Head,
    Get,
    Put,
}

/// Wraps a real store, recording every call and injecting one-shot
/// failures per operation.
pub struct InstrumentedStore<S> {
    inner: S,
    log: Mutex<Vec<StoreOp>>,
    failures: Mutex<HashMap<StoreOp, String>>,
}

impl<S> InstrumentedStore<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            log: Mutex::new(Vec::new()),
            failures: Mutex::new(HashMap::new()),
        }
    }

    /// All operations seen so far, in order.
    pub fn ops(&self) -> Vec<StoreOp> {
        self.log.lock().unwrap().clone()
    }

    /// How many times `op` has been called.
    pub fn count(&self, op: StoreOp) -> usize {
        self.log.lock().unwrap().iter().filter(|o| **o == op).count()
    }

    /// Make the next call to `op` fail with a transient store error.
    pub fn fail_next(&self, op: StoreOp, message: &str) {
        self.failures.lock().unwrap().insert(op, message.to_string());
    }

    fn record(&self, op: StoreOp) -> Option<String> {
        self.log.lock().unwrap().push(op);
        self.failures.lock().unwrap().remove(&op)
    }
}

impl<S: ArchiveStore> ArchiveStore for InstrumentedStore<S> {
    fn head(&self, key: &str) -> Result<DateTime<Utc>, StoreError> {
        if let Some(message) = self.record(StoreOp::Head) {
            return Err(StoreError::Remote {
                key: key.to_string(),
                message,
            });
        }
        self.inner.head(key)
    }

    fn get(&self, key: &str, dest: &Path) -> Result<(), StoreError> {
        if let Some(message) = self.record(StoreOp::Get) {
            return Err(StoreError::Remote {
                key: key.to_string(),
                message,
            });
        }
        self.inner.get(key, dest)
    }

    fn put(&self, key: &str, src: &Path) -> Result<(), StoreError> {
        if let Some(message) = self.record(StoreOp::Put) {
            return Err(StoreError::Remote {
                key: key.to_string(),
                message,
            });
        }
        self.inner.put(key, src)
    }
}
