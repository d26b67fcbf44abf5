use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use super::SecureBackend;
use crate::error::StoreError;

#[derive(Debug, Default)]
struct Inner {
    values: HashMap<String, String>,
    failing_writes: HashSet<String>,
    failing_deletes: HashSet<String>,
    failing_reads: bool,
}

/// In-memory backend.
///
/// Clones share the same map. Faults can be injected per key to exercise
/// partial-write handling.
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    inner: Arc<RwLock<Inner>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every `set` on `key` fail until [`heal`](Self::heal) is called.
    pub fn fail_writes_for(&self, key: &str) {
        self.inner.write().failing_writes.insert(key.to_string());
    }

    /// Make every `delete` on `key` fail until [`heal`](Self::heal) is called.
    pub fn fail_deletes_for(&self, key: &str) {
        self.inner.write().failing_deletes.insert(key.to_string());
    }

    /// Make every `get` fail.
    pub fn fail_reads(&self, fail: bool) {
        self.inner.write().failing_reads = fail;
    }

    /// Remove all injected faults.
    pub fn heal(&self) {
        let mut inner = self.inner.write();
        inner.failing_writes.clear();
        inner.failing_deletes.clear();
        inner.failing_reads = false;
    }

    /// Raw value for `key`, bypassing fault injection.
    pub fn peek(&self, key: &str) -> Option<String> {
        self.inner.read().values.get(key).cloned()
    }

    /// Number of stored keys.
    pub fn len(&self) -> usize {
        self.inner.read().values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().values.is_empty()
    }
}

#[async_trait]
impl SecureBackend for MemoryBackend {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let inner = self.inner.read();
        if inner.failing_reads {
            return Err(StoreError::io(key, "injected read failure"));
        }
        Ok(inner.values.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.write();
        if inner.failing_writes.contains(key) {
            return Err(StoreError::io(key, "injected write failure"));
        }
        inner.values.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.write();
        if inner.failing_deletes.contains(key) {
            return Err(StoreError::io(key, "injected delete failure"));
        }
        inner.values.remove(key);
        Ok(())
    }

    fn name(&self) -> &str {
        "memory"
    }
}
