// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! In-memory `LocalCache` for tests.
//!
//! Records every operation the receiver applies so tests can check
//! order, and can be switched into a failing mode.

use cache_replicator::receiver::{CacheError, CacheFuture, LocalCache};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

/// An operation applied through the `LocalCache` interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppliedOp {
    Put(String, Vec<u8>),
    Remove(String),
    RemoveAll,
}

#[derive(Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, Vec<u8>>>,
    applied: Mutex<Vec<AppliedOp>>,
    failing: AtomicBool,
    /// Fail every put after this many successful ones.
    fail_after_puts: AtomicUsize,
    puts: AtomicUsize,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self {
            fail_after_puts: AtomicUsize::new(usize::MAX),
            ..Default::default()
        }
    }

    // =========================================================================
    // Direct (local) mutations: bypass the replicated path
    // =========================================================================

    pub fn insert(&self, key: &str, value: &[u8]) {
        self.entries.lock().unwrap().insert(key.to_string(), value.to_vec());
    }

    pub fn delete(&self, key: &str) -> bool {
        self.entries.lock().unwrap().remove(key).is_some()
    }

    pub fn clear(&self) {
        self.entries.lock().unwrap().clear();
    }

    // =========================================================================
    // Inspection
    // =========================================================================

    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.entries.lock().unwrap().get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn snapshot(&self) -> BTreeMap<String, Vec<u8>> {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Operations applied by a receiver, in order.
    pub fn applied(&self) -> Vec<AppliedOp> {
        self.applied.lock().unwrap().clone()
    }

    // =========================================================================
    // Failure injection
    // =========================================================================

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn fail_after_puts(&self, count: usize) {
        self.fail_after_puts.store(count, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), CacheError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(CacheError("cache unavailable".into()));
        }
        Ok(())
    }
}

impl LocalCache for MemoryCache {
    fn put(&self, key: String, value: Vec<u8>) -> CacheFuture<'_, ()> {
        Box::pin(async move {
            self.check()?;
            if self.puts.load(Ordering::SeqCst) >= self.fail_after_puts.load(Ordering::SeqCst) {
                return Err(CacheError("cache full".into()));
            }
            self.puts.fetch_add(1, Ordering::SeqCst);
            self.entries.lock().unwrap().insert(key.clone(), value.clone());
            self.applied.lock().unwrap().push(AppliedOp::Put(key, value));
            Ok(())
        })
    }

    fn remove(&self, key: String) -> CacheFuture<'_, bool> {
        Box::pin(async move {
            self.check()?;
            let existed = self.entries.lock().unwrap().remove(&key).is_some();
            self.applied.lock().unwrap().push(AppliedOp::Remove(key));
            Ok(existed)
        })
    }

    fn remove_all(&self) -> CacheFuture<'_, ()> {
        Box::pin(async move {
            self.check()?;
            self.entries.lock().unwrap().clear();
            self.applied.lock().unwrap().push(AppliedOp::RemoveAll);
            Ok(())
        })
    }
}
