//! Per-session-name mutual exclusion.
//!
//! Lifecycle operations on one name are serialized; operations on
//! different names never wait on each other.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Table of async locks keyed by session name.
#[derive(Debug, Default)]
pub struct NameLocks {
    table: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

/// Held lock for one or two names. Released on drop.
#[derive(Debug)]
pub struct NameGuard {
    _guards: Vec<OwnedMutexGuard<()>>,
}

impl NameLocks {
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the lock for `name`.
    pub async fn lock(&self, name: &str) -> NameGuard {
        let guard = self.entry(name).lock_owned().await;
        NameGuard {
            _guards: vec![guard],
        }
    }

    /// Acquire the locks for two names in a fixed order so concurrent
    /// renames in opposite directions cannot deadlock.
    pub async fn lock_pair(&self, a: &str, b: &str) -> NameGuard {
        if a == b {
            return self.lock(a).await;
        }
        let (first, second) = if a < b { (a, b) } else { (b, a) };
        let first = self.entry(first).lock_owned().await;
        let second = self.entry(second).lock_owned().await;
        NameGuard {
            _guards: vec![first, second],
        }
    }

    /// Number of names currently tracked.
    #[must_use]
    pub fn len(&self) -> usize {
        self.table.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Whether no names are tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn entry(&self, name: &str) -> Arc<AsyncMutex<()>> {
        let mut table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
        // Entries only the table references are neither held nor awaited.
        table.retain(|key, lock| key == name || Arc::strong_count(lock) > 1);
        Arc::clone(table.entry(name.to_owned()).or_default())
    }
}
