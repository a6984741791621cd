// swarm-autoscaler: TTL'd in-memory cache
//
// Backs the resolved peer list (TTL = half the control interval) and the
// cluster node count (TTL = 30s). Read-mostly; a single mutex is enough.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

struct Entry<T> {
    value: T,
    expires_at: Instant,
}

/// A small string-keyed cache where every entry carries its own TTL.
pub struct TtlCache<T> {
    inner: Mutex<HashMap<String, Entry<T>>>,
}

impl<T: Clone> TtlCache<T> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the cached value, dropping it first if it has expired.
    pub fn get(&self, key: &str) -> Option<T> {
        let mut inner = self.inner.lock();
        match inner.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => Some(entry.value.clone()),
            Some(_) => {
                inner.remove(key);
                None
            }
            None => None,
        }
    }

    /// Stores the value and hands it back so callers can cache-and-return.
    pub fn set(&self, key: &str, value: T, ttl: Duration) -> T {
        let mut inner = self.inner.lock();
        inner.insert(
            key.to_string(),
            Entry {
                value: value.clone(),
                expires_at: Instant::now() + ttl,
            },
        );
        value
    }

    pub fn invalidate(&self, key: &str) {
        self.inner.lock().remove(key);
    }
}

impl<T: Clone> Default for TtlCache<T> {
    fn default() -> Self {
        Self::new()
    }
}
