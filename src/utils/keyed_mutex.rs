use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// A mutex that allows locking based on a key (e.g., an upload fingerprint).
/// This prevents global locking when only per-upload synchronization is needed.
#[derive(Debug, Clone)]
pub struct KeyedMutex {
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl KeyedMutex {
    pub fn new() -> Self {
        Self {
            locks: Arc::new(DashMap::new()),
        }
    }

    fn mutex_for(&self, key: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .value()
            .clone()
    }

    /// Acquires a lock for the given key, waiting behind any current holder.
    /// The lock is released when the returned guard is dropped.
    pub async fn lock(&self, key: &str) -> OwnedMutexGuard<()> {
        self.mutex_for(key).lock_owned().await
    }

    /// Returns `None` if the key is currently held.
    pub fn try_lock(&self, key: &str) -> Option<OwnedMutexGuard<()>> {
        self.mutex_for(key).try_lock_owned().ok()
    }

    #[cfg(test)]
    pub fn is_locked(&self, key: &str) -> bool {
        self.locks
            .get(key)
            .map(|m| m.value().try_lock().is_err())
            .unwrap_or(false)
    }

    /// Removes locks that are not currently held by any task.
    /// This should be called periodically to prevent memory growth.
    pub fn cleanup(&self) {
        self.locks.retain(|_, mutex| Arc::strong_count(mutex) > 1);
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.locks.len()
    }

}

impl Default for KeyedMutex {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_same_key_is_exclusive() {
        let mutex = KeyedMutex::new();
        let guard = mutex.lock("abc").await;
        assert!(mutex.is_locked("abc"));
        assert!(mutex.try_lock("abc").is_none());
        drop(guard);
        assert!(mutex.try_lock("abc").is_some());
    }

    #[tokio::test]
    async fn test_different_keys_are_independent() {
        let mutex = KeyedMutex::new();
        let _a = mutex.lock("a").await;
        assert!(mutex.try_lock("b").is_some());
    }

    #[tokio::test]
    async fn test_cleanup_drops_idle_entries() {
        let mutex = KeyedMutex::new();
        let held = mutex.lock("held").await;
        drop(mutex.lock("idle").await);
        assert_eq!(mutex.len(), 2);

        mutex.cleanup();
        assert_eq!(mutex.len(), 1);
        assert!(mutex.is_locked("held"));
        drop(held);
    }
}
