//! Key-value store wrapper with injectable write failures.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use arkcash_ledger::{KvStore, MemoryStore, StoreError};

/// [`MemoryStore`] whose writes can be switched off, as on a full disk.
#[derive(Debug, Default)]
pub struct FailingStore {
    inner: MemoryStore,
    fail_writes: AtomicBool,
}

impl FailingStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make every `set` and `remove` fail until turned off again.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn check_writable(&self, key: &str) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Backend(format!("write to {key} failed: disk full")));
        }
        Ok(())
    }
}

impl KvStore for FailingStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.inner.get(key)
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.check_writable(key)?;
        self.inner.set(key, value)
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.check_writable(key)?;
        self.inner.remove(key)
    }

    fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, String)>, StoreError> {
        self.inner.scan_prefix(prefix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_writes_fail_while_switched_on() {
        let store = FailingStore::new();
        store.set("a", "1").unwrap();

        store.fail_writes(true);
        assert!(matches!(store.set("a", "2"), Err(StoreError::Backend(_))));
        assert!(store.remove("a").is_err());
        assert_eq!(store.get("a").unwrap().as_deref(), Some("1"));

        store.fail_writes(false);
        store.set("a", "2").unwrap();
        assert_eq!(store.get("a").unwrap().as_deref(), Some("2"));
    }
}
