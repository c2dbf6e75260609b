//! Typed view over the ledger's persisted fields.
//!
//! Each wallet lives in its own namespace of the shared [`KvStore`], so a main
//! and a shadow wallet never see each other's counter or proofs.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::bounded::BoundedLog;
use crate::store::{KvStore, NamespacedStore, StoreError};
use crate::types::Proof;

/// Storage keys, relative to the wallet namespace.
pub mod keys {
    pub const COUNTER: &str = "counter";
    pub const PROOFS: &str = "proofs";
    pub const USED_QUOTES: &str = "used_quotes";
    pub const REDEEMED_TOKENS: &str = "redeemed_tokens";
    pub const LAST_TOKEN: &str = "last_token";
    pub const LAST_TOKEN_TIME: &str = "last_token_time";
    pub const FIRST_FUNDS_AT: &str = "first_funds_at";
}

/// A token this wallet redeemed, identified by digest.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedeemedToken {
    pub digest: String,
    /// Secrets of the proofs the redemption produced.
    pub secrets: Vec<String>,
}

pub struct LedgerStorage {
    store: NamespacedStore<Arc<dyn KvStore>>,
}

impl LedgerStorage {
    pub fn new(store: Arc<dyn KvStore>, wallet_id: &str) -> Self {
        Self {
            store: NamespacedStore::new(store, wallet_id),
        }
    }

    pub fn wallet_id(&self) -> &str {
        self.store.namespace()
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // COUNTER
    // ═══════════════════════════════════════════════════════════════════════════

    /// Persisted counter, 0 when absent.
    pub fn load_counter(&self) -> Result<u64, StoreError> {
        match self.store.get(keys::COUNTER)? {
            None => Ok(0),
            Some(raw) => raw.trim().parse().map_err(|e| StoreError::Corrupt {
                key: keys::COUNTER.to_string(),
                reason: format!("{e}"),
            }),
        }
    }

    pub fn save_counter(&self, counter: u64) -> Result<(), StoreError> {
        self.store.set(keys::COUNTER, &counter.to_string())
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // PROOFS
    // ═══════════════════════════════════════════════════════════════════════════

    pub fn load_proofs(&self) -> Result<Vec<Proof>, StoreError> {
        Ok(self.load_json(keys::PROOFS)?.unwrap_or_default())
    }

    pub fn save_proofs(&self, proofs: &[Proof]) -> Result<(), StoreError> {
        self.save_json(keys::PROOFS, &proofs)
    }

    pub fn clear_proofs(&self) -> Result<(), StoreError> {
        self.store.remove(keys::PROOFS)
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // QUOTES AND TOKENS
    // ═══════════════════════════════════════════════════════════════════════════

    pub fn load_used_quotes(&self, capacity: usize) -> Result<BoundedLog<String>, StoreError> {
        let quotes: Vec<String> = self.load_json(keys::USED_QUOTES)?.unwrap_or_default();
        Ok(BoundedLog::from_vec(quotes, capacity))
    }

    pub fn save_used_quotes(&self, quotes: &BoundedLog<String>) -> Result<(), StoreError> {
        self.save_json(keys::USED_QUOTES, &quotes.to_vec())
    }

    pub fn load_redeemed(&self, capacity: usize) -> Result<BoundedLog<RedeemedToken>, StoreError> {
        let tokens: Vec<RedeemedToken> = self.load_json(keys::REDEEMED_TOKENS)?.unwrap_or_default();
        Ok(BoundedLog::from_vec(tokens, capacity))
    }

    pub fn save_redeemed(&self, tokens: &BoundedLog<RedeemedToken>) -> Result<(), StoreError> {
        self.save_json(keys::REDEEMED_TOKENS, &tokens.to_vec())
    }

    pub fn save_last_token(&self, token: &str, created_at_ms: i64) -> Result<(), StoreError> {
        self.store.set(keys::LAST_TOKEN, token)?;
        self.store.set(keys::LAST_TOKEN_TIME, &created_at_ms.to_string())
    }

    /// Last outgoing token and its creation time in Unix milliseconds.
    pub fn load_last_token(&self) -> Result<Option<(String, i64)>, StoreError> {
        let Some(token) = self.store.get(keys::LAST_TOKEN)? else {
            return Ok(None);
        };
        let created_at = self
            .store
            .get(keys::LAST_TOKEN_TIME)?
            .and_then(|raw| raw.trim().parse().ok())
            .unwrap_or(0);
        Ok(Some((token, created_at)))
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // TIME AT REST
    // ═══════════════════════════════════════════════════════════════════════════

    pub fn load_first_funds_at(&self) -> Result<Option<i64>, StoreError> {
        Ok(self
            .store
            .get(keys::FIRST_FUNDS_AT)?
            .and_then(|raw| raw.trim().parse().ok()))
    }

    pub fn save_first_funds_at(&self, at_ms: Option<i64>) -> Result<(), StoreError> {
        match at_ms {
            Some(at) => self.store.set(keys::FIRST_FUNDS_AT, &at.to_string()),
            None => self.store.remove(keys::FIRST_FUNDS_AT),
        }
    }

    /// Remove everything except the counter and the first-funds clock.
    pub fn clear_wallet_state(&self) -> Result<(), StoreError> {
        for key in [
            keys::PROOFS,
            keys::USED_QUOTES,
            keys::REDEEMED_TOKENS,
            keys::LAST_TOKEN,
            keys::LAST_TOKEN_TIME,
        ] {
            self.store.remove(key)?;
        }
        Ok(())
    }

    fn load_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StoreError> {
        let Some(raw) = self.store.get(key)? else {
            return Ok(None);
        };
        serde_json::from_str(&raw)
            .map(Some)
            .map_err(|e| StoreError::Corrupt {
                key: key.to_string(),
                reason: e.to_string(),
            })
    }

    fn save_json<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<(), StoreError> {
        let raw = serde_json::to_string(value).map_err(|e| StoreError::Corrupt {
            key: key.to_string(),
            reason: e.to_string(),
        })?;
        self.store.set(key, &raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn storage() -> (Arc<MemoryStore>, LedgerStorage) {
        let backend = Arc::new(MemoryStore::new());
        let storage = LedgerStorage::new(backend.clone(), "main");
        (backend, storage)
    }

    #[test]
    fn test_counter_defaults_to_zero() {
        let (_, storage) = storage();
        assert_eq!(storage.load_counter().unwrap(), 0);
        storage.save_counter(42).unwrap();
        assert_eq!(storage.load_counter().unwrap(), 42);
    }

    #[test]
    fn test_corrupt_proofs_are_reported() {
        let (backend, storage) = storage();
        backend.set("main:proofs", "{not json").unwrap();
        assert!(matches!(
            storage.load_proofs(),
            Err(StoreError::Corrupt { ref key, .. }) if key == keys::PROOFS
        ));
    }

    #[test]
    fn test_used_quotes_trimmed_to_capacity() {
        let (_, storage) = storage();
        let quotes = BoundedLog::from_vec((0..5).map(|i| format!("q{i}")).collect(), 5);
        storage.save_used_quotes(&quotes).unwrap();

        let reloaded = storage.load_used_quotes(3).unwrap();
        assert_eq!(reloaded.to_vec(), vec!["q2", "q3", "q4"]);
    }

    #[test]
    fn test_clear_wallet_state_keeps_counter() {
        let (_, storage) = storage();
        storage.save_counter(7).unwrap();
        storage
            .save_proofs(&[Proof::new("00", 1, "s", "02")])
            .unwrap();
        storage.save_last_token("cashuAxyz", 1_000).unwrap();

        storage.clear_wallet_state().unwrap();

        assert_eq!(storage.load_counter().unwrap(), 7);
        assert!(storage.load_proofs().unwrap().is_empty());
        assert_eq!(storage.load_last_token().unwrap(), None);
    }
}
