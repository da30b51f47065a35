//! Key/TTL store contract backing the replay and idempotency ledgers.
//!
//! The facilitator keeps two sets of keys with per-key expiry: accepted
//! nonces (replay protection, written on successful verify) and settlement
//! idempotency keys (written on successful settle). Both go through the
//! [`TtlStore`] contract so the backend is deployment-dependent: an
//! in-memory or file-backed store for a single replica, a shared network
//! cache when several facilitator replicas run behind one address.
//!
//! # Concurrency contract
//!
//! [`TtlStore::put_if_absent`] must be atomic per key: when two replicas
//! race on the same nonce, exactly one may observe an insert. Backends that
//! cannot provide this across processes (the file store) are only safe for
//! single-replica deployments and say so in their documentation.

use std::time::{Duration, Instant};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

/// Errors raised by store backends.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The backing file could not be read or written.
    #[error("store io error: {0}")]
    Io(#[from] std::io::Error),
    /// A persisted entry could not be encoded or decoded.
    #[error("store serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    /// The shared cache backend failed.
    #[error("store backend error: {0}")]
    Backend(String),
}

/// A key set with per-key time-to-live.
///
/// Keys carry no values; membership within the TTL window is the only
/// signal. Entries expire passively, there is no explicit deletion path.
#[async_trait::async_trait]
pub trait TtlStore: Send + Sync {
    /// Returns whether `key` is present and unexpired.
    async fn contains(&self, key: &str) -> Result<bool, StoreError>;

    /// Records `key` for `ttl`, overwriting any previous expiry.
    async fn put(&self, key: &str, ttl: Duration) -> Result<(), StoreError>;

    /// Records `key` for `ttl` only if absent or expired.
    ///
    /// Returns `true` when this call inserted the key. Must be atomic per
    /// key on multi-replica backends (see module docs).
    async fn put_if_absent(&self, key: &str, ttl: Duration) -> Result<bool, StoreError>;
}

/// In-process [`TtlStore`] over a concurrent map.
///
/// The reference backend: correct for a single process, gone on restart.
/// Expired entries are dropped lazily on access.
#[derive(Debug, Default)]
pub struct MemoryTtlStore {
    entries: DashMap<String, Instant>,
}

impl MemoryTtlStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl TtlStore for MemoryTtlStore {
    async fn contains(&self, key: &str) -> Result<bool, StoreError> {
        if let Some(expires_at) = self.entries.get(key).map(|e| *e.value()) {
            if expires_at > Instant::now() {
                return Ok(true);
            }
            self.entries.remove(key);
        }
        Ok(false)
    }

    async fn put(&self, key: &str, ttl: Duration) -> Result<(), StoreError> {
        self.entries.insert(key.to_owned(), Instant::now() + ttl);
        Ok(())
    }

    async fn put_if_absent(&self, key: &str, ttl: Duration) -> Result<bool, StoreError> {
        // The entry guard holds the shard lock, making check-and-set atomic.
        match self.entries.entry(key.to_owned()) {
            Entry::Occupied(mut occupied) => {
                if *occupied.get() > Instant::now() {
                    Ok(false)
                } else {
                    occupied.insert(Instant::now() + ttl);
                    Ok(true)
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(Instant::now() + ttl);
                Ok(true)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_if_absent_inserts_once() {
        let store = MemoryTtlStore::new();
        assert!(store.put_if_absent("0xabc", Duration::from_secs(60)).await.unwrap());
        assert!(!store.put_if_absent("0xabc", Duration::from_secs(60)).await.unwrap());
        assert!(store.contains("0xabc").await.unwrap());
    }

    #[tokio::test]
    async fn entries_expire() {
        let store = MemoryTtlStore::new();
        store.put("k", Duration::from_millis(10)).await.unwrap();
        assert!(store.contains("k").await.unwrap());
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(!store.contains("k").await.unwrap());
        // Expired entries may be re-inserted.
        assert!(store.put_if_absent("k", Duration::from_secs(60)).await.unwrap());
    }

    #[tokio::test]
    async fn keys_are_independent() {
        let store = MemoryTtlStore::new();
        store.put("a", Duration::from_secs(60)).await.unwrap();
        assert!(!store.contains("b").await.unwrap());
    }
}
