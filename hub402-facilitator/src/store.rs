//! Durable TTL store backends.
//!
//! Two backends implement the [`TtlStore`] contract, selected by
//! configuration:
//!
//! - [`FileTtlStore`] persists entries as JSON under the store directory.
//!   Check-and-set is atomic only within one process, so this backend is
//!   **safe for single-replica deployments only**.
//! - [`RedisTtlStore`] keeps entries in a shared Redis, using `SET PX NX`
//!   so check-and-set stays atomic across facilitator replicas.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, SystemTime};

use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use serde::{Deserialize, Serialize};

use hub402::store::{StoreError, TtlStore};

#[derive(Serialize, Deserialize)]
struct Entry {
    key: String,
    expires_at: u64,
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}

fn ttl_ms(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX)
}

/// JSON-file-backed TTL store. Single replica only; see module docs.
#[derive(Debug)]
pub struct FileTtlStore {
    path: PathBuf,
    entries: Mutex<HashMap<String, u64>>,
}

impl FileTtlStore {
    /// Opens (or creates) the store file `<dir>/<name>.json`, loading any
    /// surviving entries.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the directory cannot be created or an
    /// existing file cannot be read or parsed.
    pub fn open(dir: &Path, name: &str) -> Result<Self, StoreError> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(format!("{name}.json"));
        let mut entries = HashMap::new();
        if path.exists() {
            let raw = std::fs::read_to_string(&path)?;
            if !raw.is_empty() {
                for entry in serde_json::from_str::<Vec<Entry>>(&raw)? {
                    entries.insert(entry.key, entry.expires_at);
                }
            }
        }
        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    fn persist(&self, entries: &HashMap<String, u64>) -> Result<(), StoreError> {
        let list: Vec<Entry> = entries
            .iter()
            .map(|(key, expires_at)| Entry {
                key: key.clone(),
                expires_at: *expires_at,
            })
            .collect();
        std::fs::write(&self.path, serde_json::to_vec(&list)?)?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl TtlStore for FileTtlStore {
    async fn contains(&self, key: &str) -> Result<bool, StoreError> {
        let mut entries = self.entries.lock().expect("file store lock poisoned");
        match entries.get(key) {
            Some(expires_at) if *expires_at > now_ms() => Ok(true),
            Some(_) => {
                entries.remove(key);
                self.persist(&entries)?;
                Ok(false)
            }
            None => Ok(false),
        }
    }

    async fn put(&self, key: &str, ttl: Duration) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().expect("file store lock poisoned");
        entries.insert(key.to_owned(), now_ms().saturating_add(ttl_ms(ttl)));
        self.persist(&entries)
    }

    async fn put_if_absent(&self, key: &str, ttl: Duration) -> Result<bool, StoreError> {
        let mut entries = self.entries.lock().expect("file store lock poisoned");
        if entries.get(key).is_some_and(|expires_at| *expires_at > now_ms()) {
            return Ok(false);
        }
        entries.insert(key.to_owned(), now_ms().saturating_add(ttl_ms(ttl)));
        self.persist(&entries)?;
        Ok(true)
    }
}

/// Redis-backed TTL store safe for multi-replica deployments.
pub struct RedisTtlStore {
    conn: ConnectionManager,
    prefix: String,
}

impl std::fmt::Debug for RedisTtlStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisTtlStore")
            .field("prefix", &self.prefix)
            .finish_non_exhaustive()
    }
}

impl RedisTtlStore {
    /// Connects to Redis and namespaces all keys under `prefix`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] when the connection cannot be
    /// established.
    pub async fn connect(url: &str, prefix: &str) -> Result<Self, StoreError> {
        let client =
            redis::Client::open(url).map_err(|e| StoreError::Backend(e.to_string()))?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(Self {
            conn,
            prefix: prefix.to_owned(),
        })
    }

    fn key(&self, key: &str) -> String {
        format!("{}:{key}", self.prefix)
    }
}

#[async_trait::async_trait]
impl TtlStore for RedisTtlStore {
    async fn contains(&self, key: &str) -> Result<bool, StoreError> {
        let exists: bool = self
            .conn
            .clone()
            .exists(self.key(key))
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(exists)
    }

    async fn put(&self, key: &str, ttl: Duration) -> Result<(), StoreError> {
        redis::cmd("SET")
            .arg(self.key(key))
            .arg("1")
            .arg("PX")
            .arg(ttl_ms(ttl))
            .query_async::<_, ()>(&mut self.conn.clone())
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(())
    }

    async fn put_if_absent(&self, key: &str, ttl: Duration) -> Result<bool, StoreError> {
        // SET .. PX .. NX answers OK on insert and Nil when the key lives,
        // which is the cross-replica atomic check-and-set.
        let reply: Option<String> = redis::cmd("SET")
            .arg(self.key(key))
            .arg("1")
            .arg("PX")
            .arg(ttl_ms(ttl))
            .arg("NX")
            .query_async(&mut self.conn.clone())
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(reply.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn file_store_checks_and_sets() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileTtlStore::open(dir.path(), "nonces").unwrap();
        assert!(store.put_if_absent("0xabc", Duration::from_secs(60)).await.unwrap());
        assert!(!store.put_if_absent("0xabc", Duration::from_secs(60)).await.unwrap());
        assert!(store.contains("0xabc").await.unwrap());
        assert!(!store.contains("other").await.unwrap());
    }

    #[tokio::test]
    async fn file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = FileTtlStore::open(dir.path(), "settlements").unwrap();
            store.put("deadbeef", Duration::from_secs(600)).await.unwrap();
        }
        let reopened = FileTtlStore::open(dir.path(), "settlements").unwrap();
        assert!(reopened.contains("deadbeef").await.unwrap());
    }

    #[tokio::test]
    async fn file_store_expires_entries() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileTtlStore::open(dir.path(), "nonces").unwrap();
        store.put("short", Duration::from_millis(10)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(!store.contains("short").await.unwrap());
        assert!(store.put_if_absent("short", Duration::from_secs(60)).await.unwrap());
    }

    #[tokio::test]
    async fn stores_are_isolated_by_name() {
        let dir = tempfile::tempdir().unwrap();
        let nonces = FileTtlStore::open(dir.path(), "nonces").unwrap();
        let settlements = FileTtlStore::open(dir.path(), "settlements").unwrap();
        nonces.put("k", Duration::from_secs(60)).await.unwrap();
        assert!(!settlements.contains("k").await.unwrap());
    }
}
