//! Lookup from an external entry id to a [`CircuitIdentity`].

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;

use crate::error::{ForgeError, Result};
use crate::identity::CircuitIdentity;

/// Resolves entry ids to circuits. `Ok(None)` means the id is unknown.
#[async_trait]
pub trait CircuitStore: Send + Sync {
    async fn lookup(&self, id: &str) -> Result<Option<CircuitIdentity>>;

    /// Like [`lookup`](Self::lookup), but an unknown id is a
    /// [`ForgeError::CircuitNotFound`].
    async fn require(&self, id: &str) -> Result<CircuitIdentity> {
        self.lookup(id)
            .await?
            .ok_or_else(|| ForgeError::CircuitNotFound(id.to_string()))
    }
}

/// In-memory store.
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    entries: HashMap<String, CircuitIdentity>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id: impl Into<String>, identity: CircuitIdentity) {
        self.entries.insert(id.into(), identity);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl FromIterator<(String, CircuitIdentity)> for MemoryStore {
    fn from_iter<I: IntoIterator<Item = (String, CircuitIdentity)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

#[async_trait]
impl CircuitStore for MemoryStore {
    async fn lookup(&self, id: &str) -> Result<Option<CircuitIdentity>> {
        Ok(self.entries.get(id).cloned())
    }
}

/// Store backed by a JSON object file, read once at open:
///
/// ```json
/// { "42": { "slug": "adder", "name": "Adder" } }
/// ```
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    inner: MemoryStore,
}

impl JsonFileStore {
    pub fn open(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| ForgeError::ConfigNotFound {
            path: path.to_path_buf(),
            source: e,
        })?;
        let entries: HashMap<String, CircuitIdentity> =
            serde_json::from_str(&contents).map_err(|e| ForgeError::ConfigParse {
                path: path.to_path_buf(),
                source: e,
            })?;
        tracing::debug!("loaded {} entries from {}", entries.len(), path.display());
        Ok(Self {
            inner: entries.into_iter().collect(),
        })
    }
}

#[async_trait]
impl CircuitStore for JsonFileStore {
    async fn lookup(&self, id: &str) -> Result<Option<CircuitIdentity>> {
        self.inner.lookup(id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_store() {
        let mut store = MemoryStore::new();
        store.insert("1", CircuitIdentity::new("adder", "Adder").unwrap());
        assert_eq!(store.len(), 1);

        let found = store.lookup("1").await.unwrap().unwrap();
        assert_eq!(found.slug(), "adder");
        assert!(store.lookup("2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_require_unknown_id() {
        let store: MemoryStore = [("1".to_string(), CircuitIdentity::new("adder", "Adder").unwrap())]
            .into_iter()
            .collect();
        assert_eq!(store.require("1").await.unwrap().slug(), "adder");
        assert!(matches!(
            store.require("404").await,
            Err(ForgeError::CircuitNotFound(id)) if id == "404"
        ));
    }

    #[tokio::test]
    async fn test_json_file_store() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("entries.json");
        std::fs::write(
            &path,
            r#"{ "7": { "slug": "adder", "name": "Adder" },
                 "8": { "slug": "mul", "name": "Multiplier" } }"#,
        )
        .unwrap();

        let store = JsonFileStore::open(&path).unwrap();
        assert_eq!(store.lookup("8").await.unwrap().unwrap().name(), "Multiplier");
        assert!(store.lookup("9").await.unwrap().is_none());
    }

    #[test]
    fn test_json_file_store_rejects_unsafe_slug() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("entries.json");
        std::fs::write(&path, r#"{ "1": { "slug": "../x", "name": "X" } }"#).unwrap();
        assert!(matches!(
            JsonFileStore::open(&path),
            Err(ForgeError::ConfigParse { .. })
        ));
    }

    #[test]
    fn test_json_file_store_missing() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            JsonFileStore::open(&dir.path().join("entries.json")),
            Err(ForgeError::ConfigNotFound { .. })
        ));
    }
}
