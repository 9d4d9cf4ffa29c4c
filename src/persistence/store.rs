//! The `MapStore` capability implemented by every backing technology.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};

use super::error::StoreError;
use super::types::{AccessLevel, StoreProperties};

/// Read-through / write-through bridge between one named map and its backing resource.
///
/// The cache runtime calls these methods concurrently from many tasks, so
/// implementations must be safe for concurrent use with distinct keys.
/// Used as `Arc<dyn MapStore>`.
#[async_trait]
pub trait MapStore: Send + Sync {
    /// Binds the adapter to the resource named after `map_name`, checks that the
    /// resource exists and grants the configured access level.
    ///
    /// Called once before any other operation. A missing resource is a
    /// configuration error and leaves the adapter read-only.
    async fn initialize(&self, map_name: &str, properties: &StoreProperties)
    -> Result<(), StoreError>;

    /// Fetches a single value. `Ok(None)` when the key has no backing value.
    async fn load(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Fetches many values. Keys without a backing value are omitted from the result.
    async fn load_all(&self, keys: &[String]) -> Result<HashMap<String, String>, StoreError> {
        let mut result = HashMap::with_capacity(keys.len());
        for key in keys {
            if let Some(value) = self.load(key).await? {
                result.insert(key.clone(), value);
            }
        }
        Ok(result)
    }

    /// Enumerates every stored key for eager preloading.
    ///
    /// `Ok(None)` means the adapter cannot do this cheaply, which callers must
    /// treat as "no preload" rather than "empty store".
    async fn load_all_keys(&self) -> Result<Option<HashSet<String>>, StoreError> {
        Ok(None)
    }

    /// Upserts a single entry. Dropped with a warning on a read-only adapter.
    async fn store(&self, key: &str, value: &str) -> Result<(), StoreError>;

    /// Upserts many entries, attempting every entry even when some fail.
    async fn store_all(&self, entries: &HashMap<String, String>) -> Result<(), StoreError> {
        let mut failures = Vec::new();
        for (key, value) in entries {
            if let Err(e) = self.store(key, value).await {
                failures.push((key.clone(), e.to_string()));
            }
        }
        batch_outcome("storeAll", self.resource_name(), failures)
    }

    /// Removes a single entry. Absent keys are not an error.
    async fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// Removes many entries, attempting every key even when some fail.
    async fn delete_all(&self, keys: &[String]) -> Result<(), StoreError> {
        let mut failures = Vec::new();
        for key in keys {
            if let Err(e) = self.delete(key).await {
                failures.push((key.clone(), e.to_string()));
            }
        }
        batch_outcome("deleteAll", self.resource_name(), failures)
    }

    /// Releases the client handle. Never fails; problems are logged.
    async fn teardown(&self);

    fn access_level(&self) -> AccessLevel;

    /// The bound resource identifier, `<unbound>` before `initialize`.
    fn resource_name(&self) -> String;
}

/// Folds per-key failures of a batch mutation into a single result.
pub fn batch_outcome(
    op: &'static str,
    resource: String,
    failures: Vec<(String, String)>,
) -> Result<(), StoreError> {
    if failures.is_empty() {
        return Ok(());
    }
    tracing::error!(
        "{} on [{}] failed for {} key(s)",
        op,
        resource,
        failures.len()
    );
    Err(StoreError::Batch {
        op,
        resource,
        failures,
    })
}
