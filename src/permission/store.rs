//! Persistence of permission records.

use super::PermissionRecord;
use anyhow::{Context as _, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::{collections::BTreeMap, io, path::PathBuf};

/// Storage for permission records keyed by origin.
#[async_trait]
pub trait PermissionStore: Send + Sync {
    async fn get(&self, origin: &str) -> Result<Option<PermissionRecord>>;

    /// Inserts or replaces the record for its origin.
    async fn put(&self, record: PermissionRecord) -> Result<()>;
}

/// A store keeping records in memory only.
#[derive(Default)]
pub struct MemoryStore {
    records: Mutex<BTreeMap<String, PermissionRecord>>,
}

#[async_trait]
impl PermissionStore for MemoryStore {
    async fn get(&self, origin: &str) -> Result<Option<PermissionRecord>> {
        Ok(self.records.lock().get(origin).cloned())
    }

    async fn put(&self, record: PermissionRecord) -> Result<()> {
        self.records.lock().insert(record.origin.clone(), record);
        Ok(())
    }
}

/// A store keeping records in a JSON file, rewritten on every change.
pub struct JsonFileStore {
    path: PathBuf,
    records: tokio::sync::Mutex<BTreeMap<String, PermissionRecord>>,
}

impl JsonFileStore {
    /// Opens the store at the specified path. A missing file is an empty
    /// store.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let records = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice::<Vec<PermissionRecord>>(&bytes)
                .with_context(|| format!("invalid permission file {}", path.display()))?
                .into_iter()
                .map(|record| (record.origin.clone(), record))
                .collect(),
            Err(err) if err.kind() == io::ErrorKind::NotFound => BTreeMap::new(),
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("failed to read permission file {}", path.display()))
            }
        };
        tracing::debug!(path = %path.display(), count = records.len(), "loaded permissions");

        Ok(Self {
            path,
            records: tokio::sync::Mutex::new(records),
        })
    }
}

#[async_trait]
impl PermissionStore for JsonFileStore {
    async fn get(&self, origin: &str) -> Result<Option<PermissionRecord>> {
        Ok(self.records.lock().await.get(origin).cloned())
    }

    async fn put(&self, record: PermissionRecord) -> Result<()> {
        let mut records = self.records.lock().await;
        records.insert(record.origin.clone(), record);

        let json = serde_json::to_vec_pretty(&records.values().collect::<Vec<_>>())?;
        tokio::fs::write(&self.path, json)
            .await
            .with_context(|| format!("failed to write permission file {}", self.path.display()))
    }
}
