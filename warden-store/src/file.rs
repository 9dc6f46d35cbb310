//! JSON file store.
//!
//! Everything lives in a single document:
//!
//! ```json
//! { "version": 1, "positions": { "ETHUSDTM": { ... } }, "stops": { "ETHUSDTM": { ... } } }
//! ```
//!
//! Every write replaces the whole file through a temp file and a rename, so
//! a crash mid-write leaves either the old or the new document, never a
//! torn one. The temp file is synced before the rename and the directory
//! after it, so a renamed document survives power loss too.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::debug;

use warden_domain::{Position, Symbol};
use warden_exec::StopStateSnapshot;

use crate::error::{StoreError, StoreResult};
use crate::repository::{PositionRepository, StopStateRepository};

const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct StateDocument {
    version: u32,
    #[serde(default)]
    positions: BTreeMap<String, Position>,
    #[serde(default)]
    stops: BTreeMap<String, StopStateSnapshot>,
}

impl Default for StateDocument {
    fn default() -> Self {
        Self {
            version: FORMAT_VERSION,
            positions: BTreeMap::new(),
            stops: BTreeMap::new(),
        }
    }
}

/// File-backed store.
pub struct JsonFileStore {
    path: PathBuf,
    /// Serializes read-modify-write cycles
    lock: Mutex<()>,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_document(&self) -> StoreResult<StateDocument> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(StateDocument::default());
            },
            Err(e) => return Err(StoreError::io(&self.path, e)),
        };

        let document: StateDocument = serde_json::from_slice(&bytes)?;
        if document.version != FORMAT_VERSION {
            return Err(StoreError::UnsupportedVersion {
                found: document.version,
                expected: FORMAT_VERSION,
            });
        }
        Ok(document)
    }

    async fn write_document(&self, document: &StateDocument) -> StoreResult<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StoreError::io(parent, e))?;
        }

        let bytes = serde_json::to_vec_pretty(document)?;
        let tmp = self.path.with_extension("json.tmp");

        let mut file = tokio::fs::File::create(&tmp)
            .await
            .map_err(|e| StoreError::io(&tmp, e))?;
        file.write_all(&bytes).await.map_err(|e| StoreError::io(&tmp, e))?;
        file.sync_all().await.map_err(|e| StoreError::io(&tmp, e))?;
        drop(file);

        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| StoreError::io(&self.path, e))?;
        self.sync_parent().await?;

        debug!(
            path = %self.path.display(),
            positions = document.positions.len(),
            stops = document.stops.len(),
            "State file written"
        );
        Ok(())
    }

    #[cfg(unix)]
    async fn sync_parent(&self) -> StoreResult<()> {
        let parent = match self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            Some(parent) => parent,
            None => Path::new("."),
        };
        let dir = tokio::fs::File::open(parent)
            .await
            .map_err(|e| StoreError::io(parent, e))?;
        dir.sync_all().await.map_err(|e| StoreError::io(parent, e))
    }

    #[cfg(not(unix))]
    async fn sync_parent(&self) -> StoreResult<()> {
        Ok(())
    }

    /// Read, mutate and write back under the lock.
    ///
    /// The closure returns whether anything changed; unchanged documents are
    /// not rewritten.
    async fn update<F>(&self, mutate: F) -> StoreResult<()>
    where
        F: FnOnce(&mut StateDocument) -> bool + Send,
    {
        let _guard = self.lock.lock().await;
        let mut document = self.read_document().await?;
        if mutate(&mut document) {
            self.write_document(&document).await?;
        }
        Ok(())
    }

    async fn read(&self) -> StoreResult<StateDocument> {
        let _guard = self.lock.lock().await;
        self.read_document().await
    }
}

#[async_trait]
impl StopStateRepository for JsonFileStore {
    async fn save(&self, snapshot: &StopStateSnapshot) -> Result<(), StoreError> {
        self.update(|doc| {
            doc.stops.insert(snapshot.symbol.as_pair(), snapshot.clone());
            true
        })
        .await
    }

    async fn load(&self, symbol: &Symbol) -> Result<Option<StopStateSnapshot>, StoreError> {
        Ok(self.read().await?.stops.remove(&symbol.as_pair()))
    }

    async fn load_all(&self) -> Result<Vec<StopStateSnapshot>, StoreError> {
        Ok(self.read().await?.stops.into_values().collect())
    }

    async fn delete(&self, symbol: &Symbol) -> Result<(), StoreError> {
        let key = symbol.as_pair();
        self.update(|doc| doc.stops.remove(&key).is_some()).await
    }
}

#[async_trait]
impl PositionRepository for JsonFileStore {
    async fn save_position(&self, position: &Position) -> Result<(), StoreError> {
        self.update(|doc| {
            doc.positions.insert(position.symbol.as_pair(), position.clone());
            true
        })
        .await
    }

    async fn find_position(&self, symbol: &Symbol) -> Result<Option<Position>, StoreError> {
        Ok(self.read().await?.positions.remove(&symbol.as_pair()))
    }

    async fn find_positions(&self) -> Result<Vec<Position>, StoreError> {
        Ok(self.read().await?.positions.into_values().collect())
    }

    async fn delete_position(&self, symbol: &Symbol) -> Result<(), StoreError> {
        let key = symbol.as_pair();
        self.update(|doc| doc.positions.remove(&key).is_some()).await
    }
}
