//! Buffer polygon persistence
//!
//! Artifacts are written whole: the file store serializes to a temp file in
//! the target directory and renames it over `{route_id}.json`, so readers see
//! either the previous artifact or the new one.

use crate::domain::route::BufferPolygon;
use crate::domain::types::RouteId;
use anyhow::Context;
use async_trait::async_trait;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Store for immutable buffer artifacts
#[async_trait]
pub trait BufferStore: Send + Sync {
    /// Persist `buffer`, replacing any artifact for the same route
    async fn save(&self, buffer: &BufferPolygon) -> anyhow::Result<()>;

    /// Load the artifact for `route_id`, if any
    async fn load(&self, route_id: &RouteId) -> anyhow::Result<Option<BufferPolygon>>;
}

/// One JSON file per route under a directory
pub struct FileBufferStore {
    dir: PathBuf,
}

impl FileBufferStore {
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        Self { dir: dir.as_ref().to_path_buf() }
    }

    /// One file per route id, distinct ids never sharing a file
    ///
    /// Plain ids keep their name. Anything else (including ids that could
    /// leave the directory) is hex-encoded behind a `~`, which plain names
    /// never contain.
    fn path_for(&self, route_id: &RouteId) -> PathBuf {
        let id = route_id.0.as_str();
        let plain = !id.is_empty()
            && id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        let name = if plain { id.to_string() } else { format!("~{}", hex::encode(id)) };
        self.dir.join(format!("{}.json", name))
    }
}

#[async_trait]
impl BufferStore for FileBufferStore {
    async fn save(&self, buffer: &BufferPolygon) -> anyhow::Result<()> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("Failed to create buffer dir {}", self.dir.display()))?;

        let target = self.path_for(&buffer.route_id);
        let tmp = target.with_extension("json.tmp");
        let json = serde_json::to_vec(buffer).context("Failed to serialize buffer")?;

        tokio::fs::write(&tmp, &json)
            .await
            .with_context(|| format!("Failed to write {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &target)
            .await
            .with_context(|| format!("Failed to move buffer into {}", target.display()))?;

        debug!(route_id = %buffer.route_id, file = %target.display(), bytes = %json.len(), "buffer_saved");
        Ok(())
    }

    async fn load(&self, route_id: &RouteId) -> anyhow::Result<Option<BufferPolygon>> {
        let path = self.path_for(route_id);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read {}", path.display()))
            }
        };
        let buffer = serde_json::from_slice(&bytes)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        Ok(Some(buffer))
    }
}

/// In-process store for tests and replay
#[derive(Default)]
pub struct MemoryBufferStore {
    buffers: Mutex<FxHashMap<RouteId, BufferPolygon>>,
}

impl MemoryBufferStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.buffers.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.lock().is_empty()
    }
}

#[async_trait]
impl BufferStore for MemoryBufferStore {
    async fn save(&self, buffer: &BufferPolygon) -> anyhow::Result<()> {
        self.buffers.lock().insert(buffer.route_id.clone(), buffer.clone());
        Ok(())
    }

    async fn load(&self, route_id: &RouteId) -> anyhow::Result<Option<BufferPolygon>> {
        Ok(self.buffers.lock().get(route_id).cloned())
    }
}
