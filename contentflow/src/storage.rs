//! Artifact storage interface and implementations.
//!
//! Paths are structured as `tenant/run/step/filename`. Writes are
//! content-addressed by digest: a duplicate write of identical content is an
//! idempotent no-op.

use crate::errors::ContentflowError;
use crate::state::StepId;
use crate::validation::content_hash;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::PathBuf;
use uuid::Uuid;

/// Builds the canonical artifact path.
#[must_use]
pub fn artifact_path(tenant: &str, run_id: Uuid, step: StepId, filename: &str) -> String {
    format!("{tenant}/{run_id}/{step}/{filename}")
}

/// Durable store for step output artifacts.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Stores an artifact and returns its path. Writing identical content to
    /// an existing path is a no-op.
    async fn put(
        &self,
        tenant: &str,
        run_id: Uuid,
        step: StepId,
        filename: &str,
        bytes: &[u8],
    ) -> Result<String, ContentflowError>;

    /// Lists all artifact paths for a run.
    async fn list(&self, tenant: &str, run_id: Uuid) -> Result<Vec<String>, ContentflowError>;
}

/// In-memory artifact store for tests and projections.
#[derive(Debug, Default)]
pub struct MemoryArtifactStore {
    entries: RwLock<HashMap<String, (String, Vec<u8>)>>,
}

impl MemoryArtifactStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the stored bytes at a path, if present.
    #[must_use]
    pub fn get(&self, path: &str) -> Option<Vec<u8>> {
        self.entries.read().get(path).map(|(_, bytes)| bytes.clone())
    }

    /// Number of stored artifacts.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Returns true if the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

#[async_trait]
impl ArtifactStore for MemoryArtifactStore {
    async fn put(
        &self,
        tenant: &str,
        run_id: Uuid,
        step: StepId,
        filename: &str,
        bytes: &[u8],
    ) -> Result<String, ContentflowError> {
        let path = artifact_path(tenant, run_id, step, filename);
        let digest = content_hash(&String::from_utf8_lossy(bytes));

        let mut entries = self.entries.write();
        if let Some((existing, _)) = entries.get(&path) {
            if *existing == digest {
                tracing::debug!(path = %path, "Duplicate artifact write skipped");
                return Ok(path);
            }
        }
        entries.insert(path.clone(), (digest, bytes.to_vec()));
        Ok(path)
    }

    async fn list(&self, tenant: &str, run_id: Uuid) -> Result<Vec<String>, ContentflowError> {
        let prefix = format!("{tenant}/{run_id}/");
        let mut paths: Vec<String> = self
            .entries
            .read()
            .keys()
            .filter(|p| p.starts_with(&prefix))
            .cloned()
            .collect();
        paths.sort();
        Ok(paths)
    }
}

/// Filesystem-backed artifact store rooted at a directory.
#[derive(Debug, Clone)]
pub struct FsArtifactStore {
    root: PathBuf,
}

impl FsArtifactStore {
    /// Creates a store rooted at `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl ArtifactStore for FsArtifactStore {
    async fn put(
        &self,
        tenant: &str,
        run_id: Uuid,
        step: StepId,
        filename: &str,
        bytes: &[u8],
    ) -> Result<String, ContentflowError> {
        let path = artifact_path(tenant, run_id, step, filename);
        let full = self.root.join(&path);

        if let Ok(existing) = tokio::fs::read(&full).await {
            if existing == bytes {
                tracing::debug!(path = %path, "Duplicate artifact write skipped");
                return Ok(path);
            }
        }

        if let Some(parent) = full.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&full, bytes).await?;
        Ok(path)
    }

    async fn list(&self, tenant: &str, run_id: Uuid) -> Result<Vec<String>, ContentflowError> {
        let run_dir = self.root.join(tenant).join(run_id.to_string());
        let mut paths = Vec::new();

        let mut step_dirs = match tokio::fs::read_dir(&run_dir).await {
            Ok(rd) => rd,
            Err(_) => return Ok(paths),
        };
        while let Some(step_entry) = step_dirs.next_entry().await? {
            let step_name = step_entry.file_name().to_string_lossy().to_string();
            let mut files = tokio::fs::read_dir(step_entry.path()).await?;
            while let Some(file_entry) = files.next_entry().await? {
                let file_name = file_entry.file_name().to_string_lossy().to_string();
                paths.push(format!("{tenant}/{run_id}/{step_name}/{file_name}"));
            }
        }
        paths.sort();
        Ok(paths)
    }
}
