// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Shared, lazily loaded vector index
//!
//! The persisted index is read once, on first use, and the same
//! `Arc<VectorIndex>` is handed to every chat session.
//!
//! ## Features
//!
//! - **Lazy load**: nothing is read until a session needs the index
//! - **Failures are not cached**: the next caller retries the load
//! - **Reload**: swaps in a freshly ingested index; sessions that already
//!   hold the previous `Arc` keep using it
//!
//! ## Usage
//!
//! ```rust,ignore
//! let cache = IndexCache::new("vectorstore/db_index");
//! let index = cache.get().await?;
//! let hits = index.search(&query, 2)?;
//! ```

use crate::rag::errors::RagError;
use crate::vector::VectorIndex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

pub struct IndexCache {
    dir: PathBuf,
    current: RwLock<Option<Arc<VectorIndex>>>,
}

impl IndexCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            current: RwLock::new(None),
        }
    }

    /// Cache pre-populated with an in-memory index
    pub fn with_index(dir: impl Into<PathBuf>, index: VectorIndex) -> Self {
        Self {
            dir: dir.into(),
            current: RwLock::new(Some(Arc::new(index))),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Cached index, loading it from disk on first use
    pub async fn get(&self) -> Result<Arc<VectorIndex>, RagError> {
        if let Some(index) = self.current.read().await.as_ref() {
            return Ok(index.clone());
        }

        let mut current = self.current.write().await;
        // Another caller may have loaded it while we waited for the lock
        if let Some(index) = current.as_ref() {
            return Ok(index.clone());
        }

        let index = Arc::new(load_blocking(self.dir.clone()).await?);
        *current = Some(index.clone());
        Ok(index)
    }

    /// Re-read the index from disk and replace the cached one
    ///
    /// On failure the previously cached index stays in place.
    pub async fn reload(&self) -> Result<Arc<VectorIndex>, RagError> {
        let index = Arc::new(load_blocking(self.dir.clone()).await?);
        *self.current.write().await = Some(index.clone());
        info!("Vector index reloaded ({} entries)", index.len());
        Ok(index)
    }

    /// Entry count of the cached index, `None` if not loaded yet
    pub async fn loaded_entries(&self) -> Option<usize> {
        self.current.read().await.as_ref().map(|index| index.len())
    }
}

async fn load_blocking(dir: PathBuf) -> Result<VectorIndex, RagError> {
    tokio::task::spawn_blocking(move || VectorIndex::load(&dir))
        .await
        .map_err(|e| RagError::IndexUnavailable(format!("Index loader panicked: {}", e)))?
}
