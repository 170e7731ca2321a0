// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Source document loading
//!
//! Reads the supported files of a directory (non-recursive, sorted by file
//! name) and returns their normalized text. PDF text is extracted with
//! `pdf-extract` on the blocking pool; a document that fails to parse (or
//! panics the parser) is skipped with a reason instead of failing the run.

use crate::rag::chunker::normalize_text;
use crate::rag::errors::RagError;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentKind {
    Pdf,
    Text,
    Markdown,
}

impl DocumentKind {
    /// Kind for a file extension, `None` if unsupported
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "pdf" => Some(DocumentKind::Pdf),
            "txt" => Some(DocumentKind::Text),
            "md" | "markdown" => Some(DocumentKind::Markdown),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LoadedDocument {
    /// File name, used as the chunk source
    pub source: String,
    pub path: PathBuf,
    pub kind: DocumentKind,
    /// Normalized text
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SkippedDocument {
    pub path: PathBuf,
    pub reason: String,
}

#[derive(Debug, Default)]
pub struct LoadOutcome {
    pub documents: Vec<LoadedDocument>,
    pub skipped: Vec<SkippedDocument>,
}

/// Load every supported document in `dir`
///
/// # Errors
///
/// `RagError::IngestionFailure` if the directory itself cannot be read.
/// Problems with individual files end up in [`LoadOutcome::skipped`].
pub async fn load_directory(dir: &Path) -> Result<LoadOutcome, RagError> {
    let ingestion_failure = |reason: String| RagError::IngestionFailure {
        path: dir.display().to_string(),
        reason,
    };

    let mut read_dir = tokio::fs::read_dir(dir)
        .await
        .map_err(|e| ingestion_failure(e.to_string()))?;

    let mut paths = Vec::new();
    while let Some(entry) = read_dir
        .next_entry()
        .await
        .map_err(|e| ingestion_failure(e.to_string()))?
    {
        let path = entry.path();
        let is_file = entry.file_type().await.map(|t| t.is_file()).unwrap_or(false);
        if is_file && DocumentKind::from_path(&path).is_some() {
            paths.push(path);
        } else {
            debug!("Ignoring {}", path.display());
        }
    }
    paths.sort();

    info!("Found {} supported documents in {}", paths.len(), dir.display());

    let mut outcome = LoadOutcome::default();
    for path in paths {
        match load_document(&path).await {
            Ok(document) => outcome.documents.push(document),
            Err(e) => {
                warn!("Skipping {}: {}", path.display(), e);
                outcome.skipped.push(SkippedDocument {
                    path,
                    reason: e.to_string(),
                });
            }
        }
    }

    Ok(outcome)
}

/// Load and normalize a single document
pub async fn load_document(path: &Path) -> Result<LoadedDocument, RagError> {
    let kind = DocumentKind::from_path(path).ok_or_else(|| RagError::IngestionFailure {
        path: path.display().to_string(),
        reason: "unsupported file type".to_string(),
    })?;

    let raw = match kind {
        DocumentKind::Pdf => extract_pdf_text(path).await?,
        DocumentKind::Text | DocumentKind::Markdown => tokio::fs::read_to_string(path)
            .await
            .map_err(|e| RagError::IngestionFailure {
                path: path.display().to_string(),
                reason: e.to_string(),
            })?,
    };

    let text = normalize_text(&raw);
    if text.is_empty() {
        return Err(RagError::IngestionFailure {
            path: path.display().to_string(),
            reason: "no extractable text".to_string(),
        });
    }

    let source = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());

    debug!("Loaded {} ({} chars)", source, text.chars().count());

    Ok(LoadedDocument {
        source,
        path: path.to_path_buf(),
        kind,
        text,
    })
}

async fn extract_pdf_text(path: &Path) -> Result<String, RagError> {
    let failure = |reason: String| RagError::IngestionFailure {
        path: path.display().to_string(),
        reason,
    };

    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| failure(e.to_string()))?;

    tokio::task::spawn_blocking(move || pdf_extract::extract_text_from_mem(&bytes))
        .await
        .map_err(|e| failure(format!("PDF parser crashed: {}", e)))?
        .map_err(|e| failure(format!("PDF parse error: {:?}", e)))
}
