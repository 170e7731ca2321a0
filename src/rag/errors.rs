// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Error types for ingestion, retrieval and answer generation
//!
//! Every boundary of the QA pipeline returns `Result<_, RagError>`:
//! - Index errors (missing, corrupt, incompatible with the embedder)
//! - Generator errors (model failed to load, generation timed out)
//! - Query validation errors
//! - Ingestion errors (surfaced as warnings by the ingestor)

use thiserror::Error;

/// Generic reply sent to chat users when a message cannot be answered.
/// Error details only go to the logs.
pub const GENERIC_USER_ERROR: &str =
    "An error occurred while processing your request. Please try again.";

/// Errors produced by the retrieval-augmented QA pipeline
#[derive(Error, Debug)]
pub enum RagError {
    /// Vector index missing, corrupt or not loadable
    #[error("Vector index unavailable: {0}")]
    IndexUnavailable(String),

    /// Language model failed to load
    #[error("Answer generator unavailable: {0}")]
    GeneratorUnavailable(String),

    /// Generation exceeded its time budget
    #[error("Answer generation timed out after {duration_sec}s")]
    GeneratorTimeout { duration_sec: u64 },

    /// Empty or malformed user query
    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    /// Source directory could not be ingested
    #[error("Ingestion failed for {path}: {reason}")]
    IngestionFailure { path: String, reason: String },

    /// Embedding model failed on an input
    #[error("Embedding failed: {0}")]
    Embedding(String),

    /// Generation failed after the model was loaded
    #[error("Generation failed: {0}")]
    Generation(String),

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Generic I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl RagError {
    /// Get error code for logging
    pub fn error_code(&self) -> &'static str {
        match self {
            RagError::IndexUnavailable(_) => "INDEX_UNAVAILABLE",
            RagError::GeneratorUnavailable(_) => "GENERATOR_UNAVAILABLE",
            RagError::GeneratorTimeout { .. } => "GENERATOR_TIMEOUT",
            RagError::InvalidQuery(_) => "INVALID_QUERY",
            RagError::IngestionFailure { .. } => "INGESTION_FAILURE",
            RagError::Embedding(_) => "EMBEDDING_FAILED",
            RagError::Generation(_) => "GENERATION_FAILED",
            RagError::Config(_) => "INVALID_CONFIG",
            RagError::Io(_) => "IO_ERROR",
        }
    }

    /// User-facing text for this error.
    ///
    /// Only query validation gets a specific message; everything else maps to
    /// [`GENERIC_USER_ERROR`] so internal details never reach the chat.
    pub fn user_message(&self) -> String {
        match self {
            RagError::InvalidQuery(_) => "Please enter a question.".to_string(),
            _ => GENERIC_USER_ERROR.to_string(),
        }
    }

    /// Check if the same request may succeed when sent again
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RagError::GeneratorTimeout { .. } | RagError::Generation(_)
        )
    }
}
