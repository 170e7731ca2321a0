// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Configuration for ingestion, retrieval, generation and the chat server
//!
//! Every tunable lives in [`RagConfig`]. Values come from `DOCQA_*`
//! environment variables (a `.env` file is loaded first by the binaries) and
//! fall back to the defaults below. CLI flags override individual fields.

use crate::rag::errors::RagError;
use serde::{Deserialize, Serialize};
use std::env;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// How chat sessions obtain a language model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum GeneratorMode {
    /// One model instance, generations serialized behind a lock
    Shared,
    /// A model instance is loaded for every chat session
    PerSession,
}

impl fmt::Display for GeneratorMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GeneratorMode::Shared => write!(f, "shared"),
            GeneratorMode::PerSession => write!(f, "per_session"),
        }
    }
}

impl FromStr for GeneratorMode {
    type Err = RagError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "shared" => Ok(GeneratorMode::Shared),
            "per_session" => Ok(GeneratorMode::PerSession),
            other => Err(RagError::Config(format!(
                "Unknown generator mode '{}' (expected 'shared' or 'per_session')",
                other
            ))),
        }
    }
}

/// Complete service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RagConfig {
    /// Number of chunks retrieved per question
    pub top_k: usize,

    /// Embedding model id; `"hashing"` selects the model-free hashing embedder
    pub embedding_model_id: String,
    pub embedding_model_path: PathBuf,
    pub embedding_tokenizer_path: PathBuf,
    /// Vector size of the hashing embedder
    pub hashing_dimensions: usize,

    pub generator_model_id: String,
    /// GGUF model file
    pub generator_model_path: PathBuf,
    pub max_new_tokens: usize,
    pub temperature: f32,
    /// llama.cpp context window in tokens
    pub context_size: u32,
    /// Layers offloaded to the GPU (0 = CPU only)
    pub gpu_layers: u32,
    pub generation_timeout_secs: u64,
    pub generator_mode: GeneratorMode,

    /// Directory scanned for documents at ingestion
    pub source_docs_path: PathBuf,
    /// Directory holding the persisted index
    pub index_storage_path: PathBuf,
    /// Chunk size in characters
    pub chunk_size: usize,
    /// Overlap between consecutive chunks in characters
    pub chunk_overlap: usize,
    pub embedding_batch_size: usize,

    /// Send tokens to the client while the answer is generated
    pub stream_answers: bool,
    /// Optional file replacing the built-in prompt template
    pub prompt_template_path: Option<PathBuf>,
    /// Sent once when a chat session starts
    pub welcome_message: String,
    pub bind_address: String,
    /// Longest accepted question in characters
    pub max_query_chars: usize,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            top_k: 2,
            embedding_model_id: "all-MiniLM-L6-v2".to_string(),
            embedding_model_path: PathBuf::from("./models/all-MiniLM-L6-v2-onnx/model.onnx"),
            embedding_tokenizer_path: PathBuf::from(
                "./models/all-MiniLM-L6-v2-onnx/tokenizer.json",
            ),
            hashing_dimensions: 512,
            generator_model_id: "recogna-nlp/bode-7b-alpaca-pt-br-gguf".to_string(),
            generator_model_path: PathBuf::from("./models/bode-7b-alpaca-pt-br.Q4_K_M.gguf"),
            max_new_tokens: 512,
            temperature: 0.5,
            context_size: 2048,
            gpu_layers: 0,
            generation_timeout_secs: 120,
            generator_mode: GeneratorMode::Shared,
            source_docs_path: PathBuf::from("data/"),
            index_storage_path: PathBuf::from("vectorstore/db_index"),
            chunk_size: 500,
            chunk_overlap: 50,
            embedding_batch_size: 32,
            stream_answers: true,
            prompt_template_path: None,
            welcome_message: "Olá! qual a sua pergunta?".to_string(),
            bind_address: "127.0.0.1:8000".to_string(),
            max_query_chars: 4096,
        }
    }
}

impl RagConfig {
    /// Load configuration from `DOCQA_*` environment variables
    pub fn from_env() -> Result<Self, RagError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build a configuration from an arbitrary key lookup
    ///
    /// Unset keys keep their defaults; set but unparsable values are errors.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, RagError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        let get = |name: &str| lookup(&format!("DOCQA_{}", name)).filter(|v| !v.is_empty());

        if let Some(v) = get("TOP_K") {
            config.top_k = parse_value("DOCQA_TOP_K", &v)?;
        }
        if let Some(v) = get("EMBEDDING_MODEL_ID") {
            config.embedding_model_id = v;
        }
        if let Some(v) = get("EMBEDDING_MODEL_PATH") {
            config.embedding_model_path = PathBuf::from(v);
        }
        if let Some(v) = get("EMBEDDING_TOKENIZER_PATH") {
            config.embedding_tokenizer_path = PathBuf::from(v);
        }
        if let Some(v) = get("HASHING_DIMENSIONS") {
            config.hashing_dimensions = parse_value("DOCQA_HASHING_DIMENSIONS", &v)?;
        }
        if let Some(v) = get("GENERATOR_MODEL_ID") {
            config.generator_model_id = v;
        }
        if let Some(v) = get("GENERATOR_MODEL_PATH") {
            config.generator_model_path = PathBuf::from(v);
        }
        if let Some(v) = get("MAX_NEW_TOKENS") {
            config.max_new_tokens = parse_value("DOCQA_MAX_NEW_TOKENS", &v)?;
        }
        if let Some(v) = get("TEMPERATURE") {
            config.temperature = parse_value("DOCQA_TEMPERATURE", &v)?;
        }
        if let Some(v) = get("CONTEXT_SIZE") {
            config.context_size = parse_value("DOCQA_CONTEXT_SIZE", &v)?;
        }
        if let Some(v) = get("GPU_LAYERS") {
            config.gpu_layers = parse_value("DOCQA_GPU_LAYERS", &v)?;
        }
        if let Some(v) = get("GENERATION_TIMEOUT_SECS") {
            config.generation_timeout_secs = parse_value("DOCQA_GENERATION_TIMEOUT_SECS", &v)?;
        }
        if let Some(v) = get("GENERATOR_MODE") {
            config.generator_mode = v.parse()?;
        }
        if let Some(v) = get("SOURCE_DOCS_PATH") {
            config.source_docs_path = PathBuf::from(v);
        }
        if let Some(v) = get("INDEX_STORAGE_PATH") {
            config.index_storage_path = PathBuf::from(v);
        }
        if let Some(v) = get("CHUNK_SIZE") {
            config.chunk_size = parse_value("DOCQA_CHUNK_SIZE", &v)?;
        }
        if let Some(v) = get("CHUNK_OVERLAP") {
            config.chunk_overlap = parse_value("DOCQA_CHUNK_OVERLAP", &v)?;
        }
        if let Some(v) = get("EMBEDDING_BATCH_SIZE") {
            config.embedding_batch_size = parse_value("DOCQA_EMBEDDING_BATCH_SIZE", &v)?;
        }
        if let Some(v) = get("STREAM_ANSWERS") {
            config.stream_answers = parse_bool("DOCQA_STREAM_ANSWERS", &v)?;
        }
        if let Some(v) = get("PROMPT_TEMPLATE_PATH") {
            config.prompt_template_path = Some(PathBuf::from(v));
        }
        if let Some(v) = get("WELCOME_MESSAGE") {
            config.welcome_message = v;
        }
        if let Some(v) = get("BIND_ADDRESS") {
            config.bind_address = v;
        }
        if let Some(v) = get("MAX_QUERY_CHARS") {
            config.max_query_chars = parse_value("DOCQA_MAX_QUERY_CHARS", &v)?;
        }

        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), RagError> {
        if self.top_k == 0 {
            return Err(RagError::Config("top_k must be greater than 0".to_string()));
        }
        if self.chunk_size == 0 {
            return Err(RagError::Config(
                "chunk_size must be greater than 0".to_string(),
            ));
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(RagError::Config(format!(
                "chunk_overlap ({}) must be smaller than chunk_size ({})",
                self.chunk_overlap, self.chunk_size
            )));
        }
        if self.embedding_batch_size == 0 {
            return Err(RagError::Config(
                "embedding_batch_size must be greater than 0".to_string(),
            ));
        }
        if self.max_new_tokens == 0 {
            return Err(RagError::Config(
                "max_new_tokens must be greater than 0".to_string(),
            ));
        }
        if !self.temperature.is_finite() || self.temperature < 0.0 {
            return Err(RagError::Config(format!(
                "temperature must be a non-negative number, got {}",
                self.temperature
            )));
        }
        if self.generation_timeout_secs == 0 {
            return Err(RagError::Config(
                "generation_timeout_secs must be greater than 0".to_string(),
            ));
        }
        if self.hashing_dimensions == 0 {
            return Err(RagError::Config(
                "hashing_dimensions must be greater than 0".to_string(),
            ));
        }
        if self.max_query_chars == 0 {
            return Err(RagError::Config(
                "max_query_chars must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

fn parse_value<T: FromStr>(key: &str, value: &str) -> Result<T, RagError> {
    value
        .trim()
        .parse()
        .map_err(|_| RagError::Config(format!("{} has an invalid value: '{}'", key, value)))
}

fn parse_bool(key: &str, value: &str) -> Result<bool, RagError> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(RagError::Config(format!(
            "{} must be a boolean, got '{}'",
            key, value
        ))),
    }
}
