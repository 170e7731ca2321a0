// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
pub mod ask;
pub mod ingest;
pub mod serve;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::{GeneratorMode, RagConfig};
use crate::embeddings::HASHING_MODEL_ID;
use crate::inference::{llama_loader, AnswerGenerator, GeneratorLoader, StaticGenerator};
use crate::rag::PromptTemplate;

/// Fabstir Document QA
#[derive(Parser, Debug)]
#[command(name = "fabstir-doc-qa")]
#[command(version = crate::version::VERSION_NUMBER)]
#[command(about = "Question answering over a collection of PDF documents", long_about = None)]
pub struct Cli {
    #[command(flatten)]
    pub common: CommonArgs,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Build the vector index from the source documents
    Ingest(ingest::IngestArgs),

    /// Run the chat server
    Serve(serve::ServeArgs),

    /// Answer a single question on the terminal
    Ask(ask::AskArgs),
}

/// Overrides for values otherwise read from `DOCQA_*` variables
#[derive(Args, Debug, Default)]
pub struct CommonArgs {
    /// Directory with the source documents
    #[arg(long, global = true)]
    pub source_docs: Option<PathBuf>,

    /// Directory holding the persisted index
    #[arg(long, global = true)]
    pub index_path: Option<PathBuf>,

    /// Embedding model id ("hashing" for the model-free embedder)
    #[arg(long, global = true)]
    pub embedding_model: Option<String>,

    /// GGUF model file for answer generation
    #[arg(long, global = true)]
    pub generator_model: Option<PathBuf>,

    /// Number of chunks retrieved per question
    #[arg(long, global = true)]
    pub top_k: Option<usize>,

    /// How sessions share the language model
    #[arg(long, global = true, value_enum)]
    pub generator_mode: Option<GeneratorMode>,

    /// Run without model files: hashing embedder, answers echo the prompt
    #[arg(long, global = true)]
    pub offline: bool,
}

impl CommonArgs {
    /// Environment configuration with the command line applied on top
    pub fn load_config(&self) -> Result<RagConfig> {
        let mut config = RagConfig::from_env()?;

        if let Some(path) = &self.source_docs {
            config.source_docs_path = path.clone();
        }
        if let Some(path) = &self.index_path {
            config.index_storage_path = path.clone();
        }
        if let Some(model) = &self.embedding_model {
            config.embedding_model_id = model.clone();
        }
        if let Some(path) = &self.generator_model {
            config.generator_model_path = path.clone();
        }
        if let Some(top_k) = self.top_k {
            config.top_k = top_k;
        }
        if let Some(mode) = self.generator_mode {
            config.generator_mode = mode;
        }
        if self.offline {
            config.embedding_model_id = HASHING_MODEL_ID.to_string();
        }

        config.validate()?;
        Ok(config)
    }

    /// Loader for the configured language model
    pub fn generator_loader(&self, config: &RagConfig) -> GeneratorLoader {
        if self.offline {
            warn!("Offline mode: answers echo the rendered prompt");
            return Arc::new(|| {
                Ok(Arc::new(StaticGenerator::echo().with_model_id("offline-echo"))
                    as Arc<dyn AnswerGenerator>)
            });
        }
        llama_loader(config)
    }
}

/// Prompt template from `prompt_template_path`, or the built-in one
pub fn load_template(config: &RagConfig) -> Result<PromptTemplate> {
    match &config.prompt_template_path {
        Some(path) => {
            info!("Using prompt template {}", path.display());
            PromptTemplate::from_file(path)
                .with_context(|| format!("Invalid prompt template {}", path.display()))
        }
        None => Ok(PromptTemplate::default()),
    }
}

/// Execute CLI command
pub async fn execute(cli: Cli) -> Result<()> {
    let config = cli.common.load_config()?;
    info!("{}", crate::version::get_version_string());

    match cli.command {
        Commands::Ingest(args) => ingest::run(args, &config).await,
        Commands::Serve(args) => serve::run(args, &cli.common, &config).await,
        Commands::Ask(args) => ask::run(args, &cli.common, &config).await,
    }
}
