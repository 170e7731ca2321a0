// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
use anyhow::Result;
use clap::Args;
use std::sync::Arc;
use tracing::info;

use super::{load_template, CommonArgs};
use crate::api::http_server::start_server;
use crate::api::websocket::{ChatSessionManager, SessionServices};
use crate::config::RagConfig;
use crate::embeddings::load_embedder;
use crate::inference::generator_factory;
use crate::vector::IndexCache;

/// Arguments for the serve command
#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Rebuild the index before accepting connections
    #[arg(long)]
    pub ingest_on_start: bool,

    /// Address to listen on (overrides DOCQA_BIND_ADDRESS)
    #[arg(long)]
    pub bind: Option<String>,
}

pub async fn run(args: ServeArgs, common: &CommonArgs, config: &RagConfig) -> Result<()> {
    if args.ingest_on_start {
        info!("Ingesting documents before start");
        super::ingest::ingest(config).await?;
    }

    let embedder = load_embedder(config).await?;
    let template = load_template(config)?;
    let generators = generator_factory(config.generator_mode, common.generator_loader(config));
    let index = Arc::new(IndexCache::new(config.index_storage_path.clone()));

    info!(
        "Serving with embedder={}, generator_mode={}, top_k={}, streaming={}",
        embedder.model_id(),
        config.generator_mode,
        config.top_k,
        config.stream_answers
    );

    let services = SessionServices::new(config, index, embedder, generators, template);
    let manager = Arc::new(ChatSessionManager::new(services));

    let bind = args.bind.as_deref().unwrap_or(&config.bind_address);
    start_server(manager, bind).await
}
