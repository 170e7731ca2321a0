// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
use anyhow::{Context, Result};
use clap::Args;
use std::io::Write;

use super::{load_template, CommonArgs};
use crate::config::RagConfig;
use crate::embeddings::load_embedder;
use crate::rag::{render_sources, QaSettings, RetrievalQa};
use crate::vector::IndexCache;

/// Arguments for the ask command
#[derive(Args, Debug)]
pub struct AskArgs {
    /// The question
    pub question: String,

    /// Print the answer only once it is complete
    #[arg(long)]
    pub no_stream: bool,
}

pub async fn run(args: AskArgs, common: &CommonArgs, config: &RagConfig) -> Result<()> {
    let index = IndexCache::new(config.index_storage_path.clone())
        .get()
        .await
        .context("Run `fabstir-doc-qa ingest` first")?;
    let embedder = load_embedder(config).await?;
    let template = load_template(config)?;

    let loader = common.generator_loader(config);
    let generator = tokio::task::spawn_blocking(move || loader())
        .await
        .context("Model loader panicked")??;

    let qa = RetrievalQa::new(
        index,
        embedder,
        generator,
        template,
        QaSettings::from_config(config),
    )?;

    if args.no_stream || !config.stream_answers {
        let answer = qa.answer(&args.question).await?;
        println!("{}", answer.render());
        return Ok(());
    }

    let mut streaming = qa.answer_stream(&args.question).await?;
    let mut stdout = std::io::stdout();
    while let Some(token) = streaming.next_token().await {
        write!(stdout, "{}", token?)?;
        stdout.flush()?;
    }
    println!("\n\n{}", render_sources(streaming.sources()));
    Ok(())
}

