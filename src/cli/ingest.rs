// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
use anyhow::Result;
use clap::Args;
use std::path::Path;
use tracing::warn;

use crate::config::RagConfig;
use crate::embeddings::load_embedder;
use crate::rag::{DocumentIngestor, IngestReport};

/// Arguments for the ingest command
#[derive(Args, Debug)]
pub struct IngestArgs {
    /// Print the report as JSON
    #[arg(long)]
    pub json: bool,
}

pub async fn run(args: IngestArgs, config: &RagConfig) -> Result<()> {
    let report = ingest(config).await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }
    Ok(())
}

/// Build and persist the index from `config.source_docs_path`
pub async fn ingest(config: &RagConfig) -> Result<IngestReport> {
    let embedder = load_embedder(config).await?;
    let ingestor = DocumentIngestor::from_config(embedder, config)?;
    let report = ingestor.ingest(Path::new(&config.source_docs_path)).await?;

    for warning in &report.warnings {
        warn!("{}", warning);
    }
    Ok(report)
}

fn print_report(report: &IngestReport) {
    println!("Documents loaded: {}", report.documents_loaded);
    println!("Chunks indexed:   {}", report.chunks_indexed);
    println!("Index written to: {}", report.index_path.display());
    println!("Elapsed:          {:.2}s", report.elapsed.as_secs_f32());

    if !report.skipped.is_empty() {
        println!("Skipped:");
        for skipped in &report.skipped {
            println!("  {}: {}", skipped.path.display(), skipped.reason);
        }
    }
    if !report.warnings.is_empty() {
        println!("Warnings:");
        for warning in &report.warnings {
            println!("  {}", warning);
        }
    }
}
