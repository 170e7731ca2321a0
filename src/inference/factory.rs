// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Generator provisioning for chat sessions
//!
//! - [`SharedGeneratorFactory`]: one model loaded on first use, every
//!   session gets the same [`SerializedGenerator`] (one generation at a time)
//! - [`PerSessionGeneratorFactory`]: a fresh model per session
//!
//! A failed load is not cached; the next session tries again.

use super::{AnswerGenerator, GenerationRequest, TokenStream, TOKEN_CHANNEL_CAPACITY};
use crate::config::GeneratorMode;
use crate::rag::errors::RagError;
use async_trait::async_trait;
use futures::StreamExt;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex, OnceCell};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info};

/// Blocking constructor for a generator (model loading)
pub type GeneratorLoader =
    Arc<dyn Fn() -> Result<Arc<dyn AnswerGenerator>, RagError> + Send + Sync>;

#[async_trait]
pub trait GeneratorFactory: Send + Sync {
    /// Generator for a new chat session
    async fn generator(&self) -> Result<Arc<dyn AnswerGenerator>, RagError>;
}

async fn run_loader(loader: &GeneratorLoader) -> Result<Arc<dyn AnswerGenerator>, RagError> {
    let loader = loader.clone();
    tokio::task::spawn_blocking(move || loader())
        .await
        .map_err(|e| RagError::GeneratorUnavailable(format!("Model loader panicked: {}", e)))?
}

/// Wraps a generator so only one generation runs at a time
///
/// For streams the lock is held until the last token has been forwarded or
/// the consumer drops the stream.
pub struct SerializedGenerator {
    inner: Arc<dyn AnswerGenerator>,
    gate: Arc<Mutex<()>>,
}

impl SerializedGenerator {
    pub fn new(inner: Arc<dyn AnswerGenerator>) -> Self {
        Self {
            inner,
            gate: Arc::new(Mutex::new(())),
        }
    }
}

#[async_trait]
impl AnswerGenerator for SerializedGenerator {
    fn model_id(&self) -> &str {
        self.inner.model_id()
    }

    async fn generate(
        &self,
        request: &GenerationRequest,
    ) -> Result<super::Generation, RagError> {
        let _guard = self.gate.lock().await;
        self.inner.generate(request).await
    }

    async fn generate_stream(&self, request: &GenerationRequest) -> Result<TokenStream, RagError> {
        let guard = self.gate.clone().lock_owned().await;
        let mut upstream = self.inner.generate_stream(request).await?;
        let (tx, rx) = mpsc::channel(TOKEN_CHANNEL_CAPACITY);

        tokio::spawn(async move {
            let _guard = guard;
            while let Some(item) = upstream.next().await {
                if tx.send(item).await.is_err() {
                    debug!("Stream consumer dropped, releasing generator");
                    break;
                }
            }
        });

        Ok(ReceiverStream::new(rx))
    }
}

pub struct SharedGeneratorFactory {
    loader: GeneratorLoader,
    generator: OnceCell<Arc<dyn AnswerGenerator>>,
}

impl SharedGeneratorFactory {
    pub fn new(loader: GeneratorLoader) -> Self {
        Self {
            loader,
            generator: OnceCell::new(),
        }
    }

    /// Factory around an already constructed generator
    pub fn from_generator(generator: Arc<dyn AnswerGenerator>) -> Self {
        let serialized: Arc<dyn AnswerGenerator> = Arc::new(SerializedGenerator::new(generator));
        let loaded = serialized.clone();
        Self {
            loader: Arc::new(move || Ok(loaded.clone())),
            generator: OnceCell::new_with(Some(serialized)),
        }
    }
}

#[async_trait]
impl GeneratorFactory for SharedGeneratorFactory {
    async fn generator(&self) -> Result<Arc<dyn AnswerGenerator>, RagError> {
        let generator = self
            .generator
            .get_or_try_init(|| async {
                info!("Loading shared generator");
                let inner = run_loader(&self.loader).await?;
                Ok::<_, RagError>(Arc::new(SerializedGenerator::new(inner)) as Arc<dyn AnswerGenerator>)
            })
            .await?;

        Ok(generator.clone())
    }
}

pub struct PerSessionGeneratorFactory {
    loader: GeneratorLoader,
}

impl PerSessionGeneratorFactory {
    pub fn new(loader: GeneratorLoader) -> Self {
        Self { loader }
    }
}

#[async_trait]
impl GeneratorFactory for PerSessionGeneratorFactory {
    async fn generator(&self) -> Result<Arc<dyn AnswerGenerator>, RagError> {
        info!("Loading per-session generator");
        run_loader(&self.loader).await
    }
}

/// Factory for the configured [`GeneratorMode`]
pub fn generator_factory(mode: GeneratorMode, loader: GeneratorLoader) -> Arc<dyn GeneratorFactory> {
    match mode {
        GeneratorMode::Shared => Arc::new(SharedGeneratorFactory::new(loader)),
        GeneratorMode::PerSession => Arc::new(PerSessionGeneratorFactory::new(loader)),
    }
}
