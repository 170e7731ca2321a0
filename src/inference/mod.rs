// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Answer generation
//!
//! [`AnswerGenerator`] is the seam between the QA pipeline and a language
//! model. [`LlamaGenerator`] runs GGUF models through llama.cpp;
//! [`StaticGenerator`] is a scripted stand-in for tests and offline runs.

pub mod engine;
pub mod factory;
pub mod mock;

pub use engine::{llama_loader, LlamaGenerator, LlamaSettings};
pub use factory::{
    generator_factory, GeneratorFactory, GeneratorLoader, PerSessionGeneratorFactory,
    SerializedGenerator, SharedGeneratorFactory,
};
pub use mock::StaticGenerator;

use crate::rag::errors::RagError;
use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio_stream::wrappers::ReceiverStream;

/// Tokens in generation order; an `Err` item ends the stream
pub type TokenStream = ReceiverStream<Result<String, RagError>>;

/// Capacity of token channels between the model thread and consumers
pub const TOKEN_CHANNEL_CAPACITY: usize = 100;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub prompt: String,
    pub max_new_tokens: usize,
    pub temperature: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Generation {
    pub text: String,
    pub tokens_generated: usize,
}

/// Language model invoked with a fully rendered prompt
#[async_trait]
pub trait AnswerGenerator: Send + Sync {
    fn model_id(&self) -> &str;

    /// Generate a complete answer
    ///
    /// The default implementation drains [`AnswerGenerator::generate_stream`].
    async fn generate(&self, request: &GenerationRequest) -> Result<Generation, RagError> {
        let mut stream = self.generate_stream(request).await?;
        let mut text = String::new();
        let mut tokens_generated = 0;

        while let Some(token) = stream.next().await {
            text.push_str(&token?);
            tokens_generated += 1;
        }

        Ok(Generation {
            text,
            tokens_generated,
        })
    }

    /// Generate an answer token by token
    async fn generate_stream(&self, request: &GenerationRequest) -> Result<TokenStream, RagError>;
}
