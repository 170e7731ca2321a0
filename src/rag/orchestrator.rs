// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Retrieval-augmented question answering
//!
//! Embed the question, retrieve the top-k chunks, render the prompt, run
//! the generator under a deadline and return the answer with its sources.

use crate::config::RagConfig;
use crate::embeddings::Embedder;
use crate::inference::{AnswerGenerator, GenerationRequest, TokenStream};
use crate::rag::errors::RagError;
use crate::rag::prompt::PromptTemplate;
use crate::vector::{ScoredChunk, VectorIndex};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Length of the excerpt kept in each [`ChunkRef`]
const EXCERPT_CHARS: usize = 160;

pub const NO_SOURCES_TEXT: &str = "No sources found.";

#[derive(Debug, Clone, PartialEq)]
pub struct QaSettings {
    pub top_k: usize,
    pub max_new_tokens: usize,
    pub temperature: f32,
    pub generation_timeout: Duration,
    pub max_query_chars: usize,
}

impl Default for QaSettings {
    fn default() -> Self {
        Self::from_config(&RagConfig::default())
    }
}

impl QaSettings {
    pub fn from_config(config: &RagConfig) -> Self {
        Self {
            top_k: config.top_k,
            max_new_tokens: config.max_new_tokens,
            temperature: config.temperature,
            generation_timeout: Duration::from_secs(config.generation_timeout_secs),
            max_query_chars: config.max_query_chars,
        }
    }
}

/// Chunk cited by an answer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkRef {
    pub source: String,
    pub chunk_index: usize,
    pub start_offset: usize,
    pub score: f32,
    pub excerpt: String,
}

impl From<&ScoredChunk> for ChunkRef {
    fn from(hit: &ScoredChunk) -> Self {
        let mut excerpt: String = hit.chunk.text.chars().take(EXCERPT_CHARS).collect();
        if hit.chunk.text.chars().count() > EXCERPT_CHARS {
            excerpt.push_str("...");
        }
        Self {
            source: hit.chunk.source.clone(),
            chunk_index: hit.chunk.chunk_index,
            start_offset: hit.chunk.start_offset,
            score: hit.score,
            excerpt,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Answer {
    pub text: String,
    pub sources: Vec<ChunkRef>,
}

impl Answer {
    /// Answer text followed by the rendered sources
    pub fn render(&self) -> String {
        format!("{}\n\n{}", self.text, render_sources(&self.sources))
    }
}

/// `Sources:` list built from chunk metadata, or [`NO_SOURCES_TEXT`]
pub fn render_sources(sources: &[ChunkRef]) -> String {
    if sources.is_empty() {
        return NO_SOURCES_TEXT.to_string();
    }

    let lines: Vec<String> = sources
        .iter()
        .enumerate()
        .map(|(i, s)| {
            format!(
                "[{}] {} (chunk {}, score {:.2})",
                i + 1,
                s.source,
                s.chunk_index,
                s.score
            )
        })
        .collect();

    format!("Sources:\n{}", lines.join("\n"))
}

pub struct RetrievalQa {
    index: Arc<VectorIndex>,
    embedder: Arc<dyn Embedder>,
    generator: Arc<dyn AnswerGenerator>,
    template: PromptTemplate,
    settings: QaSettings,
}

impl RetrievalQa {
    /// # Errors
    ///
    /// - `RagError::IndexUnavailable` if a non-empty index has a different
    ///   dimension than the embedder
    /// - `RagError::Config` if `top_k` is 0
    pub fn new(
        index: Arc<VectorIndex>,
        embedder: Arc<dyn Embedder>,
        generator: Arc<dyn AnswerGenerator>,
        template: PromptTemplate,
        settings: QaSettings,
    ) -> Result<Self, RagError> {
        if settings.top_k == 0 {
            return Err(RagError::Config("top_k must be greater than 0".to_string()));
        }

        if !index.is_empty() {
            if index.dimensions() != embedder.dimension() {
                return Err(RagError::IndexUnavailable(format!(
                    "Index has {}-dimensional vectors but embedder {} produces {}",
                    index.dimensions(),
                    embedder.model_id(),
                    embedder.dimension()
                )));
            }
            if index.embedding_model() != embedder.model_id() {
                warn!(
                    "Index was built with embedding model {} but {} is configured",
                    index.embedding_model(),
                    embedder.model_id()
                );
            }
        }

        Ok(Self {
            index,
            embedder,
            generator,
            template,
            settings,
        })
    }

    pub fn settings(&self) -> &QaSettings {
        &self.settings
    }

    /// Answer a question from the indexed documents
    pub async fn answer(&self, query: &str) -> Result<Answer, RagError> {
        let (request, sources) = self.prepare(query).await?;

        let timeout = self.settings.generation_timeout;
        let generation = tokio::time::timeout(timeout, self.generator.generate(&request))
            .await
            .map_err(|_| RagError::GeneratorTimeout {
                duration_sec: timeout.as_secs(),
            })??;

        debug!("Generated {} tokens", generation.tokens_generated);

        Ok(Answer {
            text: generation.text.trim().to_string(),
            sources,
        })
    }

    /// Like [`RetrievalQa::answer`] but yields tokens as they are produced
    ///
    /// The deadline covers the whole generation, starting now.
    pub async fn answer_stream(&self, query: &str) -> Result<StreamingAnswer, RagError> {
        let timeout = self.settings.generation_timeout;
        let deadline = Instant::now() + timeout;
        let (request, sources) = self.prepare(query).await?;

        let stream = tokio::time::timeout_at(deadline, self.generator.generate_stream(&request))
            .await
            .map_err(|_| RagError::GeneratorTimeout {
                duration_sec: timeout.as_secs(),
            })??;

        Ok(StreamingAnswer {
            sources,
            stream,
            deadline,
            timeout,
            text: String::new(),
            finished: false,
        })
    }

    /// Validate, embed, retrieve and render the prompt
    async fn prepare(&self, query: &str) -> Result<(GenerationRequest, Vec<ChunkRef>), RagError> {
        let query = query.trim();
        if query.is_empty() {
            return Err(RagError::InvalidQuery("query is empty".to_string()));
        }
        let query_chars = query.chars().count();
        if query_chars > self.settings.max_query_chars {
            return Err(RagError::InvalidQuery(format!(
                "query is {} characters, limit is {}",
                query_chars, self.settings.max_query_chars
            )));
        }

        let hits = self.retrieve(query).await?;
        debug!(
            "Retrieved {} chunks: {:?}",
            hits.len(),
            hits.iter().map(|h| (&h.chunk.id, h.score)).collect::<Vec<_>>()
        );

        let context = hits
            .iter()
            .map(|h| h.chunk.text.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");
        let prompt = self.template.render(&context, query);

        let request = GenerationRequest {
            prompt,
            max_new_tokens: self.settings.max_new_tokens,
            temperature: self.settings.temperature,
        };
        let sources = hits.iter().map(ChunkRef::from).collect();

        Ok((request, sources))
    }

    /// Top-k chunks for a query, best first
    pub async fn retrieve(&self, query: &str) -> Result<Vec<ScoredChunk>, RagError> {
        if self.index.is_empty() {
            return Ok(Vec::new());
        }
        let vector = self.embedder.embed(query).await?;
        self.index.search(&vector, self.settings.top_k)
    }
}

/// Answer being generated
///
/// Sources are known up front; tokens arrive in generation order.
pub struct StreamingAnswer {
    sources: Vec<ChunkRef>,
    stream: TokenStream,
    deadline: Instant,
    timeout: Duration,
    text: String,
    finished: bool,
}

impl StreamingAnswer {
    pub fn sources(&self) -> &[ChunkRef] {
        &self.sources
    }

    /// Next token, `None` once generation has finished
    ///
    /// Returns `Err(GeneratorTimeout)` once if the deadline passes, then
    /// `None`.
    pub async fn next_token(&mut self) -> Option<Result<String, RagError>> {
        if self.finished {
            return None;
        }

        match tokio::time::timeout_at(self.deadline, self.stream.next()).await {
            Ok(Some(Ok(token))) => {
                self.text.push_str(&token);
                Some(Ok(token))
            }
            Ok(Some(Err(e))) => {
                self.finished = true;
                Some(Err(e))
            }
            Ok(None) => {
                self.finished = true;
                None
            }
            Err(_) => {
                self.finished = true;
                Some(Err(RagError::GeneratorTimeout {
                    duration_sec: self.timeout.as_secs(),
                }))
            }
        }
    }

    /// Drain the remaining tokens into a complete [`Answer`]
    pub async fn collect(mut self) -> Result<Answer, RagError> {
        while let Some(token) = self.next_token().await {
            token?;
        }
        Ok(Answer {
            text: self.text.trim().to_string(),
            sources: self.sources,
        })
    }
}
