// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Scripted answer generator
//!
//! Returns canned responses without loading a model. Used by tests and by
//! `--offline` runs to exercise retrieval end to end.

use super::{AnswerGenerator, Generation, GenerationRequest, TokenStream, TOKEN_CHANNEL_CAPACITY};
use crate::rag::errors::RagError;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

#[derive(Debug, Clone)]
enum Response {
    Fixed(String),
    /// Reply with the prompt itself
    Echo,
    Fail(String),
}

#[derive(Debug, Default)]
struct CallStats {
    calls: AtomicUsize,
    active: AtomicUsize,
    max_active: AtomicUsize,
}

impl CallStats {
    /// Returns the zero-based number of this call
    fn enter(&self) -> usize {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(active, Ordering::SeqCst);
        call
    }

    fn exit(&self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Debug)]
pub struct StaticGenerator {
    model_id: String,
    fallback: Response,
    script: Mutex<VecDeque<Response>>,
    delay: Option<Duration>,
    /// Only this many leading calls are delayed
    slow_calls: Option<usize>,
    last_prompt: Mutex<Option<String>>,
    stats: Arc<CallStats>,
}

impl StaticGenerator {
    /// Always answers `text`
    pub fn new(text: impl Into<String>) -> Self {
        Self::with_fallback(Response::Fixed(text.into()))
    }

    /// Answers with the rendered prompt
    pub fn echo() -> Self {
        Self::with_fallback(Response::Echo)
    }

    /// Every call fails with `RagError::Generation`
    pub fn failing(message: impl Into<String>) -> Self {
        Self::with_fallback(Response::Fail(message.into()))
    }

    fn with_fallback(fallback: Response) -> Self {
        Self {
            model_id: "static".to_string(),
            fallback,
            script: Mutex::new(VecDeque::new()),
            delay: None,
            slow_calls: None,
            last_prompt: Mutex::new(None),
            stats: Arc::new(CallStats::default()),
        }
    }

    /// Responses consumed in order before falling back to the default;
    /// `Err` entries fail that call
    pub fn with_script(self, script: Vec<Result<String, String>>) -> Self {
        let queue = script
            .into_iter()
            .map(|r| match r {
                Ok(text) => Response::Fixed(text),
                Err(message) => Response::Fail(message),
            })
            .collect();
        Self {
            script: Mutex::new(queue),
            ..self
        }
    }

    /// Sleep this long before answering (per token when streaming)
    pub fn with_delay(self, delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..self
        }
    }

    /// Apply the delay to the first `calls` calls only
    pub fn with_slow_calls(self, calls: usize) -> Self {
        Self {
            slow_calls: Some(calls),
            ..self
        }
    }

    fn delay_for(&self, call: usize) -> Option<Duration> {
        match self.slow_calls {
            Some(limit) if call >= limit => None,
            _ => self.delay,
        }
    }

    pub fn with_model_id(self, model_id: impl Into<String>) -> Self {
        Self {
            model_id: model_id.into(),
            ..self
        }
    }

    /// Number of generate/generate_stream calls so far
    pub fn calls(&self) -> usize {
        self.stats.calls.load(Ordering::SeqCst)
    }

    /// Highest number of generations observed running at once
    pub fn max_concurrent_calls(&self) -> usize {
        self.stats.max_active.load(Ordering::SeqCst)
    }

    pub fn last_prompt(&self) -> Option<String> {
        self.last_prompt.lock().ok().and_then(|p| p.clone())
    }

    fn next_response(&self, request: &GenerationRequest) -> Result<String, RagError> {
        if let Ok(mut last) = self.last_prompt.lock() {
            *last = Some(request.prompt.clone());
        }

        let scripted = self.script.lock().ok().and_then(|mut s| s.pop_front());
        match scripted.unwrap_or_else(|| self.fallback.clone()) {
            Response::Fixed(text) => Ok(text),
            Response::Echo => Ok(request.prompt.clone()),
            Response::Fail(message) => Err(RagError::Generation(message)),
        }
    }
}

#[async_trait]
impl AnswerGenerator for StaticGenerator {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<Generation, RagError> {
        let call = self.stats.enter();
        if let Some(delay) = self.delay_for(call) {
            tokio::time::sleep(delay).await;
        }
        let result = self.next_response(request);
        self.stats.exit();

        let text = result?;
        let tokens_generated = text.split_inclusive(' ').count();
        Ok(Generation {
            text,
            tokens_generated,
        })
    }

    async fn generate_stream(&self, request: &GenerationRequest) -> Result<TokenStream, RagError> {
        let call = self.stats.enter();
        let text = match self.next_response(request) {
            Ok(text) => text,
            Err(e) => {
                self.stats.exit();
                return Err(e);
            }
        };

        let tokens: Vec<String> = text.split_inclusive(' ').map(str::to_string).collect();
        let delay = self.delay_for(call);
        let stats = self.stats.clone();
        let (tx, rx) = mpsc::channel(TOKEN_CHANNEL_CAPACITY);

        tokio::spawn(async move {
            for token in tokens {
                if let Some(delay) = delay {
                    tokio::time::sleep(delay).await;
                }
                if tx.send(Ok(token)).await.is_err() {
                    break;
                }
            }
            stats.exit();
        });

        Ok(ReceiverStream::new(rx))
    }
}
