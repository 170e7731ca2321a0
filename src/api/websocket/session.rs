// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Chat session lifecycle
//!
//! One [`RetrievalQa`] per session, built when the session starts. Every
//! inbound message produces exactly one final reply (`answer` or `error`),
//! optionally preceded by `stream_chunk` messages.

use super::messages::{ErrorCode, OutgoingMessage};
use crate::config::RagConfig;
use crate::embeddings::Embedder;
use crate::inference::GeneratorFactory;
use crate::rag::errors::{RagError, GENERIC_USER_ERROR};
use crate::rag::{Answer, PromptTemplate, QaSettings, RetrievalQa};
use crate::vector::IndexCache;
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

/// Shown when the assistant could not be set up for a session
pub const SESSION_START_ERROR: &str =
    "Sorry, there was an error starting the assistant. Please try again later.";

/// Shown when a message arrives for a session without an assistant
pub const NO_ASSISTANT_ERROR: &str =
    "This session has no assistant available. Please reconnect and try again.";

/// Destination for replies to one chat session
#[async_trait]
pub trait ReplySink: Send + Sync {
    /// Deliver a message; fails when the client is gone
    async fn send(&self, message: OutgoingMessage) -> Result<()>;
}

/// What every session needs to build its orchestrator
pub struct SessionServices {
    pub index: Arc<IndexCache>,
    pub embedder: Arc<dyn Embedder>,
    pub generators: Arc<dyn GeneratorFactory>,
    pub template: PromptTemplate,
    pub settings: QaSettings,
    pub welcome_message: String,
    pub stream_answers: bool,
}

impl SessionServices {
    pub fn new(
        config: &RagConfig,
        index: Arc<IndexCache>,
        embedder: Arc<dyn Embedder>,
        generators: Arc<dyn GeneratorFactory>,
        template: PromptTemplate,
    ) -> Self {
        Self {
            index,
            embedder,
            generators,
            template,
            settings: QaSettings::from_config(config),
            welcome_message: config.welcome_message.clone(),
            stream_answers: config.stream_answers,
        }
    }
}

#[derive(Clone)]
pub struct SessionState {
    /// `None` when setup failed
    pub orchestrator: Option<Arc<RetrievalQa>>,
    pub created_at: DateTime<Utc>,
    pub messages_handled: u64,
}

pub struct ChatSessionManager {
    services: SessionServices,
    sessions: RwLock<HashMap<String, SessionState>>,
}

impl ChatSessionManager {
    pub fn new(services: SessionServices) -> Self {
        Self {
            services,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    pub fn index(&self) -> &Arc<IndexCache> {
        &self.services.index
    }

    pub async fn active_sessions(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn session(&self, session_id: &str) -> Option<SessionState> {
        self.sessions.read().await.get(session_id).cloned()
    }

    /// Build the session's orchestrator and greet the user
    ///
    /// On failure the session stays registered without an orchestrator and
    /// the user gets a single error message.
    pub async fn on_session_start(&self, session_id: &str, sink: &dyn ReplySink) {
        info!("Session {} started", session_id);

        let orchestrator = match self.build_orchestrator().await {
            Ok(qa) => Some(Arc::new(qa)),
            Err(e) => {
                error!(
                    session_id = %session_id,
                    code = e.error_code(),
                    "Failed to start session: {}",
                    e
                );
                None
            }
        };

        let reply = if orchestrator.is_some() {
            OutgoingMessage::Welcome {
                session_id: session_id.to_string(),
                content: self.services.welcome_message.clone(),
            }
        } else {
            OutgoingMessage::error(ErrorCode::AssistantUnavailable, SESSION_START_ERROR)
        };

        self.sessions.write().await.insert(
            session_id.to_string(),
            SessionState {
                orchestrator,
                created_at: Utc::now(),
                messages_handled: 0,
            },
        );

        deliver(sink, session_id, reply).await;
    }

    async fn build_orchestrator(&self) -> Result<RetrievalQa, RagError> {
        let index = self.services.index.get().await?;
        let generator = self.services.generators.generator().await?;

        RetrievalQa::new(
            index,
            self.services.embedder.clone(),
            generator,
            self.services.template.clone(),
            self.services.settings.clone(),
        )
    }

    /// Answer one user message
    pub async fn on_message(&self, session_id: &str, text: &str, sink: &dyn ReplySink) {
        let orchestrator = {
            let mut sessions = self.sessions.write().await;
            match sessions.get_mut(session_id) {
                None => None,
                Some(state) => {
                    state.messages_handled += 1;
                    Some(state.orchestrator.clone())
                }
            }
        };

        let qa = match orchestrator {
            None => {
                warn!(session_id = %session_id, "Message for unknown session");
                let reply = OutgoingMessage::error(ErrorCode::SessionNotFound, GENERIC_USER_ERROR);
                deliver(sink, session_id, reply).await;
                return;
            }
            Some(None) => {
                warn!(session_id = %session_id, "Message for session without an assistant");
                let reply = OutgoingMessage::error(ErrorCode::AssistantUnavailable, NO_ASSISTANT_ERROR);
                deliver(sink, session_id, reply).await;
                return;
            }
            Some(Some(qa)) => qa,
        };

        debug!(session_id = %session_id, "Handling message ({} chars)", text.chars().count());

        let result = if self.services.stream_answers {
            self.answer_streaming(&qa, session_id, text, sink).await
        } else {
            qa.answer(text).await
        };

        let reply = match result {
            Ok(answer) => OutgoingMessage::Answer {
                content: answer.render(),
                sources: answer.sources,
            },
            Err(e) => {
                error!(
                    session_id = %session_id,
                    code = e.error_code(),
                    retryable = e.is_retryable(),
                    "Failed to answer message: {}",
                    e
                );
                OutgoingMessage::error(e.error_code(), e.user_message())
            }
        };

        deliver(sink, session_id, reply).await;
    }

    /// Forward tokens as `stream_chunk` messages and collect the answer
    async fn answer_streaming(
        &self,
        qa: &RetrievalQa,
        session_id: &str,
        text: &str,
        sink: &dyn ReplySink,
    ) -> Result<Answer, RagError> {
        let mut streaming = qa.answer_stream(text).await?;
        let mut client_connected = true;

        while let Some(token) = streaming.next_token().await {
            let token = token?;
            if client_connected
                && sink
                    .send(OutgoingMessage::StreamChunk { content: token })
                    .await
                    .is_err()
            {
                debug!(session_id = %session_id, "Client gone, finishing generation silently");
                client_connected = false;
            }
        }

        streaming.collect().await
    }

    /// Drop the session's state
    pub async fn on_session_end(&self, session_id: &str) -> bool {
        let removed = self.sessions.write().await.remove(session_id);
        if let Some(state) = &removed {
            info!(
                "Session {} ended after {} messages",
                session_id, state.messages_handled
            );
        }
        removed.is_some()
    }
}

async fn deliver(sink: &dyn ReplySink, session_id: &str, message: OutgoingMessage) {
    if let Err(e) = sink.send(message).await {
        debug!(session_id = %session_id, "Reply not delivered: {}", e);
    }
}
