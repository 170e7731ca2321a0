// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
use crate::rag::ChunkRef;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Error codes for WebSocket messages that do not come from the QA pipeline
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    SessionNotFound,
    AssistantUnavailable,
    InvalidMessage,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCode::SessionNotFound => write!(f, "SESSION_NOT_FOUND"),
            ErrorCode::AssistantUnavailable => write!(f, "ASSISTANT_UNAVAILABLE"),
            ErrorCode::InvalidMessage => write!(f, "INVALID_MESSAGE"),
        }
    }
}

/// Reply to a `message` frame that has no usable `content`
pub const INVALID_MESSAGE_ERROR: &str = "Messages need a text \"content\" field.";

/// Client → server frame
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IncomingMessage {
    Message { content: String },
}

impl IncomingMessage {
    /// Parse a text frame: JSON `{"type":"message","content":...}` or a
    /// bare question
    ///
    /// A JSON object typed `message` without a string `content` is an error;
    /// any other text is taken as the question itself.
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        match serde_json::from_str::<IncomingMessage>(text) {
            Ok(message) => Ok(message),
            Err(e) if declares_message_type(text) => Err(e),
            Err(_) => Ok(IncomingMessage::Message {
                content: text.to_string(),
            }),
        }
    }

    pub fn content(&self) -> &str {
        match self {
            IncomingMessage::Message { content } => content,
        }
    }
}

fn declares_message_type(text: &str) -> bool {
    serde_json::from_str::<serde_json::Value>(text)
        .map(|value| value.get("type").and_then(|t| t.as_str()) == Some("message"))
        .unwrap_or(false)
}

/// Server → client frame
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutgoingMessage {
    /// Sent once the session is ready
    Welcome { session_id: String, content: String },

    /// Partial answer text, in generation order
    StreamChunk { content: String },

    /// Final reply to a message: answer text followed by its sources
    Answer {
        content: String,
        sources: Vec<ChunkRef>,
    },

    /// Final reply when a message (or the session) failed
    Error { code: String, message: String },
}

impl OutgoingMessage {
    pub fn error(code: impl ToString, message: impl Into<String>) -> Self {
        OutgoingMessage::Error {
            code: code.to_string(),
            message: message.into(),
        }
    }

    /// Whether this message ends the handling of an inbound message
    pub fn is_final(&self) -> bool {
        matches!(
            self,
            OutgoingMessage::Answer { .. } | OutgoingMessage::Error { .. }
        )
    }
}
