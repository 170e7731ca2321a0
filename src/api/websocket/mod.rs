// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
pub mod handler;
pub mod messages;
pub mod session;

pub use handler::{handle_websocket, ChannelSink};
pub use messages::{ErrorCode, IncomingMessage, OutgoingMessage, INVALID_MESSAGE_ERROR};
pub use session::{
    ChatSessionManager, ReplySink, SessionServices, SessionState, NO_ASSISTANT_ERROR,
    SESSION_START_ERROR,
};
