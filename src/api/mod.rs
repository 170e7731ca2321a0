// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
pub mod http_server;
pub mod websocket;

pub use http_server::{router, start_server, HealthResponse};
pub use websocket::{ChatSessionManager, OutgoingMessage, ReplySink, SessionServices};
