// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Wire protocol for exec/attach sessions.
//!
//! Messages use internally-tagged JSON enums (`{"type": "input", ...}`).
//! Two top-level enums cover the client-to-server and server-to-client
//! directions. Peers that stream bare bytes without the structured protocol
//! are handled through the [`Decoded::Raw`] fallback.

use serde::{Deserialize, Serialize};

/// Client-to-server messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Input { data: String },
    Resize { cols: u16, rows: u16 },
}

/// Server-to-client messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Output { data: String },
    Status { status: String },
    Error { error: String },
}

/// Result of decoding one inbound payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    /// A structured protocol message.
    Message(ServerMessage),
    /// Payload was not protocol JSON; write it to the terminal verbatim.
    Raw(String),
}

/// Encode an outbound message as a JSON text frame.
pub fn encode(msg: &ClientMessage) -> String {
    // These enums have no fallible serialization paths (string and integer
    // fields only), so the error arm is unreachable in practice.
    serde_json::to_string(msg).unwrap_or_default()
}

/// Decode one inbound payload.
///
/// Anything that does not parse as a [`ServerMessage`] (plain text, partial
/// JSON, an unknown `type`) comes back as [`Decoded::Raw`] so the caller can
/// pass it to the terminal unmodified.
pub fn decode(raw: &str) -> Decoded {
    match serde_json::from_str::<ServerMessage>(raw) {
        Ok(msg) => Decoded::Message(msg),
        Err(_) => Decoded::Raw(raw.to_owned()),
    }
}

#[cfg(test)]
#[path = "protocol_tests.rs"]
mod tests;
