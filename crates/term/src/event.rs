// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session events reported to the caller.

use serde::{Deserialize, Serialize};

use crate::session::SessionStatus;

/// One status transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusChange {
    pub prev: SessionStatus,
    pub next: SessionStatus,
    pub seq: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Events broadcast by a session controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    Status(StatusChange),
    /// Every shell candidate failed; the container looks distroless. The
    /// remedy is a debug-container session, which the controller suggests
    /// but never switches to on its own.
    ShellUnavailable { container: String, attempts: usize },
}
