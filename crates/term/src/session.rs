// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session state.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::SessionError;
use crate::shells::ShellRegistry;

/// Image attached as the ephemeral debug container unless the caller picks
/// another one.
pub const DEFAULT_DEBUG_IMAGE: &str = "busybox:latest";

/// How the terminal reaches a process in the pod.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecMode {
    /// Exec a shell inside the selected container.
    Shell,
    /// Attach to an ephemeral debug container sharing the selected
    /// container's process namespace.
    Debug,
}

impl fmt::Display for ExecMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Shell => f.write_str("shell"),
            Self::Debug => f.write_str("debug"),
        }
    }
}

/// Connection status of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Disconnected,
    Connecting,
    Connected,
    Error,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Target of a session: one pod and its containers, as reported by the pod
/// metadata provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PodTarget {
    pub namespace: String,
    pub pod: String,
    pub containers: Vec<String>,
}

/// One interactive attach/exec conversation.
///
/// Plain data: every field is mutated only through
/// [`crate::controller::SessionController`] methods, which keeps the state
/// machine inspectable from the outside.
#[derive(Debug, Clone, Serialize)]
pub struct Session {
    pub namespace: String,
    pub pod: String,
    pub containers: Vec<String>,
    pub container: String,
    pub mode: ExecMode,
    /// Shell used for the current/next exec attempt (Shell mode).
    pub shell: String,
    /// Image for the ephemeral debug container (Debug mode).
    pub debug_image: String,
    pub status: SessionStatus,
    /// Classified failed shell attempts; bounded by the registry length.
    pub shell_failures: usize,
    /// Latched when every shell candidate failed. Cleared only by an
    /// explicit mode/container/shell change, never on its own.
    pub distroless: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl Session {
    /// Build a session for `target`, selecting `container` (or the first
    /// container) and the first registry shell.
    pub fn new(
        target: PodTarget,
        container: Option<String>,
        shells: &ShellRegistry,
    ) -> Result<Self, SessionError> {
        let PodTarget { namespace, pod, containers } = target;
        let Some(first) = containers.first().cloned() else {
            return Err(SessionError::NoContainers { pod });
        };
        let container = match container {
            Some(name) => {
                if !containers.iter().any(|c| *c == name) {
                    return Err(SessionError::UnknownContainer { container: name });
                }
                name
            }
            None => first,
        };
        Ok(Self {
            namespace,
            pod,
            containers,
            container,
            mode: ExecMode::Shell,
            shell: shells.first().to_owned(),
            debug_image: DEFAULT_DEBUG_IMAGE.to_owned(),
            status: SessionStatus::Disconnected,
            shell_failures: 0,
            distroless: false,
            last_error: None,
        })
    }

    /// Select another container of the pod.
    pub(crate) fn select_container(&mut self, name: &str) -> Result<(), SessionError> {
        if !self.containers.iter().any(|c| c == name) {
            return Err(SessionError::UnknownContainer { container: name.to_owned() });
        }
        self.container = name.to_owned();
        Ok(())
    }

    /// Reset the failure counter and distroless flag; the explicit reset
    /// that accompanies every mode/container/shell change.
    pub(crate) fn reset_failure_state(&mut self) {
        self.shell_failures = 0;
        self.distroless = false;
    }
}

#[cfg(test)]
#[path = "session_tests.rs"]
mod tests;
