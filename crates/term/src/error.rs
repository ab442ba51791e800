// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Library-boundary errors.
//!
//! Connection failures never surface here: they flow through the session's
//! status and last-error fields. This enum covers caller mistakes rejected
//! at the API boundary.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionError {
    /// The named container is not in the pod's container set.
    UnknownContainer { container: String },
    /// The pod reports no containers at all.
    NoContainers { pod: String },
}

impl SessionError {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UnknownContainer { .. } => "UNKNOWN_CONTAINER",
            Self::NoContainers { .. } => "NO_CONTAINERS",
        }
    }
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownContainer { container } => {
                write!(f, "container not found in pod: {container}")
            }
            Self::NoContainers { pod } => write!(f, "pod has no containers: {pod}"),
        }
    }
}

impl std::error::Error for SessionError {}
