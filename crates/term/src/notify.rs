// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Fire-and-forget notification collaborator.

use tracing::{info, warn};

/// Receives user-facing success/error notices.
///
/// Not part of the protocol contract; implementations must not block and
/// their failures never affect the session.
pub trait Notifier: Send {
    fn success(&self, message: &str);
    fn error(&self, message: &str);
}

/// Default notifier: routes notices to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn success(&self, message: &str) {
        info!(target: "podterm::notify", "{message}");
    }

    fn error(&self, message: &str) {
        warn!(target: "podterm::notify", "{message}");
    }
}
