// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Heuristic detection of shell-less ("distroless") containers.
//!
//! There is no image metadata to inspect from this side of the connection,
//! so the detector scans the exec output of each connection attempt for the
//! error text a container runtime prints when the requested shell binary
//! does not exist. The marker list and matching live in [`MarkerSet`] so the
//! heuristic can be swapped without touching the controller.

use tracing::debug;

/// Failure markers (exact, case-sensitive substrings).
pub const DEFAULT_MARKERS: &[&str] = &[
    "executable file not found",
    "OCI runtime exec failed",
    "no such file or directory",
    "exit code 127",
];

/// Matching strategy: a marker list plus the match function.
#[derive(Debug, Clone)]
pub struct MarkerSet {
    markers: Vec<String>,
}

impl MarkerSet {
    pub fn new<I, S>(markers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self { markers: markers.into_iter().map(Into::into).collect() }
    }

    /// First marker contained in `buffer`, if any.
    pub fn first_match<'a>(&'a self, buffer: &str) -> Option<&'a str> {
        self.markers.iter().map(String::as_str).find(|m| buffer.contains(*m))
    }
}

impl Default for MarkerSet {
    fn default() -> Self {
        Self::new(DEFAULT_MARKERS.iter().copied())
    }
}

/// Scans the output of one connection attempt.
///
/// The detector owns only attempt-scoped state (the accumulated buffer and
/// whether this attempt is already classified); the failure counter and the
/// distroless flag live on the session, mutated by the controller. It never
/// runs in debug mode.
#[derive(Debug, Default)]
pub struct DistrolessDetector {
    markers: MarkerSet,
    buffer: String,
    classified: bool,
}

impl DistrolessDetector {
    pub fn new(markers: MarkerSet) -> Self {
        Self { markers, buffer: String::new(), classified: false }
    }

    /// Start a fresh connection attempt: clear the buffer and the
    /// classification latch.
    pub fn begin_attempt(&mut self) {
        self.buffer.clear();
        self.classified = false;
    }

    /// Feed one output chunk of the current attempt.
    ///
    /// Returns the matched marker the first time the attempt is classified
    /// as a failed shell exec, and `None` on every later chunk of the same
    /// attempt. That is the guard against counting one attempt twice.
    pub fn observe(&mut self, chunk: &str) -> Option<String> {
        self.buffer.push_str(chunk);
        if self.classified {
            return None;
        }
        let marker = self.markers.first_match(&self.buffer)?;
        self.classified = true;
        debug!(marker = %marker, "attempt output matched failure marker");
        Some(marker.to_owned())
    }

    /// Output accumulated during the current attempt.
    pub fn buffer(&self) -> &str {
        &self.buffer
    }
}

#[cfg(test)]
#[path = "distroless_tests.rs"]
mod tests;
