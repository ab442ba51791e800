// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! WebSocket endpoint construction for the two attach modes.
//!
//! Shell sessions and debug sessions are distinct server endpoints, not one
//! endpoint with a flag: an exec upgrade carries `container` + `shell`,
//! while a debug-attach upgrade carries the ephemeral container's name, its
//! `image`, and the `target_container` whose process namespace it joins.

/// Builds upgrade URLs against one exec gateway.
#[derive(Debug, Clone)]
pub struct Endpoints {
    base: String,
}

impl Endpoints {
    /// `base_url` may use an `http(s)` or `ws(s)` scheme; HTTP schemes are
    /// mapped to their WebSocket counterparts.
    pub fn new(base_url: &str) -> Self {
        let base = base_url.trim_end_matches('/');
        let base = if let Some(rest) = base.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = base.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            base.to_owned()
        };
        Self { base }
    }

    /// Exec endpoint: run `shell` inside `container`.
    pub fn shell_url(&self, namespace: &str, pod: &str, container: &str, shell: &str) -> String {
        format!(
            "{}/api/v1/namespaces/{namespace}/pods/{pod}/exec?container={container}&shell={shell}",
            self.base
        )
    }

    /// Debug-attach endpoint: attach to the ephemeral `debug_container`
    /// running `image`, sharing `target_container`'s process namespace.
    pub fn debug_url(
        &self,
        namespace: &str,
        pod: &str,
        debug_container: &str,
        image: &str,
        target_container: &str,
    ) -> String {
        format!(
            "{}/api/v1/namespaces/{namespace}/pods/{pod}/debug?container={debug_container}&image={image}&target_container={target_container}",
            self.base
        )
    }
}

/// Name for a fresh ephemeral debug container.
///
/// The server creates a new ephemeral container per attach, so each connect
/// needs a name that cannot collide with an earlier one.
pub fn debug_container_name() -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    format!("debugger-{}", &id[..8])
}

#[cfg(test)]
#[path = "endpoint_tests.rs"]
mod tests;
