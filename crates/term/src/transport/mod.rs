// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Transport seam for session connections.
//!
//! The controller is transport-agnostic: anything that can open an ordered,
//! bidirectional text-message channel implements [`Transport`]. The concrete
//! [`Channel`] handle owns the outbound queue and the pump task behind a
//! connection; `close()` cancels the pump and awaits it, so teardown
//! completion is an explicit signal rather than a settle delay.

use std::future::Future;
use std::pin::Pin;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub mod ws;

/// Events surfaced by a channel, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    /// The underlying socket finished opening.
    Open,
    /// One inbound text payload.
    Message(String),
    /// The channel failed, while opening or after.
    Error(String),
    /// The channel is gone; no further events follow.
    Closed,
}

/// A live connection plus its ordered event feed.
pub struct ChannelParts {
    pub channel: Channel,
    pub events: mpsc::Receiver<ChannelEvent>,
}

/// Opens channels. Implemented by [`ws::WsTransport`] in production and by
/// [`crate::test_support::MockTransport`] in tests.
pub trait Transport: Send + Sync {
    fn connect(
        &self,
        url: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<ChannelParts>> + Send + '_>>;
}

/// Handle to one open connection.
///
/// Exclusively owned by a session controller. Sends are queued in order;
/// once the channel is closed, locally or by the peer, [`Channel::send`]
/// is a silent no-op.
pub struct Channel {
    outbound: mpsc::Sender<String>,
    cancel: CancellationToken,
    pump: Option<JoinHandle<()>>,
}

impl Channel {
    pub fn new(
        outbound: mpsc::Sender<String>,
        cancel: CancellationToken,
        pump: JoinHandle<()>,
    ) -> Self {
        Self { outbound, cancel, pump: Some(pump) }
    }

    /// Queue one text frame for transmission. No-op when closed.
    pub fn send(&self, text: String) {
        if self.cancel.is_cancelled() {
            return;
        }
        if self.outbound.try_send(text).is_err() {
            // Queue full or pump gone; the frame is dropped, matching the
            // contract that sends on a dead channel vanish silently.
            debug!("outbound frame dropped");
        }
    }

    /// Close the channel and wait for its pump task to finish, so no
    /// further work happens on the connection after this returns.
    /// Idempotent: later calls return immediately.
    pub async fn close(&mut self) {
        self.cancel.cancel();
        if let Some(pump) = self.pump.take() {
            let _ = pump.await;
        }
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use crate::test_support::{settle, MockTransport};
    use crate::transport::Transport;

    #[tokio::test]
    async fn close_is_idempotent_and_send_after_close_is_a_noop() -> anyhow::Result<()> {
        let transport = MockTransport::new();
        let mut parts = transport.connect("ws://gw/test").await?;

        parts.channel.send("hello".to_owned());
        settle().await;
        parts.channel.close().await;
        parts.channel.close().await;
        parts.channel.send("after close".to_owned());
        settle().await;

        let remote = transport.last_remote().ok_or_else(|| anyhow::anyhow!("no remote"))?;
        assert_eq!(remote.sent(), vec!["hello".to_owned()]);
        assert!(remote.is_closed());
        assert!(parts.channel.is_closed());
        Ok(())
    }

    #[tokio::test]
    async fn close_completes_only_after_the_pump_stops() -> anyhow::Result<()> {
        let transport = MockTransport::new();
        let mut parts = transport.connect("ws://gw/test").await?;

        parts.channel.close().await;
        // Teardown is awaited, not timed: by the time close() returns the
        // connection must already be accounted as closed.
        let remote = transport.last_remote().ok_or_else(|| anyhow::anyhow!("no remote"))?;
        assert!(remote.is_closed());
        Ok(())
    }
}
