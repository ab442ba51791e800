// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared test infrastructure: mock transport, mock surface, helpers.
//!
//! Public so integration tests (and embedders writing their own tests) can
//! drive a controller without a live gateway.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::protocol::ServerMessage;
use crate::surface::TerminalSurface;
use crate::transport::{Channel, ChannelEvent, ChannelParts, Transport};

/// Extension trait to convert any `Display` error into `anyhow::Error`.
/// Replaces `.map_err(|e| anyhow::anyhow!("{e}"))` with `.anyhow()`.
pub trait AnyhowExt<T> {
    fn anyhow(self) -> anyhow::Result<T>;
}

impl<T, E: std::fmt::Display> AnyhowExt<T> for Result<T, E> {
    fn anyhow(self) -> anyhow::Result<T> {
        self.map_err(|e| anyhow::anyhow!("{e}"))
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Yield a few times so background pump tasks drain their queues.
pub async fn settle() {
    for _ in 0..8 {
        tokio::task::yield_now().await;
    }
}

/// One recorded transport operation, in call order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportOp {
    Connect { url: String },
    Close { url: String },
}

/// Remote end of a mock connection: scripts inbound events, captures
/// outbound frames.
pub struct MockRemote {
    pub url: String,
    events: mpsc::Sender<ChannelEvent>,
    sent: Arc<Mutex<Vec<String>>>,
    closed: Arc<AtomicBool>,
}

impl MockRemote {
    pub async fn open(&self) {
        let _ = self.events.send(ChannelEvent::Open).await;
    }

    pub async fn send_output(&self, data: &str) {
        self.send_message(&ServerMessage::Output { data: data.to_owned() }).await;
    }

    pub async fn send_status(&self, status: &str) {
        self.send_message(&ServerMessage::Status { status: status.to_owned() }).await;
    }

    pub async fn send_error(&self, error: &str) {
        self.send_message(&ServerMessage::Error { error: error.to_owned() }).await;
    }

    /// Deliver a payload verbatim, bypassing the protocol encoding.
    pub async fn send_raw(&self, raw: &str) {
        let _ = self.events.send(ChannelEvent::Message(raw.to_owned())).await;
    }

    pub async fn fail(&self, err: &str) {
        let _ = self.events.send(ChannelEvent::Error(err.to_owned())).await;
    }

    pub async fn close(&self) {
        let _ = self.events.send(ChannelEvent::Closed).await;
    }

    async fn send_message(&self, msg: &ServerMessage) {
        let raw = serde_json::to_string(msg).unwrap_or_default();
        let _ = self.events.send(ChannelEvent::Message(raw)).await;
    }

    /// Frames the controller sent over this connection, in order.
    pub fn sent(&self) -> Vec<String> {
        lock(&self.sent).clone()
    }

    /// Whether the local side tore this connection down.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[derive(Default)]
struct MockTransportInner {
    ops: Mutex<Vec<TransportOp>>,
    remotes: Mutex<Vec<Arc<MockRemote>>>,
    open: AtomicUsize,
    max_open: AtomicUsize,
    auto_open: AtomicBool,
}

/// Scripted transport: records connect/close ordering, exposes each
/// connection's remote handle, and tracks how many connections were ever
/// open at once, which is what the single-connection assertions check.
#[derive(Clone, Default)]
pub struct MockTransport {
    inner: Arc<MockTransportInner>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Emit `Open` immediately on every connect instead of waiting for the
    /// test to script it.
    pub fn with_auto_open(self) -> Self {
        self.inner.auto_open.store(true, Ordering::SeqCst);
        self
    }

    /// Connect/close operations in call order.
    pub fn ops(&self) -> Vec<TransportOp> {
        lock(&self.inner.ops).clone()
    }

    /// URLs passed to connect, in order.
    pub fn connect_urls(&self) -> Vec<String> {
        self.ops()
            .into_iter()
            .filter_map(|op| match op {
                TransportOp::Connect { url } => Some(url),
                TransportOp::Close { .. } => None,
            })
            .collect()
    }

    pub fn remotes(&self) -> Vec<Arc<MockRemote>> {
        lock(&self.inner.remotes).clone()
    }

    pub fn last_remote(&self) -> Option<Arc<MockRemote>> {
        lock(&self.inner.remotes).last().cloned()
    }

    /// High-water mark of simultaneously open connections.
    pub fn max_concurrent_open(&self) -> usize {
        self.inner.max_open.load(Ordering::SeqCst)
    }
}

impl Transport for MockTransport {
    fn connect(
        &self,
        url: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<ChannelParts>> + Send + '_>> {
        let inner = Arc::clone(&self.inner);
        let url = url.to_owned();
        Box::pin(async move {
            let (out_tx, mut out_rx) = mpsc::channel::<String>(256);
            let (ev_tx, ev_rx) = mpsc::channel(256);
            let cancel = CancellationToken::new();
            let sent = Arc::new(Mutex::new(Vec::new()));
            let closed = Arc::new(AtomicBool::new(false));

            let remote = Arc::new(MockRemote {
                url: url.clone(),
                events: ev_tx.clone(),
                sent: Arc::clone(&sent),
                closed: Arc::clone(&closed),
            });
            lock(&inner.ops).push(TransportOp::Connect { url: url.clone() });
            lock(&inner.remotes).push(remote);
            let open = inner.open.fetch_add(1, Ordering::SeqCst) + 1;
            inner.max_open.fetch_max(open, Ordering::SeqCst);

            if inner.auto_open.load(Ordering::SeqCst) {
                let _ = ev_tx.send(ChannelEvent::Open).await;
            }

            // Pump: record outbound frames until the channel is torn down.
            let pump_cancel = cancel.clone();
            let pump = tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = pump_cancel.cancelled() => break,
                        frame = out_rx.recv() => match frame {
                            Some(text) => lock(&sent).push(text),
                            None => break,
                        },
                    }
                }
                closed.store(true, Ordering::SeqCst);
                inner.open.fetch_sub(1, Ordering::SeqCst);
                lock(&inner.ops).push(TransportOp::Close { url });
            });

            Ok(ChannelParts { channel: Channel::new(out_tx, cancel, pump), events: ev_rx })
        })
    }
}

struct MockSurfaceInner {
    writes: Mutex<Vec<String>>,
    size: Mutex<(u16, u16)>,
    disposed: AtomicUsize,
}

/// Terminal surface double: records writes and dispose calls, dimensions
/// settable from the test.
#[derive(Clone)]
pub struct MockSurface {
    inner: Arc<MockSurfaceInner>,
}

impl MockSurface {
    pub fn new(cols: u16, rows: u16) -> Self {
        Self {
            inner: Arc::new(MockSurfaceInner {
                writes: Mutex::new(Vec::new()),
                size: Mutex::new((cols, rows)),
                disposed: AtomicUsize::new(0),
            }),
        }
    }

    pub fn set_size(&self, cols: u16, rows: u16) {
        *lock(&self.inner.size) = (cols, rows);
    }

    pub fn writes(&self) -> Vec<String> {
        lock(&self.inner.writes).clone()
    }

    /// All written output, concatenated.
    pub fn rendered(&self) -> String {
        self.writes().concat()
    }

    pub fn dispose_count(&self) -> usize {
        self.inner.disposed.load(Ordering::SeqCst)
    }
}

impl TerminalSurface for MockSurface {
    fn write(&mut self, data: &str) {
        lock(&self.inner.writes).push(data.to_owned());
    }

    fn size(&self) -> (u16, u16) {
        *lock(&self.inner.size)
    }

    fn dispose(&mut self) {
        self.inner.disposed.fetch_add(1, Ordering::SeqCst);
    }
}

/// Silent notifier for tests that assert on notification traffic.
#[derive(Clone, Default)]
pub struct RecordingNotifier {
    messages: Arc<Mutex<Vec<(bool, String)>>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// `(is_error, message)` pairs in arrival order.
    pub fn messages(&self) -> Vec<(bool, String)> {
        lock(&self.messages).clone()
    }

    pub fn errors(&self) -> Vec<String> {
        self.messages().into_iter().filter(|(err, _)| *err).map(|(_, m)| m).collect()
    }
}

impl crate::notify::Notifier for RecordingNotifier {
    fn success(&self, message: &str) {
        lock(&self.messages).push((false, message.to_owned()));
    }

    fn error(&self, message: &str) {
        lock(&self.messages).push((true, message.to_owned()));
    }
}
