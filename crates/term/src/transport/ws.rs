// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! WebSocket transport: one tokio-tungstenite socket per channel.

use std::future::Future;
use std::pin::Pin;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{Channel, ChannelEvent, ChannelParts, Transport};

/// Outbound queue depth. Input is keystroke-sized, so this only fills when
/// the socket has stalled, at which point frames may be dropped.
const OUTBOUND_BUFFER: usize = 256;

#[derive(Debug, Default, Clone, Copy)]
pub struct WsTransport;

impl Transport for WsTransport {
    fn connect(
        &self,
        url: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<ChannelParts>> + Send + '_>> {
        let url = url.to_owned();
        Box::pin(async move {
            let (out_tx, out_rx) = mpsc::channel(OUTBOUND_BUFFER);
            let (ev_tx, ev_rx) = mpsc::channel(OUTBOUND_BUFFER);
            let cancel = CancellationToken::new();
            let pump = tokio::spawn(pump(url, out_rx, ev_tx, cancel.clone()));
            Ok(ChannelParts { channel: Channel::new(out_tx, cancel, pump), events: ev_rx })
        })
    }
}

/// Connection pump: opens the socket, then shuttles frames both ways until
/// cancelled or the peer goes away. Every exit path emits `Closed` so the
/// consumer sees a terminal event.
async fn pump(
    url: String,
    mut out_rx: mpsc::Receiver<String>,
    ev_tx: mpsc::Sender<ChannelEvent>,
    cancel: CancellationToken,
) {
    let stream = tokio::select! {
        _ = cancel.cancelled() => return,
        res = tokio_tungstenite::connect_async(&url) => match res {
            Ok((stream, _response)) => stream,
            Err(e) => {
                debug!(err = %e, "WebSocket connect failed");
                let _ = ev_tx.send(ChannelEvent::Error(e.to_string())).await;
                let _ = ev_tx.send(ChannelEvent::Closed).await;
                return;
            }
        },
    };

    if ev_tx.send(ChannelEvent::Open).await.is_err() {
        return;
    }
    let (mut sink, mut read) = stream.split();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                let _ = sink.close().await;
                break;
            }
            frame = out_rx.recv() => match frame {
                Some(text) => {
                    if sink.send(Message::Text(text.into())).await.is_err() {
                        let _ = ev_tx.send(ChannelEvent::Closed).await;
                        break;
                    }
                }
                None => break, // channel handle dropped
            },
            msg = read.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    if ev_tx.send(ChannelEvent::Message(text.to_string())).await.is_err() {
                        break;
                    }
                }
                Some(Ok(Message::Binary(data))) => {
                    // Bare exec peers stream terminal bytes in binary frames.
                    let text = String::from_utf8_lossy(&data).into_owned();
                    if ev_tx.send(ChannelEvent::Message(text)).await.is_err() {
                        break;
                    }
                }
                Some(Ok(Message::Close(_))) | None => {
                    debug!("WebSocket closed by peer");
                    let _ = ev_tx.send(ChannelEvent::Closed).await;
                    break;
                }
                Some(Err(e)) => {
                    debug!(err = %e, "WebSocket error");
                    let _ = ev_tx.send(ChannelEvent::Error(e.to_string())).await;
                    let _ = ev_tx.send(ChannelEvent::Closed).await;
                    break;
                }
                _ => {} // ping/pong ignored
            }
        }
    }
}
