// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::SessionController;
use crate::endpoint::Endpoints;
use crate::event::SessionEvent;
use crate::session::{ExecMode, PodTarget, SessionStatus};
use crate::surface::SurfaceEvent;
use crate::test_support::{settle, MockSurface, MockTransport, TransportOp};

fn target() -> PodTarget {
    PodTarget {
        namespace: "default".to_owned(),
        pod: "web-0".to_owned(),
        containers: vec!["app".to_owned(), "sidecar".to_owned()],
    }
}

fn controller(
    transport: &MockTransport,
    surface: &MockSurface,
) -> anyhow::Result<SessionController> {
    Ok(SessionController::new(
        target(),
        None,
        Endpoints::new("ws://gw"),
        Box::new(transport.clone()),
        Box::new(surface.clone()),
    )?)
}

#[tokio::test]
async fn connected_entry_sends_one_resize_before_any_input() -> anyhow::Result<()> {
    let transport = MockTransport::new();
    let surface = MockSurface::new(120, 40);
    let mut ctl = controller(&transport, &surface)?;

    ctl.connect().await;
    let remote = transport.last_remote().ok_or_else(|| anyhow::anyhow!("no remote"))?;
    remote.open().await;
    ctl.drain_channel_events().await;
    assert_eq!(ctl.status(), SessionStatus::Connected);

    ctl.handle_surface_event(SurfaceEvent::Input("ls\n".to_owned()));
    // Frames land on the mock's pump task; let it drain the queue.
    settle().await;

    let sent = remote.sent();
    assert_eq!(sent.len(), 2, "sent: {sent:?}");
    assert!(sent[0].contains("\"type\":\"resize\""), "first frame: {}", sent[0]);
    assert!(sent[0].contains("\"cols\":120") && sent[0].contains("\"rows\":40"));
    assert!(sent[1].contains("\"type\":\"input\""), "second frame: {}", sent[1]);
    Ok(())
}

#[tokio::test]
async fn surface_events_dropped_unless_connected() -> anyhow::Result<()> {
    let transport = MockTransport::new();
    let surface = MockSurface::new(80, 24);
    let mut ctl = controller(&transport, &surface)?;

    ctl.connect().await;
    assert_eq!(ctl.status(), SessionStatus::Connecting);
    ctl.handle_surface_event(SurfaceEvent::Resize { cols: 100, rows: 30 });
    ctl.handle_surface_event(SurfaceEvent::Input("early\n".to_owned()));
    settle().await;

    let remote = transport.last_remote().ok_or_else(|| anyhow::anyhow!("no remote"))?;
    assert!(remote.sent().is_empty(), "nothing may be sent while connecting");
    Ok(())
}

#[tokio::test]
async fn container_change_closes_before_next_connect() -> anyhow::Result<()> {
    let transport = MockTransport::new().with_auto_open();
    let surface = MockSurface::new(80, 24);
    let mut ctl = controller(&transport, &surface)?;

    ctl.connect().await;
    ctl.drain_channel_events().await;
    ctl.set_container("sidecar").await?;

    let ops = transport.ops();
    assert_eq!(ops.len(), 3, "ops: {ops:?}");
    assert!(matches!(ops[0], TransportOp::Connect { .. }));
    assert!(matches!(ops[1], TransportOp::Close { .. }));
    assert!(matches!(ops[2], TransportOp::Connect { .. }));
    assert_eq!(transport.max_concurrent_open(), 1);

    let urls = transport.connect_urls();
    assert!(urls[1].contains("container=sidecar"), "url: {}", urls[1]);
    assert_eq!(ctl.session().container, "sidecar");
    Ok(())
}

#[tokio::test]
async fn unknown_container_rejected_without_reconnect() -> anyhow::Result<()> {
    let transport = MockTransport::new();
    let surface = MockSurface::new(80, 24);
    let mut ctl = controller(&transport, &surface)?;

    ctl.connect().await;
    let before = transport.ops().len();
    assert!(ctl.set_container("ghost").await.is_err());
    assert_eq!(transport.ops().len(), before);
    assert_eq!(ctl.session().container, "app");
    Ok(())
}

#[tokio::test]
async fn server_disconnect_downgrades_without_error() -> anyhow::Result<()> {
    let transport = MockTransport::new();
    let surface = MockSurface::new(80, 24);
    let mut ctl = controller(&transport, &surface)?;
    let mut events = ctl.subscribe();

    ctl.connect().await;
    let remote = transport.last_remote().ok_or_else(|| anyhow::anyhow!("no remote"))?;
    remote.open().await;
    remote.send_status("disconnected").await;
    ctl.drain_channel_events().await;

    assert_eq!(ctl.status(), SessionStatus::Disconnected);
    assert_eq!(ctl.session().last_error, None);
    assert!(remote.is_closed());

    let mut transitions = Vec::new();
    while let Ok(ev) = events.try_recv() {
        if let SessionEvent::Status(change) = ev {
            transitions.push((change.prev, change.next, change.error));
        }
    }
    assert_eq!(
        transitions.last(),
        Some(&(SessionStatus::Connected, SessionStatus::Disconnected, None))
    );
    Ok(())
}

#[tokio::test]
async fn non_json_payload_written_verbatim() -> anyhow::Result<()> {
    let transport = MockTransport::new();
    let surface = MockSurface::new(80, 24);
    let mut ctl = controller(&transport, &surface)?;

    ctl.connect().await;
    let remote = transport.last_remote().ok_or_else(|| anyhow::anyhow!("no remote"))?;
    remote.open().await;
    remote.send_raw("web-0 login: ").await;
    ctl.drain_channel_events().await;

    assert_eq!(ctl.status(), SessionStatus::Connected);
    assert_eq!(surface.rendered(), "web-0 login: ");
    Ok(())
}

#[tokio::test]
async fn inbound_error_message_sets_error_status() -> anyhow::Result<()> {
    let transport = MockTransport::new();
    let surface = MockSurface::new(80, 24);
    let mut ctl = controller(&transport, &surface)?;

    ctl.connect().await;
    let remote = transport.last_remote().ok_or_else(|| anyhow::anyhow!("no remote"))?;
    remote.open().await;
    remote.send_error("exec denied").await;
    ctl.drain_channel_events().await;

    assert_eq!(ctl.status(), SessionStatus::Error);
    assert_eq!(ctl.session().last_error.as_deref(), Some("exec denied"));
    Ok(())
}

#[tokio::test]
async fn channel_error_then_close_stays_error() -> anyhow::Result<()> {
    let transport = MockTransport::new();
    let surface = MockSurface::new(80, 24);
    let mut ctl = controller(&transport, &surface)?;

    ctl.connect().await;
    let remote = transport.last_remote().ok_or_else(|| anyhow::anyhow!("no remote"))?;
    remote.fail("connection refused").await;
    remote.close().await;
    ctl.drain_channel_events().await;

    // The close that follows an error must not downgrade Error to
    // Disconnected.
    assert_eq!(ctl.status(), SessionStatus::Error);
    assert_eq!(ctl.session().last_error.as_deref(), Some("connection refused"));
    Ok(())
}

#[tokio::test]
async fn close_is_idempotent_and_disposes_once() -> anyhow::Result<()> {
    let transport = MockTransport::new().with_auto_open();
    let surface = MockSurface::new(80, 24);
    let mut ctl = controller(&transport, &surface)?;

    ctl.connect().await;
    ctl.drain_channel_events().await;
    ctl.close().await;
    ctl.close().await;

    let remote = transport.last_remote().ok_or_else(|| anyhow::anyhow!("no remote"))?;
    assert!(remote.is_closed());
    assert_eq!(surface.dispose_count(), 1);
    assert_eq!(ctl.status(), SessionStatus::Disconnected);
    Ok(())
}

#[tokio::test]
async fn failed_attempt_advances_to_next_shell() -> anyhow::Result<()> {
    let transport = MockTransport::new();
    let surface = MockSurface::new(80, 24);
    let mut ctl = controller(&transport, &surface)?;

    ctl.connect().await;
    let remote = transport.last_remote().ok_or_else(|| anyhow::anyhow!("no remote"))?;
    remote.open().await;
    remote.send_output("OCI runtime exec failed").await;
    ctl.drain_channel_events().await;

    assert_eq!(ctl.session().shell_failures, 1);
    assert_eq!(ctl.session().shell, "/bin/sh");
    let urls = transport.connect_urls();
    assert_eq!(urls.len(), 2);
    assert!(urls[1].contains("shell=/bin/sh"), "url: {}", urls[1]);
    Ok(())
}

#[tokio::test]
async fn explicit_shell_change_resets_failure_state() -> anyhow::Result<()> {
    let transport = MockTransport::new();
    let surface = MockSurface::new(80, 24);
    let mut ctl = controller(&transport, &surface)?;

    ctl.connect().await;
    let remote = transport.last_remote().ok_or_else(|| anyhow::anyhow!("no remote"))?;
    remote.open().await;
    remote.send_output("OCI runtime exec failed").await;
    ctl.drain_channel_events().await;
    assert_eq!(ctl.session().shell_failures, 1);

    ctl.set_shell("/bin/zsh").await;
    assert_eq!(ctl.session().shell_failures, 0);
    assert!(!ctl.session().distroless);
    let urls = transport.connect_urls();
    assert!(urls.last().is_some_and(|u| u.contains("shell=/bin/zsh")));
    Ok(())
}

#[tokio::test]
async fn explicit_reconnect_keeps_the_counter() -> anyhow::Result<()> {
    let transport = MockTransport::new();
    let surface = MockSurface::new(80, 24);
    let mut ctl = controller(&transport, &surface)?;

    ctl.connect().await;
    let remote = transport.last_remote().ok_or_else(|| anyhow::anyhow!("no remote"))?;
    remote.open().await;
    remote.send_output("exit code 127").await;
    ctl.drain_channel_events().await;
    assert_eq!(ctl.session().shell_failures, 1);

    ctl.reconnect().await;
    assert_eq!(ctl.session().shell_failures, 1);
    Ok(())
}

#[tokio::test]
async fn detector_never_runs_in_debug_mode() -> anyhow::Result<()> {
    let transport = MockTransport::new();
    let surface = MockSurface::new(80, 24);
    let mut ctl = controller(&transport, &surface)?;

    ctl.set_debug_image("busybox:latest").await;
    ctl.set_mode(ExecMode::Debug).await;
    let remote = transport.last_remote().ok_or_else(|| anyhow::anyhow!("no remote"))?;
    remote.open().await;
    remote.send_output("OCI runtime exec failed").await;
    ctl.drain_channel_events().await;

    assert_eq!(ctl.session().shell_failures, 0);
    assert!(!ctl.session().distroless);
    // The output itself still renders.
    assert_eq!(surface.rendered(), "OCI runtime exec failed");
    Ok(())
}

#[tokio::test]
async fn set_mode_to_current_mode_is_a_noop() -> anyhow::Result<()> {
    let transport = MockTransport::new();
    let surface = MockSurface::new(80, 24);
    let mut ctl = controller(&transport, &surface)?;

    ctl.connect().await;
    let before = transport.ops().len();
    ctl.set_mode(ExecMode::Shell).await;
    assert_eq!(transport.ops().len(), before);
    Ok(())
}

#[tokio::test]
async fn status_transitions_carry_increasing_seq() -> anyhow::Result<()> {
    let transport = MockTransport::new();
    let surface = MockSurface::new(80, 24);
    let mut ctl = controller(&transport, &surface)?;
    let mut events = ctl.subscribe();

    ctl.connect().await;
    let remote = transport.last_remote().ok_or_else(|| anyhow::anyhow!("no remote"))?;
    remote.open().await;
    ctl.drain_channel_events().await;

    let mut seqs = Vec::new();
    let mut pairs = Vec::new();
    while let Ok(ev) = events.try_recv() {
        if let SessionEvent::Status(change) = ev {
            seqs.push(change.seq);
            pairs.push((change.prev, change.next));
        }
    }
    assert_eq!(
        pairs,
        vec![
            (SessionStatus::Disconnected, SessionStatus::Connecting),
            (SessionStatus::Connecting, SessionStatus::Connected),
        ]
    );
    assert!(seqs.windows(2).all(|w| w[0] < w[1]));
    Ok(())
}
