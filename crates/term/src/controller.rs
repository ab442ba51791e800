// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session controller: the connection state machine.
//!
//! One controller owns one [`Session`], at most one live [`Channel`], and
//! the terminal surface bound to the session. User actions, surface events,
//! and channel events all funnel through sequential async methods; there
//! is no parallelism inside a session, so every invariant holds between
//! suspension points. [`SessionController::run`] is the select-loop used by
//! embedders; each transition method is independently callable for tests
//! and manual drivers.

use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use crate::distroless::DistrolessDetector;
use crate::endpoint::{debug_container_name, Endpoints};
use crate::error::SessionError;
use crate::event::{SessionEvent, StatusChange};
use crate::notify::{LogNotifier, Notifier};
use crate::protocol::{decode, encode, ClientMessage, Decoded, ServerMessage};
use crate::session::{ExecMode, PodTarget, Session, SessionStatus};
use crate::shells::ShellRegistry;
use crate::surface::{SurfaceEvent, TerminalSurface};
use crate::transport::{Channel, ChannelEvent, Transport};

/// Status value the server sends when it ends the session cleanly.
const SERVER_DISCONNECTED: &str = "disconnected";

/// User actions consumed by [`SessionController::run`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    SetContainer(String),
    SetShell(String),
    SetMode(ExecMode),
    SetDebugImage(String),
    Reconnect,
    Close,
}

/// What the select-loop saw this iteration.
enum Step {
    Command(Option<Command>),
    Surface(Option<SurfaceEvent>),
    Channel(Option<ChannelEvent>),
}

pub struct SessionController {
    session: Session,
    shells: ShellRegistry,
    detector: DistrolessDetector,
    endpoints: Endpoints,
    transport: Box<dyn Transport>,
    surface: Box<dyn TerminalSurface>,
    notifier: Box<dyn Notifier>,
    conn: Option<Channel>,
    conn_events: Option<mpsc::Receiver<ChannelEvent>>,
    events: broadcast::Sender<SessionEvent>,
    seq: u64,
    closed: bool,
}

impl SessionController {
    pub fn new(
        target: PodTarget,
        container: Option<String>,
        endpoints: Endpoints,
        transport: Box<dyn Transport>,
        surface: Box<dyn TerminalSurface>,
    ) -> Result<Self, SessionError> {
        let shells = ShellRegistry::default();
        let session = Session::new(target, container, &shells)?;
        let (events, _) = broadcast::channel(64);
        Ok(Self {
            session,
            shells,
            detector: DistrolessDetector::default(),
            endpoints,
            transport,
            surface,
            notifier: Box::new(LogNotifier),
            conn: None,
            conn_events: None,
            events,
            seq: 0,
            closed: false,
        })
    }

    /// Replace the default notifier.
    pub fn with_notifier(mut self, notifier: Box<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    /// Replace the default shell registry; also re-selects its first entry.
    pub fn with_shells(mut self, shells: ShellRegistry) -> Self {
        self.session.shell = shells.first().to_owned();
        self.shells = shells;
        self
    }

    // -- Accessors -----------------------------------------------------------

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn status(&self) -> SessionStatus {
        self.session.status
    }

    /// Subscribe to status and diagnostic events.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    // -- Connection lifecycle ------------------------------------------------

    /// Open the connection for the current mode, tearing down any previous
    /// one first. Every mode-affecting action funnels through here, which is
    /// what enforces the single-active-connection invariant.
    pub async fn connect(&mut self) {
        self.teardown_connection().await;
        self.detector.begin_attempt();
        self.session.last_error = None;
        let url = self.current_url();
        self.set_status(SessionStatus::Connecting, None);
        debug!(url = %url, mode = %self.session.mode, "opening session channel");
        match self.transport.connect(&url).await {
            Ok(parts) => {
                self.conn = Some(parts.channel);
                self.conn_events = Some(parts.events);
            }
            Err(e) => {
                self.set_status(SessionStatus::Error, Some(e.to_string()));
                self.notifier.error(&format!("connection failed: {e}"));
            }
        }
    }

    /// Close the session: tear down the connection and release the surface.
    /// Idempotent; a second call returns immediately.
    pub async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.teardown_connection().await;
        if self.session.status != SessionStatus::Disconnected {
            self.set_status(SessionStatus::Disconnected, None);
        }
        self.surface.dispose();
    }

    /// Close the current channel and drop its event feed. Dropping the
    /// receiver severs any late events a stale pump might still produce, so
    /// a closed connection is structurally inert.
    async fn teardown_connection(&mut self) {
        if let Some(mut conn) = self.conn.take() {
            conn.close().await;
        }
        self.conn_events = None;
    }

    fn current_url(&self) -> String {
        match self.session.mode {
            ExecMode::Shell => self.endpoints.shell_url(
                &self.session.namespace,
                &self.session.pod,
                &self.session.container,
                &self.session.shell,
            ),
            ExecMode::Debug => self.endpoints.debug_url(
                &self.session.namespace,
                &self.session.pod,
                &debug_container_name(),
                &self.session.debug_image,
                &self.session.container,
            ),
        }
    }

    // -- Mode-affecting actions ----------------------------------------------

    /// Switch to another container of the pod.
    pub async fn set_container(&mut self, name: &str) -> Result<(), SessionError> {
        self.session.select_container(name)?;
        self.session.reset_failure_state();
        self.connect().await;
        Ok(())
    }

    /// Pick an explicit shell. Reconnects when in Shell mode.
    pub async fn set_shell(&mut self, shell: &str) {
        self.session.shell = shell.to_owned();
        self.session.reset_failure_state();
        if self.session.mode == ExecMode::Shell {
            self.connect().await;
        }
    }

    /// Pick the debug image. Reconnects when in Debug mode.
    pub async fn set_debug_image(&mut self, image: &str) {
        self.session.debug_image = image.to_owned();
        if self.session.mode == ExecMode::Debug {
            self.connect().await;
        }
    }

    /// Toggle between shell exec and debug attach.
    pub async fn set_mode(&mut self, mode: ExecMode) {
        if self.session.mode == mode {
            return;
        }
        self.session.mode = mode;
        self.session.reset_failure_state();
        self.connect().await;
    }

    pub async fn reconnect(&mut self) {
        self.connect().await;
    }

    // -- Surface events ------------------------------------------------------

    /// Feed one event from the terminal surface.
    ///
    /// Input and resizes are forwarded only while Connected; anything
    /// arriving earlier is dropped. No queueing, no replay beyond the one
    /// resize sent on Connected entry.
    pub fn handle_surface_event(&mut self, event: SurfaceEvent) {
        if self.session.status != SessionStatus::Connected {
            return;
        }
        match event {
            SurfaceEvent::Input(data) => self.send(&ClientMessage::Input { data }),
            SurfaceEvent::Resize { cols, rows } => {
                self.send(&ClientMessage::Resize { cols, rows });
            }
        }
    }

    fn send(&self, msg: &ClientMessage) {
        if let Some(ref conn) = self.conn {
            conn.send(encode(msg));
        }
    }

    // -- Channel events ------------------------------------------------------

    /// Feed one event from the live channel, in arrival order.
    pub async fn handle_channel_event(&mut self, event: ChannelEvent) {
        match event {
            ChannelEvent::Open => self.on_open(),
            ChannelEvent::Message(raw) => self.on_message(&raw).await,
            ChannelEvent::Error(err) => self.on_channel_error(err),
            ChannelEvent::Closed => self.on_closed().await,
        }
    }

    /// Process every channel event already queued. For embedders that drive
    /// the controller manually instead of through [`run`].
    pub async fn drain_channel_events(&mut self) {
        loop {
            let Some(rx) = self.conn_events.as_mut() else { return };
            match rx.try_recv() {
                Ok(ev) => self.handle_channel_event(ev).await,
                Err(mpsc::error::TryRecvError::Empty) => return,
                Err(mpsc::error::TryRecvError::Disconnected) => {
                    self.teardown_connection().await;
                    return;
                }
            }
        }
    }

    fn on_open(&mut self) {
        self.set_status(SessionStatus::Connected, None);
        // The first outbound message is always the resize carrying the
        // surface's dimensions at this instant; input forwarding starts
        // after it.
        let (cols, rows) = self.surface.size();
        self.send(&ClientMessage::Resize { cols, rows });
        info!(
            pod = %self.session.pod,
            container = %self.session.container,
            mode = %self.session.mode,
            "session connected"
        );
        self.notifier
            .success(&format!("connected to {}/{}", self.session.pod, self.session.container));
    }

    async fn on_message(&mut self, raw: &str) {
        match decode(raw) {
            Decoded::Message(ServerMessage::Output { data }) => {
                self.surface.write(&data);
                if self.session.mode == ExecMode::Shell {
                    self.scan_output(&data).await;
                }
            }
            Decoded::Message(ServerMessage::Status { status }) => {
                if status == SERVER_DISCONNECTED {
                    // The server ended the session; not an error.
                    self.teardown_connection().await;
                    self.set_status(SessionStatus::Disconnected, None);
                } else {
                    debug!(status = %status, "unhandled status message");
                }
            }
            Decoded::Message(ServerMessage::Error { error }) => {
                self.set_status(SessionStatus::Error, Some(error.clone()));
                self.notifier.error(&error);
            }
            Decoded::Raw(text) => {
                // Peer without the structured protocol: raw terminal bytes.
                self.surface.write(&text);
                if self.session.mode == ExecMode::Shell {
                    self.scan_output(&text).await;
                }
            }
        }
    }

    /// Feed shell-mode output to the distroless detector and act on a newly
    /// classified failed attempt: advance to the next candidate, or latch
    /// the distroless flag once the registry is exhausted.
    async fn scan_output(&mut self, chunk: &str) {
        if self.session.distroless {
            return;
        }
        let Some(marker) = self.detector.observe(chunk) else { return };
        self.session.shell_failures += 1;
        debug!(
            marker = %marker,
            shell = %self.session.shell,
            failures = self.session.shell_failures,
            "shell attempt failed"
        );
        if self.session.shell_failures >= self.shells.len() {
            self.session.distroless = true;
            self.announce_distroless();
        } else if let Some(next) = self.shells.at(self.session.shell_failures) {
            // The controller advances through the registry on its own; only
            // a user-driven container/shell/mode change resets the counter.
            self.session.shell = next.to_owned();
            self.connect().await;
        }
    }

    /// One-time diagnostic, guarded by the distroless flag transition.
    fn announce_distroless(&mut self) {
        let message = format!(
            "no shell could be started in container \"{}\"; the image looks distroless. \
             Attach a debug container to get a shell with tools.",
            self.session.container
        );
        self.surface.write(&format!("\r\n[podterm] {message}\r\n"));
        self.notifier.error(&message);
        let _ = self.events.send(SessionEvent::ShellUnavailable {
            container: self.session.container.clone(),
            attempts: self.session.shell_failures,
        });
        warn!(
            container = %self.session.container,
            attempts = self.session.shell_failures,
            "all shell candidates failed"
        );
    }

    fn on_channel_error(&mut self, err: String) {
        self.notifier.error(&format!("connection error: {err}"));
        self.set_status(SessionStatus::Error, Some(err));
    }

    async fn on_closed(&mut self) {
        self.teardown_connection().await;
        match self.session.status {
            // A clean close not preceded by an error.
            SessionStatus::Connected => self.set_status(SessionStatus::Disconnected, None),
            // Gone before it ever opened.
            SessionStatus::Connecting => self.set_status(
                SessionStatus::Error,
                Some("channel closed before opening".to_owned()),
            ),
            SessionStatus::Disconnected | SessionStatus::Error => {}
        }
    }

    fn set_status(&mut self, next: SessionStatus, error: Option<String>) {
        let prev = self.session.status;
        if prev == next && error.is_none() {
            return;
        }
        self.session.status = next;
        if let Some(ref e) = error {
            self.session.last_error = Some(e.clone());
        }
        self.seq += 1;
        let _ = self.events.send(SessionEvent::Status(StatusChange {
            prev,
            next,
            seq: self.seq,
            error,
        }));
    }

    // -- Select loop ---------------------------------------------------------

    /// Drive the session until the command feed closes, a [`Command::Close`]
    /// arrives, or the surface feed ends. Inbound channel events, surface
    /// events, and commands are each processed strictly in arrival order.
    pub async fn run(
        &mut self,
        mut commands: mpsc::Receiver<Command>,
        mut surface_rx: mpsc::Receiver<SurfaceEvent>,
    ) {
        loop {
            // Take the event receiver so the select arm holds no borrow of
            // `self`; handlers below may replace it.
            let mut conn_events = self.conn_events.take();
            let step = tokio::select! {
                cmd = commands.recv() => Step::Command(cmd),
                ev = surface_rx.recv() => Step::Surface(ev),
                ev = recv_or_pending(&mut conn_events) => Step::Channel(ev),
            };
            self.conn_events = conn_events;

            match step {
                Step::Command(None) | Step::Command(Some(Command::Close)) => {
                    self.close().await;
                    break;
                }
                Step::Command(Some(cmd)) => {
                    if let Err(e) = self.apply(cmd).await {
                        warn!(err = %e, "command rejected");
                        self.notifier.error(&e.to_string());
                    }
                }
                Step::Surface(None) => {
                    // The surface is gone; nothing left to render into.
                    self.close().await;
                    break;
                }
                Step::Surface(Some(ev)) => self.handle_surface_event(ev),
                Step::Channel(None) => self.teardown_connection().await,
                Step::Channel(Some(ev)) => self.handle_channel_event(ev).await,
            }
        }
    }

    /// Apply one user command.
    pub async fn apply(&mut self, cmd: Command) -> Result<(), SessionError> {
        match cmd {
            Command::SetContainer(name) => self.set_container(&name).await?,
            Command::SetShell(shell) => self.set_shell(&shell).await,
            Command::SetMode(mode) => self.set_mode(mode).await,
            Command::SetDebugImage(image) => self.set_debug_image(&image).await,
            Command::Reconnect => self.reconnect().await,
            Command::Close => self.close().await,
        }
        Ok(())
    }
}

/// Await the next channel event, or park forever when no channel is open so
/// the other select arms stay live.
async fn recv_or_pending(rx: &mut Option<mpsc::Receiver<ChannelEvent>>) -> Option<ChannelEvent> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
#[path = "controller_tests.rs"]
mod tests;
