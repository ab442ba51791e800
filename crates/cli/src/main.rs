// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `podterm` — attach a local terminal to a container in a running pod.
//!
//! Connects to an exec gateway via WebSocket, puts the local terminal in raw
//! mode, and proxies I/O between the user's terminal and the remote
//! container. Detach with Ctrl+] (0x1d). When the selected container has no
//! usable shell the session reports the distroless condition; rerun with
//! `--debug-image` to attach an ephemeral debug container instead.

use std::io::Write as _;
use std::os::fd::{AsRawFd, BorrowedFd};
use std::sync::{Mutex, Once};

use clap::Parser;
use nix::sys::termios;
use tokio::sync::mpsc;
use tracing::debug;

use podterm::controller::{Command, SessionController};
use podterm::endpoint::Endpoints;
use podterm::event::SessionEvent;
use podterm::session::{ExecMode, PodTarget, SessionStatus};
use podterm::surface::{SurfaceEvent, TerminalSurface};
use podterm::transport::ws::WsTransport;

/// Detach key: Ctrl+] (ASCII 0x1d), same as telnet / docker attach.
const DETACH_KEY: u8 = 0x1d;

/// One-time panic hook installation guard.
static PANIC_HOOK_INSTALLED: Once = Once::new();

/// Saved terminal state for panic-time restoration.
/// Populated when entering raw mode, cleared on drop.
static PANIC_TERMIOS: Mutex<Option<(i32, nix::libc::termios)>> = Mutex::new(None);

/// Attach an interactive terminal to a container in a running pod.
#[derive(Debug, Parser)]
#[command(
    name = "podterm",
    version,
    about = "Attach an interactive terminal to a container in a running pod.\nDetach with Ctrl+]."
)]
struct Args {
    /// Exec gateway base URL (e.g. ws://127.0.0.1:8080).
    #[arg(env = "PODTERM_SERVER")]
    server: String,

    /// Pod namespace.
    #[arg(long, env = "PODTERM_NAMESPACE", default_value = "default")]
    namespace: String,

    /// Pod name.
    #[arg(long)]
    pod: String,

    /// Container names in the pod (comma-separated), as reported by the
    /// resource API.
    #[arg(long, value_delimiter = ',')]
    containers: Vec<String>,

    /// Container to attach to (default: the first one).
    #[arg(long)]
    container: Option<String>,

    /// Shell to exec (default: first candidate, advancing automatically
    /// when a candidate is missing).
    #[arg(long)]
    shell: Option<String>,

    /// Start in debug mode, attaching an ephemeral container with this
    /// image instead of execing a shell.
    #[arg(long, env = "PODTERM_DEBUG_IMAGE")]
    debug_image: Option<String>,

    /// Log filter (tracing EnvFilter syntax).
    #[arg(long, env = "PODTERM_LOG", default_value = "warn")]
    log_level: String,

    /// Log format: text or json.
    #[arg(long, env = "PODTERM_LOG_FORMAT", default_value = "text")]
    log_format: String,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    init_tracing(&args);
    std::process::exit(run(args).await);
}

fn init_tracing(args: &Args) {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_new(&args.log_level).unwrap_or_else(|_| EnvFilter::new("warn"));

    // Logs go to stderr: stdout belongs to the remote terminal while the
    // local TTY is in raw mode.
    match args.log_format.as_str() {
        "json" => {
            fmt::fmt().with_env_filter(filter).with_writer(std::io::stderr).json().init();
        }
        _ => {
            fmt::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
        }
    }
}

async fn run(args: Args) -> i32 {
    let mut containers = args.containers.clone();
    if containers.is_empty() {
        match args.container {
            Some(ref name) => containers.push(name.clone()),
            None => {
                eprintln!("error: no --containers or --container given");
                return 2;
            }
        }
    }
    let target = PodTarget {
        namespace: args.namespace.clone(),
        pod: args.pod.clone(),
        containers,
    };

    // Enter raw mode before the first byte of remote output arrives.
    let raw_guard = match RawModeGuard::enter() {
        Ok(g) => g,
        Err(e) => {
            eprintln!("error: failed to enter raw mode: {e}");
            return 1;
        }
    };
    install_panic_hook(&raw_guard);

    let mut controller = match SessionController::new(
        target,
        args.container.clone(),
        Endpoints::new(&args.server),
        Box::new(WsTransport),
        Box::new(TtySurface),
    ) {
        Ok(c) => c,
        Err(e) => {
            drop(raw_guard);
            eprintln!("error: {e}");
            return 2;
        }
    };

    let (cmd_tx, cmd_rx) = mpsc::channel::<Command>(8);
    let (surf_tx, surf_rx) = mpsc::channel::<SurfaceEvent>(64);

    spawn_stdin_reader(cmd_tx, surf_tx.clone());
    spawn_resize_watcher(surf_tx);
    spawn_status_printer(controller.subscribe());

    // Initial open: debug attach when an image was requested, shell exec
    // otherwise. `set_shell`/`set_mode` issue the connect themselves.
    match (args.debug_image.as_deref(), args.shell.as_deref()) {
        (Some(image), _) => {
            controller.set_debug_image(image).await;
            controller.set_mode(ExecMode::Debug).await;
        }
        (None, Some(shell)) => controller.set_shell(shell).await,
        (None, None) => controller.connect().await,
    }

    controller.run(cmd_rx, surf_rx).await;

    drop(raw_guard);
    eprintln!("\npodterm: detached.");
    0
}

/// Read stdin on a blocking thread, splitting the detach key out of the
/// byte stream. Everything else is forwarded as surface input.
fn spawn_stdin_reader(cmd_tx: mpsc::Sender<Command>, surf_tx: mpsc::Sender<SurfaceEvent>) {
    std::thread::spawn(move || {
        use std::io::Read;
        let stdin = std::io::stdin();
        let mut handle = stdin.lock();
        let mut buf = [0u8; 4096];
        loop {
            match handle.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    let chunk = &buf[..n];
                    if let Some(pos) = chunk.iter().position(|b| *b == DETACH_KEY) {
                        if pos > 0 {
                            let data = String::from_utf8_lossy(&chunk[..pos]).into_owned();
                            let _ = surf_tx.blocking_send(SurfaceEvent::Input(data));
                        }
                        let _ = cmd_tx.blocking_send(Command::Close);
                        break;
                    }
                    let data = String::from_utf8_lossy(chunk).into_owned();
                    if surf_tx.blocking_send(SurfaceEvent::Input(data)).is_err() {
                        break;
                    }
                }
                Err(_) => break,
            }
        }
    });
}

/// Forward SIGWINCH as resize events carrying the current dimensions.
fn spawn_resize_watcher(surf_tx: mpsc::Sender<SurfaceEvent>) {
    let Ok(mut sigwinch) =
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::window_change())
    else {
        debug!("SIGWINCH handler unavailable; resizes will not propagate");
        return;
    };
    tokio::spawn(async move {
        while sigwinch.recv().await.is_some() {
            let (cols, rows) = terminal_size().unwrap_or((80, 24));
            if surf_tx.send(SurfaceEvent::Resize { cols, rows }).await.is_err() {
                break;
            }
        }
    });
}

/// Print connection-state hints without corrupting the raw-mode screen.
fn spawn_status_printer(mut events: tokio::sync::broadcast::Receiver<SessionEvent>) {
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                SessionEvent::Status(change) => match (change.next, change.error) {
                    (SessionStatus::Disconnected, _) => {
                        print_line("session ended, press Ctrl+] to exit");
                    }
                    (SessionStatus::Error, Some(err)) => {
                        print_line(&format!("connection error: {err} (press Ctrl+] to exit)"));
                    }
                    _ => {}
                },
                SessionEvent::ShellUnavailable { container, .. } => {
                    print_line(&format!(
                        "container \"{container}\" has no shell; retry with --debug-image"
                    ));
                }
            }
        }
    });
}

fn print_line(message: &str) {
    let mut stdout = std::io::stdout();
    let _ = write!(stdout, "\r\npodterm: {message}\r\n");
    let _ = stdout.flush();
}

/// Local TTY as the terminal surface: remote output goes straight to
/// stdout; dimensions come from the TIOCGWINSZ ioctl.
struct TtySurface;

impl TerminalSurface for TtySurface {
    fn write(&mut self, data: &str) {
        let mut stdout = std::io::stdout();
        let _ = stdout.write_all(data.as_bytes());
        let _ = stdout.flush();
    }

    fn size(&self) -> (u16, u16) {
        terminal_size().unwrap_or((80, 24))
    }

    fn dispose(&mut self) {
        // Raw-mode restoration is the RawModeGuard's job.
    }
}

/// RAII guard that restores the original terminal attributes on drop.
///
/// Stores a raw fd (stdin) and the original termios state. The fd is valid
/// for the lifetime of the process (stdin never closes), so this is safe.
struct RawModeGuard {
    fd: i32,
    original: termios::Termios,
}

impl RawModeGuard {
    fn enter() -> anyhow::Result<Self> {
        let fd = std::io::stdin().as_raw_fd();
        let borrowed = borrow_fd(fd);
        let original = termios::tcgetattr(borrowed)?;
        let mut raw = original.clone();
        termios::cfmakeraw(&mut raw);
        termios::tcsetattr(borrowed, termios::SetArg::TCSAFLUSH, &raw)?;
        Ok(Self { fd, original })
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        // Clear the panic hook's termios state; this drop restores normally.
        if let Ok(mut guard) = PANIC_TERMIOS.lock() {
            *guard = None;
        }
        let borrowed = borrow_fd(self.fd);
        let _ = termios::tcsetattr(borrowed, termios::SetArg::TCSAFLUSH, &self.original);
    }
}

/// Install a panic hook (once) that restores the terminal even on unwind.
fn install_panic_hook(raw_guard: &RawModeGuard) {
    let raw_termios: nix::libc::termios = raw_guard.original.clone().into();
    if let Ok(mut guard) = PANIC_TERMIOS.lock() {
        *guard = Some((raw_guard.fd, raw_termios));
    }
    PANIC_HOOK_INSTALLED.call_once(|| {
        let prev_hook = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            if let Ok(mut guard) = PANIC_TERMIOS.lock() {
                if let Some((fd, ref saved)) = *guard {
                    // SAFETY: restoring terminal attributes in a panic hook;
                    // the fd is stdin, which remains valid for the lifetime
                    // of the process.
                    #[allow(unsafe_code)]
                    unsafe {
                        nix::libc::tcsetattr(fd, nix::libc::TCSAFLUSH, saved);
                    }
                    *guard = None;
                }
            }
            prev_hook(info);
        }));
    });
}

/// Create a `BorrowedFd` from a raw fd that we know is valid.
fn borrow_fd(fd: i32) -> BorrowedFd<'static> {
    // SAFETY: stdin fd 0 is valid for the lifetime of the process.
    #[allow(unsafe_code)]
    unsafe {
        BorrowedFd::borrow_raw(fd)
    }
}

fn terminal_size() -> Option<(u16, u16)> {
    let fd = std::io::stdout().as_raw_fd();
    let mut ws = nix::libc::winsize { ws_row: 0, ws_col: 0, ws_xpixel: 0, ws_ypixel: 0 };
    // SAFETY: TIOCGWINSZ reads the terminal size into a winsize struct. The
    // fd is stdout which is valid, and ws is a properly-initialized stack
    // variable with the correct layout for this ioctl.
    #[allow(unsafe_code)]
    let ret = unsafe { nix::libc::ioctl(fd, nix::libc::TIOCGWINSZ, &mut ws) };
    if ret == 0 && ws.ws_col > 0 && ws.ws_row > 0 {
        Some((ws.ws_col, ws.ws_row))
    } else {
        None
    }
}
