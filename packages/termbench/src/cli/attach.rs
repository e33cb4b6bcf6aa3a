use anyhow::Result;
use bench_core::SessionId;
use nix::poll::{PollFd, PollFlags, PollTimeout, poll};
use session_transport::{Container, ContainerEvent, ContainerId, TransportEvent};
use std::io::Write;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::cli::terminal::{RawTerminal, window_geometry};
use crate::workbench::WorkbenchController;

const DETACH_BYTE: u8 = 0x1D; // Ctrl-]

/// What happened when an attach ended.
#[derive(Debug, PartialEq, Eq)]
pub enum AttachOutcome {
    /// User pressed Ctrl-]; the session keeps running on the server.
    Detached,
    /// The remote process exited or the session was released.
    Exited,
}

/// Split a chunk of keyboard input at the detach key.
///
/// Returns the bytes to forward and whether the detach key was pressed.
fn split_detach(data: &[u8]) -> (&[u8], bool) {
    match data.iter().position(|&b| b == DETACH_BYTE) {
        Some(pos) => (&data[..pos], true),
        None => (data, false),
    }
}

/// Feed stdin to `tx` from a blocking thread until `stop` is set or stdin ends.
fn spawn_stdin_reader(tx: mpsc::Sender<Vec<u8>>, stop: Arc<AtomicBool>) {
    std::thread::spawn(move || {
        use std::io::Read;
        use std::os::fd::AsFd;
        let stdin = std::io::stdin();
        let mut buf = [0u8; 4096];
        while !stop.load(Ordering::Relaxed) {
            let mut fds = [PollFd::new(stdin.as_fd(), PollFlags::POLLIN)];
            match poll(&mut fds, PollTimeout::from(100u16)) {
                Ok(0) | Err(nix::errno::Errno::EINTR) => continue,
                Ok(_) => {}
                Err(_) => break,
            }
            let n = match stdin.lock().read(&mut buf) {
                Ok(0) | Err(_) => break,
                Ok(n) => n,
            };
            if tx.blocking_send(buf[..n].to_vec()).is_err() {
                break;
            }
        }
    });
}

/// Mirror one session on the real terminal until detach or exit.
///
/// `output` carries the bytes of mounted surfaces, as produced by
/// [`ScreenSurfaceFactory::with_sink`](crate::surface::ScreenSurfaceFactory::with_sink).
pub async fn attach(
    controller: Arc<WorkbenchController>,
    id: SessionId,
    mut output: mpsc::UnboundedReceiver<(SessionId, Vec<u8>)>,
) -> Result<AttachOutcome> {
    let raw = RawTerminal::enter()?;
    let transport = controller.transport().clone();
    let mut events = transport.subscribe();

    let (container, container_tx) = Container::channel(ContainerId::new("tty"), 16);
    controller.open_view(&id, container)?;
    if let Some(geometry) = window_geometry() {
        let _ = container_tx.send(ContainerEvent::Resized(geometry)).await;
    }
    {
        let mut stdout = std::io::stdout().lock();
        let _ = stdout.write_all(b"\r[bench: attached -- press Ctrl-] to detach]\r\n");
        let _ = stdout.flush();
    }
    // repaint whatever the session already shows
    transport.focus(&id);

    let mut sigwinch = signal(SignalKind::window_change())?;
    let mut sigcont = signal(SignalKind::from_raw(nix::libc::SIGCONT))?;

    let (stdin_tx, mut stdin_rx) = mpsc::channel::<Vec<u8>>(64);
    let stop_stdin = Arc::new(AtomicBool::new(false));
    spawn_stdin_reader(stdin_tx, Arc::clone(&stop_stdin));

    let outcome = loop {
        tokio::select! {
            Some(data) = stdin_rx.recv() => {
                let (input, detach) = split_detach(&data);
                if !input.is_empty() {
                    match transport.write_input(&id, input) {
                        Ok(true) => {}
                        Ok(false) => debug!(session = %id, bytes = input.len(), "input dropped while disconnected"),
                        Err(_) => break AttachOutcome::Exited,
                    }
                }
                if detach {
                    break AttachOutcome::Detached;
                }
            }

            Some((from, bytes)) = output.recv() => {
                if from == id {
                    let mut stdout = std::io::stdout().lock();
                    let _ = stdout.write_all(&bytes);
                    let _ = stdout.flush();
                }
            }

            event = events.recv() => match event {
                Ok(TransportEvent::Exited { id: exited } | TransportEvent::Released { id: exited })
                    if exited == id =>
                {
                    break AttachOutcome::Exited;
                }
                Ok(TransportEvent::Disconnected { id: lost }) if lost == id => {
                    info!(session = %id, "connection lost, reconnecting");
                }
                Ok(_) | Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => break AttachOutcome::Exited,
            },

            _ = sigwinch.recv() => {
                if let Some(geometry) = window_geometry() {
                    let _ = container_tx.send(ContainerEvent::Resized(geometry)).await;
                }
            }

            // Resumed from a stop: the shell restored cooked mode, the window
            // may have changed size and sockets may have died meanwhile.
            _ = sigcont.recv() => {
                raw.reapply();
                if let Some(geometry) = window_geometry() {
                    let _ = container_tx.send(ContainerEvent::Resized(geometry)).await;
                }
                transport.reconnect_all_if_needed();
            }
        }
    };

    stop_stdin.store(true, Ordering::Relaxed);
    controller.close_view(&id);
    drop(raw);
    match outcome {
        AttachOutcome::Detached => eprintln!("\r\n[bench: detached]"),
        AttachOutcome::Exited => eprintln!("\r\n[bench: exited]"),
    }
    Ok(outcome)
}
