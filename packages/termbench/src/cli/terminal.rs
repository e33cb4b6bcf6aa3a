//! Controlling-terminal plumbing for `attach`.

use anyhow::{Context, Result};
use nix::sys::termios::{self, SetArg, Termios};
use session_transport::Geometry;
use tracing::warn;

nix::ioctl_read_bad!(read_winsize, nix::libc::TIOCGWINSZ, nix::libc::winsize);

/// Stdin switched to raw mode for as long as this value lives.
///
/// Job-control shells put the terminal back into cooked mode while the
/// process is stopped, so [`reapply`](Self::reapply) has to run after every
/// `SIGCONT`.
pub struct RawTerminal {
    cooked: Termios,
    raw: Termios,
}

impl RawTerminal {
    pub fn enter() -> Result<Self> {
        let stdin = std::io::stdin();
        let cooked = termios::tcgetattr(&stdin).context("attach needs an interactive terminal")?;
        let mut raw = cooked.clone();
        termios::cfmakeraw(&mut raw);
        termios::tcsetattr(&stdin, SetArg::TCSANOW, &raw).context("Failed to enter raw mode")?;
        Ok(Self { cooked, raw })
    }

    pub fn reapply(&self) {
        if let Err(e) = termios::tcsetattr(std::io::stdin(), SetArg::TCSANOW, &self.raw) {
            warn!(error = %e, "failed to re-enter raw mode");
        }
    }
}

impl Drop for RawTerminal {
    fn drop(&mut self) {
        // drain so pending session output is not mangled by the mode switch
        let _ = termios::tcsetattr(std::io::stdin(), SetArg::TCSADRAIN, &self.cooked);
    }
}

/// Size of the terminal behind stdout. `None` when stdout is not a terminal
/// or reports a zero size.
pub fn window_geometry() -> Option<Geometry> {
    let mut ws = nix::libc::winsize {
        ws_row: 0,
        ws_col: 0,
        ws_xpixel: 0,
        ws_ypixel: 0,
    };
    // SAFETY: `ws` is a valid, writable winsize for the duration of the call.
    unsafe { read_winsize(nix::libc::STDOUT_FILENO, &mut ws) }.ok()?;
    (ws.ws_col > 0 && ws.ws_row > 0).then(|| Geometry::new(ws.ws_col, ws.ws_row))
}
