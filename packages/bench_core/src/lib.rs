//! Shared building blocks for the termbench workspace.
//!
//! Everything here is UI-agnostic: identifier newtypes, the JSON control
//! messages spoken on the session and channel sockets, the [`Connector`] seam
//! that both socket owners dial through, and the timer primitives
//! ([`ScheduledTask`], [`Backoff`]) used for reconnects and debouncing.

mod backoff;
mod error;
mod frame;
mod ids;
pub mod protocol;
mod schedule;
pub mod ws;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use backoff::{Backoff, BackoffPolicy};
pub use error::TransportError;
pub use frame::{Connection, Connector, Frame, FrameSink, FrameStream};
pub use ids::{PanelId, SessionId, WorkbenchId};
pub use schedule::ScheduledTask;
