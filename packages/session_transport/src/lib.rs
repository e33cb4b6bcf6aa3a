//! Session Transport - connection and surface lifetime for interactive sessions
//!
//! The [`SessionTransportManager`] owns exactly one socket and one render
//! surface per session id. Views come and go through
//! [`attach`](SessionTransportManager::attach) and
//! [`detach`](SessionTransportManager::detach); the connection is only torn
//! down by [`release`](SessionTransportManager::release).
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use bench_core::{SessionId, ws::WsConnector};
//! use session_transport::{SessionTransportManager, TransportEvent, TransportSettings};
//! # use session_transport::{FileBridge, SurfaceFactory};
//! # fn surfaces() -> Arc<dyn SurfaceFactory> { unimplemented!() }
//! # fn files() -> Arc<dyn FileBridge> { unimplemented!() }
//!
//! #[tokio::main]
//! async fn main() {
//!     let manager = SessionTransportManager::new(
//!         TransportSettings::new("ws://127.0.0.1:7070"),
//!         Arc::new(WsConnector::default()),
//!         surfaces(),
//!         files(),
//!     );
//!
//!     let id = SessionId::new("3f2a");
//!     let mut events = manager.subscribe();
//!     manager.acquire(&id).unwrap();
//!
//!     while let Ok(event) = events.recv().await {
//!         if let TransportEvent::Connected { .. } = event {
//!             manager.write_input(&id, b"ls\n").unwrap();
//!         }
//!     }
//! }
//! ```

mod error;
pub mod files;
mod manager;
pub mod surface;

pub use error::SessionError;
pub use files::FileBridge;
pub use manager::{ConnectionState, SessionTransportManager, TransportEvent, TransportSettings};
pub use surface::{
    Container, ContainerEvent, ContainerId, DroppedItem, Geometry, PastedImage, RenderSurface,
    SurfaceFactory,
};
