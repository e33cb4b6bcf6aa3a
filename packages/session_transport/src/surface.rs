//! The render surface seam and the containers it is mounted into.

use bench_core::SessionId;
use std::fmt;
use std::path::PathBuf;
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    pub cols: u16,
    pub rows: u16,
}

impl Geometry {
    pub const fn new(cols: u16, rows: u16) -> Self {
        Self { cols, rows }
    }
}

impl Default for Geometry {
    fn default() -> Self {
        Self::new(80, 24)
    }
}

/// An opaque terminal emulator owned by the manager.
///
/// Methods are synchronous and are called with the manager's registry lock
/// held, so implementations must not block.
pub trait RenderSurface: Send {
    fn write(&mut self, data: &[u8]);

    /// Resize to fit the space a container offers.
    fn fit(&mut self, available: Geometry);

    fn geometry(&self) -> Geometry;

    fn focus(&mut self);

    fn mount(&mut self, container: &ContainerId);

    fn unmount(&mut self);

    fn dispose(&mut self);
}

pub trait SurfaceFactory: Send + Sync {
    fn create(&self, session: &SessionId) -> Box<dyn RenderSurface>;
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContainerId(pub String);

impl ContainerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl fmt::Display for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A file or directory dropped onto a view.
///
/// `path` is set when the view already knows the local path; otherwise the
/// name is resolved through the [`FileBridge`](crate::FileBridge).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DroppedItem {
    pub name: String,
    pub is_dir: bool,
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PastedImage {
    pub filename: String,
    pub mime: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContainerEvent {
    Resized(Geometry),
    Dropped(Vec<DroppedItem>),
    Pasted(Vec<PastedImage>),
}

/// A mount target plus the events it produces while a surface is attached.
#[derive(Debug)]
pub struct Container {
    pub id: ContainerId,
    pub events: mpsc::Receiver<ContainerEvent>,
}

impl Container {
    pub fn channel(id: ContainerId, capacity: usize) -> (Self, mpsc::Sender<ContainerEvent>) {
        let (tx, events) = mpsc::channel(capacity);
        (Self { id, events }, tx)
    }
}
