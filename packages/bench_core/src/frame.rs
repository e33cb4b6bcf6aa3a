use futures::future::BoxFuture;
use futures::{Sink, Stream};
use std::pin::Pin;

use crate::TransportError;

/// One message on a bidirectional socket, independent of the websocket crate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Binary(Vec<u8>),
    Text(String),
    Close,
}

pub type FrameSink = Pin<Box<dyn Sink<Frame, Error = TransportError> + Send>>;
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<Frame, TransportError>> + Send>>;

/// An open socket split into its write and read halves.
pub struct Connection {
    pub sink: FrameSink,
    pub stream: FrameStream,
}

/// Dials sockets. Both socket owners take one of these so tests can swap in
/// an in-memory peer.
pub trait Connector: Send + Sync + 'static {
    fn connect(&self, url: &str) -> BoxFuture<'static, Result<Connection, TransportError>>;
}
