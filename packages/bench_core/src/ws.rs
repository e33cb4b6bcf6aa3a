//! tokio-tungstenite backed [`Connector`].

use futures::future::{self, BoxFuture};
use futures::{SinkExt, StreamExt};
use std::time::Duration;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::debug;

use crate::{Connection, Connector, Frame, TransportError};

pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Dials `ws://` and `wss://` URLs. A handshake that takes longer than the
/// connect timeout fails like any other connect error.
#[derive(Debug, Clone, Copy)]
pub struct WsConnector {
    connect_timeout: Duration,
}

impl WsConnector {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

impl Default for WsConnector {
    fn default() -> Self {
        Self::new(DEFAULT_CONNECT_TIMEOUT)
    }
}

impl Connector for WsConnector {
    fn connect(&self, url: &str) -> BoxFuture<'static, Result<Connection, TransportError>> {
        let url = url.to_string();
        let timeout = self.connect_timeout;
        Box::pin(async move {
            let (ws, _response) = tokio::time::timeout(timeout, connect_async(url.as_str()))
                .await
                .map_err(|_| TransportError::TimedOut {
                    url: url.clone(),
                    after: timeout,
                })?
                .map_err(|e| TransportError::connect_failed(&url, e))?;
            debug!(%url, "websocket connected");

            let (sink, stream) = ws.split();
            let sink = sink
                .sink_map_err(TransportError::from)
                .with(|frame: Frame| future::ready(Ok::<_, TransportError>(to_message(frame))));
            let stream = stream.filter_map(|msg| {
                future::ready(match msg {
                    Ok(msg) => from_message(msg).map(Ok),
                    Err(e) => Some(Err(TransportError::from(e))),
                })
            });

            Ok(Connection {
                sink: Box::pin(sink),
                stream: Box::pin(stream),
            })
        })
    }
}

fn to_message(frame: Frame) -> Message {
    match frame {
        Frame::Binary(data) => Message::Binary(data.into()),
        Frame::Text(text) => Message::Text(text.into()),
        Frame::Close => Message::Close(None),
    }
}

/// Ping/pong is answered by tungstenite itself and never surfaces.
fn from_message(msg: Message) -> Option<Frame> {
    match msg {
        Message::Binary(data) => Some(Frame::Binary(data.to_vec())),
        Message::Text(text) => Some(Frame::Text(text.as_str().to_owned())),
        Message::Close(_) => Some(Frame::Close),
        Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binary_frames_keep_their_bytes() {
        let msg = to_message(Frame::Binary(vec![0x1b, b'[', b'A']));
        assert_eq!(from_message(msg), Some(Frame::Binary(vec![0x1b, b'[', b'A'])));
    }

    #[test]
    fn control_frames_are_hidden() {
        assert_eq!(from_message(Message::Ping(Vec::new().into())), None);
        assert_eq!(from_message(Message::Pong(Vec::new().into())), None);
    }

    #[tokio::test]
    async fn stalled_handshake_times_out() {
        // accepts TCP but never answers the upgrade request
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}/api/v1/ws", listener.local_addr().unwrap());

        let connector = WsConnector::new(Duration::from_millis(200));
        match connector.connect(&url).await {
            Err(TransportError::TimedOut { after, .. }) => {
                assert_eq!(after, Duration::from_millis(200))
            }
            Err(e) => panic!("expected a timeout, got {e}"),
            Ok(_) => panic!("expected a timeout, got a connection"),
        }
        drop(listener);
    }

    #[test]
    fn close_maps_both_ways() {
        assert!(matches!(to_message(Frame::Close), Message::Close(None)));
        assert_eq!(from_message(Message::Close(None)), Some(Frame::Close));
    }
}
