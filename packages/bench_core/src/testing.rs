//! In-memory [`Connector`] for tests.
//!
//! Every `connect` call is recorded with its (virtual) timestamp. Unless a
//! failure was queued with [`FakeConnector::fail_next`], the call succeeds and
//! hands the test a [`FakeServer`] playing the remote end of the socket.

use futures::channel::mpsc;
use futures::future::BoxFuture;
use futures::{FutureExt, SinkExt, StreamExt};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::time::Instant;

use crate::{Connection, Connector, Frame, TransportError};

#[derive(Default)]
struct FakeState {
    attempts: Vec<(String, Instant)>,
    fail_next: usize,
    accepted: Vec<FakeServer>,
}

#[derive(Clone, Default)]
pub struct FakeConnector {
    state: Arc<Mutex<FakeState>>,
}

impl FakeConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` connect attempts fail.
    pub fn fail_next(&self, n: usize) {
        self.state.lock().fail_next = n;
    }

    pub fn attempts(&self) -> Vec<(String, Instant)> {
        self.state.lock().attempts.clone()
    }

    pub fn attempt_count(&self) -> usize {
        self.state.lock().attempts.len()
    }

    /// Oldest accepted connection not yet claimed by the test.
    pub fn take_server(&self) -> Option<FakeServer> {
        let mut state = self.state.lock();
        if state.accepted.is_empty() {
            None
        } else {
            Some(state.accepted.remove(0))
        }
    }

    /// Like [`take_server`](Self::take_server) but lets spawned tasks run first.
    pub async fn next_server(&self) -> FakeServer {
        for _ in 0..64 {
            if let Some(server) = self.take_server() {
                return server;
            }
            tokio::task::yield_now().await;
        }
        panic!("no connection was accepted");
    }
}

impl Connector for FakeConnector {
    fn connect(&self, url: &str) -> BoxFuture<'static, Result<Connection, TransportError>> {
        let mut state = self.state.lock();
        state.attempts.push((url.to_string(), Instant::now()));
        if state.fail_next > 0 {
            state.fail_next -= 1;
            let err = TransportError::connect_failed(url, "refused");
            return Box::pin(async move { Err(err) });
        }

        let (to_client, client_rx) = mpsc::unbounded();
        let (client_tx, from_client) = mpsc::unbounded();
        state.accepted.push(FakeServer {
            url: url.to_string(),
            to_client,
            from_client,
            client_gone: false,
        });

        let connection = Connection {
            sink: Box::pin(client_tx.sink_map_err(|_| TransportError::Closed)),
            stream: Box::pin(client_rx),
        };
        Box::pin(async move { Ok(connection) })
    }
}

/// Remote end of one fake socket.
pub struct FakeServer {
    pub url: String,
    to_client: mpsc::UnboundedSender<Result<Frame, TransportError>>,
    from_client: mpsc::UnboundedReceiver<Frame>,
    client_gone: bool,
}

impl FakeServer {
    pub fn send(&self, frame: Frame) {
        let _ = self.to_client.unbounded_send(Ok(frame));
    }

    pub fn send_binary(&self, bytes: &[u8]) {
        self.send(Frame::Binary(bytes.to_vec()));
    }

    pub fn send_text(&self, text: &str) {
        self.send(Frame::Text(text.to_string()));
    }

    /// Drop the socket from the server side with an error.
    pub fn fail(&self) {
        let _ = self.to_client.unbounded_send(Err(TransportError::Closed));
        self.to_client.close_channel();
    }

    /// End the read half cleanly.
    pub fn close(&self) {
        self.to_client.close_channel();
    }

    /// Everything the client has written so far.
    pub fn drain(&mut self) -> Vec<Frame> {
        let mut frames = Vec::new();
        loop {
            match self.from_client.next().now_or_never() {
                Some(Some(frame)) => frames.push(frame),
                Some(None) => {
                    self.client_gone = true;
                    break;
                }
                None => break,
            }
        }
        frames
    }

    /// Text frames written by the client, parsed as JSON.
    pub fn drain_json(&mut self) -> Vec<serde_json::Value> {
        self.drain()
            .into_iter()
            .filter_map(|frame| match frame {
                Frame::Text(text) => serde_json::from_str(&text).ok(),
                _ => None,
            })
            .collect()
    }

    /// True once the client dropped its write half or sent a close frame.
    pub fn client_closed(&mut self) -> bool {
        let frames = self.drain();
        self.client_gone || frames.contains(&Frame::Close)
    }
}

/// Give spawned tasks a chance to run without advancing the clock.
pub async fn settle() {
    for _ in 0..64 {
        tokio::task::yield_now().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn frames_flow_both_ways() {
        let connector = FakeConnector::new();
        let mut conn = connector.connect("ws://fake/a").await.unwrap();
        let mut server = connector.next_server().await;
        assert_eq!(server.url, "ws://fake/a");

        conn.sink.send(Frame::Text("hi".into())).await.unwrap();
        assert_eq!(server.drain(), vec![Frame::Text("hi".into())]);

        server.send_binary(b"out");
        let got = conn.stream.next().await.unwrap().unwrap();
        assert_eq!(got, Frame::Binary(b"out".to_vec()));

        drop(conn);
        assert!(server.client_closed());
    }

    #[tokio::test]
    async fn queued_failures_are_recorded() {
        let connector = FakeConnector::new();
        connector.fail_next(1);
        assert!(connector.connect("ws://fake/a").await.is_err());
        assert!(connector.connect("ws://fake/a").await.is_ok());
        assert_eq!(connector.attempt_count(), 2);
    }
}
