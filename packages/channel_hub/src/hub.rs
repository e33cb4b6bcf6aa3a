use bench_core::protocol::{ChannelControl, Envelope};
use bench_core::{Connection, Connector, Frame, ScheduledTask, TransportError};
use futures::future::BoxFuture;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

#[derive(Debug, Clone)]
pub struct HubSettings {
    pub url: String,
    pub reconnect_delay: Duration,
}

impl HubSettings {
    pub fn new(ws_base: &str) -> Self {
        Self {
            url: format!("{}/api/v1/ws", ws_base.trim_end_matches('/')),
            reconnect_delay: Duration::from_secs(3),
        }
    }
}

struct HubLink {
    generation: u64,
    /// Set once the socket is open. Dropping it closes the socket.
    outbound: Option<mpsc::UnboundedSender<Frame>>,
    _io: JoinHandle<()>,
}

struct HubState {
    next_listener: u64,
    listeners: HashMap<u64, mpsc::UnboundedSender<Envelope>>,
    topics: BTreeMap<String, usize>,
    generation: u64,
    link: Option<HubLink>,
    reconnect_timer: ScheduledTask,
}

impl HubState {
    fn send(&self, frame: Frame) -> bool {
        self.link
            .as_ref()
            .and_then(|link| link.outbound.as_ref())
            .is_some_and(|tx| tx.send(frame).is_ok())
    }

    fn is_current(&self, generation: u64) -> bool {
        self.link.as_ref().is_some_and(|l| l.generation == generation)
    }
}

struct Inner {
    settings: HubSettings,
    connector: Arc<dyn Connector>,
    state: Mutex<HubState>,
    connected: watch::Sender<bool>,
}

/// The single shared real-time connection.
#[derive(Clone)]
pub struct SharedChannelHub {
    inner: Arc<Inner>,
}

impl SharedChannelHub {
    pub fn new(settings: HubSettings, connector: Arc<dyn Connector>) -> Self {
        let (connected, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                settings,
                connector,
                state: Mutex::new(HubState {
                    next_listener: 0,
                    listeners: HashMap::new(),
                    topics: BTreeMap::new(),
                    generation: 0,
                    link: None,
                    reconnect_timer: ScheduledTask::new("hub-reconnect"),
                }),
                connected,
            }),
        }
    }

    fn upgrade(weak: &Weak<Inner>) -> Option<Self> {
        weak.upgrade().map(|inner| Self { inner })
    }

    /// Register a listener. The first one opens the connection.
    pub fn listen(&self) -> Listener {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = {
            let mut state = self.inner.state.lock();
            let id = state.next_listener;
            state.next_listener += 1;
            state.listeners.insert(id, tx);
            if state.link.is_none() && !state.reconnect_timer.is_pending() {
                self.connect_locked(&mut state);
            }
            id
        };
        Listener {
            hub: self.clone(),
            id,
            rx,
        }
    }

    fn remove_listener(&self, id: u64) {
        let mut state = self.inner.state.lock();
        state.listeners.remove(&id);
        if state.listeners.is_empty() {
            state.reconnect_timer.cancel();
            if state.link.take().is_some() {
                info!("last listener gone, closing shared channel");
            }
            self.inner.connected.send_replace(false);
        }
    }

    /// Reference-counted topic subscription. Only the first holder of a topic
    /// sends `subscribe`; only the last one to drop sends `unsubscribe`.
    pub fn subscribe(&self, topic: impl Into<String>) -> TopicSubscription {
        let topic = topic.into();
        let mut state = self.inner.state.lock();
        let count = state.topics.entry(topic.clone()).or_insert(0);
        *count += 1;
        if *count == 1 {
            debug!(%topic, "subscribing");
            state.send(Frame::Text(
                ChannelControl::Subscribe {
                    topic: topic.clone(),
                }
                .to_json(),
            ));
        }
        TopicSubscription {
            hub: self.clone(),
            topic,
        }
    }

    fn unsubscribe(&self, topic: &str) {
        let mut state = self.inner.state.lock();
        let Some(count) = state.topics.get_mut(topic) else {
            return;
        };
        *count -= 1;
        if *count == 0 {
            state.topics.remove(topic);
            debug!(%topic, "unsubscribing");
            state.send(Frame::Text(
                ChannelControl::Unsubscribe {
                    topic: topic.to_string(),
                }
                .to_json(),
            ));
        }
    }

    /// Send an envelope to the server. Dropped while disconnected.
    pub fn publish(&self, envelope: &Envelope) -> bool {
        let Ok(text) = serde_json::to_string(envelope) else {
            return false;
        };
        self.inner.state.lock().send(Frame::Text(text))
    }

    /// Drop any pending delay and dial again now.
    pub fn reconnect_now(&self) {
        let mut state = self.inner.state.lock();
        state.reconnect_timer.cancel();
        if state.listeners.is_empty() {
            return;
        }
        self.connect_locked(&mut state);
    }

    pub fn connected(&self) -> watch::Receiver<bool> {
        self.inner.connected.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        *self.inner.connected.borrow()
    }

    pub fn topics(&self) -> Vec<String> {
        self.inner.state.lock().topics.keys().cloned().collect()
    }

    pub fn listener_count(&self) -> usize {
        self.inner.state.lock().listeners.len()
    }

    fn connect_locked(&self, state: &mut HubState) {
        state.generation += 1;
        let generation = state.generation;
        // Replacing the link drops the old outbound sender, which closes it.
        state.link = None;
        debug!(url = %self.inner.settings.url, generation, "connecting shared channel");
        let connect = self.inner.connector.connect(&self.inner.settings.url);
        let io = tokio::spawn(run_link(Arc::downgrade(&self.inner), generation, connect));
        state.link = Some(HubLink {
            generation,
            outbound: None,
            _io: io,
        });
    }

    fn handle_open(&self, generation: u64, outbound: mpsc::UnboundedSender<Frame>) -> bool {
        {
            let mut state = self.inner.state.lock();
            if !state.is_current(generation) {
                return false;
            }
            for topic in state.topics.keys() {
                let _ = outbound.send(Frame::Text(
                    ChannelControl::Subscribe {
                        topic: topic.clone(),
                    }
                    .to_json(),
                ));
            }
            if let Some(link) = state.link.as_mut() {
                link.outbound = Some(outbound);
            }
            state.reconnect_timer.cancel();
        }
        info!("shared channel connected");
        self.inner.connected.send_replace(true);
        true
    }

    /// Returns `false` for frames from a superseded socket.
    fn deliver(&self, generation: u64, text: &str) -> bool {
        let listeners: Vec<_> = {
            let state = self.inner.state.lock();
            if !state.is_current(generation) {
                return false;
            }
            state.listeners.values().cloned().collect()
        };
        match serde_json::from_str::<Envelope>(text) {
            Ok(envelope) => {
                for tx in listeners {
                    let _ = tx.send(envelope.clone());
                }
            }
            Err(e) => warn!(error = %e, "dropping malformed channel message"),
        }
        true
    }

    fn handle_close(&self, generation: u64) {
        let mut state = self.inner.state.lock();
        if !state.is_current(generation) {
            return;
        }
        state.link = None;
        self.inner.connected.send_replace(false);
        if state.listeners.is_empty() {
            return;
        }
        let delay = self.inner.settings.reconnect_delay;
        let weak = Arc::downgrade(&self.inner);
        state.reconnect_timer.schedule(delay, move || {
            if let Some(hub) = Self::upgrade(&weak) {
                let mut state = hub.inner.state.lock();
                if !state.listeners.is_empty() && state.link.is_none() {
                    hub.connect_locked(&mut state);
                }
            }
        });
        warn!(delay_ms = delay.as_millis() as u64, "shared channel lost, reconnect scheduled");
    }
}

async fn run_link(
    weak: Weak<Inner>,
    generation: u64,
    connect: BoxFuture<'static, Result<Connection, TransportError>>,
) {
    let result = connect.await;
    let Some(hub) = SharedChannelHub::upgrade(&weak) else {
        return;
    };
    let Connection {
        mut sink,
        mut stream,
    } = match result {
        Ok(conn) => conn,
        Err(e) => {
            debug!(error = %e, "shared channel connect failed");
            hub.handle_close(generation);
            return;
        }
    };

    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel();
    if !hub.handle_open(generation, outbound_tx) {
        let _ = sink.send(Frame::Close).await;
        return;
    }
    drop(hub);

    loop {
        tokio::select! {
            outbound = outbound_rx.recv() => match outbound {
                Some(frame) => {
                    if let Err(e) = sink.send(frame).await {
                        debug!(error = %e, "shared channel send failed");
                        break;
                    }
                }
                None => {
                    let _ = sink.send(Frame::Close).await;
                    return;
                }
            },
            inbound = stream.next() => match inbound {
                Some(Ok(Frame::Text(text))) => {
                    let Some(hub) = SharedChannelHub::upgrade(&weak) else {
                        return;
                    };
                    if !hub.deliver(generation, &text) {
                        debug!(generation, "closing superseded shared channel");
                        let _ = sink.send(Frame::Close).await;
                        return;
                    }
                }
                Some(Ok(Frame::Binary(data))) => trace!(bytes = data.len(), "ignoring binary frame"),
                Some(Ok(Frame::Close)) | None => break,
                Some(Err(e)) => {
                    debug!(error = %e, "shared channel receive failed");
                    break;
                }
            },
        }
    }

    if let Some(hub) = SharedChannelHub::upgrade(&weak) {
        hub.handle_close(generation);
    }
}

/// Keeps the shared connection alive and receives every envelope.
pub struct Listener {
    hub: SharedChannelHub,
    id: u64,
    rx: mpsc::UnboundedReceiver<Envelope>,
}

impl Listener {
    pub async fn recv(&mut self) -> Option<Envelope> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Envelope> {
        self.rx.try_recv().ok()
    }

    pub fn connected(&self) -> watch::Receiver<bool> {
        self.hub.connected()
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        self.hub.remove_listener(self.id);
    }
}

pub struct TopicSubscription {
    hub: SharedChannelHub,
    topic: String,
}

impl TopicSubscription {
    pub fn topic(&self) -> &str {
        &self.topic
    }
}

impl Drop for TopicSubscription {
    fn drop(&mut self) {
        self.hub.unsubscribe(&self.topic);
    }
}
