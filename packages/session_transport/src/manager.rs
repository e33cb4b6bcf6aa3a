use bench_core::protocol::TerminalControl;
use bench_core::{
    Backoff, BackoffPolicy, Connection, Connector, Frame, ScheduledTask, SessionId, TransportError,
};
use futures::future::BoxFuture;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use crate::files::{self, FileBridge};
use crate::surface::{
    Container, ContainerEvent, ContainerId, DroppedItem, Geometry, PastedImage, RenderSurface,
    SurfaceFactory,
};
use crate::SessionError;

const EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
pub struct TransportSettings {
    /// `ws://host:port` or `wss://host:port`, without a trailing slash.
    pub ws_base: String,
    pub backoff: BackoffPolicy,
    /// Inbound data this soon after an open never marks the session busy.
    pub busy_grace: Duration,
    /// Busy clears after this much inbound silence.
    pub busy_silence: Duration,
    pub fit_debounce: Duration,
}

impl TransportSettings {
    pub fn new(ws_base: impl Into<String>) -> Self {
        Self {
            ws_base: ws_base.into().trim_end_matches('/').to_string(),
            backoff: BackoffPolicy::default(),
            busy_grace: Duration::from_secs(2),
            busy_silence: Duration::from_millis(1500),
            fit_debounce: Duration::from_millis(100),
        }
    }

    pub fn session_url(&self, id: &SessionId) -> String {
        format!("{}/api/v1/terminal/ws/{}", self.ws_base, id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Open,
    Closed,
}

/// What views need to know about a session, without the raw errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Connected { id: SessionId },
    Disconnected { id: SessionId },
    BusyChanged { id: SessionId, busy: bool },
    /// The remote process exited.
    Exited { id: SessionId },
    Released { id: SessionId },
}

struct SessionInstance {
    surface: Box<dyn RenderSurface>,
    state: ConnectionState,
    /// Bumped on every connect; frames and closes from older sockets are ignored.
    generation: u64,
    outbound: Option<mpsc::UnboundedSender<Frame>>,
    backoff: Backoff,
    intentional_close: bool,
    busy: bool,
    opened_at: Option<Instant>,
    container: Option<ContainerId>,
    container_geometry: Option<Geometry>,
    io: Option<JoinHandle<()>>,
    observer: Option<JoinHandle<()>>,
    reconnect_timer: ScheduledTask,
    busy_timer: ScheduledTask,
    fit_timer: ScheduledTask,
}

impl SessionInstance {
    fn new(surface: Box<dyn RenderSurface>, policy: BackoffPolicy) -> Self {
        Self {
            surface,
            state: ConnectionState::Closed,
            generation: 0,
            outbound: None,
            backoff: Backoff::new(policy),
            intentional_close: false,
            busy: false,
            opened_at: None,
            container: None,
            container_geometry: None,
            io: None,
            observer: None,
            reconnect_timer: ScheduledTask::new("session-reconnect"),
            busy_timer: ScheduledTask::new("session-busy-clear"),
            fit_timer: ScheduledTask::new("session-fit"),
        }
    }

    /// Queue a frame on the open socket. Dropped otherwise.
    fn send(&self, frame: Frame) -> bool {
        match (&self.outbound, self.state) {
            (Some(tx), ConnectionState::Open) => tx.send(frame).is_ok(),
            _ => false,
        }
    }

    fn fit_and_announce(&mut self) {
        if let Some(available) = self.container_geometry {
            self.surface.fit(available);
        }
        let Geometry { cols, rows } = self.surface.geometry();
        self.send(Frame::Text(TerminalControl::Resize { cols, rows }.to_json()));
    }

    fn detach(&mut self) {
        if let Some(observer) = self.observer.take() {
            observer.abort();
        }
        self.fit_timer.cancel();
        self.busy_timer.cancel();
        if self.container.take().is_some() {
            self.surface.unmount();
        }
    }
}

#[derive(Default)]
struct Registry {
    live: HashMap<SessionId, SessionInstance>,
    released: HashSet<SessionId>,
}

struct Inner {
    settings: TransportSettings,
    connector: Arc<dyn Connector>,
    surfaces: Arc<dyn SurfaceFactory>,
    files: Arc<dyn FileBridge>,
    registry: Mutex<Registry>,
    event_tx: broadcast::Sender<TransportEvent>,
}

/// Owns one connection and one render surface per session.
///
/// Cheap to clone; all clones share the same registry. Background tasks only
/// hold weak references, so dropping the last clone stops reconnecting.
#[derive(Clone)]
pub struct SessionTransportManager {
    inner: Arc<Inner>,
}

impl SessionTransportManager {
    pub fn new(
        settings: TransportSettings,
        connector: Arc<dyn Connector>,
        surfaces: Arc<dyn SurfaceFactory>,
        files: Arc<dyn FileBridge>,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                settings,
                connector,
                surfaces,
                files,
                registry: Mutex::new(Registry::default()),
                event_tx,
            }),
        }
    }

    fn upgrade(weak: &Weak<Inner>) -> Option<Self> {
        weak.upgrade().map(|inner| Self { inner })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TransportEvent> {
        self.inner.event_tx.subscribe()
    }

    fn emit(&self, event: TransportEvent) {
        let _ = self.inner.event_tx.send(event);
    }

    /// Allocate a surface and start connecting. Returns `false` when the
    /// session was already live.
    pub fn acquire(&self, id: &SessionId) -> Result<bool, SessionError> {
        {
            let mut reg = self.inner.registry.lock();
            if reg.released.contains(id) {
                return Err(SessionError::Released(id.clone()));
            }
            if reg.live.contains_key(id) {
                return Ok(false);
            }
            let surface = self.inner.surfaces.create(id);
            reg.live.insert(
                id.clone(),
                SessionInstance::new(surface, self.inner.settings.backoff),
            );
        }
        debug!(session = %id, "acquired session");
        self.connect_ws(id);
        Ok(true)
    }

    /// Open the session socket unless one is already open or in flight.
    pub fn connect_ws(&self, id: &SessionId) {
        let generation = {
            let mut reg = self.inner.registry.lock();
            let Some(inst) = reg.live.get_mut(id) else {
                return;
            };
            if inst.intentional_close
                || matches!(inst.state, ConnectionState::Open | ConnectionState::Connecting)
            {
                return;
            }
            inst.reconnect_timer.cancel();
            if let Some(io) = inst.io.take() {
                io.abort();
            }
            inst.outbound = None;
            inst.generation += 1;
            inst.state = ConnectionState::Connecting;
            inst.generation
        };

        let url = self.inner.settings.session_url(id);
        debug!(session = %id, %url, generation, "connecting");
        let connect = self.inner.connector.connect(&url);
        let handle = tokio::spawn(run_connection(
            Arc::downgrade(&self.inner),
            id.clone(),
            generation,
            connect,
        ));

        let mut reg = self.inner.registry.lock();
        match reg.live.get_mut(id) {
            Some(inst) if inst.generation == generation => inst.io = Some(handle),
            _ => handle.abort(),
        }
    }

    fn schedule_reconnect(&self, id: &SessionId, inst: &mut SessionInstance) -> Option<Duration> {
        if inst.intentional_close {
            return None;
        }
        let delay = inst.backoff.next_delay();
        let weak = Arc::downgrade(&self.inner);
        let target = id.clone();
        inst.reconnect_timer.schedule(delay, move || {
            if let Some(manager) = Self::upgrade(&weak) {
                manager.connect_ws(&target);
            }
        });
        Some(delay)
    }

    /// Skip any pending backoff and reconnect now.
    pub fn ensure_connected(&self, id: &SessionId) {
        {
            let mut reg = self.inner.registry.lock();
            let Some(inst) = reg.live.get_mut(id) else {
                return;
            };
            if inst.intentional_close || inst.state != ConnectionState::Closed {
                return;
            }
            inst.reconnect_timer.cancel();
        }
        debug!(session = %id, "reconnecting on demand");
        self.connect_ws(id);
    }

    pub fn reconnect_all_if_needed(&self) {
        for id in self.sessions() {
            self.ensure_connected(&id);
        }
    }

    fn handle_open(
        &self,
        id: &SessionId,
        generation: u64,
        outbound: mpsc::UnboundedSender<Frame>,
    ) -> bool {
        {
            let mut reg = self.inner.registry.lock();
            let Some(inst) = reg.live.get_mut(id) else {
                return false;
            };
            if inst.generation != generation || inst.intentional_close {
                return false;
            }
            inst.state = ConnectionState::Open;
            inst.backoff.reset();
            inst.opened_at = Some(Instant::now());
            inst.outbound = Some(outbound);
            inst.fit_and_announce();
        }
        info!(session = %id, "session connected");
        self.emit(TransportEvent::Connected { id: id.clone() });
        true
    }

    /// Returns `false` when the frame came from a superseded socket.
    fn handle_inbound(&self, id: &SessionId, generation: u64, frame: Frame) -> bool {
        let mut events = Vec::new();
        {
            let mut reg = self.inner.registry.lock();
            let Some(inst) = reg.live.get_mut(id) else {
                return false;
            };
            if inst.generation != generation {
                return false;
            }
            match frame {
                Frame::Binary(data) => {
                    inst.surface.write(&data);
                    events.extend(self.note_activity(id, inst));
                }
                Frame::Text(text) => match classify_text(&text) {
                    Inbound::Exit => events.push(TransportEvent::Exited { id: id.clone() }),
                    Inbound::Control => trace!(session = %id, "ignoring control frame"),
                    Inbound::Output => {
                        inst.surface.write(text.as_bytes());
                        events.extend(self.note_activity(id, inst));
                    }
                },
                Frame::Close => {}
            }
        }
        for event in events {
            if let TransportEvent::Exited { .. } = event {
                info!(session = %id, "remote process exited");
            }
            self.emit(event);
        }
        true
    }

    fn note_activity(&self, id: &SessionId, inst: &mut SessionInstance) -> Option<TransportEvent> {
        let opened_at = inst.opened_at?;
        if opened_at.elapsed() <= self.inner.settings.busy_grace {
            return None;
        }
        self.arm_busy_timer(id, inst);
        if inst.busy {
            return None;
        }
        inst.busy = true;
        Some(TransportEvent::BusyChanged {
            id: id.clone(),
            busy: true,
        })
    }

    fn arm_busy_timer(&self, id: &SessionId, inst: &mut SessionInstance) {
        let weak = Arc::downgrade(&self.inner);
        let target = id.clone();
        inst.busy_timer
            .schedule(self.inner.settings.busy_silence, move || {
                if let Some(manager) = Self::upgrade(&weak) {
                    manager.clear_busy(&target);
                }
            });
    }

    fn clear_busy(&self, id: &SessionId) {
        let changed = {
            let mut reg = self.inner.registry.lock();
            match reg.live.get_mut(id) {
                Some(inst) if inst.busy => {
                    inst.busy = false;
                    true
                }
                _ => false,
            }
        };
        if changed {
            self.emit(TransportEvent::BusyChanged {
                id: id.clone(),
                busy: false,
            });
        }
    }

    fn handle_close(&self, id: &SessionId, generation: u64) {
        let (was_open, delay, attempt) = {
            let mut reg = self.inner.registry.lock();
            let Some(inst) = reg.live.get_mut(id) else {
                return;
            };
            if inst.generation != generation {
                return;
            }
            let was_open = inst.state == ConnectionState::Open;
            inst.state = ConnectionState::Closed;
            inst.outbound = None;
            inst.opened_at = None;
            inst.io = None;
            let delay = self.schedule_reconnect(id, inst);
            (was_open, delay, inst.backoff.attempt())
        };

        if was_open {
            self.emit(TransportEvent::Disconnected { id: id.clone() });
        }
        match delay {
            Some(delay) => warn!(
                session = %id,
                attempt,
                delay_ms = delay.as_millis() as u64,
                "session disconnected, reconnect scheduled"
            ),
            None => debug!(session = %id, "session closed"),
        }
    }

    /// Forward input to the remote side. Returns `false` when the socket is not
    /// open; input is never buffered across reconnects.
    pub fn write_input(&self, id: &SessionId, data: &[u8]) -> Result<bool, SessionError> {
        let reg = self.inner.registry.lock();
        let inst = reg
            .live
            .get(id)
            .ok_or_else(|| SessionError::NotFound(id.clone()))?;
        let sent = inst.send(Frame::Binary(data.to_vec()));
        if !sent {
            trace!(session = %id, bytes = data.len(), "dropped input while disconnected");
        }
        Ok(sent)
    }

    /// Mount the surface into `container` and start consuming its events.
    pub fn attach(&self, id: &SessionId, container: Container) -> Result<(), SessionError> {
        let Container {
            id: container_id,
            events,
        } = container;

        let mut reg = self.inner.registry.lock();
        let inst = reg
            .live
            .get_mut(id)
            .ok_or_else(|| SessionError::NotFound(id.clone()))?;

        if let Some(observer) = inst.observer.take() {
            observer.abort();
        }
        inst.fit_timer.cancel();
        if inst.container.as_ref() != Some(&container_id) {
            inst.surface.mount(&container_id);
        }
        debug!(session = %id, container = %container_id, "attached");
        inst.container = Some(container_id);
        if inst.busy {
            self.arm_busy_timer(id, inst);
        }
        inst.observer = Some(tokio::spawn(pump_container_events(
            Arc::downgrade(&self.inner),
            id.clone(),
            events,
        )));
        Ok(())
    }

    /// Unmount the surface. The connection stays up.
    pub fn detach(&self, id: &SessionId) {
        let mut reg = self.inner.registry.lock();
        if let Some(inst) = reg.live.get_mut(id) {
            inst.detach();
            debug!(session = %id, "detached");
        }
    }

    fn container_resized(&self, id: &SessionId, geometry: Geometry) {
        let mut reg = self.inner.registry.lock();
        let Some(inst) = reg.live.get_mut(id) else {
            return;
        };
        inst.container_geometry = Some(geometry);
        let weak = Arc::downgrade(&self.inner);
        let target = id.clone();
        inst.fit_timer
            .schedule(self.inner.settings.fit_debounce, move || {
                if let Some(manager) = Self::upgrade(&weak) {
                    manager.fit(&target);
                }
            });
    }

    /// Fit the surface now and tell the remote side its size.
    pub fn fit(&self, id: &SessionId) {
        let mut reg = self.inner.registry.lock();
        if let Some(inst) = reg.live.get_mut(id) {
            inst.fit_and_announce();
        }
    }

    pub fn focus(&self, id: &SessionId) {
        let mut reg = self.inner.registry.lock();
        if let Some(inst) = reg.live.get_mut(id) {
            inst.surface.focus();
        }
    }

    async fn insert_dropped(&self, id: &SessionId, items: Vec<DroppedItem>) {
        let mut paths = Vec::with_capacity(items.len());
        for item in items {
            if let Some(path) = item.path {
                paths.push(path);
                continue;
            }
            match self.inner.files.resolve_path(&item.name, item.is_dir).await {
                Ok(path) => paths.push(path),
                Err(e) => warn!(session = %id, name = %item.name, error = %e, "skipping unresolved drop"),
            }
        }
        self.insert_paths(id, &paths);
    }

    async fn insert_pasted(&self, id: &SessionId, images: Vec<PastedImage>) {
        let mut paths = Vec::with_capacity(images.len());
        for image in images {
            let filename = image.filename.clone();
            match self.inner.files.upload(image).await {
                Ok(path) => paths.push(path),
                Err(e) => warn!(session = %id, %filename, error = %e, "skipping failed upload"),
            }
        }
        self.insert_paths(id, &paths);
    }

    fn insert_paths(&self, id: &SessionId, paths: &[std::path::PathBuf]) {
        if let Some(text) = files::insertion_text(paths) {
            if let Err(e) = self.write_input(id, text.as_bytes()) {
                debug!(session = %id, error = %e, "session gone before insert");
            }
        }
    }

    /// Tear the session down for good: timers, view, socket and surface.
    pub fn release(&self, id: &SessionId) {
        let inst = {
            let mut reg = self.inner.registry.lock();
            let inst = reg.live.remove(id);
            if inst.is_some() {
                reg.released.insert(id.clone());
            }
            inst
        };
        let Some(mut inst) = inst else {
            return;
        };

        inst.intentional_close = true;
        inst.reconnect_timer.cancel();
        inst.detach();
        match inst.outbound.take() {
            Some(tx) if tx.send(Frame::Close).is_ok() => {}
            _ => {
                if let Some(io) = inst.io.take() {
                    io.abort();
                }
            }
        }
        inst.surface.dispose();
        info!(session = %id, "released session");
        self.emit(TransportEvent::Released { id: id.clone() });
    }

    pub fn release_all(&self, ids: &[SessionId]) {
        for id in ids {
            self.release(id);
        }
    }

    pub fn shutdown(&self) {
        let ids = self.sessions();
        self.release_all(&ids);
    }

    pub fn has(&self, id: &SessionId) -> bool {
        self.inner.registry.lock().live.contains_key(id)
    }

    pub fn state(&self, id: &SessionId) -> Option<ConnectionState> {
        self.inner.registry.lock().live.get(id).map(|i| i.state)
    }

    pub fn is_busy(&self, id: &SessionId) -> bool {
        self.inner
            .registry
            .lock()
            .live
            .get(id)
            .is_some_and(|i| i.busy)
    }

    pub fn is_attached(&self, id: &SessionId) -> bool {
        self.inner
            .registry
            .lock()
            .live
            .get(id)
            .is_some_and(|i| i.container.is_some())
    }

    pub fn reconnect_attempt(&self, id: &SessionId) -> Option<u32> {
        self.inner
            .registry
            .lock()
            .live
            .get(id)
            .map(|i| i.backoff.attempt())
    }

    pub fn sessions(&self) -> Vec<SessionId> {
        let mut ids: Vec<_> = self.inner.registry.lock().live.keys().cloned().collect();
        ids.sort();
        ids
    }
}

enum Inbound {
    Exit,
    Control,
    Output,
}

/// Any text that parses as JSON is a control message; only `exit` is acted on.
fn classify_text(text: &str) -> Inbound {
    let Ok(value) = serde_json::from_str::<serde_json::Value>(text) else {
        return Inbound::Output;
    };
    match serde_json::from_value::<TerminalControl>(value) {
        Ok(TerminalControl::Exit) => Inbound::Exit,
        _ => Inbound::Control,
    }
}

async fn run_connection(
    weak: Weak<Inner>,
    id: SessionId,
    generation: u64,
    connect: BoxFuture<'static, Result<Connection, TransportError>>,
) {
    let result = connect.await;
    let Some(manager) = SessionTransportManager::upgrade(&weak) else {
        return;
    };
    let Connection {
        mut sink,
        mut stream,
    } = match result {
        Ok(conn) => conn,
        Err(e) => {
            debug!(session = %id, error = %e, "connect failed");
            manager.handle_close(&id, generation);
            return;
        }
    };

    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel();
    if !manager.handle_open(&id, generation, outbound_tx) {
        let _ = sink.send(Frame::Close).await;
        return;
    }
    drop(manager);

    loop {
        tokio::select! {
            outbound = outbound_rx.recv() => match outbound {
                Some(Frame::Close) => {
                    let _ = sink.send(Frame::Close).await;
                    return;
                }
                Some(frame) => {
                    if let Err(e) = sink.send(frame).await {
                        debug!(session = %id, error = %e, "send failed");
                        break;
                    }
                }
                // Superseded: the instance dropped our sender.
                None => {
                    let _ = sink.close().await;
                    return;
                }
            },
            inbound = stream.next() => match inbound {
                Some(Ok(Frame::Close)) | None => break,
                Some(Ok(frame)) => {
                    let Some(manager) = SessionTransportManager::upgrade(&weak) else {
                        return;
                    };
                    if !manager.handle_inbound(&id, generation, frame) {
                        let _ = sink.close().await;
                        return;
                    }
                }
                Some(Err(e)) => {
                    debug!(session = %id, error = %e, "receive failed");
                    break;
                }
            },
        }
    }

    if let Some(manager) = SessionTransportManager::upgrade(&weak) {
        manager.handle_close(&id, generation);
    }
}

async fn pump_container_events(
    weak: Weak<Inner>,
    id: SessionId,
    mut events: mpsc::Receiver<ContainerEvent>,
) {
    while let Some(event) = events.recv().await {
        let Some(manager) = SessionTransportManager::upgrade(&weak) else {
            return;
        };
        match event {
            ContainerEvent::Resized(geometry) => manager.container_resized(&id, geometry),
            ContainerEvent::Dropped(items) => manager.insert_dropped(&id, items).await,
            ContainerEvent::Pasted(images) => manager.insert_pasted(&id, images).await,
        }
    }
}
