//! Workbench controller: server records, layout and live transports kept in
//! step.
//!
//! All state lives behind one short lock. Network calls happen outside it;
//! tree edits are computed and swapped in under it, and every structural edit
//! schedules a debounced layout save.

use anyhow::{Context, Result};
use bench_core::{PanelId, SessionId, WorkbenchId};
use layout_tree::{Direction, LayoutError, PanelNode, pixel_delta_to_ratio, reconcile};
use parking_lot::Mutex;
use session_transport::{Container, SessionError, SessionTransportManager, TransportEvent};
use std::collections::BTreeSet;
use std::sync::{Arc, Weak};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::api::SessionBackend;
use crate::layout_store::LayoutSaver;
use crate::models::{NewSession, Session, SessionPatch, SessionView, WorkbenchInfo};

const DEFAULT_WORKBENCH: &str = "Default";
const FALLBACK_WORKBENCH_NAME: &str = "Workspace";

#[derive(Debug, Clone, Default, PartialEq)]
pub struct WorkbenchState {
    pub workbenches: Vec<WorkbenchInfo>,
    pub active_workbench: Option<WorkbenchId>,
    /// Sessions of the active workbench, in server order.
    pub sessions: Vec<Session>,
    pub tree: Option<PanelNode>,
    /// The globally focused session.
    pub active_session: Option<SessionId>,
    pub busy: BTreeSet<SessionId>,
}

impl WorkbenchState {
    fn workbench(&self, id: &WorkbenchId) -> Option<&WorkbenchInfo> {
        self.workbenches.iter().find(|w| w.id == *id)
    }

    /// Fails unless `panel` is a leaf of the current tree.
    fn check_leaf(&self, panel: &PanelId) -> Result<(), LayoutError> {
        let node = self
            .tree
            .as_ref()
            .and_then(|t| t.find(panel))
            .ok_or_else(|| LayoutError::PanelNotFound(panel.clone()))?;
        node.as_leaf()
            .map(|_| ())
            .ok_or_else(|| LayoutError::NotALeaf(panel.clone()))
    }
}

pub struct WorkbenchController {
    backend: Arc<dyn SessionBackend>,
    transport: SessionTransportManager,
    state: Mutex<WorkbenchState>,
    saver: Mutex<LayoutSaver>,
}

impl WorkbenchController {
    pub fn new(
        backend: Arc<dyn SessionBackend>,
        transport: SessionTransportManager,
        saver: LayoutSaver,
    ) -> Self {
        Self {
            backend,
            transport,
            state: Mutex::new(WorkbenchState::default()),
            saver: Mutex::new(saver),
        }
    }

    pub fn transport(&self) -> &SessionTransportManager {
        &self.transport
    }

    pub fn snapshot(&self) -> WorkbenchState {
        self.state.lock().clone()
    }

    /// Session records of the active workbench joined with transport state.
    pub fn session_views(&self) -> Vec<SessionView> {
        let state = self.state.lock();
        state
            .sessions
            .iter()
            .map(|session| SessionView {
                state: self.transport.state(&session.id),
                busy: state.busy.contains(&session.id),
                reconnect_attempt: self.transport.reconnect_attempt(&session.id).unwrap_or(0),
                active: state.active_session.as_ref() == Some(&session.id),
                session: session.clone(),
            })
            .collect()
    }

    /// Queue a save of the current tree. Called with the state lock held so
    /// saves reach the saver in mutation order.
    fn schedule_save(&self, state: &WorkbenchState) {
        if let Some(wb) = &state.active_workbench {
            self.saver.lock().schedule(wb.clone(), state.tree.clone());
        }
    }

    /// Write a pending layout save now. Call before exiting.
    pub fn flush_layout(&self) {
        self.saver.lock().flush();
    }

    // ── Workbenches ─────────────────────────────────────────────────────

    /// List workbenches (creating a default one on first run) and open the first.
    pub async fn load(&self) -> Result<()> {
        let mut workbenches = self
            .backend
            .list_workbenches()
            .await
            .context("Failed to list workbenches")?;
        if workbenches.is_empty() {
            let wb = self
                .backend
                .create_workbench(DEFAULT_WORKBENCH)
                .await
                .context("Failed to create default workbench")?;
            info!(workbench = %wb.id, "created default workbench");
            workbenches.push(wb);
        }
        let first = workbenches[0].id.clone();
        self.state.lock().workbenches = workbenches;
        self.switch_workbench(&first).await
    }

    pub async fn switch_workbench(&self, id: &WorkbenchId) -> Result<()> {
        if self.state.lock().workbench(id).is_none() {
            anyhow::bail!("Unknown workbench: {id}");
        }
        self.saver.lock().flush();

        let sessions = self
            .backend
            .list_sessions(Some(id))
            .await
            .with_context(|| format!("Failed to list sessions for workbench {id}"))?;
        let live: Vec<SessionId> = sessions.iter().map(|s| s.id.clone()).collect();
        let persisted = self.saver.lock().store().load(id);
        let tree = reconcile(persisted.as_ref(), &live);

        let mut state = self.state.lock();
        state.active_workbench = Some(id.clone());
        state.active_session = tree
            .as_ref()
            .and_then(|t| t.first_leaf())
            .and_then(|leaf| leaf.active_tab.clone());
        state.sessions = sessions;
        state.tree = tree;
        if state.tree != persisted {
            self.schedule_save(&state);
        }
        info!(workbench = %id, sessions = live.len(), "switched workbench");
        Ok(())
    }

    /// Create a workbench and make it the active, empty one.
    pub async fn create_workbench(&self, name: &str) -> Result<WorkbenchInfo> {
        let wb = self
            .backend
            .create_workbench(name)
            .await
            .context("Failed to create workbench")?;
        self.saver.lock().flush();

        let mut state = self.state.lock();
        state.workbenches.push(wb.clone());
        state.active_workbench = Some(wb.id.clone());
        state.sessions.clear();
        state.tree = None;
        state.active_session = None;
        Ok(wb)
    }

    pub async fn rename_workbench(&self, id: &WorkbenchId, name: &str) -> Result<()> {
        let name = name.trim();
        if name.is_empty() {
            anyhow::bail!("Workbench name cannot be empty");
        }
        let color = {
            let state = self.state.lock();
            let wb = state
                .workbench(id)
                .with_context(|| format!("Unknown workbench: {id}"))?;
            wb.color.clone()
        };
        self.backend
            .update_workbench(id, name, &color)
            .await
            .context("Failed to rename workbench")?;
        if let Some(wb) = self.state.lock().workbenches.iter_mut().find(|w| w.id == *id) {
            wb.name = name.to_string();
        }
        Ok(())
    }

    pub async fn recolor_workbench(&self, id: &WorkbenchId, color: &str) -> Result<()> {
        let name = {
            let state = self.state.lock();
            let wb = state
                .workbench(id)
                .with_context(|| format!("Unknown workbench: {id}"))?;
            if wb.name.is_empty() {
                FALLBACK_WORKBENCH_NAME.to_string()
            } else {
                wb.name.clone()
            }
        };
        self.backend
            .update_workbench(id, &name, color)
            .await
            .context("Failed to recolor workbench")?;
        if let Some(wb) = self.state.lock().workbenches.iter_mut().find(|w| w.id == *id) {
            wb.color = color.to_string();
        }
        Ok(())
    }

    /// Delete a workbench, release its sessions' transports and forget its
    /// layout. Falls back to the first remaining workbench if it was active.
    pub async fn delete_workbench(&self, id: &WorkbenchId) -> Result<()> {
        let (was_active, local) = {
            let state = self.state.lock();
            let was_active = state.active_workbench.as_ref() == Some(id);
            let local: Vec<SessionId> = if was_active {
                state.sessions.iter().map(|s| s.id.clone()).collect()
            } else {
                Vec::new()
            };
            (was_active, local)
        };
        let doomed = if was_active {
            local
        } else {
            match self.backend.list_sessions(Some(id)).await {
                Ok(sessions) => sessions.into_iter().map(|s| s.id).collect(),
                Err(e) => {
                    warn!(workbench = %id, error = %e, "could not list sessions of deleted workbench");
                    Vec::new()
                }
            }
        };

        self.backend
            .delete_workbench(id)
            .await
            .context("Failed to delete workbench")?;

        self.transport.release_all(&doomed);
        {
            let mut saver = self.saver.lock();
            saver.discard(id);
            if let Err(e) = saver.store().remove(id) {
                warn!(workbench = %id, error = %e, "failed to remove layout");
            }
        }

        let next = {
            let mut state = self.state.lock();
            state.workbenches.retain(|w| w.id != *id);
            if was_active {
                state.active_workbench = None;
                state.sessions.clear();
                state.tree = None;
                state.active_session = None;
            }
            for sid in &doomed {
                state.busy.remove(sid);
            }
            state.workbenches.first().map(|w| w.id.clone())
        };
        info!(workbench = %id, released = doomed.len(), "deleted workbench");

        match next {
            Some(next) if was_active => self.switch_workbench(&next).await,
            _ => Ok(()),
        }
    }

    // ── Sessions ────────────────────────────────────────────────────────

    async fn create_remote(&self) -> Result<(WorkbenchId, Session)> {
        let wb = self
            .state
            .lock()
            .active_workbench
            .clone()
            .context("No active workbench")?;
        let session = self
            .backend
            .create_session(NewSession {
                workbench_id: Some(wb.clone()),
                ..Default::default()
            })
            .await
            .context("Failed to create session")?;
        Ok((wb, session))
    }

    /// Record a freshly created session and place it with `place`. Falls back
    /// to the first leaf when the target panel vanished during the request.
    fn adopt(
        &self,
        wb: &WorkbenchId,
        session: &Session,
        place: impl FnOnce(&PanelNode) -> Result<PanelNode, LayoutError>,
    ) -> Result<()> {
        let id = session.id.clone();
        let mut state = self.state.lock();
        if state.active_workbench.as_ref() != Some(wb) {
            // switched away mid-request; reconcile places it on return
            debug!(session = %id, "workbench changed while creating session");
            return Ok(());
        }
        let next = match &state.tree {
            None => PanelNode::single(id.clone()),
            Some(tree) => match place(tree) {
                Ok(next) => next,
                Err(e) => {
                    debug!(session = %id, error = %e, "target panel gone, using first leaf");
                    tree.with_tab(None, id.clone())?
                }
            },
        };
        state.sessions.push(session.clone());
        state.tree = Some(next);
        state.active_session = Some(id);
        self.schedule_save(&state);
        Ok(())
    }

    /// Create a session and add it as the active tab of `panel` (first leaf by default).
    pub async fn create_session(&self, panel: Option<&PanelId>) -> Result<Session> {
        if let Some(panel) = panel {
            self.state.lock().check_leaf(panel)?;
        }
        let (wb, session) = self.create_remote().await?;
        let target = panel.cloned();
        let id = session.id.clone();
        self.adopt(&wb, &session, |tree| tree.with_tab(target.as_ref(), id))?;
        info!(session = %session.id, "session created");
        Ok(session)
    }

    /// Split `panel` and put a new session in the fresh half.
    pub async fn split_panel(&self, panel: &PanelId, direction: Direction) -> Result<Session> {
        self.state.lock().check_leaf(panel)?;
        let (wb, session) = self.create_remote().await?;
        let id = session.id.clone();
        self.adopt(&wb, &session, |tree| tree.split(panel, direction, id))?;
        info!(session = %session.id, panel = %panel, ?direction, "panel split");
        Ok(session)
    }

    /// Delete on the server (best effort), release the transport and drop the tab.
    pub async fn close_session(&self, id: &SessionId) -> Result<()> {
        if let Err(e) = self.backend.delete_session(id).await {
            warn!(session = %id, error = %e, "server delete failed, closing locally");
        }
        self.transport.release(id);

        let mut state = self.state.lock();
        state.sessions.retain(|s| s.id != *id);
        state.busy.remove(id);
        if state.active_session.as_ref() == Some(id) {
            state.active_session = None;
        }
        let next = state.tree.as_ref().and_then(|t| t.without_session(id));
        if next != state.tree {
            state.tree = next;
            self.schedule_save(&state);
        }
        info!(session = %id, "session closed");
        Ok(())
    }

    pub fn activate_tab(&self, panel: &PanelId, session: &SessionId) -> Result<()> {
        {
            let mut state = self.state.lock();
            let tree = state.tree.as_ref().ok_or(LayoutError::Empty)?;
            let next = tree.activate(panel, session)?;
            state.tree = Some(next);
            state.active_session = Some(session.clone());
            self.schedule_save(&state);
        }
        if self.transport.is_attached(session) {
            self.transport.focus(session);
        }
        Ok(())
    }

    pub async fn update_session(&self, id: &SessionId, patch: SessionPatch) -> Result<Session> {
        let updated = self
            .backend
            .update_session(id, patch)
            .await
            .context("Failed to update session")?;
        let mut state = self.state.lock();
        if let Some(slot) = state.sessions.iter_mut().find(|s| s.id == *id) {
            *slot = updated.clone();
        }
        Ok(updated)
    }

    pub fn update_panel_sizes(&self, panel: &PanelId, sizes: Vec<f64>) -> Result<()> {
        let mut state = self.state.lock();
        let tree = state.tree.as_ref().ok_or(LayoutError::Empty)?;
        state.tree = Some(tree.with_sizes(panel, sizes)?);
        self.schedule_save(&state);
        Ok(())
    }

    pub fn drag_divider(&self, panel: &PanelId, index: usize, ratio_delta: f64) -> Result<()> {
        let mut state = self.state.lock();
        let tree = state.tree.as_ref().ok_or(LayoutError::Empty)?;
        state.tree = Some(tree.drag_divider(panel, index, ratio_delta)?);
        self.schedule_save(&state);
        Ok(())
    }

    /// [`drag_divider`](Self::drag_divider) with the move given in pixels
    /// across a split that is `extent` pixels wide (or tall).
    pub fn drag_divider_pixels(
        &self,
        panel: &PanelId,
        index: usize,
        pixel_delta: f64,
        extent: f64,
    ) -> Result<()> {
        let mut state = self.state.lock();
        let tree = state.tree.as_ref().ok_or(LayoutError::Empty)?;
        let total: f64 = match tree.find(panel) {
            Some(PanelNode::Split(split)) => split.sizes.iter().sum(),
            _ => 0.0,
        };
        let ratio_delta = pixel_delta_to_ratio(pixel_delta, extent, total);
        state.tree = Some(tree.drag_divider(panel, index, ratio_delta)?);
        self.schedule_save(&state);
        Ok(())
    }

    // ── Views ───────────────────────────────────────────────────────────

    /// Show `id` in `container`, connecting first if needed.
    pub fn open_view(&self, id: &SessionId, container: Container) -> Result<(), SessionError> {
        self.transport.acquire(id)?;
        self.transport.attach(id, container)?;
        if self.state.lock().active_session.as_ref() == Some(id) {
            self.transport.focus(id);
        }
        Ok(())
    }

    pub fn close_view(&self, id: &SessionId) {
        self.transport.detach(id);
    }

    /// Start connecting every session the layout shows.
    pub fn warm_sessions(&self) {
        let ids = self
            .state
            .lock()
            .tree
            .as_ref()
            .map(PanelNode::session_ids)
            .unwrap_or_default();
        for id in ids {
            if let Err(e) = self.transport.acquire(&id) {
                debug!(session = %id, error = %e, "not warming session");
            }
        }
    }

    /// Follow transport events until the manager goes away.
    pub fn run_events(self: &Arc<Self>) -> JoinHandle<()> {
        let mut events = self.transport.subscribe();
        let weak: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            loop {
                let event = match events.recv().await {
                    Ok(event) => event,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "transport events lagged");
                        continue;
                    }
                    Err(RecvError::Closed) => break,
                };
                let Some(this) = weak.upgrade() else {
                    break;
                };
                match event {
                    TransportEvent::BusyChanged { id, busy } => {
                        let mut state = this.state.lock();
                        if busy {
                            state.busy.insert(id);
                        } else {
                            state.busy.remove(&id);
                        }
                    }
                    TransportEvent::Exited { id } => {
                        if let Err(e) = this.close_session(&id).await {
                            warn!(session = %id, error = %e, "failed to close exited session");
                        }
                    }
                    TransportEvent::Released { id } => {
                        this.state.lock().busy.remove(&id);
                    }
                    TransportEvent::Connected { .. } | TransportEvent::Disconnected { .. } => {}
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{ApiError, ApiResult};
    use crate::layout_store::LayoutStore;
    use crate::surface::ScreenSurfaceFactory;
    use bench_core::testing::{FakeConnector, settle};
    use futures::future::BoxFuture;
    use layout_tree::Leaf;
    use session_transport::{ContainerId, FileBridge, PastedImage, TransportSettings};
    use std::path::PathBuf;
    use std::time::Duration;

    #[derive(Default)]
    struct Data {
        workbenches: Vec<WorkbenchInfo>,
        sessions: Vec<Session>,
        next: u32,
        deleted: Vec<SessionId>,
        creates: usize,
    }

    #[derive(Default)]
    struct FakeBackend {
        data: Mutex<Data>,
    }

    impl FakeBackend {
        fn with_workbench(id: &str, sessions: &[&str]) -> Arc<Self> {
            let backend = Self::default();
            {
                let mut data = backend.data.lock();
                data.workbenches.push(workbench(id));
                for s in sessions {
                    data.sessions.push(session(s, id));
                }
            }
            Arc::new(backend)
        }
    }

    fn workbench(id: &str) -> WorkbenchInfo {
        WorkbenchInfo {
            id: WorkbenchId::new(id),
            name: id.to_string(),
            color: String::new(),
            sort_order: 0,
            created_at: String::new(),
        }
    }

    fn session(id: &str, wb: &str) -> Session {
        Session {
            id: SessionId::new(id),
            title: "Terminal".to_string(),
            shell: "/bin/sh".to_string(),
            cols: 80,
            rows: 24,
            color: String::new(),
            workbench_id: Some(WorkbenchId::new(wb)),
            created_at: String::new(),
        }
    }

    fn ready<T: Send + 'static>(value: ApiResult<T>) -> BoxFuture<'static, ApiResult<T>> {
        Box::pin(async move { value })
    }

    impl SessionBackend for FakeBackend {
        fn list_sessions(&self, wb: Option<&WorkbenchId>) -> BoxFuture<'static, ApiResult<Vec<Session>>> {
            let data = self.data.lock();
            let list = data
                .sessions
                .iter()
                .filter(|s| wb.is_none() || s.workbench_id.as_ref() == wb)
                .cloned()
                .collect();
            ready(Ok(list))
        }

        fn create_session(&self, req: NewSession) -> BoxFuture<'static, ApiResult<Session>> {
            let mut data = self.data.lock();
            data.next += 1;
            data.creates += 1;
            let wb = req.workbench_id.map(|w| w.0).unwrap_or_default();
            let s = session(&format!("new{}", data.next), &wb);
            data.sessions.push(s.clone());
            ready(Ok(s))
        }

        fn update_session(&self, id: &SessionId, patch: SessionPatch) -> BoxFuture<'static, ApiResult<Session>> {
            let mut data = self.data.lock();
            let Some(s) = data.sessions.iter_mut().find(|s| s.id == *id) else {
                return ready(Err(ApiError::Status { status: 404, body: "not found".into() }));
            };
            if let Some(title) = patch.title {
                s.title = title;
            }
            if let Some(color) = patch.color {
                s.color = color;
            }
            ready(Ok(s.clone()))
        }

        fn delete_session(&self, id: &SessionId) -> BoxFuture<'static, ApiResult<()>> {
            let mut data = self.data.lock();
            data.sessions.retain(|s| s.id != *id);
            data.deleted.push(id.clone());
            ready(Ok(()))
        }

        fn list_workbenches(&self) -> BoxFuture<'static, ApiResult<Vec<WorkbenchInfo>>> {
            ready(Ok(self.data.lock().workbenches.clone()))
        }

        fn create_workbench(&self, name: &str) -> BoxFuture<'static, ApiResult<WorkbenchInfo>> {
            let mut data = self.data.lock();
            data.next += 1;
            let mut wb = workbench(&format!("wb{}", data.next));
            wb.name = name.to_string();
            data.workbenches.push(wb.clone());
            ready(Ok(wb))
        }

        fn update_workbench(&self, id: &WorkbenchId, name: &str, color: &str) -> BoxFuture<'static, ApiResult<()>> {
            let mut data = self.data.lock();
            if let Some(wb) = data.workbenches.iter_mut().find(|w| w.id == *id) {
                wb.name = name.to_string();
                wb.color = color.to_string();
            }
            ready(Ok(()))
        }

        fn delete_workbench(&self, id: &WorkbenchId) -> BoxFuture<'static, ApiResult<()>> {
            let mut data = self.data.lock();
            data.workbenches.retain(|w| w.id != *id);
            data.sessions.retain(|s| s.workbench_id.as_ref() != Some(id));
            ready(Ok(()))
        }
    }

    struct NoFiles;

    impl FileBridge for NoFiles {
        fn resolve_path(&self, name: &str, _is_dir: bool) -> BoxFuture<'static, anyhow::Result<PathBuf>> {
            let path = PathBuf::from("/remote").join(name);
            Box::pin(async move { Ok(path) })
        }

        fn upload(&self, image: PastedImage) -> BoxFuture<'static, anyhow::Result<PathBuf>> {
            let path = PathBuf::from("/uploads").join(image.filename);
            Box::pin(async move { Ok(path) })
        }
    }

    struct Harness {
        controller: Arc<WorkbenchController>,
        backend: Arc<FakeBackend>,
        connector: FakeConnector,
        store: LayoutStore,
        _tmp: tempfile::TempDir,
    }

    fn harness(backend: Arc<FakeBackend>) -> Harness {
        let tmp = tempfile::tempdir().unwrap();
        let store = LayoutStore::new(tmp.path());
        let connector = FakeConnector::new();
        let transport = SessionTransportManager::new(
            TransportSettings::new("ws://bench.test"),
            Arc::new(connector.clone()),
            Arc::new(ScreenSurfaceFactory::new()),
            Arc::new(NoFiles),
        );
        let saver = LayoutSaver::new(store.clone(), Duration::from_millis(300));
        let controller = Arc::new(WorkbenchController::new(backend.clone(), transport, saver));
        Harness {
            controller,
            backend,
            connector,
            store,
            _tmp: tmp,
        }
    }

    fn sids(list: &[&str]) -> Vec<SessionId> {
        list.iter().map(|s| SessionId::new(*s)).collect()
    }

    fn root_leaf(h: &Harness) -> Leaf {
        h.controller.snapshot().tree.unwrap().first_leaf().unwrap().clone()
    }

    #[tokio::test(start_paused = true)]
    async fn load_creates_default_workbench_when_none_exist() {
        let h = harness(Arc::new(FakeBackend::default()));
        h.controller.load().await.unwrap();

        let state = h.controller.snapshot();
        assert_eq!(state.workbenches.len(), 1);
        assert_eq!(state.workbenches[0].name, "Default");
        assert_eq!(state.active_workbench, Some(state.workbenches[0].id.clone()));
        assert_eq!(state.tree, None);
        assert_eq!(state.active_session, None);
    }

    #[tokio::test(start_paused = true)]
    async fn load_reconciles_persisted_layout() {
        let h = harness(FakeBackend::with_workbench("wb", &["a", "b", "c"]));
        let persisted = PanelNode::Leaf(Leaf {
            id: PanelId::new("main"),
            tabs: sids(&["a", "gone", "b"]),
            active_tab: Some("gone".into()),
        });
        h.store.save(&WorkbenchId::new("wb"), &persisted).unwrap();

        h.controller.load().await.unwrap();
        let leaf = root_leaf(&h);
        assert_eq!(leaf.tabs, sids(&["a", "b", "c"]));
        assert_eq!(leaf.active_tab, Some("a".into()));
        assert_eq!(h.controller.snapshot().active_session, Some("a".into()));

        // repaired tree is written back after the debounce
        tokio::time::sleep(Duration::from_millis(350)).await;
        let saved = h.store.load(&WorkbenchId::new("wb")).unwrap();
        assert_eq!(saved.session_ids(), sids(&["a", "b", "c"]));
    }

    #[tokio::test(start_paused = true)]
    async fn split_of_three_tab_panel_focuses_new_session() {
        let h = harness(FakeBackend::with_workbench("wb", &["a", "b", "c"]));
        h.controller.load().await.unwrap();
        let panel = root_leaf(&h).id;

        let created = h
            .controller
            .split_panel(&panel, Direction::Horizontal)
            .await
            .unwrap();

        let state = h.controller.snapshot();
        assert_eq!(state.sessions.len(), 4);
        assert_eq!(state.active_session, Some(created.id.clone()));
        let PanelNode::Split(split) = state.tree.as_ref().unwrap() else {
            panic!("expected split");
        };
        assert_eq!(split.id, panel);
        assert_eq!(split.sizes, vec![1.0, 1.0]);
        assert_eq!(split.children[0].as_leaf().unwrap().tabs, sids(&["a", "b", "c"]));
        assert_eq!(split.children[1].as_leaf().unwrap().tabs, vec![created.id.clone()]);
    }

    #[tokio::test(start_paused = true)]
    async fn create_into_unknown_panel_fails_before_request() {
        let h = harness(FakeBackend::with_workbench("wb", &["a"]));
        h.controller.load().await.unwrap();

        let err = h
            .controller
            .create_session(Some(&PanelId::new("nope")))
            .await
            .unwrap_err();
        assert!(err.downcast_ref::<LayoutError>().is_some());
        assert_eq!(h.backend.data.lock().creates, 0);

        let s = h.controller.create_session(None).await.unwrap();
        assert_eq!(root_leaf(&h).tabs, vec![SessionId::new("a"), s.id]);
    }

    #[tokio::test(start_paused = true)]
    async fn close_session_prunes_tree_and_releases_transport() {
        let h = harness(FakeBackend::with_workbench("wb", &["a", "b"]));
        h.controller.load().await.unwrap();
        h.controller.warm_sessions();
        settle().await;
        assert!(h.controller.transport().has(&"a".into()));

        h.controller.close_session(&"a".into()).await.unwrap();
        let state = h.controller.snapshot();
        assert_eq!(state.tree.unwrap().session_ids(), sids(&["b"]));
        assert_eq!(state.active_session, None);
        assert!(!h.controller.transport().has(&"a".into()));
        assert_eq!(h.backend.data.lock().deleted, sids(&["a"]));
    }

    #[tokio::test(start_paused = true)]
    async fn exit_frame_closes_session() {
        let h = harness(FakeBackend::with_workbench("wb", &["a", "b"]));
        h.controller.load().await.unwrap();
        let _events = h.controller.run_events();

        let (container, _tx) = Container::channel(ContainerId::new("view"), 8);
        h.controller.open_view(&"a".into(), container).unwrap();
        let server = h.connector.next_server().await;
        settle().await;

        server.send_text(r#"{"type":"exit"}"#);
        settle().await;

        let state = h.controller.snapshot();
        assert!(state.sessions.iter().all(|s| s.id != SessionId::new("a")));
        assert_eq!(state.tree.unwrap().session_ids(), sids(&["b"]));
    }

    #[tokio::test(start_paused = true)]
    async fn busy_events_update_state() {
        let h = harness(FakeBackend::with_workbench("wb", &["a"]));
        h.controller.load().await.unwrap();
        let _events = h.controller.run_events();
        h.controller.warm_sessions();
        let server = h.connector.next_server().await;
        settle().await;

        tokio::time::sleep(Duration::from_millis(2100)).await;
        server.send_binary(b"building...");
        settle().await;
        assert!(h.controller.snapshot().busy.contains(&SessionId::new("a")));
        assert_eq!(h.controller.session_views()[0].status(), "busy");

        tokio::time::sleep(Duration::from_millis(1600)).await;
        settle().await;
        assert!(h.controller.snapshot().busy.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn switch_flushes_pending_save() {
        let backend = FakeBackend::with_workbench("one", &["a"]);
        backend.data.lock().workbenches.push(workbench("two"));
        let h = harness(backend);
        h.controller.load().await.unwrap();

        let s = h.controller.create_session(None).await.unwrap();
        h.controller.switch_workbench(&WorkbenchId::new("two")).await.unwrap();

        let saved = h.store.load(&WorkbenchId::new("one")).unwrap();
        assert_eq!(saved.session_ids(), vec![SessionId::new("a"), s.id]);
        assert_eq!(h.controller.snapshot().tree, None);
    }

    #[tokio::test(start_paused = true)]
    async fn delete_active_workbench_switches_to_remaining() {
        let backend = FakeBackend::with_workbench("one", &["a"]);
        {
            let mut data = backend.data.lock();
            data.workbenches.push(workbench("two"));
            data.sessions.push(session("z", "two"));
        }
        let h = harness(backend);
        h.controller.load().await.unwrap();
        h.controller.warm_sessions();
        settle().await;
        tokio::time::sleep(Duration::from_millis(350)).await;
        assert!(h.store.load(&WorkbenchId::new("one")).is_some());

        h.controller.delete_workbench(&WorkbenchId::new("one")).await.unwrap();

        assert!(!h.controller.transport().has(&"a".into()));
        assert!(!h.store.path_for(&WorkbenchId::new("one")).exists());
        let state = h.controller.snapshot();
        assert_eq!(state.active_workbench, Some(WorkbenchId::new("two")));
        assert_eq!(state.tree.unwrap().session_ids(), sids(&["z"]));
    }

    #[tokio::test(start_paused = true)]
    async fn rename_and_recolor_send_both_fields() {
        let h = harness(FakeBackend::with_workbench("wb", &[]));
        h.controller.load().await.unwrap();
        let id = WorkbenchId::new("wb");

        assert!(h.controller.rename_workbench(&id, "  ").await.is_err());
        h.controller.rename_workbench(&id, "Infra").await.unwrap();
        h.controller.recolor_workbench(&id, "#ff8800").await.unwrap();

        let server_side = h.backend.data.lock().workbenches[0].clone();
        assert_eq!(server_side.name, "Infra");
        assert_eq!(server_side.color, "#ff8800");
        assert_eq!(h.controller.snapshot().workbenches[0], server_side);
    }

    #[tokio::test(start_paused = true)]
    async fn divider_and_size_edits_are_persisted() {
        let h = harness(FakeBackend::with_workbench("wb", &["a"]));
        h.controller.load().await.unwrap();
        let panel = root_leaf(&h).id;
        h.controller.split_panel(&panel, Direction::Vertical).await.unwrap();

        h.controller.update_panel_sizes(&panel, vec![3.0, 1.0]).unwrap();
        h.controller.drag_divider(&panel, 0, -1.0).unwrap();
        assert!(h.controller.update_panel_sizes(&panel, vec![1.0]).is_err());

        tokio::time::sleep(Duration::from_millis(350)).await;
        let Some(PanelNode::Split(split)) = h.store.load(&WorkbenchId::new("wb")) else {
            panic!("expected split");
        };
        assert_eq!(split.sizes, vec![2.0, 2.0]);
    }

    #[tokio::test(start_paused = true)]
    async fn pixel_drag_scales_by_split_extent() {
        let h = harness(FakeBackend::with_workbench("wb", &["a"]));
        h.controller.load().await.unwrap();
        let panel = root_leaf(&h).id;
        h.controller.split_panel(&panel, Direction::Horizontal).await.unwrap();

        // 200px of an 800px split holding ratios [1, 1] is half a unit
        h.controller.drag_divider_pixels(&panel, 0, 200.0, 800.0).unwrap();
        let Some(PanelNode::Split(split)) = h.controller.snapshot().tree else {
            panic!("expected split");
        };
        assert_eq!(split.sizes, vec![1.5, 0.5]);

        let leaf = split.children[0].id().clone();
        assert!(h.controller.drag_divider_pixels(&leaf, 0, 10.0, 800.0).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn activate_tab_sets_global_focus() {
        let h = harness(FakeBackend::with_workbench("wb", &["a", "b"]));
        h.controller.load().await.unwrap();
        let panel = root_leaf(&h).id;

        h.controller.activate_tab(&panel, &"b".into()).unwrap();
        assert_eq!(root_leaf(&h).active_tab, Some("b".into()));
        assert_eq!(h.controller.snapshot().active_session, Some("b".into()));
        assert!(h.controller.activate_tab(&panel, &"zz".into()).is_err());
    }
}
