//! Headless render surface backed by a `vt100` screen.
//!
//! Output is always parsed into the screen buffer. While mounted, raw bytes are
//! also forwarded to an optional sink so `attach` can mirror them on the real
//! terminal.

use bench_core::SessionId;
use parking_lot::Mutex;
use session_transport::{ContainerId, Geometry, RenderSurface, SurfaceFactory};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::trace;

pub type OutputSink = mpsc::UnboundedSender<(SessionId, Vec<u8>)>;

type Screens = Arc<Mutex<HashMap<SessionId, Arc<Mutex<vt100::Parser>>>>>;

pub struct ScreenSurface {
    session: SessionId,
    parser: Arc<Mutex<vt100::Parser>>,
    mounted: Option<ContainerId>,
    sink: Option<OutputSink>,
    screens: Screens,
}

impl ScreenSurface {
    fn forward(&self, data: Vec<u8>) {
        if let (Some(_), Some(sink)) = (&self.mounted, &self.sink) {
            let _ = sink.send((self.session.clone(), data));
        }
    }
}

impl RenderSurface for ScreenSurface {
    fn write(&mut self, data: &[u8]) {
        self.parser.lock().process(data);
        self.forward(data.to_vec());
    }

    fn fit(&mut self, available: Geometry) {
        let cols = available.cols.max(1);
        let rows = available.rows.max(1);
        self.parser.lock().set_size(rows, cols);
    }

    fn geometry(&self) -> Geometry {
        let (rows, cols) = self.parser.lock().screen().size();
        Geometry::new(cols, rows)
    }

    /// Repaint the whole screen into the sink so a fresh view starts current.
    fn focus(&mut self) {
        let screen = self.parser.lock().screen().contents_formatted();
        self.forward(screen);
    }

    fn mount(&mut self, container: &ContainerId) {
        trace!(session = %self.session, container = %container, "surface mounted");
        self.mounted = Some(container.clone());
    }

    fn unmount(&mut self) {
        self.mounted = None;
    }

    fn dispose(&mut self) {
        self.mounted = None;
        self.screens.lock().remove(&self.session);
    }
}

#[derive(Clone, Default)]
pub struct ScreenSurfaceFactory {
    sink: Option<OutputSink>,
    screens: Screens,
}

impl ScreenSurfaceFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forward output of mounted surfaces to `sink`.
    pub fn with_sink(sink: OutputSink) -> Self {
        Self {
            sink: Some(sink),
            screens: Screens::default(),
        }
    }

    /// Current screen text of a live session, if any.
    pub fn contents(&self, session: &SessionId) -> Option<String> {
        let parser = self.screens.lock().get(session).cloned()?;
        let contents = parser.lock().screen().contents();
        Some(contents)
    }
}

impl SurfaceFactory for ScreenSurfaceFactory {
    fn create(&self, session: &SessionId) -> Box<dyn RenderSurface> {
        let default = Geometry::default();
        let parser = Arc::new(Mutex::new(vt100::Parser::new(default.rows, default.cols, 0)));
        self.screens.lock().insert(session.clone(), Arc::clone(&parser));
        Box::new(ScreenSurface {
            session: session.clone(),
            parser,
            mounted: None,
            sink: self.sink.clone(),
            screens: Arc::clone(&self.screens),
        })
    }
}
