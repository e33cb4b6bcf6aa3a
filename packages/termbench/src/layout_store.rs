//! One JSON file per workbench under `layouts/`.

use anyhow::{Context, Result};
use bench_core::{ScheduledTask, WorkbenchId};
use layout_tree::PanelNode;
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct LayoutStore {
    dir: PathBuf,
}

impl LayoutStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, workbench: &WorkbenchId) -> PathBuf {
        let safe: String = workbench
            .as_str()
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.dir.join(format!("layout-{safe}.json"))
    }

    /// Missing and unparsable files both read as "no layout".
    pub fn load(&self, workbench: &WorkbenchId) -> Option<PanelNode> {
        let path = self.path_for(workbench);
        let data = match std::fs::read_to_string(&path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to read layout");
                return None;
            }
        };
        match serde_json::from_str(&data) {
            Ok(tree) => Some(tree),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "ignoring unparsable layout");
                None
            }
        }
    }

    pub fn save(&self, workbench: &WorkbenchId, tree: &PanelNode) -> Result<()> {
        let path = self.path_for(workbench);
        let tmp = path.with_extension("json.tmp");
        let data = serde_json::to_vec_pretty(tree).context("Failed to serialize layout")?;
        std::fs::write(&tmp, data)
            .with_context(|| format!("Failed to write {}", tmp.display()))?;
        std::fs::rename(&tmp, &path)
            .with_context(|| format!("Failed to move layout into {}", path.display()))?;
        debug!(workbench = %workbench, "layout saved");
        Ok(())
    }

    pub fn remove(&self, workbench: &WorkbenchId) -> Result<()> {
        let path = self.path_for(workbench);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("Failed to remove {}", path.display())),
        }
    }

    /// Write `tree`, or remove the file when there is none. Errors are logged.
    pub fn persist(&self, workbench: &WorkbenchId, tree: Option<&PanelNode>) {
        let result = match tree {
            Some(tree) => self.save(workbench, tree),
            None => self.remove(workbench),
        };
        if let Err(e) = result {
            warn!(workbench = %workbench, error = %e, "layout save skipped");
        }
    }
}

type Pending = (WorkbenchId, Option<PanelNode>);

/// Debounced writer: only the last tree scheduled within the window is saved.
pub struct LayoutSaver {
    store: LayoutStore,
    debounce: Duration,
    pending: Arc<Mutex<Option<Pending>>>,
    timer: ScheduledTask,
}

impl LayoutSaver {
    pub fn new(store: LayoutStore, debounce: Duration) -> Self {
        Self {
            store,
            debounce,
            pending: Arc::new(Mutex::new(None)),
            timer: ScheduledTask::new("layout-save"),
        }
    }

    pub fn store(&self) -> &LayoutStore {
        &self.store
    }

    pub fn schedule(&mut self, workbench: WorkbenchId, tree: Option<PanelNode>) {
        {
            let mut pending = self.pending.lock();
            // a different workbench's pending write must not be lost
            if let Some((other, other_tree)) = pending.take_if(|(wb, _)| *wb != workbench) {
                self.store.persist(&other, other_tree.as_ref());
            }
            *pending = Some((workbench, tree));
        }
        let pending = Arc::clone(&self.pending);
        let store = self.store.clone();
        self.timer.schedule(self.debounce, move || {
            if let Some((wb, tree)) = pending.lock().take() {
                store.persist(&wb, tree.as_ref());
            }
        });
    }

    /// Write any pending tree now.
    pub fn flush(&mut self) {
        self.timer.cancel();
        if let Some((wb, tree)) = self.pending.lock().take() {
            self.store.persist(&wb, tree.as_ref());
        }
    }

    /// Forget a pending write for `workbench` without saving it.
    pub fn discard(&mut self, workbench: &WorkbenchId) {
        let mut pending = self.pending.lock();
        if pending.as_ref().is_some_and(|(wb, _)| wb == workbench) {
            *pending = None;
            self.timer.cancel();
        }
    }

    pub fn is_pending(&self) -> bool {
        self.pending.lock().is_some()
    }
}
