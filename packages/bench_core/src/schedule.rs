use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::trace;

/// A named, cancellable one-shot timer.
///
/// At most one callback is pending per task: scheduling again aborts the
/// previous one, as do [`cancel`](Self::cancel) and drop. Must be used from
/// within a tokio runtime.
#[derive(Debug)]
pub struct ScheduledTask {
    name: &'static str,
    handle: Option<JoinHandle<()>>,
}

impl ScheduledTask {
    pub fn new(name: &'static str) -> Self {
        Self { name, handle: None }
    }

    pub fn schedule<F>(&mut self, delay: Duration, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.cancel();
        trace!(task = self.name, delay_ms = delay.as_millis() as u64, "scheduled");
        self.handle = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            f();
        }));
    }

    /// Returns true if a callback was still pending.
    pub fn cancel(&mut self) -> bool {
        match self.handle.take() {
            Some(handle) if !handle.is_finished() => {
                handle.abort();
                trace!(task = self.name, "cancelled");
                true
            }
            _ => false,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }
}

impl Drop for ScheduledTask {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test(start_paused = true)]
    async fn fires_after_delay() {
        let hits = Arc::new(AtomicUsize::new(0));
        let mut task = ScheduledTask::new("test");
        let h = hits.clone();
        task.schedule(Duration::from_millis(100), move || {
            h.fetch_add(1, Ordering::SeqCst);
        });
        assert!(task.is_pending());

        tokio::time::sleep(Duration::from_millis(99)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        tokio::time::sleep(Duration::from_millis(2)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(!task.is_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn rescheduling_replaces_pending_callback() {
        let hits = Arc::new(AtomicUsize::new(0));
        let mut task = ScheduledTask::new("debounce");
        for _ in 0..5 {
            let h = hits.clone();
            task.schedule(Duration::from_millis(100), move || {
                h.fetch_add(1, Ordering::SeqCst);
            });
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_and_drop_abort() {
        let hits = Arc::new(AtomicUsize::new(0));

        let mut task = ScheduledTask::new("cancel");
        let h = hits.clone();
        task.schedule(Duration::from_millis(10), move || {
            h.fetch_add(1, Ordering::SeqCst);
        });
        assert!(task.cancel());
        assert!(!task.cancel());

        {
            let mut dropped = ScheduledTask::new("drop");
            let h = hits.clone();
            dropped.schedule(Duration::from_millis(10), move || {
                h.fetch_add(1, Ordering::SeqCst);
            });
        }

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }
}
