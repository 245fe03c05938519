//! Progress reporting and cancellation shared by the bulk orchestrators.

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use tokio_util::sync::CancellationToken;

/// Receives best-effort progress updates from a running job.
pub trait ProgressSink: Send + Sync {
    fn update(&self, percent: u8, message: &str);
}

impl<F> ProgressSink for F
where
    F: Fn(u8, &str) + Send + Sync,
{
    fn update(&self, percent: u8, message: &str) {
        self(percent, message)
    }
}

/// Per-run handle passed to an orchestrator: where to report progress and
/// which token to check between chunks.
#[derive(Clone, Default)]
pub struct JobContext {
    sink: Option<Arc<dyn ProgressSink>>,
    cancel: CancellationToken,
    last_percent: Arc<AtomicU8>,
}

impl JobContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_progress(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Report progress, never moving backwards. Values above 100 are capped.
    pub fn progress(&self, percent: u8, message: &str) {
        let percent = percent.min(100);
        let previous = self.last_percent.fetch_max(percent, Ordering::SeqCst);
        if let Some(sink) = &self.sink {
            sink.update(previous.max(percent), message);
        }
    }

    pub fn last_percent(&self) -> u8 {
        self.last_percent.load(Ordering::SeqCst)
    }
}

/// Percentage of `done` out of `total` mapped into `[floor, ceiling]`.
pub fn scaled_percent(done: usize, total: usize, floor: u8, ceiling: u8) -> u8 {
    if total == 0 {
        return ceiling;
    }
    let span = (ceiling.saturating_sub(floor)) as usize;
    let step = done.min(total) * span / total;
    floor + step as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[test]
    fn scaled_percent_stays_in_range() {
        assert_eq!(scaled_percent(0, 120, 0, 50), 0);
        assert_eq!(scaled_percent(50, 120, 0, 50), 20);
        assert_eq!(scaled_percent(120, 120, 0, 50), 50);
        assert_eq!(scaled_percent(500, 120, 0, 50), 50);
        assert_eq!(scaled_percent(1, 2, 50, 100), 75);
        assert_eq!(scaled_percent(0, 0, 0, 100), 100);
    }

    #[test]
    fn progress_never_moves_backwards() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink_seen = seen.clone();
        let context = JobContext::new().with_progress(Arc::new(move |percent: u8, _: &str| {
            sink_seen.lock().push(percent);
        }));

        context.progress(40, "a");
        context.progress(20, "b");
        context.progress(150, "c");

        assert_eq!(*seen.lock(), vec![40, 40, 100]);
        assert_eq!(context.last_percent(), 100);
    }
}
