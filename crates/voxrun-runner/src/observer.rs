//! Progress and log reporting for runs

use tracing::info;
use uuid::Uuid;

/// Receives progress and output lines of a run
///
/// Callbacks are invoked from the runner's worker task, never from the
/// caller's context.
pub trait RunObserver: Send + Sync {
    /// Synthetic progress, non-decreasing within a run
    fn on_progress(&self, value: f64);

    /// One line of container output or a runner status message
    fn on_log(&self, line: &str);
}

/// Observer that discards everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl RunObserver for NoopObserver {
    fn on_progress(&self, _value: f64) {}

    fn on_log(&self, _line: &str) {}
}

/// Observer forwarding to `tracing`
#[derive(Debug, Clone)]
pub struct TracingObserver {
    run_id: Option<Uuid>,
}

impl TracingObserver {
    pub fn new() -> Self {
        Self { run_id: None }
    }

    /// Tag every event with a run id
    pub fn for_run(run_id: Uuid) -> Self {
        Self {
            run_id: Some(run_id),
        }
    }
}

impl Default for TracingObserver {
    fn default() -> Self {
        Self::new()
    }
}

impl RunObserver for TracingObserver {
    fn on_progress(&self, value: f64) {
        match self.run_id {
            Some(id) => info!(run_id = %id, progress = value, "Run progress"),
            None => info!(progress = value, "Run progress"),
        }
    }

    fn on_log(&self, line: &str) {
        match self.run_id {
            Some(id) => info!(run_id = %id, "{}", line),
            None => info!("{}", line),
        }
    }
}

/// Fixed-step progress estimate
///
/// Each observed output line advances progress by `step`; the value says
/// nothing about how much work remains.
#[derive(Debug, Clone)]
pub struct ProgressCounter {
    step: f64,
    lines: u64,
}

impl ProgressCounter {
    pub fn new(step: f64) -> Self {
        Self { step, lines: 0 }
    }

    /// Record one line and return the new value
    pub fn advance(&mut self) -> f64 {
        self.lines += 1;
        self.value()
    }

    pub fn value(&self) -> f64 {
        self.step * self.lines as f64
    }

    pub fn lines(&self) -> u64 {
        self.lines
    }
}
