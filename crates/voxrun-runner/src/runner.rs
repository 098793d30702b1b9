//! Single-worker job runner
//!
//! A [`JobRunner`] executes at most one job at a time. `start` claims the
//! runner by moving its state from an inactive state to `Staging` in one
//! step, then hands the job to a tokio task which walks it through
//! `Staging -> Running -> DrainingOutput` and a terminal state.

use chrono::{DateTime, Utc};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;
use voxrun_core::{
    BindingKind, ContainerConfig, JobDescriptor, JobInputs, Organ, PredictionsConfig, RunState,
    TaskKind, VoxrunConfig, VoxrunError, VoxrunResult,
};
use voxrun_runtime::{ContainerGateway, ProcessHandle};
use voxrun_store::{MaterializedOutputs, Materializer, StagingLayout};

use crate::invocation::build_invocation;
use crate::observer::{ProgressCounter, RunObserver};

/// How a run ended
#[derive(Debug)]
pub enum RunOutcome {
    /// Process exited cleanly; per-binding results inside
    Completed(MaterializedOutputs),
    /// Cancelled by the caller
    Aborted,
    Failed(VoxrunError),
}

impl RunOutcome {
    pub fn state(&self) -> RunState {
        match self {
            RunOutcome::Completed(_) => RunState::Completed,
            RunOutcome::Aborted => RunState::Aborted,
            RunOutcome::Failed(_) => RunState::Failed,
        }
    }

    pub fn outputs(&self) -> Option<&MaterializedOutputs> {
        match self {
            RunOutcome::Completed(outputs) => Some(outputs),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&VoxrunError> {
        match self {
            RunOutcome::Failed(e) => Some(e),
            _ => None,
        }
    }
}

/// Final status of one run
#[derive(Debug)]
pub struct RunReport {
    pub run_id: Uuid,
    /// Terminal state
    pub state: RunState,
    pub outcome: RunOutcome,
    /// Last progress value reported
    pub progress: f64,
    /// Output lines observed
    pub lines: u64,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl RunReport {
    pub fn elapsed(&self) -> chrono::Duration {
        self.finished_at - self.started_at
    }
}

/// Handle to a started run
pub struct RunHandle {
    run_id: Uuid,
    cancel: CancellationToken,
    task: JoinHandle<RunReport>,
}

impl RunHandle {
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Request cancellation; best effort
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Token cancelling this run, usable while `wait` is pending
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Wait for the run to reach a terminal state
    pub async fn wait(self) -> VoxrunResult<RunReport> {
        self.task
            .await
            .map_err(|e| VoxrunError::Internal(format!("run worker terminated: {}", e)))
    }
}

/// Runs container jobs one at a time
pub struct JobRunner {
    /// Container runtime
    gateway: Arc<dyn ContainerGateway>,
    /// Host staging directory
    layout: StagingLayout,
    /// Container-side staging roots
    container: ContainerConfig,
    /// Runtime configuration file contents
    predictions: PredictionsConfig,
    /// Progress increment per output line
    progress_step: f64,
    /// Current state; also the busy flag
    state: Arc<watch::Sender<RunState>>,
    /// Cancellation token of the latest run
    active: Mutex<Option<CancellationToken>>,
}

impl JobRunner {
    /// Create a runner from configuration
    pub fn new(gateway: Arc<dyn ContainerGateway>, config: &VoxrunConfig) -> VoxrunResult<Self> {
        let step = config.runner.progress_step;
        if !step.is_finite() || step <= 0.0 {
            return Err(VoxrunError::Config(format!(
                "runner.progress_step must be positive, got {}",
                step
            )));
        }

        info!(
            runtime = gateway.name(),
            staging = %config.staging.root.display(),
            "Job runner initialized"
        );

        let (state, _) = watch::channel(RunState::Idle);
        Ok(Self {
            gateway,
            layout: StagingLayout::new(config.staging.root.clone()),
            container: config.container.clone(),
            predictions: config.predictions.clone(),
            progress_step: step,
            state: Arc::new(state),
            active: Mutex::new(None),
        })
    }

    pub fn state(&self) -> RunState {
        *self.state.borrow()
    }

    /// Watch state transitions
    pub fn subscribe(&self) -> watch::Receiver<RunState> {
        self.state.subscribe()
    }

    pub fn layout(&self) -> &StagingLayout {
        &self.layout
    }

    /// Start a job in the background
    ///
    /// Fails without any state change when the job is invalid or another run
    /// is active.
    pub async fn start(
        &self,
        job: JobDescriptor,
        inputs: JobInputs,
        observer: Arc<dyn RunObserver>,
    ) -> VoxrunResult<RunHandle> {
        job.validate()?;
        inputs.check_against(&job)?;

        let run_id = Uuid::new_v4();
        let cancel = CancellationToken::new();
        {
            // `cancel` reads state and token under the same lock
            let mut active = self.active_token();
            let claimed = self.state.send_if_modified(|state| {
                if state.is_active() {
                    false
                } else {
                    *state = RunState::Staging;
                    true
                }
            });
            if !claimed {
                warn!(image = %job.image_reference, state = %self.state(), "Runner busy, job rejected");
                return Err(VoxrunError::RunnerBusy);
            }
            *active = Some(cancel.clone());
        }

        info!(
            run_id = %run_id,
            image = %job.image_reference,
            task = %job.task_kind,
            "Run accepted"
        );

        let worker = Worker {
            run_id,
            job,
            inputs,
            observer,
            gateway: Arc::clone(&self.gateway),
            layout: self.layout.clone(),
            container: self.container.clone(),
            predictions: self.predictions.clone(),
            progress: ProgressCounter::new(self.progress_step),
            state: ActiveRun::new(Arc::clone(&self.state)),
            cancel: cancel.clone(),
        };
        let task = tokio::spawn(worker.run());

        Ok(RunHandle {
            run_id,
            cancel,
            task,
        })
    }

    /// Start a job and wait for its report
    pub async fn run(
        &self,
        job: JobDescriptor,
        inputs: JobInputs,
        observer: Arc<dyn RunObserver>,
    ) -> VoxrunResult<RunReport> {
        self.start(job, inputs, observer).await?.wait().await
    }

    /// Cancel the active run, if any
    pub fn cancel(&self) {
        let active = self.active_token();
        if !self.state().is_active() {
            debug!("No active run to cancel");
            return;
        }
        if let Some(token) = active.as_ref() {
            info!("Cancelling active run");
            token.cancel();
        }
    }

    fn active_token(&self) -> MutexGuard<'_, Option<CancellationToken>> {
        match self.active.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// Owns the runner state for the lifetime of a run
///
/// A worker that unwinds or is dropped before finishing leaves the runner
/// in `Failed` instead of stuck in an active state.
struct ActiveRun {
    state: Arc<watch::Sender<RunState>>,
    finished: bool,
}

impl ActiveRun {
    fn new(state: Arc<watch::Sender<RunState>>) -> Self {
        Self {
            state,
            finished: false,
        }
    }

    fn enter(&self, next: RunState) {
        self.state.send_replace(next);
    }

    fn finish(&mut self, terminal: RunState) {
        self.finished = true;
        self.state.send_replace(terminal);
    }
}

impl Drop for ActiveRun {
    fn drop(&mut self) {
        if !self.finished {
            self.state.send_replace(RunState::Failed);
        }
    }
}

/// Background side of one run
struct Worker {
    run_id: Uuid,
    job: JobDescriptor,
    inputs: JobInputs,
    observer: Arc<dyn RunObserver>,
    gateway: Arc<dyn ContainerGateway>,
    layout: StagingLayout,
    container: ContainerConfig,
    predictions: PredictionsConfig,
    progress: ProgressCounter,
    state: ActiveRun,
    cancel: CancellationToken,
}

impl Worker {
    async fn run(mut self) -> RunReport {
        let started_at = Utc::now();

        let outcome = match self.execute().await {
            Ok(outputs) => RunOutcome::Completed(outputs),
            Err(VoxrunError::UserCancelled) => RunOutcome::Aborted,
            Err(e) => RunOutcome::Failed(e),
        };

        match &outcome {
            RunOutcome::Completed(outputs) => {
                info!(
                    run_id = %self.run_id,
                    outputs = outputs.len(),
                    failed = outputs.failures().count(),
                    "Run completed"
                );
                self.observer.on_log("Task completed.");
            }
            RunOutcome::Aborted => {
                info!(run_id = %self.run_id, "Run aborted");
                self.observer.on_log("Task cancelled.");
            }
            RunOutcome::Failed(e) => {
                error!(run_id = %self.run_id, error = %e, "Run failed");
                self.observer.on_log(&format!("Task failed: {}", e));
            }
        }

        let state = outcome.state();
        self.state.finish(state);

        RunReport {
            run_id: self.run_id,
            state,
            outcome,
            progress: self.progress.value(),
            lines: self.progress.lines(),
            started_at,
            finished_at: Utc::now(),
        }
    }

    async fn execute(&mut self) -> VoxrunResult<MaterializedOutputs> {
        self.observer.on_log("Starting the task.");

        if !self.gateway.is_daemon_available().await? {
            self.observer
                .on_log("The container daemon is not running. Start it and try again.");
            return Err(VoxrunError::RuntimeUnavailable(format!(
                "{} daemon is not running",
                self.gateway.name()
            )));
        }
        self.check_cancelled()?;

        if !self
            .gateway
            .ensure_image_present(&self.job.image_reference)
            .await?
        {
            self.observer.on_log(&format!(
                "The container image {} does not exist, or could not be downloaded locally. \
                 The selected model cannot be run.",
                self.job.image_reference
            ));
            return Err(VoxrunError::ImageUnavailable {
                image: self.job.image_reference.clone(),
            });
        }
        self.check_cancelled()?;

        self.stage().await?;
        self.check_cancelled()?;

        let argv = build_invocation(
            &self.job,
            self.gateway.executable(),
            self.layout.root(),
            &self.container,
        );
        self.observer
            .on_log(&format!("Container run command: {}", argv.join(" ")));

        self.state.enter(RunState::Running);
        let mut process = self.gateway.start_run(&argv).await?;
        info!(run_id = %self.run_id, "Container process started");

        loop {
            let next = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => None,
                line = process.read_line() => Some(line),
            };
            match next {
                None => return self.abort(process.as_mut()).await,
                Some(line) => match line? {
                    Some(line) => {
                        let value = self.progress.advance();
                        self.observer.on_log(&line);
                        self.observer.on_progress(value);
                    }
                    None => break,
                },
            }
        }

        self.state.enter(RunState::DrainingOutput);
        let exit = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            exit = process.wait() => Some(exit),
        };
        let exit = match exit {
            None => return self.abort(process.as_mut()).await,
            Some(exit) => exit?,
        };
        if self.cancel.is_cancelled() {
            return Err(VoxrunError::UserCancelled);
        }
        debug!(run_id = %self.run_id, code = ?exit.code, "Container process exited");

        if !exit.success() {
            return Err(VoxrunError::ProcessFailure { code: exit.code });
        }

        let materializer = Materializer::new(self.layout.output_dir());
        let job = self.job.clone();
        tokio::task::spawn_blocking(move || materializer.materialize(&job))
            .await
            .map_err(|e| VoxrunError::Internal(format!("materialization task failed: {}", e)))
    }

    fn check_cancelled(&self) -> VoxrunResult<()> {
        if self.cancel.is_cancelled() {
            return Err(VoxrunError::UserCancelled);
        }
        Ok(())
    }

    async fn abort(&self, process: &mut dyn ProcessHandle) -> VoxrunResult<MaterializedOutputs> {
        info!(run_id = %self.run_id, "Terminating container process");
        process.cancel().await?;
        if let Err(e) = process.wait().await {
            debug!(run_id = %self.run_id, error = %e, "Failed to reap container process");
        }
        Err(VoxrunError::UserCancelled)
    }

    /// Prepare the staging directory and copy inputs into it
    async fn stage(&self) -> VoxrunResult<()> {
        let layout = self.layout.clone();
        let volumes: Vec<(String, PathBuf)> = self
            .job
            .inputs()
            .filter(|b| b.kind == BindingKind::Volume)
            .filter_map(|b| {
                self.inputs
                    .volumes
                    .get(&b.name)
                    .map(|path| (b.name.clone(), path.clone()))
            })
            .collect();
        let configs = (self.job.has_configuration() || self.job.task_kind == TaskKind::Diagnosis)
            .then(|| {
                let organ = self.job.organ.unwrap_or(Organ::Brain);
                (self.predictions.clone(), organ.diagnosis_task())
            });

        for (name, value) in &self.inputs.parameters {
            debug!(run_id = %self.run_id, parameter = %name, value = %value, "Job parameter");
        }

        tokio::task::spawn_blocking(move || {
            layout.prepare()?;
            for (name, source) in &volumes {
                layout.stage_volume(name, source)?;
            }
            if let Some((predictions, task)) = &configs {
                layout.write_configs(predictions, task)?;
            }
            Ok::<(), VoxrunError>(())
        })
        .await
        .map_err(|e| VoxrunError::Internal(format!("staging task failed: {}", e)))?
    }
}
