//! Batch evaluation across a fixed set of worker slots.
//!
//! Workers are tokio tasks pulling jobs from a shared queue. For each task a
//! worker loads the trajectory, borrows a credential, runs every requested
//! mode before the task's deadline, returns the credential and reports the
//! records. Per-task failures become records; only a credential pool
//! protocol violation stops the run.

use std::collections::VecDeque;
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::credentials::CredentialPool;
use super::result::{RecordContext, ResultRecord, ResultSink, RunSummary, TaskOutcome};
use crate::error::{ConfigError, EvalError, PoolError, RunError, TrajectoryError};
use crate::eval::{EvalConfig, EvalMode, Evaluator, KeyPointCache};
use crate::judge::Confidence;
use crate::llm::ProviderFactory;
use crate::trajectory::{self, RawRecording, Task, Trajectory};

/// Default per-task timeout in seconds.
pub const DEFAULT_TASK_TIMEOUT_SECS: u64 = 600;

/// Default pass threshold on the 1-5 confidence scale.
pub const DEFAULT_SCORE_THRESHOLD: u8 = 3;

/// One unit of work.
#[derive(Debug, Clone)]
pub enum EvalJob {
    /// A task directory on disk.
    Directory(PathBuf),
    /// A recording already read from disk.
    Recording(RawRecording),
    /// A validated trajectory.
    Loaded { task: Task, trajectory: Trajectory },
}

impl EvalJob {
    fn label(&self) -> String {
        match self {
            EvalJob::Directory(dir) => dir.display().to_string(),
            EvalJob::Recording(raw) => raw.dir.display().to_string(),
            EvalJob::Loaded { task, .. } => task.task_id.clone(),
        }
    }

    fn resolve(self) -> Result<(Task, Trajectory), TrajectoryError> {
        let raw = match self {
            EvalJob::Loaded { task, trajectory } => return Ok((task, trajectory)),
            EvalJob::Recording(raw) => raw,
            EvalJob::Directory(dir) => RawRecording::from_dir(dir)?,
        };
        let task = raw.task()?;
        let trajectory = trajectory::load(&task, &raw)?;
        Ok((task, trajectory))
    }
}

impl From<PathBuf> for EvalJob {
    fn from(dir: PathBuf) -> Self {
        EvalJob::Directory(dir)
    }
}

impl From<RawRecording> for EvalJob {
    fn from(raw: RawRecording) -> Self {
        EvalJob::Recording(raw)
    }
}

/// Lifecycle of one task inside a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Pending,
    CredentialAcquired,
    Evaluating,
    Succeeded,
    Failed,
    TimedOut,
    CredentialReleased,
    Reported,
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TaskState::Pending => "pending",
            TaskState::CredentialAcquired => "credential_acquired",
            TaskState::Evaluating => "evaluating",
            TaskState::Succeeded => "succeeded",
            TaskState::Failed => "failed",
            TaskState::TimedOut => "timed_out",
            TaskState::CredentialReleased => "credential_released",
            TaskState::Reported => "reported",
        };
        f.write_str(name)
    }
}

/// Configuration for a batch run.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Number of worker slots. Default: 1.
    pub num_workers: usize,
    /// Bound on one task across all its modes. Modes still pending at the
    /// deadline are recorded as timed out. Default: 600s.
    pub task_timeout: Duration,
    /// Modes run for every task, in order.
    pub modes: Vec<EvalMode>,
    /// `predicted_label` is 1 when confidence reaches this. Default: 3.
    pub score_threshold: Confidence,
    pub eval: EvalConfig,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            num_workers: 1,
            task_timeout: Duration::from_secs(DEFAULT_TASK_TIMEOUT_SECS),
            modes: vec![EvalMode::default()],
            score_threshold: Confidence::new(DEFAULT_SCORE_THRESHOLD).unwrap_or(Confidence::MIN),
            eval: EvalConfig::default(),
        }
    }
}

impl OrchestratorConfig {
    pub fn with_num_workers(mut self, num_workers: usize) -> Self {
        self.num_workers = num_workers;
        self
    }

    pub fn with_task_timeout(mut self, timeout: Duration) -> Self {
        self.task_timeout = timeout;
        self
    }

    pub fn with_modes(mut self, modes: Vec<EvalMode>) -> Self {
        self.modes = modes;
        self
    }

    pub fn with_score_threshold(mut self, threshold: Confidence) -> Self {
        self.score_threshold = threshold;
        self
    }

    pub fn with_eval(mut self, eval: EvalConfig) -> Self {
        self.eval = eval;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.num_workers == 0 {
            return Err(ConfigError::InvalidValue {
                key: "num_worker".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if self.task_timeout.is_zero() {
            return Err(ConfigError::InvalidValue {
                key: "task_timeout_secs".to_string(),
                message: "must be positive".to_string(),
            });
        }
        if self.modes.is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "mode".to_string(),
                message: "at least one mode is required".to_string(),
            });
        }
        self.eval.validate()
    }
}

/// State shared by the workers of one run.
struct WorkerContext {
    config: OrchestratorConfig,
    pool: CredentialPool,
    factory: Arc<dyn ProviderFactory>,
    queue: Mutex<VecDeque<EvalJob>>,
    abort: AtomicBool,
    skipped: AtomicUsize,
}

impl WorkerContext {
    fn next_job(&self) -> Option<EvalJob> {
        if self.abort.load(Ordering::SeqCst) {
            return None;
        }
        self.queue
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .pop_front()
    }

    fn model_name(&self) -> String {
        let configured = &self.config.eval.judge.model;
        if configured.is_empty() {
            self.factory.model().to_string()
        } else {
            configured.clone()
        }
    }
}

/// Runs evaluation jobs over a credential pool.
pub struct Orchestrator {
    config: OrchestratorConfig,
    pool: CredentialPool,
    factory: Arc<dyn ProviderFactory>,
}

impl Orchestrator {
    pub fn new(
        config: OrchestratorConfig,
        pool: CredentialPool,
        factory: Arc<dyn ProviderFactory>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        if config.num_workers > pool.size() {
            info!(
                num_workers = config.num_workers,
                credentials = pool.size(),
                "More workers than credentials; extra workers will wait for a free credential"
            );
        }
        Ok(Self {
            config,
            pool,
            factory,
        })
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn pool(&self) -> &CredentialPool {
        &self.pool
    }

    /// Evaluates every job and streams one record per (task, mode) to `sink`.
    ///
    /// Malformed trajectories are skipped with a warning and produce no
    /// record. Returns the run summary, or the first condition that aborted
    /// the run.
    pub async fn run<S: ResultSink>(
        &self,
        jobs: Vec<EvalJob>,
        sink: &mut S,
    ) -> Result<RunSummary, RunError> {
        let run_id = Uuid::new_v4();
        let started = Instant::now();
        let tasks_total = jobs.len();
        let num_workers = self.config.num_workers.min(tasks_total).max(1);

        info!(
            run_id = %run_id,
            tasks = tasks_total,
            num_workers,
            credentials = self.pool.size(),
            modes = ?self.config.modes.iter().map(EvalMode::name).collect::<Vec<_>>(),
            "Starting evaluation run"
        );

        let ctx = Arc::new(WorkerContext {
            config: self.config.clone(),
            pool: self.pool.clone(),
            factory: Arc::clone(&self.factory),
            queue: Mutex::new(jobs.into()),
            abort: AtomicBool::new(false),
            skipped: AtomicUsize::new(0),
        });

        let (results_tx, mut results_rx) = mpsc::unbounded_channel();
        let mut handles = Vec::with_capacity(num_workers);
        for i in 0..num_workers {
            let worker = Worker::new(format!("worker-{}", i), Arc::clone(&ctx), results_tx.clone());
            handles.push((worker.id.clone(), tokio::spawn(worker.run())));
        }
        drop(results_tx);

        let mut summary = RunSummary::new(run_id);
        let mut output_error = None;
        while let Some(record) = results_rx.recv().await {
            summary.record(&record);
            if output_error.is_some() {
                continue;
            }
            if let Err(e) = sink.write(&record) {
                error!(error = %e, "Failed to write result record, stopping run");
                ctx.abort.store(true, Ordering::SeqCst);
                output_error = Some(e);
            }
        }

        let (worker_ids, joins): (Vec<_>, Vec<_>) = handles.into_iter().unzip();
        let joined = futures::future::join_all(joins).await;
        let mut fatal: Option<RunError> = None;
        for (worker_id, result) in worker_ids.into_iter().zip(joined) {
            let failure = match result {
                Ok(Ok(())) => None,
                Ok(Err(e)) => Some(RunError::Pool(e)),
                Err(e) => Some(RunError::Worker {
                    worker_id,
                    message: e.to_string(),
                }),
            };
            if fatal.is_none() {
                fatal = failure;
            }
        }

        sink.flush()?;

        summary.tasks_total = tasks_total;
        summary.tasks_skipped = ctx.skipped.load(Ordering::SeqCst);
        summary.peak_credentials_in_use = self.pool.peak_in_use();
        summary.duration_ms = started.elapsed().as_millis() as u64;

        info!(
            run_id = %run_id,
            tasks = summary.tasks_total,
            skipped = summary.tasks_skipped,
            succeeded = summary.succeeded,
            failed = summary.failed,
            timed_out = summary.timed_out,
            passed = summary.passed,
            pass_rate = %format!("{:.1}%", summary.pass_rate()),
            peak_credentials = summary.peak_credentials_in_use,
            duration_ms = summary.duration_ms,
            "Evaluation run finished"
        );

        if let Some(e) = output_error {
            return Err(RunError::Output(e));
        }
        if let Some(e) = fatal {
            return Err(e);
        }
        Ok(summary)
    }
}

/// One worker slot.
struct Worker {
    id: String,
    ctx: Arc<WorkerContext>,
    results: mpsc::UnboundedSender<ResultRecord>,
}

impl Worker {
    fn new(id: String, ctx: Arc<WorkerContext>, results: mpsc::UnboundedSender<ResultRecord>) -> Self {
        Self { id, ctx, results }
    }

    async fn run(self) -> Result<(), PoolError> {
        debug!(worker_id = %self.id, "Worker started");

        while let Some(job) = self.ctx.next_job() {
            if let Err(e) = self.process(job).await {
                self.ctx.abort.store(true, Ordering::SeqCst);
                error!(worker_id = %self.id, error = %e, "Credential pool violated its protocol, aborting run");
                return Err(e);
            }
        }

        debug!(worker_id = %self.id, "Worker stopped");
        Ok(())
    }

    fn enter(&self, task_id: &str, state: TaskState) {
        debug!(worker_id = %self.id, task_id, state = %state, "Task state changed");
    }

    async fn process(&self, job: EvalJob) -> Result<(), PoolError> {
        let label = job.label();
        let (task, trajectory) = match job.resolve() {
            Ok(loaded) => loaded,
            Err(e) => {
                warn!(
                    worker_id = %self.id,
                    job = %label,
                    error = %e,
                    "Skipping malformed trajectory"
                );
                self.ctx.skipped.fetch_add(1, Ordering::SeqCst);
                return Ok(());
            }
        };
        self.enter(&task.task_id, TaskState::Pending);

        let lease = self.ctx.pool.acquire().await?;
        self.enter(&task.task_id, TaskState::CredentialAcquired);

        let records = self.evaluate_modes(&task, &trajectory, lease.token()).await;

        self.ctx.pool.release(lease)?;
        self.enter(&task.task_id, TaskState::CredentialReleased);

        for record in records {
            if self.results.send(record).is_err() {
                debug!(worker_id = %self.id, "Result receiver closed");
            }
        }
        self.enter(&task.task_id, TaskState::Reported);
        Ok(())
    }

    async fn evaluate_modes(&self, task: &Task, trajectory: &Trajectory, api_key: &str) -> Vec<ResultRecord> {
        let config = &self.ctx.config;
        let model = self.ctx.model_name();
        let context = |mode: EvalMode, duration: Duration| RecordContext {
            task_id: task.task_id.clone(),
            task: task.intent.clone(),
            mode,
            model: model.clone(),
            worker_id: self.id.clone(),
            duration,
        };

        let provider = match self.ctx.factory.for_credential(api_key) {
            Ok(provider) => provider,
            Err(e) => {
                let reason = EvalError::from(e).to_string();
                error!(worker_id = %self.id, task_id = %task.task_id, error = %reason, "Could not build judge client");
                self.enter(&task.task_id, TaskState::Failed);
                return config
                    .modes
                    .iter()
                    .map(|&mode| ResultRecord::failure(context(mode, Duration::ZERO), TaskOutcome::Failed, reason.clone()))
                    .collect();
            }
        };

        let evaluator = Evaluator::new(provider, &config.eval);
        let mut cache = KeyPointCache::new();
        let mut records = Vec::with_capacity(config.modes.len());
        let deadline = tokio::time::Instant::now() + config.task_timeout;

        for &mode in &config.modes {
            self.enter(&task.task_id, TaskState::Evaluating);
            let started = Instant::now();
            let outcome = if tokio::time::Instant::now() >= deadline {
                None
            } else {
                tokio::time::timeout_at(
                    deadline,
                    evaluator.evaluate(mode, task, trajectory, &mut cache),
                )
                .await
                .ok()
            };
            let ctx = context(mode, started.elapsed());

            let record = match outcome {
                Some(Ok(verdict)) => {
                    self.enter(&task.task_id, TaskState::Succeeded);
                    info!(
                        worker_id = %self.id,
                        task_id = %task.task_id,
                        mode = %mode,
                        status = %verdict.status(),
                        confidence = verdict.confidence().get(),
                        duration_ms = ctx.duration.as_millis() as u64,
                        "Task evaluated"
                    );
                    ResultRecord::from_verdict(ctx, &verdict, config.score_threshold)
                }
                Some(Err(e)) => {
                    self.enter(&task.task_id, TaskState::Failed);
                    let reason = EvalError::from(e).to_string();
                    warn!(
                        worker_id = %self.id,
                        task_id = %task.task_id,
                        mode = %mode,
                        error = %reason,
                        "Task evaluation failed"
                    );
                    ResultRecord::failure(ctx, TaskOutcome::Failed, reason)
                }
                None => {
                    self.enter(&task.task_id, TaskState::TimedOut);
                    let reason = EvalError::TimeoutExceeded(config.task_timeout).to_string();
                    warn!(
                        worker_id = %self.id,
                        task_id = %task.task_id,
                        mode = %mode,
                        timeout_secs = config.task_timeout.as_secs_f64(),
                        "Task evaluation timed out"
                    );
                    ResultRecord::failure(ctx, TaskOutcome::TimedOut, reason)
                }
            };
            records.push(record);
        }
        records
    }
}
