use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::error::EngineError;
use crate::pipeline::{Attempt, AttemptEnd, JobMetrics, MetricsSnapshot, Pipeline, PipelineKind, Watermark};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryGuarantee {
    /// Any error fails the job.
    None,
    /// Transient store/journal errors restart the pipeline.
    #[default]
    AtLeastOnce,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    NotRunning,
    Running,
    /// Bulk source exhausted, partitions draining.
    Completing,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobStatus::NotRunning => "not_running",
            JobStatus::Running => "running",
            JobStatus::Completing => "completing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Successful end of a job. Cancellation is not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    Completed,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestartPolicy {
    /// Restarts allowed per job after transient failures.
    pub max_restarts: u32,
    /// Pause before each restart.
    pub backoff: Duration,
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self {
            max_restarts: 3,
            backoff: Duration::from_millis(200),
        }
    }
}

/// Published state of a job.
#[derive(Debug, Clone)]
pub struct JobState {
    pub status: JobStatus,
    /// Cause of `Failed`.
    pub error: Option<EngineError>,
}

// ═══════════════════════════════════════════════════════════════
//  JobHandle
// ═══════════════════════════════════════════════════════════════

/// Owner-side view of a submitted job. Cheap to clone.
#[derive(Clone)]
pub struct JobHandle {
    id: u64,
    name: Arc<str>,
    kind: PipelineKind,
    guarantee: DeliveryGuarantee,
    state: watch::Receiver<JobState>,
    token: CancellationToken,
    metrics: Arc<JobMetrics>,
}

impl fmt::Debug for JobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobHandle")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("status", &self.status())
            .finish()
    }
}

impl JobHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> PipelineKind {
        self.kind
    }

    pub fn guarantee(&self) -> DeliveryGuarantee {
        self.guarantee
    }

    pub fn status(&self) -> JobStatus {
        self.state.borrow().status
    }

    pub fn error(&self) -> Option<EngineError> {
        self.state.borrow().error.clone()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Request cancellation. Returns immediately; `join` observes the end.
    pub fn cancel(&self) {
        if !self.token.is_cancelled() {
            tracing::info!(job = %self.name, id = self.id, "cancel requested");
            self.token.cancel();
        }
    }

    /// Wait until the job reaches `status` or any terminal status.
    pub async fn wait_for(&self, status: JobStatus) -> JobStatus {
        let mut rx = self.state.clone();
        match rx.wait_for(|s| s.status == status || s.status.is_terminal()).await {
            Ok(state) => state.status,
            Err(_) => self.status(),
        }
    }

    /// Wait for the terminal status.
    pub async fn join(&self) -> Result<JobOutcome, EngineError> {
        let mut rx = self.state.clone();
        let state = match rx.wait_for(|s| s.status.is_terminal()).await {
            Ok(state) => state.clone(),
            Err(_) => {
                return Err(self.failed(EngineError::Internal(
                    "job supervisor ended without a terminal status".into(),
                )));
            }
        };

        match state.status {
            JobStatus::Completed => Ok(JobOutcome::Completed),
            JobStatus::Cancelled => Ok(JobOutcome::Cancelled),
            _ => Err(self.failed(
                state
                    .error
                    .unwrap_or_else(|| EngineError::Internal("failed without a recorded error".into())),
            )),
        }
    }

    fn failed(&self, cause: EngineError) -> EngineError {
        EngineError::JobExecution {
            job: self.name.to_string(),
            cause: Box::new(cause),
        }
    }
}

// ═══════════════════════════════════════════════════════════════
//  JobCoordinator
// ═══════════════════════════════════════════════════════════════

/// Submits pipelines as supervised jobs.
///
/// Holds no per-job state: everything about a job lives behind its handle.
#[derive(Debug)]
pub struct JobCoordinator {
    next_id: AtomicU64,
    policy: RestartPolicy,
}

impl Default for JobCoordinator {
    fn default() -> Self {
        Self::new(RestartPolicy::default())
    }
}

impl JobCoordinator {
    pub fn new(policy: RestartPolicy) -> Self {
        Self {
            next_id: AtomicU64::new(1),
            policy,
        }
    }

    pub fn policy(&self) -> &RestartPolicy {
        &self.policy
    }

    /// Start `pipeline` as a job. Must be called within a tokio runtime.
    pub fn submit(&self, pipeline: Pipeline, name: impl Into<String>, guarantee: DeliveryGuarantee) -> JobHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let name: Arc<str> = Arc::from(name.into());
        let (state_tx, state_rx) = watch::channel(JobState {
            status: JobStatus::NotRunning,
            error: None,
        });

        let handle = JobHandle {
            id,
            name: name.clone(),
            kind: pipeline.kind(),
            guarantee,
            state: state_rx,
            token: CancellationToken::new(),
            metrics: Arc::new(JobMetrics::default()),
        };

        let supervisor = Supervisor {
            name,
            id,
            guarantee,
            policy: self.policy,
            state: state_tx,
            token: handle.token.clone(),
            metrics: handle.metrics.clone(),
        };
        tokio::spawn(supervisor.run(pipeline));

        tracing::info!(
            job = %handle.name,
            id,
            kind = %handle.kind,
            guarantee = ?guarantee,
            "job submitted"
        );
        handle
    }

    pub fn status(&self, handle: &JobHandle) -> JobStatus {
        handle.status()
    }

    pub fn cancel(&self, handle: &JobHandle) {
        handle.cancel();
    }

    pub async fn join(&self, handle: &JobHandle) -> Result<JobOutcome, EngineError> {
        handle.join().await
    }
}

struct Supervisor {
    name: Arc<str>,
    id: u64,
    guarantee: DeliveryGuarantee,
    policy: RestartPolicy,
    state: watch::Sender<JobState>,
    token: CancellationToken,
    metrics: Arc<JobMetrics>,
}

impl Supervisor {
    fn publish(&self, status: JobStatus) {
        self.state.send_modify(|s| s.status = status);
    }

    async fn run(self, pipeline: Pipeline) {
        let watermark = Arc::new(Watermark::new());
        let on_drain = || self.publish(JobStatus::Completing);
        let mut restarts = 0u32;

        self.publish(JobStatus::Running);
        tracing::info!(job = %self.name, id = self.id, "job running");

        let result = loop {
            let attempt = Attempt {
                job: &self.name,
                token: &self.token,
                metrics: &self.metrics,
                watermark: &watermark,
                on_drain: &on_drain,
            };

            let err = match pipeline.run_attempt(&attempt).await {
                Ok(end) => break Ok(end),
                Err(err) => err,
            };

            let restartable = self.guarantee == DeliveryGuarantee::AtLeastOnce
                && err.is_transient()
                && restarts < self.policy.max_restarts
                && !self.token.is_cancelled();
            if !restartable {
                break Err(err);
            }

            restarts += 1;
            self.metrics.record_restart();
            watermark.rewind();
            tracing::warn!(
                job = %self.name,
                restart = restarts,
                max = self.policy.max_restarts,
                error = %err,
                "transient failure, restarting"
            );

            tokio::select! {
                _ = self.token.cancelled() => break Ok(AttemptEnd::Cancelled),
                _ = tokio::time::sleep(self.policy.backoff) => {}
            }
            self.publish(JobStatus::Running);
        };

        let metrics = self.metrics.snapshot();
        match result {
            Ok(AttemptEnd::Exhausted) => {
                tracing::info!(job = %self.name, ?metrics, "job completed");
                self.publish(JobStatus::Completed);
            }
            Ok(AttemptEnd::Cancelled) => {
                tracing::info!(job = %self.name, ?metrics, "job cancelled");
                self.publish(JobStatus::Cancelled);
            }
            Err(err) => {
                tracing::error!(job = %self.name, error = %err, ?metrics, "job failed");
                self.state.send_modify(|s| {
                    s.status = JobStatus::Failed;
                    s.error = Some(err);
                });
            }
        }
    }
}
