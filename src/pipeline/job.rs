//! The single job slot.
//!
//! At most one run is active. Starting another cancels the active run and
//! waits for it to wind down (scratch directory included) before the new one
//! is spawned, so two runs never overlap. Waiting on a run only observes it;
//! the run stays in the slot until replaced.

use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::progress::{ProgressReporter, RunStage};
use super::{PipelineOutcome, RunReport};
use crate::error::{PipelineError, ServiceErrorKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobPhase {
    Idle,
    Running,
    Completed,
    Cancelled,
    Failed,
}

impl JobPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobPhase::Idle => "idle",
            JobPhase::Running => "running",
            JobPhase::Completed => "completed",
            JobPhase::Cancelled => "cancelled",
            JobPhase::Failed => "failed",
        }
    }
}

/// Presentation-ready result of the last finished run.
#[derive(Debug, Clone, Serialize)]
pub struct JobResult {
    pub outcome: &'static str,
    pub summary_text: Option<String>,
    pub prompt_text: Option<String>,
    pub report: RunReport,
}

impl From<PipelineOutcome> for JobResult {
    fn from(outcome: PipelineOutcome) -> Self {
        let kind = outcome.kind();
        match outcome {
            PipelineOutcome::WindowEmpty { report } => Self {
                outcome: kind,
                summary_text: None,
                prompt_text: None,
                report,
            },
            PipelineOutcome::Prepared { request, report } => Self {
                outcome: kind,
                summary_text: None,
                prompt_text: Some(request.prompt_text),
                report,
            },
            PipelineOutcome::Summarized { summary, report } => Self {
                outcome: kind,
                summary_text: Some(summary.summary_text),
                prompt_text: None,
                report,
            },
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct JobStatus {
    pub phase: JobPhase,
    pub job_id: Option<String>,
    pub stage: Option<RunStage>,
    pub last_error: Option<String>,
    /// Service error classification when the last run failed in the call
    pub error_kind: Option<ServiceErrorKind>,
    pub last_result: Option<JobResult>,
}

impl Default for JobStatus {
    fn default() -> Self {
        Self {
            phase: JobPhase::Idle,
            job_id: None,
            stage: None,
            last_error: None,
            error_kind: None,
            last_result: None,
        }
    }
}

#[derive(Default)]
struct SlotState {
    status: JobStatus,
    progress: Option<ProgressReporter>,
}

#[derive(Clone, Default)]
pub struct JobStatusHandle {
    inner: Arc<Mutex<SlotState>>,
}

impl JobStatusHandle {
    pub async fn get(&self) -> JobStatus {
        let state = self.inner.lock().await;
        let mut status = state.status.clone();
        if status.phase == JobPhase::Running {
            status.stage = state.progress.as_ref().map(|p| p.current());
        }
        status
    }

    async fn begin(&self, job_id: &str, progress: ProgressReporter) {
        let mut state = self.inner.lock().await;
        state.status.phase = JobPhase::Running;
        state.status.job_id = Some(job_id.to_string());
        state.status.stage = Some(RunStage::Queued);
        state.status.last_error = None;
        state.status.error_kind = None;
        state.status.last_result = None;
        state.progress = Some(progress);
    }

    async fn finish(
        &self,
        job_id: &str,
        result: Result<PipelineOutcome, PipelineError>,
    ) -> JobStatus {
        let mut state = self.inner.lock().await;
        state.progress = None;
        state.status.stage = None;
        state.status.job_id = Some(job_id.to_string());

        match result {
            Ok(outcome) => {
                state.status.phase = JobPhase::Completed;
                state.status.last_result = Some(JobResult::from(outcome));
            }
            Err(PipelineError::Cancelled) => {
                state.status.phase = JobPhase::Cancelled;
            }
            Err(err) => {
                state.status.phase = JobPhase::Failed;
                state.status.error_kind = match &err {
                    PipelineError::Service(service) => Some(service.kind),
                    _ => None,
                };
                state.status.last_error = Some(err.to_string());
            }
        }
        state.status.clone()
    }
}

struct ActiveJob {
    id: String,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
    /// Final status of this job, published once it finishes
    done: watch::Receiver<Option<JobStatus>>,
}

#[derive(Default)]
pub struct JobRunner {
    status: JobStatusHandle,
    active: Mutex<Option<ActiveJob>>,
}

impl JobRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(&self) -> JobStatusHandle {
        self.status.clone()
    }

    /// Start a run, first cancelling and awaiting any active one. Returns
    /// the new job id.
    pub async fn start<F, Fut>(&self, job: F) -> String
    where
        F: FnOnce(CancellationToken, ProgressReporter) -> Fut,
        Fut: Future<Output = Result<PipelineOutcome, PipelineError>> + Send + 'static,
    {
        let mut active = self.active.lock().await;

        if let Some(previous) = active.take() {
            if !previous.handle.is_finished() {
                info!("Cancelling job {} to start a new one", previous.id);
                previous.cancel.cancel();
            }
            if let Err(err) = previous.handle.await {
                warn!("Previous job {} ended abnormally: {}", previous.id, err);
            }
        }

        let id = Uuid::new_v4().to_string();
        let cancel = CancellationToken::new();
        let progress = ProgressReporter::new();
        self.status.begin(&id, progress.clone()).await;

        let future = job(cancel.clone(), progress);
        let status = self.status.clone();
        let job_id = id.clone();
        let (done_tx, done) = watch::channel(None);
        let handle = tokio::spawn(async move {
            let result = future.await;
            match &result {
                Ok(outcome) => info!("Job {} finished: {}", job_id, outcome.kind()),
                Err(PipelineError::Cancelled) => info!("Job {} cancelled", job_id),
                Err(err) => error!("Job {} failed: {}", job_id, err),
            }
            let last = status.finish(&job_id, result).await;
            done_tx.send_replace(Some(last));
        });

        info!("Started job {}", id);
        *active = Some(ActiveJob {
            id: id.clone(),
            cancel,
            handle,
            done,
        });
        id
    }

    /// Request cancellation of the active run. Returns false when idle.
    pub async fn cancel(&self) -> bool {
        let active = self.active.lock().await;
        match active.as_ref() {
            Some(job) if !job.handle.is_finished() => {
                info!("Cancellation requested for job {}", job.id);
                job.cancel.cancel();
                true
            }
            _ => false,
        }
    }

    /// Wait for the run that is current at call time to finish and return
    /// its final status. The job stays in the slot, so `cancel` and `start`
    /// keep working while a caller waits.
    pub async fn wait(&self) -> JobStatus {
        let observed = self
            .active
            .lock()
            .await
            .as_ref()
            .map(|job| (job.id.clone(), job.done.clone()));

        if let Some((id, mut done)) = observed {
            let last = match done.wait_for(Option::is_some).await {
                Ok(last) => (*last).clone(),
                Err(_) => {
                    warn!("Job {} ended without reporting a status", id);
                    None
                }
            };
            if let Some(status) = last {
                return status;
            }
        }
        self.status.get().await
    }
}
