//! Contract shared by every long-running job kind.
//!
//! [`JobCore`] owns the pieces each job has in common: its id, its
//! exclusive directory tree and log, the status state machine with a
//! per-kind [`StatusDetail`] reason, and a one-slot input cell through
//! which operators answer requests such as "insert the floppy".

use std::fmt;
use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use asec_cloud::StorageError;
use asec_core::error::CoreError;
use asec_core::status::JobStatus;
use asec_core::types::{JobId, Timestamp};
use asec_eaas::EaasApiError;
use async_trait::async_trait;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::log::JobLog;
use crate::process::ProcessError;
use crate::queue::DropOldestQueue;

/// Machine-readable reason attached to a job status.
///
/// Each job kind has its own closed set of reasons; text only appears
/// at the boundary through `Display`.
pub trait StatusDetail: fmt::Display + fmt::Debug + Clone + Send + Sync + 'static {
    /// Reason recorded when the job was cancelled through the registry.
    fn cancelled() -> Self;

    /// Reason recorded when the job ended with an unhandled error.
    fn faulted() -> Self;
}

/// Errors ending a job's execution.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    /// A handled failure; the job already recorded `Failed` and a reason.
    #[error("Job failed: {detail}")]
    Failed { detail: String },

    #[error("Job was cancelled")]
    Cancelled,

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Process(#[from] ProcessError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Eaas(#[from] EaasApiError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Job task panicked: {0}")]
    Panicked(String),
}

impl JobError {
    /// Unhandled errors are faults; the registry re-raises them to
    /// whoever queries the job.
    pub fn is_fault(&self) -> bool {
        !matches!(self, JobError::Failed { .. }) && !self.is_cancellation()
    }

    /// Cancellation observed directly or while a tool was being awaited.
    pub fn is_cancellation(&self) -> bool {
        matches!(
            self,
            JobError::Cancelled | JobError::Process(ProcessError::Cancelled { .. })
        )
    }
}

/// Directory tree exclusive to one job.
///
/// ```text
/// <dirs_base>/<job id>/
///     fetch/     downloaded inputs
///     work/      tool scratch space and secondary logs
///     output/    produced files
///     log.txt
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobDirs {
    pub base: PathBuf,
    pub fetch: PathBuf,
    pub work: PathBuf,
    /// Files handed to the job by an operator.
    pub upload: PathBuf,
    pub output: PathBuf,
    pub log_path: PathBuf,
}

impl JobDirs {
    pub fn for_job(dirs_base: &Path, id: JobId) -> Self {
        let base = dirs_base.join(id.to_string());
        Self {
            fetch: base.join("fetch"),
            work: base.join("work"),
            upload: base.join("upload"),
            output: base.join("output"),
            log_path: base.join("log.txt"),
            base,
        }
    }

    pub fn create_all(&self) -> io::Result<()> {
        for dir in [&self.fetch, &self.work, &self.upload, &self.output] {
            std::fs::create_dir_all(dir)?;
        }
        Ok(())
    }

    /// Location of the upload `upload_id`. The id must be a plain file
    /// name so uploads stay inside the upload directory.
    pub fn upload_path(&self, upload_id: &str) -> Result<PathBuf, CoreError> {
        let plain = !upload_id.is_empty()
            && upload_id != "."
            && upload_id != ".."
            && !upload_id.contains(['/', '\\']);
        if !plain {
            return Err(CoreError::InvalidInput(format!(
                "Invalid upload id: {upload_id:?}"
            )));
        }
        Ok(self.upload.join(upload_id))
    }
}

/// Boundary view of a job.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobSnapshot {
    pub id: JobId,
    pub start_time: Option<Timestamp>,
    pub status: JobStatus,
    pub status_detail: Option<String>,
    pub log_path: PathBuf,
}

struct JobState<D> {
    status: JobStatus,
    detail: Option<D>,
    start_time: Option<Timestamp>,
}

/// State common to every job kind.
pub struct JobCore<D> {
    id: JobId,
    dirs: JobDirs,
    log: JobLog,
    state: Mutex<JobState<D>>,
    input: DropOldestQueue<String>,
}

impl<D: StatusDetail> JobCore<D> {
    /// Assign a fresh id and create the job's directory tree and log
    /// under `dirs_base`.
    pub fn create(dirs_base: &Path) -> io::Result<Self> {
        let id = JobId::new();
        let dirs = JobDirs::for_job(dirs_base, id);
        dirs.create_all()?;
        let log = JobLog::create(&dirs.log_path)?;

        Ok(Self {
            id,
            dirs,
            log,
            state: Mutex::new(JobState {
                status: JobStatus::Initialization,
                detail: None,
                start_time: None,
            }),
            input: DropOldestQueue::new(1),
        })
    }

    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn dirs(&self) -> &JobDirs {
        &self.dirs
    }

    pub fn log(&self) -> &JobLog {
        &self.log
    }

    pub fn status(&self) -> JobStatus {
        self.lock().status
    }

    pub fn status_detail(&self) -> Option<D> {
        self.lock().detail.clone()
    }

    pub fn start_time(&self) -> Option<Timestamp> {
        self.lock().start_time
    }

    pub fn snapshot(&self) -> JobSnapshot {
        let state = self.lock();
        JobSnapshot {
            id: self.id,
            start_time: state.start_time,
            status: state.status,
            status_detail: state.detail.as_ref().map(ToString::to_string),
            log_path: self.dirs.log_path.clone(),
        }
    }

    /// Suspend until an operator provides input.
    ///
    /// Only legal while `Running`. Sets `WaitingForInput` with `reason`
    /// and resumes `Running` with the reason cleared once a value
    /// arrives. If `cancel` fires first the job stays `WaitingForInput`
    /// and [`JobError::Cancelled`] is returned.
    pub async fn wait_for_input(
        &self,
        reason: D,
        cancel: &CancellationToken,
    ) -> Result<String, JobError> {
        {
            let mut state = self.lock();
            if state.status != JobStatus::Running {
                return Err(CoreError::InvalidOperation(format!(
                    "Cannot wait for input while {}",
                    state.status
                ))
                .into());
            }
            state.status = JobStatus::WaitingForInput;
            state.detail = Some(reason.clone());
        }

        tracing::debug!(job_id = %self.id, reason = %reason, "Waiting for input");

        let value = tokio::select! {
            value = self.input.pop() => value,
            _ = cancel.cancelled() => return Err(JobError::Cancelled),
        };

        let mut state = self.lock();
        if state.status == JobStatus::WaitingForInput {
            state.status = JobStatus::Running;
            state.detail = None;
        }
        Ok(value)
    }

    /// Deliver input to the job. Overwrites any value not yet consumed.
    pub fn provide_input(&self, value: impl Into<String>) {
        if self.input.push(value.into()).is_some() {
            tracing::debug!(job_id = %self.id, "Unconsumed job input overwritten");
        }
    }

    /// Await an external tool invocation while reporting
    /// `WaitingForProcess`; the job is back to `Running` afterwards.
    pub async fn wait_for_process<F: Future>(&self, invocation: F) -> Result<F::Output, CoreError> {
        self.transition(JobStatus::WaitingForProcess)?;
        let output = invocation.await;

        let mut state = self.lock();
        if state.status == JobStatus::WaitingForProcess {
            state.status = JobStatus::Running;
        }
        Ok(output)
    }

    pub(crate) fn mark_started(&self) {
        let mut state = self.lock();
        if state.start_time.is_none() {
            state.start_time = Some(chrono::Utc::now());
        }
    }

    /// Move to `next`, clearing the reason.
    pub(crate) fn transition(&self, next: JobStatus) -> Result<(), CoreError> {
        let mut state = self.lock();
        if !state.status.can_transition_to(next) {
            return Err(CoreError::InvalidTransition {
                from: state.status,
                to: next,
            });
        }
        state.status = next;
        state.detail = None;
        Ok(())
    }

    /// Record a handled failure and return the matching error.
    ///
    /// A job that already reached a terminal status keeps it.
    pub(crate) fn fail(&self, detail: D) -> JobError {
        let message = detail.to_string();
        self.settle_failed(detail);
        JobError::Failed { detail: message }
    }

    /// Move to `Failed` with `detail` unless already terminal. Returns
    /// whether the status changed.
    pub(crate) fn settle_failed(&self, detail: D) -> bool {
        let mut state = self.lock();
        if state.status.is_terminal() {
            return false;
        }
        tracing::info!(job_id = %self.id, from = %state.status, reason = %detail, "Job failed");
        state.status = JobStatus::Failed;
        state.detail = Some(detail);
        true
    }

    fn lock(&self) -> MutexGuard<'_, JobState<D>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[cfg(test)]
    pub(crate) fn force_status(&self, status: JobStatus) {
        self.lock().status = status;
    }
}

/// A long-running job runnable by a [`ProcessRegistry`](crate::ProcessRegistry).
#[async_trait]
pub trait Job: Send + Sync + 'static {
    type Output: Clone + Send + Sync + 'static;
    type Detail: StatusDetail;

    fn core(&self) -> &JobCore<Self::Detail>;

    /// Execute the job to completion.
    ///
    /// Handled failures record `Failed` with a reason and return
    /// [`JobError::Failed`]. Any other error is a fault and the registry
    /// marks the job failed on the job's behalf.
    async fn start(&self, cancel: CancellationToken) -> Result<Self::Output, JobError>;
}

/// Jobs that can be rebuilt with identical parameters for a
/// caller-initiated restart.
pub trait Respawn: Job + Sized {
    fn respawn(&self) -> Result<Self, JobError>;
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use assert_matches::assert_matches;

    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    pub(crate) enum TestDetail {
        AwaitingOperator,
        Rejected,
        Cancelled,
        Faulted,
    }

    impl fmt::Display for TestDetail {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            fmt::Debug::fmt(self, f)
        }
    }

    impl StatusDetail for TestDetail {
        fn cancelled() -> Self {
            TestDetail::Cancelled
        }

        fn faulted() -> Self {
            TestDetail::Faulted
        }
    }

    fn running_core(dir: &Path) -> JobCore<TestDetail> {
        let core = JobCore::create(dir).unwrap();
        core.transition(JobStatus::Running).unwrap();
        core
    }

    #[test]
    fn construction_creates_directory_tree() {
        let dir = tempfile::tempdir().unwrap();
        let core = JobCore::<TestDetail>::create(dir.path()).unwrap();

        let dirs = core.dirs();
        assert_eq!(dirs.base, dir.path().join(core.id().to_string()));
        assert!(dirs.fetch.is_dir());
        assert!(dirs.work.is_dir());
        assert!(dirs.upload.is_dir());
        assert!(dirs.output.is_dir());
        assert!(dirs.log_path.is_file());
        assert_eq!(core.status(), JobStatus::Initialization);
        assert_eq!(core.start_time(), None);
    }

    #[test]
    fn upload_ids_stay_inside_upload_dir() {
        let dirs = JobDirs::for_job(Path::new("/jobs"), JobId::new());
        assert_eq!(dirs.upload_path("label.jpg").unwrap(), dirs.upload.join("label.jpg"));

        for bad in ["", ".", "..", "../log.txt", "a/b", "a\\b"] {
            assert_matches!(dirs.upload_path(bad), Err(CoreError::InvalidInput(_)), "{bad:?}");
        }
    }

    #[tokio::test]
    async fn wait_for_input_rejected_unless_running() {
        let dir = tempfile::tempdir().unwrap();
        let core = JobCore::<TestDetail>::create(dir.path()).unwrap();
        let cancel = CancellationToken::new();

        for status in JobStatus::ALL {
            if status == JobStatus::Running {
                continue;
            }
            core.force_status(status);
            let result = core
                .wait_for_input(TestDetail::AwaitingOperator, &cancel)
                .await;
            assert_matches!(
                result,
                Err(JobError::Core(CoreError::InvalidOperation(_))),
                "status {status}"
            );
            assert_eq!(core.status(), status);
        }
    }

    #[tokio::test]
    async fn input_resumes_running_and_clears_reason() {
        let dir = tempfile::tempdir().unwrap();
        let core = Arc::new(running_core(dir.path()));
        let cancel = CancellationToken::new();

        let waiter = {
            let core = Arc::clone(&core);
            let cancel = cancel.clone();
            tokio::spawn(async move {
                core.wait_for_input(TestDetail::AwaitingOperator, &cancel)
                    .await
            })
        };

        while core.status() != JobStatus::WaitingForInput {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(core.status_detail(), Some(TestDetail::AwaitingOperator));
        assert_eq!(
            core.snapshot().status_detail.as_deref(),
            Some("AwaitingOperator")
        );

        core.provide_input("inserted");
        let value = waiter.await.unwrap().unwrap();

        assert_eq!(value, "inserted");
        assert_eq!(core.status(), JobStatus::Running);
        assert_eq!(core.status_detail(), None);
    }

    #[tokio::test]
    async fn only_latest_pending_input_is_delivered() {
        let dir = tempfile::tempdir().unwrap();
        let core = running_core(dir.path());
        core.provide_input("stale");
        core.provide_input("fresh");

        let value = core
            .wait_for_input(TestDetail::AwaitingOperator, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(value, "fresh");
    }

    #[tokio::test]
    async fn cancelled_wait_leaves_job_waiting() {
        let dir = tempfile::tempdir().unwrap();
        let core = running_core(dir.path());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = core
            .wait_for_input(TestDetail::AwaitingOperator, &cancel)
            .await;
        assert_matches!(result, Err(JobError::Cancelled));
        assert_eq!(core.status(), JobStatus::WaitingForInput);

        assert!(core.settle_failed(TestDetail::cancelled()));
        assert_eq!(core.status(), JobStatus::Failed);
        assert_eq!(core.status_detail(), Some(TestDetail::Cancelled));
    }

    #[tokio::test]
    async fn wait_for_process_reports_and_restores_status() {
        let dir = tempfile::tempdir().unwrap();
        let core = running_core(dir.path());

        let observed = core
            .wait_for_process(async { core.status() })
            .await
            .unwrap();

        assert_eq!(observed, JobStatus::WaitingForProcess);
        assert_eq!(core.status(), JobStatus::Running);
    }

    #[tokio::test]
    async fn wait_for_process_requires_running() {
        let dir = tempfile::tempdir().unwrap();
        let core = JobCore::<TestDetail>::create(dir.path()).unwrap();
        let result = core.wait_for_process(async {}).await;
        assert_matches!(result, Err(CoreError::InvalidTransition { .. }));
    }

    #[test]
    fn illegal_transition_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let core = JobCore::<TestDetail>::create(dir.path()).unwrap();
        assert_matches!(
            core.transition(JobStatus::Success),
            Err(CoreError::InvalidTransition {
                from: JobStatus::Initialization,
                to: JobStatus::Success,
            })
        );
    }

    #[test]
    fn terminal_status_is_kept_on_later_failure() {
        let dir = tempfile::tempdir().unwrap();
        let core = running_core(dir.path());
        core.transition(JobStatus::Success).unwrap();

        let error = core.fail(TestDetail::Faulted);
        assert_matches!(error, JobError::Failed { .. });
        assert_eq!(core.status(), JobStatus::Success);
        assert_eq!(core.status_detail(), None);
    }

    #[test]
    fn handled_failures_are_not_faults() {
        assert!(!JobError::Cancelled.is_fault());
        assert!(!JobError::Failed { detail: "x".into() }.is_fault());
        assert!(!JobError::Process(ProcessError::Cancelled {
            program: "gw".into()
        })
        .is_fault());
        assert!(JobError::Panicked("boom".into()).is_fault());
        assert!(JobError::Core(CoreError::Internal("x".into())).is_fault());
    }
}
