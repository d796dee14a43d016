//! In-memory registry of running jobs.
//!
//! Each entry pairs a job with its cancellation token and a completion
//! channel. Jobs run on their own tokio task; a job that errors or
//! panics never takes the registry down. Its fault is stored on the
//! entry and re-raised to whoever queries or awaits the job.

use std::collections::HashMap;
use std::sync::Arc;

use asec_core::status::JobStatus;
use asec_core::types::JobId;
use tokio::sync::{watch, RwLock};
use tokio_util::sync::CancellationToken;

use crate::job::{Job, JobError, JobSnapshot, Respawn, StatusDetail};

/// Errors from registry operations.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Job not found: {0}")]
    NotFound(JobId),

    #[error("Job already registered: {0}")]
    AlreadyRegistered(JobId),

    #[error("Invalid operation on job {id}: {message}")]
    InvalidOperation { id: JobId, message: String },

    /// The job's execution ended with an unhandled error.
    #[error("Job {id} faulted: {source}")]
    Faulted {
        id: JobId,
        #[source]
        source: Arc<JobError>,
    },

    #[error(transparent)]
    Job(#[from] JobError),
}

type Completion<T> = Option<Result<T, Arc<JobError>>>;

struct Entry<J: Job> {
    job: Arc<J>,
    cancel: CancellationToken,
    completion: watch::Receiver<Completion<J::Output>>,
}

/// Registry of jobs of one kind.
pub struct ProcessRegistry<J: Job> {
    entries: RwLock<HashMap<JobId, Entry<J>>>,
}

impl<J: Job> Default for ProcessRegistry<J> {
    fn default() -> Self {
        Self::new()
    }
}

impl<J: Job> ProcessRegistry<J> {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Register `job` and start it in the background. Returns as soon as
    /// the job is scheduled.
    pub async fn start(&self, job: Arc<J>) -> Result<(), RegistryError> {
        let id = job.core().id();
        let mut entries = self.entries.write().await;
        if entries.contains_key(&id) {
            return Err(RegistryError::AlreadyRegistered(id));
        }

        let cancel = CancellationToken::new();
        let (tx, rx) = watch::channel(None);

        job.core().mark_started();
        let runner = {
            let job = Arc::clone(&job);
            let cancel = cancel.clone();
            tokio::spawn(async move { job.start(cancel).await })
        };

        let supervised = Arc::clone(&job);
        tokio::spawn(async move {
            let outcome = match runner.await {
                Ok(outcome) => outcome,
                Err(e) => Err(JobError::Panicked(e.to_string())),
            };
            settle(supervised.as_ref(), &outcome);
            tx.send_replace(Some(outcome.map_err(Arc::new)));
        });

        entries.insert(
            id,
            Entry {
                job,
                cancel,
                completion: rx,
            },
        );

        tracing::info!(job_id = %id, "Job started");
        Ok(())
    }

    /// Look up a job. An unhandled fault of its execution is re-raised.
    pub async fn get(&self, id: JobId) -> Result<Option<Arc<J>>, RegistryError> {
        let entries = self.entries.read().await;
        let Some(entry) = entries.get(&id) else {
            return Ok(None);
        };

        if let Some(Err(e)) = &*entry.completion.borrow() {
            if e.is_fault() {
                return Err(RegistryError::Faulted {
                    id,
                    source: Arc::clone(e),
                });
            }
        }
        Ok(Some(Arc::clone(&entry.job)))
    }

    /// Signal cancellation and wait until the job's execution has exited.
    pub async fn cancel(&self, id: JobId) -> Result<(), RegistryError> {
        let (cancel, completion) = {
            let entries = self.entries.read().await;
            let entry = entries.get(&id).ok_or(RegistryError::NotFound(id))?;
            (entry.cancel.clone(), entry.completion.clone())
        };

        tracing::info!(job_id = %id, "Cancelling job");
        cancel.cancel();
        let _ = wait_completion(completion).await;
        Ok(())
    }

    /// Wait for the job to complete and return its result.
    ///
    /// `None` when the job failed or was cancelled; its status detail
    /// says why.
    pub async fn finish(&self, id: JobId) -> Result<Option<J::Output>, RegistryError> {
        let completion = {
            let entries = self.entries.read().await;
            let entry = entries.get(&id).ok_or(RegistryError::NotFound(id))?;
            entry.completion.clone()
        };

        match wait_completion(completion).await {
            Ok(output) => Ok(Some(output)),
            Err(e) if e.is_fault() => Err(RegistryError::Faulted { id, source: e }),
            Err(_) => Ok(None),
        }
    }

    /// Drop a finished job from the registry.
    pub async fn remove(&self, id: JobId) -> Result<Arc<J>, RegistryError> {
        let mut entries = self.entries.write().await;
        let entry = entries.get(&id).ok_or(RegistryError::NotFound(id))?;

        let status = entry.job.core().status();
        if !status.is_terminal() {
            return Err(RegistryError::InvalidOperation {
                id,
                message: format!("Cannot remove a job while it is {status}"),
            });
        }

        let entry = entries.remove(&id).ok_or(RegistryError::NotFound(id))?;
        tracing::debug!(job_id = %id, status = %status, "Job removed");
        Ok(entry.job)
    }

    pub async fn list(&self) -> Vec<Arc<J>> {
        let entries = self.entries.read().await;
        entries.values().map(|e| Arc::clone(&e.job)).collect()
    }

    /// Snapshots of every registered job, oldest first.
    pub async fn snapshots(&self) -> Vec<JobSnapshot> {
        let mut snapshots: Vec<JobSnapshot> = self
            .list()
            .await
            .iter()
            .map(|job| job.core().snapshot())
            .collect();
        snapshots.sort_by_key(|s| s.start_time);
        snapshots
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Cancel every registered job and wait for all of them to exit.
    pub async fn shutdown(&self) {
        let pending: Vec<_> = {
            let entries = self.entries.read().await;
            entries
                .values()
                .map(|e| (e.cancel.clone(), e.completion.clone()))
                .collect()
        };
        if pending.is_empty() {
            return;
        }

        tracing::info!(count = pending.len(), "Cancelling registered jobs");
        for (cancel, _) in &pending {
            cancel.cancel();
        }
        futures::future::join_all(
            pending
                .into_iter()
                .map(|(_, completion)| wait_completion(completion)),
        )
        .await;
    }
}

impl<J: Respawn> ProcessRegistry<J> {
    /// Cancel and remove a job, then start a fresh one built with the
    /// same parameters.
    pub async fn restart(&self, id: JobId) -> Result<Arc<J>, RegistryError> {
        let previous = {
            let entries = self.entries.read().await;
            let entry = entries.get(&id).ok_or(RegistryError::NotFound(id))?;
            Arc::clone(&entry.job)
        };

        self.cancel(id).await?;
        self.remove(id).await?;

        let fresh = Arc::new(previous.respawn()?);
        self.start(Arc::clone(&fresh)).await?;

        tracing::info!(job_id = %id, new_job_id = %fresh.core().id(), "Job restarted");
        Ok(fresh)
    }
}

// ---- private helpers ----

async fn wait_completion<T: Clone>(
    mut completion: watch::Receiver<Completion<T>>,
) -> Result<T, Arc<JobError>> {
    let outcome = match completion.wait_for(Option::is_some).await {
        Ok(done) => (*done).clone(),
        Err(_) => None,
    };
    outcome.unwrap_or_else(|| {
        Err(Arc::new(JobError::Panicked(
            "job supervisor exited without a result".to_string(),
        )))
    })
}

/// Bring a job whose execution ended into a terminal status.
fn settle<J: Job>(job: &J, outcome: &Result<J::Output, JobError>) {
    let core = job.core();
    let id = core.id();

    match outcome {
        Ok(_) => {
            if !core.status().is_terminal() {
                if let Err(e) = core.transition(JobStatus::Success) {
                    tracing::warn!(job_id = %id, error = %e, "Job returned a result without finishing");
                    core.settle_failed(J::Detail::faulted());
                }
            }
            tracing::info!(job_id = %id, status = %core.status(), "Job finished");
        }
        Err(e) if e.is_cancellation() => {
            core.settle_failed(J::Detail::cancelled());
            tracing::info!(job_id = %id, "Job cancelled");
        }
        Err(JobError::Failed { detail }) => {
            core.settle_failed(J::Detail::faulted());
            tracing::info!(job_id = %id, detail = %detail, "Job failed");
        }
        Err(e) => {
            core.settle_failed(J::Detail::faulted());
            tracing::error!(job_id = %id, error = %e, "Job faulted");
        }
    }
}
