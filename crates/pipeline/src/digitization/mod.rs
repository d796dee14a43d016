//! Capturing physical media into artefacts.
//!
//! A [`DigitizationJob`] binds one [`DigitizationTool`] to an archived
//! version and runs the tool's capture flow, pausing whenever the
//! operator has to handle the physical medium.

pub mod ffmpeg;
pub mod greaseweazle;
pub mod tools;

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use asec_core::error::CoreError;
use asec_core::media::ArtefactType;
use async_trait::async_trait;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::job::{Job, JobCore, JobError, Respawn, StatusDetail};

pub use tools::{DigitizationTool, DigitizationToolConfig, ToolRepository};

/// Why a digitization job is waiting or failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DigitizationDetail {
    RequestForMediaInsert,
    RequestForRewind,
    RequestForPlay,
    RequestForStopNotification,
    CaptureToolFailed,
    Cancelled,
    Faulted,
}

impl fmt::Display for DigitizationDetail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DigitizationDetail::RequestForMediaInsert => "RequestForMediaInsert",
            DigitizationDetail::RequestForRewind => "RequestForRewind",
            DigitizationDetail::RequestForPlay => "RequestForPlay",
            DigitizationDetail::RequestForStopNotification => "RequestForStopNotification",
            DigitizationDetail::CaptureToolFailed => "CaptureToolFailed",
            DigitizationDetail::Cancelled => "Cancelled",
            DigitizationDetail::Faulted => "Faulted",
        };
        f.write_str(name)
    }
}

impl StatusDetail for DigitizationDetail {
    fn cancelled() -> Self {
        DigitizationDetail::Cancelled
    }

    fn faulted() -> Self {
        DigitizationDetail::Faulted
    }
}

/// Captured file and the artefact type the tool produces.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DigitizationResult {
    pub output_file: PathBuf,
    pub detected_artefact_type: ArtefactType,
}

pub struct DigitizationJob {
    core: JobCore<DigitizationDetail>,
    tool: Arc<DigitizationTool>,
    version_id: Uuid,
    dirs_base: PathBuf,
}

impl DigitizationJob {
    /// Bind `tool` to the archived version `version_id`.
    ///
    /// Fails with [`CoreError::ToolUnavailable`] before anything is
    /// created on disk when the tool's startup probe did not succeed.
    pub fn new(
        tool: Arc<DigitizationTool>,
        version_id: Uuid,
        dirs_base: &Path,
    ) -> Result<Self, JobError> {
        if !tool.is_available() {
            return Err(CoreError::ToolUnavailable(tool.slug().to_string()).into());
        }

        let core = JobCore::create(dirs_base)?;
        tracing::debug!(
            job_id = %core.id(),
            tool = %tool.slug(),
            version_id = %version_id,
            "Digitization job created",
        );

        Ok(Self {
            core,
            tool,
            version_id,
            dirs_base: dirs_base.to_path_buf(),
        })
    }

    pub fn tool(&self) -> &DigitizationTool {
        &self.tool
    }

    pub fn version_id(&self) -> Uuid {
        self.version_id
    }

    /// Store a file the operator uploaded for this job as `upload/<upload_id>`,
    /// replacing an earlier upload with the same id.
    ///
    /// Refused once the job has finished.
    pub async fn receive_upload(&self, upload_id: &str, content: &[u8]) -> Result<PathBuf, JobError> {
        let status = self.core.status();
        if status.is_terminal() {
            return Err(CoreError::InvalidOperation(format!(
                "Job {} no longer accepts uploads ({status:?})",
                self.core.id()
            ))
            .into());
        }

        let path = self.core.dirs().upload_path(upload_id)?;
        tokio::fs::write(&path, content).await?;
        self.core
            .log()
            .line(format!("Received upload {upload_id} ({} bytes).", content.len()))
            .await;
        tracing::info!(job_id = %self.core.id(), upload_id, bytes = content.len(), "Upload stored");
        Ok(path)
    }
}

#[async_trait]
impl Job for DigitizationJob {
    type Output = DigitizationResult;
    type Detail = DigitizationDetail;

    fn core(&self) -> &JobCore<DigitizationDetail> {
        &self.core
    }

    async fn start(&self, cancel: CancellationToken) -> Result<DigitizationResult, JobError> {
        self.tool.start(&self.core, &cancel).await
    }
}

impl Respawn for DigitizationJob {
    fn respawn(&self) -> Result<Self, JobError> {
        DigitizationJob::new(Arc::clone(&self.tool), self.version_id, &self.dirs_base)
    }
}
