//! Converting captured artefacts into files an emulator can mount.
//!
//! A [`ConversionJob`] fetches each source artefact from object storage,
//! runs the environment's converter on it once and collects the produced
//! files. The first failure aborts the whole job.

pub mod converters;
pub mod environments;

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use asec_cloud::ObjectStore;
use asec_core::error::CoreError;
use asec_core::media::{Artefact, ArtefactType, DeviceType};
use asec_core::status::JobStatus;
use async_trait::async_trait;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::job::{Job, JobCore, JobError, Respawn, StatusDetail};
use crate::process::{ProcessError, ToolCommand};

pub use converters::{Converter, ConverterConfig, ConverterKind};
pub use environments::{EmulationEnvironment, EmulatorRegistry};

/// Why a conversion job failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ConversionDetail {
    InvalidInput,
    FailedToFetchArtefact,
    FailedToConvertArtefact,
    Cancelled,
    Faulted,
}

impl fmt::Display for ConversionDetail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConversionDetail::InvalidInput => "InvalidInput",
            ConversionDetail::FailedToFetchArtefact => "FailedToFetchArtefact",
            ConversionDetail::FailedToConvertArtefact => "FailedToConvertArtefact",
            ConversionDetail::Cancelled => "Cancelled",
            ConversionDetail::Faulted => "Faulted",
        };
        f.write_str(name)
    }
}

impl StatusDetail for ConversionDetail {
    fn cancelled() -> Self {
        ConversionDetail::Cancelled
    }

    fn faulted() -> Self {
        ConversionDetail::Faulted
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConvertedFile {
    pub filename: PathBuf,
    pub device_type: DeviceType,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConversionResult {
    pub files: Vec<ConvertedFile>,
}

/// Deployment settings shared by every conversion job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversionSettings {
    pub dirs_base: PathBuf,
    pub artefact_bucket: String,
    pub unzip_binary: PathBuf,
}

pub struct ConversionJob {
    core: JobCore<ConversionDetail>,
    environment_id: Uuid,
    version_id: Uuid,
    converter: Arc<Converter>,
    artefacts: Vec<Artefact>,
    artefact_type: ArtefactType,
    storage: Arc<dyn ObjectStore>,
    settings: ConversionSettings,
}

impl ConversionJob {
    /// Bind `artefacts` to a converter of environment `environment_id`.
    ///
    /// The artefacts must be non-empty and share one declared type;
    /// otherwise [`CoreError::InvalidInput`] is returned before anything
    /// is created on disk.
    pub fn new(
        environment_id: Uuid,
        version_id: Uuid,
        converter: Arc<Converter>,
        artefacts: Vec<Artefact>,
        storage: Arc<dyn ObjectStore>,
        settings: ConversionSettings,
    ) -> Result<Self, JobError> {
        let artefact_type = common_artefact_type(&artefacts)?;
        let core = JobCore::create(&settings.dirs_base)?;

        tracing::debug!(
            job_id = %core.id(),
            environment_id = %environment_id,
            converter = converter.name(),
            artefacts = artefacts.len(),
            "Conversion job created",
        );

        Ok(Self {
            core,
            environment_id,
            version_id,
            converter,
            artefacts,
            artefact_type,
            storage,
            settings,
        })
    }

    pub fn environment_id(&self) -> Uuid {
        self.environment_id
    }

    pub fn version_id(&self) -> Uuid {
        self.version_id
    }

    pub fn converter(&self) -> &Converter {
        &self.converter
    }

    pub fn artefacts(&self) -> &[Artefact] {
        &self.artefacts
    }

    pub fn artefact_type(&self) -> ArtefactType {
        self.artefact_type
    }

    /// Download `artefact` into `fetch/<artefact id>/<original filename>`.
    ///
    /// With `extract` the download must be a ZIP archive; it is unpacked
    /// next to it and the extraction directory is returned instead.
    pub async fn fetch_artefact(
        &self,
        artefact: &Artefact,
        extract: bool,
        cancel: &CancellationToken,
    ) -> Result<PathBuf, JobError> {
        let fetch_dir = self.core.dirs().fetch.join(artefact.id.to_string());
        tokio::fs::create_dir_all(&fetch_dir).await?;

        let file_name = local_file_name(artefact);
        let destination = fetch_dir.join(&file_name);

        let object_key = artefact.object_key();
        tokio::select! {
            fetched = self.storage.get_object(
                &self.settings.artefact_bucket,
                &object_key,
                &destination,
            ) => fetched?,
            _ = cancel.cancelled() => return Err(JobError::Cancelled),
        }

        if !extract {
            return Ok(destination);
        }
        if artefact.artefact_type != ArtefactType::ZipArchive {
            return Err(CoreError::InvalidOperation(format!(
                "Can only extract ZIP archives, artefact {} is {:?}",
                artefact.id, artefact.artefact_type
            ))
            .into());
        }

        let extraction_dir = fetch_dir.join(format!("{file_name}_extracted"));
        ToolCommand::new(&self.settings.unzip_binary)
            .arg(&destination)
            .arg("-d")
            .arg(&extraction_dir)
            .run(self.core.log(), cancel)
            .await?;
        Ok(extraction_dir)
    }

    /// Converter inputs for `artefact`: the download itself, or every file
    /// unpacked from it when it is a ZIP archive.
    async fn fetch_sources(
        &self,
        artefact: &Artefact,
        cancel: &CancellationToken,
    ) -> Result<Vec<PathBuf>, JobError> {
        let extract = artefact.artefact_type == ArtefactType::ZipArchive;
        let fetched = self.fetch_artefact(artefact, extract, cancel).await?;
        if !extract {
            return Ok(vec![fetched]);
        }
        Ok(extracted_files(&fetched).await?)
    }
}

#[async_trait]
impl Job for ConversionJob {
    type Output = ConversionResult;
    type Detail = ConversionDetail;

    fn core(&self) -> &JobCore<ConversionDetail> {
        &self.core
    }

    async fn start(&self, cancel: CancellationToken) -> Result<ConversionResult, JobError> {
        let log = self.core.log();

        if !self.converter.supports(self.artefact_type) {
            log.line(format!(
                "Artefact type {:?} is not supported by {}.",
                self.artefact_type,
                self.converter.name()
            ))
            .await;
            return Err(self.core.fail(ConversionDetail::InvalidInput));
        }

        self.core.transition(JobStatus::Running)?;

        let mut files = Vec::with_capacity(self.artefacts.len());
        for artefact in &self.artefacts {
            log.line(format!(
                "Converting artefact: {} (name: {})",
                artefact.id, artefact.name
            ))
            .await;

            let sources = match self.fetch_sources(artefact, &cancel).await {
                Ok(sources) if !sources.is_empty() => sources,
                Ok(_) => {
                    log.line(format!("Archive {} contains no files.", artefact.id))
                        .await;
                    return Err(self.core.fail(ConversionDetail::FailedToFetchArtefact));
                }
                Err(e) if e.is_cancellation() => return Err(e),
                Err(e) => {
                    log.line(format!("Failed to fetch artefact {}: {e}", artefact.id))
                        .await;
                    return Err(self.core.fail(ConversionDetail::FailedToFetchArtefact));
                }
            };

            for source in sources {
                let stem = source
                    .file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_else(|| artefact.id.to_string());
                let output = unique_output_path(
                    &self.core.dirs().output,
                    &stem,
                    self.converter.output_extension(),
                );

                let command = self.converter.command(&source, &output);
                log.line(format!("Running: {command}")).await;

                match self.core.wait_for_process(command.run(log, &cancel)).await? {
                    Ok(()) => {}
                    Err(e @ ProcessError::Cancelled { .. }) => return Err(e.into()),
                    Err(e) => {
                        log.line(format!("Conversion of artefact {} failed: {e}", artefact.id))
                            .await;
                        return Err(self.core.fail(ConversionDetail::FailedToConvertArtefact));
                    }
                }

                files.push(ConvertedFile {
                    filename: output,
                    device_type: self.converter.device_type(),
                });
            }
        }

        log.line("Conversion process finished successfully.").await;
        self.core.transition(JobStatus::Success)?;
        Ok(ConversionResult { files })
    }
}

impl Respawn for ConversionJob {
    fn respawn(&self) -> Result<Self, JobError> {
        ConversionJob::new(
            self.environment_id,
            self.version_id,
            Arc::clone(&self.converter),
            self.artefacts.clone(),
            Arc::clone(&self.storage),
            self.settings.clone(),
        )
    }
}

// ---- private helpers ----

fn common_artefact_type(artefacts: &[Artefact]) -> Result<ArtefactType, CoreError> {
    let Some(first) = artefacts.first() else {
        return Err(CoreError::InvalidInput(
            "Conversion needs at least one artefact".to_string(),
        ));
    };

    if let Some(other) = artefacts
        .iter()
        .find(|a| a.artefact_type != first.artefact_type)
    {
        return Err(CoreError::InvalidInput(format!(
            "Artefacts of different types cannot be converted together ({:?} and {:?})",
            first.artefact_type, other.artefact_type
        )));
    }
    Ok(first.artefact_type)
}

/// Regular files below `dir`, sorted by path.
async fn extracted_files(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let mut pending = vec![dir.to_path_buf()];
    while let Some(current) = pending.pop() {
        let mut entries = tokio::fs::read_dir(&current).await?;
        while let Some(entry) = entries.next_entry().await? {
            let file_type = entry.file_type().await?;
            if file_type.is_dir() {
                pending.push(entry.path());
            } else if file_type.is_file() {
                files.push(entry.path());
            }
        }
    }
    files.sort();
    Ok(files)
}

/// The artefact's original file name, reduced to its last path component.
fn local_file_name(artefact: &Artefact) -> String {
    Path::new(&artefact.original_filename)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| artefact.id.to_string())
}

/// `<dir>/<stem>.<ext>`, or `<dir>/<stem>_<n>.<ext>` with the lowest
/// `n >= 1` that is still free.
fn unique_output_path(dir: &Path, stem: &str, extension: &str) -> PathBuf {
    let candidate = dir.join(format!("{stem}.{extension}"));
    if !candidate.exists() {
        return candidate;
    }

    let mut n = 1u32;
    loop {
        let candidate = dir.join(format!("{stem}_{n}.{extension}"));
        if !candidate.exists() {
            return candidate;
        }
        n += 1;
    }
}
