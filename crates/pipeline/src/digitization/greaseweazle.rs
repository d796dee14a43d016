//! Greaseweazle floppy imager.

use std::path::PathBuf;
use std::sync::LazyLock;

use asec_core::error::CoreError;
use asec_core::media::{ArtefactType, PhysicalMediaType};
use asec_core::status::JobStatus;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use super::{DigitizationDetail, DigitizationResult};
use crate::job::{JobCore, JobError};
use crate::probe::{self, Availability, ProbeState};
use crate::process::{ProcessError, ToolCommand};

static HOST_TOOLS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Host Tools: (\d+)\.(\d+)").expect("valid regex"));

/// Name of the flux image written into the job's work directory.
const OUTPUT_FILE: &str = "floppy.scp";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GreaseweazleConfig {
    pub slug: String,
    pub gw_path: PathBuf,
    pub media_type: PhysicalMediaType,
    /// Extra arguments for `gw read`, e.g. drive or track selection.
    #[serde(default)]
    pub arguments: Vec<String>,
}

#[derive(Debug)]
pub struct GreaseweazleTool {
    config: GreaseweazleConfig,
    probe: ProbeState,
}

impl GreaseweazleTool {
    /// Only diskette media can be imaged.
    pub fn new(config: GreaseweazleConfig) -> Result<Self, CoreError> {
        if !config.media_type.is_floppy() {
            return Err(CoreError::InvalidInput(format!(
                "Greaseweazle tool '{}' cannot read {:?} media",
                config.slug, config.media_type
            )));
        }
        Ok(Self {
            config,
            probe: ProbeState::default(),
        })
    }

    pub fn slug(&self) -> &str {
        &self.config.slug
    }

    pub fn physical_media(&self) -> PhysicalMediaType {
        self.config.media_type
    }

    pub fn probe(&self) -> &ProbeState {
        &self.probe
    }

    /// Run `gw info`; the tool is available when it exits successfully.
    pub async fn initialize(&self) {
        let availability = match probe::run_probe(&self.config.gw_path, &["info"]).await {
            Some(output) if output.success => Availability {
                available: true,
                version: probe::parse_version(&HOST_TOOLS_RE, output.lines()),
            },
            _ => Availability::default(),
        };
        self.probe.set(availability);
    }

    pub(crate) async fn start(
        &self,
        core: &JobCore<DigitizationDetail>,
        cancel: &CancellationToken,
    ) -> Result<DigitizationResult, JobError> {
        let log = core.log();
        core.transition(JobStatus::Running)?;

        log.line("Requesting media insertion.").await;
        core.wait_for_input(DigitizationDetail::RequestForMediaInsert, cancel)
            .await?;

        let output_file = core.dirs().work.join(OUTPUT_FILE);
        let command = ToolCommand::new(&self.config.gw_path)
            .arg("read")
            .args(&self.config.arguments)
            .arg(&output_file);
        log.line(format!("Reading media: {command}")).await;

        match core.wait_for_process(command.run(log, cancel)).await? {
            Ok(()) => {}
            Err(e @ ProcessError::Cancelled { .. }) => return Err(e.into()),
            Err(e) => {
                log.line(format!("Reading media failed: {e}")).await;
                return Err(core.fail(DigitizationDetail::CaptureToolFailed));
            }
        }

        log.line("Media read finished.").await;
        core.transition(JobStatus::Success)?;

        Ok(DigitizationResult {
            output_file,
            detected_artefact_type: ArtefactType::SfmFloppy,
        })
    }
}
