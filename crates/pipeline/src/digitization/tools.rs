//! Digitization tool variants and the repository built from configuration.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use asec_core::error::CoreError;
use asec_core::media::PhysicalMediaType;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use super::ffmpeg::{FfmpegRecordingConfig, FfmpegRecordingTool};
use super::greaseweazle::{GreaseweazleConfig, GreaseweazleTool};
use super::{DigitizationDetail, DigitizationResult};
use crate::config::{self, ConfigError, ConfigurationList};
use crate::job::{JobCore, JobError};
use crate::probe::ProbeState;

/// Tool configuration, tagged by `type`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum DigitizationToolConfig {
    #[serde(rename = "greaseweazle")]
    Greaseweazle(GreaseweazleConfig),
    #[serde(rename = "ffmpegrec")]
    FfmpegRecording(FfmpegRecordingConfig),
}

impl DigitizationToolConfig {
    pub fn slug(&self) -> &str {
        match self {
            DigitizationToolConfig::Greaseweazle(c) => &c.slug,
            DigitizationToolConfig::FfmpegRecording(c) => &c.slug,
        }
    }

    pub fn construct(&self) -> Result<DigitizationTool, CoreError> {
        Ok(match self {
            DigitizationToolConfig::Greaseweazle(c) => {
                DigitizationTool::Greaseweazle(GreaseweazleTool::new(c.clone())?)
            }
            DigitizationToolConfig::FfmpegRecording(c) => {
                DigitizationTool::FfmpegRecording(FfmpegRecordingTool::new(c.clone()))
            }
        })
    }
}

/// A capture tool able to digitize one kind of physical medium.
#[derive(Debug)]
pub enum DigitizationTool {
    Greaseweazle(GreaseweazleTool),
    FfmpegRecording(FfmpegRecordingTool),
}

/// Boundary description of a configured tool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDescription {
    pub slug: String,
    pub name: String,
    pub version: String,
    pub physical_media: PhysicalMediaType,
    pub available: bool,
}

impl DigitizationTool {
    pub fn slug(&self) -> &str {
        match self {
            DigitizationTool::Greaseweazle(t) => t.slug(),
            DigitizationTool::FfmpegRecording(t) => t.slug(),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            DigitizationTool::Greaseweazle(_) => "Greaseweazle",
            DigitizationTool::FfmpegRecording(_) => "Ffmpeg",
        }
    }

    pub fn physical_media(&self) -> PhysicalMediaType {
        match self {
            DigitizationTool::Greaseweazle(t) => t.physical_media(),
            DigitizationTool::FfmpegRecording(t) => t.physical_media(),
        }
    }

    pub fn version(&self) -> String {
        self.probe().version_or_unknown()
    }

    pub fn is_available(&self) -> bool {
        self.probe().is_available()
    }

    pub fn describe(&self) -> ToolDescription {
        ToolDescription {
            slug: self.slug().to_string(),
            name: self.name().to_string(),
            version: self.version(),
            physical_media: self.physical_media(),
            available: self.is_available(),
        }
    }

    /// Probe the tool binary and record its availability.
    pub async fn initialize(&self) {
        match self {
            DigitizationTool::Greaseweazle(t) => t.initialize().await,
            DigitizationTool::FfmpegRecording(t) => t.initialize().await,
        }
    }

    pub(crate) async fn start(
        &self,
        core: &JobCore<DigitizationDetail>,
        cancel: &CancellationToken,
    ) -> Result<DigitizationResult, JobError> {
        match self {
            DigitizationTool::Greaseweazle(t) => t.start(core, cancel).await,
            DigitizationTool::FfmpegRecording(t) => t.start(core, cancel).await,
        }
    }

    fn probe(&self) -> &ProbeState {
        match self {
            DigitizationTool::Greaseweazle(t) => t.probe(),
            DigitizationTool::FfmpegRecording(t) => t.probe(),
        }
    }
}

/// Configured digitization tools, keyed by slug.
#[derive(Debug, Default)]
pub struct ToolRepository {
    tools: BTreeMap<String, Arc<DigitizationTool>>,
}

impl ToolRepository {
    pub fn from_configs(configs: &[DigitizationToolConfig]) -> Result<Self, CoreError> {
        let mut tools = BTreeMap::new();
        for config in configs {
            let tool = config.construct()?;
            let slug = tool.slug().to_string();
            if tools.insert(slug.clone(), Arc::new(tool)).is_some() {
                return Err(CoreError::InvalidInput(format!(
                    "Duplicate digitization tool slug '{slug}'"
                )));
            }
        }

        tracing::info!(count = tools.len(), "Digitization tools configured");
        Ok(Self { tools })
    }

    /// Load a `{ "configurations": [...] }` tool list.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let list: ConfigurationList<DigitizationToolConfig> = config::load_json(path)?;
        Self::from_configs(&list.configurations).map_err(|source| ConfigError::Invalid {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Probe every tool once.
    pub async fn initialize_all(&self) {
        for tool in self.tools.values() {
            tool.initialize().await;
            if tool.is_available() {
                tracing::info!(
                    tool = %tool.slug(),
                    name = tool.name(),
                    version = %tool.version(),
                    media = ?tool.physical_media(),
                    "Digitization tool available",
                );
            } else {
                tracing::warn!(tool = %tool.slug(), "Digitization tool unavailable");
            }
        }
    }

    pub fn get(&self, slug: &str) -> Option<Arc<DigitizationTool>> {
        self.tools.get(slug).cloned()
    }

    pub fn list(&self) -> Vec<Arc<DigitizationTool>> {
        self.tools.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}
