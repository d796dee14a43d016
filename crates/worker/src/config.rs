use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use asec_pipeline::config::ConfigError;
use asec_pipeline::conversion::ConversionSettings;
use asec_pipeline::emulation::capture::RestartPolicy;
use asec_pipeline::emulation::{
    EmulationConfig, DEFAULT_CAPTURE_DEVICE, DEFAULT_CAPTURE_FORMAT,
};

/// Worker configuration loaded from environment variables.
///
/// All fields have defaults suitable for a local workstation. Empty
/// variables count as unset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerConfig {
    /// Root of the per-job working directories.
    pub dirs_base: PathBuf,
    pub tools_config: PathBuf,
    pub emulators_config: PathBuf,
    pub packages_config: PathBuf,
    pub unzip_binary: PathBuf,
    pub artefact_bucket: String,
    pub eaas_base_url: String,
    pub ffmpeg_path: PathBuf,
    pub main_display: String,
    pub webcam_device: Option<String>,
    pub target_drive: String,
    pub stream_base_url: String,
    pub capture_format: String,
    pub capture_device: String,
    pub passthrough_interval: Duration,
    pub capture_restart: RestartPolicy,
    /// How long shutdown waits for jobs to drain.
    pub shutdown_timeout: Duration,
}

impl WorkerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                      | Default                          |
    /// |------------------------------|----------------------------------|
    /// | `ASEC_DIRS_BASE`             | `/var/lib/asec/jobs`             |
    /// | `DIGITIZATION_TOOLS_CONFIG`  | `config/digitization-tools.json` |
    /// | `EMULATORS_CONFIG`           | `config/emulators.json`          |
    /// | `PACKAGES_CONFIG`            | `config/packages.json`           |
    /// | `UNZIP_PATH`                 | `unzip`                          |
    /// | `ARTEFACT_BUCKET`            | `artefacts`                      |
    /// | `EAAS_BASE_URL`              | `http://localhost:8080/emil`     |
    /// | `FFMPEG_PATH`                | `ffmpeg`                         |
    /// | `MAIN_DISPLAY`               | `card0-HDMI-A-1`                 |
    /// | `WEBCAM_DEVICE`              | (no webcam recording)            |
    /// | `EAAS_TARGET_DRIVE`          | `disk`                           |
    /// | `STREAM_BASE_URL`            | `rtsp://localhost:8554/`         |
    /// | `CAPTURE_FORMAT`             | `decklink`                       |
    /// | `CAPTURE_DEVICE`             | `Intensity Pro 4K`               |
    /// | `PASSTHROUGH_INTERVAL_SECS`  | `5`                              |
    /// | `CAPTURE_RESTART_DELAY_SECS` | `2`                              |
    /// | `CAPTURE_MAX_RESTARTS`       | (unbounded, counted in a row)    |
    /// | `CAPTURE_HEALTHY_AFTER_SECS` | `30`                             |
    /// | `SHUTDOWN_TIMEOUT_SECS`      | `30`                             |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Like [`from_env`](Self::from_env) with variables read through `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let text = |name: &str, default: &str| var(name).unwrap_or_else(|| default.to_string());

        let max_consecutive_restarts = match var("CAPTURE_MAX_RESTARTS") {
            Some(raw) => Some(parse_value::<u32>("CAPTURE_MAX_RESTARTS", &raw)?),
            None => None,
        };

        Ok(Self {
            dirs_base: text("ASEC_DIRS_BASE", "/var/lib/asec/jobs").into(),
            tools_config: text("DIGITIZATION_TOOLS_CONFIG", "config/digitization-tools.json").into(),
            emulators_config: text("EMULATORS_CONFIG", "config/emulators.json").into(),
            packages_config: text("PACKAGES_CONFIG", "config/packages.json").into(),
            unzip_binary: text("UNZIP_PATH", "unzip").into(),
            artefact_bucket: text("ARTEFACT_BUCKET", "artefacts"),
            eaas_base_url: text("EAAS_BASE_URL", "http://localhost:8080/emil"),
            ffmpeg_path: text("FFMPEG_PATH", "ffmpeg").into(),
            main_display: text("MAIN_DISPLAY", "card0-HDMI-A-1"),
            webcam_device: var("WEBCAM_DEVICE"),
            target_drive: text("EAAS_TARGET_DRIVE", "disk"),
            stream_base_url: text("STREAM_BASE_URL", "rtsp://localhost:8554/"),
            capture_format: text("CAPTURE_FORMAT", DEFAULT_CAPTURE_FORMAT),
            capture_device: text("CAPTURE_DEVICE", DEFAULT_CAPTURE_DEVICE),
            passthrough_interval: Duration::from_secs(parse_value(
                "PASSTHROUGH_INTERVAL_SECS",
                &text("PASSTHROUGH_INTERVAL_SECS", "5"),
            )?),
            capture_restart: RestartPolicy {
                delay: Duration::from_secs(parse_value(
                    "CAPTURE_RESTART_DELAY_SECS",
                    &text("CAPTURE_RESTART_DELAY_SECS", "2"),
                )?),
                max_consecutive_restarts,
                healthy_after: Duration::from_secs(parse_value(
                    "CAPTURE_HEALTHY_AFTER_SECS",
                    &text("CAPTURE_HEALTHY_AFTER_SECS", "30"),
                )?),
            },
            shutdown_timeout: Duration::from_secs(parse_value(
                "SHUTDOWN_TIMEOUT_SECS",
                &text("SHUTDOWN_TIMEOUT_SECS", "30"),
            )?),
        })
    }

    pub fn conversion(&self) -> ConversionSettings {
        ConversionSettings {
            dirs_base: self.dirs_base.join("conversion"),
            artefact_bucket: self.artefact_bucket.clone(),
            unzip_binary: self.unzip_binary.clone(),
        }
    }

    pub fn digitization_dirs_base(&self) -> PathBuf {
        self.dirs_base.join("digitization")
    }

    pub fn emulation(&self) -> EmulationConfig {
        EmulationConfig {
            dirs_base: self.dirs_base.join("emulation"),
            ffmpeg_path: self.ffmpeg_path.clone(),
            main_display: self.main_display.clone(),
            webcam_device: self.webcam_device.clone(),
            target_drive: self.target_drive.clone(),
            stream_base_url: self.stream_base_url.clone(),
            capture_format: self.capture_format.clone(),
            capture_device: self.capture_device.clone(),
            passthrough_interval: self.passthrough_interval,
            capture_restart: self.capture_restart,
        }
    }
}

// ---- private helpers ----

fn parse_value<T>(name: &str, raw: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: Display,
{
    raw.trim().parse().map_err(|e: T::Err| ConfigError::Env {
        name: name.to_string(),
        message: format!("'{raw}': {e}"),
    })
}
