//! Analog audio capture (cassette tapes) with ffmpeg.
//!
//! The recording runs while the operator plays the tape; it is ended by
//! interrupting ffmpeg once the operator reports the end of the tape.

use std::path::PathBuf;
use std::process::ExitStatus;
use std::sync::LazyLock;

use asec_core::media::{ArtefactType, PhysicalMediaType};
use asec_core::status::JobStatus;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use super::{DigitizationDetail, DigitizationResult};
use crate::job::{JobCore, JobError};
use crate::probe::{self, Availability, ProbeOutput, ProbeState};
use crate::process::{ProcessError, SupervisedProcess, ToolCommand};

static VERSION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^ffmpeg version (\d+)\.(\d+)\.(\d+)").expect("valid regex"));

/// One row of `ffmpeg -devices`: demux flag, mux flag, device name.
static DEVICE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^ ([D ])[E ]\s(\w+)").expect("valid regex"));

const OUTPUT_FILE: &str = "cassette.wav";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FfmpegRecordingConfig {
    pub slug: String,
    pub ffmpeg_path: PathBuf,
    /// Input device format passed to `-f`, e.g. `alsa` or `pulse`.
    pub input_device: String,
    /// Device path passed to `-i`, e.g. `hw:1`.
    pub input_path: String,
    /// Extra output arguments appended after the output file.
    #[serde(default)]
    pub arguments: Vec<String>,
}

#[derive(Debug)]
pub struct FfmpegRecordingTool {
    config: FfmpegRecordingConfig,
    probe: ProbeState,
}

impl FfmpegRecordingTool {
    pub fn new(config: FfmpegRecordingConfig) -> Self {
        Self {
            config,
            probe: ProbeState::default(),
        }
    }

    pub fn slug(&self) -> &str {
        &self.config.slug
    }

    pub fn physical_media(&self) -> PhysicalMediaType {
        PhysicalMediaType::AudioCassette
    }

    pub fn probe(&self) -> &ProbeState {
        &self.probe
    }

    /// Run `ffmpeg -devices`. Available when the version banner parses
    /// and the configured input device supports demuxing.
    pub async fn initialize(&self) {
        let availability = match probe::run_probe(&self.config.ffmpeg_path, &["-devices"]).await {
            Some(output) => availability_from_devices(&output, &self.config.input_device),
            None => Availability::default(),
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

        log.line("Asking for cassette rewind.").await;
        core.wait_for_input(DigitizationDetail::RequestForRewind, cancel)
            .await?;
        log.line("Rewind done, starting recording.").await;

        let output_file = core.dirs().work.join(OUTPUT_FILE);
        let command = ToolCommand::new(&self.config.ffmpeg_path)
            .args(["-f", self.config.input_device.as_str()])
            .args(["-i", self.config.input_path.as_str()])
            .arg(&output_file)
            .args(&self.config.arguments);
        log.line(format!("Running: {command}")).await;

        let mut recorder = match command.spawn(log) {
            Ok(recorder) => recorder,
            Err(e) => {
                log.line(format!("Failed to start recording: {e}")).await;
                return Err(core.fail(DigitizationDetail::CaptureToolFailed));
            }
        };

        log.line("Recording started, requesting cassette play.").await;
        await_operator(core, &mut recorder, DigitizationDetail::RequestForPlay, cancel).await?;

        log.line("Recording, waiting for notification that the cassette has ended.")
            .await;
        await_operator(
            core,
            &mut recorder,
            DigitizationDetail::RequestForStopNotification,
            cancel,
        )
        .await?;

        log.line("Stopping recording.").await;
        let status = match recorder.stop().await {
            Ok(status) => status,
            Err(e) => {
                log.line(format!("Failed to stop recording: {e}")).await;
                return Err(core.fail(DigitizationDetail::CaptureToolFailed));
            }
        };

        if !output_file.is_file() {
            log.line(format!("Recorder exited ({status}) without writing {OUTPUT_FILE}."))
                .await;
            return Err(core.fail(DigitizationDetail::CaptureToolFailed));
        }

        log.line("Recording finished.").await;
        core.transition(JobStatus::Success)?;

        Ok(DigitizationResult {
            output_file,
            detected_artefact_type: ArtefactType::WavAudio,
        })
    }
}

// ---- private helpers ----

enum Waited {
    Input(Result<String, JobError>),
    Exited(Result<ExitStatus, ProcessError>),
}

/// Wait for operator input while watching the recorder. A recorder
/// that exits on its own fails the job.
async fn await_operator(
    core: &JobCore<DigitizationDetail>,
    recorder: &mut SupervisedProcess,
    reason: DigitizationDetail,
    cancel: &CancellationToken,
) -> Result<(), JobError> {
    let waited = tokio::select! {
        input = core.wait_for_input(reason, cancel) => Waited::Input(input),
        status = recorder.wait() => Waited::Exited(status),
    };

    match waited {
        Waited::Input(Ok(_)) => Ok(()),
        Waited::Input(Err(e)) => {
            if let Err(stop_error) = recorder.stop().await {
                tracing::warn!(job_id = %core.id(), error = %stop_error, "Failed to stop recorder");
            }
            Err(e)
        }
        Waited::Exited(status) => {
            let description = match status {
                Ok(status) => status.to_string(),
                Err(e) => e.to_string(),
            };
            core.log()
                .line(format!("Recorder exited unexpectedly ({description})."))
                .await;
            Err(core.fail(DigitizationDetail::CaptureToolFailed))
        }
    }
}

fn availability_from_devices(output: &ProbeOutput, input_device: &str) -> Availability {
    if !output.success {
        return Availability::default();
    }

    // The banner is the first line ffmpeg prints on stderr.
    let Some(version) = probe::parse_version(&VERSION_RE, output.stderr.lines().take(1)) else {
        return Availability::default();
    };

    let has_device = output.stdout.lines().any(|line| {
        DEVICE_RE
            .captures(line)
            .is_some_and(|c| &c[1] == "D" && &c[2] == input_device)
    });

    Availability {
        available: has_device,
        version: Some(version),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DEVICES: &str = "Devices:\n D. = Demuxing supported\n .E = Muxing supported\n --\n DE alsa            ALSA audio output\n  E fbdev           Linux framebuffer\n D  lavfi           Libavfilter virtual input device\n";

    fn output(stderr: &str) -> ProbeOutput {
        ProbeOutput {
            success: true,
            stdout: DEVICES.to_string(),
            stderr: stderr.to_string(),
        }
    }

    #[test]
    fn demuxing_device_makes_tool_available() {
        let availability =
            availability_from_devices(&output("ffmpeg version 6.1.1 Copyright (c)"), "alsa");
        assert!(availability.available);
        assert_eq!(availability.version.as_deref(), Some("6.1.1"));
    }

    #[test]
    fn mux_only_device_is_not_enough() {
        let availability =
            availability_from_devices(&output("ffmpeg version 6.1.1 Copyright (c)"), "fbdev");
        assert!(!availability.available);
    }

    #[test]
    fn unparsable_banner_is_unavailable() {
        let availability = availability_from_devices(&output("avconv version 12"), "alsa");
        assert_eq!(availability, Availability::default());
    }

    #[test]
    fn failed_probe_is_unavailable() {
        let mut failed = output("ffmpeg version 6.1.1");
        failed.success = false;
        assert!(!availability_from_devices(&failed, "alsa").available);
    }
}
