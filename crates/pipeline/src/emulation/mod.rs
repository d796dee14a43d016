//! Interactive emulation sessions on EaaS.
//!
//! An [`EmulationJob`] starts a VM component for a converted package and,
//! while the session runs, supervises three local subtasks: USB input
//! passthrough, screen capture/streaming and webcam recording. Clients
//! steer the session with [`EmulationMessage`]s.

pub mod capture;
pub mod display;
pub mod passthrough;

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use asec_core::error::CoreError;
use asec_core::status::JobStatus;
use asec_eaas::models::{Drive, MachineComponentRequest};
use asec_eaas::{ComponentService, DeviceControlConnector, EaasApiError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::job::{Job, JobCore, JobError, StatusDetail};
use crate::log::JobLog;
use crate::process::ToolCommand;
use crate::queue::DropOldestQueue;

use self::capture::{run_screen_capture, run_webcam_recording, RestartPolicy};
use self::display::DisplayProbe;
use self::passthrough::run_usb_passthrough;

/// Pending control messages kept before the oldest is dropped.
const CONTROL_QUEUE_CAPACITY: usize = 4;

/// Control URL type of the VM process's device interface.
const QEMU_CONTROL_URL: &str = "qemu";

const WEBCAM_FILE: &str = "webcam.mp4";

pub const DEFAULT_CAPTURE_FORMAT: &str = "decklink";
pub const DEFAULT_CAPTURE_DEVICE: &str = "Intensity Pro 4K";
pub const DEFAULT_PASSTHROUGH_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EmulationMessage {
    /// Keep the component alive.
    Ping,
    SaveMachineState,
    NoSaveMachineState,
    /// End the session.
    Quit,
}

/// Why an emulation session failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EmulationDetail {
    PackageNotFound,
    ComponentStartFailed,
    Cancelled,
    Faulted,
}

impl fmt::Display for EmulationDetail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EmulationDetail::PackageNotFound => "PackageNotFound",
            EmulationDetail::ComponentStartFailed => "ComponentStartFailed",
            EmulationDetail::Cancelled => "Cancelled",
            EmulationDetail::Faulted => "Faulted",
        };
        f.write_str(name)
    }
}

impl StatusDetail for EmulationDetail {
    fn cancelled() -> Self {
        EmulationDetail::Cancelled
    }

    fn faulted() -> Self {
        EmulationDetail::Faulted
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RecordingType {
    Screen,
    Webcam,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VideoFile {
    pub path: PathBuf,
    pub kind: RecordingType,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EmulationResult {
    pub video_files: Vec<VideoFile>,
    /// Saved machine state; snapshots are not taken yet.
    pub snapshot_id: Option<String>,
}

/// A package resolved to the EaaS environment it runs in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPackage {
    pub package_id: Uuid,
    pub environment_eaas_id: String,
}

/// Lookup of converted packages, backed by the catalog database.
#[async_trait]
pub trait PackageCatalog: Send + Sync {
    async fn resolve_package(&self, package_id: Uuid) -> Result<Option<ResolvedPackage>, CoreError>;
}

/// Collaborators of an emulation session.
#[derive(Clone)]
pub struct EmulationServices {
    pub catalog: Arc<dyn PackageCatalog>,
    pub components: Arc<dyn ComponentService>,
    pub device_control: Arc<dyn DeviceControlConnector>,
    pub display: Arc<dyn DisplayProbe>,
}

/// Deployment settings of the emulation workstation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmulationConfig {
    pub dirs_base: PathBuf,
    pub ffmpeg_path: PathBuf,
    /// DRM connector watched by the USB passthrough, e.g. `card0-HDMI-A-1`.
    pub main_display: String,
    /// Webcam recording is skipped when unset.
    pub webcam_device: Option<String>,
    /// EaaS drive the package is mounted on.
    pub target_drive: String,
    /// Screen stream URL prefix; the job id is appended.
    pub stream_base_url: String,
    pub capture_format: String,
    pub capture_device: String,
    pub passthrough_interval: Duration,
    pub capture_restart: RestartPolicy,
}

pub struct EmulationJob {
    core: JobCore<EmulationDetail>,
    package_id: Uuid,
    services: EmulationServices,
    config: EmulationConfig,
    messages: DropOldestQueue<EmulationMessage>,
}

/// Per-subtask logs under the job's work directory.
struct SessionLogs {
    usb: JobLog,
    screen: JobLog,
    webcam: JobLog,
}

struct SessionEnd {
    cancelled: bool,
    save_state: bool,
}

impl EmulationJob {
    pub fn new(
        package_id: Uuid,
        services: EmulationServices,
        config: EmulationConfig,
    ) -> Result<Self, JobError> {
        let core = JobCore::create(&config.dirs_base)?;
        tracing::debug!(job_id = %core.id(), package_id = %package_id, "Emulation job created");

        Ok(Self {
            core,
            package_id,
            services,
            config,
            messages: DropOldestQueue::new(CONTROL_QUEUE_CAPACITY),
        })
    }

    pub fn package_id(&self) -> Uuid {
        self.package_id
    }

    /// Queue a control message. When the queue is full the oldest
    /// pending message is dropped.
    pub fn send(&self, message: EmulationMessage) {
        if let Some(dropped) = self.messages.push(message) {
            tracing::debug!(job_id = %self.core.id(), dropped = ?dropped, "Control message dropped");
        }
    }

    /// URL the screen of this session is streamed to.
    pub fn stream_url(&self) -> String {
        format!("{}{}", self.config.stream_base_url, self.core.id())
    }

    pub fn recordings_dir(&self) -> &Path {
        &self.core.dirs().output
    }

    fn open_session_logs(&self) -> io::Result<SessionLogs> {
        let work = &self.core.dirs().work;
        Ok(SessionLogs {
            usb: JobLog::create(work.join("usbpassthrough.txt"))?,
            screen: JobLog::create(work.join("ffmpeg-screen.txt"))?,
            webcam: JobLog::create(work.join("ffmpeg-webcam.txt"))?,
        })
    }

    fn spawn_subtasks(
        &self,
        component_id: &str,
        logs: SessionLogs,
        stop: &CancellationToken,
    ) -> Vec<JoinHandle<()>> {
        let mut subtasks = Vec::with_capacity(3);

        subtasks.push({
            let components = Arc::clone(&self.services.components);
            let connector = Arc::clone(&self.services.device_control);
            let display = Arc::clone(&self.services.display);
            let display_name = self.config.main_display.clone();
            let interval = self.config.passthrough_interval;
            let component_id = component_id.to_string();
            let log = logs.usb;
            let stop = stop.clone();
            tokio::spawn(async move {
                let urls = match components.control_urls(&component_id).await {
                    Ok(urls) => urls,
                    Err(e) => {
                        log.line(format!("Failed to fetch control URLs: {e}")).await;
                        return;
                    }
                };
                let Some(url) = urls.get(QEMU_CONTROL_URL) else {
                    let missing = EaasApiError::MissingControlUrl {
                        component_id,
                        kind: QEMU_CONTROL_URL.to_string(),
                    };
                    log.line(missing.to_string()).await;
                    return;
                };

                let control = connector.connect(url);
                let outcome = run_usb_passthrough(
                    control.as_ref(),
                    display.as_ref(),
                    &display_name,
                    interval,
                    &log,
                    &stop,
                )
                .await;
                match outcome {
                    Ok(batches) => {
                        log.line(format!("Passthrough stopped after {batches} display changes."))
                            .await
                    }
                    Err(e) => log.line(format!("Passthrough failed: {e}")).await,
                }
            })
        });

        subtasks.push({
            let config = self.config.clone();
            let stream_url = self.stream_url();
            let recordings = self.recordings_dir().to_path_buf();
            let log = logs.screen;
            let stop = stop.clone();
            let job_id = self.core.id();
            tokio::spawn(async move {
                let restarts = run_screen_capture(
                    |output: &Path| screen_capture_command(&config, &stream_url, output),
                    &recordings,
                    config.capture_restart,
                    &log,
                    &stop,
                )
                .await;
                tracing::debug!(job_id = %job_id, restarts, "Screen capture stopped");
            })
        });

        if let Some(device) = &self.config.webcam_device {
            let command = webcam_command(
                &self.config.ffmpeg_path,
                device,
                &self.recordings_dir().join(WEBCAM_FILE),
            );
            let log = logs.webcam;
            let stop = stop.clone();
            subtasks.push(tokio::spawn(async move {
                run_webcam_recording(command, &log, &stop).await;
            }));
        }

        subtasks
    }

    /// Serve control messages until `Quit` or cancellation.
    async fn control_loop(&self, component_id: &str, cancel: &CancellationToken) -> SessionEnd {
        let mut save_state = true;
        loop {
            let message = tokio::select! {
                message = self.messages.pop() => message,
                _ = cancel.cancelled() => {
                    return SessionEnd { cancelled: true, save_state };
                }
            };

            match message {
                EmulationMessage::Ping => {
                    if let Err(e) = self.services.components.keepalive(component_id).await {
                        tracing::warn!(
                            job_id = %self.core.id(),
                            component_id = %component_id,
                            error = %e,
                            "Keepalive failed",
                        );
                    }
                }
                EmulationMessage::SaveMachineState => save_state = true,
                EmulationMessage::NoSaveMachineState => save_state = false,
                EmulationMessage::Quit => {
                    return SessionEnd {
                        cancelled: false,
                        save_state,
                    };
                }
            }
        }
    }
}

#[async_trait]
impl Job for EmulationJob {
    type Output = EmulationResult;
    type Detail = EmulationDetail;

    fn core(&self) -> &JobCore<EmulationDetail> {
        &self.core
    }

    async fn start(&self, cancel: CancellationToken) -> Result<EmulationResult, JobError> {
        let log = self.core.log();
        let session_logs = self.open_session_logs()?;

        log.line(format!("Looking up package: {}", self.package_id)).await;
        let package = match self.services.catalog.resolve_package(self.package_id).await {
            Ok(Some(package)) => package,
            Ok(None) => {
                log.line("Package not found.").await;
                return Err(self.core.fail(EmulationDetail::PackageNotFound));
            }
            Err(e) => {
                log.line(format!("Package lookup failed: {e}")).await;
                return Err(self.core.fail(EmulationDetail::PackageNotFound));
            }
        };

        log.line(format!(
            "Starting EaaS environment: {}",
            package.environment_eaas_id
        ))
        .await;
        let request = MachineComponentRequest::new(
            package.environment_eaas_id.as_str(),
            vec![Drive::object(
                self.config.target_drive.as_str(),
                package.package_id.to_string(),
            )],
        );
        let component_id = match self.services.components.start_component(&request).await {
            Ok(id) => id,
            Err(e) => {
                log.line(format!("Failed to start component: {e}")).await;
                return Err(self.core.fail(EmulationDetail::ComponentStartFailed));
            }
        };

        log.line(format!("Component started: {component_id}")).await;
        self.core.transition(JobStatus::Running)?;
        tracing::info!(
            job_id = %self.core.id(),
            component_id = %component_id,
            stream_url = %self.stream_url(),
            "Emulation session running",
        );

        let stop = CancellationToken::new();
        let subtasks = self.spawn_subtasks(&component_id, session_logs, &stop);

        let end = self.control_loop(&component_id, &cancel).await;
        log.line(format!(
            "Machine state persistence requested: {}; not supported, ignoring.",
            end.save_state
        ))
        .await;

        log.line("Stopping component.").await;
        if let Err(e) = self.services.components.stop_component(&component_id).await {
            log.line(format!("Failed to stop component: {e}")).await;
            tracing::warn!(job_id = %self.core.id(), error = %e, "Failed to stop component");
        }

        let status_change = if end.cancelled {
            self.core.settle_failed(EmulationDetail::Cancelled);
            Ok(())
        } else {
            self.core.transition(JobStatus::Success)
        };
        stop.cancel();

        for joined in futures::future::join_all(subtasks).await {
            if let Err(e) = joined {
                tracing::error!(job_id = %self.core.id(), error = %e, "Session subtask failed");
            }
        }
        status_change?;

        if end.cancelled {
            log.line("Session cancelled.").await;
            return Err(JobError::Cancelled);
        }

        let result = collect_recordings(self.recordings_dir()).await?;
        log.line(format!(
            "Session finished with {} recordings.",
            result.video_files.len()
        ))
        .await;
        Ok(result)
    }
}

// ---- private helpers ----

/// Stream the capture card to `stream_url` and record it into `output`.
fn screen_capture_command(config: &EmulationConfig, stream_url: &str, output: &Path) -> ToolCommand {
    ToolCommand::new(&config.ffmpeg_path)
        .args(["-f", config.capture_format.as_str()])
        .args(["-i", config.capture_device.as_str()])
        .args(["-c:v", "vp8", "-f", "rtsp", stream_url])
        .args(["-c:v", "h264", "-y"])
        .arg(output)
}

fn webcam_command(ffmpeg_path: &Path, device: &str, output: &Path) -> ToolCommand {
    ToolCommand::new(ffmpeg_path)
        .args(["-i", device])
        .args(["-c:v", "h264", "-y"])
        .arg(output)
}

/// The largest `screen*` segment and the webcam recording, if present.
async fn collect_recordings(recordings_dir: &Path) -> io::Result<EmulationResult> {
    let mut largest: Option<(u64, PathBuf)> = None;

    let mut entries = tokio::fs::read_dir(recordings_dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        if !entry.file_name().to_string_lossy().starts_with("screen") {
            continue;
        }
        let len = entry.metadata().await?.len();
        if largest.as_ref().map_or(true, |(max, _)| len > *max) {
            largest = Some((len, entry.path()));
        }
    }

    let mut video_files = Vec::with_capacity(2);
    if let Some((_, path)) = largest {
        video_files.push(VideoFile {
            path,
            kind: RecordingType::Screen,
        });
    }

    let webcam = recordings_dir.join(WEBCAM_FILE);
    if tokio::fs::try_exists(&webcam).await? {
        video_files.push(VideoFile {
            path: webcam,
            kind: RecordingType::Webcam,
        });
    }

    Ok(EmulationResult {
        video_files,
        snapshot_id: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> EmulationConfig {
        EmulationConfig {
            dirs_base: PathBuf::from("/srv/emulation"),
            ffmpeg_path: PathBuf::from("ffmpeg"),
            main_display: "card0-HDMI-A-1".into(),
            webcam_device: Some("/dev/video0".into()),
            target_drive: "disk".into(),
            stream_base_url: "rtsp://localhost:8554/".into(),
            capture_format: DEFAULT_CAPTURE_FORMAT.into(),
            capture_device: DEFAULT_CAPTURE_DEVICE.into(),
            passthrough_interval: DEFAULT_PASSTHROUGH_INTERVAL,
            capture_restart: RestartPolicy::default(),
        }
    }

    #[test]
    fn screen_capture_streams_and_records() {
        let command = screen_capture_command(
            &config(),
            "rtsp://localhost:8554/job-1",
            Path::new("/rec/screen0.mp4"),
        );
        assert_eq!(
            command.to_string(),
            "ffmpeg -f decklink -i Intensity Pro 4K -c:v vp8 -f rtsp rtsp://localhost:8554/job-1 -c:v h264 -y /rec/screen0.mp4"
        );
        // The capture device name is a single argument.
        assert_eq!(command.get_args()[3], "Intensity Pro 4K");
    }

    #[test]
    fn webcam_records_h264() {
        let command = webcam_command(
            Path::new("ffmpeg"),
            "/dev/video0",
            Path::new("/rec/webcam.mp4"),
        );
        assert_eq!(
            command.to_string(),
            "ffmpeg -i /dev/video0 -c:v h264 -y /rec/webcam.mp4"
        );
    }

    #[tokio::test]
    async fn largest_screen_segment_is_selected() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("screen0.mp4"), vec![0u8; 10]).unwrap();
        std::fs::write(dir.path().join("screen1.mp4"), vec![0u8; 300]).unwrap();
        std::fs::write(dir.path().join("screen2.mp4"), vec![0u8; 20]).unwrap();
        std::fs::write(dir.path().join("webcam.mp4"), b"cam").unwrap();
        std::fs::write(dir.path().join("notes.txt"), vec![0u8; 1000]).unwrap();

        let result = collect_recordings(dir.path()).await.unwrap();

        assert_eq!(
            result.video_files,
            vec![
                VideoFile {
                    path: dir.path().join("screen1.mp4"),
                    kind: RecordingType::Screen,
                },
                VideoFile {
                    path: dir.path().join("webcam.mp4"),
                    kind: RecordingType::Webcam,
                },
            ]
        );
        assert_eq!(result.snapshot_id, None);
    }

    #[tokio::test]
    async fn empty_recordings_yield_no_files() {
        let dir = tempfile::tempdir().unwrap();
        let result = collect_recordings(dir.path()).await.unwrap();
        assert!(result.video_files.is_empty());
    }

    #[test]
    fn messages_use_boundary_names() {
        let parsed: EmulationMessage = serde_json::from_str("\"NoSaveMachineState\"").unwrap();
        assert_eq!(parsed, EmulationMessage::NoSaveMachineState);
        assert_eq!(EmulationDetail::PackageNotFound.to_string(), "PackageNotFound");
    }
}
