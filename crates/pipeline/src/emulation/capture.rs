//! Screen capture/streaming and webcam recording for emulation sessions.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::log::JobLog;
use crate::process::{SupervisedProcess, ToolCommand};

/// How the screen capture reacts to the capture tool dying.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestartPolicy {
    /// Pause before relaunching.
    pub delay: Duration,
    /// Give up after this many restarts in a row; `None` restarts forever.
    pub max_consecutive_restarts: Option<u32>,
    /// A segment running at least this long resets the consecutive count.
    pub healthy_after: Duration,
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self {
            delay: Duration::from_secs(2),
            max_consecutive_restarts: None,
            healthy_after: Duration::from_secs(30),
        }
    }
}

/// Path of the `n`-th screen recording segment.
pub fn segment_path(recordings_dir: &Path, n: u32) -> PathBuf {
    recordings_dir.join(format!("screen{n}.mp4"))
}

/// Keep the screen capture tool running until `stop` fires.
///
/// `build` produces the invocation for a given segment file. Every
/// unexpected exit starts a new segment (`screen0.mp4`, `screen1.mp4`,
/// ...) after the policy's delay. On `stop` the running tool is
/// interrupted and awaited. Returns the total number of restarts.
pub async fn run_screen_capture<F>(
    build: F,
    recordings_dir: &Path,
    policy: RestartPolicy,
    log: &JobLog,
    stop: &CancellationToken,
) -> u32
where
    F: Fn(&Path) -> ToolCommand,
{
    let mut segment = 0u32;
    let mut restarts = 0u32;
    let mut consecutive = 0u32;

    loop {
        if stop.is_cancelled() {
            return restarts;
        }

        let command = build(&segment_path(recordings_dir, segment));
        let launched = Instant::now();
        match command.spawn(log) {
            Ok(mut capture) => {
                if run_until_exit_or_stop(&mut capture, log, stop).await {
                    return restarts;
                }
            }
            Err(e) => log.line(format!("## Failed to launch capture tool: {e}")).await,
        }

        if stop.is_cancelled() {
            return restarts;
        }
        if launched.elapsed() >= policy.healthy_after {
            consecutive = 0;
        }
        if policy.max_consecutive_restarts.is_some_and(|max| consecutive >= max) {
            log.line(format!(
                "## Capture tool failed {consecutive} times in a row, giving up."
            ))
            .await;
            return restarts;
        }

        consecutive += 1;
        restarts += 1;
        segment += 1;
        log.line(format!(
            "## Restarting capture tool into {}...",
            segment_path(recordings_dir, segment).display()
        ))
        .await;

        tokio::select! {
            _ = tokio::time::sleep(policy.delay) => {}
            _ = stop.cancelled() => return restarts,
        }
    }
}

/// Record the webcam until `stop` fires. No restarts.
pub async fn run_webcam_recording(command: ToolCommand, log: &JobLog, stop: &CancellationToken) {
    match command.spawn(log) {
        Ok(mut recorder) => {
            run_until_exit_or_stop(&mut recorder, log, stop).await;
        }
        Err(e) => log.line(format!("## Failed to launch webcam recorder: {e}")).await,
    }
}

/// Returns `true` if `stop` fired (the tool was interrupted), `false`
/// if the tool exited on its own.
async fn run_until_exit_or_stop(
    process: &mut SupervisedProcess,
    log: &JobLog,
    stop: &CancellationToken,
) -> bool {
    let exited = tokio::select! {
        status = process.wait() => Some(status),
        _ = stop.cancelled() => None,
    };

    match exited {
        Some(status) => {
            let description = match status {
                Ok(status) => status.to_string(),
                Err(e) => e.to_string(),
            };
            log.line(format!("## {} exited ({description})", process.program()))
                .await;
            false
        }
        None => {
            if let Err(e) = process.stop().await {
                log.line(format!("## Failed to stop {}: {e}", process.program()))
                    .await;
            }
            true
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use std::os::unix::fs::PermissionsExt;

    use super::*;

    fn script(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    /// Writes the segment named by its only argument, then exits.
    fn crashing_capture(dir: &Path) -> PathBuf {
        script(dir, "capture.sh", "echo frame > \"$1\"\nexit 1")
    }

    fn segments(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .filter(|n| n.starts_with("screen"))
            .collect();
        names.sort();
        names
    }

    #[tokio::test]
    async fn crash_restarts_into_next_segment_until_stopped() {
        let tools = tempfile::tempdir().unwrap();
        let recordings = tempfile::tempdir().unwrap();
        let log = JobLog::create(tools.path().join("capture-log.txt")).unwrap();
        let program = crashing_capture(tools.path());
        let stop = CancellationToken::new();

        let policy = RestartPolicy {
            delay: Duration::from_millis(10),
            ..RestartPolicy::default()
        };
        let task = {
            let recordings = recordings.path().to_path_buf();
            let log = log.clone();
            let stop = stop.clone();
            tokio::spawn(async move {
                run_screen_capture(
                    |out: &Path| ToolCommand::new(&program).arg(out),
                    &recordings,
                    policy,
                    &log,
                    &stop,
                )
                .await
            })
        };

        tokio::time::timeout(Duration::from_secs(10), async {
            while !segment_path(recordings.path(), 2).exists() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("capture should have been restarted twice");

        stop.cancel();
        let restarts = task.await.unwrap();
        assert!(restarts >= 2);

        let after_stop = segments(recordings.path());
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(segments(recordings.path()), after_stop);

        let content = tokio::fs::read_to_string(log.path()).await.unwrap();
        assert!(content.contains("## Restarting capture tool into"));
        assert!(content.contains("screen1.mp4"));
    }

    #[tokio::test]
    async fn restart_limit_is_honoured() {
        let tools = tempfile::tempdir().unwrap();
        let recordings = tempfile::tempdir().unwrap();
        let log = JobLog::create(tools.path().join("capture-log.txt")).unwrap();
        let program = crashing_capture(tools.path());

        let policy = RestartPolicy {
            delay: Duration::from_millis(1),
            max_consecutive_restarts: Some(2),
            ..RestartPolicy::default()
        };
        let restarts = tokio::time::timeout(
            Duration::from_secs(10),
            run_screen_capture(
                |out: &Path| ToolCommand::new(&program).arg(out),
                recordings.path(),
                policy,
                &log,
                &CancellationToken::new(),
            ),
        )
        .await
        .expect("capture should give up");

        assert_eq!(restarts, 2);
        assert_eq!(
            segments(recordings.path()),
            vec!["screen0.mp4", "screen1.mp4", "screen2.mp4"]
        );
        let content = tokio::fs::read_to_string(log.path()).await.unwrap();
        assert!(content.contains("giving up"));
    }

    #[tokio::test]
    async fn healthy_segment_resets_consecutive_failures() {
        let tools = tempfile::tempdir().unwrap();
        let recordings = tempfile::tempdir().unwrap();
        let log = JobLog::create(tools.path().join("capture-log.txt")).unwrap();
        // screen1 runs for a while before dying, every other segment crashes at once.
        let program = script(
            tools.path(),
            "capture.sh",
            "echo frame > \"$1\"\ncase \"$1\" in *screen1.mp4) sleep 0.5 ;; esac\nexit 1",
        );

        let policy = RestartPolicy {
            delay: Duration::from_millis(1),
            max_consecutive_restarts: Some(1),
            healthy_after: Duration::from_millis(250),
        };
        let restarts = tokio::time::timeout(
            Duration::from_secs(10),
            run_screen_capture(
                |out: &Path| ToolCommand::new(&program).arg(out),
                recordings.path(),
                policy,
                &log,
                &CancellationToken::new(),
            ),
        )
        .await
        .expect("capture should give up");

        assert_eq!(restarts, 2);
        assert_eq!(
            segments(recordings.path()),
            vec!["screen0.mp4", "screen1.mp4", "screen2.mp4"]
        );
        let content = tokio::fs::read_to_string(log.path()).await.unwrap();
        assert!(content.contains("failed 1 times in a row, giving up"));
    }

    #[tokio::test]
    async fn stop_interrupts_running_capture_without_restart() {
        let tools = tempfile::tempdir().unwrap();
        let recordings = tempfile::tempdir().unwrap();
        let log = JobLog::create(tools.path().join("capture-log.txt")).unwrap();
        let program = script(tools.path(), "capture.sh", "echo frame > \"$1\"\nexec sleep 30");
        let stop = CancellationToken::new();

        let canceller = stop.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            canceller.cancel();
        });

        let restarts = tokio::time::timeout(
            Duration::from_secs(10),
            run_screen_capture(
                |out: &Path| ToolCommand::new(&program).arg(out),
                recordings.path(),
                RestartPolicy::default(),
                &log,
                &stop,
            ),
        )
        .await
        .expect("capture should stop promptly");

        assert_eq!(restarts, 0);
        assert_eq!(segments(recordings.path()), vec!["screen0.mp4"]);
    }
}
