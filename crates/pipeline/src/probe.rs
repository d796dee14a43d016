//! Startup probing of external tools.
//!
//! Each tool is run once with a version/info flag; its output is parsed
//! with regexes to decide availability and record a version string.

use std::path::Path;
use std::sync::{PoisonError, RwLock};
use std::time::Duration;

use regex::Regex;
use tokio::process::Command;

/// Upper bound for a single probe invocation.
const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Shown when a tool has not reported a version.
pub const UNKNOWN_VERSION: &str = "N/A";

/// Captured output of a probe run.
#[derive(Debug, Clone, Default)]
pub struct ProbeOutput {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

impl ProbeOutput {
    /// All output lines, stdout first.
    pub fn lines(&self) -> impl Iterator<Item = &str> {
        self.stdout.lines().chain(self.stderr.lines())
    }
}

/// Run `program args...` and capture its output.
///
/// Returns `None` when the binary is missing, cannot be launched or does
/// not finish within the probe timeout.
pub async fn run_probe(program: &Path, args: &[&str]) -> Option<ProbeOutput> {
    if !program.exists() {
        tracing::debug!(program = %program.display(), "Probe skipped, binary not found");
        return None;
    }

    let output = Command::new(program)
        .args(args)
        .stdin(std::process::Stdio::null())
        .kill_on_drop(true)
        .output();

    match tokio::time::timeout(PROBE_TIMEOUT, output).await {
        Ok(Ok(output)) => Some(ProbeOutput {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        }),
        Ok(Err(e)) => {
            tracing::warn!(program = %program.display(), error = %e, "Probe failed to launch");
            None
        }
        Err(_) => {
            tracing::warn!(program = %program.display(), "Probe timed out");
            None
        }
    }
}

/// Join the capture groups of the first line matching `pattern` with dots.
pub fn parse_version<'a>(pattern: &Regex, lines: impl IntoIterator<Item = &'a str>) -> Option<String> {
    lines.into_iter().find_map(|line| {
        let captures = pattern.captures(line)?;
        let parts: Vec<&str> = captures
            .iter()
            .skip(1)
            .flatten()
            .map(|m| m.as_str())
            .collect();
        (!parts.is_empty()).then(|| parts.join("."))
    })
}

/// Availability as determined by the last probe.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Availability {
    pub available: bool,
    pub version: Option<String>,
}

/// Interior-mutable probe result shared by a tool instance.
#[derive(Debug, Default)]
pub struct ProbeState(RwLock<Availability>);

impl ProbeState {
    pub fn get(&self) -> Availability {
        self.0
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn set(&self, availability: Availability) {
        *self.0.write().unwrap_or_else(PoisonError::into_inner) = availability;
    }

    pub fn is_available(&self) -> bool {
        self.get().available
    }

    pub fn version_or_unknown(&self) -> String {
        self.get()
            .version
            .unwrap_or_else(|| UNKNOWN_VERSION.to_string())
    }
}
