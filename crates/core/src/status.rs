//! Lifecycle status shared by every long-running job.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Job execution status.
///
/// Legal moves are encoded in [`JobStatus::can_transition_to`]:
///
/// - `Initialization -> Running`
/// - `Running <-> WaitingForInput`, `Running <-> WaitingForProcess`
/// - `Running -> Success`
/// - any non-terminal status `-> Failed`
///
/// `Restarting` is reserved and never entered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobStatus {
    Initialization,
    Running,
    WaitingForInput,
    WaitingForProcess,
    Failed,
    Success,
    Restarting,
}

impl JobStatus {
    /// Every status value, in declaration order.
    pub const ALL: [JobStatus; 7] = [
        JobStatus::Initialization,
        JobStatus::Running,
        JobStatus::WaitingForInput,
        JobStatus::WaitingForProcess,
        JobStatus::Failed,
        JobStatus::Success,
        JobStatus::Restarting,
    ];

    /// `Success` and `Failed` are terminal; a job may only be discarded
    /// from the registry in one of these.
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Success | JobStatus::Failed)
    }

    pub fn can_transition_to(self, next: JobStatus) -> bool {
        use JobStatus::*;
        match (self, next) {
            (Initialization, Running) => true,
            (Running, WaitingForInput | WaitingForProcess | Success) => true,
            (WaitingForInput | WaitingForProcess, Running) => true,
            (from, Failed) => !from.is_terminal(),
            _ => false,
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            JobStatus::Initialization => "Initialization",
            JobStatus::Running => "Running",
            JobStatus::WaitingForInput => "WaitingForInput",
            JobStatus::WaitingForProcess => "WaitingForProcess",
            JobStatus::Failed => "Failed",
            JobStatus::Success => "Success",
            JobStatus::Restarting => "Restarting",
        };
        f.write_str(name)
    }
}
