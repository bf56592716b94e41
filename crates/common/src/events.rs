//! Command events posted to the master's event bus.
//!
//! These are requested mutations, not applied ones: the client service
//! enqueues them and returns immediately. Processing order and outcome
//! belong to the state machines consuming the bus.

use serde::{Deserialize, Serialize};

use crate::ids::{JobId, TaskAttemptId, TaskId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AppEvent {
    /// Records the textual reason ahead of the job state transition.
    JobDiagnosticsUpdate { job: JobId, diagnostic: String },
    JobKill { job: JobId },
    TaskKill { task: TaskId },
    AttemptKill { attempt: TaskAttemptId, message: String },
    AttemptFail { attempt: TaskAttemptId, message: String },
}

impl AppEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            AppEvent::JobDiagnosticsUpdate { .. } => "job_diagnostics_update",
            AppEvent::JobKill { .. } => "job_kill",
            AppEvent::TaskKill { .. } => "task_kill",
            AppEvent::AttemptKill { .. } => "attempt_kill",
            AppEvent::AttemptFail { .. } => "attempt_fail",
        }
    }
}
