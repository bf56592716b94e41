//! Point-in-time report snapshots served to clients.
//!
//! Reports are value objects copied at query time. Two separate calls
//! may observe different snapshots; no cross-call consistency is
//! promised.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::ids::{JobId, TaskAttemptId, TaskId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    New,
    Inited,
    Running,
    Succeeded,
    Failed,
    Killed,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    New,
    Scheduled,
    Running,
    Succeeded,
    Failed,
    Killed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskAttemptState {
    New,
    Running,
    Succeeded,
    Failed,
    Killed,
}

/// Named counter groups. Every task report carries a full set, which
/// is why the aggregated task-report query is single-flight on the
/// serving side.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counters {
    groups: BTreeMap<String, BTreeMap<String, i64>>,
}

impl Counters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment(&mut self, group: &str, counter: &str, delta: i64) {
        *self
            .groups
            .entry(group.to_string())
            .or_default()
            .entry(counter.to_string())
            .or_insert(0) += delta;
    }

    pub fn value(&self, group: &str, counter: &str) -> i64 {
        self.groups
            .get(group)
            .and_then(|g| g.get(counter))
            .copied()
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobReport {
    pub job: JobId,
    pub state: JobState,
    pub map_progress: f32,
    pub reduce_progress: f32,
    pub start_time_ms: u64,
    pub finish_time_ms: u64,
    pub user: String,
    pub diagnostics: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskReport {
    pub task: TaskId,
    pub state: TaskState,
    pub progress: f32,
    pub start_time_ms: u64,
    pub finish_time_ms: u64,
    pub counters: Counters,
    pub running_attempts: Vec<TaskAttemptId>,
    pub successful_attempt: Option<TaskAttemptId>,
    pub diagnostics: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskAttemptReport {
    pub attempt: TaskAttemptId,
    pub state: TaskAttemptState,
    pub progress: f32,
    pub start_time_ms: u64,
    pub finish_time_ms: u64,
    pub counters: Counters,
    pub diagnostics: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionEventStatus {
    Succeeded,
    Failed,
    Killed,
    Obsolete,
}

/// One entry of a job's ordered completion-event log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskAttemptCompletionEvent {
    pub event_id: u32,
    pub attempt: TaskAttemptId,
    pub status: CompletionEventStatus,
    pub attempt_run_time_ms: u64,
}
