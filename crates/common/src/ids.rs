//! Identifier hierarchy for jobs, tasks and task attempts.
//!
//! Each child identifier owns its parent by value, so resolving the
//! innermost id always walks the full chain: attempt -> task -> job.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Cluster-scoped application identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ApplicationId {
    pub cluster_timestamp: u64,
    pub id: u32,
}

impl ApplicationId {
    pub fn new(cluster_timestamp: u64, id: u32) -> Self {
        Self {
            cluster_timestamp,
            id,
        }
    }
}

impl fmt::Display for ApplicationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "application_{}_{:04}", self.cluster_timestamp, self.id)
    }
}

/// One attempt at running an application master. The client secret is
/// scoped to this identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ApplicationAttemptId {
    pub app: ApplicationId,
    pub attempt: u32,
}

impl ApplicationAttemptId {
    pub fn new(app: ApplicationId, attempt: u32) -> Self {
        Self { app, attempt }
    }
}

impl fmt::Display for ApplicationAttemptId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "appattempt_{}_{:04}_{:06}",
            self.app.cluster_timestamp, self.app.id, self.attempt
        )
    }
}

/// Identifier of a job. Globally unique within one service lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId {
    pub app: ApplicationId,
    pub id: u32,
}

impl JobId {
    pub fn new(app: ApplicationId, id: u32) -> Self {
        Self { app, id }
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "job_{}_{:04}", self.app.cluster_timestamp, self.id)
    }
}

/// The subdivision a task belongs to. Used as the filter tag for
/// aggregated task-report queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskKind {
    Map,
    Reduce,
}

impl TaskKind {
    fn tag(&self) -> char {
        match self {
            TaskKind::Map => 'm',
            TaskKind::Reduce => 'r',
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskKind::Map => write!(f, "MAP"),
            TaskKind::Reduce => write!(f, "REDUCE"),
        }
    }
}

/// Identifier of a task. Only meaningful relative to its owning job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskId {
    pub job: JobId,
    pub kind: TaskKind,
    pub id: u32,
}

impl TaskId {
    pub fn new(job: JobId, kind: TaskKind, id: u32) -> Self {
        Self { job, kind, id }
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "task_{}_{:04}_{}_{:06}",
            self.job.app.cluster_timestamp,
            self.job.id,
            self.kind.tag(),
            self.id
        )
    }
}

/// Identifier of a single execution attempt of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskAttemptId {
    pub task: TaskId,
    pub id: u32,
}

impl TaskAttemptId {
    pub fn new(task: TaskId, id: u32) -> Self {
        Self { task, id }
    }
}

impl fmt::Display for TaskAttemptId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "attempt_{}_{:04}_{}_{:06}_{}",
            self.task.job.app.cluster_timestamp,
            self.task.job.id,
            self.task.kind.tag(),
            self.task.id,
            self.id
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job() -> JobId {
        JobId::new(ApplicationId::new(1692787200123, 7), 7)
    }

    #[test]
    fn display_formats_follow_lineage() {
        let job = job();
        let task = TaskId::new(job, TaskKind::Map, 3);
        let attempt = TaskAttemptId::new(task, 0);

        assert_eq!(job.to_string(), "job_1692787200123_0007");
        assert_eq!(task.to_string(), "task_1692787200123_0007_m_000003");
        assert_eq!(
            attempt.to_string(),
            "attempt_1692787200123_0007_m_000003_0"
        );
    }

    #[test]
    fn child_ids_carry_their_parents() {
        let task = TaskId::new(job(), TaskKind::Reduce, 1);
        let attempt = TaskAttemptId::new(task, 2);

        assert_eq!(attempt.task, task);
        assert_eq!(attempt.task.job, job());
    }

    #[test]
    fn ids_roundtrip_through_json() {
        let attempt = TaskAttemptId::new(TaskId::new(job(), TaskKind::Map, 0), 1);
        let encoded = serde_json::to_string(&attempt).unwrap();
        let decoded: TaskAttemptId = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, attempt);
    }
}
