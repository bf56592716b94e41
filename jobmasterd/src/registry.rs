//! Entity registry consumed by the client service.
//!
//! The registry owns the live job/task/attempt entities; the service
//! only borrows them for the duration of a single call and copies
//! report snapshots out. Reads are safe under concurrent access.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use jobmaster_common::ids::{ApplicationAttemptId, JobId, TaskAttemptId, TaskId, TaskKind};
use jobmaster_common::records::{
    Counters, JobReport, TaskAttemptCompletionEvent, TaskAttemptReport, TaskReport,
};

/// Registry seam between the client service and the master's state.
pub trait AppContext: Send + Sync {
    fn application_attempt_id(&self) -> ApplicationAttemptId;

    fn job(&self, id: &JobId) -> Option<Arc<JobEntry>>;

    fn job_ids(&self) -> Vec<JobId>;
}

/// A job as the registry exposes it: a report snapshot, aggregated
/// counters, a task mapping and the completion-event log.
#[derive(Debug)]
pub struct JobEntry {
    pub id: JobId,
    pub report: JobReport,
    pub counters: Counters,
    tasks: HashMap<TaskId, Arc<TaskEntry>>,
    completion_events: Vec<TaskAttemptCompletionEvent>,
}

impl JobEntry {
    pub fn new(id: JobId, report: JobReport, counters: Counters) -> Self {
        Self {
            id,
            report,
            counters,
            tasks: HashMap::new(),
            completion_events: Vec::new(),
        }
    }

    pub fn with_task(mut self, task: TaskEntry) -> Self {
        self.tasks.insert(task.id, Arc::new(task));
        self
    }

    pub fn with_completion_event(mut self, event: TaskAttemptCompletionEvent) -> Self {
        self.completion_events.push(event);
        self
    }

    pub fn task(&self, id: &TaskId) -> Option<Arc<TaskEntry>> {
        self.tasks.get(id).cloned()
    }

    /// Tasks carrying the given kind tag, in stable id order.
    pub fn tasks_of_kind(&self, kind: TaskKind) -> Vec<Arc<TaskEntry>> {
        let mut tasks: Vec<_> = self
            .tasks
            .values()
            .filter(|task| task.id.kind == kind)
            .cloned()
            .collect();
        tasks.sort_by_key(|task| task.id.id);
        tasks
    }

    /// Bounded slice of the ordered completion-event log. Requests
    /// beyond the available range yield an empty slice, not an error.
    pub fn completion_events(&self, from: usize, max: usize) -> Vec<TaskAttemptCompletionEvent> {
        self.completion_events
            .iter()
            .skip(from)
            .take(max)
            .cloned()
            .collect()
    }
}

#[derive(Debug)]
pub struct TaskEntry {
    pub id: TaskId,
    pub report: TaskReport,
    attempts: HashMap<TaskAttemptId, Arc<AttemptEntry>>,
}

impl TaskEntry {
    pub fn new(id: TaskId, report: TaskReport) -> Self {
        Self {
            id,
            report,
            attempts: HashMap::new(),
        }
    }

    pub fn with_attempt(mut self, attempt: AttemptEntry) -> Self {
        self.attempts.insert(attempt.id, Arc::new(attempt));
        self
    }

    pub fn attempt(&self, id: &TaskAttemptId) -> Option<Arc<AttemptEntry>> {
        self.attempts.get(id).cloned()
    }
}

#[derive(Debug)]
pub struct AttemptEntry {
    pub id: TaskAttemptId,
    pub report: TaskAttemptReport,
}

impl AttemptEntry {
    pub fn new(id: TaskAttemptId, report: TaskAttemptReport) -> Self {
        Self { id, report }
    }
}

/// In-memory registry used by the daemon binary and the test suites.
pub struct InMemoryAppContext {
    attempt_id: ApplicationAttemptId,
    jobs: RwLock<HashMap<JobId, Arc<JobEntry>>>,
}

impl InMemoryAppContext {
    pub fn new(attempt_id: ApplicationAttemptId) -> Self {
        Self {
            attempt_id,
            jobs: RwLock::new(HashMap::new()),
        }
    }

    pub fn insert_job(&self, job: JobEntry) {
        self.jobs
            .write()
            .expect("registry lock poisoned")
            .insert(job.id, Arc::new(job));
    }
}

impl AppContext for InMemoryAppContext {
    fn application_attempt_id(&self) -> ApplicationAttemptId {
        self.attempt_id
    }

    fn job(&self, id: &JobId) -> Option<Arc<JobEntry>> {
        self.jobs
            .read()
            .expect("registry lock poisoned")
            .get(id)
            .cloned()
    }

    fn job_ids(&self) -> Vec<JobId> {
        let mut ids: Vec<_> = self
            .jobs
            .read()
            .expect("registry lock poisoned")
            .keys()
            .copied()
            .collect();
        ids.sort_by_key(|id| id.id);
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jobmaster_common::ids::ApplicationId;
    use jobmaster_common::records::{CompletionEventStatus, JobState, TaskState};

    fn job_id() -> JobId {
        JobId::new(ApplicationId::new(100, 1), 1)
    }

    fn job_report(id: JobId) -> JobReport {
        JobReport {
            job: id,
            state: JobState::Running,
            map_progress: 0.0,
            reduce_progress: 0.0,
            start_time_ms: 0,
            finish_time_ms: 0,
            user: "tester".to_string(),
            diagnostics: String::new(),
        }
    }

    fn task_report(id: TaskId) -> TaskReport {
        TaskReport {
            task: id,
            state: TaskState::Running,
            progress: 0.0,
            start_time_ms: 0,
            finish_time_ms: 0,
            counters: Counters::new(),
            running_attempts: Vec::new(),
            successful_attempt: None,
            diagnostics: Vec::new(),
        }
    }

    #[test]
    fn tasks_filter_by_kind_in_id_order() {
        let job = job_id();
        let m0 = TaskId::new(job, TaskKind::Map, 0);
        let m1 = TaskId::new(job, TaskKind::Map, 1);
        let r0 = TaskId::new(job, TaskKind::Reduce, 0);

        let entry = JobEntry::new(job, job_report(job), Counters::new())
            .with_task(TaskEntry::new(m1, task_report(m1)))
            .with_task(TaskEntry::new(r0, task_report(r0)))
            .with_task(TaskEntry::new(m0, task_report(m0)));

        let maps: Vec<_> = entry
            .tasks_of_kind(TaskKind::Map)
            .into_iter()
            .map(|t| t.id)
            .collect();
        assert_eq!(maps, vec![m0, m1]);
        assert_eq!(entry.tasks_of_kind(TaskKind::Reduce).len(), 1);
    }

    #[test]
    fn completion_events_clamp_to_available_range() {
        let job = job_id();
        let task = TaskId::new(job, TaskKind::Map, 0);
        let mut entry = JobEntry::new(job, job_report(job), Counters::new());
        for event_id in 0..4 {
            entry = entry.with_completion_event(TaskAttemptCompletionEvent {
                event_id,
                attempt: TaskAttemptId::new(task, event_id),
                status: CompletionEventStatus::Succeeded,
                attempt_run_time_ms: 10,
            });
        }

        assert_eq!(entry.completion_events(0, 2).len(), 2);
        assert_eq!(entry.completion_events(3, 10).len(), 1);
        assert!(entry.completion_events(4, 10).is_empty());
        assert!(entry.completion_events(100, 1).is_empty());
    }

    #[test]
    fn context_lookup_misses_are_none() {
        let context = InMemoryAppContext::new(ApplicationAttemptId::new(
            ApplicationId::new(100, 1),
            1,
        ));
        assert!(context.job(&job_id()).is_none());
        assert!(context.job_ids().is_empty());
    }
}
