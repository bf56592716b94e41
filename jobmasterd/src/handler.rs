//! Protocol handler for the client-facing endpoint.
//!
//! Every inbound envelope is HMAC-verified, optionally gated by the
//! service policy, resolved against the registry and routed to a
//! read-only query or the command dispatcher. Mutations never happen
//! inline: commands become events on the master's bus.

use std::sync::Arc;

use anyhow::Result;
use base64::{engine::general_purpose, Engine as _};
use hmac::{Hmac, Mac};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::Sha256;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

use jobmaster_common::events::AppEvent;
use jobmaster_common::ids::{JobId, TaskAttemptId, TaskId, TaskKind};
use jobmaster_common::records::{
    Counters, JobReport, TaskAttemptCompletionEvent, TaskAttemptReport, TaskReport,
};

use crate::acl::{PolicyAction, ServicePolicy};
use crate::error::RemoteError;
use crate::events::EventBus;
use crate::registry::{AppContext, AttemptEntry, JobEntry, TaskEntry};

type HmacSha256 = Hmac<Sha256>;

/// Ident the daemon answers with.
pub const DAEMON_IDENT: &str = "jobmaster";

const LOG_SNIPPET_LIMIT: usize = 512;

/// Signed protocol envelope. One JSON object per line on the wire.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Msg {
    pub msg_type: String,
    pub msg_id: String,
    pub from: String,
    pub to: String,
    pub ts: u64,
    pub nonce: String,
    pub hmac: String,
    pub payload: serde_json::Value,
}

pub struct ProtocolHandler {
    context: Arc<dyn AppContext>,
    events: EventBus,
    policy: Option<ServicePolicy>,
    secret: String,
    /// Guards the task-report aggregation only. Each report carries a
    /// full counter set, so concurrent assemblies are the dominant
    /// memory risk of the service. No timeout: callers queue behind
    /// whatever aggregation is in flight.
    task_reports_lock: Mutex<()>,
}

impl ProtocolHandler {
    pub fn new(
        context: Arc<dyn AppContext>,
        events: EventBus,
        policy: Option<ServicePolicy>,
        secret: String,
    ) -> Self {
        Self {
            context,
            events,
            policy,
            secret,
            task_reports_lock: Mutex::new(()),
        }
    }

    pub fn secret(&self) -> &str {
        &self.secret
    }

    // --- entity resolution chain ---

    fn resolve_job(&self, id: &JobId, _modify_access: bool) -> Option<Arc<JobEntry>> {
        self.context.job(id)
    }

    /// Read paths that transitively need the job surface its absence
    /// as a generic remote error, not NotFound. Only getJobReport
    /// tolerates a missing job; the asymmetry is deliberate.
    fn job_for_read(&self, id: &JobId) -> Result<Arc<JobEntry>, RemoteError> {
        self.resolve_job(id, false)
            .ok_or_else(|| RemoteError::Remote(format!("Job {id} not found")))
    }

    fn resolve_task(
        &self,
        id: &TaskId,
        modify_access: bool,
    ) -> Result<Arc<TaskEntry>, RemoteError> {
        let job = self
            .resolve_job(&id.job, modify_access)
            .ok_or_else(|| RemoteError::Remote(format!("Job {} not found", id.job)))?;
        job.task(id)
            .ok_or_else(|| RemoteError::NotFound(format!("Unknown Task {id}")))
    }

    fn resolve_attempt(
        &self,
        id: &TaskAttemptId,
        modify_access: bool,
    ) -> Result<Arc<AttemptEntry>, RemoteError> {
        let task = self.resolve_task(&id.task, modify_access)?;
        task.attempt(id)
            .ok_or_else(|| RemoteError::NotFound(format!("Unknown TaskAttempt {id}")))
    }

    // --- query handlers ---

    pub fn get_counters(&self, job_id: &JobId) -> Result<Counters, RemoteError> {
        Ok(self.job_for_read(job_id)?.counters.clone())
    }

    /// Absent job yields an empty report, never an error.
    pub fn get_job_report(&self, job_id: &JobId) -> Result<Option<JobReport>, RemoteError> {
        Ok(self.resolve_job(job_id, false).map(|job| job.report.clone()))
    }

    pub fn get_task_report(&self, task_id: &TaskId) -> Result<TaskReport, RemoteError> {
        Ok(self.resolve_task(task_id, false)?.report.clone())
    }

    pub fn get_task_attempt_report(
        &self,
        attempt_id: &TaskAttemptId,
    ) -> Result<TaskAttemptReport, RemoteError> {
        Ok(self.resolve_attempt(attempt_id, false)?.report.clone())
    }

    pub fn get_diagnostics(&self, attempt_id: &TaskAttemptId) -> Result<Vec<String>, RemoteError> {
        Ok(self.resolve_attempt(attempt_id, false)?.report.diagnostics.clone())
    }

    pub fn get_completion_events(
        &self,
        job_id: &JobId,
        from_event_id: usize,
        max_events: usize,
    ) -> Result<Vec<TaskAttemptCompletionEvent>, RemoteError> {
        Ok(self
            .job_for_read(job_id)?
            .completion_events(from_event_id, max_events))
    }

    /// Single-flight aggregation: at most one call assembles reports
    /// at a time, across all callers and all jobs.
    pub async fn get_task_reports(
        &self,
        job_id: &JobId,
        kind: TaskKind,
    ) -> Result<Vec<TaskReport>, RemoteError> {
        let job = self.job_for_read(job_id)?;
        let tasks = job.tasks_of_kind(kind);
        info!(
            job = %job_id,
            kind = %kind,
            report_size = tasks.len(),
            "assembling task reports"
        );

        let _guard = self.task_reports_lock.lock().await;
        Ok(tasks.iter().map(|task| task.report.clone()).collect())
    }

    // --- command dispatcher ---

    pub fn kill_job(&self, job_id: &JobId) -> Result<(), RemoteError> {
        let message = format!("Kill job {job_id} received from client");
        info!("{message}");
        self.resolve_job(job_id, true)
            .ok_or_else(|| RemoteError::NotFound(format!("Unknown Job {job_id}")))?;
        // The textual reason is recorded ahead of the state transition.
        self.events.post(AppEvent::JobDiagnosticsUpdate {
            job: *job_id,
            diagnostic: message,
        });
        self.events.post(AppEvent::JobKill { job: *job_id });
        Ok(())
    }

    pub fn kill_task(&self, task_id: &TaskId) -> Result<(), RemoteError> {
        let message = format!("Kill task {task_id} received from client");
        info!("{message}");
        self.resolve_task(task_id, true)?;
        self.events.post(AppEvent::TaskKill { task: *task_id });
        Ok(())
    }

    pub fn kill_task_attempt(&self, attempt_id: &TaskAttemptId) -> Result<(), RemoteError> {
        let message = format!("Kill attempt {attempt_id} received from client");
        info!("{message}");
        self.resolve_attempt(attempt_id, true)?;
        self.events.post(AppEvent::AttemptKill {
            attempt: *attempt_id,
            message,
        });
        Ok(())
    }

    pub fn fail_task_attempt(&self, attempt_id: &TaskAttemptId) -> Result<(), RemoteError> {
        let message = format!("Fail attempt {attempt_id} received from client");
        info!("{message}");
        self.resolve_attempt(attempt_id, true)?;
        self.events.post(AppEvent::AttemptFail {
            attempt: *attempt_id,
            message,
        });
        Ok(())
    }

    // --- unsupported-operation guard ---

    fn delegation_token_guard(verb: &str) -> RemoteError {
        RemoteError::Unsupported(format!(
            "job master not authorized to {verb} delegation token"
        ))
    }

    // --- wire dispatch ---

    /// Verify, authorize and dispatch one envelope. `None` means no
    /// response is sent (invalid HMAC or unknown message type).
    pub async fn handle_message(&self, msg: Msg) -> Result<Option<Msg>> {
        let check = verify_hmac_detailed(&msg, &self.secret)?;
        if !check.valid {
            warn!(
                from = %msg.from,
                msg_type = %msg.msg_type,
                msg_id = %msg.msg_id,
                provided_sig = %shorten_sig(&check.provided),
                expected_sig = %shorten_sig(&check.expected),
                body = %summarize_body(&check.body),
                "Invalid HMAC from client"
            );
            return Ok(None);
        }

        let modify = matches!(
            msg.msg_type.as_str(),
            "KILL_JOB" | "KILL_TASK" | "KILL_TASK_ATTEMPT" | "FAIL_TASK_ATTEMPT"
        );
        if let Some(policy) = &self.policy {
            if policy.eval(&msg.from, modify) == PolicyAction::Deny {
                warn!(from = %msg.from, msg_type = %msg.msg_type, "Denied by service policy");
                let err = RemoteError::Forbidden(msg.from.clone());
                return Ok(Some(error_response(&msg, &err)));
            }
        }

        match self.dispatch(&msg).await {
            Ok(response) => Ok(response),
            Err(err) => Ok(Some(error_response(&msg, &err))),
        }
    }

    async fn dispatch(&self, msg: &Msg) -> Result<Option<Msg>, RemoteError> {
        let response = match msg.msg_type.as_str() {
            "GET_COUNTERS" => {
                let job_id: JobId = field(msg, "job_id")?;
                let counters = self.get_counters(&job_id)?;
                report_response(msg, json!({ "counters": counters }))
            }
            "GET_JOB_REPORT" => {
                let job_id: JobId = field(msg, "job_id")?;
                let report = self.get_job_report(&job_id)?;
                report_response(msg, json!({ "report": report }))
            }
            "GET_TASK_REPORT" => {
                let task_id: TaskId = field(msg, "task_id")?;
                let report = self.get_task_report(&task_id)?;
                report_response(msg, json!({ "report": report }))
            }
            "GET_TASK_ATTEMPT_REPORT" => {
                let attempt_id: TaskAttemptId = field(msg, "attempt_id")?;
                let report = self.get_task_attempt_report(&attempt_id)?;
                report_response(msg, json!({ "report": report }))
            }
            "GET_DIAGNOSTICS" => {
                let attempt_id: TaskAttemptId = field(msg, "attempt_id")?;
                let diagnostics = self.get_diagnostics(&attempt_id)?;
                report_response(msg, json!({ "diagnostics": diagnostics }))
            }
            "GET_COMPLETION_EVENTS" => {
                let job_id: JobId = field(msg, "job_id")?;
                let from_event_id: u32 = field(msg, "from_event_id")?;
                let max_events: u32 = field(msg, "max_events")?;
                let events = self.get_completion_events(
                    &job_id,
                    from_event_id as usize,
                    max_events as usize,
                )?;
                report_response(msg, json!({ "events": events }))
            }
            "GET_TASK_REPORTS" => {
                let job_id: JobId = field(msg, "job_id")?;
                let kind: TaskKind = field(msg, "task_kind")?;
                let reports = self.get_task_reports(&job_id, kind).await?;
                report_response(msg, json!({ "reports": reports }))
            }
            "KILL_JOB" => {
                let job_id: JobId = field(msg, "job_id")?;
                self.kill_job(&job_id)?;
                ack_response(msg)
            }
            "KILL_TASK" => {
                let task_id: TaskId = field(msg, "task_id")?;
                self.kill_task(&task_id)?;
                ack_response(msg)
            }
            "KILL_TASK_ATTEMPT" => {
                let attempt_id: TaskAttemptId = field(msg, "attempt_id")?;
                self.kill_task_attempt(&attempt_id)?;
                ack_response(msg)
            }
            "FAIL_TASK_ATTEMPT" => {
                let attempt_id: TaskAttemptId = field(msg, "attempt_id")?;
                self.fail_task_attempt(&attempt_id)?;
                ack_response(msg)
            }
            "GET_DELEGATION_TOKEN" => return Err(Self::delegation_token_guard("issue")),
            "RENEW_DELEGATION_TOKEN" => return Err(Self::delegation_token_guard("renew")),
            "CANCEL_DELEGATION_TOKEN" => return Err(Self::delegation_token_guard("cancel")),
            other => {
                warn!("Unknown message type: {}", other);
                return Ok(None);
            }
        };
        Ok(Some(response))
    }
}

fn field<T: DeserializeOwned>(msg: &Msg, key: &str) -> Result<T, RemoteError> {
    let value = msg
        .payload
        .get(key)
        .cloned()
        .ok_or_else(|| RemoteError::Remote(format!("request missing field '{key}'")))?;
    serde_json::from_value(value)
        .map_err(|err| RemoteError::Remote(format!("invalid field '{key}': {err}")))
}

fn report_response(msg: &Msg, payload: serde_json::Value) -> Msg {
    response(msg, "REPORT", payload)
}

fn ack_response(msg: &Msg) -> Msg {
    response(msg, "ACK", json!({}))
}

fn error_response(msg: &Msg, err: &RemoteError) -> Msg {
    response(
        msg,
        "ERR",
        json!({
            "code": err.code(),
            "message": err.to_string(),
        }),
    )
}

fn response(msg: &Msg, msg_type: &str, payload: serde_json::Value) -> Msg {
    Msg {
        msg_type: msg_type.to_string(),
        msg_id: Uuid::new_v4().to_string(),
        from: DAEMON_IDENT.to_string(),
        to: msg.from.clone(),
        ts: now_ts(),
        nonce: Uuid::new_v4().to_string(),
        hmac: String::new(),
        payload,
    }
}

pub fn now_ts() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

pub struct HmacCheck {
    pub valid: bool,
    pub expected: String,
    pub provided: String,
    pub body: String,
}

pub fn verify_hmac_detailed(msg: &Msg, secret: &str) -> Result<HmacCheck> {
    let body = canonical_body(msg);
    let provided_bytes = general_purpose::STANDARD
        .decode(msg.hmac.as_bytes())
        .unwrap_or_default();

    let mut mac_verify = HmacSha256::new_from_slice(secret.as_bytes())?;
    mac_verify.update(body.as_bytes());
    let valid = mac_verify.verify_slice(&provided_bytes).is_ok();

    let mut mac_expected = HmacSha256::new_from_slice(secret.as_bytes())?;
    mac_expected.update(body.as_bytes());
    let expected = general_purpose::STANDARD.encode(mac_expected.finalize().into_bytes());

    Ok(HmacCheck {
        valid,
        expected,
        provided: msg.hmac.clone(),
        body,
    })
}

pub fn sign_msg(msg: &mut Msg, secret: &str) -> Result<()> {
    let body = canonical_body(msg);
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())?;
    mac.update(body.as_bytes());
    msg.hmac = general_purpose::STANDARD.encode(mac.finalize().into_bytes());
    Ok(())
}

fn canonical_body(msg: &Msg) -> String {
    let payload = serde_json::to_string(&msg.payload).unwrap_or_else(|_| "{}".to_string());
    format!(
        "{}|{}|{}|{}|{}|{}|{}",
        msg.msg_type, msg.msg_id, msg.from, msg.to, msg.ts, msg.nonce, payload
    )
}

fn shorten_sig(sig: &str) -> String {
    if sig.len() <= 12 {
        sig.to_string()
    } else {
        sig[..12].to_string()
    }
}

fn summarize_body(body: &str) -> String {
    let total_chars = body.chars().count();
    if total_chars <= LOG_SNIPPET_LIMIT {
        body.to_string()
    } else {
        let snippet: String = body.chars().take(LOG_SNIPPET_LIMIT).collect();
        format!("{} (truncated {} chars)", snippet, total_chars - LOG_SNIPPET_LIMIT)
    }
}
