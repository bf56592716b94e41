//! Client library for the job master client service.
//!
//! Speaks the daemon's signed JSON-line protocol over TCP: one request
//! per connection, HMAC-SHA256 envelopes keyed with the attempt-scoped
//! connection secret.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use base64::{engine::general_purpose, Engine as _};
use hmac::{Hmac, Mac};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::Sha256;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, warn};
use uuid::Uuid;

use jobmaster_common::ids::{JobId, TaskAttemptId, TaskId, TaskKind};
use jobmaster_common::records::{
    Counters, JobReport, TaskAttemptCompletionEvent, TaskAttemptReport, TaskReport,
};

type HmacSha256 = Hmac<Sha256>;

const RESPONSE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("daemon not available")]
    DaemonUnavailable,
    #[error("no response from daemon")]
    NoResponse,
    #[error("invalid response: {0}")]
    InvalidResponse(String),
    #[error("remote error {code}: {message}")]
    Remote { code: String, message: String },
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

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

/// Client handle for the job master's control/query endpoint.
pub struct JobMasterClient {
    addr: String,
    ident: String,
    secret: String,
}

impl JobMasterClient {
    /// Probe the daemon and return a handle on success.
    pub async fn connect(
        addr: impl Into<String>,
        ident: &str,
        secret: &str,
    ) -> Result<Self, ClientError> {
        let addr = addr.into();
        TcpStream::connect(&addr)
            .await
            .map_err(|_| ClientError::DaemonUnavailable)?;
        debug!(%addr, ident, "connected to job master");
        Ok(Self {
            addr,
            ident: ident.to_string(),
            secret: secret.to_string(),
        })
    }

    pub fn ident(&self) -> &str {
        &self.ident
    }

    async fn call(
        &self,
        msg_type: &str,
        payload: serde_json::Value,
    ) -> Result<Msg, ClientError> {
        let stream = TcpStream::connect(&self.addr)
            .await
            .map_err(|_| ClientError::DaemonUnavailable)?;
        let (reader, mut writer) = stream.into_split();
        let mut buf_reader = BufReader::new(reader);

        let msg = new_msg(msg_type, &self.ident, &payload, &self.secret);
        let line = serde_json::to_string(&msg)? + "\n";
        writer.write_all(line.as_bytes()).await?;

        let mut response_line = String::new();
        match timeout(RESPONSE_TIMEOUT, buf_reader.read_line(&mut response_line)).await {
            Err(_) => Err(ClientError::NoResponse),
            Ok(Ok(0)) => Err(ClientError::NoResponse),
            Ok(Ok(_)) => {
                let raw = response_line.trim();
                if raw.is_empty() {
                    return Err(ClientError::NoResponse);
                }
                let response: Msg = serde_json::from_str(raw)
                    .map_err(|err| ClientError::InvalidResponse(err.to_string()))?;
                if !verify_hmac(&response, &self.secret) {
                    warn!("invalid HMAC in daemon response");
                    return Err(ClientError::InvalidResponse(
                        "response failed HMAC verification".to_string(),
                    ));
                }
                if response.msg_type == "ERR" {
                    return Err(remote_error(&response));
                }
                Ok(response)
            }
            Ok(Err(err)) => Err(err.into()),
        }
    }

    fn extract<T: DeserializeOwned>(response: &Msg, key: &str) -> Result<T, ClientError> {
        let value = response
            .payload
            .get(key)
            .cloned()
            .ok_or_else(|| ClientError::InvalidResponse(format!("missing field '{key}'")))?;
        serde_json::from_value(value)
            .map_err(|err| ClientError::InvalidResponse(format!("bad field '{key}': {err}")))
    }

    // --- queries ---

    pub async fn get_counters(&self, job: &JobId) -> Result<Counters, ClientError> {
        let response = self.call("GET_COUNTERS", json!({ "job_id": job })).await?;
        Self::extract(&response, "counters")
    }

    /// `None` when the job is unknown to the master.
    pub async fn get_job_report(&self, job: &JobId) -> Result<Option<JobReport>, ClientError> {
        let response = self.call("GET_JOB_REPORT", json!({ "job_id": job })).await?;
        Self::extract(&response, "report")
    }

    pub async fn get_task_report(&self, task: &TaskId) -> Result<TaskReport, ClientError> {
        let response = self.call("GET_TASK_REPORT", json!({ "task_id": task })).await?;
        Self::extract(&response, "report")
    }

    pub async fn get_task_attempt_report(
        &self,
        attempt: &TaskAttemptId,
    ) -> Result<TaskAttemptReport, ClientError> {
        let response = self
            .call("GET_TASK_ATTEMPT_REPORT", json!({ "attempt_id": attempt }))
            .await?;
        Self::extract(&response, "report")
    }

    pub async fn get_diagnostics(
        &self,
        attempt: &TaskAttemptId,
    ) -> Result<Vec<String>, ClientError> {
        let response = self
            .call("GET_DIAGNOSTICS", json!({ "attempt_id": attempt }))
            .await?;
        Self::extract(&response, "diagnostics")
    }

    pub async fn get_completion_events(
        &self,
        job: &JobId,
        from_event_id: u32,
        max_events: u32,
    ) -> Result<Vec<TaskAttemptCompletionEvent>, ClientError> {
        let response = self
            .call(
                "GET_COMPLETION_EVENTS",
                json!({
                    "job_id": job,
                    "from_event_id": from_event_id,
                    "max_events": max_events,
                }),
            )
            .await?;
        Self::extract(&response, "events")
    }

    pub async fn get_task_reports(
        &self,
        job: &JobId,
        kind: TaskKind,
    ) -> Result<Vec<TaskReport>, ClientError> {
        let response = self
            .call(
                "GET_TASK_REPORTS",
                json!({ "job_id": job, "task_kind": kind }),
            )
            .await?;
        Self::extract(&response, "reports")
    }

    // --- commands (accepted for processing, not confirmed applied) ---

    pub async fn kill_job(&self, job: &JobId) -> Result<(), ClientError> {
        self.call("KILL_JOB", json!({ "job_id": job })).await?;
        Ok(())
    }

    pub async fn kill_task(&self, task: &TaskId) -> Result<(), ClientError> {
        self.call("KILL_TASK", json!({ "task_id": task })).await?;
        Ok(())
    }

    pub async fn kill_task_attempt(&self, attempt: &TaskAttemptId) -> Result<(), ClientError> {
        self.call("KILL_TASK_ATTEMPT", json!({ "attempt_id": attempt }))
            .await?;
        Ok(())
    }

    pub async fn fail_task_attempt(&self, attempt: &TaskAttemptId) -> Result<(), ClientError> {
        self.call("FAIL_TASK_ATTEMPT", json!({ "attempt_id": attempt }))
            .await?;
        Ok(())
    }

    // --- delegation tokens: the master always refuses these ---

    pub async fn get_delegation_token(&self) -> Result<(), ClientError> {
        self.call("GET_DELEGATION_TOKEN", json!({})).await?;
        Ok(())
    }

    pub async fn renew_delegation_token(&self) -> Result<(), ClientError> {
        self.call("RENEW_DELEGATION_TOKEN", json!({})).await?;
        Ok(())
    }

    pub async fn cancel_delegation_token(&self) -> Result<(), ClientError> {
        self.call("CANCEL_DELEGATION_TOKEN", json!({})).await?;
        Ok(())
    }
}

fn remote_error(response: &Msg) -> ClientError {
    let code = response
        .payload
        .get("code")
        .and_then(|v| v.as_str())
        .unwrap_or("E_REMOTE")
        .to_string();
    let message = response
        .payload
        .get("message")
        .and_then(|v| v.as_str())
        .unwrap_or("daemon rejected request")
        .to_string();
    ClientError::Remote { code, message }
}

fn now_ts() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

fn new_msg(typ: &str, from: &str, payload: &serde_json::Value, secret: &str) -> Msg {
    let mut msg = Msg {
        msg_type: typ.to_string(),
        msg_id: Uuid::new_v4().to_string(),
        from: from.to_string(),
        to: "jobmaster".to_string(),
        ts: now_ts(),
        nonce: Uuid::new_v4().to_string(),
        hmac: String::new(),
        payload: payload.clone(),
    };
    sign_msg(&mut msg, secret);
    msg
}

fn sign_msg(msg: &mut Msg, secret: &str) {
    let body = canonical_body(msg);
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC key error");
    mac.update(body.as_bytes());
    msg.hmac = general_purpose::STANDARD.encode(mac.finalize().into_bytes());
}

fn verify_hmac(msg: &Msg, secret: &str) -> bool {
    let body = canonical_body(msg);
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body.as_bytes());
    let bytes = general_purpose::STANDARD
        .decode(msg.hmac.as_bytes())
        .unwrap_or_default();
    mac.verify_slice(&bytes).is_ok()
}

fn canonical_body(msg: &Msg) -> String {
    let payload = serde_json::to_string(&msg.payload).unwrap_or_else(|_| "{}".to_string());
    format!(
        "{}|{}|{}|{}|{}|{}|{}",
        msg.msg_type, msg.msg_id, msg.from, msg.to, msg.ts, msg.nonce, payload
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signed_messages_verify_and_reject_tampering() {
        let mut msg = new_msg("GET_JOB_REPORT", "client-a", &json!({"k": 1}), "secret");
        assert!(verify_hmac(&msg, "secret"));
        assert!(!verify_hmac(&msg, "other-secret"));

        msg.payload = json!({"k": 2});
        assert!(!verify_hmac(&msg, "secret"));
    }

    #[test]
    fn remote_error_extracts_code_and_message() {
        let response = Msg {
            msg_type: "ERR".to_string(),
            msg_id: "id".to_string(),
            from: "jobmaster".to_string(),
            to: "client-a".to_string(),
            ts: 0,
            nonce: "n".to_string(),
            hmac: String::new(),
            payload: json!({"code": "E_NOT_FOUND", "message": "Unknown Task t"}),
        };
        match remote_error(&response) {
            ClientError::Remote { code, message } => {
                assert_eq!(code, "E_NOT_FOUND");
                assert_eq!(message, "Unknown Task t");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
