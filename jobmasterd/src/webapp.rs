//! Auxiliary HTTP status interface.
//!
//! Best-effort: the control/query endpoint is fully functional without
//! it, so the caller logs and swallows startup failures.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::error;

use crate::registry::AppContext;

pub struct StatusServer {
    addr: SocketAddr,
    task: JoinHandle<()>,
}

impl StatusServer {
    pub async fn start(bind_addr: &str, context: Arc<dyn AppContext>) -> Result<Self> {
        let listener = TcpListener::bind(bind_addr)
            .await
            .with_context(|| format!("failed to bind status interface on {bind_addr}"))?;
        let addr = listener.local_addr()?;

        let app = Router::new()
            .route("/ws/v1/jobmaster/info", get(info))
            .route("/ws/v1/jobmaster/jobs", get(jobs))
            .with_state(context);

        let task = tokio::spawn(async move {
            if let Err(err) = axum::serve(listener, app).await {
                error!("status interface terminated: {err}");
            }
        });

        Ok(Self { addr, task })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    pub fn stop(&self) {
        self.task.abort();
    }
}

async fn info(State(context): State<Arc<dyn AppContext>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "service": "jobmasterd",
        "version": env!("CARGO_PKG_VERSION"),
        "application_attempt_id": context.application_attempt_id().to_string(),
    }))
}

async fn jobs(State(context): State<Arc<dyn AppContext>>) -> Json<serde_json::Value> {
    let reports: Vec<_> = context
        .job_ids()
        .iter()
        .filter_map(|id| context.job(id))
        .map(|job| job.report.clone())
        .collect();
    Json(serde_json::json!({ "jobs": reports }))
}
