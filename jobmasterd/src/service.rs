//! Secure endpoint bootstrap and connection serving.
//!
//! `ClientService::start` binds the listener, wires the attempt-scoped
//! signing key, installs the authorization gate, starts the status
//! interface and publishes the resolved bind address. The returned
//! value is the only way to learn the address, so it cannot be read
//! before bootstrap completes.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::acl::ServicePolicy;
use crate::config::{ClientServiceConfig, PortRange};
use crate::events::EventBus;
use crate::handler::{sign_msg, Msg, ProtocolHandler};
use crate::registry::AppContext;
use crate::secrets::{derive_connection_key, SecretProvider};
use crate::webapp::StatusServer;

/// Signing key used when security is disabled. Both ends fall back to
/// it, which keeps the envelope format uniform but authenticates
/// nothing.
pub const INSECURE_DEV_SECRET: &str = "jobmaster-insecure-dev-secret";

pub struct ClientService {
    bind_address: SocketAddr,
    accept_task: Option<JoinHandle<()>>,
    webapp: Option<StatusServer>,
}

impl ClientService {
    pub async fn start(
        config: &ClientServiceConfig,
        context: Arc<dyn AppContext>,
        events: EventBus,
        secrets: &dyn SecretProvider,
    ) -> Result<Self> {
        // Security anchor: with security enabled there is no fallback
        // for a missing or malformed secret.
        let secret = if config.security_enabled {
            let master = secrets
                .client_secret()
                .context("security is enabled but no usable client secret is available")?;
            derive_connection_key(&master, &context.application_attempt_id())
        } else {
            warn!("security disabled, signing envelopes with the well-known development secret");
            INSECURE_DEV_SECRET.to_string()
        };

        // The authorization gate is installed before the listener
        // starts accepting traffic; an unreadable policy is fatal.
        let policy = if config.authorization_enabled {
            let path = config
                .policy_file
                .as_deref()
                .context("authorization is enabled but no policy_file is configured")?;
            Some(ServicePolicy::load(path)?)
        } else {
            None
        };

        let listener = bind_listener(config.port_range).await?;
        let bind_address = listener.local_addr()?;

        let handler = Arc::new(ProtocolHandler::new(context.clone(), events, policy, secret));
        let workers = Arc::new(Semaphore::new(config.client_thread_count.max(1)));

        let accept_task = tokio::spawn(accept_loop(listener, handler, workers));
        info!(addr = %bind_address, "client service listening");

        let webapp = match StatusServer::start(&config.status_addr, context).await {
            Ok(server) => {
                info!(addr = %server.addr(), "status interface started");
                Some(server)
            }
            Err(err) => {
                error!("status interface failed to start, continuing without it: {err:#}");
                None
            }
        };

        Ok(Self {
            bind_address,
            accept_task: Some(accept_task),
            webapp,
        })
    }

    /// Resolved address of the started listener.
    pub fn bind_address(&self) -> SocketAddr {
        self.bind_address
    }

    pub fn http_port(&self) -> Option<u16> {
        self.webapp.as_ref().map(StatusServer::port)
    }

    /// Release the listener and the status interface. Idempotent.
    pub fn stop(&mut self) {
        if let Some(task) = self.accept_task.take() {
            task.abort();
        }
        if let Some(webapp) = self.webapp.take() {
            webapp.stop();
        }
    }
}

impl Drop for ClientService {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn bind_listener(range: Option<PortRange>) -> Result<TcpListener> {
    match range {
        None => TcpListener::bind(("127.0.0.1", 0))
            .await
            .context("failed to bind client listener"),
        Some(range) => {
            for port in range.start..=range.end {
                if let Ok(listener) = TcpListener::bind(("127.0.0.1", port)).await {
                    return Ok(listener);
                }
            }
            bail!(
                "no free port in configured range {}-{}",
                range.start,
                range.end
            )
        }
    }
}

async fn accept_loop(listener: TcpListener, handler: Arc<ProtocolHandler>, workers: Arc<Semaphore>) {
    loop {
        match listener.accept().await {
            Ok((stream, _addr)) => {
                let handler = handler.clone();
                let workers = workers.clone();
                tokio::spawn(async move {
                    if let Err(err) = handle_connection(stream, handler, workers).await {
                        error!("Connection error: {err}");
                    }
                });
            }
            Err(err) => {
                error!("accept failed: {err}");
            }
        }
    }
}

async fn handle_connection(
    stream: TcpStream,
    handler: Arc<ProtocolHandler>,
    workers: Arc<Semaphore>,
) -> Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut buf_reader = BufReader::new(reader);
    let mut line = String::new();

    loop {
        line.clear();
        match buf_reader.read_line(&mut line).await? {
            0 => break, // EOF
            _ => {
                let raw = line.trim();
                if raw.is_empty() {
                    continue;
                }

                match serde_json::from_str::<Msg>(raw) {
                    Ok(msg) => {
                        // Bounded worker pool: handler execution waits
                        // for a free slot.
                        let _permit = workers.acquire().await?;
                        if let Some(mut response) = handler.handle_message(msg).await? {
                            sign_msg(&mut response, handler.secret())?;
                            let response_line = serde_json::to_string(&response)? + "\n";
                            writer.write_all(response_line.as_bytes()).await?;
                        }
                    }
                    Err(e) => {
                        error!("JSON parse error: {}", e);
                    }
                }
            }
        }
    }
    Ok(())
}
