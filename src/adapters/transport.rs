use async_trait::async_trait;
use std::time::Duration;

use crate::models::Device;
use crate::utils;

use super::{AdapterError, DeviceTarget};

/// Raw CLI access to one device
#[async_trait]
pub trait CliChannel: Send {
    /// Run a single exec-mode command and return its output
    async fn send_command(&mut self, command: &str) -> Result<String, AdapterError>;

    /// Type lines into an interactive shell and return the transcript
    async fn send_interactive(&mut self, lines: &[String]) -> Result<String, AdapterError>;

    async fn close(&mut self);
}

/// Opens channels and answers reachability probes
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, target: &DeviceTarget) -> Result<Box<dyn CliChannel>, AdapterError>;

    /// Whether the device answers on its management port
    async fn probe(&self, device: &Device) -> bool;
}

/// Real devices over SSH (libssh2). Blocking calls run on the tokio blocking pool.
#[derive(Debug, Clone)]
pub struct SshConnector {
    timeout: Duration,
}

impl SshConnector {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl Connector for SshConnector {
    async fn connect(&self, target: &DeviceTarget) -> Result<Box<dyn CliChannel>, AdapterError> {
        let host = target.address.clone();
        let port = target.port;
        let creds = target.credentials.clone();
        let timeout = self.timeout;

        let session = tokio::task::spawn_blocking(move || utils::ssh_connect(&host, port, &creds, timeout))
            .await
            .map_err(|e| AdapterError::Connection(format!("Task join error: {}", e)))?
            .map_err(AdapterError::Connection)?;

        tracing::debug!("SSH session established to {} ({}:{})", target.hostname, target.address, target.port);
        Ok(Box::new(SshChannel {
            session: Some(session),
        }))
    }

    async fn probe(&self, device: &Device) -> bool {
        let host = device.management_address.clone();
        let port = u16::try_from(device.port).unwrap_or(22);
        let timeout = self.timeout.min(Duration::from_secs(2));
        tokio::task::spawn_blocking(move || utils::tcp_probe(&host, port, timeout))
            .await
            .unwrap_or(false)
    }
}

/// The ssh2 session is moved into the blocking task and handed back afterwards
pub struct SshChannel {
    session: Option<ssh2::Session>,
}

impl SshChannel {
    async fn with_session<F>(&mut self, op: F) -> Result<String, AdapterError>
    where
        F: FnOnce(&ssh2::Session) -> Result<String, String> + Send + 'static,
    {
        let session = self
            .session
            .take()
            .ok_or_else(|| AdapterError::Connection("SSH session is closed".to_string()))?;

        let (session, result) = tokio::task::spawn_blocking(move || {
            let result = op(&session);
            (session, result)
        })
        .await
        .map_err(|e| AdapterError::Connection(format!("Task join error: {}", e)))?;

        self.session = Some(session);
        result.map_err(AdapterError::Connection)
    }
}

#[async_trait]
impl CliChannel for SshChannel {
    async fn send_command(&mut self, command: &str) -> Result<String, AdapterError> {
        let command = command.to_string();
        self.with_session(move |s| utils::ssh_exec(s, &command)).await
    }

    async fn send_interactive(&mut self, lines: &[String]) -> Result<String, AdapterError> {
        let lines = lines.to_vec();
        self.with_session(move |s| utils::ssh_shell(s, &lines)).await
    }

    async fn close(&mut self) {
        if let Some(session) = self.session.take() {
            let _ = tokio::task::spawn_blocking(move || {
                let _ = session.disconnect(None, "bye", None);
            })
            .await;
        }
    }
}
