use async_trait::async_trait;
use std::sync::Arc;

use crate::models::Method;

use super::transport::Connector;
use super::{check_command_output, check_config_output, AdapterError, DeviceAdapter, DeviceTarget, Session};

/// Screen-scraping style: one command per request, config sets wrapped in
/// `configure terminal` / `end` and saved with `write memory`.
pub struct NetmikoAdapter {
    connector: Arc<dyn Connector>,
}

impl NetmikoAdapter {
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        Self { connector }
    }
}

#[async_trait]
impl DeviceAdapter for NetmikoAdapter {
    fn method(&self) -> Method {
        Method::Netmiko
    }

    async fn open_session(&self, target: &DeviceTarget) -> Result<Session, AdapterError> {
        let channel = self.connector.connect(target).await?;
        tracing::debug!("netmiko: connected to {}", target.hostname);
        Ok(Session::new(&target.hostname, channel))
    }

    async fn exec_command(&self, session: &mut Session, command: &str) -> Result<String, AdapterError> {
        let output = session.channel()?.send_command(command).await?;
        check_command_output(output, command)
    }

    async fn exec_config(&self, session: &mut Session, lines: &[String]) -> Result<String, AdapterError> {
        let mut script = Vec::with_capacity(lines.len() + 3);
        script.push("configure terminal".to_string());
        script.extend(lines.iter().cloned());
        script.push("end".to_string());
        script.push("write memory".to_string());

        let output = session.channel()?.send_interactive(&script).await?;
        check_config_output(output, "config set")
    }
}
