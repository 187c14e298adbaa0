use async_trait::async_trait;
use std::sync::Arc;

use crate::models::Method;

use super::transport::Connector;
use super::{check_command_output, check_config_output, detect_cli_error, AdapterError, DeviceAdapter, DeviceTarget, Session};

/// Candidate-config style: lines are staged in a named configure session,
/// diffed against running, then committed or aborted.
pub struct NapalmAdapter {
    connector: Arc<dyn Connector>,
}

impl NapalmAdapter {
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        Self { connector }
    }

    fn session_name() -> String {
        format!("netswift-{}", &uuid::Uuid::new_v4().simple().to_string()[..8])
    }

    /// Stage lines into `name` and return the candidate diff.
    /// A rejected line aborts the session before the error is returned.
    async fn load_candidate(&self, session: &mut Session, name: &str, lines: &[String]) -> Result<String, AdapterError> {
        let mut script = Vec::with_capacity(lines.len() + 3);
        script.push(format!("configure session {}", name));
        script.extend(lines.iter().cloned());
        script.push("show session-config diffs".to_string());
        script.push("end".to_string());

        let output = session.channel()?.send_interactive(&script).await?;
        if let Some(marker) = detect_cli_error(&output) {
            self.finish_session(session, name, "abort").await?;
            return Err(AdapterError::Command(format!("candidate config rejected: {}", marker)));
        }
        Ok(extract_diff(&output))
    }

    async fn finish_session(&self, session: &mut Session, name: &str, action: &str) -> Result<String, AdapterError> {
        let script = vec![format!("configure session {}", name), action.to_string()];
        let output = session.channel()?.send_interactive(&script).await?;
        check_config_output(output, action)
    }
}

/// Keep only the diff block printed by `show session-config diffs`
fn extract_diff(transcript: &str) -> String {
    transcript
        .lines()
        .skip_while(|l| !l.starts_with("---"))
        .take_while(|l| l.starts_with(['-', '+', ' ', '@']))
        .collect::<Vec<_>>()
        .join("\n")
}

#[async_trait]
impl DeviceAdapter for NapalmAdapter {
    fn method(&self) -> Method {
        Method::Napalm
    }

    fn supports_dry_run(&self) -> bool {
        true
    }

    async fn open_session(&self, target: &DeviceTarget) -> Result<Session, AdapterError> {
        let channel = self.connector.connect(target).await?;
        tracing::debug!("napalm: driver opened for {} ({})", target.hostname, target.platform);
        Ok(Session::new(&target.hostname, channel))
    }

    async fn exec_command(&self, session: &mut Session, command: &str) -> Result<String, AdapterError> {
        let output = session.channel()?.send_command(command).await?;
        check_command_output(output, command)
    }

    async fn exec_config(&self, session: &mut Session, lines: &[String]) -> Result<String, AdapterError> {
        let name = Self::session_name();
        let diff = self.load_candidate(session, &name, lines).await?;
        self.finish_session(session, &name, "commit").await?;
        Ok(diff)
    }

    async fn exec_config_dry_run(&self, session: &mut Session, lines: &[String]) -> Result<String, AdapterError> {
        let name = Self::session_name();
        let diff = self.load_candidate(session, &name, lines).await?;
        self.finish_session(session, &name, "abort").await?;
        Ok(diff)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::simulated::SimulatedConnector;
    use crate::config::Credentials;

    fn target(host: &str) -> DeviceTarget {
        DeviceTarget {
            device_id: 1,
            hostname: host.to_string(),
            address: "10.0.0.1".to_string(),
            port: 22,
            platform: "eos".to_string(),
            credentials: Credentials {
                username: "admin".to_string(),
                password: "admin".to_string(),
            },
        }
    }

    fn lines(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|l| l.to_string()).collect()
    }

    #[test]
    fn test_extract_diff() {
        let transcript = "R1# configure session s\nR1(config-s-s)# vlan 10\nR1(config-s-s)# show session-config diffs\n--- system:/running-config\n+++ session:/s-session-config\n+vlan 10\nR1(config-s-s)# end\nR1#";
        assert_eq!(
            extract_diff(transcript),
            "--- system:/running-config\n+++ session:/s-session-config\n+vlan 10"
        );
    }

    #[tokio::test]
    async fn test_dry_run_leaves_running_config_untouched() {
        let lab = SimulatedConnector::default();
        let adapter = NapalmAdapter::new(Arc::new(lab.clone()));
        let mut session = adapter.open_session(&target("leaf1")).await.unwrap();

        let diff = adapter
            .exec_config_dry_run(&mut session, &lines(&["vlan 20", " name servers"]))
            .await
            .unwrap();
        assert!(diff.contains("+vlan 20"));
        assert!(diff.contains("+vlan 20\n+ name servers"));
        assert!(lab.running_config("leaf1").is_empty());
    }

    #[tokio::test]
    async fn test_commit_applies_and_rejection_aborts() {
        let lab = SimulatedConnector::default();
        let adapter = NapalmAdapter::new(Arc::new(lab.clone()));
        let mut session = adapter.open_session(&target("leaf2")).await.unwrap();

        let diff = adapter.exec_config(&mut session, &lines(&["vlan 30"])).await.unwrap();
        assert!(diff.contains("+vlan 30"));
        assert_eq!(lab.running_config("leaf2"), vec!["vlan 30"]);

        let err = adapter
            .exec_config(&mut session, &lines(&["vlan 40", "invalid stanza"]))
            .await
            .unwrap_err();
        assert!(matches!(err, AdapterError::Command(_)));
        // vlan 40 was staged alongside the bad line and must not leak into running
        assert_eq!(lab.running_config("leaf2"), vec!["vlan 30"]);
    }
}
