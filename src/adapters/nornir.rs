use async_trait::async_trait;
use std::sync::Arc;

use crate::models::Method;

use super::transport::Connector;
use super::{detect_cli_error, detect_command_error, echoed_input, AdapterError, DeviceAdapter, DeviceTarget, Session};

/// Task-runner style: every line is its own task and the per-task results
/// are folded into one report with a header per task. A config set goes to
/// the device as one `configure terminal` session so sub-mode lines stay
/// under their parent; its transcript is split back into per-line tasks.
pub struct NornirAdapter {
    connector: Arc<dyn Connector>,
}

impl NornirAdapter {
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        Self { connector }
    }
}

/// Result of one task in the aggregated report
struct TaskResult {
    name: &'static str,
    target: String,
    changed: bool,
    output: String,
}

fn render_report(host: &str, tasks: &[TaskResult]) -> String {
    let mut report = String::new();
    for task in tasks {
        report.push_str(&format!(
            "---- {} ** changed : {} ---- {}: {}\n",
            task.name,
            if task.changed { "True" } else { "False" },
            host,
            task.target
        ));
        report.push_str(task.output.trim_end());
        report.push('\n');
    }
    report.push_str(&format!("^^^^ END {} ^^^^", host));
    report
}

/// Transcript lines grouped by the typed line they answer
struct Exchange<'a> {
    typed: &'a str,
    lines: Vec<&'a str>,
}

fn split_transcript(transcript: &str) -> Vec<Exchange<'_>> {
    let mut exchanges: Vec<Exchange<'_>> = Vec::new();
    for line in transcript.lines() {
        match echoed_input(line) {
            Some(typed) => exchanges.push(Exchange {
                typed: typed.trim(),
                lines: vec![line],
            }),
            None => {
                if let Some(current) = exchanges.last_mut() {
                    current.lines.push(line);
                }
            }
        }
    }
    exchanges
}

/// Fail the run on the first task the device rejected
fn task_failed(host: &str, task: &TaskResult, detect: fn(&str) -> Option<String>) -> Option<AdapterError> {
    detect(&task.output).map(|marker| {
        AdapterError::Command(format!("task {} failed on {} ({}): {}", task.name, host, task.target, marker))
    })
}

#[async_trait]
impl DeviceAdapter for NornirAdapter {
    fn method(&self) -> Method {
        Method::Nornir
    }

    async fn open_session(&self, target: &DeviceTarget) -> Result<Session, AdapterError> {
        let channel = self.connector.connect(target).await?;
        tracing::debug!("nornir: inventory host {} ready", target.hostname);
        Ok(Session::new(&target.hostname, channel))
    }

    async fn exec_command(&self, session: &mut Session, command: &str) -> Result<String, AdapterError> {
        let host = session.hostname().to_string();
        let mut tasks = Vec::new();

        let commands: Vec<&str> = command.lines().map(str::trim).filter(|c| !c.is_empty()).collect();
        if commands.is_empty() {
            return Err(AdapterError::Command("no command to run".to_string()));
        }

        for cmd in commands {
            let output = session.channel()?.send_command(cmd).await?;
            let task = TaskResult {
                name: "netmiko_send_command",
                target: cmd.to_string(),
                changed: false,
                output,
            };
            if let Some(err) = task_failed(&host, &task, detect_command_error) {
                return Err(err);
            }
            tasks.push(task);
        }

        Ok(render_report(&host, &tasks))
    }

    async fn exec_config(&self, session: &mut Session, lines: &[String]) -> Result<String, AdapterError> {
        let host = session.hostname().to_string();
        let lines: Vec<&str> = lines.iter().map(|l| l.trim_end()).filter(|l| !l.trim().is_empty()).collect();

        let mut script = Vec::with_capacity(lines.len() + 2);
        script.push("configure terminal".to_string());
        script.extend(lines.iter().map(|l| l.to_string()));
        script.push("end".to_string());
        let transcript = session.channel()?.send_interactive(&script).await?;

        let exchanges = split_transcript(&transcript);
        let mut replies = exchanges.iter().skip_while(|e| e.typed != "configure terminal");
        let mut tasks = Vec::with_capacity(lines.len() + 1);
        for line in &lines {
            let target = line.trim();
            let output = replies
                .by_ref()
                .find(|e| e.typed == target)
                .map(|e| e.lines.join("\n"))
                .unwrap_or_default();
            let task = TaskResult {
                name: "netmiko_send_config",
                target: target.to_string(),
                changed: true,
                output,
            };
            if let Some(err) = task_failed(&host, &task, detect_cli_error) {
                return Err(err);
            }
            tasks.push(task);
        }
        // A rejection the transcript did not tie to a typed line
        if let Some(marker) = detect_cli_error(&transcript) {
            return Err(AdapterError::Command(format!("config set failed on {}: {}", host, marker)));
        }

        let output = session.channel()?.send_interactive(&["write memory".to_string()]).await?;
        let save = TaskResult {
            name: "netmiko_save_config",
            target: "write memory".to_string(),
            changed: false,
            output,
        };
        if let Some(err) = task_failed(&host, &save, detect_cli_error) {
            return Err(err);
        }
        tasks.push(save);

        Ok(render_report(&host, &tasks))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::simulated::SimulatedConnector;
    use crate::adapters::CliChannel;
    use crate::config::Credentials;
    use crate::models::Device;
    use std::sync::Mutex;

    /// Simulated lab that also keeps every interactive script it was sent
    #[derive(Clone, Default)]
    struct RecordingConnector {
        lab: SimulatedConnector,
        sent: Arc<Mutex<Vec<Vec<String>>>>,
    }

    impl RecordingConnector {
        fn scripts(&self) -> Vec<Vec<String>> {
            self.sent.lock().unwrap().clone()
        }
    }

    struct RecordingChannel {
        inner: Box<dyn CliChannel>,
        sent: Arc<Mutex<Vec<Vec<String>>>>,
    }

    #[async_trait]
    impl Connector for RecordingConnector {
        async fn connect(&self, target: &DeviceTarget) -> Result<Box<dyn CliChannel>, AdapterError> {
            let inner = self.lab.connect(target).await?;
            Ok(Box::new(RecordingChannel {
                inner,
                sent: self.sent.clone(),
            }))
        }

        async fn probe(&self, device: &Device) -> bool {
            self.lab.probe(device).await
        }
    }

    #[async_trait]
    impl CliChannel for RecordingChannel {
        async fn send_command(&mut self, command: &str) -> Result<String, AdapterError> {
            self.inner.send_command(command).await
        }

        async fn send_interactive(&mut self, lines: &[String]) -> Result<String, AdapterError> {
            self.sent.lock().unwrap().push(lines.to_vec());
            self.inner.send_interactive(lines).await
        }

        async fn close(&mut self) {
            self.inner.close().await;
        }
    }

    fn lines(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|l| l.to_string()).collect()
    }

    fn target(host: &str) -> DeviceTarget {
        DeviceTarget {
            device_id: 1,
            hostname: host.to_string(),
            address: "10.0.0.1".to_string(),
            port: 22,
            platform: "ios".to_string(),
            credentials: Credentials {
                username: "cisco".to_string(),
                password: "cisco".to_string(),
            },
        }
    }

    #[tokio::test]
    async fn test_each_command_gets_a_task_header() {
        let adapter = NornirAdapter::new(Arc::new(SimulatedConnector::default()));
        let mut session = adapter.open_session(&target("R20")).await.unwrap();

        let report = adapter
            .exec_command(&mut session, "show version\nshow ip interface brief")
            .await
            .unwrap();
        assert_eq!(report.matches("---- netmiko_send_command ** changed : False").count(), 2);
        assert!(report.contains("R20: show ip interface brief"));
        assert!(report.ends_with("^^^^ END R20 ^^^^"));
    }

    #[tokio::test]
    async fn test_config_set_shares_one_config_session() {
        let recorder = RecordingConnector::default();
        let adapter = NornirAdapter::new(Arc::new(recorder.clone()));
        let mut session = adapter.open_session(&target("R15")).await.unwrap();

        let report = adapter
            .exec_config(
                &mut session,
                &lines(&[
                    "interface GigabitEthernet0/1",
                    " ip address 10.0.0.1 255.255.255.0",
                    " no shutdown",
                ]),
            )
            .await
            .unwrap();

        assert_eq!(
            recorder.scripts(),
            vec![
                vec![
                    "configure terminal",
                    "interface GigabitEthernet0/1",
                    " ip address 10.0.0.1 255.255.255.0",
                    " no shutdown",
                    "end",
                ],
                vec!["write memory"],
            ]
        );
        assert_eq!(report.matches("netmiko_send_config ** changed : True").count(), 3);
        assert!(report.contains("R15: ip address 10.0.0.1 255.255.255.0\nR15(config-if)#  ip address"));
        assert_eq!(
            recorder.lab.running_config("R15"),
            vec!["interface GigabitEthernet0/1", " ip address 10.0.0.1 255.255.255.0", " no shutdown"]
        );
    }

    #[tokio::test]
    async fn test_rejected_config_line_fails_the_run_before_save() {
        let recorder = RecordingConnector::default();
        let adapter = NornirAdapter::new(Arc::new(recorder.clone()));
        let mut session = adapter.open_session(&target("R19")).await.unwrap();

        let ok = adapter
            .exec_config(&mut session, &lines(&["hostname R19", "ip domain-name lab"]))
            .await
            .unwrap();
        assert_eq!(ok.matches("netmiko_send_config ** changed : True").count(), 2);
        assert!(ok.contains("netmiko_save_config"));

        let err = adapter
            .exec_config(&mut session, &lines(&["invalid line", "ip name-server 1.1.1.1"]))
            .await
            .unwrap_err();
        match err {
            AdapterError::Command(msg) => assert!(msg.contains("(invalid line)")),
            other => panic!("unexpected error: {}", other),
        }
        let scripts = recorder.scripts();
        assert_eq!(scripts.len(), 3);
        assert_eq!(scripts[2][0], "configure terminal");
    }
}
