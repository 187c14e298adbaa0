//! Deterministic in-process stand-in for IOS-style devices.
//!
//! Every simulated host keeps a running config that pushes mutate, so a
//! retrieve after a push sees the change. Output never depends on time or
//! randomness.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::models::Device;

use super::transport::{CliChannel, Connector};
use super::{AdapterError, DeviceTarget};

const INVALID_INPUT: &str = "% Invalid input detected at '^' marker.";
const ENTER_CONFIG: &str = "Enter configuration commands, one per line.  End with CNTL/Z.";

/// Global commands that open a sub-mode, with the prompt suffix IOS shows
const SUBMODE_PARENTS: &[(&str, &str)] = &[
    ("interface ", "config-if"),
    ("router ", "config-router"),
    ("vlan ", "config-vlan"),
    ("line ", "config-line"),
    ("ip access-list ", "config-acl"),
    ("route-map ", "config-route-map"),
    ("policy-map ", "config-pmap"),
    ("class-map ", "config-cmap"),
];

/// One top-level config line and the sub-mode lines entered under it
#[derive(Debug, Clone, PartialEq)]
struct Stanza {
    line: String,
    children: Vec<String>,
}

#[derive(Default)]
struct LabState {
    running: HashMap<String, Vec<Stanza>>,
    /// Staged `configure session` lines keyed by (host, session name)
    sessions: HashMap<(String, String), Vec<String>>,
    unreachable: HashSet<String>,
}

/// Running config as `show running-config` prints it, sub-mode lines indented
fn flatten(stanzas: &[Stanza]) -> Vec<String> {
    let mut lines = Vec::new();
    for stanza in stanzas {
        lines.push(stanza.line.clone());
        lines.extend(stanza.children.iter().map(|c| format!(" {}", c)));
    }
    lines
}

fn submode_prompt(line: &str) -> Option<&'static str> {
    SUBMODE_PARENTS
        .iter()
        .find(|(prefix, _)| line.starts_with(prefix))
        .map(|(_, prompt)| *prompt)
}

/// Lines the simulated CLI refuses
fn is_rejected(line: &str) -> bool {
    line.split_whitespace().next().is_none() || line.to_ascii_lowercase().contains("invalid")
}

/// Where an accepted config line lands
#[derive(Debug, Clone, PartialEq)]
enum Placement {
    Global(String),
    Parent(String),
    Child { parent: String, line: String },
}

impl Placement {
    /// Sub-mode the CLI is in after this line
    fn next_parent(&self) -> Option<String> {
        match self {
            Placement::Global(_) => None,
            Placement::Parent(line) => Some(line.clone()),
            Placement::Child { parent, .. } => Some(parent.clone()),
        }
    }
}

/// Place a typed line given the current sub-mode. None means the CLI refuses it:
/// an indented line is a sub-mode command and needs an open parent.
fn place(parent: Option<&str>, line: &str) -> Option<Placement> {
    let text = line.trim();
    if is_rejected(text) {
        return None;
    }
    if line.starts_with([' ', '\t']) {
        return parent.map(|p| Placement::Child {
            parent: p.to_string(),
            line: text.to_string(),
        });
    }
    if submode_prompt(text).is_some() {
        Some(Placement::Parent(text.to_string()))
    } else {
        Some(Placement::Global(text.to_string()))
    }
}

fn stanza_index(stanzas: &mut Vec<Stanza>, line: &str) -> usize {
    match stanzas.iter().position(|s| s.line == line) {
        Some(idx) => idx,
        None => {
            stanzas.push(Stanza {
                line: line.to_string(),
                children: Vec::new(),
            });
            stanzas.len() - 1
        }
    }
}

fn apply(stanzas: &mut Vec<Stanza>, placement: &Placement) {
    match placement {
        Placement::Global(line) | Placement::Parent(line) => {
            stanza_index(stanzas, line);
        }
        Placement::Child { parent, line } => {
            let idx = stanza_index(stanzas, parent);
            let children = &mut stanzas[idx].children;
            if !children.contains(line) {
                children.push(line.clone());
            }
        }
    }
}

/// Apply staged session lines in order, tracking sub-modes as the CLI would
fn replay(stanzas: &mut Vec<Stanza>, staged: &[String]) {
    let mut parent: Option<String> = None;
    for raw in staged {
        if let Some(placement) = place(parent.as_deref(), raw) {
            apply(stanzas, &placement);
            parent = placement.next_parent();
        }
    }
}

/// Candidate-vs-running diff: new stanzas in full, new sub-mode lines under
/// their existing parent shown as context
fn session_diff(name: &str, running: &[Stanza], candidate: &[Stanza]) -> String {
    let mut diff = format!("--- system:/running-config\n+++ session:/{}-session-config", name);
    for stanza in candidate {
        match running.iter().find(|r| r.line == stanza.line) {
            None => {
                diff.push_str(&format!("\n+{}", stanza.line));
                for child in &stanza.children {
                    diff.push_str(&format!("\n+ {}", child));
                }
            }
            Some(existing) => {
                let added: Vec<&String> = stanza
                    .children
                    .iter()
                    .filter(|c| !existing.children.contains(c))
                    .collect();
                if !added.is_empty() {
                    diff.push_str(&format!("\n {}", stanza.line));
                    for child in added {
                        diff.push_str(&format!("\n+ {}", child));
                    }
                }
            }
        }
    }
    diff
}

/// Connector for the simulated lab. Clones share the same lab state.
#[derive(Clone, Default)]
pub struct SimulatedConnector {
    lab: Arc<Mutex<LabState>>,
}

impl SimulatedConnector {
    fn lab(&self) -> MutexGuard<'_, LabState> {
        self.lab.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Make connections to `hostname` fail (or succeed again)
    pub fn set_unreachable(&self, hostname: &str, unreachable: bool) {
        let mut lab = self.lab();
        if unreachable {
            lab.unreachable.insert(hostname.to_string());
        } else {
            lab.unreachable.remove(hostname);
        }
    }

    /// Config applied to `hostname` so far, sub-mode lines indented by one space
    pub fn running_config(&self, hostname: &str) -> Vec<String> {
        self.lab().running.get(hostname).map(|s| flatten(s)).unwrap_or_default()
    }
}

#[async_trait]
impl Connector for SimulatedConnector {
    async fn connect(&self, target: &DeviceTarget) -> Result<Box<dyn CliChannel>, AdapterError> {
        if self.lab().unreachable.contains(&target.hostname) {
            return Err(AdapterError::Connection(format!(
                "connection to {}:{} refused",
                target.address, target.port
            )));
        }
        Ok(Box::new(SimulatedChannel {
            host: target.hostname.clone(),
            lab: self.lab.clone(),
            open: true,
        }))
    }

    async fn probe(&self, device: &Device) -> bool {
        !self.lab().unreachable.contains(&device.hostname)
    }
}

/// CLI mode of an interactive shell. Config modes carry the open sub-mode parent.
#[derive(Debug, Clone, PartialEq)]
enum Mode {
    Exec,
    Config(Option<String>),
    Session { name: String, parent: Option<String> },
}

pub struct SimulatedChannel {
    host: String,
    lab: Arc<Mutex<LabState>>,
    open: bool,
}

fn is_show_running(command: &str) -> bool {
    matches!(command, "show running-config" | "show run" | "show running")
}

type Step = (Option<Mode>, Option<String>);

impl SimulatedChannel {
    fn lab(&self) -> MutexGuard<'_, LabState> {
        self.lab.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn key(&self, session: &str) -> (String, String) {
        (self.host.clone(), session.to_string())
    }

    fn ensure_open(&self) -> Result<(), AdapterError> {
        if self.open {
            Ok(())
        } else {
            Err(AdapterError::Connection(format!("session to {} is closed", self.host)))
        }
    }

    fn exec_output(&self, command: &str) -> String {
        if is_rejected(command) {
            return format!("[MOCK] {}> {}\n{}", self.host, command, INVALID_INPUT);
        }
        if is_show_running(command) {
            let mut out = format!(
                "[MOCK] {}> {}\nBuilding configuration...\n!\nhostname {}\n",
                self.host, command, self.host
            );
            let running = self.lab().running.get(&self.host).map(|s| flatten(s)).unwrap_or_default();
            for line in running {
                out.push_str(&line);
                out.push('\n');
            }
            out.push_str("!\nend");
            return out;
        }
        format!("[MOCK] {}> {}\nSample output for '{}' on {}", self.host, command, command, self.host)
    }

    fn prompt(&self, mode: &Mode) -> String {
        match mode {
            Mode::Exec => format!("{}#", self.host),
            Mode::Config(None) => format!("{}(config)#", self.host),
            Mode::Config(Some(parent)) => {
                format!("{}({})#", self.host, submode_prompt(parent).unwrap_or("config-sub"))
            }
            Mode::Session { name, .. } => format!("{}(config-s-{})#", self.host, name),
        }
    }

    /// Apply one typed line, returning the new mode and any device response.
    /// A None mode means the shell exited.
    fn step(&self, mode: &Mode, line: &str) -> Step {
        let text = line.trim();
        match mode {
            Mode::Exec => self.step_exec(text),
            Mode::Config(parent) => self.step_config(parent.as_deref(), line, text),
            Mode::Session { name, parent } => self.step_session(name, parent.as_deref(), line, text),
        }
    }

    fn step_exec(&self, text: &str) -> Step {
        match text {
            "exit" => (None, None),
            "terminal length 0" => (Some(Mode::Exec), None),
            "configure terminal" => (Some(Mode::Config(None)), Some(ENTER_CONFIG.to_string())),
            "write memory" => (Some(Mode::Exec), Some("Building configuration...\n[OK]".to_string())),
            _ => match text.strip_prefix("configure session ") {
                Some(name) => {
                    let name = name.trim().to_string();
                    self.lab().sessions.entry(self.key(&name)).or_default();
                    (Some(Mode::Session { name, parent: None }), None)
                }
                None => {
                    let out = self.exec_output(text);
                    (Some(Mode::Exec), out.split_once('\n').map(|(_, rest)| rest.to_string()))
                }
            },
        }
    }

    fn step_config(&self, parent: Option<&str>, line: &str, text: &str) -> Step {
        match (text, parent) {
            ("end", _) => (Some(Mode::Exec), None),
            ("exit", Some(_)) => (Some(Mode::Config(None)), None),
            ("exit", None) => (Some(Mode::Exec), None),
            _ => match place(parent, line) {
                Some(placement) => {
                    let mut lab = self.lab();
                    apply(lab.running.entry(self.host.clone()).or_default(), &placement);
                    (Some(Mode::Config(placement.next_parent())), None)
                }
                None => (
                    Some(Mode::Config(parent.map(str::to_string))),
                    Some(INVALID_INPUT.to_string()),
                ),
            },
        }
    }

    fn step_session(&self, name: &str, parent: Option<&str>, line: &str, text: &str) -> Step {
        let stay = |parent: Option<String>| {
            Some(Mode::Session {
                name: name.to_string(),
                parent,
            })
        };

        match (text, parent) {
            ("end", _) => (Some(Mode::Exec), None),
            ("exit", Some(_)) => (stay(None), None),
            ("exit", None) => (Some(Mode::Exec), None),
            ("show session-config diffs", _) => {
                let lab = self.lab();
                let staged = lab.sessions.get(&self.key(name)).cloned().unwrap_or_default();
                let running = lab.running.get(&self.host).cloned().unwrap_or_default();
                let mut candidate = running.clone();
                replay(&mut candidate, &staged);
                (stay(parent.map(str::to_string)), Some(session_diff(name, &running, &candidate)))
            }
            ("commit", _) => {
                let mut lab = self.lab();
                let staged = lab.sessions.remove(&self.key(name)).unwrap_or_default();
                replay(lab.running.entry(self.host.clone()).or_default(), &staged);
                (Some(Mode::Exec), None)
            }
            ("abort", _) => {
                self.lab().sessions.remove(&self.key(name));
                (Some(Mode::Exec), None)
            }
            _ => match place(parent, line) {
                Some(placement) => {
                    self.lab().sessions.entry(self.key(name)).or_default().push(line.to_string());
                    (stay(placement.next_parent()), None)
                }
                None => (stay(parent.map(str::to_string)), Some(INVALID_INPUT.to_string())),
            },
        }
    }
}

#[async_trait]
impl CliChannel for SimulatedChannel {
    async fn send_command(&mut self, command: &str) -> Result<String, AdapterError> {
        self.ensure_open()?;
        Ok(self.exec_output(command.trim()))
    }

    async fn send_interactive(&mut self, lines: &[String]) -> Result<String, AdapterError> {
        self.ensure_open()?;

        let mut mode = Mode::Exec;
        let mut transcript = Vec::new();
        for raw in lines {
            let line = raw.trim_end();
            if line.trim().is_empty() {
                continue;
            }
            transcript.push(format!("{} {}", self.prompt(&mode), line));
            let (next, response) = self.step(&mode, line);
            if let Some(response) = response {
                transcript.push(response);
            }
            match next {
                Some(next) => mode = next,
                None => return Ok(transcript.join("\n")),
            }
        }
        transcript.push(self.prompt(&mode));
        Ok(transcript.join("\n"))
    }

    async fn close(&mut self) {
        self.open = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Credentials;

    fn target(host: &str) -> DeviceTarget {
        DeviceTarget {
            device_id: 1,
            hostname: host.to_string(),
            address: "172.16.39.102".to_string(),
            port: 32783,
            platform: "ios".to_string(),
            credentials: Credentials {
                username: "cisco".to_string(),
                password: "cisco".to_string(),
            },
        }
    }

    fn lines(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|l| l.to_string()).collect()
    }

    #[tokio::test]
    async fn test_exec_output_is_deterministic() {
        let connector = SimulatedConnector::default();
        let mut ch = connector.connect(&target("R15")).await.unwrap();
        let first = ch.send_command("show version").await.unwrap();
        let second = ch.send_command("show version").await.unwrap();
        assert_eq!(first, second);
        assert!(first.starts_with("[MOCK] R15> show version"));
        assert!(ch.send_command("").await.unwrap().contains("% Invalid input"));
    }

    #[tokio::test]
    async fn test_config_mode_updates_running_config() {
        let connector = SimulatedConnector::default();
        let mut ch = connector.connect(&target("R16")).await.unwrap();
        let out = ch
            .send_interactive(&lines(&["configure terminal", "vlan 10", "end", "write memory"]))
            .await
            .unwrap();
        assert!(out.contains("R16(config)# vlan 10"));
        assert!(out.contains("[OK]"));
        assert_eq!(connector.running_config("R16"), vec!["vlan 10"]);

        let run = ch.send_command("show running-config").await.unwrap();
        assert!(run.contains("hostname R16\nvlan 10\n"));
    }

    #[tokio::test]
    async fn test_submode_lines_stay_under_their_parent() {
        let connector = SimulatedConnector::default();
        let mut ch = connector.connect(&target("R15")).await.unwrap();
        let out = ch
            .send_interactive(&lines(&[
                "configure terminal",
                "interface GigabitEthernet0/1",
                " ip address 10.0.0.1 255.255.255.0",
                " no shutdown",
                "interface GigabitEthernet0/2",
                " no shutdown",
                "ip route 0.0.0.0 0.0.0.0 10.0.0.254",
                "end",
            ]))
            .await
            .unwrap();
        assert!(out.contains("R15(config-if)#  no shutdown"));
        assert!(out.contains("R15(config-if)# ip route 0.0.0.0 0.0.0.0 10.0.0.254"));
        assert!(!out.contains("% Invalid input"));
        assert_eq!(
            connector.running_config("R15"),
            vec![
                "interface GigabitEthernet0/1",
                " ip address 10.0.0.1 255.255.255.0",
                " no shutdown",
                "interface GigabitEthernet0/2",
                " no shutdown",
                "ip route 0.0.0.0 0.0.0.0 10.0.0.254",
            ]
        );
    }

    #[tokio::test]
    async fn test_indented_line_at_global_level_is_rejected() {
        let connector = SimulatedConnector::default();
        let mut ch = connector.connect(&target("R16")).await.unwrap();
        let out = ch
            .send_interactive(&lines(&["configure terminal", " ip address 10.0.0.1 255.255.255.0", "end"]))
            .await
            .unwrap();
        assert!(out.contains(INVALID_INPUT));
        assert!(connector.running_config("R16").is_empty());

        // `exit` leaves the sub-mode, so the next indented line has no parent
        let out = ch
            .send_interactive(&lines(&["configure terminal", "interface Loopback0", "exit", " shutdown", "end"]))
            .await
            .unwrap();
        assert!(out.contains(INVALID_INPUT));
        assert_eq!(connector.running_config("R16"), vec!["interface Loopback0"]);
    }

    #[tokio::test]
    async fn test_session_diff_shows_parent_as_context() {
        let connector = SimulatedConnector::default();
        let mut ch = connector.connect(&target("R18")).await.unwrap();
        ch.send_interactive(&lines(&["configure terminal", "interface Gi0/1", " no shutdown", "end"]))
            .await
            .unwrap();

        let out = ch
            .send_interactive(&lines(&[
                "configure session s2",
                "interface Gi0/1",
                " description uplink",
                " no shutdown",
                "show session-config diffs",
                "commit",
            ]))
            .await
            .unwrap();
        assert!(out.contains("\n interface Gi0/1\n+ description uplink"));
        assert!(!out.contains("+ no shutdown"));
        assert_eq!(
            connector.running_config("R18"),
            vec!["interface Gi0/1", " no shutdown", " description uplink"]
        );
    }

    #[tokio::test]
    async fn test_session_abort_discards_staged_lines() {
        let connector = SimulatedConnector::default();
        let mut ch = connector.connect(&target("R17")).await.unwrap();
        let out = ch
            .send_interactive(&lines(&[
                "configure session s1",
                "ip route 0.0.0.0 0.0.0.0 10.0.0.1",
                "show session-config diffs",
                "abort",
            ]))
            .await
            .unwrap();
        assert!(out.contains("+ip route 0.0.0.0 0.0.0.0 10.0.0.1"));
        assert!(connector.running_config("R17").is_empty());
    }

    #[tokio::test]
    async fn test_unreachable_and_closed_channels_fail() {
        let connector = SimulatedConnector::default();
        connector.set_unreachable("R18", true);
        assert!(matches!(
            connector.connect(&target("R18")).await,
            Err(AdapterError::Connection(_))
        ));

        let mut ch = connector.connect(&target("R19")).await.unwrap();
        ch.close().await;
        ch.close().await;
        assert!(matches!(
            ch.send_command("show clock").await,
            Err(AdapterError::Connection(_))
        ));
    }
}
