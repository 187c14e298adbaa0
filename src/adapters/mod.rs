//! Backend adapters.
//!
//! Every automation style (Netmiko, NAPALM, Nornir) implements the same
//! [`DeviceAdapter`] contract over a [`CliChannel`] opened by a
//! [`Connector`]. The dispatcher only ever sees the trait.

mod napalm;
mod netmiko;
mod nornir;
pub mod simulated;
pub mod transport;

use async_trait::async_trait;
use regex_lite::Regex;
use std::sync::{Arc, OnceLock};

use crate::config::Credentials;
use crate::models::{error_kind, Device, Method};
use crate::utils::static_regex;

pub use napalm::NapalmAdapter;
pub use netmiko::NetmikoAdapter;
pub use nornir::NornirAdapter;
pub use transport::{CliChannel, Connector};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AdapterError {
    /// Unreachable, auth failure, timeout, or session dropped mid-call
    #[error("connection error: {0}")]
    Connection(String),
    /// Device rejected the command or config
    #[error("command rejected: {0}")]
    Command(String),
    #[error("{0} backend does not support validate-only (dry-run)")]
    ValidationUnsupported(Method),
}

impl AdapterError {
    /// Only transport failures are worth another attempt
    pub fn is_retryable(&self) -> bool {
        matches!(self, AdapterError::Connection(_))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            AdapterError::Connection(_) => error_kind::CONNECTION_ERROR,
            AdapterError::Command(_) => error_kind::COMMAND_ERROR,
            AdapterError::ValidationUnsupported(_) => error_kind::VALIDATION_UNSUPPORTED,
        }
    }
}

/// Connection snapshot of a device, captured when a job is dispatched
#[derive(Debug, Clone)]
pub struct DeviceTarget {
    pub device_id: i64,
    pub hostname: String,
    pub address: String,
    pub port: u16,
    pub platform: String,
    pub credentials: Credentials,
}

impl DeviceTarget {
    pub fn from_device(device: &Device, credentials: Credentials) -> Self {
        Self {
            device_id: device.id,
            hostname: device.hostname.clone(),
            address: device.management_address.clone(),
            port: u16::try_from(device.port).unwrap_or(22),
            platform: device.platform.clone(),
            credentials,
        }
    }
}

/// An open CLI session on one device. Closing twice is a no-op.
pub struct Session {
    hostname: String,
    channel: Option<Box<dyn CliChannel>>,
}

impl Session {
    pub fn new(hostname: &str, channel: Box<dyn CliChannel>) -> Self {
        Self {
            hostname: hostname.to_string(),
            channel: Some(channel),
        }
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    pub fn is_open(&self) -> bool {
        self.channel.is_some()
    }

    pub fn channel(&mut self) -> Result<&mut (dyn CliChannel + 'static), AdapterError> {
        self.channel
            .as_deref_mut()
            .ok_or_else(|| AdapterError::Connection(format!("session to {} is closed", self.hostname)))
    }

    pub async fn shutdown(&mut self) {
        if let Some(mut channel) = self.channel.take() {
            channel.close().await;
        }
    }
}

/// Uniform capability set every backend exposes
#[async_trait]
pub trait DeviceAdapter: Send + Sync {
    fn method(&self) -> Method;

    fn supports_dry_run(&self) -> bool {
        false
    }

    async fn open_session(&self, target: &DeviceTarget) -> Result<Session, AdapterError>;

    async fn exec_command(&self, session: &mut Session, command: &str) -> Result<String, AdapterError>;

    async fn exec_config(&self, session: &mut Session, lines: &[String]) -> Result<String, AdapterError>;

    /// Show what `exec_config` would change without applying it
    async fn exec_config_dry_run(&self, _session: &mut Session, _lines: &[String]) -> Result<String, AdapterError> {
        Err(AdapterError::ValidationUnsupported(self.method()))
    }

    async fn close(&self, session: &mut Session) {
        session.shutdown().await;
    }
}

/// One adapter per method
#[derive(Clone)]
pub struct AdapterSet {
    netmiko: Arc<dyn DeviceAdapter>,
    napalm: Arc<dyn DeviceAdapter>,
    nornir: Arc<dyn DeviceAdapter>,
}

impl AdapterSet {
    /// The three built-in backends sharing one transport
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        Self {
            netmiko: Arc::new(NetmikoAdapter::new(connector.clone())),
            napalm: Arc::new(NapalmAdapter::new(connector.clone())),
            nornir: Arc::new(NornirAdapter::new(connector)),
        }
    }

    #[cfg(test)]
    pub fn with_adapters(
        netmiko: Arc<dyn DeviceAdapter>,
        napalm: Arc<dyn DeviceAdapter>,
        nornir: Arc<dyn DeviceAdapter>,
    ) -> Self {
        Self { netmiko, napalm, nornir }
    }

    pub fn get(&self, method: Method) -> Arc<dyn DeviceAdapter> {
        match method {
            Method::Netmiko => self.netmiko.clone(),
            Method::Napalm => self.napalm.clone(),
            Method::Nornir => self.nornir.clone(),
        }
    }
}

/// Markers IOS-style CLIs print when they refuse input.
/// A device reply line must start with one of these to count as a rejection.
const CLI_ERROR_MARKERS: &[&str] = &[
    "% Invalid input",
    "% Incomplete command",
    "% Ambiguous command",
    "% Unknown command",
    "% Invalid command",
    "% Error",
    "syntax error",
];

static PROMPT_ECHO: OnceLock<Option<Regex>> = OnceLock::new();

/// What was typed after a prompt echo (`R15#`, `R15>`, `R15(config-if)#`,
/// the simulator's `[MOCK] R15>`). None when `line` is device output.
pub(crate) fn echoed_input(line: &str) -> Option<&str> {
    let prompt = static_regex(&PROMPT_ECHO, r"^(\[MOCK\] )?[A-Za-z0-9][\w.\-]*(\([\w\-]+\))?[#>]")?;
    let end = prompt.find(line)?.end();
    let typed = &line[end..];
    Some(typed.strip_prefix(' ').unwrap_or(typed))
}

fn is_prompt_echo(line: &str) -> bool {
    echoed_input(line).is_some()
}

fn is_rejection(line: &str) -> bool {
    CLI_ERROR_MARKERS.iter().any(|m| line.starts_with(m))
}

/// Lines the device printed, without the echoed input
fn device_replies(output: &str) -> impl Iterator<Item = &str> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !is_prompt_echo(line))
}

/// First device reply in a config transcript that rejects a line
pub fn detect_cli_error(output: &str) -> Option<String> {
    device_replies(output).find(|line| is_rejection(line)).map(str::to_string)
}

/// Rejection of an exec command. Only the device's first reply is checked;
/// whatever the command returns after that is content, not a verdict.
pub fn detect_command_error(output: &str) -> Option<String> {
    device_replies(output)
        .find(|line| !line.chars().all(|c| c == '^' || c.is_whitespace()))
        .filter(|line| is_rejection(line))
        .map(str::to_string)
}

/// Map a config transcript to a CommandError when the CLI refused a line
pub(crate) fn check_config_output(output: String, what: &str) -> Result<String, AdapterError> {
    match detect_cli_error(&output) {
        Some(marker) => Err(AdapterError::Command(format!("{}: {}", what, marker))),
        None => Ok(output),
    }
}

/// Map exec output to a CommandError when the CLI refused the command
pub(crate) fn check_command_output(output: String, command: &str) -> Result<String, AdapterError> {
    match detect_command_error(&output) {
        Some(marker) => Err(AdapterError::Command(format!("{}: {}", command, marker))),
        None => Ok(output),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_cli_error() {
        let out = "R15(config)# interfase Gi0/1\n% Invalid input detected at '^' marker.\nR15(config)#";
        assert_eq!(
            detect_cli_error(out).as_deref(),
            Some("% Invalid input detected at '^' marker.")
        );
        assert!(detect_cli_error("hostname R15\n!\nend").is_none());
        assert!(detect_cli_error("% Incomplete command.").is_some());
    }

    #[test]
    fn test_echoed_input_is_not_a_rejection() {
        let banner = "R15# configure terminal\nR15(config)# banner motd ^% Error: authorized use only^\nR15(config)# end\nR15#";
        assert!(detect_cli_error(banner).is_none());

        let description = "R15(config)# interface Gi0/2\nR15(config-if)#  description syntax error test link\nR15(config-if)# end";
        assert!(detect_cli_error(description).is_none());
        assert!(check_config_output(description.to_string(), "config set").is_ok());
    }

    #[test]
    fn test_echoed_input() {
        assert_eq!(echoed_input("R15(config-if)#  no shutdown"), Some(" no shutdown"));
        assert_eq!(echoed_input("core-sw1.lab# show clock"), Some("show clock"));
        assert_eq!(echoed_input("[MOCK] R15> show version"), Some("show version"));
        assert_eq!(echoed_input("R15#"), Some(""));
        assert_eq!(echoed_input("% Invalid input detected at '^' marker."), None);
        assert_eq!(echoed_input("Building configuration..."), None);
    }

    #[test]
    fn test_command_content_is_not_a_rejection() {
        let log = "[MOCK] R15> show logging\nSyslog logging: enabled\n% Error opening tftp://10.0.0.9/cfg (timed out)";
        assert!(detect_command_error(log).is_none());
        assert!(check_command_output(log.to_string(), "show logging").is_ok());

        let running = "Building configuration...\n!\nbanner motd ^% Error: authorized use only^\nend";
        assert!(detect_command_error(running).is_none());

        let refused = "R15> show versoin\n          ^\n% Invalid input detected at '^' marker.";
        assert_eq!(
            detect_command_error(refused).as_deref(),
            Some("% Invalid input detected at '^' marker.")
        );
    }

    #[test]
    fn test_error_classification() {
        assert!(AdapterError::Connection("reset".into()).is_retryable());
        assert!(!AdapterError::Command("bad".into()).is_retryable());
        assert!(!AdapterError::ValidationUnsupported(Method::Netmiko).is_retryable());
        assert_eq!(AdapterError::Command("x".into()).kind(), error_kind::COMMAND_ERROR);
        assert_eq!(
            AdapterError::ValidationUnsupported(Method::Nornir).to_string(),
            "nornir backend does not support validate-only (dry-run)"
        );
    }

    #[test]
    fn test_adapter_set_selects_by_method() {
        let set = AdapterSet::new(Arc::new(simulated::SimulatedConnector::default()));
        for method in Method::ALL {
            assert_eq!(set.get(method).method(), method);
        }
        assert!(set.get(Method::Napalm).supports_dry_run());
        assert!(!set.get(Method::Netmiko).supports_dry_run());
        assert!(!set.get(Method::Nornir).supports_dry_run());
    }
}
