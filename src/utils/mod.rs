use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::OnceLock;
use std::time::Duration;

use regex_lite::Regex;

use crate::config::Credentials;

/// Keyboard-interactive prompt handler that always responds with the password
struct PasswordPrompt {
    password: String,
}

impl ssh2::KeyboardInteractivePrompt for PasswordPrompt {
    fn prompt<'a>(
        &mut self,
        _username: &str,
        _instructions: &str,
        prompts: &[ssh2::Prompt<'a>],
    ) -> Vec<String> {
        prompts.iter().map(|_| self.password.clone()).collect()
    }
}

/// Compile a fixed pattern once and reuse it. None if the pattern is invalid.
pub fn static_regex(cell: &'static OnceLock<Option<Regex>>, pattern: &str) -> Option<&'static Regex> {
    cell.get_or_init(|| Regex::new(pattern).ok()).as_ref()
}

/// Validate an IPv4 address (e.g., "192.168.1.1").
pub fn is_valid_ipv4(ip: &str) -> bool {
    let parts: Vec<&str> = ip.split('.').collect();
    parts.len() == 4 && parts.iter().all(|p| p.parse::<u8>().is_ok())
}

/// Validate a hostname.
/// Allows alphanumeric, hyphens, dots, and underscores. No path separators or shell metacharacters.
pub fn is_valid_hostname(hostname: &str) -> bool {
    if hostname.is_empty() || hostname.len() > 253 {
        return false;
    }
    hostname.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '.' || c == '_')
}

/// Check the connection fields of a device before it enters the registry
pub fn validate_device_fields(hostname: &str, address: &str, port: i32) -> Result<(), String> {
    if !is_valid_hostname(hostname) {
        return Err("invalid hostname: only alphanumeric, hyphens, dots, and underscores allowed".to_string());
    }
    if address.trim().is_empty() {
        return Err("management_address is required".to_string());
    }
    if !is_valid_ipv4(address) && !is_valid_hostname(address) {
        return Err(format!("invalid management_address: {}", address));
    }
    if !(1..=65535).contains(&port) {
        return Err(format!("port out of range: {}", port));
    }
    Ok(())
}

fn resolve_addr(host: &str, port: u16) -> Result<SocketAddr, String> {
    (host, port)
        .to_socket_addrs()
        .map_err(|e| format!("Cannot resolve {}:{}: {}", host, port, e))?
        .next()
        .ok_or_else(|| format!("No address for {}:{}", host, port))
}

/// Plain TCP reachability probe. Blocking; call from spawn_blocking.
pub fn tcp_probe(host: &str, port: u16, timeout: Duration) -> bool {
    match resolve_addr(host, port) {
        Ok(addr) => TcpStream::connect_timeout(&addr, timeout).is_ok(),
        Err(_) => false,
    }
}

/// Create an SSH session and authenticate with password + keyboard-interactive.
/// This is blocking, so call from a spawn_blocking context.
pub fn ssh_connect(host: &str, port: u16, creds: &Credentials, timeout: Duration) -> Result<ssh2::Session, String> {
    let addr = resolve_addr(host, port)?;
    let tcp = TcpStream::connect_timeout(&addr, timeout)
        .map_err(|e| format!("TCP connection to {} failed: {}", addr, e))?;

    tcp.set_read_timeout(Some(timeout)).ok();
    tcp.set_write_timeout(Some(timeout)).ok();

    let mut session = ssh2::Session::new()
        .map_err(|e| format!("Failed to create SSH session: {}", e))?;
    session.set_tcp_stream(tcp);
    session.set_timeout(timeout.as_millis().min(u32::MAX as u128) as u32);
    session.handshake()
        .map_err(|e| format!("SSH handshake failed: {}", e))?;

    if let Ok(()) = session.userauth_password(&creds.username, &creds.password) {
        if session.authenticated() {
            return Ok(session);
        }
    }

    // Keyboard-interactive is what IOS and EOS usually offer
    let mut prompter = PasswordPrompt { password: creds.password.clone() };
    let _ = session.userauth_keyboard_interactive(&creds.username, &mut prompter);

    if session.authenticated() {
        Ok(session)
    } else {
        Err(format!("SSH authentication failed for {}@{}", creds.username, host))
    }
}

/// Run one command on an exec channel of an established session
pub fn ssh_exec(session: &ssh2::Session, command: &str) -> Result<String, String> {
    let mut channel = session.channel_session()
        .map_err(|e| format!("Failed to open channel: {}", e))?;

    channel.exec(command)
        .map_err(|e| format!("Failed to execute command: {}", e))?;

    let mut output = String::new();
    channel.read_to_string(&mut output)
        .map_err(|e| format!("Failed to read output: {}", e))?;

    channel.wait_close()
        .map_err(|e| format!("Failed to close channel: {}", e))?;

    Ok(output)
}

/// Feed lines to an interactive PTY shell and return the whole transcript.
/// The shell is told to exit after the last line, so the read ends at EOF.
pub fn ssh_shell(session: &ssh2::Session, lines: &[String]) -> Result<String, String> {
    let mut channel = session.channel_session()
        .map_err(|e| format!("Failed to open channel: {}", e))?;
    channel.request_pty("vt100", None, Some((200, 1000, 0, 0)))
        .map_err(|e| format!("PTY request failed: {}", e))?;
    channel.shell()
        .map_err(|e| format!("Failed to start shell: {}", e))?;

    let mut script = String::from("terminal length 0\n");
    for line in lines {
        script.push_str(line);
        script.push('\n');
    }
    script.push_str("exit\n");

    channel.write_all(script.as_bytes())
        .map_err(|e| format!("Failed to write to shell: {}", e))?;
    channel.flush().ok();
    channel.send_eof().ok();

    let mut output = String::new();
    channel.read_to_string(&mut output)
        .map_err(|e| format!("Failed to read shell output: {}", e))?;
    let _ = channel.wait_close();

    Ok(output)
}
