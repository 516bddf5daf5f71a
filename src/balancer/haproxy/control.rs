//! Control of a running HAProxy process.
//!
//! Commands go over the admin stats socket, one connection per command.
//! Restarts re-exec the binary with `-sf` so the old process drains.

use std::collections::BTreeMap;
use std::fmt;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::OnceLock;

use regex::Regex;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;
use tokio::process::Command;

use crate::config::schema::HaproxySettings;
use crate::observability::metrics;
use crate::topology::Peer;

const SOCKET_BUFFER_SIZE: usize = 8192;

#[derive(Debug, Error)]
pub enum ControlError {
    /// Nothing is listening on the control socket.
    #[error("control socket {0} unavailable, is HAProxy running?")]
    Unavailable(PathBuf),

    #[error("unknown command: {0}")]
    UnknownCommand(String),

    #[error("permission denied for command: {0}")]
    PermissionDenied(String),

    #[error("unknown backend or server in command: {0}")]
    UnknownBackend(String),

    #[error("control socket I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("restart failed: {0}")]
    Restart(String),
}

/// `major.minor.patch` of the installed binary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Version(pub u32, pub u32, pub u32);

impl Version {
    /// Parse the first `x.y.z` found in a version line.
    pub fn parse(line: &str) -> Option<Self> {
        static VERSION_RE: OnceLock<Option<Regex>> = OnceLock::new();
        let re = VERSION_RE.get_or_init(|| Regex::new(r"(\d+)\.(\d+)\.(\d+)").ok()).as_ref()?;
        let caps = re.captures(line)?;
        Some(Version(caps[1].parse().ok()?, caps[2].parse().ok()?, caps[3].parse().ok()?))
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.0, self.1, self.2)
    }
}

/// One server row of `show stat`, keyed by CSV header field.
pub type ServerStats = BTreeMap<String, String>;

/// Map a raw reply onto its typed error, or return it as command output.
pub fn process_response(command: &str, response: &[u8]) -> Result<String, ControlError> {
    let text = String::from_utf8_lossy(response);
    let trimmed = text.trim_end_matches('\n');

    if text.starts_with("Unknown command.") {
        return Err(ControlError::UnknownCommand(command.to_string()));
    }
    if trimmed == "Permission denied." {
        return Err(ControlError::PermissionDenied(command.to_string()));
    }
    if trimmed == "No such backend." || trimmed == "No such server." {
        return Err(ControlError::UnknownBackend(command.to_string()));
    }
    Ok(trimmed.to_string())
}

/// `show stat` CSV grouped by proxy name.
pub fn parse_stats(csv: &str) -> BTreeMap<String, Vec<ServerStats>> {
    let mut lines = csv.lines().filter(|line| !line.trim().is_empty());
    let Some(header) = lines.next() else {
        return BTreeMap::new();
    };
    let fields: Vec<&str> = header.trim_start_matches('#').trim().split(',').skip(1).collect();

    let mut grouped: BTreeMap<String, Vec<ServerStats>> = BTreeMap::new();
    for line in lines {
        let mut values = line.split(',');
        let Some(proxy) = values.next() else {
            continue;
        };
        let row = fields
            .iter()
            .zip(values)
            .filter(|(field, _)| !field.is_empty())
            .map(|(field, value)| (field.to_string(), value.to_string()))
            .collect();
        grouped.entry(proxy.to_string()).or_default().push(row);
    }
    grouped
}

/// `show info` lines (`Label: value`) keyed by snake_case label.
pub fn parse_info(text: &str) -> BTreeMap<String, String> {
    text.lines()
        .filter_map(|line| line.split_once(": "))
        .map(|(label, value)| (snake_case(label), value.to_string()))
        .collect()
}

fn snake_case(label: &str) -> String {
    let chars: Vec<char> = label.chars().collect();
    let mut out = String::with_capacity(label.len() + 4);
    for (i, c) in chars.iter().enumerate() {
        if c.is_uppercase() && i > 0 {
            let prev = chars[i - 1];
            let next_lower = chars.get(i + 1).is_some_and(|n| n.is_lowercase());
            if prev.is_lowercase() || prev.is_ascii_digit() || (prev.is_uppercase() && next_lower) {
                out.push('_');
            }
        }
        out.extend(c.to_lowercase());
    }
    out
}

/// Handle on one HAProxy installation.
#[derive(Debug, Clone)]
pub struct Control {
    binary: String,
    config_file: PathBuf,
    socket_file: PathBuf,
    pid_file: PathBuf,
}

impl Control {
    pub fn new(settings: &HaproxySettings) -> Self {
        Self {
            binary: settings.binary.clone(),
            config_file: settings.config_file.clone(),
            socket_file: settings.socket_file.clone(),
            pid_file: settings.pid_file.clone(),
        }
    }

    /// Send one command and read the reply until the peer closes.
    pub async fn send_command(&self, command: &str) -> Result<String, ControlError> {
        tracing::debug!(socket = ?self.socket_file, command = %command, "Sending control command");

        let mut stream = match UnixStream::connect(&self.socket_file).await {
            Ok(stream) => stream,
            Err(e) if matches!(e.kind(), ErrorKind::ConnectionRefused | ErrorKind::NotFound) => {
                return Err(ControlError::Unavailable(self.socket_file.clone()));
            }
            Err(e) => return Err(e.into()),
        };

        stream.write_all(format!("{}\n", command).as_bytes()).await?;

        let mut response = Vec::new();
        let mut chunk = vec![0u8; SOCKET_BUFFER_SIZE];
        loop {
            match stream.read(&mut chunk).await {
                Ok(0) => break,
                Ok(n) => {
                    response.extend_from_slice(&chunk[..n]);
                    if response.ends_with(b"\n\n") {
                        break;
                    }
                }
                Err(e) if matches!(e.kind(), ErrorKind::Interrupted | ErrorKind::WouldBlock) => continue,
                Err(e) => return Err(e.into()),
            }
        }

        process_response(command, &response)
    }

    /// Installed version, or `None` if it cannot be determined.
    pub async fn version(&self) -> Option<Version> {
        let output = match Command::new(&self.binary).arg("-v").output().await {
            Ok(output) if output.status.success() => output,
            Ok(output) => {
                tracing::error!(binary = %self.binary, status = %output.status, "Could not get HAProxy version");
                return None;
            }
            Err(e) => {
                tracing::error!(binary = %self.binary, error = %e, "Could not get HAProxy version");
                return None;
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        let line = stdout.lines().next().unwrap_or("");
        let version = Version::parse(line);
        match version {
            Some(version) => tracing::debug!(version = %version, "Got HAProxy version"),
            None => tracing::debug!(line = %line, "Could not parse HAProxy version"),
        }
        version
    }

    pub async fn info(&self) -> Result<BTreeMap<String, String>, ControlError> {
        Ok(parse_info(&self.send_command("show info").await?))
    }

    /// Servers the running process knows about, grouped by backend.
    ///
    /// An unavailable socket yields an empty map.
    pub async fn active_nodes(&self) -> Result<BTreeMap<String, Vec<ServerStats>>, ControlError> {
        // proxy id -1 (all), type 4 (servers), server id -1 (all)
        match self.send_command("show stat -1 4 -1").await {
            Ok(csv) => Ok(parse_stats(&csv)),
            Err(ControlError::Unavailable(path)) => {
                tracing::warn!(socket = ?path, "Control socket unavailable, assuming no active nodes");
                Ok(BTreeMap::new())
            }
            Err(e) => Err(e),
        }
    }

    pub async fn enable_server(&self, backend: &str, server: &str) -> Result<String, ControlError> {
        tracing::info!(backend = %backend, server = %server, "Enabling server");
        let result = self.send_command(&format!("enable server {}/{}", backend, server)).await;
        metrics::record_control_command("enable", matches!(&result, Ok(reply) if reply.is_empty()));
        result
    }

    pub async fn disable_server(&self, backend: &str, server: &str) -> Result<String, ControlError> {
        tracing::info!(backend = %backend, server = %server, "Disabling server");
        let result = self.send_command(&format!("disable server {}/{}", backend, server)).await;
        metrics::record_control_command("disable", matches!(&result, Ok(reply) if reply.is_empty()));
        result
    }

    /// Arguments for a graceful restart.
    pub fn restart_args(&self, version: Option<Version>, peer: &Peer, old_pid: Option<&str>) -> Vec<String> {
        let mut args = vec![
            "-f".to_string(),
            self.config_file.display().to_string(),
            "-p".to_string(),
            self.pid_file.display().to_string(),
        ];
        if version.is_some_and(|version| version >= super::config::PEERS_MIN_VERSION) {
            args.extend(["-L".to_string(), peer.name.clone()]);
        }
        if let Some(pid) = old_pid.map(str::trim).filter(|pid| !pid.is_empty()) {
            args.extend(["-sf".to_string(), pid.to_string()]);
        }
        args
    }

    /// Start a new process on the current config file, handing off from the
    /// old one if a PID file exists.
    pub async fn restart(&self, version: Option<Version>, peer: &Peer) -> Result<(), ControlError> {
        let old_pid = match tokio::fs::read_to_string(&self.pid_file).await {
            Ok(pid) => Some(pid),
            Err(e) if e.kind() == ErrorKind::NotFound => None,
            Err(e) => {
                tracing::warn!(pid_file = ?self.pid_file, error = %e, "Could not read PID file");
                None
            }
        };

        let args = self.restart_args(version, peer, old_pid.as_deref());
        let output = Command::new(&self.binary)
            .args(&args)
            .output()
            .await
            .map_err(|e| ControlError::Restart(format!("{}: {}", self.binary, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(ControlError::Restart(format!("{} ({})", output.status, stderr)));
        }
        if !output.stdout.is_empty() {
            tracing::error!(output = %String::from_utf8_lossy(&output.stdout).trim(), "HAProxy says");
        }

        tracing::info!(args = ?args, "Gracefully restarted HAProxy");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_parse() {
        assert_eq!(
            Version::parse("HA-Proxy version 1.5.3 2014/07/25"),
            Some(Version(1, 5, 3))
        );
        assert_eq!(Version::parse("HAProxy version 2.8.3-86e043a 2023/09/07"), Some(Version(2, 8, 3)));
        assert_eq!(Version::parse("garbage"), None);
        assert!(Version(1, 4, 24) < Version(1, 5, 0));
    }

    #[test]
    fn test_process_response() {
        assert!(matches!(
            process_response("bogus", b"Unknown command. Please enter one of the following commands only :\n..."),
            Err(ControlError::UnknownCommand(_))
        ));
        assert!(matches!(
            process_response("disable server a/b", b"Permission denied.\n"),
            Err(ControlError::PermissionDenied(_))
        ));
        assert!(matches!(
            process_response("disable server a/b", b"No such backend.\n"),
            Err(ControlError::UnknownBackend(_))
        ));
        assert_eq!(process_response("enable server a/b", b"\n").unwrap(), "");
        assert_eq!(process_response("show info", b"Name: HAProxy\n\n").unwrap(), "Name: HAProxy");
    }

    #[test]
    fn test_parse_stats_groups_by_proxy() {
        let csv = "# pxname,svname,status,weight\n\
                   web,app1:80,UP,1\n\
                   web,app2:80,MAINT,1\n\
                   cache,redis1:6379,UP,1\n\n";
        let stats = parse_stats(csv);
        assert_eq!(stats.len(), 2);
        assert_eq!(stats["web"].len(), 2);
        assert_eq!(stats["web"][1]["svname"], "app2:80");
        assert_eq!(stats["web"][1]["status"], "MAINT");
        assert_eq!(stats["cache"][0]["svname"], "redis1:6379");
    }

    #[test]
    fn test_parse_info_snake_case() {
        let info = parse_info("Name: HAProxy\nCurrConns: 12\nUptime_sec: 42\nPid: 1234");
        assert_eq!(info["name"], "HAProxy");
        assert_eq!(info["curr_conns"], "12");
        assert_eq!(info["uptime_sec"], "42");
        assert_eq!(info["pid"], "1234");
    }

    #[test]
    fn test_restart_args() {
        let control = Control {
            binary: "haproxy".into(),
            config_file: "/etc/haproxy.cfg".into(),
            socket_file: "/tmp/h.sock".into(),
            pid_file: "/var/run/haproxy.pid".into(),
        };
        let peer = Peer::new("lb1.local", "10.0.0.1", None);

        assert_eq!(
            control.restart_args(Some(Version(1, 5, 0)), &peer, Some("4242\n")),
            vec!["-f", "/etc/haproxy.cfg", "-p", "/var/run/haproxy.pid", "-L", "lb1.local", "-sf", "4242"]
        );
        assert_eq!(
            control.restart_args(Some(Version(1, 4, 0)), &peer, None),
            vec!["-f", "/etc/haproxy.cfg", "-p", "/var/run/haproxy.pid"]
        );
    }
}
