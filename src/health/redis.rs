//! Redis probe: `PING` must answer `+PONG`, and optionally the replication
//! role must match.

use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time;

use crate::config::{ConfigError, RawConfig};
use crate::health::probe::{timeout_from, Probe, ProbeError};

#[derive(Debug, Clone, Default)]
pub struct RedisProbe {
    /// `master` or `replica`; unset skips the role check.
    role: Option<String>,
    timeout: Duration,
}

/// Value of `role:` in an `INFO replication` body.
fn role_from_info(info: &str) -> Option<&str> {
    info.lines().find_map(|line| line.trim_end().strip_prefix("role:"))
}

/// Older servers call a replica a slave.
fn same_role(reported: &str, expected: &str) -> bool {
    let canonical = |role: &str| if role == "slave" { "replica".to_string() } else { role.to_string() };
    canonical(reported) == canonical(expected)
}

impl RedisProbe {
    /// `Ok(Err(reply))` carries the unexpected reply.
    async fn exchange(&self, host: &str, port: u16) -> std::io::Result<Result<(), String>> {
        let stream = TcpStream::connect((host, port)).await?;
        let mut stream = BufReader::new(stream);

        stream.get_mut().write_all(b"PING\r\n").await?;
        let mut line = String::new();
        stream.read_line(&mut line).await?;
        if line.trim_end() != "+PONG" {
            return Ok(Err(line.trim_end().to_string()));
        }

        let Some(expected) = &self.role else {
            return Ok(Ok(()));
        };

        stream.get_mut().write_all(b"INFO replication\r\n").await?;
        line.clear();
        stream.read_line(&mut line).await?;
        let Some(len) = line.trim_end().strip_prefix('$').and_then(|n| n.parse::<usize>().ok()) else {
            return Ok(Err(line.trim_end().to_string()));
        };
        let mut body = vec![0u8; len + 2];
        stream.read_exact(&mut body).await?;
        let body = String::from_utf8_lossy(&body);

        match role_from_info(&body) {
            Some(role) if same_role(role, expected) => Ok(Ok(())),
            Some(role) => Ok(Err(format!("role:{}", role))),
            None => Ok(Err("no role in INFO reply".to_string())),
        }
    }
}

#[async_trait]
impl Probe for RedisProbe {
    fn apply_check_config(&mut self, raw: &RawConfig) -> Result<(), ConfigError> {
        self.role = match raw.get("role") {
            None => None,
            Some(value) => match value.as_str() {
                Some(role @ ("master" | "replica" | "slave")) => Some(role.to_string()),
                _ => return Err(ConfigError::invalid("role", "expected master or replica")),
            },
        };
        self.timeout = timeout_from(raw)?;
        Ok(())
    }

    async fn perform(&self, host: &str, port: u16) -> Result<bool, ProbeError> {
        let verdict = time::timeout(self.timeout, self.exchange(host, port))
            .await
            .map_err(|_| ProbeError::Timeout(self.timeout))?
            .map_err(ProbeError::Io)?;

        match verdict {
            Ok(()) => Ok(true),
            Err(reply) => {
                tracing::warn!(host = %host, port, reply = %reply, "Redis check failed");
                Ok(false)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::net::TcpListener;

    /// Minimal server answering PING and INFO with a fixed role.
    async fn redis_server(pong: &'static str, role: &'static str) -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                tokio::spawn(async move {
                    let mut socket = BufReader::new(socket);
                    let mut line = String::new();
                    while socket.read_line(&mut line).await.unwrap_or(0) > 0 {
                        let reply = if line.starts_with("PING") {
                            format!("{}\r\n", pong)
                        } else {
                            let body = format!("# Replication\r\nrole:{}\r\nconnected_slaves:0\r\n", role);
                            format!("${}\r\n{}\r\n", body.len(), body)
                        };
                        let _ = socket.get_mut().write_all(reply.as_bytes()).await;
                        line.clear();
                    }
                });
            }
        });
        port
    }

    fn probe(raw: serde_json::Value) -> RedisProbe {
        let mut probe = RedisProbe::default();
        probe.apply_check_config(raw.as_object().unwrap()).unwrap();
        probe
    }

    #[tokio::test]
    async fn test_pong_passes() {
        let port = redis_server("+PONG", "master").await;
        assert!(probe(json!({})).perform("127.0.0.1", port).await.unwrap());
    }

    #[tokio::test]
    async fn test_loading_reply_fails() {
        let port = redis_server("-LOADING Redis is loading the dataset in memory", "master").await;
        assert!(!probe(json!({})).perform("127.0.0.1", port).await.unwrap());
    }

    #[tokio::test]
    async fn test_role_must_match() {
        let port = redis_server("+PONG", "slave").await;
        assert!(probe(json!({"role": "replica"})).perform("127.0.0.1", port).await.unwrap());
        assert!(!probe(json!({"role": "master"})).perform("127.0.0.1", port).await.unwrap());
    }

    #[test]
    fn test_rejects_unknown_role() {
        let mut probe = RedisProbe::default();
        assert!(probe.apply_check_config(json!({"role": "leader"}).as_object().unwrap()).is_err());
    }
}
