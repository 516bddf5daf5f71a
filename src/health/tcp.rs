//! TCP query/response probe.

use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time;

use crate::config::validation::require;
use crate::config::{ConfigError, RawConfig};
use crate::health::probe::{timeout_from, Probe, ProbeError};

/// Sends `query` and passes if the first response line equals `response`.
#[derive(Debug, Clone, Default)]
pub struct TcpProbe {
    query: String,
    response: String,
    timeout: Duration,
}

fn string_option(raw: &RawConfig, key: &str) -> Result<String, ConfigError> {
    require(raw, key)?
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| ConfigError::invalid(key, "expected a string"))
}

#[async_trait]
impl Probe for TcpProbe {
    fn apply_check_config(&mut self, raw: &RawConfig) -> Result<(), ConfigError> {
        self.query = string_option(raw, "query")?;
        self.response = string_option(raw, "response")?;
        self.timeout = timeout_from(raw)?;
        Ok(())
    }

    async fn perform(&self, host: &str, port: u16) -> Result<bool, ProbeError> {
        let exchange = async {
            let mut stream = TcpStream::connect((host, port)).await?;
            stream.write_all(self.query.as_bytes()).await?;

            let mut line = String::new();
            BufReader::new(stream).read_line(&mut line).await?;
            Ok::<_, std::io::Error>(line)
        };

        let line = time::timeout(self.timeout, exchange)
            .await
            .map_err(|_| ProbeError::Timeout(self.timeout))??;

        let response = line.trim_end_matches(['\r', '\n']);
        if response != self.response {
            tracing::warn!(
                host = %host,
                port,
                response = %response,
                expected = %self.response,
                "TCP check response mismatch"
            );
            return Ok(false);
        }
        Ok(true)
    }
}
