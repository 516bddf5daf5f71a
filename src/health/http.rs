//! HTTP probe: passes on any 2xx response.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::Empty;
use hyper::{Method, Request};
use hyper_util::client::legacy::{connect::HttpConnector, Client};
use hyper_util::rt::TokioExecutor;
use tokio::time;

use crate::config::validation::require;
use crate::config::{ConfigError, RawConfig};
use crate::health::probe::{timeout_from, Probe, ProbeError};

pub struct HttpProbe {
    client: Client<HttpConnector, Empty<Bytes>>,
    uri: String,
    method: Method,
    timeout: Duration,
}

impl Default for HttpProbe {
    fn default() -> Self {
        Self {
            client: Client::builder(TokioExecutor::new()).build(HttpConnector::new()),
            uri: "/".to_string(),
            method: Method::GET,
            timeout: Duration::from_secs(2),
        }
    }
}

#[async_trait]
impl Probe for HttpProbe {
    fn apply_check_config(&mut self, raw: &RawConfig) -> Result<(), ConfigError> {
        let uri = require(raw, "uri")?
            .as_str()
            .filter(|uri| uri.starts_with('/'))
            .ok_or_else(|| ConfigError::invalid("uri", "expected an absolute path"))?;

        let method = match raw.get("method").and_then(|m| m.as_str()) {
            Some(method) => Method::from_bytes(method.to_ascii_uppercase().as_bytes())
                .map_err(|e| ConfigError::invalid("method", e.to_string()))?,
            None => Method::GET,
        };

        self.uri = uri.to_string();
        self.method = method;
        self.timeout = timeout_from(raw)?;
        Ok(())
    }

    async fn perform(&self, host: &str, port: u16) -> Result<bool, ProbeError> {
        let request = Request::builder()
            .method(self.method.clone())
            .uri(format!("http://{}:{}{}", host, port, self.uri))
            .header("user-agent", "harbormaster-health-check")
            .body(Empty::<Bytes>::new())
            .map_err(|e| ProbeError::Request(e.to_string()))?;

        let response = time::timeout(self.timeout, self.client.request(request))
            .await
            .map_err(|_| ProbeError::Timeout(self.timeout))?
            .map_err(|e| ProbeError::Request(e.to_string()))?;

        let success = response.status().is_success();
        if !success {
            tracing::warn!(host = %host, port, status = %response.status(), "HTTP check failed: non-success status");
        }
        Ok(success)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    async fn http_server(status_line: &'static str) -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                tokio::spawn(async move {
                    let mut buf = [0u8; 1024];
                    let _ = socket.read(&mut buf).await;
                    let response = format!("HTTP/1.1 {}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n", status_line);
                    let _ = socket.write_all(response.as_bytes()).await;
                    let _ = socket.shutdown().await;
                });
            }
        });
        port
    }

    fn probe() -> HttpProbe {
        let mut probe = HttpProbe::default();
        probe
            .apply_check_config(json!({"uri": "/health", "method": "get"}).as_object().unwrap())
            .unwrap();
        probe
    }

    #[tokio::test]
    async fn test_success_status_passes() {
        let port = http_server("200 OK").await;
        assert!(probe().perform("127.0.0.1", port).await.unwrap());
    }

    #[tokio::test]
    async fn test_server_error_fails() {
        let port = http_server("503 Service Unavailable").await;
        assert!(!probe().perform("127.0.0.1", port).await.unwrap());
    }

    #[test]
    fn test_uri_required() {
        let mut probe = HttpProbe::default();
        assert!(matches!(
            probe.apply_check_config(json!({"method": "GET"}).as_object().unwrap()),
            Err(ConfigError::Missing(_))
        ));
    }
}
