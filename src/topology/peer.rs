//! Machines hosting nodes, used for balancer peer coordination.

use std::hash::{Hash, Hasher};
use std::net::ToSocketAddrs;
use std::sync::OnceLock;

use serde::{Deserialize, Serialize};

use crate::topology::RecordError;

pub const DEFAULT_PEER_PORT: u16 = 1024;

/// A host running a reporter.
///
/// Two peers are the same peer when their `(ip, port)` match; the name is
/// informational only.
///
/// Fields are declared in key order so the serialized form is sorted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Peer {
    pub ip: String,
    pub name: String,
    #[serde(default = "default_peer_port")]
    pub port: u16,
}

fn default_peer_port() -> u16 {
    DEFAULT_PEER_PORT
}

impl Peer {
    pub fn new(name: impl Into<String>, ip: impl Into<String>, port: Option<u16>) -> Self {
        Self {
            ip: ip.into(),
            name: name.into(),
            port: port.unwrap_or(DEFAULT_PEER_PORT),
        }
    }

    /// The peer describing the machine this process runs on.
    pub fn current() -> Self {
        let (name, ip) = local_identity();
        Self::new(name.clone(), ip.clone(), None)
    }

    pub fn serialize(&self) -> String {
        // A struct of strings and integers always serializes.
        serde_json::to_string(self).unwrap_or_default()
    }

    pub fn deserialize(value: &str) -> Result<Self, RecordError> {
        Ok(serde_json::from_str(value)?)
    }
}

impl PartialEq for Peer {
    fn eq(&self, other: &Self) -> bool {
        self.ip == other.ip && self.port == other.port
    }
}

impl Eq for Peer {}

impl Hash for Peer {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.ip.hash(state);
        self.port.hash(state);
    }
}

/// Hostname and resolved IP of this machine, looked up once per process.
pub(crate) fn local_identity() -> &'static (String, String) {
    static IDENTITY: OnceLock<(String, String)> = OnceLock::new();
    IDENTITY.get_or_init(|| {
        let name = hostname::get()
            .ok()
            .and_then(|name| name.into_string().ok())
            .unwrap_or_else(|| "localhost".to_string());

        let ip = (name.as_str(), 0)
            .to_socket_addrs()
            .ok()
            .and_then(|mut addrs| addrs.find(|addr| addr.is_ipv4()))
            .map(|addr| addr.ip().to_string())
            .unwrap_or_else(|| {
                tracing::warn!(host = %name, "Could not resolve own hostname, using loopback");
                "127.0.0.1".to_string()
            });

        (name, ip)
    })
}
