//! Cluster member nodes and their membership record format.

use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};

use serde::Serialize;
use serde_json::Value;

use crate::topology::peer::{local_identity, Peer};
use crate::topology::RecordError;

/// One running instance of a service.
///
/// Identity is `(ip, port)`; host, peer and metadata ride along.
#[derive(Debug, Clone)]
pub struct Node {
    pub host: String,
    pub ip: String,
    pub port: u16,
    pub peer: Option<Peer>,
    pub metadata: BTreeMap<String, Value>,
}

/// Wire form of a node record. Fields are in key order so output is sorted.
#[derive(Serialize)]
struct NodeRecord<'a> {
    host: &'a str,
    ip: &'a str,
    metadata: String,
    peer: Option<String>,
    port: u16,
}

impl Node {
    pub fn new(host: impl Into<String>, ip: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            ip: ip.into(),
            port,
            peer: Some(Peer::current()),
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_peer(mut self, peer: Option<Peer>) -> Self {
        self.peer = peer;
        self
    }

    pub fn with_metadata(mut self, metadata: BTreeMap<String, Value>) -> Self {
        self.metadata = metadata;
        self
    }

    /// The node for a locally run service port.
    pub fn current(port: u16, metadata: &BTreeMap<String, Value>) -> Self {
        let (host, ip) = local_identity();
        Self::new(host.clone(), ip.clone(), port).with_metadata(metadata.clone())
    }

    /// Server name used in balancer config and record paths.
    pub fn name(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn serialize(&self) -> String {
        let record = NodeRecord {
            host: &self.host,
            ip: &self.ip,
            metadata: serde_json::to_string(&self.metadata).unwrap_or_else(|_| "{}".to_string()),
            peer: self.peer.as_ref().map(Peer::serialize),
            port: self.port,
        };
        serde_json::to_string(&record).unwrap_or_default()
    }

    /// Decode a membership record.
    ///
    /// `port` and `ip` are required. A missing `host` falls back to the IP and
    /// a missing `peer` to this machine's peer; an explicit `null` peer stays
    /// absent.
    pub fn deserialize(value: &[u8]) -> Result<Self, RecordError> {
        let parsed: Value = serde_json::from_slice(value)?;
        let record = parsed.as_object().ok_or(RecordError::NotAMap)?;

        let port = record
            .get("port")
            .ok_or(RecordError::Missing("port"))?
            .as_u64()
            .and_then(|port| u16::try_from(port).ok())
            .ok_or(RecordError::Invalid("port"))?;

        let ip = record
            .get("ip")
            .ok_or(RecordError::Missing("ip"))?
            .as_str()
            .ok_or(RecordError::Invalid("ip"))?
            .to_string();

        let host = match record.get("host").and_then(Value::as_str) {
            Some(host) => host.to_string(),
            None => ip.clone(),
        };

        let peer = match record.get("peer") {
            None => Some(Peer::current()),
            Some(Value::Null) => None,
            Some(Value::String(encoded)) => Some(Peer::deserialize(encoded)?),
            Some(nested @ Value::Object(_)) => Some(serde_json::from_value(nested.clone())?),
            Some(_) => return Err(RecordError::Invalid("peer")),
        };

        let metadata = match record.get("metadata") {
            Some(Value::String(encoded)) => serde_json::from_str(encoded)?,
            Some(Value::Object(map)) => map.clone().into_iter().collect(),
            _ => BTreeMap::new(),
        };

        Ok(Self {
            host,
            ip,
            port,
            peer,
            metadata,
        })
    }
}

impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        self.ip == other.ip && self.port == other.port
    }
}

impl Eq for Node {}

impl Hash for Node {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.ip.hash(state);
        self.port.hash(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_node_equality_ignores_host_and_peer() {
        let a = Node::new("web1", "10.0.0.1", 8080);
        let b = Node::new("web1.internal", "10.0.0.1", 8080).with_peer(None);
        let c = Node::new("web1", "10.0.0.2", 8080);

        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_serialize_is_sorted_and_stable() {
        let node = Node::new("web1", "10.0.0.1", 8080)
            .with_peer(Some(Peer::new("lb1", "10.0.1.1", None)))
            .with_metadata([("zone".to_string(), json!("a"))].into_iter().collect());

        let encoded = node.serialize();
        assert_eq!(
            encoded,
            r#"{"host":"web1","ip":"10.0.0.1","metadata":"{\"zone\":\"a\"}","peer":"{\"ip\":\"10.0.1.1\",\"name\":\"lb1\",\"port\":1024}","port":8080}"#
        );
        assert_eq!(encoded, node.clone().serialize());

        let decoded = Node::deserialize(encoded.as_bytes()).unwrap();
        assert_eq!(decoded, node);
        assert_eq!(decoded.host, "web1");
        assert_eq!(decoded.peer.unwrap().name, "lb1");
        assert_eq!(decoded.metadata["zone"], "a");
    }

    #[test]
    fn test_deserialize_optional_fields() {
        let node = Node::deserialize(br#"{"ip": "10.0.0.9", "port": 6379}"#).unwrap();
        assert_eq!(node.host, "10.0.0.9");
        assert_eq!(node.peer, Some(Peer::current()));

        let node = Node::deserialize(br#"{"ip": "10.0.0.9", "port": 6379, "peer": null}"#).unwrap();
        assert!(node.peer.is_none());
    }

    #[test]
    fn test_deserialize_rejects_incomplete_records() {
        assert!(matches!(
            Node::deserialize(br#"{"ip": "10.0.0.9"}"#),
            Err(RecordError::Missing("port"))
        ));
        assert!(matches!(
            Node::deserialize(br#"{"port": 80}"#),
            Err(RecordError::Missing("ip"))
        ));
        assert!(matches!(Node::deserialize(b"not json"), Err(RecordError::Json(_))));
    }
}
