//! Primitives consumed from the external coordination service.
//!
//! The service is a hierarchical store of records addressed by slash
//! separated paths. Records may be ephemeral, i.e. owned by one client session
//! and removed when that session ends.

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::{oneshot, watch};

/// Session id assigned by the coordination service.
pub type SessionId = u64;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoordinationError {
    #[error("no record at {0}")]
    NoNode(String),

    #[error("record already exists at {0}")]
    NodeExists(String),

    #[error("record at {0} has children")]
    NotEmpty(String),

    #[error("connection to the coordination service lost")]
    ConnectionLoss,

    #[error("client is not connected")]
    NotConnected,

    #[error("transaction aborted at operation {index}: {reason}")]
    TransactionAborted { index: usize, reason: Box<CoordinationError> },

    /// Any other failure reported by the client library.
    #[error("coordination service error: {0}")]
    Backend(String),
}

/// Client session state as reported by the coordination client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No session has been requested, or it was closed.
    Closed,
    Connected,
    /// Connection interrupted; the session may still resume.
    Suspended,
    /// Session expired; its ephemeral records are gone.
    Lost,
}

/// Record metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stat {
    /// Owning session of an ephemeral record.
    pub ephemeral_owner: Option<SessionId>,
    pub version: u32,
}

/// One operation of an atomic transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Op {
    Create { path: String, data: Vec<u8>, ephemeral: bool },
    Set { path: String, data: Vec<u8> },
    Delete { path: String },
}

/// Fires once when the watched record's children change. A dropped sender
/// means the watch was lost with the connection; either way, re-read.
pub type ChildWatch = oneshot::Receiver<()>;

#[async_trait]
pub trait CoordinationClient: Send + Sync {
    /// Current session, if connected.
    fn session_id(&self) -> Option<SessionId>;

    /// Session state changes.
    fn state(&self) -> watch::Receiver<SessionState>;

    /// Open a session against the given ensemble members.
    async fn connect(&self, hosts: &[String]) -> Result<(), CoordinationError>;

    /// Close the session; its ephemeral records are removed.
    async fn close(&self);

    async fn exists(&self, path: &str) -> Result<Option<Stat>, CoordinationError>;

    async fn get(&self, path: &str) -> Result<(Vec<u8>, Stat), CoordinationError>;

    /// List children and leave a one-shot watch on them.
    async fn children(&self, path: &str) -> Result<(Vec<String>, ChildWatch), CoordinationError>;

    /// Create a record. `makepath` creates missing parents as persistent records.
    async fn create(&self, path: &str, data: Vec<u8>, ephemeral: bool, makepath: bool) -> Result<(), CoordinationError>;

    async fn set(&self, path: &str, data: Vec<u8>) -> Result<Stat, CoordinationError>;

    async fn delete(&self, path: &str) -> Result<(), CoordinationError>;

    /// Apply all operations atomically, or none.
    async fn commit(&self, ops: Vec<Op>) -> Result<(), CoordinationError>;
}

/// Parent path of a record path (`/a/b` → `/a`, `/a` → `/`).
pub fn parent_of(path: &str) -> &str {
    match path.rfind('/') {
        Some(0) | None => "/",
        Some(i) => &path[..i],
    }
}

/// Join a base path and a child name.
pub fn join(base: &str, child: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), child)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_helpers() {
        assert_eq!(parent_of("/hm/cache/n1"), "/hm/cache");
        assert_eq!(parent_of("/hm"), "/");
        assert_eq!(join("/hm", "cache"), "/hm/cache");
        assert_eq!(join("/", "cache"), "/cache");
    }
}
