//! ZooKeeper coordination client.
//!
//! # Session Lifecycle
//! ```text
//! connect(hosts)
//!     → supervisor task: open session (retry with backoff)
//!     → SyncConnected        ⇒ Connected
//!     → Disconnected         ⇒ Suspended (library reconnects the same session)
//!     → Expired              ⇒ Lost, then a fresh session is opened
//! close()
//!     → supervisor cancelled, session dropped ⇒ Closed
//! ```

use std::sync::{Arc, Mutex};
use std::time::Duration;

use arc_swap::ArcSwapOption;
use async_trait::async_trait;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use zookeeper_client as zk;

use crate::discovery::coordination::{
    parent_of, ChildWatch, CoordinationClient, CoordinationError, Op, SessionId, SessionState, Stat,
};
use crate::resilience::backoff::Backoff;

struct Shared {
    client: ArcSwapOption<zk::Client>,
    state: watch::Sender<SessionState>,
}

struct Supervisor {
    stop: CancellationToken,
    handle: JoinHandle<()>,
}

pub struct ZookeeperClient {
    session_timeout: Duration,
    shared: Arc<Shared>,
    supervisor: Mutex<Option<Supervisor>>,
}

enum SessionEnd {
    Stopped,
    Expired,
    Closed,
}

impl ZookeeperClient {
    pub fn new(session_timeout: Duration) -> Self {
        let (state, _) = watch::channel(SessionState::Closed);
        Self {
            session_timeout,
            shared: Arc::new(Shared {
                client: ArcSwapOption::empty(),
                state,
            }),
            supervisor: Mutex::new(None),
        }
    }

    fn current(&self) -> Result<Arc<zk::Client>, CoordinationError> {
        self.shared.client.load_full().ok_or(CoordinationError::NotConnected)
    }

    fn take_supervisor(&self) -> Option<Supervisor> {
        self.supervisor.lock().unwrap_or_else(|e| e.into_inner()).take()
    }

    async fn ensure_parents(client: &zk::Client, path: &str) -> Result<(), CoordinationError> {
        let parent = parent_of(path);
        if parent == "/" {
            return Ok(());
        }
        let mut prefix = String::new();
        for part in parent.split('/').filter(|part| !part.is_empty()) {
            prefix.push('/');
            prefix.push_str(part);
            match client.create(&prefix, &[], &persistent()).await {
                Ok(_) | Err(zk::Error::NodeExists) => {}
                Err(e) => return Err(map_error(e, &prefix)),
            }
        }
        Ok(())
    }
}

fn persistent() -> zk::CreateOptions<'static> {
    zk::CreateMode::Persistent.with_acls(zk::Acls::anyone_all())
}

fn ephemeral() -> zk::CreateOptions<'static> {
    zk::CreateMode::Ephemeral.with_acls(zk::Acls::anyone_all())
}

/// Connect string for a host list, e.g. `zk1:2181,zk2:2181`.
pub fn connect_string(hosts: &[String]) -> String {
    hosts.iter().map(|host| host.trim()).collect::<Vec<_>>().join(",")
}

pub fn map_error(error: zk::Error, path: &str) -> CoordinationError {
    match error {
        zk::Error::NoNode => CoordinationError::NoNode(path.to_string()),
        zk::Error::NodeExists => CoordinationError::NodeExists(path.to_string()),
        zk::Error::NotEmpty => CoordinationError::NotEmpty(path.to_string()),
        zk::Error::ConnectionLoss | zk::Error::SessionExpired => CoordinationError::ConnectionLoss,
        other => CoordinationError::Backend(other.to_string()),
    }
}

pub fn map_state(state: zk::SessionState) -> SessionState {
    match state {
        zk::SessionState::SyncConnected | zk::SessionState::ConnectedReadOnly => SessionState::Connected,
        zk::SessionState::Disconnected => SessionState::Suspended,
        zk::SessionState::Expired => SessionState::Lost,
        _ => SessionState::Closed,
    }
}

fn map_stat(stat: &zk::Stat) -> Stat {
    Stat {
        ephemeral_owner: (stat.ephemeral_owner != 0).then_some(stat.ephemeral_owner as SessionId),
        version: stat.version.max(0) as u32,
    }
}

/// Keep one session open until `stop`, replacing it after expiry.
async fn supervise(shared: Arc<Shared>, cluster: String, session_timeout: Duration, stop: CancellationToken) {
    let mut backoff = Backoff::default();

    loop {
        let mut connector = zk::Client::connector();
        connector.session_timeout(session_timeout);
        let connecting = connector.connect(&cluster);
        let result = tokio::select! {
            _ = stop.cancelled() => break,
            result = connecting => result,
        };
        let client = match result {
            Ok(client) => {
                backoff.reset();
                client
            }
            Err(e) => {
                let delay = backoff.next_delay();
                tracing::warn!(hosts = %cluster, error = %e, delay_ms = delay.as_millis() as u64, "ZooKeeper connection failed, retrying");
                tokio::select! {
                    _ = stop.cancelled() => break,
                    _ = tokio::time::sleep(delay) => continue,
                }
            }
        };

        let mut states = client.state_watcher();
        tracing::info!(hosts = %cluster, session = client.session_id().0, "ZooKeeper session established");
        shared.client.store(Some(Arc::new(client)));
        shared.state.send_replace(SessionState::Connected);

        let end = loop {
            let state = tokio::select! {
                _ = stop.cancelled() => break SessionEnd::Stopped,
                state = states.changed() => state,
            };
            match map_state(state) {
                SessionState::Connected => {
                    tracing::info!(hosts = %cluster, "ZooKeeper connection (re)established");
                    shared.state.send_replace(SessionState::Connected);
                }
                SessionState::Suspended => {
                    tracing::info!(hosts = %cluster, "ZooKeeper connection suspended");
                    shared.state.send_replace(SessionState::Suspended);
                }
                SessionState::Lost => break SessionEnd::Expired,
                SessionState::Closed => break SessionEnd::Closed,
            }
        };

        shared.client.store(None);
        match end {
            SessionEnd::Stopped => break,
            SessionEnd::Expired => {
                tracing::info!(hosts = %cluster, "ZooKeeper session lost");
                shared.state.send_replace(SessionState::Lost);
            }
            SessionEnd::Closed => {
                tracing::warn!(hosts = %cluster, "ZooKeeper session closed by the client library, reconnecting");
                shared.state.send_replace(SessionState::Suspended);
            }
        }
    }

    shared.client.store(None);
    shared.state.send_replace(SessionState::Closed);
}

#[async_trait]
impl CoordinationClient for ZookeeperClient {
    fn session_id(&self) -> Option<SessionId> {
        self.shared.client.load().as_ref().map(|client| client.session_id().0 as SessionId)
    }

    fn state(&self) -> watch::Receiver<SessionState> {
        self.shared.state.subscribe()
    }

    async fn connect(&self, hosts: &[String]) -> Result<(), CoordinationError> {
        if hosts.is_empty() {
            return Err(CoordinationError::NotConnected);
        }
        if let Some(previous) = self.take_supervisor() {
            previous.stop.cancel();
            let _ = previous.handle.await;
        }

        let stop = CancellationToken::new();
        let handle = tokio::spawn(supervise(
            self.shared.clone(),
            connect_string(hosts),
            self.session_timeout,
            stop.clone(),
        ));
        *self.supervisor.lock().unwrap_or_else(|e| e.into_inner()) = Some(Supervisor { stop, handle });
        Ok(())
    }

    async fn close(&self) {
        if let Some(supervisor) = self.take_supervisor() {
            supervisor.stop.cancel();
            if let Err(e) = supervisor.handle.await {
                tracing::error!(error = %e, "ZooKeeper session task failed");
            }
        }
        self.shared.client.store(None);
        self.shared.state.send_replace(SessionState::Closed);
    }

    async fn exists(&self, path: &str) -> Result<Option<Stat>, CoordinationError> {
        let client = self.current()?;
        let stat = client.check_stat(path).await.map_err(|e| map_error(e, path))?;
        Ok(stat.as_ref().map(map_stat))
    }

    async fn get(&self, path: &str) -> Result<(Vec<u8>, Stat), CoordinationError> {
        let client = self.current()?;
        let (data, stat) = client.get_data(path).await.map_err(|e| map_error(e, path))?;
        Ok((data, map_stat(&stat)))
    }

    async fn children(&self, path: &str) -> Result<(Vec<String>, ChildWatch), CoordinationError> {
        let client = self.current()?;
        let (children, watcher) = client
            .list_and_watch_children(path)
            .await
            .map_err(|e| map_error(e, path))?;

        let (tx, rx) = oneshot::channel();
        tokio::spawn(async move {
            watcher.changed().await;
            let _ = tx.send(());
        });
        Ok((children, rx))
    }

    async fn create(&self, path: &str, data: Vec<u8>, ephemeral_record: bool, makepath: bool) -> Result<(), CoordinationError> {
        let client = self.current()?;
        if makepath {
            Self::ensure_parents(&client, path).await?;
        }
        let options = if ephemeral_record { ephemeral() } else { persistent() };
        client.create(path, &data, &options).await.map_err(|e| map_error(e, path))?;
        Ok(())
    }

    async fn set(&self, path: &str, data: Vec<u8>) -> Result<Stat, CoordinationError> {
        let client = self.current()?;
        let stat = client.set_data(path, &data, None).await.map_err(|e| map_error(e, path))?;
        Ok(map_stat(&stat))
    }

    async fn delete(&self, path: &str) -> Result<(), CoordinationError> {
        let client = self.current()?;
        client.delete(path, None).await.map_err(|e| map_error(e, path))
    }

    async fn commit(&self, ops: Vec<Op>) -> Result<(), CoordinationError> {
        let client = self.current()?;
        let paths: Vec<String> = ops
            .iter()
            .map(|op| match op {
                Op::Create { path, .. } | Op::Set { path, .. } | Op::Delete { path } => path.clone(),
            })
            .collect();

        let mut writer = client.new_multi_writer();
        for (index, op) in ops.iter().enumerate() {
            let added = match op {
                Op::Create { path, data, ephemeral: true } => writer.add_create(path, data, &ephemeral()),
                Op::Create { path, data, ephemeral: false } => writer.add_create(path, data, &persistent()),
                Op::Set { path, data } => writer.add_set_data(path, data, None),
                Op::Delete { path } => writer.add_delete(path, None),
            };
            added.map_err(|e| CoordinationError::TransactionAborted {
                index,
                reason: Box::new(map_error(e, &paths[index])),
            })?;
        }

        match writer.commit().await {
            Ok(_) => Ok(()),
            Err(zk::MultiWriteError::OperationFailed { index, source }) => Err(CoordinationError::TransactionAborted {
                index,
                reason: Box::new(map_error(source, paths.get(index).map(String::as_str).unwrap_or(""))),
            }),
            Err(zk::MultiWriteError::RequestFailed { source }) => Err(map_error(source, "")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_string() {
        let hosts = vec!["zk1:2181".to_string(), " zk2:2181".to_string()];
        assert_eq!(connect_string(&hosts), "zk1:2181,zk2:2181");
    }

    #[test]
    fn test_error_mapping() {
        assert_eq!(map_error(zk::Error::NoNode, "/hm/web"), CoordinationError::NoNode("/hm/web".into()));
        assert_eq!(map_error(zk::Error::NodeExists, "/a"), CoordinationError::NodeExists("/a".into()));
        assert_eq!(map_error(zk::Error::NotEmpty, "/a"), CoordinationError::NotEmpty("/a".into()));
        assert_eq!(map_error(zk::Error::ConnectionLoss, "/a"), CoordinationError::ConnectionLoss);
        assert!(matches!(map_error(zk::Error::NoAuth, "/a"), CoordinationError::Backend(_)));
    }

    #[test]
    fn test_state_mapping() {
        assert_eq!(map_state(zk::SessionState::SyncConnected), SessionState::Connected);
        assert_eq!(map_state(zk::SessionState::Disconnected), SessionState::Suspended);
        assert_eq!(map_state(zk::SessionState::Expired), SessionState::Lost);
        assert_eq!(map_state(zk::SessionState::Closed), SessionState::Closed);
    }

    #[tokio::test]
    async fn test_unreachable_ensemble_stays_disconnected() {
        let client = ZookeeperClient::new(Duration::from_secs(6));
        client.connect(&["127.0.0.1:1".to_string()]).await.unwrap();

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_ne!(*client.state().borrow(), SessionState::Connected);
        assert_eq!(client.session_id(), None);
        assert_eq!(client.exists("/hm").await, Err(CoordinationError::NotConnected));

        client.close().await;
        assert_eq!(*client.state().borrow(), SessionState::Closed);
    }

    #[tokio::test]
    async fn test_connect_requires_hosts() {
        let client = ZookeeperClient::new(Duration::from_secs(6));
        assert_eq!(client.connect(&[]).await, Err(CoordinationError::NotConnected));
    }
}
