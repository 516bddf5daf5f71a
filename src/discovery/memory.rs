//! In-process coordination store.
//!
//! A hierarchical record store with sessions, ephemeral records, one-shot
//! child watches and atomic transactions. Writer and reporter roles running
//! in one process share an ensemble; tests use it to drive session
//! suspension and expiry.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::sync::{oneshot, watch};

use crate::discovery::coordination::{
    parent_of, ChildWatch, CoordinationClient, CoordinationError, Op, SessionId, SessionState, Stat,
};

#[derive(Debug, Clone)]
struct Record {
    data: Vec<u8>,
    owner: Option<SessionId>,
    version: u32,
}

impl Record {
    fn stat(&self) -> Stat {
        Stat {
            ephemeral_owner: self.owner,
            version: self.version,
        }
    }
}

/// State shared between a client handle and the ensemble.
struct ClientShared {
    session: Mutex<Option<SessionId>>,
    state: watch::Sender<SessionState>,
}

impl ClientShared {
    fn session(&self) -> Option<SessionId> {
        *self.session.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_session(&self, session: Option<SessionId>) {
        *self.session.lock().unwrap_or_else(|e| e.into_inner()) = session;
    }
}

#[derive(Default)]
struct EnsembleState {
    records: BTreeMap<String, Record>,
    next_session: SessionId,
    sessions: HashMap<SessionId, Arc<ClientShared>>,
    suspended: HashSet<SessionId>,
    child_watches: HashMap<String, Vec<(SessionId, oneshot::Sender<()>)>>,
    transactions: u64,
}

impl EnsembleState {
    fn live(&self, session: Option<SessionId>) -> Result<SessionId, CoordinationError> {
        let session = session.ok_or(CoordinationError::NotConnected)?;
        if !self.sessions.contains_key(&session) || self.suspended.contains(&session) {
            return Err(CoordinationError::ConnectionLoss);
        }
        Ok(session)
    }

    fn open_session(&mut self, shared: Arc<ClientShared>) -> SessionId {
        self.next_session += 1;
        let session = self.next_session;
        self.sessions.insert(session, shared.clone());
        shared.set_session(Some(session));
        shared.state.send_replace(SessionState::Connected);
        session
    }

    /// End a session: drop its watches and ephemeral records.
    fn end_session(&mut self, session: SessionId) -> Option<Arc<ClientShared>> {
        let shared = self.sessions.remove(&session);
        self.suspended.remove(&session);
        self.drop_watches_of(session);

        let owned: Vec<String> = self
            .records
            .iter()
            .filter(|(_, record)| record.owner == Some(session))
            .map(|(path, _)| path.clone())
            .collect();
        for path in owned {
            self.records.remove(&path);
            self.fire(parent_of(&path).to_string());
        }
        shared
    }

    fn drop_watches_of(&mut self, session: SessionId) {
        for watches in self.child_watches.values_mut() {
            watches.retain(|(owner, _)| *owner != session);
        }
    }

    fn fire(&mut self, path: String) {
        if let Some(watches) = self.child_watches.remove(&path) {
            for (_, tx) in watches {
                let _ = tx.send(());
            }
        }
    }
}

fn exists_in(records: &BTreeMap<String, Record>, path: &str) -> bool {
    path == "/" || records.contains_key(path)
}

fn children_in(records: &BTreeMap<String, Record>, path: &str) -> Vec<String> {
    let prefix = if path == "/" { "/".to_string() } else { format!("{}/", path) };
    records
        .range(prefix.clone()..)
        .take_while(|(key, _)| key.starts_with(&prefix))
        .map(|(key, _)| &key[prefix.len()..])
        .filter(|rest| !rest.is_empty() && !rest.contains('/'))
        .map(str::to_string)
        .collect()
}

/// Apply one operation; returns the parent whose children changed, if any.
fn apply(
    records: &mut BTreeMap<String, Record>,
    op: &Op,
    session: SessionId,
) -> Result<Option<String>, CoordinationError> {
    match op {
        Op::Create { path, data, ephemeral } => {
            let parent = parent_of(path);
            if !exists_in(records, parent) {
                return Err(CoordinationError::NoNode(parent.to_string()));
            }
            if exists_in(records, path) {
                return Err(CoordinationError::NodeExists(path.clone()));
            }
            records.insert(
                path.clone(),
                Record {
                    data: data.clone(),
                    owner: ephemeral.then_some(session),
                    version: 0,
                },
            );
            Ok(Some(parent.to_string()))
        }
        Op::Set { path, data } => {
            let record = records.get_mut(path).ok_or_else(|| CoordinationError::NoNode(path.clone()))?;
            record.data = data.clone();
            record.version += 1;
            Ok(None)
        }
        Op::Delete { path } => {
            if !records.contains_key(path) {
                return Err(CoordinationError::NoNode(path.clone()));
            }
            if !children_in(records, path).is_empty() {
                return Err(CoordinationError::NotEmpty(path.clone()));
            }
            records.remove(path);
            Ok(Some(parent_of(path).to_string()))
        }
    }
}

/// An in-process coordination ensemble.
#[derive(Default)]
pub struct MemoryEnsemble {
    state: Mutex<EnsembleState>,
}

impl MemoryEnsemble {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn lock(&self) -> MutexGuard<'_, EnsembleState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// A new, unconnected client.
    pub fn client(self: &Arc<Self>) -> MemoryClient {
        let (state, _) = watch::channel(SessionState::Closed);
        MemoryClient {
            ensemble: self.clone(),
            shared: Arc::new(ClientShared {
                session: Mutex::new(None),
                state,
            }),
        }
    }

    /// Interrupt a session's connection without ending it.
    pub fn suspend(&self, session: SessionId) {
        let mut state = self.lock();
        if let Some(shared) = state.sessions.get(&session).cloned() {
            state.suspended.insert(session);
            state.drop_watches_of(session);
            shared.state.send_replace(SessionState::Suspended);
        }
    }

    pub fn resume(&self, session: SessionId) {
        let mut state = self.lock();
        if state.suspended.remove(&session) {
            if let Some(shared) = state.sessions.get(&session) {
                shared.state.send_replace(SessionState::Connected);
            }
        }
    }

    /// Expire a session. Its client reconnects under a fresh session.
    pub fn expire_session(&self, session: SessionId) {
        let mut state = self.lock();
        if let Some(shared) = state.end_session(session) {
            shared.state.send_replace(SessionState::Lost);
            state.open_session(shared);
        }
    }

    /// Data and owning session of a record, for inspection.
    pub fn record(&self, path: &str) -> Option<(Vec<u8>, Option<SessionId>)> {
        self.lock()
            .records
            .get(path)
            .map(|record| (record.data.clone(), record.owner))
    }

    /// Number of committed multi-operation transactions.
    pub fn transactions(&self) -> u64 {
        self.lock().transactions
    }
}

/// A client session handle on a [`MemoryEnsemble`].
pub struct MemoryClient {
    ensemble: Arc<MemoryEnsemble>,
    shared: Arc<ClientShared>,
}

#[async_trait]
impl CoordinationClient for MemoryClient {
    fn session_id(&self) -> Option<SessionId> {
        self.shared.session()
    }

    fn state(&self) -> watch::Receiver<SessionState> {
        self.shared.state.subscribe()
    }

    async fn connect(&self, hosts: &[String]) -> Result<(), CoordinationError> {
        if hosts.is_empty() {
            return Err(CoordinationError::NotConnected);
        }
        let mut state = self.ensemble.lock();
        if self.shared.session().is_none() {
            let session = state.open_session(self.shared.clone());
            tracing::debug!(session, "Coordination session opened");
        }
        Ok(())
    }

    async fn close(&self) {
        let mut state = self.ensemble.lock();
        if let Some(session) = self.shared.session() {
            state.end_session(session);
            tracing::debug!(session, "Coordination session closed");
        }
        self.shared.set_session(None);
        self.shared.state.send_replace(SessionState::Closed);
    }

    async fn exists(&self, path: &str) -> Result<Option<Stat>, CoordinationError> {
        let state = self.ensemble.lock();
        state.live(self.session_id())?;
        Ok(state.records.get(path).map(Record::stat))
    }

    async fn get(&self, path: &str) -> Result<(Vec<u8>, Stat), CoordinationError> {
        let state = self.ensemble.lock();
        state.live(self.session_id())?;
        state
            .records
            .get(path)
            .map(|record| (record.data.clone(), record.stat()))
            .ok_or_else(|| CoordinationError::NoNode(path.to_string()))
    }

    async fn children(&self, path: &str) -> Result<(Vec<String>, ChildWatch), CoordinationError> {
        let mut state = self.ensemble.lock();
        let session = state.live(self.session_id())?;
        if !exists_in(&state.records, path) {
            return Err(CoordinationError::NoNode(path.to_string()));
        }
        let children = children_in(&state.records, path);
        let (tx, rx) = oneshot::channel();
        state.child_watches.entry(path.to_string()).or_default().push((session, tx));
        Ok((children, rx))
    }

    async fn create(&self, path: &str, data: Vec<u8>, ephemeral: bool, makepath: bool) -> Result<(), CoordinationError> {
        let mut state = self.ensemble.lock();
        let session = state.live(self.session_id())?;

        if makepath {
            let mut missing = Vec::new();
            let mut parent = parent_of(path);
            while !exists_in(&state.records, parent) {
                missing.push(parent.to_string());
                parent = parent_of(parent);
            }
            for ancestor in missing.into_iter().rev() {
                let op = Op::Create {
                    path: ancestor,
                    data: Vec::new(),
                    ephemeral: false,
                };
                if let Some(changed) = apply(&mut state.records, &op, session)? {
                    state.fire(changed);
                }
            }
        }

        let op = Op::Create {
            path: path.to_string(),
            data,
            ephemeral,
        };
        if let Some(changed) = apply(&mut state.records, &op, session)? {
            state.fire(changed);
        }
        Ok(())
    }

    async fn set(&self, path: &str, data: Vec<u8>) -> Result<Stat, CoordinationError> {
        let mut state = self.ensemble.lock();
        let session = state.live(self.session_id())?;
        let op = Op::Set {
            path: path.to_string(),
            data,
        };
        apply(&mut state.records, &op, session)?;
        Ok(state.records[path].stat())
    }

    async fn delete(&self, path: &str) -> Result<(), CoordinationError> {
        let mut state = self.ensemble.lock();
        let session = state.live(self.session_id())?;
        let op = Op::Delete { path: path.to_string() };
        if let Some(changed) = apply(&mut state.records, &op, session)? {
            state.fire(changed);
        }
        Ok(())
    }

    async fn commit(&self, ops: Vec<Op>) -> Result<(), CoordinationError> {
        let mut state = self.ensemble.lock();
        let session = state.live(self.session_id())?;

        let mut staged = state.records.clone();
        let mut changed = Vec::new();
        for (index, op) in ops.iter().enumerate() {
            match apply(&mut staged, op, session) {
                Ok(parent) => changed.extend(parent),
                Err(reason) => {
                    return Err(CoordinationError::TransactionAborted {
                        index,
                        reason: Box::new(reason),
                    })
                }
            }
        }

        state.records = staged;
        state.transactions += 1;
        changed.dedup();
        for parent in changed {
            state.fire(parent);
        }
        Ok(())
    }
}
