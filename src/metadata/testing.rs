//! Scriptable catalog sessions for tests.
//!
//! Mirrors production behavior at the `CatalogSession` seam: connects succeed
//! only for whitelisted addresses, and each of the three discovery queries is
//! matched by prefix and answered from a scripted result queue.
use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{ConnectError, QueryError};
use crate::metadata::fetcher::{QUERY_METADATA, QUERY_PRIMARY_MEMBER, QUERY_STATUS};
use crate::metadata::session::{CatalogSession, Row, SessionFactory};

pub(crate) fn row(values: &[Option<&str>]) -> Row {
    Row::new(values.iter().map(|v| v.map(str::to_string)).collect())
}

type ScriptedResult = Result<Vec<Row>, QueryError>;

#[derive(Default)]
struct SessionState {
    good_conns: HashSet<String>,
    address: Option<String>,
    connect_attempts: Vec<String>,
    metadata_results: VecDeque<ScriptedResult>,
    primary_results: VecDeque<ScriptedResult>,
    status_results: VecDeque<ScriptedResult>,
}

/// Handle to one scripted session. Clones share state so tests keep a view
/// into sessions after they have been moved into the fetcher.
#[derive(Clone, Default)]
pub(crate) struct SharedSession(Arc<Mutex<SessionState>>);

impl SharedSession {
    pub fn allow(&self, addrs: &[&str]) {
        let mut state = self.0.lock().unwrap();
        state.good_conns = addrs.iter().map(|a| a.to_string()).collect();
    }

    pub fn push_metadata(&self, result: ScriptedResult) {
        self.0.lock().unwrap().metadata_results.push_back(result);
    }

    pub fn push_primary(&self, result: ScriptedResult) {
        self.0.lock().unwrap().primary_results.push_back(result);
    }

    pub fn push_status(&self, result: ScriptedResult) {
        self.0.lock().unwrap().status_results.push_back(result);
    }

    pub fn connect_attempts(&self) -> Vec<String> {
        self.0.lock().unwrap().connect_attempts.clone()
    }
}

#[async_trait]
impl CatalogSession for SharedSession {
    async fn connect(
        &mut self,
        host: &str,
        port: u16,
        _user: &str,
        _password: &str,
        _timeout: Duration,
    ) -> Result<(), ConnectError> {
        let mut state = self.0.lock().unwrap();
        let addr = format!("{host}:{port}");
        state.connect_attempts.push(addr.clone());
        if state.good_conns.contains(&addr) {
            state.address = Some(addr);
            Ok(())
        } else {
            state.address = None;
            Err(ConnectError {
                host: host.to_string(),
                port,
                reason: "connection refused".to_string(),
            })
        }
    }

    async fn query(&mut self, sql: &str) -> Result<Vec<Row>, QueryError> {
        let mut state = self.0.lock().unwrap();
        if state.address.is_none() {
            return Err(QueryError::NotConnected);
        }
        let queue = if sql.starts_with(QUERY_METADATA) {
            &mut state.metadata_results
        } else if sql.starts_with(QUERY_PRIMARY_MEMBER) {
            &mut state.primary_results
        } else if sql.starts_with(QUERY_STATUS) {
            &mut state.status_results
        } else {
            return Err(QueryError::Failed(format!("unexpected query: {sql}")));
        };
        queue
            .pop_front()
            .unwrap_or_else(|| Err(QueryError::Failed("no scripted result".to_string())))
    }

    fn is_connected(&self) -> bool {
        self.0.lock().unwrap().address.is_some()
    }

    fn address(&self) -> Option<String> {
        self.0.lock().unwrap().address.clone()
    }
}

/// Hands out pre-allocated sessions in order, like a real factory would hand
/// out fresh connections. `create_count` exposes how many sessions the code
/// under test actually asked for.
pub(crate) struct ScriptedFactory {
    sessions: Vec<SharedSession>,
    next: Mutex<usize>,
}

impl ScriptedFactory {
    pub fn with_sessions(count: usize) -> Self {
        ScriptedFactory {
            sessions: (0..count).map(|_| SharedSession::default()).collect(),
            next: Mutex::new(0),
        }
    }

    pub fn get(&self, idx: usize) -> SharedSession {
        self.sessions[idx].clone()
    }

    pub fn create_count(&self) -> usize {
        *self.next.lock().unwrap()
    }
}

impl SessionFactory for ScriptedFactory {
    fn create(&self) -> Box<dyn CatalogSession> {
        let mut next = self.next.lock().unwrap();
        let session = self
            .sessions
            .get(*next)
            .expect("test script ran out of pre-allocated sessions")
            .clone();
        *next += 1;
        Box::new(session)
    }
}
