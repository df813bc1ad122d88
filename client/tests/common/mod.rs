#![allow(dead_code)]

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chatsync::constants::USERNAME_CLAIMS_PATH;
use chatsync::db::{DataStore, MemoryStore, SnapshotCallback, Subscription};
use chatsync::models::{MatchOutcome, MatchRequest};
use chatsync::services::{IdentityProvider, MatchmakingApi, MemoryIdentityProvider};
use chatsync::{AppContext, MatchmakingError, Settings, StoreError};
use serde_json::Value;
use tokio::sync::Barrier;

/// Matchmaker answering from a script; `Waiting` once the script runs out.
pub struct ScriptedMatchmaker {
    script: Mutex<VecDeque<Result<MatchOutcome, (u16, String)>>>,
    pub requests: AtomicUsize,
    pub ended: Mutex<Vec<(String, String)>>,
    waiting: Mutex<Result<u64, String>>,
    pub count_requests: AtomicUsize,
}

impl ScriptedMatchmaker {
    pub fn new(script: Vec<Result<MatchOutcome, (u16, String)>>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            requests: AtomicUsize::new(0),
            ended: Mutex::new(Vec::new()),
            waiting: Mutex::new(Ok(0)),
            count_requests: AtomicUsize::new(0),
        })
    }

    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    pub fn ended(&self) -> Vec<(String, String)> {
        self.ended.lock().unwrap().clone()
    }

    pub fn set_waiting(&self, count: Result<u64, String>) {
        *self.waiting.lock().unwrap() = count;
    }
}

pub fn matched(id: &str) -> Result<MatchOutcome, (u16, String)> {
    Ok(MatchOutcome::Matched {
        match_id: id.to_string(),
    })
}

pub fn waiting() -> Result<MatchOutcome, (u16, String)> {
    Ok(MatchOutcome::Waiting)
}

#[async_trait]
impl MatchmakingApi for ScriptedMatchmaker {
    async fn process_match(&self, _request: &MatchRequest) -> Result<MatchOutcome, MatchmakingError> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        match self.script.lock().unwrap().pop_front() {
            Some(Ok(outcome)) => Ok(outcome),
            Some(Err((status, message))) => Err(MatchmakingError::Service { status, message }),
            None => Ok(MatchOutcome::Waiting),
        }
    }

    async fn end_match(&self, match_id: &str, session_id: &str) -> Result<(), MatchmakingError> {
        self.ended
            .lock()
            .unwrap()
            .push((match_id.to_string(), session_id.to_string()));
        Ok(())
    }

    async fn waiting_users(&self) -> Result<u64, MatchmakingError> {
        self.count_requests.fetch_add(1, Ordering::SeqCst);
        self.waiting
            .lock()
            .unwrap()
            .clone()
            .map_err(|message| MatchmakingError::Service { status: 503, message })
    }
}

/// Store that holds the first `parties` readers of a username claim until
/// all of them have read it, so concurrent sign-ups pass the availability
/// check together before either one claims.
pub struct ClaimGate {
    inner: Arc<MemoryStore>,
    barrier: Barrier,
    remaining: AtomicUsize,
    pub conditional_writes: AtomicUsize,
}

impl ClaimGate {
    pub fn new(inner: Arc<MemoryStore>, parties: usize) -> Arc<Self> {
        Arc::new(Self {
            inner,
            barrier: Barrier::new(parties),
            remaining: AtomicUsize::new(parties),
            conditional_writes: AtomicUsize::new(0),
        })
    }

    pub fn conditional_writes(&self) -> usize {
        self.conditional_writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DataStore for ClaimGate {
    fn generate_key(&self, prefix: &str) -> String {
        self.inner.generate_key(prefix)
    }

    async fn read(&self, path: &str) -> Result<Value, StoreError> {
        let value = self.inner.read(path).await?;
        let gated = path.starts_with(USERNAME_CLAIMS_PATH)
            && self
                .remaining
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
        if gated {
            self.barrier.wait().await;
        }
        Ok(value)
    }

    async fn write(&self, path: &str, value: Value) -> Result<(), StoreError> {
        self.inner.write(path, value).await
    }

    async fn update(&self, updates: BTreeMap<String, Value>) -> Result<(), StoreError> {
        self.inner.update(updates).await
    }

    async fn remove(&self, path: &str) -> Result<(), StoreError> {
        self.inner.remove(path).await
    }

    async fn query_by_field(
        &self,
        path: &str,
        field: &str,
        equals: &str,
    ) -> Result<Vec<(String, Value)>, StoreError> {
        self.inner.query_by_field(path, field, equals).await
    }

    async fn write_if_absent(&self, path: &str, value: Value) -> Result<bool, StoreError> {
        self.conditional_writes.fetch_add(1, Ordering::SeqCst);
        self.inner.write_if_absent(path, value).await
    }

    fn subscribe(&self, path: &str, on_change: SnapshotCallback) -> Result<Subscription, StoreError> {
        self.inner.subscribe(path, on_change)
    }
}

/// Several clients sharing one store and one identity provider.
pub struct World {
    pub store: Arc<MemoryStore>,
    pub identity: Arc<MemoryIdentityProvider>,
}

impl World {
    pub fn new() -> Self {
        Self {
            store: Arc::new(MemoryStore::new()),
            identity: Arc::new(MemoryIdentityProvider::new()),
        }
    }

    pub fn client(&self) -> AppContext {
        self.client_with(ScriptedMatchmaker::new(Vec::new()))
    }

    pub fn client_with(&self, matchmaker: Arc<ScriptedMatchmaker>) -> AppContext {
        self.client_on(self.store.clone(), matchmaker)
    }

    /// Client reaching the shared store through `store`.
    pub fn client_on(&self, store: Arc<dyn DataStore>, matchmaker: Arc<ScriptedMatchmaker>) -> AppContext {
        let identity: Arc<dyn IdentityProvider> = self.identity.clone();
        AppContext::init(store, identity, matchmaker, Settings::default())
    }
}
