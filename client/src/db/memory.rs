//! In-process store used by tests and local runs.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use tracing::debug;

use super::store::{segments, DataStore, SnapshotCallback, Subscription};
use super::tree;
use crate::error::StoreError;
use crate::utils::PushIdGenerator;

type Clock = Box<dyn Fn() -> i64 + Send + Sync>;

/// A complete `DataStore` kept in memory.
///
/// Server timestamps come from a millisecond clock that never goes
/// backwards. Callbacks run on the writing task after the write is applied,
/// so a view built on this store is up to date as soon as the write returns.
/// A callback must not dispose its own subscription.
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
    ids: PushIdGenerator,
    clock: Clock,
    next_listener: AtomicU64,
}

#[derive(Default)]
struct MemoryState {
    root: Value,
    revision: u64,
    last_time: i64,
    listeners: HashMap<u64, Arc<Listener>>,
    failing: Vec<Vec<String>>,
}

struct Listener {
    segments: Vec<String>,
    callback: SnapshotCallback,
    delivery: Mutex<Delivery>,
}

struct Delivery {
    active: bool,
    last_revision: Option<u64>,
}

struct Pending {
    listener: Arc<Listener>,
    snapshot: Value,
    revision: u64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_clock(|| Utc::now().timestamp_millis())
    }

    /// Store whose server clock reads from `clock`.
    pub fn with_clock(clock: impl Fn() -> i64 + Send + Sync + 'static) -> Self {
        Self {
            state: Arc::new(Mutex::new(MemoryState {
                root: Value::Object(Default::default()),
                ..Default::default()
            })),
            ids: PushIdGenerator::new(),
            clock: Box::new(clock),
            next_listener: AtomicU64::new(1),
        }
    }

    /// Makes every write touching `prefix` (or anything below it) fail.
    pub fn fail_writes_under(&self, prefix: &str) -> Result<(), StoreError> {
        let prefix = segments(prefix)?;
        self.lock().failing.push(prefix);
        Ok(())
    }

    pub fn clear_failures(&self) {
        self.lock().failing.clear();
    }

    /// Number of live subscriptions on exactly `path`.
    pub fn listener_count(&self, path: &str) -> usize {
        let Ok(target) = segments(path) else {
            return 0;
        };
        self.lock()
            .listeners
            .values()
            .filter(|l| l.segments == target)
            .count()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Applies `changes` atomically, then notifies affected listeners.
    fn commit(&self, changes: Vec<(Vec<String>, Value)>) -> Result<(), StoreError> {
        let pending = {
            let mut state = self.lock();
            stage(&mut state, &self.clock, changes)?
        };
        deliver_all(pending);
        Ok(())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn stage(
    state: &mut MemoryState,
    clock: &Clock,
    changes: Vec<(Vec<String>, Value)>,
) -> Result<Vec<Pending>, StoreError> {
    for (path, _) in &changes {
        if let Some(prefix) = state.failing.iter().find(|p| path.starts_with(p.as_slice())) {
            return Err(StoreError::Unavailable(format!(
                "writes under '{}' are failing",
                prefix.join("/")
            )));
        }
    }

    let now = clock().max(state.last_time);
    state.last_time = now;
    for (path, value) in &changes {
        tree::set(
            &mut state.root,
            path,
            tree::resolve_server_values(value.clone(), now),
        );
    }
    state.revision += 1;
    let revision = state.revision;

    let pending = state
        .listeners
        .values()
        .filter(|l| changes.iter().any(|(path, _)| tree::overlaps(&l.segments, path)))
        .map(|l| Pending {
            listener: l.clone(),
            snapshot: tree::get(&state.root, &l.segments),
            revision,
        })
        .collect();
    Ok(pending)
}

fn deliver_all(pending: Vec<Pending>) {
    for p in pending {
        deliver(&p.listener, p.snapshot, p.revision);
    }
}

fn deliver(listener: &Listener, snapshot: Value, revision: u64) {
    let mut delivery = listener.delivery.lock().unwrap_or_else(|e| e.into_inner());
    if !delivery.active {
        return;
    }
    // A newer snapshot already went out
    if delivery.last_revision.is_some_and(|last| revision <= last) {
        return;
    }
    delivery.last_revision = Some(revision);
    (listener.callback)(snapshot);
}

#[async_trait]
impl DataStore for MemoryStore {
    fn generate_key(&self, _prefix: &str) -> String {
        self.ids.next_id()
    }

    async fn read(&self, path: &str) -> Result<Value, StoreError> {
        let path = segments(path)?;
        Ok(tree::get(&self.lock().root, &path))
    }

    async fn write(&self, path: &str, value: Value) -> Result<(), StoreError> {
        self.commit(vec![(segments(path)?, value)])
    }

    async fn update(&self, updates: BTreeMap<String, Value>) -> Result<(), StoreError> {
        let changes = updates
            .into_iter()
            .map(|(path, value)| Ok((segments(&path)?, value)))
            .collect::<Result<Vec<_>, StoreError>>()?;
        if changes.is_empty() {
            return Ok(());
        }
        self.commit(changes)
    }

    async fn remove(&self, path: &str) -> Result<(), StoreError> {
        self.commit(vec![(segments(path)?, Value::Null)])
    }

    async fn query_by_field(
        &self,
        path: &str,
        field: &str,
        equals: &str,
    ) -> Result<Vec<(String, Value)>, StoreError> {
        let path = segments(path)?;
        let collection = tree::get(&self.lock().root, &path);
        let Value::Object(children) = collection else {
            return Ok(Vec::new());
        };
        Ok(children
            .into_iter()
            .filter(|(_, child)| child.get(field).and_then(Value::as_str) == Some(equals))
            .collect())
    }

    async fn write_if_absent(&self, path: &str, value: Value) -> Result<bool, StoreError> {
        let path = segments(path)?;
        let pending = {
            let mut state = self.lock();
            if !tree::get(&state.root, &path).is_null() {
                return Ok(false);
            }
            stage(&mut state, &self.clock, vec![(path, value)])?
        };
        deliver_all(pending);
        Ok(true)
    }

    fn subscribe(
        &self,
        path: &str,
        on_change: SnapshotCallback,
    ) -> Result<Subscription, StoreError> {
        let path = segments(path)?;
        let id = self.next_listener.fetch_add(1, Ordering::Relaxed);
        let listener = Arc::new(Listener {
            segments: path.clone(),
            callback: on_change,
            delivery: Mutex::new(Delivery {
                active: true,
                last_revision: None,
            }),
        });

        let (snapshot, revision) = {
            let mut state = self.lock();
            state.listeners.insert(id, listener.clone());
            (tree::get(&state.root, &path), state.revision)
        };
        debug!(path = %path.join("/"), id, "memory store subscription opened");
        deliver(&listener, snapshot, revision);

        let state: Weak<Mutex<MemoryState>> = Arc::downgrade(&self.state);
        Ok(Subscription::new(move || {
            listener
                .delivery
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .active = false;
            if let Some(state) = state.upgrade() {
                state
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .listeners
                    .remove(&id);
            }
        }))
    }
}
