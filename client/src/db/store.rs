use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::error::StoreError;

/// Invoked with the full snapshot under the subscribed path.
pub type SnapshotCallback = Arc<dyn Fn(Value) + Send + Sync>;

/// Placeholder the store replaces with its own clock at write time.
pub fn server_timestamp() -> Value {
    json!({ ".sv": "timestamp" })
}

/// Joins store path segments, ignoring stray slashes.
pub fn child(parent: &str, key: &str) -> String {
    format!("{}/{}", parent.trim_end_matches('/'), key.trim_start_matches('/'))
}

/// Splits a path into its non-empty segments.
pub fn segments(path: &str) -> Result<Vec<String>, StoreError> {
    let segments: Vec<String> = path
        .split('/')
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();
    if segments.is_empty() {
        return Err(StoreError::InvalidPath(path.to_string()));
    }
    Ok(segments)
}

/// A path-addressed, hierarchical key-value store with push notification.
///
/// Subscriptions deliver the complete snapshot under their path, once
/// immediately and again after every overlapping change. Deliveries for a
/// single subscription never run concurrently and never go backwards.
#[async_trait]
pub trait DataStore: Send + Sync {
    /// A fresh key under `prefix` that sorts after every key generated
    /// before it.
    fn generate_key(&self, prefix: &str) -> String;

    /// Value under `path`, `Value::Null` when absent.
    async fn read(&self, path: &str) -> Result<Value, StoreError>;

    async fn write(&self, path: &str, value: Value) -> Result<(), StoreError>;

    /// Writes `value` under a generated key and returns the key.
    async fn push(&self, prefix: &str, value: Value) -> Result<String, StoreError> {
        let key = self.generate_key(prefix);
        self.write(&child(prefix, &key), value).await?;
        Ok(key)
    }

    /// Applies every path in one step. `Value::Null` removes the path.
    async fn update(&self, updates: BTreeMap<String, Value>) -> Result<(), StoreError>;

    async fn remove(&self, path: &str) -> Result<(), StoreError>;

    /// Children of `path` whose `field` equals `equals`, in key order.
    async fn query_by_field(
        &self,
        path: &str,
        field: &str,
        equals: &str,
    ) -> Result<Vec<(String, Value)>, StoreError>;

    /// Writes only if nothing exists under `path`. Returns whether it wrote.
    async fn write_if_absent(&self, path: &str, value: Value) -> Result<bool, StoreError>;

    fn subscribe(&self, path: &str, on_change: SnapshotCallback)
        -> Result<Subscription, StoreError>;

    /// Credential attached to subsequent requests. Local stores ignore it.
    fn authorize(&self, _token: Option<String>) {}
}

type Disposer = Box<dyn FnOnce() + Send>;

/// Handle to a live subscription.
///
/// Disposing is idempotent and also happens on drop. Once `dispose` returns
/// no new callback invocation starts.
pub struct Subscription {
    disposer: Mutex<Option<Disposer>>,
}

impl Subscription {
    pub fn new(disposer: impl FnOnce() + Send + 'static) -> Self {
        Self {
            disposer: Mutex::new(Some(Box::new(disposer))),
        }
    }

    pub fn dispose(&self) {
        let disposer = self
            .disposer
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(disposer) = disposer {
            disposer();
        }
    }

    pub fn is_active(&self) -> bool {
        self.disposer
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.is_active())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_dispose_runs_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let subscription = Subscription::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        subscription.dispose();
        subscription.dispose();
        assert!(!subscription.is_active());
        drop(subscription);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_segments() {
        assert_eq!(segments("/users//abc/").unwrap(), vec!["users", "abc"]);
        assert!(segments("///").is_err());
        assert_eq!(child("messages/", "/k1"), "messages/k1");
    }
}
