//! Realtime database reached over its REST and event-stream interface.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::{header, Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use super::store::{segments, DataStore, SnapshotCallback, Subscription};
use super::tree;
use crate::constants::STREAM_RECONNECT_DELAY;
use crate::error::StoreError;
use crate::utils::PushIdGenerator;

#[derive(Debug, Clone)]
pub struct RestStore {
    client: Client,
    base_url: String,
    auth_token: Arc<RwLock<Option<String>>>,
    ids: Arc<PushIdGenerator>,
}

/// Payload of `put` and `patch` stream events.
#[derive(Debug, Deserialize)]
struct StreamEvent {
    path: String,
    data: Value,
}

enum StreamEnd {
    /// Server closed the stream or asked us to re-authenticate
    Reconnect,
    /// Access revoked by security rules
    Cancelled,
}

impl RestStore {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            auth_token: Arc::new(RwLock::new(None)),
            ids: Arc::new(PushIdGenerator::new()),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}.json", self.base_url, path.trim_matches('/'))
    }

    fn token(&self) -> Option<String> {
        self.auth_token
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn with_auth(&self, request: RequestBuilder) -> RequestBuilder {
        match self.token() {
            Some(token) => request.query(&[("auth", token)]),
            None => request,
        }
    }
}

async fn check(response: Response) -> Result<Response, StoreError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(StoreError::Status {
        status: status.as_u16(),
        body,
    })
}

#[async_trait]
impl DataStore for RestStore {
    fn generate_key(&self, _prefix: &str) -> String {
        self.ids.next_id()
    }

    async fn read(&self, path: &str) -> Result<Value, StoreError> {
        segments(path)?;
        let response = self.with_auth(self.client.get(self.url(path))).send().await?;
        Ok(check(response).await?.json::<Value>().await?)
    }

    async fn write(&self, path: &str, value: Value) -> Result<(), StoreError> {
        segments(path)?;
        let response = self
            .with_auth(self.client.put(self.url(path)))
            .json(&value)
            .send()
            .await?;
        check(response).await?;
        Ok(())
    }

    async fn update(&self, updates: BTreeMap<String, Value>) -> Result<(), StoreError> {
        if updates.is_empty() {
            return Ok(());
        }
        let mut body = Map::new();
        for (path, value) in updates {
            body.insert(segments(&path)?.join("/"), value);
        }
        let response = self
            .with_auth(self.client.patch(self.url("")))
            .json(&Value::Object(body))
            .send()
            .await?;
        check(response).await?;
        Ok(())
    }

    async fn remove(&self, path: &str) -> Result<(), StoreError> {
        segments(path)?;
        let response = self
            .with_auth(self.client.delete(self.url(path)))
            .send()
            .await?;
        check(response).await?;
        Ok(())
    }

    async fn query_by_field(
        &self,
        path: &str,
        field: &str,
        equals: &str,
    ) -> Result<Vec<(String, Value)>, StoreError> {
        segments(path)?;
        let order_by = serde_json::to_string(field)?;
        let equal_to = serde_json::to_string(equals)?;
        let response = self
            .with_auth(self.client.get(self.url(path)))
            .query(&[("orderBy", order_by), ("equalTo", equal_to)])
            .send()
            .await?;
        match check(response).await?.json::<Value>().await? {
            Value::Object(children) => Ok(children.into_iter().collect()),
            _ => Ok(Vec::new()),
        }
    }

    async fn write_if_absent(&self, path: &str, value: Value) -> Result<bool, StoreError> {
        segments(path)?;
        let response = self
            .with_auth(self.client.get(self.url(path)))
            .header("X-Firebase-ETag", "true")
            .send()
            .await?;
        let response = check(response).await?;
        let etag = response
            .headers()
            .get(header::ETAG)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| StoreError::Unavailable("store did not return an ETag".to_string()))?;
        if !response.json::<Value>().await?.is_null() {
            return Ok(false);
        }

        let response = self
            .with_auth(self.client.put(self.url(path)))
            .header(header::IF_MATCH, etag)
            .json(&value)
            .send()
            .await?;
        if response.status() == StatusCode::PRECONDITION_FAILED {
            // Someone else wrote between our read and write
            return Ok(false);
        }
        check(response).await?;
        Ok(true)
    }

    fn subscribe(
        &self,
        path: &str,
        on_change: SnapshotCallback,
    ) -> Result<Subscription, StoreError> {
        segments(path)?;
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|_| StoreError::Unavailable("no async runtime for subscription".to_string()))?;

        let store = self.clone();
        let path = path.to_string();
        let active = Arc::new(AtomicBool::new(true));
        let listening = active.clone();

        let task = runtime.spawn(async move {
            loop {
                match store.stream_once(&path, &on_change, &listening).await {
                    Ok(StreamEnd::Cancelled) => {
                        warn!(path = %path, "store cancelled the subscription");
                        break;
                    }
                    Ok(StreamEnd::Reconnect) => {
                        debug!(path = %path, "event stream closed, reconnecting");
                    }
                    Err(e) => {
                        warn!(path = %path, "event stream failed: {}", e);
                    }
                }
                if !listening.load(Ordering::Acquire) {
                    break;
                }
                tokio::time::sleep(STREAM_RECONNECT_DELAY).await;
            }
        });

        Ok(Subscription::new(move || {
            active.store(false, Ordering::Release);
            task.abort();
        }))
    }

    fn authorize(&self, token: Option<String>) {
        *self.auth_token.write().unwrap_or_else(|e| e.into_inner()) = token;
    }
}

impl RestStore {
    /// Follows one event stream until it ends, re-delivering the full tree
    /// after every change.
    async fn stream_once(
        &self,
        path: &str,
        on_change: &SnapshotCallback,
        active: &AtomicBool,
    ) -> Result<StreamEnd, StoreError> {
        let response = self
            .with_auth(self.client.get(self.url(path)))
            .header(header::ACCEPT, "text/event-stream")
            .send()
            .await?;
        let response = check(response).await?;

        let mut snapshot = Value::Null;
        let mut buffer: Vec<u8> = Vec::new();
        let mut event: Option<String> = None;
        let mut data = String::new();
        let mut body = response.bytes_stream();

        while let Some(chunk) = body.next().await {
            buffer.extend_from_slice(&chunk?);
            while let Some(pos) = buffer.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = buffer.drain(..=pos).collect();
                let line = String::from_utf8_lossy(&line);
                let line = line.trim_end_matches(['\n', '\r']);

                if !line.is_empty() {
                    if let Some(name) = line.strip_prefix("event:") {
                        event = Some(name.trim().to_string());
                    } else if let Some(payload) = line.strip_prefix("data:") {
                        data.push_str(payload.trim());
                    }
                    continue;
                }

                let name = event.take().unwrap_or_default();
                let payload = std::mem::take(&mut data);
                match name.as_str() {
                    "put" | "patch" => {
                        let change: StreamEvent = serde_json::from_str(&payload)?;
                        apply_event(&mut snapshot, &name, change);
                        if !active.load(Ordering::Acquire) {
                            return Ok(StreamEnd::Cancelled);
                        }
                        on_change(snapshot.clone());
                    }
                    "keep-alive" | "" => {}
                    "cancel" => return Ok(StreamEnd::Cancelled),
                    "auth_revoked" => return Ok(StreamEnd::Reconnect),
                    other => debug!("ignoring stream event '{}'", other),
                }
            }
        }
        Ok(StreamEnd::Reconnect)
    }
}

fn apply_event(snapshot: &mut Value, kind: &str, change: StreamEvent) {
    let target: Vec<String> = change
        .path
        .split('/')
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();
    match (kind, change.data) {
        ("patch", Value::Object(children)) => {
            for (key, value) in children {
                let mut path = target.clone();
                path.extend(key.split('/').filter(|s| !s.is_empty()).map(str::to_string));
                tree::set(snapshot, &path, value);
            }
        }
        (_, data) => tree::set(snapshot, &target, data),
    }
}
