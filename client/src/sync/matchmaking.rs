//! Anonymous pairing through the external matchmaker.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use super::messages::MessageSync;
use crate::db::DataStore;
use crate::error::{ChatError, MatchmakingError, Result};
use crate::models::{AnonymousIdentity, AnonymousMessage, MatchOutcome, MatchRequest};
use crate::services::MatchmakingApi;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchState {
    Idle,
    /// First pairing request in flight
    Searching,
    /// No partner yet; the request is re-issued periodically
    Waiting,
    Matched { match_id: String },
    Ended { error: Option<String> },
}

impl MatchState {
    /// Whether a search or a match is in progress.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            MatchState::Searching | MatchState::Waiting | MatchState::Matched { .. }
        )
    }

    pub fn match_id(&self) -> Option<&str> {
        match self {
            MatchState::Matched { match_id } => Some(match_id),
            _ => None,
        }
    }
}

/// One anonymous identity looking for, or talking to, a partner.
///
/// Every `start` opens a new generation. Replies that arrive for an older
/// generation are discarded, and a match they carry is released.
pub struct MatchmakingSession {
    inner: Arc<Inner>,
}

struct Inner {
    api: Arc<dyn MatchmakingApi>,
    store: Arc<dyn DataStore>,
    identity: AnonymousIdentity,
    interests: Vec<String>,
    poll_interval: Duration,
    state: watch::Sender<MatchState>,
    runtime: Mutex<Runtime>,
}

#[derive(Default)]
struct Runtime {
    generation: u64,
    poller: Option<JoinHandle<()>>,
    messages: Option<Arc<MessageSync<AnonymousMessage>>>,
}

impl MatchmakingSession {
    pub fn new(
        api: Arc<dyn MatchmakingApi>,
        store: Arc<dyn DataStore>,
        identity: AnonymousIdentity,
        interests: Vec<String>,
        poll_interval: Duration,
    ) -> Self {
        let (state, _) = watch::channel(MatchState::Idle);
        Self {
            inner: Arc::new(Inner {
                api,
                store,
                identity,
                interests,
                poll_interval,
                state,
                runtime: Mutex::new(Runtime::default()),
            }),
        }
    }

    pub fn identity(&self) -> &AnonymousIdentity {
        &self.inner.identity
    }

    pub fn interests(&self) -> &[String] {
        &self.inner.interests
    }

    pub fn state(&self) -> MatchState {
        self.inner.state.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<MatchState> {
        self.inner.state.subscribe()
    }

    /// Asks the matchmaker for a partner.
    ///
    /// Resolves to `Matched` or `Waiting`; while waiting a background task
    /// repeats the request until a match arrives or the session ends.
    /// Calling it during an active search or match changes nothing.
    pub async fn start(&self) -> Result<MatchState> {
        let generation = {
            let mut runtime = self.inner.lock();
            let current = self.state();
            if current.is_active() {
                debug!("Ignoring start while {:?}", current);
                return Ok(current);
            }
            runtime.generation += 1;
            self.inner.state.send_replace(MatchState::Searching);
            runtime.generation
        };
        info!(
            "🔎 {} searching with interests {:?}",
            self.inner.identity.display_name, self.inner.interests
        );

        let outcome = self.inner.api.process_match(&self.inner.request()).await;
        self.inner.settle(generation, outcome)
    }

    /// Leaves the current search or match and tells the matchmaker.
    pub async fn end(&self) {
        if let Some(match_id) = self.inner.teardown() {
            self.inner.notify_end(&match_id).await;
        }
    }

    /// Ends the current session, then searches again.
    pub async fn restart(&self) -> Result<MatchState> {
        self.end().await;
        self.start().await
    }

    fn active_messages(&self) -> Result<Arc<MessageSync<AnonymousMessage>>> {
        self.inner
            .lock()
            .messages
            .clone()
            .ok_or_else(|| ChatError::InvalidState("no active match".to_string()))
    }

    /// Sends `text` to the matched partner.
    pub async fn send(&self, text: &str) -> Result<String> {
        let messages = self.active_messages()?;
        messages.send(&self.inner.identity, text).await
    }

    pub async fn soft_delete(&self, message_id: &str) -> Result<()> {
        let messages = self.active_messages()?;
        messages
            .soft_delete(&self.inner.identity.session_id, message_id)
            .await
    }

    /// Messages of the current match, empty when not matched.
    pub fn messages(&self) -> Vec<AnonymousMessage> {
        self.inner
            .lock()
            .messages
            .as_ref()
            .map(|m| m.messages())
            .unwrap_or_default()
    }

    pub fn watch_messages(&self) -> Option<watch::Receiver<Vec<AnonymousMessage>>> {
        self.inner.lock().messages.as_ref().map(|m| m.watch())
    }
}

impl Drop for MatchmakingSession {
    fn drop(&mut self) {
        let Some(match_id) = self.inner.teardown() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let inner = self.inner.clone();
                handle.spawn(async move { inner.notify_end(&match_id).await });
            }
            Err(_) => warn!("No runtime to release match {}", match_id),
        }
    }
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, Runtime> {
        self.runtime.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn request(&self) -> MatchRequest {
        MatchRequest {
            interests: self.interests.clone(),
            user_id: self.identity.session_id.clone(),
        }
    }

    fn is_current(&self, generation: u64) -> bool {
        self.lock().generation == generation
    }

    /// Applies the reply to the first request of `generation`.
    fn settle(
        self: &Arc<Self>,
        generation: u64,
        outcome: std::result::Result<MatchOutcome, MatchmakingError>,
    ) -> Result<MatchState> {
        let mut runtime = self.lock();
        if runtime.generation != generation {
            drop(runtime);
            if let Ok(MatchOutcome::Matched { match_id }) = outcome {
                self.release(match_id);
            }
            return Ok(self.state.borrow().clone());
        }

        match outcome {
            Ok(MatchOutcome::Matched { match_id }) => {
                self.enter_matched(&mut runtime, match_id)?;
            }
            Ok(MatchOutcome::Waiting) => {
                info!("⏳ No partner yet, waiting");
                self.state.send_replace(MatchState::Waiting);
                runtime.poller = Some(tokio::spawn(poll(self.clone(), generation)));
            }
            Ok(MatchOutcome::Rejected { status, message }) => {
                let e = MatchmakingError::Rejected { status, message };
                self.fail(&e);
                return Err(e.into());
            }
            Err(e) => {
                self.fail(&e);
                return Err(e.into());
            }
        }
        Ok(self.state.borrow().clone())
    }

    fn enter_matched(self: &Arc<Self>, runtime: &mut Runtime, match_id: String) -> Result<()> {
        match MessageSync::start(self.store.clone(), &match_id) {
            Ok(messages) => {
                info!("🤝 Matched in {}", match_id);
                runtime.messages = Some(Arc::new(messages));
                self.state.send_replace(MatchState::Matched { match_id });
                Ok(())
            }
            Err(e) => {
                self.fail(&e);
                self.release(match_id);
                Err(e)
            }
        }
    }

    fn fail(&self, e: &dyn std::fmt::Display) {
        error!("❌ Matchmaking failed: {}", e);
        self.state.send_replace(MatchState::Ended {
            error: Some(e.to_string()),
        });
    }

    /// Moves an active session to `Ended` and stops its background work.
    /// Returns the match to release, if one was joined.
    fn teardown(&self) -> Option<String> {
        let (match_id, poller, messages) = {
            let mut runtime = self.lock();
            let current = self.state.borrow().clone();
            if !current.is_active() {
                return None;
            }
            runtime.generation += 1;
            self.state.send_replace(MatchState::Ended { error: None });
            (
                current.match_id().map(str::to_string),
                runtime.poller.take(),
                runtime.messages.take(),
            )
        };
        if let Some(poller) = poller {
            poller.abort();
        }
        if let Some(messages) = messages {
            messages.dispose();
        }
        info!("👋 {} left matchmaking", self.identity.display_name);
        match_id
    }

    /// Tells the matchmaker in the background that we are leaving `match_id`.
    fn release(self: &Arc<Self>, match_id: String) {
        let inner = self.clone();
        tokio::spawn(async move { inner.notify_end(&match_id).await });
    }

    async fn notify_end(&self, match_id: &str) {
        match self.api.end_match(match_id, &self.identity.session_id).await {
            Ok(()) => debug!("Released match {}", match_id),
            Err(e) => warn!("Failed to release match {}: {}", match_id, e),
        }
    }
}

/// Re-issues the pairing request every poll interval until matched or
/// superseded. Errors while waiting are logged and polling continues.
async fn poll(inner: Arc<Inner>, generation: u64) {
    let period = inner.poll_interval;
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        if !inner.is_current(generation) {
            break;
        }
        match inner.api.process_match(&inner.request()).await {
            Ok(MatchOutcome::Matched { match_id }) => {
                let mut runtime = inner.lock();
                let waiting = *inner.state.borrow() == MatchState::Waiting;
                if runtime.generation != generation || !waiting {
                    drop(runtime);
                    inner.release(match_id);
                    break;
                }
                // This task finishes right after, so the handle is only dropped
                runtime.poller = None;
                if let Err(e) = inner.enter_matched(&mut runtime, match_id) {
                    warn!("Could not open the match: {}", e);
                }
                break;
            }
            Ok(MatchOutcome::Waiting) => debug!("Still waiting for a partner"),
            Ok(MatchOutcome::Rejected { status, message }) => {
                warn!("Matchmaker rejected a poll ({}): {}", status, message)
            }
            Err(e) => warn!("Matchmaking poll failed: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_active_states() {
        assert!(!MatchState::Idle.is_active());
        assert!(MatchState::Searching.is_active());
        assert!(MatchState::Waiting.is_active());
        assert!(MatchState::Matched {
            match_id: "m1".to_string()
        }
        .is_active());
        assert!(!MatchState::Ended { error: None }.is_active());
    }

    #[test]
    fn test_match_id_only_when_matched() {
        let matched = MatchState::Matched {
            match_id: "m1".to_string(),
        };
        assert_eq!(matched.match_id(), Some("m1"));
        assert_eq!(MatchState::Waiting.match_id(), None);
    }
}
