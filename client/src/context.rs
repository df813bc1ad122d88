//! Wiring of the store, the external services and the sync components.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tracing::{info, warn};

use crate::constants::{DEFAULT_MATCH_POLL_INTERVAL_SECS, DEFAULT_ONLINE_COUNT_INTERVAL_SECS};
use crate::db::{connect_store, users, DataStore, StoreConfig};
use crate::error::{ChatError, Result};
use crate::models::AnonymousIdentity;
use crate::services::{
    IdentityProvider, MatchmakingApi, MatchmakingClient, MemoryIdentityProvider,
    RestIdentityProvider,
};
use crate::sync::{
    ChatSync, DirectorySync, IdentitySession, MatchmakingSession, OnlineCounter, SessionState,
};
use crate::utils::Config;

/// Timing and persistence knobs of the sync components.
#[derive(Debug, Clone)]
pub struct Settings {
    pub match_poll_interval: Duration,
    pub online_count_interval: Duration,
    /// Where the anonymous identity is kept between runs
    pub anon_identity_path: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            match_poll_interval: Duration::from_secs(DEFAULT_MATCH_POLL_INTERVAL_SECS),
            online_count_interval: Duration::from_secs(DEFAULT_ONLINE_COUNT_INTERVAL_SECS),
            anon_identity_path: None,
        }
    }
}

impl From<&Config> for Settings {
    fn from(config: &Config) -> Self {
        Self {
            match_poll_interval: config.match_poll_interval,
            online_count_interval: config.online_count_interval,
            anon_identity_path: config.anon_identity_path.clone(),
        }
    }
}

/// Everything that only exists while a user is signed in. It disposes
/// itself as soon as the session leaves `Authenticated`.
pub struct Workspace {
    pub directory: Arc<DirectorySync>,
    pub chats: ChatSync,
}

impl Workspace {
    pub fn dispose(&self) {
        self.chats.dispose();
        self.directory.dispose();
    }
}

/// Owns the shared store handle and the identity session, and builds the
/// components that depend on them.
pub struct AppContext {
    store: Arc<dyn DataStore>,
    session: IdentitySession,
    matchmaker: Arc<dyn MatchmakingApi>,
    settings: Settings,
    workspace: Mutex<Option<Arc<Workspace>>>,
}

impl AppContext {
    pub fn init(
        store: Arc<dyn DataStore>,
        identity: Arc<dyn IdentityProvider>,
        matchmaker: Arc<dyn MatchmakingApi>,
        settings: Settings,
    ) -> Self {
        Self {
            session: IdentitySession::new(store.clone(), identity),
            store,
            matchmaker,
            settings,
            workspace: Mutex::new(None),
        }
    }

    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let store = connect_store(&StoreConfig {
            database_url: config.database_url.clone(),
        })?;
        let identity: Arc<dyn IdentityProvider> = match &config.identity_api_key {
            Some(key) => Arc::new(RestIdentityProvider::new(key.clone())),
            None => {
                warn!("IDENTITY_API_KEY not set, accounts are kept in memory");
                Arc::new(MemoryIdentityProvider::new())
            }
        };
        let matchmaker = Arc::new(MatchmakingClient::new(config.matchmaker_url.clone()));
        info!("Using matchmaker at {}", config.matchmaker_url);
        Ok(Self::init(store, identity, matchmaker, Settings::from(config)))
    }

    pub fn store(&self) -> &Arc<dyn DataStore> {
        &self.store
    }

    pub fn session(&self) -> &IdentitySession {
        &self.session
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    fn lock_workspace(&self) -> MutexGuard<'_, Option<Arc<Workspace>>> {
        self.workspace.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Starts the directory and chat list for the signed-in user, replacing
    /// any previous workspace.
    pub async fn open_workspace(&self) -> Result<Arc<Workspace>> {
        let principal = self.session.current().ok_or(ChatError::NotAuthenticated)?;
        let me = users::get_user(self.store.as_ref(), &principal.uid)
            .await?
            .ok_or_else(|| ChatError::NotFound(format!("profile {}", principal.uid)))?;

        let directory = Arc::new(DirectorySync::start(self.store.as_ref(), &me.id)?);
        let chats = ChatSync::start(self.store.clone(), directory.clone(), me)?;
        let workspace = Arc::new(Workspace { directory, chats });

        if let Some(previous) = self.lock_workspace().replace(workspace.clone()) {
            previous.dispose();
        }
        self.close_on_sign_out(&workspace);
        Ok(workspace)
    }

    fn close_on_sign_out(&self, workspace: &Arc<Workspace>) {
        let mut state = self.session.watch();
        let workspace = Arc::downgrade(workspace);
        tokio::spawn(async move {
            loop {
                if !matches!(*state.borrow_and_update(), SessionState::Authenticated(_)) {
                    break;
                }
                if state.changed().await.is_err() {
                    break;
                }
            }
            if let Some(workspace) = workspace.upgrade() {
                info!("Session ended, closing workspace");
                workspace.dispose();
            }
        });
    }

    /// Anonymous identity for matchmaking, persisted when a path is set.
    pub fn anonymous_identity(&self) -> Result<AnonymousIdentity> {
        match &self.settings.anon_identity_path {
            Some(path) => AnonymousIdentity::load_or_create(path),
            None => Ok(AnonymousIdentity::generate()),
        }
    }

    /// Starts a matchmaking session. Interests are trimmed and deduplicated
    /// ignoring case, keeping the first spelling seen.
    pub fn matchmaking(&self, interests: Vec<String>) -> Result<MatchmakingSession> {
        let mut seen = HashSet::new();
        let interests: Vec<String> = interests
            .into_iter()
            .map(|i| i.trim().to_string())
            .filter(|i| !i.is_empty() && seen.insert(i.to_lowercase()))
            .collect();
        Ok(MatchmakingSession::new(
            self.matchmaker.clone(),
            self.store.clone(),
            self.anonymous_identity()?,
            interests,
            self.settings.match_poll_interval,
        ))
    }

    pub fn online_counter(&self) -> OnlineCounter {
        OnlineCounter::start(self.matchmaker.clone(), self.settings.online_count_interval)
    }

    /// Closes the workspace, then signs out.
    pub async fn sign_out(&self) -> Result<()> {
        if let Some(workspace) = self.lock_workspace().take() {
            workspace.dispose();
        }
        self.session.sign_out().await
    }

    pub async fn dispose(self) -> Result<()> {
        self.sign_out().await
    }
}
