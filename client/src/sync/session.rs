//! Lifecycle of the signed-in principal.

use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::constants::{MIN_PASSWORD_LENGTH, MIN_USERNAME_LENGTH};
use crate::db::{users, DataStore};
use crate::error::{ChatError, Result};
use crate::models::User;
use crate::services::{IdentityProvider, Principal};

static USERNAME_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_]+$").expect("username pattern is valid"));

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Anonymous,
    Authenticating,
    Authenticated(Principal),
}

/// Tracks who is signed in and keeps their profile and presence current.
///
/// State changes are published on a watch channel, which is the
/// "current principal changed" notification for everything gated on it.
pub struct IdentitySession {
    store: Arc<dyn DataStore>,
    provider: Arc<dyn IdentityProvider>,
    state: watch::Sender<SessionState>,
}

impl IdentitySession {
    pub fn new(store: Arc<dyn DataStore>, provider: Arc<dyn IdentityProvider>) -> Self {
        let (state, _) = watch::channel(SessionState::Anonymous);
        Self {
            store,
            provider,
            state,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state.borrow().clone()
    }

    pub fn current(&self) -> Option<Principal> {
        match &*self.state.borrow() {
            SessionState::Authenticated(principal) => Some(principal.clone()),
            _ => None,
        }
    }

    pub fn watch(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    pub fn validate_username(username: &str) -> Result<()> {
        let username = username.trim();
        if username.is_empty() {
            return Err(ChatError::InvalidUsername("Username is required".to_string()));
        }
        if username.chars().count() < MIN_USERNAME_LENGTH {
            return Err(ChatError::InvalidUsername(format!(
                "Username must be at least {} characters long",
                MIN_USERNAME_LENGTH
            )));
        }
        if !USERNAME_PATTERN.is_match(username) {
            return Err(ChatError::InvalidUsername(
                "Username can only contain letters, numbers and underscores".to_string(),
            ));
        }
        Ok(())
    }

    fn validate_credentials(email: &str, password: &str) -> Result<()> {
        if email.trim().is_empty() {
            return Err(ChatError::InvalidCredentials("Email is required".to_string()));
        }
        if password.chars().count() < MIN_PASSWORD_LENGTH {
            return Err(ChatError::InvalidCredentials(format!(
                "Password must be at least {} characters long",
                MIN_PASSWORD_LENGTH
            )));
        }
        Ok(())
    }

    /// Whether nobody holds `username`, ignoring case.
    pub async fn check_username_available(&self, username: &str) -> Result<bool> {
        Self::validate_username(username)?;
        Ok(!users::is_username_taken(self.store.as_ref(), username.trim()).await?)
    }

    /// Creates an account, its profile and its username reservation.
    ///
    /// Fails with `UsernameTaken` before anything is written when the
    /// username is held by someone else, including a concurrent sign-up.
    pub async fn sign_up(&self, email: &str, password: &str, username: &str) -> Result<User> {
        Self::validate_username(username)?;
        Self::validate_credentials(email, password)?;
        self.begin()?;
        let result = self.register(email.trim(), password, username.trim()).await;
        self.finish(result)
    }

    pub async fn sign_in(&self, email: &str, password: &str) -> Result<User> {
        if email.trim().is_empty() || password.is_empty() {
            return Err(ChatError::InvalidCredentials(
                "Email and password are required".to_string(),
            ));
        }
        self.begin()?;
        let result = self.authenticate(email.trim(), password).await;
        self.finish(result)
    }

    /// Marks the user offline, then drops the credential. Signing out while
    /// signed out does nothing.
    pub async fn sign_out(&self) -> Result<()> {
        let Some(principal) = self.current() else {
            return Ok(());
        };
        if let Err(e) = users::mark_offline(self.store.as_ref(), &principal.uid).await {
            warn!("Could not mark {} offline: {}", principal.uid, e);
        }
        let result = self.provider.invalidate(&principal).await;
        self.store.authorize(None);
        self.state.send_replace(SessionState::Anonymous);
        info!("Signed out {}", principal.uid);
        result
    }

    fn begin(&self) -> Result<()> {
        let started = self.state.send_if_modified(|state| {
            if *state == SessionState::Anonymous {
                *state = SessionState::Authenticating;
                true
            } else {
                false
            }
        });
        if !started {
            return Err(ChatError::InvalidState(
                "another sign-in is active; sign out first".to_string(),
            ));
        }
        Ok(())
    }

    fn finish(&self, result: Result<(Principal, User)>) -> Result<User> {
        match result {
            Ok((principal, user)) => {
                info!("Signed in {} ({})", principal.uid, principal.email);
                self.state.send_replace(SessionState::Authenticated(principal));
                Ok(user)
            }
            Err(e) => {
                warn!("Authentication failed: {}", e);
                self.store.authorize(None);
                self.state.send_replace(SessionState::Anonymous);
                Err(e)
            }
        }
    }

    async fn register(&self, email: &str, password: &str, username: &str) -> Result<(Principal, User)> {
        let store = self.store.as_ref();
        if users::is_username_taken(store, username).await? {
            return Err(ChatError::UsernameTaken(username.to_string()));
        }
        if !users::claim_username(store, username).await? {
            return Err(ChatError::UsernameTaken(username.to_string()));
        }

        let principal = match self.provider.create_credential(email, password).await {
            Ok(principal) => principal,
            Err(e) => {
                self.release_claim(username).await;
                return Err(e);
            }
        };
        self.store.authorize(principal.id_token.clone());
        if let Err(e) = users::bind_username_claim(store, &principal.uid, username).await {
            self.release_claim(username).await;
            return Err(e.into());
        }

        // From here on the bound claim lets a later sign-in finish the job
        users::create_user(store, &principal.uid, &principal.email, username, Some(username)).await?;
        users::index_username(store, &principal.uid, username).await?;
        let user = users::get_user(store, &principal.uid)
            .await?
            .ok_or_else(|| ChatError::NotFound(format!("profile {}", principal.uid)))?;
        Ok((principal, user))
    }

    async fn release_claim(&self, username: &str) {
        if let Err(e) = users::release_username_claim(self.store.as_ref(), username).await {
            warn!("Could not release username claim '{}': {}", username, e);
        }
    }

    async fn authenticate(&self, email: &str, password: &str) -> Result<(Principal, User)> {
        let principal = self.provider.authenticate(email, password).await?;
        self.store.authorize(principal.id_token.clone());

        let store = self.store.as_ref();
        match users::get_user(store, &principal.uid).await? {
            Some(user) => {
                users::mark_online(store, &principal.uid).await?;
                if let Some(username) = user.username.as_deref() {
                    self.restore_index(&principal.uid, username).await?;
                }
            }
            None => self.restore_profile(&principal).await?,
        }
        let user = users::get_user(store, &principal.uid)
            .await?
            .ok_or_else(|| ChatError::NotFound(format!("profile {}", principal.uid)))?;
        Ok((principal, user))
    }

    /// Writes the profile a sign-up never got to, keeping the username it
    /// had claimed.
    async fn restore_profile(&self, principal: &Principal) -> Result<()> {
        let store = self.store.as_ref();
        match users::find_claimed_username(store, &principal.uid).await? {
            Some(username) => {
                info!("Finishing sign-up of {} as '{}'", principal.uid, username);
                users::create_user(store, &principal.uid, &principal.email, &username, Some(&username)).await?;
                users::index_username(store, &principal.uid, &username).await?;
            }
            None => {
                info!("Profile missing for {}, creating it", principal.uid);
                let display_name = principal.email.split('@').next().unwrap_or_default();
                users::create_user(store, &principal.uid, &principal.email, display_name, None).await?;
            }
        }
        Ok(())
    }

    /// Adds the index entry when the profile was written but the index was not.
    async fn restore_index(&self, uid: &str, username: &str) -> Result<()> {
        let store = self.store.as_ref();
        if users::get_uid_by_username(store, username).await?.is_some() {
            return Ok(());
        }
        let claimed = users::find_claimed_username(store, uid).await?;
        if claimed.is_some_and(|claimed| claimed.eq_ignore_ascii_case(username)) {
            info!("Indexing username '{}' for {}", username, uid);
            users::index_username(store, uid, username).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_username_rules() {
        assert!(IdentitySession::validate_username("neo_1").is_ok());
        assert!(matches!(
            IdentitySession::validate_username("  "),
            Err(ChatError::InvalidUsername(_))
        ));
        assert!(IdentitySession::validate_username("ab").is_err());
        assert!(IdentitySession::validate_username("with space").is_err());
        assert!(IdentitySession::validate_username("dash-ed").is_err());
    }

    #[test]
    fn test_credential_rules() {
        assert!(IdentitySession::validate_credentials("a@b.c", "secret").is_ok());
        assert!(IdentitySession::validate_credentials("", "secret").is_err());
        assert!(IdentitySession::validate_credentials("a@b.c", "12345").is_err());
    }
}
