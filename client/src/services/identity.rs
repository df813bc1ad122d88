use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::constants::DEFAULT_IDENTITY_URL;
use crate::error::{ChatError, Result};

/// An authenticated identity as issued by the identity provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub uid: String,
    pub email: String,
    /// Bearer token for the store, when the provider issues one
    pub id_token: Option<String>,
}

/// Credential issuance and verification.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn create_credential(&self, email: &str, password: &str) -> Result<Principal>;

    async fn authenticate(&self, email: &str, password: &str) -> Result<Principal>;

    async fn invalidate(&self, principal: &Principal) -> Result<()>;
}

/// Provider keeping accounts in memory, for tests and local runs.
#[derive(Debug, Default)]
pub struct MemoryIdentityProvider {
    accounts: Mutex<HashMap<String, Account>>,
}

#[derive(Debug, Clone)]
struct Account {
    uid: String,
    password: String,
}

impl MemoryIdentityProvider {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl IdentityProvider for MemoryIdentityProvider {
    async fn create_credential(&self, email: &str, password: &str) -> Result<Principal> {
        let email = email.trim().to_lowercase();
        let mut accounts = self.accounts.lock().unwrap_or_else(|e| e.into_inner());
        if accounts.contains_key(&email) {
            return Err(ChatError::Identity("EMAIL_EXISTS".to_string()));
        }
        let uid = Uuid::new_v4().simple().to_string();
        accounts.insert(
            email.clone(),
            Account {
                uid: uid.clone(),
                password: password.to_string(),
            },
        );
        Ok(Principal {
            uid,
            email,
            id_token: None,
        })
    }

    async fn authenticate(&self, email: &str, password: &str) -> Result<Principal> {
        let email = email.trim().to_lowercase();
        let accounts = self.accounts.lock().unwrap_or_else(|e| e.into_inner());
        match accounts.get(&email) {
            Some(account) if account.password == password => Ok(Principal {
                uid: account.uid.clone(),
                email,
                id_token: None,
            }),
            _ => Err(ChatError::Identity("INVALID_LOGIN_CREDENTIALS".to_string())),
        }
    }

    async fn invalidate(&self, _principal: &Principal) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PasswordRequest<'a> {
    email: &'a str,
    password: &'a str,
    return_secure_token: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PasswordReply {
    local_id: String,
    email: String,
    id_token: String,
}

#[derive(Debug, Deserialize)]
struct ProviderErrorReply {
    error: ProviderError,
}

#[derive(Debug, Deserialize)]
struct ProviderError {
    message: String,
}

/// Email/password accounts through the identity toolkit REST API.
#[derive(Debug, Clone)]
pub struct RestIdentityProvider {
    client: Client,
    api_key: String,
    base_url: String,
}

impl RestIdentityProvider {
    pub fn new(api_key: String) -> Self {
        Self::with_base_url(api_key, DEFAULT_IDENTITY_URL.to_string())
    }

    pub fn with_base_url(api_key: String, base_url: String) -> Self {
        Self {
            client: Client::new(),
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    async fn password_call(&self, action: &str, email: &str, password: &str) -> Result<Principal> {
        let url = format!("{}/accounts:{}", self.base_url, action);
        let response = self
            .client
            .post(&url)
            .query(&[("key", &self.api_key)])
            .json(&PasswordRequest {
                email,
                password,
                return_secure_token: true,
            })
            .send()
            .await
            .map_err(|e| ChatError::Identity(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let message = match response.json::<ProviderErrorReply>().await {
                Ok(reply) => reply.error.message,
                Err(_) => format!("identity provider returned {}", status),
            };
            return Err(ChatError::Identity(message));
        }

        let reply: PasswordReply = response
            .json()
            .await
            .map_err(|e| ChatError::Identity(e.to_string()))?;
        Ok(Principal {
            uid: reply.local_id,
            email: reply.email,
            id_token: Some(reply.id_token),
        })
    }
}

#[async_trait]
impl IdentityProvider for RestIdentityProvider {
    async fn create_credential(&self, email: &str, password: &str) -> Result<Principal> {
        self.password_call("signUp", email, password).await
    }

    async fn authenticate(&self, email: &str, password: &str) -> Result<Principal> {
        self.password_call("signInWithPassword", email, password).await
    }

    async fn invalidate(&self, _principal: &Principal) -> Result<()> {
        // Tokens are bearer tokens; dropping them client-side is the sign-out
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_provider_credentials() {
        let provider = MemoryIdentityProvider::new();
        let created = provider.create_credential("Neo@Matrix.io", "secret1").await.unwrap();
        assert!(provider.create_credential("neo@matrix.io", "other12").await.is_err());

        let principal = provider.authenticate("neo@matrix.io", "secret1").await.unwrap();
        assert_eq!(principal.uid, created.uid);
        assert!(provider.authenticate("neo@matrix.io", "wrong").await.is_err());
    }
}
