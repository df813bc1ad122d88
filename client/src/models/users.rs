use serde::{Deserialize, Serialize};

use crate::constants::UNKNOWN_USER_NAME;

/// A registered user as stored under `users/{uid}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default)]
    pub is_online: bool,
    /// Server time in milliseconds
    #[serde(default)]
    pub created_at: Option<i64>,
    #[serde(default)]
    pub last_login_at: Option<i64>,
}

impl User {
    /// Name to show for this user: username, then display name, then the
    /// local part of the email.
    pub fn label(&self) -> String {
        if let Some(username) = self.username.as_deref().filter(|u| !u.is_empty()) {
            return username.to_string();
        }
        if !self.display_name.is_empty() {
            return self.display_name.clone();
        }
        match self.email.split('@').next() {
            Some(local) if !local.is_empty() => local.to_string(),
            _ => UNKNOWN_USER_NAME.to_string(),
        }
    }

    /// Case-insensitive match against display name or email.
    pub fn matches(&self, term: &str) -> bool {
        let term = term.to_lowercase();
        self.display_name.to_lowercase().contains(&term)
            || self.email.to_lowercase().contains(&term)
            || self
                .username
                .as_deref()
                .is_some_and(|u| u.to_lowercase().contains(&term))
    }
}

/// Entry of the secondary username index, stored under `usernames/{uid}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsernameEntry {
    pub uid: String,
    /// Username as typed at sign-up
    pub username: String,
    /// Lowercased copy used for lookups
    pub username_lower: String,
}
