use serde::{Deserialize, Serialize};

use crate::constants::{ANONYMOUS_MESSAGES_PATH, MESSAGES_PATH};

/// Common view over the records a message subscription projects.
pub trait MessageRecord:
    serde::de::DeserializeOwned + Clone + Send + Sync + std::fmt::Debug + 'static
{
    /// Top-level collection holding this kind of record.
    const COLLECTION: &'static str;

    fn id(&self) -> &str;
    fn set_id(&mut self, id: String);
    /// Chat or match id the record belongs to.
    fn scope_id(&self) -> &str;
    fn timestamp(&self) -> Option<i64>;
    /// Identity of the author, used for ownership checks.
    fn author_id(&self) -> &str;
    fn is_deleted(&self) -> bool;
}

/// A message between two authenticated users, stored under `messages/{id}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    #[serde(default)]
    pub id: String,
    pub chat_id: String,
    pub sender_id: String,
    #[serde(default)]
    pub sender_name: String,
    #[serde(default)]
    pub sender_email: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub is_deleted: bool,
    #[serde(default)]
    pub timestamp: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receiver_id: Option<String>,
}

impl MessageRecord for Message {
    const COLLECTION: &'static str = MESSAGES_PATH;

    fn id(&self) -> &str {
        &self.id
    }

    fn set_id(&mut self, id: String) {
        self.id = id;
    }

    fn scope_id(&self) -> &str {
        &self.chat_id
    }

    fn timestamp(&self) -> Option<i64> {
        self.timestamp
    }

    fn author_id(&self) -> &str {
        &self.sender_id
    }

    fn is_deleted(&self) -> bool {
        self.is_deleted
    }
}

/// A message inside a matchmaking session, stored under
/// `anonymous_messages/{id}` with `chatId` set to the match id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnonymousMessage {
    #[serde(default)]
    pub id: String,
    pub chat_id: String,
    pub anonymous_user_id: String,
    #[serde(default)]
    pub anonymous_display_name: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub is_deleted: bool,
    #[serde(default = "default_true")]
    pub is_anonymous: bool,
    #[serde(default)]
    pub timestamp: Option<i64>,
}

fn default_true() -> bool {
    true
}

impl MessageRecord for AnonymousMessage {
    const COLLECTION: &'static str = ANONYMOUS_MESSAGES_PATH;

    fn id(&self) -> &str {
        &self.id
    }

    fn set_id(&mut self, id: String) {
        self.id = id;
    }

    fn scope_id(&self) -> &str {
        &self.chat_id
    }

    fn timestamp(&self) -> Option<i64> {
        self.timestamp
    }

    fn author_id(&self) -> &str {
        &self.anonymous_user_id
    }

    fn is_deleted(&self) -> bool {
        self.is_deleted
    }
}
