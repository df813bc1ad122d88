use serde::{Deserialize, Serialize};

/// Summary of a one-to-one conversation, stored under `chats/{chatId}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chat {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub participants: Vec<String>,
    #[serde(default)]
    pub last_message: Option<String>,
    /// Server time in milliseconds; `None` until the first message
    #[serde(default)]
    pub last_message_time: Option<i64>,
    #[serde(default)]
    pub last_message_sender: Option<String>,
}

impl Chat {
    pub fn has_participant(&self, uid: &str) -> bool {
        self.participants.iter().any(|p| p == uid)
    }

    /// The participant that is not `uid`.
    pub fn other_participant(&self, uid: &str) -> Option<&str> {
        self.participants
            .iter()
            .map(String::as_str)
            .find(|p| *p != uid)
    }
}

/// What a chat list row shows.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatPreview {
    pub chat_id: String,
    pub name: String,
    pub last_message: String,
    pub last_message_time: Option<i64>,
    pub is_online: bool,
}
