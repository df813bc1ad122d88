use std::collections::BTreeMap;

use serde_json::{json, Value};
use tracing::{info, warn};

use super::store::{child, server_timestamp, DataStore};
use crate::constants::{CHATS_PATH, MESSAGES_PATH};
use crate::error::StoreError;
use crate::models::Chat;

pub async fn get_chat(store: &dyn DataStore, chat_id: &str) -> Result<Option<Chat>, StoreError> {
    let value = store.read(&child(CHATS_PATH, chat_id)).await?;
    if value.is_null() {
        return Ok(None);
    }
    let mut chat: Chat = serde_json::from_value(value)?;
    chat.id = chat_id.to_string();
    Ok(Some(chat))
}

/// Creates or overwrites the summary of `chat_id`. Last writer wins.
pub async fn write_summary(
    store: &dyn DataStore,
    chat_id: &str,
    participants: [&str; 2],
    last_message: &str,
    sender_id: &str,
) -> Result<(), StoreError> {
    let mut participants = participants;
    participants.sort();
    store
        .write(
            &child(CHATS_PATH, chat_id),
            json!({
                "id": chat_id,
                "participants": participants,
                "lastMessage": last_message,
                "lastMessageTime": server_timestamp(),
                "lastMessageSender": sender_id,
            }),
        )
        .await
}

/// Removes the chat, then every message of it in one batched update.
///
/// Only the chat removal is reported. Message cleanup is best effort:
/// leftovers are unreachable once the chat is gone. Returns how many
/// messages were removed.
pub async fn delete_chat_cascade(store: &dyn DataStore, chat_id: &str) -> Result<usize, StoreError> {
    store.remove(&child(CHATS_PATH, chat_id)).await?;

    let messages = match store.query_by_field(MESSAGES_PATH, "chatId", chat_id).await {
        Ok(messages) => messages,
        Err(e) => {
            warn!("Chat {} removed but its messages could not be listed: {}", chat_id, e);
            return Ok(0);
        }
    };
    let updates: BTreeMap<String, Value> = messages
        .into_iter()
        .map(|(id, _)| (child(MESSAGES_PATH, &id), Value::Null))
        .collect();
    let count = updates.len();
    if let Err(e) = store.update(updates).await {
        warn!("Chat {} removed but {} messages were left behind: {}", chat_id, count, e);
        return Ok(0);
    }
    info!("Deleted chat {} with {} messages", chat_id, count);
    Ok(count)
}

/// Decodes the `chats` snapshot, skipping malformed records.
pub fn decode_chats(snapshot: Value) -> Vec<Chat> {
    let Value::Object(records) = snapshot else {
        return Vec::new();
    };
    records
        .into_iter()
        .filter_map(|(id, record)| match serde_json::from_value::<Chat>(record) {
            Ok(mut chat) if chat.participants.len() == 2 => {
                chat.id = id;
                Some(chat)
            }
            Ok(chat) => {
                warn!("Skipping chat {} with {} participants", id, chat.participants.len());
                None
            }
            Err(e) => {
                warn!("Skipping malformed chat record {}: {}", id, e);
                None
            }
        })
        .collect()
}
