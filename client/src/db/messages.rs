use std::collections::{BTreeMap, HashSet};

use serde_json::Value;
use tracing::warn;

use super::store::{child, DataStore};
use crate::constants::{CHATS_PATH, DELETED_MESSAGE_TOMBSTONE, MESSAGES_PATH};
use crate::error::StoreError;
use crate::models::MessageRecord;

/// Projects a whole-collection snapshot onto one chat or match.
///
/// Records are visited in key order, which is creation order for pushed
/// keys, and then stable-sorted by timestamp. Records still missing a
/// timestamp go last.
pub fn decode_messages<M: MessageRecord>(snapshot: Value, scope_id: &str) -> Vec<M> {
    let Value::Object(records) = snapshot else {
        return Vec::new();
    };
    let mut messages: Vec<M> = records
        .into_iter()
        .filter(|(_, record)| record.get("chatId").and_then(Value::as_str) == Some(scope_id))
        .filter_map(|(id, record)| match serde_json::from_value::<M>(record) {
            Ok(mut message) => {
                message.set_id(id);
                Some(message)
            }
            Err(e) => {
                warn!("Skipping malformed record {}/{}: {}", M::COLLECTION, id, e);
                None
            }
        })
        .collect();
    messages.sort_by_key(|m| m.timestamp().unwrap_or(i64::MAX));
    messages
}

pub async fn get_message<M: MessageRecord>(store: &dyn DataStore, id: &str) -> Result<Option<M>, StoreError> {
    let value = store.read(&child(M::COLLECTION, id)).await?;
    if value.is_null() {
        return Ok(None);
    }
    let mut message: M = serde_json::from_value(value)?;
    message.set_id(id.to_string());
    Ok(Some(message))
}

/// Replaces the text with the tombstone and flags the record deleted.
pub async fn tombstone(store: &dyn DataStore, collection: &str, id: &str) -> Result<(), StoreError> {
    let path = child(collection, id);
    let mut updates = BTreeMap::new();
    updates.insert(child(&path, "isDeleted"), Value::Bool(true));
    updates.insert(child(&path, "message"), Value::from(DELETED_MESSAGE_TOMBSTONE));
    store.update(updates).await
}

/// Ids of messages whose chat no longer exists.
pub async fn find_orphans(store: &dyn DataStore) -> Result<Vec<String>, StoreError> {
    let chats: HashSet<String> = match store.read(CHATS_PATH).await? {
        Value::Object(chats) => chats.into_iter().map(|(id, _)| id).collect(),
        _ => HashSet::new(),
    };
    let Value::Object(messages) = store.read(MESSAGES_PATH).await? else {
        return Ok(Vec::new());
    };
    Ok(messages
        .into_iter()
        .filter(|(_, record)| {
            record
                .get("chatId")
                .and_then(Value::as_str)
                .is_none_or(|chat_id| !chats.contains(chat_id))
        })
        .map(|(id, _)| id)
        .collect())
}

/// Removes the given messages in one batched update.
pub async fn remove_messages(store: &dyn DataStore, ids: &[String]) -> Result<(), StoreError> {
    let updates: BTreeMap<String, Value> = ids
        .iter()
        .map(|id| (child(MESSAGES_PATH, id), Value::Null))
        .collect();
    store.update(updates).await
}
