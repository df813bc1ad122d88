//! Live, ordered view of the messages of one chat or match.

use std::sync::Arc;

use serde_json::json;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::db::messages::{decode_messages, get_message, tombstone};
use crate::db::store::child;
use crate::db::{chats, server_timestamp, DataStore, Subscription};
use crate::error::{ChatError, Result};
use crate::models::{AnonymousIdentity, AnonymousMessage, Message, MessageRecord, User};
use crate::utils::chat_id;

/// Projection of one collection filtered to a single scope id.
///
/// The view is replaced wholesale on every store change, so it is always a
/// consistent snapshot sorted by timestamp.
pub struct MessageSync<M: MessageRecord> {
    store: Arc<dyn DataStore>,
    scope_id: String,
    messages: Arc<watch::Sender<Vec<M>>>,
    subscription: Subscription,
}

impl<M: MessageRecord> MessageSync<M> {
    pub fn start(store: Arc<dyn DataStore>, scope_id: &str) -> Result<Self> {
        let (sender, _) = watch::channel(Vec::new());
        let messages = Arc::new(sender);

        let publish = messages.clone();
        let scope = scope_id.to_string();
        let subscription = store.subscribe(
            M::COLLECTION,
            Arc::new(move |snapshot| {
                let view = decode_messages::<M>(snapshot, &scope);
                debug!(scope = %scope, count = view.len(), "message view refreshed");
                publish.send_replace(view);
            }),
        )?;

        Ok(Self {
            store,
            scope_id: scope_id.to_string(),
            messages,
            subscription,
        })
    }

    pub fn scope_id(&self) -> &str {
        &self.scope_id
    }

    pub fn messages(&self) -> Vec<M> {
        self.messages.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<Vec<M>> {
        self.messages.subscribe()
    }

    pub fn is_active(&self) -> bool {
        self.subscription.is_active()
    }

    /// Replaces the text of one of the requester's own messages with the
    /// tombstone.
    pub async fn soft_delete(&self, requester_id: &str, message_id: &str) -> Result<()> {
        let message = get_message::<M>(self.store.as_ref(), message_id)
            .await?
            .filter(|m| m.scope_id() == self.scope_id)
            .ok_or_else(|| ChatError::NotFound(format!("message {}", message_id)))?;
        if message.author_id() != requester_id {
            return Err(ChatError::NotMessageOwner);
        }
        if let Err(e) = tombstone(self.store.as_ref(), M::COLLECTION, message_id).await {
            error!("Failed to delete message {}: {}", message_id, e);
            return Err(e.into());
        }
        info!("Deleted message {} in {}", message_id, self.scope_id);
        Ok(())
    }

    /// Stops delivering updates. The last view stays readable.
    pub fn dispose(&self) {
        self.subscription.dispose();
    }
}

fn validate_text(text: &str) -> Result<&str> {
    let text = text.trim();
    if text.is_empty() {
        return Err(ChatError::EmptyMessage);
    }
    Ok(text)
}

impl MessageSync<Message> {
    /// Appends a message and refreshes the chat summary.
    ///
    /// Without `receiver_id` the peer is taken from the existing chat.
    /// Returns the new message id.
    pub async fn send(&self, author: &User, text: &str, receiver_id: Option<&str>) -> Result<String> {
        let text = validate_text(text)?;
        let store = self.store.as_ref();

        let receiver = match receiver_id {
            Some(receiver) => receiver.to_string(),
            None => chats::get_chat(store, &self.scope_id)
                .await?
                .and_then(|chat| chat.other_participant(&author.id).map(str::to_string))
                .ok_or_else(|| ChatError::NotFound(format!("chat {}", self.scope_id)))?,
        };
        if chat_id(&author.id, &receiver) != self.scope_id {
            return Err(ChatError::InvalidState(format!(
                "{} and {} are not the participants of {}",
                author.id, receiver, self.scope_id
            )));
        }

        let id = store.generate_key(Message::COLLECTION);
        store
            .write(
                &child(Message::COLLECTION, &id),
                json!({
                    "id": id,
                    "chatId": self.scope_id,
                    "senderId": author.id,
                    "senderName": author.label(),
                    "senderEmail": author.email,
                    "receiverId": receiver,
                    "message": text,
                    "isDeleted": false,
                    "timestamp": server_timestamp(),
                }),
            )
            .await?;

        if let Err(e) =
            chats::write_summary(store, &self.scope_id, [&author.id, &receiver], text, &author.id).await
        {
            warn!("Message {} stored but chat {} summary not updated: {}", id, self.scope_id, e);
            return Err(e.into());
        }
        debug!("Sent message {} to {}", id, self.scope_id);
        Ok(id)
    }

    /// Removes the chat summary and all of its messages.
    pub async fn hard_delete_chat(&self) -> Result<usize> {
        Ok(chats::delete_chat_cascade(self.store.as_ref(), &self.scope_id).await?)
    }
}

impl MessageSync<AnonymousMessage> {
    /// Appends a message to the match under the anonymous identity.
    pub async fn send(&self, identity: &AnonymousIdentity, text: &str) -> Result<String> {
        let text = validate_text(text)?;
        let store = self.store.as_ref();
        let id = store.generate_key(AnonymousMessage::COLLECTION);
        store
            .write(
                &child(AnonymousMessage::COLLECTION, &id),
                json!({
                    "id": id,
                    "chatId": self.scope_id,
                    "anonymousUserId": identity.session_id,
                    "anonymousDisplayName": identity.display_name,
                    "message": text,
                    "isDeleted": false,
                    "isAnonymous": true,
                    "timestamp": server_timestamp(),
                }),
            )
            .await?;
        debug!("Sent anonymous message {} to {}", id, self.scope_id);
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::DELETED_MESSAGE_TOMBSTONE;
    use crate::db::MemoryStore;

    fn user(id: &str) -> User {
        User {
            id: id.to_string(),
            email: format!("{}@example.com", id),
            display_name: id.to_string(),
            username: Some(id.to_string()),
            is_online: true,
            created_at: None,
            last_login_at: None,
        }
    }

    #[tokio::test]
    async fn test_empty_text_is_rejected_without_writes() {
        let store: Arc<dyn DataStore> = Arc::new(MemoryStore::new());
        let sync = MessageSync::<Message>::start(store.clone(), &chat_id("a", "b")).unwrap();

        let result = sync.send(&user("a"), "   \n", Some("b")).await;

        assert!(matches!(result, Err(ChatError::EmptyMessage)));
        assert!(store.read("messages").await.unwrap().is_null());
        assert!(store.read("chats").await.unwrap().is_null());
    }

    #[tokio::test]
    async fn test_send_updates_view_and_summary() {
        let store: Arc<dyn DataStore> = Arc::new(MemoryStore::new());
        let id = chat_id("b", "a");
        let sync = MessageSync::<Message>::start(store.clone(), &id).unwrap();

        let message_id = sync.send(&user("a"), " hi ", Some("b")).await.unwrap();

        let view = sync.messages();
        assert_eq!(view.len(), 1);
        assert_eq!(view[0].id, message_id);
        assert_eq!(view[0].message, "hi");
        assert!(view[0].timestamp.is_some());

        let chat = chats::get_chat(store.as_ref(), &id).await.unwrap().unwrap();
        assert_eq!(chat.participants, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(chat.last_message.as_deref(), Some("hi"));
        assert_eq!(chat.last_message_sender.as_deref(), Some("a"));
    }

    #[tokio::test]
    async fn test_send_without_receiver_needs_existing_chat() {
        let store: Arc<dyn DataStore> = Arc::new(MemoryStore::new());
        let sync = MessageSync::<Message>::start(store.clone(), &chat_id("a", "b")).unwrap();

        assert!(matches!(
            sync.send(&user("a"), "hello", None).await,
            Err(ChatError::NotFound(_))
        ));

        sync.send(&user("a"), "first", Some("b")).await.unwrap();
        sync.send(&user("b"), "reply", None).await.unwrap();
        assert_eq!(sync.messages().len(), 2);
    }

    #[tokio::test]
    async fn test_send_to_foreign_chat_is_rejected() {
        let store: Arc<dyn DataStore> = Arc::new(MemoryStore::new());
        let sync = MessageSync::<Message>::start(store.clone(), &chat_id("a", "b")).unwrap();

        let result = sync.send(&user("a"), "hello", Some("c")).await;
        assert!(matches!(result, Err(ChatError::InvalidState(_))));
    }

    #[tokio::test]
    async fn test_soft_delete_requires_ownership() {
        let store: Arc<dyn DataStore> = Arc::new(MemoryStore::new());
        let sync = MessageSync::<Message>::start(store.clone(), &chat_id("a", "b")).unwrap();
        let message_id = sync.send(&user("a"), "oops", Some("b")).await.unwrap();

        assert!(matches!(
            sync.soft_delete("b", &message_id).await,
            Err(ChatError::NotMessageOwner)
        ));
        assert!(matches!(
            sync.soft_delete("a", "missing").await,
            Err(ChatError::NotFound(_))
        ));

        sync.soft_delete("a", &message_id).await.unwrap();
        let view = sync.messages();
        assert!(view[0].is_deleted);
        assert_eq!(view[0].message, DELETED_MESSAGE_TOMBSTONE);
    }

    #[tokio::test]
    async fn test_hard_delete_empties_view_and_summary() {
        let store: Arc<dyn DataStore> = Arc::new(MemoryStore::new());
        let id = chat_id("a", "b");
        let sync = MessageSync::<Message>::start(store.clone(), &id).unwrap();
        sync.send(&user("a"), "one", Some("b")).await.unwrap();
        sync.send(&user("b"), "two", None).await.unwrap();

        assert_eq!(sync.hard_delete_chat().await.unwrap(), 2);

        assert!(sync.messages().is_empty());
        assert!(chats::get_chat(store.as_ref(), &id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_dispose_freezes_view() {
        let store: Arc<dyn DataStore> = Arc::new(MemoryStore::new());
        let sync = MessageSync::<AnonymousMessage>::start(store.clone(), "match-1").unwrap();
        let identity = AnonymousIdentity::generate();

        sync.send(&identity, "hey").await.unwrap();
        sync.dispose();
        sync.send(&identity, "anyone?").await.unwrap();

        assert!(!sync.is_active());
        assert_eq!(sync.messages().len(), 1);
    }
}
