//! The signed-in user's chat list and the currently open conversation.

use std::cmp::Reverse;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::watch;
use tracing::{debug, info};

use super::directory::DirectorySync;
use super::messages::MessageSync;
use crate::constants::{CHATS_PATH, EMPTY_CHAT_PREVIEW, UNKNOWN_USER_NAME};
use crate::db::chats::{decode_chats, delete_chat_cascade};
use crate::db::{DataStore, Subscription};
use crate::error::{ChatError, Result};
use crate::models::{Chat, ChatPreview, Message, User};
use crate::utils::chat_id;

/// The conversation whose messages are being followed.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectedChat {
    pub chat_id: String,
    pub peer_id: String,
    /// Peer profile, when the directory knows it
    pub peer: Option<User>,
}

struct ActiveChat {
    selected: SelectedChat,
    messages: Arc<MessageSync<Message>>,
}

pub struct ChatSync {
    store: Arc<dyn DataStore>,
    directory: Arc<DirectorySync>,
    me: User,
    chats: Arc<watch::Sender<Vec<Chat>>>,
    subscription: Subscription,
    active: Mutex<Option<ActiveChat>>,
}

impl ChatSync {
    /// Follows every chat `me` takes part in, newest activity first.
    pub fn start(store: Arc<dyn DataStore>, directory: Arc<DirectorySync>, me: User) -> Result<Self> {
        let (sender, _) = watch::channel(Vec::new());
        let chats = Arc::new(sender);

        let publish = chats.clone();
        let uid = me.id.clone();
        let subscription = store.subscribe(
            CHATS_PATH,
            Arc::new(move |snapshot| {
                let mut mine: Vec<Chat> = decode_chats(snapshot)
                    .into_iter()
                    .filter(|c| c.has_participant(&uid))
                    .collect();
                // Chats without a message yet sort last
                mine.sort_by_key(|c| Reverse(c.last_message_time.unwrap_or(i64::MIN)));
                debug!(count = mine.len(), "chat list refreshed");
                publish.send_replace(mine);
            }),
        )?;

        Ok(Self {
            store,
            directory,
            me,
            chats,
            subscription,
            active: Mutex::new(None),
        })
    }

    pub fn me(&self) -> &User {
        &self.me
    }

    pub fn chats(&self) -> Vec<Chat> {
        self.chats.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<Vec<Chat>> {
        self.chats.subscribe()
    }

    /// Row shown in the chat list for `chat`.
    pub fn preview(&self, chat: &Chat) -> ChatPreview {
        let peer = chat
            .other_participant(&self.me.id)
            .and_then(|uid| self.directory.find(uid));
        ChatPreview {
            chat_id: chat.id.clone(),
            name: peer
                .as_ref()
                .map(User::label)
                .unwrap_or_else(|| UNKNOWN_USER_NAME.to_string()),
            last_message: chat
                .last_message
                .clone()
                .filter(|m| !m.is_empty())
                .unwrap_or_else(|| EMPTY_CHAT_PREVIEW.to_string()),
            last_message_time: chat.last_message_time,
            is_online: peer.is_some_and(|p| p.is_online),
        }
    }

    pub fn previews(&self) -> Vec<ChatPreview> {
        self.chats().iter().map(|c| self.preview(c)).collect()
    }

    /// Opens an existing chat from the list.
    pub fn select(&self, chat: &Chat) -> Result<SelectedChat> {
        let peer_id = chat
            .other_participant(&self.me.id)
            .filter(|_| chat.has_participant(&self.me.id))
            .ok_or_else(|| ChatError::InvalidState(format!("not a participant of {}", chat.id)))?;
        self.open(chat.id.clone(), peer_id.to_string())
    }

    /// Opens the chat with `other`. Nothing is written until the first
    /// message is sent.
    pub fn start_chat(&self, other: &User) -> Result<SelectedChat> {
        if other.id == self.me.id {
            return Err(ChatError::InvalidState("cannot chat with yourself".to_string()));
        }
        self.open(chat_id(&self.me.id, &other.id), other.id.clone())
    }

    /// Switches the followed conversation. The previous message
    /// subscription is released before the new one starts.
    fn open(&self, chat_id: String, peer_id: String) -> Result<SelectedChat> {
        let selected = SelectedChat {
            chat_id,
            peer: self.directory.find(&peer_id),
            peer_id,
        };

        let mut active = self.lock();
        if let Some(current) = active.as_mut() {
            if current.selected.chat_id == selected.chat_id {
                current.selected = selected.clone();
                return Ok(selected);
            }
        }
        if let Some(previous) = active.take() {
            previous.messages.dispose();
        }

        let messages = Arc::new(MessageSync::start(self.store.clone(), &selected.chat_id)?);
        info!("Opened chat {}", selected.chat_id);
        *active = Some(ActiveChat {
            selected: selected.clone(),
            messages,
        });
        Ok(selected)
    }

    pub fn selection(&self) -> Option<SelectedChat> {
        self.lock().as_ref().map(|a| a.selected.clone())
    }

    /// Message view of the open chat.
    pub fn messages(&self) -> Option<Arc<MessageSync<Message>>> {
        self.lock().as_ref().map(|a| a.messages.clone())
    }

    fn require_active(&self) -> Result<(SelectedChat, Arc<MessageSync<Message>>)> {
        self.lock()
            .as_ref()
            .map(|a| (a.selected.clone(), a.messages.clone()))
            .ok_or_else(|| ChatError::InvalidState("no chat selected".to_string()))
    }

    /// Sends `text` to the open chat.
    pub async fn send(&self, text: &str) -> Result<String> {
        let (selected, messages) = self.require_active()?;
        messages.send(&self.me, text, Some(&selected.peer_id)).await
    }

    /// Tombstones one of my messages in the open chat.
    pub async fn soft_delete(&self, message_id: &str) -> Result<()> {
        let (_, messages) = self.require_active()?;
        messages.soft_delete(&self.me.id, message_id).await
    }

    /// Removes a chat and its messages for both participants.
    pub async fn delete_chat(&self, chat_id: &str) -> Result<usize> {
        let open = self
            .lock()
            .as_ref()
            .filter(|a| a.selected.chat_id == chat_id)
            .map(|a| a.messages.clone());
        let removed = match open {
            Some(messages) => messages.hard_delete_chat().await?,
            None => delete_chat_cascade(self.store.as_ref(), chat_id).await?,
        };
        let mut active = self.lock();
        if active.as_ref().is_some_and(|a| a.selected.chat_id == chat_id) {
            if let Some(previous) = active.take() {
                previous.messages.dispose();
            }
        }
        Ok(removed)
    }

    pub fn close(&self) {
        if let Some(previous) = self.lock().take() {
            previous.messages.dispose();
        }
    }

    pub fn dispose(&self) {
        self.close();
        self.subscription.dispose();
    }

    fn lock(&self) -> MutexGuard<'_, Option<ActiveChat>> {
        self.active.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicI64, Ordering};

    use crate::db::{chats, users, MemoryStore};

    async fn setup() -> (Arc<MemoryStore>, ChatSync) {
        let tick = AtomicI64::new(1_000);
        let store = Arc::new(MemoryStore::with_clock(move || tick.fetch_add(1, Ordering::Relaxed)));
        users::create_user(store.as_ref(), "a", "a@example.com", "alice", Some("alice")).await.unwrap();
        users::create_user(store.as_ref(), "b", "b@example.com", "bob", Some("bob")).await.unwrap();
        let me = users::get_user(store.as_ref(), "a").await.unwrap().unwrap();
        let directory = Arc::new(DirectorySync::start(store.as_ref(), "a").unwrap());
        let sync = ChatSync::start(store.clone(), directory, me).unwrap();
        (store, sync)
    }

    #[tokio::test]
    async fn test_list_filters_to_my_chats_newest_first() {
        let (store, sync) = setup().await;
        chats::write_summary(store.as_ref(), "a_b", ["a", "b"], "old", "a").await.unwrap();
        chats::write_summary(store.as_ref(), "b_c", ["b", "c"], "not mine", "b").await.unwrap();
        chats::write_summary(store.as_ref(), "a_c", ["c", "a"], "new", "c").await.unwrap();

        let ids: Vec<String> = sync.chats().into_iter().map(|c| c.id).collect();
        assert_eq!(ids, vec!["a_c".to_string(), "a_b".to_string()]);
    }

    #[tokio::test]
    async fn test_preview_falls_back_for_unknown_peer() {
        let (store, sync) = setup().await;
        chats::write_summary(store.as_ref(), "a_z", ["a", "z"], "", "a").await.unwrap();

        let preview = sync.preview(&sync.chats()[0]);
        assert_eq!(preview.name, UNKNOWN_USER_NAME);
        assert_eq!(preview.last_message, EMPTY_CHAT_PREVIEW);
        assert!(!preview.is_online);
    }

    #[tokio::test]
    async fn test_switching_chats_keeps_one_message_listener() {
        let (store, sync) = setup().await;
        let bob = users::get_user(store.as_ref(), "b").await.unwrap().unwrap();
        let carol = User {
            id: "c".to_string(),
            ..bob.clone()
        };

        sync.start_chat(&bob).unwrap();
        sync.start_chat(&carol).unwrap();
        sync.start_chat(&bob).unwrap();
        sync.start_chat(&bob).unwrap();

        assert_eq!(store.listener_count("messages"), 1);
        assert_eq!(sync.selection().unwrap().chat_id, "a_b");

        sync.close();
        assert_eq!(store.listener_count("messages"), 0);
    }

    #[tokio::test]
    async fn test_deleting_open_chat_closes_it() {
        let (store, sync) = setup().await;
        let bob = users::get_user(store.as_ref(), "b").await.unwrap().unwrap();
        sync.start_chat(&bob).unwrap();
        sync.send("hi").await.unwrap();
        sync.send("still there?").await.unwrap();

        assert_eq!(sync.delete_chat("a_b").await.unwrap(), 2);

        assert!(sync.selection().is_none());
        assert!(sync.chats().is_empty());
        assert_eq!(store.listener_count("messages"), 0);
        assert!(store.read("messages").await.unwrap().is_null());
    }

    #[tokio::test]
    async fn test_send_requires_selection() {
        let (_store, sync) = setup().await;
        assert!(matches!(sync.send("hi").await, Err(ChatError::InvalidState(_))));
    }
}
