//! Live list of every other registered user.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::debug;

use crate::constants::USERS_PATH;
use crate::db::users::decode_users;
use crate::db::{DataStore, Subscription};
use crate::error::Result;
use crate::models::User;

pub struct DirectorySync {
    users: Arc<watch::Sender<Vec<User>>>,
    subscription: Subscription,
}

impl DirectorySync {
    /// Subscribes to all profiles except `me`, sorted by display label.
    pub fn start(store: &dyn DataStore, me: &str) -> Result<Self> {
        let (sender, _) = watch::channel(Vec::new());
        let users = Arc::new(sender);

        let publish = users.clone();
        let me = me.to_string();
        let subscription = store.subscribe(
            USERS_PATH,
            Arc::new(move |snapshot| {
                let mut others: Vec<User> = decode_users(snapshot)
                    .into_iter()
                    .filter(|u| u.id != me)
                    .collect();
                others.sort_by_cached_key(|u| (u.label().to_lowercase(), u.id.clone()));
                debug!(count = others.len(), "directory refreshed");
                publish.send_replace(others);
            }),
        )?;

        Ok(Self {
            users,
            subscription,
        })
    }

    pub fn users(&self) -> Vec<User> {
        self.users.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<Vec<User>> {
        self.users.subscribe()
    }

    pub fn find(&self, uid: &str) -> Option<User> {
        self.users.borrow().iter().find(|u| u.id == uid).cloned()
    }

    /// Users whose name or email contains `term`, ignoring case. An empty
    /// term returns everyone.
    pub fn search(&self, term: &str) -> Vec<User> {
        let term = term.trim();
        self.users
            .borrow()
            .iter()
            .filter(|u| term.is_empty() || u.matches(term))
            .cloned()
            .collect()
    }

    pub fn dispose(&self) {
        self.subscription.dispose();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{users, MemoryStore};

    #[tokio::test]
    async fn test_directory_excludes_self_and_follows_presence() {
        let store = MemoryStore::new();
        users::create_user(&store, "me", "me@example.com", "me", Some("me")).await.unwrap();
        users::create_user(&store, "u2", "zed@example.com", "zed", Some("zed")).await.unwrap();
        users::create_user(&store, "u3", "amy@example.com", "amy", Some("Amy")).await.unwrap();

        let directory = DirectorySync::start(&store, "me").unwrap();
        let names: Vec<String> = directory.users().iter().map(User::label).collect();
        assert_eq!(names, vec!["Amy".to_string(), "zed".to_string()]);

        users::mark_offline(&store, "u2").await.unwrap();
        assert!(!directory.find("u2").unwrap().is_online);
        assert!(directory.find("me").is_none());
    }

    #[tokio::test]
    async fn test_search_is_case_insensitive() {
        let store = MemoryStore::new();
        users::create_user(&store, "u2", "zed@example.com", "Zed", None).await.unwrap();
        users::create_user(&store, "u3", "amy@example.com", "Amy", None).await.unwrap();

        let directory = DirectorySync::start(&store, "me").unwrap();
        assert_eq!(directory.search("ZE").len(), 1);
        assert_eq!(directory.search("example").len(), 2);
        assert_eq!(directory.search("").len(), 2);
        assert!(directory.search("nobody").is_empty());
    }
}
