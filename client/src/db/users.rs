use std::collections::BTreeMap;

use serde_json::{json, Value};
use tracing::warn;

use super::store::{child, server_timestamp, DataStore};
use crate::constants::{USERNAMES_PATH, USERNAME_CLAIMS_PATH, USERS_PATH};
use crate::error::StoreError;
use crate::models::{User, UsernameEntry};

fn user_path(uid: &str) -> String {
    child(USERS_PATH, uid)
}

// Profile operations
pub async fn get_user(store: &dyn DataStore, uid: &str) -> Result<Option<User>, StoreError> {
    let value = store.read(&user_path(uid)).await?;
    if value.is_null() {
        return Ok(None);
    }
    let mut user: User = serde_json::from_value(value)?;
    user.id = uid.to_string();
    Ok(Some(user))
}

/// Writes a fresh profile for a principal that is signing in.
pub async fn create_user(
    store: &dyn DataStore,
    uid: &str,
    email: &str,
    display_name: &str,
    username: Option<&str>,
) -> Result<(), StoreError> {
    let mut profile = json!({
        "id": uid,
        "email": email,
        "displayName": display_name,
        "isOnline": true,
        "createdAt": server_timestamp(),
        "lastLoginAt": server_timestamp(),
    });
    if let Some(username) = username {
        profile["username"] = Value::from(username);
    }
    store.write(&user_path(uid), profile).await
}

pub async fn mark_online(store: &dyn DataStore, uid: &str) -> Result<(), StoreError> {
    let mut updates = BTreeMap::new();
    updates.insert(child(&user_path(uid), "isOnline"), Value::Bool(true));
    updates.insert(child(&user_path(uid), "lastLoginAt"), server_timestamp());
    store.update(updates).await
}

pub async fn mark_offline(store: &dyn DataStore, uid: &str) -> Result<(), StoreError> {
    store
        .write(&child(&user_path(uid), "isOnline"), Value::Bool(false))
        .await
}

/// Decodes the `users` snapshot, skipping malformed records.
pub fn decode_users(snapshot: Value) -> Vec<User> {
    let Value::Object(records) = snapshot else {
        return Vec::new();
    };
    records
        .into_iter()
        .filter_map(|(uid, record)| match serde_json::from_value::<User>(record) {
            Ok(mut user) => {
                user.id = uid;
                Some(user)
            }
            Err(e) => {
                warn!("Skipping malformed user record {}: {}", uid, e);
                None
            }
        })
        .collect()
}

// Username operations
pub async fn is_username_taken(store: &dyn DataStore, username: &str) -> Result<bool, StoreError> {
    let lower = username.to_lowercase();
    let indexed = store
        .query_by_field(USERNAMES_PATH, "usernameLower", &lower)
        .await?;
    if !indexed.is_empty() {
        return Ok(true);
    }
    // A claim without an index entry belongs to a sign-up still in flight
    Ok(!store.read(&child(USERNAME_CLAIMS_PATH, &lower)).await?.is_null())
}

/// Reserves `username` for this process. Only one caller ever wins.
pub async fn claim_username(store: &dyn DataStore, username: &str) -> Result<bool, StoreError> {
    store
        .write_if_absent(
            &child(USERNAME_CLAIMS_PATH, &username.to_lowercase()),
            json!({ "username": username, "claimedAt": server_timestamp() }),
        )
        .await
}

pub async fn release_username_claim(store: &dyn DataStore, username: &str) -> Result<(), StoreError> {
    store
        .remove(&child(USERNAME_CLAIMS_PATH, &username.to_lowercase()))
        .await
}

/// Marks the claim on `username` as held by `uid`, so a sign-up cut short
/// after the credential exists can be finished on the next sign-in.
pub async fn bind_username_claim(store: &dyn DataStore, uid: &str, username: &str) -> Result<(), StoreError> {
    let claim = child(USERNAME_CLAIMS_PATH, &username.to_lowercase());
    store.write(&child(&claim, "uid"), Value::from(uid)).await
}

/// The username whose claim is bound to `uid`, if any.
pub async fn find_claimed_username(store: &dyn DataStore, uid: &str) -> Result<Option<String>, StoreError> {
    let claims = store.query_by_field(USERNAME_CLAIMS_PATH, "uid", uid).await?;
    Ok(claims.into_iter().find_map(|(_, claim)| {
        claim.get("username").and_then(Value::as_str).map(str::to_string)
    }))
}

/// Records `username` in the lookup index and binds the claim to `uid`.
pub async fn index_username(store: &dyn DataStore, uid: &str, username: &str) -> Result<(), StoreError> {
    let entry = UsernameEntry {
        uid: uid.to_string(),
        username: username.to_string(),
        username_lower: username.to_lowercase(),
    };
    let mut updates = BTreeMap::new();
    updates.insert(child(USERNAMES_PATH, uid), serde_json::to_value(&entry)?);
    updates.insert(
        child(&child(USERNAME_CLAIMS_PATH, &entry.username_lower), "uid"),
        Value::from(uid),
    );
    store.update(updates).await
}

pub async fn get_uid_by_username(store: &dyn DataStore, username: &str) -> Result<Option<String>, StoreError> {
    let found = store
        .query_by_field(USERNAMES_PATH, "usernameLower", &username.to_lowercase())
        .await?;
    Ok(found.into_iter().next().map(|(uid, _)| uid))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryStore;

    #[tokio::test]
    async fn test_profile_roundtrip_and_presence() {
        let store = MemoryStore::with_clock(|| 5_000);
        create_user(&store, "u1", "neo@matrix.io", "neo", Some("Neo")).await.unwrap();

        let user = get_user(&store, "u1").await.unwrap().unwrap();
        assert_eq!(user.id, "u1");
        assert_eq!(user.username.as_deref(), Some("Neo"));
        assert!(user.is_online);
        assert_eq!(user.created_at, Some(5_000));

        mark_offline(&store, "u1").await.unwrap();
        assert!(!get_user(&store, "u1").await.unwrap().unwrap().is_online);
        assert!(get_user(&store, "nobody").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_username_lookup_is_case_insensitive() {
        let store = MemoryStore::new();
        assert!(!is_username_taken(&store, "Neo").await.unwrap());
        assert!(claim_username(&store, "Neo").await.unwrap());
        assert!(is_username_taken(&store, "NEO").await.unwrap());

        index_username(&store, "u1", "Neo").await.unwrap();
        assert_eq!(get_uid_by_username(&store, "neo").await.unwrap().as_deref(), Some("u1"));
        assert!(!claim_username(&store, "nEo").await.unwrap());
    }

    #[tokio::test]
    async fn test_bound_claim_is_found_by_uid() {
        let store = MemoryStore::new();
        assert!(claim_username(&store, "Trinity").await.unwrap());
        assert_eq!(find_claimed_username(&store, "u7").await.unwrap(), None);

        bind_username_claim(&store, "u7", "Trinity").await.unwrap();
        assert_eq!(find_claimed_username(&store, "u7").await.unwrap().as_deref(), Some("Trinity"));
        assert_eq!(find_claimed_username(&store, "u8").await.unwrap(), None);
        // Bound but not indexed still counts as taken
        assert!(is_username_taken(&store, "trinity").await.unwrap());
        assert_eq!(get_uid_by_username(&store, "trinity").await.unwrap(), None);
    }

    #[test]
    fn test_decode_users_skips_malformed() {
        let snapshot = json!({
            "u1": { "email": "a@x.io", "displayName": "A" },
            "u2": { "email": 42 },
        });
        let users = decode_users(snapshot);
        assert_eq!(users.len(), 1);
        assert_eq!(users[0].id, "u1");
        assert!(decode_users(Value::Null).is_empty());
    }
}
