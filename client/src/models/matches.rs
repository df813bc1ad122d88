use std::path::Path;

use rand::Rng;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::constants::{ANONYMOUS_NAME_PREFIX, MATCH_FOUND_STATUS, WAITING_FOR_MATCH_STATUS};
use crate::error::Result;

/// Body of `POST /process_match`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchRequest {
    pub interests: Vec<String>,
    pub user_id: String,
}

/// Raw reply of `POST /process_match`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProcessMatchReply {
    #[serde(default)]
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub match_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Interpreted pairing outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchOutcome {
    Matched { match_id: String },
    Waiting,
    Rejected { status: String, message: String },
}

impl From<ProcessMatchReply> for MatchOutcome {
    fn from(reply: ProcessMatchReply) -> Self {
        // A match id wins regardless of the status text
        if let Some(match_id) = reply.match_id.filter(|id| !id.is_empty()) {
            return MatchOutcome::Matched { match_id };
        }
        match reply.status.as_str() {
            WAITING_FOR_MATCH_STATUS => MatchOutcome::Waiting,
            MATCH_FOUND_STATUS => MatchOutcome::Rejected {
                status: reply.status,
                message: "match reported without a match id".to_string(),
            },
            _ => MatchOutcome::Rejected {
                message: reply.message.unwrap_or_default(),
                status: reply.status,
            },
        }
    }
}

/// Body of `POST /end_match`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndMatchRequest {
    pub match_id: String,
    pub user_id: String,
}

/// Reply of `GET /waiting_users`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WaitingUsersReply {
    pub waiting_users_count: u64,
}

/// Session-local identity used while chatting with a stranger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnonymousIdentity {
    pub session_id: String,
    pub display_name: String,
}

impl AnonymousIdentity {
    pub fn generate() -> Self {
        let suffix: u16 = rand::rng().random_range(1000..10000);
        Self {
            session_id: Uuid::new_v4().to_string(),
            display_name: format!("{}{}", ANONYMOUS_NAME_PREFIX, suffix),
        }
    }

    /// Reuse the identity stored at `path`, or generate and store a new one.
    pub fn load_or_create(path: &Path) -> Result<Self> {
        if path.exists() {
            let raw = std::fs::read_to_string(path)?;
            return Ok(serde_json::from_str(&raw)?);
        }
        let identity = Self::generate();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(&identity)?)?;
        Ok(identity)
    }
}
