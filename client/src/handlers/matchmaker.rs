use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use axum::{extract::State, http::StatusCode, response::Json};
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use crate::constants::{MATCH_FOUND_STATUS, WAITING_FOR_MATCH_STATUS};
use crate::models::{EndMatchRequest, MatchRequest, ProcessMatchReply, WaitingUsersReply};

pub type SharedBoard = Arc<Mutex<MatchBoard>>;

#[derive(Debug)]
struct WaitingUser {
    user_id: String,
    interests: Vec<String>,
}

/// In-memory pairing queue of the local matchmaker.
///
/// Waiting users keep their place when they poll again. A newcomer is
/// paired with the oldest waiting user sharing an interest, or else with
/// the oldest waiting user.
#[derive(Debug, Default)]
pub struct MatchBoard {
    waiting: VecDeque<WaitingUser>,
    assigned: HashMap<String, String>,
    matches: HashMap<String, [String; 2]>,
}

impl MatchBoard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the match of `user_id`, or `None` while they wait.
    pub fn process(&mut self, user_id: &str, interests: &[String]) -> Option<String> {
        if let Some(match_id) = self.assigned.get(user_id) {
            return Some(match_id.clone());
        }

        let interests: Vec<String> = interests.iter().map(|i| i.trim().to_lowercase()).collect();
        let partner = self
            .waiting
            .iter()
            .position(|w| w.user_id != user_id && w.interests.iter().any(|i| interests.contains(i)))
            .or_else(|| self.waiting.iter().position(|w| w.user_id != user_id));

        let Some(index) = partner else {
            match self.waiting.iter_mut().find(|w| w.user_id == user_id) {
                Some(existing) => existing.interests = interests,
                None => self.waiting.push_back(WaitingUser {
                    user_id: user_id.to_string(),
                    interests,
                }),
            }
            return None;
        };

        let partner = self.waiting.remove(index)?;
        self.waiting.retain(|w| w.user_id != user_id);
        let match_id = Uuid::new_v4().to_string();
        self.assigned.insert(user_id.to_string(), match_id.clone());
        self.assigned.insert(partner.user_id.clone(), match_id.clone());
        self.matches
            .insert(match_id.clone(), [user_id.to_string(), partner.user_id]);
        Some(match_id)
    }

    /// Dissolves `match_id` for both participants. Also drops `user_id`
    /// from the queue. Returns whether the match existed.
    pub fn end(&mut self, match_id: &str, user_id: &str) -> bool {
        self.waiting.retain(|w| w.user_id != user_id);
        let Some(participants) = self.matches.remove(match_id) else {
            return false;
        };
        for participant in participants {
            self.assigned.remove(&participant);
        }
        true
    }

    pub fn waiting_count(&self) -> usize {
        self.waiting.len()
    }
}

#[derive(Debug, Serialize)]
pub struct EndMatchReply {
    pub status: String,
    pub ended: bool,
}

pub async fn process_match(
    State(board): State<SharedBoard>,
    Json(req): Json<MatchRequest>,
) -> (StatusCode, Json<ProcessMatchReply>) {
    let interests: Vec<String> = req
        .interests
        .into_iter()
        .filter(|i| !i.trim().is_empty())
        .collect();
    if interests.is_empty() || req.user_id.trim().is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(ProcessMatchReply {
                status: "error".to_string(),
                match_id: None,
                message: Some("Interests and user_id are required".to_string()),
            }),
        );
    }

    let mut board = board.lock().await;
    match board.process(&req.user_id, &interests) {
        Some(match_id) => {
            info!("🤝 {} matched in {}", req.user_id, match_id);
            (
                StatusCode::OK,
                Json(ProcessMatchReply {
                    status: MATCH_FOUND_STATUS.to_string(),
                    match_id: Some(match_id),
                    message: None,
                }),
            )
        }
        None => {
            debug!("{} waiting ({} in queue)", req.user_id, board.waiting_count());
            (
                StatusCode::OK,
                Json(ProcessMatchReply {
                    status: WAITING_FOR_MATCH_STATUS.to_string(),
                    match_id: None,
                    message: None,
                }),
            )
        }
    }
}

pub async fn end_match(
    State(board): State<SharedBoard>,
    Json(req): Json<EndMatchRequest>,
) -> Json<EndMatchReply> {
    let ended = board.lock().await.end(&req.match_id, &req.user_id);
    if ended {
        info!("👋 {} ended {}", req.user_id, req.match_id);
    }
    Json(EndMatchReply {
        status: "success".to_string(),
        ended,
    })
}

pub async fn waiting_users(State(board): State<SharedBoard>) -> Json<WaitingUsersReply> {
    Json(WaitingUsersReply {
        waiting_users_count: board.lock().await.waiting_count() as u64,
    })
}
