pub mod matchmaker;

use axum::{
    routing::{get, post},
    Router,
};

pub use matchmaker::{end_match, process_match, waiting_users, MatchBoard, SharedBoard};

/// Routes of the local matchmaker.
pub fn matchmaker_router(board: SharedBoard) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/process_match", post(process_match))
        .route("/end_match", post(end_match))
        .route("/waiting_users", get(waiting_users))
        .with_state(board)
}

async fn health_check() -> &'static str {
    "OK"
}
