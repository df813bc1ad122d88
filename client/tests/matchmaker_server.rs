use std::sync::Arc;

use chatsync::handlers::{matchmaker_router, MatchBoard};
use chatsync::models::{MatchOutcome, MatchRequest};
use chatsync::services::{MatchmakingApi, MatchmakingClient};
use chatsync::MatchmakingError;
use tokio::sync::Mutex;

async fn spawn_stub() -> MatchmakingClient {
    let board = Arc::new(Mutex::new(MatchBoard::new()));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, matchmaker_router(board)).await.unwrap();
    });
    MatchmakingClient::new(format!("http://{}", address))
}

fn request(user_id: &str, interests: &[&str]) -> MatchRequest {
    MatchRequest {
        interests: interests.iter().map(|s| s.to_string()).collect(),
        user_id: user_id.to_string(),
    }
}

#[tokio::test]
async fn test_empty_interests_are_rejected_with_message() {
    let client = spawn_stub().await;

    let result = client.process_match(&request("a", &[])).await;

    match result {
        Err(MatchmakingError::Service { status, message }) => {
            assert_eq!(status, 400);
            assert!(message.contains("Interests"));
        }
        other => panic!("unexpected reply {:?}", other),
    }
}

#[tokio::test]
async fn test_two_clients_are_paired() {
    let client = spawn_stub().await;

    assert_eq!(
        client.process_match(&request("a", &["music"])).await.unwrap(),
        MatchOutcome::Waiting
    );
    assert_eq!(client.waiting_users().await.unwrap(), 1);

    let MatchOutcome::Matched { match_id } =
        client.process_match(&request("b", &["music"])).await.unwrap()
    else {
        panic!("second client should be matched");
    };
    assert_eq!(
        client.process_match(&request("a", &["music"])).await.unwrap(),
        MatchOutcome::Matched {
            match_id: match_id.clone()
        }
    );
    assert_eq!(client.waiting_users().await.unwrap(), 0);

    client.end_match(&match_id, "a").await.unwrap();
    // The partner's own release is still accepted
    client.end_match(&match_id, "b").await.unwrap();
    assert_eq!(
        client.process_match(&request("b", &["music"])).await.unwrap(),
        MatchOutcome::Waiting
    );
}
