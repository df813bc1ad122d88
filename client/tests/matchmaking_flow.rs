mod common;

use std::time::Duration;

use chatsync::sync::MatchState;
use chatsync::ChatError;
use common::{matched, waiting, ScriptedMatchmaker, World};

const POLL: Duration = Duration::from_secs(5);

#[tokio::test(start_paused = true)]
async fn test_waiting_session_polls_until_matched() {
    let world = World::new();
    let api = ScriptedMatchmaker::new(vec![waiting(), waiting(), matched("m1")]);
    let client = world.client_with(api.clone());
    let session = client.matchmaking(vec!["music".to_string()]).unwrap();

    assert_eq!(session.start().await.unwrap(), MatchState::Waiting);
    assert_eq!(api.requests(), 1);

    tokio::time::sleep(POLL * 2 + Duration::from_millis(100)).await;
    assert_eq!(
        session.state(),
        MatchState::Matched {
            match_id: "m1".to_string()
        }
    );
    assert_eq!(api.requests(), 3);

    // No more requests once matched
    tokio::time::sleep(POLL * 4).await;
    assert_eq!(api.requests(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_poll_errors_keep_waiting() {
    let world = World::new();
    let api = ScriptedMatchmaker::new(vec![
        waiting(),
        Err((502, "bad gateway".to_string())),
        matched("m2"),
    ]);
    let client = world.client_with(api.clone());
    let session = client.matchmaking(vec!["chess".to_string()]).unwrap();

    session.start().await.unwrap();
    tokio::time::sleep(POLL + Duration::from_millis(100)).await;
    assert_eq!(session.state(), MatchState::Waiting);

    tokio::time::sleep(POLL).await;
    assert_eq!(session.state().match_id(), Some("m2"));
}

#[tokio::test(start_paused = true)]
async fn test_ending_a_waiting_session_stops_polling() {
    let world = World::new();
    let api = ScriptedMatchmaker::new(vec![waiting()]);
    let client = world.client_with(api.clone());
    let session = client.matchmaking(vec!["music".to_string()]).unwrap();

    session.start().await.unwrap();
    session.end().await;
    tokio::time::sleep(POLL * 6).await;

    assert_eq!(api.requests(), 1);
    assert_eq!(session.state(), MatchState::Ended { error: None });
    // Nothing was joined, so nothing is released
    assert!(api.ended().is_empty());
}

#[tokio::test]
async fn test_start_while_active_is_ignored() {
    let world = World::new();
    let api = ScriptedMatchmaker::new(vec![matched("m1"), matched("m2")]);
    let client = world.client_with(api.clone());
    let session = client.matchmaking(vec!["music".to_string()]).unwrap();

    session.start().await.unwrap();
    let again = session.start().await.unwrap();

    assert_eq!(again.match_id(), Some("m1"));
    assert_eq!(api.requests(), 1);
}

#[tokio::test]
async fn test_rejected_start_ends_with_error() {
    let world = World::new();
    let api = ScriptedMatchmaker::new(vec![Err((400, "Interests are required".to_string()))]);
    let client = world.client_with(api.clone());
    let session = client.matchmaking(vec!["music".to_string()]).unwrap();

    let result = session.start().await;

    assert!(matches!(result, Err(ChatError::Matchmaking(_))));
    match session.state() {
        MatchState::Ended { error: Some(error) } => assert!(error.contains("Interests")),
        other => panic!("unexpected state {:?}", other),
    }
}

#[tokio::test]
async fn test_matched_strangers_exchange_messages() {
    let world = World::new();
    let api_a = ScriptedMatchmaker::new(vec![matched("m1")]);
    let api_b = ScriptedMatchmaker::new(vec![matched("m1")]);
    let a = world.client_with(api_a.clone());
    let b = world.client_with(api_b.clone());
    let session_a = a.matchmaking(vec!["music".to_string()]).unwrap();
    let session_b = b.matchmaking(vec!["music".to_string()]).unwrap();

    session_a.start().await.unwrap();
    session_b.start().await.unwrap();
    let sent = session_a.send("hello stranger").await.unwrap();

    let seen = session_b.messages();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].id, sent);
    assert!(seen[0].is_anonymous);
    assert_eq!(seen[0].anonymous_display_name, session_a.identity().display_name);

    assert!(matches!(
        session_b.soft_delete(&sent).await,
        Err(ChatError::NotMessageOwner)
    ));
    session_a.soft_delete(&sent).await.unwrap();
    assert!(session_b.messages()[0].is_deleted);

    session_a.end().await;
    assert_eq!(
        api_a.ended(),
        vec![("m1".to_string(), session_a.identity().session_id.clone())]
    );
    assert_eq!(world.store.listener_count("anonymous_messages"), 1);
    assert!(matches!(
        session_a.send("still there?").await,
        Err(ChatError::InvalidState(_))
    ));
}

#[tokio::test]
async fn test_other_matches_stay_invisible() {
    let world = World::new();
    let a = world.client_with(ScriptedMatchmaker::new(vec![matched("m1")]));
    let c = world.client_with(ScriptedMatchmaker::new(vec![matched("m2")]));
    let session_a = a.matchmaking(vec!["music".to_string()]).unwrap();
    let session_c = c.matchmaking(vec!["music".to_string()]).unwrap();

    session_a.start().await.unwrap();
    session_c.start().await.unwrap();
    session_a.send("only for m1").await.unwrap();

    assert!(session_c.messages().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_restart_releases_previous_match() {
    let world = World::new();
    let api = ScriptedMatchmaker::new(vec![matched("m1"), waiting()]);
    let client = world.client_with(api.clone());
    let session = client.matchmaking(vec!["music".to_string()]).unwrap();

    session.start().await.unwrap();
    assert_eq!(session.restart().await.unwrap(), MatchState::Waiting);

    assert_eq!(api.ended().len(), 1);
    assert_eq!(api.ended()[0].0, "m1");
    assert!(session.messages().is_empty());
    assert_eq!(world.store.listener_count("anonymous_messages"), 0);
}

#[tokio::test(start_paused = true)]
async fn test_dropping_a_matched_session_releases_it() {
    let world = World::new();
    let api = ScriptedMatchmaker::new(vec![matched("m9")]);
    let client = world.client_with(api.clone());
    let session = client.matchmaking(vec!["music".to_string()]).unwrap();
    session.start().await.unwrap();

    drop(session);
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert_eq!(api.ended().len(), 1);
    assert_eq!(world.store.listener_count("anonymous_messages"), 0);
}

#[tokio::test(start_paused = true)]
async fn test_online_counter_keeps_last_known_value() {
    let world = World::new();
    let api = ScriptedMatchmaker::new(Vec::new());
    api.set_waiting(Ok(7));
    let client = world.client_with(api.clone());

    let counter = client.online_counter();
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(counter.count(), Some(7));

    api.set_waiting(Err("down".to_string()));
    tokio::time::sleep(Duration::from_secs(31)).await;
    assert_eq!(counter.count(), Some(7));
    assert_eq!(api.count_requests.load(std::sync::atomic::Ordering::SeqCst), 2);

    counter.stop();
    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(api.count_requests.load(std::sync::atomic::Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_interests_are_deduplicated_ignoring_case() {
    let world = World::new();
    let client = world.client();
    let interests = ["Music", " music ", "chess", "", "MUSIC", "Chess "]
        .iter()
        .map(|i| i.to_string())
        .collect();

    let session = client.matchmaking(interests).unwrap();

    assert_eq!(session.interests(), ["Music".to_string(), "chess".to_string()]);
}
