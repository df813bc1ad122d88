use async_trait::async_trait;
use reqwest::{Client, Response};

use crate::constants::MATCHMAKER_REQUEST_TIMEOUT;
use crate::error::MatchmakingError;
use crate::models::{EndMatchRequest, MatchOutcome, MatchRequest, ProcessMatchReply, WaitingUsersReply};

/// Request/response contract of the external matchmaking service.
#[async_trait]
pub trait MatchmakingApi: Send + Sync {
    async fn process_match(&self, request: &MatchRequest) -> Result<MatchOutcome, MatchmakingError>;

    async fn end_match(&self, match_id: &str, session_id: &str) -> Result<(), MatchmakingError>;

    async fn waiting_users(&self) -> Result<u64, MatchmakingError>;
}

#[derive(Debug, Clone)]
pub struct MatchmakingClient {
    client: Client,
    base_url: String,
}

impl MatchmakingClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        let client = Client::builder()
            .timeout(MATCHMAKER_REQUEST_TIMEOUT)
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}/{}", self.base_url, endpoint)
    }
}

/// Turns a non-success status into a service error, keeping the body's
/// `message` when there is one.
async fn check(response: Response) -> Result<Response, MatchmakingError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ProcessMatchReply>(&body)
        .ok()
        .and_then(|reply| reply.message)
        .unwrap_or(body);
    Err(MatchmakingError::Service {
        status: status.as_u16(),
        message,
    })
}

#[async_trait]
impl MatchmakingApi for MatchmakingClient {
    async fn process_match(&self, request: &MatchRequest) -> Result<MatchOutcome, MatchmakingError> {
        let response = self
            .client
            .post(self.url("process_match"))
            .json(request)
            .send()
            .await?;
        let reply: ProcessMatchReply = check(response).await?.json().await?;
        tracing::debug!("process_match replied with status '{}'", reply.status);
        Ok(reply.into())
    }

    async fn end_match(&self, match_id: &str, session_id: &str) -> Result<(), MatchmakingError> {
        let response = self
            .client
            .post(self.url("end_match"))
            .json(&EndMatchRequest {
                match_id: match_id.to_string(),
                user_id: session_id.to_string(),
            })
            .send()
            .await?;
        check(response).await?;
        Ok(())
    }

    async fn waiting_users(&self) -> Result<u64, MatchmakingError> {
        let response = self.client.get(self.url("waiting_users")).send().await?;
        let reply: WaitingUsersReply = check(response).await?.json().await?;
        Ok(reply.waiting_users_count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_trims_trailing_slash() {
        let client = MatchmakingClient::new("http://127.0.0.1:5000/");
        assert_eq!(client.url("waiting_users"), "http://127.0.0.1:5000/waiting_users");
    }
}
