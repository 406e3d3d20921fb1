//! Game service HTTP API: join, start, list games and fetch scores.

use std::future::Future;
use std::sync::Arc;

use reqwest::{Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use tracing::{debug, error};
use trivia_core::protocol::{GameId, TeamId};

use crate::error::ApiError;

/// A game listed by the service.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct GameSummary {
    #[serde(deserialize_with = "string_or_number")]
    pub id: GameId,
    #[serde(default, alias = "createdAt")]
    pub created_at: Option<String>,
}

/// One team's running total.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TeamScore {
    #[serde(alias = "teamId")]
    pub team_id: TeamId,
    pub score: i32,
}

/// The game service as the client uses it.
pub trait GameService: Send + Sync {
    /// Join `game_id`, or a new game when `None`. Returns the joined game.
    fn join(&self, game_id: Option<&str>) -> impl Future<Output = Result<GameId, ApiError>> + Send;
    fn start(&self, game_id: &str) -> impl Future<Output = Result<(), ApiError>> + Send;
    fn fetch_active_games(&self) -> impl Future<Output = Result<Vec<GameSummary>, ApiError>> + Send;
    fn fetch_scores(&self, game_id: &str) -> impl Future<Output = Result<Vec<TeamScore>, ApiError>> + Send;
}

#[derive(Serialize)]
struct JoinRequest<'a> {
    #[serde(rename = "gameId", skip_serializing_if = "Option::is_none")]
    game_id: Option<&'a str>,
    #[serde(rename = "teamIds")]
    team_ids: [TeamId; 1],
}

#[derive(Deserialize)]
struct JoinResponse {
    #[serde(alias = "gameId", deserialize_with = "string_or_number")]
    game_id: GameId,
}

/// How a response status should be read.
#[derive(Debug, PartialEq, Eq)]
enum Outcome {
    Success,
    /// The team is already in the game; as good as a fresh join.
    AlreadyJoined,
}

/// HTTP implementation with bearer-token auth.
#[derive(Clone)]
pub struct HttpGameService {
    client: Client,
    base_url: Arc<str>,
    token: Option<Arc<str>>,
    team_id: TeamId,
}

impl HttpGameService {
    pub fn new(base_url: &str, token: Option<&str>, team_id: TeamId) -> Result<Self, ApiError> {
        let client = Client::builder().build()?;
        Ok(Self {
            client,
            base_url: Arc::from(base_url.trim_end_matches('/')),
            token: token.filter(|t| !t.is_empty()).map(Arc::from),
            team_id,
        })
    }

    fn request(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        let url = format!("{}/api/game/{}", self.base_url, path);
        let builder = self.client.request(method, url);
        match &self.token {
            Some(token) => builder.bearer_auth(token.as_ref()),
            None => builder,
        }
    }

    async fn send(&self, builder: reqwest::RequestBuilder) -> Result<(Outcome, String), ApiError> {
        let response = builder.send().await?;
        let status = response.status();
        let body = response.text().await?;
        let outcome = classify(status, &body)?;
        Ok((outcome, body))
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        let (_, body) = self.send(self.request(Method::GET, path)).await?;
        serde_json::from_str(&body).map_err(|e| ApiError::Decode(e.to_string()))
    }
}

impl GameService for HttpGameService {
    async fn join(&self, game_id: Option<&str>) -> Result<GameId, ApiError> {
        let body = JoinRequest {
            game_id,
            team_ids: [self.team_id],
        };
        let (outcome, text) = self
            .send(self.request(Method::POST, "join").json(&body))
            .await?;
        match (outcome, game_id) {
            (Outcome::AlreadyJoined, Some(id)) => {
                debug!(game_id = id, "already joined");
                Ok(id.to_string())
            }
            _ => serde_json::from_str::<JoinResponse>(&text)
                .map(|r| r.game_id)
                .map_err(|e| ApiError::Decode(e.to_string())),
        }
    }

    async fn start(&self, game_id: &str) -> Result<(), ApiError> {
        self.send(self.request(Method::POST, &format!("{game_id}/start")))
            .await
            .map(|_| ())
    }

    async fn fetch_active_games(&self) -> Result<Vec<GameSummary>, ApiError> {
        self.get_json("active").await
    }

    async fn fetch_scores(&self, game_id: &str) -> Result<Vec<TeamScore>, ApiError> {
        self.get_json(&format!("{game_id}/scores")).await
    }
}

/// Map a status and body to an outcome or an error.
fn classify(status: StatusCode, body: &str) -> Result<Outcome, ApiError> {
    if status.is_success() {
        return Ok(Outcome::Success);
    }
    if status == StatusCode::UNAUTHORIZED {
        error!("game service rejected our credentials");
        return Err(ApiError::Unauthorized);
    }
    let message = error_message(body).unwrap_or_else(|| status.to_string());
    if message.to_lowercase().contains("already joined") {
        return Ok(Outcome::AlreadyJoined);
    }
    Err(ApiError::Rejected(message))
}

/// `{"error": "..."}` bodies carry the reason; anything else is used as is.
fn error_message(body: &str) -> Option<String> {
    #[derive(Deserialize)]
    struct ErrorBody {
        error: String,
    }
    let body = body.trim();
    if body.is_empty() {
        return None;
    }
    Some(
        serde_json::from_str::<ErrorBody>(body)
            .map(|b| b.error)
            .unwrap_or_else(|_| body.to_string()),
    )
}

fn string_or_number<'de, D: Deserializer<'de>>(de: D) -> Result<String, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Id {
        Text(String),
        Number(u64),
    }
    Ok(match Id::deserialize(de)? {
        Id::Text(s) => s,
        Id::Number(n) => n.to_string(),
    })
}
