use thiserror::Error;
use trivia_core::policy::InputError;

use crate::phase::Phase;
use crate::transport::TransportError;

/// A user action that was refused before any command was sent.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SubmitError {
    #[error(transparent)]
    Input(#[from] InputError),
    #[error("cannot {action} while {phase}")]
    WrongPhase { action: &'static str, phase: Phase },
    #[error("there is no open question")]
    NoQuestion,
    #[error("not in a game")]
    NotInGame,
    #[error("invalid game id: {0}")]
    InvalidGameId(String),
}

/// Failure reading or writing the persisted session.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("session store I/O: {0}")]
    Io(#[from] std::io::Error),
    #[error("session snapshot is not valid JSON: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Failure talking to the game service.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("game service request failed: {0}")]
    Http(String),
    #[error("credentials rejected by the game service")]
    Unauthorized,
    #[error("game service refused the request: {0}")]
    Rejected(String),
    #[error("unexpected game service response: {0}")]
    Decode(String),
}

#[cfg(feature = "native")]
impl From<reqwest::Error> for ApiError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            ApiError::Decode(e.to_string())
        } else {
            ApiError::Http(e.to_string())
        }
    }
}

/// Anything the session controller can fail with.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Submit(#[from] SubmitError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("session expired, please sign in again")]
    SessionExpired,
    #[error("could not reach the game after {attempts} attempts")]
    Unreachable { attempts: u32 },
}
