use crate::models::MoveConflict;
use crate::repositories::errors::StoreError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchServiceError {
    NotFound,
    Forbidden,
    /// The submission lost against the ledger; carries the state to resync from.
    Conflict(Box<MoveConflict>),
    InvalidMove(String),
    Unavailable(String),
}

impl std::fmt::Display for MatchServiceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MatchServiceError::NotFound => write!(f, "Match not found"),
            MatchServiceError::Forbidden => write!(f, "Player is not part of this match"),
            MatchServiceError::Conflict(conflict) => write!(f, "Conflict: {}", conflict.reason),
            MatchServiceError::InvalidMove(msg) => write!(f, "Invalid move: {}", msg),
            MatchServiceError::Unavailable(msg) => write!(f, "Service unavailable: {}", msg),
        }
    }
}

impl std::error::Error for MatchServiceError {}

impl From<StoreError> for MatchServiceError {
    fn from(err: StoreError) -> Self {
        MatchServiceError::Unavailable(err.to_string())
    }
}
