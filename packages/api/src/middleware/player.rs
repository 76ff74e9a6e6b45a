use axum::{extract::FromRequestParts, http::request::Parts};

use crate::error::ApiError;

pub const PLAYER_HEADER: &str = "x-player-id";

/// Caller identity, as asserted by whatever authenticated the request upstream.
#[derive(Debug, Clone)]
pub struct Player(pub String);

/// Like `Player`, for endpoints where the caller may be anonymous.
#[derive(Debug, Clone)]
pub struct MaybePlayer(pub Option<String>);

fn player_id(parts: &Parts) -> Option<String> {
    parts
        .headers
        .get(PLAYER_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

impl<S> FromRequestParts<S> for Player
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        player_id(parts).map(Player).ok_or(ApiError::MissingPlayer)
    }
}

impl<S> FromRequestParts<S> for MaybePlayer
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(MaybePlayer(player_id(parts)))
    }
}
