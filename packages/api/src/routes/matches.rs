use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use shared::models::{MatchState, Move, MoveRequest, MovesPage};
use uuid::Uuid;

use crate::{
    error::ApiError,
    middleware::player::{MaybePlayer, Player},
    state::AppState,
};

#[derive(Debug, Deserialize)]
pub struct MovesQuery {
    #[serde(default)]
    pub after_ply: u32,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/matches/{match_id}", get(get_match_state))
        .route("/matches/{match_id}/moves", get(get_moves).post(submit_move))
}

async fn get_match_state(
    State(state): State<AppState>,
    Path(match_id): Path<Uuid>,
    MaybePlayer(player_id): MaybePlayer,
) -> Result<Json<MatchState>, ApiError> {
    let match_state = state
        .match_service
        .get_match_state(match_id, player_id.as_deref())
        .await?;
    Ok(Json(match_state))
}

async fn submit_move(
    State(state): State<AppState>,
    Path(match_id): Path<Uuid>,
    Player(player_id): Player,
    Json(payload): Json<MoveRequest>,
) -> Result<(StatusCode, Json<Move>), ApiError> {
    let mv = state
        .match_service
        .submit_move(match_id, &player_id, payload.ply, &payload.move_text)
        .await?;
    Ok((StatusCode::CREATED, Json(mv)))
}

async fn get_moves(
    State(state): State<AppState>,
    Path(match_id): Path<Uuid>,
    Query(query): Query<MovesQuery>,
    MaybePlayer(player_id): MaybePlayer,
) -> Result<Json<MovesPage>, ApiError> {
    let page = state
        .match_service
        .get_moves(match_id, query.after_ply, player_id.as_deref())
        .await?;
    Ok(Json(page))
}
