use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use shared::models::Ticket;
use uuid::Uuid;

use crate::{
    error::ApiError,
    middleware::player::{MaybePlayer, Player},
    state::AppState,
};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/matchmaking/tickets", post(enqueue))
        .route("/matchmaking/tickets/{ticket_id}", get(get_ticket))
        .route("/matchmaking/tickets/{ticket_id}/heartbeat", post(heartbeat))
        .route("/matchmaking/tickets/{ticket_id}/cancel", post(cancel))
}

async fn enqueue(
    State(state): State<AppState>,
    Player(player_id): Player,
) -> Result<Json<Ticket>, ApiError> {
    let ticket = state.ticket_service.enqueue(&player_id).await?;
    Ok(Json(ticket))
}

async fn get_ticket(
    State(state): State<AppState>,
    Path(ticket_id): Path<Uuid>,
    MaybePlayer(player_id): MaybePlayer,
) -> Result<Json<Ticket>, ApiError> {
    let ticket = state
        .ticket_service
        .get(ticket_id, player_id.as_deref())
        .await?;
    Ok(Json(ticket))
}

async fn heartbeat(
    State(state): State<AppState>,
    Path(ticket_id): Path<Uuid>,
    Player(player_id): Player,
) -> Result<Json<Ticket>, ApiError> {
    let ticket = state.ticket_service.heartbeat(ticket_id, &player_id).await?;
    Ok(Json(ticket))
}

async fn cancel(
    State(state): State<AppState>,
    Path(ticket_id): Path<Uuid>,
    Player(player_id): Player,
) -> Result<Json<Ticket>, ApiError> {
    let ticket = state.ticket_service.cancel(ticket_id, &player_id).await?;
    Ok(Json(ticket))
}
