use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    models::{
        Color, ConflictReason, Match, MatchState, MatchStatus, Move, MoveConflict, MovesPage,
    },
    repositories::{
        errors::StoreError,
        store::{Store, StoreTransaction},
    },
    services::{
        errors::match_service_errors::MatchServiceError,
        move_validator::MoveValidator,
        transaction::{complete, discard},
    },
};

/// Turn-enforced move ledger for active matches.
#[derive(Clone)]
pub struct MatchService {
    store: Arc<dyn Store>,
    validator: MoveValidator,
}

impl MatchService {
    pub fn new(store: Arc<dyn Store>, validator: MoveValidator) -> Self {
        MatchService { store, validator }
    }

    /// Appends `move_text` as `ply` for `player_id`. Losing a race for the ply,
    /// or the match closing before the append commits, is reported as a
    /// conflict carrying the current state, never as a storage error.
    pub async fn submit_move(
        &self,
        match_id: Uuid,
        player_id: &str,
        ply: u32,
        move_text: &str,
    ) -> Result<Move, MatchServiceError> {
        let parsed = self.validator.parse(move_text)?;
        let now = Utc::now();

        let mut tx = self.store.begin().await?;
        let mv = match prepare_move(tx.as_mut(), match_id, player_id, ply, &parsed.text, now).await
        {
            Ok(mv) => mv,
            Err(e) => {
                discard(tx).await;
                return Err(e);
            }
        };

        let staged = match tx.insert_move(&mv).await {
            Ok(()) => tx.touch_active_match(match_id, now).await,
            Err(e) => Err(e),
        };
        let written = match staged {
            Ok(()) => tx.commit().await,
            Err(e) => {
                discard(tx).await;
                Err(e)
            }
        };

        match written {
            Ok(()) => {
                info!(
                    "Recorded ply {} ({}) by {} in match {}",
                    mv.ply, mv.move_text, player_id, match_id
                );
                Ok(mv)
            }
            Err(e @ (StoreError::UniqueViolation(_) | StoreError::CheckViolation(_))) => {
                warn!("Ply {} in match {} lost the race: {}", ply, match_id, e);
                Err(self.lost_race(match_id, player_id, ply).await)
            }
            Err(e) => Err(e.into()),
        }
    }

    pub async fn get_moves(
        &self,
        match_id: Uuid,
        after_ply: u32,
        player_id: Option<&str>,
    ) -> Result<MovesPage, MatchServiceError> {
        let mut tx = self.store.begin().await?;
        let result = moves_page(tx.as_mut(), match_id, after_ply, player_id).await;
        complete(tx, result).await
    }

    pub async fn get_match_state(
        &self,
        match_id: Uuid,
        player_id: Option<&str>,
    ) -> Result<MatchState, MatchServiceError> {
        let mut tx = self.store.begin().await?;
        let result = match_state(tx.as_mut(), match_id, player_id).await;
        complete(tx, result).await
    }

    /// Re-reads the match after a failed append and reports why it lost.
    async fn lost_race(&self, match_id: Uuid, player_id: &str, ply: u32) -> MatchServiceError {
        match self.get_match_state(match_id, Some(player_id)).await {
            Ok(state) => {
                let reason = if state.status != MatchStatus::Active {
                    ConflictReason::NotActive {
                        status: state.status,
                    }
                } else {
                    ConflictReason::PlyTaken { ply }
                };
                MatchServiceError::Conflict(Box::new(MoveConflict { reason, state }))
            }
            Err(e) => e,
        }
    }
}

/// Runs the precondition checks and builds the move to append.
async fn prepare_move(
    tx: &mut dyn StoreTransaction,
    match_id: Uuid,
    player_id: &str,
    ply: u32,
    move_text: &str,
    now: DateTime<Utc>,
) -> Result<Move, MatchServiceError> {
    let record = tx
        .get_match(match_id)
        .await?
        .ok_or(MatchServiceError::NotFound)?;

    if !record.is_active() {
        let reason = ConflictReason::NotActive {
            status: record.status,
        };
        return Err(conflict(tx, &record, player_id, reason).await?);
    }

    let color = record
        .color_of(player_id)
        .ok_or(MatchServiceError::Forbidden)?;

    let latest_ply = tx.latest_ply(record.game_id).await?;
    let expected_turn = Color::to_move_after(latest_ply);
    let expected_ply = latest_ply + 1;

    let rejection = if color != expected_turn {
        Some(ConflictReason::NotYourTurn {
            expected: expected_turn,
        })
    } else if ply != expected_ply {
        Some(ConflictReason::PlyMismatch {
            expected: expected_ply,
        })
    } else {
        None
    };
    if let Some(reason) = rejection {
        warn!(
            "Rejected ply {} from {} in match {}: {}",
            ply, player_id, match_id, reason
        );
        return Err(conflict(tx, &record, player_id, reason).await?);
    }

    Ok(Move::new(record.game_id, ply, move_text, player_id, now))
}

async fn conflict(
    tx: &mut dyn StoreTransaction,
    record: &Match,
    player_id: &str,
    reason: ConflictReason,
) -> Result<MatchServiceError, MatchServiceError> {
    let moves = tx.list_moves(record.game_id, 0).await?;
    let state = MatchState::project(record, &moves, Some(player_id));
    Ok(MatchServiceError::Conflict(Box::new(MoveConflict {
        reason,
        state,
    })))
}

async fn moves_page(
    tx: &mut dyn StoreTransaction,
    match_id: Uuid,
    after_ply: u32,
    player_id: Option<&str>,
) -> Result<MovesPage, MatchServiceError> {
    let record = tx
        .get_match(match_id)
        .await?
        .ok_or(MatchServiceError::NotFound)?;
    let latest_ply = tx.latest_ply(record.game_id).await?;
    let moves = tx.list_moves(record.game_id, after_ply).await?;
    // A move landing between the two reads must not make the head lag the tail.
    let latest_ply = moves.last().map_or(latest_ply, |mv| mv.ply.max(latest_ply));

    Ok(MovesPage::new(&record, latest_ply, moves, player_id))
}

async fn match_state(
    tx: &mut dyn StoreTransaction,
    match_id: Uuid,
    player_id: Option<&str>,
) -> Result<MatchState, MatchServiceError> {
    let record = tx
        .get_match(match_id)
        .await?
        .ok_or(MatchServiceError::NotFound)?;
    let moves = tx.list_moves(record.game_id, 0).await?;

    Ok(MatchState::project(&record, &moves, player_id))
}
