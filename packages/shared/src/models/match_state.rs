use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{
    chess_move::Move,
    match_record::{Color, Match, MatchStatus},
};

/// The externally visible view of a match, derived from the match record and
/// its ledger. Returned by state polls and embedded in every move conflict.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchState {
    pub match_id: Uuid,
    pub game_id: Uuid,
    pub status: MatchStatus,
    pub white_player_id: String,
    pub black_player_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub your_color: Option<Color>,
    pub latest_ply: u32,
    pub next_turn: Color,
    pub moves: Vec<Move>,
}

impl MatchState {
    /// Projects a match and its ply-ordered moves for `player_id`.
    pub fn project(record: &Match, moves: &[Move], player_id: Option<&str>) -> Self {
        let latest_ply = moves.last().map(|mv| mv.ply).unwrap_or(0);

        MatchState {
            match_id: record.id,
            game_id: record.game_id,
            status: record.status,
            white_player_id: record.white_player_id.clone(),
            black_player_id: record.black_player_id.clone(),
            your_color: player_id.and_then(|id| record.color_of(id)),
            latest_ply,
            next_turn: Color::to_move_after(latest_ply),
            moves: moves.to_vec(),
        }
    }
}

/// Tail of the ledger for incremental polling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovesPage {
    pub match_id: Uuid,
    pub status: MatchStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub your_color: Option<Color>,
    pub latest_ply: u32,
    pub next_turn: Color,
    pub moves: Vec<Move>,
}

impl MovesPage {
    pub fn new(record: &Match, latest_ply: u32, moves: Vec<Move>, player_id: Option<&str>) -> Self {
        MovesPage {
            match_id: record.id,
            status: record.status,
            your_color: player_id.and_then(|id| record.color_of(id)),
            latest_ply,
            next_turn: Color::to_move_after(latest_ply),
            moves,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ConflictReason {
    NotActive { status: MatchStatus },
    NotYourTurn { expected: Color },
    PlyMismatch { expected: u32 },
    PlyTaken { ply: u32 },
}

impl std::fmt::Display for ConflictReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConflictReason::NotActive { status } => write!(f, "Match is not active ({})", status),
            ConflictReason::NotYourTurn { expected } => write!(f, "Not your turn: {} to move", expected),
            ConflictReason::PlyMismatch { expected } => write!(f, "Expected ply {}", expected),
            ConflictReason::PlyTaken { ply } => write!(f, "Ply {} was already recorded", ply),
        }
    }
}

/// A rejected move together with the authoritative state to reconcile against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoveConflict {
    pub reason: ConflictReason,
    pub state: MatchState,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::game::Game;
    use chrono::Utc;
    use proptest::prelude::*;

    fn record() -> Match {
        let now = Utc::now();
        Match::new(&Game::new(now), "white", "black", now)
    }

    fn ledger(record: &Match, plies: u32) -> Vec<Move> {
        (1..=plies)
            .map(|ply| {
                let player = if ply % 2 == 1 { "white" } else { "black" };
                Move::new(record.game_id, ply, "e2e4", player, Utc::now())
            })
            .collect()
    }

    #[test]
    fn test_empty_ledger_projection() {
        let record = record();
        let state = MatchState::project(&record, &[], Some("black"));

        assert_eq!(state.latest_ply, 0);
        assert_eq!(state.next_turn, Color::White);
        assert_eq!(state.your_color, Some(Color::Black));
        assert!(state.moves.is_empty());
        assert_eq!(state.match_id, record.id);
        assert_eq!(state.game_id, record.game_id);
    }

    #[test]
    fn test_projection_for_spectator_has_no_color() {
        let record = record();
        let moves = ledger(&record, 3);
        let state = MatchState::project(&record, &moves, Some("someone-else"));

        assert_eq!(state.your_color, None);
        assert_eq!(state.latest_ply, 3);
        assert_eq!(state.next_turn, Color::Black);

        let anonymous = MatchState::project(&record, &moves, None);
        assert_eq!(anonymous.your_color, None);
        assert!(!serde_json::to_string(&anonymous).unwrap().contains("your_color"));
    }

    #[test]
    fn test_moves_page_uses_ledger_head_not_tail() {
        let record = record();
        let page = MovesPage::new(&record, 4, Vec::new(), Some("white"));

        assert_eq!(page.latest_ply, 4);
        assert_eq!(page.next_turn, Color::White);
        assert_eq!(page.your_color, Some(Color::White));
    }

    #[test]
    fn test_conflict_reason_serialization() {
        let reason = ConflictReason::PlyMismatch { expected: 2 };
        let serialized = serde_json::to_string(&reason).unwrap();

        assert_eq!(serialized, r#"{"kind":"ply_mismatch","expected":2}"#);
    }

    proptest! {
        #[test]
        fn next_turn_follows_ply_parity(plies in 0u32..200) {
            let record = record();
            let state = MatchState::project(&record, &ledger(&record, plies), None);

            prop_assert_eq!(state.latest_ply, plies);
            let expected = if plies % 2 == 0 { Color::White } else { Color::Black };
            prop_assert_eq!(state.next_turn, expected);
        }

        #[test]
        fn next_turn_alternates(plies in 0u32..10_000) {
            prop_assert_ne!(Color::to_move_after(plies), Color::to_move_after(plies + 1));
        }
    }
}
