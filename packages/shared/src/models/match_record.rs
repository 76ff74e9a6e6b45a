use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::game::Game;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Color {
    White,
    Black,
}

impl Color {
    /// Side to move once `latest_ply` half-moves have been played.
    pub fn to_move_after(latest_ply: u32) -> Color {
        if latest_ply % 2 == 0 {
            Color::White
        } else {
            Color::Black
        }
    }
}

impl std::fmt::Display for Color {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Color::White => write!(f, "white"),
            Color::Black => write!(f, "black"),
        }
    }
}

/// Only `Active` is produced here; the terminal statuses are written by
/// whatever adjudicates finished games.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchStatus {
    Active,
    Completed,
    Aborted,
}

impl std::fmt::Display for MatchStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MatchStatus::Active => write!(f, "active"),
            MatchStatus::Completed => write!(f, "completed"),
            MatchStatus::Aborted => write!(f, "aborted"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Match {
    pub id: Uuid,
    pub game_id: Uuid,
    pub white_player_id: String,
    pub black_player_id: String,
    pub status: MatchStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Match {
    pub fn new(game: &Game, white_player_id: &str, black_player_id: &str, now: DateTime<Utc>) -> Self {
        Match {
            id: Uuid::new_v4(),
            game_id: game.id,
            white_player_id: white_player_id.to_string(),
            black_player_id: black_player_id.to_string(),
            status: MatchStatus::Active,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == MatchStatus::Active
    }

    pub fn color_of(&self, player_id: &str) -> Option<Color> {
        if self.white_player_id == player_id {
            Some(Color::White)
        } else if self.black_player_id == player_id {
            Some(Color::Black)
        } else {
            None
        }
    }

    pub fn has_distinct_players(&self) -> bool {
        self.white_player_id != self.black_player_id
    }
}
