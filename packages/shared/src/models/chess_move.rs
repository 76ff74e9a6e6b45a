use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One recorded half-move. Immutable once appended to the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Move {
    pub game_id: Uuid,
    pub ply: u32,
    pub move_text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub player_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Move {
    pub fn new(game_id: Uuid, ply: u32, move_text: &str, player_id: &str, now: DateTime<Utc>) -> Self {
        Move {
            game_id,
            ply,
            move_text: move_text.to_string(),
            player_id: Some(player_id.to_string()),
            created_at: now,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MoveRequest {
    pub ply: u32,
    #[serde(rename = "move")]
    pub move_text: String, // e.g., "e2e4" or "e7e8q"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_move_request_uses_move_field() {
        let request: MoveRequest = serde_json::from_str(r#"{"ply": 3, "move": "g1f3"}"#).unwrap();

        assert_eq!(request.ply, 3);
        assert_eq!(request.move_text, "g1f3");
    }

    #[test]
    fn test_move_serialization_skips_missing_player() {
        let mut mv = Move::new(Uuid::new_v4(), 1, "e2e4", "white", Utc::now());
        mv.player_id = None;

        let serialized = serde_json::to_string(&mv).unwrap();
        assert!(serialized.contains("\"ply\":1"));
        assert!(!serialized.contains("player_id"));
    }
}
