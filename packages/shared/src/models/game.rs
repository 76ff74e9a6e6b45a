use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Logical container for one move sequence. Created together with its match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Game {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
}

impl Game {
    pub fn new(now: DateTime<Utc>) -> Self {
        Game {
            id: Uuid::new_v4(),
            created_at: now,
        }
    }
}
