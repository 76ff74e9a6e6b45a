use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

#[cfg(test)]
use mockall::automock;

use crate::models::{Game, Match, Move, Ticket};
use crate::repositories::errors::StoreError;

/// Constraint names reported through `StoreError::UniqueViolation` and
/// `StoreError::CheckViolation`.
pub mod constraints {
    pub const TICKET_ID: &str = "tickets_pkey";
    pub const ONE_ACTIVE_TICKET_PER_PLAYER: &str = "tickets_one_active_per_player";
    pub const GAME_ID: &str = "games_pkey";
    pub const MATCH_ID: &str = "matches_pkey";
    pub const ONE_MATCH_PER_GAME: &str = "matches_game_id_key";
    pub const DISTINCT_PLAYERS: &str = "matches_distinct_players";
    pub const MOVE_PLY: &str = "moves_game_id_ply_key";
    pub const MATCH_ACTIVE: &str = "matches_active_for_moves";
}

/// Entry point to the transactional store backing matchmaking and the ledger.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Store: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn StoreTransaction>, StoreError>;
}

/// One atomic unit of work. Writes are staged until `commit`; locks are held
/// until `commit` or `rollback` (or until the transaction is dropped). The
/// expiry sweep is the one exception: it is applied as it runs.
#[async_trait]
pub trait StoreTransaction: Send {
    /// Marks queued tickets whose expiry has passed as expired and returns how
    /// many were swept. Rows locked by other transactions are left alone. The
    /// sweep never waits for a lock, and `rollback` does not undo it.
    async fn expire_stale_tickets(&mut self, now: DateTime<Utc>) -> Result<usize, StoreError>;

    /// Takes the player's exclusive lock, then returns their queued or matched
    /// ticket (also locked), if they have one.
    async fn lock_active_ticket(&mut self, player_id: &str) -> Result<Option<Ticket>, StoreError>;

    /// Blocks until the ticket row is exclusively locked. `None` if absent.
    async fn lock_ticket(&mut self, ticket_id: Uuid) -> Result<Option<Ticket>, StoreError>;

    async fn get_ticket(&mut self, ticket_id: Uuid) -> Result<Option<Ticket>, StoreError>;

    async fn insert_ticket(&mut self, ticket: &Ticket) -> Result<(), StoreError>;

    /// The row must be locked by, or inserted in, this transaction.
    async fn update_ticket(&mut self, ticket: &Ticket) -> Result<(), StoreError>;

    /// Returns the longest-waiting queued ticket of any other player whose lock
    /// can be taken without waiting. Rows locked elsewhere are skipped.
    async fn claim_oldest_waiting_ticket(
        &mut self,
        excluded_player_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Ticket>, StoreError>;

    async fn insert_game(&mut self, game: &Game) -> Result<(), StoreError>;

    async fn insert_match(&mut self, record: &Match) -> Result<(), StoreError>;

    async fn get_match(&mut self, match_id: Uuid) -> Result<Option<Match>, StoreError>;

    /// Replaces the match record, e.g. when a finished game is adjudicated.
    async fn update_match(&mut self, record: &Match) -> Result<(), StoreError>;

    /// Bumps `updated_at` at commit. If the match is no longer active by then,
    /// the commit fails with `CheckViolation(MATCH_ACTIVE)` and nothing is applied.
    async fn touch_active_match(
        &mut self,
        match_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    async fn latest_ply(&mut self, game_id: Uuid) -> Result<u32, StoreError>;

    /// Moves with `ply > after_ply`, in ply order.
    async fn list_moves(&mut self, game_id: Uuid, after_ply: u32) -> Result<Vec<Move>, StoreError>;

    /// Fails with `UniqueViolation` when the ply is taken, either here or at commit.
    async fn insert_move(&mut self, mv: &Move) -> Result<(), StoreError>;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;

    async fn rollback(self: Box<Self>) -> Result<(), StoreError>;
}
