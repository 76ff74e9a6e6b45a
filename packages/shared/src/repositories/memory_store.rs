use std::collections::{BTreeMap, HashMap, HashSet};
use std::ops::Bound::{Excluded, Included};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;
use uuid::Uuid;

use crate::config::{Config, DEFAULT_LOCK_WAIT_MILLIS};
use crate::models::{Game, Match, Move, Ticket};
use crate::repositories::errors::StoreError;
use crate::repositories::store::{constraints, Store, StoreTransaction};

const LOCK_TABLE_PRUNE_THRESHOLD: usize = 1_024;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum LockKey {
    Player(String),
    Ticket(Uuid),
}

impl std::fmt::Display for LockKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LockKey::Player(player_id) => write!(f, "player {}", player_id),
            LockKey::Ticket(ticket_id) => write!(f, "ticket {}", ticket_id),
        }
    }
}

#[derive(Default)]
struct Tables {
    tickets: HashMap<Uuid, Ticket>,
    games: HashMap<Uuid, Game>,
    matches: HashMap<Uuid, Match>,
    moves: BTreeMap<(Uuid, u32), Move>,
}

struct Shared {
    tables: Mutex<Tables>,
    locks: Mutex<HashMap<LockKey, Arc<Mutex<()>>>>,
    lock_wait: Duration,
}

impl Shared {
    async fn row_lock(&self, key: &LockKey) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        if locks.len() > LOCK_TABLE_PRUNE_THRESHOLD {
            // Entries only referenced by the table are neither held nor awaited.
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        }
        locks
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

/// Process-local store. Committed rows live behind a single mutex; row locks
/// are a table of per-key mutexes so that pairing can try-acquire and skip.
#[derive(Clone)]
pub struct InMemoryStore {
    shared: Arc<Shared>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::with_lock_wait(Duration::from_millis(DEFAULT_LOCK_WAIT_MILLIS))
    }

    pub fn with_lock_wait(lock_wait: Duration) -> Self {
        InMemoryStore {
            shared: Arc::new(Shared {
                tables: Mutex::new(Tables::default()),
                locks: Mutex::new(HashMap::new()),
                lock_wait,
            }),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::with_lock_wait(config.lock_wait)
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn begin(&self) -> Result<Box<dyn StoreTransaction>, StoreError> {
        Ok(Box::new(InMemoryTransaction::new(self.shared.clone())))
    }
}

pub struct InMemoryTransaction {
    shared: Arc<Shared>,
    held: HashMap<LockKey, OwnedMutexGuard<()>>,
    tickets: HashMap<Uuid, Ticket>,
    inserted_tickets: HashSet<Uuid>,
    games: Vec<Game>,
    matches: HashMap<Uuid, Match>,
    inserted_matches: HashSet<Uuid>,
    touched_matches: HashMap<Uuid, DateTime<Utc>>,
    moves: BTreeMap<(Uuid, u32), Move>,
}

impl InMemoryTransaction {
    fn new(shared: Arc<Shared>) -> Self {
        InMemoryTransaction {
            shared,
            held: HashMap::new(),
            tickets: HashMap::new(),
            inserted_tickets: HashSet::new(),
            games: Vec::new(),
            matches: HashMap::new(),
            inserted_matches: HashSet::new(),
            touched_matches: HashMap::new(),
            moves: BTreeMap::new(),
        }
    }

    async fn acquire(&mut self, key: LockKey) -> Result<(), StoreError> {
        if self.held.contains_key(&key) {
            return Ok(());
        }
        let lock = self.shared.row_lock(&key).await;
        let guard = tokio::time::timeout(self.shared.lock_wait, lock.lock_owned())
            .await
            .map_err(|_| StoreError::LockTimeout(key.to_string()))?;
        self.held.insert(key, guard);
        Ok(())
    }

    async fn try_acquire(&mut self, key: LockKey) -> bool {
        if self.held.contains_key(&key) {
            return true;
        }
        let lock = self.shared.row_lock(&key).await;
        match lock.try_lock_owned() {
            Ok(guard) => {
                self.held.insert(key, guard);
                true
            }
            Err(_) => false,
        }
    }

    fn check_commit(&self, tables: &Tables) -> Result<(), StoreError> {
        for ticket_id in &self.inserted_tickets {
            if tables.tickets.contains_key(ticket_id) {
                return Err(StoreError::UniqueViolation(constraints::TICKET_ID.to_string()));
            }
        }

        let mut active_players = HashSet::new();
        for ticket in self.tickets.values().filter(|t| t.status.is_active()) {
            let clash = tables.tickets.values().any(|other| {
                other.id != ticket.id
                    && other.player_id == ticket.player_id
                    && other.status.is_active()
                    && !self
                        .tickets
                        .get(&other.id)
                        .is_some_and(|staged| staged.status.is_terminal())
            });
            if clash || !active_players.insert(ticket.player_id.as_str()) {
                return Err(StoreError::UniqueViolation(
                    constraints::ONE_ACTIVE_TICKET_PER_PLAYER.to_string(),
                ));
            }
        }

        for game in &self.games {
            if tables.games.contains_key(&game.id) {
                return Err(StoreError::UniqueViolation(constraints::GAME_ID.to_string()));
            }
        }

        for match_id in &self.inserted_matches {
            if tables.matches.contains_key(match_id) {
                return Err(StoreError::UniqueViolation(constraints::MATCH_ID.to_string()));
            }
            if let Some(record) = self.matches.get(match_id) {
                if tables.matches.values().any(|m| m.game_id == record.game_id) {
                    return Err(StoreError::UniqueViolation(
                        constraints::ONE_MATCH_PER_GAME.to_string(),
                    ));
                }
            }
        }

        for match_id in self.touched_matches.keys() {
            if !tables.matches.get(match_id).is_some_and(Match::is_active) {
                return Err(StoreError::CheckViolation(constraints::MATCH_ACTIVE.to_string()));
            }
        }

        for key in self.moves.keys() {
            if tables.moves.contains_key(key) {
                return Err(StoreError::UniqueViolation(constraints::MOVE_PLY.to_string()));
            }
        }

        Ok(())
    }
}

#[async_trait]
impl StoreTransaction for InMemoryTransaction {
    async fn expire_stale_tickets(&mut self, now: DateTime<Utc>) -> Result<usize, StoreError> {
        let mut tables = self.shared.tables.lock().await;
        let stale: Vec<Uuid> = tables
            .tickets
            .values()
            .filter(|ticket| ticket.is_stale(now))
            .map(|ticket| ticket.id)
            .collect();

        let mut swept = 0;
        for ticket_id in stale {
            let key = LockKey::Ticket(ticket_id);
            if self.held.contains_key(&key) {
                continue;
            }
            let lock = self.shared.row_lock(&key).await;
            let Ok(_guard) = lock.try_lock() else {
                debug!("Sweep skipped locked ticket {}", ticket_id);
                continue;
            };
            if let Some(ticket) = tables.tickets.get_mut(&ticket_id) {
                ticket.expire(now);
                swept += 1;
            }
        }

        Ok(swept)
    }

    async fn lock_active_ticket(&mut self, player_id: &str) -> Result<Option<Ticket>, StoreError> {
        self.acquire(LockKey::Player(player_id.to_string())).await?;

        if let Some(staged) = self
            .tickets
            .values()
            .find(|t| t.player_id == player_id && t.status.is_active())
        {
            return Ok(Some(staged.clone()));
        }

        let committed: Vec<Uuid> = {
            let tables = self.shared.tables.lock().await;
            tables
                .tickets
                .values()
                .filter(|t| t.player_id == player_id && t.status.is_active())
                .filter(|t| !self.tickets.contains_key(&t.id))
                .map(|t| t.id)
                .collect()
        };

        for ticket_id in committed {
            if let Some(ticket) = self.lock_ticket(ticket_id).await? {
                if ticket.player_id == player_id && ticket.status.is_active() {
                    return Ok(Some(ticket));
                }
            }
        }

        Ok(None)
    }

    async fn lock_ticket(&mut self, ticket_id: Uuid) -> Result<Option<Ticket>, StoreError> {
        self.acquire(LockKey::Ticket(ticket_id)).await?;
        self.get_ticket(ticket_id).await
    }

    async fn get_ticket(&mut self, ticket_id: Uuid) -> Result<Option<Ticket>, StoreError> {
        if let Some(staged) = self.tickets.get(&ticket_id) {
            return Ok(Some(staged.clone()));
        }
        let tables = self.shared.tables.lock().await;
        Ok(tables.tickets.get(&ticket_id).cloned())
    }

    async fn insert_ticket(&mut self, ticket: &Ticket) -> Result<(), StoreError> {
        let exists = self.tickets.contains_key(&ticket.id)
            || self.shared.tables.lock().await.tickets.contains_key(&ticket.id);
        if exists {
            return Err(StoreError::UniqueViolation(constraints::TICKET_ID.to_string()));
        }
        self.inserted_tickets.insert(ticket.id);
        self.tickets.insert(ticket.id, ticket.clone());
        Ok(())
    }

    async fn update_ticket(&mut self, ticket: &Ticket) -> Result<(), StoreError> {
        let key = LockKey::Ticket(ticket.id);
        if !self.inserted_tickets.contains(&ticket.id) && !self.held.contains_key(&key) {
            return Err(StoreError::NotLocked(key.to_string()));
        }
        self.tickets.insert(ticket.id, ticket.clone());
        Ok(())
    }

    async fn claim_oldest_waiting_ticket(
        &mut self,
        excluded_player_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Ticket>, StoreError> {
        let mut candidates: Vec<Ticket> = {
            let tables = self.shared.tables.lock().await;
            tables
                .tickets
                .values()
                .filter(|t| t.player_id != excluded_player_id && t.is_waiting(now))
                .filter(|t| !self.tickets.contains_key(&t.id))
                .cloned()
                .collect()
        };
        candidates.sort_by_key(|t| t.queue_position());

        for candidate in candidates {
            let key = LockKey::Ticket(candidate.id);
            if self.held.contains_key(&key) {
                continue;
            }
            if !self.try_acquire(key.clone()).await {
                debug!("Skipping ticket {} locked by another pairing", candidate.id);
                continue;
            }
            let current = self
                .shared
                .tables
                .lock()
                .await
                .tickets
                .get(&candidate.id)
                .cloned();
            match current {
                Some(ticket) if ticket.player_id != excluded_player_id && ticket.is_waiting(now) => {
                    return Ok(Some(ticket));
                }
                _ => {
                    self.held.remove(&key);
                }
            }
        }

        Ok(None)
    }

    async fn insert_game(&mut self, game: &Game) -> Result<(), StoreError> {
        let exists = self.games.iter().any(|g| g.id == game.id)
            || self.shared.tables.lock().await.games.contains_key(&game.id);
        if exists {
            return Err(StoreError::UniqueViolation(constraints::GAME_ID.to_string()));
        }
        self.games.push(game.clone());
        Ok(())
    }

    async fn insert_match(&mut self, record: &Match) -> Result<(), StoreError> {
        if !record.has_distinct_players() {
            return Err(StoreError::CheckViolation(constraints::DISTINCT_PLAYERS.to_string()));
        }
        {
            let tables = self.shared.tables.lock().await;
            if self.matches.contains_key(&record.id) || tables.matches.contains_key(&record.id) {
                return Err(StoreError::UniqueViolation(constraints::MATCH_ID.to_string()));
            }
            let game_taken = self.matches.values().any(|m| m.game_id == record.game_id)
                || tables.matches.values().any(|m| m.game_id == record.game_id);
            if game_taken {
                return Err(StoreError::UniqueViolation(
                    constraints::ONE_MATCH_PER_GAME.to_string(),
                ));
            }
        }
        self.inserted_matches.insert(record.id);
        self.matches.insert(record.id, record.clone());
        Ok(())
    }

    async fn get_match(&mut self, match_id: Uuid) -> Result<Option<Match>, StoreError> {
        if let Some(staged) = self.matches.get(&match_id) {
            return Ok(Some(staged.clone()));
        }
        let tables = self.shared.tables.lock().await;
        Ok(tables.matches.get(&match_id).cloned())
    }

    async fn update_match(&mut self, record: &Match) -> Result<(), StoreError> {
        self.matches.insert(record.id, record.clone());
        Ok(())
    }

    async fn touch_active_match(
        &mut self,
        match_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        if let Some(staged) = self.matches.get_mut(&match_id) {
            if !staged.is_active() {
                return Err(StoreError::CheckViolation(constraints::MATCH_ACTIVE.to_string()));
            }
            staged.updated_at = now;
            return Ok(());
        }
        self.touched_matches.insert(match_id, now);
        Ok(())
    }

    async fn latest_ply(&mut self, game_id: Uuid) -> Result<u32, StoreError> {
        let committed = {
            let tables = self.shared.tables.lock().await;
            tables
                .moves
                .range((game_id, 0)..=(game_id, u32::MAX))
                .next_back()
                .map(|((_, ply), _)| *ply)
        };
        let staged = self
            .moves
            .range((game_id, 0)..=(game_id, u32::MAX))
            .next_back()
            .map(|((_, ply), _)| *ply);

        Ok(committed.max(staged).unwrap_or(0))
    }

    async fn list_moves(&mut self, game_id: Uuid, after_ply: u32) -> Result<Vec<Move>, StoreError> {
        let bounds = (Excluded((game_id, after_ply)), Included((game_id, u32::MAX)));

        let mut moves: BTreeMap<u32, Move> = {
            let tables = self.shared.tables.lock().await;
            tables
                .moves
                .range(bounds)
                .map(|((_, ply), mv)| (*ply, mv.clone()))
                .collect()
        };
        for ((_, ply), mv) in self.moves.range(bounds) {
            moves.insert(*ply, mv.clone());
        }

        Ok(moves.into_values().collect())
    }

    async fn insert_move(&mut self, mv: &Move) -> Result<(), StoreError> {
        let key = (mv.game_id, mv.ply);
        let taken = self.moves.contains_key(&key)
            || self.shared.tables.lock().await.moves.contains_key(&key);
        if taken {
            return Err(StoreError::UniqueViolation(constraints::MOVE_PLY.to_string()));
        }
        self.moves.insert(key, mv.clone());
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let shared = self.shared.clone();
        let mut tables = shared.tables.lock().await;
        self.check_commit(&tables)?;

        let InMemoryTransaction {
            held,
            tickets,
            games,
            matches,
            inserted_matches,
            touched_matches,
            moves,
            ..
        } = *self;

        for (ticket_id, ticket) in tickets {
            tables.tickets.insert(ticket_id, ticket);
        }
        for game in games {
            tables.games.insert(game.id, game);
        }
        for (match_id, record) in matches {
            if inserted_matches.contains(&match_id) || tables.matches.contains_key(&match_id) {
                tables.matches.insert(match_id, record);
            }
        }
        for (match_id, updated_at) in touched_matches {
            if let Some(record) = tables.matches.get_mut(&match_id) {
                record.updated_at = updated_at;
            }
        }
        tables.moves.extend(moves);

        drop(tables);
        drop(held);
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        Ok(())
    }
}
