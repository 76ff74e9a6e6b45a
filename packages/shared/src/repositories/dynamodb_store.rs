use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::Duration;

use async_trait::async_trait;
use aws_config::timeout::TimeoutConfig;
use aws_config::BehaviorVersion;
use aws_sdk_dynamodb::error::SdkError;
use aws_sdk_dynamodb::operation::transact_write_items::TransactWriteItemsError;
use aws_sdk_dynamodb::types::{
    AttributeValue, CancellationReason, Put, ReturnValue, TransactWriteItem, Update,
};
use aws_sdk_dynamodb::Client;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_dynamo::aws_sdk_dynamodb_1::{from_item, to_item};
use tokio::time::{sleep, Instant};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::{Config, TableNames};
use crate::models::{Game, Match, MatchStatus, Move, Ticket, TicketStatus};
use crate::repositories::errors::StoreError;
use crate::repositories::store::{constraints, Store, StoreTransaction};

type Item = HashMap<String, AttributeValue>;

const TICKET_KEY: &str = "id";
const MATCH_KEY: &str = "id";
const GAME_KEY: &str = "id";
const PLAYER_KEY: &str = "player_id";
const MOVE_PARTITION_KEY: &str = "game_id";
const MOVE_SORT_KEY: &str = "ply";

const LOCK_OWNER: &str = "lock_owner";
const LOCK_EXPIRES_AT: &str = "lock_expires_at";
const ACTIVE_TICKET_ID: &str = "active_ticket_id";
const CREATED_AT_MS: &str = "created_at_ms";
const EXPIRES_AT_MS: &str = "expires_at_ms";

/// GSI on the tickets table: partition `status`, sort `created_at_ms`, all attributes projected.
pub const TICKET_STATUS_INDEX: &str = "status-created_at_ms-index";

const CONDITIONAL_CHECK_FAILED: &str = "ConditionalCheckFailed";
const TRANSACTION_CONFLICT: &str = "TransactionConflict";
const MAX_TRANSACT_ITEMS: usize = 100;
const INITIAL_BACKOFF: Duration = Duration::from_millis(20);
const MAX_BACKOFF: Duration = Duration::from_millis(320);

/// DynamoDB-backed store.
///
/// Row locks are leases: `lock_owner` / `lock_expires_at` attributes written
/// with a conditional update, so a crashed holder only blocks a row until its
/// lease runs out. Staged writes are committed with a single
/// `TransactWriteItems` call, each write conditioned on still owning its lease;
/// inserts carry `attribute_not_exists` conditions that stand in for
/// uniqueness constraints.
#[derive(Clone)]
pub struct DynamoDbStore {
    client: Client,
    tables: TableNames,
    lock_lease: Duration,
    lock_wait: Duration,
}

impl DynamoDbStore {
    pub fn new(client: Client, config: &Config) -> Self {
        DynamoDbStore {
            client,
            tables: config.tables.clone(),
            lock_lease: config.lock_lease,
            lock_wait: config.lock_wait,
        }
    }

    /// Builds a client from the ambient AWS configuration with a bounded
    /// connection timeout.
    pub async fn connect(config: &Config) -> Self {
        let timeouts = TimeoutConfig::builder()
            .connect_timeout(config.connect_timeout)
            .build();
        let sdk_config = aws_config::defaults(BehaviorVersion::latest())
            .timeout_config(timeouts)
            .load()
            .await;
        Self::new(Client::new(&sdk_config), config)
    }
}

#[async_trait]
impl Store for DynamoDbStore {
    async fn begin(&self) -> Result<Box<dyn StoreTransaction>, StoreError> {
        Ok(Box::new(DynamoDbTransaction::new(self)))
    }
}

#[derive(Debug, Clone, Copy)]
struct PlayerLock {
    active_ticket_id: Option<Uuid>,
    changed: bool,
}

/// How a failed condition on a transactional write is reported.
#[derive(Debug, Clone, PartialEq, Eq)]
enum WriteKind {
    Insert(&'static str),
    Check(&'static str),
    Leased(String),
    Existing(String),
}

impl WriteKind {
    /// The move insert and the active-match check of a ledger append.
    fn is_ledger_write(&self) -> bool {
        matches!(
            self,
            WriteKind::Insert(constraints::MOVE_PLY) | WriteKind::Check(constraints::MATCH_ACTIVE)
        )
    }
}

pub struct DynamoDbTransaction {
    client: Client,
    tables: TableNames,
    lock_lease: Duration,
    lock_wait: Duration,
    owner: String,
    locked_tickets: HashSet<Uuid>,
    locked_players: HashMap<String, PlayerLock>,
    tickets: HashMap<Uuid, Ticket>,
    inserted_tickets: HashSet<Uuid>,
    games: Vec<Game>,
    matches: HashMap<Uuid, Match>,
    inserted_matches: HashSet<Uuid>,
    touched_matches: HashMap<Uuid, DateTime<Utc>>,
    moves: BTreeMap<(Uuid, u32), Move>,
}

impl DynamoDbTransaction {
    fn new(store: &DynamoDbStore) -> Self {
        DynamoDbTransaction {
            client: store.client.clone(),
            tables: store.tables.clone(),
            lock_lease: store.lock_lease,
            lock_wait: store.lock_wait,
            owner: Uuid::new_v4().to_string(),
            locked_tickets: HashSet::new(),
            locked_players: HashMap::new(),
            tickets: HashMap::new(),
            inserted_tickets: HashSet::new(),
            games: Vec::new(),
            matches: HashMap::new(),
            inserted_matches: HashSet::new(),
            touched_matches: HashMap::new(),
            moves: BTreeMap::new(),
        }
    }

    fn lease_deadline_ms(&self, now_ms: i64) -> i64 {
        let lease_ms = i64::try_from(self.lock_lease.as_millis()).unwrap_or(i64::MAX);
        now_ms.saturating_add(lease_ms)
    }

    async fn get_item(
        &self,
        table: &str,
        key: Vec<(&str, AttributeValue)>,
    ) -> Result<Option<Item>, StoreError> {
        let mut request = self
            .client
            .get_item()
            .table_name(table)
            .consistent_read(true);
        for (name, value) in key {
            request = request.key(name, value);
        }
        let output = request.send().await.map_err(unavailable)?;
        Ok(output.item)
    }

    /// One conditional attempt at taking the lease on an item. `Ok(None)` when
    /// the condition failed: held elsewhere, or (unless `upsert`) missing.
    async fn try_lease(
        &self,
        table: &str,
        key_name: &str,
        key: AttributeValue,
        upsert: bool,
    ) -> Result<Option<Item>, StoreError> {
        let now_ms = Utc::now().timestamp_millis();
        let free = "(attribute_not_exists(#lock_owner) OR #lock_owner = :owner OR #lock_expires_at < :now)";
        let condition = if upsert {
            free.to_string()
        } else {
            format!("attribute_exists(#key) AND {}", free)
        };

        let mut request = self
            .client
            .update_item()
            .table_name(table)
            .key(key_name, key)
            .update_expression("SET #lock_owner = :owner, #lock_expires_at = :lease")
            .condition_expression(condition)
            .expression_attribute_names("#lock_owner", LOCK_OWNER)
            .expression_attribute_names("#lock_expires_at", LOCK_EXPIRES_AT)
            .expression_attribute_values(":owner", AttributeValue::S(self.owner.clone()))
            .expression_attribute_values(":now", number(now_ms))
            .expression_attribute_values(":lease", number(self.lease_deadline_ms(now_ms)))
            .return_values(ReturnValue::AllNew);
        if !upsert {
            request = request.expression_attribute_names("#key", key_name);
        }

        match request.send().await {
            Ok(output) => Ok(Some(output.attributes.unwrap_or_default())),
            Err(e) => {
                if let SdkError::ServiceError(service_err) = &e {
                    if service_err.err().is_conditional_check_failed_exception() {
                        return Ok(None);
                    }
                }
                Err(StoreError::Unavailable(e.to_string()))
            }
        }
    }

    /// Waits (with backoff, up to the configured bound) for the lease on an item.
    /// Returns `None` if the item does not exist and `upsert` is false.
    async fn lease(
        &self,
        table: &str,
        key_name: &str,
        key: AttributeValue,
        upsert: bool,
        row: String,
    ) -> Result<Option<Item>, StoreError> {
        let deadline = Instant::now() + self.lock_wait;
        let mut backoff = INITIAL_BACKOFF;

        loop {
            if let Some(item) = self.try_lease(table, key_name, key.clone(), upsert).await? {
                return Ok(Some(item));
            }
            if !upsert
                && self
                    .get_item(table, vec![(key_name, key.clone())])
                    .await?
                    .is_none()
            {
                return Ok(None);
            }
            if Instant::now() + backoff > deadline {
                return Err(StoreError::LockTimeout(row));
            }
            debug!("Waiting {:?} for lease on {}", backoff, row);
            sleep(backoff).await;
            backoff = (backoff * 2).min(MAX_BACKOFF);
        }
    }

    async fn release(
        &self,
        table: &str,
        key_name: &str,
        key: AttributeValue,
    ) -> Result<(), StoreError> {
        let result = self
            .client
            .update_item()
            .table_name(table)
            .key(key_name, key)
            .update_expression("REMOVE #lock_owner, #lock_expires_at")
            .condition_expression("#lock_owner = :owner")
            .expression_attribute_names("#lock_owner", LOCK_OWNER)
            .expression_attribute_names("#lock_expires_at", LOCK_EXPIRES_AT)
            .expression_attribute_values(":owner", AttributeValue::S(self.owner.clone()))
            .send()
            .await;

        match result {
            Ok(_) => Ok(()),
            Err(e) => {
                if let SdkError::ServiceError(service_err) = &e {
                    if service_err.err().is_conditional_check_failed_exception() {
                        // Lease already lapsed or taken over.
                        return Ok(());
                    }
                }
                Err(StoreError::Unavailable(e.to_string()))
            }
        }
    }

    async fn release_locks(&self) -> Result<(), StoreError> {
        let mut first_error = None;

        for ticket_id in &self.locked_tickets {
            let key = AttributeValue::S(ticket_id.to_string());
            if let Err(e) = self.release(&self.tables.tickets, TICKET_KEY, key).await {
                warn!("Failed to release lease on ticket {}: {}", ticket_id, e);
                first_error.get_or_insert(e);
            }
        }
        for player_id in self.locked_players.keys() {
            let key = AttributeValue::S(player_id.clone());
            if let Err(e) = self.release(&self.tables.players, PLAYER_KEY, key).await {
                warn!("Failed to release lease on player {}: {}", player_id, e);
                first_error.get_or_insert(e);
            }
        }

        first_error.map_or(Ok(()), Err)
    }

    async fn lock_player(&mut self, player_id: &str) -> Result<Option<Uuid>, StoreError> {
        if let Some(lock) = self.locked_players.get(player_id) {
            return Ok(lock.active_ticket_id);
        }

        let item = self
            .lease(
                &self.tables.players,
                PLAYER_KEY,
                AttributeValue::S(player_id.to_string()),
                true,
                format!("player {}", player_id),
            )
            .await?
            .unwrap_or_default();

        let active_ticket_id = match item.get(ACTIVE_TICKET_ID) {
            Some(AttributeValue::S(raw)) => Some(
                Uuid::parse_str(raw).map_err(|e| StoreError::Serialization(e.to_string()))?,
            ),
            _ => None,
        };

        self.locked_players.insert(
            player_id.to_string(),
            PlayerLock {
                active_ticket_id,
                changed: false,
            },
        );
        Ok(active_ticket_id)
    }

    /// Queued tickets in queue order. With `excluded_player` set, only tickets
    /// another player could be paired with; otherwise only stale ones.
    async fn queued_tickets(
        &self,
        now: DateTime<Utc>,
        excluded_player: Option<&str>,
    ) -> Result<Vec<Ticket>, StoreError> {
        let filter = match excluded_player {
            Some(_) => {
                "#expires_at_ms > :now AND #player_id <> :player AND attribute_not_exists(#match_id)"
            }
            None => "#expires_at_ms <= :now",
        };

        let mut tickets = Vec::new();
        let mut start_key: Option<Item> = None;
        loop {
            let mut request = self
                .client
                .query()
                .table_name(&self.tables.tickets)
                .index_name(TICKET_STATUS_INDEX)
                .key_condition_expression("#status = :queued")
                .filter_expression(filter)
                .expression_attribute_names("#status", "status")
                .expression_attribute_names("#expires_at_ms", EXPIRES_AT_MS)
                .expression_attribute_values(":queued", status_value(TicketStatus::Queued))
                .expression_attribute_values(":now", number(now.timestamp_millis()))
                .set_exclusive_start_key(start_key.take());
            if let Some(player_id) = excluded_player {
                request = request
                    .expression_attribute_names("#player_id", "player_id")
                    .expression_attribute_names("#match_id", "match_id")
                    .expression_attribute_values(":player", AttributeValue::S(player_id.to_string()));
            }

            let output = request.send().await.map_err(unavailable)?;
            for item in output.items.unwrap_or_default() {
                tickets.push(decode::<Ticket>(item)?);
            }
            match output.last_evaluated_key {
                Some(key) if !key.is_empty() => start_key = Some(key),
                _ => break,
            }
        }

        tickets.sort_by_key(|t| t.queue_position());
        Ok(tickets)
    }

    /// Takes the lease on a candidate only if it is free and still waiting.
    async fn try_claim(
        &self,
        ticket_id: Uuid,
        excluded_player_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Ticket>, StoreError> {
        let now_ms = now.timestamp_millis();
        let lock_now_ms = Utc::now().timestamp_millis();
        let result = self
            .client
            .update_item()
            .table_name(&self.tables.tickets)
            .key(TICKET_KEY, AttributeValue::S(ticket_id.to_string()))
            .update_expression("SET #lock_owner = :owner, #lock_expires_at = :lease")
            .condition_expression(
                "#status = :queued AND attribute_not_exists(#match_id) \
                 AND #expires_at_ms > :now AND #player_id <> :player \
                 AND (attribute_not_exists(#lock_owner) OR #lock_expires_at < :lock_now)",
            )
            .expression_attribute_names("#status", "status")
            .expression_attribute_names("#match_id", "match_id")
            .expression_attribute_names("#expires_at_ms", EXPIRES_AT_MS)
            .expression_attribute_names("#player_id", "player_id")
            .expression_attribute_names("#lock_owner", LOCK_OWNER)
            .expression_attribute_names("#lock_expires_at", LOCK_EXPIRES_AT)
            .expression_attribute_values(":queued", status_value(TicketStatus::Queued))
            .expression_attribute_values(":now", number(now_ms))
            .expression_attribute_values(":player", AttributeValue::S(excluded_player_id.to_string()))
            .expression_attribute_values(":owner", AttributeValue::S(self.owner.clone()))
            .expression_attribute_values(":lock_now", number(lock_now_ms))
            .expression_attribute_values(":lease", number(self.lease_deadline_ms(lock_now_ms)))
            .return_values(ReturnValue::AllNew)
            .send()
            .await;

        match result {
            Ok(output) => Ok(Some(decode(output.attributes.unwrap_or_default())?)),
            Err(e) => {
                if let SdkError::ServiceError(service_err) = &e {
                    if service_err.err().is_conditional_check_failed_exception() {
                        return Ok(None);
                    }
                }
                Err(StoreError::Unavailable(e.to_string()))
            }
        }
    }

    async fn expire_ticket(&self, ticket: &Ticket, now: DateTime<Utc>) -> Result<bool, StoreError> {
        let result = self
            .client
            .update_item()
            .table_name(&self.tables.tickets)
            .key(TICKET_KEY, AttributeValue::S(ticket.id.to_string()))
            .update_expression("SET #status = :expired, #updated_at = :updated_at")
            .condition_expression(
                "#status = :queued AND #expires_at_ms <= :now \
                 AND (attribute_not_exists(#lock_owner) OR #lock_expires_at < :lock_now)",
            )
            .expression_attribute_names("#status", "status")
            .expression_attribute_names("#updated_at", "updated_at")
            .expression_attribute_names("#expires_at_ms", EXPIRES_AT_MS)
            .expression_attribute_names("#lock_owner", LOCK_OWNER)
            .expression_attribute_names("#lock_expires_at", LOCK_EXPIRES_AT)
            .expression_attribute_values(":expired", status_value(TicketStatus::Expired))
            .expression_attribute_values(":queued", status_value(TicketStatus::Queued))
            .expression_attribute_values(":updated_at", AttributeValue::S(now.to_rfc3339()))
            .expression_attribute_values(":now", number(now.timestamp_millis()))
            .expression_attribute_values(":lock_now", number(Utc::now().timestamp_millis()))
            .send()
            .await;

        match result {
            Ok(_) => Ok(true),
            Err(e) => {
                if let SdkError::ServiceError(service_err) = &e {
                    if service_err.err().is_conditional_check_failed_exception() {
                        return Ok(false);
                    }
                }
                Err(StoreError::Unavailable(e.to_string()))
            }
        }
    }

    fn staged_writes(&self) -> Result<Vec<(TransactWriteItem, WriteKind)>, StoreError> {
        let owner = || AttributeValue::S(self.owner.clone());
        let mut writes = Vec::new();

        for (ticket_id, ticket) in &self.tickets {
            let item = ticket_item(ticket)?;
            if self.inserted_tickets.contains(ticket_id) {
                writes.push((
                    put(
                        &self.tables.tickets,
                        item,
                        "attribute_not_exists(#key)",
                        &[("#key", TICKET_KEY)],
                        Vec::new(),
                    )?,
                    WriteKind::Insert(constraints::TICKET_ID),
                ));
            } else {
                // The put replaces the item, dropping the lease attributes with it.
                writes.push((
                    put(
                        &self.tables.tickets,
                        item,
                        "#lock_owner = :owner",
                        &[("#lock_owner", LOCK_OWNER)],
                        vec![(":owner", owner())],
                    )?,
                    WriteKind::Leased(format!("ticket {}", ticket_id)),
                ));
            }
        }

        for ticket_id in self.locked_tickets.iter().filter(|id| !self.tickets.contains_key(id)) {
            writes.push((
                update(
                    &self.tables.tickets,
                    (TICKET_KEY, AttributeValue::S(ticket_id.to_string())),
                    "REMOVE #lock_owner, #lock_expires_at",
                    "#lock_owner = :owner",
                    &[("#lock_owner", LOCK_OWNER), ("#lock_expires_at", LOCK_EXPIRES_AT)],
                    vec![(":owner", owner())],
                )?,
                WriteKind::Leased(format!("ticket {}", ticket_id)),
            ));
        }

        for (player_id, lock) in &self.locked_players {
            let key = (PLAYER_KEY, AttributeValue::S(player_id.clone()));
            let names = [
                ("#lock_owner", LOCK_OWNER),
                ("#lock_expires_at", LOCK_EXPIRES_AT),
                ("#active", ACTIVE_TICKET_ID),
            ];
            let write = match (lock.changed, lock.active_ticket_id) {
                (true, Some(ticket_id)) => update(
                    &self.tables.players,
                    key,
                    "SET #active = :ticket REMOVE #lock_owner, #lock_expires_at",
                    "#lock_owner = :owner",
                    &names,
                    vec![
                        (":owner", owner()),
                        (":ticket", AttributeValue::S(ticket_id.to_string())),
                    ],
                )?,
                _ => update(
                    &self.tables.players,
                    key,
                    "REMOVE #lock_owner, #lock_expires_at",
                    "#lock_owner = :owner",
                    &names[..2],
                    vec![(":owner", owner())],
                )?,
            };
            writes.push((write, WriteKind::Leased(format!("player {}", player_id))));
        }

        for game in &self.games {
            writes.push((
                put(
                    &self.tables.games,
                    encode(game)?,
                    "attribute_not_exists(#key)",
                    &[("#key", GAME_KEY)],
                    Vec::new(),
                )?,
                WriteKind::Insert(constraints::GAME_ID),
            ));
        }

        for (match_id, record) in &self.matches {
            let (condition, kind) = if self.inserted_matches.contains(match_id) {
                (
                    "attribute_not_exists(#key)",
                    WriteKind::Insert(constraints::MATCH_ID),
                )
            } else {
                (
                    "attribute_exists(#key)",
                    WriteKind::Existing(format!("match {}", match_id)),
                )
            };
            writes.push((
                put(
                    &self.tables.matches,
                    encode(record)?,
                    condition,
                    &[("#key", MATCH_KEY)],
                    Vec::new(),
                )?,
                kind,
            ));
        }

        for (match_id, updated_at) in &self.touched_matches {
            writes.push((
                update(
                    &self.tables.matches,
                    (MATCH_KEY, AttributeValue::S(match_id.to_string())),
                    "SET #updated_at = :updated_at",
                    "#status = :active",
                    &[("#updated_at", "updated_at"), ("#status", "status")],
                    vec![
                        (":updated_at", AttributeValue::S(updated_at.to_rfc3339())),
                        (":active", AttributeValue::S(MatchStatus::Active.to_string())),
                    ],
                )?,
                WriteKind::Check(constraints::MATCH_ACTIVE),
            ));
        }

        for mv in self.moves.values() {
            writes.push((
                put(
                    &self.tables.moves,
                    encode(mv)?,
                    "attribute_not_exists(#ply)",
                    &[("#ply", MOVE_SORT_KEY)],
                    Vec::new(),
                )?,
                WriteKind::Insert(constraints::MOVE_PLY),
            ));
        }

        Ok(writes)
    }
}

#[async_trait]
impl StoreTransaction for DynamoDbTransaction {
    async fn expire_stale_tickets(&mut self, now: DateTime<Utc>) -> Result<usize, StoreError> {
        let mut swept = 0;
        for ticket in self.queued_tickets(now, None).await? {
            if self.locked_tickets.contains(&ticket.id) {
                continue;
            }
            if self.expire_ticket(&ticket, now).await? {
                swept += 1;
            } else {
                debug!("Sweep skipped ticket {}", ticket.id);
            }
        }
        Ok(swept)
    }

    async fn lock_active_ticket(&mut self, player_id: &str) -> Result<Option<Ticket>, StoreError> {
        let pointer = self.lock_player(player_id).await?;

        if let Some(staged) = self
            .tickets
            .values()
            .find(|t| t.player_id == player_id && t.status.is_active())
        {
            return Ok(Some(staged.clone()));
        }

        let Some(ticket_id) = pointer else {
            return Ok(None);
        };
        let ticket = self.lock_ticket(ticket_id).await?;
        Ok(ticket.filter(|t| t.player_id == player_id && t.status.is_active()))
    }

    async fn lock_ticket(&mut self, ticket_id: Uuid) -> Result<Option<Ticket>, StoreError> {
        if let Some(staged) = self.tickets.get(&ticket_id) {
            if self.inserted_tickets.contains(&ticket_id) || self.locked_tickets.contains(&ticket_id) {
                return Ok(Some(staged.clone()));
            }
        }
        if self.locked_tickets.contains(&ticket_id) {
            return self.get_ticket(ticket_id).await;
        }

        let item = self
            .lease(
                &self.tables.tickets,
                TICKET_KEY,
                AttributeValue::S(ticket_id.to_string()),
                false,
                format!("ticket {}", ticket_id),
            )
            .await?;

        match item {
            Some(item) => {
                self.locked_tickets.insert(ticket_id);
                match self.tickets.get(&ticket_id) {
                    Some(staged) => Ok(Some(staged.clone())),
                    None => Ok(Some(decode(item)?)),
                }
            }
            None => Ok(None),
        }
    }

    async fn get_ticket(&mut self, ticket_id: Uuid) -> Result<Option<Ticket>, StoreError> {
        if let Some(staged) = self.tickets.get(&ticket_id) {
            return Ok(Some(staged.clone()));
        }
        self.get_item(
            &self.tables.tickets,
            vec![(TICKET_KEY, AttributeValue::S(ticket_id.to_string()))],
        )
        .await?
        .map(decode)
        .transpose()
    }

    async fn insert_ticket(&mut self, ticket: &Ticket) -> Result<(), StoreError> {
        if self.tickets.contains_key(&ticket.id) {
            return Err(StoreError::UniqueViolation(constraints::TICKET_ID.to_string()));
        }

        if let Some(previous) = self.lock_player(&ticket.player_id).await? {
            if ticket.status.is_active() {
                let still_active = self
                    .lock_ticket(previous)
                    .await?
                    .is_some_and(|t| t.status.is_active());
                if still_active {
                    return Err(StoreError::UniqueViolation(
                        constraints::ONE_ACTIVE_TICKET_PER_PLAYER.to_string(),
                    ));
                }
            }
        }
        if let Some(lock) = self.locked_players.get_mut(&ticket.player_id) {
            lock.active_ticket_id = Some(ticket.id);
            lock.changed = true;
        }

        self.inserted_tickets.insert(ticket.id);
        self.tickets.insert(ticket.id, ticket.clone());
        Ok(())
    }

    async fn update_ticket(&mut self, ticket: &Ticket) -> Result<(), StoreError> {
        if !self.inserted_tickets.contains(&ticket.id) && !self.locked_tickets.contains(&ticket.id) {
            return Err(StoreError::NotLocked(format!("ticket {}", ticket.id)));
        }
        self.tickets.insert(ticket.id, ticket.clone());
        Ok(())
    }

    async fn claim_oldest_waiting_ticket(
        &mut self,
        excluded_player_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Ticket>, StoreError> {
        for candidate in self.queued_tickets(now, Some(excluded_player_id)).await? {
            if self.tickets.contains_key(&candidate.id) || self.locked_tickets.contains(&candidate.id) {
                continue;
            }
            match self.try_claim(candidate.id, excluded_player_id, now).await? {
                Some(ticket) => {
                    self.locked_tickets.insert(ticket.id);
                    return Ok(Some(ticket));
                }
                None => debug!("Skipping ticket {} leased by another pairing", candidate.id),
            }
        }
        Ok(None)
    }

    async fn insert_game(&mut self, game: &Game) -> Result<(), StoreError> {
        if self.games.iter().any(|g| g.id == game.id) {
            return Err(StoreError::UniqueViolation(constraints::GAME_ID.to_string()));
        }
        self.games.push(game.clone());
        Ok(())
    }

    async fn insert_match(&mut self, record: &Match) -> Result<(), StoreError> {
        if !record.has_distinct_players() {
            return Err(StoreError::CheckViolation(constraints::DISTINCT_PLAYERS.to_string()));
        }
        if self.matches.contains_key(&record.id) {
            return Err(StoreError::UniqueViolation(constraints::MATCH_ID.to_string()));
        }
        if self.matches.values().any(|m| m.game_id == record.game_id) {
            return Err(StoreError::UniqueViolation(
                constraints::ONE_MATCH_PER_GAME.to_string(),
            ));
        }
        self.inserted_matches.insert(record.id);
        self.matches.insert(record.id, record.clone());
        Ok(())
    }

    async fn get_match(&mut self, match_id: Uuid) -> Result<Option<Match>, StoreError> {
        if let Some(staged) = self.matches.get(&match_id) {
            return Ok(Some(staged.clone()));
        }
        self.get_item(
            &self.tables.matches,
            vec![(MATCH_KEY, AttributeValue::S(match_id.to_string()))],
        )
        .await?
        .map(decode)
        .transpose()
    }

    async fn update_match(&mut self, record: &Match) -> Result<(), StoreError> {
        self.touched_matches.remove(&record.id);
        self.matches.insert(record.id, record.clone());
        Ok(())
    }

    async fn touch_active_match(
        &mut self,
        match_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        // One transaction may not write the same item twice; fold into the staged put.
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
        let output = self
            .client
            .query()
            .table_name(&self.tables.moves)
            .key_condition_expression("#game_id = :game_id")
            .expression_attribute_names("#game_id", MOVE_PARTITION_KEY)
            .expression_attribute_values(":game_id", AttributeValue::S(game_id.to_string()))
            .scan_index_forward(false)
            .limit(1)
            .consistent_read(true)
            .send()
            .await
            .map_err(unavailable)?;

        let mut committed = 0;
        if let Some(item) = output.items.unwrap_or_default().into_iter().next() {
            committed = decode::<Move>(item)?.ply;
        }
        let staged = self
            .moves
            .range((game_id, 0)..=(game_id, u32::MAX))
            .next_back()
            .map(|((_, ply), _)| *ply)
            .unwrap_or(0);

        Ok(committed.max(staged))
    }

    async fn list_moves(&mut self, game_id: Uuid, after_ply: u32) -> Result<Vec<Move>, StoreError> {
        let mut moves = BTreeMap::new();
        let mut start_key: Option<Item> = None;
        loop {
            let output = self
                .client
                .query()
                .table_name(&self.tables.moves)
                .key_condition_expression("#game_id = :game_id AND #ply > :after")
                .expression_attribute_names("#game_id", MOVE_PARTITION_KEY)
                .expression_attribute_names("#ply", MOVE_SORT_KEY)
                .expression_attribute_values(":game_id", AttributeValue::S(game_id.to_string()))
                .expression_attribute_values(":after", number(i64::from(after_ply)))
                .consistent_read(true)
                .set_exclusive_start_key(start_key.take())
                .send()
                .await
                .map_err(unavailable)?;

            for item in output.items.unwrap_or_default() {
                let mv: Move = decode(item)?;
                moves.insert(mv.ply, mv);
            }
            match output.last_evaluated_key {
                Some(key) if !key.is_empty() => start_key = Some(key),
                _ => break,
            }
        }

        for ((staged_game, ply), mv) in &self.moves {
            if *staged_game == game_id && *ply > after_ply {
                moves.insert(*ply, mv.clone());
            }
        }

        Ok(moves.into_values().collect())
    }

    async fn insert_move(&mut self, mv: &Move) -> Result<(), StoreError> {
        let key = (mv.game_id, mv.ply);
        let taken = self.moves.contains_key(&key)
            || self
                .get_item(
                    &self.tables.moves,
                    vec![
                        (MOVE_PARTITION_KEY, AttributeValue::S(mv.game_id.to_string())),
                        (MOVE_SORT_KEY, number(i64::from(mv.ply))),
                    ],
                )
                .await?
                .is_some();
        if taken {
            return Err(StoreError::UniqueViolation(constraints::MOVE_PLY.to_string()));
        }
        self.moves.insert(key, mv.clone());
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let writes = match self.staged_writes() {
            Ok(writes) => writes,
            Err(e) => {
                self.release_locks().await?;
                return Err(e);
            }
        };
        if writes.is_empty() {
            return Ok(());
        }
        if writes.len() > MAX_TRANSACT_ITEMS {
            self.release_locks().await?;
            return Err(StoreError::Unavailable(format!(
                "Transaction has {} writes, more than DynamoDB accepts",
                writes.len()
            )));
        }

        let (items, kinds): (Vec<TransactWriteItem>, Vec<WriteKind>) = writes.into_iter().unzip();
        let result = self
            .client
            .transact_write_items()
            .set_transact_items(Some(items))
            .send()
            .await;

        match result {
            Ok(_) => Ok(()),
            Err(e) => {
                let error = match &e {
                    SdkError::ServiceError(service_err) => match service_err.err() {
                        TransactWriteItemsError::TransactionCanceledException(cancelled) => {
                            classify_cancellation(cancelled.cancellation_reasons(), &kinds)
                        }
                        _ => StoreError::Unavailable(e.to_string()),
                    },
                    _ => StoreError::Unavailable(e.to_string()),
                };
                if let Err(release_error) = self.release_locks().await {
                    warn!("Failed to release leases after aborted commit: {}", release_error);
                }
                Err(error)
            }
        }
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        self.release_locks().await
    }
}

fn unavailable<E: std::fmt::Display>(e: E) -> StoreError {
    StoreError::Unavailable(e.to_string())
}

fn number(value: i64) -> AttributeValue {
    AttributeValue::N(value.to_string())
}

fn status_value(status: TicketStatus) -> AttributeValue {
    AttributeValue::S(status.as_str().to_string())
}

fn encode<T: Serialize>(value: &T) -> Result<Item, StoreError> {
    to_item(value).map_err(|e| StoreError::Serialization(e.to_string()))
}

fn decode<T: DeserializeOwned>(item: Item) -> Result<T, StoreError> {
    from_item(item).map_err(|e| StoreError::Serialization(e.to_string()))
}

/// Serializes a ticket with the numeric attributes the status index sorts and
/// filters on.
fn ticket_item(ticket: &Ticket) -> Result<Item, StoreError> {
    let mut item = encode(ticket)?;
    item.insert(CREATED_AT_MS.to_string(), number(ticket.created_at.timestamp_millis()));
    item.insert(EXPIRES_AT_MS.to_string(), number(ticket.expires_at.timestamp_millis()));
    Ok(item)
}

fn put(
    table: &str,
    item: Item,
    condition: &str,
    names: &[(&str, &str)],
    values: Vec<(&str, AttributeValue)>,
) -> Result<TransactWriteItem, StoreError> {
    let mut builder = Put::builder()
        .table_name(table)
        .set_item(Some(item))
        .condition_expression(condition);
    for (placeholder, name) in names {
        builder = builder.expression_attribute_names(*placeholder, *name);
    }
    for (placeholder, value) in values {
        builder = builder.expression_attribute_values(placeholder, value);
    }
    let put = builder
        .build()
        .map_err(|e| StoreError::Serialization(e.to_string()))?;
    Ok(TransactWriteItem::builder().put(put).build())
}

fn update(
    table: &str,
    key: (&str, AttributeValue),
    expression: &str,
    condition: &str,
    names: &[(&str, &str)],
    values: Vec<(&str, AttributeValue)>,
) -> Result<TransactWriteItem, StoreError> {
    let mut builder = Update::builder()
        .table_name(table)
        .key(key.0, key.1)
        .update_expression(expression)
        .condition_expression(condition);
    for (placeholder, name) in names {
        builder = builder.expression_attribute_names(*placeholder, *name);
    }
    for (placeholder, value) in values {
        builder = builder.expression_attribute_values(placeholder, value);
    }
    let update = builder
        .build()
        .map_err(|e| StoreError::Serialization(e.to_string()))?;
    Ok(TransactWriteItem::builder().update(update).build())
}

/// Maps the per-item reasons of a cancelled transaction (same order as the
/// submitted writes) onto a store error.
fn classify_cancellation(reasons: &[CancellationReason], kinds: &[WriteKind]) -> StoreError {
    for (reason, kind) in reasons.iter().zip(kinds) {
        if reason.code() != Some(CONDITIONAL_CHECK_FAILED) {
            continue;
        }
        return match kind {
            WriteKind::Insert(constraint) => StoreError::UniqueViolation(constraint.to_string()),
            WriteKind::Check(constraint) => StoreError::CheckViolation(constraint.to_string()),
            WriteKind::Leased(row) => StoreError::LockLost(row.clone()),
            WriteKind::Existing(row) => StoreError::Unavailable(format!("{} no longer exists", row)),
        };
    }

    // Another append to the same game was in flight: the ply is being taken.
    let ledger_conflict = reasons
        .iter()
        .zip(kinds)
        .any(|(reason, kind)| reason.code() == Some(TRANSACTION_CONFLICT) && kind.is_ledger_write());
    if ledger_conflict {
        return StoreError::UniqueViolation(constraints::MOVE_PLY.to_string());
    }

    let codes: Vec<&str> = reasons
        .iter()
        .filter_map(|reason| reason.code())
        .filter(|code| *code != "None")
        .collect();
    StoreError::Unavailable(format!("Transaction cancelled: {}", codes.join(", ")))
}
