use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TicketStatus {
    Queued,
    Matched,
    Cancelled,
    Expired,
}

impl TicketStatus {
    /// Queued and matched tickets count against the one-ticket-per-player limit.
    pub fn is_active(self) -> bool {
        matches!(self, TicketStatus::Queued | TicketStatus::Matched)
    }

    pub fn is_terminal(self) -> bool {
        !self.is_active()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TicketStatus::Queued => "queued",
            TicketStatus::Matched => "matched",
            TicketStatus::Cancelled => "cancelled",
            TicketStatus::Expired => "expired",
        }
    }
}

impl std::fmt::Display for TicketStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A player's claim on the matchmaking queue while they wait for an opponent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ticket {
    pub id: Uuid,
    pub player_id: String,
    pub status: TicketStatus,
    pub heartbeat_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub match_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Ticket {
    pub fn new(player_id: &str, now: DateTime<Utc>, ttl: Duration) -> Self {
        Ticket {
            id: Uuid::new_v4(),
            player_id: player_id.to_string(),
            status: TicketStatus::Queued,
            heartbeat_at: now,
            expires_at: now + ttl,
            match_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_owned_by(&self, player_id: &str) -> bool {
        self.player_id == player_id
    }

    /// A queued ticket whose expiry has passed is abandoned.
    pub fn is_stale(&self, now: DateTime<Utc>) -> bool {
        self.status == TicketStatus::Queued && self.expires_at <= now
    }

    /// Whether this ticket may be offered to another player as an opponent.
    pub fn is_waiting(&self, now: DateTime<Utc>) -> bool {
        self.status == TicketStatus::Queued && self.match_id.is_none() && self.expires_at > now
    }

    /// Records a heartbeat. The expiry never moves backwards.
    pub fn refresh(&mut self, now: DateTime<Utc>, ttl: Duration) {
        self.heartbeat_at = now;
        self.expires_at = self.expires_at.max(now + ttl);
        self.updated_at = now;
    }

    pub fn mark_matched(&mut self, match_id: Uuid, now: DateTime<Utc>, ttl: Duration) {
        self.status = TicketStatus::Matched;
        self.match_id = Some(match_id);
        self.expires_at = self.expires_at.max(now + ttl);
        self.updated_at = now;
    }

    pub fn cancel(&mut self, now: DateTime<Utc>) {
        self.status = TicketStatus::Cancelled;
        self.updated_at = now;
    }

    pub fn expire(&mut self, now: DateTime<Utc>) {
        self.status = TicketStatus::Expired;
        self.updated_at = now;
    }

    /// Ordering key for the queue: longest waiting first, ties broken by id.
    pub fn queue_position(&self) -> (DateTime<Utc>, Uuid) {
        (self.created_at, self.id)
    }
}
