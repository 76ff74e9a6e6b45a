use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info};

use crate::{
    models::{Game, Match, Ticket, TicketStatus},
    repositories::{errors::StoreError, store::StoreTransaction},
};

/// Pairs a queued ticket with the longest-waiting opponent inside the
/// caller's transaction.
#[derive(Debug, Clone)]
pub struct PairingService {
    ticket_ttl: Duration,
}

impl PairingService {
    pub fn new(ticket_ttl: Duration) -> Self {
        PairingService { ticket_ttl }
    }

    /// Returns the ticket, matched if an opponent could be claimed. The ticket
    /// must already be locked or inserted by `tx`.
    pub async fn try_pair(
        &self,
        tx: &mut dyn StoreTransaction,
        mut ticket: Ticket,
        now: DateTime<Utc>,
    ) -> Result<Ticket, StoreError> {
        if ticket.status != TicketStatus::Queued || ticket.match_id.is_some() {
            return Ok(ticket);
        }

        let Some(mut opponent) = tx.claim_oldest_waiting_ticket(&ticket.player_id, now).await? else {
            debug!("No opponent waiting for ticket {}", ticket.id);
            return Ok(ticket);
        };

        // Whoever queued first plays white.
        let (white, black) = if ticket.queue_position() <= opponent.queue_position() {
            (&ticket, &opponent)
        } else {
            (&opponent, &ticket)
        };
        let game = Game::new(now);
        let record = Match::new(&game, &white.player_id, &black.player_id, now);

        tx.insert_game(&game).await?;
        tx.insert_match(&record).await?;

        ticket.mark_matched(record.id, now, self.ticket_ttl);
        opponent.mark_matched(record.id, now, self.ticket_ttl);
        tx.update_ticket(&opponent).await?;
        tx.update_ticket(&ticket).await?;

        info!(
            "Paired {} (white) with {} (black) in match {}",
            record.white_player_id, record.black_player_id, record.id
        );
        Ok(ticket)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Color;
    use crate::repositories::memory_store::InMemoryStore;
    use crate::repositories::store::Store;

    fn ttl() -> Duration {
        Duration::seconds(30)
    }

    async fn seed(store: &InMemoryStore, ticket: &Ticket) {
        let mut tx = store.begin().await.unwrap();
        tx.insert_ticket(ticket).await.unwrap();
        tx.commit().await.unwrap();
    }

    #[tokio::test]
    async fn test_no_opponent_leaves_ticket_queued() {
        let store = InMemoryStore::new();
        let now = Utc::now();
        let ticket = Ticket::new("alice", now, ttl());
        seed(&store, &ticket).await;

        let mut tx = store.begin().await.unwrap();
        let locked = tx.lock_ticket(ticket.id).await.unwrap().unwrap();
        let result = PairingService::new(ttl())
            .try_pair(tx.as_mut(), locked, now)
            .await
            .unwrap();
        tx.commit().await.unwrap();

        assert_eq!(result.status, TicketStatus::Queued);
        assert!(result.match_id.is_none());
    }

    #[tokio::test]
    async fn test_pairs_with_oldest_and_assigns_white_to_earlier_ticket() {
        let store = InMemoryStore::new();
        let now = Utc::now();
        let waiting = Ticket::new("alice", now - Duration::seconds(5), ttl());
        let later = Ticket::new("carol", now - Duration::seconds(2), ttl());
        seed(&store, &waiting).await;
        seed(&store, &later).await;

        let newcomer = Ticket::new("bob", now, ttl());
        let mut tx = store.begin().await.unwrap();
        tx.insert_ticket(&newcomer).await.unwrap();
        let paired = PairingService::new(ttl())
            .try_pair(tx.as_mut(), newcomer, now)
            .await
            .unwrap();
        tx.commit().await.unwrap();

        assert_eq!(paired.status, TicketStatus::Matched);
        let match_id = paired.match_id.unwrap();

        let mut tx = store.begin().await.unwrap();
        let record = tx.get_match(match_id).await.unwrap().unwrap();
        let opponent = tx.get_ticket(waiting.id).await.unwrap().unwrap();
        let untouched = tx.get_ticket(later.id).await.unwrap().unwrap();

        assert_eq!(record.white_player_id, "alice");
        assert_eq!(record.black_player_id, "bob");
        assert_eq!(record.color_of("bob"), Some(Color::Black));
        assert_eq!(opponent.status, TicketStatus::Matched);
        assert_eq!(opponent.match_id, Some(match_id));
        assert_eq!(untouched.status, TicketStatus::Queued);
    }

    #[tokio::test]
    async fn test_equal_creation_time_breaks_tie_by_ticket_id() {
        let store = InMemoryStore::new();
        let now = Utc::now();
        let first = Ticket::new("alice", now, ttl());
        let second = Ticket::new("bob", now, ttl());
        seed(&store, &first).await;

        let mut tx = store.begin().await.unwrap();
        tx.insert_ticket(&second).await.unwrap();
        let paired = PairingService::new(ttl())
            .try_pair(tx.as_mut(), second.clone(), now)
            .await
            .unwrap();
        let record = tx.get_match(paired.match_id.unwrap()).await.unwrap().unwrap();
        tx.commit().await.unwrap();

        let expected_white = if first.id < second.id { "alice" } else { "bob" };
        assert_eq!(record.white_player_id, expected_white);
    }

    #[tokio::test]
    async fn test_matched_ticket_is_not_paired_again() {
        let store = InMemoryStore::new();
        let now = Utc::now();
        seed(&store, &Ticket::new("alice", now, ttl())).await;

        let mut ticket = Ticket::new("bob", now, ttl());
        ticket.mark_matched(uuid::Uuid::new_v4(), now, ttl());

        let mut tx = store.begin().await.unwrap();
        let result = PairingService::new(ttl())
            .try_pair(tx.as_mut(), ticket.clone(), now)
            .await
            .unwrap();
        tx.rollback().await.unwrap();

        assert_eq!(result, ticket);
    }
}
