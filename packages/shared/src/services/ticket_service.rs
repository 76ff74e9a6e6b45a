use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info};
use uuid::Uuid;

use crate::{
    config::Config,
    models::{Ticket, TicketStatus},
    repositories::store::{Store, StoreTransaction},
    services::{
        errors::ticket_service_errors::TicketServiceError,
        pairing_service::PairingService,
        transaction::complete,
    },
};

/// Ticket registry: queue membership, liveness and cancellation. Every
/// operation runs in one store transaction that starts with the expiry sweep.
#[derive(Clone)]
pub struct TicketService {
    store: Arc<dyn Store>,
    pairing: PairingService,
    ticket_ttl: Duration,
}

impl TicketService {
    pub fn new(store: Arc<dyn Store>, config: &Config) -> Self {
        TicketService {
            store,
            pairing: PairingService::new(config.ticket_ttl),
            ticket_ttl: config.ticket_ttl,
        }
    }

    /// Joins the queue, or re-confirms the player's existing ticket.
    pub async fn enqueue(&self, player_id: &str) -> Result<Ticket, TicketServiceError> {
        validate_player_id(player_id)?;
        let now = Utc::now();
        let mut tx = self.store.begin().await?;
        let result = self.enqueue_in(tx.as_mut(), player_id, now).await;
        complete(tx, result).await
    }

    pub async fn heartbeat(
        &self,
        ticket_id: Uuid,
        player_id: &str,
    ) -> Result<Ticket, TicketServiceError> {
        validate_player_id(player_id)?;
        let now = Utc::now();
        let mut tx = self.store.begin().await?;
        let result = self.heartbeat_in(tx.as_mut(), ticket_id, player_id, now).await;
        complete(tx, result).await
    }

    pub async fn cancel(&self, ticket_id: Uuid, player_id: &str) -> Result<Ticket, TicketServiceError> {
        validate_player_id(player_id)?;
        let now = Utc::now();
        let mut tx = self.store.begin().await?;
        let result = self.cancel_in(tx.as_mut(), ticket_id, player_id, now).await;
        complete(tx, result).await
    }

    /// Reads a ticket. With a player given, tickets owned by someone else are
    /// reported as missing.
    pub async fn get(
        &self,
        ticket_id: Uuid,
        player_id: Option<&str>,
    ) -> Result<Ticket, TicketServiceError> {
        let now = Utc::now();
        let mut tx = self.store.begin().await?;
        let result = get_in(tx.as_mut(), ticket_id, player_id, now).await;
        complete(tx, result).await
    }

    async fn enqueue_in(
        &self,
        tx: &mut dyn StoreTransaction,
        player_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Ticket, TicketServiceError> {
        tx.expire_stale_tickets(now).await?;

        let ticket = match tx.lock_active_ticket(player_id).await? {
            Some(existing) if existing.status == TicketStatus::Queued && !existing.is_stale(now) => {
                let mut ticket = existing;
                ticket.refresh(now, self.ticket_ttl);
                tx.update_ticket(&ticket).await?;
                debug!("Re-confirmed ticket {} for player {}", ticket.id, player_id);
                ticket
            }
            Some(existing) if existing.status == TicketStatus::Matched => {
                debug!("Player {} already matched by ticket {}", player_id, existing.id);
                existing
            }
            Some(mut stale) => {
                stale.expire(now);
                tx.update_ticket(&stale).await?;
                self.create_ticket(tx, player_id, now).await?
            }
            None => self.create_ticket(tx, player_id, now).await?,
        };

        Ok(self.pairing.try_pair(tx, ticket, now).await?)
    }

    async fn create_ticket(
        &self,
        tx: &mut dyn StoreTransaction,
        player_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Ticket, TicketServiceError> {
        let ticket = Ticket::new(player_id, now, self.ticket_ttl);
        tx.insert_ticket(&ticket).await?;
        info!("Queued ticket {} for player {}", ticket.id, player_id);
        Ok(ticket)
    }

    async fn heartbeat_in(
        &self,
        tx: &mut dyn StoreTransaction,
        ticket_id: Uuid,
        player_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Ticket, TicketServiceError> {
        tx.expire_stale_tickets(now).await?;
        let mut ticket = lock_owned_ticket(tx, ticket_id, player_id).await?;

        match ticket.status {
            TicketStatus::Cancelled | TicketStatus::Expired => {
                debug!("Heartbeat on {} ticket {}", ticket.status, ticket.id);
                Ok(ticket)
            }
            TicketStatus::Queued if ticket.is_stale(now) => {
                ticket.expire(now);
                tx.update_ticket(&ticket).await?;
                info!("Ticket {} expired before its heartbeat", ticket.id);
                Ok(ticket)
            }
            TicketStatus::Queued | TicketStatus::Matched => {
                ticket.refresh(now, self.ticket_ttl);
                tx.update_ticket(&ticket).await?;
                Ok(self.pairing.try_pair(tx, ticket, now).await?)
            }
        }
    }

    async fn cancel_in(
        &self,
        tx: &mut dyn StoreTransaction,
        ticket_id: Uuid,
        player_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Ticket, TicketServiceError> {
        tx.expire_stale_tickets(now).await?;
        let mut ticket = lock_owned_ticket(tx, ticket_id, player_id).await?;

        match ticket.status {
            TicketStatus::Matched => Err(TicketServiceError::Conflict(format!(
                "Ticket {} is already matched",
                ticket.id
            ))),
            TicketStatus::Cancelled | TicketStatus::Expired => Ok(ticket),
            TicketStatus::Queued => {
                ticket.cancel(now);
                tx.update_ticket(&ticket).await?;
                info!("Cancelled ticket {} for player {}", ticket.id, player_id);
                Ok(ticket)
            }
        }
    }
}

async fn get_in(
    tx: &mut dyn StoreTransaction,
    ticket_id: Uuid,
    player_id: Option<&str>,
    now: DateTime<Utc>,
) -> Result<Ticket, TicketServiceError> {
    tx.expire_stale_tickets(now).await?;
    let ticket = tx
        .get_ticket(ticket_id)
        .await?
        .ok_or(TicketServiceError::NotFound)?;

    match player_id {
        Some(player_id) if !ticket.is_owned_by(player_id) => Err(TicketServiceError::NotFound),
        _ => Ok(ticket),
    }
}

async fn lock_owned_ticket(
    tx: &mut dyn StoreTransaction,
    ticket_id: Uuid,
    player_id: &str,
) -> Result<Ticket, TicketServiceError> {
    match tx.lock_ticket(ticket_id).await? {
        Some(ticket) if ticket.is_owned_by(player_id) => Ok(ticket),
        _ => Err(TicketServiceError::NotFound),
    }
}

fn validate_player_id(player_id: &str) -> Result<(), TicketServiceError> {
    if player_id.trim().is_empty() {
        return Err(TicketServiceError::ValidationError(
            "Player id must not be empty".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repositories::errors::StoreError;
    use crate::repositories::memory_store::InMemoryStore;
    use crate::repositories::store::MockStore;

    fn service() -> (TicketService, InMemoryStore) {
        let store = InMemoryStore::new();
        let service = TicketService::new(Arc::new(store.clone()), &Config::default());
        (service, store)
    }

    #[tokio::test]
    async fn test_enqueue_is_idempotent() {
        let (service, _) = service();

        let first = service.enqueue("alice").await.unwrap();
        let second = service.enqueue("alice").await.unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.status, TicketStatus::Queued);
        assert!(second.expires_at >= first.expires_at);
        assert!(second.heartbeat_at >= first.heartbeat_at);
    }

    #[tokio::test]
    async fn test_two_players_are_paired() {
        let (service, _) = service();

        let alice = service.enqueue("alice").await.unwrap();
        let bob = service.enqueue("bob").await.unwrap();

        assert_eq!(bob.status, TicketStatus::Matched);
        let alice = service.get(alice.id, Some("alice")).await.unwrap();
        assert_eq!(alice.status, TicketStatus::Matched);
        assert_eq!(alice.match_id, bob.match_id);
    }

    #[tokio::test]
    async fn test_enqueue_after_match_returns_matched_ticket() {
        let (service, _) = service();
        service.enqueue("alice").await.unwrap();
        let bob = service.enqueue("bob").await.unwrap();

        let again = service.enqueue("bob").await.unwrap();

        assert_eq!(again.id, bob.id);
        assert_eq!(again.status, TicketStatus::Matched);
    }

    #[tokio::test]
    async fn test_heartbeat_requires_ownership() {
        let (service, _) = service();
        let ticket = service.enqueue("alice").await.unwrap();

        let result = service.heartbeat(ticket.id, "mallory").await;
        assert_eq!(result.unwrap_err(), TicketServiceError::NotFound);

        let missing = service.heartbeat(Uuid::new_v4(), "alice").await;
        assert_eq!(missing.unwrap_err(), TicketServiceError::NotFound);
    }

    #[tokio::test]
    async fn test_cancel_then_heartbeat_is_noop() {
        let (service, _) = service();
        let ticket = service.enqueue("alice").await.unwrap();

        let cancelled = service.cancel(ticket.id, "alice").await.unwrap();
        assert_eq!(cancelled.status, TicketStatus::Cancelled);

        let after = service.heartbeat(ticket.id, "alice").await.unwrap();
        assert_eq!(after, cancelled);

        let retried = service.cancel(ticket.id, "alice").await.unwrap();
        assert_eq!(retried, cancelled);
    }

    #[tokio::test]
    async fn test_cancel_matched_ticket_conflicts() {
        let (service, _) = service();
        service.enqueue("alice").await.unwrap();
        let bob = service.enqueue("bob").await.unwrap();

        let result = service.cancel(bob.id, "bob").await;

        assert!(matches!(result, Err(TicketServiceError::Conflict(_))));
        let unchanged = service.get(bob.id, None).await.unwrap();
        assert_eq!(unchanged.status, TicketStatus::Matched);
    }

    #[tokio::test]
    async fn test_get_hides_other_players_tickets() {
        let (service, _) = service();
        let ticket = service.enqueue("alice").await.unwrap();

        assert_eq!(
            service.get(ticket.id, Some("bob")).await.unwrap_err(),
            TicketServiceError::NotFound
        );
        assert_eq!(service.get(ticket.id, None).await.unwrap().id, ticket.id);
    }

    #[tokio::test]
    async fn test_stale_ticket_is_expired_and_replaced() {
        let (service, store) = service();
        let now = Utc::now();
        let stale = Ticket::new("alice", now - Duration::seconds(40), Duration::seconds(30));
        let mut tx = store.begin().await.unwrap();
        tx.insert_ticket(&stale).await.unwrap();
        tx.commit().await.unwrap();

        let fresh = service.enqueue("alice").await.unwrap();

        assert_ne!(fresh.id, stale.id);
        assert_eq!(fresh.status, TicketStatus::Queued);
        let old = service.get(stale.id, Some("alice")).await.unwrap();
        assert_eq!(old.status, TicketStatus::Expired);
    }

    #[tokio::test]
    async fn test_empty_player_id_is_rejected() {
        let (service, _) = service();

        let result = service.enqueue("  ").await;

        assert!(matches!(result, Err(TicketServiceError::ValidationError(_))));
    }

    #[tokio::test]
    async fn test_store_outage_is_unavailable() {
        let mut store = MockStore::new();
        store
            .expect_begin()
            .returning(|| Err(StoreError::Unavailable("connection refused".to_string())));
        let service = TicketService::new(Arc::new(store), &Config::default());

        let result = service.enqueue("alice").await;

        assert!(matches!(result, Err(TicketServiceError::Unavailable(_))));
    }
}
