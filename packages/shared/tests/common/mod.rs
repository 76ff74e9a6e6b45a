#![allow(dead_code)]

use std::sync::Arc;

use shared::config::Config;
use shared::repositories::memory_store::InMemoryStore;
use shared::services::match_service::MatchService;
use shared::services::move_validator::MoveValidator;
use shared::services::ticket_service::TicketService;
use uuid::Uuid;

pub fn services() -> (InMemoryStore, TicketService, MatchService) {
    let config = Config::default();
    let store = InMemoryStore::from_config(&config);
    let tickets = TicketService::new(Arc::new(store.clone()), &config);
    let matches = MatchService::new(
        Arc::new(store.clone()),
        MoveValidator::from_config(&config),
    );
    (store, tickets, matches)
}

/// Queues `white` then `black` and returns the match they were paired into.
pub async fn paired_match(tickets: &TicketService, white: &str, black: &str) -> Uuid {
    tickets.enqueue(white).await.unwrap();
    let ticket = tickets.enqueue(black).await.unwrap();
    ticket.match_id.expect("second player should be paired")
}
