mod common;

use std::collections::{HashMap, HashSet};

use chrono::{Duration, Utc};
use shared::models::{Ticket, TicketStatus};
use shared::repositories::store::Store;
use shared::services::errors::ticket_service_errors::TicketServiceError;

use common::*;

/// A ticket whose last heartbeat is older than the TTL is swept on the next read
#[tokio::test]
async fn test_abandoned_ticket_expires() {
    let (store, tickets, _) = services();
    let now = Utc::now();

    // 1) Seed a ticket heartbeated 40 seconds ago with a 30 second TTL
    let mut stale = Ticket::new("alice", now - Duration::seconds(40), Duration::seconds(30));
    stale.heartbeat_at = now - Duration::seconds(40);
    let mut tx = store.begin().await.unwrap();
    tx.insert_ticket(&stale).await.unwrap();
    tx.commit().await.unwrap();

    // 2) Any registry operation runs the sweep first
    let swept = tickets.get(stale.id, Some("alice")).await.unwrap();
    assert_eq!(swept.status, TicketStatus::Expired);

    // 3) An expired ticket is never offered to other players
    let bob = tickets.enqueue("bob").await.unwrap();
    assert_eq!(bob.status, TicketStatus::Queued);
}

/// Cancelling a matched ticket is rejected and leaves it matched
#[tokio::test]
async fn test_cancel_matched_ticket_conflicts() {
    let (_, tickets, _) = services();

    let alice = tickets.enqueue("alice").await.unwrap();
    tickets.enqueue("bob").await.unwrap();

    let result = tickets.cancel(alice.id, "alice").await;
    assert!(
        matches!(result, Err(TicketServiceError::Conflict(_))),
        "Expected conflict, got {:?}",
        result
    );

    let unchanged = tickets.get(alice.id, Some("alice")).await.unwrap();
    assert_eq!(unchanged.status, TicketStatus::Matched);
}

/// Players never end up paired with themselves
#[tokio::test]
async fn test_repeated_enqueue_never_self_pairs() {
    let (_, tickets, _) = services();

    for _ in 0..5 {
        let ticket = tickets.enqueue("alice").await.unwrap();
        assert_eq!(ticket.status, TicketStatus::Queued);
        assert!(ticket.match_id.is_none());
    }
}

/// Many players joining at once are matched into disjoint pairs
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_enqueue_forms_disjoint_pairs() {
    let (store, tickets, _) = services();
    let players: Vec<String> = (0..20).map(|i| format!("player-{}", i)).collect();

    // 1) Everyone enqueues at the same time
    let handles: Vec<_> = players
        .iter()
        .cloned()
        .map(|player| {
            let tickets = tickets.clone();
            tokio::spawn(async move { tickets.enqueue(&player).await })
        })
        .collect();
    let mut ticket_ids = Vec::new();
    for handle in handles {
        ticket_ids.push(handle.await.unwrap().unwrap().id);
    }

    // 2) Skipped candidates get paired on their next heartbeat
    for (player, ticket_id) in players.iter().zip(&ticket_ids) {
        tickets.heartbeat(*ticket_id, player).await.unwrap();
    }

    // 3) Every match holds exactly two distinct players, each in one match
    let mut by_match: HashMap<uuid::Uuid, Vec<String>> = HashMap::new();
    for (player, ticket_id) in players.iter().zip(&ticket_ids) {
        let ticket = tickets.get(*ticket_id, Some(player)).await.unwrap();
        assert_eq!(ticket.status, TicketStatus::Matched, "{} left unmatched", player);
        by_match
            .entry(ticket.match_id.unwrap())
            .or_default()
            .push(player.clone());
    }
    assert_eq!(by_match.len(), players.len() / 2);

    let mut tx = store.begin().await.unwrap();
    for (match_id, members) in &by_match {
        assert_eq!(members.len(), 2);
        let record = tx.get_match(*match_id).await.unwrap().unwrap();
        let seated: HashSet<&str> = [
            record.white_player_id.as_str(),
            record.black_player_id.as_str(),
        ]
        .into_iter()
        .collect();
        let expected: HashSet<&str> = members.iter().map(String::as_str).collect();
        assert_eq!(seated, expected);
    }
    tx.rollback().await.unwrap();
}

/// Concurrent enqueues and heartbeats from one player share a single ticket
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_calls_from_one_player_keep_one_ticket() {
    let (store, tickets, _) = services();
    let first = tickets.enqueue("alice").await.unwrap();

    // 1) Interleave enqueues and heartbeats from the same player
    let handles: Vec<_> = (0..16)
        .map(|i| {
            let tickets = tickets.clone();
            let ticket_id = first.id;
            tokio::spawn(async move {
                if i % 2 == 0 {
                    tickets.enqueue("alice").await
                } else {
                    tickets.heartbeat(ticket_id, "alice").await
                }
            })
        })
        .collect();

    // 2) Every call answers with the same queued ticket
    let mut ids = HashSet::new();
    for handle in handles {
        let ticket = handle.await.unwrap().unwrap();
        assert_eq!(ticket.status, TicketStatus::Queued);
        ids.insert(ticket.id);
    }
    assert_eq!(ids, HashSet::from([first.id]));

    // 3) The store holds exactly that one active ticket for the player
    let mut tx = store.begin().await.unwrap();
    let active = tx.lock_active_ticket("alice").await.unwrap();
    assert_eq!(active.map(|ticket| ticket.id), Some(first.id));
    tx.rollback().await.unwrap();
}

/// The player who queued first gets the white pieces
#[tokio::test]
async fn test_earlier_ticket_plays_white() {
    let (_, tickets, matches) = services();

    let match_id = paired_match(&tickets, "early", "late").await;

    let state = matches.get_match_state(match_id, Some("late")).await.unwrap();
    assert_eq!(state.white_player_id, "early");
    assert_eq!(state.black_player_id, "late");
}
