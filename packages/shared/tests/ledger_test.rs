mod common;

use shared::models::{Color, ConflictReason};
use shared::services::errors::match_service_errors::MatchServiceError;

use common::*;

/// Accept the opening move, then reject a replay of the same ply with the current state
#[tokio::test]
async fn test_resubmitted_ply_conflicts_with_state() {
    let (_, tickets, matches) = services();
    let match_id = paired_match(&tickets, "white", "black").await;

    // 1) White opens
    let mv = matches
        .submit_move(match_id, "white", 1, "e2e4")
        .await
        .unwrap();
    assert_eq!(mv.ply, 1);
    assert_eq!(mv.move_text, "e2e4");

    // 2) White tries ply 1 again with a different move
    let result = matches.submit_move(match_id, "white", 1, "d2d4").await;
    let conflict = match result {
        Err(MatchServiceError::Conflict(conflict)) => conflict,
        other => panic!("Expected conflict, got {:?}", other),
    };
    assert_eq!(conflict.state.latest_ply, 1);
    assert_eq!(conflict.state.next_turn, Color::Black);
    assert_eq!(conflict.state.moves.len(), 1);
    assert_eq!(conflict.state.moves[0].move_text, "e2e4");
}

/// Plies stay contiguous and turns alternate over a full opening
#[tokio::test]
async fn test_ledger_is_contiguous() {
    let (_, tickets, matches) = services();
    let match_id = paired_match(&tickets, "white", "black").await;
    let opening = ["e2e4", "e7e5", "g1f3", "b8c6", "f1b5", "a7a6"];

    for (i, text) in opening.iter().enumerate() {
        let ply = i as u32 + 1;
        let player = if ply % 2 == 1 { "white" } else { "black" };
        matches.submit_move(match_id, player, ply, text).await.unwrap();
    }

    let page = matches.get_moves(match_id, 0, Some("white")).await.unwrap();
    let plies: Vec<u32> = page.moves.iter().map(|mv| mv.ply).collect();
    assert_eq!(plies, (1..=6).collect::<Vec<u32>>());
    assert_eq!(page.next_turn, Color::White);

    let tail = matches.get_moves(match_id, 6, None).await.unwrap();
    assert!(tail.moves.is_empty());
    assert_eq!(tail.latest_ply, 6);
}

/// Two submissions racing for the same ply: exactly one is recorded
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_racing_submissions_accept_exactly_one() {
    let (_, tickets, matches) = services();
    let match_id = paired_match(&tickets, "white", "black").await;

    let handles: Vec<_> = ["e2e4", "d2d4"]
        .into_iter()
        .map(|text| {
            let matches = matches.clone();
            tokio::spawn(async move { matches.submit_move(match_id, "white", 1, text).await })
        })
        .collect();

    let mut accepted = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => accepted += 1,
            Err(MatchServiceError::Conflict(conflict)) => {
                assert!(matches!(
                    conflict.reason,
                    ConflictReason::PlyTaken { ply: 1 } | ConflictReason::NotYourTurn { .. }
                ));
                assert_eq!(conflict.state.latest_ply, 1);
            }
            Err(other) => panic!("Unexpected error {:?}", other),
        }
    }
    assert_eq!(accepted, 1);

    let state = matches.get_match_state(match_id, None).await.unwrap();
    assert_eq!(state.latest_ply, 1);
}

/// Wrong-colour submissions leave the ledger unchanged
#[tokio::test]
async fn test_wrong_colour_leaves_ledger_unchanged() {
    let (_, tickets, matches) = services();
    let match_id = paired_match(&tickets, "white", "black").await;

    let result = matches.submit_move(match_id, "black", 1, "e7e5").await;
    assert!(matches!(result, Err(MatchServiceError::Conflict(_))));

    let state = matches.get_match_state(match_id, Some("black")).await.unwrap();
    assert_eq!(state.latest_ply, 0);
    assert_eq!(state.your_color, Some(Color::Black));
}
