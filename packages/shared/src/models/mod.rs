pub mod chess_move;
pub mod game;
pub mod match_record;
pub mod match_state;
pub mod ticket;

pub use chess_move::{Move, MoveRequest};
pub use game::Game;
pub use match_record::{Color, Match, MatchStatus};
pub use match_state::{ConflictReason, MatchState, MoveConflict, MovesPage};
pub use ticket::{Ticket, TicketStatus};
