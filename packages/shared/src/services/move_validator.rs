use chess::Square;
use std::str::FromStr;

use crate::{
    config::{Config, DEFAULT_PROMOTION_PIECES},
    services::errors::match_service_errors::MatchServiceError,
};

/// A move in coordinate notation that passed the syntax check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedMove {
    /// Lowercase form, as stored in the ledger.
    pub text: String,
}

/// Syntax check for submitted moves: origin square, destination square and
/// an optional promotion letter. Legality on the board is not checked.
#[derive(Debug, Clone)]
pub struct MoveValidator {
    promotion_pieces: Vec<char>,
}

impl Default for MoveValidator {
    fn default() -> Self {
        MoveValidator::new(DEFAULT_PROMOTION_PIECES.chars().collect())
    }
}

impl MoveValidator {
    pub fn new(promotion_pieces: Vec<char>) -> Self {
        MoveValidator {
            promotion_pieces: promotion_pieces
                .into_iter()
                .map(|c| c.to_ascii_lowercase())
                .filter(|c| DEFAULT_PROMOTION_PIECES.contains(*c))
                .collect(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        MoveValidator::new(config.promotion_pieces.clone())
    }

    pub fn parse(&self, move_text: &str) -> Result<ParsedMove, MatchServiceError> {
        if !move_text.is_ascii() || !(4..=5).contains(&move_text.len()) {
            return Err(invalid(move_text, "expected four or five characters"));
        }

        parse_square(&move_text[0..2]).ok_or_else(|| invalid(move_text, "invalid origin square"))?;
        parse_square(&move_text[2..4])
            .ok_or_else(|| invalid(move_text, "invalid destination square"))?;

        if let Some(letter) = move_text[4..].chars().next() {
            if !self.promotion_pieces.contains(&letter.to_ascii_lowercase()) {
                return Err(invalid(move_text, "invalid promotion piece"));
            }
        }

        Ok(ParsedMove {
            text: move_text.to_ascii_lowercase(),
        })
    }
}

// Square::from_str only looks at the first two characters, so callers pass exact slices.
fn parse_square(text: &str) -> Option<Square> {
    let bytes = text.as_bytes();
    if bytes.len() != 2 || !bytes[0].is_ascii_lowercase() {
        return None;
    }
    Square::from_str(text).ok()
}

fn invalid(move_text: &str, reason: &str) -> MatchServiceError {
    MatchServiceError::InvalidMove(format!("'{}': {}", move_text, reason))
}
