pub mod errors;
pub mod match_service;
pub mod move_validator;
pub mod pairing_service;
pub mod ticket_service;

mod transaction;
