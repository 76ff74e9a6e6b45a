pub mod dynamodb_store;
pub mod errors;
pub mod memory_store;
pub mod store;
