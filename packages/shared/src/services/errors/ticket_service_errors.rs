use crate::repositories::errors::StoreError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TicketServiceError {
    NotFound,
    Conflict(String),
    ValidationError(String),
    Unavailable(String),
}

impl std::fmt::Display for TicketServiceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TicketServiceError::NotFound => write!(f, "Ticket not found"),
            TicketServiceError::Conflict(msg) => write!(f, "Conflict: {}", msg),
            TicketServiceError::ValidationError(msg) => write!(f, "Validation error: {}", msg),
            TicketServiceError::Unavailable(msg) => write!(f, "Service unavailable: {}", msg),
        }
    }
}

impl std::error::Error for TicketServiceError {}

impl From<StoreError> for TicketServiceError {
    fn from(err: StoreError) -> Self {
        if err.is_constraint_violation() {
            TicketServiceError::Conflict(err.to_string())
        } else {
            TicketServiceError::Unavailable(err.to_string())
        }
    }
}
