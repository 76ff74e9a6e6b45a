#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// A uniqueness constraint rejected a write; carries the constraint name.
    UniqueViolation(String),
    /// A check constraint rejected a write; carries the constraint name.
    CheckViolation(String),
    NotLocked(String),
    LockTimeout(String),
    LockLost(String),
    Serialization(String),
    Unavailable(String),
}

impl StoreError {
    pub fn is_constraint_violation(&self) -> bool {
        matches!(
            self,
            StoreError::UniqueViolation(_) | StoreError::CheckViolation(_)
        )
    }
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::UniqueViolation(constraint) => {
                write!(f, "Unique constraint violated: {}", constraint)
            }
            StoreError::CheckViolation(constraint) => {
                write!(f, "Check constraint violated: {}", constraint)
            }
            StoreError::NotLocked(row) => write!(f, "Row is not locked by this transaction: {}", row),
            StoreError::LockTimeout(row) => write!(f, "Timed out waiting for lock on {}", row),
            StoreError::LockLost(row) => write!(f, "Lock lease lost on {}", row),
            StoreError::Serialization(msg) => write!(f, "Serialization error: {}", msg),
            StoreError::Unavailable(msg) => write!(f, "Store unavailable: {}", msg),
        }
    }
}

impl std::error::Error for StoreError {}
