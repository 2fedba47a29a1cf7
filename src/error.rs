use crate::budget::BudgetWarning;
use crate::money::Money;
use crate::state::{Action, ExpenseStatus, Role};
use std::fmt;

#[derive(thiserror::Error, Debug)]
pub enum WorkflowError {
    #[error("Expense request not found: {0}")]
    NotFound(String),
    #[error("Action '{action}' is not permitted for role '{role}' while the request is {status}")]
    InvalidTransition {
        status: ExpenseStatus,
        action: Action,
        role: Role,
    },
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),
    #[error("Budget exceeded in {} categor(ies)", .warnings.len())]
    BudgetExceeded { warnings: Vec<BudgetWarning> },
    #[error("Request {request_id} was modified concurrently: {conflict}")]
    ConcurrentModification { request_id: String, conflict: Conflict },
    #[error("Record invariant violated: {0}")]
    InvariantViolation(String),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Storage error: {0}")]
    Storage(#[from] sled::Error),
    #[error("Failed to encode record: {0}")]
    Encode(String),
    #[error("Failed to decode record: {0}")]
    Decode(#[from] minicbor::decode::Error),
}

/// What changed between reading a request and writing it back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Conflict {
    Version { expected: u64, found: u64 },
    /// Same version, but the caller's copy of the record differs from the stored one.
    Snapshot { version: u64 },
    Ledger {
        category_id: String,
        expected_used: Money,
        found_used: Money,
    },
    Allocation {
        category_id: String,
        expected_allocated: Money,
        found_allocated: Money,
    },
}

pub type WorkflowResult<T> = Result<T, WorkflowError>;

impl WorkflowError {
    /// Only optimistic-concurrency conflicts are worth retrying after a re-read.
    pub fn is_retryable(&self) -> bool {
        matches!(self, WorkflowError::ConcurrentModification { .. })
    }

    pub(crate) fn encode<E: fmt::Display>(err: E) -> Self {
        WorkflowError::Encode(err.to_string())
    }
}

impl fmt::Display for Conflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Conflict::Version { expected, found } => {
                write!(f, "expected version {}, found {}", expected, found)
            }
            Conflict::Snapshot { version } => {
                write!(f, "stored record at version {} differs from the one supplied", version)
            }
            Conflict::Ledger {
                category_id,
                expected_used,
                found_used,
            } => write!(
                f,
                "budget category {} usage moved from {} to {}",
                category_id, expected_used, found_used
            ),
            Conflict::Allocation {
                category_id,
                expected_allocated,
                found_allocated,
            } => write!(
                f,
                "budget category {} allocation moved from {} to {}",
                category_id, expected_allocated, found_allocated
            ),
        }
    }
}
