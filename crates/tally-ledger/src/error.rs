//! Error types for ledger operations.
//!
//! Every failure mode a caller must handle gets its own variant; none of
//! these are used for control flow inside the engine. A
//! `ConsistencyViolation` means an invariant check failed on data the
//! engine was about to write (or found in the store) and is treated as
//! fatal: the operation aborts and nothing is persisted.

use tally_core::reservation::ReservationError;
use tally_core::{Credits, ReservationId, ReservationStatus};
use tally_store::StoreError;

/// Result type for ledger operations.
pub type Result<T> = std::result::Result<T, LedgerError>;

/// Errors that can occur in ledger operations.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    /// A caller-supplied id, amount, or shape was invalid.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The balance does not cover the requested amount.
    #[error("insufficient credits: balance={balance}, required={required}")]
    InsufficientFunds {
        /// Current balance.
        balance: Credits,
        /// Amount the operation needed.
        required: Credits,
    },

    /// A referenced user or reservation does not exist.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// Entity kind ("user", "reservation", "compensation").
        entity: &'static str,
        /// The missing id, stringified.
        id: String,
    },

    /// The reservation is not in a state that permits the operation.
    #[error("reservation {reservation_id} is {}, cannot {attempted}", .status.as_str())]
    InvalidStateTransition {
        /// The reservation.
        reservation_id: ReservationId,
        /// Its current (terminal) status.
        status: ReservationStatus,
        /// The rejected operation.
        attempted: &'static str,
    },

    /// The amount exceeds a safety ceiling. Rejected before any lock is
    /// taken.
    #[error("amount {amount} exceeds safety limit {limit}")]
    SafetyLimitExceeded {
        /// Requested amount.
        amount: Credits,
        /// The ceiling that applies.
        limit: Credits,
    },

    /// An invariant check failed. Fatal; never silently corrected.
    #[error("ledger consistency violation: {0}")]
    ConsistencyViolation(String),

    /// Storage error.
    #[error("storage error: {0}")]
    Storage(#[from] StoreError),
}

impl From<ReservationError> for LedgerError {
    fn from(err: ReservationError) -> Self {
        match err {
            ReservationError::AmountAboveCeiling { amount, limit } => {
                Self::SafetyLimitExceeded { amount, limit }
            }
            other => Self::InvalidInput(other.to_string()),
        }
    }
}
