//! Credit reservations: provisional holds placed before true cost is known.
//!
//! A reservation debits the balance immediately (a pessimistic hold) and is
//! later settled against measured usage, cancelled by the caller, or expired
//! by the cleanup sweeper. `active` is the only non-terminal state.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::{Credits, ReservationId, UserId};

/// Maximum reservation lifetime.
pub const MAX_TTL_MINUTES: i64 = 60;

/// Default reservation lifetime when the caller does not override it.
pub const DEFAULT_TTL_MINUTES: i64 = 15;

/// Schema version for [`ReservationContext`].
pub const CONTEXT_SCHEMA_VERSION: u32 = 1;

/// Lifecycle state of a reservation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReservationStatus {
    /// Hold is live; the only state that permits transitions.
    Active,

    /// Reconciled against actual usage (terminal).
    Settled,

    /// TTL elapsed; hold returned by the sweeper (terminal).
    Expired,

    /// Explicitly released by the caller (terminal).
    Cancelled,
}

impl ReservationStatus {
    /// Whether the state permits no further transitions.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        !matches!(self, Self::Active)
    }

    /// Stable snake_case name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Settled => "settled",
            Self::Expired => "expired",
            Self::Cancelled => "cancelled",
        }
    }
}

/// What kind of caller placed the hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReservationType {
    /// Streaming model invocation reporting incremental usage.
    Streaming,

    /// Batch/background invocation.
    Batch,

    /// Operator-initiated hold.
    Manual,
}

/// Structured reservation context.
///
/// Versioned key-value shape rather than a free-form blob, so invariant
/// checks and support tooling can rely on the fields. Schema per type:
///
/// - `streaming`/`batch`: `model` and `provider` set, estimated unit
///   counts set from the pre-flight estimate.
/// - `manual`: `model`/`provider` usually absent; `extra` carries the
///   operator's annotations.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationContext {
    /// Context schema version (currently [`CONTEXT_SCHEMA_VERSION`]).
    pub schema_version: u32,

    /// Model the hold was sized for.
    pub model: Option<String>,

    /// Provider the hold was sized for.
    pub provider: Option<String>,

    /// Estimated input units (tokens) from the pre-flight estimate.
    pub estimated_input_units: Option<u64>,

    /// Estimated output units (tokens) from the pre-flight estimate.
    pub estimated_output_units: Option<u64>,

    /// Caller metadata (request id, session id, ...).
    pub extra: BTreeMap<String, String>,
}

impl ReservationContext {
    /// Context for a model invocation.
    #[must_use]
    pub fn for_model(
        provider: impl Into<String>,
        model: impl Into<String>,
        estimated_input_units: u64,
        estimated_output_units: u64,
    ) -> Self {
        Self {
            schema_version: CONTEXT_SCHEMA_VERSION,
            model: Some(model.into()),
            provider: Some(provider.into()),
            estimated_input_units: Some(estimated_input_units),
            estimated_output_units: Some(estimated_output_units),
            extra: BTreeMap::new(),
        }
    }
}

/// Validation failures when constructing a reservation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReservationError {
    /// The hold amount must be strictly positive.
    #[error("reservation amount must be positive, got {0}")]
    NonPositiveAmount(Credits),

    /// The hold amount exceeds the reservation safety ceiling.
    #[error("reservation amount {amount} exceeds ceiling {limit}")]
    AmountAboveCeiling {
        /// Requested amount.
        amount: Credits,
        /// The ceiling.
        limit: Credits,
    },

    /// `expires_at` must be strictly in the future at creation.
    #[error("reservation expiry {expires_at} is not in the future")]
    ExpiryNotFuture {
        /// The rejected expiry.
        expires_at: DateTime<Utc>,
    },

    /// `expires_at` is beyond the maximum TTL.
    #[error("reservation expiry {expires_at} is more than {MAX_TTL_MINUTES} minutes out")]
    ExpiryTooFar {
        /// The rejected expiry.
        expires_at: DateTime<Utc>,
    },
}

/// A provisional hold against a user's balance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reservation {
    /// Reservation id (ULID, time-ordered).
    pub id: ReservationId,

    /// Owning user.
    pub user_id: UserId,

    /// Conversation correlation id, if the caller supplied one.
    pub conversation_id: Option<String>,

    /// Message correlation id, if the caller supplied one.
    pub message_id: Option<String>,

    /// Credits held.
    pub credits_reserved: Credits,

    /// Lifecycle state.
    pub status: ReservationStatus,

    /// What kind of caller placed the hold.
    pub reservation_type: ReservationType,

    /// Structured context.
    pub context: ReservationContext,

    /// When the hold lapses if not settled or cancelled.
    pub expires_at: DateTime<Utc>,

    /// When the hold was placed.
    pub created_at: DateTime<Utc>,

    /// When the hold was settled (set iff `status == Settled`).
    pub settled_at: Option<DateTime<Utc>>,

    /// Measured usage at settlement (set iff `status == Settled`;
    /// an `Expired` reservation never carries this).
    pub actual_credits_used: Option<Credits>,

    /// Why the hold closed abnormally, for cancelled/expired holds.
    pub error_reason: Option<String>,
}

impl Reservation {
    /// Create a new active reservation, validating the hold amount and
    /// the expiry window against `now`.
    ///
    /// # Errors
    ///
    /// Returns [`ReservationError`] if the amount is non-positive or above
    /// the ceiling, or if `expires_at` is not strictly between `now` and
    /// `now + MAX_TTL_MINUTES`.
    pub fn new(
        user_id: UserId,
        credits_reserved: Credits,
        reservation_type: ReservationType,
        context: ReservationContext,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Self, ReservationError> {
        if !credits_reserved.is_positive() {
            return Err(ReservationError::NonPositiveAmount(credits_reserved));
        }
        if credits_reserved > Credits::MAX_RESERVATION {
            return Err(ReservationError::AmountAboveCeiling {
                amount: credits_reserved,
                limit: Credits::MAX_RESERVATION,
            });
        }
        if expires_at <= now {
            return Err(ReservationError::ExpiryNotFuture { expires_at });
        }
        if expires_at > now + Duration::minutes(MAX_TTL_MINUTES) {
            return Err(ReservationError::ExpiryTooFar { expires_at });
        }

        Ok(Self {
            id: ReservationId::generate(),
            user_id,
            conversation_id: None,
            message_id: None,
            credits_reserved,
            status: ReservationStatus::Active,
            reservation_type,
            context,
            expires_at,
            created_at: now,
            settled_at: None,
            actual_credits_used: None,
            error_reason: None,
        })
    }

    /// Attach conversation/message correlation ids.
    #[must_use]
    pub fn with_correlation(
        mut self,
        conversation_id: Option<String>,
        message_id: Option<String>,
    ) -> Self {
        self.conversation_id = conversation_id;
        self.message_id = message_id;
        self
    }

    /// Whether the hold has lapsed as of `now`.
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    /// Whether the hold is still live.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.status == ReservationStatus::Active
    }
}
