//! Settlement records: the reconciliation of a reservation against
//! measured usage.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Credits, ReservationId, SettlementId, UserId};

/// How a settlement resolved relative to its reservation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SettlementType {
    /// Usage fit inside the hold; the difference was refunded.
    Completed,

    /// Usage exceeded the hold; the excess was deducted separately and
    /// nothing was refunded.
    Exceeded,
}

impl SettlementType {
    /// Stable snake_case name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Exceeded => "exceeded",
        }
    }
}

/// Token counts measured for the settled call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageBreakdown {
    /// Input (prompt) units.
    pub input_units: u64,

    /// Output (completion) units.
    pub output_units: u64,
}

/// The reconciliation record produced when a reservation closes normally.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settlement {
    /// Settlement id (ULID).
    pub id: SettlementId,

    /// The reservation this settles.
    pub reservation_id: ReservationId,

    /// Owning user.
    pub user_id: UserId,

    /// Credits that were held.
    pub credits_reserved: Credits,

    /// Credits actually consumed.
    pub actual_credits_used: Credits,

    /// Credits returned to the balance.
    pub credits_refunded: Credits,

    /// Balance before the settlement applied.
    pub balance_before: Credits,

    /// Balance after the settlement applied.
    pub balance_after: Credits,

    /// How the settlement resolved.
    pub settlement_type: SettlementType,

    /// Measured token counts, if reported.
    pub usage: Option<UsageBreakdown>,

    /// Estimator accuracy: `actual / reserved`. 1.0 means the hold was
    /// sized exactly right.
    pub accuracy_ratio: f64,

    /// Wall-clock time the settlement took, in milliseconds.
    pub processing_time_ms: u64,

    /// When the settlement was written.
    pub created_at: DateTime<Utc>,
}

impl Settlement {
    /// Verify the refund invariant: over-consumption refunds nothing,
    /// otherwise the refund is the unused remainder (within tolerance).
    ///
    /// # Errors
    ///
    /// Returns a description of the violation.
    pub fn verify(&self) -> Result<(), String> {
        if self.actual_credits_used > self.credits_reserved {
            if self.credits_refunded != Credits::ZERO {
                return Err(format!(
                    "settlement {}: exceeded reservation but refunded {}",
                    self.id, self.credits_refunded
                ));
            }
        } else {
            let expected = self.credits_reserved - self.actual_credits_used;
            if !self.credits_refunded.approx_eq(expected) {
                return Err(format!(
                    "settlement {}: refunded {} but expected {}",
                    self.id, self.credits_refunded, expected
                ));
            }
        }
        Ok(())
    }
}
