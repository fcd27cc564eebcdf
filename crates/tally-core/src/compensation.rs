//! Compensation requests: queued refunds for failed operations that
//! already deducted credits and are not backed by an active reservation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{CompensationId, Credits, RelatedEntity, UserId};

/// Lifecycle state of a compensation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompensationStatus {
    /// Queued, awaiting the batch processor.
    Pending,

    /// Refund applied (terminal).
    Processed,

    /// Refund could not be applied (terminal).
    Failed,
}

impl CompensationStatus {
    /// Whether the state permits no further transitions.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

/// A queued refund request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreditCompensation {
    /// Compensation id (ULID, time-ordered: pending requests are
    /// processed oldest first).
    pub id: CompensationId,

    /// User to refund.
    pub user_id: UserId,

    /// Credits to return.
    pub credits: Credits,

    /// Why the refund is owed.
    pub reason: String,

    /// The failed operation that triggered this, if known.
    pub related: Option<RelatedEntity>,

    /// Lifecycle state.
    pub status: CompensationStatus,

    /// When the request was queued.
    pub created_at: DateTime<Utc>,

    /// When the request reached a terminal state.
    pub processed_at: Option<DateTime<Utc>>,

    /// Failure detail when `status == Failed`.
    pub error: Option<String>,
}

impl CreditCompensation {
    /// Queue a new pending compensation.
    #[must_use]
    pub fn new(
        user_id: UserId,
        credits: Credits,
        reason: String,
        related: Option<RelatedEntity>,
    ) -> Self {
        Self {
            id: CompensationId::generate(),
            user_id,
            credits,
            reason,
            related,
            status: CompensationStatus::Pending,
            created_at: Utc::now(),
            processed_at: None,
            error: None,
        }
    }

    /// Mark the refund applied.
    pub fn mark_processed(&mut self) {
        self.status = CompensationStatus::Processed;
        self.processed_at = Some(Utc::now());
        self.error = None;
    }

    /// Mark the refund failed.
    pub fn mark_failed(&mut self, error: String) {
        self.status = CompensationStatus::Failed;
        self.processed_at = Some(Utc::now());
        self.error = Some(error);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_compensation_is_pending() {
        let c = CreditCompensation::new(
            UserId::generate(),
            Credits::from_whole(10),
            "stream failed after deduct".into(),
            None,
        );
        assert_eq!(c.status, CompensationStatus::Pending);
        assert!(!c.status.is_terminal());
        assert!(c.processed_at.is_none());
    }

    #[test]
    fn terminal_transitions() {
        let mut c = CreditCompensation::new(
            UserId::generate(),
            Credits::from_whole(10),
            "test".into(),
            None,
        );

        c.mark_processed();
        assert_eq!(c.status, CompensationStatus::Processed);
        assert!(c.status.is_terminal());
        assert!(c.processed_at.is_some());

        let mut f = CreditCompensation::new(
            UserId::generate(),
            Credits::from_whole(10),
            "test".into(),
            None,
        );
        f.mark_failed("account missing".into());
        assert_eq!(f.status, CompensationStatus::Failed);
        assert_eq!(f.error.as_deref(), Some("account missing"));
    }
}
