//! The append-only audit log.
//!
//! Every balance mutation produces exactly one [`AuditEntry`] written in
//! the same atomic commit as the balance itself. The log is the durable
//! contract for reconstructing balance history: for each entry,
//! `balance_after` must equal `balance_before` shifted by
//! `credits_amount` in the direction its operation dictates.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{CompensationId, Credits, EntryId, RecordId, ReservationId, UserId};

/// The kind of balance mutation an audit entry records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditOperation {
    /// Direct charge against the balance.
    Deduct,

    /// Compensation or corrective refund.
    Refund,

    /// Periodic allowance refresh.
    Refresh,

    /// Credit purchase.
    Purchase,

    /// Manual adjustment.
    Adjustment,

    /// Pessimistic hold placed for a reservation (debits the balance).
    Reserve,

    /// Reservation settled; amount is the refunded portion of the hold.
    Settle,

    /// Reservation cancelled; the full hold is returned.
    ///
    /// Cancel is credit-side while reserve is debit-side. The asymmetry
    /// is intentional and matches the audited history format.
    Cancel,

    /// Reservation expired; the full hold is returned by the sweeper.
    Expire,
}

impl AuditOperation {
    /// Whether this operation adds credits to the balance.
    #[must_use]
    pub const fn is_credit(&self) -> bool {
        matches!(
            self,
            Self::Refund
                | Self::Refresh
                | Self::Purchase
                | Self::Adjustment
                | Self::Settle
                | Self::Cancel
                | Self::Expire
        )
    }

    /// Whether this operation removes credits from the balance.
    #[must_use]
    pub const fn is_debit(&self) -> bool {
        matches!(self, Self::Deduct | Self::Reserve)
    }

    /// Stable snake_case name, as persisted.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Deduct => "deduct",
            Self::Refund => "refund",
            Self::Refresh => "refresh",
            Self::Purchase => "purchase",
            Self::Adjustment => "adjustment",
            Self::Reserve => "reserve",
            Self::Settle => "settle",
            Self::Cancel => "cancel",
            Self::Expire => "expire",
        }
    }
}

/// Reference to the record that caused a balance mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelatedEntity {
    /// Entity kind ("reservation", "compensation", "usage_record", ...).
    pub kind: String,

    /// Entity id, stringified.
    pub id: String,
}

impl RelatedEntity {
    /// Reference a reservation.
    #[must_use]
    pub fn reservation(id: ReservationId) -> Self {
        Self {
            kind: "reservation".to_string(),
            id: id.to_string(),
        }
    }

    /// Reference a compensation request.
    #[must_use]
    pub fn compensation(id: CompensationId) -> Self {
        Self {
            kind: "compensation".to_string(),
            id: id.to_string(),
        }
    }

    /// Reference a usage record.
    #[must_use]
    pub fn usage_record(id: RecordId) -> Self {
        Self {
            kind: "usage_record".to_string(),
            id: id.to_string(),
        }
    }
}

/// Request provenance carried on audit entries for support tooling.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestProvenance {
    /// Caller IP address, if known.
    pub ip: Option<String>,

    /// Caller user agent, if known.
    pub user_agent: Option<String>,
}

/// One immutable record of a balance mutation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Entry id (ULID, time-ordered).
    pub id: EntryId,

    /// The user whose balance changed.
    pub user_id: UserId,

    /// What kind of mutation this was.
    pub operation: AuditOperation,

    /// Magnitude of the change. Always non-negative; the direction comes
    /// from the operation's sign rule.
    pub credits_amount: Credits,

    /// Balance before the mutation.
    pub balance_before: Credits,

    /// Balance after the mutation.
    pub balance_after: Credits,

    /// The record that caused the mutation, if any.
    pub related: Option<RelatedEntity>,

    /// Human-readable reason.
    pub reason: String,

    /// Structured context (model, provider, caller metadata).
    pub metadata: BTreeMap<String, String>,

    /// Request provenance, if supplied by the caller.
    pub provenance: Option<RequestProvenance>,

    /// When the entry was created.
    pub created_at: DateTime<Utc>,
}

impl AuditEntry {
    /// Build an entry for the given mutation, computing nothing: the
    /// caller supplies both balances and the entry records them as-is.
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        user_id: UserId,
        operation: AuditOperation,
        credits_amount: Credits,
        balance_before: Credits,
        balance_after: Credits,
        related: Option<RelatedEntity>,
        reason: String,
    ) -> Self {
        Self {
            id: EntryId::generate(),
            user_id,
            operation,
            credits_amount,
            balance_before,
            balance_after,
            related,
            reason,
            metadata: BTreeMap::new(),
            provenance: None,
            created_at: Utc::now(),
        }
    }

    /// Attach structured metadata.
    #[must_use]
    pub fn with_metadata(mut self, metadata: BTreeMap<String, String>) -> Self {
        self.metadata = metadata;
        self
    }

    /// Attach request provenance.
    #[must_use]
    pub fn with_provenance(mut self, provenance: RequestProvenance) -> Self {
        self.provenance = Some(provenance);
        self
    }

    /// The balance `balance_before` should become under this entry's
    /// operation sign rule.
    #[must_use]
    pub fn expected_balance_after(&self) -> Credits {
        if self.operation.is_debit() {
            self.balance_before - self.credits_amount
        } else {
            self.balance_before + self.credits_amount
        }
    }

    /// Verify the sign-rule invariant.
    ///
    /// A mismatch is a data-corruption signal: the engine refuses to
    /// commit an entry that fails this check.
    ///
    /// # Errors
    ///
    /// Returns a description of the mismatch.
    pub fn verify(&self) -> Result<(), String> {
        if self.credits_amount.is_negative() {
            return Err(format!(
                "audit entry {} has negative amount {}",
                self.id, self.credits_amount
            ));
        }
        let expected = self.expected_balance_after();
        if self.balance_after != expected {
            return Err(format!(
                "audit entry {} ({}): balance_after {} != expected {} (before {}, amount {})",
                self.id,
                self.operation.as_str(),
                self.balance_after,
                expected,
                self.balance_before,
                self.credits_amount
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_rule() {
        assert!(AuditOperation::Deduct.is_debit());
        assert!(AuditOperation::Reserve.is_debit());

        assert!(AuditOperation::Refund.is_credit());
        assert!(AuditOperation::Refresh.is_credit());
        assert!(AuditOperation::Purchase.is_credit());
        assert!(AuditOperation::Adjustment.is_credit());
        assert!(AuditOperation::Settle.is_credit());
        assert!(AuditOperation::Cancel.is_credit());
        assert!(AuditOperation::Expire.is_credit());

        assert!(!AuditOperation::Cancel.is_debit());
    }

    #[test]
    fn verify_accepts_consistent_debit() {
        let entry = AuditEntry::new(
            UserId::generate(),
            AuditOperation::Deduct,
            Credits::from_whole(250),
            Credits::from_whole(1_000),
            Credits::from_whole(750),
            None,
            "chat usage".into(),
        );
        assert!(entry.verify().is_ok());
    }

    #[test]
    fn verify_accepts_consistent_credit() {
        let entry = AuditEntry::new(
            UserId::generate(),
            AuditOperation::Cancel,
            Credits::from_whole(50),
            Credits::from_whole(950),
            Credits::from_whole(1_000),
            None,
            "caller abort".into(),
        );
        assert!(entry.verify().is_ok());
    }

    #[test]
    fn verify_rejects_mismatched_balance() {
        let entry = AuditEntry::new(
            UserId::generate(),
            AuditOperation::Deduct,
            Credits::from_whole(250),
            Credits::from_whole(1_000),
            Credits::from_whole(800),
            None,
            "bad math".into(),
        );
        assert!(entry.verify().is_err());
    }

    #[test]
    fn verify_rejects_negative_amount() {
        let entry = AuditEntry::new(
            UserId::generate(),
            AuditOperation::Refund,
            Credits::from_whole(-5),
            Credits::from_whole(100),
            Credits::from_whole(95),
            None,
            "negative".into(),
        );
        assert!(entry.verify().is_err());
    }

    #[test]
    fn operation_names_are_stable() {
        assert_eq!(AuditOperation::Reserve.as_str(), "reserve");
        assert_eq!(AuditOperation::Expire.as_str(), "expire");
    }
}
