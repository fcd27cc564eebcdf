//! `RocksDB` storage layer for the tally credit ledger.
//!
//! The store is deliberately dumb: the ledger engine computes new row
//! states under its per-user locks and hands them here, and the store's
//! only job is to persist each group of rows **atomically** (one
//! `WriteBatch`) so a balance change and its audit entry can never be
//! observed apart.
//!
//! # Column families
//!
//! - `users`: account records, keyed by `user_id`
//! - `audit_log` + `audit_by_user`: append-only audit trail and per-user
//!   index
//! - `reservations` + `reservations_by_expiry`: holds and the
//!   expiry-ordered index the cleanup sweep scans
//! - `settlements`: reconciliation records
//! - `compensations` + `compensations_pending`: refund queue
//! - `usage_records` + `usage_by_user`: per-call usage rows
//! - `pricing`: versioned pricing rows

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod keys;
pub mod rocks;
pub mod schema;

pub use error::{Result, StoreError};
pub use rocks::RocksStore;

use chrono::{DateTime, Utc};

use tally_core::{
    AuditEntry, CompensationId, CreditCompensation, EntryId, ModelKey, PricingEntry, RecordId,
    Reservation, ReservationId, Settlement, SettlementId, UsageRecord, UsageStats, UserAccount,
    UserId,
};

/// The storage trait defining all database operations.
///
/// Abstracting the backend keeps the engine testable against alternative
/// implementations; [`RocksStore`] is the production one.
pub trait Store: Send + Sync {
    // =========================================================================
    // Accounts
    // =========================================================================

    /// Insert or update an account record.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn put_account(&self, account: &UserAccount) -> Result<()>;

    /// Get an account by user id.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_account(&self, user_id: &UserId) -> Result<Option<UserAccount>>;

    // =========================================================================
    // Audit trail
    // =========================================================================

    /// Get an audit entry by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_audit_entry(&self, entry_id: &EntryId) -> Result<Option<AuditEntry>>;

    /// List a user's audit entries, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_audit_by_user(
        &self,
        user_id: &UserId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<AuditEntry>>;

    // =========================================================================
    // Reservations
    // =========================================================================

    /// Get a reservation by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_reservation(&self, reservation_id: &ReservationId) -> Result<Option<Reservation>>;

    /// List still-open reservations whose expiry is at or before `cutoff`,
    /// oldest expiry first, up to `limit`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_expired_reservations(
        &self,
        cutoff: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Reservation>>;

    // =========================================================================
    // Settlements
    // =========================================================================

    /// Get a settlement by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_settlement(&self, settlement_id: &SettlementId) -> Result<Option<Settlement>>;

    // =========================================================================
    // Compensations
    // =========================================================================

    /// Insert or update a compensation request, maintaining the pending
    /// index.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn put_compensation(&self, compensation: &CreditCompensation) -> Result<()>;

    /// Get a compensation request by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_compensation(
        &self,
        compensation_id: &CompensationId,
    ) -> Result<Option<CreditCompensation>>;

    /// List pending compensation requests, oldest first, up to `limit`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_pending_compensations(&self, limit: usize) -> Result<Vec<CreditCompensation>>;

    // =========================================================================
    // Usage records
    // =========================================================================

    /// Insert a usage record and its user index entry.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn put_usage_record(&self, record: &UsageRecord) -> Result<()>;

    /// Get a usage record by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_usage_record(&self, record_id: &RecordId) -> Result<Option<UsageRecord>>;

    /// List a user's usage records, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_usage_by_user(
        &self,
        user_id: &UserId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<UsageRecord>>;

    /// Aggregate a user's usage records.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn usage_stats(&self, user_id: &UserId) -> Result<UsageStats>;

    // =========================================================================
    // Pricing
    // =========================================================================

    /// Get the versioned pricing rows for a model.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_pricing_entries(&self, key: &ModelKey) -> Result<Vec<PricingEntry>>;

    /// Replace the versioned pricing rows for a model.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::InvalidPricing` if any entry violates the
    /// effective/deprecated ordering invariant.
    fn put_pricing_entries(&self, key: &ModelKey, entries: &[PricingEntry]) -> Result<()>;

    // =========================================================================
    // Compound atomic commits
    // =========================================================================

    /// Commit a plain balance mutation (deduct or grant): the updated
    /// account and its audit entry, atomically.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn commit_balance_entry(&self, account: &UserAccount, entry: &AuditEntry) -> Result<()>;

    /// Commit a reservation: updated account, new reservation, its expiry
    /// index entry, and the audit entry, atomically.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn commit_reserve(
        &self,
        account: &UserAccount,
        reservation: &Reservation,
        entry: &AuditEntry,
    ) -> Result<()>;

    /// Commit a settlement: updated account, closed reservation (expiry
    /// index entry removed), settlement row, and the audit entry,
    /// atomically.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn commit_settle(
        &self,
        account: &UserAccount,
        reservation: &Reservation,
        settlement: &Settlement,
        entry: &AuditEntry,
    ) -> Result<()>;

    /// Commit a cancel or expiry release: updated account, closed
    /// reservation (expiry index entry removed), and the audit entry,
    /// atomically.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn commit_release(
        &self,
        account: &UserAccount,
        reservation: &Reservation,
        entry: &AuditEntry,
    ) -> Result<()>;

    /// Commit a usage charge: updated account, the usage record with its
    /// user index entry, and the audit entry, atomically.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn commit_usage_charge(
        &self,
        account: &UserAccount,
        record: &UsageRecord,
        entry: &AuditEntry,
    ) -> Result<()>;

    /// Commit an applied compensation: updated account, the terminal
    /// compensation row (pending index entry removed), and the audit
    /// entry, atomically.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn commit_compensation_applied(
        &self,
        account: &UserAccount,
        compensation: &CreditCompensation,
        entry: &AuditEntry,
    ) -> Result<()>;
}
