//! Database schema definitions and column families.

/// Column family names for the `RocksDB` database.
pub mod cf {
    /// User accounts, keyed by `user_id`.
    pub const USERS: &str = "users";

    /// Audit log entries, keyed by `entry_id` (ULID).
    pub const AUDIT_LOG: &str = "audit_log";

    /// Index: audit entries by user, keyed by `user_id || entry_id`.
    /// Value is empty (index only).
    pub const AUDIT_BY_USER: &str = "audit_by_user";

    /// Reservations, keyed by `reservation_id` (ULID).
    pub const RESERVATIONS: &str = "reservations";

    /// Index: active reservations by expiry, keyed by
    /// `expires_at (i64 BE seconds) || reservation_id`. Value is empty.
    /// Entries are removed in the same batch that closes a reservation,
    /// so a bounded range scan from the start yields the expired holds.
    pub const RESERVATIONS_BY_EXPIRY: &str = "reservations_by_expiry";

    /// Settlements, keyed by `settlement_id` (ULID).
    pub const SETTLEMENTS: &str = "settlements";

    /// Compensation requests, keyed by `compensation_id` (ULID).
    pub const COMPENSATIONS: &str = "compensations";

    /// Index: pending compensations, keyed by `compensation_id`.
    /// Value is empty; removed when the request reaches a terminal state.
    pub const COMPENSATIONS_PENDING: &str = "compensations_pending";

    /// Usage records, keyed by `record_id` (ULID).
    pub const USAGE_RECORDS: &str = "usage_records";

    /// Index: usage records by user, keyed by `user_id || record_id`.
    pub const USAGE_BY_USER: &str = "usage_by_user";

    /// Versioned pricing rows, keyed by `provider \0 model`.
    pub const PRICING: &str = "pricing";
}

/// Returns all column family names for database initialization.
#[must_use]
pub fn all_column_families() -> Vec<&'static str> {
    vec![
        cf::USERS,
        cf::AUDIT_LOG,
        cf::AUDIT_BY_USER,
        cf::RESERVATIONS,
        cf::RESERVATIONS_BY_EXPIRY,
        cf::SETTLEMENTS,
        cf::COMPENSATIONS,
        cf::COMPENSATIONS_PENDING,
        cf::USAGE_RECORDS,
        cf::USAGE_BY_USER,
        cf::PRICING,
    ]
}
