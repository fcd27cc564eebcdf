//! User account records.
//!
//! The account owns the credit balance. Nothing mutates the balance except
//! the ledger engine, and every mutation is paired with an audit entry in
//! the same atomic commit.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Credits, UserId};

/// A user's ledger account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserAccount {
    /// The user this account belongs to.
    pub user_id: UserId,

    /// Current credit balance (4 decimal places).
    pub balance: Credits,

    /// Lifetime credits spent (deducts, settled usage, excess charges).
    pub lifetime_spent: Credits,

    /// Lifetime credits returned (settlement refunds, cancels, expiry
    /// releases, compensations).
    pub lifetime_refunded: Credits,

    /// Lifetime credits granted (purchases, refreshes, adjustments).
    pub lifetime_granted: Credits,

    /// Subscription tier label, owned by upstream collaborators and
    /// carried here opaquely.
    pub tier: String,

    /// When the account was created.
    pub created_at: DateTime<Utc>,

    /// When the account was last updated.
    pub updated_at: DateTime<Utc>,
}

impl UserAccount {
    /// Create a new account with zero balance.
    #[must_use]
    pub fn new(user_id: UserId) -> Self {
        let now = Utc::now();
        Self {
            user_id,
            balance: Credits::ZERO,
            lifetime_spent: Credits::ZERO,
            lifetime_refunded: Credits::ZERO,
            lifetime_granted: Credits::ZERO,
            tier: "free".to_string(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Check whether the balance covers the given amount.
    #[must_use]
    pub fn has_sufficient_credits(&self, amount: Credits) -> bool {
        self.balance >= amount
    }
}
