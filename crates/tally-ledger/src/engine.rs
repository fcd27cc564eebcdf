//! The ledger engine: every balance mutation goes through here.
//!
//! Each mutating operation validates its inputs before taking any lock,
//! then takes the owning user's lock, reads current state, computes the
//! new rows, verifies the audit invariant on what it is about to write,
//! and persists everything in one atomic commit. Nothing is written on
//! any failure path.

use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError};
use std::time::Instant;

use chrono::{DateTime, Duration, Utc};

use tally_core::reservation::MAX_TTL_MINUTES;
use tally_core::{
    AuditEntry, AuditOperation, Credits, ModelKey, RelatedEntity, RequestProvenance, Reservation,
    ReservationContext, ReservationId, ReservationStatus, ReservationType, Settlement,
    SettlementId, SettlementType, UsageBreakdown, UsageRecord, UsageStats, UserAccount, UserId,
};
use tally_store::Store;

use crate::config::LedgerConfig;
use crate::error::{LedgerError, Result};
use crate::estimator::{CostEstimate, CostEstimator, EstimateConfidence};
use crate::locks::UserLocks;
use crate::pricing::PricingResolver;

/// Caller-supplied context attached to a balance mutation's audit entry.
#[derive(Debug, Clone, Default)]
pub struct OperationContext {
    /// Human-readable reason, persisted on the audit entry.
    pub reason: String,

    /// Structured metadata (request id, model, caller tags).
    pub metadata: BTreeMap<String, String>,

    /// Request provenance for support tooling.
    pub provenance: Option<RequestProvenance>,
}

impl OperationContext {
    /// Context with just a reason.
    #[must_use]
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            metadata: BTreeMap::new(),
            provenance: None,
        }
    }

    /// Attach a metadata entry.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Attach request provenance.
    #[must_use]
    pub fn with_provenance(mut self, provenance: RequestProvenance) -> Self {
        self.provenance = Some(provenance);
        self
    }

    fn decorate(self, entry: AuditEntry) -> AuditEntry {
        let entry = entry.with_metadata(self.metadata);
        match self.provenance {
            Some(p) => entry.with_provenance(p),
            None => entry,
        }
    }
}

/// Parameters for placing a reservation hold.
#[derive(Debug, Clone)]
pub struct ReserveRequest {
    /// Credits to hold.
    pub amount: Credits,

    /// What kind of caller is placing the hold.
    pub reservation_type: ReservationType,

    /// TTL override in minutes; default from config, hard cap 60.
    pub ttl_minutes: Option<i64>,

    /// Absolute expiry override; wins over `ttl_minutes` when set.
    pub expires_at: Option<DateTime<Utc>>,

    /// Structured reservation context.
    pub context: ReservationContext,

    /// Conversation correlation id.
    pub conversation_id: Option<String>,

    /// Message correlation id.
    pub message_id: Option<String>,
}

impl ReserveRequest {
    /// A request with defaults for everything but the amount and type.
    #[must_use]
    pub fn new(amount: Credits, reservation_type: ReservationType) -> Self {
        Self {
            amount,
            reservation_type,
            ttl_minutes: None,
            expires_at: None,
            context: ReservationContext::default(),
            conversation_id: None,
            message_id: None,
        }
    }
}

/// One billable model call to charge after the fact.
#[derive(Debug, Clone)]
pub struct UsageCharge {
    /// Model provider.
    pub provider: String,

    /// Model name.
    pub model: String,

    /// Input (prompt) units.
    pub input_units: u64,

    /// Output (completion) units.
    pub output_units: u64,

    /// Conversation correlation id.
    pub conversation_id: Option<String>,

    /// Message correlation id.
    pub message_id: Option<String>,
}

impl UsageCharge {
    /// A charge with no correlation ids.
    #[must_use]
    pub fn new(
        provider: impl Into<String>,
        model: impl Into<String>,
        input_units: u64,
        output_units: u64,
    ) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
            input_units,
            output_units,
            conversation_id: None,
            message_id: None,
        }
    }
}

/// Result of a direct deduction.
#[derive(Debug, Clone, Copy)]
pub struct DeductOutcome {
    /// Balance before the charge.
    pub previous_balance: Credits,

    /// Balance after the charge.
    pub new_balance: Credits,
}

/// Result of a credit grant.
#[derive(Debug, Clone, Copy)]
pub struct GrantOutcome {
    /// Balance before the grant.
    pub previous_balance: Credits,

    /// Balance after the grant.
    pub new_balance: Credits,
}

/// Result of placing a reservation.
#[derive(Debug, Clone, Copy)]
pub struct ReserveOutcome {
    /// The new reservation's id.
    pub reservation_id: ReservationId,

    /// When the hold lapses.
    pub expires_at: DateTime<Utc>,

    /// Balance after the hold was debited.
    pub new_balance: Credits,
}

/// Result of settling a reservation.
#[derive(Debug, Clone, Copy)]
pub struct SettleOutcome {
    /// The settlement row's id.
    pub settlement_id: SettlementId,

    /// Credits returned to the balance (zero on the exceeded path).
    pub credits_refunded: Credits,

    /// Balance after settlement.
    pub new_balance: Credits,

    /// How the settlement resolved.
    pub settlement_type: SettlementType,
}

/// Result of cancelling a reservation.
#[derive(Debug, Clone, Copy)]
pub struct CancelOutcome {
    /// The full hold, returned to the balance.
    pub credits_refunded: Credits,

    /// Balance after the release.
    pub new_balance: Credits,
}

/// Result of an advisory balance check.
#[derive(Debug, Clone)]
pub struct BalanceCheck {
    /// Whether the balance covered the required amount at read time.
    pub has_credits: bool,

    /// The balance observed.
    pub balance: Credits,

    /// Why the check failed, when it did.
    pub reason: Option<String>,
}

/// The credit ledger engine.
///
/// Cheap to share behind an `Arc`; all operations take `&self`.
pub struct LedgerEngine {
    store: Arc<dyn Store>,
    config: LedgerConfig,
    locks: UserLocks,
    estimator: CostEstimator,
}

impl LedgerEngine {
    /// Create an engine over the given store.
    #[must_use]
    pub fn new(store: Arc<dyn Store>, config: LedgerConfig) -> Self {
        let resolver = PricingResolver::with_default_sources(Arc::clone(&store));
        let estimator =
            CostEstimator::new(resolver, config.credit_value_usd, config.buffer.clone());
        Self {
            store,
            config,
            locks: UserLocks::new(),
            estimator,
        }
    }

    /// The engine's lock table. Background services that mutate balances
    /// (compensation processor, cleanup sweeper) must share it.
    #[must_use]
    pub fn locks(&self) -> UserLocks {
        self.locks.clone()
    }

    /// The underlying store.
    #[must_use]
    pub fn store(&self) -> Arc<dyn Store> {
        Arc::clone(&self.store)
    }

    /// The engine's configuration.
    #[must_use]
    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    /// The pre-flight cost estimator.
    #[must_use]
    pub fn estimator(&self) -> &CostEstimator {
        &self.estimator
    }

    /// Estimate the cost of a request as of now.
    #[must_use]
    pub fn estimate(
        &self,
        key: &ModelKey,
        input_units: u64,
        output_units: u64,
        confidence: EstimateConfidence,
    ) -> CostEstimate {
        self.estimator
            .estimate(key, input_units, output_units, confidence, Utc::now())
    }

    // =========================================================================
    // Accounts
    // =========================================================================

    /// Create a new zero-balance account.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` if the account already exists.
    pub fn create_account(&self, user_id: UserId) -> Result<UserAccount> {
        let cell = self.locks.cell_for(user_id);
        let _guard = cell.lock().unwrap_or_else(PoisonError::into_inner);

        if self.store.get_account(&user_id)?.is_some() {
            return Err(LedgerError::InvalidInput(format!(
                "account already exists for user {user_id}"
            )));
        }
        let account = UserAccount::new(user_id);
        self.store.put_account(&account)?;
        tracing::info!(user_id = %user_id, "account created");
        Ok(account)
    }

    /// Get an account, creating a zero-balance one if absent.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub fn get_or_create_account(&self, user_id: UserId) -> Result<UserAccount> {
        let cell = self.locks.cell_for(user_id);
        let _guard = cell.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(account) = self.store.get_account(&user_id)? {
            return Ok(account);
        }
        let account = UserAccount::new(user_id);
        self.store.put_account(&account)?;
        tracing::info!(user_id = %user_id, "account created");
        Ok(account)
    }

    /// Get an existing account.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the account does not exist.
    pub fn get_account(&self, user_id: UserId) -> Result<UserAccount> {
        self.account(&user_id)
    }

    /// Advisory balance check. Takes no lock; a subsequent deduct or
    /// reserve can still fail even if this reported sufficiency.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the account does not exist.
    pub fn check_balance(&self, user_id: UserId, required: Credits) -> Result<BalanceCheck> {
        let account = self.account(&user_id)?;
        let has_credits = account.has_sufficient_credits(required);
        Ok(BalanceCheck {
            has_credits,
            balance: account.balance,
            reason: if has_credits {
                None
            } else {
                Some(format!(
                    "balance {} below required {required}",
                    account.balance
                ))
            },
        })
    }

    // =========================================================================
    // Direct balance moves
    // =========================================================================

    /// Deduct credits from a balance.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` for a non-positive amount,
    /// `SafetyLimitExceeded` above the single-move ceiling, `NotFound`
    /// for a missing account, and `InsufficientFunds` when the balance
    /// does not cover the amount.
    pub fn deduct(
        &self,
        user_id: UserId,
        amount: Credits,
        ctx: OperationContext,
    ) -> Result<DeductOutcome> {
        Self::validate_move(amount)?;

        let cell = self.locks.cell_for(user_id);
        let _guard = cell.lock().unwrap_or_else(PoisonError::into_inner);

        let mut account = self.account(&user_id)?;
        if !account.has_sufficient_credits(amount) {
            return Err(LedgerError::InsufficientFunds {
                balance: account.balance,
                required: amount,
            });
        }

        let before = account.balance;
        account.balance = before - amount;
        account.lifetime_spent += amount;
        account.updated_at = Utc::now();

        let reason = ctx.reason.clone();
        let entry = ctx.decorate(AuditEntry::new(
            user_id,
            AuditOperation::Deduct,
            amount,
            before,
            account.balance,
            None,
            reason,
        ));
        entry.verify().map_err(LedgerError::ConsistencyViolation)?;

        self.store.commit_balance_entry(&account, &entry)?;
        tracing::info!(
            user_id = %user_id,
            amount = %amount,
            balance = %account.balance,
            "credits deducted"
        );
        Ok(DeductOutcome {
            previous_balance: before,
            new_balance: account.balance,
        })
    }

    /// Grant credits to a balance (purchase, refresh, or adjustment).
    /// Creates the account if it does not exist yet.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` if `operation` is not a grant-side
    /// operation or the amount is non-positive, and
    /// `SafetyLimitExceeded` above the single-move ceiling.
    pub fn grant(
        &self,
        user_id: UserId,
        operation: AuditOperation,
        amount: Credits,
        ctx: OperationContext,
    ) -> Result<GrantOutcome> {
        if !matches!(
            operation,
            AuditOperation::Purchase | AuditOperation::Refresh | AuditOperation::Adjustment
        ) {
            return Err(LedgerError::InvalidInput(format!(
                "{} is not a grant operation",
                operation.as_str()
            )));
        }
        Self::validate_move(amount)?;

        let cell = self.locks.cell_for(user_id);
        let _guard = cell.lock().unwrap_or_else(PoisonError::into_inner);

        let mut account = match self.store.get_account(&user_id)? {
            Some(account) => account,
            None => UserAccount::new(user_id),
        };

        let before = account.balance;
        account.balance = before + amount;
        account.lifetime_granted += amount;
        account.updated_at = Utc::now();

        let reason = ctx.reason.clone();
        let entry = ctx.decorate(AuditEntry::new(
            user_id,
            operation,
            amount,
            before,
            account.balance,
            None,
            reason,
        ));
        entry.verify().map_err(LedgerError::ConsistencyViolation)?;

        self.store.commit_balance_entry(&account, &entry)?;
        tracing::info!(
            user_id = %user_id,
            operation = operation.as_str(),
            amount = %amount,
            balance = %account.balance,
            "credits granted"
        );
        Ok(GrantOutcome {
            previous_balance: before,
            new_balance: account.balance,
        })
    }

    // =========================================================================
    // Reservation lifecycle
    // =========================================================================

    /// Place a pessimistic hold against a balance.
    ///
    /// # Errors
    ///
    /// Returns the deduct-style errors plus `InvalidInput` for a bad
    /// expiry window and `SafetyLimitExceeded` above the reservation
    /// ceiling.
    pub fn reserve(
        &self,
        user_id: UserId,
        request: ReserveRequest,
        ctx: OperationContext,
    ) -> Result<ReserveOutcome> {
        let now = Utc::now();
        // Range-check the TTL before it reaches `Duration::minutes`,
        // which panics on extreme magnitudes.
        let ttl = request.ttl_minutes.unwrap_or(self.config.default_ttl_minutes);
        if !(1..=MAX_TTL_MINUTES).contains(&ttl) {
            return Err(LedgerError::InvalidInput(format!(
                "reservation ttl must be between 1 and {MAX_TTL_MINUTES} minutes, got {ttl}"
            )));
        }
        let expires_at = request
            .expires_at
            .unwrap_or_else(|| now + Duration::minutes(ttl));

        // Validates amount, ceiling, and expiry window before any lock.
        let reservation = Reservation::new(
            user_id,
            request.amount,
            request.reservation_type,
            request.context,
            expires_at,
            now,
        )?
        .with_correlation(request.conversation_id, request.message_id);

        let cell = self.locks.cell_for(user_id);
        let _guard = cell.lock().unwrap_or_else(PoisonError::into_inner);

        let mut account = self.account(&user_id)?;
        if !account.has_sufficient_credits(request.amount) {
            return Err(LedgerError::InsufficientFunds {
                balance: account.balance,
                required: request.amount,
            });
        }

        let before = account.balance;
        account.balance = before - request.amount;
        account.lifetime_spent += request.amount;
        account.updated_at = now;

        let reason = ctx.reason.clone();
        let entry = ctx.decorate(AuditEntry::new(
            user_id,
            AuditOperation::Reserve,
            request.amount,
            before,
            account.balance,
            Some(RelatedEntity::reservation(reservation.id)),
            reason,
        ));
        entry.verify().map_err(LedgerError::ConsistencyViolation)?;

        self.store.commit_reserve(&account, &reservation, &entry)?;
        tracing::info!(
            user_id = %user_id,
            reservation_id = %reservation.id,
            amount = %request.amount,
            expires_at = %reservation.expires_at,
            "reservation placed"
        );
        Ok(ReserveOutcome {
            reservation_id: reservation.id,
            expires_at: reservation.expires_at,
            new_balance: account.balance,
        })
    }

    /// Settle a reservation against measured usage.
    ///
    /// Usage within the hold refunds the remainder; usage above it
    /// deducts the excess separately and refunds nothing. The excess
    /// deduction may take the balance slightly negative; that excursion
    /// is tolerated rather than blocking settlement.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for a missing reservation or account,
    /// `InvalidStateTransition` if the reservation is not active, and
    /// `InvalidInput` for negative usage.
    pub fn settle(
        &self,
        reservation_id: ReservationId,
        actual_credits_used: Credits,
        usage: Option<UsageBreakdown>,
        ctx: OperationContext,
    ) -> Result<SettleOutcome> {
        let started = Instant::now();

        if actual_credits_used.is_negative() {
            return Err(LedgerError::InvalidInput(format!(
                "actual credits used must be non-negative, got {actual_credits_used}"
            )));
        }

        // Resolve the owner lock-free, then re-read under the lock; the
        // first read only tells us which lock to take.
        let owner = self.reservation(&reservation_id)?.user_id;
        let cell = self.locks.cell_for(owner);
        let _guard = cell.lock().unwrap_or_else(PoisonError::into_inner);

        let mut reservation = self.reservation(&reservation_id)?;
        if !reservation.is_active() {
            return Err(LedgerError::InvalidStateTransition {
                reservation_id,
                status: reservation.status,
                attempted: "settle",
            });
        }
        let mut account = self.account(&reservation.user_id)?;

        let reserved = reservation.credits_reserved;
        if actual_credits_used.raw() > reserved.raw().saturating_mul(2) {
            tracing::warn!(
                reservation_id = %reservation_id,
                reserved = %reserved,
                actual = %actual_credits_used,
                "usage more than double the reservation, estimator drift"
            );
        }

        let now = Utc::now();
        let before = account.balance;
        let (settlement_type, refund, entry) = if actual_credits_used > reserved {
            let excess = actual_credits_used - reserved;
            account.balance = before - excess;
            account.lifetime_spent += excess;
            (
                SettlementType::Exceeded,
                Credits::ZERO,
                AuditEntry::new(
                    reservation.user_id,
                    AuditOperation::Deduct,
                    excess,
                    before,
                    account.balance,
                    Some(RelatedEntity::reservation(reservation_id)),
                    format!("{} (exceeded reservation)", ctx.reason),
                ),
            )
        } else {
            let refund = reserved - actual_credits_used;
            account.balance = before + refund;
            account.lifetime_refunded += refund;
            (
                SettlementType::Completed,
                refund,
                AuditEntry::new(
                    reservation.user_id,
                    AuditOperation::Settle,
                    refund,
                    before,
                    account.balance,
                    Some(RelatedEntity::reservation(reservation_id)),
                    ctx.reason.clone(),
                ),
            )
        };
        account.updated_at = now;
        let entry = ctx.decorate(entry);
        entry.verify().map_err(LedgerError::ConsistencyViolation)?;

        reservation.status = ReservationStatus::Settled;
        reservation.settled_at = Some(now);
        reservation.actual_credits_used = Some(actual_credits_used);

        let settlement = Settlement {
            id: SettlementId::generate(),
            reservation_id,
            user_id: reservation.user_id,
            credits_reserved: reserved,
            actual_credits_used,
            credits_refunded: refund,
            balance_before: before,
            balance_after: account.balance,
            settlement_type,
            usage,
            accuracy_ratio: actual_credits_used.as_f64() / reserved.as_f64(),
            processing_time_ms: u64::try_from(started.elapsed().as_millis())
                .unwrap_or(u64::MAX),
            created_at: now,
        };
        settlement
            .verify()
            .map_err(LedgerError::ConsistencyViolation)?;

        self.store
            .commit_settle(&account, &reservation, &settlement, &entry)?;
        tracing::info!(
            user_id = %reservation.user_id,
            reservation_id = %reservation_id,
            settlement_type = settlement_type.as_str(),
            refunded = %refund,
            balance = %account.balance,
            "reservation settled"
        );
        Ok(SettleOutcome {
            settlement_id: settlement.id,
            credits_refunded: refund,
            new_balance: account.balance,
            settlement_type,
        })
    }

    /// Cancel an active reservation, returning the full hold.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for a missing reservation or account and
    /// `InvalidStateTransition` if the reservation is not active.
    pub fn cancel(
        &self,
        reservation_id: ReservationId,
        reason: impl Into<String>,
    ) -> Result<CancelOutcome> {
        let reason = reason.into();

        let owner = self.reservation(&reservation_id)?.user_id;
        let cell = self.locks.cell_for(owner);
        let _guard = cell.lock().unwrap_or_else(PoisonError::into_inner);

        let mut reservation = self.reservation(&reservation_id)?;
        if !reservation.is_active() {
            return Err(LedgerError::InvalidStateTransition {
                reservation_id,
                status: reservation.status,
                attempted: "cancel",
            });
        }
        let mut account = self.account(&reservation.user_id)?;

        let refund = reservation.credits_reserved;
        let before = account.balance;
        account.balance = before + refund;
        account.lifetime_refunded += refund;
        account.updated_at = Utc::now();

        reservation.status = ReservationStatus::Cancelled;
        reservation.error_reason = Some(reason.clone());

        let entry = AuditEntry::new(
            reservation.user_id,
            AuditOperation::Cancel,
            refund,
            before,
            account.balance,
            Some(RelatedEntity::reservation(reservation_id)),
            reason,
        );
        entry.verify().map_err(LedgerError::ConsistencyViolation)?;

        self.store.commit_release(&account, &reservation, &entry)?;
        tracing::info!(
            user_id = %reservation.user_id,
            reservation_id = %reservation_id,
            refunded = %refund,
            balance = %account.balance,
            "reservation cancelled"
        );
        Ok(CancelOutcome {
            credits_refunded: refund,
            new_balance: account.balance,
        })
    }

    // =========================================================================
    // Usage records
    // =========================================================================

    /// Record a billable model call and charge its ceiling-rounded
    /// credits.
    ///
    /// Billing is after the fact: the call already happened, so the
    /// charge goes through even if it takes the balance negative.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for a missing account and
    /// `SafetyLimitExceeded` if the charge is above the single-move
    /// ceiling.
    pub fn record_usage(
        &self,
        user_id: UserId,
        charge: UsageCharge,
        ctx: OperationContext,
    ) -> Result<UsageRecord> {
        let key = ModelKey::new(charge.provider.clone(), charge.model.clone());
        let pricing = self.estimator.pricing(&key, Utc::now());

        let record = UsageRecord::new(
            user_id,
            charge.provider,
            charge.model,
            charge.input_units,
            charge.output_units,
            &pricing,
            self.config.credit_value_usd,
        )
        .with_correlation(charge.conversation_id, charge.message_id);
        record.verify().map_err(LedgerError::ConsistencyViolation)?;

        let amount = record.credits_charged;
        if amount > Credits::MAX_SINGLE_MOVE {
            return Err(LedgerError::SafetyLimitExceeded {
                amount,
                limit: Credits::MAX_SINGLE_MOVE,
            });
        }

        let cell = self.locks.cell_for(user_id);
        let _guard = cell.lock().unwrap_or_else(PoisonError::into_inner);

        let mut account = self.account(&user_id)?;
        let before = account.balance;
        account.balance = before - amount;
        account.lifetime_spent += amount;
        account.updated_at = Utc::now();

        let entry = ctx
            .with_metadata("provider", record.provider.clone())
            .with_metadata("model", record.model.clone())
            .decorate(AuditEntry::new(
                user_id,
                AuditOperation::Deduct,
                amount,
                before,
                account.balance,
                Some(RelatedEntity::usage_record(record.id)),
                format!("usage: {}/{}", record.provider, record.model),
            ));
        entry.verify().map_err(LedgerError::ConsistencyViolation)?;

        self.store.commit_usage_charge(&account, &record, &entry)?;
        tracing::info!(
            user_id = %user_id,
            record_id = %record.id,
            charged = %amount,
            balance = %account.balance,
            "usage recorded"
        );
        Ok(record)
    }

    /// Aggregate usage for a user.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub fn get_usage_stats(&self, user_id: UserId) -> Result<UsageStats> {
        Ok(self.store.usage_stats(&user_id)?)
    }

    /// List a user's usage records, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub fn list_usage(
        &self,
        user_id: UserId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<UsageRecord>> {
        Ok(self.store.list_usage_by_user(&user_id, limit, offset)?)
    }

    /// List a user's audit entries, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub fn list_audit(
        &self,
        user_id: UserId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<AuditEntry>> {
        Ok(self.store.list_audit_by_user(&user_id, limit, offset)?)
    }

    // =========================================================================
    // Internals
    // =========================================================================

    fn validate_move(amount: Credits) -> Result<()> {
        if !amount.is_positive() {
            return Err(LedgerError::InvalidInput(format!(
                "amount must be positive, got {amount}"
            )));
        }
        if amount > Credits::MAX_SINGLE_MOVE {
            return Err(LedgerError::SafetyLimitExceeded {
                amount,
                limit: Credits::MAX_SINGLE_MOVE,
            });
        }
        Ok(())
    }

    fn account(&self, user_id: &UserId) -> Result<UserAccount> {
        self.store
            .get_account(user_id)?
            .ok_or_else(|| LedgerError::NotFound {
                entity: "user",
                id: user_id.to_string(),
            })
    }

    fn reservation(&self, reservation_id: &ReservationId) -> Result<Reservation> {
        self.store
            .get_reservation(reservation_id)?
            .ok_or_else(|| LedgerError::NotFound {
                entity: "reservation",
                id: reservation_id.to_string(),
            })
    }
}
