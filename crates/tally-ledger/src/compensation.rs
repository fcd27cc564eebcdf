//! Batch processing of queued refund requests.
//!
//! A compensation is owed when a downstream operation failed after its
//! credits were already deducted and no active reservation backs them.
//! Requests queue as `pending` rows; the processor drains them in
//! bounded batches, isolating failures per item so one bad request never
//! stalls the queue.

use std::sync::{Arc, PoisonError};

use tally_core::{
    AuditEntry, AuditOperation, CompensationId, CompensationStatus, CreditCompensation, Credits,
    RelatedEntity, UserId,
};
use tally_store::Store;

use crate::error::{LedgerError, Result};
use crate::locks::UserLocks;

/// How one compensation request resolved during a processing run.
#[derive(Debug, Clone, serde::Serialize)]
pub struct CompensationOutcome {
    /// The request.
    pub compensation_id: CompensationId,

    /// The user it targeted.
    pub user_id: UserId,

    /// Terminal status reached.
    pub status: CompensationStatus,

    /// Failure detail when `status == Failed`.
    pub error: Option<String>,
}

/// Drains the pending compensation queue.
pub struct CompensationProcessor {
    store: Arc<dyn Store>,
    locks: UserLocks,
    batch_size: usize,
}

impl CompensationProcessor {
    /// Create a processor sharing the engine's lock table.
    #[must_use]
    pub fn new(store: Arc<dyn Store>, locks: UserLocks, batch_size: usize) -> Self {
        Self {
            store,
            locks,
            batch_size,
        }
    }

    /// Queue a refund request.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` for a non-positive amount and
    /// `SafetyLimitExceeded` above the single-move ceiling.
    pub fn create(
        &self,
        user_id: UserId,
        credits: Credits,
        reason: impl Into<String>,
        related: Option<RelatedEntity>,
    ) -> Result<CreditCompensation> {
        if !credits.is_positive() {
            return Err(LedgerError::InvalidInput(format!(
                "compensation amount must be positive, got {credits}"
            )));
        }
        if credits > Credits::MAX_SINGLE_MOVE {
            return Err(LedgerError::SafetyLimitExceeded {
                amount: credits,
                limit: Credits::MAX_SINGLE_MOVE,
            });
        }

        let compensation = CreditCompensation::new(user_id, credits, reason.into(), related);
        self.store.put_compensation(&compensation)?;
        tracing::info!(
            user_id = %user_id,
            compensation_id = %compensation.id,
            credits = %credits,
            "compensation queued"
        );
        Ok(compensation)
    }

    /// Process up to one batch of pending requests, oldest first.
    ///
    /// Each item is applied under its user's lock; a per-item failure
    /// marks that request `failed` and the run continues. The returned
    /// list has one outcome per attempted request, so callers can
    /// distinguish partial success.
    ///
    /// # Errors
    ///
    /// Returns an error only if listing the queue itself fails.
    pub fn process_pending(&self) -> Result<Vec<CompensationOutcome>> {
        let pending = self.store.list_pending_compensations(self.batch_size)?;
        if pending.is_empty() {
            return Ok(Vec::new());
        }
        tracing::debug!(count = pending.len(), "processing pending compensations");

        let mut outcomes = Vec::with_capacity(pending.len());
        for compensation in pending {
            let outcome = match self.apply(&compensation.id) {
                Ok(outcome) => outcome,
                Err(err) => {
                    let detail = err.to_string();
                    tracing::warn!(
                        compensation_id = %compensation.id,
                        user_id = %compensation.user_id,
                        error = %detail,
                        "compensation failed"
                    );
                    let mut failed = compensation.clone();
                    failed.mark_failed(detail.clone());
                    // Best effort: if even the failure mark cannot be
                    // written the request stays pending for the next run.
                    if let Err(mark_err) = self.store.put_compensation(&failed) {
                        tracing::error!(
                            compensation_id = %compensation.id,
                            error = %mark_err,
                            "could not mark compensation failed"
                        );
                    }
                    CompensationOutcome {
                        compensation_id: compensation.id,
                        user_id: compensation.user_id,
                        status: CompensationStatus::Failed,
                        error: Some(detail),
                    }
                }
            };
            outcomes.push(outcome);
        }
        Ok(outcomes)
    }

    /// Apply one request under its user's lock.
    fn apply(&self, compensation_id: &CompensationId) -> Result<CompensationOutcome> {
        // The listing snapshot may be stale; re-read under the lock so a
        // request another worker already resolved is not applied twice.
        let user_id = self
            .store
            .get_compensation(compensation_id)?
            .ok_or_else(|| LedgerError::NotFound {
                entity: "compensation",
                id: compensation_id.to_string(),
            })?
            .user_id;

        let cell = self.locks.cell_for(user_id);
        let _guard = cell.lock().unwrap_or_else(PoisonError::into_inner);

        let mut compensation = self
            .store
            .get_compensation(compensation_id)?
            .ok_or_else(|| LedgerError::NotFound {
                entity: "compensation",
                id: compensation_id.to_string(),
            })?;
        if compensation.status != CompensationStatus::Pending {
            return Ok(CompensationOutcome {
                compensation_id: compensation.id,
                user_id: compensation.user_id,
                status: compensation.status,
                error: compensation.error,
            });
        }

        let mut account =
            self.store
                .get_account(&compensation.user_id)?
                .ok_or_else(|| LedgerError::NotFound {
                    entity: "user",
                    id: compensation.user_id.to_string(),
                })?;

        let before = account.balance;
        account.balance = before + compensation.credits;
        account.lifetime_refunded += compensation.credits;
        account.updated_at = chrono::Utc::now();

        let entry = AuditEntry::new(
            compensation.user_id,
            AuditOperation::Refund,
            compensation.credits,
            before,
            account.balance,
            Some(RelatedEntity::compensation(compensation.id)),
            compensation.reason.clone(),
        );
        entry.verify().map_err(LedgerError::ConsistencyViolation)?;

        compensation.mark_processed();
        self.store
            .commit_compensation_applied(&account, &compensation, &entry)?;
        tracing::info!(
            user_id = %compensation.user_id,
            compensation_id = %compensation.id,
            credits = %compensation.credits,
            balance = %account.balance,
            "compensation applied"
        );
        Ok(CompensationOutcome {
            compensation_id: compensation.id,
            user_id: compensation.user_id,
            status: CompensationStatus::Processed,
            error: None,
        })
    }
}
