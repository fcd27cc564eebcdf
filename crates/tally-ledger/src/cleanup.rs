//! Expired-reservation cleanup.
//!
//! Crashed or timed-out callers leave reservations behind with credits
//! still held. The sweeper finds active holds past their expiry, returns
//! each full hold under the owner's lock, and marks the reservation
//! expired. `run_once` is the whole algorithm; `start`/`stop` wrap it in
//! a timer task for deployments that want the service self-driving.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use tally_core::{
    AuditEntry, AuditOperation, Credits, RelatedEntity, ReservationId, ReservationStatus, UserId,
};
use tally_store::Store;

use crate::config::LedgerConfig;
use crate::error::{LedgerError, Result};
use crate::locks::UserLocks;

/// In-memory incremental usage reported by streaming callers.
///
/// Purely advisory: if the process dies this state is lost and the
/// database sweep still reconciles the reservation by refunding the full
/// hold. Cloning shares the underlying map.
#[derive(Clone, Default)]
pub struct LiveUsageTracker {
    inner: Arc<Mutex<HashMap<ReservationId, LiveUsage>>>,
}

#[derive(Clone, Copy)]
struct LiveUsage {
    credits_used: Credits,
    updated_at: Instant,
}

impl LiveUsageTracker {
    /// Create an empty tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the running usage for a streaming reservation.
    pub fn record(&self, reservation_id: ReservationId, credits_used: Credits) {
        let mut map = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        map.insert(
            reservation_id,
            LiveUsage {
                credits_used,
                updated_at: Instant::now(),
            },
        );
    }

    /// The last reported usage for a reservation, if any.
    #[must_use]
    pub fn snapshot(&self, reservation_id: &ReservationId) -> Option<Credits> {
        let map = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        map.get(reservation_id).map(|u| u.credits_used)
    }

    /// Drop the entry for a closed reservation.
    pub fn remove(&self, reservation_id: &ReservationId) {
        let mut map = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        map.remove(reservation_id);
    }

    /// Drop entries not updated within `stale_after`. Returns how many
    /// were purged.
    pub fn purge_stale(&self, stale_after: Duration) -> usize {
        let mut map = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let before = map.len();
        map.retain(|_, usage| usage.updated_at.elapsed() < stale_after);
        before - map.len()
    }

    /// Number of tracked reservations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether the tracker is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Cumulative sweep statistics.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct CleanupStats {
    /// Completed sweep runs.
    pub total_runs: u64,

    /// Reservations expired across all runs.
    pub total_reservations_processed: u64,

    /// Credits returned across all runs.
    pub total_credits_refunded: Credits,

    /// Duration of the most recent run, in milliseconds.
    pub last_run_duration_ms: u64,

    /// When the most recent run finished.
    pub last_run_at: Option<DateTime<Utc>>,
}

/// What one sweep did.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct CleanupReport {
    /// Reservations expired and refunded.
    pub processed: usize,

    /// Credits returned this run.
    pub credits_refunded: Credits,

    /// Rows skipped because another writer closed them first.
    pub skipped: usize,

    /// Per-row failures; the sweep continued past each.
    pub errors: Vec<String>,

    /// Stale live-tracker entries purged.
    pub tracker_purged: usize,

    /// Unheld user lock cells pruned.
    pub locks_pruned: usize,

    /// How long the run took, in milliseconds.
    pub duration_ms: u64,
}

struct TimerState {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// The cleanup service.
pub struct CleanupService {
    store: Arc<dyn Store>,
    locks: UserLocks,
    tracker: LiveUsageTracker,
    batch_size: usize,
    interval: Duration,
    stale_after: Duration,
    stats: Mutex<CleanupStats>,
    timer: Mutex<Option<TimerState>>,
}

impl CleanupService {
    /// Create a service sharing the engine's lock table.
    #[must_use]
    pub fn new(store: Arc<dyn Store>, locks: UserLocks, config: &LedgerConfig) -> Self {
        Self {
            store,
            locks,
            tracker: LiveUsageTracker::new(),
            batch_size: config.cleanup_batch_size,
            interval: config.cleanup_interval,
            stale_after: config.tracker_stale_after,
            stats: Mutex::new(CleanupStats::default()),
            timer: Mutex::new(None),
        }
    }

    /// The shared live-usage tracker for streaming callers.
    #[must_use]
    pub fn tracker(&self) -> LiveUsageTracker {
        self.tracker.clone()
    }

    /// A snapshot of the cumulative statistics.
    #[must_use]
    pub fn stats(&self) -> CleanupStats {
        self.stats
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Whether the timer task is running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.timer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Run one sweep: expire lapsed holds, purge stale tracker entries,
    /// prune unheld locks.
    ///
    /// Per-row failures are recorded in the report and never abort the
    /// batch.
    ///
    /// # Errors
    ///
    /// Returns an error only if listing expired reservations fails.
    pub fn run_once(&self) -> Result<CleanupReport> {
        let started = Instant::now();
        let now = Utc::now();

        let expired = self.store.list_expired_reservations(now, self.batch_size)?;
        let mut report = CleanupReport::default();

        for reservation in expired {
            match self.expire_one(reservation.id, reservation.user_id) {
                Ok(Some(refund)) => {
                    report.processed += 1;
                    report.credits_refunded += refund;
                }
                Ok(None) => report.skipped += 1,
                Err(err) => {
                    tracing::warn!(
                        reservation_id = %reservation.id,
                        error = %err,
                        "expiry release failed, continuing sweep"
                    );
                    report.errors.push(format!("{}: {err}", reservation.id));
                }
            }
        }

        report.tracker_purged = self.tracker.purge_stale(self.stale_after);
        report.locks_pruned = self.locks.prune_unused();
        report.duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        {
            let mut stats = self.stats.lock().unwrap_or_else(PoisonError::into_inner);
            stats.total_runs += 1;
            stats.total_reservations_processed += report.processed as u64;
            stats.total_credits_refunded += report.credits_refunded;
            stats.last_run_duration_ms = report.duration_ms;
            stats.last_run_at = Some(now);
        }

        if report.processed > 0 || !report.errors.is_empty() {
            tracing::info!(
                processed = report.processed,
                skipped = report.skipped,
                errors = report.errors.len(),
                refunded = %report.credits_refunded,
                "cleanup sweep finished"
            );
        }
        Ok(report)
    }

    /// Start the timer task. Idempotent: a second start while running is
    /// a no-op. Must be called from within a tokio runtime.
    pub fn start(self: &Arc<Self>) {
        let mut timer = self.timer.lock().unwrap_or_else(PoisonError::into_inner);
        if timer.is_some() {
            tracing::debug!("cleanup service already running");
            return;
        }

        let (shutdown, mut signal) = watch::channel(false);
        let service = Arc::clone(self);
        let interval = self.interval;
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let sweep = Arc::clone(&service);
                        match tokio::task::spawn_blocking(move || sweep.run_once()).await {
                            Ok(Ok(_)) => {}
                            Ok(Err(err)) => {
                                tracing::error!(error = %err, "cleanup sweep failed");
                            }
                            Err(err) => {
                                tracing::error!(error = %err, "cleanup sweep task panicked");
                            }
                        }
                    }
                    changed = signal.changed() => {
                        if changed.is_err() || *signal.borrow() {
                            break;
                        }
                    }
                }
            }
            tracing::info!("cleanup service stopped");
        });

        *timer = Some(TimerState { shutdown, handle });
        tracing::info!(interval_secs = interval.as_secs(), "cleanup service started");
    }

    /// Stop the timer task and wait for it to exit. Idempotent.
    pub async fn stop(&self) {
        let state = self
            .timer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(state) = state {
            let _ = state.shutdown.send(true);
            let _ = state.handle.await;
        }
    }

    /// Release one lapsed hold under its owner's lock.
    ///
    /// Returns `Ok(None)` when the reservation was closed (or un-lapsed)
    /// by another writer between the listing and the lock.
    fn expire_one(
        &self,
        reservation_id: ReservationId,
        user_id: UserId,
    ) -> Result<Option<Credits>> {
        let cell = self.locks.cell_for(user_id);
        let _guard = cell.lock().unwrap_or_else(PoisonError::into_inner);

        let Some(mut reservation) = self.store.get_reservation(&reservation_id)? else {
            return Ok(None);
        };
        if !reservation.is_active() || !reservation.is_expired_at(Utc::now()) {
            return Ok(None);
        }

        let mut account =
            self.store
                .get_account(&reservation.user_id)?
                .ok_or_else(|| LedgerError::NotFound {
                    entity: "user",
                    id: reservation.user_id.to_string(),
                })?;

        let refund = reservation.credits_reserved;
        let before = account.balance;
        account.balance = before + refund;
        account.lifetime_refunded += refund;
        account.updated_at = Utc::now();

        // An expired reservation never carries measured usage.
        reservation.status = ReservationStatus::Expired;
        reservation.error_reason = Some("reservation expired".to_string());

        let entry = AuditEntry::new(
            reservation.user_id,
            AuditOperation::Expire,
            refund,
            before,
            account.balance,
            Some(RelatedEntity::reservation(reservation_id)),
            "reservation expired".to_string(),
        );
        entry.verify().map_err(LedgerError::ConsistencyViolation)?;

        self.store.commit_release(&account, &reservation, &entry)?;
        self.tracker.remove(&reservation_id);
        tracing::info!(
            user_id = %reservation.user_id,
            reservation_id = %reservation_id,
            refunded = %refund,
            "expired reservation released"
        );
        Ok(Some(refund))
    }
}
