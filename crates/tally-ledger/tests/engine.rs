//! End-to-end engine tests over a real `RocksDB` store.

use std::sync::Arc;

use tally_core::{
    AuditOperation, Credits, ReservationContext, ReservationStatus, ReservationType,
    SettlementType, UsageBreakdown, UserId,
};
use tally_ledger::{
    LedgerConfig, LedgerEngine, LedgerError, OperationContext, ReserveRequest, UsageCharge,
};
use tally_store::{RocksStore, Store};
use tempfile::TempDir;

fn engine() -> (LedgerEngine, Arc<RocksStore>, TempDir) {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(RocksStore::open(dir.path()).unwrap());
    let engine = LedgerEngine::new(store.clone(), LedgerConfig::default());
    (engine, store, dir)
}

/// A user funded through a purchase grant.
fn funded_user(engine: &LedgerEngine, balance: i64) -> UserId {
    let user_id = UserId::generate();
    engine.create_account(user_id).unwrap();
    engine
        .grant(
            user_id,
            AuditOperation::Purchase,
            Credits::from_whole(balance),
            OperationContext::new("initial purchase"),
        )
        .unwrap();
    user_id
}

#[test]
fn deduct_moves_balance_and_writes_one_audit_row() {
    let (engine, _store, _dir) = engine();
    let user_id = funded_user(&engine, 1_000);

    let outcome = engine
        .deduct(
            user_id,
            Credits::from_whole(250),
            OperationContext::new("chat usage"),
        )
        .unwrap();

    assert_eq!(outcome.previous_balance, Credits::from_whole(1_000));
    assert_eq!(outcome.new_balance, Credits::from_whole(750));

    let entries = engine.list_audit(user_id, 10, 0).unwrap();
    // Newest first: the deduct, then the funding purchase.
    assert_eq!(entries.len(), 2);
    let deduct = &entries[0];
    assert_eq!(deduct.operation, AuditOperation::Deduct);
    assert_eq!(deduct.credits_amount, Credits::from_whole(250));
    assert_eq!(deduct.balance_before, Credits::from_whole(1_000));
    assert_eq!(deduct.balance_after, Credits::from_whole(750));
    assert!(deduct.verify().is_ok());
}

#[test]
fn deduct_rejects_insufficient_funds_without_writing() {
    let (engine, _store, _dir) = engine();
    let user_id = funded_user(&engine, 100);

    let err = engine
        .deduct(
            user_id,
            Credits::from_whole(101),
            OperationContext::new("too much"),
        )
        .unwrap_err();
    assert!(matches!(err, LedgerError::InsufficientFunds { .. }));

    // Nothing persisted: balance intact, only the funding entry present.
    let account = engine.get_account(user_id).unwrap();
    assert_eq!(account.balance, Credits::from_whole(100));
    assert_eq!(engine.list_audit(user_id, 10, 0).unwrap().len(), 1);
}

#[test]
fn deduct_safety_limit_rejected_before_account_lookup() {
    let (engine, _store, _dir) = engine();

    // A user that does not even exist: the ceiling check fires first.
    let err = engine
        .deduct(
            UserId::generate(),
            Credits::from_whole(1_001),
            OperationContext::new("over limit"),
        )
        .unwrap_err();
    assert!(matches!(err, LedgerError::SafetyLimitExceeded { .. }));

    let err = engine
        .deduct(UserId::generate(), Credits::ZERO, OperationContext::new("zero"))
        .unwrap_err();
    assert!(matches!(err, LedgerError::InvalidInput(_)));
}

#[test]
fn deduct_unknown_user_is_not_found() {
    let (engine, _store, _dir) = engine();
    let err = engine
        .deduct(
            UserId::generate(),
            Credits::from_whole(10),
            OperationContext::new("ghost"),
        )
        .unwrap_err();
    assert!(matches!(err, LedgerError::NotFound { entity: "user", .. }));
}

#[test]
fn grant_creates_account_and_credits() {
    let (engine, _store, _dir) = engine();
    let user_id = UserId::generate();

    let outcome = engine
        .grant(
            user_id,
            AuditOperation::Refresh,
            Credits::from_whole(300),
            OperationContext::new("monthly refresh"),
        )
        .unwrap();
    assert_eq!(outcome.previous_balance, Credits::ZERO);
    assert_eq!(outcome.new_balance, Credits::from_whole(300));

    let account = engine.get_account(user_id).unwrap();
    assert_eq!(account.lifetime_granted, Credits::from_whole(300));

    // Reserve/settle/deduct are not grant operations.
    let err = engine
        .grant(
            user_id,
            AuditOperation::Settle,
            Credits::ONE,
            OperationContext::new("bogus"),
        )
        .unwrap_err();
    assert!(matches!(err, LedgerError::InvalidInput(_)));
}

#[test]
fn check_balance_is_advisory() {
    let (engine, _store, _dir) = engine();
    let user_id = funded_user(&engine, 50);

    let check = engine
        .check_balance(user_id, Credits::from_whole(30))
        .unwrap();
    assert!(check.has_credits);
    assert_eq!(check.balance, Credits::from_whole(50));
    assert!(check.reason.is_none());

    let check = engine
        .check_balance(user_id, Credits::from_whole(60))
        .unwrap();
    assert!(!check.has_credits);
    assert!(check.reason.is_some());
}

#[test]
fn settle_within_hold_refunds_remainder() {
    let (engine, store, _dir) = engine();
    let user_id = funded_user(&engine, 1_000);

    let hold = engine
        .reserve(
            user_id,
            ReserveRequest {
                ttl_minutes: Some(15),
                context: ReservationContext::for_model("anthropic", "claude-3-5-sonnet", 10_000, 5_000),
                ..ReserveRequest::new(Credits::from_whole(50), ReservationType::Streaming)
            },
            OperationContext::new("chat completion"),
        )
        .unwrap();
    assert_eq!(hold.new_balance, Credits::from_whole(950));

    let outcome = engine
        .settle(
            hold.reservation_id,
            Credits::from_whole(30),
            Some(UsageBreakdown {
                input_units: 10_000,
                output_units: 4_000,
            }),
            OperationContext::new("chat completion"),
        )
        .unwrap();

    assert_eq!(outcome.credits_refunded, Credits::from_whole(20));
    assert_eq!(outcome.new_balance, Credits::from_whole(970));
    assert_eq!(outcome.settlement_type, SettlementType::Completed);

    let reservation = store.get_reservation(&hold.reservation_id).unwrap().unwrap();
    assert_eq!(reservation.status, ReservationStatus::Settled);
    assert!(reservation.settled_at.is_some());
    assert_eq!(reservation.actual_credits_used, Some(Credits::from_whole(30)));

    let settlement = store.get_settlement(&outcome.settlement_id).unwrap().unwrap();
    assert_eq!(settlement.settlement_type, SettlementType::Completed);
    assert_eq!(settlement.credits_refunded, Credits::from_whole(20));
    assert!(settlement.verify().is_ok());
    assert!((settlement.accuracy_ratio - 0.6).abs() < 1e-9);
}

#[test]
fn settle_above_hold_deducts_excess_only() {
    let (engine, store, _dir) = engine();
    let user_id = funded_user(&engine, 1_000);

    let hold = engine
        .reserve(
            user_id,
            ReserveRequest::new(Credits::from_whole(50), ReservationType::Batch),
            OperationContext::new("batch job"),
        )
        .unwrap();

    let outcome = engine
        .settle(
            hold.reservation_id,
            Credits::from_whole(70),
            None,
            OperationContext::new("batch job"),
        )
        .unwrap();

    assert_eq!(outcome.credits_refunded, Credits::ZERO);
    assert_eq!(outcome.settlement_type, SettlementType::Exceeded);
    // 1000 - 50 (hold) - 20 (excess)
    assert_eq!(outcome.new_balance, Credits::from_whole(930));

    // The settlement's audit entry is a deduct for the excess alone.
    let entries = engine.list_audit(user_id, 10, 0).unwrap();
    let excess = &entries[0];
    assert_eq!(excess.operation, AuditOperation::Deduct);
    assert_eq!(excess.credits_amount, Credits::from_whole(20));
    assert!(excess.reason.contains("exceeded"));
    assert!(excess.verify().is_ok());

    let settlement = store.get_settlement(&outcome.settlement_id).unwrap().unwrap();
    assert!(settlement.verify().is_ok());
}

#[test]
fn settle_excess_tolerates_negative_balance() {
    let (engine, _store, _dir) = engine();
    let user_id = funded_user(&engine, 50);

    let hold = engine
        .reserve(
            user_id,
            ReserveRequest::new(Credits::from_whole(50), ReservationType::Streaming),
            OperationContext::new("runaway stream"),
        )
        .unwrap();
    assert_eq!(hold.new_balance, Credits::ZERO);

    // Usage far above the hold drives the balance negative; the charge
    // still lands rather than losing the revenue.
    let outcome = engine
        .settle(
            hold.reservation_id,
            Credits::from_whole(80),
            None,
            OperationContext::new("runaway stream"),
        )
        .unwrap();
    assert_eq!(outcome.new_balance, Credits::from_whole(-30));
}

#[test]
fn settle_twice_is_rejected_without_double_refund() {
    let (engine, _store, _dir) = engine();
    let user_id = funded_user(&engine, 1_000);

    let hold = engine
        .reserve(
            user_id,
            ReserveRequest::new(Credits::from_whole(50), ReservationType::Streaming),
            OperationContext::new("chat"),
        )
        .unwrap();
    engine
        .settle(
            hold.reservation_id,
            Credits::from_whole(30),
            None,
            OperationContext::new("chat"),
        )
        .unwrap();

    let err = engine
        .settle(
            hold.reservation_id,
            Credits::from_whole(30),
            None,
            OperationContext::new("chat again"),
        )
        .unwrap_err();
    assert!(matches!(
        err,
        LedgerError::InvalidStateTransition {
            status: ReservationStatus::Settled,
            ..
        }
    ));

    // No double refund.
    let account = engine.get_account(user_id).unwrap();
    assert_eq!(account.balance, Credits::from_whole(970));
}

#[test]
fn cancel_returns_full_hold() {
    let (engine, store, _dir) = engine();
    let user_id = funded_user(&engine, 200);

    let hold = engine
        .reserve(
            user_id,
            ReserveRequest::new(Credits::from_whole(40), ReservationType::Streaming),
            OperationContext::new("chat"),
        )
        .unwrap();

    let outcome = engine.cancel(hold.reservation_id, "caller abort").unwrap();
    assert_eq!(outcome.credits_refunded, Credits::from_whole(40));
    assert_eq!(outcome.new_balance, Credits::from_whole(200));

    let reservation = store.get_reservation(&hold.reservation_id).unwrap().unwrap();
    assert_eq!(reservation.status, ReservationStatus::Cancelled);
    assert_eq!(reservation.error_reason.as_deref(), Some("caller abort"));

    // Cancel is audited credit-side.
    let entries = engine.list_audit(user_id, 10, 0).unwrap();
    assert_eq!(entries[0].operation, AuditOperation::Cancel);
    assert!(entries[0].verify().is_ok());

    // A cancelled hold cannot be settled.
    let err = engine
        .settle(
            hold.reservation_id,
            Credits::from_whole(10),
            None,
            OperationContext::new("late"),
        )
        .unwrap_err();
    assert!(matches!(err, LedgerError::InvalidStateTransition { .. }));
}

#[test]
fn reserve_rejects_past_expiry() {
    let (engine, _store, _dir) = engine();
    let user_id = funded_user(&engine, 1_000);

    let err = engine
        .reserve(
            user_id,
            ReserveRequest {
                expires_at: Some(chrono::Utc::now() - chrono::Duration::minutes(1)),
                ..ReserveRequest::new(Credits::from_whole(50), ReservationType::Streaming)
            },
            OperationContext::new("stale"),
        )
        .unwrap_err();
    assert!(matches!(err, LedgerError::InvalidInput(_)));
}

#[test]
fn reserve_rejects_ttl_beyond_cap() {
    let (engine, _store, _dir) = engine();
    let user_id = funded_user(&engine, 1_000);

    let err = engine
        .reserve(
            user_id,
            ReserveRequest {
                ttl_minutes: Some(61),
                ..ReserveRequest::new(Credits::from_whole(50), ReservationType::Batch)
            },
            OperationContext::new("too long"),
        )
        .unwrap_err();
    assert!(matches!(err, LedgerError::InvalidInput(_)));
}

#[test]
fn reserve_rejects_extreme_ttl_overrides() {
    let (engine, _store, _dir) = engine();
    let user_id = funded_user(&engine, 1_000);

    // Overflow-scale and non-positive overrides are rejected as bad
    // input, never allowed to reach date arithmetic.
    for ttl in [i64::MAX, i64::MIN, 0, -5] {
        let err = engine
            .reserve(
                user_id,
                ReserveRequest {
                    ttl_minutes: Some(ttl),
                    ..ReserveRequest::new(Credits::from_whole(50), ReservationType::Streaming)
                },
                OperationContext::new("extreme ttl"),
            )
            .unwrap_err();
        assert!(matches!(err, LedgerError::InvalidInput(_)), "ttl {ttl}");
    }

    // Nothing was held.
    assert_eq!(
        engine.get_account(user_id).unwrap().balance,
        Credits::from_whole(1_000)
    );
}

#[test]
fn reserve_rejects_insufficient_funds_without_writing() {
    let (engine, store, _dir) = engine();
    let user_id = funded_user(&engine, 40);

    let err = engine
        .reserve(
            user_id,
            ReserveRequest::new(Credits::from_whole(50), ReservationType::Streaming),
            OperationContext::new("too large a hold"),
        )
        .unwrap_err();
    assert!(matches!(err, LedgerError::InsufficientFunds { .. }));

    // Balance intact, no reservation row, no audit row beyond funding.
    assert_eq!(
        engine.get_account(user_id).unwrap().balance,
        Credits::from_whole(40)
    );
    assert_eq!(engine.list_audit(user_id, 10, 0).unwrap().len(), 1);
    assert!(store
        .list_expired_reservations(chrono::Utc::now() + chrono::Duration::minutes(61), 10)
        .unwrap()
        .is_empty());
}

#[test]
fn reserve_rejects_amount_above_ceiling() {
    let (engine, _store, _dir) = engine();
    let err = engine
        .reserve(
            UserId::generate(),
            ReserveRequest::new(Credits::from_whole(10_001), ReservationType::Manual),
            OperationContext::new("huge"),
        )
        .unwrap_err();
    assert!(matches!(err, LedgerError::SafetyLimitExceeded { .. }));
}

#[test]
fn record_usage_charges_ceiling_credits() {
    let (engine, _store, _dir) = engine();
    let user_id = funded_user(&engine, 100);

    // 10k in, 5k out on the static sonnet pricing: $0.105 = 10.5 credits,
    // charged as 11.
    let record = engine
        .record_usage(
            user_id,
            UsageCharge::new("anthropic", "claude-3-5-sonnet", 10_000, 5_000),
            OperationContext::new("chat completion"),
        )
        .unwrap();

    assert_eq!(record.credits_used, Credits::from_f64(10.5));
    assert_eq!(record.credits_charged, Credits::from_whole(11));
    assert!(record.verify().is_ok());

    let account = engine.get_account(user_id).unwrap();
    assert_eq!(account.balance, Credits::from_whole(89));

    let entries = engine.list_audit(user_id, 10, 0).unwrap();
    assert_eq!(entries[0].operation, AuditOperation::Deduct);
    assert_eq!(entries[0].credits_amount, Credits::from_whole(11));
    assert_eq!(
        entries[0].related.as_ref().map(|r| r.kind.as_str()),
        Some("usage_record")
    );

    let stats = engine.get_usage_stats(user_id).unwrap();
    assert_eq!(stats.total_records, 1);
    assert_eq!(stats.total_credits_charged, Credits::from_whole(11));
}

#[test]
fn audit_history_reconstructs_balance() {
    let (engine, _store, _dir) = engine();
    let user_id = funded_user(&engine, 500);

    engine
        .deduct(user_id, Credits::from_whole(120), OperationContext::new("a"))
        .unwrap();
    let hold = engine
        .reserve(
            user_id,
            ReserveRequest::new(Credits::from_whole(60), ReservationType::Streaming),
            OperationContext::new("b"),
        )
        .unwrap();
    engine
        .settle(
            hold.reservation_id,
            Credits::from_whole(45),
            None,
            OperationContext::new("b"),
        )
        .unwrap();

    // Replaying the audit trail oldest-first lands on the live balance.
    let mut entries = engine.list_audit(user_id, 100, 0).unwrap();
    entries.reverse();
    let mut replayed = Credits::ZERO;
    for entry in &entries {
        assert!(entry.verify().is_ok());
        assert_eq!(entry.balance_before, replayed);
        replayed = entry.balance_after;
    }
    assert_eq!(replayed, engine.get_account(user_id).unwrap().balance);
    assert_eq!(replayed, Credits::from_whole(335));
}
