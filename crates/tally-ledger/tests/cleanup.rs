//! Cleanup sweep tests.
//!
//! Expiry is wall-clock driven, so these tests place holds with very
//! short absolute expiries and sleep past them.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use chrono::Utc;
use tally_core::{
    AuditOperation, Credits, ReservationId, ReservationStatus, ReservationType, UserId,
};
use tally_ledger::{
    CleanupService, LedgerConfig, LedgerEngine, OperationContext, ReserveRequest,
};
use tally_store::{RocksStore, Store};
use tempfile::TempDir;

fn setup(config: LedgerConfig) -> (LedgerEngine, Arc<CleanupService>, Arc<RocksStore>, TempDir) {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(RocksStore::open(dir.path()).unwrap());
    let engine = LedgerEngine::new(store.clone(), config.clone());
    let service = Arc::new(CleanupService::new(store.clone(), engine.locks(), &config));
    (engine, service, store, dir)
}

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

/// Place a hold that lapses after roughly a second.
fn short_hold(engine: &LedgerEngine, user_id: UserId, amount: i64) -> ReservationId {
    engine
        .reserve(
            user_id,
            ReserveRequest {
                expires_at: Some(Utc::now() + chrono::Duration::milliseconds(1_200)),
                ..ReserveRequest::new(Credits::from_whole(amount), ReservationType::Streaming)
            },
            OperationContext::new("short hold"),
        )
        .unwrap()
        .reservation_id
}

#[test]
fn sweep_refunds_lapsed_holds_and_leaves_active_ones() {
    let (engine, service, store, _dir) = setup(LedgerConfig::default());
    let user_id = funded_user(&engine, 1_000);

    let lapsing: Vec<_> = (0..3).map(|_| short_hold(&engine, user_id, 50)).collect();
    let active = engine
        .reserve(
            user_id,
            ReserveRequest::new(Credits::from_whole(30), ReservationType::Batch),
            OperationContext::new("long hold"),
        )
        .unwrap()
        .reservation_id;
    assert_eq!(
        engine.get_account(user_id).unwrap().balance,
        Credits::from_whole(820)
    );

    thread::sleep(Duration::from_millis(1_500));
    let report = service.run_once().unwrap();

    assert_eq!(report.processed, 3);
    assert_eq!(report.credits_refunded, Credits::from_whole(150));
    assert!(report.errors.is_empty());

    for id in &lapsing {
        let reservation = store.get_reservation(id).unwrap().unwrap();
        assert_eq!(reservation.status, ReservationStatus::Expired);
        assert!(reservation.actual_credits_used.is_none());
        assert!(reservation.error_reason.is_some());
    }
    let untouched = store.get_reservation(&active).unwrap().unwrap();
    assert_eq!(untouched.status, ReservationStatus::Active);

    // Full holds came back; the live one is still debited.
    assert_eq!(
        engine.get_account(user_id).unwrap().balance,
        Credits::from_whole(970)
    );

    // One expire audit row per lapsed hold, all credit-side consistent.
    let entries = engine.list_audit(user_id, 100, 0).unwrap();
    let expires: Vec<_> = entries
        .iter()
        .filter(|e| e.operation == AuditOperation::Expire)
        .collect();
    assert_eq!(expires.len(), 3);
    for entry in expires {
        assert_eq!(entry.credits_amount, Credits::from_whole(50));
        assert!(entry.verify().is_ok());
    }
}

#[test]
fn sweep_is_idempotent_and_updates_stats() {
    let (engine, service, _store, _dir) = setup(LedgerConfig::default());
    let user_id = funded_user(&engine, 200);
    short_hold(&engine, user_id, 40);

    thread::sleep(Duration::from_millis(1_500));
    let first = service.run_once().unwrap();
    assert_eq!(first.processed, 1);

    // Nothing left to do; stats keep counting runs.
    let second = service.run_once().unwrap();
    assert_eq!(second.processed, 0);
    assert_eq!(second.credits_refunded, Credits::ZERO);

    let stats = service.stats();
    assert_eq!(stats.total_runs, 2);
    assert_eq!(stats.total_reservations_processed, 1);
    assert_eq!(stats.total_credits_refunded, Credits::from_whole(40));
    assert!(stats.last_run_at.is_some());
}

#[test]
fn settled_hold_is_not_swept() {
    let (engine, service, _store, _dir) = setup(LedgerConfig::default());
    let user_id = funded_user(&engine, 200);

    let reservation_id = short_hold(&engine, user_id, 40);
    engine
        .settle(
            reservation_id,
            Credits::from_whole(25),
            None,
            OperationContext::new("settled before lapse"),
        )
        .unwrap();

    thread::sleep(Duration::from_millis(1_500));
    let report = service.run_once().unwrap();
    assert_eq!(report.processed, 0);

    // Balance reflects the settlement only: 200 - 40 + 15.
    assert_eq!(
        engine.get_account(user_id).unwrap().balance,
        Credits::from_whole(175)
    );
}

#[test]
fn sweep_purges_stale_tracker_entries() {
    let config = LedgerConfig {
        tracker_stale_after: Duration::ZERO,
        ..LedgerConfig::default()
    };
    let (engine, service, _store, _dir) = setup(config);
    let user_id = funded_user(&engine, 100);

    let tracker = service.tracker();
    let hold = engine
        .reserve(
            user_id,
            ReserveRequest::new(Credits::from_whole(20), ReservationType::Streaming),
            OperationContext::new("stream"),
        )
        .unwrap();
    tracker.record(hold.reservation_id, Credits::from_f64(3.2));
    assert_eq!(tracker.len(), 1);

    let report = service.run_once().unwrap();
    assert_eq!(report.tracker_purged, 1);
    assert!(tracker.is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn timer_lifecycle_is_idempotent() {
    let config = LedgerConfig {
        cleanup_interval: Duration::from_millis(50),
        ..LedgerConfig::default()
    };
    let (engine, service, _store, _dir) = setup(config);
    let user_id = funded_user(&engine, 200);
    short_hold(&engine, user_id, 40);

    assert!(!service.is_running());
    service.start();
    service.start(); // second start is a no-op
    assert!(service.is_running());

    // Let the hold lapse and a few ticks fire.
    tokio::time::sleep(Duration::from_millis(1_800)).await;

    service.stop().await;
    service.stop().await; // second stop is a no-op
    assert!(!service.is_running());

    let stats = service.stats();
    assert!(stats.total_runs >= 2);
    assert_eq!(stats.total_reservations_processed, 1);
    assert_eq!(
        engine.get_account(user_id).unwrap().balance,
        Credits::from_whole(200)
    );
}
