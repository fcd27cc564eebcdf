//! The tally credit ledger engine.
//!
//! Usage-based credit accounting for an AI chat product: atomic balance
//! mutation with an append-only audit trail, the reservation/settlement
//! state machine, pricing-driven cost estimation, queued refund
//! (compensation) processing, and expired-reservation cleanup.
//!
//! # Overview
//!
//! The typical call flow is estimate, reserve, do the work, settle:
//!
//! ```no_run
//! use std::sync::Arc;
//! use tally_core::{Credits, ModelKey, ReservationType, UserId};
//! use tally_ledger::{
//!     EstimateConfidence, LedgerConfig, LedgerEngine, OperationContext, ReserveRequest,
//! };
//! use tally_store::RocksStore;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let store = Arc::new(RocksStore::open("/var/lib/tally")?);
//! let engine = LedgerEngine::new(store, LedgerConfig::default());
//!
//! let user_id = UserId::generate();
//! engine.get_or_create_account(user_id)?;
//!
//! let key = ModelKey::new("anthropic", "claude-3-5-sonnet");
//! let estimate = engine.estimate(&key, 10_000, 5_000, EstimateConfidence::Exact);
//!
//! let hold = engine.reserve(
//!     user_id,
//!     ReserveRequest::new(estimate.credits_buffered, ReservationType::Streaming),
//!     OperationContext::new("chat completion"),
//! )?;
//!
//! // ... the model call happens ...
//!
//! let outcome = engine.settle(
//!     hold.reservation_id,
//!     Credits::from_f64(10.5),
//!     None,
//!     OperationContext::new("chat completion"),
//! )?;
//! # Ok(())
//! # }
//! ```
//!
//! The [`CompensationProcessor`] and [`CleanupService`] run alongside
//! the engine and must share its lock table ([`LedgerEngine::locks`]) so
//! their balance writes serialize with foreground operations.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod cleanup;
pub mod compensation;
pub mod config;
pub mod engine;
pub mod error;
pub mod estimator;
pub mod locks;
pub mod pricing;

pub use cleanup::{CleanupReport, CleanupService, CleanupStats, LiveUsageTracker};
pub use compensation::{CompensationOutcome, CompensationProcessor};
pub use config::{BufferPolicy, LedgerConfig};
pub use engine::{
    BalanceCheck, CancelOutcome, DeductOutcome, GrantOutcome, LedgerEngine, OperationContext,
    ReserveOutcome, ReserveRequest, SettleOutcome, UsageCharge,
};
pub use error::{LedgerError, Result};
pub use estimator::{CostEstimate, CostEstimator, EstimateConfidence};
pub use locks::UserLocks;
pub use pricing::{PricingResolver, StorePricing};
