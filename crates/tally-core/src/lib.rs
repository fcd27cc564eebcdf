//! Core types for the tally credit ledger.
//!
//! This crate provides the foundational types used throughout tally:
//!
//! - **Identifiers**: `UserId`, `ReservationId`, `EntryId`, `SettlementId`,
//!   `CompensationId`, `RecordId`
//! - **Money**: `Credits` (fixed-point, 4 decimal places)
//! - **Accounts**: `UserAccount`
//! - **Audit**: `AuditEntry`, `AuditOperation`
//! - **Reservations**: `Reservation`, `ReservationStatus`, `ReservationType`
//! - **Settlements**: `Settlement`, `SettlementType`, `UsageBreakdown`
//! - **Compensations**: `CreditCompensation`, `CompensationStatus`
//! - **Usage**: `UsageRecord`, `UsageStats`
//! - **Pricing**: `ModelKey`, `UnitPricing`, `PricingEntry`, `PricingSource`
//!
//! # Credit unit
//!
//! Credits are stored as `i64` in units of 1/10,000 credit (4 decimal
//! places) to avoid floating point precision issues. The monetary value
//! of a credit is configured by the ledger (`credit_value_usd`).

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod account;
pub mod audit;
pub mod compensation;
pub mod credits;
pub mod ids;
pub mod pricing;
pub mod reservation;
pub mod settlement;
pub mod usage;

pub use account::UserAccount;
pub use audit::{AuditEntry, AuditOperation, RelatedEntity, RequestProvenance};
pub use compensation::{CompensationStatus, CreditCompensation};
pub use credits::Credits;
pub use ids::{
    CompensationId, EntryId, IdError, RecordId, ReservationId, SettlementId, UserId,
};
pub use pricing::{ModelKey, PricingEntry, PricingSource, StaticPricing, UnitPricing};
pub use reservation::{
    Reservation, ReservationContext, ReservationError, ReservationStatus, ReservationType,
    CONTEXT_SCHEMA_VERSION, DEFAULT_TTL_MINUTES, MAX_TTL_MINUTES,
};
pub use settlement::{Settlement, SettlementType, UsageBreakdown};
pub use usage::{UsageRecord, UsageStats};
