//! Usage records: one row per billable model call.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Credits, RecordId, UnitPricing, UserId};

/// One billable model invocation.
///
/// `credits_charged` is always `ceil(credits_used)`; the constructor
/// computes it so a record violating the rule cannot be built.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageRecord {
    /// Record id (ULID, time-ordered).
    pub id: RecordId,

    /// The user charged.
    pub user_id: UserId,

    /// Conversation correlation id, if supplied.
    pub conversation_id: Option<String>,

    /// Message correlation id, if supplied.
    pub message_id: Option<String>,

    /// Model provider.
    pub provider: String,

    /// Model name.
    pub model: String,

    /// Input (prompt) units.
    pub input_units: u64,

    /// Output (completion) units.
    pub output_units: u64,

    /// USD per 1,000 input units at the time of the call.
    pub input_unit_cost_usd: f64,

    /// USD per 1,000 output units at the time of the call.
    pub output_unit_cost_usd: f64,

    /// Derived monetary cost in USD.
    pub cost_usd: f64,

    /// Exact computed credits (4 decimal places).
    pub credits_used: Credits,

    /// Chargeable credits: `ceil(credits_used)`.
    pub credits_charged: Credits,

    /// When the call was recorded.
    pub created_at: DateTime<Utc>,
}

impl UsageRecord {
    /// Build a record from unit counts and the pricing in effect.
    ///
    /// `credit_value_usd` is the USD value of one credit.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn new(
        user_id: UserId,
        provider: impl Into<String>,
        model: impl Into<String>,
        input_units: u64,
        output_units: u64,
        pricing: &UnitPricing,
        credit_value_usd: f64,
    ) -> Self {
        let cost_usd = pricing.cost_usd(input_units, output_units);
        let credits_used = Credits::from_usd(cost_usd, credit_value_usd);
        Self {
            id: RecordId::generate(),
            user_id,
            conversation_id: None,
            message_id: None,
            provider: provider.into(),
            model: model.into(),
            input_units,
            output_units,
            input_unit_cost_usd: pricing.input_usd_per_thousand,
            output_unit_cost_usd: pricing.output_usd_per_thousand,
            cost_usd,
            credits_used,
            credits_charged: credits_used.ceil_whole(),
            created_at: Utc::now(),
        }
    }

    /// Attach conversation/message correlation ids.
    #[must_use]
    pub fn with_correlation(
        mut self,
        conversation_id: Option<String>,
        message_id: Option<String>,
    ) -> Self {
        self.conversation_id = conversation_id;
        self.message_id = message_id;
        self
    }

    /// Verify the ceiling-charge invariant.
    ///
    /// # Errors
    ///
    /// Returns a description of the violation.
    pub fn verify(&self) -> Result<(), String> {
        if self.credits_charged != self.credits_used.ceil_whole() {
            return Err(format!(
                "usage record {}: charged {} != ceil(used {})",
                self.id, self.credits_charged, self.credits_used
            ));
        }
        Ok(())
    }
}

/// Aggregate usage for a user.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageStats {
    /// Number of billable calls.
    pub total_records: u64,

    /// Total input units.
    pub total_input_units: u64,

    /// Total output units.
    pub total_output_units: u64,

    /// Total chargeable credits.
    pub total_credits_charged: Credits,

    /// Total derived USD cost.
    pub total_cost_usd: f64,
}

impl UsageStats {
    /// Fold one record into the aggregate.
    pub fn accumulate(&mut self, record: &UsageRecord) {
        self.total_records += 1;
        self.total_input_units += record.input_units;
        self.total_output_units += record.output_units;
        self.total_credits_charged += record.credits_charged;
        self.total_cost_usd += record.cost_usd;
    }
}
