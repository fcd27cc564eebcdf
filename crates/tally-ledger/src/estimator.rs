//! Pre-flight cost estimation.
//!
//! Translates expected unit counts into credits before a request runs,
//! so a reservation can be sized. The exact charge at settlement never
//! depends on this module; buffering here only affects how large a hold
//! is taken up front.

use chrono::{DateTime, Utc};

use tally_core::{Credits, ModelKey, UnitPricing};

use crate::config::BufferPolicy;
use crate::pricing::PricingResolver;

/// How trustworthy the unit counts behind an estimate are.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EstimateConfidence {
    /// Counts came from the provider (e.g. a tokenizer or API echo).
    Exact,

    /// Counts were approximated heuristically (e.g. chars / 4).
    Heuristic,
}

/// A cost estimate for an upcoming request.
#[derive(Debug, Clone, Copy)]
pub struct CostEstimate {
    /// The pricing used.
    pub pricing: UnitPricing,

    /// Raw USD cost of the estimated units.
    pub cost_usd: f64,

    /// Exact credits the units would cost.
    pub credits_used: Credits,

    /// Whole credits the units would be charged (`ceil` of used).
    pub credits_charged: Credits,

    /// Recommended reservation size: charged credits inflated by the
    /// buffer policy, rounded up, never below one credit.
    pub credits_buffered: Credits,

    /// Confidence the estimate was produced at.
    pub confidence: EstimateConfidence,
}

/// Estimates request costs from unit counts and resolved pricing.
pub struct CostEstimator {
    resolver: PricingResolver,
    credit_value_usd: f64,
    buffer: BufferPolicy,
}

impl CostEstimator {
    /// Create an estimator.
    #[must_use]
    pub fn new(resolver: PricingResolver, credit_value_usd: f64, buffer: BufferPolicy) -> Self {
        Self {
            resolver,
            credit_value_usd,
            buffer,
        }
    }

    /// The pricing that would be used for a model at the given instant.
    #[must_use]
    pub fn pricing(&self, key: &ModelKey, at: DateTime<Utc>) -> UnitPricing {
        self.resolver.resolve(key, at)
    }

    /// Estimate the cost of a request against a model.
    #[must_use]
    pub fn estimate(
        &self,
        key: &ModelKey,
        input_units: u64,
        output_units: u64,
        confidence: EstimateConfidence,
        at: DateTime<Utc>,
    ) -> CostEstimate {
        let pricing = self.resolver.resolve(key, at);
        let cost_usd = pricing.cost_usd(input_units, output_units);
        let credits_used = Credits::from_usd(cost_usd, self.credit_value_usd);
        let credits_charged = credits_used.ceil_whole();

        let multiplier = self.buffer.multiplier(confidence, &key.provider);
        let mut credits_buffered = credits_charged.scale_by(multiplier).ceil_whole();
        if credits_buffered < Credits::ONE {
            credits_buffered = Credits::ONE;
        }

        CostEstimate {
            pricing,
            cost_usd,
            credits_used,
            credits_charged,
            credits_buffered,
            confidence,
        }
    }
}
