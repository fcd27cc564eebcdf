//! Pricing resolution.
//!
//! Composes pricing sources in a fixed, documented order: the
//! store-backed versioned table first, the built-in static table second,
//! and a conservative generic default when neither recognizes the model.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use tally_core::{ModelKey, PricingSource, StaticPricing, UnitPricing};
use tally_store::Store;

/// Store-backed pricing: versioned rows with effective/deprecated windows.
///
/// Resolution picks the most recent entry whose effective date has
/// passed and whose deprecation date (if any) has not. Lookup failures
/// fall through to the next source rather than erroring: estimation is
/// best-effort by contract.
pub struct StorePricing {
    store: Arc<dyn Store>,
}

impl StorePricing {
    /// Create a store-backed pricing source.
    #[must_use]
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }
}

impl PricingSource for StorePricing {
    fn resolve(&self, key: &ModelKey, at: DateTime<Utc>) -> Option<UnitPricing> {
        match self.store.get_pricing_entries(key) {
            Ok(entries) => entries
                .iter()
                .filter(|e| e.applies_at(at))
                .max_by_key(|e| e.effective_at)
                .map(|e| e.pricing),
            Err(err) => {
                tracing::warn!(
                    provider = %key.provider,
                    model = %key.model,
                    error = %err,
                    "pricing lookup failed, falling through to static table"
                );
                None
            }
        }
    }
}

/// Ordered composition of pricing sources with a guaranteed answer.
pub struct PricingResolver {
    sources: Vec<Box<dyn PricingSource>>,
    fallback: UnitPricing,
}

impl PricingResolver {
    /// Compose sources tried in order, with a final fallback.
    #[must_use]
    pub fn new(sources: Vec<Box<dyn PricingSource>>, fallback: UnitPricing) -> Self {
        Self { sources, fallback }
    }

    /// The standard composition: store-backed, then static table, then
    /// the conservative generic default.
    #[must_use]
    pub fn with_default_sources(store: Arc<dyn Store>) -> Self {
        Self::new(
            vec![
                Box::new(StorePricing::new(store)),
                Box::new(StaticPricing::default()),
            ],
            UnitPricing::conservative_default(),
        )
    }

    /// Resolve pricing for a model at the given instant. Never fails.
    #[must_use]
    pub fn resolve(&self, key: &ModelKey, at: DateTime<Utc>) -> UnitPricing {
        for source in &self.sources {
            if let Some(pricing) = source.resolve(key, at) {
                return pricing;
            }
        }
        tracing::debug!(
            provider = %key.provider,
            model = %key.model,
            "no pricing source recognized model, using generic default"
        );
        self.fallback
    }
}
