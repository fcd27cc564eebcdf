//! Pricing types and the static fallback table.
//!
//! Unit costs are quoted in USD per 1,000 units (tokens). Lookups go
//! through the [`PricingSource`] trait so the resolver can compose a
//! store-backed source (versioned, operator-maintained) with the static
//! table here, in a fixed order.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Key for looking up model pricing.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ModelKey {
    /// Provider name (e.g. "anthropic", "openai").
    pub provider: String,

    /// Model name (e.g. "claude-sonnet-4", "gpt-4o").
    pub model: String,
}

impl ModelKey {
    /// Create a new model key.
    #[must_use]
    pub fn new(provider: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
        }
    }
}

/// Cost per 1,000 units for one model.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct UnitPricing {
    /// USD per 1,000 input units.
    pub input_usd_per_thousand: f64,

    /// USD per 1,000 output units.
    pub output_usd_per_thousand: f64,
}

impl UnitPricing {
    /// Conservative generic pricing for unrecognized models. Priced above
    /// typical frontier rates so unknown models are never under-charged.
    #[must_use]
    pub const fn conservative_default() -> Self {
        Self {
            input_usd_per_thousand: 0.01,
            output_usd_per_thousand: 0.03,
        }
    }

    /// USD cost of the given unit counts under this pricing.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn cost_usd(&self, input_units: u64, output_units: u64) -> f64 {
        input_units as f64 / 1_000.0 * self.input_usd_per_thousand
            + output_units as f64 / 1_000.0 * self.output_usd_per_thousand
    }
}

/// One versioned pricing row with an effective window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricingEntry {
    /// The pricing in effect during the window.
    pub pricing: UnitPricing,

    /// When this entry takes effect.
    pub effective_at: DateTime<Utc>,

    /// When this entry stops applying, if scheduled.
    pub deprecated_at: Option<DateTime<Utc>>,
}

impl PricingEntry {
    /// Validate the effective/deprecated ordering invariant.
    ///
    /// # Errors
    ///
    /// Returns a description if `deprecated_at` is not after
    /// `effective_at`.
    pub fn validate(&self) -> Result<(), String> {
        if let Some(deprecated) = self.deprecated_at {
            if deprecated <= self.effective_at {
                return Err(format!(
                    "pricing entry deprecated_at {} must be after effective_at {}",
                    deprecated, self.effective_at
                ));
            }
        }
        Ok(())
    }

    /// Whether the entry applies at the given instant.
    #[must_use]
    pub fn applies_at(&self, at: DateTime<Utc>) -> bool {
        self.effective_at <= at && self.deprecated_at.map_or(true, |d| d > at)
    }
}

/// A source of model pricing.
///
/// Sources are composed by the resolver and tried in a fixed order; a
/// `None` means "not known here", not an error.
pub trait PricingSource: Send + Sync {
    /// Resolve pricing for a model at the given instant.
    fn resolve(&self, key: &ModelKey, at: DateTime<Utc>) -> Option<UnitPricing>;
}

/// Built-in pricing table used when no store-backed entry matches.
#[derive(Debug, Clone)]
pub struct StaticPricing {
    table: HashMap<ModelKey, UnitPricing>,
}

impl StaticPricing {
    /// Look up a model in the table.
    #[must_use]
    pub fn get(&self, key: &ModelKey) -> Option<UnitPricing> {
        self.table.get(key).copied()
    }
}

impl Default for StaticPricing {
    fn default() -> Self {
        let mut table = HashMap::new();

        // Anthropic
        table.insert(
            ModelKey::new("anthropic", "claude-3-5-sonnet"),
            UnitPricing {
                input_usd_per_thousand: 0.003,
                output_usd_per_thousand: 0.015,
            },
        );
        table.insert(
            ModelKey::new("anthropic", "claude-3-5-haiku"),
            UnitPricing {
                input_usd_per_thousand: 0.0008,
                output_usd_per_thousand: 0.004,
            },
        );
        table.insert(
            ModelKey::new("anthropic", "claude-3-opus"),
            UnitPricing {
                input_usd_per_thousand: 0.015,
                output_usd_per_thousand: 0.075,
            },
        );

        // OpenAI
        table.insert(
            ModelKey::new("openai", "gpt-4o"),
            UnitPricing {
                input_usd_per_thousand: 0.0025,
                output_usd_per_thousand: 0.01,
            },
        );
        table.insert(
            ModelKey::new("openai", "gpt-4o-mini"),
            UnitPricing {
                input_usd_per_thousand: 0.000_15,
                output_usd_per_thousand: 0.0006,
            },
        );

        // Google
        table.insert(
            ModelKey::new("google", "gemini-1.5-pro"),
            UnitPricing {
                input_usd_per_thousand: 0.001_25,
                output_usd_per_thousand: 0.005,
            },
        );
        table.insert(
            ModelKey::new("google", "gemini-1.5-flash"),
            UnitPricing {
                input_usd_per_thousand: 0.000_075,
                output_usd_per_thousand: 0.0003,
            },
        );

        Self { table }
    }
}

impl PricingSource for StaticPricing {
    fn resolve(&self, key: &ModelKey, _at: DateTime<Utc>) -> Option<UnitPricing> {
        self.get(key)
    }
}
