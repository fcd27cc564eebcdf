//! Ledger configuration.
//!
//! All tunables live here and are passed explicitly at construction; the
//! ledger has no ambient globals.

use std::collections::HashMap;
use std::time::Duration;

use tally_core::reservation::DEFAULT_TTL_MINUTES;

use crate::estimator::EstimateConfidence;

/// Advisory buffer sizing for pre-flight reservations.
///
/// The multiplier inflates the estimated cost so a hold survives modest
/// estimator error. These coefficients are policy, not invariants: the
/// buffer is applied to reservation sizing only, never to the exact
/// settlement charge.
#[derive(Debug, Clone)]
pub struct BufferPolicy {
    /// Multiplier when unit counts came from the provider API.
    pub exact_multiplier: f64,

    /// Multiplier when unit counts were estimated heuristically.
    pub heuristic_multiplier: f64,

    /// Per-provider variance adjustment, multiplied on top of the base.
    pub provider_variance: HashMap<String, f64>,
}

impl Default for BufferPolicy {
    fn default() -> Self {
        Self {
            exact_multiplier: 1.05,
            heuristic_multiplier: 1.25,
            provider_variance: HashMap::new(),
        }
    }
}

impl BufferPolicy {
    /// The effective multiplier for a provider at the given confidence.
    #[must_use]
    pub fn multiplier(&self, confidence: EstimateConfidence, provider: &str) -> f64 {
        let base = match confidence {
            EstimateConfidence::Exact => self.exact_multiplier,
            EstimateConfidence::Heuristic => self.heuristic_multiplier,
        };
        base * self.provider_variance.get(provider).copied().unwrap_or(1.0)
    }
}

/// Configuration for the ledger engine and its background services.
#[derive(Debug, Clone)]
pub struct LedgerConfig {
    /// USD value of one credit.
    pub credit_value_usd: f64,

    /// Reservation TTL when the caller does not override it, in minutes.
    pub default_ttl_minutes: i64,

    /// How many pending compensations one processor run handles.
    pub compensation_batch_size: usize,

    /// How many expired reservations one cleanup sweep handles.
    pub cleanup_batch_size: usize,

    /// Interval between automatic cleanup sweeps.
    pub cleanup_interval: Duration,

    /// Age after which live-tracker entries are purged.
    pub tracker_stale_after: Duration,

    /// Reservation buffer sizing policy.
    pub buffer: BufferPolicy,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            credit_value_usd: 0.01,
            default_ttl_minutes: DEFAULT_TTL_MINUTES,
            compensation_batch_size: 100,
            cleanup_batch_size: 100,
            cleanup_interval: Duration::from_secs(60),
            tracker_stale_after: Duration::from_secs(300),
            buffer: BufferPolicy::default(),
        }
    }
}
