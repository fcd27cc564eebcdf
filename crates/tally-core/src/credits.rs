//! The fixed-point credit amount type.
//!
//! Balances and charges are stored as `i64` in units of 1/10,000 credit
//! (four decimal places) to avoid floating point drift in accounting.
//! Floats only appear at the edges: pricing math in the estimator and
//! display formatting.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, AddAssign, Neg, Sub, SubAssign};

/// Raw units per whole credit (4 decimal places).
const SCALE: i64 = 10_000;

/// A credit amount with 4 decimal places of precision.
///
/// Stored as raw `i64` units of 1/10,000 credit. Negative values are
/// representable: the engine tolerates small negative balance excursions
/// on the settlement excess path.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Credits(i64);

impl Credits {
    /// Zero credits.
    pub const ZERO: Self = Self(0);

    /// One whole credit.
    pub const ONE: Self = Self(SCALE);

    /// Settlement reconciliation tolerance: 0.01 credits.
    pub const EPSILON: Self = Self(SCALE / 100);

    /// Safety ceiling for a single balance move (deduct/grant/refund).
    pub const MAX_SINGLE_MOVE: Self = Self::from_whole(1_000);

    /// Safety ceiling for a single reservation hold.
    pub const MAX_RESERVATION: Self = Self::from_whole(10_000);

    /// Create from a whole number of credits.
    #[must_use]
    pub const fn from_whole(credits: i64) -> Self {
        Self(credits * SCALE)
    }

    /// Create from raw 1/10,000-credit units.
    #[must_use]
    pub const fn from_raw(raw: i64) -> Self {
        Self(raw)
    }

    /// Create from a float, rounding to 4 decimal places.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
    pub fn from_f64(credits: f64) -> Self {
        Self((credits * SCALE as f64).round() as i64)
    }

    /// The raw 1/10,000-credit units.
    #[must_use]
    pub const fn raw(self) -> i64 {
        self.0
    }

    /// Approximate value as a float (for display and ratio math only).
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn as_f64(self) -> f64 {
        self.0 as f64 / SCALE as f64
    }

    /// Round up to the next whole credit.
    ///
    /// This implements the chargeable-credits rule: users are always
    /// charged `ceil` of the exact computed credits.
    #[must_use]
    pub const fn ceil_whole(self) -> Self {
        let q = self.0.div_euclid(SCALE);
        let r = self.0.rem_euclid(SCALE);
        if r == 0 {
            Self(q * SCALE)
        } else {
            Self((q + 1) * SCALE)
        }
    }

    /// Whether the amount is strictly positive.
    #[must_use]
    pub const fn is_positive(self) -> bool {
        self.0 > 0
    }

    /// Whether the amount is negative.
    #[must_use]
    pub const fn is_negative(self) -> bool {
        self.0 < 0
    }

    /// Absolute value.
    #[must_use]
    pub const fn abs(self) -> Self {
        Self(self.0.abs())
    }

    /// Checked addition.
    #[must_use]
    pub const fn checked_add(self, rhs: Self) -> Option<Self> {
        match self.0.checked_add(rhs.0) {
            Some(v) => Some(Self(v)),
            None => None,
        }
    }

    /// Checked subtraction.
    #[must_use]
    pub const fn checked_sub(self, rhs: Self) -> Option<Self> {
        match self.0.checked_sub(rhs.0) {
            Some(v) => Some(Self(v)),
            None => None,
        }
    }

    /// Saturating subtraction, floored at zero.
    #[must_use]
    pub const fn saturating_sub_floor_zero(self, rhs: Self) -> Self {
        let v = self.0.saturating_sub(rhs.0);
        if v < 0 {
            Self(0)
        } else {
            Self(v)
        }
    }

    /// Scale by a float factor, rounding to 4 decimal places.
    ///
    /// Used for advisory buffer sizing only, never for settlement charges.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
    pub fn scale_by(self, factor: f64) -> Self {
        Self((self.0 as f64 * factor).round() as i64)
    }

    /// Whether two amounts agree within [`Credits::EPSILON`].
    #[must_use]
    pub const fn approx_eq(self, other: Self) -> bool {
        (self.0 - other.0).abs() <= Self::EPSILON.0
    }

    /// Convert a USD amount to credits at the given exchange rate
    /// (USD per credit).
    #[must_use]
    pub fn from_usd(usd: f64, credit_value_usd: f64) -> Self {
        if credit_value_usd <= 0.0 {
            return Self::ZERO;
        }
        Self::from_f64(usd / credit_value_usd)
    }

    /// Convert to USD at the given exchange rate (USD per credit).
    #[must_use]
    pub fn to_usd(self, credit_value_usd: f64) -> f64 {
        self.as_f64() * credit_value_usd
    }
}

impl Add for Credits {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self(self.0 + rhs.0)
    }
}

impl AddAssign for Credits {
    fn add_assign(&mut self, rhs: Self) {
        self.0 += rhs.0;
    }
}

impl Sub for Credits {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self {
        Self(self.0 - rhs.0)
    }
}

impl SubAssign for Credits {
    fn sub_assign(&mut self, rhs: Self) {
        self.0 -= rhs.0;
    }
}

impl Neg for Credits {
    type Output = Self;

    fn neg(self) -> Self {
        Self(-self.0)
    }
}

impl fmt::Display for Credits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.abs();
        write!(f, "{sign}{}.{:04}", abs / SCALE, abs % SCALE)
    }
}
