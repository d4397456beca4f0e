//! Fixed-point money type.
//!
//! # Motivation
//!
//! Every amount in the ledger is a decimal currency value with two fraction
//! digits.  Amounts are stored as `i64` cents wrapped in [`Cents`] so that:
//! - Splitting a payment is exact integer arithmetic (no fractional-cent drift).
//! - Amounts cannot be mixed with unrelated integers (counts, day offsets)
//!   without an explicit [`Cents::new`].
//!
//! # Scale
//!
//! 1 currency unit = `Cents(100)`.
//!
//! # Decimal boundary
//!
//! Values entering from outside (CLI arguments, legacy documents, YAML) pass
//! through [`Cents::from_decimal`] / [`Cents::parse`], which round to two
//! fraction digits half-up (midpoint away from zero) and reject magnitudes
//! above [`MAX_AMOUNT`].  After the boundary all arithmetic is integer.
//!
//! The operators are unchecked like any `i64` arithmetic. Bounded inputs keep
//! sums of up to 9,000 amounts inside `i64`; the database enforces the same
//! bound per row.

use std::iter::Sum;
use std::ops::{Add, AddAssign, Neg, Sub, SubAssign};
use std::str::FromStr;

use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Cents per currency unit.
pub const CENTS_SCALE: i64 = 100;

/// Largest magnitude accepted at the decimal boundary: 10^13 units.
pub const MAX_AMOUNT: Cents = Cents(1_000_000_000_000_000);

// ---------------------------------------------------------------------------
// Cents newtype
// ---------------------------------------------------------------------------

/// A fixed-point monetary amount at 1e-2 scale.
///
/// There is intentionally no `From<i64>` implementation; use [`Cents::new`]
/// for raw cents or [`Cents::from_units`] for whole currency units.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Cents(i64);

impl Cents {
    /// Zero monetary amount.
    pub const ZERO: Cents = Cents(0);

    /// Construct from a raw cent count.
    #[inline]
    pub const fn new(raw: i64) -> Self {
        Cents(raw)
    }

    /// Extract the underlying cent count.
    #[inline]
    pub const fn raw(self) -> i64 {
        self.0
    }

    /// Whole currency units (e.g. `from_units(500)` == 500.00).
    ///
    /// Returns `None` beyond [`MAX_AMOUNT`].
    pub fn from_units(units: i64) -> Option<Cents> {
        units
            .checked_mul(CENTS_SCALE)
            .map(Cents)
            .filter(|c| c.within_bounds())
    }

    /// Convert a decimal value, rounding half-up to two fraction digits.
    ///
    /// Returns `None` beyond [`MAX_AMOUNT`].
    pub fn from_decimal(value: Decimal) -> Option<Cents> {
        let rounded = value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
        rounded
            .checked_mul(Decimal::from(CENTS_SCALE))?
            .to_i64()
            .map(Cents)
            .filter(|c| c.within_bounds())
    }

    /// `|self| <= MAX_AMOUNT`.
    #[inline]
    pub fn within_bounds(self) -> bool {
        self.0.checked_abs().is_some_and(|a| a <= MAX_AMOUNT.0)
    }

    /// Parse a decimal string such as `"500"`, `"12.5"` or `"0.125"`.
    pub fn parse(raw: &str) -> Result<Cents, ParseCentsError> {
        let trimmed = raw.trim();
        let value = Decimal::from_str(trimmed)
            .map_err(|_| ParseCentsError::Invalid(trimmed.to_string()))?;
        Cents::from_decimal(value).ok_or_else(|| ParseCentsError::OutOfRange(trimmed.to_string()))
    }

    /// Exact decimal rendering (scale 2).
    pub fn to_decimal(self) -> Decimal {
        Decimal::new(self.0, 2)
    }

    #[inline]
    pub fn saturating_add(self, rhs: Cents) -> Cents {
        Cents(self.0.saturating_add(rhs.0))
    }

    #[inline]
    pub fn saturating_sub(self, rhs: Cents) -> Cents {
        Cents(self.0.saturating_sub(rhs.0))
    }

    /// `max(0, self)`.
    #[inline]
    pub fn clamp_non_negative(self) -> Cents {
        if self.0 < 0 {
            Cents::ZERO
        } else {
            self
        }
    }

    #[inline]
    pub fn is_positive(self) -> bool {
        self.0 > 0
    }

    #[inline]
    pub fn is_zero(self) -> bool {
        self.0 == 0
    }

    #[inline]
    pub fn is_negative(self) -> bool {
        self.0 < 0
    }
}

// ---------------------------------------------------------------------------
// Parse error
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseCentsError {
    /// Not a decimal number.
    Invalid(String),
    /// A decimal number beyond [`MAX_AMOUNT`].
    OutOfRange(String),
}

impl std::fmt::Display for ParseCentsError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Invalid(raw) => write!(f, "invalid amount '{raw}': expected a decimal number"),
            Self::OutOfRange(raw) => write!(f, "amount '{raw}' exceeds {MAX_AMOUNT}"),
        }
    }
}

impl std::error::Error for ParseCentsError {}

impl FromStr for Cents {
    type Err = ParseCentsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Cents::parse(s)
    }
}

// ---------------------------------------------------------------------------
// Arithmetic operators (closed over Cents)
// ---------------------------------------------------------------------------

impl Add for Cents {
    type Output = Cents;
    #[inline]
    fn add(self, rhs: Cents) -> Cents {
        Cents(self.0 + rhs.0)
    }
}

impl Sub for Cents {
    type Output = Cents;
    #[inline]
    fn sub(self, rhs: Cents) -> Cents {
        Cents(self.0 - rhs.0)
    }
}

impl Neg for Cents {
    type Output = Cents;
    #[inline]
    fn neg(self) -> Cents {
        Cents(-self.0)
    }
}

impl AddAssign for Cents {
    #[inline]
    fn add_assign(&mut self, rhs: Cents) {
        self.0 += rhs.0;
    }
}

impl SubAssign for Cents {
    #[inline]
    fn sub_assign(&mut self, rhs: Cents) {
        self.0 -= rhs.0;
    }
}

impl Sum for Cents {
    fn sum<I: Iterator<Item = Cents>>(iter: I) -> Cents {
        iter.fold(Cents::ZERO, |acc, c| acc + c)
    }
}

impl<'a> Sum<&'a Cents> for Cents {
    fn sum<I: Iterator<Item = &'a Cents>>(iter: I) -> Cents {
        iter.fold(Cents::ZERO, |acc, c| acc + *c)
    }
}

// ---------------------------------------------------------------------------
// Display
// ---------------------------------------------------------------------------

impl std::fmt::Display for Cents {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let units = self.0 / CENTS_SCALE;
        let frac = (self.0 % CENTS_SCALE).abs();
        // -0.50 would otherwise print as 0.50 since units truncates to 0.
        if self.0 < 0 && units == 0 {
            write!(f, "-{units}.{frac:02}")
        } else {
            write!(f, "{units}.{frac:02}")
        }
    }
}

// ---------------------------------------------------------------------------
// Serde: decimal string on the way out, string or number on the way in
// ---------------------------------------------------------------------------

impl Serialize for Cents {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawAmount {
    Text(String),
    Int(i64),
    Float(f64),
}

impl<'de> Deserialize<'de> for Cents {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        use serde::de::Error;

        match RawAmount::deserialize(deserializer)? {
            RawAmount::Text(s) => Cents::parse(&s).map_err(D::Error::custom),
            RawAmount::Int(units) => Cents::from_units(units)
                .ok_or_else(|| D::Error::custom(format!("amount {units} is out of range"))),
            RawAmount::Float(v) => Decimal::from_f64(v)
                .and_then(Cents::from_decimal)
                .ok_or_else(|| D::Error::custom(format!("amount {v} is not representable"))),
        }
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
