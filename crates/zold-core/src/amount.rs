//! Fixed-point money type.
//!
//! All monetary values are in zents (1 ZLD = 2^24 zents), stored as a
//! signed 64-bit integer. Arithmetic is checked; overflow is a hard error.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::constants::COIN;
use crate::error::AmountError;

/// A signed fixed-point amount of ZLD.
///
/// Negative amounts are outgoing payments, positive amounts incoming.
#[derive(
    Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default,
)]
pub struct Amount(i64);

impl Amount {
    /// The zero amount.
    pub const ZERO: Self = Self(0);

    /// Largest representable amount.
    pub const MAX: Self = Self(i64::MAX);

    /// Create an amount from a raw zents count.
    pub fn from_zents(zents: i64) -> Self {
        Self(zents)
    }

    /// Create an amount from a ZLD value, rounding to the nearest zent.
    pub fn from_zld(zld: f64) -> Result<Self, AmountError> {
        let zents = zld * COIN as f64;
        if !zents.is_finite() || zents.abs() >= i64::MAX as f64 {
            return Err(AmountError::Overflow);
        }
        Ok(Self(zents.round() as i64))
    }

    /// The raw zents count.
    pub fn zents(&self) -> i64 {
        self.0
    }

    /// The amount as a floating-point ZLD value (display only).
    pub fn to_zld(&self) -> f64 {
        self.0 as f64 / COIN as f64
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    pub fn is_positive(&self) -> bool {
        self.0 > 0
    }

    pub fn is_negative(&self) -> bool {
        self.0 < 0
    }

    /// Checked addition.
    pub fn checked_add(self, other: Self) -> Result<Self, AmountError> {
        self.0
            .checked_add(other.0)
            .map(Self)
            .ok_or(AmountError::Overflow)
    }

    /// Checked subtraction.
    pub fn checked_sub(self, other: Self) -> Result<Self, AmountError> {
        self.0
            .checked_sub(other.0)
            .map(Self)
            .ok_or(AmountError::Overflow)
    }

    /// Checked multiplication by a signed integer.
    pub fn checked_mul(self, factor: i64) -> Result<Self, AmountError> {
        self.0
            .checked_mul(factor)
            .map(Self)
            .ok_or(AmountError::Overflow)
    }

    /// Checked negation.
    pub fn checked_neg(self) -> Result<Self, AmountError> {
        self.0.checked_neg().map(Self).ok_or(AmountError::Overflow)
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2}", self.to_zld())
    }
}
