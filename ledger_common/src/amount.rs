use std::{
    fmt::Display,
    iter::Sum,
    ops::Add,
    str::FromStr,
};

use rust_decimal::{prelude::ToPrimitive, Decimal};
use serde::{Deserialize, Serialize};
use sqlx::Type;
use thiserror::Error;

use crate::op;

pub const DEFAULT_CURRENCY_CODE: &str = "BDT";
/// Ledger amounts are stored in minor units (e.g. paisa, cents). Two decimal places.
pub const MINOR_UNITS_PER_MAJOR: i64 = 100;
const DECIMAL_PLACES: u32 = 2;

//--------------------------------------       Amount        ---------------------------------------------------------
/// A fixed-point monetary amount, held as an integer number of minor units.
///
/// There is deliberately no floating point anywhere in the conversion paths. Gateway payloads arrive as decimal
/// strings ("150.00") and are parsed with [`Amount::from_str`], which rejects anything that is not exactly
/// representable with two decimal places.
#[derive(Debug, Clone, Copy, Default, Type, Ord, PartialOrd, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[sqlx(transparent)]
#[serde(transparent)]
pub struct Amount(i64);

op!(binary Amount, Add, add);
op!(binary Amount, Sub, sub);
op!(inplace Amount, AddAssign, add_assign);
op!(inplace Amount, SubAssign, sub_assign);
op!(unary Amount, Neg, neg);

impl Sum for Amount {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::default(), Add::add)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Value cannot be represented as a ledger amount: {0}")]
pub struct AmountConversionError(String);

impl From<i64> for Amount {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

impl TryFrom<u64> for Amount {
    type Error = AmountConversionError;

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        i64::try_from(value)
            .map(Self)
            .map_err(|_| AmountConversionError(format!("{value} minor units is too large for an Amount")))
    }
}

impl TryFrom<Decimal> for Amount {
    type Error = AmountConversionError;

    /// Converts a major-unit decimal (e.g. `150.25`) into minor units. Fails if the value has more precision than the
    /// ledger holds, or if it overflows.
    fn try_from(value: Decimal) -> Result<Self, Self::Error> {
        let minor = value
            .checked_mul(Decimal::from(MINOR_UNITS_PER_MAJOR))
            .ok_or_else(|| AmountConversionError(format!("{value} overflows")))?;
        if minor.fract() != Decimal::ZERO {
            return Err(AmountConversionError(format!("{value} has more than {DECIMAL_PLACES} decimal places")));
        }
        minor.to_i64().map(Self).ok_or_else(|| AmountConversionError(format!("{value} overflows")))
    }
}

impl FromStr for Amount {
    type Err = AmountConversionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let d = Decimal::from_str(s.trim()).map_err(|e| AmountConversionError(format!("'{s}': {e}")))?;
        Self::try_from(d)
    }
}

impl Display for Amount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_decimal())
    }
}

impl Amount {
    pub fn value(&self) -> i64 {
        self.0
    }

    /// `major` whole units. Saturates at the `i64` bounds, so use [`Amount::checked_from_major`] for anything that
    /// did not come from a literal.
    pub fn from_major(major: i64) -> Self {
        Self(major.saturating_mul(MINOR_UNITS_PER_MAJOR))
    }

    pub fn checked_from_major(major: i64) -> Option<Self> {
        major.checked_mul(MINOR_UNITS_PER_MAJOR).map(Self)
    }

    pub fn is_positive(&self) -> bool {
        self.0 > 0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// The amount in major units, always rendered with two decimal places.
    pub fn as_decimal(&self) -> Decimal {
        Decimal::new(self.0, DECIMAL_PLACES)
    }

    pub fn checked_add(self, rhs: Self) -> Option<Self> {
        self.0.checked_add(rhs.0).map(Self)
    }

    pub fn checked_sub(self, rhs: Self) -> Option<Self> {
        self.0.checked_sub(rhs.0).map(Self)
    }

    pub fn checked_mul(self, factor: i64) -> Option<Self> {
        self.0.checked_mul(factor).map(Self)
    }
}
