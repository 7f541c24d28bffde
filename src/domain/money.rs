use crate::error::{EngineError, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Represents a monetary value in the store currency.
///
/// This is a wrapper around `rust_decimal::Decimal` so that prices, subtotals
/// and totals are computed exactly, without floating-point rounding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct Money(pub Decimal);

impl Money {
    pub const ZERO: Self = Self(Decimal::ZERO);

    /// Largest accepted unit price.
    pub const MAX_PRICE: Decimal = Decimal::from_parts(1_000_000_000, 0, 0, false, 0);

    pub fn new(amount: Decimal) -> Self {
        Self(amount)
    }

    /// Validates a unit price: zero is allowed, negative amounts and amounts
    /// above [`Money::MAX_PRICE`] are not.
    pub fn price(value: Decimal) -> Result<Self> {
        if value < Decimal::ZERO {
            return Err(EngineError::ValidationError(
                "Price must not be negative".to_string(),
            ));
        }
        if value > Self::MAX_PRICE {
            return Err(EngineError::ValidationError(format!(
                "Price {value} is out of range"
            )));
        }
        Ok(Self(value))
    }

    pub fn value(&self) -> Decimal {
        self.0
    }

    /// Line subtotal: unit price multiplied by a quantity.
    pub fn times(self, quantity: u32) -> Result<Self> {
        self.0
            .checked_mul(Decimal::from(quantity))
            .map(Self)
            .ok_or_else(out_of_range)
    }

    pub fn checked_add(self, rhs: Self) -> Result<Self> {
        self.0.checked_add(rhs.0).map(Self).ok_or_else(out_of_range)
    }

    /// Sums amounts, failing instead of overflowing.
    pub fn total<I: IntoIterator<Item = Self>>(amounts: I) -> Result<Self> {
        amounts
            .into_iter()
            .try_fold(Self::ZERO, |acc, amount| acc.checked_add(amount))
    }
}

fn out_of_range() -> EngineError {
    EngineError::ValidationError("Amount is out of range".to_string())
}

impl TryFrom<Decimal> for Money {
    type Error = EngineError;

    fn try_from(value: Decimal) -> std::result::Result<Self, Self::Error> {
        Self::price(value)
    }
}

impl From<Money> for Decimal {
    fn from(money: Money) -> Self {
        money.0
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "${:.2}", self.0)
    }
}
