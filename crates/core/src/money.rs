//! Money and quantity primitives.
//!
//! All currency values are integers in minor units ("cents"); only the tax
//! rate and line quantities are fractional. Rounding is banker's rounding
//! (half-to-even), applied exactly once per derived value — once when a line
//! total is computed and once at the tax step — never re-rounded downstream.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};

/// An amount of money in minor currency units.
///
/// Negative amounts are legal: discount line items carry negative totals.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Cents(i64);

impl Cents {
    pub const ZERO: Cents = Cents(0);

    pub const fn new(amount: i64) -> Self {
        Self(amount)
    }

    pub const fn amount(self) -> i64 {
        self.0
    }

    pub fn checked_add(self, other: Cents) -> Option<Cents> {
        self.0.checked_add(other.0).map(Cents)
    }

    pub fn checked_sub(self, other: Cents) -> Option<Cents> {
        self.0.checked_sub(other.0).map(Cents)
    }

    /// Subtraction clamped at zero, for reporting a balance due.
    pub fn saturating_sub_floor_zero(self, other: Cents) -> Cents {
        Cents(self.0.saturating_sub(other.0).max(0))
    }

    pub fn abs(self) -> Cents {
        Cents(self.0.saturating_abs())
    }

    pub const fn is_negative(self) -> bool {
        self.0 < 0
    }

    pub const fn is_positive(self) -> bool {
        self.0 > 0
    }
}

impl core::fmt::Display for Cents {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Line item quantity (strictly positive; fractional labor hours allowed).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Quantity(Decimal);

impl Quantity {
    pub const ONE: Quantity = Quantity(Decimal::ONE);

    pub fn new(value: Decimal) -> DomainResult<Self> {
        if value <= Decimal::ZERO {
            return Err(DomainError::validation("quantity must be positive"));
        }
        Ok(Self(value))
    }

    pub fn get(self) -> Decimal {
        self.0
    }
}

impl core::fmt::Display for Quantity {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Fractional tax rate (e.g. `0.13` for 13% HST).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaxRate(Decimal);

impl TaxRate {
    pub fn new(rate: Decimal) -> DomainResult<Self> {
        if rate < Decimal::ZERO || rate > Decimal::ONE {
            return Err(DomainError::validation("tax rate must be between 0 and 1"));
        }
        Ok(Self(rate))
    }

    pub const fn zero() -> Self {
        Self(Decimal::ZERO)
    }

    pub fn get(self) -> Decimal {
        self.0
    }

    /// Tax owed on a taxable amount, rounded half-to-even to whole cents.
    pub fn apply(self, taxable: Cents) -> Cents {
        let tax = (Decimal::from(taxable.amount()) * self.0)
            .round_dp_with_strategy(0, RoundingStrategy::MidpointNearestEven);
        Cents(tax.to_i64().unwrap_or(i64::MAX))
    }
}

impl Default for TaxRate {
    /// 13% — the provincial default for new work orders.
    fn default() -> Self {
        Self(Decimal::new(13, 2))
    }
}

impl core::fmt::Display for TaxRate {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Line total = round(quantity x unit_price) in whole cents.
///
/// Returns `None` when the product overflows the i64 cents range.
pub fn line_total(quantity: Quantity, unit_price: Cents) -> Option<Cents> {
    let product = Decimal::from(unit_price.amount()).checked_mul(quantity.get())?;
    product
        .round_dp_with_strategy(0, RoundingStrategy::MidpointNearestEven)
        .to_i64()
        .map(Cents)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn qty(s: &str) -> Quantity {
        Quantity::new(s.parse().unwrap()).unwrap()
    }

    #[test]
    fn default_tax_rate_is_thirteen_percent() {
        assert_eq!(TaxRate::default().get(), Decimal::new(13, 2));
    }

    #[test]
    fn tax_on_ten_thousand_at_thirteen_percent() {
        let tax = TaxRate::default().apply(Cents::new(10_000));
        assert_eq!(tax, Cents::new(1_300));
    }

    #[test]
    fn tax_rounds_half_to_even() {
        // 0.13 * 50 = 6.5 -> rounds to 6, not 7
        assert_eq!(TaxRate::default().apply(Cents::new(50)), Cents::new(6));
        // 0.13 * 250 = 32.5 -> rounds to 32
        assert_eq!(TaxRate::default().apply(Cents::new(250)), Cents::new(32));
    }

    #[test]
    fn line_total_with_fractional_hours() {
        // 2.5 labor hours at $80.00/h
        assert_eq!(line_total(qty("2.5"), Cents::new(8_000)), Some(Cents::new(20_000)));
    }

    #[test]
    fn line_total_preserves_sign_for_negative_prices() {
        assert_eq!(line_total(qty("1"), Cents::new(-500)), Some(Cents::new(-500)));
    }

    #[test]
    fn quantity_must_be_positive() {
        assert!(Quantity::new(Decimal::ZERO).is_err());
        assert!(Quantity::new(Decimal::new(-1, 0)).is_err());
        assert!(Quantity::new(Decimal::new(25, 1)).is_ok());
    }

    #[test]
    fn tax_rate_bounds() {
        assert!(TaxRate::new(Decimal::new(-1, 2)).is_err());
        assert!(TaxRate::new(Decimal::new(101, 2)).is_err());
        assert!(TaxRate::new(Decimal::ZERO).is_ok());
    }

    #[test]
    fn balance_floor_never_goes_negative() {
        let total = Cents::new(5_000);
        let paid = Cents::new(6_000);
        assert_eq!(total.saturating_sub_floor_zero(paid), Cents::ZERO);
    }
}
