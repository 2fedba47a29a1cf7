//! Money type for expense and budget amounts
//!
//! Amounts are stored in minor units (cents) as a signed integer. Budget
//! availability is allowed to go negative after an authorised overspend, so
//! the type is signed throughout.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign, Mul, Sub, SubAssign};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money(i64);

impl Money {
    pub const fn from_cents(cents: i64) -> Self {
        Self(cents)
    }

    pub const MAX: Money = Money(i64::MAX);

    /// Whole currency units, no fractional part. Saturates at [`Money::MAX`].
    pub const fn from_units(units: i64) -> Self {
        Self(units.saturating_mul(100))
    }

    pub const fn zero() -> Self {
        Self(0)
    }

    pub const fn cents(&self) -> i64 {
        self.0
    }

    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }

    pub const fn is_positive(&self) -> bool {
        self.0 > 0
    }

    pub const fn is_negative(&self) -> bool {
        self.0 < 0
    }

    pub fn checked_add(self, rhs: Self) -> Option<Self> {
        self.0.checked_add(rhs.0).map(Self)
    }

    pub fn checked_sub(self, rhs: Self) -> Option<Self> {
        self.0.checked_sub(rhs.0).map(Self)
    }

    pub fn checked_mul(self, quantity: u32) -> Option<Self> {
        self.0.checked_mul(i64::from(quantity)).map(Self)
    }

    pub fn saturating_add(self, rhs: Self) -> Self {
        Self(self.0.saturating_add(rhs.0))
    }

    pub fn saturating_sub(self, rhs: Self) -> Self {
        Self(self.0.saturating_sub(rhs.0))
    }

    pub fn saturating_mul(self, quantity: u32) -> Self {
        Self(self.0.saturating_mul(i64::from(quantity)))
    }

    /// Sum that reports overflow instead of panicking.
    pub fn checked_sum<I: IntoIterator<Item = Money>>(amounts: I) -> Option<Self> {
        amounts
            .into_iter()
            .try_fold(Money::zero(), |acc, amount| acc.checked_add(amount))
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        write!(f, "{}{}.{:02}", sign, abs / 100, abs % 100)
    }
}

impl Add for Money {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self(self.0 + rhs.0)
    }
}

impl AddAssign for Money {
    fn add_assign(&mut self, rhs: Self) {
        self.0 += rhs.0;
    }
}

impl Sub for Money {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self {
        Self(self.0 - rhs.0)
    }
}

impl SubAssign for Money {
    fn sub_assign(&mut self, rhs: Self) {
        self.0 -= rhs.0;
    }
}

// quantity times unit price; use `checked_mul` on unvalidated input
impl Mul<u32> for Money {
    type Output = Self;

    fn mul(self, rhs: u32) -> Self {
        Self(self.0 * i64::from(rhs))
    }
}

impl Sum for Money {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Money::zero(), Add::add)
    }
}

impl<'a> Sum<&'a Money> for Money {
    fn sum<I: Iterator<Item = &'a Money>>(iter: I) -> Self {
        iter.copied().sum()
    }
}

impl<C> minicbor::Encode<C> for Money {
    fn encode<W: minicbor::encode::Write>(
        &self,
        e: &mut minicbor::Encoder<W>,
        _: &mut C,
    ) -> Result<(), minicbor::encode::Error<W::Error>> {
        e.i64(self.0)?.ok()
    }
}

impl<'b, C> minicbor::Decode<'b, C> for Money {
    fn decode(d: &mut minicbor::Decoder<'b>, _: &mut C) -> Result<Self, minicbor::decode::Error> {
        Ok(Money(d.i64()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_handles_negative_amounts() {
        assert_eq!(Money::from_cents(-10_000_000).to_string(), "-100000.00");
        assert_eq!(Money::from_cents(1_050).to_string(), "10.50");
    }

    #[test]
    fn money_encoding() {
        let original = Money::from_units(500_000);

        let encoding = minicbor::to_vec(original).unwrap();
        let decode: Money = minicbor::decode(&encoding).unwrap();

        assert_eq!(original, decode);
    }

    #[test]
    fn checked_arithmetic_reports_overflow() {
        let half = Money::from_cents(i64::MAX / 2 + 1);

        assert_eq!(half.checked_add(half), None);
        assert_eq!(Money::checked_sum([half, half]), None);
        assert_eq!(Money::from_units(10_000_000_000).checked_mul(u32::MAX), None);
        assert_eq!(Money::from_cents(i64::MIN).checked_sub(Money::from_cents(1)), None);
        assert_eq!(
            Money::checked_sum([Money::from_units(1), Money::from_units(2)]),
            Some(Money::from_units(3))
        );
    }

    #[test]
    fn saturating_arithmetic_clamps() {
        assert_eq!(Money::from_units(i64::MAX), Money::MAX);
        assert_eq!(Money::MAX.saturating_add(Money::from_cents(1)), Money::MAX);
        assert_eq!(Money::from_units(10_000_000_000).saturating_mul(u32::MAX), Money::MAX);
        assert_eq!(
            Money::from_cents(i64::MIN).saturating_sub(Money::from_cents(1)),
            Money::from_cents(i64::MIN)
        );
    }

    #[test]
    fn sum_and_multiply() {
        let items = [Money::from_units(3) * 4, Money::from_units(10)];
        assert_eq!(items.iter().sum::<Money>(), Money::from_units(22));
    }
}
