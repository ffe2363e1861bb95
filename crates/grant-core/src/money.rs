//! Exact-integer money. Backed by an arbitrary-precision big integer of
//! cents so that no grant amount, however large, ever loses precision —
//! floating point never enters business code.

use std::fmt;
use std::str::FromStr;

use num_bigint::BigInt;
use num_traits::Zero;
use serde::{Deserialize, Serialize};

use crate::error::GrantError;

/// An exact amount of money, stored as integer cents.
///
/// `Money` supports only addition, subtraction, comparison, and string
/// round-tripping. There is deliberately no `Div`, no `Mul<f64>`, and no
/// `as f64` conversion — all forbidden in business code by construction.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Money(BigInt);

impl Money {
    pub fn zero() -> Self {
        Money(BigInt::zero())
    }

    pub fn from_cents(cents: i64) -> Self {
        Money(BigInt::from(cents))
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    pub fn is_negative(&self) -> bool {
        self.0 < BigInt::zero()
    }

    pub fn checked_add(&self, other: &Money) -> Money {
        Money(&self.0 + &other.0)
    }

    pub fn checked_sub(&self, other: &Money) -> Money {
        Money(&self.0 - &other.0)
    }

    /// Apply a reimbursement rate expressed as `(numerator, denominator)`
    /// cents-weights to a charge amount: `floor(rate_num * charge / rate_den)`.
    /// Never uses floating point; truncates toward zero like `floor` for
    /// non-negative operands, which is the only case this business ever sees.
    pub fn apply_rate(charge: &Money, rate_num: i64, rate_den: i64) -> Self {
        assert!(rate_den != 0, "reimbursement rate denominator must be nonzero");
        let num = &charge.0 * BigInt::from(rate_num);
        Money(num / BigInt::from(rate_den))
    }

    pub fn cents(&self) -> &BigInt {
        &self.0
    }
}

/// Money round-trips through JSON and storage as a base-10, two-decimal
/// dollar string (`"150.00"`, `"-12.34"`) — never as raw cents — per §6.3's
/// "money fields stored as decimal strings" rule. The `BigInt` underneath
/// stays in cents; only the string boundary knows about the decimal point.
impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let negative = self.0 < BigInt::zero();
        let cents = if negative { -&self.0 } else { self.0.clone() };
        let hundred = BigInt::from(100);
        let dollars = &cents / &hundred;
        let remainder = &cents % &hundred;
        if negative {
            write!(f, "-{dollars}.{remainder:02}")
        } else {
            write!(f, "{dollars}.{remainder:02}")
        }
    }
}

impl FromStr for Money {
    type Err = GrantError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || GrantError::InvalidMoney { raw: s.to_string() };

        let (sign, unsigned) = match s.strip_prefix('-') {
            Some(rest) => (-1, rest),
            None => (1, s.strip_prefix('+').unwrap_or(s)),
        };
        if unsigned.is_empty() {
            return Err(invalid());
        }

        let cents = match unsigned.split_once('.') {
            Some((whole, frac)) => {
                if frac.len() != 2 || !frac.bytes().all(|b| b.is_ascii_digit()) || !whole.bytes().all(|b| b.is_ascii_digit()) || whole.is_empty() {
                    return Err(invalid());
                }
                let whole = BigInt::from_str(whole).map_err(|_| invalid())?;
                let frac = BigInt::from_str(frac).map_err(|_| invalid())?;
                whole * BigInt::from(100) + frac
            }
            None => {
                if !unsigned.bytes().all(|b| b.is_ascii_digit()) {
                    return Err(invalid());
                }
                BigInt::from_str(unsigned).map_err(|_| invalid())? * BigInt::from(100)
            }
        };
        Ok(Money(cents * BigInt::from(sign)))
    }
}

impl Serialize for Money {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Money {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Money::from_str(&raw).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_via_string() {
        let m = Money::from_cents(15_000);
        let s = m.to_string();
        assert_eq!(s, "150.00");
        assert_eq!(Money::from_str(&s).unwrap(), m);
    }

    #[test]
    fn parses_decimal_dollar_strings() {
        assert_eq!(Money::from_str("150.00").unwrap(), Money::from_cents(15_000));
        assert_eq!(Money::from_str("0.01").unwrap(), Money::from_cents(1));
        assert_eq!(Money::from_str("10000").unwrap(), Money::from_cents(1_000_000));
        assert_eq!(Money::from_str("-12.34").unwrap(), Money::from_cents(-1_234));
        assert!(Money::from_str("1.5").is_err());
        assert!(Money::from_str("abc").is_err());
        assert!(Money::from_str("").is_err());
    }

    #[test]
    fn add_and_sub_are_exact() {
        let a = Money::from_cents(985_000);
        let b = Money::from_cents(15_000);
        assert_eq!(a.checked_add(&b), Money::from_cents(1_000_000));
        assert_eq!(a.checked_sub(&b), Money::from_cents(970_000));
    }

    #[test]
    fn apply_rate_floors() {
        // 2/3 of $0.01 = floor(2/3) = 0 cents.
        let charge = Money::from_cents(1);
        let applied = Money::apply_rate(&charge, 2, 3);
        assert_eq!(applied, Money::zero());
    }

    #[test]
    fn large_amounts_stay_exact() {
        let huge = Money::from_str("999999999999999999999999.00").unwrap();
        let plus_one = huge.checked_add(&Money::from_cents(1));
        assert_eq!(plus_one.to_string(), "1000000000000000000000000.00");
    }

    /// Fixed-seed sweep over random cent amounts up to 10^12: sum, difference,
    /// and string roundtrip must all be exact. No float ever enters the path.
    #[test]
    fn exactness_holds_over_random_amounts() {
        use rand::{Rng, SeedableRng};
        let mut rng = rand::rngs::StdRng::seed_from_u64(0x6772_616e_74);
        for _ in 0..500 {
            let a_cents: i64 = rng.gen_range(0..=1_000_000_000_000);
            let b_cents: i64 = rng.gen_range(0..=a_cents.max(1));
            let a = Money::from_cents(a_cents);
            let b = Money::from_cents(b_cents);

            let sum = a.checked_add(&b);
            assert_eq!(sum, Money::from_str(&sum.to_string()).unwrap());
            assert_eq!(sum.cents(), a.cents() + b.cents());

            let diff = a.checked_sub(&b);
            assert_eq!(diff, Money::from_str(&diff.to_string()).unwrap());
            assert_eq!(diff.cents(), a.cents() - b.cents());
        }
    }
}
