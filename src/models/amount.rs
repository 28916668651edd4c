use std::fmt;
use std::str::FromStr;

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

/// Number of fraction digits every ledger amount carries.
pub const SCALE: u32 = 2;

/// Amounts must stay strictly below this magnitude (the `NUMERIC(20, 2)` column range).
pub const LIMIT: Decimal = Decimal::from_parts(2_808_348_672, 232_830_643, 0, false, 0);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AmountError {
    #[error("Malformed amount: {0:?}")]
    Malformed(String),
    #[error("Referral percent must not be negative: {0}")]
    NegativePercent(Decimal),
    #[error("Amount out of range")]
    Overflow,
}

/// Rounds toward zero to exactly two fraction digits.
pub fn truncate2(value: Decimal) -> Decimal {
    let mut truncated = value.round_dp_with_strategy(SCALE, RoundingStrategy::ToZero);
    truncated.rescale(SCALE);
    if truncated.is_zero() {
        truncated.set_sign_positive(true);
    }
    truncated
}

/// Fixed-point monetary amount, always truncated to two fraction digits and
/// bounded by [`LIMIT`] in magnitude.
///
/// Crosses every external boundary as a decimal string (`"5.00"`), never as a float.
/// Arithmetic is checked; there are no operator impls that could panic.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Amount(Decimal);

impl Amount {
    pub fn zero() -> Self {
        Amount(Decimal::new(0, SCALE))
    }

    pub fn new(value: Decimal) -> Result<Self, AmountError> {
        if value.abs() >= LIMIT {
            return Err(AmountError::Overflow);
        }
        Ok(Amount(truncate2(value)))
    }

    pub fn value(&self) -> Decimal {
        self.0
    }

    pub fn is_positive(&self) -> bool {
        self.0 > Decimal::ZERO
    }

    pub fn parse(input: &str) -> Result<Self, AmountError> {
        let value = Decimal::from_str(input.trim())
            .map_err(|_| AmountError::Malformed(input.to_string()))?;
        Amount::new(value)
    }

    pub fn checked_add(self, rhs: Amount) -> Result<Amount, AmountError> {
        self.0
            .checked_add(rhs.0)
            .ok_or(AmountError::Overflow)
            .and_then(Amount::new)
    }

    pub fn checked_sub(self, rhs: Amount) -> Result<Amount, AmountError> {
        self.0
            .checked_sub(rhs.0)
            .ok_or(AmountError::Overflow)
            .and_then(Amount::new)
    }

    pub fn checked_sum<I>(amounts: I) -> Result<Amount, AmountError>
    where
        I: IntoIterator<Item = Amount>,
    {
        amounts
            .into_iter()
            .try_fold(Amount::zero(), |total, amount| total.checked_add(amount))
    }
}

impl Default for Amount {
    fn default() -> Self {
        Amount::zero()
    }
}

impl TryFrom<Decimal> for Amount {
    type Error = AmountError;

    fn try_from(value: Decimal) -> Result<Self, Self::Error> {
        Amount::new(value)
    }
}

impl FromStr for Amount {
    type Err = AmountError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Amount::parse(s)
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Serialize for Amount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Amount {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Amount::parse(&raw).map_err(de::Error::custom)
    }
}

/// Share of a referred user's deposit credited to the referrer, in percent.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReferralPercent(Decimal);

impl ReferralPercent {
    pub fn new(value: Decimal) -> Result<Self, AmountError> {
        if value.is_sign_negative() && !value.is_zero() {
            return Err(AmountError::NegativePercent(value));
        }
        Ok(ReferralPercent(value))
    }

    pub fn parse(input: &str) -> Result<Self, AmountError> {
        let value = Decimal::from_str(input.trim())
            .map_err(|_| AmountError::Malformed(input.to_string()))?;
        ReferralPercent::new(value)
    }

    pub fn value(&self) -> Decimal {
        self.0
    }

    /// `truncate2(amount * percent / 100)`
    pub fn bonus_on(&self, amount: Amount) -> Result<Amount, AmountError> {
        amount
            .value()
            .checked_mul(self.0)
            .and_then(|raw| raw.checked_div(Decimal::ONE_HUNDRED))
            .ok_or(AmountError::Overflow)
            .and_then(Amount::new)
    }
}

impl fmt::Display for ReferralPercent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ReferralPercent {
    type Err = AmountError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ReferralPercent::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn amount(s: &str) -> Amount {
        s.parse().unwrap()
    }

    fn percent(s: &str) -> ReferralPercent {
        s.parse().unwrap()
    }

    #[test]
    fn parsing_truncates_instead_of_rounding() {
        assert_eq!(amount("10.999").to_string(), "10.99");
        assert_eq!(amount("0.005").to_string(), "0.00");
        assert_eq!(amount("-1.239").to_string(), "-1.23");
        assert_eq!(amount(" 7 ").to_string(), "7.00");
    }

    #[test]
    fn malformed_input_is_rejected() {
        assert!(Amount::parse("ten").is_err());
        assert!(Amount::parse("").is_err());
        assert!(Amount::parse("1.2.3").is_err());
    }

    #[test]
    fn zero_is_never_negative() {
        assert_eq!(amount("-0.001").to_string(), "0.00");
        assert!(!amount("-0.001").is_positive());
    }

    #[test]
    fn serializes_as_two_digit_string() {
        let json = serde_json::to_string(&amount("5")).unwrap();
        assert_eq!(json, "\"5.00\"");

        let back: Amount = serde_json::from_str("\"12.345\"").unwrap();
        assert_eq!(back, amount("12.34"));

        assert!(serde_json::from_str::<Amount>("12.5").is_err());
    }

    #[test]
    fn arithmetic_keeps_scale() {
        let total = Amount::checked_sum([amount("1.10"), amount("2.25"), amount("0.01")]).unwrap();
        assert_eq!(total.to_string(), "3.36");
        assert_eq!(
            amount("5.00").checked_sub(amount("5.00")).unwrap().to_string(),
            "0.00"
        );
    }

    #[test]
    fn magnitude_is_bounded() {
        assert_eq!(LIMIT, Decimal::from(1_000_000_000_000_000_000i64));

        let largest = amount("999999999999999999.99");
        assert_eq!(largest.to_string(), "999999999999999999.99");
        assert_eq!(amount("-999999999999999999.99").to_string(), "-999999999999999999.99");

        for input in [
            "1000000000000000000",
            "-1000000000000000000",
            "50000000000000000000000000000",
            "79228162514264337593543950335",
        ] {
            assert_eq!(Amount::parse(input), Err(AmountError::Overflow), "{}", input);
        }
        assert!(serde_json::from_str::<Amount>("\"50000000000000000000000000000\"").is_err());
    }

    #[test]
    fn arithmetic_reports_overflow_instead_of_panicking() {
        let largest = amount("999999999999999999.99");

        assert_eq!(largest.checked_add(amount("0.01")), Err(AmountError::Overflow));
        assert_eq!(
            Amount::checked_sum([largest, largest, largest]),
            Err(AmountError::Overflow)
        );
        assert_eq!(
            amount("-999999999999999999.99").checked_sub(largest),
            Err(AmountError::Overflow)
        );
        assert_eq!(largest.checked_sub(largest), Ok(Amount::zero()));
    }

    #[test]
    fn oversized_bonus_is_out_of_range() {
        let deposit = amount("999999999999999999.99");
        assert_eq!(percent("200").bonus_on(deposit), Err(AmountError::Overflow));
        assert_eq!(percent("100").bonus_on(deposit), Ok(deposit));
    }

    #[test]
    fn bonus_uses_truncation() {
        assert_eq!(percent("1.0").bonus_on(amount("100.00")).unwrap(), amount("1.00"));
        assert_eq!(percent("0.33").bonus_on(amount("10.00")).unwrap(), amount("0.03"));
        assert_eq!(percent("2.5").bonus_on(amount("200.00")).unwrap(), amount("5.00"));
        assert_eq!(percent("1.0").bonus_on(amount("0.50")).unwrap(), Amount::zero());
        assert_eq!(percent("0.66").bonus_on(amount("9.99")).unwrap(), amount("0.06"));
    }

    #[test]
    fn negative_percent_is_rejected() {
        assert!(matches!(
            ReferralPercent::parse("-1"),
            Err(AmountError::NegativePercent(_))
        ));
        assert!(ReferralPercent::parse("0").is_ok());
        assert!(ReferralPercent::parse("abc").is_err());
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Truncation never rounds up and never drops a full cent.
        #[test]
        fn truncation_stays_within_one_cent(units in 0i64..1_000_000_000i64, scale in 0u32..6) {
            let raw = Decimal::new(units, scale);
            let truncated = truncate2(raw);

            prop_assert!(truncated <= raw);
            prop_assert!(raw - truncated < Decimal::new(1, 2));
            prop_assert_eq!(truncated.scale(), SCALE);
        }

        #[test]
        fn bonus_never_exceeds_exact_share(cents in 1i64..100_000_000i64, basis in 0i64..10_000i64) {
            let deposit = Amount::new(Decimal::new(cents, 2)).unwrap();
            let rate = ReferralPercent::new(Decimal::new(basis, 2)).unwrap();
            let exact = deposit.value() * rate.value() / Decimal::ONE_HUNDRED;
            let bonus = rate.bonus_on(deposit).unwrap();

            prop_assert!(bonus.value() <= exact);
            prop_assert!(exact - bonus.value() < Decimal::new(1, 2));
        }
    }
}
