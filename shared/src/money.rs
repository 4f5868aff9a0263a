use bigdecimal::{BigDecimal, RoundingMode};
use num_traits::ToPrimitive;
use serde::de::{self, Deserializer, Visitor};
use std::fmt;
use std::str::FromStr;

const MINOR_UNITS: i64 = 100;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MoneyError {
    #[error("amount {0} does not fit in minor units")]
    OutOfRange(String),
    #[error("invalid amount '{0}'")]
    Invalid(String),
}

/// Converts a decimal amount into cents, rounding half away from zero.
pub fn to_minor_units(amount: &BigDecimal) -> Result<i64, MoneyError> {
    let scaled = amount * BigDecimal::from(MINOR_UNITS);
    scaled
        .with_scale_round(0, RoundingMode::HalfUp)
        .to_i64()
        .ok_or_else(|| MoneyError::OutOfRange(amount.to_string()))
}

pub fn from_minor_units(minor: i64) -> BigDecimal {
    (BigDecimal::from(minor) / BigDecimal::from(MINOR_UNITS)).with_scale(2)
}

pub fn round_currency(amount: &BigDecimal) -> BigDecimal {
    amount.with_scale_round(2, RoundingMode::HalfUp)
}

pub fn parse_amount(raw: &str) -> Result<BigDecimal, MoneyError> {
    BigDecimal::from_str(raw.trim()).map_err(|_| MoneyError::Invalid(raw.to_string()))
}

/// Accepts either a JSON number or a decimal string.
///
/// Floats go through their shortest round-trip text so `2.99` arrives as
/// exactly `2.99` rather than its binary expansion.
pub fn deserialize_amount<'de, D>(deserializer: D) -> Result<BigDecimal, D::Error>
where
    D: Deserializer<'de>,
{
    struct AmountVisitor;

    impl<'de> Visitor<'de> for AmountVisitor {
        type Value = BigDecimal;

        fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
            f.write_str("a decimal amount as a number or string")
        }

        fn visit_u64<E: de::Error>(self, value: u64) -> Result<BigDecimal, E> {
            Ok(BigDecimal::from(value))
        }

        fn visit_i64<E: de::Error>(self, value: i64) -> Result<BigDecimal, E> {
            Ok(BigDecimal::from(value))
        }

        fn visit_f64<E: de::Error>(self, value: f64) -> Result<BigDecimal, E> {
            if !value.is_finite() {
                return Err(E::custom(MoneyError::Invalid(value.to_string())));
            }
            parse_amount(&value.to_string()).map_err(E::custom)
        }

        fn visit_str<E: de::Error>(self, value: &str) -> Result<BigDecimal, E> {
            parse_amount(value).map_err(E::custom)
        }
    }

    deserializer.deserialize_any(AmountVisitor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    fn dec(raw: &str) -> BigDecimal {
        BigDecimal::from_str(raw).unwrap()
    }

    #[test]
    fn rounds_up_at_the_half_cent() {
        let cases = [
            ("19.999", 2000),
            ("8.97", 897),
            ("0.005", 1),
            ("0.004", 0),
            ("1.005", 101),
            ("1.004", 100),
            ("2.675", 268),
            ("42.5", 4250),
            ("100", 10000),
        ];
        for (amount, cents) in cases {
            assert_eq!(to_minor_units(&dec(amount)).unwrap(), cents, "amount {}", amount);
        }
    }

    #[test]
    fn minor_units_back_to_decimal() {
        assert_eq!(from_minor_units(299), dec("2.99"));
        assert_eq!(from_minor_units(4250).to_string(), "42.50");
    }

    #[test]
    fn currency_rounding_keeps_two_places() {
        assert_eq!(round_currency(&dec("8.970")), dec("8.97"));
        assert_eq!(round_currency(&dec("0.125")), dec("0.13"));
    }

    #[derive(Deserialize)]
    struct Priced {
        #[serde(deserialize_with = "deserialize_amount")]
        price: BigDecimal,
    }

    #[test]
    fn json_numbers_keep_their_written_digits() {
        let priced: Priced = serde_json::from_str(r#"{"price": 2.99}"#).unwrap();
        assert_eq!(priced.price, dec("2.99"));

        let priced: Priced = serde_json::from_str(r#"{"price": "8.97"}"#).unwrap();
        assert_eq!(priced.price, dec("8.97"));

        let priced: Priced = serde_json::from_str(r#"{"price": 15}"#).unwrap();
        assert_eq!(priced.price, dec("15"));

        assert!(serde_json::from_str::<Priced>(r#"{"price": "ten"}"#).is_err());
    }
}
