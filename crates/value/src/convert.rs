//! Conversions between values and the physical shapes of message fields
//!
//! Exact numerics travel as scaled integers: a field with scale `-2` holds
//! hundredths. Scales follow the wire convention (negative = fractional
//! digits), so `from_scaled(12345, -2)` is `123.45`.

use crate::types::Value;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use rust_decimal::{Decimal, RoundingStrategy};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum Error {
    #[error("Arithmetic overflow converting {value} to {target}")]
    Overflow { value: String, target: &'static str },

    #[error("Cannot convert {from} to {target}")]
    Incompatible { from: &'static str, target: &'static str },

    #[error("Conversion error from string \"{0}\"")]
    Parse(String),
}

const MAX_DECIMAL_SCALE: i16 = 28;

impl Value {
    /// Convert to an integer carrying `scale` (wire convention)
    pub fn to_scaled_i128(&self, scale: i16) -> Result<i128> {
        let exact = match self {
            Value::Bool(b) => Decimal::from(*b as i64),
            Value::I16(i) => Decimal::from(*i),
            Value::I32(i) => Decimal::from(*i),
            Value::I64(i) => Decimal::from(*i),
            Value::I128(i) => {
                if scale == 0 {
                    return Ok(*i);
                }
                Decimal::try_from_i128_with_scale(*i, 0).map_err(|_| self.overflow("numeric"))?
            }
            Value::F32(f) => Decimal::try_from(*f as f64).map_err(|_| self.overflow("numeric"))?,
            Value::F64(f) => Decimal::try_from(*f).map_err(|_| self.overflow("numeric"))?,
            Value::Decimal(d) => *d,
            Value::Str(s) => s
                .trim()
                .parse::<Decimal>()
                .map_err(|_| Error::Parse(s.clone()))?,
            other => {
                return Err(Error::Incompatible {
                    from: other.type_name(),
                    target: "numeric",
                });
            }
        };

        if scale > 0 {
            // Positive scales drop digits to the left of the point
            let divisor = 10i128
                .checked_pow(scale as u32)
                .and_then(|p| Decimal::try_from_i128_with_scale(p, 0).ok())
                .ok_or_else(|| self.overflow("numeric"))?;
            let scaled = (exact / divisor).round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero);
            return Ok(scaled.mantissa());
        }

        let digits = (-scale).min(MAX_DECIMAL_SCALE) as u32;
        let mut rounded =
            exact.round_dp_with_strategy(digits, RoundingStrategy::MidpointAwayFromZero);
        rounded.rescale(digits);
        if rounded.scale() != digits {
            return Err(self.overflow("numeric"));
        }
        Ok(rounded.mantissa())
    }

    /// Build a value from a scaled integer read out of a message
    pub fn from_scaled(raw: i128, scale: i16) -> Value {
        if scale == 0 {
            return if let Ok(v) = i64::try_from(raw) {
                Value::I64(v)
            } else {
                Value::I128(raw)
            };
        }
        if scale > 0 {
            let shifted = match 10i128.checked_pow(scale as u32) {
                Some(factor) => raw.saturating_mul(factor),
                None if raw == 0 => 0,
                None if raw > 0 => i128::MAX,
                None => i128::MIN,
            };
            return Value::from_scaled(shifted, 0);
        }
        match Decimal::try_from_i128_with_scale(raw, (-scale).min(MAX_DECIMAL_SCALE) as u32) {
            Ok(d) => Value::Decimal(d),
            Err(_) => Value::I128(raw),
        }
    }

    pub fn to_f64(&self) -> Result<f64> {
        use rust_decimal::prelude::ToPrimitive;
        match self {
            Value::I16(i) => Ok(*i as f64),
            Value::I32(i) => Ok(*i as f64),
            Value::I64(i) => Ok(*i as f64),
            Value::I128(i) => Ok(*i as f64),
            Value::F32(f) => Ok(*f as f64),
            Value::F64(f) => Ok(*f),
            Value::Decimal(d) => d.to_f64().ok_or_else(|| self.overflow("double")),
            Value::Str(s) => s.trim().parse().map_err(|_| Error::Parse(s.clone())),
            other => Err(Error::Incompatible {
                from: other.type_name(),
                target: "double",
            }),
        }
    }

    pub fn to_bool(&self) -> Result<bool> {
        match self {
            Value::Bool(b) => Ok(*b),
            Value::Str(s) => match s.trim().to_ascii_uppercase().as_str() {
                "TRUE" => Ok(true),
                "FALSE" => Ok(false),
                _ => Err(Error::Parse(s.clone())),
            },
            other => Err(Error::Incompatible {
                from: other.type_name(),
                target: "boolean",
            }),
        }
    }

    /// Text form used when a value lands in a character field
    pub fn to_text(&self) -> String {
        self.to_string()
    }

    pub fn to_date(&self) -> Result<NaiveDate> {
        match self {
            Value::Date(d) => Ok(*d),
            Value::Timestamp(ts) => Ok(ts.date()),
            Value::Str(s) => NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
                .map_err(|_| Error::Parse(s.clone())),
            other => Err(Error::Incompatible {
                from: other.type_name(),
                target: "date",
            }),
        }
    }

    pub fn to_time(&self) -> Result<NaiveTime> {
        match self {
            Value::Time(t) => Ok(*t),
            Value::Timestamp(ts) => Ok(ts.time()),
            Value::Str(s) => NaiveTime::parse_from_str(s.trim(), "%H:%M:%S%.f")
                .map_err(|_| Error::Parse(s.clone())),
            other => Err(Error::Incompatible {
                from: other.type_name(),
                target: "time",
            }),
        }
    }

    pub fn to_timestamp(&self) -> Result<NaiveDateTime> {
        match self {
            Value::Timestamp(ts) => Ok(*ts),
            Value::Date(d) => Ok(d.and_time(NaiveTime::MIN)),
            Value::Str(s) => NaiveDateTime::parse_from_str(s.trim(), "%Y-%m-%d %H:%M:%S%.f")
                .map_err(|_| Error::Parse(s.clone())),
            other => Err(Error::Incompatible {
                from: other.type_name(),
                target: "timestamp",
            }),
        }
    }

    fn overflow(&self, target: &'static str) -> Error {
        Error::Overflow {
            value: self.to_string(),
            target,
        }
    }
}
