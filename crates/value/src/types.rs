//! Value types carried through message buffers and records
//!
//! A `Value` is the logical form of one column: the message layer turns it
//! into bytes according to a descriptor, the store keeps it in records.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Logical data type of a value or a record field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    Boolean,
    SmallInt,
    Integer,
    BigInt,
    Int128,
    Float,
    Double,
    /// Exact numeric with the given scale (digits after the point)
    Numeric { scale: u8 },
    Text,
    Binary,
    Date,
    Time,
    Timestamp,
}

/// A single SQL value
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Bool(bool),
    I16(i16),
    I32(i32),
    I64(i64),
    I128(i128),
    F32(f32),
    F64(f64),
    Decimal(Decimal),
    Str(String),
    Bytea(Vec<u8>),
    Date(NaiveDate),
    Time(NaiveTime),
    Timestamp(NaiveDateTime),
}

impl Value {
    /// Create a string value
    pub fn string<S: Into<String>>(s: S) -> Self {
        Value::Str(s.into())
    }

    /// Create an I64 value
    pub fn integer(i: i64) -> Self {
        Value::I64(i)
    }

    /// Check if value is null
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Check if value is any integer type
    pub fn is_integer(&self) -> bool {
        matches!(
            self,
            Value::I16(_) | Value::I32(_) | Value::I64(_) | Value::I128(_)
        )
    }

    /// Check if value is numeric (integer, float, or decimal)
    pub fn is_numeric(&self) -> bool {
        self.is_integer() || matches!(self, Value::F32(_) | Value::F64(_) | Value::Decimal(_))
    }

    /// The logical type of this value, `None` for NULL
    pub fn data_type(&self) -> Option<DataType> {
        Some(match self {
            Value::Null => return None,
            Value::Bool(_) => DataType::Boolean,
            Value::I16(_) => DataType::SmallInt,
            Value::I32(_) => DataType::Integer,
            Value::I64(_) => DataType::BigInt,
            Value::I128(_) => DataType::Int128,
            Value::F32(_) => DataType::Float,
            Value::F64(_) => DataType::Double,
            Value::Decimal(d) => DataType::Numeric {
                scale: d.scale() as u8,
            },
            Value::Str(_) => DataType::Text,
            Value::Bytea(_) => DataType::Binary,
            Value::Date(_) => DataType::Date,
            Value::Time(_) => DataType::Time,
            Value::Timestamp(_) => DataType::Timestamp,
        })
    }

    /// Get the type name of this value
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::I16(_) => "smallint",
            Value::I32(_) => "integer",
            Value::I64(_) => "bigint",
            Value::I128(_) => "int128",
            Value::F32(_) => "float",
            Value::F64(_) => "double",
            Value::Decimal(_) => "numeric",
            Value::Str(_) => "varchar",
            Value::Bytea(_) => "binary",
            Value::Date(_) => "date",
            Value::Time(_) => "time",
            Value::Timestamp(_) => "timestamp",
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "Null"),
            Value::Bool(b) => write!(f, "Bool({:?})", b),
            Value::I16(i) => write!(f, "I16({:?})", i),
            Value::I32(i) => write!(f, "I32({:?})", i),
            Value::I64(i) => write!(f, "I64({:?})", i),
            Value::I128(i) => write!(f, "I128({:?})", i),
            Value::F32(fl) => write!(f, "F32({:?})", fl),
            Value::F64(fl) => write!(f, "F64({:?})", fl),
            Value::Decimal(d) => write!(f, "Decimal({:?})", d),
            Value::Str(s) => write!(f, "Str({:?})", s),
            Value::Bytea(b) => write!(f, "Bytea({} bytes)", b.len()),
            Value::Date(d) => write!(f, "Date({:?})", d),
            Value::Time(t) => write!(f, "Time({:?})", t),
            Value::Timestamp(ts) => write!(f, "Timestamp({:?})", ts),
        }
    }
}

/// Textual rendering, used for validation messages and diagnostics
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Bool(b) => write!(f, "{}", if *b { "TRUE" } else { "FALSE" }),
            Value::I16(i) => write!(f, "{}", i),
            Value::I32(i) => write!(f, "{}", i),
            Value::I64(i) => write!(f, "{}", i),
            Value::I128(i) => write!(f, "{}", i),
            Value::F32(fl) => write!(f, "{}", fl),
            Value::F64(fl) => write!(f, "{}", fl),
            Value::Decimal(d) => write!(f, "{}", d),
            Value::Str(s) => write!(f, "{}", s),
            Value::Bytea(b) => {
                for byte in b {
                    write!(f, "{:02X}", byte)?;
                }
                Ok(())
            }
            Value::Date(d) => write!(f, "{}", d),
            Value::Time(t) => write!(f, "{}", t),
            Value::Timestamp(ts) => write!(f, "{}", ts),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i16> for Value {
    fn from(i: i16) -> Self {
        Value::I16(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::I32(i)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::I64(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::F64(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<Decimal> for Value {
    fn from(d: Decimal) -> Self {
        Value::Decimal(d)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}
