//! Reading and writing values in message buffers
//!
//! Numbers are stored little-endian. Dates count days from 1858-11-17,
//! times count units of 1/10000 second since midnight.

use crate::error::{Error, Result};
use crate::format::{DType, Descriptor, Format};
use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use keel_value::Value;

/// Zone id written for time zone fields (UTC)
const UTC_ZONE: u16 = 65535;
const TIME_UNITS_PER_SECOND: u32 = 10_000;
const NULL_FLAG: i16 = -1;

fn epoch() -> NaiveDate {
    NaiveDate::from_ymd_opt(1858, 11, 17).unwrap_or(NaiveDate::MIN)
}

fn encode_date(date: NaiveDate) -> i32 {
    (date - epoch()).num_days() as i32
}

fn decode_date(days: i32) -> NaiveDate {
    epoch() + Duration::days(days as i64)
}

fn encode_time(time: NaiveTime) -> u32 {
    time.num_seconds_from_midnight() * TIME_UNITS_PER_SECOND
        + time.nanosecond() / 100_000
}

fn decode_time(units: u32) -> NaiveTime {
    let secs = units / TIME_UNITS_PER_SECOND;
    let nanos = (units % TIME_UNITS_PER_SECOND) * 100_000;
    NaiveTime::from_num_seconds_from_midnight_opt(secs, nanos).unwrap_or(NaiveTime::MIN)
}

fn field<'a>(desc: &Descriptor, message: &'a [u8]) -> Result<&'a [u8]> {
    message.get(desc.range()).ok_or(Error::BufferTooSmall {
        needed: desc.offset + desc.length,
        actual: message.len(),
    })
}

fn field_mut<'a>(desc: &Descriptor, message: &'a mut [u8]) -> Result<&'a mut [u8]> {
    let actual = message.len();
    message.get_mut(desc.range()).ok_or(Error::BufferTooSmall {
        needed: desc.offset + desc.length,
        actual,
    })
}

fn array<const N: usize>(bytes: &[u8]) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&bytes[..N]);
    out
}

/// Decode the value stored in field `desc`
pub fn read_value(desc: &Descriptor, message: &[u8]) -> Result<Value> {
    let bytes = field(desc, message)?;
    let scale = desc.scale as i16;
    let value = match desc.dtype {
        DType::Text => Value::Str(String::from_utf8_lossy(bytes).into_owned()),
        DType::CString => {
            let end = bytes.iter().position(|b| *b == 0).unwrap_or(bytes.len());
            Value::Str(String::from_utf8_lossy(&bytes[..end]).into_owned())
        }
        DType::Varying => {
            let len = u16::from_le_bytes(array(bytes)) as usize;
            let data = bytes.get(2..2 + len).ok_or(Error::StringTruncation {
                max: desc.length - 2,
                actual: len,
            })?;
            Value::Str(String::from_utf8_lossy(data).into_owned())
        }
        DType::Short => scaled(i16::from_le_bytes(array(bytes)) as i128, scale, |v| Value::I16(v as i16)),
        DType::Long => scaled(i32::from_le_bytes(array(bytes)) as i128, scale, |v| Value::I32(v as i32)),
        DType::Int64 => scaled(i64::from_le_bytes(array(bytes)) as i128, scale, |v| Value::I64(v as i64)),
        DType::Int128 => Value::from_scaled(i128::from_le_bytes(array(bytes)), scale),
        DType::Float => Value::F32(f32::from_le_bytes(array(bytes))),
        DType::Double => Value::F64(f64::from_le_bytes(array(bytes))),
        DType::SqlDate => Value::Date(decode_date(i32::from_le_bytes(array(bytes)))),
        DType::SqlTime | DType::TimeTz | DType::ExTimeTz => {
            Value::Time(decode_time(u32::from_le_bytes(array(bytes))))
        }
        DType::Timestamp | DType::TimestampTz | DType::ExTimestampTz => {
            let date = decode_date(i32::from_le_bytes(array(&bytes[..4])));
            let time = decode_time(u32::from_le_bytes(array(&bytes[4..8])));
            Value::Timestamp(NaiveDateTime::new(date, time))
        }
        DType::Boolean => Value::Bool(bytes[0] != 0),
        DType::Quad | DType::Blob => Value::Bytea(bytes.to_vec()),
        DType::Dec64 | DType::Dec128 => return Err(Error::Unsupported(desc.dtype)),
    };
    Ok(value)
}

fn scaled(raw: i128, scale: i16, plain: impl FnOnce(i128) -> Value) -> Value {
    if scale == 0 {
        plain(raw)
    } else {
        Value::from_scaled(raw, scale)
    }
}

fn check_range<T: TryFrom<i128>>(raw: i128, value: &Value, dtype: DType) -> Result<T> {
    T::try_from(raw).map_err(|_| {
        Error::Conversion(keel_value::Error::Overflow {
            value: value.to_string(),
            target: match dtype {
                DType::Short => "smallint",
                DType::Long => "integer",
                _ => "bigint",
            },
        })
    })
}

/// Encode `value` into field `desc`. NULL must be signalled through the
/// column's null indicator instead.
pub fn write_value(desc: &Descriptor, message: &mut [u8], value: &Value) -> Result<()> {
    let scale = desc.scale as i16;
    let bytes = field_mut(desc, message)?;
    match desc.dtype {
        DType::Text => {
            let text = value.to_text();
            if text.len() > desc.length {
                return Err(Error::StringTruncation {
                    max: desc.length,
                    actual: text.len(),
                });
            }
            bytes[..text.len()].copy_from_slice(text.as_bytes());
            bytes[text.len()..].fill(b' ');
        }
        DType::CString => {
            let text = value.to_text();
            if text.len() + 1 > desc.length {
                return Err(Error::StringTruncation {
                    max: desc.length.saturating_sub(1),
                    actual: text.len(),
                });
            }
            bytes[..text.len()].copy_from_slice(text.as_bytes());
            bytes[text.len()..].fill(0);
        }
        DType::Varying => {
            let text = match value {
                Value::Bytea(b) => b.clone(),
                other => other.to_text().into_bytes(),
            };
            let max = desc.length - 2;
            if text.len() > max {
                return Err(Error::StringTruncation {
                    max,
                    actual: text.len(),
                });
            }
            bytes[..2].copy_from_slice(&(text.len() as u16).to_le_bytes());
            bytes[2..2 + text.len()].copy_from_slice(&text);
            bytes[2 + text.len()..].fill(0);
        }
        DType::Short => {
            let raw = value.to_scaled_i128(scale)?;
            let v: i16 = check_range(raw, value, desc.dtype)?;
            bytes.copy_from_slice(&v.to_le_bytes());
        }
        DType::Long => {
            let raw = value.to_scaled_i128(scale)?;
            let v: i32 = check_range(raw, value, desc.dtype)?;
            bytes.copy_from_slice(&v.to_le_bytes());
        }
        DType::Int64 => {
            let raw = value.to_scaled_i128(scale)?;
            let v: i64 = check_range(raw, value, desc.dtype)?;
            bytes.copy_from_slice(&v.to_le_bytes());
        }
        DType::Int128 => {
            bytes.copy_from_slice(&value.to_scaled_i128(scale)?.to_le_bytes());
        }
        DType::Float => bytes.copy_from_slice(&(value.to_f64()? as f32).to_le_bytes()),
        DType::Double => bytes.copy_from_slice(&value.to_f64()?.to_le_bytes()),
        DType::SqlDate => bytes.copy_from_slice(&encode_date(value.to_date()?).to_le_bytes()),
        DType::SqlTime => bytes.copy_from_slice(&encode_time(value.to_time()?).to_le_bytes()),
        DType::TimeTz | DType::ExTimeTz => {
            bytes.fill(0);
            bytes[..4].copy_from_slice(&encode_time(value.to_time()?).to_le_bytes());
            bytes[4..6].copy_from_slice(&UTC_ZONE.to_le_bytes());
        }
        DType::Timestamp | DType::TimestampTz | DType::ExTimestampTz => {
            let ts = value.to_timestamp()?;
            bytes.fill(0);
            bytes[..4].copy_from_slice(&encode_date(ts.date()).to_le_bytes());
            bytes[4..8].copy_from_slice(&encode_time(ts.time()).to_le_bytes());
            if desc.dtype != DType::Timestamp {
                bytes[8..10].copy_from_slice(&UTC_ZONE.to_le_bytes());
            }
        }
        DType::Boolean => bytes[0] = value.to_bool()? as u8,
        DType::Quad | DType::Blob => match value {
            Value::Bytea(b) if b.len() == desc.length => bytes.copy_from_slice(b),
            other => {
                return Err(Error::Conversion(keel_value::Error::Incompatible {
                    from: other.type_name(),
                    target: "blob id",
                }));
            }
        },
        DType::Dec64 | DType::Dec128 => return Err(Error::Unsupported(desc.dtype)),
    }
    Ok(())
}

/// Whether the null indicator `desc` is set
pub fn is_null(desc: &Descriptor, message: &[u8]) -> Result<bool> {
    let bytes = field(desc, message)?;
    Ok(i16::from_le_bytes(array(bytes)) != 0)
}

pub fn set_null(desc: &Descriptor, message: &mut [u8], null: bool) -> Result<()> {
    let bytes = field_mut(desc, message)?;
    let flag = if null { NULL_FLAG } else { 0 };
    bytes.copy_from_slice(&flag.to_le_bytes());
    Ok(())
}

impl Format {
    /// Read output column `index`, honouring its null indicator
    pub fn read_column(&self, message: &[u8], index: usize) -> Result<Value> {
        let (value, null) = self.column(index)?;
        if is_null(null, message)? {
            return Ok(Value::Null);
        }
        read_value(value, message)
    }

    /// Store `value` into column `index`; NULL only sets the indicator
    pub fn write_column(&self, message: &mut [u8], index: usize, value: &Value) -> Result<()> {
        let (desc, null) = self.column(index)?;
        if value.is_null() {
            return set_null(null, message, true);
        }
        write_value(desc, message, value)?;
        set_null(null, message, false)
    }

    /// All columns of a message, in order
    pub fn read_row(&self, message: &[u8]) -> Result<Vec<Value>> {
        self.check_buffer(message)?;
        (0..self.column_count())
            .map(|i| self.read_column(message, i))
            .collect()
    }

    /// Build a message holding `values`
    pub fn encode_row(&self, values: &[Value]) -> Result<Vec<u8>> {
        let mut message = self.new_message();
        for (i, value) in values.iter().enumerate() {
            self.write_column(&mut message, i, value)?;
        }
        Ok(message)
    }
}
