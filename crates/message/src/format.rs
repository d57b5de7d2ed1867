//! Message formats: BLR decoding into aligned field descriptors
//!
//! A message format is a list of descriptors, each with a physical type,
//! a byte length and an offset into the message buffer. Offsets are laid
//! out in declaration order, every field aligned to its type's boundary.
//!
//! Formats exchanged with clients describe columns as pairs: the value
//! descriptor followed by a `Short` null indicator.

use crate::blr;
use crate::error::{Error, Result};

/// Physical type of a message field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DType {
    Text,
    CString,
    Varying,
    Short,
    Long,
    Quad,
    Int64,
    Int128,
    Float,
    Double,
    Dec64,
    Dec128,
    SqlDate,
    SqlTime,
    Timestamp,
    TimeTz,
    TimestampTz,
    ExTimeTz,
    ExTimestampTz,
    Blob,
    Boolean,
}

impl DType {
    /// Byte boundary a field of this type starts on
    pub fn alignment(self) -> usize {
        match self {
            DType::Text | DType::CString | DType::Boolean => 1,
            DType::Varying | DType::Short => 2,
            DType::Int64 | DType::Int128 | DType::Double | DType::Dec64 | DType::Dec128 => 8,
            _ => 4,
        }
    }

    /// Whether values of this type carry a decimal scale
    pub fn is_exact_numeric(self) -> bool {
        matches!(
            self,
            DType::Short | DType::Long | DType::Int64 | DType::Int128 | DType::Quad
        )
    }

    pub fn is_text(self) -> bool {
        matches!(self, DType::Text | DType::CString | DType::Varying)
    }
}

/// One field of a message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Descriptor {
    pub dtype: DType,
    /// Physical length in bytes (for `Varying` this includes the length prefix)
    pub length: usize,
    /// Decimal scale, negative for fractional digits
    pub scale: i8,
    pub sub_type: i16,
    /// Character set of text fields
    pub text_type: u16,
    pub offset: usize,
}

impl Descriptor {
    fn new(dtype: DType, length: usize) -> Self {
        Self {
            dtype,
            length,
            scale: 0,
            sub_type: 0,
            text_type: 0,
            offset: 0,
        }
    }

    /// Byte range the field occupies in a message
    pub fn range(&self) -> std::ops::Range<usize> {
        self.offset..self.offset + self.length
    }
}

/// A decoded message format
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Format {
    pub descriptors: Vec<Descriptor>,
    /// Size of a message buffer for this format
    pub length: usize,
    /// Size on the wire, each field padded to four bytes
    pub net_length: usize,
}

impl Format {
    /// Number of (value, null indicator) column pairs
    pub fn column_count(&self) -> usize {
        self.descriptors.len() / 2
    }

    /// Value and null-indicator descriptors of output column `index`
    pub fn column(&self, index: usize) -> Result<(&Descriptor, &Descriptor)> {
        let value = self
            .descriptors
            .get(index * 2)
            .ok_or(Error::ColumnOutOfRange(index))?;
        let null = self
            .descriptors
            .get(index * 2 + 1)
            .ok_or(Error::ColumnOutOfRange(index))?;
        Ok((value, null))
    }

    /// A zeroed message buffer for this format
    pub fn new_message(&self) -> Vec<u8> {
        vec![0; self.length]
    }

    /// Fail unless `message` can hold a message of this format
    pub fn check_buffer(&self, message: &[u8]) -> Result<()> {
        if message.len() < self.length {
            return Err(Error::BufferTooSmall {
                needed: self.length,
                actual: message.len(),
            });
        }
        Ok(())
    }
}

/// A message declared in a request: its number and format
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageDecl {
    pub number: u8,
    pub format: Format,
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn byte(&mut self, what: &str) -> Result<u8> {
        let b = *self.bytes.get(self.pos).ok_or_else(|| Error::truncated(what))?;
        self.pos += 1;
        Ok(b)
    }

    fn u16(&mut self, what: &str) -> Result<u16> {
        let lo = self.byte(what)? as u16;
        let hi = self.byte(what)? as u16;
        Ok(lo | (hi << 8))
    }

    fn header(&mut self) -> Result<()> {
        let version = self.byte("header")?;
        if version != blr::VERSION4 && version != blr::VERSION5 {
            return Err(Error::MalformedFormat(format!(
                "unsupported BLR version {}",
                version
            )));
        }
        if self.byte("header")? != blr::BEGIN {
            return Err(Error::MalformedFormat("expected blr_begin".to_string()));
        }
        Ok(())
    }
}

fn align(offset: usize, alignment: usize) -> usize {
    (offset + alignment - 1) & !(alignment - 1)
}

/// Decode a field list: a 2-byte little-endian count followed by one
/// type-tagged entry per field.
pub fn parse_format(bytes: &[u8]) -> Result<Format> {
    let mut reader = Reader::new(bytes);
    parse_fields(&mut reader)
}

fn parse_fields(reader: &mut Reader<'_>) -> Result<Format> {
    let count = reader.u16("field count")?;
    let mut descriptors = Vec::with_capacity(count as usize);
    let mut offset = 0usize;
    let mut net_length = 0usize;

    for _ in 0..count {
        let tag = reader.byte("field type")?;
        let mut desc = match tag {
            blr::TEXT => Descriptor::new(DType::Text, reader.u16("text length")? as usize),
            blr::VARYING => {
                Descriptor::new(DType::Varying, reader.u16("varying length")? as usize + 2)
            }
            blr::CSTRING => Descriptor::new(DType::CString, reader.u16("cstring length")? as usize),
            blr::TEXT2 | blr::VARYING2 | blr::CSTRING2 => {
                let text_type = reader.u16("character set")?;
                let length = reader.u16("text length")? as usize;
                let mut desc = match tag {
                    blr::TEXT2 => Descriptor::new(DType::Text, length),
                    blr::VARYING2 => Descriptor::new(DType::Varying, length + 2),
                    _ => Descriptor::new(DType::CString, length),
                };
                desc.text_type = text_type;
                desc
            }
            blr::SHORT | blr::LONG | blr::INT64 | blr::QUAD | blr::INT128 => {
                let (dtype, length) = match tag {
                    blr::SHORT => (DType::Short, 2),
                    blr::LONG => (DType::Long, 4),
                    blr::INT64 => (DType::Int64, 8),
                    blr::QUAD => (DType::Quad, 8),
                    _ => (DType::Int128, 16),
                };
                let mut desc = Descriptor::new(dtype, length);
                desc.scale = reader.byte("scale")? as i8;
                desc
            }
            blr::FLOAT => Descriptor::new(DType::Float, 4),
            blr::DOUBLE | blr::D_FLOAT => Descriptor::new(DType::Double, 8),
            blr::DEC64 => Descriptor::new(DType::Dec64, 8),
            blr::DEC128 => Descriptor::new(DType::Dec128, 16),
            blr::BLOB2 => {
                let mut desc = Descriptor::new(DType::Blob, 8);
                desc.sub_type = reader.u16("blob subtype")? as i16;
                desc.text_type = reader.u16("blob character set")?;
                desc
            }
            blr::TIMESTAMP => Descriptor::new(DType::Timestamp, 8),
            blr::TIMESTAMP_TZ => Descriptor::new(DType::TimestampTz, 12),
            blr::EX_TIMESTAMP_TZ => Descriptor::new(DType::ExTimestampTz, 12),
            blr::SQL_DATE => Descriptor::new(DType::SqlDate, 4),
            blr::SQL_TIME => Descriptor::new(DType::SqlTime, 4),
            blr::SQL_TIME_TZ => Descriptor::new(DType::TimeTz, 8),
            blr::EX_TIME_TZ => Descriptor::new(DType::ExTimeTz, 8),
            blr::BOOL => Descriptor::new(DType::Boolean, 1),
            other => {
                return Err(Error::MalformedFormat(format!(
                    "unknown field type {}",
                    other
                )));
            }
        };

        net_length += if desc.dtype == DType::Varying {
            4 + align(desc.length - 2, 4)
        } else {
            align(desc.length, 4)
        };

        offset = align(offset, desc.dtype.alignment());
        desc.offset = offset;
        offset += desc.length;
        descriptors.push(desc);
    }

    Ok(Format {
        descriptors,
        length: offset,
        net_length,
    })
}

/// Decode the format of the single message declared by a request header
/// (`version begin message <number> <fields>`).
pub fn parse_message_format(blr: &[u8]) -> Result<Format> {
    let mut reader = Reader::new(blr);
    reader.header()?;
    if reader.byte("message")? != blr::MESSAGE {
        return Err(Error::MalformedFormat("expected blr_message".to_string()));
    }
    reader.byte("message number")?;
    parse_fields(&mut reader)
}

/// Decode every message declaration at the head of a request
pub fn parse_messages(blr: &[u8]) -> Result<Vec<MessageDecl>> {
    let mut reader = Reader::new(blr);
    reader.header()?;

    let mut messages = Vec::new();
    while reader.byte("message list")? == blr::MESSAGE {
        let number = reader.byte("message number")?;
        let format = parse_fields(&mut reader)?;
        messages.push(MessageDecl { number, format });
    }
    Ok(messages)
}

/// Builds the BLR of an output or input message, one column at a time.
///
/// Every column gets a trailing null indicator.
#[derive(Debug, Clone, Default)]
pub struct FormatBuilder {
    number: u8,
    fields: Vec<u8>,
    count: u16,
}

impl FormatBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_number(mut self, number: u8) -> Self {
        self.number = number;
        self
    }

    fn push(mut self, bytes: &[u8]) -> Self {
        self.fields.extend_from_slice(bytes);
        self.fields.push(blr::SHORT);
        self.fields.push(0);
        self.count += 2;
        self
    }

    pub fn text(self, length: u16) -> Self {
        let [lo, hi] = length.to_le_bytes();
        self.push(&[blr::TEXT, lo, hi])
    }

    pub fn varying(self, length: u16) -> Self {
        let [lo, hi] = length.to_le_bytes();
        self.push(&[blr::VARYING, lo, hi])
    }

    pub fn short(self, scale: i8) -> Self {
        self.push(&[blr::SHORT, scale as u8])
    }

    pub fn long(self, scale: i8) -> Self {
        self.push(&[blr::LONG, scale as u8])
    }

    pub fn int64(self, scale: i8) -> Self {
        self.push(&[blr::INT64, scale as u8])
    }

    pub fn int128(self, scale: i8) -> Self {
        self.push(&[blr::INT128, scale as u8])
    }

    pub fn float(self) -> Self {
        self.push(&[blr::FLOAT])
    }

    pub fn double(self) -> Self {
        self.push(&[blr::DOUBLE])
    }

    pub fn date(self) -> Self {
        self.push(&[blr::SQL_DATE])
    }

    pub fn time(self) -> Self {
        self.push(&[blr::SQL_TIME])
    }

    pub fn timestamp(self) -> Self {
        self.push(&[blr::TIMESTAMP])
    }

    pub fn boolean(self) -> Self {
        self.push(&[blr::BOOL])
    }

    /// Encoded message declaration
    pub fn to_blr(&self) -> Vec<u8> {
        let mut out = vec![blr::VERSION5, blr::BEGIN, blr::MESSAGE, self.number];
        out.extend_from_slice(&self.count.to_le_bytes());
        out.extend_from_slice(&self.fields);
        out.push(blr::END);
        out
    }

    pub fn build(&self) -> Result<Format> {
        parse_message_format(&self.to_blr())
    }
}
