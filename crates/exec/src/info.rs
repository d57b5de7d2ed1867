//! Info buffer encoding
//!
//! Each item is written as `item, length (u16 LE), data`. The buffer ends
//! with `END`; if the caller's limit is reached the last item written is
//! `TRUNCATED` instead.

pub const END: u8 = 1;
pub const TRUNCATED: u8 = 2;
pub const ERROR: u8 = 3;

/// Cursor: rows in the cache once end of stream is known, else -1
pub const RECORD_COUNT: u8 = 10;

pub const STMT_TYPE: u8 = 21;
/// Cluster of per-operation row counts
pub const RECORDS: u8 = 23;
pub const TIMEOUT_USER: u8 = 28;
pub const TIMEOUT_RUN: u8 = 29;

/// Sub-items of `RECORDS`
pub const REQ_INSERT_COUNT: u8 = 13;
pub const REQ_UPDATE_COUNT: u8 = 14;
pub const REQ_DELETE_COUNT: u8 = 15;
pub const REQ_SELECT_COUNT: u8 = 16;

pub(crate) struct InfoWriter {
    buf: Vec<u8>,
    max_len: usize,
    truncated: bool,
}

impl InfoWriter {
    pub(crate) fn new(max_len: usize) -> Self {
        Self {
            buf: Vec::new(),
            max_len,
            truncated: false,
        }
    }

    /// Append an item; false once the buffer is full
    pub(crate) fn put(&mut self, item: u8, data: &[u8]) -> bool {
        if self.truncated {
            return false;
        }
        // Room for the item and a trailing END
        if self.buf.len() + 3 + data.len() + 1 > self.max_len {
            self.truncated = true;
            if self.buf.len() < self.max_len {
                self.buf.push(TRUNCATED);
            }
            return false;
        }
        self.buf.push(item);
        self.buf.extend_from_slice(&(data.len() as u16).to_le_bytes());
        self.buf.extend_from_slice(data);
        true
    }

    pub(crate) fn put_int(&mut self, item: u8, value: i32) -> bool {
        self.put(item, &value.to_le_bytes())
    }

    /// Mark an item this buffer does not know
    pub(crate) fn unknown(&mut self, item: u8) -> bool {
        self.put(ERROR, &[item])
    }

    pub(crate) fn finish(mut self) -> Vec<u8> {
        if !self.truncated && self.buf.len() < self.max_len {
            self.buf.push(END);
        }
        self.buf
    }
}

/// Encode `(sub_item, count)` pairs as the body of a `RECORDS` cluster
pub(crate) fn records_cluster(counts: &[(u8, u64)]) -> Vec<u8> {
    let mut body = Vec::new();
    for (item, count) in counts {
        body.push(*item);
        body.extend_from_slice(&4u16.to_le_bytes());
        body.extend_from_slice(&(*count as i32).to_le_bytes());
    }
    body.push(END);
    body
}

/// Decoded item of an info buffer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InfoItem {
    pub item: u8,
    pub data: Vec<u8>,
}

impl InfoItem {
    pub fn as_int(&self) -> Option<i32> {
        let bytes: [u8; 4] = self.data.as_slice().try_into().ok()?;
        Some(i32::from_le_bytes(bytes))
    }
}

/// Split an info buffer into items, stopping at `END` or `TRUNCATED`.
/// The second element reports whether the buffer was truncated.
pub fn parse_info(buf: &[u8]) -> (Vec<InfoItem>, bool) {
    let mut items = Vec::new();
    let mut pos = 0;
    while let Some(&item) = buf.get(pos) {
        match item {
            END => return (items, false),
            TRUNCATED => return (items, true),
            _ => {}
        }
        let Some(len) = buf.get(pos + 1..pos + 3) else {
            break;
        };
        let len = u16::from_le_bytes([len[0], len[1]]) as usize;
        let Some(data) = buf.get(pos + 3..pos + 3 + len) else {
            break;
        };
        items.push(InfoItem {
            item,
            data: data.to_vec(),
        });
        pos += 3 + len;
    }
    (items, false)
}
