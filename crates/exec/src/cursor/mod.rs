//! Cursors over a request's forward-only row stream
//!
//! A scrollable cursor copies every row it pulls from the request into a
//! `RowCache`, together with the record keys the row was built from. Any
//! position at or below the cached count is served from the cache;
//! positions beyond it pull more rows forward until the target is reached
//! or the stream ends. The request itself is never rewound.

pub mod row_cache;

use crate::config::RowCacheConfig;
use crate::error::{Error, Result};
use crate::info::{self, InfoWriter};
use crate::request::RecordKey;
use parking_lot::Mutex;
use row_cache::RowCache;
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchDirection {
    Next,
    Prior,
    First,
    Last,
    /// 1-based from the start; zero or negative counts back from the end
    Absolute(i64),
    Relative(i64),
}

impl fmt::Display for FetchDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchDirection::Next => write!(f, "NEXT"),
            FetchDirection::Prior => write!(f, "PRIOR"),
            FetchDirection::First => write!(f, "FIRST"),
            FetchDirection::Last => write!(f, "LAST"),
            FetchDirection::Absolute(n) => write!(f, "ABSOLUTE {}", n),
            FetchDirection::Relative(n) => write!(f, "RELATIVE {}", n),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorState {
    BeforeStart,
    Positioned,
    AfterEnd,
}

/// Outcome of a fetch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fetched {
    /// The output message holds the row at the new position
    Row,
    BeforeStart,
    AfterEnd,
}

impl Fetched {
    pub fn has_row(self) -> bool {
        self == Fetched::Row
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CursorFlags {
    pub scrollable: bool,
}

impl CursorFlags {
    pub fn scrollable() -> Self {
        Self { scrollable: true }
    }

    pub fn forward_only() -> Self {
        Self { scrollable: false }
    }
}

#[derive(Debug, Default)]
struct LinkState {
    positioned: bool,
    keys: Vec<RecordKey>,
}

/// What positioned updates see of a cursor: whether it sits on a row and
/// the record keys of that row. Owned by the cursor; everyone else keeps a
/// `Weak` and must cope with it being gone.
#[derive(Debug, Default)]
pub struct CursorLink {
    state: Mutex<LinkState>,
}

impl CursorLink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_positioned(&self) -> bool {
        self.state.lock().positioned
    }

    /// Key of the current row's record from `relation`
    pub fn key_for(&self, relation: &str) -> Option<RecordKey> {
        let state = self.state.lock();
        if !state.positioned {
            return None;
        }
        state.keys.iter().find(|k| k.relation == relation).cloned()
    }

    fn set_row(&self, keys: Vec<RecordKey>) {
        let mut state = self.state.lock();
        state.positioned = true;
        state.keys = keys;
    }

    fn clear(&self) {
        let mut state = self.state.lock();
        state.positioned = false;
        state.keys.clear();
    }
}

/// Forward-only producer of rows feeding a cursor
pub trait RowSource {
    /// Write the next row into `message` and its record keys into `keys`;
    /// false once the stream is exhausted
    fn next_row(&mut self, message: &mut [u8], keys: &mut Vec<RecordKey>) -> Result<bool>;
}

fn encode_keys(keys: &[RecordKey], out: &mut Vec<u8>) {
    out.extend_from_slice(&(keys.len() as u16).to_le_bytes());
    for key in keys {
        out.extend_from_slice(&key.stream.to_le_bytes());
        out.extend_from_slice(&(key.relation.len() as u16).to_le_bytes());
        out.extend_from_slice(key.relation.as_bytes());
        out.extend_from_slice(&key.record.to_le_bytes());
    }
}

fn decode_keys(mut bytes: &[u8]) -> Result<Vec<RecordKey>> {
    fn take<'a>(bytes: &mut &'a [u8], n: usize) -> Result<&'a [u8]> {
        if bytes.len() < n {
            return Err(Error::Internal("corrupt cached record keys".to_string()));
        }
        let (head, tail) = bytes.split_at(n);
        *bytes = tail;
        Ok(head)
    }
    fn u16_of(b: &[u8]) -> u16 {
        u16::from_le_bytes([b[0], b[1]])
    }

    let count = u16_of(take(&mut bytes, 2)?);
    let mut keys = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let stream = u16_of(take(&mut bytes, 2)?);
        let len = u16_of(take(&mut bytes, 2)?) as usize;
        let relation = String::from_utf8_lossy(take(&mut bytes, len)?).into_owned();
        let mut record = [0u8; 8];
        record.copy_from_slice(take(&mut bytes, 8)?);
        keys.push(RecordKey {
            stream,
            relation,
            record: u64::from_le_bytes(record),
        });
    }
    Ok(keys)
}

/// A cursor opened on an executor
#[derive(Debug)]
pub struct Cursor {
    flags: CursorFlags,
    state: CursorState,
    /// 1-based; 0 before the start, `cached_count + 1` after the end
    position: u64,
    cached_count: u64,
    /// End of the underlying stream has been seen
    eof: bool,
    cache: Option<RowCache>,
    message_length: usize,
    link: Arc<CursorLink>,
    scratch: Vec<u8>,
}

impl Cursor {
    pub fn new(flags: CursorFlags, message_length: usize, cache_config: RowCacheConfig) -> Self {
        Self {
            flags,
            state: CursorState::BeforeStart,
            position: 0,
            cached_count: 0,
            eof: false,
            cache: flags.scrollable.then(|| RowCache::new(cache_config)),
            message_length,
            link: Arc::new(CursorLink::new()),
            scratch: Vec::new(),
        }
    }

    pub fn flags(&self) -> CursorFlags {
        self.flags
    }

    pub fn state(&self) -> CursorState {
        self.state
    }

    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn cached_count(&self) -> u64 {
        self.cached_count
    }

    /// Whether every row of the stream has been pulled
    pub fn is_exhausted(&self) -> bool {
        self.eof
    }

    pub fn link(&self) -> &Arc<CursorLink> {
        &self.link
    }

    /// Move according to `direction`, leaving the row (if any) in `message`
    pub fn fetch(
        &mut self,
        direction: FetchDirection,
        source: &mut dyn RowSource,
        message: &mut [u8],
    ) -> Result<Fetched> {
        if message.len() < self.message_length {
            return Err(Error::Malformed(keel_message::Error::BufferTooSmall {
                needed: self.message_length,
                actual: message.len(),
            }));
        }

        if !self.flags.scrollable {
            return self.fetch_forward(direction, source, message);
        }

        let current = self.position as i64;
        let target = match direction {
            FetchDirection::Next => current.saturating_add(1),
            FetchDirection::Prior => current.saturating_sub(1),
            FetchDirection::First => 1,
            FetchDirection::Last => {
                self.fill(u64::MAX, source)?;
                if self.cached_count == 0 {
                    return Ok(self.after_end());
                }
                self.cached_count as i64
            }
            FetchDirection::Absolute(0) => 0,
            FetchDirection::Absolute(n) if n >= 1 => n,
            FetchDirection::Absolute(n) => {
                self.fill(u64::MAX, source)?;
                (self.cached_count as i64).saturating_add(1).saturating_add(n)
            }
            FetchDirection::Relative(k) => current.saturating_add(k),
        };

        self.seek(target, source, message)
    }

    fn fetch_forward(
        &mut self,
        direction: FetchDirection,
        source: &mut dyn RowSource,
        message: &mut [u8],
    ) -> Result<Fetched> {
        if direction != FetchDirection::Next {
            return Err(Error::InvalidFetchOption(direction.to_string()));
        }
        if self.eof {
            return Ok(self.after_end());
        }

        let mut keys = Vec::new();
        if source.next_row(&mut message[..self.message_length], &mut keys)? {
            self.cached_count += 1;
            self.position = self.cached_count;
            self.state = CursorState::Positioned;
            self.link.set_row(keys);
            Ok(Fetched::Row)
        } else {
            self.eof = true;
            Ok(self.after_end())
        }
    }

    fn seek(&mut self, target: i64, source: &mut dyn RowSource, message: &mut [u8]) -> Result<Fetched> {
        if target < 1 {
            self.state = CursorState::BeforeStart;
            self.position = 0;
            self.link.clear();
            return Ok(Fetched::BeforeStart);
        }

        let target = target as u64;
        if target > self.cached_count {
            self.fill(target, source)?;
        }
        if target > self.cached_count {
            return Ok(self.after_end());
        }

        let keys = self.read_cached(target, message)?;
        self.position = target;
        self.state = CursorState::Positioned;
        self.link.set_row(keys);
        Ok(Fetched::Row)
    }

    fn after_end(&mut self) -> Fetched {
        self.state = CursorState::AfterEnd;
        self.position = self.cached_count + 1;
        self.link.clear();
        Fetched::AfterEnd
    }

    /// Pull rows into the cache until `target` rows are cached or the
    /// stream ends
    fn fill(&mut self, target: u64, source: &mut dyn RowSource) -> Result<()> {
        let Some(cache) = self.cache.as_mut() else {
            return Ok(());
        };

        let mut keys = Vec::new();
        while self.cached_count < target && !self.eof {
            self.scratch.clear();
            self.scratch.resize(self.message_length, 0);
            keys.clear();

            if !source.next_row(&mut self.scratch, &mut keys)? {
                self.eof = true;
                tracing::debug!("Cursor reached end of stream after {} rows", self.cached_count);
                break;
            }

            encode_keys(&keys, &mut self.scratch);
            cache.append(&self.scratch)?;
            self.cached_count += 1;
        }
        Ok(())
    }

    fn read_cached(&mut self, position: u64, message: &mut [u8]) -> Result<Vec<RecordKey>> {
        let cache = self
            .cache
            .as_mut()
            .ok_or_else(|| Error::Internal("forward-only cursor has no row cache".to_string()))?;

        cache.read((position - 1) as usize, &mut self.scratch)?;
        if self.scratch.len() < self.message_length {
            return Err(Error::Internal("corrupt cached row".to_string()));
        }
        let (row, keys) = self.scratch.split_at(self.message_length);
        message[..self.message_length].copy_from_slice(row);
        decode_keys(keys)
    }

    /// Encode cursor info items
    pub fn info(&self, items: &[u8], max_len: usize) -> Vec<u8> {
        let mut writer = InfoWriter::new(max_len);
        for &item in items {
            let written = match item {
                info::RECORD_COUNT => {
                    let count = if self.eof { self.cached_count as i32 } else { -1 };
                    writer.put_int(item, count)
                }
                other => writer.unknown(other),
            };
            if !written {
                break;
            }
        }
        writer.finish()
    }
}

impl Drop for Cursor {
    fn drop(&mut self) {
        self.link.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Source of `total` rows; row n carries n in every byte of a 4-byte
    /// message
    struct CountingSource {
        total: u64,
        produced: u64,
        calls: usize,
    }

    impl CountingSource {
        fn new(total: u64) -> Self {
            Self {
                total,
                produced: 0,
                calls: 0,
            }
        }
    }

    impl RowSource for CountingSource {
        fn next_row(&mut self, message: &mut [u8], keys: &mut Vec<RecordKey>) -> Result<bool> {
            self.calls += 1;
            if self.produced == self.total {
                return Ok(false);
            }
            self.produced += 1;
            message.fill(self.produced as u8);
            keys.push(RecordKey::new(0, "T", self.produced * 10));
            Ok(true)
        }
    }

    fn scrollable() -> Cursor {
        Cursor::new(CursorFlags::scrollable(), 4, RowCacheConfig::default())
    }

    #[test]
    fn test_walk_through_five_rows() {
        let mut cursor = scrollable();
        let mut source = CountingSource::new(5);
        let mut msg = [0u8; 4];

        let mut positions = Vec::new();
        let mut second_rows = Vec::new();
        for direction in [
            FetchDirection::First,
            FetchDirection::Next,
            FetchDirection::Next,
            FetchDirection::Last,
            FetchDirection::Prior,
            FetchDirection::Absolute(2),
        ] {
            assert_eq!(cursor.fetch(direction, &mut source, &mut msg).unwrap(), Fetched::Row);
            positions.push(cursor.position());
            if cursor.position() == 2 {
                second_rows.push(msg);
            }
        }

        assert_eq!(positions, vec![1, 2, 3, 5, 4, 2]);
        assert_eq!(second_rows, vec![[2u8; 4], [2u8; 4]]);
    }

    #[test]
    fn test_cache_hit_does_no_forward_fill() {
        let mut cursor = scrollable();
        let mut source = CountingSource::new(10);
        let mut first = [0u8; 4];
        let mut second = [0u8; 4];

        cursor.fetch(FetchDirection::Absolute(3), &mut source, &mut first).unwrap();
        let calls = source.calls;
        cursor.fetch(FetchDirection::Absolute(3), &mut source, &mut second).unwrap();

        assert_eq!(source.calls, calls);
        assert_eq!(first, second);
    }

    #[test]
    fn test_absolute_zero_and_prior_from_start() {
        let mut cursor = scrollable();
        let mut source = CountingSource::new(3);
        let mut msg = [0u8; 4];

        cursor.fetch(FetchDirection::Next, &mut source, &mut msg).unwrap();
        assert_eq!(
            cursor.fetch(FetchDirection::Absolute(0), &mut source, &mut msg).unwrap(),
            Fetched::BeforeStart
        );
        assert_eq!(cursor.state(), CursorState::BeforeStart);
        assert_eq!(cursor.position(), 0);

        assert_eq!(
            cursor.fetch(FetchDirection::Prior, &mut source, &mut msg).unwrap(),
            Fetched::BeforeStart
        );
        assert_eq!(cursor.state(), CursorState::BeforeStart);
        assert_eq!(cursor.position(), 0);
    }

    #[test]
    fn test_absolute_zero_does_not_pull_rows() {
        let mut cursor = scrollable();
        let mut source = CountingSource::new(5);
        let mut msg = [0u8; 4];

        assert_eq!(
            cursor.fetch(FetchDirection::Absolute(0), &mut source, &mut msg).unwrap(),
            Fetched::BeforeStart
        );
        assert_eq!(cursor.state(), CursorState::BeforeStart);
        assert_eq!(cursor.position(), 0);
        assert_eq!(source.calls, 0);
    }

    #[test]
    fn test_extreme_relative_offsets_clamp() {
        let mut cursor = scrollable();
        let mut source = CountingSource::new(3);
        let mut msg = [0u8; 4];

        cursor.fetch(FetchDirection::Next, &mut source, &mut msg).unwrap();
        assert_eq!(
            cursor.fetch(FetchDirection::Relative(i64::MAX), &mut source, &mut msg).unwrap(),
            Fetched::AfterEnd
        );
        assert_eq!(cursor.state(), CursorState::AfterEnd);
        assert_eq!(cursor.position(), 4);

        assert_eq!(
            cursor.fetch(FetchDirection::Relative(i64::MIN), &mut source, &mut msg).unwrap(),
            Fetched::BeforeStart
        );
        assert_eq!(cursor.position(), 0);

        assert_eq!(
            cursor.fetch(FetchDirection::Absolute(i64::MIN), &mut source, &mut msg).unwrap(),
            Fetched::BeforeStart
        );
        assert_eq!(
            cursor.fetch(FetchDirection::Absolute(i64::MAX), &mut source, &mut msg).unwrap(),
            Fetched::AfterEnd
        );
    }

    #[test]
    fn test_negative_absolute_materializes_once() {
        let mut cursor = scrollable();
        let mut source = CountingSource::new(4);
        let mut msg = [0u8; 4];

        cursor.fetch(FetchDirection::Absolute(-1), &mut source, &mut msg).unwrap();
        assert_eq!(cursor.position(), 4);
        assert_eq!(msg, [4u8; 4]);
        assert!(cursor.is_exhausted());

        // 4 rows plus the end-of-stream probe
        assert_eq!(source.calls, 5);
        cursor.fetch(FetchDirection::Absolute(-1), &mut source, &mut msg).unwrap();
        cursor.fetch(FetchDirection::Absolute(-4), &mut source, &mut msg).unwrap();
        assert_eq!(source.calls, 5);
        assert_eq!(cursor.position(), 1);
    }

    #[test]
    fn test_moving_past_the_end() {
        let mut cursor = scrollable();
        let mut source = CountingSource::new(2);
        let mut msg = [0u8; 4];

        assert_eq!(
            cursor.fetch(FetchDirection::Absolute(5), &mut source, &mut msg).unwrap(),
            Fetched::AfterEnd
        );
        assert_eq!(cursor.state(), CursorState::AfterEnd);
        assert_eq!(cursor.position(), 3);

        assert_eq!(
            cursor.fetch(FetchDirection::Next, &mut source, &mut msg).unwrap(),
            Fetched::AfterEnd
        );
        assert_eq!(cursor.position(), 3);

        assert_eq!(
            cursor.fetch(FetchDirection::Relative(-1), &mut source, &mut msg).unwrap(),
            Fetched::Row
        );
        assert_eq!(cursor.position(), 2);
        assert_eq!(msg, [2u8; 4]);
    }

    #[test]
    fn test_last_on_empty_stream() {
        let mut cursor = scrollable();
        let mut source = CountingSource::new(0);
        let mut msg = [0u8; 4];
        assert_eq!(
            cursor.fetch(FetchDirection::Last, &mut source, &mut msg).unwrap(),
            Fetched::AfterEnd
        );
        assert_eq!(cursor.position(), 1);
    }

    #[test]
    fn test_link_follows_current_row() {
        let mut cursor = scrollable();
        let mut source = CountingSource::new(3);
        let mut msg = [0u8; 4];
        let link = Arc::clone(cursor.link());

        assert!(!link.is_positioned());
        cursor.fetch(FetchDirection::Absolute(2), &mut source, &mut msg).unwrap();
        assert_eq!(link.key_for("T"), Some(RecordKey::new(0, "T", 20)));

        cursor.fetch(FetchDirection::First, &mut source, &mut msg).unwrap();
        assert_eq!(link.key_for("T").map(|k| k.record), Some(10));

        cursor.fetch(FetchDirection::Absolute(0), &mut source, &mut msg).unwrap();
        assert!(!link.is_positioned());

        cursor.fetch(FetchDirection::Next, &mut source, &mut msg).unwrap();
        drop(cursor);
        assert!(!link.is_positioned());
    }

    #[test]
    fn test_forward_only_rejects_scrolling() {
        let mut cursor = Cursor::new(CursorFlags::forward_only(), 4, RowCacheConfig::default());
        let mut source = CountingSource::new(1);
        let mut msg = [0u8; 4];

        let err = cursor
            .fetch(FetchDirection::Prior, &mut source, &mut msg)
            .unwrap_err();
        assert_eq!(err, Error::InvalidFetchOption("PRIOR".to_string()));

        assert!(cursor.fetch(FetchDirection::Next, &mut source, &mut msg).unwrap().has_row());
        assert_eq!(
            cursor.fetch(FetchDirection::Next, &mut source, &mut msg).unwrap(),
            Fetched::AfterEnd
        );
        let calls = source.calls;
        assert_eq!(
            cursor.fetch(FetchDirection::Next, &mut source, &mut msg).unwrap(),
            Fetched::AfterEnd
        );
        assert_eq!(source.calls, calls);
    }

    #[test]
    fn test_record_count_info() {
        let mut cursor = scrollable();
        let mut source = CountingSource::new(3);
        let mut msg = [0u8; 4];

        let (items, _) = info::parse_info(&cursor.info(&[info::RECORD_COUNT], 32));
        assert_eq!(items[0].as_int(), Some(-1));

        cursor.fetch(FetchDirection::Last, &mut source, &mut msg).unwrap();
        let (items, _) = info::parse_info(&cursor.info(&[info::RECORD_COUNT], 32));
        assert_eq!(items[0].as_int(), Some(3));
    }

    #[test]
    fn test_spilled_cache_serves_same_rows() {
        let dir = tempfile::tempdir().unwrap();
        let config = RowCacheConfig {
            memory_limit: 32,
            spill_dir: Some(dir.path().to_path_buf()),
        };
        let mut cursor = Cursor::new(CursorFlags::scrollable(), 4, config);
        let mut source = CountingSource::new(20);
        let mut msg = [0u8; 4];

        cursor.fetch(FetchDirection::Last, &mut source, &mut msg).unwrap();
        assert_eq!(msg, [20u8; 4]);
        cursor.fetch(FetchDirection::Absolute(7), &mut source, &mut msg).unwrap();
        assert_eq!(msg, [7u8; 4]);
    }

    #[test]
    fn test_key_encoding_survives_cache() {
        let keys = vec![RecordKey::new(0, "ORDERS", 7), RecordKey::new(1, "LINES", 99)];
        let mut buf = Vec::new();
        encode_keys(&keys, &mut buf);
        assert_eq!(decode_keys(&buf).unwrap(), keys);
        assert!(decode_keys(&buf[..5]).is_err());
    }
}
