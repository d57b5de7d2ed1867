//! Append-only, position-indexed row storage for scrollable cursors
//!
//! Rows stay in memory until the configured limit is crossed; from then
//! on the whole cache lives in an anonymous temporary file that is removed
//! when the cache is dropped.

use crate::config::RowCacheConfig;
use crate::error::{Error, Result};
use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};

#[derive(Debug)]
pub struct RowCache {
    config: RowCacheConfig,
    /// (offset, length) of every stored row
    index: Vec<(u64, usize)>,
    memory: Vec<u8>,
    file: Option<File>,
    size: u64,
}

impl RowCache {
    pub fn new(config: RowCacheConfig) -> Self {
        Self {
            config,
            index: Vec::new(),
            memory: Vec::new(),
            file: None,
            size: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn is_spilled(&self) -> bool {
        self.file.is_some()
    }

    /// Bytes stored so far
    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn append(&mut self, row: &[u8]) -> Result<()> {
        if self.file.is_none() && self.memory.len() + row.len() > self.config.memory_limit {
            self.spill()?;
        }

        match &mut self.file {
            Some(file) => {
                file.seek(SeekFrom::End(0))?;
                file.write_all(row)?;
            }
            None => self.memory.extend_from_slice(row),
        }

        self.index.push((self.size, row.len()));
        self.size += row.len() as u64;
        Ok(())
    }

    /// Copy row `index` (zero-based) into `buf`
    pub fn read(&mut self, index: usize, buf: &mut Vec<u8>) -> Result<()> {
        let (offset, len) = *self
            .index
            .get(index)
            .ok_or_else(|| Error::Internal(format!("row {} is not cached", index)))?;

        buf.clear();
        buf.resize(len, 0);
        match &mut self.file {
            Some(file) => {
                file.seek(SeekFrom::Start(offset))?;
                file.read_exact(buf)?;
            }
            None => {
                let start = offset as usize;
                buf.copy_from_slice(&self.memory[start..start + len]);
            }
        }
        Ok(())
    }

    fn spill(&mut self) -> Result<()> {
        let mut file = match &self.config.spill_dir {
            Some(dir) => tempfile::tempfile_in(dir)?,
            None => tempfile::tempfile()?,
        };
        file.write_all(&self.memory)?;

        tracing::debug!(
            "Row cache spilled to disk after {} rows ({} bytes)",
            self.index.len(),
            self.memory.len()
        );

        self.memory = Vec::new();
        self.file = Some(file);
        Ok(())
    }
}
