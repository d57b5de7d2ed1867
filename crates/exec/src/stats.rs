//! Fetch statistics

use std::time::{Duration, Instant};

/// Rows delivered and time spent fetching since the last report
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FetchStats {
    pub rows: u64,
    pub elapsed: Duration,
}

impl FetchStats {
    pub fn record(&mut self, rows: u64, started: Instant) {
        self.rows += rows;
        self.elapsed += started.elapsed();
    }

    /// Report and reset
    pub fn take(&mut self) -> FetchStats {
        std::mem::take(self)
    }
}
