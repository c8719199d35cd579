//! Paged iteration over a snapshot of matching entries.

use keyfort_common::{Entry, Result};

/// Number of entries returned per scan page.
pub const PAGE_SIZE: usize = 32;

/// A snapshot cursor over entries matched at scan creation time.
///
/// Writes made after the scan was created are never reflected in its pages.
pub struct Scan {
    entries: Vec<Entry>,
    position: usize,
}

impl Scan {
    pub(crate) fn new(entries: Vec<Entry>) -> Self {
        Self {
            entries,
            position: 0,
        }
    }

    /// Total number of entries in the snapshot.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the snapshot matched no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Fetch the next page of up to [`PAGE_SIZE`] entries.
    ///
    /// Returns `None` once the snapshot is exhausted.
    pub async fn fetch_next(&mut self) -> Result<Option<Vec<Entry>>> {
        if self.position >= self.entries.len() {
            return Ok(None);
        }
        let end = (self.position + PAGE_SIZE).min(self.entries.len());
        let page = self.entries[self.position..end].to_vec();
        self.position = end;
        Ok(Some(page))
    }

    /// Collect all remaining entries.
    pub async fn fetch_all(mut self) -> Result<Vec<Entry>> {
        let mut all = Vec::with_capacity(self.entries.len() - self.position);
        while let Some(page) = self.fetch_next().await? {
            all.extend(page);
        }
        Ok(all)
    }
}
