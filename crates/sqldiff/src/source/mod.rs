//! Data sources: the semantic operations the orchestrators schedule.
//!
//! A [`DataSource`] hides how one side of the diff is reached. The SQL-backed
//! implementation composes a dialect, the query builders, and an adapter;
//! the in-memory implementation backs the test suite. Keeping the seam at
//! this level lets tests mix and match sides freely.

pub mod memory;
pub mod sql;

pub use memory::MemorySource;
pub use sql::SqlSource;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::adapter::Adapter;
use crate::error::{DiffError, Result};
use crate::schema::Schema;
use crate::segment::{KeyValue, Row, TablePath, TableSegment};

/// Segment checksum: an associative fold (sum) of per-row hash fragments,
/// carried as an arbitrary-precision decimal parsed into 128 bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Checksum(pub u128);

impl Checksum {
    /// Parse the decimal string an aggregate SUM returns.
    pub fn from_decimal(text: &str) -> Result<Self> {
        text.trim()
            .parse::<u128>()
            .map(Checksum)
            .map_err(|_| DiffError::backend(format!("Unparseable checksum '{}'", text)))
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Result of the one-pass count + checksum aggregate over a segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChecksumResult {
    pub count: u64,
    /// `None` when the segment is empty.
    pub checksum: Option<Checksum>,
}

/// One side of a diff, behind the capability seam.
#[async_trait]
pub trait DataSource: Send + Sync {
    /// Short name for logs ("postgres", "mysql", "memory").
    fn label(&self) -> &str;

    /// Resolve the table's live schema into type descriptors.
    async fn schema(&self, path: &TablePath, case_sensitive: bool) -> Result<Schema>;

    /// `(row_count, checksum)` over the segment in a single pass.
    async fn count_and_checksum(&self, segment: &TableSegment) -> Result<ChecksumResult>;

    /// All relevant rows of the segment as canonical text, key-ordered.
    async fn fetch_rows(&self, segment: &TableSegment) -> Result<Vec<Row>>;

    /// Min/max of the leading key column within the segment's restrictions;
    /// `(None, None)` when the segment is empty.
    async fn key_range(
        &self,
        segment: &TableSegment,
    ) -> Result<(Option<KeyValue>, Option<KeyValue>)>;

    /// Up to `children - 1` interior checkpoints at approximately equal rank.
    /// `approx_rows` feeds the rank arithmetic of the OFFSET fallback.
    async fn choose_checkpoints(
        &self,
        segment: &TableSegment,
        children: usize,
        approx_rows: u64,
    ) -> Result<Vec<KeyValue>>;

    /// Subset of `candidates` that exist on this side (checkpoint filter).
    async fn filter_checkpoints(
        &self,
        segment: &TableSegment,
        candidates: &[KeyValue],
    ) -> Result<Vec<KeyValue>>;

    /// The raw adapter, when this source is SQL-backed. Joindiff needs it
    /// for connection-identity checks and join execution.
    fn join_adapter(&self) -> Option<Arc<dyn Adapter>> {
        None
    }

    async fn healthcheck(&self) -> Result<()>;

    async fn close(&self);
}
