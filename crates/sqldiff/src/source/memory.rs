//! In-memory data source.
//!
//! Holds tables as canonical-text rows and answers the same semantic
//! operations as a SQL-backed source. The orchestrator test suites run
//! entirely against this implementation, with no database in the loop.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use crate::dialect::{HASH_SEPARATOR, NULL_SENTINEL};
use crate::error::{DiffError, Result};
use crate::schema::{ColumnType, Schema};
use crate::segment::{KeyValue, Row, TablePath, TableSegment};

use super::{Checksum, ChecksumResult, DataSource};

struct MemTable {
    columns: Vec<(String, ColumnType)>,
    rows: Vec<Row>,
}

/// Counters the tests use to assert scheduling behavior.
#[derive(Debug, Default, Clone)]
pub struct MemoryStats {
    pub checksum_queries: usize,
    pub fetch_queries: usize,
}

pub struct MemorySource {
    label: String,
    tables: HashMap<String, MemTable>,
    stats: Mutex<MemoryStats>,
}

impl MemorySource {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            tables: HashMap::new(),
            stats: Mutex::new(MemoryStats::default()),
        }
    }

    /// Register a table. Rows are canonical-text values in column order.
    pub fn add_table(
        &mut self,
        path: &str,
        columns: Vec<(String, ColumnType)>,
        rows: Vec<Row>,
    ) -> &mut Self {
        self.tables.insert(path.to_string(), MemTable { columns, rows });
        self
    }

    pub fn stats(&self) -> MemoryStats {
        self.stats.lock().unwrap().clone()
    }

    fn table(&self, path: &TablePath) -> Result<&MemTable> {
        self.tables
            .get(&path.to_string())
            .ok_or_else(|| DiffError::Config(format!("Table not found: {}", path)))
    }

    /// Indexes of the segment's relevant columns within the stored rows.
    fn projection(&self, segment: &TableSegment, table: &MemTable) -> Result<Vec<usize>> {
        segment
            .relevant_columns()
            .iter()
            .map(|c| {
                table
                    .columns
                    .iter()
                    .position(|(n, _)| n.eq_ignore_ascii_case(c))
                    .ok_or_else(|| DiffError::UnknownColumn {
                        table: segment.path.to_string(),
                        column: c.clone(),
                    })
            })
            .collect()
    }

    /// Apply the segment's key-range, age, and (unsupported) predicate
    /// restrictions, returning projected rows sorted by key.
    fn segment_rows(&self, segment: &TableSegment) -> Result<Vec<Row>> {
        if segment.where_clause.is_some() {
            return Err(DiffError::Config(
                "the in-memory source does not evaluate -w/--where predicates".into(),
            ));
        }
        let table = self.table(&segment.path)?;
        let projection = self.projection(segment, table)?;
        let update_idx = segment.bound().update_col_index();

        let mut out: Vec<(Vec<KeyValue>, Row)> = Vec::new();
        for stored in &table.rows {
            let row: Row = projection
                .iter()
                .map(|&i| stored.get(i).cloned().flatten())
                .collect();
            let key = segment.row_key(&row)?;

            if let Some(min) = &segment.min_key {
                if &key[0] < min {
                    continue;
                }
            }
            if let Some(max) = &segment.max_key {
                if &key[0] >= max {
                    continue;
                }
            }

            // Canonical timestamps sort lexicographically, so the age filter
            // is a plain text comparison.
            if let Some(idx) = update_idx {
                let value = row.get(idx).and_then(|v| v.as_deref());
                if let Some(min) = &segment.min_update {
                    let min_text = min.format("%Y-%m-%d %H:%M:%S%.6f").to_string();
                    if value.map(|v| v < min_text.as_str()).unwrap_or(false) {
                        continue;
                    }
                }
                if let Some(max) = &segment.max_update {
                    let max_text = max.format("%Y-%m-%d %H:%M:%S%.6f").to_string();
                    if value.map(|v| v >= max_text.as_str()).unwrap_or(false) {
                        continue;
                    }
                }
            }

            out.push((key, row));
        }
        out.sort_by(|(a, _), (b, _)| a.cmp(b));
        Ok(out.into_iter().map(|(_, row)| row).collect())
    }

    /// Per-row hash matching the SQL shape: digest over the separator-joined
    /// canonical text, low 60 bits folded into the sum.
    fn row_hash(row: &Row) -> u128 {
        let joined = row
            .iter()
            .map(|v| v.as_deref().unwrap_or(NULL_SENTINEL))
            .collect::<Vec<_>>()
            .join(HASH_SEPARATOR);
        let digest = Sha256::digest(joined.as_bytes());
        let mut low: u128 = 0;
        for byte in &digest[digest.len() - 8..] {
            low = (low << 8) | *byte as u128;
        }
        low & ((1 << 60) - 1)
    }
}

#[async_trait]
impl DataSource for MemorySource {
    fn label(&self) -> &str {
        &self.label
    }

    async fn schema(&self, path: &TablePath, case_sensitive: bool) -> Result<Schema> {
        let table = self.table(path)?;
        Ok(Schema::new(table.columns.clone(), case_sensitive))
    }

    async fn count_and_checksum(&self, segment: &TableSegment) -> Result<ChecksumResult> {
        self.stats.lock().unwrap().checksum_queries += 1;
        let rows = self.segment_rows(segment)?;
        let count = rows.len() as u64;
        let checksum = if count == 0 {
            None
        } else {
            Some(Checksum(
                rows.iter().map(|r| Self::row_hash(r)).fold(0u128, |a, b| a.wrapping_add(b)),
            ))
        };
        Ok(ChecksumResult { count, checksum })
    }

    async fn fetch_rows(&self, segment: &TableSegment) -> Result<Vec<Row>> {
        self.stats.lock().unwrap().fetch_queries += 1;
        self.segment_rows(segment)
    }

    async fn key_range(
        &self,
        segment: &TableSegment,
    ) -> Result<(Option<KeyValue>, Option<KeyValue>)> {
        let rows = self.segment_rows(segment)?;
        let mut min = None;
        let mut max = None;
        for row in &rows {
            let key = segment.row_key(row)?.remove(0);
            if min.as_ref().map(|m| &key < m).unwrap_or(true) {
                min = Some(key.clone());
            }
            if max.as_ref().map(|m| &key > m).unwrap_or(true) {
                max = Some(key);
            }
        }
        Ok((min, max))
    }

    async fn choose_checkpoints(
        &self,
        segment: &TableSegment,
        children: usize,
        _approx_rows: u64,
    ) -> Result<Vec<KeyValue>> {
        let rows = self.segment_rows(segment)?;
        let mut keys: Vec<KeyValue> = rows
            .iter()
            .map(|r| segment.row_key(r).map(|mut k| k.remove(0)))
            .collect::<Result<_>>()?;
        keys.sort();
        keys.dedup();

        let mut checkpoints = Vec::new();
        for i in 1..children {
            let idx = i * keys.len() / children;
            if idx == 0 || idx >= keys.len() {
                continue;
            }
            checkpoints.push(keys[idx].clone());
        }
        checkpoints.dedup();
        Ok(checkpoints)
    }

    async fn filter_checkpoints(
        &self,
        segment: &TableSegment,
        candidates: &[KeyValue],
    ) -> Result<Vec<KeyValue>> {
        let rows = self.segment_rows(segment)?;
        let mut present: Vec<KeyValue> = Vec::new();
        for row in &rows {
            let key = segment.row_key(row)?.remove(0);
            if candidates.contains(&key) && !present.contains(&key) {
                present.push(key);
            }
        }
        present.sort();
        Ok(present)
    }

    async fn healthcheck(&self) -> Result<()> {
        Ok(())
    }

    async fn close(&self) {}
}
