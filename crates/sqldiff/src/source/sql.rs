//! SQL-backed data source: query builders + dialect + adapter.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::adapter::Adapter;
use crate::context::RunContext;
use crate::dialect::{Dialect, DialectImpl};
use crate::error::{DiffError, Result};
use crate::queries;
use crate::schema::Schema;
use crate::segment::{KeyValue, Row, TablePath, TableSegment};

use super::{Checksum, ChecksumResult, DataSource};

/// A checksum slower than this logs a tuning hint.
const RECOMMENDED_CHECKSUM_SECS: u64 = 20;

pub struct SqlSource {
    adapter: Arc<dyn Adapter>,
    context: Arc<RunContext>,
    label: String,
}

impl SqlSource {
    pub fn new(adapter: Arc<dyn Adapter>, context: Arc<RunContext>) -> Self {
        let label = adapter.dialect().name().to_string();
        Self {
            adapter,
            context,
            label,
        }
    }

    fn dialect(&self) -> &DialectImpl {
        self.adapter.dialect()
    }

    /// In interactive mode, show the plan and require approval per query.
    async fn gate(&self, sql: &str) -> Result<()> {
        if let Some(gate) = &self.context.gate {
            let explain_sql = self.dialect().explain(sql);
            let plan_rows = self.adapter.query_rows(&explain_sql).await?;
            let plan = plan_rows
                .iter()
                .filter_map(|r| r.first().cloned().flatten())
                .collect::<Vec<_>>()
                .join("\n");
            if !gate.approve(sql, &plan).await? {
                return Err(DiffError::Cancelled);
            }
        }
        Ok(())
    }

    async fn query(&self, sql: &str) -> Result<Vec<Row>> {
        self.gate(sql).await?;
        self.adapter.query_rows(sql).await
    }

    /// First column of each result row, parsed as a key of the segment's type.
    async fn query_keys(&self, sql: &str, segment: &TableSegment) -> Result<Vec<KeyValue>> {
        let key_ty = &segment.key_types()[0];
        let rows = self.query(sql).await?;
        let mut keys = Vec::with_capacity(rows.len());
        for row in rows {
            if let Some(Some(text)) = row.into_iter().next() {
                keys.push(KeyValue::from_canonical(text.trim(), key_ty)?);
            }
        }
        Ok(keys)
    }
}

#[async_trait]
impl DataSource for SqlSource {
    fn label(&self) -> &str {
        &self.label
    }

    async fn schema(&self, path: &TablePath, case_sensitive: bool) -> Result<Schema> {
        let raw = self.adapter.list_columns(path).await?;
        let dialect = self.dialect();
        let columns = raw
            .iter()
            .map(|c| (c.name.clone(), dialect.parse_type(c)))
            .collect();
        Ok(Schema::new(columns, case_sensitive))
    }

    async fn count_and_checksum(&self, segment: &TableSegment) -> Result<ChecksumResult> {
        let sql = queries::count_and_checksum_query(self.dialect(), segment)?;
        let start = Instant::now();
        let rows = self.query(&sql).await?;
        let elapsed = start.elapsed();
        if elapsed.as_secs() > RECOMMENDED_CHECKSUM_SECS {
            warn!(
                segment = %segment,
                secs = elapsed.as_secs(),
                "checksum is taking longer than expected; consider increasing \
                 --bisection-factor or decreasing --threads"
            );
        }

        let row = rows
            .first()
            .ok_or_else(|| DiffError::backend("checksum query returned no rows"))?;
        let count: u64 = row
            .first()
            .cloned()
            .flatten()
            .ok_or_else(|| DiffError::backend("checksum query returned NULL count"))?
            .trim()
            .parse()
            .map_err(|_| DiffError::backend("unparseable row count"))?;
        let checksum = if count == 0 {
            None
        } else {
            let text = row
                .get(1)
                .cloned()
                .flatten()
                .ok_or_else(|| DiffError::backend("checksum query returned NULL checksum"))?;
            Some(Checksum::from_decimal(&text)?)
        };
        info!(segment = %segment, count, "count_and_checksum");
        Ok(ChecksumResult { count, checksum })
    }

    async fn fetch_rows(&self, segment: &TableSegment) -> Result<Vec<Row>> {
        let sql = queries::rows_query(self.dialect(), segment)?;
        self.query(&sql).await
    }

    async fn key_range(
        &self,
        segment: &TableSegment,
    ) -> Result<(Option<KeyValue>, Option<KeyValue>)> {
        let sql = queries::key_range_query(self.dialect(), segment)?;
        let rows = self.query(&sql).await?;
        let key_ty = &segment.key_types()[0];
        match rows.first() {
            Some(row) => {
                let parse = |v: Option<&Option<String>>| -> Result<Option<KeyValue>> {
                    v.and_then(|v| v.as_ref())
                        .map(|t| KeyValue::from_canonical(t.trim(), key_ty))
                        .transpose()
                };
                Ok((parse(row.first())?, parse(row.get(1))?))
            }
            None => Ok((None, None)),
        }
    }

    async fn choose_checkpoints(
        &self,
        segment: &TableSegment,
        children: usize,
        approx_rows: u64,
    ) -> Result<Vec<KeyValue>> {
        if self.dialect().supports_ntile() {
            let sql = queries::checkpoints_query(self.dialect(), segment, children);
            return self.query_keys(&sql, segment).await;
        }

        // Rank probes at i * rows / children for engines without NTILE.
        let mut checkpoints = Vec::with_capacity(children.saturating_sub(1));
        for i in 1..children {
            let offset = (i as u64).saturating_mul(approx_rows) / children as u64;
            if offset == 0 {
                continue;
            }
            let sql = queries::checkpoint_at_offset_query(self.dialect(), segment, offset);
            checkpoints.extend(self.query_keys(&sql, segment).await?);
        }
        checkpoints.sort();
        checkpoints.dedup();
        Ok(checkpoints)
    }

    async fn filter_checkpoints(
        &self,
        segment: &TableSegment,
        candidates: &[KeyValue],
    ) -> Result<Vec<KeyValue>> {
        if candidates.is_empty() {
            return Ok(Vec::new());
        }
        let sql = queries::checkpoint_filter_query(self.dialect(), segment, candidates);
        let mut present = self.query_keys(&sql, segment).await?;
        present.sort();
        present.dedup();
        Ok(present)
    }

    fn join_adapter(&self) -> Option<Arc<dyn Adapter>> {
        Some(Arc::clone(&self.adapter))
    }

    async fn healthcheck(&self) -> Result<()> {
        self.adapter.healthcheck().await
    }

    async fn close(&self) {
        self.adapter.close().await;
    }
}
