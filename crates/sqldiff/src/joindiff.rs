//! The same-database outer-join algorithm.
//!
//! Both sides must resolve to the same connection. A single FULL OUTER JOIN
//! on the canonical key text projects a per-column difference indicator plus
//! both sides' canonical rows; every surviving row classifies into `-`, `+`,
//! or a modification pair. Optional extras: key-uniqueness and NULL-key
//! preambles, exclusive-row sampling, and materialization of the diff
//! projection into a table.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::adapter::Adapter;
use crate::binder::bind_pair;
use crate::diff::{DiffEvent, DiffStream, DiffSummary, Emitter, RunStatus, Sign};
use crate::dialect::Dialect;
use crate::error::{DiffError, Result};
use crate::queries::{self, quote_path};
use crate::segment::{KeyValue, Row, TablePath, TableSegment};
use crate::source::DataSource;

pub const DEFAULT_TABLE_WRITE_LIMIT: u64 = 1000;

/// How many exclusive rows the sampler pulls.
const EXCLUSIVE_SAMPLE_SIZE: u64 = 10;

/// Configuration for the outer-join differ.
#[derive(Debug, Clone)]
pub struct JoinDiffer {
    /// Verify key uniqueness before joining (off with `--assume-unique-key`).
    pub validate_unique_key: bool,
    /// Sample rows existing on one side only instead of relying on the
    /// full event stream.
    pub sample_exclusive_rows: bool,
    /// Write the diff projection to this table.
    pub materialize_to_table: Option<TablePath>,
    /// Materialize every joined row, not only the differing ones.
    pub materialize_all_rows: bool,
    /// Cap on materialized rows.
    pub table_write_limit: u64,
    /// Collect per-column difference counts.
    pub collect_stats: bool,
    /// Stop cleanly after this many diff events.
    pub limit: Option<u64>,
}

impl Default for JoinDiffer {
    fn default() -> Self {
        Self {
            validate_unique_key: true,
            sample_exclusive_rows: false,
            materialize_to_table: None,
            materialize_all_rows: false,
            table_write_limit: DEFAULT_TABLE_WRITE_LIMIT,
            collect_stats: false,
            limit: None,
        }
    }
}

/// The join projection layout: flags first, then both sides' columns.
struct JoinQuery {
    sql: String,
    /// Compared (non-key) column count; the flag block is `2 + compared`.
    compared: usize,
    /// Total relevant column count per side.
    width: usize,
}

impl JoinDiffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limit(mut self, limit: Option<u64>) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_unique_key_validation(mut self, validate: bool) -> Self {
        self.validate_unique_key = validate;
        self
    }

    pub fn with_sampling(mut self, sample: bool) -> Self {
        self.sample_exclusive_rows = sample;
        self
    }

    pub fn with_materialization(
        mut self,
        table: Option<TablePath>,
        all_rows: bool,
        write_limit: u64,
    ) -> Self {
        self.materialize_to_table = table;
        self.materialize_all_rows = all_rows;
        self.table_write_limit = write_limit;
        self
    }

    pub fn with_stats(mut self, stats: bool) -> Self {
        self.collect_stats = stats;
        self
    }

    /// Diff two tables on the same connection, returning the event stream.
    pub async fn diff_tables(
        &self,
        source1: Arc<dyn DataSource>,
        table1: TableSegment,
        source2: Arc<dyn DataSource>,
        table2: TableSegment,
    ) -> Result<DiffStream> {
        let adapter = same_connection(source1.as_ref(), source2.as_ref())?;
        let (seg1, seg2) = bind_pair(source1.as_ref(), table1, source2.as_ref(), table2).await?;

        let cancel = CancellationToken::new();
        let (tx, rx) = mpsc::channel(1024);
        let emitter = Emitter::new(tx, cancel.clone(), self.limit);

        let options = self.clone();
        let task_cancel = cancel.clone();
        let handle = tokio::spawn(async move {
            run(options, adapter, seg1, seg2, emitter, task_cancel).await
        });
        Ok(DiffStream::new(rx, cancel, handle))
    }
}

/// Both sides must identify the same database connection and the engine must
/// support FULL OUTER JOIN.
fn same_connection(
    source1: &dyn DataSource,
    source2: &dyn DataSource,
) -> Result<Arc<dyn Adapter>> {
    let a = source1.join_adapter();
    let b = source2.join_adapter();
    match (a, b) {
        (Some(a), Some(b)) if a.fingerprint() == b.fingerprint() => {
            if !a.dialect().supports_full_outer_join() {
                return Err(DiffError::Config(format!(
                    "{} does not support FULL OUTER JOIN; use hashdiff",
                    a.dialect().name()
                )));
            }
            Ok(a)
        }
        _ => Err(DiffError::Config(
            "joindiff requires both tables on the same database connection".into(),
        )),
    }
}

async fn run(
    options: JoinDiffer,
    adapter: Arc<dyn Adapter>,
    seg1: TableSegment,
    seg2: TableSegment,
    emitter: Arc<Emitter>,
    cancel: CancellationToken,
) -> DiffSummary {
    let start = Instant::now();
    let result = run_inner(&options, &adapter, &seg1, &seg2, &emitter, &cancel).await;

    let error = match &result {
        Ok(()) => None,
        Err(DiffError::Cancelled) => None,
        Err(e) => Some(e.to_string()),
    };
    let (plus, minus) = emitter.counts();
    use std::sync::atomic::Ordering;
    DiffSummary {
        status: if error.is_some() {
            RunStatus::Incomplete
        } else {
            RunStatus::Complete
        },
        diff_count: plus + minus,
        plus_count: plus,
        minus_count: minus,
        rows_downloaded: emitter.rows_downloaded.load(Ordering::SeqCst),
        rows_compared: emitter.rows_compared.load(Ordering::SeqCst),
        bytes_downloaded: emitter.bytes_downloaded.load(Ordering::SeqCst),
        limit_reached: emitter.limit_reached(),
        duration_ms: start.elapsed().as_millis() as u64,
        error,
    }
}

async fn run_inner(
    options: &JoinDiffer,
    adapter: &Arc<dyn Adapter>,
    seg1: &TableSegment,
    seg2: &TableSegment,
    emitter: &Arc<Emitter>,
    cancel: &CancellationToken,
) -> Result<()> {
    let dialect = adapter.dialect().clone();

    if options.validate_unique_key {
        for seg in [seg1, seg2] {
            check_unique_key(adapter, &dialect, seg, emitter).await?;
            check_null_keys(adapter, &dialect, seg).await?;
        }
    }

    let join = outer_join_query(&dialect, seg1, seg2, false)?;

    if let Some(table) = &options.materialize_to_table {
        materialize(options, adapter, &dialect, seg1, seg2, table).await?;
    }

    if options.sample_exclusive_rows {
        sample_exclusive(adapter, &dialect, &join).await?;
    }

    if options.collect_stats {
        collect_column_stats(adapter, seg1, &join).await?;
    }

    debug!(sql = join.sql.as_str(), "outer join diff");
    let rows = adapter.query_rows(&join.sql).await?;

    for joined in rows {
        if cancel.is_cancelled() {
            return Ok(());
        }
        for event in classify_join_row(seg1, &join, &joined)? {
            match emitter.emit(event).await {
                Ok(()) => {}
                Err(DiffError::Cancelled) => return Ok(()),
                Err(e) => return Err(e),
            }
        }
    }

    info!("joindiff complete");
    Ok(())
}

/// Key-uniqueness preamble: `COUNT(*)` vs `COUNT(DISTINCT key)`.
async fn check_unique_key(
    adapter: &Arc<dyn Adapter>,
    dialect: &dyn Dialect,
    segment: &TableSegment,
    emitter: &Arc<Emitter>,
) -> Result<()> {
    let sql = queries::unique_key_query(dialect, segment);
    let rows = adapter.query_rows(&sql).await?;
    let row = rows
        .first()
        .ok_or_else(|| DiffError::backend("uniqueness check returned no rows"))?;
    let total = parse_count(row.first())?;
    let distinct = parse_count(row.get(1))?;
    if total != distinct {
        return Err(DiffError::DuplicateKey(segment.path.to_string()));
    }
    emitter
        .rows_compared
        .fetch_add(total, std::sync::atomic::Ordering::Relaxed);
    Ok(())
}

/// NULL-key preamble.
async fn check_null_keys(
    adapter: &Arc<dyn Adapter>,
    dialect: &dyn Dialect,
    segment: &TableSegment,
) -> Result<()> {
    let sql = queries::null_key_query(dialect, segment);
    let rows = adapter.query_rows(&sql).await?;
    let nulls = parse_count(rows.first().and_then(|r| r.first()))?;
    if nulls > 0 {
        return Err(DiffError::NullKey(segment.path.to_string()));
    }
    Ok(())
}

fn parse_count(value: Option<&Option<String>>) -> Result<u64> {
    value
        .and_then(|v| v.as_deref())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .ok_or_else(|| DiffError::backend("unparseable count"))
}

/// Build the FULL OUTER JOIN diff query.
///
/// Both sides are subqueries projecting canonical text under positional
/// aliases (`col_0`, `col_1`, …); the join runs on the canonical key text,
/// which the binder has already made comparable.
fn outer_join_query(
    dialect: &dyn Dialect,
    seg1: &TableSegment,
    seg2: &TableSegment,
    all_rows: bool,
) -> Result<JoinQuery> {
    let cols1 = seg1.relevant_columns();
    let cols2 = seg2.relevant_columns();
    let n_keys = seg1.bound().key_columns.len();
    let width = cols1.len();
    let compared = width - n_keys;

    let subquery = |segment: &TableSegment, cols: &[String]| -> Result<String> {
        let schema = segment.schema.as_ref().expect("bound segment");
        let mut projections = Vec::with_capacity(cols.len());
        for (i, c) in cols.iter().enumerate() {
            let ty = schema
                .column_type(c)
                .ok_or_else(|| DiffError::UnknownColumn {
                    table: segment.path.to_string(),
                    column: c.clone(),
                })?;
            projections.push(format!(
                "{} AS col_{}",
                dialect.normalize_expr(c, ty)?,
                i
            ));
        }
        let conds = queries::where_conditions(dialect, segment);
        let filter = if conds.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", conds.join(" AND "))
        };
        Ok(format!(
            "(SELECT {} FROM {}{})",
            projections.join(", "),
            quote_path(dialect, &segment.path),
            filter
        ))
    };

    let a = subquery(seg1, &cols1)?;
    let b = subquery(seg2, &cols2)?;

    let on = (0..n_keys)
        .map(|i| format!("a.col_{i} = b.col_{i}"))
        .collect::<Vec<_>>()
        .join(" AND ");

    let mut projection = vec![
        "CASE WHEN b.col_0 IS NULL THEN 1 ELSE 0 END AS is_exclusive_a".to_string(),
        "CASE WHEN a.col_0 IS NULL THEN 1 ELSE 0 END AS is_exclusive_b".to_string(),
    ];
    let mut diff_conds = Vec::with_capacity(compared);
    for i in n_keys..width {
        let flag = format!(
            "CASE WHEN {} THEN 1 ELSE 0 END",
            dialect.is_distinct_from(&format!("a.col_{i}"), &format!("b.col_{i}"))
        );
        projection.push(format!("{} AS is_diff_{}", flag, i));
        diff_conds.push(format!("{} = 1", flag));
    }
    for i in 0..width {
        projection.push(format!("a.col_{i} AS a_{i}"));
    }
    for i in 0..width {
        projection.push(format!("b.col_{i} AS b_{i}"));
    }

    let mut where_parts = vec![
        "a.col_0 IS NULL".to_string(),
        "b.col_0 IS NULL".to_string(),
    ];
    where_parts.extend(diff_conds);
    let filter = if all_rows {
        String::new()
    } else {
        format!("\nWHERE {}", where_parts.join(" OR "))
    };

    Ok(JoinQuery {
        sql: format!(
            "SELECT {projection}\nFROM {a} a\nFULL OUTER JOIN {b} b ON {on}{filter}",
            projection = projection.join(", "),
        ),
        compared,
        width,
    })
}

/// Turn one joined row into zero, one, or two diff events.
fn classify_join_row(
    seg1: &TableSegment,
    join: &JoinQuery,
    row: &Row,
) -> Result<Vec<DiffEvent>> {
    let flag = |idx: usize| -> bool {
        row.get(idx)
            .and_then(|v| v.as_deref())
            .map(|v| v.trim() == "1")
            .unwrap_or(false)
    };
    let is_exclusive_a = flag(0);
    let is_exclusive_b = flag(1);
    if is_exclusive_a && is_exclusive_b {
        // Both sides NULL-keyed: a NULL key slipped past the preamble
        return Err(DiffError::NullKey(seg1.path.to_string()));
    }

    let flags_end = 2 + join.compared;
    if row.len() < flags_end + 2 * join.width {
        return Err(DiffError::backend(format!(
            "join row has {} columns, expected {}",
            row.len(),
            flags_end + 2 * join.width
        )));
    }
    let a_row: Row = row[flags_end..flags_end + join.width].to_vec();
    let b_row: Row = row[flags_end + join.width..flags_end + 2 * join.width].to_vec();

    let n_keys = seg1.bound().key_columns.len();
    let key_types = seg1.key_types();
    let key_of = |side_row: &Row| -> Result<Vec<KeyValue>> {
        let mut key = Vec::with_capacity(n_keys);
        for (i, ty) in key_types.iter().enumerate().take(n_keys) {
            let text = side_row
                .get(i)
                .and_then(|v| v.as_deref())
                .ok_or_else(|| DiffError::NullKey(seg1.path.to_string()))?;
            key.push(KeyValue::from_canonical(text, ty)?);
        }
        Ok(key)
    };

    let mut events = Vec::with_capacity(2);
    if !is_exclusive_b {
        events.push(DiffEvent {
            sign: Sign::Minus,
            key: key_of(&a_row)?,
            row: a_row.clone(),
        });
    }
    if !is_exclusive_a {
        events.push(DiffEvent {
            sign: Sign::Plus,
            key: key_of(&b_row)?,
            row: b_row,
        });
    }
    Ok(events)
}

/// `CREATE TABLE … AS` over the diff projection, capped by the write limit.
async fn materialize(
    options: &JoinDiffer,
    adapter: &Arc<dyn Adapter>,
    dialect: &dyn Dialect,
    seg1: &TableSegment,
    seg2: &TableSegment,
    table: &TablePath,
) -> Result<()> {
    let join = outer_join_query(dialect, seg1, seg2, options.materialize_all_rows)?;
    let sql = format!(
        "CREATE TABLE {} AS\nSELECT * FROM (\n{}\n) diff_rows LIMIT {}",
        quote_path(dialect, table),
        join.sql,
        options.table_write_limit,
    );
    let written = adapter.execute(&sql).await?;
    info!(table = %table, written, "materialized diff rows");
    Ok(())
}

/// Count and sample the rows existing on one side only.
async fn sample_exclusive(
    adapter: &Arc<dyn Adapter>,
    dialect: &dyn Dialect,
    join: &JoinQuery,
) -> Result<()> {
    let exclusive = format!(
        "SELECT * FROM (\n{}\n) diff_rows WHERE is_exclusive_a = 1 OR is_exclusive_b = 1",
        join.sql
    );
    let count_sql = format!("SELECT COUNT(*) FROM (\n{}\n) exclusive_rows", exclusive);
    let count = parse_count(
        adapter
            .query_rows(&count_sql)
            .await?
            .first()
            .and_then(|r| r.first()),
    )?;

    let sample_sql = format!(
        "SELECT * FROM (\n{}\n) exclusive_rows ORDER BY {} LIMIT {}",
        exclusive,
        dialect.random(),
        EXCLUSIVE_SAMPLE_SIZE
    );
    let sample = adapter.query_rows(&sample_sql).await?;
    info!(
        exclusive_count = count,
        sampled = sample.len(),
        "exclusive row sample"
    );
    for row in &sample {
        debug!(?row, "exclusive row");
    }
    Ok(())
}

/// Per-column difference counts for the stats footer.
async fn collect_column_stats(
    adapter: &Arc<dyn Adapter>,
    seg1: &TableSegment,
    join: &JoinQuery,
) -> Result<()> {
    let cols = seg1.relevant_columns();
    let n_keys = seg1.bound().key_columns.len();
    let sums = (n_keys..cols.len())
        .map(|i| format!("SUM(is_diff_{i})"))
        .collect::<Vec<_>>()
        .join(", ");
    if sums.is_empty() {
        return Ok(());
    }
    let sql = format!("SELECT {} FROM (\n{}\n) diff_rows", sums, join.sql);
    if let Some(row) = adapter.query_rows(&sql).await?.first() {
        for (col, count) in cols[n_keys..].iter().zip(row.iter()) {
            info!(
                column = col.as_str(),
                differing = count.as_deref().unwrap_or("0"),
                "column diff count"
            );
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::{DialectImpl, PostgresDialect};
    use crate::schema::{bind_columns, ColumnType, Schema};

    fn bound_segment(path: &str) -> TableSegment {
        let schema = Schema::new(
            vec![
                ("id".into(), ColumnType::Integer),
                ("status".into(), ColumnType::Text),
            ],
            false,
        );
        let bound = bind_columns(path, &schema, &["id".into()], None, &["status".into()]).unwrap();
        let mut seg = TableSegment::new(TablePath::parse(path).unwrap(), vec!["id".into()]);
        seg.schema = Some(schema);
        seg.bound = Some(bound);
        seg
    }

    fn pg() -> DialectImpl {
        DialectImpl::Postgres(PostgresDialect::new())
    }

    #[test]
    fn test_outer_join_query_structure() {
        let seg1 = bound_segment("public.orders");
        let seg2 = bound_segment("public.orders_replica");
        let join = outer_join_query(&pg(), &seg1, &seg2, false).unwrap();

        assert!(join.sql.contains("FULL OUTER JOIN"));
        assert!(join.sql.contains("a.col_0 = b.col_0"));
        assert!(join.sql.contains("is_exclusive_a"));
        assert!(join.sql.contains("is_diff_1"));
        assert!(join.sql.contains("IS DISTINCT FROM"));
        // Non-matching or differing rows only
        assert!(join.sql.contains("WHERE a.col_0 IS NULL OR b.col_0 IS NULL"));
        assert_eq!(join.width, 2);
        assert_eq!(join.compared, 1);
    }

    #[test]
    fn test_outer_join_query_all_rows_drops_filter() {
        let seg1 = bound_segment("t1");
        let seg2 = bound_segment("t2");
        let join = outer_join_query(&pg(), &seg1, &seg2, true).unwrap();
        assert!(!join.sql.contains("\nWHERE"));
    }

    fn joined_row(values: &[&str]) -> Row {
        values
            .iter()
            .map(|v| {
                if *v == "@null" {
                    None
                } else {
                    Some(v.to_string())
                }
            })
            .collect()
    }

    #[test]
    fn test_classify_modified_row() {
        let seg = bound_segment("t");
        let join = JoinQuery {
            sql: String::new(),
            compared: 1,
            width: 2,
        };
        // flags: not exclusive either side, status differs
        let row = joined_row(&["0", "0", "1", "42", "completed", "42", "returned"]);
        let events = classify_join_row(&seg, &join, &row).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].sign, Sign::Minus);
        assert_eq!(events[0].row[1].as_deref(), Some("completed"));
        assert_eq!(events[1].sign, Sign::Plus);
        assert_eq!(events[1].row[1].as_deref(), Some("returned"));
        assert_eq!(events[0].key, events[1].key);
    }

    #[test]
    fn test_classify_exclusive_rows() {
        let seg = bound_segment("t");
        let join = JoinQuery {
            sql: String::new(),
            compared: 1,
            width: 2,
        };
        // Row only on the left: b side NULL
        let row = joined_row(&["1", "0", "1", "7", "x", "@null", "@null"]);
        let events = classify_join_row(&seg, &join, &row).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].sign, Sign::Minus);

        // Row only on the right: a side NULL
        let row = joined_row(&["0", "1", "1", "@null", "@null", "7", "x"]);
        let events = classify_join_row(&seg, &join, &row).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].sign, Sign::Plus);
    }

    #[test]
    fn test_classify_rejects_double_exclusive() {
        let seg = bound_segment("t");
        let join = JoinQuery {
            sql: String::new(),
            compared: 1,
            width: 2,
        };
        let row = joined_row(&["1", "1", "0", "@null", "@null", "@null", "@null"]);
        assert!(classify_join_row(&seg, &join, &row).is_err());
    }
}
