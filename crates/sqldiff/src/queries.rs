//! SQL text generation for the diffing engine.
//!
//! Builds the aggregate checksum query, the ordered row fetch, the key-range
//! probe, checkpoint selection/filtering, and the joindiff preamble checks.
//! Everything engine-specific goes through the [`Dialect`] trait, so the same
//! builders serve every supported engine.

use crate::dialect::Dialect;
use crate::error::{DiffError, Result};
use crate::segment::{KeyValue, TablePath, TableSegment};

/// Quote a qualified table path.
pub fn quote_path(dialect: &dyn Dialect, path: &TablePath) -> String {
    path.0
        .iter()
        .map(|part| dialect.quote_ident(part))
        .collect::<Vec<_>>()
        .join(".")
}

/// Canonical-text expression for one column of the segment.
fn normalized_column(dialect: &dyn Dialect, segment: &TableSegment, column: &str) -> Result<String> {
    let schema = segment
        .schema
        .as_ref()
        .ok_or_else(|| DiffError::backend("segment schema not bound"))?;
    let ty = schema.column_type(column).ok_or_else(|| DiffError::UnknownColumn {
        table: segment.path.to_string(),
        column: column.to_string(),
    })?;
    dialect.normalize_expr(column, ty)
}

/// WHERE conditions for a segment: key range (inclusive min, exclusive max),
/// update-column age bounds, and the caller's opaque predicate.
pub fn where_conditions(dialect: &dyn Dialect, segment: &TableSegment) -> Vec<String> {
    let mut conds = Vec::new();

    if !segment.key_columns.is_empty() {
        let key_col = &segment.bound().key_columns[0];
        let key_ty = &segment.key_types()[0];
        let order_expr = dialect.key_order_expr(key_col, key_ty);
        if let Some(min) = &segment.min_key {
            conds.push(format!("{} >= {}", order_expr, min.to_sql_literal()));
        }
        if let Some(max) = &segment.max_key {
            conds.push(format!("{} < {}", order_expr, max.to_sql_literal()));
        }
    }

    if let Some(update_col) = &segment.bound().update_column {
        let quoted = dialect.quote_ident(update_col);
        if let Some(min) = &segment.min_update {
            conds.push(format!("{} >= {}", quoted, dialect.timestamp_literal(min)));
        }
        if let Some(max) = &segment.max_update {
            conds.push(format!("{} < {}", quoted, dialect.timestamp_literal(max)));
        }
    }

    if let Some(pred) = &segment.where_clause {
        conds.push(format!("({})", pred));
    }

    conds
}

fn where_sql(dialect: &dyn Dialect, segment: &TableSegment) -> String {
    let conds = where_conditions(dialect, segment);
    if conds.is_empty() {
        String::new()
    } else {
        format!("\nWHERE {}", conds.join(" AND "))
    }
}

/// Per-row hash expression: MD5 over the separator-joined canonical text of
/// every compared column.
pub fn row_hash_expr(dialect: &dyn Dialect, segment: &TableSegment) -> Result<String> {
    let cols = segment.relevant_columns();
    let mut normalized = Vec::with_capacity(cols.len());
    for c in &cols {
        normalized.push(normalized_column(dialect, segment, c)?);
    }
    let concatenated = if normalized.len() == 1 {
        normalized.into_iter().next().unwrap()
    } else {
        dialect.concat_ws(&normalized)
    };
    Ok(dialect.md5_hex(&concatenated))
}

/// Aggregate query computing `(row_count, checksum)` over a segment in one pass.
pub fn count_and_checksum_query(dialect: &dyn Dialect, segment: &TableSegment) -> Result<String> {
    let fold = dialect.checksum_fold(&row_hash_expr(dialect, segment)?);
    Ok(format!(
        "SELECT COUNT(*) AS row_count, {fold} AS checksum\nFROM {table}{filter}",
        fold = dialect.to_text(&fold),
        table = quote_path(dialect, &segment.path),
        filter = where_sql(dialect, segment),
    ))
}

/// Ordered fetch of the segment's canonical-text rows.
pub fn rows_query(dialect: &dyn Dialect, segment: &TableSegment) -> Result<String> {
    let cols = segment.relevant_columns();
    let mut projections = Vec::with_capacity(cols.len());
    for c in &cols {
        projections.push(normalized_column(dialect, segment, c)?);
    }
    let key_types = segment.key_types();
    let order = segment
        .bound()
        .key_columns
        .iter()
        .zip(&key_types)
        .map(|(k, ty)| dialect.key_order_expr(k, ty))
        .collect::<Vec<_>>()
        .join(", ");
    Ok(format!(
        "SELECT {projection}\nFROM {table}{filter}\nORDER BY {order}",
        projection = projections.join(", "),
        table = quote_path(dialect, &segment.path),
        filter = where_sql(dialect, segment),
        order = order,
    ))
}

/// Canonical min/max of the leading key column, for initial bounds resolution.
///
/// The text cast is applied after the aggregate, so the MIN/MAX scan can
/// stay on the key index.
pub fn key_range_query(dialect: &dyn Dialect, segment: &TableSegment) -> Result<String> {
    let key_col = &segment.bound().key_columns[0];
    let quoted = dialect.quote_ident(key_col);
    Ok(format!(
        "SELECT {min_expr} AS min_key, {max_expr} AS max_key\nFROM {table}{filter}",
        min_expr = dialect.to_text(&format!("MIN({})", quoted)),
        max_expr = dialect.to_text(&format!("MAX({})", quoted)),
        table = quote_path(dialect, &segment.path),
        filter = where_sql(dialect, segment),
    ))
}

/// Rank-based checkpoint selection: the lower bound of each NTILE bucket
/// after the first. Returns `n - 1` interior checkpoints for `n` children.
/// Ties resolve to the smallest value in the bucket.
pub fn checkpoints_query(dialect: &dyn Dialect, segment: &TableSegment, children: usize) -> String {
    let key_col = &segment.bound().key_columns[0];
    let key_ty = &segment.key_types()[0];
    let order_expr = dialect.key_order_expr(key_col, key_ty);
    let quoted = dialect.quote_ident(key_col);
    format!(
        "SELECT {ckpt} AS checkpoint\nFROM (\n  SELECT {quoted} AS k, NTILE({children}) OVER (ORDER BY {order_expr}) AS bucket\n  FROM {table}{filter}\n) ranked\nWHERE bucket > 1\nGROUP BY bucket\nORDER BY 1",
        ckpt = dialect.to_text("MIN(k)"),
        quoted = quoted,
        children = children,
        order_expr = order_expr,
        table = quote_path(dialect, &segment.path),
        filter = where_sql(dialect, segment),
    )
}

/// Fallback checkpoint probe for engines without NTILE: the key at a given
/// rank offset within the segment.
pub fn checkpoint_at_offset_query(
    dialect: &dyn Dialect,
    segment: &TableSegment,
    offset: u64,
) -> String {
    let key_col = &segment.bound().key_columns[0];
    let key_ty = &segment.key_types()[0];
    let order_expr = dialect.key_order_expr(key_col, key_ty);
    let quoted = dialect.quote_ident(key_col);
    format!(
        "SELECT {ckpt} AS checkpoint\nFROM {table}{filter}\nORDER BY {order_expr}\nLIMIT 1 OFFSET {offset}",
        ckpt = dialect.to_text(&quoted),
        table = quote_path(dialect, &segment.path),
        filter = where_sql(dialect, segment),
        order_expr = order_expr,
        offset = offset,
    )
}

/// Which of the candidate checkpoints exist on this side (checkpoint filter).
pub fn checkpoint_filter_query(
    dialect: &dyn Dialect,
    segment: &TableSegment,
    candidates: &[KeyValue],
) -> String {
    let key_col = &segment.bound().key_columns[0];
    let quoted = dialect.quote_ident(key_col);
    let values = candidates
        .iter()
        .map(|c| c.to_sql_literal())
        .collect::<Vec<_>>()
        .join(", ");
    let mut conds = where_conditions(dialect, segment);
    conds.push(format!("{} IN ({})", quoted, values));
    format!(
        "SELECT DISTINCT {ckpt} AS checkpoint\nFROM {table}\nWHERE {conds}",
        ckpt = dialect.to_text(&quoted),
        table = quote_path(dialect, &segment.path),
        conds = conds.join(" AND "),
    )
}

/// Joindiff preamble: total vs. distinct key count; unequal means duplicates.
pub fn unique_key_query(dialect: &dyn Dialect, segment: &TableSegment) -> String {
    let keys = &segment.bound().key_columns;
    let key_expr = if keys.len() == 1 {
        dialect.quote_ident(&keys[0])
    } else {
        let quoted: Vec<String> = keys.iter().map(|k| dialect.quote_ident(k)).collect();
        dialect.concat_ws(&quoted)
    };
    format!(
        "SELECT COUNT(*) AS total, COUNT(DISTINCT {key_expr}) AS distinct_total\nFROM {table}{filter}",
        key_expr = key_expr,
        table = quote_path(dialect, &segment.path),
        filter = where_sql(dialect, segment),
    )
}

/// Joindiff preamble: any NULL in a key column.
pub fn null_key_query(dialect: &dyn Dialect, segment: &TableSegment) -> String {
    let null_conds = segment
        .bound()
        .key_columns
        .iter()
        .map(|k| format!("{} IS NULL", dialect.quote_ident(k)))
        .collect::<Vec<_>>()
        .join(" OR ");
    let mut conds = where_conditions(dialect, segment);
    conds.push(format!("({})", null_conds));
    format!(
        "SELECT COUNT(*) AS null_keys\nFROM {table}\nWHERE {conds}",
        table = quote_path(dialect, &segment.path),
        conds = conds.join(" AND "),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::{DialectImpl, PostgresDialect};
    use crate::schema::{bind_columns, ColumnType, Schema};
    use crate::segment::TablePath;

    fn bound_segment() -> TableSegment {
        let schema = Schema::new(
            vec![
                ("id".into(), ColumnType::Integer),
                ("updated_at".into(), ColumnType::Timestamp { precision: 3, with_timezone: false }),
                ("status".into(), ColumnType::Text),
            ],
            false,
        );
        let bound = bind_columns(
            "public.orders",
            &schema,
            &["id".into()],
            Some("updated_at"),
            &["status".into()],
        )
        .unwrap();
        let mut seg = TableSegment::new(
            TablePath::parse("public.orders").unwrap(),
            vec!["id".into()],
        )
        .with_update_column("updated_at")
        .with_key_bounds(Some(KeyValue::Int(100)), Some(KeyValue::Int(200)));
        seg.schema = Some(schema);
        seg.bound = Some(bound);
        seg
    }

    #[test]
    fn test_count_and_checksum_query_structure() {
        let d = DialectImpl::Postgres(PostgresDialect::new());
        let seg = bound_segment();
        let sql = count_and_checksum_query(&d, &seg).unwrap();

        assert!(sql.contains("COUNT(*)"));
        assert!(sql.contains("MD5"));
        assert!(sql.contains("SUM"));
        assert!(sql.contains("\"public\".\"orders\""));
        assert!(sql.contains("\"id\" >= 100"));
        assert!(sql.contains("\"id\" < 200"));
    }

    #[test]
    fn test_rows_query_orders_by_key() {
        let d = DialectImpl::Postgres(PostgresDialect::new());
        let seg = bound_segment();
        let sql = rows_query(&d, &seg).unwrap();
        assert!(sql.contains("ORDER BY \"id\""));
        // All three relevant columns projected
        assert_eq!(sql.matches("COALESCE").count(), 3);
    }

    #[test]
    fn test_checkpoints_query_uses_ntile() {
        let d = DialectImpl::Postgres(PostgresDialect::new());
        let seg = bound_segment();
        let sql = checkpoints_query(&d, &seg, 8);
        assert!(sql.contains("NTILE(8)"));
        assert!(sql.contains("bucket > 1"));
        assert!(sql.contains("MIN(k)"));
    }

    #[test]
    fn test_checkpoint_filter_query_includes_candidates() {
        let d = DialectImpl::Postgres(PostgresDialect::new());
        let seg = bound_segment();
        let sql =
            checkpoint_filter_query(&d, &seg, &[KeyValue::Int(120), KeyValue::Int(150)]);
        assert!(sql.contains("IN (120, 150)"));
        assert!(sql.contains("DISTINCT"));
    }

    #[test]
    fn test_unique_key_query_counts_distinct() {
        let d = DialectImpl::Postgres(PostgresDialect::new());
        let seg = bound_segment();
        let sql = unique_key_query(&d, &seg);
        assert!(sql.contains("COUNT(DISTINCT \"id\")"));
    }

    #[test]
    fn test_where_includes_age_filter() {
        let d = DialectImpl::Postgres(PostgresDialect::new());
        let mut seg = bound_segment();
        seg.min_update = Some(chrono::Utc::now());
        let conds = where_conditions(&d, &seg);
        assert!(conds.iter().any(|c| c.contains("\"updated_at\" >=")));
    }
}
