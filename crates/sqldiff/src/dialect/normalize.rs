//! Canonical-text normalization fragments, per engine.
//!
//! All cross-engine correctness rests on these expressions: two logically
//! equal values must render to byte-identical text on both sides. The rules:
//!
//! - NULLs become the sentinel string `NULL`
//! - Timestamps: `YYYY-MM-DD HH:MM:SS.ffffff`, rounded to the unified
//!   precision, padded to six fractional digits, UTC when zoned
//! - Dates: `YYYY-MM-DD`
//! - Decimals: fixed fractional digits = unified scale
//! - Booleans: `0` / `1`
//! - UUIDs: lowercase hex, trimmed

use crate::error::{DiffError, Result};
use crate::schema::ColumnType;

use super::NULL_SENTINEL;

fn unsupported(column: &str, ty: &ColumnType) -> DiffError {
    DiffError::UnsupportedType {
        column: column.to_string(),
        type_name: ty.to_string(),
    }
}

/// PostgreSQL rendering of a column as canonical text (without NULL handling).
pub fn postgres_canonical_expr(quoted: &str, _column: &str, ty: &ColumnType) -> Result<String> {
    let expr = match ty {
        ColumnType::Integer => format!("CAST({quoted} AS TEXT)"),
        ColumnType::Text => format!("CAST({quoted} AS TEXT)"),
        ColumnType::Uuid => format!("LOWER(TRIM(CAST({quoted} AS TEXT)))"),
        ColumnType::Timestamp {
            precision,
            with_timezone,
        } => {
            // Cast to the unified precision first (rounds), then render with
            // six fractional digits so the width is stable across engines.
            let utc = if *with_timezone {
                format!("({quoted} AT TIME ZONE 'UTC')")
            } else {
                quoted.to_string()
            };
            format!(
                "TO_CHAR(CAST({utc} AS TIMESTAMP({precision})), 'YYYY-MM-DD HH24:MI:SS.US')"
            )
        }
        ColumnType::Date => format!("TO_CHAR({quoted}, 'YYYY-MM-DD')"),
        ColumnType::Decimal { scale, .. } => {
            format!("CAST(CAST({quoted} AS NUMERIC(38, {scale})) AS TEXT)")
        }
        ColumnType::Float { precision } => {
            let scale = (*precision).min(15);
            format!("CAST(CAST({quoted} AS NUMERIC(38, {scale})) AS TEXT)")
        }
        ColumnType::Boolean => format!("CASE WHEN {quoted} THEN '1' ELSE '0' END"),
        // jsonb renders with a deterministic key order; json does not, so
        // everything is pushed through jsonb first
        ColumnType::Json => format!("CAST(CAST({quoted} AS JSONB) AS TEXT)"),
        ColumnType::Array { .. } => format!("CAST({quoted} AS TEXT)"),
        ColumnType::Struct { .. } => format!("CAST({quoted} AS TEXT)"),
        ColumnType::Unknown(_) => format!("CAST({quoted} AS TEXT)"),
    };
    Ok(expr)
}

/// MySQL rendering of a column as canonical text (without NULL handling).
pub fn mysql_canonical_expr(quoted: &str, column: &str, ty: &ColumnType) -> Result<String> {
    let expr = match ty {
        ColumnType::Integer => format!("CAST({quoted} AS CHAR)"),
        ColumnType::Text => format!("CAST({quoted} AS CHAR)"),
        ColumnType::Uuid => format!("LOWER(TRIM(CAST({quoted} AS CHAR)))"),
        ColumnType::Timestamp {
            precision,
            with_timezone,
        } => {
            // TIMESTAMP columns are session-zoned; shift to UTC before
            // rendering. %f always pads to six digits.
            let utc = if *with_timezone {
                format!("CONVERT_TZ({quoted}, @@session.time_zone, '+00:00')")
            } else {
                quoted.to_string()
            };
            format!(
                "DATE_FORMAT(CAST({utc} AS DATETIME({precision})), '%Y-%m-%d %H:%i:%s.%f')"
            )
        }
        ColumnType::Date => format!("DATE_FORMAT({quoted}, '%Y-%m-%d')"),
        ColumnType::Decimal { scale, .. } => {
            format!("CAST(CAST({quoted} AS DECIMAL(38, {scale})) AS CHAR)")
        }
        ColumnType::Float { precision } => {
            let scale = (*precision).min(15);
            format!("CAST(CAST({quoted} AS DECIMAL(38, {scale})) AS CHAR)")
        }
        ColumnType::Boolean => format!("CAST({quoted} AS CHAR)"),
        // MySQL normalizes JSON documents internally, so the text form is stable
        ColumnType::Json => format!("CAST({quoted} AS CHAR)"),
        ColumnType::Array { .. } | ColumnType::Struct { .. } => {
            return Err(unsupported(column, ty));
        }
        ColumnType::Unknown(_) => format!("CAST({quoted} AS CHAR)"),
    };
    Ok(expr)
}

/// Wrap a canonical expression so NULL renders as the sentinel.
pub fn null_safe(expr: &str) -> String {
    format!("COALESCE({}, '{}')", expr, NULL_SENTINEL)
}
