//! PostgreSQL dialect.

use crate::error::Result;
use crate::schema::{ColumnType, RawColumn, DEFAULT_FLOAT_PRECISION, DEFAULT_TIMESTAMP_PRECISION};

use super::normalize::{null_safe, postgres_canonical_expr};
use super::{Dialect, CHECKSUM_HEXDIGITS, CHECKSUM_OFFSET, HASH_SEPARATOR};

#[derive(Debug, Clone, Default)]
pub struct PostgresDialect;

impl PostgresDialect {
    pub fn new() -> Self {
        Self
    }
}

impl Dialect for PostgresDialect {
    fn name(&self) -> &str {
        "postgres"
    }

    fn quote_ident(&self, name: &str) -> String {
        format!("\"{}\"", name.replace('"', "\"\""))
    }

    fn default_case_sensitive(&self) -> bool {
        // Unquoted identifiers fold to lowercase; name matching is relaxed.
        false
    }

    fn parse_type(&self, raw: &RawColumn) -> ColumnType {
        let dt_precision = raw.datetime_precision.unwrap_or(DEFAULT_TIMESTAMP_PRECISION);
        match raw.type_text.to_lowercase().as_str() {
            "smallint" | "integer" | "bigint" | "int2" | "int4" | "int8" | "smallserial"
            | "serial" | "bigserial" | "oid" => ColumnType::Integer,
            "character varying" | "varchar" | "character" | "char" | "text" | "name"
            | "citext" => ColumnType::Text,
            "uuid" => ColumnType::Uuid,
            "timestamp" | "timestamp without time zone" => ColumnType::Timestamp {
                precision: dt_precision,
                with_timezone: false,
            },
            "timestamptz" | "timestamp with time zone" => ColumnType::Timestamp {
                precision: dt_precision,
                with_timezone: true,
            },
            "date" => ColumnType::Date,
            "numeric" | "decimal" | "money" => ColumnType::Decimal {
                precision: raw.numeric_precision.unwrap_or(38),
                scale: raw.numeric_scale.unwrap_or(0),
            },
            "real" | "float4" => ColumnType::Float { precision: 6 },
            "double precision" | "float8" => ColumnType::Float {
                precision: DEFAULT_FLOAT_PRECISION,
            },
            "boolean" | "bool" => ColumnType::Boolean,
            "json" | "jsonb" => ColumnType::Json,
            t if t.ends_with("[]") || t.starts_with('_') => ColumnType::Array {
                element: Box::new(ColumnType::Unknown(
                    t.trim_end_matches("[]").trim_start_matches('_').to_string(),
                )),
            },
            other => ColumnType::Unknown(other.to_string()),
        }
    }

    fn normalize_expr(&self, column: &str, ty: &ColumnType) -> Result<String> {
        let quoted = self.quote_ident(column);
        Ok(null_safe(&postgres_canonical_expr(&quoted, column, ty)?))
    }

    fn key_order_expr(&self, column: &str, ty: &ColumnType) -> String {
        let quoted = self.quote_ident(column);
        match ty {
            // Ordinal byte order, independent of the server locale
            ColumnType::Text => format!("({} COLLATE \"C\")", quoted),
            ColumnType::Uuid => format!("LOWER(CAST({} AS TEXT))", quoted),
            _ => quoted,
        }
    }

    fn to_text(&self, expr: &str) -> String {
        format!("CAST({} AS TEXT)", expr)
    }

    fn md5_hex(&self, expr: &str) -> String {
        format!("MD5({})", expr)
    }

    fn checksum_fold(&self, row_hash_expr: &str) -> String {
        // SUM(bigint) yields NUMERIC, so the fold cannot overflow.
        format!(
            "COALESCE(SUM(CAST(CAST('x' || SUBSTRING({expr}, {offset}, {digits}) AS BIT({bits})) AS BIGINT)), 0)",
            expr = row_hash_expr,
            offset = CHECKSUM_OFFSET,
            digits = CHECKSUM_HEXDIGITS,
            bits = CHECKSUM_HEXDIGITS * 4,
        )
    }

    fn concat_ws(&self, items: &[String]) -> String {
        items.join(&format!(" || '{}' || ", HASH_SEPARATOR))
    }

    fn is_distinct_from(&self, a: &str, b: &str) -> String {
        format!("{} IS DISTINCT FROM {}", a, b)
    }

    fn random(&self) -> String {
        "RANDOM()".to_string()
    }

    fn supports_full_outer_join(&self) -> bool {
        true
    }

    fn supports_ntile(&self) -> bool {
        true
    }
}
