//! MySQL / MariaDB dialect.

use crate::error::Result;
use crate::schema::{ColumnType, RawColumn, DEFAULT_FLOAT_PRECISION, DEFAULT_TIMESTAMP_PRECISION};

use super::normalize::{mysql_canonical_expr, null_safe};
use super::{Dialect, CHECKSUM_HEXDIGITS, CHECKSUM_OFFSET, HASH_SEPARATOR};

#[derive(Debug, Clone, Default)]
pub struct MysqlDialect;

impl MysqlDialect {
    pub fn new() -> Self {
        Self
    }
}

impl Dialect for MysqlDialect {
    fn name(&self) -> &str {
        "mysql"
    }

    fn quote_ident(&self, name: &str) -> String {
        format!("`{}`", name.replace('`', "``"))
    }

    fn default_case_sensitive(&self) -> bool {
        false
    }

    fn parse_type(&self, raw: &RawColumn) -> ColumnType {
        let dt_precision = raw.datetime_precision.unwrap_or(DEFAULT_TIMESTAMP_PRECISION);
        let lowered = raw.type_text.to_lowercase();
        // Strip display widths: int(11), tinyint(1), decimal(10,2)
        let base = lowered.split('(').next().unwrap_or(&lowered).trim();
        match base {
            "tinyint" if lowered.starts_with("tinyint(1)") => ColumnType::Boolean,
            "tinyint" | "smallint" | "mediumint" | "int" | "integer" | "bigint" | "year" => {
                ColumnType::Integer
            }
            "varchar" | "char" | "text" | "tinytext" | "mediumtext" | "longtext" | "enum"
            | "set" => ColumnType::Text,
            "datetime" => ColumnType::Timestamp {
                precision: dt_precision,
                with_timezone: false,
            },
            // TIMESTAMP values are stored UTC and rendered in the session zone
            "timestamp" => ColumnType::Timestamp {
                precision: dt_precision,
                with_timezone: true,
            },
            "date" => ColumnType::Date,
            "decimal" | "numeric" => ColumnType::Decimal {
                precision: raw.numeric_precision.unwrap_or(38),
                scale: raw.numeric_scale.unwrap_or(0),
            },
            "float" => ColumnType::Float { precision: 6 },
            "double" => ColumnType::Float {
                precision: DEFAULT_FLOAT_PRECISION,
            },
            "boolean" | "bool" | "bit" => ColumnType::Boolean,
            "json" => ColumnType::Json,
            other => ColumnType::Unknown(other.to_string()),
        }
    }

    fn normalize_expr(&self, column: &str, ty: &ColumnType) -> Result<String> {
        let quoted = self.quote_ident(column);
        Ok(null_safe(&mysql_canonical_expr(&quoted, column, ty)?))
    }

    fn key_order_expr(&self, column: &str, ty: &ColumnType) -> String {
        let quoted = self.quote_ident(column);
        match ty {
            // BINARY forces ordinal byte comparison regardless of collation
            ColumnType::Text => format!("BINARY {}", quoted),
            ColumnType::Uuid => format!("LOWER(CAST({} AS CHAR))", quoted),
            _ => quoted,
        }
    }

    fn to_text(&self, expr: &str) -> String {
        format!("CAST({} AS CHAR)", expr)
    }

    fn md5_hex(&self, expr: &str) -> String {
        format!("MD5({})", expr)
    }

    fn checksum_fold(&self, row_hash_expr: &str) -> String {
        // SUM over DECIMAL keeps arbitrary precision; CONV parses the hex tail.
        format!(
            "COALESCE(SUM(CAST(CONV(SUBSTRING({expr}, {offset}, {digits}), 16, 10) AS DECIMAL(38, 0))), 0)",
            expr = row_hash_expr,
            offset = CHECKSUM_OFFSET,
            digits = CHECKSUM_HEXDIGITS,
        )
    }

    fn concat_ws(&self, items: &[String]) -> String {
        format!("CONCAT_WS('{}', {})", HASH_SEPARATOR, items.join(", "))
    }

    fn is_distinct_from(&self, a: &str, b: &str) -> String {
        format!("NOT ({} <=> {})", a, b)
    }

    fn random(&self) -> String {
        "RAND()".to_string()
    }

    fn supports_full_outer_join(&self) -> bool {
        false
    }

    fn supports_ntile(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(type_text: &str) -> RawColumn {
        RawColumn {
            name: "c".into(),
            type_text: type_text.into(),
            datetime_precision: None,
            numeric_precision: None,
            numeric_scale: None,
            nullable: true,
        }
    }

    #[test]
    fn test_parse_common_types() {
        let d = MysqlDialect::new();
        assert_eq!(d.parse_type(&raw("int(11)")), ColumnType::Integer);
        assert_eq!(d.parse_type(&raw("tinyint(1)")), ColumnType::Boolean);
        assert_eq!(d.parse_type(&raw("tinyint(4)")), ColumnType::Integer);
        assert_eq!(
            d.parse_type(&raw("timestamp")),
            ColumnType::Timestamp {
                precision: 6,
                with_timezone: true
            }
        );
        assert_eq!(d.parse_type(&raw("longtext")), ColumnType::Text);
    }

    #[test]
    fn test_checksum_fold_shape() {
        let d = MysqlDialect::new();
        let fold = d.checksum_fold("MD5(x)");
        assert!(fold.contains("CONV(SUBSTRING(MD5(x), 18, 15), 16, 10)"));
        assert!(fold.contains("SUM"));
    }

    #[test]
    fn test_no_full_outer_join() {
        assert!(!MysqlDialect::new().supports_full_outer_join());
    }

    #[test]
    fn test_concat_ws() {
        let d = MysqlDialect::new();
        assert_eq!(
            d.concat_ws(&["a".into(), "b".into()]),
            "CONCAT_WS('|', a, b)"
        );
    }
}
