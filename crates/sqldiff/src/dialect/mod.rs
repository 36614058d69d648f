//! SQL dialect strategies.
//!
//! A [`Dialect`] provides database-specific SQL syntax: identifier quoting,
//! canonical-text normalization fragments, the MD5/checksum-fold expressions,
//! and feature probes (FULL OUTER JOIN, NTILE). The core engine never emits
//! engine-specific SQL directly; it always goes through a dialect.
//!
//! Dialects are dispatched statically through the [`DialectImpl`] enum —
//! a match statement instead of vtable dispatch.

pub mod mysql;
pub mod normalize;
pub mod postgres;

pub use mysql::MysqlDialect;
pub use postgres::PostgresDialect;

use crate::error::{DiffError, Result};
use crate::schema::{ColumnType, RawColumn};

/// Hex digits of the MD5 digest folded into the segment checksum.
/// 15 hex digits = 60 bits; sums of 60-bit values stay comfortably inside
/// the arbitrary-precision SUM both engines return.
pub const CHECKSUM_HEXDIGITS: usize = 15;

/// 1-based start offset of the folded substring within the 32-digit MD5 hex.
pub const CHECKSUM_OFFSET: usize = 32 - CHECKSUM_HEXDIGITS + 1;

/// Separator placed between normalized column values before hashing.
pub const HASH_SEPARATOR: &str = "|";

/// Canonical text used for SQL NULL inside the hashed concatenation.
pub const NULL_SENTINEL: &str = "NULL";

/// SQL syntax strategy for one database engine.
pub trait Dialect: Send + Sync {
    /// Dialect identifier (e.g. "postgres", "mysql").
    fn name(&self) -> &str;

    /// Quote an identifier (table name, column name).
    fn quote_ident(&self, name: &str) -> String;

    /// Whether column-name resolution is case-sensitive by default.
    fn default_case_sensitive(&self) -> bool;

    /// Parse an introspected column into a type descriptor.
    fn parse_type(&self, raw: &RawColumn) -> ColumnType;

    /// Canonical-text SQL fragment for a compared column (§ Value Normalizer).
    ///
    /// The produced expression yields identical text on any dialect for
    /// logically equal values of the (already unified) type descriptor.
    fn normalize_expr(&self, column: &str, ty: &ColumnType) -> Result<String>;

    /// Expression usable in ORDER BY / key comparisons that yields a
    /// consistent (ordinal) total order across engines.
    fn key_order_expr(&self, column: &str, ty: &ColumnType) -> String;

    /// Cast any expression to the engine's text type.
    fn to_text(&self, expr: &str) -> String;

    /// MD5 hex digest expression over an already-concatenated text expression.
    fn md5_hex(&self, expr: &str) -> String;

    /// Aggregate fold of per-row hashes: the low [`CHECKSUM_HEXDIGITS`] hex
    /// digits of each row hash, summed as an arbitrary-precision integer.
    /// Must be associative so that a parent checksum equals the combination
    /// of its children.
    fn checksum_fold(&self, row_hash_expr: &str) -> String;

    /// Concatenate text expressions with [`HASH_SEPARATOR`] between them.
    fn concat_ws(&self, items: &[String]) -> String;

    /// NULL-safe inequality test.
    fn is_distinct_from(&self, a: &str, b: &str) -> String;

    /// Random-ordering expression, for exclusive-row sampling.
    fn random(&self) -> String;

    /// Wrap a query for plan inspection.
    fn explain(&self, sql: &str) -> String {
        format!("EXPLAIN {}", sql)
    }

    /// Whether the engine supports FULL OUTER JOIN (joindiff eligibility).
    fn supports_full_outer_join(&self) -> bool;

    /// Whether the engine supports NTILE for rank-based checkpoint selection.
    fn supports_ntile(&self) -> bool;

    /// Timestamp literal for update-column range predicates.
    fn timestamp_literal(&self, t: &chrono::DateTime<chrono::Utc>) -> String {
        format!("'{}'", t.format("%Y-%m-%d %H:%M:%S%.6f"))
    }
}

/// Enum-based static dispatch for dialects.
#[derive(Debug, Clone)]
pub enum DialectImpl {
    Postgres(PostgresDialect),
    Mysql(MysqlDialect),
}

impl DialectImpl {
    /// Create a dialect from a driver name.
    pub fn from_driver(driver: &str) -> Result<Self> {
        match driver.to_lowercase().as_str() {
            "postgres" | "postgresql" | "pg" | "redshift" => {
                Ok(DialectImpl::Postgres(PostgresDialect::new()))
            }
            "mysql" | "mariadb" => Ok(DialectImpl::Mysql(MysqlDialect::new())),
            other => Err(DiffError::Config(format!(
                "Unknown database driver: '{}'. Supported drivers: postgresql, mysql",
                other
            ))),
        }
    }

    fn inner(&self) -> &dyn Dialect {
        match self {
            DialectImpl::Postgres(d) => d,
            DialectImpl::Mysql(d) => d,
        }
    }
}

impl Dialect for DialectImpl {
    fn name(&self) -> &str {
        self.inner().name()
    }

    fn quote_ident(&self, name: &str) -> String {
        self.inner().quote_ident(name)
    }

    fn default_case_sensitive(&self) -> bool {
        self.inner().default_case_sensitive()
    }

    fn parse_type(&self, raw: &RawColumn) -> ColumnType {
        self.inner().parse_type(raw)
    }

    fn normalize_expr(&self, column: &str, ty: &ColumnType) -> Result<String> {
        self.inner().normalize_expr(column, ty)
    }

    fn key_order_expr(&self, column: &str, ty: &ColumnType) -> String {
        self.inner().key_order_expr(column, ty)
    }

    fn to_text(&self, expr: &str) -> String {
        self.inner().to_text(expr)
    }

    fn md5_hex(&self, expr: &str) -> String {
        self.inner().md5_hex(expr)
    }

    fn checksum_fold(&self, row_hash_expr: &str) -> String {
        self.inner().checksum_fold(row_hash_expr)
    }

    fn concat_ws(&self, items: &[String]) -> String {
        self.inner().concat_ws(items)
    }

    fn is_distinct_from(&self, a: &str, b: &str) -> String {
        self.inner().is_distinct_from(a, b)
    }

    fn random(&self) -> String {
        self.inner().random()
    }

    fn explain(&self, sql: &str) -> String {
        self.inner().explain(sql)
    }

    fn supports_full_outer_join(&self) -> bool {
        self.inner().supports_full_outer_join()
    }

    fn supports_ntile(&self) -> bool {
        self.inner().supports_ntile()
    }

    fn timestamp_literal(&self, t: &chrono::DateTime<chrono::Utc>) -> String {
        self.inner().timestamp_literal(t)
    }
}
