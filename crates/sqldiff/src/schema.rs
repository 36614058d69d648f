//! Column type descriptors and schema resolution.
//!
//! Before any row work starts, the declared key/update/extra columns are
//! resolved against the live table schema: wildcard patterns are expanded,
//! names are case-normalized per dialect, and the per-column type descriptors
//! of the two sides are unified to a common renderable precision.

use std::fmt;

use crate::error::{DiffError, Result};

/// Default fractional-second digits assumed when the engine does not report one.
pub const DEFAULT_TIMESTAMP_PRECISION: u8 = 6;

/// Default significant digits assumed for floats without a declared precision.
pub const DEFAULT_FLOAT_PRECISION: u8 = 15;

/// A column as reported by schema introspection, before type resolution.
#[derive(Debug, Clone)]
pub struct RawColumn {
    pub name: String,
    pub type_text: String,
    /// Fractional-second digits for temporal types.
    pub datetime_precision: Option<u8>,
    /// Total digits for numeric types.
    pub numeric_precision: Option<u8>,
    /// Fractional digits for numeric types.
    pub numeric_scale: Option<u8>,
    pub nullable: bool,
}

/// Resolved type descriptor for a compared column.
///
/// Carries exactly the information the normalizer needs to emit a
/// canonical-text SQL fragment for the column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnType {
    /// Whole-number key or value (any width)
    Integer,
    /// Character data; keys of this kind order by ordinal collation
    Text,
    /// UUID, rendered lowercase-hex
    Uuid,
    Timestamp {
        precision: u8,
        with_timezone: bool,
    },
    Date,
    Decimal {
        precision: u8,
        scale: u8,
    },
    Float {
        precision: u8,
    },
    Boolean,
    Json,
    Array {
        element: Box<ColumnType>,
    },
    Struct {
        fields: Vec<(String, ColumnType)>,
    },
    /// Type text the dialect did not recognize. Compared as raw text, with a warning.
    Unknown(String),
}

impl ColumnType {
    /// Whether this type can serve as a segmentation key.
    pub fn is_key_type(&self) -> bool {
        matches!(
            self,
            ColumnType::Integer
                | ColumnType::Text
                | ColumnType::Uuid
                | ColumnType::Timestamp { .. }
                | ColumnType::Date
        )
    }

    /// Structural kind used for cross-side compatibility checks.
    pub fn kind(&self) -> &'static str {
        match self {
            ColumnType::Integer => "integer",
            ColumnType::Text => "text",
            ColumnType::Uuid => "uuid",
            ColumnType::Timestamp { .. } => "timestamp",
            ColumnType::Date => "date",
            ColumnType::Decimal { .. } => "decimal",
            ColumnType::Float { .. } => "float",
            ColumnType::Boolean => "boolean",
            ColumnType::Json => "json",
            ColumnType::Array { .. } => "array",
            ColumnType::Struct { .. } => "struct",
            ColumnType::Unknown(_) => "unknown",
        }
    }

    /// Numeric kinds unify with each other (decimal(10,2) vs float, etc.).
    fn is_numeric(&self) -> bool {
        matches!(
            self,
            ColumnType::Integer | ColumnType::Decimal { .. } | ColumnType::Float { .. }
        )
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColumnType::Timestamp {
                precision,
                with_timezone,
            } => {
                if *with_timezone {
                    write!(f, "timestamptz({})", precision)
                } else {
                    write!(f, "timestamp({})", precision)
                }
            }
            ColumnType::Decimal { precision, scale } => write!(f, "decimal({},{})", precision, scale),
            ColumnType::Float { precision } => write!(f, "float({})", precision),
            ColumnType::Array { element } => write!(f, "array<{}>", element),
            ColumnType::Struct { .. } => write!(f, "struct"),
            ColumnType::Unknown(t) => write!(f, "unknown({})", t),
            other => write!(f, "{}", other.kind()),
        }
    }
}

/// Unify the two sides' declared types for one compared column.
///
/// Returns the common descriptor both normalizers must render, or a
/// `TypeMismatch` error when the kinds are structurally incompatible.
///
/// Widening rules: timestamps render at the coarser declared precision;
/// decimals render with fractional digits = max of the two scales; floats
/// render at the lower significant-digit count.
pub fn unify_types(column: &str, left: &ColumnType, right: &ColumnType) -> Result<ColumnType> {
    use ColumnType::*;

    let mismatch = || DiffError::TypeMismatch {
        column: column.to_string(),
        left: left.to_string(),
        right: right.to_string(),
    };

    let unified = match (left, right) {
        (
            Timestamp {
                precision: p1,
                with_timezone: tz1,
            },
            Timestamp {
                precision: p2,
                with_timezone: tz2,
            },
        ) => Timestamp {
            precision: (*p1).min(*p2),
            with_timezone: *tz1 || *tz2,
        },
        (Date, Date) => Date,
        (Integer, Integer) => Integer,
        (a, b) if a.is_numeric() && b.is_numeric() => {
            let scale = |t: &ColumnType| match t {
                Decimal { scale, .. } => *scale,
                _ => 0,
            };
            let digits = |t: &ColumnType| match t {
                Decimal { precision, .. } => *precision,
                Float { precision } => *precision,
                _ => 0,
            };
            let s = scale(a).max(scale(b));
            match (a, b) {
                (Float { precision: p1 }, Float { precision: p2 }) => Float {
                    precision: (*p1).min(*p2),
                },
                _ => Decimal {
                    precision: digits(a).max(digits(b)).max(s),
                    scale: s,
                },
            }
        }
        (Boolean, Boolean) => Boolean,
        // One side may store the uuid as text; both render lowercase-hex
        (Uuid, Uuid) | (Uuid, Text) | (Text, Uuid) => Uuid,
        (Text, Text) => Text,
        (Json, Json) => Json,
        (Array { element: e1 }, Array { element: e2 }) => Array {
            element: Box::new(unify_types(column, e1, e2)?),
        },
        (Struct { fields: f1 }, Struct { fields: f2 }) => {
            if f1.len() != f2.len() {
                return Err(mismatch());
            }
            let mut fields = Vec::with_capacity(f1.len());
            for ((n1, t1), (_n2, t2)) in f1.iter().zip(f2) {
                fields.push((n1.clone(), unify_types(column, t1, t2)?));
            }
            Struct { fields }
        }
        (Unknown(t), Unknown(_)) => Unknown(t.clone()),
        _ => return Err(mismatch()),
    };
    Ok(unified)
}

/// A resolved table schema: column names with type descriptors, in table order.
#[derive(Debug, Clone)]
pub struct Schema {
    columns: Vec<(String, ColumnType)>,
    case_sensitive: bool,
}

impl Schema {
    pub fn new(columns: Vec<(String, ColumnType)>, case_sensitive: bool) -> Self {
        Self {
            columns,
            case_sensitive,
        }
    }

    /// Resolve a declared name to the schema's canonical spelling and type.
    pub fn resolve(&self, name: &str) -> Option<(&str, &ColumnType)> {
        if self.case_sensitive {
            self.columns
                .iter()
                .find(|(n, _)| n == name)
                .map(|(n, t)| (n.as_str(), t))
        } else {
            self.columns
                .iter()
                .find(|(n, _)| n.eq_ignore_ascii_case(name))
                .map(|(n, t)| (n.as_str(), t))
        }
    }

    pub fn column_type(&self, name: &str) -> Option<&ColumnType> {
        self.resolve(name).map(|(_, t)| t)
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|(n, _)| n.as_str())
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Replace the descriptor of an already-resolved column.
    pub fn override_type(&mut self, name: &str, ty: ColumnType) {
        let case_sensitive = self.case_sensitive;
        if let Some(entry) = self.columns.iter_mut().find(|(n, _)| {
            if case_sensitive {
                n == name
            } else {
                n.eq_ignore_ascii_case(name)
            }
        }) {
            entry.1 = ty;
        }
    }
}

/// SQL `LIKE`-style pattern match (`%` matches any run of characters).
pub fn match_like(pattern: &str, name: &str) -> bool {
    fn inner(p: &[u8], n: &[u8]) -> bool {
        match p.split_first() {
            None => n.is_empty(),
            Some((b'%', rest)) => {
                (0..=n.len()).any(|i| inner(rest, &n[i..]))
            }
            Some((c, rest)) => match n.split_first() {
                Some((nc, nrest)) => c.eq_ignore_ascii_case(nc) && inner(rest, nrest),
                None => false,
            },
        }
    }
    inner(pattern.as_bytes(), name.as_bytes())
}

/// The column lists a diff run operates on, resolved against one side's schema.
#[derive(Debug, Clone)]
pub struct BoundColumns {
    /// Canonical key column names, in declared order.
    pub key_columns: Vec<String>,
    /// Canonical update column name, if declared.
    pub update_column: Option<String>,
    /// Canonical extra compared columns, wildcard-expanded, deduplicated.
    pub extra_columns: Vec<String>,
}

impl BoundColumns {
    /// The full ordered list the engine fetches and hashes:
    /// keys first, then the update column, then extras.
    ///
    /// The update column appears exactly once even if also listed in extras,
    /// and wildcard expansion never re-adds a key or the update column.
    pub fn relevant_columns(&self) -> Vec<String> {
        let mut cols = self.key_columns.clone();
        if let Some(u) = &self.update_column {
            if !cols.contains(u) {
                cols.push(u.clone());
            }
        }
        for c in &self.extra_columns {
            if !cols.contains(c) {
                cols.push(c.clone());
            }
        }
        cols
    }

    /// Index of the update column within `relevant_columns()`.
    pub fn update_col_index(&self) -> Option<usize> {
        let u = self.update_column.as_ref()?;
        self.relevant_columns().iter().position(|c| c == u)
    }
}

/// Resolve declared column selections against a live schema.
///
/// Fails with `UnknownColumn` before any row work when a plain (non-pattern)
/// name has no match.
pub fn bind_columns(
    table: &str,
    schema: &Schema,
    key_columns: &[String],
    update_column: Option<&str>,
    extra_patterns: &[String],
) -> Result<BoundColumns> {
    let unknown = |column: &str| DiffError::UnknownColumn {
        table: table.to_string(),
        column: column.to_string(),
    };

    let mut keys = Vec::with_capacity(key_columns.len());
    for k in key_columns {
        let (name, ty) = schema.resolve(k).ok_or_else(|| unknown(k))?;
        if !ty.is_key_type() {
            return Err(DiffError::UnsupportedType {
                column: name.to_string(),
                type_name: format!("{} (not usable as a key)", ty),
            });
        }
        keys.push(name.to_string());
    }

    let update = match update_column {
        Some(u) => {
            let (name, _) = schema.resolve(u).ok_or_else(|| unknown(u))?;
            Some(name.to_string())
        }
        None => None,
    };

    let mut extras: Vec<String> = Vec::new();
    for pattern in extra_patterns {
        if pattern.contains('%') {
            let mut matched = false;
            for name in schema.column_names() {
                if !match_like(pattern, name) {
                    continue;
                }
                matched = true;
                // Keys and the update column are already compared; patterns never re-add them.
                if keys.iter().any(|k| k == name) || update.as_deref() == Some(name) {
                    continue;
                }
                if !extras.iter().any(|e| e == name) {
                    extras.push(name.to_string());
                }
            }
            if !matched {
                return Err(unknown(pattern));
            }
        } else {
            let (name, _) = schema.resolve(pattern).ok_or_else(|| unknown(pattern))?;
            if keys.iter().any(|k| k == name) {
                continue;
            }
            if !extras.iter().any(|e| e == name) {
                extras.push(name.to_string());
            }
        }
    }

    Ok(BoundColumns {
        key_columns: keys,
        update_column: update,
        extra_columns: extras,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_schema() -> Schema {
        Schema::new(
            vec![
                ("id".into(), ColumnType::Integer),
                ("updated_at".into(), ColumnType::Timestamp { precision: 6, with_timezone: false }),
                ("status".into(), ColumnType::Text),
                ("status_note".into(), ColumnType::Text),
                ("amount".into(), ColumnType::Decimal { precision: 10, scale: 2 }),
            ],
            false,
        )
    }

    #[test]
    fn test_resolve_case_insensitive() {
        let schema = sample_schema();
        let (name, _) = schema.resolve("ID").unwrap();
        assert_eq!(name, "id");
        assert!(schema.resolve("missing").is_none());
    }

    #[test]
    fn test_match_like() {
        assert!(match_like("status%", "status_note"));
        assert!(match_like("status%", "status"));
        assert!(match_like("%note", "status_note"));
        assert!(!match_like("status_", "status"));
        assert!(match_like("%", "anything"));
    }

    #[test]
    fn test_bind_expands_wildcards_excluding_keys() {
        let schema = sample_schema();
        let bound = bind_columns(
            "public.orders",
            &schema,
            &["id".into()],
            Some("updated_at"),
            &["%".into()],
        )
        .unwrap();

        // The wildcard matched everything, but keys and update column are not re-added
        assert_eq!(bound.key_columns, vec!["id"]);
        assert_eq!(bound.update_column.as_deref(), Some("updated_at"));
        assert_eq!(bound.extra_columns, vec!["status", "status_note", "amount"]);
    }

    #[test]
    fn test_relevant_columns_dedups_update_column() {
        // extra_columns listing the update column must not double-count it
        let bound = BoundColumns {
            key_columns: vec!["id".into()],
            update_column: Some("updated_at".into()),
            extra_columns: vec!["updated_at".into(), "status".into()],
        };
        assert_eq!(bound.relevant_columns(), vec!["id", "updated_at", "status"]);
        assert_eq!(bound.update_col_index(), Some(1));
    }

    #[test]
    fn test_bind_unknown_column() {
        let schema = sample_schema();
        let err = bind_columns("t", &schema, &["nope".into()], None, &[]).unwrap_err();
        assert!(matches!(err, DiffError::UnknownColumn { .. }));
    }

    #[test]
    fn test_unify_timestamps_to_coarser_precision() {
        let left = ColumnType::Timestamp { precision: 6, with_timezone: false };
        let right = ColumnType::Timestamp { precision: 0, with_timezone: true };
        let unified = unify_types("created_at", &left, &right).unwrap();
        assert_eq!(unified, ColumnType::Timestamp { precision: 0, with_timezone: true });
    }

    #[test]
    fn test_unify_decimals_to_max_scale() {
        let left = ColumnType::Decimal { precision: 10, scale: 2 };
        let right = ColumnType::Decimal { precision: 10, scale: 4 };
        let unified = unify_types("amount", &left, &right).unwrap();
        assert_eq!(unified, ColumnType::Decimal { precision: 10, scale: 4 });
    }

    #[test]
    fn test_unify_incompatible_kinds() {
        let err = unify_types("c", &ColumnType::Integer, &ColumnType::Text).unwrap_err();
        assert!(matches!(err, DiffError::TypeMismatch { .. }));
    }
}
