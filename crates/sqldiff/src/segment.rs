//! Table references and key-range segments.
//!
//! A [`TableSegment`] identifies one side of a diff: a table path, the key /
//! update / extra columns, and optional key-range, age, and predicate
//! restrictions. Child segments produced during bisection are plain copies
//! with narrower key bounds; a sealed segment is never mutated.

use std::cmp::Ordering;
use std::fmt;

use chrono::{DateTime, Utc};

use crate::error::{DiffError, Result};
use crate::schema::{BoundColumns, ColumnType, Schema};

/// Qualified table path, e.g. `("public", "ratings")`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TablePath(pub Vec<String>);

impl TablePath {
    pub fn parse(text: &str) -> Result<Self> {
        let parts: Vec<String> = text.split('.').map(|s| s.trim().to_string()).collect();
        if parts.is_empty() || parts.iter().any(|p| p.is_empty()) {
            return Err(DiffError::Config(format!("Invalid table path: '{}'", text)));
        }
        Ok(TablePath(parts))
    }

    pub fn name(&self) -> &str {
        self.0.last().map(|s| s.as_str()).unwrap_or("")
    }
}

impl fmt::Display for TablePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.join("."))
    }
}

/// A single key value, in its comparable form.
///
/// Integral keys are held numerically so that segment ordering does not
/// depend on digit width; all other key kinds are held as canonical text,
/// whose rendering is chosen to sort ordinally (ISO timestamps,
/// lowercase-hex uuids).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum KeyValue {
    Int(i64),
    Text(String),
}

impl KeyValue {
    /// Parse a canonical-text key back into its comparable form.
    pub fn from_canonical(text: &str, ty: &ColumnType) -> Result<Self> {
        match ty {
            ColumnType::Integer => text
                .trim()
                .parse::<i64>()
                .map(KeyValue::Int)
                .map_err(|_| DiffError::backend(format!("Non-integral key value '{}'", text))),
            _ => Ok(KeyValue::Text(text.to_string())),
        }
    }

    /// SQL literal form, for key-range predicates.
    pub fn to_sql_literal(&self) -> String {
        match self {
            KeyValue::Int(v) => v.to_string(),
            KeyValue::Text(v) => format!("'{}'", v.replace('\'', "''")),
        }
    }
}

impl fmt::Display for KeyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyValue::Int(v) => write!(f, "{}", v),
            KeyValue::Text(v) => write!(f, "{}", v),
        }
    }
}

impl PartialOrd for KeyValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for KeyValue {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (KeyValue::Int(a), KeyValue::Int(b)) => a.cmp(b),
            (KeyValue::Text(a), KeyValue::Text(b)) => a.cmp(b),
            // Mixed kinds are rejected at type-check; ordinal text order as a fallback
            (a, b) => a.to_string().cmp(&b.to_string()),
        }
    }
}

/// A fetched row in canonical-text form, `None` meaning SQL NULL.
pub type Row = Vec<Option<String>>;

/// One side of a diff: a table reference restricted to a key range.
#[derive(Debug, Clone)]
pub struct TableSegment {
    pub path: TablePath,

    // Declared columns (canonicalized once the schema is bound)
    pub key_columns: Vec<String>,
    pub update_column: Option<String>,
    pub extra_columns: Vec<String>,

    // Range restrictions. Keys: inclusive min, exclusive max.
    pub min_key: Option<KeyValue>,
    pub max_key: Option<KeyValue>,
    pub min_update: Option<DateTime<Utc>>,
    pub max_update: Option<DateTime<Utc>>,

    /// Opaque extra predicate, applied to this side only.
    pub where_clause: Option<String>,

    pub case_sensitive: bool,

    /// Resolved schema and column lists; set by the schema binder.
    pub schema: Option<Schema>,
    pub bound: Option<BoundColumns>,
}

impl TableSegment {
    pub fn new(path: TablePath, key_columns: Vec<String>) -> Self {
        Self {
            path,
            key_columns,
            update_column: None,
            extra_columns: Vec::new(),
            min_key: None,
            max_key: None,
            min_update: None,
            max_update: None,
            where_clause: None,
            case_sensitive: false,
            schema: None,
            bound: None,
        }
    }

    pub fn with_update_column(mut self, column: impl Into<String>) -> Self {
        self.update_column = Some(column.into());
        self
    }

    pub fn with_extra_columns(mut self, columns: Vec<String>) -> Self {
        self.extra_columns = columns;
        self
    }

    pub fn with_key_bounds(mut self, min: Option<KeyValue>, max: Option<KeyValue>) -> Self {
        self.min_key = min;
        self.max_key = max;
        self
    }

    pub fn with_update_bounds(
        mut self,
        min: Option<DateTime<Utc>>,
        max: Option<DateTime<Utc>>,
    ) -> Self {
        self.min_update = min;
        self.max_update = max;
        self
    }

    pub fn with_where(mut self, predicate: impl Into<String>) -> Self {
        self.where_clause = Some(predicate.into());
        self
    }

    pub fn with_case_sensitive(mut self, case_sensitive: bool) -> Self {
        self.case_sensitive = case_sensitive;
        self
    }

    /// Validate the declared restrictions before any work is scheduled.
    pub fn validate(&self) -> Result<()> {
        if self.key_columns.is_empty() {
            return Err(DiffError::Config(format!(
                "Table {} has no key columns",
                self.path
            )));
        }
        if self.update_column.is_none() && (self.min_update.is_some() || self.max_update.is_some())
        {
            return Err(DiffError::Config(
                "min/max age restrictions require an update column (-t)".into(),
            ));
        }
        if let (Some(mn), Some(mx)) = (&self.min_key, &self.max_key) {
            if mn >= mx {
                return Err(DiffError::Config(format!(
                    "min_key must be smaller than max_key ({} >= {})",
                    mn, mx
                )));
            }
        }
        if let (Some(mn), Some(mx)) = (&self.min_update, &self.max_update) {
            if mn >= mx {
                return Err(DiffError::Config(format!(
                    "min_update must be smaller than max_update ({} >= {})",
                    mn, mx
                )));
            }
        }
        Ok(())
    }

    /// Resolved columns; panics if the schema binder has not run.
    pub fn bound(&self) -> &BoundColumns {
        self.bound
            .as_ref()
            .expect("schema binder must run before the segment is used")
    }

    /// The ordered column list fetched and hashed for this segment.
    pub fn relevant_columns(&self) -> Vec<String> {
        self.bound().relevant_columns()
    }

    /// Type descriptors of the key columns, in key order.
    pub fn key_types(&self) -> Vec<ColumnType> {
        let schema = self.schema.as_ref().expect("schema must be bound");
        self.bound()
            .key_columns
            .iter()
            .map(|k| schema.column_type(k).cloned().expect("bound key in schema"))
            .collect()
    }

    pub fn is_bounded(&self) -> bool {
        self.min_key.is_some() && self.max_key.is_some()
    }

    /// Upper bound on the number of distinct leading-key values in this
    /// segment. Only meaningful for integral keys; `None` otherwise.
    pub fn approximate_size(&self) -> Option<u64> {
        match (&self.min_key, &self.max_key) {
            (Some(KeyValue::Int(mn)), Some(KeyValue::Int(mx))) if mx > mn => {
                Some((mx - mn) as u64)
            }
            _ => None,
        }
    }

    /// True when the key range cannot hold more than one distinct value,
    /// and must therefore never be split further.
    pub fn is_atomic(&self) -> bool {
        match (&self.min_key, &self.max_key) {
            (Some(KeyValue::Int(mn)), Some(KeyValue::Int(mx))) => *mx - *mn <= 1,
            (Some(mn), Some(mx)) => mn == mx,
            _ => false,
        }
    }

    /// Child segment with narrower key bounds. Bounds must nest.
    pub fn new_key_bounds(&self, min: Option<KeyValue>, max: Option<KeyValue>) -> Self {
        if let (Some(outer), Some(inner)) = (&self.min_key, &min) {
            debug_assert!(outer <= inner, "child min below parent min");
        }
        if let (Some(outer), Some(inner)) = (&self.max_key, &max) {
            debug_assert!(inner <= outer, "child max above parent max");
        }
        let mut child = self.clone();
        child.min_key = min;
        child.max_key = max;
        child
    }

    /// Split this segment at the given interior checkpoints, producing
    /// children that tile the parent range: `[min, c1), [c1, c2), …, [cn, max)`.
    pub fn segment_by_checkpoints(&self, checkpoints: &[KeyValue]) -> Vec<TableSegment> {
        let mut bounds: Vec<Option<KeyValue>> = Vec::with_capacity(checkpoints.len() + 2);
        bounds.push(self.min_key.clone());
        bounds.extend(checkpoints.iter().cloned().map(Some));
        bounds.push(self.max_key.clone());

        bounds
            .windows(2)
            .map(|w| self.new_key_bounds(w[0].clone(), w[1].clone()))
            .collect()
    }

    /// Extract the comparable key tuple from a fetched row.
    pub fn row_key(&self, row: &Row) -> Result<Vec<KeyValue>> {
        let key_types = self.key_types();
        let mut key = Vec::with_capacity(key_types.len());
        for (i, ty) in key_types.iter().enumerate() {
            match row.get(i).and_then(|v| v.as_ref()) {
                Some(text) => key.push(KeyValue::from_canonical(text, ty)?),
                None => {
                    return Err(DiffError::NullKey(self.path.to_string()));
                }
            }
        }
        Ok(key)
    }
}

impl fmt::Display for TableSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}[{}..{}]",
            self.path,
            self.min_key
                .as_ref()
                .map(|k| k.to_string())
                .unwrap_or_else(|| "*".into()),
            self.max_key
                .as_ref()
                .map(|k| k.to_string())
                .unwrap_or_else(|| "*".into()),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seg(min: i64, max: i64) -> TableSegment {
        TableSegment::new(TablePath::parse("public.t").unwrap(), vec!["id".into()])
            .with_key_bounds(Some(KeyValue::Int(min)), Some(KeyValue::Int(max)))
    }

    #[test]
    fn test_path_parse() {
        let p = TablePath::parse("analytics.public.ratings").unwrap();
        assert_eq!(p.0.len(), 3);
        assert_eq!(p.name(), "ratings");
        assert!(TablePath::parse("a..b").is_err());
    }

    #[test]
    fn test_key_ordering_is_numeric_for_ints() {
        assert!(KeyValue::Int(9) < KeyValue::Int(10));
        assert!(KeyValue::Text("a".into()) < KeyValue::Text("b".into()));
    }

    #[test]
    fn test_segment_by_checkpoints_tiles_range() {
        let s = seg(0, 100);
        let children = s.segment_by_checkpoints(&[KeyValue::Int(25), KeyValue::Int(50)]);
        assert_eq!(children.len(), 3);
        assert_eq!(children[0].min_key, Some(KeyValue::Int(0)));
        assert_eq!(children[0].max_key, Some(KeyValue::Int(25)));
        assert_eq!(children[1].min_key, Some(KeyValue::Int(25)));
        assert_eq!(children[2].max_key, Some(KeyValue::Int(100)));
    }

    #[test]
    fn test_atomic_segments() {
        assert!(seg(5, 6).is_atomic());
        assert!(!seg(5, 7).is_atomic());
        let text_seg = TableSegment::new(TablePath::parse("t").unwrap(), vec!["id".into()])
            .with_key_bounds(
                Some(KeyValue::Text("abc".into())),
                Some(KeyValue::Text("abc".into())),
            );
        assert!(text_seg.is_atomic());
    }

    #[test]
    fn test_validate_rejects_inverted_bounds() {
        let s = seg(10, 5);
        assert!(s.validate().is_err());
    }

    #[test]
    fn test_validate_requires_update_column_for_age() {
        let s = TableSegment::new(TablePath::parse("t").unwrap(), vec!["id".into()])
            .with_update_bounds(Some(Utc::now()), None);
        assert!(s.validate().is_err());
    }

    #[test]
    fn test_approximate_size() {
        assert_eq!(seg(100, 1100).approximate_size(), Some(1000));
    }
}
