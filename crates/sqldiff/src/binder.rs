//! Schema binding for a segment pair.
//!
//! Resolves both sides' declared columns against their live schemas, checks
//! structural compatibility column-by-column, and rewrites each side's type
//! descriptors to the unified (widened) representation both normalizers must
//! render. Runs before any checksum is issued; every failure here surfaces
//! as a schema error with exit code 2.

use tracing::warn;

use crate::error::{DiffError, Result};
use crate::schema::{bind_columns, unify_types, ColumnType};
use crate::segment::TableSegment;
use crate::source::DataSource;

/// Bind and cross-validate a pair of segments. Returns sealed segments with
/// `schema` and `bound` populated.
pub async fn bind_pair(
    source1: &dyn DataSource,
    segment1: TableSegment,
    source2: &dyn DataSource,
    segment2: TableSegment,
) -> Result<(TableSegment, TableSegment)> {
    segment1.validate()?;
    segment2.validate()?;

    if segment1.key_columns.len() != segment2.key_columns.len() {
        return Err(DiffError::Config(format!(
            "The two sides declare a different number of key columns ({} vs {})",
            segment1.key_columns.len(),
            segment2.key_columns.len()
        )));
    }

    let mut seg1 = bind_side(source1, segment1).await?;
    let mut seg2 = bind_side(source2, segment2).await?;

    let cols1 = seg1.relevant_columns();
    let cols2 = seg2.relevant_columns();
    if cols1.len() != cols2.len() {
        return Err(DiffError::Config(format!(
            "The two sides compare a different number of columns ({} vs {})",
            cols1.len(),
            cols2.len()
        )));
    }

    // Unify each compared column pair and push the widened descriptor back
    // into both schemas, so both normalizers render the same canonical form.
    let schema1 = seg1.schema.as_mut().expect("bound above");
    let schema2 = seg2.schema.as_mut().expect("bound above");
    for (c1, c2) in cols1.iter().zip(&cols2) {
        let t1 = schema1
            .column_type(c1)
            .cloned()
            .expect("bound column in schema");
        let t2 = schema2
            .column_type(c2)
            .cloned()
            .expect("bound column in schema");

        let unified = unify_types(c1, &t1, &t2)?;
        if let ColumnType::Unknown(type_text) = &unified {
            warn!(
                column = c1.as_str(),
                type_text = type_text.as_str(),
                "column type has no compatibility handling; if encoding differs \
                 between databases it may produce false positives"
            );
        }
        if unified != t1 {
            schema1.override_type(c1, unified.clone());
        }
        if unified != t2 {
            schema2.override_type(c2, unified);
        }
    }

    Ok((seg1, seg2))
}

async fn bind_side(source: &dyn DataSource, mut segment: TableSegment) -> Result<TableSegment> {
    let schema = source
        .schema(&segment.path, segment.case_sensitive)
        .await?;
    let bound = bind_columns(
        &segment.path.to_string(),
        &schema,
        &segment.key_columns,
        segment.update_column.as_deref(),
        &segment.extra_columns,
    )?;
    segment.key_columns = bound.key_columns.clone();
    segment.update_column = bound.update_column.clone();
    segment.extra_columns = bound.extra_columns.clone();
    segment.schema = Some(schema);
    segment.bound = Some(bound);
    Ok(segment)
}
