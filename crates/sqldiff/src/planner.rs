//! Bisection planning: checkpoint selection and aligned child segments.

use tracing::debug;

use crate::error::Result;
use crate::segment::{KeyValue, TableSegment};
use crate::source::DataSource;

/// Plan the children of an unequal segment pair.
///
/// Candidate checkpoints are chosen at approximately equal rank on the left
/// side, then intersected with the keys present on the right (the checkpoint
/// filter). Checkpoints falling on a bound are discarded, which implicitly
/// merges adjacent ranges when few candidates survive.
///
/// Returns the aligned child pairs (at least two), or an empty vector when
/// no interior checkpoint survives and the pair cannot be split.
pub async fn plan_children(
    left_source: &dyn DataSource,
    left: &TableSegment,
    right_source: &dyn DataSource,
    right: &TableSegment,
    factor: usize,
    approx_rows: u64,
) -> Result<Vec<(TableSegment, TableSegment)>> {
    debug_assert!(factor >= 2);

    if left.is_atomic() || right.is_atomic() {
        return Ok(Vec::new());
    }

    let candidates = left_source
        .choose_checkpoints(left, factor, approx_rows)
        .await?;
    if candidates.is_empty() {
        return Ok(Vec::new());
    }

    let mut mutual = right_source.filter_checkpoints(right, &candidates).await?;
    mutual.sort();
    mutual.dedup();

    // Only strictly interior checkpoints produce non-empty children on both
    // extremes; the rest collapse into their neighbors.
    let interior: Vec<KeyValue> = mutual
        .into_iter()
        .filter(|c| {
            let above_min = left.min_key.as_ref().map(|m| c > m).unwrap_or(true);
            let below_max = left.max_key.as_ref().map(|m| c < m).unwrap_or(true);
            above_min && below_max
        })
        .collect();

    debug!(
        candidates = candidates.len(),
        interior = interior.len(),
        segment = %left,
        "checkpoint intersection"
    );

    if interior.is_empty() {
        return Ok(Vec::new());
    }

    let children_left = left.segment_by_checkpoints(&interior);
    let children_right = right.segment_by_checkpoints(&interior);
    Ok(children_left.into_iter().zip(children_right).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{bind_columns, ColumnType};
    use crate::segment::TablePath;
    use crate::source::{DataSource, MemorySource};

    async fn source_with_ids(ids: &[i64]) -> (MemorySource, TableSegment) {
        let mut src = MemorySource::new("memory");
        src.add_table(
            "t",
            vec![("id".into(), ColumnType::Integer)],
            ids.iter().map(|i| vec![Some(i.to_string())]).collect(),
        );
        let path = TablePath::parse("t").unwrap();
        let schema = src.schema(&path, false).await.unwrap();
        let bound = bind_columns("t", &schema, &["id".into()], None, &[]).unwrap();
        let mut seg = TableSegment::new(path, vec!["id".into()]);
        seg.schema = Some(schema);
        seg.bound = Some(bound);
        (src, seg)
    }

    #[tokio::test]
    async fn test_plan_produces_aligned_children() {
        let ids: Vec<i64> = (1..=100).collect();
        let (s1, seg1) = source_with_ids(&ids).await;
        let (s2, seg2) = source_with_ids(&ids).await;

        let pairs = plan_children(&s1, &seg1, &s2, &seg2, 4, 100).await.unwrap();
        assert!(pairs.len() >= 2);
        for (l, r) in &pairs {
            assert_eq!(l.min_key, r.min_key);
            assert_eq!(l.max_key, r.max_key);
        }
        // Children tile the parent: first child has parent's (unbounded) min
        assert_eq!(pairs[0].0.min_key, None);
        assert_eq!(pairs.last().unwrap().0.max_key, None);
    }

    #[tokio::test]
    async fn test_plan_filters_checkpoints_missing_on_right() {
        let (s1, seg1) = source_with_ids(&(1..=100).collect::<Vec<_>>()).await;
        // Right side only has keys 1..=2: almost no mutual checkpoints
        let (s2, seg2) = source_with_ids(&[1, 2]).await;

        let pairs = plan_children(&s1, &seg1, &s2, &seg2, 8, 100).await.unwrap();
        // Either unsplittable or split into few children; never misaligned
        for (l, r) in &pairs {
            assert_eq!(l.min_key, r.min_key);
        }
    }

    #[tokio::test]
    async fn test_plan_refuses_atomic_segment() {
        let (s1, mut seg1) = source_with_ids(&[5]).await;
        let (s2, mut seg2) = source_with_ids(&[5]).await;
        seg1.min_key = Some(KeyValue::Int(5));
        seg1.max_key = Some(KeyValue::Int(6));
        seg2.min_key = Some(KeyValue::Int(5));
        seg2.max_key = Some(KeyValue::Int(6));

        let pairs = plan_children(&s1, &seg1, &s2, &seg2, 4, 1).await.unwrap();
        assert!(pairs.is_empty());
    }
}
