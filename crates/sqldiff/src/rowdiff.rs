//! Local row comparison: the ordered merge walk over two fetched rowsets.

use std::collections::HashSet;

use tracing::info;

use crate::diff::{DiffEvent, Sign};
use crate::error::Result;
use crate::segment::{KeyValue, Row, TableSegment};

/// Merge-walk two key-ordered rowsets, emitting events in key-ascending
/// order:
///
/// - `-` when a key exists on the left only
/// - `+` when a key exists on the right only
/// - `-` then `+` with the same key when any compared column differs
pub fn diff_rowsets(segment: &TableSegment, left: &[Row], right: &[Row]) -> Result<Vec<DiffEvent>> {
    let mut events = Vec::new();
    let mut i = 0;
    let mut j = 0;

    let key_of = |row: &Row| -> Result<Vec<KeyValue>> { segment.row_key(row) };

    while i < left.len() && j < right.len() {
        let lkey = key_of(&left[i])?;
        let rkey = key_of(&right[j])?;

        match lkey.cmp(&rkey) {
            std::cmp::Ordering::Less => {
                events.push(DiffEvent {
                    sign: Sign::Minus,
                    key: lkey,
                    row: left[i].clone(),
                });
                i += 1;
            }
            std::cmp::Ordering::Greater => {
                events.push(DiffEvent {
                    sign: Sign::Plus,
                    key: rkey,
                    row: right[j].clone(),
                });
                j += 1;
            }
            std::cmp::Ordering::Equal => {
                if left[i] != right[j] {
                    events.push(DiffEvent {
                        sign: Sign::Minus,
                        key: lkey.clone(),
                        row: left[i].clone(),
                    });
                    events.push(DiffEvent {
                        sign: Sign::Plus,
                        key: lkey,
                        row: right[j].clone(),
                    });
                }
                i += 1;
                j += 1;
            }
        }
    }

    while i < left.len() {
        events.push(DiffEvent {
            sign: Sign::Minus,
            key: key_of(&left[i])?,
            row: left[i].clone(),
        });
        i += 1;
    }
    while j < right.len() {
        events.push(DiffEvent {
            sign: Sign::Plus,
            key: key_of(&right[j])?,
            row: right[j].clone(),
        });
        j += 1;
    }

    Ok(events)
}

/// Drop diffs whose update-column value falls outside the shared update
/// range. Rows mutated after the watermark produce spurious diffs during a
/// long run; when both sides were restricted to the same range, those keys
/// are discarded wholesale.
pub fn filter_outside_update_range(
    events: Vec<DiffEvent>,
    segment1: &TableSegment,
    segment2: &TableSegment,
) -> Vec<DiffEvent> {
    let same_range = segment1.update_column.is_some()
        && segment2.update_column.is_some()
        && segment1.min_update == segment2.min_update
        && segment1.max_update == segment2.max_update
        && (segment1.min_update.is_some() || segment1.max_update.is_some());
    if !same_range {
        return events;
    }

    let update_idx = match segment1.bound().update_col_index() {
        Some(idx) => idx,
        None => return events,
    };
    let min_text = segment1
        .min_update
        .map(|t| t.format("%Y-%m-%d %H:%M:%S%.6f").to_string());
    let max_text = segment1
        .max_update
        .map(|t| t.format("%Y-%m-%d %H:%M:%S%.6f").to_string());

    let mut outside: HashSet<Vec<KeyValue>> = HashSet::new();
    for event in &events {
        let value = match event.row.get(update_idx).and_then(|v| v.as_deref()) {
            Some(v) => v,
            None => continue,
        };
        let below = min_text.as_deref().map(|m| value < m).unwrap_or(false);
        let above = max_text.as_deref().map(|m| value >= m).unwrap_or(false);
        if below || above {
            outside.insert(event.key.clone());
        }
    }
    if outside.is_empty() {
        return events;
    }

    let before = events.len();
    let kept: Vec<DiffEvent> = events
        .into_iter()
        .filter(|e| !outside.contains(&e.key))
        .collect();
    info!(
        discarded = before - kept.len(),
        "discarded diffs outside the shared update range"
    );
    kept
}
