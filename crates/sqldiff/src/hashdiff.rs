//! The recursive checksum-bisection algorithm.
//!
//! Per segment pair: checksum both sides in one aggregate query each. Equal
//! checksums end the subtree; an empty side short-circuits to a fetch-only
//! pass; a small unequal segment is fetched and merge-walked locally; any
//! other unequal segment is split at mutual checkpoints and recursed.

use std::sync::{Arc, Mutex};
use std::time::Instant;

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::binder::bind_pair;
use crate::diff::{DiffEvent, DiffStream, DiffSummary, Emitter, RunStatus, Sign};
use crate::error::{DiffError, Result};
use crate::planner::plan_children;
use crate::rowdiff::{diff_rowsets, filter_outside_update_range};
use crate::runtime::{with_retry, Side, SidePools};
use crate::segment::{KeyValue, Row, TableSegment};
use crate::source::{ChecksumResult, DataSource};

pub const DEFAULT_BISECTION_FACTOR: usize = 32;
pub const DEFAULT_BISECTION_THRESHOLD: u64 = 1024 * 16;

/// Recursion guard; hitting it indicates checkpoints that never converge.
const MAX_LEVELS: usize = 50;

/// Capacity of the diff event channel; a slow consumer backpressures workers.
const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Configuration for the checksum-bisection differ.
#[derive(Debug, Clone)]
pub struct HashDiffer {
    /// Children per split (`--bisection-factor`, at least 2).
    pub bisection_factor: usize,
    /// Row count below which a segment is fetched and compared locally.
    pub bisection_threshold: u64,
    /// Per-side query concurrency (`-j/--threads`).
    pub left_threads: usize,
    pub right_threads: usize,
    /// Stop cleanly after this many diff events.
    pub limit: Option<u64>,
    /// Fail the whole run on the first segment error instead of skipping
    /// the failing subtree.
    pub strict_errors: bool,
    /// Per-query timeout; a timed-out query counts as a retriable failure.
    pub query_timeout: Option<std::time::Duration>,
}

impl Default for HashDiffer {
    fn default() -> Self {
        Self {
            bisection_factor: DEFAULT_BISECTION_FACTOR,
            bisection_threshold: DEFAULT_BISECTION_THRESHOLD,
            left_threads: 1,
            right_threads: 1,
            limit: None,
            strict_errors: false,
            query_timeout: None,
        }
    }
}

impl HashDiffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_bisection(mut self, factor: usize, threshold: u64) -> Self {
        self.bisection_factor = factor;
        self.bisection_threshold = threshold;
        self
    }

    pub fn with_threads(mut self, threads: usize) -> Self {
        self.left_threads = threads;
        self.right_threads = threads;
        self
    }

    pub fn with_limit(mut self, limit: Option<u64>) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_strict_errors(mut self, strict: bool) -> Self {
        self.strict_errors = strict;
        self
    }

    fn validate(&self) -> Result<()> {
        if self.bisection_factor < 2 {
            return Err(DiffError::Config(
                "bisection factor must be at least 2".into(),
            ));
        }
        if self.bisection_factor as u64 >= self.bisection_threshold {
            return Err(DiffError::Config(
                "bisection factor must be lower than the bisection threshold".into(),
            ));
        }
        Ok(())
    }

    /// Diff two tables, returning the lazy event stream.
    pub async fn diff_tables(
        &self,
        source1: Arc<dyn DataSource>,
        table1: TableSegment,
        source2: Arc<dyn DataSource>,
        table2: TableSegment,
    ) -> Result<DiffStream> {
        self.validate()?;
        let (seg1, seg2) = bind_pair(source1.as_ref(), table1, source2.as_ref(), table2).await?;

        let cancel = CancellationToken::new();
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let emitter = Emitter::new(tx, cancel.clone(), self.limit);

        let state = Arc::new(RunState {
            source1,
            source2,
            emitter: Arc::clone(&emitter),
            pools: SidePools::new(self.left_threads, self.right_threads),
            options: self.clone(),
            cancel: cancel.clone(),
            error: Mutex::new(None),
        });

        let handle = tokio::spawn(run(state, seg1, seg2));
        Ok(DiffStream::new(rx, cancel, handle))
    }
}

struct RunState {
    source1: Arc<dyn DataSource>,
    source2: Arc<dyn DataSource>,
    emitter: Arc<Emitter>,
    pools: SidePools,
    options: HashDiffer,
    cancel: CancellationToken,
    /// First non-fatal segment error, surfaced in the summary.
    error: Mutex<Option<String>>,
}

impl RunState {
    fn source(&self, side: Side) -> &Arc<dyn DataSource> {
        match side {
            Side::Left => &self.source1,
            Side::Right => &self.source2,
        }
    }

    fn record_error(&self, e: &DiffError) {
        let mut slot = self.error.lock().unwrap();
        if slot.is_none() {
            *slot = Some(e.to_string());
        }
    }
}

async fn run(state: Arc<RunState>, seg1: TableSegment, seg2: TableSegment) -> DiffSummary {
    let start = Instant::now();
    let result = run_inner(Arc::clone(&state), seg1, seg2).await;

    let mut error = state.error.lock().unwrap().clone();
    if let Err(e) = &result {
        if !matches!(e, DiffError::Cancelled) {
            error = Some(e.to_string());
        }
    }

    let (plus, minus) = state.emitter.counts();
    DiffSummary {
        status: if error.is_some() {
            RunStatus::Incomplete
        } else {
            RunStatus::Complete
        },
        diff_count: plus + minus,
        plus_count: plus,
        minus_count: minus,
        rows_downloaded: state
            .emitter
            .rows_downloaded
            .load(std::sync::atomic::Ordering::SeqCst),
        rows_compared: state
            .emitter
            .rows_compared
            .load(std::sync::atomic::Ordering::SeqCst),
        bytes_downloaded: state
            .emitter
            .bytes_downloaded
            .load(std::sync::atomic::Ordering::SeqCst),
        limit_reached: state.emitter.limit_reached(),
        duration_ms: start.elapsed().as_millis() as u64,
        error,
    }
}

async fn run_inner(state: Arc<RunState>, seg1: TableSegment, seg2: TableSegment) -> Result<()> {
    let bounds = resolve_bounds(&state, seg1, seg2).await?;
    let (seg1, seg2) = match bounds {
        Some((a, b)) => (a, b),
        // Both sides empty under the given restrictions
        None => return Ok(()),
    };

    info!(
        left = %seg1,
        right = %seg2,
        factor = state.options.bisection_factor,
        threshold = state.options.bisection_threshold,
        "starting hashdiff"
    );

    diff_pair(state, seg1, seg2, 0).await
}

/// Resolve initial key bounds when the caller left either side open: query
/// min/max on both sides and take the wider union (inclusive min, exclusive
/// max for integral keys; text keys stay open above).
async fn resolve_bounds(
    state: &Arc<RunState>,
    seg1: TableSegment,
    seg2: TableSegment,
) -> Result<Option<(TableSegment, TableSegment)>> {
    if seg1.is_bounded() && seg2.is_bounded() {
        return Ok(Some((seg1, seg2)));
    }

    let (range1, range2) = tokio::try_join!(
        state.source1.key_range(&seg1),
        state.source2.key_range(&seg2)
    )?;

    let (min1, max1) = range1;
    let (min2, max2) = range2;
    if min1.is_none() && min2.is_none() {
        debug!("both sides are empty; nothing to compare");
        return Ok(None);
    }

    let min = [min1, min2].into_iter().flatten().min();
    let max = [max1, max2].into_iter().flatten().max();

    // The scanned maximum is inclusive; bounds are exclusive above.
    let max_exclusive = max.and_then(|m| match m {
        KeyValue::Int(v) => Some(KeyValue::Int(v.saturating_add(1))),
        KeyValue::Text(_) => None,
    });

    let min = seg1.min_key.clone().or(min);
    let max_exclusive = seg1.max_key.clone().or(max_exclusive);

    let new1 = seg1.with_key_bounds(min.clone(), max_exclusive.clone());
    let new2 = seg2.with_key_bounds(min, max_exclusive);
    Ok(Some((new1, new2)))
}

/// One aggregate checksum per side, scheduled on the side pools.
async fn checksum_pair(
    state: &Arc<RunState>,
    seg1: &TableSegment,
    seg2: &TableSegment,
) -> Result<(ChecksumResult, ChecksumResult)> {
    let left = async {
        let _permit = state.pools.acquire(Side::Left).await?;
        with_retry(&state.cancel, state.options.query_timeout, "left checksum", || {
            state.source1.count_and_checksum(seg1)
        })
        .await
    };
    let right = async {
        let _permit = state.pools.acquire(Side::Right).await?;
        with_retry(&state.cancel, state.options.query_timeout, "right checksum", || {
            state.source2.count_and_checksum(seg2)
        })
        .await
    };
    tokio::try_join!(left, right)
}

/// The per-pair state machine: checksum, then equal / fetch-only / local /
/// split.
fn diff_pair(
    state: Arc<RunState>,
    seg1: TableSegment,
    seg2: TableSegment,
    level: usize,
) -> BoxFuture<'static, Result<()>> {
    async move {
        if state.cancel.is_cancelled() {
            return Err(DiffError::Cancelled);
        }
        if level > MAX_LEVELS {
            return Err(DiffError::backend(
                "bisection recursing too deep; checkpoints are not converging",
            ));
        }

        let (r1, r2) = checksum_pair(&state, &seg1, &seg2).await?;

        if r1.count == 0 && r2.count == 0 {
            // Empty on both sides compares equal, even if the declared
            // bounds differ. Usually a gap in the key space.
            debug!(segment = %seg1, "empty segment on both sides (key gap)");
            return Ok(());
        }

        if r1.count == r2.count && r1.checksum == r2.checksum {
            state
                .emitter
                .rows_compared
                .fetch_add(r1.count, std::sync::atomic::Ordering::Relaxed);
            debug!(segment = %seg1, count = r1.count, "checksums match");
            return Ok(());
        }

        info!(
            segment = %seg1,
            level,
            left_count = r1.count,
            right_count = r2.count,
            "checksum mismatch"
        );

        if r1.count == 0 || r2.count == 0 {
            return fetch_only(&state, &seg1, &seg2, r1.count == 0).await;
        }

        let max_rows = r1.count.max(r2.count);
        if max_rows < state.options.bisection_threshold {
            return local_diff(&state, &seg1, &seg2, level).await;
        }

        // SPLIT: plan aligned children; when checkpoints refuse to split the
        // range, try once more with a doubled factor, then give up and
        // compare locally regardless of the threshold.
        let factor = state.options.bisection_factor;
        let mut children = plan_children(
            state.source1.as_ref(),
            &seg1,
            state.source2.as_ref(),
            &seg2,
            factor,
            max_rows,
        )
        .await?;
        if children.len() < 2 {
            children = plan_children(
                state.source1.as_ref(),
                &seg1,
                state.source2.as_ref(),
                &seg2,
                factor * 2,
                max_rows,
            )
            .await?;
        }
        if children.len() < 2 {
            return local_diff(&state, &seg1, &seg2, level).await;
        }

        let mut handles = Vec::with_capacity(children.len());
        for (child1, child2) in children {
            let st = Arc::clone(&state);
            handles.push(tokio::spawn(diff_pair(st, child1, child2, level + 1)));
        }

        let mut first_error: Option<DiffError> = None;
        for handle in handles {
            let outcome = handle
                .await
                .map_err(|e| DiffError::backend(format!("worker panicked: {}", e)))
                .and_then(|r| r);
            if let Err(e) = outcome {
                if matches!(e, DiffError::Cancelled) {
                    continue;
                }
                if state.options.strict_errors {
                    state.cancel.cancel();
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                } else {
                    // The failing subtree is already torn down; record and
                    // let the siblings finish.
                    state.record_error(&e);
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
    .boxed()
}

/// Fast path when one side is empty: everything on the other side is an
/// addition or deletion; no further checksums needed.
async fn fetch_only(
    state: &Arc<RunState>,
    seg1: &TableSegment,
    seg2: &TableSegment,
    left_empty: bool,
) -> Result<()> {
    let (side, segment, sign) = if left_empty {
        (Side::Right, seg2, Sign::Plus)
    } else {
        (Side::Left, seg1, Sign::Minus)
    };

    let rows = {
        let _permit = state.pools.acquire(side).await?;
        with_retry(&state.cancel, state.options.query_timeout, "fetch", || {
            state.source(side).fetch_rows(segment)
        })
        .await?
    };

    record_download(state, &rows, &[]);
    for row in rows {
        let key = segment.row_key(&row)?;
        match state.emitter.emit(DiffEvent { sign, key, row }).await {
            Ok(()) => {}
            Err(DiffError::Cancelled) => return Ok(()),
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

/// Below-threshold terminal: fetch both sides (one slot on each pool, taken
/// in side order) and merge-walk locally.
async fn local_diff(
    state: &Arc<RunState>,
    seg1: &TableSegment,
    seg2: &TableSegment,
    level: usize,
) -> Result<()> {
    debug!(segment = %seg1, level, "downloading rows for local comparison");

    let (_p1, _p2) = state.pools.acquire_both().await?;
    let (rows1, rows2) = tokio::try_join!(
        with_retry(&state.cancel, state.options.query_timeout, "left fetch", || state
            .source1
            .fetch_rows(seg1)),
        with_retry(&state.cancel, state.options.query_timeout, "right fetch", || state
            .source2
            .fetch_rows(seg2)),
    )?;
    drop((_p1, _p2));

    record_download(state, &rows1, &rows2);

    let events = diff_rowsets(seg1, &rows1, &rows2)?;
    let events = filter_outside_update_range(events, seg1, seg2);
    info!(
        segment = %seg1,
        level,
        diffs = events.len(),
        "local diff complete"
    );

    for event in events {
        match state.emitter.emit(event).await {
            Ok(()) => {}
            Err(DiffError::Cancelled) => return Ok(()),
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

fn record_download(state: &Arc<RunState>, rows1: &[Row], rows2: &[Row]) {
    use std::sync::atomic::Ordering;
    let downloaded = rows1.len().max(rows2.len()) as u64;
    state
        .emitter
        .rows_downloaded
        .fetch_add(downloaded, Ordering::Relaxed);
    state
        .emitter
        .rows_compared
        .fetch_add(downloaded, Ordering::Relaxed);

    let bytes: usize = rows1
        .iter()
        .chain(rows2.iter())
        .flat_map(|r| r.iter())
        .map(|v| v.as_deref().map(str::len).unwrap_or(4))
        .sum();
    state
        .emitter
        .bytes_downloaded
        .fetch_add(bytes as u64, Ordering::Relaxed);
}
