//! Diff events, the result stream, and the algorithm selector.

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::dialect::Dialect;
use crate::error::{DiffError, Result};
use crate::segment::{KeyValue, Row};
use crate::source::DataSource;

/// Which side a row is exclusive to: `-` left only, `+` right only.
/// A modified row surfaces as `-` then `+` with the same key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Sign {
    Plus,
    Minus,
}

impl fmt::Display for Sign {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Sign::Plus => write!(f, "+"),
            Sign::Minus => write!(f, "-"),
        }
    }
}

/// One row-level difference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffEvent {
    pub sign: Sign,
    pub key: Vec<KeyValue>,
    pub row: Row,
}

impl DiffEvent {
    /// JSONL record: `{"sign": "+", "key": [...], "row": [...]}`.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "sign": self.sign.to_string(),
            "key": self.key.iter().map(|k| k.to_string()).collect::<Vec<_>>(),
            "row": self.row,
        })
    }

    /// Human line: `+ (v1, v2, …)`.
    pub fn to_human(&self) -> String {
        let values = self
            .row
            .iter()
            .map(|v| v.as_deref().unwrap_or("NULL").to_string())
            .collect::<Vec<_>>()
            .join(", ");
        format!("{} ({})", self.sign, values)
    }
}

/// Comparison algorithm selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Algorithm {
    Auto,
    HashDiff,
    JoinDiff,
}

impl FromStr for Algorithm {
    type Err = DiffError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "auto" => Ok(Algorithm::Auto),
            "hashdiff" => Ok(Algorithm::HashDiff),
            "joindiff" => Ok(Algorithm::JoinDiff),
            other => Err(DiffError::Config(format!(
                "Unknown algorithm '{}'. Expected auto, hashdiff, or joindiff",
                other
            ))),
        }
    }
}

/// Resolve `auto`, and validate an explicit `joindiff` choice.
///
/// Joindiff applies only when both sides are the same connection and the
/// engine can emit a FULL OUTER JOIN.
pub fn select_algorithm(
    requested: Algorithm,
    source1: &dyn DataSource,
    source2: &dyn DataSource,
) -> Result<Algorithm> {
    let joinable = match (source1.join_adapter(), source2.join_adapter()) {
        (Some(a), Some(b)) => {
            a.fingerprint() == b.fingerprint() && a.dialect().supports_full_outer_join()
        }
        _ => false,
    };

    match requested {
        Algorithm::Auto => Ok(if joinable {
            Algorithm::JoinDiff
        } else {
            Algorithm::HashDiff
        }),
        Algorithm::JoinDiff if !joinable => Err(DiffError::Config(
            "joindiff requires both tables on the same database connection, \
             with FULL OUTER JOIN support"
                .into(),
        )),
        explicit => Ok(explicit),
    }
}

/// Completion state reported in the summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Complete,
    /// An error cancelled part of the run; emitted diffs remain valid.
    Incomplete,
}

/// Terminal statistics of a diff run.
#[derive(Debug, Clone, Serialize)]
pub struct DiffSummary {
    pub status: RunStatus,
    /// Total diff events emitted.
    pub diff_count: u64,
    pub plus_count: u64,
    pub minus_count: u64,
    /// Rows fetched for local comparison across all segments.
    pub rows_downloaded: u64,
    /// Rows covered by checksum queries (both sides).
    pub rows_compared: u64,
    /// Approximate bytes pulled over the wire for local comparisons.
    pub bytes_downloaded: u64,
    pub limit_reached: bool,
    pub duration_ms: u64,
    /// Error text when `status` is incomplete.
    pub error: Option<String>,
}

impl DiffSummary {
    /// Percentage of compared rows that differ, for the stats footer.
    pub fn percent_different(&self) -> f64 {
        if self.rows_compared == 0 {
            0.0
        } else {
            self.diff_count as f64 * 100.0 / self.rows_compared as f64
        }
    }
}

/// Shared emission state: the bounded event channel (backpressure), the diff
/// limit, and the counters that feed the summary.
pub(crate) struct Emitter {
    tx: mpsc::Sender<DiffEvent>,
    cancel: CancellationToken,
    limit: Option<u64>,
    emitted: AtomicU64,
    plus: AtomicU64,
    minus: AtomicU64,
    pub(crate) rows_downloaded: AtomicU64,
    pub(crate) rows_compared: AtomicU64,
    pub(crate) bytes_downloaded: AtomicU64,
    limit_reached: AtomicBool,
}

impl Emitter {
    pub(crate) fn new(
        tx: mpsc::Sender<DiffEvent>,
        cancel: CancellationToken,
        limit: Option<u64>,
    ) -> Arc<Self> {
        Arc::new(Self {
            tx,
            cancel,
            limit,
            emitted: AtomicU64::new(0),
            plus: AtomicU64::new(0),
            minus: AtomicU64::new(0),
            rows_downloaded: AtomicU64::new(0),
            rows_compared: AtomicU64::new(0),
            bytes_downloaded: AtomicU64::new(0),
            limit_reached: AtomicBool::new(false),
        })
    }

    /// Send one event downstream. Applies the limit, flips the cancellation
    /// token when it is reached, and treats a dropped receiver as
    /// cancellation from the consumer.
    pub(crate) async fn emit(&self, event: DiffEvent) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(DiffError::Cancelled);
        }

        let n = self.emitted.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(limit) = self.limit {
            if n > limit {
                self.limit_reached.store(true, Ordering::SeqCst);
                self.cancel.cancel();
                return Err(DiffError::Cancelled);
            }
        }

        match event.sign {
            Sign::Plus => self.plus.fetch_add(1, Ordering::Relaxed),
            Sign::Minus => self.minus.fetch_add(1, Ordering::Relaxed),
        };

        if self.tx.send(event).await.is_err() {
            // Consumer hung up: treat as upstream cancellation
            self.cancel.cancel();
            return Err(DiffError::Cancelled);
        }

        if let Some(limit) = self.limit {
            if n == limit {
                self.limit_reached.store(true, Ordering::SeqCst);
                self.cancel.cancel();
            }
        }
        Ok(())
    }

    pub(crate) fn counts(&self) -> (u64, u64) {
        (self.plus.load(Ordering::SeqCst), self.minus.load(Ordering::SeqCst))
    }

    pub(crate) fn limit_reached(&self) -> bool {
        self.limit_reached.load(Ordering::SeqCst)
    }
}

/// The public result stream: a lazy, finite sequence of diff events in
/// discovery order, with a terminal summary.
pub struct DiffStream {
    rx: mpsc::Receiver<DiffEvent>,
    cancel: CancellationToken,
    handle: JoinHandle<DiffSummary>,
}

impl DiffStream {
    pub(crate) fn new(
        rx: mpsc::Receiver<DiffEvent>,
        cancel: CancellationToken,
        handle: JoinHandle<DiffSummary>,
    ) -> Self {
        Self { rx, cancel, handle }
    }

    /// Next diff event, or `None` when the run has finished.
    pub async fn next_event(&mut self) -> Option<DiffEvent> {
        self.rx.recv().await
    }

    /// Collect every remaining event. Mostly for tests and small runs.
    pub async fn collect_events(&mut self) -> Vec<DiffEvent> {
        let mut events = Vec::new();
        while let Some(e) = self.next_event().await {
            events.push(e);
        }
        events
    }

    /// Ask the run to stop; pending work is dropped, in-flight queries are
    /// cancelled best-effort.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Wait for the run to finish and return its summary. Unconsumed events
    /// are discarded.
    pub async fn finish(mut self) -> DiffSummary {
        // Drain so emitters are never blocked on a full channel.
        while self.rx.recv().await.is_some() {}
        match (&mut self.handle).await {
            Ok(summary) => summary,
            Err(join_err) => DiffSummary {
                status: RunStatus::Incomplete,
                diff_count: 0,
                plus_count: 0,
                minus_count: 0,
                rows_downloaded: 0,
                rows_compared: 0,
                bytes_downloaded: 0,
                limit_reached: false,
                duration_ms: 0,
                error: Some(format!("diff task panicked: {}", join_err)),
            },
        }
    }
}

impl Drop for DiffStream {
    fn drop(&mut self) {
        // Closing the stream before exhaustion cancels the run upstream.
        self.cancel.cancel();
    }
}
