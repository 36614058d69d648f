//! End-to-end hashdiff runs over in-memory sources.

use std::collections::HashMap;
use std::sync::Arc;

use sqldiff::schema::ColumnType;
use sqldiff::source::MemorySource;
use sqldiff::{DataSource, DiffEvent, HashDiffer, KeyValue, Row, Sign, TablePath, TableSegment};

fn rating_row(id: i64, status: &str) -> Row {
    vec![Some(id.to_string()), Some(status.to_string())]
}

fn ratings_source(rows: Vec<Row>) -> Arc<MemorySource> {
    let mut src = MemorySource::new("memory");
    src.add_table(
        "ratings",
        vec![
            ("id".into(), ColumnType::Integer),
            ("status".into(), ColumnType::Text),
        ],
        rows,
    );
    Arc::new(src)
}

fn ratings_segment() -> TableSegment {
    TableSegment::new(TablePath::parse("ratings").unwrap(), vec!["id".into()])
        .with_extra_columns(vec!["status".into()])
}

async fn run_diff(
    differ: HashDiffer,
    left: Arc<MemorySource>,
    right: Arc<MemorySource>,
) -> (Vec<DiffEvent>, sqldiff::DiffSummary) {
    let mut stream = differ
        .diff_tables(
            left as Arc<dyn DataSource>,
            ratings_segment(),
            right as Arc<dyn DataSource>,
            ratings_segment(),
        )
        .await
        .unwrap();
    let events = stream.collect_events().await;
    let summary = stream.finish().await;
    (events, summary)
}

fn key_int(event: &DiffEvent) -> i64 {
    match &event.key[0] {
        KeyValue::Int(v) => *v,
        other => panic!("expected integer key, got {:?}", other),
    }
}

#[tokio::test]
async fn equal_tables_emit_no_events_across_tunings() {
    let rows: Vec<Row> = (1..=500).map(|i| rating_row(i, "completed")).collect();

    for (factor, threshold, threads) in [(2usize, 4u64, 1usize), (8, 64, 4), (32, 16384, 2)] {
        let (events, summary) = run_diff(
            HashDiffer::new()
                .with_bisection(factor, threshold)
                .with_threads(threads),
            ratings_source(rows.clone()),
            ratings_source(rows.clone()),
        )
        .await;
        assert!(events.is_empty(), "factor={} threshold={}", factor, threshold);
        assert_eq!(summary.diff_count, 0);
        assert!(summary.error.is_none());
    }
}

#[tokio::test]
async fn checksum_equal_tables_are_never_descended_into() {
    let rows: Vec<Row> = (1..=1000).map(|i| rating_row(i, "ok")).collect();
    let left = ratings_source(rows.clone());
    let right = ratings_source(rows);

    let (events, _) = run_diff(
        HashDiffer::new().with_bisection(8, 64),
        Arc::clone(&left),
        Arc::clone(&right),
    )
    .await;

    assert!(events.is_empty());
    // Equal root checksums mean exactly one aggregate query per side and no
    // row fetches at all.
    assert_eq!(left.stats().checksum_queries, 1);
    assert_eq!(left.stats().fetch_queries, 0);
    assert_eq!(right.stats().checksum_queries, 1);
    assert_eq!(right.stats().fetch_queries, 0);
}

#[tokio::test]
async fn missing_row_is_reported_exactly_once() {
    // S1: right side is missing one row out of many
    let left: Vec<Row> = (1..=2000).map(|i| rating_row(i, "x")).collect();
    let right: Vec<Row> = (1..=2000)
        .filter(|i| *i != 1000)
        .map(|i| rating_row(i, "x"))
        .collect();

    let (events, summary) = run_diff(
        HashDiffer::new().with_bisection(4, 32),
        ratings_source(left),
        ratings_source(right),
    )
    .await;

    assert_eq!(events.len(), 1);
    assert_eq!(events[0].sign, Sign::Minus);
    assert_eq!(key_int(&events[0]), 1000);
    assert_eq!(summary.minus_count, 1);
    assert_eq!(summary.plus_count, 0);
}

#[tokio::test]
async fn inserted_row_is_reported_as_plus() {
    let left: Vec<Row> = (1..=300).map(|i| rating_row(i, "x")).collect();
    let mut right = left.clone();
    right.push(rating_row(301, "x"));

    let (events, _) = run_diff(
        HashDiffer::new().with_bisection(4, 32),
        ratings_source(left),
        ratings_source(right),
    )
    .await;

    assert_eq!(events.len(), 1);
    assert_eq!(events[0].sign, Sign::Plus);
    assert_eq!(key_int(&events[0]), 301);
}

#[tokio::test]
async fn mutated_row_surfaces_as_paired_events() {
    // S2: one mutated column among 100 equal rows
    let left: Vec<Row> = (1..=100).map(|i| rating_row(i, "completed")).collect();
    let right: Vec<Row> = (1..=100)
        .map(|i| rating_row(i, if i == 42 { "returned" } else { "completed" }))
        .collect();

    let (events, _) = run_diff(
        HashDiffer::new().with_bisection(4, 32),
        ratings_source(left),
        ratings_source(right),
    )
    .await;

    assert_eq!(events.len(), 2);
    assert_eq!(events[0].sign, Sign::Minus);
    assert_eq!(events[0].row[1].as_deref(), Some("completed"));
    assert_eq!(events[1].sign, Sign::Plus);
    assert_eq!(events[1].row[1].as_deref(), Some("returned"));
    assert_eq!(key_int(&events[0]), 42);
    assert_eq!(key_int(&events[1]), 42);
}

#[tokio::test]
async fn no_duplicate_sign_key_pairs() {
    let left: Vec<Row> = (1..=500).map(|i| rating_row(i, "a")).collect();
    let right: Vec<Row> = (1..=500)
        .map(|i| rating_row(i, if i % 50 == 0 { "b" } else { "a" }))
        .collect();

    let (events, _) = run_diff(
        HashDiffer::new().with_bisection(4, 16),
        ratings_source(left),
        ratings_source(right),
    )
    .await;

    let mut seen: HashMap<(String, i64), usize> = HashMap::new();
    for e in &events {
        *seen.entry((e.sign.to_string(), key_int(e))).or_default() += 1;
    }
    assert!(seen.values().all(|&n| n == 1), "duplicate events: {:?}", seen);
    assert_eq!(events.len(), 20); // 10 mutations, each a -/+ pair
}

#[tokio::test]
async fn limit_closes_the_stream_early() {
    let left: Vec<Row> = (1..=100).map(|i| rating_row(i, "a")).collect();
    let right: Vec<Row> = Vec::new();

    let (events, summary) = run_diff(
        HashDiffer::new().with_bisection(4, 1000).with_limit(Some(5)),
        ratings_source(left),
        ratings_source(right),
    )
    .await;

    assert_eq!(events.len(), 5);
    assert!(summary.limit_reached);
    assert!(summary.error.is_none());
}

#[tokio::test]
async fn events_within_a_segment_are_key_ordered() {
    // One below-threshold segment: everything compares locally
    let left: Vec<Row> = (1..=200).map(|i| rating_row(i, "a")).collect();
    let right: Vec<Row> = (1..=200)
        .map(|i| rating_row(i, if i % 7 == 0 { "b" } else { "a" }))
        .collect();

    let (events, _) = run_diff(
        HashDiffer::new().with_bisection(2, 100_000),
        ratings_source(left),
        ratings_source(right),
    )
    .await;

    let keys: Vec<i64> = events.iter().map(key_int).collect();
    let mut sorted = keys.clone();
    sorted.sort();
    assert_eq!(keys, sorted);
}

#[tokio::test]
async fn identical_runs_produce_identical_multisets() {
    let left: Vec<Row> = (1..=400).map(|i| rating_row(i, "a")).collect();
    let right: Vec<Row> = (1..=400)
        .map(|i| rating_row(i, if i % 31 == 0 { "b" } else { "a" }))
        .collect();

    let differ = HashDiffer::new().with_bisection(4, 16).with_threads(4);
    let (events1, _) = run_diff(
        differ.clone(),
        ratings_source(left.clone()),
        ratings_source(right.clone()),
    )
    .await;
    let (events2, _) = run_diff(differ, ratings_source(left), ratings_source(right)).await;

    let multiset = |events: &[DiffEvent]| {
        let mut m: Vec<(String, i64)> = events
            .iter()
            .map(|e| (e.sign.to_string(), key_int(e)))
            .collect();
        m.sort();
        m
    };
    assert_eq!(multiset(&events1), multiset(&events2));
}

#[tokio::test]
async fn one_side_empty_uses_fetch_only_fast_path() {
    let left: Vec<Row> = (1..=50).map(|i| rating_row(i, "x")).collect();

    let left_src = ratings_source(left);
    let right_src = ratings_source(Vec::new());
    let (events, _) = run_diff(
        HashDiffer::new(),
        Arc::clone(&left_src),
        Arc::clone(&right_src),
    )
    .await;

    assert_eq!(events.len(), 50);
    assert!(events.iter().all(|e| e.sign == Sign::Minus));
    // The empty side is never fetched
    assert_eq!(right_src.stats().fetch_queries, 0);
}

mod age_filter {
    use super::*;
    use chrono::{Duration, Utc};

    fn event_row(id: i64, updated_at: &str, value: &str) -> Row {
        vec![
            Some(id.to_string()),
            Some(updated_at.to_string()),
            Some(value.to_string()),
        ]
    }

    fn events_source(rows: Vec<Row>) -> Arc<MemorySource> {
        let mut src = MemorySource::new("memory");
        src.add_table(
            "events",
            vec![
                ("id".into(), ColumnType::Integer),
                (
                    "updated_at".into(),
                    ColumnType::Timestamp {
                        precision: 6,
                        with_timezone: false,
                    },
                ),
                ("value".into(), ColumnType::Text),
            ],
            rows,
        );
        Arc::new(src)
    }

    fn events_segment(max_update: Option<chrono::DateTime<Utc>>) -> TableSegment {
        TableSegment::new(TablePath::parse("events").unwrap(), vec!["id".into()])
            .with_update_column("updated_at")
            .with_extra_columns(vec!["value".into()])
            .with_update_bounds(None, max_update)
    }

    fn canonical(t: chrono::DateTime<Utc>) -> String {
        t.format("%Y-%m-%d %H:%M:%S%.6f").to_string()
    }

    // S5: rows touched in the last five minutes diverge; an age bound
    // filters the divergence out entirely.
    #[tokio::test]
    async fn min_age_filters_recent_divergence() {
        let now = Utc::now();
        let old = canonical(now - Duration::hours(2));
        let fresh = canonical(now - Duration::seconds(30));

        let left = vec![
            event_row(1, &old, "stable"),
            event_row(2, &fresh, "left-version"),
        ];
        let right = vec![
            event_row(1, &old, "stable"),
            event_row(2, &fresh, "right-version"),
        ];

        let watermark = now - Duration::minutes(5);

        // With the watermark: divergence is out of range, zero events
        let mut stream = HashDiffer::new()
            .diff_tables(
                events_source(left.clone()) as Arc<dyn DataSource>,
                events_segment(Some(watermark)),
                events_source(right.clone()) as Arc<dyn DataSource>,
                events_segment(Some(watermark)),
            )
            .await
            .unwrap();
        let filtered = stream.collect_events().await;
        let summary = stream.finish().await;
        assert!(filtered.is_empty(), "{:?}", summary);

        // Without it: the divergence is reported
        let mut stream = HashDiffer::new()
            .diff_tables(
                events_source(left) as Arc<dyn DataSource>,
                events_segment(None),
                events_source(right) as Arc<dyn DataSource>,
                events_segment(None),
            )
            .await
            .unwrap();
        let unfiltered = stream.collect_events().await;
        stream.finish().await;
        assert_eq!(unfiltered.len(), 2);
    }
}

#[tokio::test]
async fn precision_mismatch_is_not_a_difference() {
    // S3 analogue: sides declare different decimal scales but the canonical
    // values are equal after widening. The memory source stores canonical
    // text, so this verifies the engine does not diff on declaration alone.
    let mut left = MemorySource::new("left");
    left.add_table(
        "amounts",
        vec![
            ("id".into(), ColumnType::Integer),
            ("amount".into(), ColumnType::Decimal { precision: 10, scale: 4 }),
        ],
        vec![vec![Some("1".into()), Some("3.1400".into())]],
    );
    let mut right = MemorySource::new("right");
    right.add_table(
        "amounts",
        vec![
            ("id".into(), ColumnType::Integer),
            ("amount".into(), ColumnType::Decimal { precision: 10, scale: 4 }),
        ],
        vec![vec![Some("1".into()), Some("3.1400".into())]],
    );

    let segment = || {
        TableSegment::new(TablePath::parse("amounts").unwrap(), vec!["id".into()])
            .with_extra_columns(vec!["amount".into()])
    };
    let mut stream = HashDiffer::new()
        .diff_tables(
            Arc::new(left) as Arc<dyn DataSource>,
            segment(),
            Arc::new(right) as Arc<dyn DataSource>,
            segment(),
        )
        .await
        .unwrap();
    assert!(stream.collect_events().await.is_empty());
}
