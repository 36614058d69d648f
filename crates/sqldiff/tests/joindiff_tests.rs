//! End-to-end joindiff runs over a scripted adapter.
//!
//! The adapter answers each query shape with canned rows, so the full path
//! (preambles, join, classification, emission) runs without a database.

use std::sync::Arc;

use async_trait::async_trait;
use sqldiff::adapter::Adapter;
use sqldiff::dialect::{DialectImpl, PostgresDialect};
use sqldiff::schema::RawColumn;
use sqldiff::segment::{Row, TablePath};
use sqldiff::{
    DataSource, DiffError, JoinDiffer, RunContext, Sign, SqlSource, TableSegment,
};

/// Scripted responses, matched by a substring of the SQL text.
struct FakeAdapter {
    dialect: DialectImpl,
    fingerprint: String,
    responses: Vec<(&'static str, Vec<Row>)>,
}

impl FakeAdapter {
    fn new(responses: Vec<(&'static str, Vec<Row>)>) -> Arc<Self> {
        Arc::new(Self {
            dialect: DialectImpl::Postgres(PostgresDialect::new()),
            fingerprint: "postgresql://test@localhost/app".into(),
            responses,
        })
    }
}

#[async_trait]
impl Adapter for FakeAdapter {
    fn dialect(&self) -> &DialectImpl {
        &self.dialect
    }

    fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    async fn query_rows(&self, sql: &str) -> sqldiff::Result<Vec<Row>> {
        for (needle, rows) in &self.responses {
            if sql.contains(needle) {
                return Ok(rows.clone());
            }
        }
        Err(DiffError::backend(format!("unscripted query: {}", sql)))
    }

    async fn execute(&self, _sql: &str) -> sqldiff::Result<u64> {
        Ok(0)
    }

    async fn list_columns(&self, _path: &TablePath) -> sqldiff::Result<Vec<RawColumn>> {
        Ok(vec![
            RawColumn {
                name: "id".into(),
                type_text: "bigint".into(),
                datetime_precision: None,
                numeric_precision: None,
                numeric_scale: None,
                nullable: false,
            },
            RawColumn {
                name: "status".into(),
                type_text: "text".into(),
                datetime_precision: None,
                numeric_precision: None,
                numeric_scale: None,
                nullable: true,
            },
        ])
    }

    async fn healthcheck(&self) -> sqldiff::Result<()> {
        Ok(())
    }

    async fn close(&self) {}
}

fn text(v: &str) -> Option<String> {
    Some(v.to_string())
}

fn segment(path: &str) -> TableSegment {
    TableSegment::new(TablePath::parse(path).unwrap(), vec!["id".into()])
        .with_extra_columns(vec!["status".into()])
}

fn sources(adapter: Arc<FakeAdapter>) -> (Arc<dyn DataSource>, Arc<dyn DataSource>) {
    let ctx = RunContext::noop();
    (
        Arc::new(SqlSource::new(adapter.clone(), Arc::clone(&ctx))),
        Arc::new(SqlSource::new(adapter, ctx)),
    )
}

#[tokio::test]
async fn joindiff_streams_classified_rows() {
    // One modified row and one left-exclusive row survive the join filter.
    let adapter = FakeAdapter::new(vec![
        (
            "distinct_total",
            vec![vec![text("100"), text("100")]],
        ),
        ("null_keys", vec![vec![text("0")]]),
        (
            "FULL OUTER JOIN",
            vec![
                // modified: key 42, status completed -> returned
                vec![
                    text("0"),
                    text("0"),
                    text("1"),
                    text("42"),
                    text("completed"),
                    text("42"),
                    text("returned"),
                ],
                // left-exclusive: key 7
                vec![text("1"), text("0"), text("1"), text("7"), text("x"), None, None],
            ],
        ),
    ]);
    let (s1, s2) = sources(adapter);

    let mut stream = JoinDiffer::new()
        .diff_tables(s1, segment("public.orders"), s2, segment("public.orders_replica"))
        .await
        .unwrap();

    let events = stream.collect_events().await;
    let summary = stream.finish().await;

    assert_eq!(events.len(), 3);
    assert_eq!(events[0].sign, Sign::Minus);
    assert_eq!(events[1].sign, Sign::Plus);
    assert_eq!(events[0].key, events[1].key);
    assert_eq!(events[2].sign, Sign::Minus);
    assert!(summary.error.is_none());
    assert_eq!(summary.diff_count, 3);
    // Preamble totals feed rows_compared (both sides)
    assert_eq!(summary.rows_compared, 200);
}

#[tokio::test]
async fn duplicate_keys_fail_before_any_event() {
    // S6: COUNT(*) != COUNT(DISTINCT key)
    let adapter = FakeAdapter::new(vec![
        ("distinct_total", vec![vec![text("100"), text("99")]]),
        ("null_keys", vec![vec![text("0")]]),
        ("FULL OUTER JOIN", vec![]),
    ]);
    let (s1, s2) = sources(adapter);

    let mut stream = JoinDiffer::new()
        .diff_tables(s1, segment("t1"), s2, segment("t2"))
        .await
        .unwrap();

    let events = stream.collect_events().await;
    let summary = stream.finish().await;
    assert!(events.is_empty());
    assert!(summary.error.as_deref().unwrap_or("").contains("Duplicate"));
}

#[tokio::test]
async fn assume_unique_key_skips_the_preamble() {
    // Same duplicate-key data, but the check is disabled: the run proceeds.
    let adapter = FakeAdapter::new(vec![
        ("distinct_total", vec![vec![text("100"), text("99")]]),
        ("null_keys", vec![vec![text("0")]]),
        ("FULL OUTER JOIN", vec![]),
    ]);
    let (s1, s2) = sources(adapter);

    let mut stream = JoinDiffer::new()
        .with_unique_key_validation(false)
        .diff_tables(s1, segment("t1"), s2, segment("t2"))
        .await
        .unwrap();

    let events = stream.collect_events().await;
    let summary = stream.finish().await;
    assert!(events.is_empty());
    assert!(summary.error.is_none());
}

#[tokio::test]
async fn join_limit_is_honored() {
    let join_rows: Vec<Row> = (1..=20)
        .map(|i| {
            vec![
                text("1"),
                text("0"),
                text("1"),
                text(&i.to_string()),
                text("x"),
                None,
                None,
            ]
        })
        .collect();
    let adapter = FakeAdapter::new(vec![
        ("distinct_total", vec![vec![text("20"), text("20")]]),
        ("null_keys", vec![vec![text("0")]]),
        ("FULL OUTER JOIN", join_rows),
    ]);
    let (s1, s2) = sources(adapter);

    let mut stream = JoinDiffer::new()
        .with_limit(Some(3))
        .diff_tables(s1, segment("t1"), s2, segment("t2"))
        .await
        .unwrap();

    let events = stream.collect_events().await;
    let summary = stream.finish().await;
    assert_eq!(events.len(), 3);
    assert!(summary.limit_reached);
}
