//! sqldiff CLI - efficiently diff rows across database tables.

mod output;

use std::process::ExitCode;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use clap::Parser;
use tracing::{info, warn, Level};

use sqldiff::age::{parse_age, time_before};
use sqldiff::config::{load_run, RunConfig};
use sqldiff::{
    connect, select_algorithm, Algorithm, DiffError, DiffStream, HashDiffer, JoinDiffer,
    LogTracker, NoopTracker, QueryGate, RunContext, SqlSource, TablePath, TableSegment,
};

#[derive(Parser, Debug)]
#[command(name = "sqldiff")]
#[command(about = "Efficiently diff rows across database tables")]
#[command(version)]
#[command(after_help = "\
Usage forms:
  * Cross-db diff:  sqldiff DB1_URI TABLE1 DB2_URI TABLE2 [OPTIONS]
  * Using config:   sqldiff --conf PATH [--run NAME] [OPTIONS]")]
struct Cli {
    /// Connection URI for the first database
    database1: Option<String>,
    /// Table to compare on the first database
    table1: Option<String>,
    /// Connection URI for the second database
    database2: Option<String>,
    /// Table to compare on the second database
    table2: Option<String>,

    /// Names of the primary key columns. Default: id
    #[arg(short = 'k', long = "key-columns", value_name = "NAME")]
    key_columns: Vec<String>,

    /// Name of the updated_at/last_updated column
    #[arg(short = 't', long = "update-column", value_name = "NAME")]
    update_column: Option<String>,

    /// Extra columns to compare; supports % wildcards (e.g. -c col%)
    #[arg(short = 'c', long = "columns", value_name = "NAME")]
    columns: Vec<String>,

    /// Extra WHERE predicate applied to both sides
    #[arg(short = 'w', long = "where", value_name = "EXPR")]
    where_clause: Option<String>,

    /// Only compare rows older than this (e.g. 5min, 1d2h)
    #[arg(long = "min-age", value_name = "AGE")]
    min_age: Option<String>,

    /// Only compare rows younger than this
    #[arg(long = "max-age", value_name = "AGE")]
    max_age: Option<String>,

    /// Comparison algorithm
    #[arg(short = 'a', long = "algorithm", value_name = "NAME", default_value = "auto")]
    algorithm: String,

    /// Segments per bisection iteration (at least 2)
    #[arg(long = "bisection-factor", value_name = "NUM")]
    bisection_factor: Option<usize>,

    /// Row count below which segments are downloaded and compared locally
    #[arg(long = "bisection-threshold", value_name = "NUM")]
    bisection_threshold: Option<u64>,

    /// Materialize diff results into this table (joindiff); %t expands to a timestamp
    #[arg(short = 'm', long = "materialize", value_name = "TABLE")]
    materialize: Option<String>,

    /// Skip the key-uniqueness check (joindiff)
    #[arg(long = "assume-unique-key")]
    assume_unique_key: bool,

    /// Sample rows that exist on one side only instead of emitting them all (joindiff)
    #[arg(long = "sample-exclusive-rows")]
    sample_exclusive_rows: bool,

    /// Materialize every joined row, not only the differing ones (joindiff)
    #[arg(long = "materialize-all-rows")]
    materialize_all_rows: bool,

    /// Maximum number of rows to write per materialization
    #[arg(long = "table-write-limit", value_name = "NUM")]
    table_write_limit: Option<u64>,

    /// Print summary statistics at the end
    #[arg(short = 's', long = "stats")]
    stats: bool,

    /// Emit diff events as JSON lines
    #[arg(long = "json")]
    json: bool,

    /// Stop after this many differences
    #[arg(short = 'l', long = "limit", value_name = "NUM")]
    limit: Option<u64>,

    /// Info-level logging
    #[arg(short = 'v', long = "verbose")]
    verbose: bool,

    /// Debug-level logging (includes SQL text)
    #[arg(short = 'd', long = "debug")]
    debug: bool,

    /// Print EXPLAIN output and confirm before every query
    #[arg(short = 'i', long = "interactive")]
    interactive: bool,

    /// Fail the whole run on the first segment error
    #[arg(long = "strict-errors")]
    strict_errors: bool,

    /// Per-database query concurrency
    #[arg(short = 'j', long = "threads", value_name = "NUM")]
    threads: Option<usize>,

    /// Treat column names as case-sensitive
    #[arg(long = "case-sensitive")]
    case_sensitive: bool,

    /// Configuration file with [database.*] and [run.*] sections
    #[arg(long = "conf", value_name = "FILE")]
    conf: Option<std::path::PathBuf>,

    /// Named run to load from the config file
    #[arg(long = "run", value_name = "NAME", requires = "conf")]
    run: Option<String>,

    /// Disable usage telemetry
    #[arg(long = "no-tracking")]
    no_tracking: bool,
}

/// Fully resolved options: config file values overridden by CLI flags.
struct Resolved {
    database1: String,
    table1: String,
    database2: String,
    table2: String,
    key_columns: Vec<String>,
    update_column: Option<String>,
    columns: Vec<String>,
    where_clause: Option<String>,
    min_age: Option<String>,
    max_age: Option<String>,
    algorithm: Algorithm,
    bisection_factor: usize,
    bisection_threshold: u64,
    materialize: Option<String>,
    assume_unique_key: bool,
    sample_exclusive_rows: bool,
    materialize_all_rows: bool,
    table_write_limit: u64,
    stats: bool,
    json: bool,
    limit: Option<u64>,
    verbose: bool,
    debug: bool,
    interactive: bool,
    strict_errors: bool,
    threads1: usize,
    threads2: usize,
    case_sensitive: bool,
    no_tracking: bool,
}

fn resolve(cli: Cli) -> Result<Resolved, DiffError> {
    let config = match &cli.conf {
        Some(path) => load_run(path, cli.run.as_deref())?,
        None => RunConfig::default(),
    };

    let database1 = cli
        .database1
        .or_else(|| config.side1.database.clone())
        .ok_or_else(|| DiffError::Config("Missing first database URI".into()))?;
    let table1 = cli
        .table1
        .or_else(|| config.side1.table.clone())
        .ok_or_else(|| DiffError::Config("Missing first table name".into()))?;
    let database2 = cli
        .database2
        .or_else(|| config.side2.database.clone())
        .ok_or_else(|| DiffError::Config("Missing second database URI".into()))?;
    let table2 = cli
        .table2
        .or_else(|| config.side2.table.clone())
        .ok_or_else(|| DiffError::Config("Missing second table name".into()))?;

    let key_columns = if !cli.key_columns.is_empty() {
        cli.key_columns
    } else if !config.key_columns.is_empty() {
        config.key_columns.clone()
    } else {
        vec!["id".to_string()]
    };

    // An explicit -a wins; otherwise the config file may pick the algorithm.
    let algorithm: Algorithm = if cli.algorithm == "auto" {
        match &config.algorithm {
            Some(a) => a.parse()?,
            None => Algorithm::Auto,
        }
    } else {
        cli.algorithm.parse()?
    };

    let threads = cli.threads.or(config.threads).unwrap_or(1);
    if threads == 0 {
        return Err(DiffError::Config("--threads must be at least 1".into()));
    }

    Ok(Resolved {
        database1,
        table1,
        database2,
        table2,
        key_columns,
        update_column: cli.update_column.or_else(|| config.update_column.clone()),
        columns: if cli.columns.is_empty() {
            config.columns.clone()
        } else {
            cli.columns
        },
        where_clause: cli.where_clause.or_else(|| config.where_clause.clone()),
        min_age: cli.min_age.or_else(|| config.min_age.clone()),
        max_age: cli.max_age.or_else(|| config.max_age.clone()),
        algorithm,
        bisection_factor: cli
            .bisection_factor
            .or(config.bisection_factor)
            .unwrap_or(sqldiff::DEFAULT_BISECTION_FACTOR),
        bisection_threshold: cli
            .bisection_threshold
            .or(config.bisection_threshold)
            .unwrap_or(sqldiff::DEFAULT_BISECTION_THRESHOLD),
        materialize: cli.materialize.or_else(|| config.materialize_to_table.clone()),
        assume_unique_key: cli.assume_unique_key || config.assume_unique_key.unwrap_or(false),
        sample_exclusive_rows: cli.sample_exclusive_rows
            || config.sample_exclusive_rows.unwrap_or(false),
        materialize_all_rows: cli.materialize_all_rows
            || config.materialize_all_rows.unwrap_or(false),
        table_write_limit: cli
            .table_write_limit
            .or(config.table_write_limit)
            .unwrap_or(sqldiff::DEFAULT_TABLE_WRITE_LIMIT),
        stats: cli.stats || config.stats.unwrap_or(false),
        json: cli.json || config.json_output.unwrap_or(false),
        limit: cli.limit.or(config.limit),
        verbose: cli.verbose || config.verbose.unwrap_or(false),
        debug: cli.debug || config.debug.unwrap_or(false),
        interactive: cli.interactive,
        strict_errors: cli.strict_errors || config.strict_errors.unwrap_or(false),
        threads1: config.side1.threads.unwrap_or(threads),
        threads2: config.side2.threads.unwrap_or(threads),
        case_sensitive: cli.case_sensitive || config.case_sensitive.unwrap_or(false),
        no_tracking: cli.no_tracking || config.no_tracking.unwrap_or(false),
    })
}

fn setup_logging(verbose: bool, debug: bool) {
    let level = if debug {
        Level::DEBUG
    } else if verbose {
        Level::INFO
    } else {
        Level::WARN
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// dialoguer-backed approval hook for `--interactive`.
struct ConfirmGate;

#[async_trait]
impl QueryGate for ConfirmGate {
    async fn approve(&self, sql: &str, plan: &str) -> sqldiff::Result<bool> {
        eprintln!("\n--- query ---\n{}\n--- plan ---\n{}", sql, plan);
        tokio::task::spawn_blocking(|| {
            dialoguer::Confirm::new()
                .with_prompt("Run this query?")
                .default(true)
                .interact()
                .map_err(|e| DiffError::Config(format!("interactive prompt failed: {}", e)))
        })
        .await
        .map_err(|e| DiffError::backend(format!("prompt task failed: {}", e)))?
    }
}

fn build_segment(opts: &Resolved, table: &str) -> Result<TableSegment, DiffError> {
    let now = Utc::now();
    // min_age excludes the youngest rows, max_age the oldest.
    let max_update = opts
        .min_age
        .as_deref()
        .map(|a| parse_age(a).map(|d| time_before(now, d)))
        .transpose()?;
    let min_update = opts
        .max_age
        .as_deref()
        .map(|a| parse_age(a).map(|d| time_before(now, d)))
        .transpose()?;

    let mut segment = TableSegment::new(TablePath::parse(table)?, opts.key_columns.clone())
        .with_extra_columns(opts.columns.clone())
        .with_update_bounds(min_update, max_update)
        .with_case_sensitive(opts.case_sensitive);
    if let Some(update) = &opts.update_column {
        segment = segment.with_update_column(update.clone());
    }
    if let Some(predicate) = &opts.where_clause {
        segment = segment.with_where(predicate.clone());
    }
    Ok(segment)
}

/// Expand `%t` in a materialization name to a run timestamp.
fn expand_materialize_name(name: &str) -> String {
    name.replace("%t", &Utc::now().format("%Y%m%d_%H%M%S").to_string())
}

async fn run() -> Result<ExitCode, DiffError> {
    let cli = Cli::parse();
    let opts = resolve(cli)?;
    setup_logging(opts.verbose, opts.debug);

    let mut context = if opts.no_tracking {
        RunContext::new(Arc::new(NoopTracker))
    } else {
        RunContext::new(Arc::new(LogTracker))
    };
    if opts.interactive {
        context = context.with_gate(Arc::new(ConfirmGate));
    }

    // Validate table paths and age bounds before opening any connection.
    let segment1 = build_segment(&opts, &opts.table1)?;
    let segment2 = build_segment(&opts, &opts.table2)?;

    let adapter1 = connect(&opts.database1).await?;
    let adapter2 = connect(&opts.database2).await?;
    let source1 = Arc::new(SqlSource::new(adapter1, Arc::clone(&context)));
    let source2 = Arc::new(SqlSource::new(adapter2, Arc::clone(&context)));

    let algorithm = select_algorithm(opts.algorithm, source1.as_ref(), source2.as_ref())?;
    info!(?algorithm, "selected algorithm");
    context.tracker.event(
        "diff_started",
        serde_json::json!({
            "algorithm": format!("{:?}", algorithm),
            "threads": opts.threads1.max(opts.threads2),
            "bisection_factor": opts.bisection_factor,
        }),
    );

    let stream = match algorithm {
        Algorithm::JoinDiff => {
            let materialize = opts
                .materialize
                .as_deref()
                .map(expand_materialize_name)
                .map(|n| TablePath::parse(&n))
                .transpose()?;
            JoinDiffer::new()
                .with_limit(opts.limit)
                .with_unique_key_validation(!opts.assume_unique_key)
                .with_sampling(opts.sample_exclusive_rows)
                .with_materialization(materialize, opts.materialize_all_rows, opts.table_write_limit)
                .with_stats(opts.stats)
                .diff_tables(source1, segment1, source2, segment2)
                .await?
        }
        _ => {
            if opts.materialize.is_some() {
                return Err(DiffError::Config(
                    "--materialize requires joindiff (same database on both sides)".into(),
                ));
            }
            let mut differ = HashDiffer::new()
                .with_bisection(opts.bisection_factor, opts.bisection_threshold)
                .with_limit(opts.limit)
                .with_strict_errors(opts.strict_errors);
            differ.left_threads = opts.threads1;
            differ.right_threads = opts.threads2;
            differ
                .diff_tables(source1, segment1, source2, segment2)
                .await?
        }
    };

    let (code, summary) = consume(stream, &opts).await?;
    context.tracker.event(
        "diff_completed",
        serde_json::json!({
            "diff_count": summary.diff_count,
            "rows_compared": summary.rows_compared,
            "duration_ms": summary.duration_ms,
            "status": format!("{:?}", summary.status),
        }),
    );
    Ok(code)
}

async fn consume(
    mut stream: DiffStream,
    opts: &Resolved,
) -> Result<(ExitCode, sqldiff::DiffSummary), DiffError> {
    loop {
        tokio::select! {
            event = stream.next_event() => {
                match event {
                    Some(event) => {
                        if opts.json {
                            println!("{}", event.to_json());
                        } else {
                            println!("{}", event.to_human());
                        }
                    }
                    None => break,
                }
            }
            _ = tokio::signal::ctrl_c() => {
                warn!("interrupted; cancelling");
                stream.cancel();
            }
        }
    }

    let summary = stream.finish().await;
    if summary.limit_reached {
        warn!("diff limit reached; remaining differences were not scanned");
    }
    if opts.stats {
        output::print_stats(&summary, opts.json);
    }

    if let Some(error) = &summary.error {
        if summary.limit_reached {
            // The limit was satisfied before the failure: report success
            warn!(error = %error, "run failed after the diff limit was already satisfied");
        } else {
            eprintln!("Error: {}", error);
            return Ok((ExitCode::from(3), summary));
        }
    }

    let code = if summary.diff_count > 0 {
        ExitCode::from(1)
    } else {
        ExitCode::SUCCESS
    };
    Ok((code, summary))
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{}", e.format_detailed());
            ExitCode::from(e.exit_code())
        }
    }
}
