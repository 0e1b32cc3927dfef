//! Tessera scatter-gather load driver.
//!
//! Builds an in-memory cluster (local partitions plus in-process replica
//! hosts), runs one gather over it and reports throughput, buffer pressure and
//! job counters.
//!
//! Usage:
//!   cargo run -p tessera_bench -- --local 8 --remote 4 --rows 20000 --concurrency 4
//!   cargo run -p tessera_bench -- --unreachable-hosts 1 --export json
//!   cargo run -p tessera_bench -- --sweep --export csv

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{bail, Context, Result};
use clap::Parser;

use tessera_cluster::distributed_exec::{
    COUNTER_HOST_FAILOVERS, COUNTER_ROWS_PRODUCED, COUNTER_SUBQUERIES_FINISHED,
};
use tessera_cluster::{
    ExecutionContext, GatherStats, HostBehavior, InMemoryPartitionMap, InProcessTransport,
    PipelinedExpression, PlanFragment, ReplicaRef, StaticCredentialProvider,
};
use tessera_common::config::TesseraConfig;
use tessera_common::datum::{Datum, OwnedRow};

/// Tessera scatter-gather benchmark.
#[derive(Parser, Debug)]
#[command(name = "tessera-bench", about = "Scatter-gather load driver for Tessera")]
struct Args {
    /// Number of local partitions.
    #[arg(long, default_value_t = 8)]
    local: usize,

    /// Number of remote sub-queries.
    #[arg(long, default_value_t = 4)]
    remote: usize,

    /// Rows produced by each sub-query.
    #[arg(long, default_value_t = 10_000)]
    rows: usize,

    /// Maximum concurrent sub-queries. Overrides the config file.
    #[arg(long)]
    concurrency: Option<usize>,

    /// Dead replicas listed ahead of the live one for every remote sub-query.
    #[arg(long, default_value_t = 0)]
    unreachable_hosts: usize,

    /// Run once per concurrency level 1, 2, 4, 8, 16.
    #[arg(long)]
    sweep: bool,

    /// Path to a tessera.toml.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Export format: text | csv | json
    #[arg(long, default_value = "text")]
    export: String,
}

struct BenchResult {
    concurrency: usize,
    subqueries: usize,
    rows: u64,
    elapsed_ms: u128,
    rows_per_sec: f64,
    stats: GatherStats,
    rows_produced: f64,
    subqueries_finished: f64,
    host_failovers: f64,
}

fn init_tracing(filter: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn bench_rows(base: usize, count: usize) -> Vec<OwnedRow> {
    (0..count)
        .map(|i| {
            let key = (base + i) as i64;
            OwnedRow::new(vec![Datum::Int64(key), Datum::Text(format!("value_{}", key))])
        })
        .collect()
}

/// Populate partitions and replica hosts, returning the context and the
/// replica list for each remote sub-query.
fn build_cluster(args: &Args, namespace: &str) -> Result<(ExecutionContext, Vec<Vec<ReplicaRef>>)> {
    let columns = vec!["key".to_string(), "field0".to_string()];
    let partitions = Arc::new(InMemoryPartitionMap::new());
    partitions.create_table(namespace, "usertable", columns);
    for p in 0..args.local {
        partitions
            .insert_partition(
                namespace,
                "usertable",
                &format!("p{}", p),
                bench_rows(p * args.rows, args.rows),
            )
            .with_context(|| format!("loading partition p{}", p))?;
    }

    let transport = Arc::new(InProcessTransport::new());
    let mut replica_sets = Vec::with_capacity(args.remote);
    let mut node = 1u64;
    for r in 0..args.remote {
        let mut hosts = Vec::with_capacity(args.unreachable_hosts + 1);
        for d in 0..args.unreachable_hosts {
            let addr = format!("10.0.{}.{}:9100", r, d + 10);
            transport.register(addr.clone(), HostBehavior::Unreachable);
            hosts.push(ReplicaRef::new(node, addr));
            node += 1;
        }
        let addr = format!("10.0.{}.1:9100", r);
        let base = (args.local + r) * args.rows;
        transport.register(addr.clone(), HostBehavior::Serve(bench_rows(base, args.rows)));
        hosts.push(ReplicaRef::new(node, addr));
        node += 1;
        replica_sets.push(hosts);
    }

    let ctx = ExecutionContext::new(
        namespace,
        Arc::new(StaticCredentialProvider::new("bench")),
        transport,
        partitions,
    );
    Ok((ctx, replica_sets))
}

fn run_once(
    args: &Args,
    config: &TesseraConfig,
    ctx: &ExecutionContext,
    replica_sets: &[Vec<ReplicaRef>],
    concurrency: usize,
) -> Result<BenchResult> {
    let mut query_config = config.query.clone();
    query_config.max_concurrency = concurrency;

    let mut expr = PipelinedExpression::new(ctx.clone(), &query_config)?
        .with_name(format!("bench-c{}", concurrency));
    for p in 0..args.local {
        expr.add_partition("usertable", &format!("p{}", p))?;
    }
    let plan = Arc::new(PlanFragment::new(
        "usertable",
        vec!["key".into(), "field0".into()],
        Vec::new(),
    ));
    for hosts in replica_sets {
        expr.add_remote(Arc::clone(&plan), hosts.clone())?;
    }
    let subqueries = expr.len();

    let start = Instant::now();
    let mut cursor = expr.execute()?;
    let job = cursor.job();
    let mut rows = 0u64;
    while cursor.pull()?.is_some() {
        rows += 1;
    }
    job.wait();
    let elapsed = start.elapsed();

    let expected = (subqueries * args.rows) as u64;
    if rows != expected {
        bail!("gather returned {} rows, expected {}", rows, expected);
    }

    Ok(BenchResult {
        concurrency,
        subqueries,
        rows,
        elapsed_ms: elapsed.as_millis(),
        rows_per_sec: rows as f64 / elapsed.as_secs_f64().max(f64::EPSILON),
        stats: cursor.stats(),
        rows_produced: job.get_counter(COUNTER_ROWS_PRODUCED),
        subqueries_finished: job.get_counter(COUNTER_SUBQUERIES_FINISHED),
        host_failovers: job.get_counter(COUNTER_HOST_FAILOVERS),
    })
}

fn print_result_text(r: &BenchResult) {
    println!("═══════════════════════════════════════════════");
    println!("  gather  concurrency={}  sub-queries={}", r.concurrency, r.subqueries);
    println!("═══════════════════════════════════════════════");
    println!("  Rows:              {}", r.rows);
    println!("  Elapsed:           {} ms", r.elapsed_ms);
    println!("  Rows/sec:          {:.1}", r.rows_per_sec);
    println!("  ─── Gather ───");
    println!("  Peak active:       {}", r.stats.peak_active);
    println!("  Peak buffered:     {}", r.stats.peak_buffered);
    println!("  ─── Job counters ───");
    println!("  rows_produced:       {}", r.rows_produced);
    println!("  subqueries_finished: {}", r.subqueries_finished);
    println!("  host_failovers:      {}", r.host_failovers);
    println!();
}

fn print_result_csv(r: &BenchResult) {
    println!(
        "{},{},{},{},{:.1},{},{},{}",
        r.concurrency,
        r.subqueries,
        r.rows,
        r.elapsed_ms,
        r.rows_per_sec,
        r.stats.peak_active,
        r.stats.peak_buffered,
        r.host_failovers
    );
}

fn result_json(r: &BenchResult) -> serde_json::Value {
    serde_json::json!({
        "concurrency": r.concurrency,
        "subqueries": r.subqueries,
        "rows": r.rows,
        "elapsed_ms": r.elapsed_ms as u64,
        "rows_per_sec": r.rows_per_sec,
        "peak_active": r.stats.peak_active,
        "peak_buffered": r.stats.peak_buffered,
        "counters": {
            "rows_produced": r.rows_produced,
            "subqueries_finished": r.subqueries_finished,
            "host_failovers": r.host_failovers,
        },
    })
}

fn main() -> Result<()> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => TesseraConfig::load(path)
            .with_context(|| format!("reading config {}", path.display()))?,
        None => TesseraConfig::default(),
    };
    init_tracing(&config.logging.filter);

    if args.local + args.remote == 0 {
        bail!("nothing to gather: --local and --remote are both 0");
    }

    let (ctx, replica_sets) = build_cluster(&args, &config.query.namespace)?;
    let levels: Vec<usize> = if args.sweep {
        vec![1, 2, 4, 8, 16]
    } else {
        vec![args.concurrency.unwrap_or(config.query.max_concurrency)]
    };

    if args.export == "csv" {
        println!("concurrency,subqueries,rows,elapsed_ms,rows_per_sec,peak_active,peak_buffered,host_failovers");
    }
    let mut results = Vec::new();
    for concurrency in levels {
        tracing::info!(concurrency, "running gather");
        let r = run_once(&args, &config, &ctx, &replica_sets, concurrency)?;
        match args.export.as_str() {
            "csv" => print_result_csv(&r),
            "json" => results.push(result_json(&r)),
            _ => print_result_text(&r),
        }
    }
    if args.export == "json" {
        println!("{}", serde_json::to_string_pretty(&results)?);
    }
    Ok(())
}
