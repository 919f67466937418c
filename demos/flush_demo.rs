//! Demo application showing write-back counters flushed to a shared store.
//!
//! Several simulated processes count lap events into their own accumulator,
//! all backed by one in-memory store, while the flush schedulers reconcile
//! their deltas concurrently.
//!
//! Run with:
//! ```bash
//! cargo run --example flush_demo --features demo -- --help
//! RUST_LOG=accumulatori=debug cargo run --example flush_demo --features demo
//! ```

use std::sync::Arc;
use std::time::Duration;

use accumulatori::audit::AuditLog;
use accumulatori::config::AccumulatorConfig;
use accumulatori::observers::json::JsonObserver;
use accumulatori::observers::table::{TableObserver, TableStyle};
use accumulatori::observers::Result;
use accumulatori::store::{FaultKind, MemoryStore};
use accumulatori::Accumulator;
use clap::{Parser, ValueEnum};
use tracing_subscriber::EnvFilter;

/// Output format for the final report.
#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutputFormat {
    /// Pretty ASCII table
    Table,
    /// JSON format
    Json,
}

/// Demo application for accumulatori - write-back counters.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Output format
    #[arg(short, long, value_enum, default_value = "table")]
    format: OutputFormat,

    /// Number of simulated processes sharing the store
    #[arg(short, long, default_value = "3")]
    processes: usize,

    /// Number of request tasks per process
    #[arg(short, long, default_value = "4")]
    tasks: usize,

    /// Requests served by each task
    #[arg(long, default_value = "500")]
    requests: usize,

    /// Number of distinct counter ids
    #[arg(long, default_value = "5")]
    ids: usize,

    /// Flush interval in milliseconds
    #[arg(long, default_value = "50")]
    flush_ms: u64,

    /// Artificial store latency in milliseconds
    #[arg(long, default_value = "2")]
    latency_ms: u64,

    /// Inject this many transient store failures
    #[arg(long, default_value = "0")]
    faults: usize,

    /// Pretty print JSON output
    #[arg(long)]
    pretty: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("accumulatori=info")),
        )
        .init();

    let args = Args::parse();

    let store = Arc::new(MemoryStore::new());
    store.set_latency(Duration::from_millis(args.latency_ms));
    store.fail_next(args.faults, FaultKind::Throttled);

    let config = AccumulatorConfig::new("p1lapchart")
        .with_flush_interval(Duration::from_millis(args.flush_ms))
        .with_request_timeout(Duration::from_secs(1));

    let mut processes = Vec::with_capacity(args.processes);
    for _ in 0..args.processes {
        // retry table creation while injected faults drain
        let counters = loop {
            match Accumulator::connect(Arc::clone(&store), config.clone()).await {
                Ok(counters) => break counters,
                Err(err) => tracing::warn!(error = %err, "connect failed, retrying"),
            }
        };
        processes.push(Arc::new(counters));
    }

    let mut handles = vec![];
    for (p, counters) in processes.iter().enumerate() {
        let audit = Arc::new(AuditLog::new(Arc::clone(counters)));
        for t in 0..args.tasks {
            let audit = Arc::clone(&audit);
            let (requests, ids) = (args.requests, args.ids.max(1));
            handles.push(tokio::spawn(async move {
                for r in 0..requests {
                    let id = format!("event-{}", (p + t + r) % ids);
                    audit.audit(&format!("10.0.{}.{}", p, t), &id, "0");
                    if r % 50 == 0 {
                        tokio::time::sleep(Duration::from_millis(1)).await;
                    }
                }
            }));
        }
    }
    let mut failed_tasks = 0;
    for handle in handles {
        if let Err(err) = handle.await {
            tracing::warn!(error = %err, "request task did not complete");
            failed_tasks += 1;
        }
    }
    if failed_tasks > 0 {
        tracing::warn!(failed_tasks, "served request count is short");
    }

    // drain whatever the schedulers have not flushed yet
    for counters in &processes {
        while counters.flush_now().await > 0 {}
        counters.shutdown().await;
    }

    let global = processes[0].global_counters().await?;
    let expected: usize = args.processes * args.tasks * args.requests;
    let stored: i64 = global.iter().map(|(_, v)| *v).sum();

    match args.format {
        OutputFormat::Table => {
            for (p, counters) in processes.iter().enumerate() {
                let observer = TableObserver::new()
                    .with_style(TableStyle::Rounded)
                    .with_title(format!("process {} ({:?})", p, counters.stats()));
                println!("{}", observer.render(&counters.snapshot()));
            }
            println!(
                "{}",
                TableObserver::new()
                    .with_title("remote store")
                    .render_global(&global)
            );
        }
        OutputFormat::Json => {
            let observer = JsonObserver::new().pretty(args.pretty);
            for counters in &processes {
                println!(
                    "{}",
                    observer.to_json_with_stats(&counters.snapshot(), counters.stats())?
                );
            }
            println!("{}", observer.global_to_json(&global)?);
        }
    }

    println!("requests served: {}, stored total: {}", expected, stored);
    Ok(())
}
