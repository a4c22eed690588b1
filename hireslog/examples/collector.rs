use clap::Parser;
use eventring::cycles;
use hdrhistogram::Histogram;
use hireslog::{Collector, CollectorConfig};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

#[derive(Parser, Debug)]
#[clap(name = "collector")]
#[clap(about = "Drain a shared event ring and report statistics", long_about = None)]
struct Args {
    #[clap(short, long, default_value = "/tmp/hireslog.sock")]
    socket_path: PathBuf,

    /// Log2 of the ring capacity in entries.
    #[clap(short, long, default_value_t = 16)]
    capacity_log2: u32,

    #[clap(short, long, default_value_t = 10)]
    report_interval_secs: u64,

    /// Milliseconds to sleep when the ring is empty; 0 burns the CPU for
    /// the fastest possible drain.
    #[clap(short, long, default_value_t = 10)]
    poll_interval_ms: u64,
}

fn main() -> eyre::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    debug!(?args, "collector configuration");

    let mut collector = Collector::create(CollectorConfig {
        capacity: 1 << args.capacity_log2,
        socket_path: args.socket_path.clone(),
        ..CollectorConfig::default()
    })?;

    let cycles_per_us = collector.cycles_per_us();
    info!(
        capacity = 1u64 << args.capacity_log2,
        cycles_per_us,
        socket_path = %args.socket_path.display(),
        "collector ready"
    );

    // Age of each entry at drain time, in microseconds.
    let mut age_hist = Histogram::<u64>::new(3)?;
    let mut per_event_counts: HashMap<u32, u64> = HashMap::new();
    let mut total: u64 = 0;
    let mut last_dropped: u64 = 0;
    let mut last_report = Instant::now();

    loop {
        match collector.pop() {
            Some(entry) => {
                total += 1;
                *per_event_counts.entry(entry.event_id).or_insert(0) += 1;

                let age_cycles = cycles::now().saturating_sub(entry.timestamp);
                let _ = age_hist.record(cycles::to_micros(age_cycles, cycles_per_us));
            }
            None => {
                if args.poll_interval_ms > 0 {
                    std::thread::sleep(Duration::from_millis(args.poll_interval_ms));
                }
            }
        }

        if last_report.elapsed().as_secs() >= args.report_interval_secs {
            let elapsed = last_report.elapsed().as_secs_f64();
            info!(
                rate = format!("{:.2}", total as f64 / elapsed),
                total_entries = total,
                available = collector.available(),
                "=== statistics report ==="
            );
            for (&event_id, &count) in per_event_counts.iter() {
                info!(event_id = event_id, count = count, "event statistics");
            }
            if !age_hist.is_empty() {
                info!(
                    p50_us = age_hist.value_at_quantile(0.50),
                    p99_us = age_hist.value_at_quantile(0.99),
                    max_us = age_hist.max(),
                    "entry age at drain"
                );
            }

            let dropped = collector.dropped();
            if dropped > last_dropped {
                warn!(
                    dropped = dropped - last_dropped,
                    total_dropped = dropped,
                    "entries lost to overflow"
                );
                last_dropped = dropped;
            }

            age_hist.clear();
            per_event_counts.clear();
            total = 0;
            last_report = Instant::now();
        }
    }
}
