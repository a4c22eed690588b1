use clap::Parser;
use governor::{Quota, RateLimiter};
use hireslog::Logger;
use std::num::NonZeroU32;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info};

#[derive(Parser, Debug)]
#[clap(name = "logger")]
#[clap(about = "Publish tagged events into a shared ring", long_about = None)]
struct Args {
    #[clap(short, long, default_value = "/tmp/hireslog.sock")]
    socket_path: PathBuf,

    #[clap(short, long, default_value_t = 1)]
    threads: usize,

    /// Events per second per thread.
    #[clap(short, long, default_value_t = 1000)]
    rate: u32,

    /// Base event id; thread `i` publishes with `event_id + i`.
    #[clap(short, long, default_value_t = 1)]
    event_id: u32,

    #[clap(short, long, default_value_t = 10_000)]
    print_interval: u64,
}

fn main() -> eyre::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    debug!(?args, "logger configuration");

    let logger = Arc::new(Logger::attach(&args.socket_path)?);
    info!(
        socket_path = %args.socket_path.display(),
        capacity = logger.geometry().capacity,
        cycles_per_us = logger.cycles_per_us(),
        "attached to collector"
    );

    let mut handles = Vec::new();
    for thread_idx in 0..args.threads {
        let logger = logger.clone();
        let event_id = args.event_id + thread_idx as u32;
        let rate = args.rate;
        let print_interval = args.print_interval;

        handles.push(thread::spawn(move || {
            let quota = Quota::per_second(NonZeroU32::new(rate).unwrap());
            let limiter = RateLimiter::direct(quota);

            let start = Instant::now();
            let mut sequence = 0u64;

            loop {
                while limiter.check().is_err() {
                    thread::sleep(Duration::from_millis(1));
                }

                let _ = logger.publish(event_id, sequence, thread_idx as u64);
                sequence += 1;

                if sequence % print_interval == 0 {
                    info!(
                        event_id,
                        published = sequence,
                        dropped = logger.dropped(),
                        elapsed_secs = start.elapsed().as_secs(),
                        "progress update"
                    );
                }
            }
        }));
    }

    for handle in handles {
        let _ = handle.join();
    }
    Ok(())
}
