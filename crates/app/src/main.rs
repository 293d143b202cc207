//! netfrag-sim: run a fragmentation scenario and report what arrived.

mod config;
mod input_gen;
mod scenario;

use anyhow::Context;
use clap::Parser;
use config::{Args, Config};
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    let config = Config::from_args(&args).context("invalid configuration")?;
    if config.print_config {
        config.print();
    }

    let outcome = scenario::run(&config)?;

    for (addr, deliveries) in &outcome.delivered {
        for d in deliveries {
            println!(
                "Host_{addr} received id {}: {}",
                d.id,
                String::from_utf8_lossy(&d.message)
            );
        }
    }
    println!("All simulation threads joined");

    if config.print_metrics {
        outcome.metrics.print_summary();
        println!("=== Links ===");
        println!("Carried: {}", outcome.links.carried);
        println!("Lost: {}", outcome.links.dropped_loss);
        println!("Dropped (over MTU): {}", outcome.links.dropped_mtu);
        println!("Dropped (receiver full): {}", outcome.links.dropped_full);
        println!("Elapsed: {:.1} ms", outcome.elapsed.as_secs_f64() * 1000.0);
    }

    if !outcome.is_complete() {
        eprintln!(
            "{} of {} messages delivered",
            outcome.delivered_count(),
            outcome.expected
        );
    }

    Ok(())
}

fn init_logging(verbose: u8) {
    let default = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_thread_names(true)
        .init();
}
