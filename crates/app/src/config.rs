//! Configuration for the netfrag-sim application.
//!
//! Parses command-line arguments with clap and fills in defaults. Defaults
//! that are randomized come from a ChaCha8 RNG seeded with `--seed`, so a
//! run is reproducible from its printed configuration.
//!
//! # Philosophy
//!
//! The tool should work with ZERO arguments, using intelligent defaults.
//! All defaults are printed so runs are reproducible.

use clap::{Parser, ValueEnum};
use netfrag_core::link::LinkConfig;
use netfrag_core::{Error, HeaderLayout, Result};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::time::{SystemTime, UNIX_EPOCH};

/// Which topology to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Scenario {
    /// Client -> router -> server, messages fit the MTU
    SingleHop,
    /// Client -> router -> server, sender and router both fragment
    Fragmenting,
    /// Two clients, four routers, two servers
    Mesh,
}

#[derive(Debug, Parser)]
#[command(name = "netfrag-sim", version, about = "Simulate IP-style fragmentation across routers")]
pub struct Args {
    /// Topology and traffic to run
    #[arg(value_enum, default_value_t = Scenario::Mesh)]
    pub scenario: Scenario,

    /// Random seed for determinism (default: time-based)
    #[arg(long)]
    pub seed: Option<u64>,

    /// Give up waiting for deliveries after this long
    #[arg(long, default_value_t = 2000)]
    pub duration_ms: u64,

    /// Router queue capacity, 0 for unbounded
    #[arg(long, default_value_t = 0)]
    pub queue_size: usize,

    /// MTU of the first hop (default: 50)
    #[arg(long)]
    pub mtu: Option<usize>,

    /// Per-link packet loss rate 0.0-1.0 (default: 0)
    #[arg(long)]
    pub loss: Option<f64>,

    /// One-way link latency (default: random 0-5)
    #[arg(long)]
    pub latency_ms: Option<u64>,

    /// Messages per sender (default: random 3-6)
    #[arg(long)]
    pub messages: Option<usize>,

    /// Print resolved configuration
    #[arg(long)]
    pub print_config: bool,

    /// Don't print metrics summary
    #[arg(long)]
    pub no_metrics: bool,

    /// Raise log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

/// Complete configuration for a simulation run.
#[derive(Debug, Clone)]
pub struct Config {
    // === Scenario ===
    pub scenario: Scenario,

    /// Messages each client sends
    pub messages: usize,

    /// Upper bound on how long to wait for deliveries
    pub duration_ms: u64,

    // === Protocol ===
    pub layout: HeaderLayout,

    /// MTU of the first hop; later hops derive from it per scenario
    pub mtu: usize,

    // === Network ===
    /// Router queue capacity (0 = unbounded)
    pub queue_size: usize,

    /// Link simulation config
    pub link: LinkConfig,

    // === Behavior ===
    pub print_config: bool,
    pub print_metrics: bool,
}

impl Config {
    /// Resolve parsed arguments into a configuration.
    ///
    /// If `--seed` is absent the seed is time-based; it is still printed
    /// with the config so the run can be repeated.
    pub fn from_args(args: &Args) -> Result<Self> {
        let seed = args.seed.unwrap_or_else(time_seed);
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let layout = HeaderLayout::default();

        let mtu = args.mtu.unwrap_or(50);
        // Room for the header plus at least the message prefix
        if mtu <= layout.header_len() {
            return Err(Error::Config(format!(
                "mtu {mtu} leaves no room for payload after a {}-byte header",
                layout.header_len()
            )));
        }

        let loss_rate = args.loss.unwrap_or(0.0);
        if !(0.0..=1.0).contains(&loss_rate) {
            return Err(Error::Config(format!(
                "loss rate {loss_rate} is outside [0.0, 1.0]"
            )));
        }

        let config = Config {
            scenario: args.scenario,
            messages: args.messages.unwrap_or_else(|| rng.gen_range(3..=6)),
            duration_ms: args.duration_ms,
            layout,
            mtu,
            queue_size: args.queue_size,
            link: LinkConfig {
                latency_ms: args.latency_ms.unwrap_or_else(|| rng.gen_range(0..=5)),
                loss_rate,
                seed,
                backpressure: args.queue_size == 0,
            },
            print_config: args.print_config,
            print_metrics: !args.no_metrics,
        };

        Ok(config)
    }

    /// Print the configuration in human-readable form.
    pub fn print(&self) {
        println!("=== Configuration ===");
        println!("Scenario: {:?}", self.scenario);
        println!("Messages per client: {}", self.messages);
        println!("Duration limit: {} ms", self.duration_ms);
        println!();
        println!("=== Protocol ===");
        println!("Header: {} bytes", self.layout.header_len());
        println!("First-hop MTU: {} bytes", self.mtu);
        println!();
        println!("=== Network Simulation ===");
        println!("Seed: {}", self.link.seed);
        println!("Latency: {} ms", self.link.latency_ms);
        println!("Loss rate: {:.2}%", self.link.loss_rate * 100.0);
        if self.queue_size == 0 {
            println!("Router queues: unbounded");
        } else {
            println!("Router queues: {} packets", self.queue_size);
        }
        println!();
    }
}

fn time_seed() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(argv: &[&str]) -> Args {
        Args::try_parse_from(std::iter::once("netfrag-sim").chain(argv.iter().copied()))
            .expect("arguments should parse")
    }

    #[test]
    fn test_zero_arguments() {
        let config = Config::from_args(&parse(&[])).unwrap();
        assert_eq!(config.scenario, Scenario::Mesh);
        assert_eq!(config.mtu, 50);
        assert!((3..=6).contains(&config.messages));
        assert!(config.print_metrics);
    }

    #[test]
    fn test_seed_makes_defaults_reproducible() {
        let a = Config::from_args(&parse(&["--seed", "42"])).unwrap();
        let b = Config::from_args(&parse(&["--seed", "42"])).unwrap();

        assert_eq!(a.messages, b.messages);
        assert_eq!(a.link, b.link);
    }

    #[test]
    fn test_explicit_values() {
        let args = parse(&[
            "fragmenting",
            "--seed",
            "1",
            "--mtu",
            "40",
            "--loss",
            "0.1",
            "--latency-ms",
            "3",
            "--queue-size",
            "8",
            "--no-metrics",
        ]);
        let config = Config::from_args(&args).unwrap();

        assert_eq!(config.scenario, Scenario::Fragmenting);
        assert_eq!(config.mtu, 40);
        assert_eq!(config.link.latency_ms, 3);
        assert_eq!(config.queue_size, 8);
        assert!(!config.link.backpressure);
        assert!(!config.print_metrics);
    }

    #[test]
    fn test_rejects_bad_values() {
        assert!(Config::from_args(&parse(&["--mtu", "12"])).is_err());
        assert!(Config::from_args(&parse(&["--loss", "1.5"])).is_err());
        assert!(Args::try_parse_from(["netfrag-sim", "ring"]).is_err());
    }
}
