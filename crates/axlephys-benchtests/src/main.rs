mod bench_perf;
mod scenarios;

use anyhow::Result;
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "axlephys-benchtests", about = "Scenario runs and step-latency benchmarks")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the deterministic showcase scenarios and print their hashes.
    Scenarios,
    /// Time world steps over a spring lattice and report percentiles.
    Perf {
        /// Worker threads for the solver pool.
        #[arg(long, default_value_t = 1)]
        threads: usize,
        /// Simulated ticks.
        #[arg(long, default_value_t = 400)]
        ticks: usize,
        /// Spring pairs in the lattice.
        #[arg(long, default_value_t = 256)]
        pairs: usize,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    match Cli::parse().command {
        Command::Scenarios => scenarios::run(),
        Command::Perf { threads, ticks, pairs } => bench_perf::run(threads, ticks, pairs),
    }
}
