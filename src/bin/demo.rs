//! Combined progress demo.
//!
//! Spawns one simulated worker per source, each stepping towards a common maximum at a
//! random pace, and periodically prints every source's last value next to the combined
//! value until all workers finish.

use std::{
    process::ExitCode,
    thread::{self, JoinHandle},
    time::Duration,
};

use clap::Parser;
use combined_progress::{CombinedProgress, Progress, ProgressError, SimulationConfig, simulate};
use rand::{Rng, SeedableRng, rngs::StdRng};
use tracing::{Level, debug, error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Combined progress demo - average many concurrent progress sources into one
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Number of progress sources (labelled A, B, C, ...)
    #[arg(
        short,
        long,
        default_value_t = 5,
        value_parser = clap::value_parser!(u8).range(1..=26)
    )]
    sources: u8,

    /// Value every worker reports last
    #[arg(short, long, default_value_t = 500)]
    max: u64,

    /// Largest random step a worker adds per report
    #[arg(long, default_value_t = 7, value_parser = clap::value_parser!(u64).range(1..))]
    max_step: u64,

    /// Refresh interval of the printout, in milliseconds
    #[arg(long, default_value_t = 50, value_name = "MS")]
    tick_ms: u64,

    /// Seed for the random step sizes and delays
    #[arg(long)]
    seed: Option<u64>,

    /// Enable verbose logging output
    #[arg(short, long)]
    verbose: bool,
}

fn init_logging(args: &Args) {
    let default = if args.verbose { Level::DEBUG } else { Level::WARN };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default.as_str()));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .finish();

    if tracing::subscriber::set_global_default(subscriber).is_err() {
        eprintln!("tracing subscriber already installed");
    }
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(&args);
    debug!(?args, "starting demo");

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("demo failed: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: &Args) -> Result<(), ProgressError> {
    let mut rng = args.seed.map_or_else(StdRng::from_entropy, StdRng::seed_from_u64);

    let sources: Vec<Progress<u64>> = (0..args.sources)
        .map(|i| Progress::new(char::from(b'A' + i).to_string()))
        .collect();

    let combined = CombinedProgress::builder()
        .name("average")
        .sources(&sources)
        .build()?;

    let workers: Vec<JoinHandle<()>> = sources
        .iter()
        .map(|source| {
            let config = SimulationConfig {
                step: rng.gen_range(1..=args.max_step),
                delay: Duration::from_millis(100 * rng.gen_range(1..7)),
                max: args.max,
            };
            info!(source = %source.get_name(), ?config, "starting worker");

            let source = source.clone();
            thread::spawn(move || simulate(&source, &config))
        })
        .collect();

    let tick = Duration::from_millis(args.tick_ms);
    loop {
        thread::sleep(tick);
        print_frame(&combined);
        if workers.iter().all(JoinHandle::is_finished) {
            break;
        }
    }

    for worker in workers {
        if worker.join().is_err() {
            error!("worker thread panicked");
        }
    }

    println!("All progress sources completed.");
    Ok(())
}

fn print_frame(combined: &CombinedProgress<u64>) {
    let snapshot = combined.snapshot();

    // Clear screen, cursor home.
    print!("\x1B[2J\x1B[H");
    for source in snapshot.sources() {
        println!("{} is reporting: {}", source.name(), source.value());
    }
    println!("Average progress = {}", snapshot.combined());
}
