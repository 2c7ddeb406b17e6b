use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use speedlog::{
    logging, Config, CycleStatus, ErrorLogEntry, HttpSpeedTest, MeasurementQueries,
    MeasurementReader, MeasurementResult, MeasurementRunner, MeasurementStore,
};
use std::path::PathBuf;
use tracing::info;

/// Record network speed measurements in SQLite.
#[derive(Parser, Debug)]
#[command(name = "speedlog", version, about)]
struct Cli {
    /// Config file (default: platform config dir / speedlog / config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Database file, overrides `store.path`
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create the measurement tables (safe to repeat)
    Init,
    /// Run one measurement cycle and record its outcome
    Run,
    /// Show complete measurements
    Results {
        /// A single measurement
        #[arg(long, conflicts_with_all = ["from", "to"])]
        id: Option<i64>,
        /// Inclusive lower timestamp bound (ISO-8601, compared as text)
        #[arg(long, requires = "to")]
        from: Option<String>,
        /// Inclusive upper timestamp bound
        #[arg(long, requires = "from")]
        to: Option<String>,
        #[arg(long)]
        json: bool,
    },
    /// Show failed measurement cycles
    Errors {
        #[arg(long, requires = "to")]
        from: Option<String>,
        #[arg(long, requires = "from")]
        to: Option<String>,
        #[arg(long)]
        json: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?;
    logging::init(&config.logging.level, cli.verbose);

    let db_path = match cli.db {
        Some(path) => path,
        None => config.db_path()?,
    };

    match cli.command {
        Command::Init => {
            let store = MeasurementStore::open(&db_path)
                .with_context(|| format!("opening {}", db_path.display()))?;
            store.initialize_schema()?;
            info!(path = %db_path.display(), "schema initialized");
        }
        Command::Run => {
            let mut store = MeasurementStore::open(&db_path)
                .with_context(|| format!("opening {}", db_path.display()))?;
            if config.store.auto_init {
                store.initialize_schema()?;
            }
            let speedtest = HttpSpeedTest::new(config.speedtest.clone())?;
            let outcome = MeasurementRunner::new(&mut store, speedtest)
                .with_server_filter(config.speedtest.server_filter.clone())
                .run_cycle()
                .context("recording measurement cycle")?;

            match outcome.status {
                CycleStatus::Succeeded(r) => println!(
                    "#{}: down {:.2} Mbit/s, up {:.2} Mbit/s, ping {:.1} ms",
                    outcome.measurement_id,
                    mbit(r.download_rate),
                    mbit(r.upload_rate),
                    r.ping
                ),
                CycleStatus::Failed(message) => {
                    println!("#{}: failed: {message}", outcome.measurement_id)
                }
            }
        }
        Command::Results { id, from, to, json } => {
            let reader = open_reader(&db_path)?;
            let results: Vec<MeasurementResult> = match (id, from, to) {
                (Some(id), _, _) => {
                    let found = reader.get_result(id)?;
                    if found.is_none() {
                        eprintln!("no complete result for measurement {id}");
                    }
                    found.into_iter().collect()
                }
                (None, Some(from), Some(to)) => reader.results_in_range(&from, &to)?,
                _ => reader.all_results()?,
            };
            if json {
                println!("{}", serde_json::to_string_pretty(&results)?);
            } else {
                print_results(&results);
            }
        }
        Command::Errors { from, to, json } => {
            let reader = open_reader(&db_path)?;
            let errors = match (from, to) {
                (Some(from), Some(to)) => reader.errors_in_range(&from, &to)?,
                _ => reader.all_errors()?,
            };
            if json {
                println!("{}", serde_json::to_string_pretty(&errors)?);
            } else {
                print_errors(&errors);
            }
        }
    }

    Ok(())
}

fn open_reader(db_path: &std::path::Path) -> Result<MeasurementReader> {
    MeasurementReader::open(db_path)
        .with_context(|| format!("opening {} read-only", db_path.display()))
}

fn mbit(bytes_per_sec: f64) -> f64 {
    bytes_per_sec * 8.0 / 1_000_000.0
}

fn print_results(results: &[MeasurementResult]) {
    println!(
        "{:>6}  {:<26}  {:>12}  {:>12}  {:>9}",
        "id", "timestamp", "down Mbit/s", "up Mbit/s", "ping ms"
    );
    for r in results {
        println!(
            "{:>6}  {:<26}  {:>12.2}  {:>12.2}  {:>9.1}",
            r.measurement_id,
            r.timestamp,
            mbit(r.download_rate),
            mbit(r.upload_rate),
            r.ping
        );
    }
}

fn print_errors(errors: &[ErrorLogEntry]) {
    for e in errors {
        println!("{:>6}  {:<26}  {}", e.measurement_id, e.timestamp, e.message);
    }
}
