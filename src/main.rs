use clap::Parser;
use hopmate::application::engine::{CarpoolEngine, CarpoolServices};
use hopmate::config::EngineConfig;
use hopmate::domain::ports::{RequestStoreRef, TripStoreRef};
use hopmate::infrastructure::clock::SteppingClock;
use hopmate::infrastructure::in_memory::{
    InMemoryLocationStore, InMemoryPassengerDirectory, InMemoryPenaltyLedger,
    InMemoryRequestStore, InMemoryTripStore,
};
use hopmate::infrastructure::notify::LogNotifier;
use hopmate::interfaces::csv::command_reader::CommandReader;
use hopmate::interfaces::csv::report_writer::ReportWriter;
use hopmate::interfaces::csv::scenario::ScenarioRunner;
use miette::{IntoDiagnostic, Result};
use std::fs::File;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Input commands CSV file
    input: PathBuf,

    /// Path to persistent database (optional). If provided, uses RocksDB.
    #[arg(long)]
    db_path: Option<PathBuf>,

    /// Retries for a store read that failed transiently.
    #[arg(long, default_value_t = 3)]
    read_retries: u32,

    /// Seconds between waiting-list sweeps.
    #[arg(long, default_value_t = 3600)]
    sweep_interval_secs: u64,

    /// Run the waiting-list sweeper while processing, plus a final pass.
    #[arg(long)]
    sweep: bool,
}

#[cfg(feature = "storage-rocksdb")]
fn open_stores(db_path: Option<PathBuf>) -> Result<(TripStoreRef, RequestStoreRef)> {
    use hopmate::infrastructure::rocksdb::RocksDBStore;

    if let Some(db_path) = db_path {
        info!(path = %db_path.display(), "using RocksDB storage");
        let store = RocksDBStore::open(db_path).into_diagnostic()?;
        return Ok((Arc::new(store.clone()), Arc::new(store)));
    }
    Ok(in_memory_stores())
}

#[cfg(not(feature = "storage-rocksdb"))]
fn open_stores(db_path: Option<PathBuf>) -> Result<(TripStoreRef, RequestStoreRef)> {
    if db_path.is_some() {
        eprintln!(
            "WARNING: Persistent storage requested via --db-path, but 'storage-rocksdb' feature is not enabled. Falling back to In-Memory storage."
        );
    }
    Ok(in_memory_stores())
}

fn in_memory_stores() -> (TripStoreRef, RequestStoreRef) {
    (
        Arc::new(InMemoryTripStore::new()),
        Arc::new(InMemoryRequestStore::new()),
    )
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    let config = EngineConfig {
        read_retries: cli.read_retries,
        sweep_interval: Duration::from_secs(cli.sweep_interval_secs.max(1)),
        ..EngineConfig::default()
    };

    let (trips, requests) = open_stores(cli.db_path)?;
    let passengers = InMemoryPassengerDirectory::new();
    let clock = Arc::new(SteppingClock::default());
    let engine = Arc::new(CarpoolEngine::new(
        CarpoolServices {
            trips,
            requests,
            locations: Arc::new(InMemoryLocationStore::new()),
            passengers: Arc::new(passengers.clone()),
            notifier: Arc::new(LogNotifier),
            penalties: Arc::new(InMemoryPenaltyLedger::new()),
            clock: clock.clone(),
        },
        config,
    ));

    let sweeper = cli.sweep.then(|| engine.sweeper().spawn());

    // Process commands
    let file = File::open(cli.input).into_diagnostic()?;
    let reader = CommandReader::new(file);
    let mut runner = ScenarioRunner::new(engine.clone(), passengers, clock);
    for command in reader.commands() {
        match command {
            Ok(command) => {
                if let Err(e) = runner.execute(&command).await {
                    eprintln!(
                        "Error processing command {:?} on trip {}: {}",
                        command.op, command.trip, e
                    );
                }
            }
            Err(e) => {
                eprintln!("Error reading command: {}", e);
            }
        }
    }

    if let Some(handle) = sweeper {
        handle.shutdown().await;
        let promoted = engine.sweeper().run_once().await.into_diagnostic()?;
        info!(promoted, "final waiting-list sweep done");
    }

    // Output final state
    let rows = runner.report().await.into_diagnostic()?;
    let stdout = io::stdout();
    let mut writer = ReportWriter::new(stdout.lock());
    writer.write_rows(rows).into_diagnostic()?;

    Ok(())
}
