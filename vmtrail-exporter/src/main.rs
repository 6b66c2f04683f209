//! vmtrail-exporter: serves VM metrics to Prometheus and keeps a scrape history.

use std::net::TcpListener;
use std::path::PathBuf;

use clap::Parser;
use tracing_subscriber::EnvFilter;
use vmtrail::{StoreConfig, parse_duration};
use vmtrail_exporter::{Exporter, JsonFileCollector, api};

/// vmtrail-exporter: pull-based VM metrics exporter.
#[derive(Parser)]
#[command(name = "vmtrail-exporter", version, about)]
struct Cli {
    /// JSON file holding the latest array of per-VM stats.
    #[arg(long)]
    stats_file: PathBuf,

    /// Address to listen on.
    #[arg(long, default_value = "0.0.0.0")]
    listen: String,

    /// Port for the HTTP endpoints.
    #[arg(long, default_value = "9177")]
    port: u16,

    /// How long a vanished VM is reported down (e.g. 10m).
    #[arg(long, default_value = "10m")]
    grace_period: String,

    /// Directory of the persistent scrape history. In-memory if omitted.
    #[arg(long)]
    history_path: Option<PathBuf>,

    /// Scrape history retention window (e.g. 1h, 1d).
    #[arg(long, default_value = "1h")]
    history_window: String,

    /// Disable scrape history entirely.
    #[arg(long, conflicts_with = "history_path")]
    no_history: bool,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        tracing::error!("exporter failed: {e}");
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let grace = parse_duration(&cli.grace_period)?;
    let collector = JsonFileCollector::new(&cli.stats_file);
    let stats_file = collector.path().display().to_string();
    let mut exporter = Exporter::new(collector, grace);

    if !cli.no_history {
        let window = parse_duration(&cli.history_window)?;
        let config = match &cli.history_path {
            Some(path) => StoreConfig::persistent(path, window),
            None => StoreConfig::memory(window),
        };
        exporter = exporter.with_history(config.open()?);
    }

    let addr = format!("{}:{}", cli.listen, cli.port);
    let listener = TcpListener::bind(&addr)?;
    tracing::info!(
        %addr,
        %stats_file,
        grace_secs = exporter.grace().as_secs(),
        history = exporter.has_history(),
        "exporter listening"
    );

    api::serve(&listener, &mut exporter);
    Ok(())
}
