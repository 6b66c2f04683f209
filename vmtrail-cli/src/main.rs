//! CLI for vmtrail event stores.
//!
//! Provides commands for inspecting, querying, expiring, and benchmarking
//! persistent stores.

use std::path::Path;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use chrono::{DateTime, TimeDelta, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;
use vmtrail::config::DEFAULT_PERSISTENT_WINDOW;
use vmtrail::event::format_timestamp;
use vmtrail::{
    DEFAULT_LIMIT, EventKey, EventStore, InMemoryEventStore, PersistentEventStore, payload_from,
};

/// vmtrail: bounded, time-ordered retention of VM metric snapshots.
#[derive(Parser)]
#[command(name = "vmtrail", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Available CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Display record count, key range, and disk usage.
    Info {
        /// Path to the store directory.
        store_path: PathBuf,
    },

    /// Print recorded events from a store.
    Query {
        /// Path to the store directory.
        store_path: PathBuf,

        /// How far back to read (e.g., "1h", "30m", "7d").
        #[arg(long, default_value = "1h")]
        range: String,

        /// Maximum number of events (0 = unlimited).
        #[arg(long, default_value_t = DEFAULT_LIMIT)]
        limit: usize,

        /// Output format.
        #[arg(long, default_value = "csv")]
        format: OutputFormat,
    },

    /// Evict events older than the retention window.
    Expire {
        /// Path to the store directory.
        store_path: PathBuf,

        /// Retention window (e.g., "1h", "1d").
        #[arg(long, default_value = "1d")]
        window: String,
    },

    /// Run a put-path microbenchmark against both backends.
    Bench {
        /// Number of events to write per backend.
        #[arg(long, default_value = "10000")]
        points: u64,
    },
}

/// Output format for query results.
#[derive(Clone, ValueEnum)]
enum OutputFormat {
    /// Comma-separated values.
    Csv,
    /// JSON array of objects.
    Json,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Info { store_path } => cmd_info(&store_path),
        Commands::Query {
            store_path,
            range,
            limit,
            format,
        } => cmd_query(&store_path, &range, limit, &format),
        Commands::Expire { store_path, window } => cmd_expire(&store_path, &window),
        Commands::Bench { points } => cmd_bench(points),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

/// Opens an existing store; never creates one.
fn open_existing(
    store_path: &Path,
    window: Duration,
) -> Result<PersistentEventStore, Box<dyn std::error::Error>> {
    if !store_path.is_dir() {
        return Err(format!("No store found at '{}'", store_path.display()).into());
    }
    Ok(PersistentEventStore::open(store_path, window)?)
}

/// Implements `vmtrail info <store_path>`.
fn cmd_info(store_path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    // Neither summary nor scan expires, so the window here is irrelevant.
    let store = open_existing(store_path, DEFAULT_PERSISTENT_WINDOW)?;
    let summary = store.summary()?;

    println!("Store: {}", store.path().display());
    println!();
    println!("Entries: {}", summary.entries);

    if let (Some(oldest), Some(newest)) = (summary.oldest, summary.newest) {
        println!("Oldest:  {oldest} ({})", describe_key(oldest));
        println!("Newest:  {newest} ({})", describe_key(newest));
        println!(
            "Span:    {}",
            format_duration_secs(newest.secs.saturating_sub(oldest.secs))
        );
    }

    println!();
    let total_size = dir_size(store_path)?;
    println!("Total disk usage: {} ({total_size} bytes)", format_bytes(total_size));

    Ok(())
}

/// Implements `vmtrail query <store_path>`.
///
/// Reads without expiring; eviction is left to `vmtrail expire`.
fn cmd_query(
    store_path: &Path,
    range: &str,
    limit: usize,
    format: &OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let range = TimeDelta::from_std(vmtrail::parse_duration(range)?)?;
    let store = open_existing(store_path, DEFAULT_PERSISTENT_WINDOW)?;

    let start = Utc::now()
        .checked_sub_signed(range)
        .unwrap_or(DateTime::<Utc>::MIN_UTC);
    let events = store.scan(Some(start), None, limit)?;

    match format {
        OutputFormat::Csv => {
            println!("# store={}, events={}", store_path.display(), events.len());
            println!("timestamp,payload");
            for event in &events {
                let payload = serde_json::to_string(&event.payload)?;
                println!("{},{}", format_timestamp(event.timestamp), csv_field(&payload));
            }
        }
        OutputFormat::Json => {
            let output = serde_json::json!({
                "store": store_path.display().to_string(),
                "count": events.len(),
                "events": events,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }

    Ok(())
}

/// Implements `vmtrail expire <store_path>`.
fn cmd_expire(store_path: &Path, window: &str) -> Result<(), Box<dyn std::error::Error>> {
    let window = vmtrail::parse_duration(window)?;
    let mut store = open_existing(store_path, window)?;

    let started = Instant::now();
    let removed = store.expire()?;
    let remaining = store.summary()?.entries;

    println!(
        "Expired {removed} events older than {} in {:.3?} ({remaining} remaining)",
        format_duration_secs(store.window().as_secs()),
        started.elapsed(),
    );
    Ok(())
}

/// Implements `vmtrail bench`.
fn cmd_bench(points: u64) -> Result<(), Box<dyn std::error::Error>> {
    println!("vmtrail put-path benchmark");
    println!("  Points: {points}");
    println!();

    let mut memory = InMemoryEventStore::new(Duration::from_secs(3600));
    report("in-memory", points, bench_puts(&mut memory, points)?);

    let temp_dir = std::env::temp_dir().join("vmtrail_bench");
    let _ = std::fs::remove_dir_all(&temp_dir);
    {
        let mut persistent = PersistentEventStore::open(&temp_dir, Duration::from_secs(3600))?;
        report("persistent (synced)", points, bench_puts(&mut persistent, points)?);
    }

    // Clean up
    let _ = std::fs::remove_dir_all(&temp_dir);

    Ok(())
}

fn bench_puts<S: EventStore>(
    store: &mut S,
    points: u64,
) -> Result<Duration, Box<dyn std::error::Error>> {
    let start = Instant::now();
    for i in 0..points {
        let payload = payload_from(&serde_json::json!({
            "uuid": format!("vm-{}", i % 30),
            "state": "Running",
            "cpu": {"cpu_time": i},
        }))?;
        store.put(payload)?;
    }
    Ok(start.elapsed())
}

#[allow(clippy::cast_precision_loss)] // Benchmark stats are fine with f64 precision
fn report(label: &str, points: u64, elapsed: Duration) {
    let us_per_put = elapsed.as_secs_f64() * 1e6 / points.max(1) as f64;
    let puts_per_sec = points as f64 / elapsed.as_secs_f64();

    println!("Results ({label}):");
    println!("  Elapsed: {elapsed:.3?}");
    println!("  Avg latency: {us_per_put:.1} us/put");
    println!("  Throughput: {puts_per_sec:.0} puts/sec");
    println!();
}

/// Decoded wall-clock second of a key.
fn describe_key(key: EventKey) -> String {
    i64::try_from(key.secs)
        .ok()
        .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0))
        .map_or_else(|| "out of range".to_string(), |t| t.to_rfc3339())
}

/// Quotes a CSV field if it contains separators or quotes.
fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

/// Formats seconds as a human-readable duration.
fn format_duration_secs(secs: u64) -> String {
    if secs >= 86400 && secs.is_multiple_of(86400) {
        format!("{}d", secs / 86400)
    } else if secs >= 3600 && secs.is_multiple_of(3600) {
        format!("{}h", secs / 3600)
    } else if secs >= 60 && secs.is_multiple_of(60) {
        format!("{}m", secs / 60)
    } else {
        format!("{secs}s")
    }
}

/// Formats a byte count as a human-readable string.
#[allow(clippy::cast_precision_loss)] // Byte counts are display-only
fn format_bytes(bytes: u64) -> String {
    if bytes >= 1_048_576 {
        format!("{:.1} MB", bytes as f64 / 1_048_576.0)
    } else if bytes >= 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{bytes} B")
    }
}

/// Recursively calculates directory size.
fn dir_size(path: &Path) -> Result<u64, Box<dyn std::error::Error>> {
    let mut total = 0;
    if path.is_dir() {
        for entry in std::fs::read_dir(path)? {
            let entry = entry?;
            let path = entry.path();
            if path.is_dir() {
                total += dir_size(&path)?;
            } else {
                total += entry.metadata()?.len();
            }
        }
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::tempdir;
    use vmtrail::ManualClock;

    #[test]
    fn test_csv_field_quotes_json() {
        assert_eq!(csv_field("plain"), "plain");
        assert_eq!(csv_field(r#"{"a":1,"b":2}"#), r#""{""a"":1,""b"":2}""#);
    }

    #[test]
    fn test_format_duration_secs() {
        assert_eq!(format_duration_secs(86400), "1d");
        assert_eq!(format_duration_secs(7200), "2h");
        assert_eq!(format_duration_secs(90), "90s");
        assert_eq!(format_duration_secs(0), "0s");
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
        assert_eq!(format_bytes(3 * 1_048_576), "3.0 MB");
    }

    #[test]
    fn test_describe_key() {
        assert_eq!(describe_key(EventKey::new(0, 0)), "1970-01-01T00:00:00+00:00");
        assert_eq!(describe_key(EventKey::new(u64::MAX, 0)), "out of range");
    }

    #[test]
    fn test_open_existing_refuses_to_create() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("missing");
        assert!(open_existing(&missing, Duration::from_secs(60)).is_err());
        assert!(!missing.exists());
    }

    /// Writes `count` events stamped in 2023, far outside any default window.
    fn old_store(path: &Path, count: u64) {
        let clock = ManualClock::new(Utc.timestamp_opt(1_700_000_000, 0).unwrap());
        let mut store =
            PersistentEventStore::open_with_clock(path, Duration::from_secs(3600), clock.clone())
                .unwrap();
        for i in 0..count {
            store.put(payload_from(&serde_json::json!({"i": i})).unwrap()).unwrap();
            clock.advance(Duration::from_secs(1));
        }
    }

    #[test]
    fn test_query_does_not_expire() {
        let dir = tempdir().unwrap();
        old_store(dir.path(), 5);

        cmd_query(dir.path(), "3650d", 0, &OutputFormat::Json).unwrap();
        cmd_query(dir.path(), "1h", 2, &OutputFormat::Csv).unwrap();

        let store = open_existing(dir.path(), DEFAULT_PERSISTENT_WINDOW).unwrap();
        assert_eq!(store.summary().unwrap().entries, 5);
    }

    #[test]
    fn test_expire_evicts_by_window() {
        let dir = tempdir().unwrap();
        old_store(dir.path(), 3);

        cmd_expire(dir.path(), "1d").unwrap();

        let store = open_existing(dir.path(), DEFAULT_PERSISTENT_WINDOW).unwrap();
        assert_eq!(store.summary().unwrap().entries, 0);
    }
}
