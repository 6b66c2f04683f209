//! Error types for the exporter.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while collecting, evaluating, or serving a scrape.
#[derive(Error, Debug)]
pub enum ExporterError {
    /// The snapshot file could not be read.
    #[error("failed to read snapshot '{}': {source}", path.display())]
    ReadSnapshot {
        /// The snapshot file path.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The snapshot file is not a JSON array of domain stats.
    #[error("failed to parse snapshot '{}': {source}", path.display())]
    ParseSnapshot {
        /// The snapshot file path.
        path: PathBuf,
        /// The underlying JSON error.
        #[source]
        source: serde_json::Error,
    },

    /// The scrape history store failed.
    #[error("history error: {0}")]
    History(#[from] vmtrail::VmtrailError),

    /// A metric family could not be built or encoded.
    #[error("metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    /// A request parameter could not be parsed.
    #[error("invalid parameter '{name}': {reason}")]
    InvalidParameter {
        /// Parameter name.
        name: String,
        /// Why it was rejected.
        reason: String,
    },
}
