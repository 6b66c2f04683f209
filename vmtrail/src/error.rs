//! Error types for the vmtrail event store.

use std::time::Duration;

use thiserror::Error;

/// The main error type for all vmtrail operations.
///
/// This enum covers every error condition that can occur across the store
/// backends, from opening a persistent store to decoding a stored record.
#[derive(Error, Debug)]
pub enum VmtrailError {
    /// Error opening, reading, or writing a store.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Error encoding or decoding a storage key.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// Error converting an event to or from its persisted record.
    #[error("event error: {0}")]
    Event(#[from] EventError),

    /// Error in store configuration.
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
}

/// Errors raised by the storage backends.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The store directory could not be created or accessed.
    #[error("failed to access store directory '{path}': {source}")]
    DirectoryAccess {
        /// The path that could not be accessed.
        path: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The ordered key-value engine refused to open the store.
    #[error("failed to open store at '{path}': {source}")]
    Open {
        /// The store path.
        path: String,
        /// The underlying engine error.
        #[source]
        source: rocksdb::Error,
    },

    /// A synced write or batched delete failed.
    #[error("write failed: {source}")]
    Write {
        /// The underlying engine error.
        #[source]
        source: rocksdb::Error,
    },

    /// Iterating the key space failed.
    #[error("read failed: {source}")]
    Read {
        /// The underlying engine error.
        #[source]
        source: rocksdb::Error,
    },
}

/// Errors raised by the key codec.
#[derive(Error, Debug)]
pub enum CodecError {
    /// A stored key does not follow the `<seconds>.<sequence>` layout.
    #[error("invalid key '{key}': {reason}")]
    InvalidKey {
        /// The offending key, lossily rendered as UTF-8.
        key: String,
        /// What was wrong with it.
        reason: String,
    },
}

/// Errors raised when converting events to and from persisted records.
#[derive(Error, Debug)]
pub enum EventError {
    /// The payload could not be serialized.
    #[error("failed to serialize payload: {source}")]
    Serialize {
        /// The underlying serde error.
        #[source]
        source: serde_json::Error,
    },

    /// A value passed as a payload did not serialize to a JSON object.
    #[error("payload must be a JSON object, got {kind}")]
    NotAnObject {
        /// The JSON kind that was produced instead.
        kind: &'static str,
    },

    /// A persisted record could not be parsed.
    #[error("corrupted record: {source}")]
    CorruptedRecord {
        /// The underlying serde error.
        #[source]
        source: serde_json::Error,
    },

    /// A persisted record has a missing or unparsable `timestamp` field.
    #[error("invalid record timestamp: {reason}")]
    InvalidTimestamp {
        /// Description of the problem.
        reason: String,
    },
}

/// Errors raised while validating store configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The retention window is zero or too large to represent.
    #[error("invalid retention window {window:?}: {reason}")]
    InvalidWindow {
        /// The rejected window.
        window: Duration,
        /// Why it was rejected.
        reason: String,
    },

    /// A human-readable duration string could not be parsed.
    #[error("invalid duration '{input}': {reason}")]
    InvalidDuration {
        /// The rejected input.
        input: String,
        /// Why it was rejected.
        reason: String,
    },
}

/// Type alias for `Result<T, VmtrailError>`.
pub type Result<T> = std::result::Result<T, VmtrailError>;
