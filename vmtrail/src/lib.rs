//! # vmtrail
//!
//! Bounded, time-ordered retention of virtualization metric snapshots.
//!
//! vmtrail keeps a rolling log of raw snapshot events next to a pull-based
//! metrics exporter, so that recent history can be range-queried after the
//! fact. Two interchangeable backends implement the same [`EventStore`]
//! contract: an ephemeral in-memory store and a durable store over RocksDB.
//!
//! **Status**: This crate is in early development. The API is not yet stable.
//!
//! ## Key Properties
//!
//! - Monotonic, lexicographically sortable keys for range scans
//! - Bounded retention window fixed at construction
//! - Inclusive `[start, stop]` query bounds on every backend
//! - Synchronous, call-triggered eviction: no background threads
//! - Synced writes and atomic batched expiry on the durable backend
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use vmtrail::{EventStore, InMemoryEventStore, payload_from};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Keep one minute of history
//! let mut store = InMemoryEventStore::new(Duration::from_secs(60));
//!
//! store.put(payload_from(&serde_json::json!({"uuid": "vm-1", "state": "Running"}))?)?;
//!
//! // Up to ten events from the epoch until now
//! for event in store.get(None, None, vmtrail::DEFAULT_LIMIT)? {
//!     println!("{}: {:?}", event.timestamp, event.payload);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - [`store`]: The `EventStore` contract and its semantics
//! - [`memory`]: In-memory backend
//! - [`persistent`]: RocksDB backend
//! - [`codec`]: Sortable key encoding
//! - [`event`]: Event and payload types, persisted record format
//! - [`clock`]: Injectable time sources
//! - [`config`]: Backend selection and duration parsing
//! - [`error`]: Error types

pub mod clock;
pub mod codec;
pub mod config;
pub mod error;
pub mod event;
pub mod memory;
pub mod persistent;
pub mod store;

// Re-export primary API types at crate root for convenience.
pub use clock::{Clock, ManualClock, SystemClock};
pub use codec::EventKey;
pub use config::{Backend, StoreConfig, parse_duration};
pub use error::{Result, VmtrailError};
pub use event::{Event, Payload, payload_from};
pub use memory::InMemoryEventStore;
pub use persistent::{PersistentEventStore, StoreSummary};
pub use store::{DEFAULT_LIMIT, EventStore};
