//! Pull-based VM metrics exporter.
//!
//! Each `GET /metrics` runs one scrape: the [`Collector`] yields a snapshot of
//! every VM, the snapshot is mapped onto the metric catalogue, VMs that have
//! vanished are reported down until their grace period ends, and the raw
//! snapshot is recorded in an optional [`vmtrail`] history store.

pub mod api;
pub mod collector;
pub mod error;
pub mod exporter;
pub mod metrics;
pub mod staleness;

pub use collector::{Collector, DomainStats, JsonFileCollector};
pub use error::ExporterError;
pub use exporter::{Exporter, evaluate_scrape};
pub use metrics::MetricSet;
pub use staleness::{DEFAULT_GRACE_PERIOD, LastSeen};
