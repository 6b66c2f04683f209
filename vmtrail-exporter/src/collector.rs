//! Source of per-VM snapshots.
//!
//! The exporter does not talk to a hypervisor itself. A [`Collector`] hands it
//! already-structured [`DomainStats`], one per VM, on every scrape.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ExporterError;

/// One VM as reported by a single collection pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainStats {
    /// Stable VM identity.
    pub uuid: String,
    /// Human-readable domain name, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Hypervisor state name, e.g. `Running`, `Paused`, `Shutoff`.
    pub state: String,
    /// CPU accounting.
    #[serde(default)]
    pub cpu: CpuStats,
    /// Memory accounting.
    #[serde(default)]
    pub memory: MemoryStats,
    /// Network devices.
    #[serde(default)]
    pub network: NetworkStats,
    /// Block devices.
    #[serde(default)]
    pub diskio: Vec<DiskStats>,
}

impl DomainStats {
    /// Returns `true` if the hypervisor reports the VM as running.
    pub fn is_running(&self) -> bool {
        self.state == "Running"
    }
}

/// CPU time counters in milliseconds.
///
/// Every field is optional: hypervisors omit what they cannot account.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CpuStats {
    /// Overall CPU time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu_time: Option<u64>,
    /// System CPU time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_time: Option<u64>,
    /// User CPU time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_time: Option<u64>,
    /// Per virtual CPU breakdown.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub per_cpu_usage: Option<Vec<VcpuStats>>,
}

/// Time spent on one virtual CPU.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VcpuStats {
    /// Virtual CPU index.
    pub index: u32,
    /// CPU time in milliseconds.
    pub vcpu_time: u64,
}

/// Memory accounting.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemoryStats {
    /// Memory currently assigned to the VM, in bytes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actual: Option<u64>,
}

/// Network devices of a VM.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NetworkStats {
    /// One entry per interface.
    #[serde(default)]
    pub interfaces: Vec<InterfaceStats>,
}

/// Cumulative counters of one network interface.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InterfaceStats {
    /// Interface name, e.g. `vnet0`.
    pub name: String,
    /// Bytes received.
    pub rx_bytes: u64,
    /// Packets received.
    pub rx_packets: u64,
    /// Packets dropped while receiving.
    pub rx_dropped: u64,
    /// Errors while receiving.
    pub rx_errors: u64,
    /// Bytes transmitted.
    pub tx_bytes: u64,
    /// Packets transmitted.
    pub tx_packets: u64,
    /// Packets dropped while transmitting.
    pub tx_dropped: u64,
    /// Errors while transmitting.
    pub tx_errors: u64,
}

/// Cumulative counters of one block device.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiskStats {
    /// Device name, e.g. `vda`.
    pub name: String,
    /// Read requests.
    pub rd_reqs: u64,
    /// Bytes read.
    pub rd_bytes: u64,
    /// Write requests.
    pub wr_reqs: u64,
    /// Bytes written.
    pub wr_bytes: u64,
}

/// Produces one [`DomainStats`] per VM on each call.
pub trait Collector {
    /// Runs one collection pass.
    ///
    /// # Errors
    ///
    /// Returns an error if the snapshot source cannot be read.
    fn collect(&mut self) -> Result<Vec<DomainStats>, ExporterError>;
}

/// Reads a JSON array of [`DomainStats`] from a file on every collection.
///
/// Whatever agent samples the hypervisor rewrites the file; the exporter
/// only ever sees complete snapshots if that agent replaces it atomically.
#[derive(Debug, Clone)]
pub struct JsonFileCollector {
    path: PathBuf,
}

impl JsonFileCollector {
    /// Creates a collector over `path`. The file need not exist yet.
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// Returns the snapshot file path.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Collector for JsonFileCollector {
    fn collect(&mut self) -> Result<Vec<DomainStats>, ExporterError> {
        let data = std::fs::read(&self.path).map_err(|source| ExporterError::ReadSnapshot {
            path: self.path.clone(),
            source,
        })?;
        serde_json::from_slice(&data).map_err(|source| ExporterError::ParseSnapshot {
            path: self.path.clone(),
            source,
        })
    }
}
