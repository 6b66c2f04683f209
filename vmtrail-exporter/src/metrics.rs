//! VM metric catalogue and text exposition.
//!
//! A [`MetricSet`] is a fresh `prometheus` registry per scrape: one vector per
//! catalogue entry, filled from the collected [`DomainStats`]. Nothing carries
//! over between scrapes, so a series that disappears from the snapshot
//! disappears from the exposition too (the staleness policy re-adds `vm_up`
//! for VMs that are still inside their grace period).

use std::collections::HashMap;

use prometheus::proto::{self, MetricType};
use prometheus::{Encoder, GaugeVec, IntCounterVec, Opts, Registry, TextEncoder};

use crate::collector::DomainStats;
use crate::error::ExporterError;

/// Prometheus metric type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    /// Value that can go up and down.
    Gauge,
    /// Monotonically increasing total.
    Counter,
}

/// Static description of one metric family.
#[derive(Debug, PartialEq, Eq)]
pub struct MetricDesc {
    /// Metric name.
    pub name: &'static str,
    /// Help text.
    pub help: &'static str,
    /// Metric type.
    pub kind: MetricKind,
    /// Label names, in sample order.
    pub labels: &'static [&'static str],
}

const VM: &[&str] = &["uuid"];
const VM_INTERFACE: &[&str] = &["uuid", "interface"];
const VM_DEVICE: &[&str] = &["uuid", "device"];
const VM_CPU: &[&str] = &["uuid", "cpu"];

const fn gauge(
    name: &'static str,
    help: &'static str,
    labels: &'static [&'static str],
) -> MetricDesc {
    MetricDesc {
        name,
        help,
        kind: MetricKind::Gauge,
        labels,
    }
}

const fn counter(
    name: &'static str,
    help: &'static str,
    labels: &'static [&'static str],
) -> MetricDesc {
    MetricDesc {
        name,
        help,
        kind: MetricKind::Counter,
        labels,
    }
}

/// Liveness signal.
pub const VM_UP: MetricDesc = gauge(
    "vm_up",
    "0 if the VM is down, 1 if the VM is up and running",
    VM,
);
/// Overall CPU time.
pub const VM_CPU_TOTAL: MetricDesc = counter(
    "vm_cpu_milliseconds_total",
    "Overall VM CPU time in milliseconds",
    VM,
);
/// System CPU time.
pub const VM_CPU_SYSTEM: MetricDesc = counter(
    "vm_cpu_system_milliseconds_total",
    "Overall VM System CPU time in milliseconds",
    VM,
);
/// User CPU time.
pub const VM_CPU_USER: MetricDesc = counter(
    "vm_cpu_user_milliseconds_total",
    "Overall VM User CPU time in milliseconds",
    VM,
);
/// Assigned memory.
pub const VM_MEMORY: MetricDesc = gauge("vm_memory_bytes", "VM Memory in bytes", VM);

/// Network receive bytes.
pub const NET_RX_BYTES: MetricDesc = counter(
    "vm_network_receive_bytes_total",
    "Cumulative count of bytes received",
    VM_INTERFACE,
);
/// Network receive packets.
pub const NET_RX_PACKETS: MetricDesc = counter(
    "vm_network_receive_packets_total",
    "Cumulative count of packets received",
    VM_INTERFACE,
);
/// Network receive drops.
pub const NET_RX_DROPPED: MetricDesc = counter(
    "vm_network_receive_dropped_packets_total",
    "Cumulative count of packets dropped while receiving",
    VM_INTERFACE,
);
/// Network receive errors.
pub const NET_RX_ERRORS: MetricDesc = counter(
    "vm_network_receive_errors_total",
    "Cumulative count of errors encountered while receiving",
    VM_INTERFACE,
);
/// Network transmit bytes.
pub const NET_TX_BYTES: MetricDesc = counter(
    "vm_network_transmit_bytes_total",
    "Cumulative count of bytes transmitted",
    VM_INTERFACE,
);
/// Network transmit packets.
pub const NET_TX_PACKETS: MetricDesc = counter(
    "vm_network_transmit_packets_total",
    "Cumulative count of packets transmitted",
    VM_INTERFACE,
);
/// Network transmit drops.
pub const NET_TX_DROPPED: MetricDesc = counter(
    "vm_network_transmit_dropped_packets_total",
    "Cumulative count of packets dropped while transmitting",
    VM_INTERFACE,
);
/// Network transmit errors.
pub const NET_TX_ERRORS: MetricDesc = counter(
    "vm_network_transmit_errors_total",
    "Cumulative count of errors encountered while transmitting",
    VM_INTERFACE,
);

/// Disk write requests.
pub const DISK_WR_REQS: MetricDesc = counter(
    "vm_disk_write_requests_total",
    "Cumulative count of disk write requests",
    VM_DEVICE,
);
/// Disk write bytes.
pub const DISK_WR_BYTES: MetricDesc = counter(
    "vm_disk_write_bytes_total",
    "Cumulative count of disk writes in bytes",
    VM_DEVICE,
);
/// Disk read requests.
pub const DISK_RD_REQS: MetricDesc = counter(
    "vm_disk_read_requests_total",
    "Cumulative count of disk read requests",
    VM_DEVICE,
);
/// Disk read bytes.
pub const DISK_RD_BYTES: MetricDesc = counter(
    "vm_disk_read_bytes_total",
    "Cumulative count of disk reads in bytes",
    VM_DEVICE,
);

/// Per virtual CPU time.
pub const VCPU_TIME: MetricDesc = counter(
    "vm_vcpu_milliseconds_total",
    "Overall CPU time on the virtual CPU in milliseconds",
    VM_CPU,
);

/// Every family, in exposition order.
pub const CATALOGUE: &[&MetricDesc] = &[
    &VM_UP,
    &VM_CPU_TOTAL,
    &VM_CPU_SYSTEM,
    &VM_CPU_USER,
    &VM_MEMORY,
    &NET_RX_BYTES,
    &NET_RX_PACKETS,
    &NET_RX_DROPPED,
    &NET_RX_ERRORS,
    &NET_TX_BYTES,
    &NET_TX_PACKETS,
    &NET_TX_DROPPED,
    &NET_TX_ERRORS,
    &DISK_WR_REQS,
    &DISK_WR_BYTES,
    &DISK_RD_REQS,
    &DISK_RD_BYTES,
    &VCPU_TIME,
];

/// All metric vectors for one scrape, backed by its own registry.
pub struct MetricSet {
    registry: Registry,
    gauges: HashMap<&'static str, GaugeVec>,
    counters: HashMap<&'static str, IntCounterVec>,
}

impl std::fmt::Debug for MetricSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricSet")
            .field("gauges", &self.gauges.len())
            .field("counters", &self.counters.len())
            .finish_non_exhaustive()
    }
}

impl MetricSet {
    /// Creates a registry with every catalogue family and no samples.
    ///
    /// # Errors
    ///
    /// Returns [`ExporterError::Metrics`] if a family cannot be registered.
    pub fn new() -> Result<Self, ExporterError> {
        let registry = Registry::new();
        let mut gauges = HashMap::new();
        let mut counters = HashMap::new();

        for desc in CATALOGUE {
            let opts = Opts::new(desc.name, desc.help);
            match desc.kind {
                MetricKind::Gauge => {
                    let vec = GaugeVec::new(opts, desc.labels)?;
                    registry.register(Box::new(vec.clone()))?;
                    gauges.insert(desc.name, vec);
                }
                MetricKind::Counter => {
                    let vec = IntCounterVec::new(opts, desc.labels)?;
                    registry.register(Box::new(vec.clone()))?;
                    counters.insert(desc.name, vec);
                }
            }
        }

        Ok(Self {
            registry,
            gauges,
            counters,
        })
    }

    /// Sets a gauge sample. `labels` follow the order of `desc.labels`.
    ///
    /// # Errors
    ///
    /// Returns [`ExporterError::Metrics`] if the label count does not match.
    pub fn set_gauge(
        &self,
        desc: &MetricDesc,
        labels: &[&str],
        value: f64,
    ) -> Result<(), ExporterError> {
        if let Some(vec) = self.gauges.get(desc.name) {
            vec.get_metric_with_label_values(labels)?.set(value);
        }
        Ok(())
    }

    /// Sets a counter sample to the cumulative `total`.
    ///
    /// # Errors
    ///
    /// Returns [`ExporterError::Metrics`] if the label count does not match.
    pub fn set_counter(
        &self,
        desc: &MetricDesc,
        labels: &[&str],
        total: u64,
    ) -> Result<(), ExporterError> {
        if let Some(vec) = self.counters.get(desc.name) {
            vec.get_metric_with_label_values(labels)?.inc_by(total);
        }
        Ok(())
    }

    /// Maps one VM snapshot onto the catalogue.
    ///
    /// Absent optional fields skip only the sub-metric they feed; the rest of
    /// the VM is still recorded.
    ///
    /// # Errors
    ///
    /// Returns [`ExporterError::Metrics`] if a sample cannot be recorded.
    #[allow(clippy::cast_precision_loss)] // Gauges are f64 in the exposition format
    pub fn record_domain(&self, stats: &DomainStats) -> Result<(), ExporterError> {
        let uuid = stats.uuid.as_str();
        let vm = [uuid];

        self.set_gauge(&VM_UP, &vm, if stats.is_running() { 1.0 } else { 0.0 })?;

        let cpu = [
            (&VM_CPU_TOTAL, stats.cpu.cpu_time),
            (&VM_CPU_SYSTEM, stats.cpu.system_time),
            (&VM_CPU_USER, stats.cpu.user_time),
        ];
        for (desc, value) in cpu {
            match value {
                Some(v) => self.set_counter(desc, &vm, v)?,
                None => tracing::debug!(uuid, metric = desc.name, "field absent, skipping"),
            }
        }
        match stats.memory.actual {
            Some(bytes) => self.set_gauge(&VM_MEMORY, &vm, bytes as f64)?,
            None => tracing::debug!(uuid, metric = VM_MEMORY.name, "field absent, skipping"),
        }

        for iface in &stats.network.interfaces {
            let labels = [uuid, iface.name.as_str()];
            self.set_counter(&NET_RX_BYTES, &labels, iface.rx_bytes)?;
            self.set_counter(&NET_RX_PACKETS, &labels, iface.rx_packets)?;
            self.set_counter(&NET_RX_DROPPED, &labels, iface.rx_dropped)?;
            self.set_counter(&NET_RX_ERRORS, &labels, iface.rx_errors)?;
            self.set_counter(&NET_TX_BYTES, &labels, iface.tx_bytes)?;
            self.set_counter(&NET_TX_PACKETS, &labels, iface.tx_packets)?;
            self.set_counter(&NET_TX_DROPPED, &labels, iface.tx_dropped)?;
            self.set_counter(&NET_TX_ERRORS, &labels, iface.tx_errors)?;
        }

        for disk in &stats.diskio {
            let labels = [uuid, disk.name.as_str()];
            self.set_counter(&DISK_WR_REQS, &labels, disk.wr_reqs)?;
            self.set_counter(&DISK_WR_BYTES, &labels, disk.wr_bytes)?;
            self.set_counter(&DISK_RD_REQS, &labels, disk.rd_reqs)?;
            self.set_counter(&DISK_RD_BYTES, &labels, disk.rd_bytes)?;
        }

        match &stats.cpu.per_cpu_usage {
            Some(vcpus) => {
                for vcpu in vcpus {
                    let index = vcpu.index.to_string();
                    self.set_counter(&VCPU_TIME, &[uuid, index.as_str()], vcpu.vcpu_time)?;
                }
            }
            None => tracing::debug!(uuid, "per-CPU breakdown absent, skipping vCPU metrics"),
        }

        Ok(())
    }

    /// Collects the families that have at least one sample.
    pub fn gather(&self) -> Vec<proto::MetricFamily> {
        self.registry.gather()
    }

    /// Renders the set in the Prometheus text exposition format.
    ///
    /// # Errors
    ///
    /// Returns [`ExporterError::Metrics`] if encoding fails.
    pub fn render(&self) -> Result<String, ExporterError> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()).into())
    }

    /// Returns the value of the sample of `name` with exactly these label
    /// values, given in catalogue label order.
    pub fn value(&self, name: &str, labels: &[&str]) -> Option<f64> {
        let desc = CATALOGUE.iter().find(|d| d.name == name)?;
        let family = self.gather().into_iter().find(|f| f.get_name() == name)?;
        family
            .get_metric()
            .iter()
            .find(|m| {
                desc.labels.iter().zip(labels).all(|(label, expected)| {
                    m.get_label()
                        .iter()
                        .any(|p| p.get_name() == *label && p.get_value() == *expected)
                })
            })
            .map(|m| match family.get_field_type() {
                MetricType::COUNTER => m.get_counter().get_value(),
                _ => m.get_gauge().get_value(),
            })
    }

    /// Number of samples recorded for `name`.
    pub fn sample_count(&self, name: &str) -> usize {
        self.gather()
            .iter()
            .find(|f| f.get_name() == name)
            .map_or(0, |f| f.get_metric().len())
    }

    /// Returns `true` if any sample carries `uuid` as its `uuid` label.
    pub fn mentions_vm(&self, uuid: &str) -> bool {
        self.gather().iter().flat_map(|f| f.get_metric()).any(|m| {
            m.get_label()
                .iter()
                .any(|p| p.get_name() == "uuid" && p.get_value() == uuid)
        })
    }
}
