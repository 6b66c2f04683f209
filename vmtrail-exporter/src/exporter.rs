//! Scrape orchestration: collect, evaluate staleness, record history.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use vmtrail::{Clock, Event, EventStore, SystemClock, payload_from};

use crate::collector::{Collector, DomainStats};
use crate::error::ExporterError;
use crate::metrics::{MetricSet, VM_UP};
use crate::staleness::{self, LastSeen};

/// Builds the metric set for one scrape and the next last-seen table.
///
/// Pure: the caller owns the table between scrapes. VMs absent from `stats`
/// but still inside `grace` get a single `vm_up 0` sample.
///
/// # Errors
///
/// Returns [`ExporterError::Metrics`] if a sample cannot be recorded.
pub fn evaluate_scrape(
    stats: &[DomainStats],
    last_seen: LastSeen,
    now: DateTime<Utc>,
    grace: Duration,
) -> Result<(MetricSet, LastSeen), ExporterError> {
    let set = MetricSet::new()?;
    for domain in stats {
        set.record_domain(domain)?;
    }

    let present = stats.iter().map(|d| d.uuid.as_str());
    let (last_seen, outcome) = staleness::evaluate(last_seen, present, now, grace);
    for uuid in &outcome.down {
        set.set_gauge(&VM_UP, &[uuid.as_str()], 0.0)?;
    }

    Ok((set, last_seen))
}

#[derive(Serialize)]
struct ScrapeRecord<'a> {
    vms: &'a [DomainStats],
}

/// Pull-based exporter state.
pub struct Exporter<C: Collector, K: Clock = SystemClock> {
    collector: C,
    clock: K,
    grace: Duration,
    last_seen: LastSeen,
    history: Option<Box<dyn EventStore>>,
}

impl<C: Collector> Exporter<C, SystemClock> {
    /// Creates an exporter on the wall clock.
    pub fn new(collector: C, grace: Duration) -> Self {
        Self::with_clock(collector, SystemClock, grace)
    }
}

impl<C: Collector, K: Clock> Exporter<C, K> {
    /// Creates an exporter reading time from `clock`.
    pub fn with_clock(collector: C, clock: K, grace: Duration) -> Self {
        Self {
            collector,
            clock,
            grace,
            last_seen: LastSeen::new(),
            history: None,
        }
    }

    /// Records every scrape's snapshot into `store`.
    #[must_use]
    pub fn with_history(mut self, store: Box<dyn EventStore>) -> Self {
        self.history = Some(store);
        self
    }

    /// Returns the grace period.
    pub fn grace(&self) -> Duration {
        self.grace
    }

    /// Returns the current last-seen table.
    pub fn last_seen(&self) -> &LastSeen {
        &self.last_seen
    }

    /// Returns `true` if scrapes are being recorded.
    pub fn has_history(&self) -> bool {
        self.history.is_some()
    }

    /// Runs one scrape.
    ///
    /// # Errors
    ///
    /// Returns an error if the collector fails or a sample cannot be recorded.
    /// The last-seen table is left untouched in that case. History write failures are logged only.
    pub fn scrape(&mut self) -> Result<MetricSet, ExporterError> {
        let stats = self.collector.collect()?;
        let now = self.clock.now();

        let (set, last_seen) = evaluate_scrape(&stats, self.last_seen.clone(), now, self.grace)?;
        self.last_seen = last_seen;

        self.record(&stats);
        tracing::debug!(
            vms = stats.len(),
            tracked = self.last_seen.len(),
            "scrape complete"
        );
        Ok(set)
    }

    fn record(&mut self, stats: &[DomainStats]) {
        let Some(store) = self.history.as_mut() else {
            return;
        };
        let result = payload_from(&ScrapeRecord { vms: stats }).and_then(|p| store.put(p));
        if let Err(e) = result {
            tracing::warn!(error = %e, "failed to record scrape history");
        }
    }

    /// Reads recorded scrapes. Returns nothing when history is disabled.
    ///
    /// # Errors
    ///
    /// Returns an error if the history store fails.
    pub fn history(
        &mut self,
        start: Option<DateTime<Utc>>,
        stop: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Result<Vec<Event>, ExporterError> {
        match self.history.as_mut() {
            Some(store) => Ok(store.get(start, stop, limit)?),
            None => Ok(Vec::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::{CpuStats, MemoryStats};
    use chrono::TimeZone;
    use vmtrail::{InMemoryEventStore, ManualClock};

    /// Collector that replays a queue of canned snapshots.
    struct Scripted {
        snapshots: Vec<Vec<DomainStats>>,
        fail: bool,
    }

    impl Collector for Scripted {
        fn collect(&mut self) -> Result<Vec<DomainStats>, ExporterError> {
            if self.fail {
                return Err(ExporterError::InvalidParameter {
                    name: "snapshot".to_string(),
                    reason: "unavailable".to_string(),
                });
            }
            Ok(if self.snapshots.is_empty() {
                Vec::new()
            } else {
                self.snapshots.remove(0)
            })
        }
    }

    fn vm(uuid: &str) -> DomainStats {
        DomainStats {
            uuid: uuid.to_string(),
            name: None,
            state: "Running".to_string(),
            cpu: CpuStats {
                cpu_time: Some(100),
                ..CpuStats::default()
            },
            memory: MemoryStats { actual: Some(1024) },
            network: Default::default(),
            diskio: Vec::new(),
        }
    }

    fn clock() -> ManualClock {
        ManualClock::new(Utc.timestamp_opt(1_700_000_000, 0).unwrap())
    }

    #[test]
    fn test_vanished_vm_goes_down_then_disappears() {
        let clock = clock();
        let collector = Scripted {
            snapshots: vec![vec![vm("a"), vm("b")], vec![vm("a")], vec![vm("a")]],
            fail: false,
        };
        let mut exporter = Exporter::with_clock(collector, clock.clone(), Duration::from_secs(600));

        let set = exporter.scrape().unwrap();
        assert_eq!(set.value("vm_up", &["b"]), Some(1.0));

        clock.advance(Duration::from_secs(60));
        let set = exporter.scrape().unwrap();
        assert_eq!(set.value("vm_up", &["b"]), Some(0.0));
        assert_eq!(set.value("vm_cpu_milliseconds_total", &["b"]), None);

        clock.advance(Duration::from_secs(11 * 60));
        let set = exporter.scrape().unwrap();
        assert!(!set.mentions_vm("b"));
        assert_eq!(set.value("vm_up", &["a"]), Some(1.0));
        assert_eq!(exporter.last_seen().len(), 1);
    }

    #[test]
    fn test_collector_failure_keeps_last_seen() {
        let clock = clock();
        let mut exporter = Exporter::with_clock(
            Scripted {
                snapshots: vec![vec![vm("a")]],
                fail: false,
            },
            clock.clone(),
            Duration::from_secs(600),
        );
        exporter.scrape().unwrap();

        exporter.collector.fail = true;
        clock.advance(Duration::from_secs(3600));
        assert!(exporter.scrape().is_err());
        assert_eq!(
            exporter.last_seen().get("a"),
            Some(Utc.timestamp_opt(1_700_000_000, 0).unwrap())
        );
    }

    #[test]
    fn test_scrapes_are_recorded_in_history() {
        let clock = clock();
        let store = InMemoryEventStore::with_clock(Duration::from_secs(3600), clock.clone());
        let mut exporter = Exporter::with_clock(
            Scripted {
                snapshots: vec![vec![vm("a")], vec![vm("a"), vm("b")]],
                fail: false,
            },
            clock.clone(),
            Duration::from_secs(600),
        )
        .with_history(Box::new(store));

        exporter.scrape().unwrap();
        clock.advance(Duration::from_secs(15));
        exporter.scrape().unwrap();

        let events = exporter.history(None, None, 0).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].payload["vms"][0]["uuid"], "a");
        assert_eq!(events[1].payload["vms"].as_array().map(Vec::len), Some(2));
        assert_eq!(events[1].timestamp, clock.now());
    }

    #[test]
    fn test_history_disabled_returns_nothing() {
        let mut exporter = Exporter::with_clock(
            Scripted {
                snapshots: vec![vec![vm("a")]],
                fail: false,
            },
            clock(),
            Duration::from_secs(600),
        );
        exporter.scrape().unwrap();
        assert!(!exporter.has_history());
        assert!(exporter.history(None, None, 10).unwrap().is_empty());
    }

    #[test]
    fn test_evaluate_scrape_is_pure() {
        let now = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let stats = vec![vm("a")];
        let grace = Duration::from_secs(600);
        let (first, seen) = evaluate_scrape(&stats, LastSeen::new(), now, grace).unwrap();
        let (second, _) = evaluate_scrape(&stats, seen.clone(), now, grace).unwrap();
        assert_eq!(first.render().unwrap(), second.render().unwrap());
        assert_eq!(seen.get("a"), Some(now));
    }

    #[test]
    fn test_vanished_vm_is_down_within_the_same_second() {
        let clock = clock();
        let collector = Scripted {
            snapshots: vec![vec![vm("a"), vm("b")], vec![vm("a")]],
            fail: false,
        };
        let mut exporter = Exporter::with_clock(collector, clock, Duration::from_secs(600));

        exporter.scrape().unwrap();
        let set = exporter.scrape().unwrap();
        assert_eq!(set.value("vm_up", &["b"]), Some(0.0));
        assert_eq!(set.value("vm_up", &["a"]), Some(1.0));
        assert!(set.render().unwrap().contains("vm_up{uuid=\"b\"} 0\n"));
    }
}
