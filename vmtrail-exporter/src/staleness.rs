//! Last-seen bookkeeping for VMs that vanish from the snapshot.
//!
//! A VM missing from the latest scrape keeps being reported with `vm_up 0`
//! until it has been unseen for longer than the grace period, after which it
//! is forgotten.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};

/// How long a vanished VM is reported down before it is dropped.
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(600);

/// When each known VM was last present in a snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LastSeen {
    seen: BTreeMap<String, DateTime<Utc>>,
}

impl LastSeen {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns when `uuid` was last seen.
    pub fn get(&self, uuid: &str) -> Option<DateTime<Utc>> {
        self.seen.get(uuid).copied()
    }

    /// Number of tracked VMs.
    pub fn len(&self) -> usize {
        self.seen.len()
    }

    /// Returns `true` if no VM is tracked.
    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

/// Outcome of one staleness pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Staleness {
    /// Absent VMs still inside the grace period, to be reported down.
    pub down: Vec<String>,
    /// VMs unseen for longer than the grace period, now forgotten.
    pub dropped: Vec<String>,
}

/// Advances `last_seen` to `now`.
///
/// Every uuid in `present` is stamped with `now`. Of the absent ones, those
/// last seen before `now - grace` are dropped and the others are reported
/// down, whatever their stamp relative to `now`.
pub fn evaluate<'a, I>(
    mut last_seen: LastSeen,
    present: I,
    now: DateTime<Utc>,
    grace: Duration,
) -> (LastSeen, Staleness)
where
    I: IntoIterator<Item = &'a str>,
{
    let present: BTreeSet<&str> = present.into_iter().collect();
    for uuid in &present {
        last_seen.seen.insert((*uuid).to_string(), now);
    }

    let grace = TimeDelta::from_std(grace).unwrap_or(TimeDelta::MAX);
    let cutoff = now.checked_sub_signed(grace).unwrap_or(DateTime::<Utc>::MIN_UTC);

    let mut outcome = Staleness::default();
    last_seen.seen.retain(|uuid, seen| {
        if present.contains(uuid.as_str()) {
            true
        } else if *seen < cutoff {
            outcome.dropped.push(uuid.clone());
            false
        } else {
            outcome.down.push(uuid.clone());
            true
        }
    });

    for uuid in &outcome.dropped {
        tracing::info!(uuid, "VM unseen past grace period, dropping");
    }

    (last_seen, outcome)
}
