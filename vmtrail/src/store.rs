//! The event store contract shared by every backend.
//!
//! # Semantics
//!
//! - `put` stamps the payload with the clock's current instant and appends it.
//! - `get` returns events with `start <= timestamp <= stop`, ascending by time.
//!   Both bounds are inclusive on every backend. `start` defaults to the Unix
//!   epoch, `stop` to now. A `limit` of zero means unbounded.
//! - `expire` removes every event older than `now - window` and returns how
//!   many were removed. Calling it twice in a row removes nothing the second
//!   time.
//! - `empty` expires first, then reports whether anything is retained.
//!
//! # Eviction cost
//!
//! There is no background sweeper. `put`, `get` and `empty` each run `expire`
//! before doing their own work, so the latency of any call grows with the
//! number of events that aged out since the previous call. Under a steady
//! write rate this is a small, bounded amount per call; after a long idle
//! period the first call pays for the whole backlog.

use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::event::{Event, Payload};

/// Default number of events returned by a range query.
pub const DEFAULT_LIMIT: usize = 10;

/// Append, range-query and expire over a time-ordered event log.
///
/// Implementations are not internally synchronized. Every operation takes
/// `&mut self`; share a store across threads by wrapping it in a lock.
pub trait EventStore {
    /// Stamps `payload` with the current instant and appends it.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload cannot be serialized or the write fails.
    /// Nothing is written in either case.
    fn put(&mut self, payload: Payload) -> Result<()>;

    /// Returns up to `limit` events in `[start, stop]`, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if expiry or the range scan fails.
    fn get(
        &mut self,
        start: Option<DateTime<Utc>>,
        stop: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Result<Vec<Event>>;

    /// Evicts events older than the retention window.
    ///
    /// # Errors
    ///
    /// Returns an error if the eviction cannot be applied.
    fn expire(&mut self) -> Result<usize>;

    /// Returns `true` if no events remain after expiry.
    ///
    /// # Errors
    ///
    /// Returns an error if expiry or the scan fails.
    fn empty(&mut self) -> Result<bool>;
}

impl<S: EventStore + ?Sized> EventStore for Box<S> {
    fn put(&mut self, payload: Payload) -> Result<()> {
        (**self).put(payload)
    }

    fn get(
        &mut self,
        start: Option<DateTime<Utc>>,
        stop: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Result<Vec<Event>> {
        (**self).get(start, stop, limit)
    }

    fn expire(&mut self) -> Result<usize> {
        (**self).expire()
    }

    fn empty(&mut self) -> Result<bool> {
        (**self).empty()
    }
}

/// Resolves optional query bounds against `now`.
///
/// Returns `None` when the range is empty (`start > stop`).
pub(crate) fn resolve_range(
    start: Option<DateTime<Utc>>,
    stop: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
    let start = start.unwrap_or(DateTime::<Utc>::UNIX_EPOCH);
    let stop = stop.unwrap_or(now);
    (start <= stop).then_some((start, stop))
}

/// Returns `true` once `collected` has reached a non-zero `limit`.
#[inline]
pub(crate) fn limit_reached(collected: usize, limit: usize) -> bool {
    limit != 0 && collected >= limit
}
