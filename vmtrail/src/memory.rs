//! Ephemeral in-memory event store.
//!
//! Events live in a `VecDeque` in insertion order. Because every event is
//! stamped from the same clock at insertion time, insertion order is also time
//! order, which is what lets expiry trim from the front and queries start from
//! a binary search.

use std::collections::VecDeque;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::clock::{self, Clock, SystemClock};
use crate::error::Result;
use crate::event::{Event, Payload};
use crate::store::{self, EventStore};

/// A bounded, time-ordered event log held in memory.
///
/// Keep the window modest: everything inside it stays resident.
///
/// # Thread Safety
///
/// No internal locking. Callers must serialize access externally.
#[derive(Debug)]
pub struct InMemoryEventStore<C: Clock = SystemClock> {
    /// Retention window, fixed at construction.
    window: Duration,
    /// Retained events, oldest first.
    events: VecDeque<Event>,
    /// Source of the current instant.
    clock: C,
}

impl InMemoryEventStore<SystemClock> {
    /// Creates an empty store that retains events for `window`.
    pub fn new(window: Duration) -> Self {
        Self::with_clock(window, SystemClock)
    }
}

impl<C: Clock> InMemoryEventStore<C> {
    /// Creates an empty store that reads time from `clock`.
    pub fn with_clock(window: Duration, clock: C) -> Self {
        Self {
            window,
            events: VecDeque::new(),
            clock,
        }
    }

    /// Returns the number of retained events, without expiring first.
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Returns `true` if nothing is retained, without expiring first.
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Drops every event older than `now - window`.
    fn expire_at(&mut self, now: DateTime<Utc>) -> usize {
        let lower_bound = clock::lower_bound(now, self.window);
        let mut removed = 0;
        while self
            .events
            .front()
            .is_some_and(|event| event.timestamp < lower_bound)
        {
            self.events.pop_front();
            removed += 1;
        }
        removed
    }
}

impl<C: Clock> EventStore for InMemoryEventStore<C> {
    fn put(&mut self, payload: Payload) -> Result<()> {
        let mut now = self.clock.now();
        self.expire_at(now);

        // Keep the deque sorted even if the wall clock steps backwards.
        if let Some(newest) = self.events.back()
            && now < newest.timestamp
        {
            tracing::warn!(
                stamped = %now,
                newest = %newest.timestamp,
                "clock moved backwards, clamping event timestamp"
            );
            now = newest.timestamp;
        }

        self.events.push_back(Event::new(now, payload));
        Ok(())
    }

    fn get(
        &mut self,
        start: Option<DateTime<Utc>>,
        stop: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Result<Vec<Event>> {
        let now = self.clock.now();
        self.expire_at(now);

        let Some((start, stop)) = store::resolve_range(start, stop, now) else {
            return Ok(Vec::new());
        };

        let first = self.events.partition_point(|event| event.timestamp < start);
        let mut found = Vec::new();
        for event in self.events.range(first..) {
            if event.timestamp > stop {
                break;
            }
            found.push(event.clone());
            if store::limit_reached(found.len(), limit) {
                break;
            }
        }
        Ok(found)
    }

    fn expire(&mut self) -> Result<usize> {
        let now = self.clock.now();
        Ok(self.expire_at(now))
    }

    fn empty(&mut self) -> Result<bool> {
        self.expire()?;
        Ok(self.events.is_empty())
    }
}
