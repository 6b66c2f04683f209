//! Durable event store over an ordered key-value engine (RocksDB).
//!
//! # Record Layout
//!
//! ```text
//! key   = 00000000001700000000.0000000000       <- see crate::codec
//! value = {"a":2,"timestamp":"2023-11-14T22:13:20.000000Z"}
//! ```
//!
//! Every `put` is written with `sync = true`, so once it returns the record
//! survives a crash. Expiry deletes run as one synced `WriteBatch`, so a
//! reader observes either none or all of an eviction.
//!
//! # Example Usage
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use vmtrail::{EventStore, PersistentEventStore, payload_from};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut store = PersistentEventStore::open("./history", Duration::from_secs(86_400))?;
//! store.put(payload_from(&serde_json::json!({"vms": 3}))?)?;
//!
//! for event in store.get(None, None, 10)? {
//!     println!("{}: {:?}", event.timestamp, event.payload);
//! }
//! # Ok(())
//! # }
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rocksdb::{DB, Direction, IteratorMode, Options, WriteBatch, WriteOptions};

use crate::clock::{self, Clock, SystemClock};
use crate::codec::{self, EventKey};
use crate::error::{Result, StoreError};
use crate::event::{Event, Payload};
use crate::store::{self, EventStore};

/// Occupancy snapshot of a persistent store, for inspection tools.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StoreSummary {
    /// Number of stored records.
    pub entries: usize,
    /// Key of the oldest record.
    pub oldest: Option<EventKey>,
    /// Key of the newest record.
    pub newest: Option<EventKey>,
}

/// A durable, time-ordered event log.
///
/// # Thread Safety
///
/// The engine makes individual writes and the expiry batch atomic, but no
/// transaction spans a `put` and the expiry it triggers. Serialize callers
/// externally.
pub struct PersistentEventStore<C: Clock = SystemClock> {
    /// Directory holding the engine's files.
    path: PathBuf,
    /// Retention window, fixed at construction.
    window: Duration,
    /// The ordered key-value engine.
    db: DB,
    /// Key of the most recent write, used to sequence same-second writes.
    last_key: Option<EventKey>,
    /// Timestamp of the most recent write.
    last_stamp: Option<DateTime<Utc>>,
    /// Source of the current instant.
    clock: C,
}

impl PersistentEventStore<SystemClock> {
    /// Opens or creates a store at `path` that retains events for `window`.
    ///
    /// # Errors
    ///
    /// - [`StoreError::DirectoryAccess`] if the directory cannot be created
    /// - [`StoreError::Open`] if the engine cannot open it
    /// - [`crate::error::CodecError::InvalidKey`] if the newest stored key is malformed
    pub fn open<P: AsRef<Path>>(path: P, window: Duration) -> Result<Self> {
        Self::open_with_clock(path, window, SystemClock)
    }
}

impl<C: Clock> PersistentEventStore<C> {
    /// Opens or creates a store that reads time from `clock`.
    ///
    /// # Errors
    ///
    /// Same as [`PersistentEventStore::open`].
    pub fn open_with_clock<P: AsRef<Path>>(path: P, window: Duration, clock: C) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        fs::create_dir_all(&path).map_err(|e| StoreError::DirectoryAccess {
            path: path.display().to_string(),
            source: e,
        })?;

        let mut options = Options::default();
        options.create_if_missing(true);

        let db = DB::open(&options, &path).map_err(|e| StoreError::Open {
            path: path.display().to_string(),
            source: e,
        })?;

        // Resume sequencing after the newest stored record.
        let (last_key, last_stamp) = match db.iterator(IteratorMode::End).next() {
            Some(item) => {
                let (key, value) = item.map_err(|source| StoreError::Read { source })?;
                let key = EventKey::decode(&key)?;
                let stamp = Event::decode_record(&value)?.timestamp;
                (Some(key), Some(stamp))
            }
            None => (None, None),
        };

        tracing::debug!(path = %path.display(), ?window, ?last_key, "opened event store");

        Ok(Self {
            path,
            window,
            db,
            last_key,
            last_stamp,
            clock,
        })
    }

    /// Returns the store directory.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the retention window.
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Counts stored records and reports the oldest and newest keys.
    ///
    /// Does not expire first, so stale records that have not been evicted yet
    /// are included.
    ///
    /// # Errors
    ///
    /// Returns an error if the scan fails or a key is malformed.
    pub fn summary(&self) -> Result<StoreSummary> {
        let mut summary = StoreSummary::default();
        for item in self.db.iterator(IteratorMode::Start) {
            let (key, _) = item.map_err(|source| StoreError::Read { source })?;
            let key = EventKey::decode(&key)?;
            summary.oldest.get_or_insert(key);
            summary.newest = Some(key);
            summary.entries += 1;
        }
        Ok(summary)
    }

    /// Reads events like [`EventStore::get`] without expiring first.
    ///
    /// Stale records that have not been evicted yet are returned too, so
    /// inspection tools can read a store without knowing the window it was
    /// written with.
    ///
    /// # Errors
    ///
    /// Returns an error if the scan fails or a stored record is malformed.
    pub fn scan(
        &self,
        start: Option<DateTime<Utc>>,
        stop: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Result<Vec<Event>> {
        self.scan_at(start, stop, limit, self.clock.now())
    }

    fn scan_at(
        &self,
        start: Option<DateTime<Utc>>,
        stop: Option<DateTime<Utc>>,
        limit: usize,
        now: DateTime<Utc>,
    ) -> Result<Vec<Event>> {
        let Some((start, stop)) = store::resolve_range(start, stop, now) else {
            return Ok(Vec::new());
        };
        let stop_secs = codec::epoch_seconds(stop);
        // The bare seconds prefix sorts before every key of that second.
        let from = codec::encode(start);

        let mut found = Vec::new();
        for item in self.db.iterator(IteratorMode::From(from.as_slice(), Direction::Forward)) {
            let (raw_key, value) = item.map_err(|source| StoreError::Read { source })?;
            let key = EventKey::decode(&raw_key)?;
            if key.secs > stop_secs {
                break;
            }

            tracing::debug!(%key, "fetched event");
            let event = Event::decode_record(&value)?;
            if event.timestamp < start || event.timestamp > stop {
                continue;
            }

            found.push(event);
            if store::limit_reached(found.len(), limit) {
                break;
            }
        }
        Ok(found)
    }

    /// Deletes, in one synced batch, every record older than `now - window`.
    fn expire_at(&mut self, now: DateTime<Utc>) -> Result<usize> {
        let lower_bound = clock::lower_bound(now, self.window);
        let lower_secs = codec::epoch_seconds(lower_bound);

        let mut batch = WriteBatch::default();
        let mut removed = 0;

        for item in self.db.iterator(IteratorMode::Start) {
            let (raw_key, value) = item.map_err(|source| StoreError::Read { source })?;
            let key = EventKey::decode(&raw_key)?;

            if key.secs > lower_secs {
                break;
            }
            // Whole seconds before the bound go by key alone. The boundary
            // second needs the stamped sub-second timestamp.
            if key.secs == lower_secs && Event::decode_record(&value)?.timestamp >= lower_bound {
                break;
            }

            tracing::debug!(%key, "deleting expired event");
            batch.delete(&raw_key);
            removed += 1;
        }

        if removed > 0 {
            self.db
                .write_opt(batch, &sync_writes())
                .map_err(|source| StoreError::Write { source })?;
        }

        Ok(removed)
    }
}

impl<C: Clock> EventStore for PersistentEventStore<C> {
    fn put(&mut self, payload: Payload) -> Result<()> {
        let now = self.clock.now();

        // Keep keys and stamps ordered even if the wall clock steps backwards.
        let stamp = match self.last_stamp {
            Some(newest) if now < newest => {
                tracing::warn!(
                    stamped = %now,
                    %newest,
                    "clock moved backwards, clamping event timestamp"
                );
                newest
            }
            _ => now,
        };
        let key = EventKey::next_after(self.last_key, codec::epoch_seconds(stamp));

        // Serialize before touching the engine so a bad payload writes nothing.
        let value = Event::new(stamp, payload).encode_record()?;

        tracing::debug!(%key, "adding event");
        self.db
            .put_opt(key.encode(), value, &sync_writes())
            .map_err(|source| StoreError::Write { source })?;
        self.last_key = Some(key);
        self.last_stamp = Some(stamp);

        self.expire_at(now)?;
        Ok(())
    }

    fn get(
        &mut self,
        start: Option<DateTime<Utc>>,
        stop: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Result<Vec<Event>> {
        let now = self.clock.now();
        self.expire_at(now)?;

        self.scan_at(start, stop, limit, now)
    }

    fn expire(&mut self) -> Result<usize> {
        let now = self.clock.now();
        self.expire_at(now)
    }

    fn empty(&mut self) -> Result<bool> {
        self.expire()?;
        match self.db.iterator(IteratorMode::Start).next() {
            Some(item) => {
                item.map_err(|source| StoreError::Read { source })?;
                Ok(false)
            }
            None => Ok(true),
        }
    }
}

impl<C: Clock> std::fmt::Debug for PersistentEventStore<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistentEventStore")
            .field("path", &self.path)
            .field("window", &self.window)
            .field("last_key", &self.last_key)
            .finish_non_exhaustive()
    }
}

/// Write options that fsync before returning.
fn sync_writes() -> WriteOptions {
    let mut options = WriteOptions::default();
    options.set_sync(true);
    options
}
