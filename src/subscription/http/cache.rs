use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use futures::future::{BoxFuture, Shared};
use tokio::sync::broadcast;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::error::RequestError;
use super::key::CacheKey;
use super::query::QueryStatus;
use super::tag::Tag;

/// Cached values are stored type-erased; handles downcast to the endpoint's output.
pub(crate) type ErasedData = Arc<dyn Any + Send + Sync>;

/// Re-runs the entry's request with the arguments it was created with.
pub(crate) type Fetcher =
    Arc<dyn Fn() -> BoxFuture<'static, Result<Fetched, RequestError>> + Send + Sync>;

/// Completion of the spawned fetch task, shared by everyone awaiting it.
pub(crate) type InFlight = Shared<BoxFuture<'static, ()>>;

const CHANGE_CAPACITY: usize = 64;

/// A successful fetch: the transformed value and the tags it provides.
pub(crate) struct Fetched {
    pub(crate) data: ErasedData,
    pub(crate) tags: Vec<Tag>,
}

/// What subscribers see of an entry at one point in time.
#[derive(Clone)]
pub(crate) struct Snapshot {
    pub(crate) status: QueryStatus,
    pub(crate) data: Option<ErasedData>,
    pub(crate) error: Option<RequestError>,
    pub(crate) is_stale: bool,
    pub(crate) fetched_at: Option<Instant>,
}

/// A cached read with its fetch state and subscriber bookkeeping.
pub(crate) struct CacheEntry {
    pub(crate) key: CacheKey,
    pub(crate) status: QueryStatus,
    /// Last good value. Kept through refetches and non-fatal errors.
    data: Option<ErasedData>,
    error: Option<RequestError>,
    pub(crate) fetched_at: Option<Instant>,
    pub(crate) is_stale: bool,
    pub(crate) subscribers: usize,
    pub(crate) fetcher: Fetcher,
    pub(crate) in_flight: Option<InFlight>,
    /// Invalidated while a request was in flight; fetch again once it settles.
    pub(crate) refetch_pending: bool,
    /// Invalidation epoch the current or last fetch started in.
    pub(crate) fetch_epoch: u64,
    pub(crate) eviction: Option<CancellationToken>,
    fetch_seq: u64,
    changes: broadcast::Sender<Snapshot>,
}

impl CacheEntry {
    /// Creates an idle entry.
    pub(crate) fn new(key: CacheKey, fetcher: Fetcher) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CAPACITY);
        Self {
            key,
            status: QueryStatus::Idle,
            data: None,
            error: None,
            fetched_at: None,
            is_stale: false,
            subscribers: 0,
            fetcher,
            in_flight: None,
            refetch_pending: false,
            fetch_epoch: 0,
            eviction: None,
            fetch_seq: 0,
            changes,
        }
    }

    pub(crate) fn snapshot(&self) -> Snapshot {
        let settled = matches!(self.status, QueryStatus::Success | QueryStatus::Error);
        Snapshot {
            status: self.status,
            data: if settled { self.data.clone() } else { None },
            error: if settled { self.error.clone() } else { None },
            is_stale: self.is_stale,
            fetched_at: self.fetched_at,
        }
    }

    pub(crate) fn changes(&self) -> broadcast::Receiver<Snapshot> {
        self.changes.subscribe()
    }

    /// Enters `Loading` and returns the sequence number of the new fetch.
    pub(crate) fn begin_fetch(&mut self) -> u64 {
        self.fetch_seq += 1;
        self.status = QueryStatus::Loading;
        self.error = None;
        self.notify();
        self.fetch_seq
    }

    /// Whether `seq` belongs to the most recent fetch.
    pub(crate) const fn is_current(&self, seq: u64) -> bool {
        self.fetch_seq == seq
    }

    /// Updates the entry with new data, resetting timestamp and staleness.
    pub(crate) fn update(&mut self, data: ErasedData) {
        self.data = Some(data);
        self.error = None;
        self.status = QueryStatus::Success;
        self.fetched_at = Some(Instant::now());
        self.is_stale = false;
        self.in_flight = None;
        self.notify();
    }

    /// Records a failed fetch. Previous data survives unless the error is fatal.
    pub(crate) fn fail(&mut self, error: RequestError) {
        if error.is_fatal() {
            self.data = None;
        }
        self.error = Some(error);
        self.status = QueryStatus::Error;
        self.in_flight = None;
        self.notify();
    }

    /// Marks this entry as stale.
    pub(crate) fn mark_stale(&mut self) {
        if !self.is_stale {
            self.is_stale = true;
            self.notify();
        }
    }

    /// Checks if this entry is stale based on the given stale time.
    pub(crate) fn check_staleness(&mut self, stale_time: Option<Duration>) -> bool {
        if let (Some(stale_time), Some(fetched_at)) = (stale_time, self.fetched_at) {
            if fetched_at.elapsed() > stale_time {
                self.is_stale = true;
            }
        }
        self.is_stale
    }

    /// Whether a new subscriber must trigger a network fetch instead of being
    /// served the cached value.
    pub(crate) fn needs_fetch(&mut self, stale_time: Option<Duration>) -> bool {
        match self.status {
            QueryStatus::Loading => false,
            QueryStatus::Idle | QueryStatus::Error => true,
            QueryStatus::Success => self.check_staleness(stale_time),
        }
    }

    fn notify(&self) {
        // No receivers is fine: nobody is watching this entry right now.
        let _ = self.changes.send(self.snapshot());
    }
}
