//! Cached reads with request deduplication and tag-driven refetching.
//!
//! This module provides the [`QueryClient`], the cache every read goes
//! through, the [`QueryHandle`] a consumer holds while it is interested in a
//! key, and the [`Query`] subscription source for Elm-style consumers.
//!
//! # Design Pattern: Subscription-based State Management
//!
//! Reads are **subscriptions**, not calls. Resolving a query:
//!
//! 1. Creates the cache entry on first use and starts exactly one fetch
//! 2. Attaches later subscribers to that same fetch while it is in flight
//! 3. Serves cached data to new subscribers once it is fresh
//! 4. Refetches automatically when a mutation invalidates one of the
//!    entry's tags
//!
//! Dropping (or disposing) the handle releases the subscription. The entry
//! outlives its last subscriber by [`QueryConfig::cache_time`], so a quick
//! resubscribe is served from cache.
//!
//! # Example
//!
//! ```rust,ignore
//! use storekeep::subscription::http::{QueryClient, RequestExecutor};
//!
//! let client = QueryClient::new(executor);
//! let mut order = client.resolve::<GetOrder>(5)?;
//!
//! let result = order.settled().await;
//! if let Some(order) = result.data() {
//!     println!("order {} is {}", order.id, order.status);
//! }
//!
//! // Later changes (refetches after mutations) arrive here.
//! while let Some(result) = order.changed().await {
//!     render(&result);
//! }
//! ```

use std::collections::{HashMap, HashSet};
use std::hash::{DefaultHasher, Hash, Hasher};
use std::marker::PhantomData;
use std::sync::Arc;

use futures::FutureExt;
use futures::StreamExt;
use futures::stream::{self, BoxStream};
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::subscription::{SubscriptionId, SubscriptionSource};

use super::cache::{CacheEntry, Fetched, Fetcher, InFlight, Snapshot};
use super::config::QueryConfig;
use super::endpoint::QueryEndpoint;
use super::error::RequestError;
use super::executor::RequestExecutor;
use super::key::CacheKey;
use super::subscribers::{SubscriptionManager, SubscriptionToken};
use super::tag::Tag;
use super::tag_index::{InvalidationLog, TagIndex};

/// Lifecycle status of a cached read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryStatus {
    /// Created but never fetched.
    Idle,
    /// A request is in flight.
    Loading,
    /// The last request succeeded.
    Success,
    /// The last request failed.
    Error,
}

/// The state of a query as seen by one subscriber.
///
/// `data` and `error` are only populated in [`QueryStatus::Success`] and
/// [`QueryStatus::Error`]. An errored query keeps the data of its last
/// successful fetch unless the error was fatal.
#[derive(Debug, Clone)]
pub struct QueryResult<T> {
    pub status: QueryStatus,
    pub data: Option<T>,
    pub error: Option<RequestError>,
    /// The data is known to be outdated (invalidated or past `stale_time`).
    pub is_stale: bool,
    pub fetched_at: Option<Instant>,
}

impl<T> QueryResult<T> {
    /// Returns the data if the query has any to show, otherwise `None`.
    pub const fn data(&self) -> Option<&T> {
        self.data.as_ref()
    }

    pub const fn error(&self) -> Option<&RequestError> {
        self.error.as_ref()
    }

    pub const fn is_idle(&self) -> bool {
        matches!(self.status, QueryStatus::Idle)
    }

    /// Returns `true` if the query is currently loading.
    pub const fn is_loading(&self) -> bool {
        matches!(self.status, QueryStatus::Loading)
    }

    /// Returns `true` if the query succeeded.
    pub const fn is_success(&self) -> bool {
        matches!(self.status, QueryStatus::Success)
    }

    /// Returns `true` if the query failed.
    pub const fn is_error(&self) -> bool {
        matches!(self.status, QueryStatus::Error)
    }

    /// Returns `true` if the query data is stale.
    pub const fn is_stale(&self) -> bool {
        self.is_stale
    }

    const fn is_settled(&self) -> bool {
        matches!(self.status, QueryStatus::Success | QueryStatus::Error)
    }

    fn failed(error: RequestError) -> Self {
        Self {
            status: QueryStatus::Error,
            data: None,
            error: Some(error),
            is_stale: false,
            fetched_at: None,
        }
    }
}

impl<T: Clone + 'static> QueryResult<T> {
    fn from_snapshot(snapshot: &Snapshot) -> Self {
        Self {
            status: snapshot.status,
            data: snapshot
                .data
                .as_ref()
                .and_then(|data| data.downcast_ref::<T>().cloned()),
            error: snapshot.error.clone(),
            is_stale: snapshot.is_stale,
            fetched_at: snapshot.fetched_at,
        }
    }
}

/// Which entries an invalidation reached, and what happened to each.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Invalidation {
    /// Subscribed entries whose refetch was started.
    pub refetched: Vec<CacheKey>,
    /// Entries with a request already in flight; they fetch again once it settles.
    pub deferred: Vec<CacheKey>,
    /// Unsubscribed entries marked stale; their next subscriber fetches.
    pub marked_stale: Vec<CacheKey>,
}

impl Invalidation {
    /// Returns `true` if no entry carried any of the tags.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.refetched.is_empty() && self.deferred.is_empty() && self.marked_stale.is_empty()
    }
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<CacheKey, CacheEntry>,
    tags: TagIndex,
    subscriptions: SubscriptionManager,
    invalidations: InvalidationLog,
}

impl CacheState {
    fn prune_invalidations(&mut self) {
        let oldest = self
            .entries
            .values()
            .filter(|entry| entry.in_flight.is_some())
            .map(|entry| entry.fetch_epoch)
            .min();
        self.invalidations.prune(oldest);
    }
}

struct ClientInner {
    executor: RequestExecutor,
    config: QueryConfig,
    state: Mutex<CacheState>,
}

/// The query cache.
///
/// The `QueryClient` is the central state manager for reads. It handles:
/// - Caching query results per [`CacheKey`]
/// - Deduplicating concurrent fetches of the same key
/// - Tracking subscribers and evicting unused entries
/// - Refetching or staling entries when their tags are invalidated
///
/// Construct one per session and clone it into whatever needs it; clones
/// share the same cache.
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use std::time::Duration;
/// use storekeep::subscription::http::{
///     ExecutorConfig, QueryClient, QueryConfig, RequestExecutor, StaticToken,
/// };
///
/// let executor = RequestExecutor::new(
///     ExecutorConfig::new("https://admin.example.com/api"),
///     Arc::new(StaticToken::new("token")),
/// );
/// let config = QueryConfig::new(
///     Some(Duration::from_secs(30)), // stale_time
///     Duration::from_secs(300),      // cache_time
/// );
///
/// let client = QueryClient::with_config(executor, config);
/// assert!(client.is_empty());
/// ```
#[derive(Clone)]
pub struct QueryClient {
    inner: Arc<ClientInner>,
}

impl std::fmt::Debug for QueryClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryClient")
            .field("config", &self.inner.config)
            .field("entries", &self.len())
            .finish_non_exhaustive()
    }
}

impl QueryClient {
    /// Creates a new query client with default configuration.
    #[must_use]
    pub fn new(executor: RequestExecutor) -> Self {
        Self::with_config(executor, QueryConfig::default())
    }

    /// Creates a new query client with the given configuration.
    #[must_use]
    pub fn with_config(executor: RequestExecutor, config: QueryConfig) -> Self {
        Self {
            inner: Arc::new(ClientInner {
                executor,
                config,
                state: Mutex::new(CacheState {
                    entries: HashMap::new(),
                    tags: TagIndex::new(),
                    subscriptions: SubscriptionManager::new(),
                    invalidations: InvalidationLog::new(),
                }),
            }),
        }
    }

    #[must_use]
    pub fn executor(&self) -> &RequestExecutor {
        &self.inner.executor
    }

    /// Gets the query configuration.
    #[must_use]
    pub fn config(&self) -> &QueryConfig {
        &self.inner.config
    }

    /// Subscribes to `E` called with `args`.
    ///
    /// The returned handle reports the entry's current state immediately and
    /// every later change until it is dropped. A fetch is started if the entry
    /// is new, stale, or failed; while one is in flight, further subscribers
    /// share it.
    ///
    /// # Errors
    ///
    /// Returns [`RequestError::InvalidArguments`] if `args` cannot be
    /// serialized into a cache key, and [`RequestError::NoRuntime`] when
    /// called outside a Tokio runtime. Nothing is subscribed in either case.
    /// Request failures are never returned here; they are reported through
    /// the handle.
    pub fn resolve<E: QueryEndpoint>(
        &self,
        args: E::Args,
    ) -> Result<QueryHandle<E::Output>, RequestError> {
        let key = CacheKey::new(E::NAME, &args)?;
        Handle::try_current().map_err(|_| RequestError::NoRuntime)?;

        let mut guard = self.inner.state.lock();
        let state = &mut *guard;
        let epoch = state.invalidations.epoch();

        let entry = state.entries.entry(key.clone()).or_insert_with(|| {
            debug!(key = %key, "creating cache entry");
            CacheEntry::new(key.clone(), fetcher::<E>(self.inner.executor.clone(), args))
        });

        let token = state.subscriptions.subscribe(entry);
        if entry.needs_fetch(self.inner.config.stale_time) {
            self.start_fetch(entry, epoch);
        }

        Ok(QueryHandle {
            client: self.clone(),
            key,
            token: Some(token),
            changes: entry.changes(),
            _marker: PhantomData,
        })
    }

    /// Re-enters `loading` on an existing entry and waits for the fetch to
    /// settle, regardless of its subscriber count.
    ///
    /// If a fetch is already in flight, no second request is made; this waits
    /// for the running one. Returns `false` if the entry does not exist or
    /// no Tokio runtime is running.
    pub async fn refetch(&self, key: &CacheKey) -> bool {
        let in_flight = {
            let mut guard = self.inner.state.lock();
            let state = &mut *guard;
            let epoch = state.invalidations.epoch();
            let Some(entry) = state.entries.get_mut(key) else {
                return false;
            };
            let Some(in_flight) = self.start_fetch(entry, epoch) else {
                return false;
            };
            in_flight
        };
        in_flight.await;
        true
    }

    /// Invalidates every entry carrying any of `tags`.
    ///
    /// Subscribed entries refetch in the background, entries with a request in
    /// flight fetch once more after it settles, and unsubscribed entries are
    /// marked stale so their next subscriber fetches. Outside a Tokio runtime
    /// subscribed entries are marked stale as well.
    ///
    /// A fetch that is still loading when this runs has no tags yet. If it
    /// settles with one of `tags`, it is fetched once more.
    pub fn invalidate_tags(&self, tags: &[Tag]) -> Invalidation {
        let mut guard = self.inner.state.lock();
        let state = &mut *guard;
        let epoch = state.invalidations.record(tags);

        let mut keys: Vec<CacheKey> = state.tags.keys_for(tags).into_iter().collect();
        keys.sort();

        let mut outcome = Invalidation::default();
        for key in keys {
            let Some(entry) = state.entries.get_mut(&key) else {
                continue;
            };
            if entry.in_flight.is_some() {
                entry.refetch_pending = true;
                outcome.deferred.push(key);
            } else if entry.subscribers > 0 && self.start_fetch(entry, epoch).is_some() {
                outcome.refetched.push(key);
            } else {
                entry.mark_stale();
                outcome.marked_stale.push(key);
            }
        }

        debug!(
            tags = tags.len(),
            refetched = outcome.refetched.len(),
            deferred = outcome.deferred.len(),
            marked_stale = outcome.marked_stale.len(),
            "invalidated tags"
        );
        state.prune_invalidations();
        outcome
    }

    /// Current state of `key`, if it is cached.
    ///
    /// Data of a different type than `T` reads as `None`.
    #[must_use]
    pub fn state<T: Clone + 'static>(&self, key: &CacheKey) -> Option<QueryResult<T>> {
        let state = self.inner.state.lock();
        state
            .entries
            .get(key)
            .map(|entry| QueryResult::from_snapshot(&entry.snapshot()))
    }

    #[must_use]
    pub fn contains(&self, key: &CacheKey) -> bool {
        self.inner.state.lock().entries.contains_key(key)
    }

    #[must_use]
    pub fn subscriber_count(&self, key: &CacheKey) -> usize {
        self.inner
            .state
            .lock()
            .entries
            .get(key)
            .map_or(0, |entry| entry.subscribers)
    }

    /// Tags the entry for `key` currently provides.
    #[must_use]
    pub fn tags_for(&self, key: &CacheKey) -> HashSet<Tag> {
        self.inner.state.lock().tags.tags_for(key)
    }

    /// Number of cached entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.state.lock().entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of live subscriptions across all keys.
    #[must_use]
    pub fn active_subscriptions(&self) -> usize {
        self.inner.state.lock().subscriptions.active()
    }

    /// Starts a fetch for `entry` unless one is already in flight, and returns
    /// the in-flight request either way. `epoch` is the invalidation epoch the
    /// fetch starts in. Returns `None` outside a Tokio runtime.
    fn start_fetch(&self, entry: &mut CacheEntry, epoch: u64) -> Option<InFlight> {
        if let Some(in_flight) = &entry.in_flight {
            return Some(in_flight.clone());
        }
        let runtime = Handle::try_current().ok()?;

        let seq = entry.begin_fetch();
        entry.fetch_epoch = epoch;
        debug!(key = %entry.key, seq, epoch, "fetching");

        let request = (entry.fetcher)();
        let client = self.clone();
        let key = entry.key.clone();
        let task = runtime.spawn(async move {
            let result = request.await;
            client.settle(&key, seq, result);
        });

        let in_flight: InFlight = task.map(|_| ()).boxed().shared();
        entry.in_flight = Some(in_flight.clone());
        Some(in_flight)
    }

    fn settle(&self, key: &CacheKey, seq: u64, result: Result<Fetched, RequestError>) {
        let mut guard = self.inner.state.lock();
        let state = &mut *guard;

        let Some(entry) = state.entries.get_mut(key) else {
            return;
        };
        if !entry.is_current(seq) {
            return;
        }

        // A loading entry has no tags, so an invalidation that landed during
        // the fetch is only caught here, against the tags it settles with.
        let raced = match result {
            Ok(fetched) => {
                let raced = state
                    .invalidations
                    .invalidated_since(entry.fetch_epoch, &fetched.tags);
                state.tags.register(key, fetched.tags);
                entry.update(fetched.data);
                debug!(key = %key, seq, "fetch succeeded");
                raced
            }
            Err(error) => {
                debug!(key = %key, seq, error = %error, "fetch failed");
                entry.fail(error);
                false
            }
        };

        let pending = std::mem::take(&mut entry.refetch_pending) || raced;
        let epoch = state.invalidations.epoch();
        if pending && entry.subscribers > 0 && self.start_fetch(entry, epoch).is_some() {
            debug!(key = %key, raced, "refetching after invalidation during fetch");
        } else {
            if pending {
                entry.mark_stale();
            }
            if entry.subscribers == 0 && !self.schedule_eviction(entry) {
                state.subscriptions.evict(key, &mut state.entries, &mut state.tags);
            }
        }
        state.prune_invalidations();
    }

    fn release(&self, token: &SubscriptionToken) {
        let mut guard = self.inner.state.lock();
        let state = &mut *guard;

        if !state.subscriptions.unsubscribe(token, &mut state.entries) {
            return;
        }
        let key = token.key();
        let Some(entry) = state.entries.get_mut(key) else {
            return;
        };
        debug!(key = %key, "last subscriber left");
        // An in-flight fetch reschedules eviction when it settles.
        if entry.in_flight.is_some() {
            return;
        }
        if !self.schedule_eviction(entry) {
            state.subscriptions.evict(key, &mut state.entries, &mut state.tags);
        }
    }

    /// Arms the grace timer for an unused entry. Returns `false` when there is
    /// no runtime to run the timer on.
    fn schedule_eviction(&self, entry: &mut CacheEntry) -> bool {
        let Ok(runtime) = Handle::try_current() else {
            return false;
        };

        let cancel = CancellationToken::new();
        if let Some(previous) = entry.eviction.replace(cancel.clone()) {
            previous.cancel();
        }

        let inner = Arc::downgrade(&self.inner);
        let key = entry.key.clone();
        let grace = self.inner.config.cache_time;
        runtime.spawn(async move {
            tokio::select! {
                () = cancel.cancelled() => {}
                () = tokio::time::sleep(grace) => {
                    if let Some(inner) = inner.upgrade() {
                        QueryClient { inner }.evict_if_unused(&key);
                    }
                }
            }
        });
        true
    }

    fn evict_if_unused(&self, key: &CacheKey) {
        let mut guard = self.inner.state.lock();
        let state = &mut *guard;
        if state.subscriptions.evict(key, &mut state.entries, &mut state.tags) {
            debug!(key = %key, "evicted unused entry");
        }
    }
}

fn fetcher<E: QueryEndpoint>(executor: RequestExecutor, args: E::Args) -> Fetcher {
    Arc::new(move || {
        let executor = executor.clone();
        let args = args.clone();
        async move {
            let raw = executor.execute(&E::request(&args)).await?;
            let data = E::transform(raw)?;
            let tags = E::provides_tags(&data, &args);
            Ok(Fetched {
                data: Arc::new(data),
                tags,
            })
        }
        .boxed()
    })
}

/// A live subscription to one cache key.
///
/// The subscription is released when the handle is dropped or
/// [`dispose`](Self::dispose)d, on every exit path. Releasing never cancels an
/// in-flight request.
pub struct QueryHandle<T> {
    client: QueryClient,
    key: CacheKey,
    token: Option<SubscriptionToken>,
    changes: broadcast::Receiver<Snapshot>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> std::fmt::Debug for QueryHandle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryHandle")
            .field("key", &self.key)
            .finish_non_exhaustive()
    }
}

impl<T> QueryHandle<T>
where
    T: Clone + Send + Sync + 'static,
{
    #[must_use]
    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    /// The entry's state right now.
    #[must_use]
    pub fn current(&self) -> QueryResult<T> {
        self.client.state(&self.key).unwrap_or(QueryResult {
            status: QueryStatus::Idle,
            data: None,
            error: None,
            is_stale: false,
            fetched_at: None,
        })
    }

    /// Waits for the next state change of the entry.
    ///
    /// If this handle fell behind, the missed changes are skipped and the
    /// current state is returned. Returns `None` once the cache is gone.
    pub async fn changed(&mut self) -> Option<QueryResult<T>> {
        match self.changes.recv().await {
            Ok(snapshot) => Some(QueryResult::from_snapshot(&snapshot)),
            Err(RecvError::Lagged(skipped)) => {
                debug!(key = %self.key, skipped, "subscriber lagged behind");
                self.changes = self.changes.resubscribe();
                Some(self.current())
            }
            Err(RecvError::Closed) => None,
        }
    }

    /// Waits until the entry is `success` or `error` and returns that state.
    ///
    /// Changes queued before the call are discarded, so a following
    /// [`changed`](Self::changed) reports only what happens afterwards.
    pub async fn settled(&mut self) -> QueryResult<T> {
        self.skip_queued();
        let mut latest = self.current();
        while !latest.is_settled() {
            match self.changed().await {
                Some(next) => latest = next,
                None => break,
            }
        }
        latest
    }

    /// Refetches this entry; see [`QueryClient::refetch`].
    pub async fn refetch(&self) -> bool {
        self.client.refetch(&self.key).await
    }

    /// The current state followed by every later change.
    ///
    /// Changes queued before the call are already reflected in the first
    /// item and are not repeated. The stream owns the handle; dropping the
    /// stream releases the subscription.
    pub fn into_stream(mut self) -> BoxStream<'static, QueryResult<T>> {
        self.skip_queued();
        let first = self.current();
        stream::once(async move { first })
            .chain(stream::unfold(self, |mut handle| async move {
                handle.changed().await.map(|result| (result, handle))
            }))
            .boxed()
    }

    /// Releases the subscription now.
    pub fn dispose(self) {
        drop(self);
    }

    fn skip_queued(&mut self) {
        loop {
            match self.changes.try_recv() {
                Ok(_) | Err(TryRecvError::Lagged(_)) => {}
                Err(TryRecvError::Empty | TryRecvError::Closed) => break,
            }
        }
    }
}

impl<T> Drop for QueryHandle<T> {
    fn drop(&mut self) {
        if let Some(token) = self.token.take() {
            self.client.release(&token);
        }
    }
}

/// A query as a subscription source.
///
/// Polling the stream subscribes to the cache; dropping it unsubscribes.
/// Every state change of the entry is emitted as a [`QueryResult`].
///
/// # Example
///
/// ```rust,ignore
/// use storekeep::subscription::Subscription;
/// use storekeep::subscription::http::Query;
///
/// let sub = Subscription::new(Query::<GetOrder>::new(5, client.clone()))
///     .map(Message::OrderLoaded);
/// ```
pub struct Query<E: QueryEndpoint> {
    args: E::Args,
    client: QueryClient,
}

impl<E: QueryEndpoint> Query<E> {
    pub fn new(args: E::Args, client: QueryClient) -> Self {
        Self { args, client }
    }
}

impl<E: QueryEndpoint> SubscriptionSource for Query<E> {
    type Output = QueryResult<E::Output>;

    fn stream(&self) -> BoxStream<'static, Self::Output> {
        let client = self.client.clone();
        let args = self.args.clone();

        stream::once(async move {
            match client.resolve::<E>(args) {
                Ok(handle) => handle.into_stream(),
                Err(error) => stream::once(async move { QueryResult::failed(error) }).boxed(),
            }
        })
        .flatten()
        .boxed()
    }

    fn id(&self) -> SubscriptionId {
        let mut hasher = DefaultHasher::new();
        E::NAME.hash(&mut hasher);
        if let Ok(key) = CacheKey::new(E::NAME, &self.args) {
            key.hash(&mut hasher);
        }
        SubscriptionId::of::<Self>(hasher.finish())
    }
}
