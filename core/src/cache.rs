//! Process-wide read cache shared by the query hooks.
//!
//! # Design
//! Each `CacheKey` owns one entry: the latest `QuerySnapshot`, a pending flag
//! and a stale flag. Snapshots are published through a `tokio::sync::watch`
//! channel, so every view subscribed to a key observes whole snapshots,
//! never a half-written one, and receives updates after each fetch.
//!
//! - At most one fetch per key is in flight. A second `fetch` while one is
//!   pending waits for the running fetch instead of issuing another request;
//!   a `revalidate` while pending coalesces the same way.
//! - Fetches run on a spawned task. A caller that goes away (a view that was
//!   closed) stops receiving results, but the request itself still completes
//!   and lands in the cache.
//! - Stale data stays in the snapshot while a refetch is running and when it
//!   fails; a failure only sets `error`.
//!
//! Values are stored type-erased and downcast by the typed queries in
//! `query`. The entry map sits behind a `std::sync::Mutex` that is never held
//! across an await point.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::watch;
use tracing::{debug, warn};

use crate::error::ApiError;

pub type CachedValue = Arc<dyn Any + Send + Sync>;

/// Identifies one cached read: operation name plus its encoded parameters.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    operation: &'static str,
    params: String,
}

impl CacheKey {
    pub fn new(operation: &'static str, params: impl Into<String>) -> Self {
        Self {
            operation,
            params: params.into(),
        }
    }

    pub fn operation(&self) -> &'static str {
        self.operation
    }

    pub fn params(&self) -> &str {
        &self.params
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.operation, self.params)
    }
}

/// What a subscriber sees for one key at one instant.
#[derive(Clone, Default)]
pub struct QuerySnapshot {
    data: Option<CachedValue>,
    error: Option<ApiError>,
    is_loading: bool,
}

impl QuerySnapshot {
    /// The cached value, if present and of type `T`.
    pub fn data<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.data.clone()?.downcast::<T>().ok()
    }

    pub fn has_data(&self) -> bool {
        self.data.is_some()
    }

    pub fn error(&self) -> Option<&ApiError> {
        self.error.as_ref()
    }

    pub fn is_loading(&self) -> bool {
        self.is_loading
    }
}

impl fmt::Debug for QuerySnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QuerySnapshot")
            .field("has_data", &self.data.is_some())
            .field("error", &self.error)
            .field("is_loading", &self.is_loading)
            .finish()
    }
}

struct Entry {
    state: watch::Sender<QuerySnapshot>,
    pending: bool,
    stale: bool,
}

impl Entry {
    fn new() -> Self {
        let (state, _) = watch::channel(QuerySnapshot::default());
        Self {
            state,
            pending: false,
            stale: false,
        }
    }
}

type Entries = Arc<Mutex<HashMap<CacheKey, Entry>>>;

fn lock(entries: &Entries) -> MutexGuard<'_, HashMap<CacheKey, Entry>> {
    entries.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Shared, cloneable handle to the cache. Clones share the same entries.
#[derive(Clone, Default)]
pub struct QueryCache {
    entries: Entries,
}

impl QueryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached value for `key`, fetching it if there is none.
    ///
    /// Fresh cached data is returned without a request; a pending fetch for
    /// the same key is joined rather than duplicated.
    pub async fn fetch<T, F, Fut>(&self, key: CacheKey, fetcher: F) -> Result<Arc<T>, ApiError>
    where
        T: Any + Send + Sync,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, ApiError>> + Send + 'static,
    {
        self.run(key, fetcher, false).await
    }

    /// Force a new fetch for `key`, coalescing with one already in flight.
    pub async fn revalidate<T, F, Fut>(
        &self,
        key: CacheKey,
        fetcher: F,
    ) -> Result<Arc<T>, ApiError>
    where
        T: Any + Send + Sync,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, ApiError>> + Send + 'static,
    {
        self.run(key, fetcher, true).await
    }

    async fn run<T, F, Fut>(&self, key: CacheKey, fetcher: F, force: bool) -> Result<Arc<T>, ApiError>
    where
        T: Any + Send + Sync,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, ApiError>> + Send + 'static,
    {
        let mut rx = {
            let mut entries = lock(&self.entries);
            let entry = entries.entry(key.clone()).or_insert_with(Entry::new);

            if !force && !entry.pending && !entry.stale {
                let cached = entry.state.borrow().data.clone();
                if let Some(data) = cached {
                    debug!(%key, "Serving cached value");
                    return downcast(&key, data);
                }
            }

            let rx = entry.state.subscribe();
            if entry.pending {
                debug!(%key, "Joining in-flight fetch");
            } else {
                entry.pending = true;
                entry.stale = false;
                entry.state.send_modify(|s| s.is_loading = true);
                debug!(%key, "Starting fetch");
                self.spawn_fetch(key.clone(), fetcher());
            }
            rx
        };

        let snapshot = rx
            .wait_for(|s| !s.is_loading)
            .await
            .map(|s| s.clone())
            .map_err(|_| ApiError::Transport(format!("cache entry {key} was dropped")))?;

        if let Some(error) = snapshot.error {
            return Err(error);
        }
        match snapshot.data {
            Some(data) => downcast(&key, data),
            None => Err(ApiError::Deserialization(format!("no cached value for {key}"))),
        }
    }

    fn spawn_fetch<T, Fut>(&self, key: CacheKey, fut: Fut)
    where
        T: Any + Send + Sync,
        Fut: Future<Output = Result<T, ApiError>> + Send + 'static,
    {
        let entries = Arc::clone(&self.entries);
        tokio::spawn(async move {
            let result = fut.await;
            let mut entries = lock(&entries);
            let Some(entry) = entries.get_mut(&key) else {
                return;
            };
            entry.pending = false;
            entry.state.send_modify(|s| {
                s.is_loading = false;
                match result {
                    Ok(value) => {
                        let value: CachedValue = Arc::new(value);
                        s.data = Some(value);
                        s.error = None;
                    }
                    Err(error) => {
                        warn!(%key, %error, "Fetch failed, keeping last known data");
                        s.error = Some(error);
                    }
                }
            });
        });
    }

    /// Mark `key` stale so the next `fetch` goes to the network. The cached
    /// data stays visible until the new value arrives.
    pub fn invalidate(&self, key: &CacheKey) -> bool {
        let mut entries = lock(&self.entries);
        match entries.get_mut(key) {
            Some(entry) => {
                entry.stale = true;
                true
            }
            None => false,
        }
    }

    /// Invalidate every key of one operation, returning how many were marked.
    pub fn invalidate_operation(&self, operation: &str) -> usize {
        let mut entries = lock(&self.entries);
        let mut marked = 0;
        for (key, entry) in entries.iter_mut() {
            if key.operation == operation {
                entry.stale = true;
                marked += 1;
            }
        }
        marked
    }

    pub fn is_stale(&self, key: &CacheKey) -> bool {
        lock(&self.entries).get(key).is_some_and(|e| e.stale)
    }

    pub fn snapshot(&self, key: &CacheKey) -> QuerySnapshot {
        lock(&self.entries)
            .get(key)
            .map(|e| e.state.borrow().clone())
            .unwrap_or_default()
    }

    /// Receive every snapshot published for `key` from now on.
    pub fn subscribe(&self, key: &CacheKey) -> watch::Receiver<QuerySnapshot> {
        let mut entries = lock(&self.entries);
        entries
            .entry(key.clone())
            .or_insert_with(Entry::new)
            .state
            .subscribe()
    }
}

fn downcast<T: Any + Send + Sync>(key: &CacheKey, data: CachedValue) -> Result<Arc<T>, ApiError> {
    data.downcast::<T>()
        .map_err(|_| ApiError::Deserialization(format!("cached value for {key} has another type")))
}
