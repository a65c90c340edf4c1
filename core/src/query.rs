//! Query cache coordinator.
//!
//! # Design
//! `QueryClient` is the only owner of cached server state. Entries live in a
//! `HashMap<QueryKey, Entry>` behind a `parking_lot::Mutex` that is never held
//! across an await. Reads go through `fetch`, which serves fresh data
//! directly, joins an in-flight fetch for the same key, or starts a new one.
//! Data past its stale time is still served while a refetch runs in the
//! background. Fetches run on spawned tasks and are shared through `Shared`
//! handles, so concurrent readers of one key wait on a single request and its
//! retries, and a fetch finishes even if all of its readers are cancelled.
//!
//! Each fetch start bumps the entry's generation. `invalidate` bumps it as
//! well and detaches the in-flight fetch: the detached fetch still answers the
//! callers already waiting on it, but its result no longer lands in the store,
//! so the next read after a mutation always issues a fresh request.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::QueryConfig;
use crate::error::ApiError;
use crate::retry::{self, RetryPredicate};
use crate::types::OrganizationId;

/// Logical identifier of a cached resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum QueryKey {
    OnboardingStatus,
    OrganizationWithProjects,
    Organizations,
    Organization(OrganizationId),
    Projects(OrganizationId),
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryKey::OnboardingStatus => f.write_str("onboarding-status"),
            QueryKey::OrganizationWithProjects => f.write_str("organization-with-projects"),
            QueryKey::Organizations => f.write_str("organizations"),
            QueryKey::Organization(id) => write!(f, "organization/{id}"),
            QueryKey::Projects(id) => write!(f, "projects/{id}"),
        }
    }
}

/// Notifications for subscribers of cache changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryEvent {
    /// New data was stored for the key.
    Updated(QueryKey),
    /// The key's data is no longer trustworthy; observers should refetch.
    Invalidated(QueryKey),
    /// The entry was evicted or removed.
    Removed(QueryKey),
}

/// Per-read options.
#[derive(Debug, Clone, Copy)]
pub struct QueryOptions {
    pub retry: RetryPredicate,
}

impl QueryOptions {
    pub fn new(retry: RetryPredicate) -> Self {
        Self { retry }
    }
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self::new(retry::default_query)
    }
}

type Value = Arc<dyn Any + Send + Sync>;
type InFlight = Shared<BoxFuture<'static, Result<Value, ApiError>>>;

struct Entry {
    data: Option<Value>,
    fetched_at: Option<Instant>,
    last_used: Instant,
    invalidated: bool,
    generation: u64,
    in_flight: Option<InFlight>,
}

impl Entry {
    fn new(now: Instant) -> Self {
        Self {
            data: None,
            fetched_at: None,
            last_used: now,
            invalidated: false,
            generation: 0,
            in_flight: None,
        }
    }

    fn is_fresh(&self, now: Instant, stale_time: std::time::Duration) -> bool {
        match (self.data.is_some(), self.fetched_at) {
            (true, Some(at)) => !self.invalidated && now.duration_since(at) < stale_time,
            _ => false,
        }
    }

    fn store(&mut self, value: Value, now: Instant) {
        self.data = Some(value);
        self.fetched_at = Some(now);
        self.invalidated = false;
    }
}

struct Inner {
    config: QueryConfig,
    store: Mutex<HashMap<QueryKey, Entry>>,
    events: broadcast::Sender<QueryEvent>,
}

/// Cache of server state keyed by `QueryKey`. Clones share one store.
#[derive(Clone)]
pub struct QueryClient {
    inner: Arc<Inner>,
}

impl fmt::Debug for QueryClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryClient")
            .field("config", &self.inner.config)
            .field("entries", &self.inner.store.lock().len())
            .finish()
    }
}

impl Default for QueryClient {
    fn default() -> Self {
        Self::new(QueryConfig::default())
    }
}

impl QueryClient {
    pub fn new(config: QueryConfig) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            inner: Arc::new(Inner {
                config,
                store: Mutex::new(HashMap::new()),
                events,
            }),
        }
    }

    pub fn config(&self) -> &QueryConfig {
        &self.inner.config
    }

    pub fn subscribe(&self) -> broadcast::Receiver<QueryEvent> {
        self.inner.events.subscribe()
    }

    /// Read `key`. Fresh data is returned as is. Data that is only past its
    /// stale time is returned too, and a refetch starts in the background.
    /// Invalidated or missing data waits for a fetch, joining the one already
    /// in flight for the key if there is one.
    pub async fn fetch<T, F, Fut>(&self, key: QueryKey, options: QueryOptions, fetcher: F) -> Result<T, ApiError>
    where
        T: Clone + Send + Sync + 'static,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, ApiError>> + Send + 'static,
    {
        let in_flight = {
            let now = Instant::now();
            let mut store = self.inner.store.lock();
            self.evict_idle(&mut store, now);

            let entry = store.entry(key.clone()).or_insert_with(|| Entry::new(now));
            entry.last_used = now;

            let cached = entry.data.as_ref().and_then(|v| v.downcast_ref::<T>()).cloned();
            if let Some(value) = &cached {
                if entry.is_fresh(now, self.inner.config.stale_time) {
                    debug!(key = %key, "serving cached value");
                    return Ok(value.clone());
                }
            }
            let stale = cached.filter(|_| !entry.invalidated);

            let in_flight = match &entry.in_flight {
                Some(in_flight) => {
                    debug!(key = %key, "joining in-flight fetch");
                    in_flight.clone()
                }
                None => {
                    entry.generation += 1;
                    let in_flight = self.start_fetch(key.clone(), entry.generation, options.retry, fetcher);
                    entry.in_flight = Some(in_flight.clone());
                    in_flight
                }
            };

            if let Some(value) = stale {
                debug!(key = %key, "serving stale value while refetching");
                return Ok(value);
            }
            in_flight
        };

        let value = in_flight.await?;
        value
            .downcast_ref::<T>()
            .cloned()
            .ok_or_else(|| ApiError::Deserialization {
                status: 0,
                message: format!("cached value for {key} has a different type"),
            })
    }

    /// Spawn the fetch so it runs to completion and stores its result even
    /// when every caller waiting on it has gone away.
    fn start_fetch<T, F, Fut>(&self, key: QueryKey, generation: u64, retry: RetryPredicate, fetcher: F) -> InFlight
    where
        T: Clone + Send + Sync + 'static,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, ApiError>> + Send + 'static,
    {
        let client = self.clone();
        let task = tokio::spawn(async move {
            let result = with_retry(&key, &client.inner.config, retry, fetcher)
                .await
                .map(|value| Arc::new(value) as Value);
            client.complete_fetch(&key, generation, &result);
            result
        });
        task.map(|joined| match joined {
            Ok(result) => result,
            Err(e) => Err(ApiError::Network(format!("fetch task failed: {e}"))),
        })
        .boxed()
        .shared()
    }

    /// Store the outcome of a fetch unless an invalidation detached it.
    fn complete_fetch(&self, key: &QueryKey, generation: u64, result: &Result<Value, ApiError>) {
        let stored = {
            let mut store = self.inner.store.lock();
            let Some(entry) = store.get_mut(key) else {
                return;
            };
            if entry.generation != generation || entry.in_flight.is_none() {
                return;
            }
            entry.in_flight = None;
            match result {
                Ok(value) => {
                    entry.store(Arc::clone(value), Instant::now());
                    true
                }
                Err(_) => false,
            }
        };
        if stored {
            self.emit(QueryEvent::Updated(key.clone()));
        }
    }

    /// Run a mutation with the mutation retry policy, then invalidate `invalidates` on success.
    pub async fn mutate<T, F, Fut>(&self, invalidates: &[QueryKey], mutation: F) -> Result<T, ApiError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, ApiError>>,
    {
        self.mutate_with(retry::mutation, invalidates, mutation).await
    }

    pub async fn mutate_with<T, F, Fut>(
        &self,
        retry: RetryPredicate,
        invalidates: &[QueryKey],
        mutation: F,
    ) -> Result<T, ApiError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, ApiError>>,
    {
        let label = match invalidates.first() {
            Some(key) => format!("mutation({key})"),
            None => "mutation".to_string(),
        };
        let value = with_retry(&label, &self.inner.config, retry, mutation).await?;
        self.invalidate_many(invalidates);
        Ok(value)
    }

    /// Cached value for `key`, without any network call.
    pub fn get_query_data<T: Clone + 'static>(&self, key: &QueryKey) -> Option<T> {
        let mut store = self.inner.store.lock();
        let entry = store.get_mut(key)?;
        entry.last_used = Instant::now();
        entry.data.as_ref()?.downcast_ref::<T>().cloned()
    }

    /// Store `value` under `key` as freshly fetched.
    pub fn set_query_data<T: Send + Sync + 'static>(&self, key: QueryKey, value: T) {
        {
            let now = Instant::now();
            let mut store = self.inner.store.lock();
            let entry = store.entry(key.clone()).or_insert_with(|| Entry::new(now));
            entry.last_used = now;
            entry.store(Arc::new(value), now);
        }
        self.emit(QueryEvent::Updated(key));
    }

    /// Whether the data for `key` is missing, invalidated or past its stale time.
    pub fn is_stale(&self, key: &QueryKey) -> bool {
        let store = self.inner.store.lock();
        store
            .get(key)
            .map_or(true, |entry| !entry.is_fresh(Instant::now(), self.inner.config.stale_time))
    }

    /// Mark `key` stale and detach any in-flight fetch for it.
    pub fn invalidate(&self, key: &QueryKey) {
        self.invalidate_many(std::slice::from_ref(key));
    }

    pub fn invalidate_many(&self, keys: &[QueryKey]) {
        let mut invalidated = Vec::new();
        {
            let mut store = self.inner.store.lock();
            for key in keys {
                if let Some(entry) = store.get_mut(key) {
                    entry.invalidated = true;
                    entry.in_flight = None;
                    entry.generation += 1;
                    invalidated.push(key.clone());
                }
            }
        }
        for key in invalidated {
            debug!(key = %key, "invalidated");
            self.emit(QueryEvent::Invalidated(key));
        }
    }

    /// Invalidate every entry. Returns how many were invalidated.
    pub fn invalidate_all(&self) -> usize {
        let keys: Vec<QueryKey> = self.inner.store.lock().keys().cloned().collect();
        self.invalidate_many(&keys);
        keys.len()
    }

    pub fn remove(&self, key: &QueryKey) {
        let removed = self.inner.store.lock().remove(key).is_some();
        if removed {
            self.emit(QueryEvent::Removed(key.clone()));
        }
    }

    pub fn clear(&self) {
        let keys: Vec<QueryKey> = self.inner.store.lock().drain().map(|(key, _)| key).collect();
        for key in keys {
            self.emit(QueryEvent::Removed(key));
        }
    }

    /// Evict entries unused for `gc_time`. Returns how many were evicted.
    pub fn collect_garbage(&self) -> usize {
        let mut store = self.inner.store.lock();
        self.evict_idle(&mut store, Instant::now())
    }

    /// Network came back: every entry must be refetched on its next read.
    pub fn on_reconnect(&self) -> usize {
        if self.inner.config.refetch_on_reconnect {
            self.invalidate_all()
        } else {
            0
        }
    }

    pub fn on_window_focus(&self) -> usize {
        if self.inner.config.refetch_on_window_focus {
            self.invalidate_all()
        } else {
            0
        }
    }

    pub fn len(&self) -> usize {
        self.inner.store.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn evict_idle(&self, store: &mut HashMap<QueryKey, Entry>, now: Instant) -> usize {
        let gc_time = self.inner.config.gc_time;
        let idle: Vec<QueryKey> = store
            .iter()
            .filter(|(_, entry)| entry.in_flight.is_none() && now.duration_since(entry.last_used) >= gc_time)
            .map(|(key, _)| key.clone())
            .collect();
        for key in &idle {
            store.remove(key);
            debug!(key = %key, "evicted idle entry");
            self.emit(QueryEvent::Removed(key.clone()));
        }
        idle.len()
    }

    fn emit(&self, event: QueryEvent) {
        // Sending only fails when nobody is subscribed.
        let _ = self.inner.events.send(event);
    }
}

async fn with_retry<T, F, Fut>(
    label: &(dyn fmt::Display + Sync),
    config: &QueryConfig,
    retry: RetryPredicate,
    attempt: F,
) -> Result<T, ApiError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, ApiError>>,
{
    let mut failures = 0u32;
    loop {
        match attempt().await {
            Ok(value) => return Ok(value),
            Err(error) => {
                failures += 1;
                if !retry(failures, &error) {
                    return Err(error);
                }
                let delay = retry::retry_delay(failures - 1, config.retry_base_delay, config.max_retry_delay);
                warn!(
                    key = %label,
                    failures,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "retrying"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}
