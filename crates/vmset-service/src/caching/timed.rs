use std::fmt;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use futures::channel::oneshot;
use futures::future::{BoxFuture, FutureExt, Shared};

use super::{CacheEntry, CacheError, CacheName, Clock, SystemClock};
use crate::utils::defer::defer;

/// Controls how a [`TimedCache::get`] treats the cached entry.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ReadPolicy {
    /// Serve fresh entries from the cache, reload missing or stale ones.
    #[default]
    Default,
    /// Always reload, regardless of what is cached.
    ForceRefresh,
    /// Serve whatever is cached, even if stale. Never reloads.
    UnsafeRead,
}

impl AsRef<str> for ReadPolicy {
    fn as_ref(&self) -> &str {
        match self {
            Self::Default => "default",
            Self::ForceRefresh => "force_refresh",
            Self::UnsafeRead => "unsafe_read",
        }
    }
}

/// Loads the value of a single cache key from the outside world.
pub trait CacheLoader: 'static + Send + Sync {
    type Key: 'static + Send + Sync + Clone + Eq + Hash + fmt::Debug;
    type Value: 'static + Send + Sync + Clone;

    /// Fetches a fresh value for `key`.
    ///
    /// An `Ok` result is stored in the cache, whatever it contains. An `Err` is handed to the
    /// waiting callers and then dropped.
    fn load<'a>(&'a self, key: &'a Self::Key) -> BoxFuture<'a, CacheEntry<Self::Value>>;
}

#[derive(Clone, Debug)]
struct TimedEntry<V> {
    value: V,
    created_at: Instant,
}

type LoadChannel<V> = Shared<oneshot::Receiver<CacheEntry<V>>>;

struct InFlight<V> {
    id: u64,
    channel: LoadChannel<V>,
}

struct SlotState<V> {
    entry: Option<TimedEntry<V>>,
    in_flight: Option<InFlight<V>>,
}

impl<V> SlotState<V> {
    /// Clears the in-flight marker, but only if it still belongs to load `id`.
    fn finish_load(&mut self, id: u64) {
        if self.in_flight.as_ref().is_some_and(|f| f.id == id) {
            self.in_flight = None;
        }
    }
}

/// Everything the cache knows about one key, behind that key's own lock.
struct Slot<V> {
    state: Mutex<SlotState<V>>,
}

impl<V> Slot<V> {
    fn new() -> Self {
        Self {
            state: Mutex::new(SlotState {
                entry: None,
                in_flight: None,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SlotState<V>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A concurrent cache with per-entry time-to-live and request coalescing.
///
/// Every key has its own slot and lock. The decision whether to reload is made while holding that
/// lock, and a reload is spawned as a separate task whose result is shared by every caller asking
/// for the same key in the meantime. Loads for different keys never wait on each other, and no
/// lock is held while a load is running, so loaders are free to read from other caches.
pub struct TimedCache<L: CacheLoader> {
    name: CacheName,
    ttl: Duration,
    clock: Arc<dyn Clock>,
    loader: Arc<L>,
    slots: moka::sync::Cache<L::Key, Arc<Slot<L::Value>>>,
    next_load_id: Arc<AtomicU64>,
}

impl<L: CacheLoader> Clone for TimedCache<L> {
    fn clone(&self) -> Self {
        // https://github.com/rust-lang/rust/issues/26925
        TimedCache {
            name: self.name,
            ttl: self.ttl,
            clock: Arc::clone(&self.clock),
            loader: Arc::clone(&self.loader),
            slots: self.slots.clone(),
            next_load_id: Arc::clone(&self.next_load_id),
        }
    }
}

impl<L: CacheLoader> fmt::Debug for TimedCache<L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimedCache")
            .field("name", &self.name)
            .field("ttl", &self.ttl)
            .field("keys", &self.slots.entry_count())
            .finish()
    }
}

impl<L: CacheLoader> TimedCache<L> {
    /// Creates a cache that expires entries after `ttl`.
    ///
    /// Keys that are not read for `idle_timeout` are dropped, together with their entry. The idle
    /// timeout is raised to at least twice the `ttl`, so a dropped entry was stale anyway. There is
    /// no size bound: evicting a key while its entry is fresh or its load is running would reload
    /// it early or run two loads at once.
    pub fn new(name: CacheName, ttl: Duration, idle_timeout: Duration, loader: L) -> Self {
        Self::with_clock(name, ttl, idle_timeout, loader, Arc::new(SystemClock))
    }

    /// Same as [`new`](Self::new), reading the time from `clock`.
    pub fn with_clock(
        name: CacheName,
        ttl: Duration,
        idle_timeout: Duration,
        loader: L,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let slots = moka::sync::Cache::builder()
            .time_to_idle(idle_timeout.max(ttl.saturating_mul(2)))
            .name(name.as_ref())
            .build();

        TimedCache {
            name,
            ttl,
            clock,
            loader: Arc::new(loader),
            slots,
            next_load_id: Default::default(),
        }
    }

    pub fn name(&self) -> CacheName {
        self.name
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Reads `key` according to `policy`.
    ///
    /// # Errors
    ///
    /// - [`CacheError::NotFound`] for an [`UnsafeRead`](ReadPolicy::UnsafeRead) of a key that has
    ///   no entry.
    /// - Whatever the loader returned, if a load was necessary and failed.
    /// - [`CacheError::InternalError`] if the load task died without producing a result.
    pub async fn get(&self, key: &L::Key, policy: ReadPolicy) -> CacheEntry<L::Value> {
        let name = self.name;
        metric!(
            counter("caches.access") += 1,
            "cache" => name.as_ref(),
            "policy" => policy.as_ref(),
        );

        if policy == ReadPolicy::UnsafeRead {
            return self.peek(key).ok_or(CacheError::NotFound);
        }

        let slot = self.slots.get_with(key.clone(), || Arc::new(Slot::new()));

        let channel = {
            let mut state = slot.lock();

            if policy == ReadPolicy::Default {
                if let Some(entry) = &state.entry {
                    if self.is_fresh(entry) {
                        metric!(counter("caches.memory.hit") += 1, "cache" => name.as_ref());
                        return Ok(entry.value.clone());
                    }
                    metric!(counter("caches.memory.stale") += 1, "cache" => name.as_ref());
                }
            }

            match &state.in_flight {
                Some(in_flight) => {
                    // A concurrent lookup was deduplicated.
                    metric!(counter("caches.channel.hit") += 1, "cache" => name.as_ref());
                    in_flight.channel.clone()
                }
                None => {
                    let in_flight = self.spawn_load(key.clone(), Arc::clone(&slot));
                    let channel = in_flight.channel.clone();
                    state.in_flight = Some(in_flight);
                    channel
                }
            }
        };

        channel.await.unwrap_or_else(|_cancelled| {
            tracing::error!(cache = %name, ?key, "cache load was dropped before completing");
            Err(CacheError::InternalError)
        })
    }

    /// Stores `value` under `key` as a freshly loaded entry.
    ///
    /// A load that is in flight for `key` still completes and overwrites the entry.
    pub fn set(&self, key: L::Key, value: L::Value) {
        let slot = self.slots.get_with(key, || Arc::new(Slot::new()));
        slot.lock().entry = Some(TimedEntry {
            value,
            created_at: self.clock.now(),
        });
    }

    /// Forgets everything about `key`.
    ///
    /// A load that is in flight for `key` still completes, and callers already waiting on it get
    /// its result, but the result is not visible to later reads.
    pub fn delete(&self, key: &L::Key) {
        self.slots.invalidate(key);
    }

    fn peek(&self, key: &L::Key) -> Option<L::Value> {
        let slot = self.slots.get(key)?;
        let state = slot.lock();
        state.entry.as_ref().map(|entry| entry.value.clone())
    }

    fn is_fresh(&self, entry: &TimedEntry<L::Value>) -> bool {
        self.clock.now().saturating_duration_since(entry.created_at) <= self.ttl
    }

    /// Spawns a load of `key` that publishes its result into `slot`.
    ///
    /// The load runs to completion on its own task, even if every caller waiting on it goes away.
    fn spawn_load(&self, key: L::Key, slot: Arc<Slot<L::Value>>) -> InFlight<L::Value> {
        let name = self.name;
        let id = self.next_load_id.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = oneshot::channel();
        let loader = Arc::clone(&self.loader);
        let clock = Arc::clone(&self.clock);

        let task = async move {
            // Clears the marker if the loader panics or the task is cancelled.
            let _in_flight_token = {
                let slot = Arc::clone(&slot);
                defer(move || slot.lock().finish_load(id))
            };

            metric!(counter("caches.computation") += 1, "cache" => name.as_ref());
            tracing::trace!(cache = %name, ?key, "Loading cache entry");

            let start = Instant::now();
            let result = loader.load(&key).await;
            metric!(timer("caches.computation.duration") = start.elapsed(), "cache" => name.as_ref());

            {
                let mut state = slot.lock();
                match &result {
                    Ok(value) => {
                        state.entry = Some(TimedEntry {
                            value: value.clone(),
                            created_at: clock.now(),
                        });
                    }
                    Err(err) => {
                        metric!(
                            counter("caches.computation.error") += 1,
                            "cache" => name.as_ref(),
                            "error" => err.metrics_tag(),
                        );
                        tracing::debug!(cache = %name, ?key, error = %err, "Failed to load cache entry");
                    }
                }
                // Entry and in-flight marker change under the same lock.
                state.finish_load(id);
            }

            sender.send(result).ok();
        };
        tokio::spawn(task);

        InFlight {
            id,
            channel: receiver.shared(),
        }
    }
}
