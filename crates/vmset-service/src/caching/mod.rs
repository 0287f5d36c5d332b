//! # Caching infrastructure
//!
//! Every read of compute resources goes through a [`TimedCache`]. The caches exist to shield the
//! compute API from the request storms that many concurrent control loops would otherwise
//! produce: a node status poller, a route controller and a load balancer reconciler may all ask
//! for the same resource group within the same second.
//!
//! ## Read policies
//!
//! Callers pick a [`ReadPolicy`] per read:
//!
//! - [`ReadPolicy::Default`] serves an entry as long as it is not older than the cache TTL, and
//!   otherwise reloads it before returning.
//! - [`ReadPolicy::ForceRefresh`] always reloads.
//! - [`ReadPolicy::UnsafeRead`] serves whatever is cached, however old, and never reloads. It
//!   returns [`CacheError::NotFound`] when nothing is cached. This is meant for hot paths where a
//!   slightly stale answer is better than waiting on the network.
//!
//! ## Request coalescing
//!
//! Each key has its own slot with its own lock. A reload is spawned as a separate task and
//! published on the slot as a shared channel; concurrent readers of the same key wait on that
//! channel instead of starting their own load. A load runs to completion even if everyone waiting
//! on it gives up.
//!
//! ## [`CacheEntry`] / [`CacheError`]
//!
//! Successful loads are stored, including empty results, so that "nothing there" is cached as
//! well. Errors are never stored: they are handed to every caller waiting on the failed load, and
//! the next [`ReadPolicy::Default`] read retries.
//!
//! [`CacheError::NotFound`] is special in that it is not a failure but a cache miss sentinel,
//! which callers use to try an alternate lookup path.
//!
//! ### Metrics
//!
//! Each metric is tagged with a `cache` field that corresponds to the [`CacheName`]:
//!
//! - `caches.access`: All accesses, additionally tagged with the read `policy`.
//! - `caches.memory.hit`: Accesses served by a fresh entry.
//! - `caches.memory.stale`: Accesses that found a stale entry and had to wait for a reload.
//! - `caches.channel.hit`: Accesses that joined a load already in flight.
//! - `caches.computation`: Actual loads being run.
//! - `caches.computation.duration`: How long loads took.
//! - `caches.computation.error`: Failed loads, tagged with the `error` kind.

mod cache_error;
mod clock;
mod config;
mod timed;

pub use cache_error::{CacheEntry, CacheError};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::CacheName;
pub use timed::{CacheLoader, ReadPolicy, TimedCache};
