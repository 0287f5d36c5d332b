use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;

use super::{StoreOptions, call_client};
use crate::caching::{CacheEntry, CacheLoader, CacheName, Clock, TimedCache};
use crate::compute::{AvailabilitySet, ComputeClient};
use crate::config::CacheConfig;

#[derive(Clone, Debug)]
pub struct AvailabilitySetEntry {
    pub resource_group: String,
    pub availability_set: Arc<AvailabilitySet>,
    pub last_updated: DateTime<Utc>,
}

/// The availability sets of a resource group, by lowercased name.
///
/// VMs reference their availability set in upper case, while the set itself may be named in any
/// case, so lookups are case insensitive.
pub type AvailabilitySetMap = Arc<HashMap<String, AvailabilitySetEntry>>;

struct AvailabilitySetLoader {
    client: Arc<dyn ComputeClient>,
    timeout: Duration,
}

impl AvailabilitySetLoader {
    async fn load_resource_group(&self, resource_group: &str) -> CacheEntry<AvailabilitySetMap> {
        let availability_sets =
            call_client(self.timeout, self.client.list_availability_sets(resource_group))
                .await
                .inspect_err(|e| {
                    tracing::error!(resource_group, error = %e, "Failed to list availability sets");
                })?;

        let now = Utc::now();
        let mut entries = HashMap::with_capacity(availability_sets.len());
        for availability_set in availability_sets {
            let Some(name) = availability_set.name.as_deref().filter(|name| !name.is_empty())
            else {
                tracing::warn!(resource_group, "Skipping availability set without a name");
                continue;
            };
            entries.insert(
                name.to_lowercase(),
                AvailabilitySetEntry {
                    resource_group: resource_group.to_owned(),
                    availability_set: Arc::new(availability_set),
                    last_updated: now,
                },
            );
        }

        Ok(Arc::new(entries))
    }
}

impl CacheLoader for AvailabilitySetLoader {
    type Key = String;
    type Value = AvailabilitySetMap;

    fn load<'a>(&'a self, key: &'a String) -> BoxFuture<'a, CacheEntry<AvailabilitySetMap>> {
        Box::pin(self.load_resource_group(key))
    }
}

/// The availability set index.
#[derive(Clone, Debug)]
pub struct AvailabilitySetStore {
    by_resource_group: TimedCache<AvailabilitySetLoader>,
}

impl AvailabilitySetStore {
    pub(crate) fn new(
        config: CacheConfig,
        timeout: Duration,
        client: Arc<dyn ComputeClient>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let by_resource_group = TimedCache::with_clock(
            CacheName::AvailabilitySetByResourceGroup,
            config.ttl,
            config.idle_timeout,
            AvailabilitySetLoader { client, timeout },
            clock,
        );
        Self { by_resource_group }
    }

    /// Returns all availability sets of a resource group, by lowercased name.
    pub async fn availability_sets_by_resource_group(
        &self,
        resource_group: &str,
        opts: StoreOptions,
    ) -> CacheEntry<AvailabilitySetMap> {
        self.by_resource_group
            .get(&resource_group.to_owned(), opts.read_policy)
            .await
    }

    /// Returns the availability set `name`, compared case insensitively, or `None` if the resource
    /// group has no such set.
    pub async fn get_availability_set_by_name(
        &self,
        resource_group: &str,
        name: &str,
        opts: StoreOptions,
    ) -> CacheEntry<Option<Arc<AvailabilitySet>>> {
        let availability_sets = self
            .availability_sets_by_resource_group(resource_group, opts)
            .await?;
        Ok(availability_sets
            .get(&name.to_lowercase())
            .map(|entry| Arc::clone(&entry.availability_set)))
    }
}
