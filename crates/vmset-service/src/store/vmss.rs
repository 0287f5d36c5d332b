use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;

use super::{StoreOptions, call_client};
use crate::caching::{CacheEntry, CacheLoader, CacheName, Clock, TimedCache};
use crate::compute::{ComputeClient, ScaleSet};
use crate::config::CacheConfig;

#[derive(Clone, Debug)]
pub struct ScaleSetEntry {
    pub resource_group: String,
    pub scale_set: Arc<ScaleSet>,
    pub last_updated: DateTime<Utc>,
}

/// The scale sets of a resource group, by name.
pub type ScaleSetMap = Arc<HashMap<String, ScaleSetEntry>>;

struct ScaleSetLoader {
    client: Arc<dyn ComputeClient>,
    timeout: Duration,
}

impl ScaleSetLoader {
    async fn load_resource_group(&self, resource_group: &str) -> CacheEntry<ScaleSetMap> {
        let scale_sets = call_client(self.timeout, self.client.list_scale_sets(resource_group))
            .await
            .inspect_err(|e| {
                tracing::error!(resource_group, error = %e, "Failed to list scale sets");
            })?;

        let now = Utc::now();
        let mut entries = HashMap::with_capacity(scale_sets.len());
        for scale_set in scale_sets {
            let Some(name) = scale_set.name.clone().filter(|name| !name.is_empty()) else {
                tracing::warn!(resource_group, "Skipping scale set without a name");
                continue;
            };
            entries.insert(
                name,
                ScaleSetEntry {
                    resource_group: resource_group.to_owned(),
                    scale_set: Arc::new(scale_set),
                    last_updated: now,
                },
            );
        }

        Ok(Arc::new(entries))
    }
}

impl CacheLoader for ScaleSetLoader {
    type Key = String;
    type Value = ScaleSetMap;

    fn load<'a>(&'a self, key: &'a String) -> BoxFuture<'a, CacheEntry<ScaleSetMap>> {
        Box::pin(self.load_resource_group(key))
    }
}

/// The scale set index.
#[derive(Clone, Debug)]
pub struct ScaleSetStore {
    by_resource_group: TimedCache<ScaleSetLoader>,
}

impl ScaleSetStore {
    pub(crate) fn new(
        config: CacheConfig,
        timeout: Duration,
        client: Arc<dyn ComputeClient>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let by_resource_group = TimedCache::with_clock(
            CacheName::ScaleSetByResourceGroup,
            config.ttl,
            config.idle_timeout,
            ScaleSetLoader { client, timeout },
            clock,
        );
        Self { by_resource_group }
    }

    /// Returns all scale sets of a resource group, by name.
    pub async fn scale_sets_by_resource_group(
        &self,
        resource_group: &str,
        opts: StoreOptions,
    ) -> CacheEntry<ScaleSetMap> {
        self.by_resource_group
            .get(&resource_group.to_owned(), opts.read_policy)
            .await
    }

    /// Returns the scale set `name`, or `None` if the resource group has no such scale set.
    pub async fn get_scale_set_by_name(
        &self,
        resource_group: &str,
        name: &str,
        opts: StoreOptions,
    ) -> CacheEntry<Option<Arc<ScaleSet>>> {
        let scale_sets = self.scale_sets_by_resource_group(resource_group, opts).await?;
        Ok(scale_sets
            .get(name)
            .map(|entry| Arc::clone(&entry.scale_set)))
    }
}
