use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use futures::future::BoxFuture;
use tokio::sync::Semaphore;
use vmset_service::caching::{Clock, ManualClock};
use vmset_service::compute::{
    AvailabilitySet, ClientError, ComputeClient, NodeResourceGroupResolver, ScaleSet, ScaleSetVm,
    Snapshot, SnapshotClient, VirtualMachine,
};
use vmset_service::config::Config;
use vmset_service::store::VmSetStore;
use vmset_service::vmset::VmSet;

pub use vmset_test::{fixture, read_fixture};

/// The compute API calls made by a [`FakeCompute`].
#[derive(Debug, Default)]
pub struct Calls {
    pub list_vms: AtomicUsize,
    pub list_scale_sets: AtomicUsize,
    pub list_scale_set_vms: AtomicUsize,
    pub list_availability_sets: AtomicUsize,
}

impl Calls {
    pub fn list_vms(&self) -> usize {
        self.list_vms.load(Ordering::SeqCst)
    }

    pub fn list_scale_sets(&self) -> usize {
        self.list_scale_sets.load(Ordering::SeqCst)
    }

    pub fn list_scale_set_vms(&self) -> usize {
        self.list_scale_set_vms.load(Ordering::SeqCst)
    }

    pub fn list_availability_sets(&self) -> usize {
        self.list_availability_sets.load(Ordering::SeqCst)
    }
}

/// A compute API backed by a [`Snapshot`] that counts its calls.
///
/// Listing VMs of a resource group can be held back with [`gate`](Self::gate) and made to fail
/// with [`fail`](Self::fail).
#[derive(Debug)]
pub struct FakeCompute {
    inner: SnapshotClient,
    calls: Calls,
    gates: Mutex<HashMap<String, Arc<Semaphore>>>,
    failing: Mutex<HashSet<String>>,
}

impl FakeCompute {
    pub fn new(snapshot: Snapshot) -> Self {
        Self {
            inner: SnapshotClient::new(snapshot),
            calls: Calls::default(),
            gates: Mutex::default(),
            failing: Mutex::default(),
        }
    }

    /// A fake serving `tests/fixtures/snapshot.json`.
    pub fn from_fixture() -> Self {
        let snapshot = serde_json::from_slice(&read_fixture("snapshot.json")).unwrap();
        Self::new(snapshot)
    }

    pub fn calls(&self) -> &Calls {
        &self.calls
    }

    /// Holds back every VM listing of `resource_group` until a permit is added to the returned
    /// semaphore.
    pub fn gate(&self, resource_group: &str) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        self.gates
            .lock()
            .unwrap()
            .insert(resource_group.to_owned(), Arc::clone(&gate));
        gate
    }

    /// Makes every VM listing of `resource_group` fail.
    pub fn fail(&self, resource_group: &str) {
        self.failing
            .lock()
            .unwrap()
            .insert(resource_group.to_owned());
    }

    /// Lets VM listings of `resource_group` succeed again.
    pub fn recover(&self, resource_group: &str) {
        self.failing.lock().unwrap().remove(resource_group);
    }
}

impl ComputeClient for FakeCompute {
    fn list_vms<'a>(
        &'a self,
        resource_group: &'a str,
    ) -> BoxFuture<'a, Result<Vec<VirtualMachine>, ClientError>> {
        Box::pin(async move {
            self.calls.list_vms.fetch_add(1, Ordering::SeqCst);

            let gate = self.gates.lock().unwrap().get(resource_group).cloned();
            if let Some(gate) = gate {
                let _permit = gate.acquire().await.unwrap();
            }
            if self.failing.lock().unwrap().contains(resource_group) {
                return Err(ClientError::Request("service unavailable".into()));
            }

            self.inner.list_vms(resource_group).await
        })
    }

    fn list_scale_sets<'a>(
        &'a self,
        resource_group: &'a str,
    ) -> BoxFuture<'a, Result<Vec<ScaleSet>, ClientError>> {
        self.calls.list_scale_sets.fetch_add(1, Ordering::SeqCst);
        self.inner.list_scale_sets(resource_group)
    }

    fn list_scale_set_vms<'a>(
        &'a self,
        resource_group: &'a str,
        scale_set: &'a str,
    ) -> BoxFuture<'a, Result<Vec<ScaleSetVm>, ClientError>> {
        self.calls.list_scale_set_vms.fetch_add(1, Ordering::SeqCst);
        self.inner.list_scale_set_vms(resource_group, scale_set)
    }

    fn list_availability_sets<'a>(
        &'a self,
        resource_group: &'a str,
    ) -> BoxFuture<'a, Result<Vec<AvailabilitySet>, ClientError>> {
        self.calls.list_availability_sets.fetch_add(1, Ordering::SeqCst);
        self.inner.list_availability_sets(resource_group)
    }
}

impl NodeResourceGroupResolver for FakeCompute {
    fn resource_group(&self, node_name: &str) -> Result<String, ClientError> {
        self.inner.resource_group(node_name)
    }
}

/// Setup tests and create a store on top of `compute`.
///
/// All caches of the store read the time from the returned clock. The `update_config` closure can
/// modify the default configuration before the store is created.
pub fn setup_store(
    compute: &Arc<FakeCompute>,
    update_config: impl FnOnce(&mut Config),
) -> (VmSetStore, Arc<ManualClock>) {
    vmset_test::setup();

    let mut config = Config::default();
    update_config(&mut config);

    let clock = Arc::new(ManualClock::new());
    let store = VmSetStore::with_clock(
        &config,
        Arc::clone(compute) as Arc<dyn ComputeClient>,
        Arc::clone(compute) as Arc<dyn NodeResourceGroupResolver>,
        Arc::clone(&clock) as Arc<dyn Clock>,
    );
    (store, clock)
}

/// Setup tests and create a [`VmSet`] serving the snapshot fixture.
pub fn setup_vm_set() -> (VmSet, Arc<FakeCompute>) {
    let compute = Arc::new(FakeCompute::from_fixture());
    let (store, _clock) = setup_store(&compute, |_| {});
    (VmSet::new(store), compute)
}
