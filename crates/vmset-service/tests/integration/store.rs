use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use vmset_service::caching::{CacheError, ReadPolicy};
use vmset_service::store::StoreOptions;

use crate::utils::{FakeCompute, setup_store};

const DEFAULT: StoreOptions = StoreOptions {
    read_policy: ReadPolicy::Default,
};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_reads_list_once() {
    let compute = Arc::new(FakeCompute::from_fixture());
    let (store, _clock) = setup_store(&compute, |_| {});
    let gate = compute.gate("rg");

    let tasks: Vec<_> = (0..10)
        .map(|_| {
            let store = store.clone();
            tokio::spawn(async move { store.vms_by_resource_group("rg", DEFAULT).await })
        })
        .collect();

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(compute.calls().list_vms(), 1);
    gate.add_permits(1);

    for result in join_all(tasks).await {
        let vms = result.unwrap().unwrap();
        let mut names: Vec<_> = vms.keys().map(String::as_str).collect();
        names.sort();
        assert_eq!(names, ["flex-a1b2", "ss1_0", "ss1_3", "vm1", "vm2"]);
    }
    assert_eq!(compute.calls().list_vms(), 1);
    assert_eq!(compute.calls().list_scale_sets(), 1);
    // Only the uniform scale set is listed separately.
    assert_eq!(compute.calls().list_scale_set_vms(), 1);
}

#[tokio::test]
async fn test_missing_resource_group_is_empty() {
    let compute = Arc::new(FakeCompute::from_fixture());
    let (store, _clock) = setup_store(&compute, |_| {});

    let vms = store.vms_by_resource_group("missing", DEFAULT).await.unwrap();
    assert!(vms.is_empty());
    let vms = store.vms_by_resource_group("missing", DEFAULT).await.unwrap();
    assert!(vms.is_empty());
    assert_eq!(compute.calls().list_vms(), 1);

    let result = store
        .get_vm_by_resource_group_and_name("missing", "vm1", DEFAULT)
        .await;
    assert_eq!(result.unwrap_err(), CacheError::NotFound);

    // The set indices report the missing resource group instead.
    let result = store
        .get_availability_set_by_name("missing", "as1", DEFAULT)
        .await;
    assert_eq!(
        result.unwrap_err(),
        CacheError::ResourceGroupNotFound("missing".into())
    );
}

#[tokio::test]
async fn test_scale_set_lookups() {
    let compute = Arc::new(FakeCompute::from_fixture());
    let (store, _clock) = setup_store(&compute, |_| {});

    let vm = store
        .get_vm_by_scale_set_and_instance_id("rg", "ss1", "3", DEFAULT)
        .await
        .unwrap();
    assert_eq!(vm.name(), "ss1_3");
    assert!(vm.is_scale_set_vm_variant());

    let vm = store
        .get_vm_by_scale_set_and_name("rg", "flex", "flex-a1b2", DEFAULT)
        .await
        .unwrap();
    assert!(vm.is_standalone_variant());
    assert!(vm.is_scale_set_managed());

    let result = store
        .get_vm_by_scale_set_and_instance_id("rg", "ss1", "7", DEFAULT)
        .await;
    assert_eq!(result.unwrap_err(), CacheError::NotFound);

    let result = store
        .get_vm_by_scale_set_and_name("rg", "ss1", "flex-a1b2", DEFAULT)
        .await;
    assert_eq!(result.unwrap_err(), CacheError::NotFound);

    let mut members: Vec<_> = store
        .list_vms_by_scale_set("rg", "ss1", DEFAULT)
        .await
        .unwrap()
        .iter()
        .map(|vm| vm.name().to_owned())
        .collect();
    members.sort();
    assert_eq!(members, ["ss1_0", "ss1_3"]);

    let result = store.list_vms_by_scale_set("rg", "ss2", DEFAULT).await;
    assert_eq!(result.unwrap_err(), CacheError::NotFound);

    assert_eq!(compute.calls().list_vms(), 1);
}

#[tokio::test]
async fn test_vm_by_name() {
    let compute = Arc::new(FakeCompute::from_fixture());
    let (store, _clock) = setup_store(&compute, |_| {});

    let vm = store.get_vm_by_name("vm1", DEFAULT).await.unwrap();
    assert_eq!(vm.resource_group(), "rg");
    assert_eq!(vm.vmas_name(), Some("AS1"));

    let vm = store.get_vm_by_name("edge-vm", DEFAULT).await.unwrap();
    assert_eq!(vm.resource_group(), "rg-edge");

    let result = store.get_vm_by_name("ghost", DEFAULT).await;
    assert_eq!(result.unwrap_err(), CacheError::NotFound);

    // One listing per resource group, shared by all name lookups.
    assert_eq!(compute.calls().list_vms(), 2);
}

#[tokio::test]
async fn test_delete_vm_by_name() {
    let compute = Arc::new(FakeCompute::from_fixture());
    let (store, _clock) = setup_store(&compute, |_| {});

    store.get_vm_by_name("vm1", DEFAULT).await.unwrap();
    store.delete_vm_by_name("vm1");

    let result = store
        .get_vm_by_name("vm1", StoreOptions::unsafe_read())
        .await;
    assert_eq!(result.unwrap_err(), CacheError::NotFound);

    // The resource group listing is still fresh and serves the reload.
    store.get_vm_by_name("vm1", DEFAULT).await.unwrap();
    assert_eq!(compute.calls().list_vms(), 1);
}

#[tokio::test]
async fn test_force_refresh_by_name_keeps_fresh_listing() {
    let compute = Arc::new(FakeCompute::from_fixture());
    let (store, _clock) = setup_store(&compute, |_| {});

    store.get_vm_by_name("vm1", DEFAULT).await.unwrap();
    store
        .get_vm_by_name("vm1", StoreOptions::force_refresh())
        .await
        .unwrap();
    assert_eq!(compute.calls().list_vms(), 1);

    store
        .vms_by_resource_group("rg", StoreOptions::force_refresh())
        .await
        .unwrap();
    assert_eq!(compute.calls().list_vms(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_resource_groups_do_not_block_each_other() {
    let compute = Arc::new(FakeCompute::from_fixture());
    let (store, _clock) = setup_store(&compute, |_| {});
    let gate = compute.gate("rg-edge");

    let slow = {
        let store = store.clone();
        tokio::spawn(async move { store.vms_by_resource_group("rg-edge", DEFAULT).await })
    };

    let vms = tokio::time::timeout(
        Duration::from_secs(5),
        store.vms_by_resource_group("rg", DEFAULT),
    )
    .await
    .unwrap()
    .unwrap();
    assert_eq!(vms.len(), 5);
    assert!(!slow.is_finished());

    gate.add_permits(1);
    let vms = slow.await.unwrap().unwrap();
    assert!(vms.contains_key("edge-vm"));
}

#[tokio::test]
async fn test_client_timeout() {
    let compute = Arc::new(FakeCompute::from_fixture());
    let (store, _clock) = setup_store(&compute, |config| {
        config.client_timeout = Duration::from_millis(50);
    });
    let _gate = compute.gate("rg");

    let result = store.vms_by_resource_group("rg", DEFAULT).await;
    assert_eq!(
        result.unwrap_err(),
        CacheError::Timeout(Duration::from_millis(50))
    );
}

#[tokio::test]
async fn test_failed_listing_is_retried() {
    let compute = Arc::new(FakeCompute::from_fixture());
    let (store, _clock) = setup_store(&compute, |_| {});

    compute.fail("rg");
    let result = store.get_vm_by_name("vm2", DEFAULT).await;
    assert_eq!(
        result.unwrap_err(),
        CacheError::Request("service unavailable".into())
    );

    compute.recover("rg");
    let vm = store.get_vm_by_name("vm2", DEFAULT).await.unwrap();
    assert_eq!(vm.manage(), None);
    assert_eq!(compute.calls().list_vms(), 2);
}

#[tokio::test]
async fn test_expiration() {
    let compute = Arc::new(FakeCompute::from_fixture());
    let (store, clock) = setup_store(&compute, |_| {});

    store.vms_by_resource_group("rg", DEFAULT).await.unwrap();
    clock.advance(Duration::from_secs(30));
    store.vms_by_resource_group("rg", DEFAULT).await.unwrap();
    assert_eq!(compute.calls().list_vms(), 1);

    clock.advance(Duration::from_secs(31));
    // Stale entries are still served to unsafe reads.
    store
        .vms_by_resource_group("rg", StoreOptions::unsafe_read())
        .await
        .unwrap();
    assert_eq!(compute.calls().list_vms(), 1);

    store.vms_by_resource_group("rg", DEFAULT).await.unwrap();
    assert_eq!(compute.calls().list_vms(), 2);

    store
        .vms_by_resource_group("rg", StoreOptions::force_refresh())
        .await
        .unwrap();
    assert_eq!(compute.calls().list_vms(), 3);
}

#[tokio::test]
async fn test_unsafe_read_never_loads() {
    let compute = Arc::new(FakeCompute::from_fixture());
    let (store, _clock) = setup_store(&compute, |_| {});

    let result = store
        .vms_by_resource_group("rg", StoreOptions::unsafe_read())
        .await;
    assert_eq!(result.unwrap_err(), CacheError::NotFound);
    assert_eq!(compute.calls().list_vms(), 0);
}

#[tokio::test]
async fn test_set_lookups() {
    let compute = Arc::new(FakeCompute::from_fixture());
    let (store, _clock) = setup_store(&compute, |_| {});

    let scale_set = store
        .get_scale_set_by_name("rg", "ss1", DEFAULT)
        .await
        .unwrap()
        .unwrap();
    assert!(!scale_set.is_flexible());
    let scale_set = store
        .get_scale_set_by_name("rg", "flex", DEFAULT)
        .await
        .unwrap()
        .unwrap();
    assert!(scale_set.is_flexible());
    assert!(
        store
            .get_scale_set_by_name("rg", "ss9", DEFAULT)
            .await
            .unwrap()
            .is_none()
    );

    let availability_set = store
        .get_availability_set_by_name("rg", "AS1", DEFAULT)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(availability_set.name.as_deref(), Some("as1"));
    assert!(
        store
            .get_availability_set_by_name("rg", "as2", DEFAULT)
            .await
            .unwrap()
            .is_none()
    );

    assert_eq!(compute.calls().list_scale_sets(), 1);
    assert_eq!(compute.calls().list_availability_sets(), 1);
}
