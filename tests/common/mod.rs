//! Shared helpers for resolver integration tests.
//!
//! Provides resource-class constants, a seeded class cache, topology
//! staging shortcuts over the in-memory store, and assertion helpers for
//! the resolver's output invariants.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap, HashSet};

use uuid::Uuid;

use placement_candidates::store::ProviderIds;
use placement_candidates::{
    AllocationCandidates, AllocationRequest, InMemoryStore, Inventory, RequestGroup,
    RequestWideParams, ResourceClassCache, ResourceClassId, MISC_SHARES_VIA_AGGREGATE,
};

pub const VCPU: ResourceClassId = 0;
pub const MEMORY_MB: ResourceClassId = 1;
pub const DISK_GB: ResourceClassId = 2;

/// Initialize test logging; safe to call from every test.
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// A class cache seeded with the classes the tests use.
pub fn rc_cache() -> ResourceClassCache {
    let cache = ResourceClassCache::new();
    cache.insert(VCPU, "VCPU").unwrap();
    cache.insert(MEMORY_MB, "MEMORY_MB").unwrap();
    cache.insert(DISK_GB, "DISK_GB").unwrap();
    cache
}

/// Create a standalone provider with inventory of one class.
pub async fn provider_with_inventory(
    store: &InMemoryStore,
    rc_id: ResourceClassId,
    inventory: Inventory,
) -> ProviderIds {
    let provider = store.create_provider(None).await.unwrap();
    store
        .set_inventory(provider.uuid, rc_id, inventory)
        .await
        .unwrap();
    provider
}

/// Create a child provider under `parent` with inventory of one class.
pub async fn child_with_inventory(
    store: &InMemoryStore,
    parent: Uuid,
    rc_id: ResourceClassId,
    inventory: Inventory,
) -> ProviderIds {
    let provider = store.create_provider(Some(parent)).await.unwrap();
    store
        .set_inventory(provider.uuid, rc_id, inventory)
        .await
        .unwrap();
    provider
}

/// Create a sharing provider with inventory, associated with `aggregate`.
pub async fn sharing_provider(
    store: &InMemoryStore,
    rc_id: ResourceClassId,
    inventory: Inventory,
    aggregate: Uuid,
) -> ProviderIds {
    let provider = store.create_provider(None).await.unwrap();
    store
        .set_inventory(provider.uuid, rc_id, inventory)
        .await
        .unwrap();
    store
        .set_traits(provider.uuid, [MISC_SHARES_VIA_AGGREGATE])
        .await
        .unwrap();
    store.add_to_aggregate(provider.uuid, aggregate).await.unwrap();
    provider
}

/// A one-group request map keyed by the default suffix.
pub fn default_group(group: RequestGroup) -> HashMap<String, RequestGroup> {
    HashMap::from([(String::new(), group)])
}

/// Resolve with default request-wide parameters and nested awareness.
pub async fn resolve(
    store: &InMemoryStore,
    groups: &HashMap<String, RequestGroup>,
) -> AllocationCandidates {
    AllocationCandidates::get_by_requests(
        store,
        &rc_cache(),
        groups,
        &RequestWideParams::default(),
        true,
    )
    .await
    .unwrap()
}

/// The candidates as a set, for order-insensitive comparison.
pub fn as_set(candidates: &AllocationCandidates) -> HashSet<AllocationRequest> {
    candidates.allocation_requests.iter().cloned().collect()
}

/// Capacity, usage, and max_unit per `(provider uuid, class name)` from the
/// returned summaries.
pub fn capacity_map(candidates: &AllocationCandidates) -> HashMap<(Uuid, String), (u64, u64, u64)> {
    let mut map = HashMap::new();
    for summary in &candidates.provider_summaries {
        for res in &summary.resources {
            map.insert(
                (summary.resource_provider.uuid, res.resource_class.clone()),
                (res.capacity, res.used, res.max_unit),
            );
        }
    }
    map
}

/// Every provider referenced by a candidate's resources must belong to a
/// tree represented in the summaries.
pub fn assert_summary_closure(candidates: &AllocationCandidates) {
    let roots: HashSet<Uuid> = candidates
        .provider_summaries
        .iter()
        .map(|s| s.resource_provider.root_provider_uuid)
        .collect();
    for areq in &candidates.allocation_requests {
        for arr in &areq.resource_requests {
            assert!(
                roots.contains(&arr.resource_provider.root_provider_uuid),
                "provider {} is not covered by any summarized tree",
                arr.resource_provider.uuid
            );
        }
    }
}

/// Every candidate must fit within capacity and max_unit, summing amounts
/// folded onto the same `(provider, class)` pair.
pub fn assert_capacity_safe(candidates: &AllocationCandidates) {
    let capacities = capacity_map(candidates);
    for areq in &candidates.allocation_requests {
        let mut amounts: HashMap<(Uuid, String), u64> = HashMap::new();
        for arr in &areq.resource_requests {
            let key = (arr.resource_provider.uuid, arr.resource_class.clone());
            let (_, _, max_unit) = capacities
                .get(&key)
                .unwrap_or_else(|| panic!("no summary resource for {key:?}"));
            assert!(
                arr.amount <= *max_unit,
                "amount {} exceeds max_unit {max_unit}",
                arr.amount
            );
            *amounts.entry(key).or_insert(0) += arr.amount;
        }
        for (key, amount) in amounts {
            let (capacity, used, _) = capacities[&key];
            assert!(
                used + amount <= capacity,
                "used {used} + amount {amount} exceeds capacity {capacity} for {key:?}"
            );
        }
    }
}

/// Build a map of requested resources for one class.
pub fn resources(rc_id: ResourceClassId, amount: u64) -> BTreeMap<ResourceClassId, u64> {
    BTreeMap::from([(rc_id, amount)])
}
