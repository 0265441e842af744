//! In-memory placement store.
//!
//! A thread-safe implementation of [`PlacementStore`] backed by hash maps
//! under an async `RwLock`. It answers every façade query from the same
//! live data set, so each resolver invocation naturally sees a consistent
//! snapshot. Intended for tests, development, and embedders that do not
//! need a database.
//!
//! The mutating methods (`create_provider`, `set_inventory`, `set_traits`,
//! `add_to_aggregate`, `record_usage`) exist to stage topology; the resolver
//! itself only uses the read-only trait methods.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;

use serde_json::Number;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::context::{RequestGroupSearchContext, RequestWideSearchContext};
use crate::error::PlacementError;
use crate::provider::{MISC_SHARES_VIA_AGGREGATE, ProviderId, ResourceClassId};
use crate::store::{
    Anchor, InventoryUsage, PlacementStore, ProviderIds, RpCandidates, RpInfo, UsageRow,
};

/// Inventory of one resource class on one provider.
#[derive(Debug, Clone, Copy)]
pub struct Inventory {
    /// Total units of inventory.
    pub total: u64,
    /// Units withheld from placement.
    pub reserved: u64,
    /// Overcommit multiplier applied to `total - reserved`.
    pub allocation_ratio: f64,
    /// Upper bound on a single allocation.
    pub max_unit: u64,
}

impl Inventory {
    /// Plain inventory: nothing reserved, no overcommit, max_unit = total.
    pub fn of(total: u64) -> Self {
        Inventory {
            total,
            reserved: 0,
            allocation_ratio: 1.0,
            max_unit: total,
        }
    }

    fn capacity(&self) -> u64 {
        ((self.total - self.reserved) as f64 * self.allocation_ratio) as u64
    }
}

#[derive(Debug, Clone)]
struct ProviderRecord {
    id: ProviderId,
    uuid: Uuid,
    root_id: ProviderId,
    parent_id: Option<ProviderId>,
    traits: BTreeSet<String>,
    aggregates: BTreeSet<Uuid>,
}

#[derive(Debug, Default)]
struct Data {
    providers: HashMap<ProviderId, ProviderRecord>,
    ids_by_uuid: HashMap<Uuid, ProviderId>,
    inventories: HashMap<ProviderId, BTreeMap<ResourceClassId, Inventory>>,
    usages: HashMap<(ProviderId, ResourceClassId), u64>,
    next_id: ProviderId,
}

impl Data {
    fn provider_by_uuid(&self, uuid: Uuid) -> Result<&ProviderRecord, PlacementError> {
        let id = self.ids_by_uuid.get(&uuid).ok_or(PlacementError::NotFound)?;
        Ok(&self.providers[id])
    }

    fn used(&self, rp_id: ProviderId, rc_id: ResourceClassId) -> u64 {
        self.usages.get(&(rp_id, rc_id)).copied().unwrap_or(0)
    }

    /// Whether the provider can supply `amount` of `rc_id` within its
    /// capacity and max_unit.
    fn can_fit(&self, rp_id: ProviderId, rc_id: ResourceClassId, amount: u64) -> bool {
        let Some(inv) = self.inventories.get(&rp_id).and_then(|m| m.get(&rc_id)) else {
            return false;
        };
        self.used(rp_id, rc_id) + amount <= inv.capacity() && amount <= inv.max_unit
    }

    fn satisfies_traits(&self, rp: &ProviderRecord, group: &RequestGroupSearchContext) -> bool {
        group.required_traits.is_subset(&rp.traits)
            && group.forbidden_traits.is_disjoint(&rp.traits)
    }

    fn is_sharing(&self, rp: &ProviderRecord) -> bool {
        rp.traits.contains(MISC_SHARES_VIA_AGGREGATE)
    }

    fn shares_aggregate_with(&self, a: &ProviderRecord, b: &ProviderRecord) -> bool {
        !a.aggregates.is_disjoint(&b.aggregates)
    }

    /// Sharing providers reachable from any member of the tree rooted at
    /// `root_id` through a common aggregate.
    fn sharing_reachable(&self, root_id: ProviderId) -> Vec<&ProviderRecord> {
        let members: Vec<&ProviderRecord> = self
            .providers
            .values()
            .filter(|p| p.root_id == root_id)
            .collect();
        self.providers
            .values()
            .filter(|sp| self.is_sharing(sp) && sp.root_id != root_id)
            .filter(|sp| members.iter().any(|m| self.shares_aggregate_with(sp, m)))
            .collect()
    }

    fn identity(&self, rp: &ProviderRecord) -> ProviderIds {
        ProviderIds {
            id: rp.id,
            uuid: rp.uuid,
            root_uuid: self.providers[&rp.root_id].uuid,
            parent_uuid: rp.parent_id.map(|pid| self.providers[&pid].uuid),
        }
    }
}

/// Statistics about the in-memory store state.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStoreStats {
    /// Number of providers.
    pub provider_count: usize,
    /// Number of distinct provider trees.
    pub tree_count: usize,
    /// Number of `(provider, resource class)` inventory records.
    pub inventory_count: usize,
    /// Number of sharing providers.
    pub sharing_provider_count: usize,
}

impl InMemoryStoreStats {
    /// Check if the store holds no providers.
    pub fn is_empty(&self) -> bool {
        self.provider_count == 0
    }
}

/// Thread-safe in-memory store.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    data: Arc<RwLock<Data>>,
}

impl InMemoryStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a provider, optionally nested under an existing parent.
    /// Returns the new provider's full identity.
    pub async fn create_provider(
        &self,
        parent: Option<Uuid>,
    ) -> Result<ProviderIds, PlacementError> {
        self.create_provider_with_uuid(Uuid::new_v4(), parent).await
    }

    /// Create a provider with a caller-chosen UUID.
    pub async fn create_provider_with_uuid(
        &self,
        uuid: Uuid,
        parent: Option<Uuid>,
    ) -> Result<ProviderIds, PlacementError> {
        let mut data = self.data.write().await;
        if data.ids_by_uuid.contains_key(&uuid) {
            return Err(PlacementError::Exists);
        }
        let (parent_id, root_id) = match parent {
            Some(parent_uuid) => {
                let parent = data.provider_by_uuid(parent_uuid)?;
                (Some(parent.id), parent.root_id)
            }
            None => (None, 0),
        };
        let id = data.next_id;
        data.next_id += 1;
        let record = ProviderRecord {
            id,
            uuid,
            root_id: if parent_id.is_some() { root_id } else { id },
            parent_id,
            traits: BTreeSet::new(),
            aggregates: BTreeSet::new(),
        };
        data.ids_by_uuid.insert(uuid, id);
        data.providers.insert(id, record);
        Ok(data.identity(&data.providers[&id]))
    }

    /// Replace the inventory of one resource class on a provider.
    pub async fn set_inventory(
        &self,
        provider: Uuid,
        rc_id: ResourceClassId,
        inventory: Inventory,
    ) -> Result<(), PlacementError> {
        let mut data = self.data.write().await;
        let rp_id = data.provider_by_uuid(provider)?.id;
        if inventory.reserved > inventory.total {
            return Err(PlacementError::InvalidInventoryCapacityReservedCanBeTotal {
                resource_class: rc_id.to_string(),
                resource_provider: provider,
            });
        }
        if inventory.allocation_ratio <= 0.0 || inventory.max_unit == 0 {
            return Err(PlacementError::InvalidInventory {
                resource_class: rc_id.to_string(),
                resource_provider: provider,
            });
        }
        data.inventories
            .entry(rp_id)
            .or_default()
            .insert(rc_id, inventory);
        Ok(())
    }

    /// Attach trait names to a provider.
    pub async fn set_traits<I, S>(&self, provider: Uuid, names: I) -> Result<(), PlacementError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut data = self.data.write().await;
        let rp_id = data.provider_by_uuid(provider)?.id;
        let traits: Vec<String> = names.into_iter().map(Into::into).collect();
        let rp = data.providers.get_mut(&rp_id).ok_or(PlacementError::NotFound)?;
        rp.traits.extend(traits);
        Ok(())
    }

    /// Associate a provider with an aggregate.
    pub async fn add_to_aggregate(
        &self,
        provider: Uuid,
        aggregate: Uuid,
    ) -> Result<(), PlacementError> {
        let mut data = self.data.write().await;
        let rp_id = data.provider_by_uuid(provider)?.id;
        let rp = data.providers.get_mut(&rp_id).ok_or(PlacementError::NotFound)?;
        rp.aggregates.insert(aggregate);
        Ok(())
    }

    /// Record consumed units against a provider's inventory, accumulating
    /// over prior usage.
    pub async fn record_usage(
        &self,
        provider: Uuid,
        rc_id: ResourceClassId,
        amount: u64,
    ) -> Result<(), PlacementError> {
        let mut data = self.data.write().await;
        let rp_id = data.provider_by_uuid(provider)?.id;
        if !data.inventories.get(&rp_id).is_some_and(|m| m.contains_key(&rc_id)) {
            return Err(PlacementError::InventoryWithResourceClassNotFound {
                resource_class: rc_id.to_string(),
            });
        }
        *data.usages.entry((rp_id, rc_id)).or_insert(0) += amount;
        Ok(())
    }

    /// Snapshot of store statistics.
    pub async fn stats(&self) -> InMemoryStoreStats {
        let data = self.data.read().await;
        let tree_count = data
            .providers
            .values()
            .map(|p| p.root_id)
            .collect::<HashSet<_>>()
            .len();
        InMemoryStoreStats {
            provider_count: data.providers.len(),
            tree_count,
            inventory_count: data.inventories.values().map(BTreeMap::len).sum(),
            sharing_provider_count: data
                .providers
                .values()
                .filter(|p| data.is_sharing(p))
                .count(),
        }
    }
}

impl PlacementStore for InMemoryStore {
    fn usages_by_provider_tree(
        &self,
        root_ids: &HashSet<ProviderId>,
    ) -> impl Future<Output = Result<Vec<UsageRow>, PlacementError>> + Send {
        async move {
            let data = self.data.read().await;
            let mut rows = Vec::new();
            for rp in data.providers.values() {
                if !root_ids.contains(&rp.root_id) {
                    continue;
                }
                let Some(inventories) =
                    data.inventories.get(&rp.id).filter(|m| !m.is_empty())
                else {
                    rows.push(UsageRow {
                        resource_provider_id: rp.id,
                        resource_provider_uuid: rp.uuid,
                        inventory: None,
                    });
                    continue;
                };
                for (rc_id, inv) in inventories {
                    rows.push(UsageRow {
                        resource_provider_id: rp.id,
                        resource_provider_uuid: rp.uuid,
                        inventory: Some(InventoryUsage {
                            resource_class_id: *rc_id,
                            total: inv.total,
                            reserved: inv.reserved,
                            allocation_ratio: inv.allocation_ratio,
                            max_unit: inv.max_unit,
                            used: data
                                .usages
                                .get(&(rp.id, *rc_id))
                                .map(|used| Number::from(*used)),
                        }),
                    });
                }
            }
            Ok(rows)
        }
    }

    fn get_provider_ids_matching(
        &self,
        group: &RequestGroupSearchContext,
    ) -> impl Future<Output = Result<Vec<(ProviderId, ProviderId)>, PlacementError>> + Send {
        async move {
            let data = self.data.read().await;
            let mut matching = Vec::new();
            for rp in data.providers.values() {
                if !data.satisfies_traits(rp, group) {
                    continue;
                }
                let fits = group
                    .resources
                    .iter()
                    .all(|(rc_id, amount)| data.can_fit(rp.id, *rc_id, *amount));
                if fits {
                    matching.push((rp.id, rp.root_id));
                }
            }
            matching.sort_unstable();
            Ok(matching)
        }
    }

    fn get_trees_matching_all(
        &self,
        group: &RequestGroupSearchContext,
        rw_ctx: &RequestWideSearchContext,
    ) -> impl Future<Output = Result<RpCandidates, PlacementError>> + Send {
        async move {
            let data = self.data.read().await;
            let mut candidates = RpCandidates::default();
            let roots: Vec<&ProviderRecord> = data
                .providers
                .values()
                .filter(|rp| rp.id == rp.root_id && !data.is_sharing(rp))
                .filter(|rp| rw_ctx.in_filtered_anchors(rp.id))
                .collect();
            for root in roots {
                let mut tree_rps: Vec<&ProviderRecord> = data
                    .providers
                    .values()
                    .filter(|p| p.root_id == root.id)
                    .collect();
                tree_rps.extend(data.sharing_reachable(root.id));

                // One candidate list per requested class; the tree only
                // qualifies when every class has at least one supplier.
                let mut by_rc: BTreeMap<ResourceClassId, Vec<&ProviderRecord>> = BTreeMap::new();
                for (rc_id, amount) in &group.resources {
                    let suppliers: Vec<&ProviderRecord> = tree_rps
                        .iter()
                        .filter(|p| data.can_fit(p.id, *rc_id, *amount))
                        .copied()
                        .collect();
                    if suppliers.is_empty() {
                        by_rc.clear();
                        break;
                    }
                    by_rc.insert(*rc_id, suppliers);
                }
                if by_rc.is_empty() {
                    continue;
                }
                candidates.all_rps.insert(root.id);
                for (rc_id, suppliers) in by_rc {
                    for rp in suppliers {
                        candidates.rps_info.push(RpInfo {
                            id: rp.id,
                            root_id: root.id,
                            rc_id,
                        });
                        if rp.root_id != root.id {
                            candidates.all_rps.insert(rp.root_id);
                        }
                    }
                }
            }
            candidates.rps_info.sort_unstable_by_key(|rp| (rp.root_id, rp.rc_id, rp.id));
            candidates.rps_info.dedup();
            Ok(candidates)
        }
    }

    fn get_provider_ids_having_any_trait(
        &self,
        traits: &BTreeSet<String>,
    ) -> impl Future<Output = Result<HashSet<ProviderId>, PlacementError>> + Send {
        async move {
            let data = self.data.read().await;
            Ok(data
                .providers
                .values()
                .filter(|rp| !rp.traits.is_disjoint(traits))
                .map(|rp| rp.id)
                .collect())
        }
    }

    fn get_traits_by_provider_tree(
        &self,
        root_ids: &HashSet<ProviderId>,
    ) -> impl Future<Output = Result<HashMap<ProviderId, BTreeSet<String>>, PlacementError>> + Send
    {
        async move {
            let data = self.data.read().await;
            Ok(data
                .providers
                .values()
                .filter(|rp| root_ids.contains(&rp.root_id))
                .map(|rp| (rp.id, rp.traits.clone()))
                .collect())
        }
    }

    fn get_sharing_providers(
        &self,
    ) -> impl Future<Output = Result<HashSet<ProviderId>, PlacementError>> + Send {
        async move {
            let data = self.data.read().await;
            Ok(data
                .providers
                .values()
                .filter(|rp| data.is_sharing(rp))
                .map(|rp| rp.id)
                .collect())
        }
    }

    fn anchors_for_sharing_providers(
        &self,
        sp_ids: &[ProviderId],
    ) -> impl Future<Output = Result<Vec<Anchor>, PlacementError>> + Send {
        async move {
            let data = self.data.read().await;
            let mut anchors = HashSet::new();
            for sp_id in sp_ids {
                let sp = data.providers.get(sp_id).ok_or(PlacementError::NotFound)?;
                for rp in data.providers.values() {
                    if data.shares_aggregate_with(sp, rp) {
                        let root = &data.providers[&rp.root_id];
                        anchors.insert(Anchor {
                            anchor_id: root.id,
                            anchor_uuid: root.uuid,
                        });
                    }
                }
            }
            let mut anchors: Vec<Anchor> = anchors.into_iter().collect();
            anchors.sort_unstable_by_key(|a| a.anchor_id);
            Ok(anchors)
        }
    }

    fn provider_ids_from_rp_ids(
        &self,
        rp_ids: &HashSet<ProviderId>,
    ) -> impl Future<Output = Result<HashMap<ProviderId, ProviderIds>, PlacementError>> + Send
    {
        async move {
            let data = self.data.read().await;
            rp_ids
                .iter()
                .map(|rp_id| {
                    let rp = data.providers.get(rp_id).ok_or(PlacementError::NotFound)?;
                    Ok((*rp_id, data.identity(rp)))
                })
                .collect()
        }
    }

    fn has_provider_trees(
        &self,
    ) -> impl Future<Output = Result<bool, PlacementError>> + Send {
        async move {
            let data = self.data.read().await;
            Ok(data.providers.values().any(|rp| rp.parent_id.is_some()))
        }
    }
}
