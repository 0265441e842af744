//! Data-access façade for the allocation-candidate resolver.
//!
//! The resolver never talks SQL; it consumes the abstract queries defined by
//! [`PlacementStore`]. A store value handed to the resolver represents one
//! consistent read snapshot (the embedder opens whatever transaction its
//! backend needs and keeps it open for the duration of the invocation), so a
//! single resolver run sees internally consistent provider, inventory, usage,
//! and trait data. The resolver performs no mutation through this interface.
//!
//! # Design principles
//!
//! - **Rows, not objects**: queries return plain row/record types; the
//!   resolver assembles domain objects itself.
//! - **Left-join semantics**: [`PlacementStore::usages_by_provider_tree`]
//!   reports every provider in the requested trees, including providers with
//!   no inventory of their own (their `inventory` field is `None`).
//! - **Error transparency**: store/transport failures propagate unchanged in
//!   [`PlacementError::Store`]; "nothing matches" is expressed through empty
//!   results or the internal not-found marker, never through transport
//!   errors.

pub mod in_memory;

pub use in_memory::InMemoryStore;

use std::collections::{BTreeSet, HashMap, HashSet};
use std::future::Future;

use serde_json::Number;
use uuid::Uuid;

use crate::context::{RequestGroupSearchContext, RequestWideSearchContext};
use crate::error::PlacementError;
use crate::provider::{ProviderId, ResourceClassId};

/// Inventory and aggregated usage of one resource class on one provider.
#[derive(Debug, Clone)]
pub struct InventoryUsage {
    /// Resource class of this inventory record.
    pub resource_class_id: ResourceClassId,
    /// Total units of inventory.
    pub total: u64,
    /// Units withheld from placement.
    pub reserved: u64,
    /// Overcommit multiplier applied to `total - reserved`.
    pub allocation_ratio: f64,
    /// Upper bound on a single allocation.
    pub max_unit: u64,
    /// Sum of `used` over live allocations. `None` when no allocations
    /// exist; backends that aggregate in the database may report an
    /// arbitrary-precision numeric, which the consumer coerces to an
    /// integer.
    pub used: Option<Number>,
}

/// One row of [`PlacementStore::usages_by_provider_tree`] output.
#[derive(Debug, Clone)]
pub struct UsageRow {
    /// Internal id of the provider.
    pub resource_provider_id: ProviderId,
    /// UUID of the provider.
    pub resource_provider_uuid: Uuid,
    /// The provider's inventory of one resource class, or `None` for a
    /// provider that has no inventory of its own.
    pub inventory: Option<InventoryUsage>,
}

/// One `(provider, tree, resource class)` candidate from the tree search.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RpInfo {
    /// Internal id of the candidate provider.
    pub id: ProviderId,
    /// Internal id of the root of the tree the candidate serves. For a
    /// sharing provider this is the root of the anchoring tree, not the
    /// sharing provider's own root.
    pub root_id: ProviderId,
    /// Resource class the candidate can supply.
    pub rc_id: ResourceClassId,
}

/// Providers able to satisfy a request group across trees.
#[derive(Debug, Clone, Default)]
pub struct RpCandidates {
    /// Candidate `(provider, tree, resource class)` triples.
    pub rps_info: Vec<RpInfo>,
    /// Every tree root involved, including sharing providers' own roots so
    /// usage and trait fetches cover them.
    pub all_rps: HashSet<ProviderId>,
}

impl RpCandidates {
    /// True when no provider can satisfy the group.
    pub fn is_empty(&self) -> bool {
        self.rps_info.is_empty()
    }
}

/// Full identity of a provider: internal id plus the UUID triple describing
/// its position in the forest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProviderIds {
    /// Internal numeric id.
    pub id: ProviderId,
    /// The provider's UUID.
    pub uuid: Uuid,
    /// UUID of the provider's tree root.
    pub root_uuid: Uuid,
    /// UUID of the provider's parent, when nested.
    pub parent_uuid: Option<Uuid>,
}

/// A tree root that can anchor allocations against a sharing provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Anchor {
    /// Internal id of the anchor root.
    pub anchor_id: ProviderId,
    /// UUID of the anchor root.
    pub anchor_uuid: Uuid,
}

/// Abstract queries the resolver issues against the provider, inventory,
/// allocation, and trait store.
///
/// Implementations must answer every query from the same snapshot; see the
/// module documentation. All methods are read-only.
pub trait PlacementStore: Send + Sync {
    /// Usage rows for every provider in the trees rooted at `root_ids`,
    /// left-joined against inventory and aggregated usage so providers
    /// without inventory still appear (with `inventory: None`).
    fn usages_by_provider_tree(
        &self,
        root_ids: &HashSet<ProviderId>,
    ) -> impl Future<Output = Result<Vec<UsageRow>, PlacementError>> + Send;

    /// `(provider id, root id)` pairs for providers that satisfy all of the
    /// group's resource amounts and trait constraints by themselves.
    fn get_provider_ids_matching(
        &self,
        group: &RequestGroupSearchContext,
    ) -> impl Future<Output = Result<Vec<(ProviderId, ProviderId)>, PlacementError>> + Send;

    /// Candidate `(provider, tree, resource class)` triples for trees whose
    /// members, together with sharing providers reachable through
    /// aggregates, collectively cover every resource class the group
    /// requests. Trait constraints are left to the caller; capacity
    /// constraints are applied per provider and class.
    fn get_trees_matching_all(
        &self,
        group: &RequestGroupSearchContext,
        rw_ctx: &RequestWideSearchContext,
    ) -> impl Future<Output = Result<RpCandidates, PlacementError>> + Send;

    /// Ids of providers carrying at least one of the given traits.
    fn get_provider_ids_having_any_trait(
        &self,
        traits: &BTreeSet<String>,
    ) -> impl Future<Output = Result<HashSet<ProviderId>, PlacementError>> + Send;

    /// Trait names per provider for every provider in the trees rooted at
    /// `root_ids`. Providers without traits map to an empty set.
    fn get_traits_by_provider_tree(
        &self,
        root_ids: &HashSet<ProviderId>,
    ) -> impl Future<Output = Result<HashMap<ProviderId, BTreeSet<String>>, PlacementError>> + Send;

    /// Ids of every sharing provider in the store.
    fn get_sharing_providers(
        &self,
    ) -> impl Future<Output = Result<HashSet<ProviderId>, PlacementError>> + Send;

    /// Anchor roots for the given sharing providers: the root of every
    /// provider sharing an aggregate with them, the sharing providers' own
    /// roots included.
    fn anchors_for_sharing_providers(
        &self,
        sp_ids: &[ProviderId],
    ) -> impl Future<Output = Result<Vec<Anchor>, PlacementError>> + Send;

    /// Full identity for each of the given provider ids.
    fn provider_ids_from_rp_ids(
        &self,
        rp_ids: &HashSet<ProviderId>,
    ) -> impl Future<Output = Result<HashMap<ProviderId, ProviderIds>, PlacementError>> + Send;

    /// Whether any provider tree (a provider with a parent) exists at all.
    fn has_provider_trees(
        &self,
    ) -> impl Future<Output = Result<bool, PlacementError>> + Send;
}
