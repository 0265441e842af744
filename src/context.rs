//! Search contexts: per-group and request-wide bookkeeping.
//!
//! A context is built once per resolver invocation and carries derived state
//! the search paths keep consulting: which providers share inventory, whether
//! any trees exist, the anchor filter, and memoized ancestor chains for the
//! same-subtree policy.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use log::debug;
use rand::seq::SliceRandom;
use uuid::Uuid;

use crate::allocation::AllocationRequest;
use crate::error::PlacementError;
use crate::provider::{ProviderId, ProviderSummary, ResourceClassId};
use crate::request::{GroupPolicy, RequestGroup, RequestWideParams};

/// Per-group search state derived from a [`RequestGroup`].
#[derive(Debug, Clone)]
pub struct RequestGroupSearchContext {
    /// The group's suffix; empty for the default group.
    pub suffix: String,
    /// Requested amount per resource class id.
    pub resources: BTreeMap<ResourceClassId, u64>,
    /// Traits the satisfying providers must collectively carry.
    pub required_traits: BTreeSet<String>,
    /// Traits no satisfying provider may carry.
    pub forbidden_traits: BTreeSet<String>,
    /// Whether the group must land on one provider.
    pub use_same_provider: bool,
    /// Whether any provider trees exist in the search space.
    pub has_trees: bool,
    /// Whether sharing providers exist in the search space.
    pub exists_sharing: bool,
    /// Whether nested providers may be involved in satisfying this group.
    pub exists_nested: bool,
}

impl RequestGroupSearchContext {
    /// Derive the search state for one group.
    pub fn new(
        suffix: &str,
        group: &RequestGroup,
        has_trees: bool,
        sharing: &HashSet<ProviderId>,
    ) -> Self {
        RequestGroupSearchContext {
            suffix: suffix.to_string(),
            resources: group.resources.clone(),
            required_traits: group.required_traits.clone(),
            forbidden_traits: group.forbidden_traits.clone(),
            use_same_provider: group.use_same_provider,
            has_trees,
            exists_sharing: !sharing.is_empty(),
            exists_nested: has_trees,
        }
    }
}

/// Request-wide search state shared by every group search and the merge.
#[derive(Debug, Clone)]
pub struct RequestWideSearchContext {
    group_policy: GroupPolicy,
    same_subtrees: Vec<BTreeSet<String>>,
    limit: Option<usize>,
    randomize: bool,
    nested_aware: bool,
    /// Providers whose trees cannot anchor a candidate because the provider
    /// shares its inventory outward; a sharing provider is anchored through
    /// its aggregates, never through its own root.
    sharing: HashSet<ProviderId>,
    /// Anchor roots admitted by upstream request-wide filters. `None` admits
    /// every non-sharing root.
    filtered_anchors: Option<HashSet<ProviderId>>,
}

impl RequestWideSearchContext {
    /// Build the request-wide state.
    pub fn new(
        params: &RequestWideParams,
        nested_aware: bool,
        sharing: HashSet<ProviderId>,
    ) -> Self {
        RequestWideSearchContext {
            group_policy: params.group_policy,
            same_subtrees: params.same_subtrees.clone(),
            limit: params.limit,
            randomize: params.randomize,
            nested_aware,
            sharing,
            filtered_anchors: None,
        }
    }

    /// Narrow the viable anchor roots. Intended for embedders whose request
    /// layer pre-filters trees (aggregate membership, in-tree constraints).
    pub fn with_filtered_anchors(mut self, anchors: HashSet<ProviderId>) -> Self {
        self.filtered_anchors = Some(anchors);
        self
    }

    /// Whether the given root may anchor a candidate.
    pub fn in_filtered_anchors(&self, root_id: ProviderId) -> bool {
        if self.sharing.contains(&root_id) {
            return false;
        }
        self.filtered_anchors
            .as_ref()
            .is_none_or(|anchors| anchors.contains(&root_id))
    }

    /// Cross-group isolation policy.
    pub fn group_policy(&self) -> GroupPolicy {
        self.group_policy
    }

    /// Configured same-subtree constraints.
    pub fn same_subtrees(&self) -> &[BTreeSet<String>] {
        &self.same_subtrees
    }

    /// Drop candidates referencing nested providers when the caller is blind
    /// to nested topology, then prune summaries to providers still
    /// referenced.
    pub fn exclude_nested_providers(
        &self,
        areqs: Vec<AllocationRequest>,
        summaries: Vec<ProviderSummary>,
    ) -> (Vec<AllocationRequest>, Vec<ProviderSummary>) {
        if self.nested_aware {
            return (areqs, summaries);
        }
        let nested: HashSet<Uuid> = summaries
            .iter()
            .filter(|s| !s.resource_provider.is_root())
            .map(|s| s.resource_provider.uuid)
            .collect();
        if nested.is_empty() {
            return (areqs, summaries);
        }
        let areqs: Vec<AllocationRequest> = areqs
            .into_iter()
            .filter(|areq| {
                areq.resource_requests
                    .iter()
                    .all(|arr| !nested.contains(&arr.resource_provider.uuid))
                    && areq
                        .mappings
                        .values()
                        .all(|rps| rps.iter().all(|rp| !nested.contains(rp)))
            })
            .collect();
        let referenced = referenced_provider_uuids(&areqs);
        let summaries = summaries
            .into_iter()
            .filter(|s| referenced.contains(&s.resource_provider.uuid))
            .collect();
        (areqs, summaries)
    }

    /// Shuffle (when requested) and truncate the candidate list, pruning
    /// summaries to the trees the survivors reference.
    pub fn limit_results(
        &self,
        mut areqs: Vec<AllocationRequest>,
        summaries: Vec<ProviderSummary>,
    ) -> (Vec<AllocationRequest>, Vec<ProviderSummary>) {
        if self.randomize {
            areqs.shuffle(&mut rand::rng());
        }
        let Some(limit) = self.limit else {
            return (areqs, summaries);
        };
        if areqs.len() > limit {
            debug!(
                "Limiting results from {} to {} allocation requests",
                areqs.len(),
                limit
            );
            areqs.truncate(limit);
        }
        let tree_uuids: HashSet<Uuid> = areqs
            .iter()
            .flat_map(|areq| {
                areq.tree_roots()
                    .chain(std::iter::once(areq.anchor_root_provider_uuid))
            })
            .collect();
        let summaries = summaries
            .into_iter()
            .filter(|s| tree_uuids.contains(&s.resource_provider.root_provider_uuid))
            .collect();
        (areqs, summaries)
    }
}

/// Provider UUIDs referenced by any resource entry, mapping, or anchor of
/// the given requests.
fn referenced_provider_uuids(areqs: &[AllocationRequest]) -> HashSet<Uuid> {
    let mut referenced = HashSet::new();
    for areq in areqs {
        referenced.insert(areq.anchor_root_provider_uuid);
        for arr in &areq.resource_requests {
            referenced.insert(arr.resource_provider.uuid);
        }
        for rps in areq.mappings.values() {
            referenced.extend(rps.iter().copied());
        }
    }
    referenced
}

/// Memoized reflexive ancestor chains over a `parent_by_uuid` map.
///
/// Built once per merge; each chain is computed lazily and cached.
pub(crate) struct AncestorCache {
    parent_by_uuid: HashMap<Uuid, Option<Uuid>>,
    memo: HashMap<Uuid, HashSet<Uuid>>,
}

impl AncestorCache {
    pub(crate) fn new(parent_by_uuid: HashMap<Uuid, Option<Uuid>>) -> Self {
        AncestorCache {
            parent_by_uuid,
            memo: HashMap::new(),
        }
    }

    /// The reflexive ancestor set of a provider. A provider referenced in
    /// mappings but absent from the parent map indicates a bug upstream.
    pub(crate) fn ancestors(&mut self, rp_uuid: Uuid) -> Result<HashSet<Uuid>, PlacementError> {
        if let Some(chain) = self.memo.get(&rp_uuid) {
            return Ok(chain.clone());
        }
        let parent = *self.parent_by_uuid.get(&rp_uuid).ok_or_else(|| {
            PlacementError::object_action(
                "ancestor lookup",
                format!("provider {rp_uuid} has no summary"),
            )
        })?;
        let mut chain = match parent {
            Some(parent_uuid) => self.ancestors(parent_uuid)?,
            None => HashSet::new(),
        };
        chain.insert(rp_uuid);
        self.memo.insert(rp_uuid, chain.clone());
        Ok(chain)
    }
}
