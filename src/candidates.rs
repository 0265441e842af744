//! Allocation-candidate resolution.
//!
//! Given request groups and a provider topology, compute every viable way to
//! satisfy the request: which providers supply which resource class, in what
//! amount, without violating inventory limits, trait constraints, or
//! cross-group policies.
//!
//! The resolver runs in phases. Each group is searched independently: groups
//! restricted to one provider (and requests untouched by sharing or nesting)
//! take a fast path that builds one candidate per matching provider; groups
//! free to spread take the tree path, which enumerates provider combinations
//! within each tree. The per-group results are then merged anchor by anchor
//! into whole-request candidates, filtered by group policy, same-subtree
//! constraints, and a final capacity recheck, and shaped by the request-wide
//! parameters.

use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use log::debug;
use serde::Serialize;
use serde_json::Number;
use uuid::Uuid;

use crate::allocation::{AllocationRequest, AllocationRequestResource};
use crate::context::{AncestorCache, RequestGroupSearchContext, RequestWideSearchContext};
use crate::error::PlacementError;
use crate::provider::{
    MISC_SHARES_VIA_AGGREGATE, ProviderId, ProviderSummary, ProviderSummaryResource,
    ResourceClassId, ResourceProvider,
};
use crate::rc_cache::ResourceClassCache;
use crate::request::{GroupPolicy, RequestGroup, RequestWideParams};
use crate::store::{PlacementStore, RpCandidates, UsageRow};

/// The collection of possible allocations matching a request, along with
/// summary information about the providers involved.
#[derive(Debug, Default, Serialize)]
pub struct AllocationCandidates {
    /// Allocation possibilities the caller can attempt; each met the
    /// requested constraints at resolution time.
    pub allocation_requests: Vec<AllocationRequest>,
    /// Usage, capacity, and trait information for every provider in the
    /// trees referenced by `allocation_requests`.
    pub provider_summaries: Vec<ProviderSummary>,
}

impl AllocationCandidates {
    /// Resolve candidates for a set of request groups.
    ///
    /// `store` must answer every query from one consistent snapshot; `groups`
    /// maps each group's suffix (empty for the default group) to its
    /// constraints. When `nested_aware` is false the result never references
    /// nested providers.
    ///
    /// An empty result is a normal outcome, not an error.
    pub async fn get_by_requests<S: PlacementStore>(
        store: &S,
        rc_cache: &ResourceClassCache,
        groups: &HashMap<String, RequestGroup>,
        params: &RequestWideParams,
        nested_aware: bool,
    ) -> Result<Self, PlacementError> {
        let resolved = resolve(store, rc_cache, groups, params, nested_aware).await;
        let (allocation_requests, provider_summaries) = match resolved {
            Ok(result) => result,
            // The store signalling "no results are possible" is an internal
            // shortcut, not an API error.
            Err(PlacementError::ResourceProviderNotFound) => (Vec::new(), Vec::new()),
            Err(err) => return Err(err),
        };
        Ok(AllocationCandidates {
            allocation_requests,
            provider_summaries,
        })
    }
}

async fn resolve<S: PlacementStore>(
    store: &S,
    rc_cache: &ResourceClassCache,
    groups: &HashMap<String, RequestGroup>,
    params: &RequestWideParams,
    nested_aware: bool,
) -> Result<(Vec<AllocationRequest>, Vec<ProviderSummary>), PlacementError> {
    let has_trees = store.has_provider_trees().await?;
    let sharing = store.get_sharing_providers().await?;
    let rw_ctx = RequestWideSearchContext::new(params, nested_aware, sharing.clone());

    let mut candidates = HashMap::new();
    for (suffix, group) in groups {
        let rg_ctx = RequestGroupSearchContext::new(suffix, group, has_trees, &sharing);
        let (mut areqs, summaries) =
            candidates_for_group(store, rc_cache, &rg_ctx, &rw_ctx).await?;
        debug!(
            "request group (suffix '{suffix}') returned {} matches",
            areqs.len()
        );
        // Shortcut: if any one group resulted in no candidates, the whole
        // operation is shot.
        if areqs.is_empty() {
            return Ok((Vec::new(), Vec::new()));
        }
        // Mark each allocation request according to whether its group was
        // restricted to a single provider; the group-policy filter needs it.
        for areq in &mut areqs {
            areq.use_same_provider = group.use_same_provider;
        }
        candidates.insert(suffix.clone(), (areqs, summaries));
    }

    let (areqs, summaries) = merge_candidates(candidates, &rw_ctx)?;
    let (areqs, summaries) = rw_ctx.exclude_nested_providers(areqs, summaries);
    Ok(rw_ctx.limit_results(areqs, summaries))
}

/// Candidates for one request group.
async fn candidates_for_group<S: PlacementStore>(
    store: &S,
    rc_cache: &ResourceClassCache,
    rg_ctx: &RequestGroupSearchContext,
    rw_ctx: &RequestWideSearchContext,
) -> Result<(Vec<AllocationRequest>, Vec<ProviderSummary>), PlacementError> {
    if !rg_ctx.use_same_provider && (rg_ctx.exists_sharing || rg_ctx.exists_nested) {
        // If there aren't any providers with any of the required traits,
        // exit before enumerating trees at all.
        if !rg_ctx.required_traits.is_empty() {
            let trait_rps = store
                .get_provider_ids_having_any_trait(&rg_ctx.required_traits)
                .await?;
            if trait_rps.is_empty() {
                return Ok((Vec::new(), Vec::new()));
            }
        }
        let rp_candidates = store.get_trees_matching_all(rg_ctx, rw_ctx).await?;
        return candidates_multiple_providers(store, rc_cache, rg_ctx, rp_candidates).await;
    }

    // Either a single-provider group, or no sharing/nested providers can
    // help satisfy the request: each matching provider supplies everything.
    let rp_tuples = store.get_provider_ids_matching(rg_ctx).await?;
    candidates_single_provider(store, rc_cache, rg_ctx, rw_ctx, rp_tuples).await
}

/// Build candidates for a group that may span multiple providers within a
/// tree, including sharing providers anchored to it.
async fn candidates_multiple_providers<S: PlacementStore>(
    store: &S,
    rc_cache: &ResourceClassCache,
    rg_ctx: &RequestGroupSearchContext,
    rp_candidates: RpCandidates,
) -> Result<(Vec<AllocationRequest>, Vec<ProviderSummary>), PlacementError> {
    if rp_candidates.is_empty() {
        return Ok((Vec::new(), Vec::new()));
    }
    let root_ids = rp_candidates.all_rps;
    let usages = store.usages_by_provider_tree(&root_ids).await?;
    let prov_traits = store.get_traits_by_provider_tree(&root_ids).await?;
    let summaries = build_provider_summaries(store, rc_cache, &usages, prov_traits).await?;

    // Bucket the candidate triples per tree, per resource class. The inner
    // map is ordered so each combination lists its resources by ascending
    // resource class id.
    let mut tree_dict: HashMap<ProviderId, BTreeMap<ResourceClassId, Vec<AllocationRequestResource>>> =
        HashMap::new();
    for rp in &rp_candidates.rps_info {
        let summary = summaries.get(&rp.id).ok_or_else(|| {
            PlacementError::object_action(
                "bucket tree candidates",
                format!("no summary for provider {}", rp.id),
            )
        })?;
        let amount = rg_ctx.resources.get(&rp.rc_id).copied().ok_or_else(|| {
            PlacementError::object_action(
                "bucket tree candidates",
                format!("candidate for unrequested resource class {}", rp.rc_id),
            )
        })?;
        tree_dict
            .entry(rp.root_id)
            .or_default()
            .entry(rp.rc_id)
            .or_default()
            .push(AllocationRequestResource {
                resource_provider: Arc::clone(&summary.resource_provider),
                resource_class: rc_cache.string_from_id(rp.rc_id)?,
                amount,
            });
    }

    // Deduplicate within and across trees. Equality ignores the anchor, so
    // the anchor joins the key: otherwise-identical requests anchored to
    // different trees are distinct candidates.
    let mut alloc_requests: HashSet<(Uuid, AllocationRequest)> = HashSet::new();
    for (root_id, alloc_dict) in &tree_dict {
        let root_summary = summaries.get(root_id).ok_or_else(|| {
            PlacementError::object_action(
                "enumerate tree candidates",
                format!("no summary for tree root {root_id}"),
            )
        })?;
        let root_uuid = root_summary.resource_provider.uuid;

        // Every way of picking one supplier per resource class within this
        // tree, with early rejection on trait conflicts.
        let request_groups: Vec<&[AllocationRequestResource]> =
            alloc_dict.values().map(Vec::as_slice).collect();
        for res_requests in CartesianProduct::new(request_groups) {
            if !satisfies_traits(
                &res_requests,
                &summaries,
                &rg_ctx.required_traits,
                &rg_ctx.forbidden_traits,
            ) {
                continue;
            }
            let mut providers = BTreeSet::new();
            for arr in &res_requests {
                providers.insert(arr.resource_provider.uuid);
            }
            let mappings = HashMap::from([(rg_ctx.suffix.clone(), providers)]);
            let areq = AllocationRequest::new(
                root_uuid,
                res_requests.into_iter().cloned().collect(),
                mappings,
            );
            alloc_requests.insert((root_uuid, areq));
        }
    }
    Ok((
        alloc_requests.into_iter().map(|(_, areq)| areq).collect(),
        summaries.into_values().collect(),
    ))
}

/// Build candidates for a group satisfied entirely by single providers.
///
/// Used for single-provider groups, and as a fast path when neither sharing
/// nor nested providers can help satisfy the request.
async fn candidates_single_provider<S: PlacementStore>(
    store: &S,
    rc_cache: &ResourceClassCache,
    rg_ctx: &RequestGroupSearchContext,
    rw_ctx: &RequestWideSearchContext,
    rp_tuples: Vec<(ProviderId, ProviderId)>,
) -> Result<(Vec<AllocationRequest>, Vec<ProviderSummary>), PlacementError> {
    if rp_tuples.is_empty() {
        return Ok((Vec::new(), Vec::new()));
    }
    let root_ids: HashSet<ProviderId> = rp_tuples.iter().map(|(_, root_id)| *root_id).collect();
    let usages = store.usages_by_provider_tree(&root_ids).await?;
    let prov_traits = store.get_traits_by_provider_tree(&root_ids).await?;
    let summaries = build_provider_summaries(store, rc_cache, &usages, prov_traits).await?;

    let mut alloc_requests = Vec::new();
    for (rp_id, root_id) in rp_tuples {
        let rp_summary = summaries.get(&rp_id).ok_or_else(|| {
            PlacementError::object_action(
                "build single-provider candidate",
                format!("no summary for provider {rp_id}"),
            )
        })?;
        let areq = allocation_request_for_provider(
            rc_cache,
            &rg_ctx.resources,
            &rp_summary.resource_provider,
            &rg_ctx.suffix,
        )?;
        if rw_ctx.in_filtered_anchors(root_id) {
            alloc_requests.push(areq.clone());
        }
        // A sharing provider yields one extra candidate per viable anchor.
        if rp_summary.traits.contains(MISC_SHARES_VIA_AGGREGATE) {
            let anchors = store.anchors_for_sharing_providers(&[rp_id]).await?;
            for anchor in anchors {
                if anchor.anchor_id == root_id {
                    continue;
                }
                if !rw_ctx.in_filtered_anchors(anchor.anchor_id) {
                    continue;
                }
                alloc_requests.push(areq.with_anchor(anchor.anchor_uuid));
            }
        }
    }
    Ok((alloc_requests, summaries.into_values().collect()))
}

/// One allocation request drawing every requested resource from `provider`,
/// anchored in the provider's own tree. A resource-less request yields no
/// resource entries but still records the provider in the mappings.
fn allocation_request_for_provider(
    rc_cache: &ResourceClassCache,
    resources: &BTreeMap<ResourceClassId, u64>,
    provider: &Arc<ResourceProvider>,
    suffix: &str,
) -> Result<AllocationRequest, PlacementError> {
    let resource_requests = resources
        .iter()
        .map(|(rc_id, amount)| {
            Ok(AllocationRequestResource {
                resource_provider: Arc::clone(provider),
                resource_class: rc_cache.string_from_id(*rc_id)?,
                amount: *amount,
            })
        })
        .collect::<Result<Vec<_>, PlacementError>>()?;
    let mappings = HashMap::from([(suffix.to_string(), BTreeSet::from([provider.uuid]))]);
    Ok(AllocationRequest::new(
        provider.root_provider_uuid,
        resource_requests,
        mappings,
    ))
}

/// Assemble one [`ProviderSummary`] per provider appearing in the usage
/// rows. A provider without inventory of its own gets an empty resource list
/// but keeps its traits; it may be needed as a transit node in a tree.
async fn build_provider_summaries<S: PlacementStore>(
    store: &S,
    rc_cache: &ResourceClassCache,
    usages: &[UsageRow],
    prov_traits: HashMap<ProviderId, BTreeSet<String>>,
) -> Result<HashMap<ProviderId, ProviderSummary>, PlacementError> {
    // Full identity (root and parent UUIDs) for every provider involved.
    let rp_ids: HashSet<ProviderId> = usages.iter().map(|row| row.resource_provider_id).collect();
    let provider_ids = store.provider_ids_from_rp_ids(&rp_ids).await?;

    let mut summaries: HashMap<ProviderId, ProviderSummary> = HashMap::new();
    for row in usages {
        let rp_id = row.resource_provider_id;
        let summary = match summaries.entry(rp_id) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                let pids = provider_ids.get(&rp_id).ok_or_else(|| {
                    PlacementError::object_action(
                        "build provider summaries",
                        format!("no identity for provider {rp_id}"),
                    )
                })?;
                entry.insert(ProviderSummary {
                    resource_provider: Arc::new(ResourceProvider {
                        id: pids.id,
                        uuid: pids.uuid,
                        root_provider_uuid: pids.root_uuid,
                        parent_provider_uuid: pids.parent_uuid,
                    }),
                    resources: Vec::new(),
                    traits: prov_traits.get(&rp_id).cloned().unwrap_or_default(),
                })
            }
        };
        let Some(inv) = &row.inventory else {
            continue;
        };
        // The backing store may aggregate usage as an arbitrary-precision
        // numeric and reports no row at all when nothing is allocated; both
        // collapse to a plain integer here.
        let used = coerce_used(inv.used.as_ref());
        let capacity = ((inv.total - inv.reserved) as f64 * inv.allocation_ratio) as u64;
        summary.resources.push(ProviderSummaryResource {
            resource_class: rc_cache.string_from_id(inv.resource_class_id)?,
            capacity,
            used,
            max_unit: inv.max_unit,
        });
    }
    Ok(summaries)
}

fn coerce_used(used: Option<&Number>) -> u64 {
    let Some(used) = used else { return 0 };
    used.as_u64()
        .or_else(|| used.as_i64().map(|v| v.max(0) as u64))
        .or_else(|| used.as_f64().map(|v| v as u64))
        .unwrap_or(0)
}

/// Whether a combination of resource entries collectively carries every
/// required trait while no selected provider carries a forbidden one.
fn satisfies_traits(
    res_requests: &[&AllocationRequestResource],
    summaries: &HashMap<ProviderId, ProviderSummary>,
    required_traits: &BTreeSet<String>,
    forbidden_traits: &BTreeSet<String>,
) -> bool {
    let mut all_traits: HashSet<&String> = HashSet::new();
    for arr in res_requests {
        let rp_id = arr.resource_provider.id;
        let Some(summary) = summaries.get(&rp_id) else {
            return false;
        };
        if !summary.traits.is_disjoint(forbidden_traits) {
            debug!("excluding provider {rp_id}, it has forbidden traits");
            return false;
        }
        all_traits.extend(summary.traits.iter());
    }
    let missing: Vec<&String> = required_traits
        .iter()
        .filter(|name| !all_traits.contains(name))
        .collect();
    if !missing.is_empty() {
        debug!(
            "excluding a candidate combination: required traits {missing:?} are not collectively satisfied"
        );
        return false;
    }
    true
}

/// Consolidate one allocation request per group into a single request,
/// summing amounts for duplicated `(provider, resource class)` pairs and
/// unioning the mappings.
fn consolidate_requests(
    areqs: &[&AllocationRequest],
) -> Result<AllocationRequest, PlacementError> {
    let first = areqs.first().ok_or_else(|| {
        PlacementError::object_action("consolidate allocation requests", "empty input")
    })?;
    let anchor = first.anchor_root_provider_uuid;
    let mut resource_requests: Vec<AllocationRequestResource> = Vec::new();
    let mut index_by_rp_rc: HashMap<(Uuid, String), usize> = HashMap::new();
    let mut mappings: HashMap<String, BTreeSet<Uuid>> = HashMap::new();
    for areq in areqs {
        if areq.anchor_root_provider_uuid != anchor {
            // Can only happen on a bug in the anchor indexing upstream.
            return Err(PlacementError::object_action(
                "consolidate allocation requests",
                "every allocation request in a consolidation group must share one anchor",
            ));
        }
        for arr in &areq.resource_requests {
            let key = (arr.resource_provider.uuid, arr.resource_class.clone());
            match index_by_rp_rc.get(&key) {
                Some(&index) => resource_requests[index].amount += arr.amount,
                None => {
                    index_by_rp_rc.insert(key, resource_requests.len());
                    resource_requests.push(arr.clone());
                }
            }
        }
        for (suffix, providers) in &areq.mappings {
            mappings
                .entry(suffix.clone())
                .or_default()
                .extend(providers.iter().copied());
        }
    }
    Ok(AllocationRequest::new(anchor, resource_requests, mappings))
}

/// Check a consolidated request against the provider summaries. Independent
/// per-group searches may each fit individually while their folded sum does
/// not, so every entry is rechecked against capacity and max_unit.
fn exceeds_capacity(
    areq: &AllocationRequest,
    psum_res_by_rp_rc: &HashMap<(Uuid, String), ProviderSummaryResource>,
) -> Result<bool, PlacementError> {
    for arr in &areq.resource_requests {
        let key = (arr.resource_provider.uuid, arr.resource_class.clone());
        let psum_res = psum_res_by_rp_rc.get(&key).ok_or_else(|| {
            PlacementError::object_action(
                "recheck capacity",
                format!(
                    "no summary resource for provider {} class {}",
                    key.0, key.1
                ),
            )
        })?;
        if psum_res.used + arr.amount > psum_res.capacity {
            debug!(
                "excluding a candidate: used ({}) + amount ({}) > capacity ({}) for {}",
                psum_res.used, arr.amount, psum_res.capacity, arr.resource_class
            );
            return Ok(true);
        }
        if arr.amount > psum_res.max_unit {
            debug!(
                "excluding a candidate: amount ({}) > max_unit ({}) for {}",
                arr.amount, psum_res.max_unit, arr.resource_class
            );
            return Ok(true);
        }
    }
    Ok(false)
}

/// Fold per-group candidates into whole-request candidates.
///
/// Per-group requests combine only at a common anchor; each combination
/// passes the group-policy and same-subtree filters, is consolidated, and is
/// rechecked against capacity before it counts.
fn merge_candidates(
    candidates: HashMap<String, (Vec<AllocationRequest>, Vec<ProviderSummary>)>,
    rw_ctx: &RequestWideSearchContext,
) -> Result<(Vec<AllocationRequest>, Vec<ProviderSummary>), PlacementError> {
    let all_suffixes: BTreeSet<String> = candidates.keys().cloned().collect();
    let num_granular_groups = all_suffixes.iter().filter(|s| !s.is_empty()).count();

    let mut areq_lists_by_anchor: HashMap<Uuid, BTreeMap<String, Vec<AllocationRequest>>> =
        HashMap::new();
    let mut all_psums: Vec<ProviderSummary> = Vec::new();
    let mut seen_psums: HashSet<Uuid> = HashSet::new();
    let mut psum_res_by_rp_rc: HashMap<(Uuid, String), ProviderSummaryResource> = HashMap::new();
    let mut parent_by_uuid: HashMap<Uuid, Option<Uuid>> = HashMap::new();
    for (suffix, (areqs, psums)) in candidates {
        for areq in areqs {
            areq_lists_by_anchor
                .entry(areq.anchor_root_provider_uuid)
                .or_default()
                .entry(suffix.clone())
                .or_default()
                .push(areq);
        }
        for psum in psums {
            let rp = &psum.resource_provider;
            parent_by_uuid.insert(rp.uuid, rp.parent_provider_uuid);
            for res in &psum.resources {
                psum_res_by_rp_rc.insert((rp.uuid, res.resource_class.clone()), res.clone());
            }
            if seen_psums.insert(rp.uuid) {
                all_psums.push(psum);
            }
        }
    }

    let mut ancestors = AncestorCache::new(parent_by_uuid);
    // Keyed by (anchor, request): equality ignores the anchor, but requests
    // that differ only in where they are anchored stay distinct candidates.
    let mut merged: HashSet<(Uuid, AllocationRequest)> = HashSet::new();
    for areq_lists_by_suffix in areq_lists_by_anchor.values() {
        // An anchor is only viable when every group produced at least one
        // request for it.
        if areq_lists_by_suffix.len() != all_suffixes.len() {
            continue;
        }
        let lists: Vec<&[AllocationRequest]> =
            areq_lists_by_suffix.values().map(Vec::as_slice).collect();
        for areq_list in CartesianProduct::new(lists) {
            if !satisfies_group_policy(&areq_list, rw_ctx.group_policy(), num_granular_groups) {
                continue;
            }
            if !satisfies_same_subtree(&areq_list, rw_ctx.same_subtrees(), &mut ancestors)? {
                continue;
            }
            let areq = consolidate_requests(&areq_list)?;
            // The combination folded amounts from independent queries; it
            // may exceed capacity even though each part fit on its own.
            if exceeds_capacity(&areq, &psum_res_by_rp_rc)? {
                continue;
            }
            merged.insert((areq.anchor_root_provider_uuid, areq));
        }
    }

    if merged.is_empty() {
        return Ok((Vec::new(), Vec::new()));
    }

    // Keep only the summaries for trees the surviving candidates reference.
    let tree_uuids: HashSet<Uuid> = merged
        .iter()
        .flat_map(|(_, areq)| areq.tree_roots())
        .collect();
    let psums: Vec<ProviderSummary> = all_psums
        .into_iter()
        .filter(|psum| tree_uuids.contains(&psum.resource_provider.root_provider_uuid))
        .collect();
    debug!(
        "merging candidates yields {} allocation requests and {} provider summaries",
        merged.len(),
        psums.len()
    );
    Ok((merged.into_iter().map(|(_, areq)| areq).collect(), psums))
}

/// Whether a combination of per-group requests satisfies the group policy.
///
/// Under `isolate`, the single-provider groups must be satisfied by pairwise
/// distinct providers: the number of distinct providers across them must
/// equal the number of granular groups in the request.
fn satisfies_group_policy(
    areqs: &[&AllocationRequest],
    group_policy: GroupPolicy,
    num_granular_groups: usize,
) -> bool {
    if group_policy != GroupPolicy::Isolate {
        return true;
    }
    let mut distinct: HashSet<Uuid> = HashSet::new();
    for areq in areqs {
        if !areq.use_same_provider {
            continue;
        }
        // A single-provider request has exactly one mapping entry holding
        // exactly one provider.
        if let Some(providers) = areq.mappings.values().next() {
            distinct.extend(providers.iter().copied());
        }
    }
    if distinct.len() == num_granular_groups {
        return true;
    }
    debug!(
        "excluding a candidate combination under group_policy=isolate: {} distinct providers for {} granular groups",
        distinct.len(),
        num_granular_groups
    );
    false
}

/// Whether a combination honors every same-subtree constraint: the providers
/// drawn from each constrained set of suffixes must share a common ancestor
/// that is itself one of them.
fn satisfies_same_subtree(
    areqs: &[&AllocationRequest],
    same_subtrees: &[BTreeSet<String>],
    ancestors: &mut AncestorCache,
) -> Result<bool, PlacementError> {
    for same_subtree in same_subtrees {
        let mut rp_uuids: BTreeSet<Uuid> = BTreeSet::new();
        for areq in areqs {
            for suffix in same_subtree {
                if let Some(providers) = areq.mappings.get(suffix) {
                    rp_uuids.extend(providers.iter().copied());
                }
            }
        }
        if !check_same_subtree(&rp_uuids, ancestors)? {
            debug!("excluding a candidate combination: providers are not in one subtree");
            return Ok(false);
        }
    }
    Ok(true)
}

/// Whether all the given providers live in one subtree, i.e. one of them is
/// a (reflexive) ancestor of all the others.
fn check_same_subtree(
    rp_uuids: &BTreeSet<Uuid>,
    ancestors: &mut AncestorCache,
) -> Result<bool, PlacementError> {
    if rp_uuids.len() <= 1 {
        return Ok(true);
    }
    let mut common: Option<HashSet<Uuid>> = None;
    for rp_uuid in rp_uuids {
        let chain = ancestors.ancestors(*rp_uuid)?;
        common = Some(match common {
            Some(common) => common.intersection(&chain).copied().collect(),
            None => chain,
        });
    }
    let common = common.unwrap_or_default();
    Ok(rp_uuids.iter().any(|rp_uuid| common.contains(rp_uuid)))
}

/// Iterator over the Cartesian product of several slices, yielding one
/// borrowed element per slice without materializing the product.
struct CartesianProduct<'a, T> {
    groups: Vec<&'a [T]>,
    indices: Vec<usize>,
    done: bool,
}

impl<'a, T> CartesianProduct<'a, T> {
    fn new(groups: Vec<&'a [T]>) -> Self {
        let done = groups.iter().any(|group| group.is_empty());
        let indices = vec![0; groups.len()];
        CartesianProduct {
            groups,
            indices,
            done,
        }
    }
}

impl<'a, T> Iterator for CartesianProduct<'a, T> {
    type Item = Vec<&'a T>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let item: Vec<&'a T> = self
            .groups
            .iter()
            .zip(&self.indices)
            .map(|(group, &i)| &group[i])
            .collect();
        // Advance like an odometer, least significant position last.
        let mut exhausted = true;
        for pos in (0..self.indices.len()).rev() {
            self.indices[pos] += 1;
            if self.indices[pos] < self.groups[pos].len() {
                exhausted = false;
                break;
            }
            self.indices[pos] = 0;
        }
        if exhausted {
            self.done = true;
        }
        Some(item)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider(id: ProviderId) -> Arc<ResourceProvider> {
        let uuid = Uuid::new_v4();
        Arc::new(ResourceProvider {
            id,
            uuid,
            root_provider_uuid: uuid,
            parent_provider_uuid: None,
        })
    }

    fn arr(rp: &Arc<ResourceProvider>, rc: &str, amount: u64) -> AllocationRequestResource {
        AllocationRequestResource {
            resource_provider: Arc::clone(rp),
            resource_class: rc.to_string(),
            amount,
        }
    }

    fn summary_with_traits(rp: &Arc<ResourceProvider>, traits: &[&str]) -> ProviderSummary {
        ProviderSummary {
            resource_provider: Arc::clone(rp),
            resources: Vec::new(),
            traits: traits.iter().map(|name| name.to_string()).collect(),
        }
    }

    fn areq_with_mapping(
        rp: &Arc<ResourceProvider>,
        suffix: &str,
        same_provider: bool,
    ) -> AllocationRequest {
        let mut areq = AllocationRequest::new(
            rp.root_provider_uuid,
            vec![arr(rp, "VCPU", 1)],
            HashMap::from([(suffix.to_string(), BTreeSet::from([rp.uuid]))]),
        );
        areq.use_same_provider = same_provider;
        areq
    }

    #[test]
    fn cartesian_product_covers_all_combinations() {
        let a = vec![1, 2];
        let b = vec![10, 20, 30];
        let combos: Vec<Vec<&i32>> =
            CartesianProduct::new(vec![a.as_slice(), b.as_slice()]).collect();
        assert_eq!(combos.len(), 6);
        assert_eq!(combos[0], vec![&1, &10]);
        assert_eq!(combos[5], vec![&2, &30]);
    }

    #[test]
    fn cartesian_product_with_empty_group_is_empty() {
        let a = vec![1];
        let empty: Vec<i32> = Vec::new();
        let combos: Vec<_> =
            CartesianProduct::new(vec![a.as_slice(), empty.as_slice()]).collect();
        assert!(combos.is_empty());
    }

    #[test]
    fn cartesian_product_of_nothing_is_one_empty_combination() {
        let combos: Vec<Vec<&i32>> = CartesianProduct::new(Vec::new()).collect();
        assert_eq!(combos, vec![Vec::<&i32>::new()]);
    }

    #[test]
    fn coerce_used_handles_missing_and_fractional_values() {
        assert_eq!(coerce_used(None), 0);
        assert_eq!(coerce_used(Some(&Number::from(7u64))), 7);
        assert_eq!(coerce_used(Some(&Number::from(-3i64))), 0);
        let fractional = Number::from_f64(5.9).unwrap();
        assert_eq!(coerce_used(Some(&fractional)), 5);
    }

    #[test]
    fn traits_are_collected_across_providers() {
        let rp1 = provider(1);
        let rp2 = provider(2);
        let summaries = HashMap::from([
            (1, summary_with_traits(&rp1, &["HW_CPU_X86_AVX2"])),
            (2, summary_with_traits(&rp2, &["STORAGE_DISK_SSD"])),
        ]);
        let combo = [arr(&rp1, "VCPU", 1), arr(&rp2, "DISK_GB", 10)];
        let combo_refs: Vec<&AllocationRequestResource> = combo.iter().collect();

        let required: BTreeSet<String> =
            ["HW_CPU_X86_AVX2", "STORAGE_DISK_SSD"].map(String::from).into();
        assert!(satisfies_traits(
            &combo_refs,
            &summaries,
            &required,
            &BTreeSet::new()
        ));

        let missing: BTreeSet<String> = ["HW_GPU_API_VULKAN"].map(String::from).into();
        assert!(!satisfies_traits(
            &combo_refs,
            &summaries,
            &missing,
            &BTreeSet::new()
        ));

        let forbidden: BTreeSet<String> = ["STORAGE_DISK_SSD"].map(String::from).into();
        assert!(!satisfies_traits(
            &combo_refs,
            &summaries,
            &BTreeSet::new(),
            &forbidden
        ));
    }

    #[test]
    fn consolidation_folds_duplicate_pairs_and_unions_mappings() {
        let rp = provider(1);
        let a = AllocationRequest::new(
            rp.root_provider_uuid,
            vec![arr(&rp, "VCPU", 3)],
            HashMap::from([("1".to_string(), BTreeSet::from([rp.uuid]))]),
        );
        let b = AllocationRequest::new(
            rp.root_provider_uuid,
            vec![arr(&rp, "VCPU", 2)],
            HashMap::from([("2".to_string(), BTreeSet::from([rp.uuid]))]),
        );
        let merged = consolidate_requests(&[&a, &b]).unwrap();
        assert_eq!(merged.resource_requests.len(), 1);
        assert_eq!(merged.resource_requests[0].amount, 5);
        assert_eq!(merged.mappings.len(), 2);
        assert_eq!(merged.anchor_root_provider_uuid, rp.root_provider_uuid);
    }

    #[test]
    fn consolidation_rejects_mixed_anchors() {
        let rp1 = provider(1);
        let rp2 = provider(2);
        let a = areq_with_mapping(&rp1, "1", false);
        let b = areq_with_mapping(&rp2, "2", false);
        let err = consolidate_requests(&[&a, &b]).unwrap_err();
        assert!(matches!(err, PlacementError::ObjectActionError { .. }));
    }

    #[test]
    fn isolate_requires_distinct_providers() {
        let rp1 = provider(1);
        let rp2 = provider(2);
        let a = areq_with_mapping(&rp1, "1", true);
        let b1 = areq_with_mapping(&rp1, "2", true);
        let b2 = areq_with_mapping(&rp2, "2", true);
        assert!(!satisfies_group_policy(&[&a, &b1], GroupPolicy::Isolate, 2));
        assert!(satisfies_group_policy(&[&a, &b2], GroupPolicy::Isolate, 2));
        // Without isolation anything goes.
        assert!(satisfies_group_policy(&[&a, &b1], GroupPolicy::None, 2));
    }

    #[test]
    fn capacity_recheck_rejects_folded_overcommit() {
        let rp = provider(1);
        let mut areq = areq_with_mapping(&rp, "", false);
        areq.resource_requests[0].amount = 6;
        let psum_res = ProviderSummaryResource {
            resource_class: "VCPU".to_string(),
            capacity: 4,
            used: 0,
            max_unit: 8,
        };
        let by_rp_rc = HashMap::from([((rp.uuid, "VCPU".to_string()), psum_res)]);
        assert!(exceeds_capacity(&areq, &by_rp_rc).unwrap());

        areq.resource_requests[0].amount = 4;
        assert!(!exceeds_capacity(&areq, &by_rp_rc).unwrap());
    }

    #[test]
    fn capacity_recheck_enforces_max_unit() {
        let rp = provider(1);
        let mut areq = areq_with_mapping(&rp, "", false);
        areq.resource_requests[0].amount = 3;
        let psum_res = ProviderSummaryResource {
            resource_class: "VCPU".to_string(),
            capacity: 16,
            used: 0,
            max_unit: 2,
        };
        let by_rp_rc = HashMap::from([((rp.uuid, "VCPU".to_string()), psum_res)]);
        assert!(exceeds_capacity(&areq, &by_rp_rc).unwrap());
    }

    #[test]
    fn same_subtree_accepts_a_chain_and_rejects_siblings_without_root() {
        let root = Uuid::new_v4();
        let left = Uuid::new_v4();
        let right = Uuid::new_v4();
        let parents = HashMap::from([
            (root, None),
            (left, Some(root)),
            (right, Some(root)),
        ]);
        let mut cache = AncestorCache::new(parents);
        // Root and a child share the root as common ancestor.
        assert!(check_same_subtree(&BTreeSet::from([root, left]), &mut cache).unwrap());
        // Two siblings have a common ancestor, but it is not one of them.
        assert!(!check_same_subtree(&BTreeSet::from([left, right]), &mut cache).unwrap());
    }
}
