//! Allocation requests: the candidates the resolver proposes.
//!
//! An [`AllocationRequest`] is one viable way to satisfy the whole request:
//! a list of `(provider, resource class, amount)` entries plus a record of
//! which provider satisfied which request-group suffix. The anchor root and
//! the same-provider marker steer merging and policy filtering internally
//! and are not part of the serialized form.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::Arc;

use serde::ser::{SerializeStruct, Serializer};
use serde::Serialize;
use uuid::Uuid;

use crate::provider::ResourceProvider;

/// One `(provider, resource class, amount)` entry of an allocation request.
///
/// The provider is shared, not owned: anchor-rebound copies of an allocation
/// request reference the same provider objects, which stay immutable after
/// construction.
#[derive(Debug, Clone)]
pub struct AllocationRequestResource {
    /// Provider to consume from.
    pub resource_provider: Arc<ResourceProvider>,
    /// Resource class name.
    pub resource_class: String,
    /// Amount to consume.
    pub amount: u64,
}

impl PartialEq for AllocationRequestResource {
    fn eq(&self, other: &Self) -> bool {
        self.resource_provider.id == other.resource_provider.id
            && self.resource_class == other.resource_class
            && self.amount == other.amount
    }
}

impl Eq for AllocationRequestResource {}

impl Hash for AllocationRequestResource {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.resource_provider.id.hash(state);
        self.resource_class.hash(state);
        self.amount.hash(state);
    }
}

impl Serialize for AllocationRequestResource {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        #[derive(Serialize)]
        struct ProviderRef {
            uuid: Uuid,
        }
        let mut state = serializer.serialize_struct("AllocationRequestResource", 3)?;
        state.serialize_field(
            "resource_provider",
            &ProviderRef {
                uuid: self.resource_provider.uuid,
            },
        )?;
        state.serialize_field("resource_class", &self.resource_class)?;
        state.serialize_field("amount", &self.amount)?;
        state.end()
    }
}

/// A proposed allocation satisfying one or all request groups.
#[derive(Debug, Clone)]
pub struct AllocationRequest {
    /// UUID of (the root of the tree including) the non-sharing provider this
    /// request is anchored to. Internal use only, not serialized.
    pub anchor_root_provider_uuid: Uuid,
    /// Whether every resource here must come from one provider, per the
    /// originating group. Internal use only, not serialized.
    pub use_same_provider: bool,
    /// The resources to consume.
    pub resource_requests: Vec<AllocationRequestResource>,
    /// Which providers satisfied which group suffix. A resource-less group
    /// contributes its provider here with no resource entry.
    pub mappings: HashMap<String, BTreeSet<Uuid>>,
}

impl AllocationRequest {
    /// Build a request anchored at the given root.
    pub fn new(
        anchor_root_provider_uuid: Uuid,
        resource_requests: Vec<AllocationRequestResource>,
        mappings: HashMap<String, BTreeSet<Uuid>>,
    ) -> Self {
        AllocationRequest {
            anchor_root_provider_uuid,
            use_same_provider: false,
            resource_requests,
            mappings,
        }
    }

    /// A copy of this request rebound to a different anchor. The resource
    /// entries are shared with the original.
    pub fn with_anchor(&self, anchor_root_provider_uuid: Uuid) -> Self {
        AllocationRequest {
            anchor_root_provider_uuid,
            ..self.clone()
        }
    }

    /// The set of tree roots referenced by this request's resources.
    pub(crate) fn tree_roots(&self) -> impl Iterator<Item = Uuid> + '_ {
        self.resource_requests
            .iter()
            .map(|arr| arr.resource_provider.root_provider_uuid)
    }
}

impl PartialEq for AllocationRequest {
    fn eq(&self, other: &Self) -> bool {
        let mine: HashSet<&AllocationRequestResource> = self.resource_requests.iter().collect();
        let theirs: HashSet<&AllocationRequestResource> = other.resource_requests.iter().collect();
        mine == theirs && self.mappings == other.mappings
    }
}

impl Eq for AllocationRequest {}

impl Hash for AllocationRequest {
    fn hash<H: Hasher>(&self, state: &mut H) {
        // Stable order without imposing one on the field: hash each resource
        // entry independently and combine the sorted hashes. Mappings are
        // deliberately left out; unequal values may collide but equal values
        // always agree.
        let mut hashes: Vec<u64> = self
            .resource_requests
            .iter()
            .map(|arr| {
                let mut h = DefaultHasher::new();
                arr.hash(&mut h);
                h.finish()
            })
            .collect();
        hashes.sort_unstable();
        hashes.hash(state);
    }
}

impl Serialize for AllocationRequest {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mappings: BTreeMap<&str, &BTreeSet<Uuid>> = self
            .mappings
            .iter()
            .map(|(suffix, providers)| (suffix.as_str(), providers))
            .collect();
        let mut state = serializer.serialize_struct("AllocationRequest", 2)?;
        state.serialize_field("resource_requests", &self.resource_requests)?;
        state.serialize_field("mappings", &mappings)?;
        state.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider(id: u64) -> Arc<ResourceProvider> {
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

    fn hash_of(areq: &AllocationRequest) -> u64 {
        let mut h = DefaultHasher::new();
        areq.hash(&mut h);
        h.finish()
    }

    #[test]
    fn resource_equality_is_by_provider_class_amount() {
        let rp = provider(7);
        assert_eq!(arr(&rp, "VCPU", 2), arr(&rp, "VCPU", 2));
        assert_ne!(arr(&rp, "VCPU", 2), arr(&rp, "VCPU", 3));
        assert_ne!(arr(&rp, "VCPU", 2), arr(&provider(8), "VCPU", 2));
    }

    #[test]
    fn request_hash_ignores_resource_order() {
        let rp1 = provider(1);
        let rp2 = provider(2);
        let mappings = HashMap::from([(
            String::new(),
            BTreeSet::from([rp1.uuid, rp2.uuid]),
        )]);
        let anchor = rp1.root_provider_uuid;
        let a = AllocationRequest::new(
            anchor,
            vec![arr(&rp1, "VCPU", 2), arr(&rp2, "MEMORY_MB", 512)],
            mappings.clone(),
        );
        let b = AllocationRequest::new(
            anchor,
            vec![arr(&rp2, "MEMORY_MB", 512), arr(&rp1, "VCPU", 2)],
            mappings,
        );
        assert_eq!(a, b);
        assert_eq!(hash_of(&a), hash_of(&b));
    }

    #[test]
    fn request_equality_includes_mappings() {
        let rp = provider(1);
        let resources = vec![arr(&rp, "VCPU", 2)];
        let a = AllocationRequest::new(
            rp.root_provider_uuid,
            resources.clone(),
            HashMap::from([("1".to_string(), BTreeSet::from([rp.uuid]))]),
        );
        let b = AllocationRequest::new(
            rp.root_provider_uuid,
            resources,
            HashMap::from([("2".to_string(), BTreeSet::from([rp.uuid]))]),
        );
        assert_ne!(a, b);
        // Hash covers only the resource entries, so these collide; that is
        // allowed, equality stays the finer relation.
        assert_eq!(hash_of(&a), hash_of(&b));
    }

    #[test]
    fn anchor_rebinding_shares_resources() {
        let rp = provider(1);
        let base = AllocationRequest::new(
            rp.root_provider_uuid,
            vec![arr(&rp, "DISK_GB", 100)],
            HashMap::from([(String::new(), BTreeSet::from([rp.uuid]))]),
        );
        let other_anchor = Uuid::new_v4();
        let rebound = base.with_anchor(other_anchor);
        assert_eq!(rebound.anchor_root_provider_uuid, other_anchor);
        assert_eq!(rebound.resource_requests, base.resource_requests);
        assert!(Arc::ptr_eq(
            &rebound.resource_requests[0].resource_provider,
            &base.resource_requests[0].resource_provider,
        ));
    }

    #[test]
    fn wire_shape_omits_internal_fields() {
        let rp = provider(1);
        let areq = AllocationRequest::new(
            rp.root_provider_uuid,
            vec![arr(&rp, "VCPU", 4)],
            HashMap::from([(String::new(), BTreeSet::from([rp.uuid]))]),
        );
        let value = serde_json::to_value(&areq).unwrap();
        assert!(value.get("anchor_root_provider_uuid").is_none());
        assert!(value.get("use_same_provider").is_none());
        assert_eq!(
            value["resource_requests"][0]["resource_provider"]["uuid"],
            rp.uuid.to_string()
        );
        assert_eq!(value["resource_requests"][0]["resource_class"], "VCPU");
        assert_eq!(value["resource_requests"][0]["amount"], 4);
        assert_eq!(value["mappings"][""][0], rp.uuid.to_string());
    }
}
