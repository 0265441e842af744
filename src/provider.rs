//! Resource provider identity and per-provider capacity summaries.
//!
//! Providers form a forest: every provider knows the UUID of its tree root
//! (itself if standalone) and, for nested providers, its parent. A provider
//! carrying [`MISC_SHARES_VIA_AGGREGATE`] is a *sharing provider*: its
//! inventory is consumable from any tree that shares an aggregate with it.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::Serialize;
use uuid::Uuid;

/// Internal numeric id of a resource provider row.
pub type ProviderId = u64;
/// Internal numeric id of a resource class.
pub type ResourceClassId = u64;

/// Trait marking a provider whose inventory is shared with the trees in its
/// aggregates.
pub const MISC_SHARES_VIA_AGGREGATE: &str = "MISC_SHARES_VIA_AGGREGATE";

/// An identifiable source of inventory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResourceProvider {
    /// Internal numeric id, not exposed on the wire.
    #[serde(skip_serializing)]
    pub id: ProviderId,
    /// Stable external identifier.
    pub uuid: Uuid,
    /// Root of this provider's tree; equals `uuid` for standalone providers.
    pub root_provider_uuid: Uuid,
    /// Parent provider, when nested.
    pub parent_provider_uuid: Option<Uuid>,
}

impl ResourceProvider {
    /// True when this provider roots its own tree.
    pub fn is_root(&self) -> bool {
        self.uuid == self.root_provider_uuid
    }
}

/// Capacity and usage of one resource class on one provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProviderSummaryResource {
    /// Resource class name.
    pub resource_class: String,
    /// Effective capacity: `floor((total - reserved) * allocation_ratio)`.
    pub capacity: u64,
    /// Sum of `used` across live allocations.
    pub used: u64,
    /// Upper bound on a single allocation. Internal use only, not included
    /// when the object is serialized for output.
    #[serde(skip_serializing)]
    pub max_unit: u64,
}

/// A provider plus the resources and traits it brings to a candidate.
///
/// Providers that sit in a result tree without inventory of their own appear
/// with an empty `resources` list; they may be needed as transit nodes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProviderSummary {
    /// The provider being summarized.
    pub resource_provider: Arc<ResourceProvider>,
    /// One entry per resource class the provider has inventory for.
    pub resources: Vec<ProviderSummaryResource>,
    /// Trait names attached to the provider.
    pub traits: BTreeSet<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider(uuid: Uuid, root: Uuid, parent: Option<Uuid>) -> ResourceProvider {
        ResourceProvider {
            id: 1,
            uuid,
            root_provider_uuid: root,
            parent_provider_uuid: parent,
        }
    }

    #[test]
    fn root_detection() {
        let root = Uuid::new_v4();
        let child = Uuid::new_v4();
        assert!(provider(root, root, None).is_root());
        assert!(!provider(child, root, Some(root)).is_root());
    }

    #[test]
    fn summary_serialization_hides_internal_fields() {
        let root = Uuid::new_v4();
        let summary = ProviderSummary {
            resource_provider: Arc::new(provider(root, root, None)),
            resources: vec![ProviderSummaryResource {
                resource_class: "VCPU".to_string(),
                capacity: 8,
                used: 2,
                max_unit: 8,
            }],
            traits: BTreeSet::from(["HW_CPU_X86_AVX2".to_string()]),
        };
        let value = serde_json::to_value(&summary).unwrap();
        assert!(value["resource_provider"].get("id").is_none());
        assert!(value["resources"][0].get("max_unit").is_none());
        assert_eq!(value["resources"][0]["capacity"], 8);
        assert_eq!(value["traits"][0], "HW_CPU_X86_AVX2");
    }
}
