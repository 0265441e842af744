//! Request groups and request-wide parameters.
//!
//! A request is a set of groups keyed by *suffix*: the empty suffix names the
//! default group, non-empty suffixes name granular groups. Request-wide
//! parameters express policies that cut across groups.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::provider::ResourceClassId;

/// How granular request groups may interact when a candidate is assembled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupPolicy {
    /// No restriction; groups may land on the same provider.
    #[default]
    None,
    /// Each single-provider group must be satisfied by a distinct provider.
    Isolate,
}

/// One group of resource and trait constraints.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestGroup {
    /// Requested amount per resource class id; every amount is positive.
    pub resources: BTreeMap<ResourceClassId, u64>,
    /// Traits the satisfying provider(s) must collectively carry.
    pub required_traits: BTreeSet<String>,
    /// Traits no satisfying provider may carry.
    pub forbidden_traits: BTreeSet<String>,
    /// When true the whole group must be satisfied by a single provider.
    pub use_same_provider: bool,
}

impl RequestGroup {
    /// A group that must land on one provider.
    pub fn same_provider(resources: BTreeMap<ResourceClassId, u64>) -> Self {
        RequestGroup {
            resources,
            use_same_provider: true,
            ..Default::default()
        }
    }

    /// A group free to spread across a provider tree.
    pub fn spread(resources: BTreeMap<ResourceClassId, u64>) -> Self {
        RequestGroup {
            resources,
            use_same_provider: false,
            ..Default::default()
        }
    }
}

/// Parameters that apply to the whole request rather than to one group.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestWideParams {
    /// Cross-group isolation policy.
    pub group_policy: GroupPolicy,
    /// Each inner set of suffixes constrains its groups' providers to one
    /// subtree.
    pub same_subtrees: Vec<BTreeSet<String>>,
    /// Maximum number of candidates to return.
    pub limit: Option<usize>,
    /// Shuffle candidates before applying the limit.
    pub randomize: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn group_constructors_set_same_provider() {
        let resources = BTreeMap::from([(0, 4)]);
        assert!(RequestGroup::same_provider(resources.clone()).use_same_provider);
        assert!(!RequestGroup::spread(resources).use_same_provider);
    }

    #[test]
    fn group_policy_wire_names() {
        assert_eq!(serde_json::to_value(GroupPolicy::Isolate).unwrap(), "isolate");
        assert_eq!(serde_json::to_value(GroupPolicy::None).unwrap(), "none");
        let parsed: GroupPolicy = serde_json::from_str("\"isolate\"").unwrap();
        assert_eq!(parsed, GroupPolicy::Isolate);
    }

    #[test]
    fn params_default_to_unlimited_unordered() {
        let params = RequestWideParams::default();
        assert_eq!(params.group_policy, GroupPolicy::None);
        assert!(params.limit.is_none());
        assert!(!params.randomize);
        assert!(params.same_subtrees.is_empty());
    }
}
