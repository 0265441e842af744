//! # Allocation-Candidate Resolver for Resource Placement
//!
//! A library for computing every viable way to satisfy a resource request
//! against a topology of resource providers arranged in trees with sharing
//! relationships.
//!
//! ## Features
//!
//! - Trait-based data access: bring any backend by implementing
//!   [`PlacementStore`]; an in-memory store ships for tests and embedding
//! - Granular request groups with required/forbidden traits, isolation
//!   policy, and same-subtree constraints
//! - Sharing providers: inventory consumable from any tree sharing an
//!   aggregate with the owner
//! - Capacity-safe results: candidates are rechecked against inventory
//!   limits after cross-group consolidation
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::collections::{BTreeMap, HashMap};
//! use placement_candidates::{
//!     AllocationCandidates, InMemoryStore, Inventory, RequestGroup,
//!     RequestWideParams, ResourceClassCache,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Stage a topology: one provider with 8 VCPUs.
//!     let store = InMemoryStore::new();
//!     let rc_cache = ResourceClassCache::new();
//!     rc_cache.insert(0, "VCPU")?;
//!     let provider = store.create_provider(None).await?;
//!     store.set_inventory(provider.uuid, 0, Inventory::of(8)).await?;
//!
//!     // Ask for 4 of them.
//!     let groups = HashMap::from([(
//!         String::new(),
//!         RequestGroup::same_provider(BTreeMap::from([(0, 4)])),
//!     )]);
//!     let candidates = AllocationCandidates::get_by_requests(
//!         &store,
//!         &rc_cache,
//!         &groups,
//!         &RequestWideParams::default(),
//!         true,
//!     )
//!     .await?;
//!
//!     for areq in &candidates.allocation_requests {
//!         println!("{}", serde_json::to_string(areq)?);
//!     }
//!     Ok(())
//! }
//! ```

pub mod allocation;
pub mod candidates;
pub mod context;
pub mod error;
pub mod provider;
pub mod rc_cache;
pub mod request;
pub mod store;

// Core re-exports for library users
pub use allocation::{AllocationRequest, AllocationRequestResource};
pub use candidates::AllocationCandidates;
pub use context::{RequestGroupSearchContext, RequestWideSearchContext};
pub use error::PlacementError;
pub use provider::{
    MISC_SHARES_VIA_AGGREGATE, ProviderId, ProviderSummary, ProviderSummaryResource,
    ResourceClassId, ResourceProvider,
};
pub use rc_cache::ResourceClassCache;
pub use request::{GroupPolicy, RequestGroup, RequestWideParams};
pub use store::in_memory::{InMemoryStore, InMemoryStoreStats, Inventory};
pub use store::PlacementStore;
