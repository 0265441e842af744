//! Process-wide resource-class name/id cache.
//!
//! Resource classes are stored by internal numeric id but presented to
//! callers by string name. The cache translates in both directions. It is
//! read-mostly: the resolver only performs lookups; insertions happen out of
//! band when resource classes are created.

use std::collections::HashMap;
use std::sync::RwLock;

use crate::error::PlacementError;
use crate::provider::ResourceClassId;

#[derive(Debug, Default)]
struct RcMaps {
    by_id: HashMap<ResourceClassId, String>,
    by_name: HashMap<String, ResourceClassId>,
}

/// Bidirectional resource-class id/name map.
///
/// Lookups never cross an await point, so a blocking [`std::sync::RwLock`]
/// is sufficient; readers are uncontended in steady state.
#[derive(Debug, Default)]
pub struct ResourceClassCache {
    inner: RwLock<RcMaps>,
}

impl ResourceClassCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a resource class. Fails if the id or the name is already
    /// mapped to a different counterpart.
    pub fn insert(
        &self,
        rc_id: ResourceClassId,
        name: impl Into<String>,
    ) -> Result<(), PlacementError> {
        let name = name.into();
        let mut maps = self.inner.write().expect("resource class cache poisoned");
        let id_taken = maps.by_id.get(&rc_id).is_some_and(|n| *n != name);
        let name_taken = maps.by_name.get(&name).is_some_and(|id| *id != rc_id);
        if id_taken || name_taken {
            return Err(PlacementError::ResourceClassExists {
                resource_class: name,
            });
        }
        maps.by_id.insert(rc_id, name.clone());
        maps.by_name.insert(name, rc_id);
        Ok(())
    }

    /// Resolve an internal id to its string name.
    pub fn string_from_id(&self, rc_id: ResourceClassId) -> Result<String, PlacementError> {
        let maps = self.inner.read().expect("resource class cache poisoned");
        maps.by_id
            .get(&rc_id)
            .cloned()
            .ok_or(PlacementError::ResourceClassNotFound {
                resource_class: rc_id.to_string(),
            })
    }

    /// Resolve a string name to its internal id.
    pub fn id_from_string(&self, name: &str) -> Result<ResourceClassId, PlacementError> {
        let maps = self.inner.read().expect("resource class cache poisoned");
        maps.by_name
            .get(name)
            .copied()
            .ok_or_else(|| PlacementError::ResourceClassNotFound {
                resource_class: name.to_string(),
            })
    }
}
