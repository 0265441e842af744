//! Error types for placement operations.
//!
//! One tagged enum with category predicates covers every failure the crate
//! reports. At the error boundary only the category matters for control
//! flow, so callers match on [`PlacementError::is_not_found`] and friends
//! rather than on individual variants.

use uuid::Uuid;

/// Main error type for placement operations.
///
/// Store/transport failures from a backing store travel through
/// [`PlacementError::Store`] unchanged.
#[derive(Debug, thiserror::Error)]
pub enum PlacementError {
    /// A referenced resource does not exist.
    #[error("Resource could not be found.")]
    NotFound,

    /// A resource is being created over an existing one.
    #[error("Resource already exists.")]
    Exists,

    /// Marker indicating that filtering eliminated every possible allocation
    /// candidate. Does not represent an API error; an empty candidate list is
    /// a normal outcome for the caller.
    #[error("No results are possible.")]
    ResourceProviderNotFound,

    /// No resource class registered under the given id or name.
    #[error("No such resource class {resource_class}.")]
    ResourceClassNotFound {
        /// The resource class id or name that failed to resolve
        resource_class: String,
    },

    /// One or more trait names are unknown.
    #[error("No such trait(s): {names}.")]
    TraitNotFound {
        /// Comma-joined list of the unknown trait names
        names: String,
    },

    /// A provider has no inventory of the given resource class.
    #[error("No inventory of class {resource_class} found.")]
    InventoryWithResourceClassNotFound {
        /// The resource class whose inventory was missing
        resource_class: String,
    },

    /// A resource class is being created under a name that already exists.
    #[error("Resource class {resource_class} already exists.")]
    ResourceClassExists {
        /// The duplicate resource class name
        resource_class: String,
    },

    /// A trait is being created under a name that already exists.
    #[error("The trait {name} already exists.")]
    TraitExists {
        /// The duplicate trait name
        name: String,
    },

    /// Another actor updated the data read by this invocation.
    #[error("Another thread concurrently updated the data. Please retry your update")]
    ConcurrentUpdateDetected,

    /// Inventory for a provider/class pair failed validation.
    #[error("Inventory for '{resource_class}' on resource provider '{resource_provider}' invalid.")]
    InvalidInventory {
        /// The resource class of the invalid inventory record
        resource_class: String,
        /// The provider owning the invalid inventory record
        resource_provider: Uuid,
    },

    /// The reserved value of an inventory record meets or exceeds its total.
    #[error(
        "Invalid inventory for '{resource_class}' on resource provider \
         '{resource_provider}'. The reserved value is greater than or equal \
         to total."
    )]
    InvalidInventoryCapacity {
        /// The resource class of the invalid inventory record
        resource_class: String,
        /// The provider owning the invalid inventory record
        resource_provider: Uuid,
    },

    /// The reserved value of an inventory record exceeds its total, in a
    /// configuration where reserved may equal total.
    #[error(
        "Invalid inventory for '{resource_class}' on resource provider \
         '{resource_provider}'. The reserved value is greater than total."
    )]
    InvalidInventoryCapacityReservedCanBeTotal {
        /// The resource class of the invalid inventory record
        resource_class: String,
        /// The provider owning the invalid inventory record
        resource_provider: Uuid,
    },

    /// An allocation would exceed the capacity of a provider/class pair.
    #[error(
        "Unable to create allocation for '{resource_class}' on resource \
         provider '{resource_provider}'. The requested amount would exceed \
         the capacity."
    )]
    InvalidAllocationCapacityExceeded {
        /// The resource class being allocated
        resource_class: String,
        /// The provider whose capacity would be exceeded
        resource_provider: Uuid,
    },

    /// An allocation would violate the unit constraints of an inventory.
    #[error(
        "Unable to create allocation for '{resource_class}' on resource \
         provider '{resource_provider}'. The requested amount would violate \
         inventory constraints."
    )]
    InvalidAllocationConstraintsViolated {
        /// The resource class being allocated
        resource_class: String,
        /// The provider whose constraints would be violated
        resource_provider: Uuid,
    },

    /// Inventory cannot be modified because allocations exist against it.
    #[error(
        "Inventory for '{resource_classes}' on resource provider \
         '{resource_provider}' in use."
    )]
    InventoryInUse {
        /// Comma-joined resource class names with live allocations
        resource_classes: String,
        /// The provider owning the in-use inventory
        resource_provider: Uuid,
    },

    /// A retried store transaction gave up.
    #[error("Max retries of DB transaction exceeded attempting to perform {action}.")]
    MaxRetriesExceeded {
        /// The action that was being attempted
        action: String,
    },

    /// An internal operation hit a state that indicates a bug rather than a
    /// user or environment problem.
    #[error("Object action {action} failed because: {reason}")]
    ObjectActionError {
        /// The operation that failed
        action: String,
        /// Why the operation failed
        reason: String,
    },

    /// Policy forbids the attempted action.
    #[error("Policy does not allow {action} to be performed.")]
    PolicyNotAuthorized {
        /// The action that was denied
        action: String,
    },

    /// A failure reported by the backing store, propagated unchanged.
    #[error("Store error: {0}")]
    Store(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl PlacementError {
    /// Shorthand for the invariant-violation variant.
    pub(crate) fn object_action(action: &str, reason: impl Into<String>) -> Self {
        PlacementError::ObjectActionError {
            action: action.to_string(),
            reason: reason.into(),
        }
    }

    /// True for every "no such thing" variant, including the internal
    /// no-results marker.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            PlacementError::NotFound
                | PlacementError::ResourceProviderNotFound
                | PlacementError::ResourceClassNotFound { .. }
                | PlacementError::TraitNotFound { .. }
                | PlacementError::InventoryWithResourceClassNotFound { .. }
        )
    }

    /// True when the error reports a clash with existing state: duplicates
    /// or a concurrent update.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            PlacementError::Exists
                | PlacementError::ResourceClassExists { .. }
                | PlacementError::TraitExists { .. }
                | PlacementError::ConcurrentUpdateDetected
        )
    }

    /// True for every inventory-validation variant.
    pub fn is_invalid_inventory(&self) -> bool {
        matches!(
            self,
            PlacementError::InvalidInventory { .. }
                | PlacementError::InvalidInventoryCapacity { .. }
                | PlacementError::InvalidInventoryCapacityReservedCanBeTotal { .. }
                | PlacementError::InvalidAllocationCapacityExceeded { .. }
                | PlacementError::InvalidAllocationConstraintsViolated { .. }
                | PlacementError::InventoryInUse { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_category_covers_internal_marker() {
        assert!(PlacementError::ResourceProviderNotFound.is_not_found());
        assert!(
            PlacementError::ResourceClassNotFound {
                resource_class: "VCPU".to_string()
            }
            .is_not_found()
        );
        assert!(!PlacementError::ConcurrentUpdateDetected.is_not_found());
    }

    #[test]
    fn conflict_category() {
        assert!(PlacementError::ConcurrentUpdateDetected.is_conflict());
        assert!(
            PlacementError::TraitExists {
                name: "CUSTOM_GOLD".to_string()
            }
            .is_conflict()
        );
        assert!(!PlacementError::ResourceProviderNotFound.is_conflict());
    }

    #[test]
    fn invalid_inventory_category() {
        let err = PlacementError::InvalidAllocationCapacityExceeded {
            resource_class: "DISK_GB".to_string(),
            resource_provider: Uuid::new_v4(),
        };
        assert!(err.is_invalid_inventory());
        assert!(!err.is_not_found());
    }

    #[test]
    fn messages_carry_context() {
        let rp = Uuid::new_v4();
        let err = PlacementError::InvalidInventoryCapacity {
            resource_class: "MEMORY_MB".to_string(),
            resource_provider: rp,
        };
        let msg = err.to_string();
        assert!(msg.contains("MEMORY_MB"));
        assert!(msg.contains(&rp.to_string()));
    }
}
