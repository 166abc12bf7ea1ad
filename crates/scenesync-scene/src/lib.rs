//! Scenesync Scene -- entity id namespaces and the scene collaborator.
//!
//! This crate owns the identifier side of scene replication. Entity ids are
//! drawn from three disjoint namespaces (replicated, unacked, local) by an
//! explicitly owned [`IdAllocator`](entity::IdAllocator). Components are
//! addressed by `(entity id, type hash, name)` so that an entity can be
//! renamed without losing track of what is attached to it.
//!
//! # Quick Start
//!
//! ```
//! use scenesync_scene::prelude::*;
//!
//! let mut ids = IdAllocator::new();
//! let mut scene = Scene::new();
//!
//! let id = ids.allocate_unacked().unwrap();
//! scene.spawn_entity(id).unwrap();
//!
//! let key = ComponentKey::singleton(ComponentTypeHash::of_name("Placeable"));
//! scene.create_component(id, key.clone(), vec![1, 2, 3]).unwrap();
//!
//! assert!(id.is_unacked());
//! assert_eq!(scene.component(id, &key).unwrap().data, vec![1, 2, 3]);
//! ```

#![deny(unsafe_code)]

pub mod component;
pub mod entity;
pub mod scene;

use component::{ComponentKey, ComponentTypeHash};
use entity::{EntityId, IdNamespace};

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors produced by the id allocator.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdError {
    /// Every allocatable value in the namespace is reserved.
    #[error("entity id namespace {namespace:?} is exhausted ({live} live ids)")]
    Exhausted { namespace: IdNamespace, live: usize },
}

/// Errors produced by scene operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SceneError {
    /// No entity is indexed under the id.
    #[error("entity {id} does not exist")]
    UnknownEntity { id: EntityId },

    /// An entity is already indexed under the id.
    #[error("entity {id} already exists")]
    EntityExists { id: EntityId },

    /// The component does not exist on the entity.
    #[error("component {key} does not exist on entity {id}")]
    UnknownComponent { id: EntityId, key: ComponentKey },

    /// The component already exists on the entity.
    #[error("component {key} already exists on entity {id}")]
    ComponentExists { id: EntityId, key: ComponentKey },

    /// Two distinct type names produced the same type hash.
    #[error("component type '{incoming}' hashes to {hash}, already used by '{existing}'")]
    TypeHashCollision {
        hash: ComponentTypeHash,
        existing: String,
        incoming: String,
    },

    /// Id allocation failed.
    #[error(transparent)]
    Id(#[from] IdError),
}

// ---------------------------------------------------------------------------
// Prelude
// ---------------------------------------------------------------------------

/// Convenience re-exports for common usage.
pub mod prelude {
    pub use crate::component::{Component, ComponentKey, ComponentTypeHash, ComponentTypeRegistry};
    pub use crate::entity::{
        EntityId, IdAllocator, IdNamespace, FIRST_LOCAL_ID, FIRST_UNACKED_ID, LAST_REPLICATED_ID,
    };
    pub use crate::scene::{Entity, EntityHandle, Scene, SceneEvent, SceneGraph};
    pub use crate::{IdError, SceneError};
}

// ---------------------------------------------------------------------------
// Integration Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use crate::prelude::*;

    #[test]
    fn allocator_and_scene_agree_on_lifetime() {
        let mut ids = IdAllocator::new();
        let mut scene = Scene::new();

        let id = ids.allocate_replicated().unwrap();
        scene.spawn_entity(id).unwrap();
        assert!(!ids.is_free(id));

        scene.despawn_entity(id).unwrap();
        ids.deallocate(id);
        assert!(ids.is_free(id));
        assert!(!scene.contains_entity(id));
    }

    #[test]
    fn errors_render_ids() {
        let err = SceneError::UnknownEntity {
            id: EntityId::from_raw(42),
        };
        assert_eq!(err.to_string(), "entity 42 does not exist");

        let err: SceneError = IdError::Exhausted {
            namespace: IdNamespace::Unacked,
            live: 3,
        }
        .into();
        assert!(err.to_string().contains("Unacked"));
    }

    #[test]
    fn scene_event_serializes() {
        let event = SceneEvent::EntityRenamed {
            old: EntityId::from_raw(0x4000_0001),
            new: EntityId::from_raw(5),
        };
        let json = serde_json::to_string(&event).unwrap();
        let back: SceneEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(event, back);
    }
}
