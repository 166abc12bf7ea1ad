//! The scene graph collaborator.
//!
//! [`SceneGraph`] is the narrow surface replication needs from a scene: look
//! up entities and components by the identity tuple, create and remove them,
//! and move an entity to a new id without touching its contents. [`Scene`] is
//! an in-memory implementation used by tests, tools and headless peers.
//!
//! Mutators on the trait are silent. Callers decide when to publish a
//! [`SceneEvent`] through [`SceneGraph::notify`], which lets a batch of
//! component writes land before any listener recomputes derived state.

use std::collections::btree_map::Entry;
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::component::{Component, ComponentKey};
use crate::entity::EntityId;
use crate::SceneError;

// ---------------------------------------------------------------------------
// EntityHandle
// ---------------------------------------------------------------------------

/// Stable object identity of an entity.
///
/// Unlike [`EntityId`], a handle never changes for the lifetime of the entity,
/// including across renames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityHandle(pub u64);

// ---------------------------------------------------------------------------
// Entity
// ---------------------------------------------------------------------------

/// An entity and the components attached to it.
#[derive(Debug, Clone, PartialEq)]
pub struct Entity {
    handle: EntityHandle,
    id: EntityId,
    components: BTreeMap<ComponentKey, Component>,
}

impl Entity {
    /// Stable object identity.
    pub fn handle(&self) -> EntityHandle {
        self.handle
    }

    /// Current id.
    pub fn id(&self) -> EntityId {
        self.id
    }

    /// Component stored under `key`.
    pub fn component(&self, key: &ComponentKey) -> Option<&Component> {
        self.components.get(key)
    }

    /// All components in key order.
    pub fn components(&self) -> impl Iterator<Item = &Component> {
        self.components.values()
    }

    /// Number of attached components.
    pub fn component_count(&self) -> usize {
        self.components.len()
    }
}

// ---------------------------------------------------------------------------
// SceneEvent
// ---------------------------------------------------------------------------

/// A change notification published after a mutation has fully landed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SceneEvent {
    /// An entity was added to the scene.
    EntityCreated { id: EntityId },
    /// An entity was removed from the scene.
    EntityRemoved { id: EntityId },
    /// An entity moved from `old` to `new`, keeping its handle and components.
    EntityRenamed { old: EntityId, new: EntityId },
    /// A component was created on an entity.
    ComponentAdded { id: EntityId, key: ComponentKey },
    /// A component's state was replaced.
    ComponentChanged { id: EntityId, key: ComponentKey },
    /// A component was removed from an entity.
    ComponentRemoved { id: EntityId, key: ComponentKey },
}

// ---------------------------------------------------------------------------
// SceneGraph
// ---------------------------------------------------------------------------

/// What replication requires from a scene.
pub trait SceneGraph {
    /// The entity currently indexed under `id`.
    fn entity(&self, id: EntityId) -> Option<&Entity>;

    /// Whether an entity is indexed under `id`.
    fn contains_entity(&self, id: EntityId) -> bool {
        self.entity(id).is_some()
    }

    /// The component addressed by `(id, key)`.
    fn component(&self, id: EntityId, key: &ComponentKey) -> Option<&Component> {
        self.entity(id).and_then(|e| e.component(key))
    }

    /// Add a new, empty entity under `id`.
    fn spawn_entity(&mut self, id: EntityId) -> Result<EntityHandle, SceneError>;

    /// Remove the entity under `id` and return it.
    fn despawn_entity(&mut self, id: EntityId) -> Result<Entity, SceneError>;

    /// Create a component that does not exist yet.
    fn create_component(
        &mut self,
        id: EntityId,
        key: ComponentKey,
        data: Vec<u8>,
    ) -> Result<(), SceneError>;

    /// Replace the state of an existing component.
    fn write_component(
        &mut self,
        id: EntityId,
        key: &ComponentKey,
        data: Vec<u8>,
    ) -> Result<(), SceneError>;

    /// Remove a component. Returns `Ok(None)` when it was not present.
    fn remove_component(
        &mut self,
        id: EntityId,
        key: &ComponentKey,
    ) -> Result<Option<Component>, SceneError>;

    /// Move the entity under `old` to `new` in every index, in one step.
    fn rekey_entity(&mut self, old: EntityId, new: EntityId) -> Result<(), SceneError>;

    /// Publish a change notification.
    fn notify(&mut self, event: SceneEvent);
}

// ---------------------------------------------------------------------------
// Scene
// ---------------------------------------------------------------------------

/// In-memory [`SceneGraph`] with a queue of published events.
#[derive(Debug, Default)]
pub struct Scene {
    entities: BTreeMap<EntityId, Entity>,
    next_handle: u64,
    events: Vec<SceneEvent>,
}

impl Scene {
    /// Create an empty scene.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entities.
    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    /// Ids of all entities in ascending order.
    pub fn entity_ids(&self) -> impl Iterator<Item = EntityId> + '_ {
        self.entities.keys().copied()
    }

    /// Look up an entity by its stable handle.
    pub fn find_by_handle(&self, handle: EntityHandle) -> Option<&Entity> {
        self.entities.values().find(|e| e.handle == handle)
    }

    /// Events published since the last drain, oldest first.
    pub fn events(&self) -> &[SceneEvent] {
        &self.events
    }

    /// Take all pending events.
    pub fn drain_events(&mut self) -> Vec<SceneEvent> {
        std::mem::take(&mut self.events)
    }

    fn entity_mut(&mut self, id: EntityId) -> Result<&mut Entity, SceneError> {
        self.entities
            .get_mut(&id)
            .ok_or(SceneError::UnknownEntity { id })
    }
}

impl SceneGraph for Scene {
    fn entity(&self, id: EntityId) -> Option<&Entity> {
        self.entities.get(&id)
    }

    fn spawn_entity(&mut self, id: EntityId) -> Result<EntityHandle, SceneError> {
        if id.is_none() {
            return Err(SceneError::UnknownEntity { id });
        }
        match self.entities.entry(id) {
            Entry::Occupied(_) => Err(SceneError::EntityExists { id }),
            Entry::Vacant(slot) => {
                let handle = EntityHandle(self.next_handle);
                self.next_handle += 1;
                slot.insert(Entity {
                    handle,
                    id,
                    components: BTreeMap::new(),
                });
                Ok(handle)
            }
        }
    }

    fn despawn_entity(&mut self, id: EntityId) -> Result<Entity, SceneError> {
        self.entities
            .remove(&id)
            .ok_or(SceneError::UnknownEntity { id })
    }

    fn create_component(
        &mut self,
        id: EntityId,
        key: ComponentKey,
        data: Vec<u8>,
    ) -> Result<(), SceneError> {
        let entity = self.entity_mut(id)?;
        match entity.components.entry(key) {
            Entry::Occupied(slot) => Err(SceneError::ComponentExists {
                id,
                key: slot.key().clone(),
            }),
            Entry::Vacant(slot) => {
                let key = slot.key().clone();
                slot.insert(Component { key, data });
                Ok(())
            }
        }
    }

    fn write_component(
        &mut self,
        id: EntityId,
        key: &ComponentKey,
        data: Vec<u8>,
    ) -> Result<(), SceneError> {
        let entity = self.entity_mut(id)?;
        let component = entity
            .components
            .get_mut(key)
            .ok_or_else(|| SceneError::UnknownComponent {
                id,
                key: key.clone(),
            })?;
        component.data = data;
        Ok(())
    }

    fn remove_component(
        &mut self,
        id: EntityId,
        key: &ComponentKey,
    ) -> Result<Option<Component>, SceneError> {
        Ok(self.entity_mut(id)?.components.remove(key))
    }

    fn rekey_entity(&mut self, old: EntityId, new: EntityId) -> Result<(), SceneError> {
        if old == new {
            return Ok(());
        }
        if self.entities.contains_key(&new) {
            return Err(SceneError::EntityExists { id: new });
        }
        let mut entity = self
            .entities
            .remove(&old)
            .ok_or(SceneError::UnknownEntity { id: old })?;
        entity.id = new;
        self.entities.insert(new, entity);
        Ok(())
    }

    fn notify(&mut self, event: SceneEvent) {
        self.events.push(event);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
