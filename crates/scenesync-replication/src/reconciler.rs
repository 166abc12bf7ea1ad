//! Applying replication messages to local scene state.
//!
//! The [`ReplicationReconciler`] tracks a small state machine per entity:
//!
//! ```text
//!   create (unacked/local id) ──> Local ──EntityIDCollision──> Replicated
//!   create (replicated id)    ──────────────────────────────> Replicated
//!   remove                    ──> Removed (terminal)
//! ```
//!
//! Inbound messages are applied against a [`SceneGraph`] and an
//! [`IdAllocator`], both owned by the caller and passed in by reference. The
//! reconciler runs on the scene's owning thread only.
//!
//! A rename either happens completely (allocator, scene index and entity
//! state all moved to the new id) or not at all. Component batches land in
//! full before any change notification is published.
//!
//! Local ids belong to this peer alone. Inbound messages addressing one are
//! ignored.

use std::collections::{BTreeMap, VecDeque};

use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use scenesync_protocol::message::{
    ComponentUpdate, EntityAction, EntityIdCollision, ExecutionType, Message, MessageId,
    RemoveComponents, UpdateComponents,
};
use scenesync_protocol::wire::MAX_SHORT_LEN;
use scenesync_scene::component::ComponentKey;
use scenesync_scene::entity::{EntityId, IdAllocator, IdNamespace};
use scenesync_scene::scene::{SceneEvent, SceneGraph};
use scenesync_scene::SceneError;

use crate::action::{ActionInvocation, ActionRegistry};
use crate::config::ReplicationConfig;
use crate::ReplicationError;

// ---------------------------------------------------------------------------
// EntityState
// ---------------------------------------------------------------------------

/// Replication state of one entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityState {
    /// Unacked or local id, not matched to an authoritative id.
    Local,
    /// Replicated id recognized by the authority.
    Replicated,
    /// Removed from the scene.
    Removed,
}

// ---------------------------------------------------------------------------
// ApplyReport / ApplyOutcome
// ---------------------------------------------------------------------------

/// Counters for one applied component batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplyReport {
    /// Components created.
    pub added: usize,
    /// Components whose state was replaced.
    pub changed: usize,
    /// Components removed.
    pub removed: usize,
    /// Updates skipped because the data matched the applied state.
    pub echoes_suppressed: usize,
}

impl ApplyReport {
    /// Whether the batch changed anything.
    pub fn is_noop(&self) -> bool {
        self.added == 0 && self.changed == 0 && self.removed == 0
    }
}

/// Why a message was dropped without effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IgnoreReason {
    /// The target entity does not exist here.
    UnknownEntity { id: EntityId },
    /// Only the authority issues renames; a server ignores them.
    CollisionFromPeer,
    /// The message addressed a local id, which no other peer can know.
    LocalEntity { id: EntityId },
}

/// What applying a message did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// A component batch was applied.
    Applied(ApplyReport),
    /// An entity moved to an authoritative id.
    Renamed { old: EntityId, new: EntityId },
    /// An action was delivered to `handlers` local handlers. On the server,
    /// `forward` is the copy to send to every other peer.
    ActionDispatched {
        handlers: usize,
        forward: Option<EntityAction>,
    },
    /// The message had no effect.
    Ignored(IgnoreReason),
}

// ---------------------------------------------------------------------------
// ReplicationReconciler
// ---------------------------------------------------------------------------

/// How many removed ids keep reporting [`EntityState::Removed`].
pub const REMOVED_HISTORY: usize = 1024;

/// Applies inbound replication messages and produces outbound ones.
#[derive(Debug)]
pub struct ReplicationReconciler {
    config: ReplicationConfig,
    /// Live entities only.
    states: BTreeMap<EntityId, EntityState>,
    /// Removed ids mapped to the sequence number of their removal.
    tombstones: BTreeMap<EntityId, u64>,
    /// Removal order, oldest first. Entries whose sequence no longer matches
    /// `tombstones` are stale.
    removal_order: VecDeque<(EntityId, u64)>,
    removal_seq: u64,
    actions: ActionRegistry,
    last_report: ApplyReport,
    closed: bool,
}

impl ReplicationReconciler {
    /// Create a reconciler with no tracked entities.
    pub fn new(config: ReplicationConfig) -> Self {
        Self {
            config,
            states: BTreeMap::new(),
            tombstones: BTreeMap::new(),
            removal_order: VecDeque::new(),
            removal_seq: 0,
            actions: ActionRegistry::new(),
            last_report: ApplyReport::default(),
            closed: false,
        }
    }

    pub fn config(&self) -> &ReplicationConfig {
        &self.config
    }

    /// Local action handlers.
    pub fn actions_mut(&mut self) -> &mut ActionRegistry {
        &mut self.actions
    }

    /// Whether a fatal error has closed the session.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Counters from the last applied component batch.
    pub fn last_report(&self) -> &ApplyReport {
        &self.last_report
    }

    /// State of the entity last known under `id`.
    ///
    /// Only the [`REMOVED_HISTORY`] most recent removals are remembered;
    /// older removed ids report `None`.
    pub fn state_of(&self, id: EntityId) -> Option<EntityState> {
        match self.states.get(&id) {
            Some(state) => Some(*state),
            None => self
                .tombstones
                .contains_key(&id)
                .then_some(EntityState::Removed),
        }
    }

    /// Number of ids with a recorded state, removed ones included.
    pub fn tracked_count(&self) -> usize {
        self.states.len() + self.tombstones.len()
    }

    /// Forget all entity states, reset the allocator and reopen the session.
    /// The caller tears down the scene itself.
    pub fn reset(&mut self, ids: &mut IdAllocator) {
        self.states.clear();
        self.tombstones.clear();
        self.removal_order.clear();
        self.last_report = ApplyReport::default();
        self.closed = false;
        ids.reset();
    }

    // -- entity lifecycle -----------------------------------------------------

    /// Create an empty entity with a fresh id from `namespace`.
    ///
    /// Clients pick [`IdNamespace::Unacked`] for entities the server should
    /// learn about and [`IdNamespace::Local`] for ones it never will. Only the
    /// server may create directly in [`IdNamespace::Replicated`].
    pub fn create_entity<S: SceneGraph>(
        &mut self,
        scene: &mut S,
        ids: &mut IdAllocator,
        namespace: IdNamespace,
    ) -> Result<EntityId, ReplicationError> {
        if namespace == IdNamespace::Replicated && !self.config.is_server() {
            return Err(ReplicationError::NotAuthority {
                operation: "allocate replicated ids",
            });
        }
        let id = ids.allocate_in(namespace).map_err(|e| self.fail(e.into()))?;
        if let Err(e) = scene.spawn_entity(id) {
            ids.deallocate(id);
            return Err(e.into());
        }
        self.track_created(scene, id);
        Ok(id)
    }

    /// Resolve an id proposed by a peer for a new entity (server only).
    ///
    /// A free replicated id is kept. Anything else (an unacked id, or a
    /// replicated id already in use) is replaced by a fresh replicated id and
    /// the [`EntityIdCollision`] to send back to the proposer is returned. The
    /// entity is spawned under the resulting id.
    pub fn assign_authoritative_id<S: SceneGraph>(
        &mut self,
        scene: &mut S,
        ids: &mut IdAllocator,
        proposed: EntityId,
    ) -> Result<(EntityId, Option<EntityIdCollision>), ReplicationError> {
        if !self.config.is_server() {
            return Err(ReplicationError::NotAuthority {
                operation: "assign authoritative ids",
            });
        }

        let keep =
            proposed.is_replicated() && !scene.contains_entity(proposed) && ids.allocate(proposed);
        let id = if keep {
            proposed
        } else {
            ids.allocate_replicated().map_err(|e| self.fail(e.into()))?
        };
        if let Err(e) = scene.spawn_entity(id) {
            ids.deallocate(id);
            return Err(e.into());
        }
        self.track_created(scene, id);

        if keep {
            Ok((id, None))
        } else {
            debug!(proposed = %proposed, assigned = %id, "entity id collision, assigning new id");
            Ok((id, Some(EntityIdCollision::new(proposed, id))))
        }
    }

    /// Remove an entity and release its id.
    pub fn remove_entity<S: SceneGraph>(
        &mut self,
        scene: &mut S,
        ids: &mut IdAllocator,
        id: EntityId,
    ) -> Result<(), ReplicationError> {
        scene.despawn_entity(id)?;
        ids.deallocate(id);
        self.states.remove(&id);
        self.record_removal(id);
        scene.notify(SceneEvent::EntityRemoved { id });
        Ok(())
    }

    fn track_created<S: SceneGraph>(&mut self, scene: &mut S, id: EntityId) {
        let state = if id.is_replicated() {
            EntityState::Replicated
        } else {
            EntityState::Local
        };
        self.set_live(id, state);
        scene.notify(SceneEvent::EntityCreated { id });
    }

    fn set_live(&mut self, id: EntityId, state: EntityState) {
        self.tombstones.remove(&id);
        self.states.insert(id, state);
    }

    fn record_removal(&mut self, id: EntityId) {
        self.removal_seq += 1;
        self.tombstones.insert(id, self.removal_seq);
        self.removal_order.push_back((id, self.removal_seq));
        while self.removal_order.len() > REMOVED_HISTORY {
            if let Some((old, seq)) = self.removal_order.pop_front() {
                if self.tombstones.get(&old) == Some(&seq) {
                    self.tombstones.remove(&old);
                }
            }
        }
    }

    // -- inbound --------------------------------------------------------------

    /// Decode a payload received under `message_id` and apply it.
    ///
    /// A malformed payload is dropped and reported as
    /// [`ReplicationError::Malformed`]; the session stays open.
    pub fn receive<S: SceneGraph>(
        &mut self,
        scene: &mut S,
        ids: &mut IdAllocator,
        message_id: MessageId,
        payload: &[u8],
    ) -> Result<ApplyOutcome, ReplicationError> {
        if self.closed {
            return Err(ReplicationError::SessionClosed);
        }
        let message = Message::decode(message_id, payload).map_err(|e| {
            warn!(message_id, error = %e, "dropping malformed message");
            ReplicationError::Malformed(e)
        })?;
        self.apply(scene, ids, &message)
    }

    /// Apply a decoded message.
    pub fn apply<S: SceneGraph>(
        &mut self,
        scene: &mut S,
        ids: &mut IdAllocator,
        message: &Message,
    ) -> Result<ApplyOutcome, ReplicationError> {
        if self.closed {
            return Err(ReplicationError::SessionClosed);
        }
        let target = message.entity_id();
        if target.is_local() {
            warn!(
                entity = %target,
                message = message.name(),
                "message for a local entity, disregarding"
            );
            return Ok(ApplyOutcome::Ignored(IgnoreReason::LocalEntity { id: target }));
        }
        let result = match message {
            Message::EntityIdCollision(msg) => self.apply_collision(scene, ids, msg),
            Message::UpdateComponents(msg) => self.apply_update(scene, msg),
            Message::RemoveComponents(msg) => self.apply_remove(scene, msg),
            Message::EntityAction(msg) => self.apply_action(scene, msg),
        };
        result.map_err(|e| self.fail(e))
    }

    /// Close the session on fatal errors, if configured to.
    fn fail(&mut self, err: ReplicationError) -> ReplicationError {
        if err.is_fatal() {
            error!(error = %err, "fatal replication error");
            if self.config.close_on_fatal {
                self.closed = true;
            }
        }
        err
    }

    fn apply_collision<S: SceneGraph>(
        &mut self,
        scene: &mut S,
        ids: &mut IdAllocator,
        msg: &EntityIdCollision,
    ) -> Result<ApplyOutcome, ReplicationError> {
        let (old, new) = (msg.old_entity_id, msg.new_entity_id);

        if self.config.is_server() {
            warn!(old = %old, new = %new, "received EntityIDCollision from a client, disregarding");
            return Ok(ApplyOutcome::Ignored(IgnoreReason::CollisionFromPeer));
        }
        if !scene.contains_entity(old) {
            warn!(old = %old, new = %new, "EntityIDCollision for unknown entity");
            return Err(ReplicationError::UnknownRenameSource { old });
        }
        if !new.is_replicated() {
            return Err(ReplicationError::InvalidRenameTarget { old, new });
        }
        if old == new {
            self.set_live(new, EntityState::Replicated);
            return Ok(ApplyOutcome::Renamed { old, new });
        }
        if !ids.is_free(new) || scene.contains_entity(new) {
            return Err(ReplicationError::RenameTargetOccupied { old, new });
        }

        // Every precondition holds; from here on the rename cannot be
        // observed half done.
        let old_was_reserved = !ids.is_free(old);
        ids.deallocate(old);
        if !ids.allocate(new) {
            if old_was_reserved {
                ids.allocate(old);
            }
            return Err(ReplicationError::RenameTargetOccupied { old, new });
        }
        if let Err(e) = scene.rekey_entity(old, new) {
            ids.deallocate(new);
            if old_was_reserved {
                ids.allocate(old);
            }
            return Err(e.into());
        }
        self.states.remove(&old);
        self.set_live(new, EntityState::Replicated);

        debug!(old = %old, new = %new, "entity renamed to authoritative id");
        scene.notify(SceneEvent::EntityRenamed { old, new });
        Ok(ApplyOutcome::Renamed { old, new })
    }

    fn apply_update<S: SceneGraph>(
        &mut self,
        scene: &mut S,
        msg: &UpdateComponents,
    ) -> Result<ApplyOutcome, ReplicationError> {
        let id = msg.entity_id;
        if !scene.contains_entity(id) {
            debug!(entity = %id, "UpdateComponents for unknown entity, ignoring");
            return Ok(ApplyOutcome::Ignored(IgnoreReason::UnknownEntity { id }));
        }

        let mut report = ApplyReport::default();
        let mut events = Vec::with_capacity(msg.components.len());
        for ComponentUpdate { key, data } in &msg.components {
            let unchanged = scene.component(id, key).map(|c| c.data == *data);
            match unchanged {
                None => {
                    scene.create_component(id, key.clone(), data.clone())?;
                    report.added += 1;
                    events.push(SceneEvent::ComponentAdded {
                        id,
                        key: key.clone(),
                    });
                }
                Some(true) if self.config.suppress_echoes => {
                    report.echoes_suppressed += 1;
                }
                Some(_) => {
                    scene.write_component(id, key, data.clone())?;
                    report.changed += 1;
                    events.push(SceneEvent::ComponentChanged {
                        id,
                        key: key.clone(),
                    });
                }
            }
        }

        // Publish only after the whole batch has landed.
        for event in events {
            scene.notify(event);
        }
        self.last_report = report.clone();
        Ok(ApplyOutcome::Applied(report))
    }

    fn apply_remove<S: SceneGraph>(
        &mut self,
        scene: &mut S,
        msg: &RemoveComponents,
    ) -> Result<ApplyOutcome, ReplicationError> {
        let id = msg.entity_id;
        if !scene.contains_entity(id) {
            debug!(entity = %id, "RemoveComponents for unknown entity, ignoring");
            return Ok(ApplyOutcome::Ignored(IgnoreReason::UnknownEntity { id }));
        }

        let mut report = ApplyReport::default();
        let mut events = Vec::new();
        for key in &msg.components {
            if scene.remove_component(id, key)?.is_some() {
                report.removed += 1;
                events.push(SceneEvent::ComponentRemoved {
                    id,
                    key: key.clone(),
                });
            }
        }
        for event in events {
            scene.notify(event);
        }
        self.last_report = report.clone();
        Ok(ApplyOutcome::Applied(report))
    }

    fn apply_action<S: SceneGraph>(
        &mut self,
        scene: &mut S,
        msg: &EntityAction,
    ) -> Result<ApplyOutcome, ReplicationError> {
        let id = msg.entity_id;
        let Some(entity) = scene.entity(id) else {
            warn!(entity = %id, action = %msg.name_lossy(), "entity not found for EntityAction");
            return Ok(ApplyOutcome::Ignored(IgnoreReason::UnknownEntity { id }));
        };
        let handle = entity.handle();

        let exec = msg.execution_type;
        let is_server = self.config.is_server();
        let handlers = if exec.contains(ExecutionType::LOCAL)
            || (is_server && exec.contains(ExecutionType::SERVER))
        {
            self.actions.dispatch(&ActionInvocation {
                entity: id,
                handle,
                name: &msg.name,
                parameters: &msg.parameters,
            })
        } else {
            0
        };

        // Peers receive the action as a plain local execution, and never the
        // originator (the caller's transport excludes the source connection).
        let forward = (is_server && exec.contains(ExecutionType::PEERS)).then(|| {
            let mut copy = msg.clone();
            copy.execution_type = ExecutionType::LOCAL;
            copy
        });

        debug!(entity = %id, action = %msg.name_lossy(), handlers, "EntityAction applied");
        Ok(ApplyOutcome::ActionDispatched { handlers, forward })
    }

    // -- outbound -------------------------------------------------------------

    /// Trigger an action on a local entity.
    ///
    /// Runs the local handlers when the execution type asks for it and
    /// returns the message to send, if any: a client forwards `SERVER`/`PEERS`
    /// requests with the `LOCAL` bit cleared; the server sends `PEERS`
    /// requests as `LOCAL` executions.
    pub fn trigger_action<S: SceneGraph>(
        &mut self,
        scene: &S,
        id: EntityId,
        name: &str,
        execution_type: ExecutionType,
        parameters: Vec<Vec<u8>>,
    ) -> Result<Option<EntityAction>, ReplicationError> {
        let handle = scene
            .entity(id)
            .ok_or(SceneError::UnknownEntity { id })?
            .handle();
        let is_server = self.config.is_server();

        if execution_type.contains(ExecutionType::LOCAL)
            || (is_server && execution_type.contains(ExecutionType::SERVER))
        {
            self.actions.dispatch(&ActionInvocation {
                entity: id,
                handle,
                name: name.as_bytes(),
                parameters: &parameters,
            });
        }

        if id.is_local() {
            return Ok(None);
        }
        let outbound = if is_server {
            execution_type
                .contains(ExecutionType::PEERS)
                .then_some(ExecutionType::LOCAL)
        } else {
            (execution_type.contains(ExecutionType::SERVER)
                || execution_type.contains(ExecutionType::PEERS))
            .then(|| execution_type.without(ExecutionType::LOCAL))
        };
        Ok(outbound.map(|exec| EntityAction::new(id, name, exec, parameters)))
    }

    /// Full component state of an entity as `UpdateComponents` messages,
    /// split at the 255-component wire limit.
    pub fn build_update<S: SceneGraph>(
        &self,
        scene: &S,
        id: EntityId,
    ) -> Result<Vec<UpdateComponents>, ReplicationError> {
        if id.is_local() {
            return Err(ReplicationError::LocalOnly { id });
        }
        let entity = scene.entity(id).ok_or(SceneError::UnknownEntity { id })?;
        let components: Vec<&_> = entity.components().collect();
        if components.is_empty() {
            return Ok(vec![UpdateComponents::new(id)]);
        }
        Ok(components
            .chunks(MAX_SHORT_LEN)
            .map(|chunk| {
                chunk.iter().fold(UpdateComponents::new(id), |msg, c| {
                    msg.with_component(c.key.clone(), c.data.clone())
                })
            })
            .collect())
    }

    /// `RemoveComponents` messages for `keys`, split at the wire limit.
    pub fn build_remove(
        &self,
        id: EntityId,
        keys: &[ComponentKey],
    ) -> Result<Vec<RemoveComponents>, ReplicationError> {
        if id.is_local() {
            return Err(ReplicationError::LocalOnly { id });
        }
        Ok(keys
            .chunks(MAX_SHORT_LEN)
            .map(|chunk| {
                let mut msg = RemoveComponents::new(id);
                msg.components = chunk.to_vec();
                msg
            })
            .collect())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
