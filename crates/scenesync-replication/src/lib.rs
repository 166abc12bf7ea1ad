//! Scenesync Replication -- reconciling replicated scene state.
//!
//! A [`ReplicationReconciler`](reconciler::ReplicationReconciler) sits between
//! a transport (not provided here) and a scene. It applies inbound
//! [`Message`](scenesync_protocol::message::Message)s to a
//! [`SceneGraph`](scenesync_scene::scene::SceneGraph) and an
//! [`IdAllocator`](scenesync_scene::entity::IdAllocator), and builds the
//! outbound messages for local changes.
//!
//! # Quick Start
//!
//! ```
//! use scenesync_replication::prelude::*;
//! use scenesync_protocol::prelude::*;
//! use scenesync_scene::prelude::*;
//!
//! let mut client = ReplicationReconciler::new(ReplicationConfig::client());
//! let mut scene = Scene::new();
//! let mut ids = IdAllocator::new();
//!
//! let temp = client.create_entity(&mut scene, &mut ids, IdNamespace::Unacked).unwrap();
//! let ack = EntityIdCollision::new(temp, EntityId::from_raw(7));
//! let bytes = ack.to_bytes().unwrap();
//!
//! client.receive(&mut scene, &mut ids, EntityIdCollision::ID, &bytes).unwrap();
//! assert!(scene.contains_entity(EntityId::from_raw(7)));
//! assert!(ids.is_free(temp));
//! ```

#![deny(unsafe_code)]

pub mod action;
pub mod config;
pub mod logging;
pub mod reconciler;

use scenesync_protocol::CodecError;
use scenesync_scene::entity::EntityId;
use scenesync_scene::{IdError, SceneError};

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors produced while reconciling replication messages.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReplicationError {
    /// The payload could not be decoded. The message was dropped.
    #[error("malformed message: {0}")]
    Malformed(#[from] CodecError),

    /// A rename named an entity this peer does not have.
    #[error("cannot rename unknown entity {old}")]
    UnknownRenameSource { old: EntityId },

    /// A rename targeted an id that is already in use.
    #[error("cannot rename {old} to {new}: target id is occupied")]
    RenameTargetOccupied { old: EntityId, new: EntityId },

    /// A rename targeted an id outside the replicated namespace.
    #[error("cannot rename {old} to {new}: target is not a replicated id")]
    InvalidRenameTarget { old: EntityId, new: EntityId },

    /// The operation is reserved for the server.
    #[error("only the server may {operation}")]
    NotAuthority { operation: &'static str },

    /// Local entities are never replicated.
    #[error("entity {id} is local and is not replicated")]
    LocalOnly { id: EntityId },

    /// A previous fatal error closed the session.
    #[error("replication session is closed")]
    SessionClosed,

    /// A scene operation failed.
    #[error(transparent)]
    Scene(#[from] SceneError),

    /// Id allocation failed.
    #[error(transparent)]
    Id(#[from] IdError),
}

impl ReplicationError {
    /// Whether local state can no longer be trusted to match the authority.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ReplicationError::RenameTargetOccupied { .. }
                | ReplicationError::InvalidRenameTarget { .. }
                | ReplicationError::Id(_)
        )
    }
}

// ---------------------------------------------------------------------------
// Prelude
// ---------------------------------------------------------------------------

/// Convenience re-exports for common usage.
pub mod prelude {
    pub use crate::action::{ActionHandler, ActionInvocation, ActionRegistry};
    pub use crate::config::{PeerRole, ReplicationConfig};
    pub use crate::logging::init_logging;
    pub use crate::reconciler::{
        ApplyOutcome, ApplyReport, EntityState, IgnoreReason, ReplicationReconciler,
        REMOVED_HISTORY,
    };
    pub use crate::ReplicationError;
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatal_errors() {
        let a = EntityId::from_raw(0x4000_0001);
        let b = EntityId::from_raw(3);
        assert!(ReplicationError::RenameTargetOccupied { old: a, new: b }.is_fatal());
        assert!(ReplicationError::InvalidRenameTarget { old: a, new: b }.is_fatal());
        assert!(!ReplicationError::UnknownRenameSource { old: a }.is_fatal());
        assert!(!ReplicationError::Malformed(CodecError::TrailingBytes { remaining: 1 }).is_fatal());
        assert!(!ReplicationError::SessionClosed.is_fatal());
    }

    #[test]
    fn error_display() {
        let err = ReplicationError::NotAuthority {
            operation: "assign authoritative ids",
        };
        assert_eq!(err.to_string(), "only the server may assign authoritative ids");
    }
}
