//! Scenesync Protocol -- binary codec for the scene replication messages.
//!
//! Four message shapes ride on a reliable, ordered byte stream provided by an
//! external transport: [`UpdateComponents`](message::UpdateComponents),
//! [`RemoveComponents`](message::RemoveComponents),
//! [`EntityIdCollision`](message::EntityIdCollision) and
//! [`EntityAction`](message::EntityAction). The [`Message`](message::Message)
//! enum is the closed union of all four, decoded by wire id.
//!
//! Encoding and decoding are pure functions of their inputs, so they can run
//! on an I/O thread as long as only the byte buffers cross threads.
//!
//! # Example
//!
//! ```
//! use scenesync_protocol::prelude::*;
//! use scenesync_scene::prelude::*;
//!
//! let msg = UpdateComponents::new(EntityId::from_raw(42))
//!     .with_component(ComponentKey::singleton(ComponentTypeHash(0x1234)), vec![0xAA, 0xBB]);
//! let bytes = msg.to_bytes().unwrap();
//! assert_eq!(bytes.len(), msg.size());
//!
//! let decoded = Message::decode(UpdateComponents::ID, &bytes).unwrap();
//! assert_eq!(decoded, Message::UpdateComponents(msg));
//! ```

#![deny(unsafe_code)]

pub mod message;
pub mod wire;

use message::MessageId;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors produced while encoding or decoding a message.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    /// A field or length prefix promised more bytes than remain.
    #[error("truncated {field}: needed {needed} bytes, {remaining} remaining")]
    Truncated {
        field: &'static str,
        needed: usize,
        remaining: usize,
    },

    /// A count or variable-length field exceeds its wire limit.
    #[error("{field} is {len} long, wire limit is {max}")]
    FieldTooLong {
        field: &'static str,
        len: usize,
        max: usize,
    },

    /// Bytes remained after the last field of the message.
    #[error("{remaining} unexpected bytes after end of message")]
    TrailingBytes { remaining: usize },

    /// The destination buffer cannot hold the encoded message.
    #[error("buffer too small: need {needed} bytes, {available} available")]
    BufferTooSmall { needed: usize, available: usize },

    /// No message layout is registered under the id.
    #[error("unknown message id {id}")]
    UnknownMessageId { id: MessageId },
}

// ---------------------------------------------------------------------------
// Prelude
// ---------------------------------------------------------------------------

/// Convenience re-exports for common usage.
pub mod prelude {
    pub use crate::message::{
        ComponentUpdate, EntityAction, EntityIdCollision, Envelope, ExecutionType, Message,
        MessageId, RemoveComponents, UpdateComponents, WireMessage, DEFAULT_PRIORITY,
        ENTITY_ACTION_ID, ENTITY_ID_COLLISION_ID, REMOVE_COMPONENTS_ID, UPDATE_COMPONENTS_ID,
    };
    pub use crate::wire::WireReader;
    pub use crate::CodecError;
}
