//! The scene replication messages and their wire layouts.
//!
//! All integers are little-endian. Counts are element counts, not byte
//! lengths.
//!
//! | Message               | Id  | Layout |
//! |-----------------------|-----|--------|
//! | [`UpdateComponents`]  | 113 | `entity: u32, count: u8, count x (type: u32, name: u8-prefixed, data: u16-prefixed)` |
//! | [`RemoveComponents`]  | 114 | `entity: u32, count: u8, count x (type: u32, name: u8-prefixed)` |
//! | [`EntityIdCollision`] | 115 | `old: u32, new: u32` |
//! | [`EntityAction`]      | 116 | `entity: u32, name: u8-prefixed, execution: u8, count: u8, count x param: u8-prefixed` |
//!
//! Every message also carries an [`Envelope`] of transport hints. The
//! envelope is never written to the wire; a decoded message always gets the
//! default envelope.

use std::borrow::Cow;

use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use scenesync_scene::component::{ComponentKey, ComponentTypeHash};
use scenesync_scene::entity::EntityId;

use crate::wire::{check_len, put_block, put_short_bytes, WireReader, MAX_BLOCK_LEN, MAX_SHORT_LEN};
use crate::CodecError;

/// Wire id of a message type.
pub type MessageId = u32;

pub const UPDATE_COMPONENTS_ID: MessageId = 113;
pub const REMOVE_COMPONENTS_ID: MessageId = 114;
pub const ENTITY_ID_COLLISION_ID: MessageId = 115;
pub const ENTITY_ACTION_ID: MessageId = 116;

/// Default transport priority of every message.
pub const DEFAULT_PRIORITY: u32 = 100;

// ---------------------------------------------------------------------------
// Envelope
// ---------------------------------------------------------------------------

/// Delivery hints for the sending transport. Never serialized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Envelope {
    /// Retransmit until acknowledged.
    pub reliable: bool,
    /// Deliver in send order within the stream.
    pub in_order: bool,
    /// Higher values are sent first.
    pub priority: u32,
}

impl Default for Envelope {
    /// Reliable, in order, priority 100.
    fn default() -> Self {
        Self {
            reliable: true,
            in_order: true,
            priority: DEFAULT_PRIORITY,
        }
    }
}

// ---------------------------------------------------------------------------
// WireMessage
// ---------------------------------------------------------------------------

/// A message with a fixed wire layout.
///
/// Implementors provide the field-level layout; the provided methods add
/// length validation, capacity checks and whole-buffer framing.
pub trait WireMessage: Sized {
    /// Wire id used to select this layout on receipt.
    const ID: MessageId;
    /// Human-readable name for logs.
    const NAME: &'static str;

    /// Transport hints attached to this message.
    fn envelope(&self) -> Envelope;

    /// Exact number of bytes [`serialize_to`](Self::serialize_to) writes.
    fn size(&self) -> usize;

    /// Check every count and length against its wire limit.
    fn validate(&self) -> Result<(), CodecError>;

    /// Write the fields in wire order. Lengths are already validated.
    fn write_fields<B: BufMut>(&self, buf: &mut B);

    /// Read the fields in wire order.
    fn read_fields(reader: &mut WireReader<'_>) -> Result<Self, CodecError>;

    /// Validate and write the message. Nothing is written on error.
    fn serialize_to<B: BufMut>(&self, buf: &mut B) -> Result<(), CodecError> {
        self.validate()?;
        let needed = self.size();
        let available = buf.remaining_mut();
        if available < needed {
            return Err(CodecError::BufferTooSmall { needed, available });
        }
        self.write_fields(buf);
        Ok(())
    }

    /// Read one message from the front of `reader`.
    fn deserialize_from(reader: &mut WireReader<'_>) -> Result<Self, CodecError> {
        Self::read_fields(reader)
    }

    /// Decode a complete payload. The envelope takes its defaults and bytes
    /// left over after the last field are an error.
    fn from_bytes(data: &[u8]) -> Result<Self, CodecError> {
        let mut reader = WireReader::new(data);
        let msg = Self::read_fields(&mut reader)?;
        reader.finish()?;
        Ok(msg)
    }

    /// Encode into a freshly sized buffer.
    fn to_bytes(&self) -> Result<Bytes, CodecError> {
        let mut buf = BytesMut::with_capacity(self.size());
        self.serialize_to(&mut buf)?;
        Ok(buf.freeze())
    }
}

// ---------------------------------------------------------------------------
// EntityIdCollision
// ---------------------------------------------------------------------------

/// Sent by the authority when a peer's proposed id was replaced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityIdCollision {
    pub envelope: Envelope,
    /// The id the peer used.
    pub old_entity_id: EntityId,
    /// The authoritative id the entity must move to.
    pub new_entity_id: EntityId,
}

impl EntityIdCollision {
    pub fn new(old_entity_id: EntityId, new_entity_id: EntityId) -> Self {
        Self {
            envelope: Envelope::default(),
            old_entity_id,
            new_entity_id,
        }
    }
}

impl WireMessage for EntityIdCollision {
    const ID: MessageId = ENTITY_ID_COLLISION_ID;
    const NAME: &'static str = "EntityIDCollision";

    fn envelope(&self) -> Envelope {
        self.envelope
    }

    fn size(&self) -> usize {
        8
    }

    fn validate(&self) -> Result<(), CodecError> {
        Ok(())
    }

    fn write_fields<B: BufMut>(&self, buf: &mut B) {
        buf.put_u32_le(self.old_entity_id.to_raw());
        buf.put_u32_le(self.new_entity_id.to_raw());
    }

    fn read_fields(reader: &mut WireReader<'_>) -> Result<Self, CodecError> {
        let old = reader.read_u32("oldEntityID")?;
        let new = reader.read_u32("newEntityID")?;
        Ok(Self::new(EntityId::from_raw(old), EntityId::from_raw(new)))
    }
}

// ---------------------------------------------------------------------------
// UpdateComponents
// ---------------------------------------------------------------------------

/// New state for one component.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentUpdate {
    pub key: ComponentKey,
    pub data: Vec<u8>,
}

impl ComponentUpdate {
    fn size(&self) -> usize {
        4 + 1 + self.key.name.len() + 2 + self.data.len()
    }
}

/// Create-or-overwrite a batch of components on one entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateComponents {
    pub envelope: Envelope,
    pub entity_id: EntityId,
    pub components: Vec<ComponentUpdate>,
}

impl UpdateComponents {
    pub fn new(entity_id: EntityId) -> Self {
        Self {
            envelope: Envelope::default(),
            entity_id,
            components: Vec::new(),
        }
    }

    /// Append a component and return `self` for chaining.
    pub fn with_component(mut self, key: ComponentKey, data: Vec<u8>) -> Self {
        self.components.push(ComponentUpdate { key, data });
        self
    }
}

impl WireMessage for UpdateComponents {
    const ID: MessageId = UPDATE_COMPONENTS_ID;
    const NAME: &'static str = "UpdateComponents";

    fn envelope(&self) -> Envelope {
        self.envelope
    }

    fn size(&self) -> usize {
        4 + 1 + self.components.iter().map(ComponentUpdate::size).sum::<usize>()
    }

    fn validate(&self) -> Result<(), CodecError> {
        check_len("componentCount", self.components.len(), MAX_SHORT_LEN)?;
        for c in &self.components {
            check_len("componentName", c.key.name.len(), MAX_SHORT_LEN)?;
            check_len("componentData", c.data.len(), MAX_BLOCK_LEN)?;
        }
        Ok(())
    }

    fn write_fields<B: BufMut>(&self, buf: &mut B) {
        buf.put_u32_le(self.entity_id.to_raw());
        buf.put_u8(self.components.len() as u8);
        for c in &self.components {
            buf.put_u32_le(c.key.type_hash.0);
            put_short_bytes(buf, &c.key.name);
            put_block(buf, &c.data);
        }
    }

    fn read_fields(reader: &mut WireReader<'_>) -> Result<Self, CodecError> {
        let entity_id = EntityId::from_raw(reader.read_u32("entityID")?);
        let count = reader.read_u8("componentCount")? as usize;
        let mut components = Vec::with_capacity(count);
        for _ in 0..count {
            let type_hash = ComponentTypeHash(reader.read_u32("componentTypeHash")?);
            let name = reader.read_short_bytes("componentName")?;
            let data = reader.read_block("componentData")?;
            components.push(ComponentUpdate {
                key: ComponentKey::new(type_hash, name),
                data,
            });
        }
        Ok(Self {
            envelope: Envelope::default(),
            entity_id,
            components,
        })
    }
}

// ---------------------------------------------------------------------------
// RemoveComponents
// ---------------------------------------------------------------------------

/// Remove a batch of components from one entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoveComponents {
    pub envelope: Envelope,
    pub entity_id: EntityId,
    pub components: Vec<ComponentKey>,
}

impl RemoveComponents {
    pub fn new(entity_id: EntityId) -> Self {
        Self {
            envelope: Envelope::default(),
            entity_id,
            components: Vec::new(),
        }
    }

    /// Append a component key and return `self` for chaining.
    pub fn with_component(mut self, key: ComponentKey) -> Self {
        self.components.push(key);
        self
    }
}

impl WireMessage for RemoveComponents {
    const ID: MessageId = REMOVE_COMPONENTS_ID;
    const NAME: &'static str = "RemoveComponents";

    fn envelope(&self) -> Envelope {
        self.envelope
    }

    fn size(&self) -> usize {
        4 + 1
            + self
                .components
                .iter()
                .map(|k| 4 + 1 + k.name.len())
                .sum::<usize>()
    }

    fn validate(&self) -> Result<(), CodecError> {
        check_len("componentCount", self.components.len(), MAX_SHORT_LEN)?;
        for k in &self.components {
            check_len("componentName", k.name.len(), MAX_SHORT_LEN)?;
        }
        Ok(())
    }

    fn write_fields<B: BufMut>(&self, buf: &mut B) {
        buf.put_u32_le(self.entity_id.to_raw());
        buf.put_u8(self.components.len() as u8);
        for k in &self.components {
            buf.put_u32_le(k.type_hash.0);
            put_short_bytes(buf, &k.name);
        }
    }

    fn read_fields(reader: &mut WireReader<'_>) -> Result<Self, CodecError> {
        let entity_id = EntityId::from_raw(reader.read_u32("entityID")?);
        let count = reader.read_u8("componentCount")? as usize;
        let mut components = Vec::with_capacity(count);
        for _ in 0..count {
            let type_hash = ComponentTypeHash(reader.read_u32("componentTypeHash")?);
            let name = reader.read_short_bytes("componentName")?;
            components.push(ComponentKey::new(type_hash, name));
        }
        Ok(Self {
            envelope: Envelope::default(),
            entity_id,
            components,
        })
    }
}

// ---------------------------------------------------------------------------
// EntityAction
// ---------------------------------------------------------------------------

/// Bitmask of where an entity action should run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExecutionType(pub u8);

impl ExecutionType {
    /// Run on the receiving peer.
    pub const LOCAL: ExecutionType = ExecutionType(1);
    /// Run on the authoritative peer.
    pub const SERVER: ExecutionType = ExecutionType(2);
    /// Run on every other peer.
    pub const PEERS: ExecutionType = ExecutionType(4);

    /// Whether every bit of `other` is set.
    pub fn contains(self, other: ExecutionType) -> bool {
        self.0 & other.0 == other.0
    }

    /// `self` with the bits of `other` cleared.
    pub fn without(self, other: ExecutionType) -> ExecutionType {
        ExecutionType(self.0 & !other.0)
    }
}

impl std::ops::BitOr for ExecutionType {
    type Output = ExecutionType;

    fn bitor(self, rhs: ExecutionType) -> ExecutionType {
        ExecutionType(self.0 | rhs.0)
    }
}

/// A named action with ordered parameters, invoked on one entity.
///
/// The name and parameters are carried as raw bytes; peers conventionally
/// send UTF-8 but nothing on the wire enforces it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityAction {
    pub envelope: Envelope,
    pub entity_id: EntityId,
    pub name: Vec<u8>,
    pub execution_type: ExecutionType,
    pub parameters: Vec<Vec<u8>>,
}

impl EntityAction {
    pub fn new(
        entity_id: EntityId,
        name: impl Into<Vec<u8>>,
        execution_type: ExecutionType,
        parameters: Vec<Vec<u8>>,
    ) -> Self {
        Self {
            envelope: Envelope::default(),
            entity_id,
            name: name.into(),
            execution_type,
            parameters,
        }
    }

    /// The action name for display, with invalid UTF-8 replaced.
    pub fn name_lossy(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.name)
    }
}

impl WireMessage for EntityAction {
    const ID: MessageId = ENTITY_ACTION_ID;
    const NAME: &'static str = "EntityAction";

    fn envelope(&self) -> Envelope {
        self.envelope
    }

    fn size(&self) -> usize {
        4 + 1
            + self.name.len()
            + 1
            + 1
            + self.parameters.iter().map(|p| 1 + p.len()).sum::<usize>()
    }

    fn validate(&self) -> Result<(), CodecError> {
        check_len("name", self.name.len(), MAX_SHORT_LEN)?;
        check_len("paramCount", self.parameters.len(), MAX_SHORT_LEN)?;
        for p in &self.parameters {
            check_len("param", p.len(), MAX_SHORT_LEN)?;
        }
        Ok(())
    }

    fn write_fields<B: BufMut>(&self, buf: &mut B) {
        buf.put_u32_le(self.entity_id.to_raw());
        put_short_bytes(buf, &self.name);
        buf.put_u8(self.execution_type.0);
        buf.put_u8(self.parameters.len() as u8);
        for p in &self.parameters {
            put_short_bytes(buf, p);
        }
    }

    fn read_fields(reader: &mut WireReader<'_>) -> Result<Self, CodecError> {
        let entity_id = EntityId::from_raw(reader.read_u32("entityId")?);
        let name = reader.read_short_bytes("name")?;
        let execution_type = ExecutionType(reader.read_u8("executionType")?);
        let count = reader.read_u8("paramCount")? as usize;
        let mut parameters = Vec::with_capacity(count);
        for _ in 0..count {
            parameters.push(reader.read_short_bytes("param")?);
        }
        Ok(Self {
            envelope: Envelope::default(),
            entity_id,
            name,
            execution_type,
            parameters,
        })
    }
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// Any replication message, keyed by wire id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Message {
    UpdateComponents(UpdateComponents),
    RemoveComponents(RemoveComponents),
    EntityIdCollision(EntityIdCollision),
    EntityAction(EntityAction),
}

impl Message {
    /// Decode the payload of a message whose wire id is `id`.
    pub fn decode(id: MessageId, data: &[u8]) -> Result<Self, CodecError> {
        let decoded = match id {
            UPDATE_COMPONENTS_ID => UpdateComponents::from_bytes(data).map(Message::UpdateComponents),
            REMOVE_COMPONENTS_ID => RemoveComponents::from_bytes(data).map(Message::RemoveComponents),
            ENTITY_ID_COLLISION_ID => {
                EntityIdCollision::from_bytes(data).map(Message::EntityIdCollision)
            }
            ENTITY_ACTION_ID => EntityAction::from_bytes(data).map(Message::EntityAction),
            _ => Err(CodecError::UnknownMessageId { id }),
        };
        if let Err(err) = &decoded {
            tracing::debug!(message_id = id, len = data.len(), error = %err, "failed to decode message");
        }
        decoded
    }

    /// Wire id of this message.
    pub fn id(&self) -> MessageId {
        match self {
            Message::UpdateComponents(_) => UpdateComponents::ID,
            Message::RemoveComponents(_) => RemoveComponents::ID,
            Message::EntityIdCollision(_) => EntityIdCollision::ID,
            Message::EntityAction(_) => EntityAction::ID,
        }
    }

    /// Human-readable name of this message type.
    pub fn name(&self) -> &'static str {
        match self {
            Message::UpdateComponents(_) => UpdateComponents::NAME,
            Message::RemoveComponents(_) => RemoveComponents::NAME,
            Message::EntityIdCollision(_) => EntityIdCollision::NAME,
            Message::EntityAction(_) => EntityAction::NAME,
        }
    }

    /// Transport hints.
    pub fn envelope(&self) -> Envelope {
        match self {
            Message::UpdateComponents(m) => m.envelope(),
            Message::RemoveComponents(m) => m.envelope(),
            Message::EntityIdCollision(m) => m.envelope(),
            Message::EntityAction(m) => m.envelope(),
        }
    }

    /// Exact encoded size in bytes.
    pub fn size(&self) -> usize {
        match self {
            Message::UpdateComponents(m) => m.size(),
            Message::RemoveComponents(m) => m.size(),
            Message::EntityIdCollision(m) => m.size(),
            Message::EntityAction(m) => m.size(),
        }
    }

    /// Encode the payload (without the id).
    pub fn encode(&self) -> Result<Bytes, CodecError> {
        match self {
            Message::UpdateComponents(m) => m.to_bytes(),
            Message::RemoveComponents(m) => m.to_bytes(),
            Message::EntityIdCollision(m) => m.to_bytes(),
            Message::EntityAction(m) => m.to_bytes(),
        }
    }

    /// Entity the message is about (the old id for a collision).
    pub fn entity_id(&self) -> EntityId {
        match self {
            Message::UpdateComponents(m) => m.entity_id,
            Message::RemoveComponents(m) => m.entity_id,
            Message::EntityIdCollision(m) => m.old_entity_id,
            Message::EntityAction(m) => m.entity_id,
        }
    }
}

impl From<UpdateComponents> for Message {
    fn from(m: UpdateComponents) -> Self {
        Message::UpdateComponents(m)
    }
}

impl From<RemoveComponents> for Message {
    fn from(m: RemoveComponents) -> Self {
        Message::RemoveComponents(m)
    }
}

impl From<EntityIdCollision> for Message {
    fn from(m: EntityIdCollision) -> Self {
        Message::EntityIdCollision(m)
    }
}

impl From<EntityAction> for Message {
    fn from(m: EntityAction) -> Self {
        Message::EntityAction(m)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_with_one_component_is_fourteen_bytes() {
        let msg = UpdateComponents::new(EntityId::from_raw(42))
            .with_component(ComponentKey::singleton(ComponentTypeHash(0x1234)), vec![0xAA, 0xBB]);
        assert_eq!(msg.size(), 14);
        let bytes = msg.to_bytes().unwrap();
        assert_eq!(
            bytes.as_ref(),
            &[42, 0, 0, 0, 1, 0x34, 0x12, 0, 0, 0, 2, 0, 0xAA, 0xBB]
        );
    }

    #[test]
    fn collision_layout() {
        let msg = EntityIdCollision::new(EntityId::from_raw(0x4000_0001), EntityId::from_raw(7));
        let bytes = msg.to_bytes().unwrap();
        assert_eq!(bytes.as_ref(), &[0x01, 0, 0, 0x40, 7, 0, 0, 0]);
        assert_eq!(EntityIdCollision::from_bytes(&bytes).unwrap(), msg);
    }

    #[test]
    fn action_layout() {
        let msg = EntityAction::new(
            EntityId::from_raw(3),
            "Hi",
            ExecutionType::LOCAL | ExecutionType::PEERS,
            vec![b"x".to_vec(), Vec::new()],
        );
        let bytes = msg.to_bytes().unwrap();
        assert_eq!(bytes.len(), msg.size());
        assert_eq!(bytes.as_ref(), &[3, 0, 0, 0, 2, b'H', b'i', 5, 2, 1, b'x', 0]);
    }

    #[test]
    fn remove_layout() {
        let msg = RemoveComponents::new(EntityId::from_raw(1))
            .with_component(ComponentKey::new(ComponentTypeHash(2), "n"));
        let bytes = msg.to_bytes().unwrap();
        assert_eq!(bytes.as_ref(), &[1, 0, 0, 0, 1, 2, 0, 0, 0, 1, b'n']);
    }

    #[test]
    fn decoded_messages_get_default_envelope() {
        let mut msg = EntityIdCollision::new(EntityId::from_raw(1), EntityId::from_raw(2));
        msg.envelope = Envelope {
            reliable: false,
            in_order: false,
            priority: 5,
        };
        let decoded = EntityIdCollision::from_bytes(&msg.to_bytes().unwrap()).unwrap();
        assert_eq!(decoded.envelope, Envelope::default());
        assert_eq!(decoded.envelope.priority, 100);
        assert!(decoded.envelope.reliable && decoded.envelope.in_order);
    }

    #[test]
    fn truncated_data_block_fails() {
        // Declares 4 data bytes, provides 1.
        let data = [1, 0, 0, 0, 1, 9, 0, 0, 0, 0, 4, 0, 0xAA];
        let err = UpdateComponents::from_bytes(&data).unwrap_err();
        assert_eq!(
            err,
            CodecError::Truncated {
                field: "componentData",
                needed: 4,
                remaining: 1
            }
        );
    }

    #[test]
    fn too_many_components_refuses_to_serialize() {
        let mut msg = RemoveComponents::new(EntityId::from_raw(1));
        for i in 0..256 {
            msg.components.push(ComponentKey::singleton(ComponentTypeHash(i)));
        }
        let mut out = Vec::new();
        assert!(matches!(
            msg.serialize_to(&mut out),
            Err(CodecError::FieldTooLong {
                field: "componentCount",
                ..
            })
        ));
        assert!(out.is_empty());
    }

    #[test]
    fn fixed_buffer_too_small_is_reported() {
        let msg = EntityIdCollision::new(EntityId::from_raw(1), EntityId::from_raw(2));
        let mut storage = [0u8; 4];
        let mut slice: &mut [u8] = &mut storage;
        assert_eq!(
            msg.serialize_to(&mut slice).unwrap_err(),
            CodecError::BufferTooSmall {
                needed: 8,
                available: 4
            }
        );
    }

    #[test]
    fn decode_dispatches_on_id() {
        let msg: Message = EntityIdCollision::new(EntityId::from_raw(9), EntityId::from_raw(3)).into();
        let bytes = msg.encode().unwrap();
        let decoded = Message::decode(msg.id(), &bytes).unwrap();
        assert_eq!(decoded, msg);
        assert_eq!(decoded.name(), "EntityIDCollision");
        assert_eq!(
            Message::decode(200, &bytes).unwrap_err(),
            CodecError::UnknownMessageId { id: 200 }
        );
    }

    #[test]
    fn non_utf8_names_and_params_survive() {
        let msg = EntityAction::new(
            EntityId::from_raw(8),
            vec![0xC3, 0x28],
            ExecutionType::LOCAL,
            vec![vec![0xFF, 0xFE], vec![0x80]],
        );
        let decoded = EntityAction::from_bytes(&msg.to_bytes().unwrap()).unwrap();
        assert_eq!(decoded, msg);
        assert_eq!(decoded.name_lossy(), "\u{FFFD}(");

        let update = UpdateComponents::new(EntityId::from_raw(8))
            .with_component(ComponentKey::new(ComponentTypeHash(1), vec![0xFF]), vec![1]);
        let decoded = UpdateComponents::from_bytes(&update.to_bytes().unwrap()).unwrap();
        assert_eq!(decoded.components[0].key.name, vec![0xFF]);
    }

    #[test]
    fn execution_type_bits() {
        let t = ExecutionType::SERVER | ExecutionType::PEERS;
        assert!(t.contains(ExecutionType::PEERS));
        assert!(!t.contains(ExecutionType::LOCAL));
        assert_eq!(t.without(ExecutionType::PEERS), ExecutionType::SERVER);
    }
}
