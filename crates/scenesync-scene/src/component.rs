//! Component identity and type registration.
//!
//! A replicated component is addressed by the tuple
//! `(entity id, type hash, name)`, never by an object reference, because the
//! entity's numeric id may be renamed while the component lives on. The
//! `(type hash, name)` half of that tuple is a [`ComponentKey`]; the name is
//! empty for the singleton component of a type on an entity. Names are raw
//! bytes exactly as they travel on the wire.

use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::SceneError;

// ---------------------------------------------------------------------------
// ComponentTypeHash
// ---------------------------------------------------------------------------

/// 32-bit identifier of a component type as it appears on the wire.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ComponentTypeHash(pub u32);

impl ComponentTypeHash {
    /// Derive the hash of a component type from its type name.
    ///
    /// Uses the first four bytes of the BLAKE3 digest, little-endian, so every
    /// peer computes the same value without a shared registry.
    pub fn of_name(type_name: &str) -> Self {
        let digest = blake3::hash(type_name.as_bytes());
        let bytes = digest.as_bytes();
        Self(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }
}

impl fmt::Debug for ComponentTypeHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ComponentTypeHash({:#010x})", self.0)
    }
}

impl fmt::Display for ComponentTypeHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}

// ---------------------------------------------------------------------------
// ComponentKey
// ---------------------------------------------------------------------------

/// The per-entity half of a component's identity tuple.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ComponentKey {
    /// Type of the component.
    pub type_hash: ComponentTypeHash,
    /// Instance name; empty for the singleton of this type.
    pub name: Vec<u8>,
}

impl ComponentKey {
    /// Key for a named component instance.
    pub fn new(type_hash: ComponentTypeHash, name: impl Into<Vec<u8>>) -> Self {
        Self {
            type_hash,
            name: name.into(),
        }
    }

    /// Key for the unnamed singleton of a type.
    pub fn singleton(type_hash: ComponentTypeHash) -> Self {
        Self::new(type_hash, Vec::new())
    }

    /// The name for display, with invalid UTF-8 replaced.
    pub fn name_lossy(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.name)
    }
}

impl fmt::Display for ComponentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.name.is_empty() {
            write!(f, "{}", self.type_hash)
        } else {
            write!(f, "{}:{}", self.type_hash, self.name_lossy())
        }
    }
}

// ---------------------------------------------------------------------------
// Component
// ---------------------------------------------------------------------------

/// A component instance: its key plus the serialized state last applied.
///
/// The scene stores component state as opaque bytes; interpreting them is the
/// business of whatever system owns the component type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Component {
    /// Identity within the owning entity.
    pub key: ComponentKey,
    /// Serialized state.
    pub data: Vec<u8>,
}

// ---------------------------------------------------------------------------
// ComponentTypeRegistry
// ---------------------------------------------------------------------------

/// Maps type hashes back to human-readable type names for diagnostics.
///
/// Registration is idempotent per name. Two different names hashing to the
/// same value is rejected.
#[derive(Debug, Default)]
pub struct ComponentTypeRegistry {
    by_hash: HashMap<ComponentTypeHash, String>,
}

impl ComponentTypeRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a component type name and return its hash.
    pub fn register(&mut self, type_name: &str) -> Result<ComponentTypeHash, SceneError> {
        let hash = ComponentTypeHash::of_name(type_name);
        match self.by_hash.get(&hash) {
            Some(existing) if existing == type_name => Ok(hash),
            Some(existing) => Err(SceneError::TypeHashCollision {
                hash,
                existing: existing.clone(),
                incoming: type_name.to_owned(),
            }),
            None => {
                self.by_hash.insert(hash, type_name.to_owned());
                Ok(hash)
            }
        }
    }

    /// Name registered for `hash`, if any.
    pub fn name_of(&self, hash: ComponentTypeHash) -> Option<&str> {
        self.by_hash.get(&hash).map(String::as_str)
    }

    /// Number of registered types.
    pub fn len(&self) -> usize {
        self.by_hash.len()
    }

    /// Whether no types have been registered.
    pub fn is_empty(&self) -> bool {
        self.by_hash.is_empty()
    }

    /// Registered names, sorted.
    pub fn registered_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.by_hash.values().map(String::as_str).collect();
        names.sort();
        names
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_hash_is_stable() {
        assert_eq!(
            ComponentTypeHash::of_name("Placeable"),
            ComponentTypeHash::of_name("Placeable")
        );
        assert_ne!(
            ComponentTypeHash::of_name("Placeable"),
            ComponentTypeHash::of_name("Mesh")
        );
    }

    #[test]
    fn register_is_idempotent() {
        let mut reg = ComponentTypeRegistry::new();
        let a = reg.register("Placeable").unwrap();
        let b = reg.register("Placeable").unwrap();
        assert_eq!(a, b);
        assert_eq!(reg.len(), 1);
        assert_eq!(reg.name_of(a), Some("Placeable"));
    }

    #[test]
    fn keys_order_by_type_then_name() {
        let t = ComponentTypeHash(7);
        let mut keys = vec![ComponentKey::new(t, "b"), ComponentKey::singleton(t)];
        keys.sort();
        assert_eq!(keys[0].name, b"");
        assert_eq!(keys[1].name, b"b");
    }

    #[test]
    fn names_are_raw_bytes() {
        let key = ComponentKey::new(ComponentTypeHash(1), vec![b'a', 0xFF]);
        assert_eq!(key.name, vec![b'a', 0xFF]);
        assert_eq!(key.name_lossy(), "a\u{FFFD}");
        assert_eq!(key.to_string(), "0x00000001:a\u{FFFD}");
    }

    #[test]
    fn key_display() {
        let t = ComponentTypeHash(0x1234);
        assert_eq!(ComponentKey::singleton(t).to_string(), "0x00001234");
        assert_eq!(ComponentKey::new(t, "left").to_string(), "0x00001234:left");
    }
}
