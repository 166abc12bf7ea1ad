//! Entity identifiers and namespace allocation.
//!
//! An [`EntityId`] is a 32-bit value split into three disjoint, contiguous
//! namespaces ordered by numeric value:
//!
//! | Namespace  | Allocatable range             | Assigned by            |
//! |------------|-------------------------------|------------------------|
//! | Replicated | `1 ..= 0x3FFF_FFFF`           | the authoritative peer |
//! | Unacked    | `0x4000_0001 ..= 0x7FFF_FFFF` | any peer, speculative  |
//! | Local      | `0x8000_0001 ..= 0xFFFF_FFFF` | any peer, never sent   |
//!
//! The value `0` means "no entity" and is never allocated. The
//! [`IdAllocator`] owns one cursor per namespace and two reservation sets:
//! one for replicated ids and one shared by the unacked and local ranges.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::IdError;

/// Largest id in the replicated namespace. Also the 30-bit mask used when an
/// id is written with a variable-length integer encoding.
pub const LAST_REPLICATED_ID: u32 = 0x3FFF_FFFF;
/// Lower bound of the unacked namespace (never itself allocated).
pub const FIRST_UNACKED_ID: u32 = 0x4000_0000;
/// Largest id in the unacked namespace.
pub const LAST_UNACKED_ID: u32 = 0x7FFF_FFFF;
/// Lower bound of the local namespace (never itself allocated).
pub const FIRST_LOCAL_ID: u32 = 0x8000_0000;
/// Largest id in the local namespace.
pub const LAST_LOCAL_ID: u32 = u32::MAX;

// ---------------------------------------------------------------------------
// EntityId
// ---------------------------------------------------------------------------

/// A scene-wide entity identifier.
///
/// The numeric value may change during the entity's lifetime (an unacked id
/// is renamed to a replicated one), so it is an address, not an object
/// identity. See [`EntityHandle`](crate::scene::EntityHandle) for the latter.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityId(u32);

impl EntityId {
    /// The reserved "no entity" value.
    pub const NONE: EntityId = EntityId(0);

    /// Wrap a raw wire value.
    #[inline]
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    /// Raw `u32` representation.
    #[inline]
    pub const fn to_raw(self) -> u32 {
        self.0
    }

    /// Whether this is the reserved zero value.
    #[inline]
    pub fn is_none(self) -> bool {
        self.0 == 0
    }

    /// The namespace this id falls in, or `None` for the zero value.
    pub fn namespace(self) -> Option<IdNamespace> {
        match self.0 {
            0 => None,
            raw if raw < FIRST_UNACKED_ID => Some(IdNamespace::Replicated),
            raw if raw < FIRST_LOCAL_ID => Some(IdNamespace::Unacked),
            _ => Some(IdNamespace::Local),
        }
    }

    /// `true` for ids assigned by the authoritative peer.
    #[inline]
    pub fn is_replicated(self) -> bool {
        self.namespace() == Some(IdNamespace::Replicated)
    }

    /// `true` for speculative ids awaiting authoritative confirmation.
    #[inline]
    pub fn is_unacked(self) -> bool {
        self.namespace() == Some(IdNamespace::Unacked)
    }

    /// `true` for ids that never leave this peer.
    #[inline]
    pub fn is_local(self) -> bool {
        self.namespace() == Some(IdNamespace::Local)
    }
}

impl fmt::Debug for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.namespace() {
            None => write!(f, "EntityId(none)"),
            Some(IdNamespace::Replicated) => write!(f, "EntityId({})", self.0),
            Some(ns) => write!(f, "EntityId({:?} {:#010x})", ns, self.0),
        }
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// IdNamespace
// ---------------------------------------------------------------------------

/// One of the three disjoint id ranges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IdNamespace {
    /// Authoritative, scene-wide ids.
    Replicated,
    /// Speculative ids pending confirmation by the authority.
    Unacked,
    /// Ids that are never sent to other peers.
    Local,
}

impl IdNamespace {
    /// First value the allocator may hand out in this namespace.
    pub const fn first(self) -> u32 {
        match self {
            IdNamespace::Replicated => 1,
            IdNamespace::Unacked => FIRST_UNACKED_ID + 1,
            IdNamespace::Local => FIRST_LOCAL_ID + 1,
        }
    }

    /// Last value (inclusive) the allocator may hand out in this namespace.
    pub const fn last(self) -> u32 {
        match self {
            IdNamespace::Replicated => LAST_REPLICATED_ID,
            IdNamespace::Unacked => LAST_UNACKED_ID,
            IdNamespace::Local => LAST_LOCAL_ID,
        }
    }

    /// Number of allocatable values.
    pub const fn capacity(self) -> u32 {
        self.last() - self.first() + 1
    }

    /// Whether `raw` lies in this namespace's allocatable range.
    pub const fn contains(self, raw: u32) -> bool {
        raw >= self.first() && raw <= self.last()
    }

    /// The value after `raw`, wrapping from the last value back to the first.
    fn next_after(self, raw: u32) -> u32 {
        if raw >= self.last() || raw < self.first() - 1 {
            self.first()
        } else {
            raw + 1
        }
    }

    fn slot(self) -> usize {
        match self {
            IdNamespace::Replicated => 0,
            IdNamespace::Unacked => 1,
            IdNamespace::Local => 2,
        }
    }

    const ALL: [IdNamespace; 3] = [
        IdNamespace::Replicated,
        IdNamespace::Unacked,
        IdNamespace::Local,
    ];
}

// ---------------------------------------------------------------------------
// IdAllocator
// ---------------------------------------------------------------------------

/// Hands out collision-free [`EntityId`]s from the three namespaces.
///
/// The allocator is a plain owned value: construct one per scene and pass it
/// by `&mut` to every call site that creates, destroys or renames entities.
/// All methods are synchronous and leave no intermediate state observable.
///
/// Given the same sequence of calls, an allocator always produces the same
/// ids.
#[derive(Debug, Clone)]
pub struct IdAllocator {
    replicated_cursor: u32,
    unacked_cursor: u32,
    local_cursor: u32,
    /// Live ids below [`FIRST_UNACKED_ID`].
    replicated: BTreeSet<u32>,
    /// Live ids at or above [`FIRST_UNACKED_ID`] (unacked and local share it).
    non_replicated: BTreeSet<u32>,
    /// Live ids per namespace, counting only allocatable values.
    live: [u32; 3],
}

impl IdAllocator {
    /// Create an allocator with empty reservation sets.
    pub fn new() -> Self {
        Self {
            replicated_cursor: 0,
            unacked_cursor: FIRST_UNACKED_ID,
            local_cursor: FIRST_LOCAL_ID,
            replicated: BTreeSet::new(),
            non_replicated: BTreeSet::new(),
            live: [0; 3],
        }
    }

    /// Allocate the next authoritative id.
    ///
    /// Only the authoritative peer should call this. The candidate is one
    /// past the larger of the cursor and the largest reserved replicated id,
    /// wrapping to `1` past the end of the range, then advanced past any
    /// reserved value.
    pub fn allocate_replicated(&mut self) -> Result<EntityId, IdError> {
        let ns = IdNamespace::Replicated;
        self.ensure_capacity(ns)?;

        // The set is ordered, so the largest reserved id is its last element.
        let largest = self.replicated.last().copied().unwrap_or(0);
        let mut candidate = self
            .replicated_cursor
            .saturating_add(1)
            .max(largest.saturating_add(1));
        if candidate > ns.last() {
            candidate = ns.first();
        }

        let id = self.next_free(ns, candidate)?;
        self.replicated_cursor = id;
        Ok(EntityId(id))
    }

    /// Allocate a speculative id for an entity the authority has not yet
    /// confirmed.
    pub fn allocate_unacked(&mut self) -> Result<EntityId, IdError> {
        let ns = IdNamespace::Unacked;
        self.ensure_capacity(ns)?;
        let id = self.next_free(ns, ns.next_after(self.unacked_cursor))?;
        self.unacked_cursor = id;
        Ok(EntityId(id))
    }

    /// Allocate an id that is never sent to other peers.
    pub fn allocate_local(&mut self) -> Result<EntityId, IdError> {
        let ns = IdNamespace::Local;
        self.ensure_capacity(ns)?;
        let id = self.next_free(ns, ns.next_after(self.local_cursor))?;
        self.local_cursor = id;
        Ok(EntityId(id))
    }

    /// Allocate from the given namespace.
    pub fn allocate_in(&mut self, ns: IdNamespace) -> Result<EntityId, IdError> {
        match ns {
            IdNamespace::Replicated => self.allocate_replicated(),
            IdNamespace::Unacked => self.allocate_unacked(),
            IdNamespace::Local => self.allocate_local(),
        }
    }

    /// Reserve a caller-supplied id, typically one the authority announced.
    ///
    /// Returns `false` without side effects if the id is `0` or already
    /// reserved. Ids below [`FIRST_UNACKED_ID`] go to the replicated set,
    /// everything else to the shared set. Cursors are not moved.
    pub fn allocate(&mut self, id: EntityId) -> bool {
        if id.is_none() {
            return false;
        }
        let inserted = self.set_for_mut(id.0).insert(id.0);
        if inserted {
            self.adjust_live(id.0, true);
        }
        inserted
    }

    /// Release an id. Absent ids are ignored.
    pub fn deallocate(&mut self, id: EntityId) {
        if self.set_for_mut(id.0).remove(&id.0) {
            self.adjust_live(id.0, false);
        }
    }

    /// Whether `id` could be reserved right now. The zero value is never free.
    pub fn is_free(&self, id: EntityId) -> bool {
        !id.is_none() && !self.set_for(id.0).contains(&id.0)
    }

    /// Clear both reservation sets and rewind all three cursors.
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// Number of live ids in the allocatable range of `ns`.
    pub fn live_count(&self, ns: IdNamespace) -> usize {
        self.live[ns.slot()] as usize
    }

    /// Total number of reserved ids across both sets.
    pub fn reserved_count(&self) -> usize {
        self.replicated.len() + self.non_replicated.len()
    }

    // -- internals -----------------------------------------------------------

    fn set_for(&self, raw: u32) -> &BTreeSet<u32> {
        if raw < FIRST_UNACKED_ID {
            &self.replicated
        } else {
            &self.non_replicated
        }
    }

    fn set_for_mut(&mut self, raw: u32) -> &mut BTreeSet<u32> {
        if raw < FIRST_UNACKED_ID {
            &mut self.replicated
        } else {
            &mut self.non_replicated
        }
    }

    fn adjust_live(&mut self, raw: u32, reserved: bool) {
        if let Some(ns) = IdNamespace::ALL.into_iter().find(|ns| ns.contains(raw)) {
            let slot = &mut self.live[ns.slot()];
            if reserved {
                *slot += 1;
            } else {
                *slot -= 1;
            }
        }
    }

    fn ensure_capacity(&self, ns: IdNamespace) -> Result<(), IdError> {
        if self.live[ns.slot()] >= ns.capacity() {
            tracing::error!(namespace = ?ns, "entity id namespace exhausted");
            return Err(IdError::Exhausted {
                namespace: ns,
                live: self.live_count(ns),
            });
        }
        Ok(())
    }

    /// Walk forward from `start` (with wraparound) to the first free value,
    /// reserve it and return it. Bounded by the namespace capacity.
    fn next_free(&mut self, ns: IdNamespace, start: u32) -> Result<u32, IdError> {
        let mut candidate = start;
        for _ in 0..ns.capacity() {
            if self.set_for_mut(candidate).insert(candidate) {
                self.adjust_live(candidate, true);
                return Ok(candidate);
            }
            candidate = ns.next_after(candidate);
        }
        Err(IdError::Exhausted {
            namespace: ns,
            live: self.live_count(ns),
        })
    }
}

impl Default for IdAllocator {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
