//! Handle and identity types for mesh elements.
//!
//! Two kinds of identifiers exist side by side:
//!
//! - Slot handles ([`VertId`], [`EdgeId`], [`LoopId`], [`FaceId`]) index an
//!   element's position inside its [`ElementList`](super::ElementList). They
//!   give O(1) traversal but change when a list is compacted.
//! - [`Eid`] is the stable identity of an element. It survives compaction
//!   and is the only identifier safe to persist.

use std::collections::HashMap;
use std::fmt::{self, Debug};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Common interface of the slot handle types.
pub trait Handle: Copy + Eq + std::hash::Hash + Debug {
    /// Create a handle for a slot index.
    fn from_slot(slot: usize) -> Self;

    /// Slot index of this handle.
    fn slot(self) -> usize;
}

/// A type-safe vertex handle.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[repr(transparent)]
pub struct VertId(u32);

/// A type-safe edge handle.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[repr(transparent)]
pub struct EdgeId(u32);

/// A type-safe loop (face corner) handle.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[repr(transparent)]
pub struct LoopId(u32);

/// A type-safe face handle.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[repr(transparent)]
pub struct FaceId(u32);

const INVALID_SLOT: u32 = u32::MAX;

macro_rules! impl_handle_type {
    ($name:ident, $display:literal) => {
        impl $name {
            /// Create a new handle from a slot index.
            #[inline]
            pub fn new(index: usize) -> Self {
                debug_assert!(index < INVALID_SLOT as usize, "slot {} too large", index);
                Self(index as u32)
            }

            /// Create an invalid/null handle.
            #[inline]
            pub const fn invalid() -> Self {
                Self(INVALID_SLOT)
            }

            /// Get the slot index.
            #[inline]
            pub fn index(self) -> usize {
                self.0 as usize
            }

            /// Check if this is a valid (non-null) handle.
            #[inline]
            pub fn is_valid(self) -> bool {
                self.0 != INVALID_SLOT
            }
        }

        impl Handle for $name {
            #[inline]
            fn from_slot(slot: usize) -> Self {
                Self::new(slot)
            }

            #[inline]
            fn slot(self) -> usize {
                self.index()
            }
        }

        impl Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                if self.is_valid() {
                    write!(f, "{}({})", $display, self.index())
                } else {
                    write!(f, "{}(INVALID)", $display)
                }
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::invalid()
            }
        }

        impl From<usize> for $name {
            fn from(v: usize) -> Self {
                Self::new(v)
            }
        }
    };
}

impl_handle_type!(VertId, "V");
impl_handle_type!(EdgeId, "E");
impl_handle_type!(LoopId, "L");
impl_handle_type!(FaceId, "F");

/// Handle to any element kind, as stored in the mesh's eid map.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ElemRef {
    /// A vertex.
    Vertex(VertId),
    /// An edge.
    Edge(EdgeId),
    /// A loop.
    Loop(LoopId),
    /// A face.
    Face(FaceId),
}

/// Stable element identity.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[repr(transparent)]
pub struct Eid(pub u64);

impl Eid {
    /// Eid of an element that has not been assigned one.
    pub const NONE: Eid = Eid(0);

    /// Raw eid value.
    #[inline]
    pub fn get(self) -> u64 {
        self.0
    }
}

impl Debug for Eid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl fmt::Display for Eid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Eid generator with a freelist of recycled ids.
///
/// Ids start at 1. A freed id may be handed out again by [`EidGen::next`],
/// but an id is never handed out while an element still holds it.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct EidGen {
    cur: u64,
    freelist: Vec<u64>,
    freemap: HashMap<u64, usize>,
}

impl Default for EidGen {
    fn default() -> Self {
        Self::new()
    }
}

impl EidGen {
    /// Create a generator starting at 1.
    pub fn new() -> Self {
        Self {
            cur: 1,
            freelist: Vec::new(),
            freemap: HashMap::new(),
        }
    }

    /// The next never-used id.
    #[inline]
    pub fn cur(&self) -> u64 {
        self.cur
    }

    /// Number of ids waiting on the freelist.
    pub fn num_free(&self) -> usize {
        self.freelist.len()
    }

    /// Allocate an id, recycling freed ids first.
    pub fn next(&mut self) -> Eid {
        if let Some(id) = self.freelist.pop() {
            self.freemap.remove(&id);
            return Eid(id);
        }

        let id = self.cur;
        self.cur += 1;
        Eid(id)
    }

    /// Return an id to the pool.
    pub fn free(&mut self, eid: Eid) {
        if eid == Eid::NONE || eid.0 >= self.cur || self.freemap.contains_key(&eid.0) {
            return;
        }

        self.freemap.insert(eid.0, self.freelist.len());
        self.freelist.push(eid.0);
    }

    /// Mark `eid` as used, so it is never handed out by [`EidGen::next`].
    pub fn reserve(&mut self, eid: Eid) {
        if eid.0 >= self.cur {
            self.cur = eid.0 + 1;
        }

        let Some(i) = self.freemap.remove(&eid.0) else {
            return;
        };

        // swap-remove and patch the moved entry
        self.freelist.swap_remove(i);
        if let Some(&moved) = self.freelist.get(i) {
            self.freemap.insert(moved, i);
        }
    }

    /// Raise `cur` to at least `id`.
    pub fn max_cur(&mut self, id: u64) {
        self.cur = self.cur.max(id);
    }

    /// Forget all ids and start again at 1.
    pub fn reset(&mut self) {
        *self = Self::new();
    }
}
