//! Mesh element types.
//!
//! Elements reference each other through slot handles; a [`Mesh`](super::Mesh)
//! owns them through its four element lists.
//!
//! - A [`Vertex`] keeps an unordered list of incident edges (its disk cycle).
//! - An [`Edge`] keeps one representative loop of its radial cycle.
//! - A [`Loop`] is one corner of one face. It links to the next and previous
//!   corner of the face and to the other loops sharing its edge.
//! - A [`Face`] holds one or more loop lists: the outer boundary, then holes.

use nalgebra::{Point3, Vector3};
use smallvec::SmallVec;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use super::flags::{ElemTypes, MeshFlags};
use super::index::{EdgeId, Eid, FaceId, Handle, LoopId, VertId};
use crate::customdata::CustomDataElem;

/// State shared by every element kind.
pub trait Element {
    /// Handle type addressing this element kind.
    type Id: Handle;

    /// Element type bit.
    const TYPE: ElemTypes;

    /// Stable identity.
    fn eid(&self) -> Eid;

    /// Assign the stable identity.
    fn set_eid(&mut self, eid: Eid);

    /// State bits.
    fn flag(&self) -> MeshFlags;

    /// Mutable state bits.
    fn flag_mut(&mut self) -> &mut MeshFlags;

    /// Transient position in the owning list.
    fn index(&self) -> usize;

    /// Set the transient position.
    fn set_index(&mut self, index: usize);

    /// Attribute values, one per layer of the owning list.
    fn custom_data(&self) -> &[CustomDataElem];

    /// Mutable attribute values.
    fn custom_data_mut(&mut self) -> &mut Vec<CustomDataElem>;
}

macro_rules! impl_element {
    ($ty:ident, $id:ident, $bit:expr) => {
        impl Element for $ty {
            type Id = $id;
            const TYPE: ElemTypes = $bit;

            #[inline]
            fn eid(&self) -> Eid {
                self.eid
            }

            #[inline]
            fn set_eid(&mut self, eid: Eid) {
                self.eid = eid;
            }

            #[inline]
            fn flag(&self) -> MeshFlags {
                self.flag
            }

            #[inline]
            fn flag_mut(&mut self) -> &mut MeshFlags {
                &mut self.flag
            }

            #[inline]
            fn index(&self) -> usize {
                self.index
            }

            #[inline]
            fn set_index(&mut self, index: usize) {
                self.index = index;
            }

            #[inline]
            fn custom_data(&self) -> &[CustomDataElem] {
                &self.custom_data
            }

            #[inline]
            fn custom_data_mut(&mut self) -> &mut Vec<CustomDataElem> {
                &mut self.custom_data
            }
        }
    };
}

/// A vertex.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Vertex {
    /// Position.
    pub co: Point3<f64>,
    /// Normal, valid after normal recalculation.
    pub no: Vector3<f64>,
    /// Incident edges.
    pub edges: SmallVec<[EdgeId; 6]>,
    /// State bits.
    pub flag: MeshFlags,
    /// Stable identity.
    pub eid: Eid,
    /// Transient position in the vertex list.
    pub index: usize,
    /// Attribute values.
    pub custom_data: Vec<CustomDataElem>,
}

impl Vertex {
    /// Create a detached vertex at `co`.
    pub fn new(co: Point3<f64>) -> Self {
        Self {
            co,
            no: Vector3::z(),
            edges: SmallVec::new(),
            flag: MeshFlags::empty(),
            eid: Eid::NONE,
            index: 0,
            custom_data: Vec::new(),
        }
    }

    /// Number of incident edges.
    #[inline]
    pub fn valence(&self) -> usize {
        self.edges.len()
    }
}

/// An edge between two vertices.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Edge {
    /// First vertex.
    pub v1: VertId,
    /// Second vertex.
    pub v2: VertId,
    /// One loop of the radial cycle; invalid when no face uses the edge.
    pub l: LoopId,
    /// State bits.
    pub flag: MeshFlags,
    /// Stable identity.
    pub eid: Eid,
    /// Transient position in the edge list.
    pub index: usize,
    /// Attribute values.
    pub custom_data: Vec<CustomDataElem>,
}

impl Edge {
    /// Create a detached edge.
    pub fn new(v1: VertId, v2: VertId) -> Self {
        Self {
            v1,
            v2,
            l: LoopId::invalid(),
            flag: MeshFlags::empty(),
            eid: Eid::NONE,
            index: 0,
            custom_data: Vec::new(),
        }
    }

    /// The endpoint that is not `v`.
    #[inline]
    pub fn other_vert(&self, v: VertId) -> VertId {
        if v == self.v1 {
            self.v2
        } else {
            self.v1
        }
    }

    /// Whether `v` is an endpoint.
    #[inline]
    pub fn has_vert(&self, v: VertId) -> bool {
        self.v1 == v || self.v2 == v
    }

    /// Whether the edge connects `a` and `b`, in either order.
    #[inline]
    pub fn connects(&self, a: VertId, b: VertId) -> bool {
        (self.v1 == a && self.v2 == b) || (self.v1 == b && self.v2 == a)
    }
}

/// One corner of a face.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Loop {
    /// Vertex the corner starts at.
    pub v: VertId,
    /// Edge from `v` to `next.v`.
    pub e: EdgeId,
    /// Owning face.
    pub f: FaceId,
    /// Index of the owning list in `f.lists`.
    pub list: usize,
    /// Next corner of the face.
    pub next: LoopId,
    /// Previous corner of the face.
    pub prev: LoopId,
    /// Next loop around `e`.
    pub radial_next: LoopId,
    /// Previous loop around `e`.
    pub radial_prev: LoopId,
    /// State bits.
    pub flag: MeshFlags,
    /// Stable identity.
    pub eid: Eid,
    /// Transient position in the loop list.
    pub index: usize,
    /// Attribute values.
    pub custom_data: Vec<CustomDataElem>,
}

impl Loop {
    /// Create a detached loop.
    pub fn new(v: VertId, e: EdgeId, f: FaceId) -> Self {
        Self {
            v,
            e,
            f,
            list: 0,
            next: LoopId::invalid(),
            prev: LoopId::invalid(),
            radial_next: LoopId::invalid(),
            radial_prev: LoopId::invalid(),
            flag: MeshFlags::empty(),
            eid: Eid::NONE,
            index: 0,
            custom_data: Vec::new(),
        }
    }
}

/// A closed cycle of loops: a face boundary or a hole.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct LoopList {
    /// First loop of the cycle.
    pub l: LoopId,
    /// Number of loops in the cycle.
    pub length: usize,
}

/// A polygon, possibly with holes.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Face {
    /// Outer boundary first, then holes.
    pub lists: SmallVec<[LoopList; 1]>,
    /// Normal; stale while any corner vertex carries UPDATE.
    pub no: Vector3<f64>,
    /// Centroid of the outer boundary.
    pub cent: Point3<f64>,
    /// Area from the last tessellation.
    pub area: f64,
    /// State bits.
    pub flag: MeshFlags,
    /// Stable identity.
    pub eid: Eid,
    /// Transient position in the face list.
    pub index: usize,
    /// Attribute values.
    pub custom_data: Vec<CustomDataElem>,
}

impl Face {
    /// Create a face without loops.
    pub fn new() -> Self {
        Self {
            lists: SmallVec::new(),
            no: Vector3::z(),
            cent: Point3::origin(),
            area: 0.0,
            flag: MeshFlags::empty(),
            eid: Eid::NONE,
            index: 0,
            custom_data: Vec::new(),
        }
    }

    /// Outer boundary, if the face has been linked.
    #[inline]
    pub fn outer(&self) -> Option<&LoopList> {
        self.lists.first()
    }

    /// Total number of loops over all lists.
    pub fn num_loops(&self) -> usize {
        self.lists.iter().map(|list| list.length).sum()
    }
}

impl Default for Face {
    fn default() -> Self {
        Self::new()
    }
}

impl_element!(Vertex, VertId, ElemTypes::VERTEX);
impl_element!(Edge, EdgeId, ElemTypes::EDGE);
impl_element!(Loop, LoopId, ElemTypes::LOOP);
impl_element!(Face, FaceId, ElemTypes::FACE);
