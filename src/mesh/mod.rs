//! Core mesh data structures.
//!
//! This module provides the polygon mesh kernel: vertices, edges, face
//! corners (loops) and faces, linked by disk and radial cycles.
//!
//! # Overview
//!
//! The primary type is [`Mesh`]. Each element kind lives in its own
//! [`ElementList`], which also carries the element kind's custom data layers,
//! selection set and active/highlight element.
//!
//! - A vertex knows its incident edges.
//! - An edge knows one loop of its radial cycle, the ring of face corners
//!   that use it.
//! - A loop knows its face, its neighbours around the face, and its
//!   neighbours around the edge.
//! - A face holds an outer loop list and optional hole lists.
//!
//! # Identity
//!
//! Elements are addressed by slot handles ([`VertId`], [`EdgeId`],
//! [`LoopId`], [`FaceId`]) that change on [`Mesh::compact`], and identified
//! by an [`Eid`] that does not.
//!
//! # Construction
//!
//! ```
//! use loopmesh::mesh::{build_from_quads, Mesh};
//! use nalgebra::Point3;
//!
//! let vertices = vec![
//!     Point3::new(0.0, 0.0, 0.0),
//!     Point3::new(1.0, 0.0, 0.0),
//!     Point3::new(1.0, 1.0, 0.0),
//!     Point3::new(0.0, 1.0, 0.0),
//! ];
//! let mesh: Mesh = build_from_quads(&vertices, &[[0, 1, 2, 3]]).unwrap();
//! assert_eq!(mesh.num_loops(), 4);
//! ```

mod builder;
mod element;
mod element_list;
mod flags;
mod geometry;
mod halfedge;
mod index;
mod render;
mod select;
mod tessellate;
mod topology;
mod validate;

pub use builder::{build_from_polygons, build_from_quads, build_from_triangles, to_face_vertex};
pub use element::{Edge, Element, Face, Loop, LoopList, Vertex};
pub use element_list::{ElementList, Remap};
pub use flags::{ElemTypes, MeshFeatures, MeshFlags, RecalcFlags};
pub use halfedge::{CompactRemap, ListLoopIter, Mesh, RadialLoopIter};
pub use index::{EdgeId, Eid, EidGen, ElemRef, FaceId, Handle, LoopId, VertId};
pub use render::MeshRenderer;
pub use tessellate::Tessellation;
