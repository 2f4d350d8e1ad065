//! # Loopmesh
//!
//! A polygon mesh kernel for interactive modelling tools.
//!
//! Loopmesh stores meshes as a boundary representation: vertices, edges,
//! face corners (loops) and faces, linked by disk cycles around vertices and
//! radial cycles around edges. On top of that it provides typed per-element
//! attribute layers, a BVH for ray casts and picking, and a cubic patch
//! evaluator for smooth surfaces.
//!
//! ## Features
//!
//! - **Editable topology**: make and kill elements, split edges and faces,
//!   with stable element ids across compaction
//! - **Custom data**: typed attribute layers per element kind
//! - **Selection**: per-kind selection sets with flushing between kinds
//! - **Tessellation and normals**: lazily recomputed from dirty flags
//! - **BVH**: ray casts, nearest point and cone queries
//! - **Patches**: Bernstein and B-spline bicubic patches with tangent frames
//! - **Picking**: screen-space find-nearest over registered strategies
//!
//! ## Building Meshes
//!
//! ```
//! use loopmesh::prelude::*;
//! use nalgebra::Point3;
//!
//! let vertices = vec![
//!     Point3::new(0.0, 0.0, 0.0),
//!     Point3::new(1.0, 0.0, 0.0),
//!     Point3::new(0.5, 1.0, 0.0),
//!     Point3::new(0.5, 0.5, 1.0),
//! ];
//! let faces = vec![[0, 2, 1], [0, 1, 3], [1, 2, 3], [2, 0, 3]];
//!
//! let mesh: Mesh = build_from_triangles(&vertices, &faces).unwrap();
//! assert_eq!(mesh.num_verts(), 4);
//! assert_eq!(mesh.num_edges(), 6);
//! assert_eq!(mesh.num_faces(), 4);
//! ```
//!
//! ## Editing
//!
//! ```
//! use loopmesh::prelude::*;
//! use nalgebra::Point3;
//!
//! let mut mesh = Mesh::new();
//! let a = mesh.make_vertex(Point3::new(0.0, 0.0, 0.0)).unwrap();
//! let b = mesh.make_vertex(Point3::new(1.0, 0.0, 0.0)).unwrap();
//! let c = mesh.make_vertex(Point3::new(0.0, 1.0, 0.0)).unwrap();
//! let f = mesh.make_tri(a, b, c).unwrap();
//!
//! let e = mesh.get_edge(a, b).unwrap();
//! let (_, mid) = mesh.split_edge(e, 0.5).unwrap();
//! assert_eq!(mesh.face_verts(f).count(), 4);
//! assert_eq!(*mesh.co(mid), Point3::new(0.5, 0.0, 0.0));
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod bvh;
pub mod customdata;
pub mod error;
pub mod find_nearest;
pub mod mesh;
pub mod patch;

/// Prelude module for convenient imports.
///
/// ```
/// use loopmesh::prelude::*;
/// ```
pub mod prelude {
    pub use crate::bvh::{Bvh, BvhHit, BvhOptions};
    pub use crate::customdata::{CustomData, CustomDataElem, LayerKind};
    pub use crate::error::{MeshError, Result};
    pub use crate::mesh::{
        build_from_polygons, build_from_quads, build_from_triangles, EdgeId, Eid, ElemRef,
        ElemTypes, FaceId, LoopId, Mesh, MeshFeatures, MeshFlags, RecalcFlags, VertId,
    };
    pub use crate::patch::{Basis, CubicPatch, Patch4, PatchBase};
}

// Re-export nalgebra types for convenience
pub use nalgebra;

#[cfg(test)]
mod tests {
    use super::prelude::*;
    use nalgebra::Point3;

    #[test]
    fn test_tetrahedron() {
        let vertices = vec![
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(1.0, 0.0, 0.0),
            Point3::new(0.5, 1.0, 0.0),
            Point3::new(0.5, 0.5, 1.0),
        ];

        let faces = vec![
            [0, 2, 1], // bottom
            [0, 1, 3], // front
            [1, 2, 3], // right
            [2, 0, 3], // left
        ];

        let mesh: Mesh = build_from_triangles(&vertices, &faces).unwrap();

        assert_eq!(mesh.num_verts(), 4);
        assert_eq!(mesh.num_faces(), 4);
        assert_eq!(mesh.num_edges(), 6);
        assert_eq!(mesh.num_loops(), 12);
        assert!(mesh.validate().is_ok());

        // Closed: every edge has two faces.
        for e in mesh.edges().handles() {
            assert_eq!(mesh.edge_face_count(e), 2, "edge {:?} should be manifold", e);
        }
    }
}
