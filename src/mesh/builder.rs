//! Mesh construction utilities.
//!
//! Build a [`Mesh`] from indexed face-vertex lists, as found in mesh file
//! formats, and convert back.

use std::collections::HashMap;

use nalgebra::Point3;

use super::halfedge::Mesh;
use super::index::VertId;
use crate::error::{MeshError, Result};

/// Build a mesh from vertex positions and polygons of any size.
///
/// Vertex `i` of the input becomes the `i`-th vertex created, so eids follow
/// input order. Polygons are validated before anything is built.
///
/// # Example
/// ```
/// use loopmesh::mesh::build_from_polygons;
/// use nalgebra::Point3;
///
/// let points = vec![
///     Point3::new(0.0, 0.0, 0.0),
///     Point3::new(1.0, 0.0, 0.0),
///     Point3::new(1.0, 1.0, 0.0),
///     Point3::new(0.0, 1.0, 0.0),
///     Point3::new(2.0, 0.5, 0.0),
/// ];
/// let polys = vec![vec![0, 1, 2, 3], vec![1, 4, 2]];
///
/// let mesh = build_from_polygons(&points, &polys).unwrap();
/// assert_eq!(mesh.num_faces(), 2);
/// assert_eq!(mesh.num_edges(), 6);
/// ```
pub fn build_from_polygons<P: AsRef<[usize]>>(points: &[Point3<f64>], polys: &[P]) -> Result<Mesh> {
    for (fi, poly) in polys.iter().enumerate() {
        let poly = poly.as_ref();
        if poly.len() < 3 {
            return Err(MeshError::TooFewVertices(poly.len()));
        }
        for (i, &vi) in poly.iter().enumerate() {
            if vi >= points.len() {
                return Err(MeshError::InvalidVertexIndex { face: fi, vertex: vi });
            }
            if poly[..i].contains(&vi) {
                return Err(MeshError::DuplicateVertex(vi));
            }
        }
    }

    let mut mesh = Mesh::new();
    let verts: Vec<VertId> = points
        .iter()
        .map(|&p| mesh.make_vertex(p))
        .collect::<Result<_>>()?;

    let mut corners: Vec<VertId> = Vec::new();
    for poly in polys {
        corners.clear();
        corners.extend(poly.as_ref().iter().map(|&i| verts[i]));
        mesh.make_face(&corners)?;
    }

    log::debug!(
        "built mesh with {} vertices and {} faces",
        mesh.num_verts(),
        mesh.num_faces()
    );
    Ok(mesh)
}

/// Build a mesh from vertices and triangle faces.
///
/// # Example
/// ```
/// use loopmesh::mesh::build_from_triangles;
/// use nalgebra::Point3;
///
/// let vertices = vec![
///     Point3::new(0.0, 0.0, 0.0),
///     Point3::new(1.0, 0.0, 0.0),
///     Point3::new(0.5, 1.0, 0.0),
/// ];
/// let faces = vec![[0, 1, 2]];
///
/// let mesh = build_from_triangles(&vertices, &faces).unwrap();
/// assert_eq!(mesh.num_verts(), 3);
/// assert_eq!(mesh.num_faces(), 1);
/// ```
pub fn build_from_triangles(vertices: &[Point3<f64>], faces: &[[usize; 3]]) -> Result<Mesh> {
    build_from_polygons(vertices, faces)
}

/// Build a mesh from vertices and quad faces (counter-clockwise).
pub fn build_from_quads(vertices: &[Point3<f64>], faces: &[[usize; 4]]) -> Result<Mesh> {
    build_from_polygons(vertices, faces)
}

/// Convert a mesh back to a face-vertex representation.
///
/// Vertices are numbered densely in slot order. Only outer boundaries are
/// emitted; holes are dropped.
pub fn to_face_vertex(mesh: &Mesh) -> (Vec<Point3<f64>>, Vec<Vec<usize>>) {
    let mut index: HashMap<VertId, usize> = HashMap::with_capacity(mesh.num_verts());
    let mut points = Vec::with_capacity(mesh.num_verts());
    for (v, vert) in mesh.verts().iter() {
        index.insert(v, points.len());
        points.push(vert.co);
    }

    let polys = mesh
        .faces()
        .handles()
        .map(|f| {
            mesh.outer_loops(f)
                .filter_map(|l| index.get(&mesh.lp(l).v).copied())
                .collect()
        })
        .collect();

    (points, polys)
}
