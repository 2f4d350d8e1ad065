//! Geometric quantities derived from vertex positions.

use nalgebra::{Matrix4, Point3, Vector3};

use super::element::LoopList;
use super::flags::{MeshFlags, RecalcFlags};
use super::halfedge::Mesh;
use super::index::{EdgeId, FaceId, VertId};
use crate::error::Result;

impl Mesh {
    /// Newell normal of one loop list, unnormalised. Its length is twice
    /// the enclosed area.
    pub(crate) fn list_newell(&self, list: LoopList) -> Vector3<f64> {
        let pts: Vec<Point3<f64>> = self
            .list_loops(list)
            .map(|l| self.verts[self.loops[l].v].co)
            .collect();

        let mut n = Vector3::zeros();
        for (i, a) in pts.iter().enumerate() {
            let b = pts[(i + 1) % pts.len()];
            n.x += (a.y - b.y) * (a.z + b.z);
            n.y += (a.z - b.z) * (a.x + b.x);
            n.z += (a.x - b.x) * (a.y + b.y);
        }
        n
    }

    /// Unit normal of `f` from its outer boundary, or zero when degenerate.
    pub fn calc_face_normal(&self, f: FaceId) -> Vector3<f64> {
        match self.faces[f].outer() {
            Some(&list) => self
                .list_newell(list)
                .try_normalize(f64::EPSILON)
                .unwrap_or_else(Vector3::zeros),
            None => Vector3::zeros(),
        }
    }

    /// Average of the outer boundary vertex positions.
    pub fn calc_face_cent(&self, f: FaceId) -> Point3<f64> {
        let mut sum = Vector3::zeros();
        let mut n = 0usize;
        for v in self.outer_loops(f).map(|l| self.loops[l].v) {
            sum += self.verts[v].co.coords;
            n += 1;
        }
        if n == 0 {
            return Point3::origin();
        }
        Point3::from(sum / n as f64)
    }

    /// Area of `f`, outer boundary minus holes.
    pub fn face_area(&self, f: FaceId) -> f64 {
        let face = &self.faces[f];
        let mut area = 0.0;
        for (i, &list) in face.lists.iter().enumerate() {
            let a = self.list_newell(list).norm() * 0.5;
            if i == 0 {
                area += a;
            } else {
                area -= a;
            }
        }
        area.max(0.0)
    }

    /// Length of an edge.
    pub fn edge_length(&self, e: EdgeId) -> f64 {
        let edge = &self.edges[e];
        (self.verts[edge.v2].co - self.verts[edge.v1].co).norm()
    }

    /// Store the normal and centroid of `f`.
    pub(crate) fn update_face_geometry(&mut self, f: FaceId) {
        let no = self.calc_face_normal(f);
        let cent = self.calc_face_cent(f);
        let face = &mut self.faces[f];
        face.no = no;
        face.cent = cent;
    }

    /// Recompute every face normal and centroid, then vertex normals as the
    /// area-weighted average of incident face normals. Isolated vertices
    /// keep their normal.
    pub fn recalc_normals(&mut self) {
        let faces: Vec<FaceId> = self.faces.handles().collect();
        for &f in &faces {
            self.update_face_geometry(f);
        }

        let verts: Vec<VertId> = self.verts.handles().collect();
        for v in verts {
            let mut no = Vector3::zeros();
            for f in self.vert_faces(v) {
                let face = &self.faces[f];
                no += face.no * self.face_area(f).max(f64::EPSILON);
            }
            if let Some(no) = no.try_normalize(f64::EPSILON) {
                self.verts[v].no = no;
            }
        }

        self.recalc.remove(RecalcFlags::NORMALS);
        self.recalc |= RecalcFlags::RENDER;
    }

    /// Axis-aligned bounds of all vertices, or `None` for an empty mesh.
    pub fn bounding_box(&self) -> Option<(Point3<f64>, Point3<f64>)> {
        let mut it = self.verts.iter().map(|(_, v)| v.co);
        let first = it.next()?;
        Some(it.fold((first, first), |(min, max), p| {
            (min.inf(&p), max.sup(&p))
        }))
    }

    /// Transform every vertex by `m`; normals use the inverse transpose.
    pub fn apply_matrix(&mut self, m: &Matrix4<f64>) {
        let normal_matrix = m
            .fixed_view::<3, 3>(0, 0)
            .into_owned()
            .try_inverse()
            .map(|inv| inv.transpose());

        for (_, v) in self.verts.iter_mut() {
            v.co = m.transform_point(&v.co);
            if let Some(nm) = &normal_matrix {
                v.no = (nm * v.no).try_normalize(f64::EPSILON).unwrap_or(v.no);
            }
            v.flag.insert(MeshFlags::UPDATE);
        }

        for (_, f) in self.faces.iter_mut() {
            f.flag.insert(MeshFlags::UPDATE);
        }

        self.regen_normals();
        self.regen_tessellation();
        self.recalc |= RecalcFlags::BVH;
    }

    /// Move a vertex, flagging it, its edges and its faces with UPDATE.
    ///
    /// The triangle cache is marked stale.
    pub fn set_vert_co(&mut self, v: VertId, co: Point3<f64>) -> Result<()> {
        self.verts.try_get(v)?;

        let vert = &mut self.verts[v];
        vert.co = co;
        vert.flag.insert(MeshFlags::UPDATE);

        let edges: Vec<EdgeId> = self.vert_edges(v).collect();
        for e in edges {
            self.edges[e].flag.insert(MeshFlags::UPDATE);
        }
        for f in self.vert_faces(v) {
            self.faces[f].flag.insert(MeshFlags::UPDATE);
        }

        // Quad diagonals and ear clipping depend on positions.
        self.regen_tessellation();
        self.recalc |= RecalcFlags::NORMALS | RecalcFlags::PARTIAL;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn unit_square() -> (Mesh, FaceId) {
        let mut mesh = Mesh::new();
        let vs: Vec<VertId> = [(0.0, 0.0), (2.0, 0.0), (2.0, 2.0), (0.0, 2.0)]
            .iter()
            .map(|&(x, y)| mesh.make_vertex(Point3::new(x, y, 0.0)).unwrap())
            .collect();
        let f = mesh.make_face(&vs).unwrap();
        (mesh, f)
    }

    #[test]
    fn test_face_normal_and_area() {
        let (mesh, f) = unit_square();
        assert_relative_eq!(mesh.calc_face_normal(f), Vector3::z(), epsilon = 1e-12);
        assert_relative_eq!(mesh.face_area(f), 4.0, epsilon = 1e-12);
        assert_relative_eq!(mesh.calc_face_cent(f), Point3::new(1.0, 1.0, 0.0), epsilon = 1e-12);
    }

    #[test]
    fn test_reversed_winding_flips_normal() {
        let mut mesh = Mesh::new();
        let a = mesh.make_vertex(Point3::new(0.0, 0.0, 0.0)).unwrap();
        let b = mesh.make_vertex(Point3::new(1.0, 0.0, 0.0)).unwrap();
        let c = mesh.make_vertex(Point3::new(0.0, 1.0, 0.0)).unwrap();
        let f = mesh.make_face(&[a, c, b]).unwrap();
        assert_relative_eq!(mesh.face(f).no, -Vector3::z(), epsilon = 1e-12);
    }

    #[test]
    fn test_recalc_vertex_normals() {
        let (mut mesh, _) = unit_square();
        mesh.recalc_normals();
        for (_, v) in mesh.verts().iter() {
            assert_relative_eq!(v.no, Vector3::z(), epsilon = 1e-12);
        }
        assert!(!mesh.recalc_flags().contains(RecalcFlags::NORMALS));
    }

    #[test]
    fn test_bounding_box() {
        let (mesh, _) = unit_square();
        let (min, max) = mesh.bounding_box().unwrap();
        assert_eq!(min, Point3::new(0.0, 0.0, 0.0));
        assert_eq!(max, Point3::new(2.0, 2.0, 0.0));
        assert!(Mesh::new().bounding_box().is_none());
    }

    #[test]
    fn test_apply_matrix() {
        let (mut mesh, f) = unit_square();
        let m = Matrix4::new_translation(&Vector3::new(1.0, 0.0, 0.0))
            * Matrix4::new_nonuniform_scaling(&Vector3::new(1.0, 1.0, 1.0));
        mesh.apply_matrix(&m);
        mesh.recalc_normals();
        assert_relative_eq!(mesh.face(f).cent, Point3::new(2.0, 1.0, 0.0), epsilon = 1e-12);
    }

    #[test]
    fn test_set_vert_co_flags_neighbors() {
        let (mut mesh, f) = unit_square();
        mesh.clear_update_flags(crate::mesh::ElemTypes::all());

        let v = mesh.face_verts(f).next().unwrap();
        mesh.set_vert_co(v, Point3::new(-1.0, -1.0, 0.0)).unwrap();

        assert!(mesh.vert(v).flag.contains(MeshFlags::UPDATE));
        assert!(mesh.face(f).flag.contains(MeshFlags::UPDATE));
        for e in mesh.vert_edges(v) {
            assert!(mesh.edge(e).flag.contains(MeshFlags::UPDATE));
        }
        assert!(mesh.face_area(f) > 4.0);
    }
}
