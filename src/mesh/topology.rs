//! Topological edits built on the make/kill primitives.

use nalgebra::Point3;

use super::element::{Face, Loop, LoopList};
use super::flags::{MeshFeatures, MeshFlags};
use super::halfedge::Mesh;
use super::index::{EdgeId, FaceId, LoopId, VertId};
use crate::error::{MeshError, Result};

impl Mesh {
    // ==================== Lookup ====================

    /// Face whose vertices are exactly `verts`, in any order.
    pub fn get_face(&self, verts: &[VertId]) -> Option<FaceId> {
        let &first = verts.first()?;
        if verts.len() < 3 || !self.verts.contains(first) {
            return None;
        }

        self.vert_faces(first).into_iter().find(|&f| {
            let fv: Vec<VertId> = self.face_verts(f).collect();
            fv.len() == verts.len() && verts.iter().all(|v| fv.contains(v))
        })
    }

    // ==================== Edge Split ====================

    /// Split `e` at parameter `t`, measured from `e.v1`.
    ///
    /// A new vertex is placed at the interpolated position with custom data
    /// blended by weights `1 - t` and `t`. `e` keeps `v1` and ends at the new
    /// vertex; the returned edge runs from the new vertex to the old `v2`.
    /// Every face using `e` gains one corner.
    pub fn split_edge(&mut self, e: EdgeId, t: f64) -> Result<(EdgeId, VertId)> {
        self.require(MeshFeatures::SPLIT_EDGE, "split_edge")?;
        if !(0.0..=1.0).contains(&t) {
            return Err(MeshError::invalid_param("t", t, "must lie in [0, 1]"));
        }

        let (v1, v2) = {
            let edge = self.edges.try_get(e)?;
            (edge.v1, edge.v2)
        };

        let co = Point3::from(self.verts[v1].co.coords.lerp(&self.verts[v2].co.coords, t));
        let nv = self.make_vertex(co)?;
        self.verts.custom_data_interp(nv, &[(v1, 1.0 - t), (v2, t)])?;

        // re-home e onto (v1, nv) before making ne, so get_edge stays exact
        self.disk_remove(v2, e);
        self.edges[e].v2 = nv;
        self.disk_insert(nv, e);

        let ne = self.make_edge(nv, v2, false)?;
        self.edges.copy_custom_data(e, ne)?;
        let flag = self.edges[e].flag & !MeshFlags::SELECT;
        self.edges[ne].flag |= flag | MeshFlags::UPDATE;
        self.edges[e].flag |= MeshFlags::UPDATE;

        let radial: Vec<LoopId> = self.edge_loops(e).collect();
        for &l in &radial {
            self.radial_remove(e, l);
        }

        for l in radial {
            let (lv, lf, list, lnext) = {
                let lp = &self.loops[l];
                (lp.v, lp.f, lp.list, lp.next)
            };

            let mut lp = Loop::new(nv, e, lf);
            lp.list = list;
            let l2 = self.alloc_loop(lp)?;

            if lv == v1 {
                // v1 -> nv -> v2
                self.loops[l2].e = ne;
                self.radial_insert(e, l);
                self.radial_insert(ne, l2);
            } else {
                // v2 -> nv -> v1
                self.loops[l].e = ne;
                self.radial_insert(ne, l);
                self.radial_insert(e, l2);
            }

            self.loops[l2].next = lnext;
            self.loops[l2].prev = l;
            self.loops[lnext].prev = l2;
            self.loops[l].next = l2;

            self.loops.custom_data_interp(l2, &[(l, 0.5), (lnext, 0.5)])?;

            let face = &mut self.faces[lf];
            face.lists[list].length += 1;
            face.flag.insert(MeshFlags::UPDATE);
        }

        self.mark_topology();
        Ok((ne, nv))
    }

    // ==================== Face Split ====================

    /// Split `f` along a new edge from `l1.v` to `l2.v`.
    ///
    /// The corners from `l1` up to (not including) `l2` move to the returned
    /// face; `f` keeps the rest and any holes. Both loops must lie on the
    /// outer boundary of `f` and must not be the same or adjacent corners.
    pub fn split_face(&mut self, f: FaceId, l1: LoopId, l2: LoopId) -> Result<(FaceId, EdgeId)> {
        self.require(MeshFeatures::SPLIT_FACE, "split_face")?;
        self.faces.try_get(f)?;
        let a = self.loops.try_get(l1)?.clone();
        let b = self.loops.try_get(l2)?.clone();

        if a.f != f || b.f != f {
            return Err(MeshError::InvalidSplit("loop belongs to another face"));
        }
        if l1 == l2 {
            return Err(MeshError::InvalidSplit("loops are the same corner"));
        }
        if a.next == l2 || a.prev == l2 {
            return Err(MeshError::InvalidSplit("loops are adjacent"));
        }
        if a.v == b.v {
            return Err(MeshError::InvalidSplit("loops share a vertex"));
        }
        if a.list != 0 || b.list != 0 {
            return Err(MeshError::InvalidSplit("loops must lie on the outer boundary"));
        }

        let moved: Vec<LoopId> = {
            let mut out = Vec::new();
            let mut l = l1;
            while l != l2 {
                out.push(l);
                l = self.loops[l].next;
            }
            out
        };
        let kept = self.faces[f].lists[0].length - moved.len();

        let e = self.make_edge(a.v, b.v, true)?;

        let mut face = Face::new();
        face.flag = self.faces[f].flag | MeshFlags::UPDATE;
        let f2 = self.alloc_face(face)?;
        self.faces.copy_custom_data(f, f2)?;

        let el1 = self.alloc_loop(Loop::new(a.v, e, f))?;
        let el2 = self.alloc_loop(Loop::new(b.v, e, f2))?;

        // f: ... a.prev -> el1 -> l2 ...
        self.loops[a.prev].next = el1;
        self.loops[el1].prev = a.prev;
        self.loops[el1].next = l2;
        self.loops[l2].prev = el1;

        // f2: l1 ... b.prev -> el2 -> l1
        self.loops[b.prev].next = el2;
        self.loops[el2].prev = b.prev;
        self.loops[el2].next = l1;
        self.loops[l1].prev = el2;

        for &l in moved.iter().chain(std::iter::once(&el2)) {
            let lp = &mut self.loops[l];
            lp.f = f2;
            lp.list = 0;
        }

        self.radial_insert(e, el1);
        self.radial_insert(e, el2);
        self.loops.copy_custom_data(l1, el1)?;
        self.loops.copy_custom_data(l2, el2)?;

        self.faces[f].lists[0] = LoopList { l: l2, length: kept + 1 };
        self.faces[f].flag.insert(MeshFlags::UPDATE);
        self.faces[f2].lists.push(LoopList { l: l1, length: moved.len() + 1 });

        self.update_face_geometry(f);
        self.update_face_geometry(f2);
        self.mark_topology();
        Ok((f2, e))
    }

    /// Split the face shared by `v1` and `v2` with an edge between them.
    pub fn connect_verts(&mut self, v1: VertId, v2: VertId) -> Result<(FaceId, EdgeId)> {
        if v1 == v2 {
            return Err(MeshError::SameVertex(v1.index()));
        }
        self.verts.try_get(v1)?;
        self.verts.try_get(v2)?;

        let corners: Vec<LoopId> = self.vert_loops(v1).collect();
        for l1 in corners {
            let lp = &self.loops[l1];
            if lp.list != 0 {
                continue;
            }
            let f = lp.f;
            let found = self
                .outer_loops(f)
                .find(|&l| self.loops[l].v == v2 && l != lp.next && l != lp.prev);
            if let Some(l2) = found {
                return self.split_face(f, l1, l2);
            }
        }

        Err(MeshError::InvalidSplit("vertices share no face they can split"))
    }

    // ==================== Winding ====================

    /// Reverse the corner order of every loop list of `f`.
    ///
    /// Each loop keeps its vertex and custom data; its edge becomes the one
    /// its predecessor used.
    pub fn reverse_winding(&mut self, f: FaceId) -> Result<()> {
        let lists = self.faces.try_get(f)?.lists.clone();

        for list in lists {
            let ls: Vec<LoopId> = self.list_loops(list).collect();
            let n = ls.len();
            let old: Vec<EdgeId> = ls.iter().map(|&l| self.loops[l].e).collect();

            for (&l, &e) in ls.iter().zip(&old) {
                self.radial_remove(e, l);
            }

            for (i, &l) in ls.iter().enumerate() {
                let lp = &mut self.loops[l];
                lp.e = old[(i + n - 1) % n];
                std::mem::swap(&mut lp.next, &mut lp.prev);
            }

            for &l in &ls {
                let e = self.loops[l].e;
                self.radial_insert(e, l);
            }
        }

        let face = &mut self.faces[f];
        face.no = -face.no;
        face.flag.insert(MeshFlags::UPDATE);
        self.mark_topology();
        Ok(())
    }

    // ==================== Holes ====================

    /// Add a hole over `verts` to `f` and return its list index.
    ///
    /// Holes should wind opposite to the outer boundary.
    pub fn make_hole(&mut self, f: FaceId, verts: &[VertId]) -> Result<usize> {
        self.require(MeshFeatures::MAKE_FACE, "make_hole")?;
        self.faces.try_get(f)?;
        self.check_cycle(verts)?;

        let index = self.faces[f].lists.len();
        let list = self.link_loop_list(f, verts, index)?;
        let face = &mut self.faces[f];
        face.lists.push(list);
        face.flag.insert(MeshFlags::UPDATE);

        self.update_face_geometry(f);
        self.mark_topology();
        Ok(index)
    }

    /// Remove hole `index` from `f`, freeing its loops.
    pub fn remove_hole(&mut self, f: FaceId, index: usize) -> Result<()> {
        self.require(MeshFeatures::KILL_FACE, "remove_hole")?;
        let nlists = self.faces.try_get(f)?.lists.len();
        if index == 0 || index >= nlists {
            return Err(MeshError::invalid_param("index", index, "not a hole of this face"));
        }

        let list = self.faces[f].lists.remove(index);
        self.kill_loop_list(list)?;

        let later: Vec<(usize, LoopList)> = self.faces[f]
            .lists
            .iter()
            .copied()
            .enumerate()
            .skip(index)
            .collect();
        for (i, list) in later {
            let ls: Vec<LoopId> = self.list_loops(list).collect();
            for l in ls {
                self.loops[l].list = i;
            }
        }

        self.faces[f].flag.insert(MeshFlags::UPDATE);
        self.mark_topology();
        Ok(())
    }

    // ==================== Cleanup ====================

    /// Kill edges without faces, then vertices without edges.
    ///
    /// Returns the number of edges and vertices removed.
    pub fn prune_wire_geometry(&mut self) -> Result<(usize, usize)> {
        let wire: Vec<EdgeId> = self
            .edges
            .iter()
            .filter(|(_, e)| !e.l.is_valid())
            .map(|(h, _)| h)
            .collect();
        for &e in &wire {
            self.kill_edge(e)?;
        }

        let loose: Vec<VertId> = self
            .verts
            .iter()
            .filter(|(_, v)| v.edges.is_empty())
            .map(|(h, _)| h)
            .collect();
        for &v in &loose {
            self.kill_vertex(v)?;
        }

        if !wire.is_empty() || !loose.is_empty() {
            log::debug!("pruned {} wire edges and {} loose vertices", wire.len(), loose.len());
        }
        Ok((wire.len(), loose.len()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::customdata::{CustomDataElem, LayerKind};
    use approx::assert_relative_eq;
    use nalgebra::Vector3;

    fn quad() -> (Mesh, Vec<VertId>, FaceId) {
        let mut mesh = Mesh::new();
        let vs: Vec<VertId> = [(0.0, 0.0), (1.0, 0.0), (1.0, 1.0), (0.0, 1.0)]
            .iter()
            .map(|&(x, y)| mesh.make_vertex(Point3::new(x, y, 0.0)).unwrap())
            .collect();
        let f = mesh.make_face(&vs).unwrap();
        (mesh, vs, f)
    }

    fn corner(mesh: &Mesh, f: FaceId, v: VertId) -> LoopId {
        mesh.outer_loops(f).find(|&l| mesh.lp(l).v == v).unwrap()
    }

    #[test]
    fn test_get_face() {
        let (mesh, vs, f) = quad();
        assert_eq!(mesh.get_face(&[vs[2], vs[0], vs[3], vs[1]]), Some(f));
        assert_eq!(mesh.get_face(&vs[..3]), None);
        assert_eq!(mesh.get_face(&[]), None);
    }

    #[test]
    fn test_split_edge_single_face() {
        let (mut mesh, vs, f) = quad();
        let e = mesh.get_edge(vs[0], vs[1]).unwrap();

        let (ne, nv) = mesh.split_edge(e, 0.25).unwrap();
        assert_relative_eq!(mesh.co(nv).x, 0.25, epsilon = 1e-12);
        assert_eq!(mesh.num_verts(), 5);
        assert_eq!(mesh.num_edges(), 5);
        assert_eq!(mesh.face(f).num_loops(), 5);

        assert!(mesh.edge(e).connects(vs[0], nv));
        assert!(mesh.edge(ne).connects(nv, vs[1]));
        assert_eq!(
            mesh.face_verts(f).collect::<Vec<_>>(),
            vec![vs[0], nv, vs[1], vs[2], vs[3]]
        );
        assert!(mesh.validate().is_ok());
    }

    #[test]
    fn test_split_edge_both_windings() {
        let (mut mesh, vs, _) = quad();
        let c = mesh.make_vertex(Point3::new(0.5, -1.0, 0.0)).unwrap();
        // runs v1 -> v0, opposite to the quad
        let g = mesh.make_face(&[vs[1], vs[0], c]).unwrap();
        let e = mesh.get_edge(vs[0], vs[1]).unwrap();

        let (_, nv) = mesh.split_edge(e, 0.5).unwrap();
        assert_eq!(mesh.num_loops(), 9);
        assert_eq!(mesh.face_verts(g).collect::<Vec<_>>(), vec![vs[1], nv, vs[0], c]);
        assert_eq!(mesh.vert_faces(nv).len(), 2);
        assert!(mesh.validate().is_ok());
    }

    #[test]
    fn test_split_edge_interpolates_custom_data() {
        let (mut mesh, vs, f) = quad();
        let vl = mesh.verts_mut().add_custom_data_layer(LayerKind::Float, None).unwrap();
        let ll = mesh.loops_mut().add_custom_data_layer(LayerKind::Float, None).unwrap();
        *mesh.verts_mut().cd_value_mut(vs[1], vl).unwrap() = CustomDataElem::Float(4.0);

        let la = corner(&mesh, f, vs[0]);
        let lb = corner(&mesh, f, vs[1]);
        *mesh.loops_mut().cd_value_mut(la, ll).unwrap() = CustomDataElem::Float(2.0);
        *mesh.loops_mut().cd_value_mut(lb, ll).unwrap() = CustomDataElem::Float(6.0);

        let e = mesh.get_edge(vs[0], vs[1]).unwrap();
        let (_, nv) = mesh.split_edge(e, 0.25).unwrap();

        assert_eq!(mesh.verts().cd_value(nv, vl), Some(&CustomDataElem::Float(1.0)));
        let nl = corner(&mesh, f, nv);
        assert_eq!(mesh.loops().cd_value(nl, ll), Some(&CustomDataElem::Float(4.0)));
    }

    #[test]
    fn test_split_edge_rejects_bad_t() {
        let (mut mesh, vs, _) = quad();
        let e = mesh.get_edge(vs[0], vs[1]).unwrap();
        assert!(matches!(
            mesh.split_edge(e, 1.5),
            Err(MeshError::InvalidParameter { name: "t", .. })
        ));
    }

    #[test]
    fn test_split_face() {
        let (mut mesh, vs, f) = quad();
        let l1 = corner(&mesh, f, vs[0]);
        let l2 = corner(&mesh, f, vs[2]);

        let (f2, e) = mesh.split_face(f, l1, l2).unwrap();
        assert_eq!(mesh.num_faces(), 2);
        assert_eq!(mesh.num_edges(), 5);
        assert_eq!(mesh.num_loops(), 6);
        assert_eq!(mesh.edge_face_count(e), 2);

        assert_eq!(mesh.face_verts(f2).collect::<Vec<_>>(), vec![vs[0], vs[1], vs[2]]);
        assert_eq!(mesh.face_verts(f).collect::<Vec<_>>(), vec![vs[2], vs[3], vs[0]]);
        assert_relative_eq!(mesh.face(f2).no, Vector3::z(), epsilon = 1e-12);
        assert!(mesh.validate().is_ok());
    }

    #[test]
    fn test_split_face_rejections() {
        let (mut mesh, vs, f) = quad();
        let l0 = corner(&mesh, f, vs[0]);
        let l1 = corner(&mesh, f, vs[1]);
        let l3 = corner(&mesh, f, vs[3]);

        assert_eq!(
            mesh.split_face(f, l0, l0),
            Err(MeshError::InvalidSplit("loops are the same corner"))
        );
        assert_eq!(
            mesh.split_face(f, l0, l1),
            Err(MeshError::InvalidSplit("loops are adjacent"))
        );
        assert_eq!(
            mesh.split_face(f, l0, l3),
            Err(MeshError::InvalidSplit("loops are adjacent"))
        );

        let a = mesh.make_vertex(Point3::new(5.0, 0.0, 0.0)).unwrap();
        let b = mesh.make_vertex(Point3::new(6.0, 0.0, 0.0)).unwrap();
        let c = mesh.make_vertex(Point3::new(6.0, 1.0, 0.0)).unwrap();
        let g = mesh.make_face(&[a, b, c]).unwrap();
        let la = corner(&mesh, g, a);
        assert_eq!(
            mesh.split_face(f, l0, la),
            Err(MeshError::InvalidSplit("loop belongs to another face"))
        );
        assert_eq!(mesh.num_faces(), 2);
    }

    #[test]
    fn test_connect_verts() {
        let (mut mesh, vs, _) = quad();
        let (_, e) = mesh.connect_verts(vs[1], vs[3]).unwrap();
        assert!(mesh.edge(e).connects(vs[1], vs[3]));
        assert_eq!(mesh.num_faces(), 2);

        assert!(matches!(
            mesh.connect_verts(vs[0], vs[1]),
            Err(MeshError::InvalidSplit(_))
        ));
    }

    #[test]
    fn test_reverse_winding() {
        let (mut mesh, vs, f) = quad();
        mesh.reverse_winding(f).unwrap();

        assert_eq!(
            mesh.face_verts(f).collect::<Vec<_>>(),
            vec![vs[0], vs[3], vs[2], vs[1]]
        );
        assert_relative_eq!(mesh.face(f).no, -Vector3::z(), epsilon = 1e-12);
        assert_relative_eq!(mesh.calc_face_normal(f), -Vector3::z(), epsilon = 1e-12);
        assert!(mesh.validate().is_ok());
    }

    #[test]
    fn test_holes() {
        let mut mesh = Mesh::new();
        let outer: Vec<VertId> = [(0.0, 0.0), (4.0, 0.0), (4.0, 4.0), (0.0, 4.0)]
            .iter()
            .map(|&(x, y)| mesh.make_vertex(Point3::new(x, y, 0.0)).unwrap())
            .collect();
        let inner: Vec<VertId> = [(1.0, 1.0), (1.0, 3.0), (3.0, 3.0), (3.0, 1.0)]
            .iter()
            .map(|&(x, y)| mesh.make_vertex(Point3::new(x, y, 0.0)).unwrap())
            .collect();

        let f = mesh.make_face(&outer).unwrap();
        let hole = mesh.make_hole(f, &inner).unwrap();
        assert_eq!(hole, 1);
        assert_eq!(mesh.face(f).lists.len(), 2);
        assert_eq!(mesh.face(f).num_loops(), 8);
        assert_relative_eq!(mesh.face_area(f), 12.0, epsilon = 1e-12);
        assert!(mesh.validate().is_ok());

        assert!(mesh.remove_hole(f, 0).is_err());
        mesh.remove_hole(f, hole).unwrap();
        assert_eq!(mesh.num_loops(), 4);
        assert!(mesh.validate().is_ok());

        let (edges, verts) = mesh.prune_wire_geometry().unwrap();
        assert_eq!((edges, verts), (4, 4));
        assert_eq!(mesh.num_verts(), 4);
        assert!(mesh.validate().is_ok());
    }
}
