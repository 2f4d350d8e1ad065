//! The mesh topology kernel.
//!
//! [`Mesh`] owns one [`ElementList`] per element kind and keeps the
//! half-edge invariants while elements are made and killed:
//!
//! - every edge in `v.edges` has `v` as an endpoint (disk cycle)
//! - walking `radial_next` from `e.l` visits every loop using `e` and
//!   returns to `e.l` (radial cycle)
//! - walking `next` around a loop list returns to its start after exactly
//!   `length` steps, and `l.next.prev == l`
//!
//! Handles passed to kernel operations must be live handles of this mesh.
//! Operations check liveness and report [`MeshError::DeadElement`]; handles
//! from another mesh are not detected.

use std::collections::HashMap;

use nalgebra::Point3;

use super::element::{Edge, Element, Face, Loop, LoopList, Vertex};
use super::element_list::{dead, ElementList, Remap};
use super::flags::{ElemTypes, MeshFeatures, MeshFlags, RecalcFlags};
use super::index::{EdgeId, ElemRef, Eid, EidGen, FaceId, LoopId, VertId};
use super::tessellate::Tessellation;
use crate::bvh::BvhCache;
use crate::error::{MeshError, Result};

/// A polygon mesh with half-edge style adjacency.
///
/// # Example
///
/// ```
/// use loopmesh::prelude::*;
/// use nalgebra::Point3;
///
/// let mut mesh = Mesh::new();
/// let a = mesh.make_vertex(Point3::new(0.0, 0.0, 0.0)).unwrap();
/// let b = mesh.make_vertex(Point3::new(1.0, 0.0, 0.0)).unwrap();
/// let c = mesh.make_vertex(Point3::new(0.0, 1.0, 0.0)).unwrap();
/// let f = mesh.make_face(&[a, b, c]).unwrap();
///
/// assert_eq!(mesh.num_edges(), 3);
/// assert_eq!(mesh.num_loops(), 3);
/// assert!(mesh.face(f).no.z > 0.0);
/// ```
#[derive(Debug, Clone)]
pub struct Mesh {
    pub(crate) verts: ElementList<Vertex>,
    pub(crate) edges: ElementList<Edge>,
    pub(crate) loops: ElementList<Loop>,
    pub(crate) faces: ElementList<Face>,
    pub(crate) eidgen: EidGen,
    pub(crate) eid_map: HashMap<Eid, ElemRef>,
    pub(crate) features: MeshFeatures,
    pub(crate) recalc: RecalcFlags,
    pub(crate) update_gen: u64,
    pub(crate) topo_gen: u64,
    pub(crate) tess: Tessellation,
    pub(crate) bvh: Option<BvhCache>,
}

/// Handle remaps produced by [`Mesh::compact`].
#[derive(Debug, Clone)]
pub struct CompactRemap {
    /// Vertex remap.
    pub verts: Remap<VertId>,
    /// Edge remap.
    pub edges: Remap<EdgeId>,
    /// Loop remap.
    pub loops: Remap<LoopId>,
    /// Face remap.
    pub faces: Remap<FaceId>,
}

impl Default for Mesh {
    fn default() -> Self {
        Self::new()
    }
}

/// Allocate an eid for `elem`, store it, and register it in the eid map.
fn alloc<T: Element>(
    eidgen: &mut EidGen,
    eid_map: &mut HashMap<Eid, ElemRef>,
    list: &mut ElementList<T>,
    mut elem: T,
    custom_eid: Option<Eid>,
    wrap: fn(T::Id) -> ElemRef,
) -> Result<T::Id> {
    let eid = match custom_eid {
        Some(eid) => {
            if eid_map.contains_key(&eid) {
                return Err(MeshError::DuplicateEid(eid.get()));
            }
            eidgen.reserve(eid);
            eid
        }
        None => eidgen.next(),
    };
    elem.set_eid(eid);

    match list.push(elem) {
        Ok(h) => {
            eid_map.insert(eid, wrap(h));
            Ok(h)
        }
        Err(err) => {
            if custom_eid.is_none() {
                eidgen.free(eid);
            }
            Err(err)
        }
    }
}

/// Remove an element and return its eid to the generator.
fn release<T: Element>(
    eidgen: &mut EidGen,
    eid_map: &mut HashMap<Eid, ElemRef>,
    list: &mut ElementList<T>,
    h: T::Id,
) -> Result<T> {
    let elem = list.remove(h)?;
    eid_map.remove(&elem.eid());
    eidgen.free(elem.eid());
    Ok(elem)
}

impl Mesh {
    /// Create an empty mesh supporting every operation.
    pub fn new() -> Self {
        Self::with_features(MeshFeatures::BASIC)
    }

    /// Create an empty mesh restricted to `features`.
    pub fn with_features(features: MeshFeatures) -> Self {
        Self {
            verts: ElementList::new(),
            edges: ElementList::new(),
            loops: ElementList::new(),
            faces: ElementList::new(),
            eidgen: EidGen::new(),
            eid_map: HashMap::new(),
            features,
            recalc: RecalcFlags::all(),
            update_gen: 0,
            topo_gen: 0,
            tess: Tessellation::default(),
            bvh: None,
        }
    }

    pub(crate) fn require(&self, feature: MeshFeatures, op: &'static str) -> Result<()> {
        if self.features.contains(feature) {
            Ok(())
        } else {
            Err(MeshError::FeatureNotSupported(op))
        }
    }

    // ==================== Accessors ====================

    /// Operations this mesh permits.
    #[inline]
    pub fn features(&self) -> MeshFeatures {
        self.features
    }

    /// Number of live vertices.
    #[inline]
    pub fn num_verts(&self) -> usize {
        self.verts.len()
    }

    /// Number of live edges.
    #[inline]
    pub fn num_edges(&self) -> usize {
        self.edges.len()
    }

    /// Number of live loops.
    #[inline]
    pub fn num_loops(&self) -> usize {
        self.loops.len()
    }

    /// Number of live faces.
    #[inline]
    pub fn num_faces(&self) -> usize {
        self.faces.len()
    }

    /// Whether the mesh has no elements at all.
    pub fn is_empty(&self) -> bool {
        self.verts.is_empty() && self.edges.is_empty() && self.faces.is_empty()
    }

    /// Vertex list.
    #[inline]
    pub fn verts(&self) -> &ElementList<Vertex> {
        &self.verts
    }

    /// Mutable vertex list (selection, custom data, element fields).
    #[inline]
    pub fn verts_mut(&mut self) -> &mut ElementList<Vertex> {
        &mut self.verts
    }

    /// Edge list.
    #[inline]
    pub fn edges(&self) -> &ElementList<Edge> {
        &self.edges
    }

    /// Mutable edge list.
    #[inline]
    pub fn edges_mut(&mut self) -> &mut ElementList<Edge> {
        &mut self.edges
    }

    /// Loop list.
    #[inline]
    pub fn loops(&self) -> &ElementList<Loop> {
        &self.loops
    }

    /// Mutable loop list.
    #[inline]
    pub fn loops_mut(&mut self) -> &mut ElementList<Loop> {
        &mut self.loops
    }

    /// Face list.
    #[inline]
    pub fn faces(&self) -> &ElementList<Face> {
        &self.faces
    }

    /// Mutable face list.
    #[inline]
    pub fn faces_mut(&mut self) -> &mut ElementList<Face> {
        &mut self.faces
    }

    /// Get a vertex by handle. Panics if dead.
    #[inline]
    pub fn vert(&self, v: VertId) -> &Vertex {
        &self.verts[v]
    }

    /// Get a mutable vertex by handle. Panics if dead.
    #[inline]
    pub fn vert_mut(&mut self, v: VertId) -> &mut Vertex {
        &mut self.verts[v]
    }

    /// Get an edge by handle. Panics if dead.
    #[inline]
    pub fn edge(&self, e: EdgeId) -> &Edge {
        &self.edges[e]
    }

    /// Get a mutable edge by handle. Panics if dead.
    #[inline]
    pub fn edge_mut(&mut self, e: EdgeId) -> &mut Edge {
        &mut self.edges[e]
    }

    /// Get a loop by handle. Panics if dead.
    #[inline]
    pub fn lp(&self, l: LoopId) -> &Loop {
        &self.loops[l]
    }

    /// Get a mutable loop by handle. Panics if dead.
    #[inline]
    pub fn lp_mut(&mut self, l: LoopId) -> &mut Loop {
        &mut self.loops[l]
    }

    /// Get a face by handle. Panics if dead.
    #[inline]
    pub fn face(&self, f: FaceId) -> &Face {
        &self.faces[f]
    }

    /// Get a mutable face by handle. Panics if dead.
    #[inline]
    pub fn face_mut(&mut self, f: FaceId) -> &mut Face {
        &mut self.faces[f]
    }

    /// Position of a vertex.
    #[inline]
    pub fn co(&self, v: VertId) -> &Point3<f64> {
        &self.verts[v].co
    }

    // ==================== Identity ====================

    /// Map from eid to element handle.
    pub fn eid_map(&self) -> &HashMap<Eid, ElemRef> {
        &self.eid_map
    }

    /// Resolve an eid to a handle.
    #[inline]
    pub fn lookup(&self, eid: Eid) -> Option<ElemRef> {
        self.eid_map.get(&eid).copied()
    }

    /// The eid generator.
    pub fn eidgen(&self) -> &EidGen {
        &self.eidgen
    }

    /// Eid of any element.
    pub fn eid_of(&self, elem: ElemRef) -> Option<Eid> {
        match elem {
            ElemRef::Vertex(v) => self.verts.get(v).map(|e| e.eid),
            ElemRef::Edge(e) => self.edges.get(e).map(|e| e.eid),
            ElemRef::Loop(l) => self.loops.get(l).map(|e| e.eid),
            ElemRef::Face(f) => self.faces.get(f).map(|e| e.eid),
        }
    }

    // ==================== Topology Queries ====================

    /// Edge connecting `v1` and `v2`, found by scanning `v1`'s disk cycle.
    ///
    /// Multi-edges are not supported; the first match is the only one.
    pub fn get_edge(&self, v1: VertId, v2: VertId) -> Option<EdgeId> {
        let vert = self.verts.get(v1)?;
        vert.edges
            .iter()
            .copied()
            .find(|&e| self.edges.get(e).is_some_and(|edge| edge.connects(v1, v2)))
    }

    /// Endpoint of `e` that is not `v`.
    #[inline]
    pub fn other_vert(&self, e: EdgeId, v: VertId) -> VertId {
        self.edges[e].other_vert(v)
    }

    /// Number of incident edges.
    #[inline]
    pub fn valence(&self, v: VertId) -> usize {
        self.verts[v].edges.len()
    }

    /// Iterate over the edges incident to `v`.
    pub fn vert_edges(&self, v: VertId) -> impl Iterator<Item = EdgeId> + '_ {
        self.verts[v].edges.iter().copied()
    }

    /// Iterate over the vertices sharing an edge with `v`.
    pub fn vert_neighbors(&self, v: VertId) -> impl Iterator<Item = VertId> + '_ {
        self.vert_edges(v).map(move |e| self.edges[e].other_vert(v))
    }

    /// Iterate over the face corners at `v`.
    pub fn vert_loops(&self, v: VertId) -> impl Iterator<Item = LoopId> + '_ {
        self.vert_edges(v)
            .flat_map(move |e| self.edge_loops(e))
            .filter(move |&l| self.loops[l].v == v)
    }

    /// Faces using `v`, each once.
    pub fn vert_faces(&self, v: VertId) -> Vec<FaceId> {
        let mut faces = Vec::new();
        for l in self.vert_loops(v) {
            let f = self.loops[l].f;
            if !faces.contains(&f) {
                faces.push(f);
            }
        }
        faces
    }

    /// Iterate over the radial cycle of `e`.
    pub fn edge_loops(&self, e: EdgeId) -> RadialLoopIter<'_> {
        RadialLoopIter::new(&self.loops, self.edges[e].l)
    }

    /// Iterate over the faces using `e`.
    pub fn edge_faces(&self, e: EdgeId) -> impl Iterator<Item = FaceId> + '_ {
        self.edge_loops(e).map(move |l| self.loops[l].f)
    }

    /// Number of faces using `e`.
    pub fn edge_face_count(&self, e: EdgeId) -> usize {
        self.edge_loops(e).count()
    }

    /// Whether `e` has other than exactly two faces.
    pub fn is_boundary_edge(&self, e: EdgeId) -> bool {
        self.edge_face_count(e) != 2
    }

    /// Whether no face uses `e`.
    pub fn is_wire_edge(&self, e: EdgeId) -> bool {
        !self.edges[e].l.is_valid()
    }

    /// Iterate over one loop list.
    pub fn list_loops(&self, list: LoopList) -> ListLoopIter<'_> {
        ListLoopIter::new(&self.loops, list.l)
    }

    /// Iterate over the outer boundary of `f`.
    pub fn outer_loops(&self, f: FaceId) -> ListLoopIter<'_> {
        let start = self.faces[f].outer().map_or(LoopId::invalid(), |list| list.l);
        ListLoopIter::new(&self.loops, start)
    }

    /// Iterate over every loop of `f`, boundary first, then holes.
    pub fn face_loops(&self, f: FaceId) -> impl Iterator<Item = LoopId> + '_ {
        self.faces[f]
            .lists
            .iter()
            .flat_map(move |&list| self.list_loops(list))
    }

    /// Iterate over the vertices of `f`, boundary first, then holes.
    pub fn face_verts(&self, f: FaceId) -> impl Iterator<Item = VertId> + '_ {
        self.face_loops(f).map(move |l| self.loops[l].v)
    }

    /// Iterate over the edges of `f`, boundary first, then holes.
    pub fn face_edges(&self, f: FaceId) -> impl Iterator<Item = EdgeId> + '_ {
        self.face_loops(f).map(move |l| self.loops[l].e)
    }

    // ==================== Construction ====================

    /// Create a vertex at `co`. The vertex starts with UPDATE set.
    pub fn make_vertex(&mut self, co: Point3<f64>) -> Result<VertId> {
        self.make_vertex_with_eid(co, None)
    }

    /// Create a vertex with a caller-chosen eid, as used when loading.
    pub fn make_vertex_with_eid(&mut self, co: Point3<f64>, eid: Option<Eid>) -> Result<VertId> {
        self.require(MeshFeatures::MAKE_VERT, "make_vertex")?;

        let mut vert = Vertex::new(co);
        vert.flag = MeshFlags::UPDATE;
        let v = alloc(
            &mut self.eidgen,
            &mut self.eid_map,
            &mut self.verts,
            vert,
            eid,
            ElemRef::Vertex,
        )?;

        self.recalc |= RecalcFlags::RENDER;
        Ok(v)
    }

    /// Create an edge from `v1` to `v2`.
    ///
    /// With `check_existing`, an edge already connecting the two vertices is
    /// returned unchanged instead. Without it, such an edge is an error:
    /// two vertices share at most one edge.
    pub fn make_edge(&mut self, v1: VertId, v2: VertId, check_existing: bool) -> Result<EdgeId> {
        self.require(MeshFeatures::MAKE_EDGE, "make_edge")?;

        if v1 == v2 {
            return Err(MeshError::SameVertex(v1.index()));
        }
        self.verts.try_get(v1)?;
        self.verts.try_get(v2)?;

        if let Some(e) = self.get_edge(v1, v2) {
            if check_existing {
                return Ok(e);
            }
            return Err(MeshError::EdgeExists {
                v1: v1.index(),
                v2: v2.index(),
            });
        }

        let mut edge = Edge::new(v1, v2);
        edge.flag = MeshFlags::UPDATE;
        let e = alloc(
            &mut self.eidgen,
            &mut self.eid_map,
            &mut self.edges,
            edge,
            None,
            ElemRef::Edge,
        )?;

        self.verts[v1].edges.push(e);
        self.verts[v2].edges.push(e);
        self.mark_topology();
        Ok(e)
    }

    /// Return the edge between `v1` and `v2`, creating it if needed.
    pub fn ensure_edge(&mut self, v1: VertId, v2: VertId) -> Result<EdgeId> {
        self.make_edge(v1, v2, true)
    }

    /// Check a vertex cycle before it becomes a loop list.
    pub(crate) fn check_cycle(&self, verts: &[VertId]) -> Result<()> {
        if verts.len() < 3 {
            return Err(MeshError::TooFewVertices(verts.len()));
        }

        for (i, &v) in verts.iter().enumerate() {
            self.verts.try_get(v)?;
            if verts[..i].contains(&v) {
                return Err(MeshError::DuplicateVertex(v.index()));
            }
        }

        if !self.features.contains(MeshFeatures::GREATER_TWO_VALENCE) {
            for (i, &v) in verts.iter().enumerate() {
                let next = verts[(i + 1) % verts.len()];
                if let Some(e) = self.get_edge(v, next) {
                    if self.edge_face_count(e) >= 2 {
                        log::warn!("edge {:?} would gain a third face", e);
                        return Err(MeshError::NonManifold {
                            details: format!("edge {:?} already has two faces", e),
                        });
                    }
                }
            }
        }
        Ok(())
    }

    /// Create a face over `verts`, in order.
    ///
    /// Edges between consecutive vertices are reused when they exist. The
    /// input winding defines the normal sign.
    pub fn make_face(&mut self, verts: &[VertId]) -> Result<FaceId> {
        self.require(MeshFeatures::MAKE_FACE, "make_face")?;
        self.check_cycle(verts)?;

        let mut face = Face::new();
        face.flag = MeshFlags::UPDATE;
        let f = alloc(
            &mut self.eidgen,
            &mut self.eid_map,
            &mut self.faces,
            face,
            None,
            ElemRef::Face,
        )?;

        let list = self.link_loop_list(f, verts, 0)?;
        self.faces[f].lists.push(list);
        self.update_face_geometry(f);
        self.mark_topology();
        Ok(f)
    }

    /// Create a triangle.
    pub fn make_tri(&mut self, v1: VertId, v2: VertId, v3: VertId) -> Result<FaceId> {
        self.make_face(&[v1, v2, v3])
    }

    /// Create a quad.
    pub fn make_quad(&mut self, v1: VertId, v2: VertId, v3: VertId, v4: VertId) -> Result<FaceId> {
        self.make_face(&[v1, v2, v3, v4])
    }

    /// Build a closed loop cycle for face `f` over `verts` and insert each
    /// loop into its edge's radial cycle. `verts` must already be checked.
    pub(crate) fn link_loop_list(
        &mut self,
        f: FaceId,
        verts: &[VertId],
        list: usize,
    ) -> Result<LoopList> {
        let n = verts.len();
        let mut ls = Vec::with_capacity(n);

        for (i, &v) in verts.iter().enumerate() {
            let e = self.ensure_edge(v, verts[(i + 1) % n])?;
            let mut lp = Loop::new(v, e, f);
            lp.list = list;
            let l = self.alloc_loop(lp)?;
            ls.push(l);
        }

        for i in 0..n {
            let l = &mut self.loops[ls[i]];
            l.next = ls[(i + 1) % n];
            l.prev = ls[(i + n - 1) % n];
        }

        for &l in &ls {
            let e = self.loops[l].e;
            self.radial_insert(e, l);
        }

        Ok(LoopList { l: ls[0], length: n })
    }

    pub(crate) fn alloc_loop(&mut self, lp: Loop) -> Result<LoopId> {
        alloc(
            &mut self.eidgen,
            &mut self.eid_map,
            &mut self.loops,
            lp,
            None,
            ElemRef::Loop,
        )
    }

    pub(crate) fn alloc_face(&mut self, face: Face) -> Result<FaceId> {
        alloc(
            &mut self.eidgen,
            &mut self.eid_map,
            &mut self.faces,
            face,
            None,
            ElemRef::Face,
        )
    }

    pub(crate) fn free_loop(&mut self, l: LoopId) -> Result<Loop> {
        release(&mut self.eidgen, &mut self.eid_map, &mut self.loops, l)
    }

    // ==================== Radial / Disk Cycles ====================

    /// Insert `l` into the radial cycle of `e`, after `e.l`.
    pub(crate) fn radial_insert(&mut self, e: EdgeId, l: LoopId) {
        let first = self.edges[e].l;

        if !first.is_valid() {
            self.edges[e].l = l;
            let lp = &mut self.loops[l];
            lp.radial_next = l;
            lp.radial_prev = l;
            return;
        }

        let next = self.loops[first].radial_next;
        {
            let lp = &mut self.loops[l];
            lp.radial_prev = first;
            lp.radial_next = next;
        }
        self.loops[next].radial_prev = l;
        self.loops[first].radial_next = l;
    }

    /// Unlink `l` from the radial cycle of `e`.
    pub(crate) fn radial_remove(&mut self, e: EdgeId, l: LoopId) {
        let (prev, next) = {
            let lp = &self.loops[l];
            (lp.radial_prev, lp.radial_next)
        };

        if self.edges[e].l == l {
            self.edges[e].l = if next == l { LoopId::invalid() } else { next };
        }

        if next.is_valid() && prev.is_valid() {
            self.loops[prev].radial_next = next;
            self.loops[next].radial_prev = prev;
        }

        let lp = &mut self.loops[l];
        lp.radial_next = l;
        lp.radial_prev = l;
    }

    /// Move `l` from its edge's radial cycle to `new_e`'s.
    pub fn replace_loop_edge(&mut self, l: LoopId, new_e: EdgeId) -> Result<()> {
        let old = self.loops.try_get(l)?.e;
        self.edges.try_get(new_e)?;

        self.radial_remove(old, l);
        self.radial_insert(new_e, l);
        self.loops[l].e = new_e;
        self.mark_topology();
        Ok(())
    }

    pub(crate) fn disk_remove(&mut self, v: VertId, e: EdgeId) {
        if let Some(vert) = self.verts.get_mut(v) {
            vert.edges.retain(|x| *x != e);
        }
    }

    pub(crate) fn disk_insert(&mut self, v: VertId, e: EdgeId) {
        let vert = &mut self.verts[v];
        if !vert.edges.contains(&e) {
            vert.edges.push(e);
        }
    }

    // ==================== Destruction ====================

    /// Kill `v`, first killing its edges and their faces.
    pub fn kill_vertex(&mut self, v: VertId) -> Result<()> {
        self.require(MeshFeatures::KILL_VERT, "kill_vertex")?;
        self.verts.try_get(v)?;

        while let Some(&e) = self.verts[v].edges.first() {
            self.kill_edge(e)?;
        }

        release(&mut self.eidgen, &mut self.eid_map, &mut self.verts, v)?;
        self.recalc |= RecalcFlags::RENDER;
        Ok(())
    }

    /// Kill `e`, first killing every face that uses it.
    pub fn kill_edge(&mut self, e: EdgeId) -> Result<()> {
        self.require(MeshFeatures::KILL_EDGE, "kill_edge")?;
        self.edges.try_get(e)?;

        loop {
            let l = self.edges[e].l;
            if !l.is_valid() {
                break;
            }
            let f = self.loops[l].f;
            self.kill_face(f)?;
        }

        let edge = release(&mut self.eidgen, &mut self.eid_map, &mut self.edges, e)?;
        self.disk_remove(edge.v1, e);
        self.disk_remove(edge.v2, e);
        self.mark_topology();
        Ok(())
    }

    /// Kill `f` and its loops. Edges and vertices survive.
    pub fn kill_face(&mut self, f: FaceId) -> Result<()> {
        self.require(MeshFeatures::KILL_FACE, "kill_face")?;
        let lists = self.faces.try_get(f)?.lists.clone();

        for list in lists {
            self.kill_loop_list(list)?;
        }

        release(&mut self.eidgen, &mut self.eid_map, &mut self.faces, f)?;
        self.mark_topology();
        Ok(())
    }

    /// Radially unlink and free every loop of `list`.
    pub(crate) fn kill_loop_list(&mut self, list: LoopList) -> Result<()> {
        let ls: Vec<LoopId> = self.list_loops(list).collect();
        for l in ls {
            let e = self.loops[l].e;
            if let Some((v1, v2)) = self.edges.get(e).map(|edge| (edge.v1, edge.v2)) {
                self.flag_vert_update(v1);
                self.flag_vert_update(v2);
                self.radial_remove(e, l);
            }
            self.free_loop(l)?;
        }
        Ok(())
    }

    fn flag_vert_update(&mut self, v: VertId) {
        if let Some(vert) = self.verts.get_mut(v) {
            vert.flag.insert(MeshFlags::UPDATE);
        }
    }

    // ==================== Derived Data ====================

    /// Flags marking stale derived data.
    #[inline]
    pub fn recalc_flags(&self) -> RecalcFlags {
        self.recalc
    }

    pub(crate) fn mark_topology(&mut self) {
        self.recalc |= RecalcFlags::TESSELATE | RecalcFlags::RENDER | RecalcFlags::NORMALS;
        self.topo_gen = self.topo_gen.wrapping_add(1);
    }

    /// Counter bumped by every topology change.
    #[inline]
    pub fn topology_gen(&self) -> u64 {
        self.topo_gen
    }

    /// Mark render buffers stale.
    pub fn regen_render(&mut self) {
        self.recalc |= RecalcFlags::RENDER | RecalcFlags::ELEMENTS;
    }

    /// Mark the triangle cache stale.
    pub fn regen_tessellation(&mut self) {
        self.recalc |= RecalcFlags::TESSELATE | RecalcFlags::RENDER;
    }

    /// Mark normals stale.
    pub fn regen_normals(&mut self) {
        self.recalc |= RecalcFlags::NORMALS | RecalcFlags::RENDER;
    }

    /// Drop the cached BVH; the next [`Mesh::get_bvh`] rebuilds it.
    pub fn regen_bvh(&mut self) {
        self.bvh = None;
        self.recalc |= RecalcFlags::BVH;
    }

    /// Mark everything stale.
    pub fn regen_all(&mut self) {
        self.regen_bvh();
        self.recalc = RecalcFlags::all();
    }

    /// Mark only UPDATE-flagged elements as changed.
    pub fn regen_partial(&mut self) {
        self.recalc |= RecalcFlags::PARTIAL | RecalcFlags::RENDER;
    }

    /// Tell dependents that derived outputs of this mesh are stale.
    pub fn graph_update(&mut self) {
        self.update_gen = self.update_gen.wrapping_add(1);
    }

    /// Counter bumped by [`Mesh::graph_update`].
    #[inline]
    pub fn update_gen(&self) -> u64 {
        self.update_gen
    }

    // ==================== Compaction ====================

    /// Pack all element lists and rewrite adjacency to the new slots.
    ///
    /// Every handle held outside the mesh is invalidated; map them through
    /// the returned [`CompactRemap`]. Eids are unchanged.
    pub fn compact(&mut self) -> CompactRemap {
        let remap = CompactRemap {
            verts: self.verts.compact(),
            edges: self.edges.compact(),
            loops: self.loops.compact(),
            faces: self.faces.compact(),
        };

        let ve = |h: VertId| remap.verts.get(h).unwrap_or_default();
        let ee = |h: EdgeId| remap.edges.get(h).unwrap_or_default();
        let le = |h: LoopId| remap.loops.get(h).unwrap_or_default();
        let fe = |h: FaceId| remap.faces.get(h).unwrap_or_default();

        for (_, v) in self.verts.iter_mut() {
            for e in v.edges.iter_mut() {
                *e = ee(*e);
            }
        }
        for (_, e) in self.edges.iter_mut() {
            e.v1 = ve(e.v1);
            e.v2 = ve(e.v2);
            if e.l.is_valid() {
                e.l = le(e.l);
            }
        }
        for (_, l) in self.loops.iter_mut() {
            l.v = ve(l.v);
            l.e = ee(l.e);
            l.f = fe(l.f);
            l.next = le(l.next);
            l.prev = le(l.prev);
            l.radial_next = le(l.radial_next);
            l.radial_prev = le(l.radial_prev);
        }
        for (_, f) in self.faces.iter_mut() {
            for list in f.lists.iter_mut() {
                list.l = le(list.l);
            }
        }

        self.rebuild_eid_map();
        self.tess = Tessellation::default();
        self.mark_topology();
        self.regen_all();
        remap
    }

    /// Renumber every eid densely from 1, in list order.
    pub fn compact_eids(&mut self) {
        self.eidgen.reset();
        let gen = &mut self.eidgen;
        self.verts.reassign_eids(|| gen.next());
        self.edges.reassign_eids(|| gen.next());
        self.loops.reassign_eids(|| gen.next());
        self.faces.reassign_eids(|| gen.next());
        self.rebuild_eid_map();
        self.regen_bvh();
    }

    pub(crate) fn rebuild_eid_map(&mut self) {
        let mut map = HashMap::with_capacity(
            self.verts.len() + self.edges.len() + self.loops.len() + self.faces.len(),
        );
        map.extend(self.verts.iter().map(|(h, e)| (e.eid, ElemRef::Vertex(h))));
        map.extend(self.edges.iter().map(|(h, e)| (e.eid, ElemRef::Edge(h))));
        map.extend(self.loops.iter().map(|(h, e)| (e.eid, ElemRef::Loop(h))));
        map.extend(self.faces.iter().map(|(h, e)| (e.eid, ElemRef::Face(h))));
        self.eid_map = map;
    }

    /// Check that `elem` is live.
    pub fn is_live(&self, elem: ElemRef) -> bool {
        match elem {
            ElemRef::Vertex(v) => self.verts.contains(v),
            ElemRef::Edge(e) => self.edges.contains(e),
            ElemRef::Loop(l) => self.loops.contains(l),
            ElemRef::Face(f) => self.faces.contains(f),
        }
    }

    /// Error for a dead handle of any kind.
    pub(crate) fn dead_ref(elem: ElemRef) -> MeshError {
        match elem {
            ElemRef::Vertex(v) => dead::<Vertex>(v),
            ElemRef::Edge(e) => dead::<Edge>(e),
            ElemRef::Loop(l) => dead::<Loop>(l),
            ElemRef::Face(f) => dead::<Face>(f),
        }
    }

    /// Element type bit of `elem`.
    pub fn elem_type(elem: ElemRef) -> ElemTypes {
        match elem {
            ElemRef::Vertex(_) => ElemTypes::VERTEX,
            ElemRef::Edge(_) => ElemTypes::EDGE,
            ElemRef::Loop(_) => ElemTypes::LOOP,
            ElemRef::Face(_) => ElemTypes::FACE,
        }
    }
}

/// Iterator over one loop list, following `next`.
pub struct ListLoopIter<'a> {
    loops: &'a ElementList<Loop>,
    start: LoopId,
    current: LoopId,
    remaining: usize,
    done: bool,
}

impl<'a> ListLoopIter<'a> {
    fn new(loops: &'a ElementList<Loop>, start: LoopId) -> Self {
        Self {
            loops,
            start,
            current: start,
            remaining: loops.num_slots(),
            done: !loops.contains(start),
        }
    }
}

impl Iterator for ListLoopIter<'_> {
    type Item = LoopId;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        let result = self.current;
        self.remaining = self.remaining.saturating_sub(1);

        match self.loops.get(self.current) {
            Some(l) if l.next != self.start && self.remaining > 0 => self.current = l.next,
            _ => self.done = true,
        }

        Some(result)
    }
}

/// Iterator over a radial cycle, following `radial_next`.
pub struct RadialLoopIter<'a> {
    loops: &'a ElementList<Loop>,
    start: LoopId,
    current: LoopId,
    remaining: usize,
    done: bool,
}

impl<'a> RadialLoopIter<'a> {
    fn new(loops: &'a ElementList<Loop>, start: LoopId) -> Self {
        Self {
            loops,
            start,
            current: start,
            remaining: loops.num_slots(),
            done: !start.is_valid() || !loops.contains(start),
        }
    }
}

impl Iterator for RadialLoopIter<'_> {
    type Item = LoopId;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        let result = self.current;
        self.remaining = self.remaining.saturating_sub(1);

        match self.loops.get(self.current) {
            Some(l) if l.radial_next != self.start && self.remaining > 0 => {
                self.current = l.radial_next
            }
            _ => self.done = true,
        }

        Some(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn triangle() -> (Mesh, [VertId; 3], FaceId) {
        let mut mesh = Mesh::new();
        let a = mesh.make_vertex(Point3::new(0.0, 0.0, 0.0)).unwrap();
        let b = mesh.make_vertex(Point3::new(1.0, 0.0, 0.0)).unwrap();
        let c = mesh.make_vertex(Point3::new(0.0, 1.0, 0.0)).unwrap();
        let f = mesh.make_face(&[a, b, c]).unwrap();
        (mesh, [a, b, c], f)
    }

    #[test]
    fn test_empty_mesh() {
        let mesh = Mesh::new();
        assert!(mesh.is_empty());
        assert_eq!(mesh.num_loops(), 0);
        assert!(mesh.validate().is_ok());
    }

    #[test]
    fn test_make_vertex_sets_update() {
        let mut mesh = Mesh::new();
        let v = mesh.make_vertex(Point3::new(1.0, 2.0, 3.0)).unwrap();
        assert!(mesh.vert(v).flag.contains(MeshFlags::UPDATE));
        assert_eq!(mesh.vert(v).eid, Eid(1));
        assert_eq!(mesh.lookup(Eid(1)), Some(ElemRef::Vertex(v)));
    }

    #[test]
    fn test_make_edge_dedup() {
        let mut mesh = Mesh::new();
        let a = mesh.make_vertex(Point3::origin()).unwrap();
        let b = mesh.make_vertex(Point3::new(1.0, 0.0, 0.0)).unwrap();

        let e1 = mesh.make_edge(a, b, true).unwrap();
        let e2 = mesh.make_edge(a, b, true).unwrap();
        let e3 = mesh.make_edge(b, a, true).unwrap();
        assert_eq!(e1, e2);
        assert_eq!(e1, e3);
        assert_eq!(mesh.num_edges(), 1);
        assert_eq!(mesh.valence(a), 1);

        assert_eq!(mesh.make_edge(a, a, true), Err(MeshError::SameVertex(a.index())));
    }

    #[test]
    fn test_make_edge_rejects_parallel_edge() {
        let mut mesh = Mesh::new();
        let a = mesh.make_vertex(Point3::origin()).unwrap();
        let b = mesh.make_vertex(Point3::new(1.0, 0.0, 0.0)).unwrap();
        let e = mesh.make_edge(a, b, true).unwrap();

        let err = mesh.make_edge(b, a, false).unwrap_err();
        assert_eq!(err, MeshError::EdgeExists { v1: b.index(), v2: a.index() });
        assert_eq!(err.severity(), crate::error::Severity::Programming);
        assert_eq!(mesh.num_edges(), 1);
        assert_eq!(mesh.get_edge(a, b), Some(e));
        assert!(mesh.validate().is_ok());
    }

    #[test]
    fn test_make_face_shares_edges() {
        let mut mesh = Mesh::new();
        let vs: Vec<VertId> = [(0.0, 0.0), (1.0, 0.0), (1.0, 1.0), (0.0, 1.0)]
            .iter()
            .map(|&(x, y)| mesh.make_vertex(Point3::new(x, y, 0.0)).unwrap())
            .collect();

        mesh.make_face(&[vs[0], vs[1], vs[2]]).unwrap();
        mesh.make_face(&[vs[0], vs[2], vs[3]]).unwrap();

        assert_eq!(mesh.num_edges(), 5);
        let diag = mesh.get_edge(vs[0], vs[2]).unwrap();
        assert_eq!(mesh.edge_face_count(diag), 2);
        assert!(!mesh.is_boundary_edge(diag));
        assert!(mesh.validate().is_ok());
    }

    #[test]
    fn test_make_face_rejects_bad_input() {
        let (mut mesh, [a, b, _], _) = triangle();
        assert_eq!(mesh.make_face(&[a, b]), Err(MeshError::TooFewVertices(2)));
        assert_eq!(
            mesh.make_face(&[a, b, a]),
            Err(MeshError::DuplicateVertex(a.index()))
        );
    }

    #[test]
    fn test_face_cycle_closure() {
        let (mesh, verts, f) = triangle();
        let ls: Vec<LoopId> = mesh.face_loops(f).collect();
        assert_eq!(ls.len(), 3);

        for (i, &l) in ls.iter().enumerate() {
            let lp = mesh.lp(l);
            assert_eq!(lp.v, verts[i]);
            assert_eq!(mesh.lp(lp.next).prev, l);
            assert_eq!(lp.radial_next, l);
        }
    }

    #[test]
    fn test_radial_cycle_three_faces() {
        let mut mesh = Mesh::new();
        let a = mesh.make_vertex(Point3::new(0.0, 0.0, 0.0)).unwrap();
        let b = mesh.make_vertex(Point3::new(1.0, 0.0, 0.0)).unwrap();
        let fins: Vec<VertId> = (0..3)
            .map(|i| {
                let t = i as f64;
                mesh.make_vertex(Point3::new(0.5, t.cos(), t.sin())).unwrap()
            })
            .collect();

        for &c in &fins {
            mesh.make_face(&[a, b, c]).unwrap();
        }

        let e = mesh.get_edge(a, b).unwrap();
        let ls: Vec<LoopId> = mesh.edge_loops(e).collect();
        assert_eq!(ls.len(), 3);
        for &l in &ls {
            assert_eq!(mesh.lp(l).e, e);
        }
        assert!(mesh.validate().is_ok());
    }

    #[test]
    fn test_non_manifold_rejected_without_feature() {
        let mut mesh = Mesh::with_features(MeshFeatures::BASIC - MeshFeatures::GREATER_TWO_VALENCE);
        let a = mesh.make_vertex(Point3::new(0.0, 0.0, 0.0)).unwrap();
        let b = mesh.make_vertex(Point3::new(1.0, 0.0, 0.0)).unwrap();
        let c = mesh.make_vertex(Point3::new(0.0, 1.0, 0.0)).unwrap();
        let d = mesh.make_vertex(Point3::new(0.0, -1.0, 0.0)).unwrap();
        let e = mesh.make_vertex(Point3::new(0.0, 0.0, 1.0)).unwrap();

        mesh.make_face(&[a, b, c]).unwrap();
        mesh.make_face(&[b, a, d]).unwrap();
        assert!(matches!(
            mesh.make_face(&[a, b, e]),
            Err(MeshError::NonManifold { .. })
        ));
    }

    #[test]
    fn test_kill_cascade() {
        let (mut mesh, verts, f) = triangle();
        assert_eq!(
            (mesh.num_verts(), mesh.num_edges(), mesh.num_faces(), mesh.num_loops()),
            (3, 3, 1, 3)
        );

        mesh.kill_face(f).unwrap();
        assert_eq!((mesh.num_verts(), mesh.num_edges()), (3, 3));
        assert_eq!((mesh.num_faces(), mesh.num_loops()), (0, 0));

        let edges: Vec<EdgeId> = mesh.edges().handles().collect();
        for e in edges {
            assert!(mesh.is_wire_edge(e));
            mesh.kill_edge(e).unwrap();
        }
        assert_eq!(mesh.num_edges(), 0);
        assert_eq!(mesh.num_verts(), 3);
        for &v in &verts {
            assert_eq!(mesh.valence(v), 0);
        }

        for v in verts {
            mesh.kill_vertex(v).unwrap();
        }
        assert!(mesh.is_empty());
        assert!(mesh.eid_map().is_empty());
        assert!(mesh.validate().is_ok());
    }

    #[test]
    fn test_kill_vertex_cascades() {
        let (mut mesh, [a, ..], _) = triangle();
        mesh.kill_vertex(a).unwrap();
        assert_eq!(mesh.num_verts(), 2);
        assert_eq!(mesh.num_edges(), 1);
        assert_eq!(mesh.num_faces(), 0);
        assert_eq!(mesh.num_loops(), 0);
        assert!(mesh.validate().is_ok());
    }

    #[test]
    fn test_kill_dead_element() {
        let (mut mesh, _, f) = triangle();
        mesh.kill_face(f).unwrap();
        assert!(matches!(
            mesh.kill_face(f),
            Err(MeshError::DeadElement { kind: "face", .. })
        ));
    }

    #[test]
    fn test_features_gate_operations() {
        let mut mesh = Mesh::with_features(MeshFeatures::MAKE_VERT);
        let a = mesh.make_vertex(Point3::origin()).unwrap();
        let b = mesh.make_vertex(Point3::new(1.0, 0.0, 0.0)).unwrap();
        assert_eq!(
            mesh.make_edge(a, b, true),
            Err(MeshError::FeatureNotSupported("make_edge"))
        );
        assert!(mesh.kill_vertex(a).is_err());
    }

    #[test]
    fn test_eids_recycled_not_duplicated() {
        let (mut mesh, _, f) = triangle();
        let face_eid = mesh.face(f).eid;
        mesh.kill_face(f).unwrap();

        let v = mesh.make_vertex(Point3::origin()).unwrap();
        let reused = mesh.vert(v).eid;
        assert!(reused.get() < mesh.eidgen().cur());
        assert_ne!(reused, Eid::NONE);

        let live: Vec<Eid> = mesh.eid_map().keys().copied().collect();
        let mut sorted = live.clone();
        sorted.sort();
        sorted.dedup();
        assert_eq!(sorted.len(), live.len());
        let _ = face_eid;
    }

    #[test]
    fn test_custom_eid_must_be_unused_mesh_wide() {
        let (mut mesh, _, f) = triangle();
        let e = mesh.face_edges(f).next().unwrap();
        let taken = mesh.edge(e).eid;
        let verts_before = mesh.num_verts();

        let err = mesh
            .make_vertex_with_eid(Point3::new(4.0, 4.0, 0.0), Some(taken))
            .unwrap_err();
        assert_eq!(err, MeshError::DuplicateEid(taken.get()));
        assert_eq!(mesh.num_verts(), verts_before);
        assert_eq!(mesh.lookup(taken), Some(ElemRef::Edge(e)));
        assert!(mesh.validate().is_ok());

        let fresh = Eid(mesh.eidgen().cur() + 10);
        let v = mesh
            .make_vertex_with_eid(Point3::new(4.0, 4.0, 0.0), Some(fresh))
            .unwrap();
        assert_eq!(mesh.lookup(fresh), Some(ElemRef::Vertex(v)));
    }

    #[test]
    fn test_compact_preserves_eids_and_topology() {
        let mut mesh = Mesh::new();
        let junk = mesh.make_vertex(Point3::new(5.0, 5.0, 5.0)).unwrap();
        let a = mesh.make_vertex(Point3::new(0.0, 0.0, 0.0)).unwrap();
        let b = mesh.make_vertex(Point3::new(1.0, 0.0, 0.0)).unwrap();
        let c = mesh.make_vertex(Point3::new(0.0, 1.0, 0.0)).unwrap();
        let f = mesh.make_face(&[a, b, c]).unwrap();
        mesh.kill_vertex(junk).unwrap();

        let eids: Vec<Eid> = [a, b, c].iter().map(|&v| mesh.vert(v).eid).collect();
        let face_eid = mesh.face(f).eid;

        let remap = mesh.compact();
        for (old, eid) in [a, b, c].into_iter().zip(eids) {
            let new = remap.verts.get(old).unwrap();
            assert_eq!(mesh.vert(new).eid, eid);
            assert_eq!(mesh.vert(new).index, new.index());
            assert_eq!(mesh.lookup(eid), Some(ElemRef::Vertex(new)));
        }

        let nf = remap.faces.get(f).unwrap();
        assert_eq!(mesh.face(nf).eid, face_eid);
        assert_eq!(mesh.face_verts(nf).count(), 3);
        assert!(mesh.validate().is_ok());
    }

    #[test]
    fn test_compact_eids() {
        let (mut mesh, _, f) = triangle();
        mesh.kill_face(f).unwrap();
        mesh.compact_eids();

        let mut eids: Vec<u64> = mesh.eid_map().keys().map(|e| e.get()).collect();
        eids.sort();
        assert_eq!(eids, (1..=6).collect::<Vec<_>>());
        assert_eq!(mesh.eidgen().cur(), 7);
        assert!(mesh.validate().is_ok());
    }

    #[test]
    fn test_replace_loop_edge() {
        let (mut mesh, [a, b, _], f) = triangle();
        let l = mesh.outer_loops(f).next().unwrap();
        let old = mesh.lp(l).e;
        let spare = mesh.make_vertex(Point3::new(3.0, 3.0, 0.0)).unwrap();
        let other = mesh.make_edge(a, spare, true).unwrap();

        mesh.replace_loop_edge(l, other).unwrap();
        assert!(mesh.is_wire_edge(old));
        assert_eq!(mesh.edge(other).l, l);
        let _ = b;
    }

    #[test]
    fn test_graph_update_counter() {
        let mut mesh = Mesh::new();
        mesh.graph_update();
        mesh.graph_update();
        assert_eq!(mesh.update_gen(), 2);
    }
}
