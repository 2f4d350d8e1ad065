//! Selection flushing and flag propagation.

use super::flags::{ElemTypes, MeshFlags};
use super::halfedge::Mesh;
use super::index::{EdgeId, ElemRef, FaceId, VertId};
use crate::error::Result;

impl Mesh {
    /// Select or deselect any element.
    pub fn set_select(&mut self, elem: ElemRef, state: bool) -> Result<()> {
        match elem {
            ElemRef::Vertex(v) => self.verts.set_select(v, state),
            ElemRef::Edge(e) => self.edges.set_select(e, state),
            ElemRef::Loop(l) => self.loops.set_select(l, state),
            ElemRef::Face(f) => self.faces.set_select(f, state),
        }
    }

    /// Whether an element is selected. Dead elements are not.
    pub fn is_selected(&self, elem: ElemRef) -> bool {
        match elem {
            ElemRef::Vertex(v) => self.verts.is_selected(v),
            ElemRef::Edge(e) => self.edges.is_selected(e),
            ElemRef::Loop(l) => self.loops.is_selected(l),
            ElemRef::Face(f) => self.faces.is_selected(f),
        }
    }

    /// Select every visible element of the masked types.
    pub fn select_all(&mut self, mask: ElemTypes) {
        if mask.contains(ElemTypes::VERTEX) {
            self.verts.select_all();
        }
        if mask.contains(ElemTypes::EDGE) {
            self.edges.select_all();
        }
        if mask.contains(ElemTypes::FACE) {
            self.faces.select_all();
        }
    }

    /// Deselect every element of the masked types.
    pub fn select_none(&mut self, mask: ElemTypes) {
        if mask.contains(ElemTypes::VERTEX) {
            self.verts.select_none();
        }
        if mask.contains(ElemTypes::EDGE) {
            self.edges.select_none();
        }
        if mask.contains(ElemTypes::FACE) {
            self.faces.select_none();
        }
    }

    /// Make selection consistent across element types.
    ///
    /// - `VERTEX`: an edge is selected iff both its vertices are, a face iff
    ///   all its vertices are. Hidden edges and faces are left alone.
    /// - `EDGE`: the vertices of selected edges are selected, and faces all
    ///   of whose edges are selected.
    /// - `FACE`: the vertices and edges of selected faces are selected.
    ///
    /// Only the first matching mode in that order applies. Running the flush
    /// twice leaves the selection unchanged.
    pub fn select_flush(&mut self, mode: ElemTypes) -> Result<()> {
        if mode.contains(ElemTypes::VERTEX) {
            self.flush_from_verts()
        } else if mode.contains(ElemTypes::EDGE) {
            self.flush_from_edges()
        } else if mode.contains(ElemTypes::FACE) {
            self.flush_from_faces()
        } else {
            Ok(())
        }
    }

    fn flush_from_verts(&mut self) -> Result<()> {
        let edges: Vec<EdgeId> = self.edges.handles().collect();

        for e in edges {
            let edge = &self.edges[e];
            if edge.flag.contains(MeshFlags::HIDE) {
                continue;
            }
            let state = self.verts.is_selected(edge.v1) && self.verts.is_selected(edge.v2);
            self.edges.set_select(e, state)?;
        }

        let stale = self
            .edges
            .active()
            .map_or(true, |e| !self.edges.is_selected(e));
        if stale {
            let first = self.edges.selected().next();
            if first.is_some() {
                self.edges.set_active(first)?;
            }
        }

        // Faces follow their vertices, even across hidden edges.
        let faces: Vec<FaceId> = self.faces.handles().collect();
        for f in faces {
            if self.faces[f].flag.contains(MeshFlags::HIDE) {
                continue;
            }
            let state = self.face_verts(f).all(|v| self.verts.is_selected(v));
            self.faces.set_select(f, state)?;
        }
        Ok(())
    }

    fn flush_from_edges(&mut self) -> Result<()> {
        let selected: Vec<EdgeId> = self.edges.selected().collect();

        let mut verts: Vec<VertId> = Vec::with_capacity(selected.len() * 2);
        for &e in &selected {
            let edge = &self.edges[e];
            verts.push(edge.v1);
            verts.push(edge.v2);
        }
        self.flush_verts_to(&verts)?;

        let mut faces: Vec<FaceId> = Vec::new();
        for &e in &selected {
            for f in self.edge_faces(e) {
                if !faces.contains(&f) {
                    faces.push(f);
                }
            }
        }
        self.flush_faces_from_edges(Some(&faces))
    }

    fn flush_from_faces(&mut self) -> Result<()> {
        let selected: Vec<FaceId> = self.faces.selected().collect();

        let mut verts = Vec::new();
        let mut edges = Vec::new();
        for &f in &selected {
            for l in self.face_loops(f) {
                let lp = &self.loops[l];
                verts.push(lp.v);
                edges.push(lp.e);
            }
        }

        self.flush_verts_to(&verts)?;

        let stale: Vec<EdgeId> = self
            .edges
            .selected()
            .filter(|e| !edges.contains(e))
            .collect();
        for e in stale {
            self.edges.set_select(e, false)?;
        }
        for e in edges {
            self.edges.set_select(e, true)?;
        }

        Ok(())
    }

    /// Select exactly `verts` among the vertices.
    fn flush_verts_to(&mut self, verts: &[VertId]) -> Result<()> {
        let deselect: Vec<VertId> = self
            .verts
            .selected()
            .filter(|v| !verts.contains(v))
            .collect();
        for v in deselect {
            self.verts.set_select(v, false)?;
        }
        for &v in verts {
            self.verts.set_select(v, true)?;
        }
        Ok(())
    }

    /// Select a face iff all of its edges are selected. With `only`, faces
    /// outside it are deselected.
    fn flush_faces_from_edges(&mut self, only: Option<&[FaceId]>) -> Result<()> {
        let faces: Vec<FaceId> = self.faces.handles().collect();
        for f in faces {
            if self.faces[f].flag.contains(MeshFlags::HIDE) {
                continue;
            }

            let state = match only {
                Some(set) if !set.contains(&f) => false,
                _ => self.face_edges(f).all(|e| self.edges.is_selected(e)),
            };
            self.faces.set_select(f, state)?;
        }
        Ok(())
    }

    // ==================== Update Flags ====================

    /// Propagate UPDATE from edges and faces to their vertices.
    pub fn flush_update_flags(&mut self, mask: ElemTypes) {
        let mut touched: Vec<VertId> = Vec::new();

        if mask.contains(ElemTypes::EDGE) {
            for (_, e) in self.edges.iter() {
                if e.flag.contains(MeshFlags::UPDATE) {
                    touched.push(e.v1);
                    touched.push(e.v2);
                }
            }
        }

        if mask.contains(ElemTypes::FACE) {
            for (f, face) in self.faces.iter() {
                if face.flag.contains(MeshFlags::UPDATE) {
                    touched.extend(self.face_verts(f));
                }
            }
        }

        for v in touched {
            self.verts[v].flag.insert(MeshFlags::UPDATE);
        }
    }

    /// Clear UPDATE on the masked element types.
    pub fn clear_update_flags(&mut self, mask: ElemTypes) {
        if mask.contains(ElemTypes::VERTEX) {
            for (_, v) in self.verts.iter_mut() {
                v.flag.remove(MeshFlags::UPDATE);
            }
        }
        if mask.contains(ElemTypes::EDGE) {
            for (_, e) in self.edges.iter_mut() {
                e.flag.remove(MeshFlags::UPDATE);
            }
        }
        if mask.contains(ElemTypes::LOOP) {
            for (_, l) in self.loops.iter_mut() {
                l.flag.remove(MeshFlags::UPDATE);
            }
        }
        if mask.contains(ElemTypes::FACE) {
            for (_, f) in self.faces.iter_mut() {
                f.flag.remove(MeshFlags::UPDATE);
            }
        }
    }

    /// Set BOUNDARY on edges with fewer than two faces and on their
    /// vertices; clear it everywhere else.
    pub fn update_boundary_flags(&mut self) {
        for (_, v) in self.verts.iter_mut() {
            v.flag.remove(MeshFlags::BOUNDARY);
        }

        let edges: Vec<EdgeId> = self.edges.handles().collect();
        for e in edges {
            let boundary = self.edge_face_count(e) < 2;
            let edge = &mut self.edges[e];
            edge.flag.set(MeshFlags::BOUNDARY, boundary);
            if boundary {
                let (v1, v2) = (edge.v1, edge.v2);
                self.verts[v1].flag.insert(MeshFlags::BOUNDARY);
                self.verts[v2].flag.insert(MeshFlags::BOUNDARY);
            }
        }
    }
}
