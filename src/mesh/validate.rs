//! Structural integrity checks.

use super::element::Element;
use super::element_list::ElementList;
use super::halfedge::Mesh;
use super::index::{ElemRef, Handle};
use crate::error::{MeshError, Result};

fn broken(msg: String) -> MeshError {
    log::warn!("mesh integrity: {}", msg);
    MeshError::Integrity(msg)
}

impl Mesh {
    /// Check every structural invariant of the mesh.
    ///
    /// Reports the first violation found as [`MeshError::Integrity`]:
    /// loop cycle closure, disk and radial membership, custom data lengths,
    /// eid map agreement, and selection state liveness.
    pub fn validate(&self) -> Result<()> {
        self.validate_faces()?;
        self.validate_edges()?;
        self.validate_verts()?;
        self.validate_loops()?;
        self.validate_custom_data()?;
        self.validate_eids()?;
        validate_selection(&self.verts)?;
        validate_selection(&self.edges)?;
        validate_selection(&self.loops)?;
        validate_selection(&self.faces)?;
        Ok(())
    }

    fn validate_faces(&self) -> Result<()> {
        for (f, face) in self.faces.iter() {
            if face.lists.is_empty() {
                return Err(broken(format!("{:?} has no loop lists", f)));
            }

            for (li, list) in face.lists.iter().enumerate() {
                let mut l = list.l;
                for _ in 0..list.length {
                    let lp = self
                        .loops
                        .get(l)
                        .ok_or_else(|| broken(format!("{:?} references dead {:?}", f, l)))?;

                    if lp.f != f || lp.list != li {
                        return Err(broken(format!("{:?} is not owned by {:?} list {}", l, f, li)));
                    }
                    if self.loops.get(lp.next).map(|n| n.prev) != Some(l) {
                        return Err(broken(format!("{:?}.next.prev is not {:?}", l, l)));
                    }

                    let next_v = self.loops[lp.next].v;
                    match self.edges.get(lp.e) {
                        Some(e) if e.connects(lp.v, next_v) => {}
                        _ => {
                            return Err(broken(format!(
                                "{:?} edge {:?} does not join {:?} and {:?}",
                                l, lp.e, lp.v, next_v
                            )))
                        }
                    }
                    l = lp.next;
                }

                if l != list.l {
                    return Err(broken(format!(
                        "{:?} list {} does not close after {} loops",
                        f, li, list.length
                    )));
                }
            }
        }
        Ok(())
    }

    fn validate_edges(&self) -> Result<()> {
        for (e, edge) in self.edges.iter() {
            for v in [edge.v1, edge.v2] {
                let vert = self
                    .verts
                    .get(v)
                    .ok_or_else(|| broken(format!("{:?} references dead {:?}", e, v)))?;
                if !vert.edges.contains(&e) {
                    return Err(broken(format!("{:?} missing from disk of {:?}", e, v)));
                }
            }

            if !edge.l.is_valid() {
                continue;
            }

            let mut count = 0;
            let mut l = edge.l;
            loop {
                let lp = self
                    .loops
                    .get(l)
                    .ok_or_else(|| broken(format!("{:?} radial cycle hits dead {:?}", e, l)))?;
                if lp.e != e {
                    return Err(broken(format!("{:?} in radial cycle of {:?} uses {:?}", l, e, lp.e)));
                }
                if self.loops.get(lp.radial_next).map(|n| n.radial_prev) != Some(l) {
                    return Err(broken(format!("{:?}.radial_next.radial_prev is not {:?}", l, l)));
                }

                count += 1;
                if count > self.loops.len() {
                    return Err(broken(format!("{:?} radial cycle does not close", e)));
                }
                l = lp.radial_next;
                if l == edge.l {
                    break;
                }
            }
        }
        Ok(())
    }

    fn validate_verts(&self) -> Result<()> {
        for (v, vert) in self.verts.iter() {
            for (i, &e) in vert.edges.iter().enumerate() {
                match self.edges.get(e) {
                    Some(edge) if edge.has_vert(v) => {}
                    _ => return Err(broken(format!("{:?} disk holds foreign {:?}", v, e))),
                }
                if vert.edges[..i].contains(&e) {
                    return Err(broken(format!("{:?} disk repeats {:?}", v, e)));
                }
            }
        }
        Ok(())
    }

    fn validate_loops(&self) -> Result<()> {
        for (l, lp) in self.loops.iter() {
            if !self.faces.contains(lp.f) {
                return Err(broken(format!("{:?} belongs to dead {:?}", l, lp.f)));
            }
            if !self.edges.contains(lp.e) || !self.edge_loops(lp.e).any(|x| x == l) {
                return Err(broken(format!("{:?} missing from radial cycle of {:?}", l, lp.e)));
            }
        }
        Ok(())
    }

    fn validate_custom_data(&self) -> Result<()> {
        fn check<T: Element>(list: &ElementList<T>) -> Result<()> {
            let n = list.custom_data().len();
            for (h, elem) in list.iter() {
                if elem.custom_data().len() != n {
                    return Err(broken(format!(
                        "{:?} has {} custom data values, expected {}",
                        h,
                        elem.custom_data().len(),
                        n
                    )));
                }
            }
            Ok(())
        }

        check(&self.verts)?;
        check(&self.edges)?;
        check(&self.loops)?;
        check(&self.faces)
    }

    fn validate_eids(&self) -> Result<()> {
        fn check<T: Element>(
            mesh: &Mesh,
            list: &ElementList<T>,
            wrap: fn(T::Id) -> ElemRef,
        ) -> Result<()> {
            for (h, elem) in list.iter() {
                let eid = elem.eid();
                if list.handle_of(eid) != Some(h) {
                    return Err(broken(format!("{:?} not keyed under {:?}", h, eid)));
                }
                if mesh.lookup(eid) != Some(wrap(h)) {
                    return Err(broken(format!("eid map disagrees for {:?}", eid)));
                }
                if elem.index() != h.slot() {
                    return Err(broken(format!("{:?} has stale index {}", h, elem.index())));
                }
            }
            for (eid, h) in list.eid_entries() {
                if list.get(h).map(|e| e.eid()) != Some(eid) {
                    return Err(broken(format!("stale list entry for {:?}", eid)));
                }
            }
            Ok(())
        }

        check(self, &self.verts, ElemRef::Vertex)?;
        check(self, &self.edges, ElemRef::Edge)?;
        check(self, &self.loops, ElemRef::Loop)?;
        check(self, &self.faces, ElemRef::Face)?;

        for (&eid, &elem) in &self.eid_map {
            if !self.is_live(elem) || self.eid_of(elem) != Some(eid) {
                return Err(broken(format!("eid map entry {:?} -> {:?} is stale", eid, elem)));
            }
        }
        Ok(())
    }
}

fn validate_selection<T: Element>(list: &ElementList<T>) -> Result<()> {
    use super::flags::MeshFlags;

    for &slot in list.selected_slots() {
        let h = T::Id::from_slot(slot);
        match list.get(h) {
            Some(elem) if elem.flag().contains(MeshFlags::SELECT) => {}
            Some(_) => return Err(broken(format!("{:?} selected without SELECT", h))),
            None => return Err(broken(format!("dead {:?} is selected", h))),
        }
    }

    for h in [list.active(), list.highlight()].into_iter().flatten() {
        if !list.contains(h) {
            return Err(broken(format!("active or highlighted {:?} is dead", h)));
        }
    }
    Ok(())
}
