//! Face triangulation and the loop-triangle cache.
//!
//! Triangles pass through unchanged and quads are split along the shorter
//! diagonal. Other polygons, and faces with holes, are projected onto their
//! plane, holes are bridged into the outer boundary, and the result is ear
//! clipped.

use std::collections::HashMap;

use nalgebra::{Point2, Point3, Vector3};

use super::flags::RecalcFlags;
use super::halfedge::Mesh;
use super::index::{FaceId, LoopId};
use crate::error::{MeshError, Result};

/// Cached triangulation of every face, as loop triples.
#[derive(Debug, Clone, Default)]
pub struct Tessellation {
    tris: Vec<[LoopId; 3]>,
    ranges: HashMap<FaceId, (usize, usize)>,
}

impl Tessellation {
    /// All triangles.
    #[inline]
    pub fn tris(&self) -> &[[LoopId; 3]] {
        &self.tris
    }

    /// Triangles of one face; empty for unknown faces.
    pub fn face_tris(&self, f: FaceId) -> &[[LoopId; 3]] {
        match self.ranges.get(&f) {
            Some(&(start, end)) => &self.tris[start..end],
            None => &[],
        }
    }

    /// Index of the first triangle of `f`.
    pub fn face_start(&self, f: FaceId) -> Option<usize> {
        self.ranges.get(&f).map(|&(start, _)| start)
    }

    /// Number of triangles.
    #[inline]
    pub fn len(&self) -> usize {
        self.tris.len()
    }

    /// Whether there are no triangles.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.tris.is_empty()
    }
}

impl Mesh {
    /// The triangle cache. Stale while TESSELATE is flagged.
    #[inline]
    pub fn tessellation(&self) -> &Tessellation {
        &self.tess
    }

    /// All cached loop triangles.
    #[inline]
    pub fn loop_tris(&self) -> &[[LoopId; 3]] {
        self.tess.tris()
    }

    /// Rebuild the cache if TESSELATE is flagged.
    pub fn ensure_tessellation(&mut self) {
        if self.recalc.contains(RecalcFlags::TESSELATE) {
            self.tessellate();
        }
    }

    /// Triangulate every face, storing each face's area as the sum of its
    /// triangle areas.
    pub fn tessellate(&mut self) {
        let faces: Vec<FaceId> = self.faces.handles().collect();
        let mut tess = Tessellation {
            tris: Vec::with_capacity(self.loops.len()),
            ranges: HashMap::with_capacity(faces.len()),
        };

        for f in faces {
            let tris = self.triangulate_face(f);
            let area: f64 = tris.iter().map(|t| self.tri_area(t)).sum();
            self.faces[f].area = area;

            let start = tess.tris.len();
            tess.tris.extend(tris);
            tess.ranges.insert(f, (start, tess.tris.len()));
        }

        log::debug!("tessellated {} faces into {} triangles", self.faces.len(), tess.tris.len());
        self.tess = tess;
        self.recalc.remove(RecalcFlags::TESSELATE);
        self.recalc |= RecalcFlags::RENDER;
    }

    fn tri_area(&self, t: &[LoopId; 3]) -> f64 {
        let [a, b, c] = t.map(|l| self.verts[self.loops[l].v].co);
        (b - a).cross(&(c - a)).norm() * 0.5
    }

    /// Triangulate `f`, falling back to a fan with a warning when the
    /// polygon cannot be ear clipped.
    pub fn triangulate_face(&self, f: FaceId) -> Vec<[LoopId; 3]> {
        match self.try_triangulate_face(f) {
            Ok(tris) => tris,
            Err(err) => {
                log::warn!("{}; using a fan", err);
                let ls: Vec<LoopId> = self.outer_loops(f).collect();
                (1..ls.len().saturating_sub(1))
                    .map(|i| [ls[0], ls[i], ls[i + 1]])
                    .collect()
            }
        }
    }

    /// Triangulate `f`, or fail with [`MeshError::Triangulation`].
    pub fn try_triangulate_face(&self, f: FaceId) -> Result<Vec<[LoopId; 3]>> {
        let face = self.faces.try_get(f)?;
        let fail = || MeshError::Triangulation(face.eid.get());

        let outer: Vec<LoopId> = self.outer_loops(f).collect();
        let holed = face.lists.len() > 1;

        if !holed && outer.len() == 3 {
            return Ok(vec![[outer[0], outer[1], outer[2]]]);
        }
        if !holed && outer.len() == 4 {
            return Ok(self.split_quad(&outer));
        }

        let no = self.calc_face_normal(f);
        if no == Vector3::zeros() {
            return Err(fail());
        }
        let (u, v) = plane_basis(&no);

        let mut ids: Vec<LoopId> = Vec::with_capacity(face.num_loops());
        let mut pts: Vec<Point2<f64>> = Vec::with_capacity(face.num_loops());
        let mut rings: Vec<Vec<usize>> = Vec::with_capacity(face.lists.len());

        for &list in &face.lists {
            let mut ring = Vec::with_capacity(list.length);
            for l in self.list_loops(list) {
                let co = self.verts[self.loops[l].v].co;
                ring.push(pts.len());
                ids.push(l);
                pts.push(Point2::new(co.coords.dot(&u), co.coords.dot(&v)));
            }
            rings.push(ring);
        }

        let mut rings = rings.into_iter();
        let mut poly = rings.next().ok_or_else(fail)?;
        if signed_area(&pts, &poly) < 0.0 {
            return Err(fail());
        }

        let mut holes: Vec<Vec<usize>> = rings
            .map(|mut ring| {
                if signed_area(&pts, &ring) > 0.0 {
                    ring.reverse();
                }
                ring
            })
            .collect();
        holes.sort_by(|a, b| max_x(&pts, b).total_cmp(&max_x(&pts, a)));

        for i in 0..holes.len() {
            let (hole, rest) = holes[i..].split_first().ok_or_else(fail)?;
            bridge_hole(&pts, &mut poly, hole, rest);
        }

        let tris = ear_clip(&pts, poly).ok_or_else(fail)?;
        Ok(tris.into_iter().map(|t| t.map(|i| ids[i])).collect())
    }

    /// Split a quad along its shorter diagonal, unless that folds it.
    fn split_quad(&self, ls: &[LoopId]) -> Vec<[LoopId; 3]> {
        let p: Vec<Point3<f64>> = ls.iter().map(|&l| self.verts[self.loops[l].v].co).collect();
        let tri_no = |a: usize, b: usize, c: usize| (p[b] - p[a]).cross(&(p[c] - p[a]));

        let d02 = (p[2] - p[0]).norm_squared();
        let d13 = (p[3] - p[1]).norm_squared();

        // a diagonal is usable when both halves face the same way
        let ok02 = tri_no(0, 1, 2).dot(&tri_no(0, 2, 3)) > 0.0;
        let ok13 = tri_no(0, 1, 3).dot(&tri_no(1, 2, 3)) > 0.0;

        let use02 = match (ok02, ok13) {
            (true, false) => true,
            (false, true) => false,
            _ => d02 <= d13,
        };

        if use02 {
            vec![[ls[0], ls[1], ls[2]], [ls[0], ls[2], ls[3]]]
        } else {
            vec![[ls[0], ls[1], ls[3]], [ls[1], ls[2], ls[3]]]
        }
    }
}

fn plane_basis(no: &Vector3<f64>) -> (Vector3<f64>, Vector3<f64>) {
    let axis = if no.x.abs() < 0.9 { Vector3::x() } else { Vector3::y() };
    let u = (axis - no * axis.dot(no)).normalize();
    let v = no.cross(&u);
    (u, v)
}

fn signed_area(pts: &[Point2<f64>], ring: &[usize]) -> f64 {
    let n = ring.len();
    (0..n)
        .map(|i| {
            let a = pts[ring[i]];
            let b = pts[ring[(i + 1) % n]];
            a.x * b.y - b.x * a.y
        })
        .sum::<f64>()
        * 0.5
}

fn max_x(pts: &[Point2<f64>], ring: &[usize]) -> f64 {
    ring.iter().map(|&i| pts[i].x).fold(f64::NEG_INFINITY, f64::max)
}

#[inline]
fn cross(o: Point2<f64>, a: Point2<f64>, b: Point2<f64>) -> f64 {
    (a.x - o.x) * (b.y - o.y) - (a.y - o.y) * (b.x - o.x)
}

/// Whether segments `p1-p2` and `q1-q2` cross at an interior point.
fn segments_cross(p1: Point2<f64>, p2: Point2<f64>, q1: Point2<f64>, q2: Point2<f64>) -> bool {
    let d1 = cross(q1, q2, p1);
    let d2 = cross(q1, q2, p2);
    let d3 = cross(p1, p2, q1);
    let d4 = cross(p1, p2, q2);
    d1 * d2 < 0.0 && d3 * d4 < 0.0
}

/// Splice `hole` into `poly` through a bridge from the hole's rightmost
/// vertex to the nearest polygon vertex it can see.
fn bridge_hole(pts: &[Point2<f64>], poly: &mut Vec<usize>, hole: &[usize], others: &[Vec<usize>]) {
    let Some(mi) = (0..hole.len()).max_by(|&a, &b| pts[hole[a]].x.total_cmp(&pts[hole[b]].x))
    else {
        return;
    };
    let m = pts[hole[mi]];

    let mut order: Vec<usize> = (0..poly.len()).collect();
    order.sort_by(|&a, &b| {
        let da = (pts[poly[a]] - m).norm_squared();
        let db = (pts[poly[b]] - m).norm_squared();
        da.total_cmp(&db)
    });

    let visible = |pi: usize| {
        let p = pts[poly[pi]];
        let rings = std::iter::once(poly.as_slice())
            .chain(std::iter::once(hole))
            .chain(others.iter().map(Vec::as_slice));
        for ring in rings {
            let n = ring.len();
            for i in 0..n {
                let (a, b) = (pts[ring[i]], pts[ring[(i + 1) % n]]);
                if segments_cross(m, p, a, b) {
                    return false;
                }
            }
        }
        true
    };

    let pi = order.iter().copied().find(|&pi| visible(pi)).unwrap_or(order[0]);

    let mut merged = Vec::with_capacity(poly.len() + hole.len() + 2);
    merged.extend_from_slice(&poly[..=pi]);
    merged.extend_from_slice(&hole[mi..]);
    merged.extend_from_slice(&hole[..=mi]);
    merged.extend_from_slice(&poly[pi..]);
    *poly = merged;
}

fn in_triangle(p: Point2<f64>, a: Point2<f64>, b: Point2<f64>, c: Point2<f64>) -> bool {
    cross(a, b, p) >= 0.0 && cross(b, c, p) >= 0.0 && cross(c, a, p) >= 0.0
}

/// Ear clip a counter-clockwise ring. Returns `None` when no ear can be
/// found before the ring is exhausted.
fn ear_clip(pts: &[Point2<f64>], mut ring: Vec<usize>) -> Option<Vec<[usize; 3]>> {
    let mut tris = Vec::with_capacity(ring.len().saturating_sub(2));
    if ring.len() < 3 {
        return None;
    }

    while ring.len() > 3 {
        let n = ring.len();
        let ear = (0..n).find(|&i| {
            let (ia, ib, ic) = (ring[(i + n - 1) % n], ring[i], ring[(i + 1) % n]);
            let (a, b, c) = (pts[ia], pts[ib], pts[ic]);
            if cross(a, b, c) <= 0.0 {
                return false;
            }
            ring.iter().all(|&j| {
                let p = pts[j];
                p == a || p == b || p == c || !in_triangle(p, a, b, c)
            })
        })?;

        tris.push([ring[(ear + n - 1) % n], ring[ear], ring[(ear + 1) % n]]);
        ring.remove(ear);
    }

    tris.push([ring[0], ring[1], ring[2]]);
    Some(tris)
}
