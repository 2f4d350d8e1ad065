//! Spatial queries: ray casts, nearest points and picking cones.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, HashSet};

use nalgebra::{Point3, Vector2, Vector3};

use super::aabb::{Aabb, Cone};
use super::{Bvh, BvhNode};
use crate::mesh::{FaceId, VertId};

/// Parallel-ray rejection threshold for the triangle test.
const RAY_EPSILON: f64 = 1e-12;

/// Relative slack allowed when a visibility ray lands on the sample itself.
const VISIBILITY_EPSILON: f64 = 1e-5;

/// Barycentric sample points used for the cone visibility test.
const VISIBILITY_SAMPLES: [[f64; 3]; 7] = [
    [1.0 / 3.0, 1.0 / 3.0, 1.0 / 3.0],
    [0.8, 0.1, 0.1],
    [0.1, 0.8, 0.1],
    [0.1, 0.1, 0.8],
    [0.45, 0.45, 0.1],
    [0.1, 0.45, 0.45],
    [0.45, 0.1, 0.45],
];

/// A point on a BVH triangle, as found by a ray cast or nearest-point query.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BvhHit {
    /// Distance from the query origin.
    pub dist: f64,
    /// Barycentric weights of the second and third corners.
    pub uv: Vector2<f64>,
    /// Face owning the triangle.
    pub face: FaceId,
    /// Index of the triangle in the tessellation.
    pub tri_idx: usize,
    /// Hit position.
    pub p: Point3<f64>,
}

/// Ray/triangle intersection (Möller–Trumbore).
///
/// Returns `(t, u, v)` with `t >= 0` along `dir`.
fn ray_triangle(
    origin: &Point3<f64>,
    dir: &Vector3<f64>,
    [v0, v1, v2]: &[Point3<f64>; 3],
) -> Option<(f64, f64, f64)> {
    let edge1 = v1 - v0;
    let edge2 = v2 - v0;

    let h = dir.cross(&edge2);
    let a = edge1.dot(&h);
    if a.abs() < RAY_EPSILON {
        return None;
    }

    let f = 1.0 / a;
    let s = origin - v0;
    let u = f * s.dot(&h);
    if !(0.0..=1.0).contains(&u) {
        return None;
    }

    let q = s.cross(&edge1);
    let v = f * dir.dot(&q);
    if v < 0.0 || u + v > 1.0 {
        return None;
    }

    let t = f * edge2.dot(&q);
    (t >= 0.0).then_some((t, u, v))
}

/// Closest point on a triangle, with the barycentric weights of the second
/// and third corners.
fn closest_on_triangle(point: &Point3<f64>, [a, b, c]: &[Point3<f64>; 3]) -> (Point3<f64>, f64, f64) {
    let ab = b - a;
    let ac = c - a;
    let ap = point - a;

    let d1 = ab.dot(&ap);
    let d2 = ac.dot(&ap);
    if d1 <= 0.0 && d2 <= 0.0 {
        return (*a, 0.0, 0.0);
    }

    let bp = point - b;
    let d3 = ab.dot(&bp);
    let d4 = ac.dot(&bp);
    if d3 >= 0.0 && d4 <= d3 {
        return (*b, 1.0, 0.0);
    }

    let vc = d1 * d4 - d3 * d2;
    if vc <= 0.0 && d1 >= 0.0 && d3 <= 0.0 {
        let v = d1 / (d1 - d3);
        return (a + ab * v, v, 0.0);
    }

    let cp = point - c;
    let d5 = ab.dot(&cp);
    let d6 = ac.dot(&cp);
    if d6 >= 0.0 && d5 <= d6 {
        return (*c, 0.0, 1.0);
    }

    let vb = d5 * d2 - d1 * d6;
    if vb <= 0.0 && d2 >= 0.0 && d6 <= 0.0 {
        let w = d2 / (d2 - d6);
        return (a + ac * w, 0.0, w);
    }

    let va = d3 * d6 - d5 * d4;
    if va <= 0.0 && (d4 - d3) >= 0.0 && (d5 - d6) >= 0.0 {
        let w = (d4 - d3) / ((d4 - d3) + (d5 - d6));
        return (b + (c - b) * w, 1.0 - w, w);
    }

    let denom = 1.0 / (va + vb + vc);
    let v = vb * denom;
    let w = vc * denom;
    (a + ab * v + ac * w, v, w)
}

/// Max-heap entry keyed on distance.
#[derive(Debug, Clone, Copy)]
struct Near(f64, VertId);

impl PartialEq for Near {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Near {}

impl PartialOrd for Near {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Near {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0).then(self.1.index().cmp(&other.1.index()))
    }
}

impl Bvh {
    /// Visit live triangles in leaves whose bounds pass `enter`.
    fn visit(&self, mut enter: impl FnMut(&Aabb) -> bool, mut leaf: impl FnMut(usize)) {
        let mut stack: Vec<&BvhNode> = self.root().into_iter().collect();
        while let Some(node) = stack.pop() {
            let bbox = node.bbox();
            if !bbox.is_valid() || !enter(bbox) {
                continue;
            }
            match node {
                BvhNode::Leaf { triangles, .. } => {
                    for &t in triangles.iter() {
                        leaf(t as usize);
                    }
                }
                BvhNode::Internal { left, right, .. } => {
                    stack.push(left);
                    stack.push(right);
                }
            }
        }
    }

    /// Closest triangle hit along the ray from `origin` in direction `dir`.
    ///
    /// `dir` need not be normalised; the returned distance is in world
    /// units. Only hits at `dist >= 0` count. Returns `None` for a zero
    /// direction or a miss.
    pub fn cast_ray(&self, origin: &Point3<f64>, dir: &Vector3<f64>) -> Option<BvhHit> {
        let dir = dir.try_normalize(f64::EPSILON)?;
        let inv_dir = dir.map(|x| x.recip());
        let mut best: Option<BvhHit> = None;

        let mut stack: Vec<&BvhNode> = self.root().into_iter().collect();
        while let Some(node) = stack.pop() {
            let t_max = best.map_or(f64::MAX, |h| h.dist);
            if !node.bbox().is_valid() || node.bbox().ray_entry(origin, &inv_dir, t_max).is_none() {
                continue;
            }

            match node {
                BvhNode::Leaf { triangles, .. } => {
                    for &t in triangles.iter() {
                        let tri = &self.tris[t as usize];
                        if let Some((dist, u, v)) = ray_triangle(origin, &dir, &tri.points) {
                            if best.map_or(true, |h| dist < h.dist) {
                                best = Some(BvhHit {
                                    dist,
                                    uv: Vector2::new(u, v),
                                    face: tri.face,
                                    tri_idx: tri.tri_idx,
                                    p: origin + dir * dist,
                                });
                            }
                        }
                    }
                }
                BvhNode::Internal { left, right, .. } => {
                    // Push the farther child first so the nearer one is
                    // searched first and tightens t_max.
                    let tl = left.bbox().ray_entry(origin, &inv_dir, t_max);
                    let tr = right.bbox().ray_entry(origin, &inv_dir, t_max);
                    match (tl, tr) {
                        (Some(a), Some(b)) if a <= b => {
                            stack.push(right);
                            stack.push(left);
                        }
                        (Some(_), Some(_)) => {
                            stack.push(left);
                            stack.push(right);
                        }
                        (Some(_), None) => stack.push(left),
                        (None, Some(_)) => stack.push(right),
                        (None, None) => {}
                    }
                }
            }
        }
        best
    }

    /// Closest point on any triangle to `co`, within `max_dist`.
    pub fn closest_point(&self, co: &Point3<f64>, max_dist: f64) -> Option<BvhHit> {
        let mut best: Option<BvhHit> = None;
        let mut best_sq = max_dist * max_dist;

        let mut stack: Vec<&BvhNode> = self.root().into_iter().collect();
        while let Some(node) = stack.pop() {
            let bbox = node.bbox();
            if !bbox.is_valid() || bbox.distance_squared(co) > best_sq {
                continue;
            }
            match node {
                BvhNode::Leaf { triangles, .. } => {
                    for &t in triangles.iter() {
                        let tri = &self.tris[t as usize];
                        let (p, u, v) = closest_on_triangle(co, &tri.points);
                        let d_sq = (p - co).norm_squared();
                        if d_sq <= best_sq {
                            best_sq = d_sq;
                            best = Some(BvhHit {
                                dist: d_sq.sqrt(),
                                uv: Vector2::new(u, v),
                                face: tri.face,
                                tri_idx: tri.tri_idx,
                                p,
                            });
                        }
                    }
                }
                BvhNode::Internal { left, right, .. } => {
                    if left.bbox().distance_squared(co) <= right.bbox().distance_squared(co) {
                        stack.push(right);
                        stack.push(left);
                    } else {
                        stack.push(left);
                        stack.push(right);
                    }
                }
            }
        }
        best
    }

    /// Vertices within `radius` of `co`, unsorted.
    ///
    /// Only vertices used by at least one triangle are indexed.
    pub fn closest_verts(&self, co: &Point3<f64>, radius: f64) -> Vec<VertId> {
        let r_sq = radius * radius;
        let mut seen = HashSet::new();
        let mut out = Vec::new();

        self.visit(
            |bbox| bbox.distance_squared(co) <= r_sq,
            |t| {
                let tri = &self.tris[t];
                for (&v, p) in tri.verts.iter().zip(&tri.points) {
                    if (p - co).norm_squared() <= r_sq && seen.insert(v) {
                        out.push(v);
                    }
                }
            },
        );
        out
    }

    /// The `n` vertices nearest to `co`, closest first, with distances.
    pub fn nearest_verts_n(&self, co: &Point3<f64>, n: usize) -> Vec<(VertId, f64)> {
        if n == 0 {
            return Vec::new();
        }

        let mut heap: BinaryHeap<Near> = BinaryHeap::with_capacity(n + 1);
        let mut seen = HashSet::new();

        let mut stack: Vec<&BvhNode> = self.root().into_iter().collect();
        while let Some(node) = stack.pop() {
            let bbox = node.bbox();
            if !bbox.is_valid() {
                continue;
            }
            if heap.len() == n {
                if let Some(worst) = heap.peek() {
                    if bbox.distance_squared(co) > worst.0 * worst.0 {
                        continue;
                    }
                }
            }
            match node {
                BvhNode::Leaf { triangles, .. } => {
                    for &t in triangles.iter() {
                        let tri = &self.tris[t as usize];
                        for (&v, p) in tri.verts.iter().zip(&tri.points) {
                            if !seen.insert(v) {
                                continue;
                            }
                            heap.push(Near((p - co).norm(), v));
                            if heap.len() > n {
                                heap.pop();
                            }
                        }
                    }
                }
                BvhNode::Internal { left, right, .. } => {
                    stack.push(left);
                    stack.push(right);
                }
            }
        }

        heap.into_sorted_vec().into_iter().map(|Near(d, v)| (v, d)).collect()
    }

    /// Vertices inside `cone`, unsorted.
    pub fn verts_in_cone(&self, cone: &Cone) -> Vec<VertId> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();

        self.visit(
            |bbox| cone.may_intersect(bbox),
            |t| {
                let tri = &self.tris[t];
                for (&v, p) in tri.verts.iter().zip(&tri.points) {
                    if cone.contains(p) && seen.insert(v) {
                        out.push(v);
                    }
                }
            },
        );
        out
    }

    /// Faces with a triangle sample point inside `cone`, unsorted.
    ///
    /// With `visible_only`, a face counts only if one of its in-cone
    /// samples can be seen from the cone apex: a ray cast from the apex
    /// toward the sample must not hit anything closer than the sample.
    pub fn faces_in_cone(&self, cone: &Cone, visible_only: bool) -> Vec<FaceId> {
        let mut candidates: HashMap<FaceId, Vec<Point3<f64>>> = HashMap::new();
        let mut order = Vec::new();

        self.visit(
            |bbox| cone.may_intersect(bbox),
            |t| {
                let tri = &self.tris[t];
                let [a, b, c] = &tri.points;
                for [wa, wb, wc] in VISIBILITY_SAMPLES {
                    let p = Point3::from(a.coords * wa + b.coords * wb + c.coords * wc);
                    if !cone.contains(&p) {
                        continue;
                    }
                    let samples = candidates.entry(tri.face).or_insert_with(|| {
                        order.push(tri.face);
                        Vec::new()
                    });
                    samples.push(p);
                }
            },
        );

        if !visible_only {
            return order;
        }

        order
            .into_iter()
            .filter(|f| {
                candidates
                    .get(f)
                    .is_some_and(|samples| samples.iter().any(|p| self.sample_visible(cone, *f, p)))
            })
            .collect()
    }

    fn sample_visible(&self, cone: &Cone, face: FaceId, p: &Point3<f64>) -> bool {
        let d = p - cone.origin;
        let max_dis = d.norm();
        match self.cast_ray(&cone.origin, &d) {
            None => true,
            Some(hit) => hit.face == face || hit.dist >= max_dis * (1.0 - VISIBILITY_EPSILON),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::grid;
    use super::super::BvhOptions;
    use super::*;
    use crate::mesh::{build_from_quads, Handle};
    use approx::assert_relative_eq;

    fn opts() -> BvhOptions {
        BvhOptions::default().with_leaf_limit(2)
    }

    #[test]
    fn test_ray_triangle() {
        let tri = [
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(1.0, 0.0, 0.0),
            Point3::new(0.0, 1.0, 0.0),
        ];
        let down = Vector3::new(0.0, 0.0, -1.0);

        let (t, u, v) = ray_triangle(&Point3::new(0.25, 0.25, 2.0), &down, &tri).unwrap();
        assert_relative_eq!(t, 2.0);
        assert_relative_eq!(u, 0.25);
        assert_relative_eq!(v, 0.25);

        assert!(ray_triangle(&Point3::new(0.25, 0.25, -2.0), &down, &tri).is_none());
        assert!(ray_triangle(&Point3::new(2.0, 2.0, 2.0), &down, &tri).is_none());
        assert!(ray_triangle(&Point3::new(0.25, 0.25, 2.0), &Vector3::x(), &tri).is_none());
    }

    #[test]
    fn test_closest_on_triangle_regions() {
        let tri = [
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(2.0, 0.0, 0.0),
            Point3::new(0.0, 2.0, 0.0),
        ];
        let (p, _, _) = closest_on_triangle(&Point3::new(-1.0, -1.0, 0.0), &tri);
        assert_eq!(p, tri[0]);

        let (p, u, v) = closest_on_triangle(&Point3::new(1.0, -1.0, 0.0), &tri);
        assert_eq!(p, Point3::new(1.0, 0.0, 0.0));
        assert_relative_eq!(u, 0.5);
        assert_relative_eq!(v, 0.0);

        let (p, u, v) = closest_on_triangle(&Point3::new(0.5, 0.5, 3.0), &tri);
        assert_relative_eq!(p, Point3::new(0.5, 0.5, 0.0), epsilon = 1e-12);
        assert_relative_eq!(u, 0.25, epsilon = 1e-12);
        assert_relative_eq!(v, 0.25, epsilon = 1e-12);

        let (p, _, _) = closest_on_triangle(&Point3::new(2.0, 2.0, 0.0), &tri);
        assert_relative_eq!(p, Point3::new(1.0, 1.0, 0.0), epsilon = 1e-12);
    }

    #[test]
    fn test_cast_ray_grid() {
        let mesh = grid(4);
        let bvh = Bvh::build(&mesh, &opts()).unwrap();

        let hit = bvh
            .cast_ray(&Point3::new(2.3, 1.6, 3.0), &Vector3::new(0.0, 0.0, -2.0))
            .unwrap();
        assert_relative_eq!(hit.dist, 3.0, epsilon = 1e-12);
        assert_relative_eq!(hit.p, Point3::new(2.3, 1.6, 0.0), epsilon = 1e-12);
        assert_eq!(mesh.lp(mesh.loop_tris()[hit.tri_idx][0]).f, hit.face);
        assert!(mesh.face_verts(hit.face).all(|v| {
            let co = mesh.co(v);
            (2.0..=3.0).contains(&co.x) && (1.0..=2.0).contains(&co.y)
        }));

        // pointing away and missing
        assert!(bvh.cast_ray(&Point3::new(2.5, 1.5, 3.0), &Vector3::z()).is_none());
        assert!(bvh.cast_ray(&Point3::new(9.0, 9.0, 3.0), &-Vector3::z()).is_none());
        assert!(bvh.cast_ray(&Point3::new(2.5, 1.5, 3.0), &Vector3::zeros()).is_none());
    }

    #[test]
    fn test_cast_ray_picks_closest() {
        // Two stacked quads; the upper one must win.
        let points = vec![
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(1.0, 0.0, 0.0),
            Point3::new(1.0, 1.0, 0.0),
            Point3::new(0.0, 1.0, 0.0),
            Point3::new(0.0, 0.0, 1.0),
            Point3::new(1.0, 0.0, 1.0),
            Point3::new(1.0, 1.0, 1.0),
            Point3::new(0.0, 1.0, 1.0),
        ];
        let mut mesh = build_from_quads(&points, &[[0, 1, 2, 3], [4, 5, 6, 7]]).unwrap();
        mesh.ensure_tessellation();
        let upper = mesh.faces().handles().nth(1).unwrap();

        let bvh = Bvh::build(&mesh, &BvhOptions::default().with_leaf_limit(1)).unwrap();
        let hit = bvh
            .cast_ray(&Point3::new(0.5, 0.5, 5.0), &-Vector3::z())
            .unwrap();
        assert_eq!(hit.face, upper);
        assert_relative_eq!(hit.dist, 4.0, epsilon = 1e-12);
    }

    #[test]
    fn test_closest_point() {
        let mesh = grid(4);
        let bvh = Bvh::build(&mesh, &opts()).unwrap();

        let hit = bvh.closest_point(&Point3::new(1.2, 3.4, 2.0), f64::MAX).unwrap();
        assert_relative_eq!(hit.dist, 2.0, epsilon = 1e-12);
        assert_relative_eq!(hit.p, Point3::new(1.2, 3.4, 0.0), epsilon = 1e-12);

        let outside = bvh.closest_point(&Point3::new(-3.0, 2.0, 4.0), f64::MAX).unwrap();
        assert_relative_eq!(outside.dist, 5.0, epsilon = 1e-12);

        assert!(bvh.closest_point(&Point3::new(1.0, 1.0, 2.0), 1.0).is_none());
    }

    #[test]
    fn test_closest_verts() {
        let mesh = grid(4);
        let bvh = Bvh::build(&mesh, &opts()).unwrap();

        let mut found = bvh.closest_verts(&Point3::new(2.0, 2.0, 0.0), 1.01);
        found.sort_by_key(|v| v.slot());
        // center vertex and its four grid neighbours
        assert_eq!(found.len(), 5);
        for v in found {
            assert!((mesh.co(v) - Point3::new(2.0, 2.0, 0.0)).norm() <= 1.01);
        }

        assert!(bvh.closest_verts(&Point3::new(2.5, 2.5, 5.0), 1.0).is_empty());
    }

    #[test]
    fn test_nearest_verts_n() {
        let mesh = grid(4);
        let bvh = Bvh::build(&mesh, &opts()).unwrap();

        let near = bvh.nearest_verts_n(&Point3::new(0.1, 0.0, 0.0), 3);
        assert_eq!(near.len(), 3);
        assert_eq!(*mesh.co(near[0].0), Point3::new(0.0, 0.0, 0.0));
        assert_relative_eq!(near[0].1, 0.1, epsilon = 1e-12);
        assert_eq!(*mesh.co(near[1].0), Point3::new(1.0, 0.0, 0.0));
        assert!(near.windows(2).all(|w| w[0].1 <= w[1].1));

        assert!(bvh.nearest_verts_n(&Point3::origin(), 0).is_empty());
        assert_eq!(bvh.nearest_verts_n(&Point3::origin(), 100).len(), 25);
    }

    #[test]
    fn test_verts_in_cone() {
        let mesh = grid(4);
        let bvh = Bvh::build(&mesh, &opts()).unwrap();

        // Narrow cone straight down onto (2, 2).
        let cone = Cone::new(Point3::new(2.0, 2.0, 10.0), -Vector3::z(), 0.1, 0.3, 20.0).unwrap();
        let found = bvh.verts_in_cone(&cone);
        assert_eq!(found.len(), 1);
        assert_eq!(*mesh.co(found[0]), Point3::new(2.0, 2.0, 0.0));

        // Wider at depth: radius 1.1 at the grid plane catches the neighbours.
        let wide = Cone::new(Point3::new(2.0, 2.0, 10.0), -Vector3::z(), 0.0, 2.2, 20.0).unwrap();
        assert_eq!(bvh.verts_in_cone(&wide).len(), 5);
    }

    #[test]
    fn test_faces_in_cone_visibility() {
        // A small occluding quad floats above the lower-left grid cell.
        let mut points: Vec<Point3<f64>> = Vec::new();
        for j in 0..=2 {
            for i in 0..=2 {
                points.push(Point3::new(i as f64, j as f64, 0.0));
            }
        }
        points.extend([
            Point3::new(-0.5, -0.5, 1.0),
            Point3::new(1.5, -0.5, 1.0),
            Point3::new(1.5, 1.5, 1.0),
            Point3::new(-0.5, 1.5, 1.0),
        ]);
        let quads = [
            [0, 1, 4, 3],
            [1, 2, 5, 4],
            [3, 4, 7, 6],
            [4, 5, 8, 7],
            [9, 10, 11, 12],
        ];
        let mut mesh = build_from_quads(&points, &quads).unwrap();
        mesh.ensure_tessellation();
        let faces: Vec<FaceId> = mesh.faces().handles().collect();
        let bvh = Bvh::build(&mesh, &BvhOptions::default().with_leaf_limit(1)).unwrap();

        let cone = Cone::new(Point3::new(0.5, 0.5, 5.0), -Vector3::z(), 0.2, 0.2, 10.0).unwrap();
        let mut all = bvh.faces_in_cone(&cone, false);
        all.sort_by_key(|f| f.slot());
        assert_eq!(all, vec![faces[0], faces[4]]);

        let visible = bvh.faces_in_cone(&cone, true);
        assert_eq!(visible, vec![faces[4]]);

        let clear = Cone::new(Point3::new(1.7, 1.7, 5.0), -Vector3::z(), 0.4, 0.4, 10.0).unwrap();
        assert_eq!(bvh.faces_in_cone(&clear, true), vec![faces[3]]);
    }

    #[test]
    fn test_removed_faces_are_skipped() {
        let mesh = grid(2);
        let mut bvh = Bvh::build(&mesh, &BvhOptions::default().with_leaf_limit(2)).unwrap();
        let origin = Point3::new(0.3, 0.6, 1.0);

        let hit = bvh.cast_ray(&origin, &-Vector3::z()).unwrap();
        bvh.remove_face(hit.face);
        assert!(bvh.cast_ray(&origin, &-Vector3::z()).is_none());
    }
}
