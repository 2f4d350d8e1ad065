//! Screen-space picking.
//!
//! A [`FindNearest`] registry fans a pick request out to every registered
//! [`FindNearestStrategy`] whose select mask overlaps the request and merges
//! the answers. [`MeshStrategy`] picks vertices, edges and faces of a
//! [`Mesh`] through its BVH.
//!
//! Screen positions are in pixels, origin at the top left, y pointing down.
//! A [`ViewContext`] maps them to world rays and back.
//!
//! # Example
//!
//! ```
//! use loopmesh::prelude::*;
//! use loopmesh::find_nearest::{Camera, FindNearest, FindNearestOptions};
//! use loopmesh::nalgebra::{Point2, Point3, Vector3};
//!
//! let points = [
//!     Point3::new(0.0, 0.0, 0.0),
//!     Point3::new(1.0, 0.0, 0.0),
//!     Point3::new(1.0, 1.0, 0.0),
//!     Point3::new(0.0, 1.0, 0.0),
//! ];
//! let mut mesh = build_from_quads(&points, &[[0, 1, 2, 3]]).unwrap();
//! let camera = Camera::look_at(
//!     Point3::new(0.5, 0.5, 4.0),
//!     Point3::new(0.5, 0.5, 0.0),
//!     Vector3::y(),
//!     std::f64::consts::FRAC_PI_4,
//!     640,
//!     480,
//! )
//! .unwrap();
//!
//! let picker = FindNearest::with_mesh_strategy();
//! let hits = picker
//!     .find_nearest(&mut mesh, &camera, &Point2::new(300.0, 250.0), ElemTypes::FACE, &FindNearestOptions::default())
//!     .unwrap();
//! assert_eq!(hits.len(), 1);
//! ```

use std::collections::HashSet;
use std::f64::consts::PI;

use nalgebra::{Isometry3, Perspective3, Point2, Point3, Vector3};

use crate::bvh::{Bvh, BvhOptions, Cone};
use crate::error::{MeshError, Result};
use crate::mesh::{EdgeId, ElemRef, ElemTypes, Mesh, MeshFlags};

const DEFAULT_ZNEAR: f64 = 0.01;
const DEFAULT_ZFAR: f64 = 1000.0;

/// Widening of the search cone ahead of exact screen-space filtering.
const CONE_SLACK: f64 = 1.5;

/// Relative slack when a visibility ray lands on the picked point itself.
const VISIBILITY_EPSILON: f64 = 1e-5;

// ==================== View ====================

/// Maps between screen pixels and world space.
pub trait ViewContext {
    /// World-space ray through `screen`. The direction is unit length.
    fn ray(&self, screen: &Point2<f64>) -> (Point3<f64>, Vector3<f64>);

    /// Screen position of `point`, or `None` when it lies behind the viewer.
    fn project(&self, point: &Point3<f64>) -> Option<Point2<f64>>;

    /// World units covered by one pixel at view depth `depth`.
    fn pixel_scale(&self, depth: f64) -> f64;
}

/// A perspective camera looking at a target point.
#[derive(Debug, Clone)]
pub struct Camera {
    eye: Point3<f64>,
    view: Isometry3<f64>,
    proj: Perspective3<f64>,
    width: f64,
    height: f64,
}

impl Camera {
    /// Camera at `eye` looking at `target`, with vertical field of view
    /// `fovy` (radians) and a `width` x `height` pixel viewport.
    ///
    /// Clip planes default to `0.01` and `1000`; see [`Camera::with_clip`].
    pub fn look_at(
        eye: Point3<f64>,
        target: Point3<f64>,
        up: Vector3<f64>,
        fovy: f64,
        width: u32,
        height: u32,
    ) -> Result<Self> {
        if width == 0 {
            return Err(MeshError::invalid_param("width", width, "must be positive"));
        }
        if height == 0 {
            return Err(MeshError::invalid_param("height", height, "must be positive"));
        }
        if !(fovy > 0.0 && fovy < PI) {
            return Err(MeshError::invalid_param("fovy", fovy, "must lie in (0, pi)"));
        }

        let dir = target - eye;
        if dir.norm_squared() == 0.0 {
            return Err(MeshError::invalid_param(
                "target",
                format!("[{}, {}, {}]", target.x, target.y, target.z),
                "must differ from eye",
            ));
        }
        if dir.cross(&up).norm_squared() <= f64::EPSILON * dir.norm_squared() * up.norm_squared() {
            return Err(MeshError::invalid_param(
                "up",
                format!("[{}, {}, {}]", up.x, up.y, up.z),
                "must not be parallel to the view direction",
            ));
        }

        let (w, h) = (f64::from(width), f64::from(height));
        Ok(Self {
            eye,
            view: Isometry3::look_at_rh(&eye, &target, &up),
            proj: Perspective3::new(w / h, fovy, DEFAULT_ZNEAR, DEFAULT_ZFAR),
            width: w,
            height: h,
        })
    }

    /// Replace the clip planes.
    pub fn with_clip(mut self, znear: f64, zfar: f64) -> Result<Self> {
        if !(znear > 0.0) {
            return Err(MeshError::invalid_param("znear", znear, "must be positive"));
        }
        if !(zfar > znear) {
            return Err(MeshError::invalid_param("zfar", zfar, "must exceed znear"));
        }
        self.proj.set_znear_and_zfar(znear, zfar);
        Ok(self)
    }

    /// Eye position.
    #[inline]
    pub fn eye(&self) -> &Point3<f64> {
        &self.eye
    }

    /// World-to-view transform.
    #[inline]
    pub fn view(&self) -> &Isometry3<f64> {
        &self.view
    }

    /// Projection.
    #[inline]
    pub fn projection(&self) -> &Perspective3<f64> {
        &self.proj
    }

    /// Viewport size in pixels.
    #[inline]
    pub fn viewport(&self) -> (f64, f64) {
        (self.width, self.height)
    }
}

impl ViewContext for Camera {
    fn ray(&self, screen: &Point2<f64>) -> (Point3<f64>, Vector3<f64>) {
        let x = 2.0 * screen.x / self.width - 1.0;
        let y = 1.0 - 2.0 * screen.y / self.height;
        let near = self.proj.unproject_point(&Point3::new(x, y, -1.0));
        let far = self.proj.unproject_point(&Point3::new(x, y, 1.0));
        let dir = self.view.inverse_transform_vector(&(far - near)).normalize();
        (self.eye, dir)
    }

    fn project(&self, point: &Point3<f64>) -> Option<Point2<f64>> {
        // View space looks down -z.
        let p = self.view.transform_point(point);
        if -p.z < self.proj.znear() {
            return None;
        }
        let ndc = self.proj.project_point(&p);
        Some(Point2::new(
            (ndc.x + 1.0) * 0.5 * self.width,
            (1.0 - ndc.y) * 0.5 * self.height,
        ))
    }

    fn pixel_scale(&self, depth: f64) -> f64 {
        2.0 * depth * (self.proj.fovy() * 0.5).tan() / self.height
    }
}

// ==================== Results and options ====================

/// One picked element.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FindNearestRet {
    /// The element.
    pub elem: ElemRef,
    /// Screen position of the picked point.
    pub p2d: Point2<f64>,
    /// World position of the picked point.
    pub p3d: Point3<f64>,
    /// Pixel distance from the query position for
    /// [`FindNearest::find_nearest`]; world distance along the pick ray
    /// for [`FindNearest::cast_ray`].
    pub dis: f64,
}

/// Options for [`FindNearest::find_nearest`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FindNearestOptions {
    /// Maximum screen distance in pixels.
    pub limit: f64,
    /// Drop elements hidden behind other geometry.
    pub visible_only: bool,
}

impl Default for FindNearestOptions {
    fn default() -> Self {
        Self {
            limit: 25.0,
            visible_only: true,
        }
    }
}

impl FindNearestOptions {
    /// Set the pixel limit.
    pub fn with_limit(mut self, limit: f64) -> Self {
        self.limit = limit;
        self
    }

    /// Toggle occlusion filtering.
    pub fn with_visible_only(mut self, visible_only: bool) -> Self {
        self.visible_only = visible_only;
        self
    }

    fn validate(&self) -> Result<()> {
        if !(self.limit.is_finite() && self.limit > 0.0) {
            return Err(MeshError::invalid_param(
                "limit",
                self.limit,
                "must be positive and finite",
            ));
        }
        Ok(())
    }
}

// ==================== Registry ====================

/// A way of picking one family of elements.
pub trait FindNearestStrategy: std::fmt::Debug {
    /// Element kinds this strategy can return.
    fn select_mask(&self) -> ElemTypes;

    /// Elements of `mask` within `opts.limit` pixels of `screen`, unsorted.
    fn find_nearest(
        &self,
        mesh: &mut Mesh,
        view: &dyn ViewContext,
        screen: &Point2<f64>,
        mask: ElemTypes,
        opts: &FindNearestOptions,
    ) -> Result<Vec<FindNearestRet>>;

    /// First element of `mask` along the ray through `screen`.
    fn cast_ray(
        &self,
        mesh: &mut Mesh,
        view: &dyn ViewContext,
        screen: &Point2<f64>,
        mask: ElemTypes,
    ) -> Result<Option<FindNearestRet>>;
}

/// Registry of picking strategies.
#[derive(Debug, Default)]
pub struct FindNearest {
    strategies: Vec<Box<dyn FindNearestStrategy>>,
}

impl FindNearest {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding a default [`MeshStrategy`].
    pub fn with_mesh_strategy() -> Self {
        let mut registry = Self::new();
        registry.register(MeshStrategy::default());
        registry
    }

    /// Add a strategy. Strategies are consulted in registration order.
    pub fn register<S: FindNearestStrategy + 'static>(&mut self, strategy: S) {
        self.strategies.push(Box::new(strategy));
    }

    /// Number of registered strategies.
    pub fn len(&self) -> usize {
        self.strategies.len()
    }

    /// Check if no strategy is registered.
    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }

    fn matching(&self, mask: ElemTypes) -> impl Iterator<Item = &dyn FindNearestStrategy> + '_ {
        self.strategies
            .iter()
            .map(|s| &**s)
            .filter(move |s| s.select_mask().intersects(mask))
    }

    /// Everything of `mask` within `opts.limit` pixels of `screen`, from
    /// every strategy whose select mask overlaps `mask`, sorted by pixel
    /// distance.
    pub fn find_nearest(
        &self,
        mesh: &mut Mesh,
        view: &dyn ViewContext,
        screen: &Point2<f64>,
        mask: ElemTypes,
        opts: &FindNearestOptions,
    ) -> Result<Vec<FindNearestRet>> {
        opts.validate()?;

        let mut out = Vec::new();
        for strategy in self.matching(mask) {
            out.extend(strategy.find_nearest(mesh, view, screen, mask, opts)?);
        }
        out.sort_by(|a, b| a.dis.total_cmp(&b.dis));

        log::trace!("find_nearest at ({}, {}): {} hits", screen.x, screen.y, out.len());
        Ok(out)
    }

    /// Closest ray hit among all matching strategies.
    pub fn cast_ray(
        &self,
        mesh: &mut Mesh,
        view: &dyn ViewContext,
        screen: &Point2<f64>,
        mask: ElemTypes,
    ) -> Result<Option<FindNearestRet>> {
        let mut best: Option<FindNearestRet> = None;
        for strategy in self.matching(mask) {
            if let Some(hit) = strategy.cast_ray(mesh, view, screen, mask)? {
                if best.map_or(true, |b| hit.dis < b.dis) {
                    best = Some(hit);
                }
            }
        }
        Ok(best)
    }
}

// ==================== Mesh strategy ====================

/// Picks vertices, edges and faces through the mesh BVH.
///
/// Candidates are gathered with a cone around the pick ray that covers
/// `limit` pixels at every depth of the mesh, then measured exactly in
/// screen space. Faces under the cursor report a distance of zero; other
/// faces are measured at their centroid. Edges are measured at the point
/// closest to the pick ray. Hidden elements are never returned.
#[derive(Debug, Clone, Default)]
pub struct MeshStrategy {
    bvh: BvhOptions,
}

impl MeshStrategy {
    /// Strategy building its BVH with `bvh`.
    pub fn new(bvh: BvhOptions) -> Self {
        Self { bvh }
    }

    fn bvh_for<'m>(&self, mesh: &'m mut Mesh) -> Result<(&'m Mesh, &'m Bvh)> {
        mesh.get_bvh(&self.bvh)?;
        let mesh: &'m Mesh = mesh;
        let bvh = mesh
            .cached_bvh()
            .ok_or_else(|| MeshError::InvalidState("BVH missing after rebuild".into()))?;
        Ok((mesh, bvh))
    }
}

struct Pick<'a> {
    view: &'a dyn ViewContext,
    bvh: &'a Bvh,
    origin: Point3<f64>,
    screen: Point2<f64>,
    opts: &'a FindNearestOptions,
}

impl Pick<'_> {
    fn cone(&self, dir: &Vector3<f64>) -> Option<Cone> {
        let bbox = self.bvh.root_bbox().filter(|b| b.is_valid())?;
        let reach = (bbox.center() - self.origin).norm() + bbox.radius();
        let length = reach * (1.0 + 1e-6) + 1e-6;
        let r2 = self.opts.limit * self.view.pixel_scale(length) * CONE_SLACK;
        Cone::new(self.origin, *dir, 0.0, r2, length)
    }

    fn is_visible(&self, p: &Point3<f64>) -> bool {
        let d = p - self.origin;
        let dist = d.norm();
        match self.bvh.cast_ray(&self.origin, &d) {
            Some(hit) => hit.dist >= dist * (1.0 - VISIBILITY_EPSILON),
            None => true,
        }
    }

    /// Screen position and pixel distance of `p`, if within the limit.
    fn measure(&self, p: &Point3<f64>, check_visible: bool) -> Option<(Point2<f64>, f64)> {
        let p2d = self.view.project(p)?;
        let dis = (p2d - self.screen).norm();
        if dis > self.opts.limit {
            return None;
        }
        if check_visible && self.opts.visible_only && !self.is_visible(p) {
            return None;
        }
        Some((p2d, dis))
    }
}

/// Point on segment `a`-`b` closest to the ray `origin + t * dir`, `dir`
/// unit length.
fn closest_on_segment_to_ray(
    origin: &Point3<f64>,
    dir: &Vector3<f64>,
    a: &Point3<f64>,
    b: &Point3<f64>,
) -> Point3<f64> {
    let ab = b - a;
    let len2 = ab.norm_squared();
    if len2 == 0.0 {
        return *a;
    }
    let w = origin - a;
    let bd = dir.dot(&ab);
    let denom = len2 - bd * bd;
    let s = if denom <= f64::EPSILON * len2 {
        0.0
    } else {
        (ab.dot(&w) - bd * dir.dot(&w)) / denom
    };
    a + ab * s.clamp(0.0, 1.0)
}

fn segment_distance(p: &Point3<f64>, a: &Point3<f64>, b: &Point3<f64>) -> f64 {
    let ab = b - a;
    let len2 = ab.norm_squared();
    let s = if len2 == 0.0 {
        0.0
    } else {
        ((p - a).dot(&ab) / len2).clamp(0.0, 1.0)
    };
    (p - (a + ab * s)).norm()
}

impl FindNearestStrategy for MeshStrategy {
    fn select_mask(&self) -> ElemTypes {
        ElemTypes::VERTEX | ElemTypes::EDGE | ElemTypes::FACE
    }

    fn find_nearest(
        &self,
        mesh: &mut Mesh,
        view: &dyn ViewContext,
        screen: &Point2<f64>,
        mask: ElemTypes,
        opts: &FindNearestOptions,
    ) -> Result<Vec<FindNearestRet>> {
        let (origin, dir) = view.ray(screen);
        let (mesh, bvh) = self.bvh_for(mesh)?;
        let pick = Pick {
            view,
            bvh,
            origin,
            screen: *screen,
            opts,
        };

        let Some(cone) = pick.cone(&dir) else {
            return Ok(Vec::new());
        };
        let direct = bvh.cast_ray(&origin, &dir);
        let mut out = Vec::new();

        let cone_verts = if mask.intersects(ElemTypes::VERTEX | ElemTypes::EDGE) {
            bvh.verts_in_cone(&cone)
        } else {
            Vec::new()
        };

        if mask.contains(ElemTypes::VERTEX) {
            for &v in &cone_verts {
                let vert = mesh.vert(v);
                if vert.flag.contains(MeshFlags::HIDE) {
                    continue;
                }
                if let Some((p2d, dis)) = pick.measure(&vert.co, true) {
                    out.push(FindNearestRet {
                        elem: ElemRef::Vertex(v),
                        p2d,
                        p3d: vert.co,
                        dis,
                    });
                }
            }
        }

        if mask.contains(ElemTypes::EDGE) {
            let mut seen: HashSet<EdgeId> = HashSet::new();
            let mut candidates = Vec::new();
            let faces = bvh.faces_in_cone(&cone, false);
            let around_faces = direct
                .iter()
                .map(|hit| hit.face)
                .chain(faces)
                .flat_map(|f| mesh.face_edges(f).collect::<Vec<_>>());
            let around_verts = cone_verts.iter().flat_map(|&v| mesh.vert_edges(v));
            for e in around_faces.chain(around_verts) {
                if seen.insert(e) {
                    candidates.push(e);
                }
            }

            for e in candidates {
                let edge = mesh.edge(e);
                if edge.flag.contains(MeshFlags::HIDE) {
                    continue;
                }
                let p3d = closest_on_segment_to_ray(&origin, &dir, mesh.co(edge.v1), mesh.co(edge.v2));
                if let Some((p2d, dis)) = pick.measure(&p3d, true) {
                    out.push(FindNearestRet {
                        elem: ElemRef::Edge(e),
                        p2d,
                        p3d,
                        dis,
                    });
                }
            }
        }

        if mask.contains(ElemTypes::FACE) {
            let under = direct
                .filter(|hit| !mesh.face(hit.face).flag.contains(MeshFlags::HIDE));
            if let Some(hit) = under {
                out.push(FindNearestRet {
                    elem: ElemRef::Face(hit.face),
                    p2d: *screen,
                    p3d: hit.p,
                    dis: 0.0,
                });
            }

            for f in bvh.faces_in_cone(&cone, opts.visible_only) {
                if under.is_some_and(|hit| hit.face == f) || mesh.face(f).flag.contains(MeshFlags::HIDE) {
                    continue;
                }
                let cent = mesh.calc_face_cent(f);
                if let Some((p2d, dis)) = pick.measure(&cent, false) {
                    out.push(FindNearestRet {
                        elem: ElemRef::Face(f),
                        p2d,
                        p3d: cent,
                        dis,
                    });
                }
            }
        }

        Ok(out)
    }

    /// The face hit by the pick ray. Without [`ElemTypes::FACE`] in `mask`,
    /// the hit face's vertex or edge nearest the hit point instead.
    fn cast_ray(
        &self,
        mesh: &mut Mesh,
        view: &dyn ViewContext,
        screen: &Point2<f64>,
        mask: ElemTypes,
    ) -> Result<Option<FindNearestRet>> {
        let (origin, dir) = view.ray(screen);
        let (mesh, bvh) = self.bvh_for(mesh)?;
        let Some(hit) = bvh.cast_ray(&origin, &dir) else {
            return Ok(None);
        };

        let elem = if mask.contains(ElemTypes::FACE) {
            Some(ElemRef::Face(hit.face))
        } else if mask.contains(ElemTypes::VERTEX) {
            mesh.face_verts(hit.face)
                .min_by(|&a, &b| {
                    let da = (mesh.co(a) - hit.p).norm_squared();
                    let db = (mesh.co(b) - hit.p).norm_squared();
                    da.total_cmp(&db)
                })
                .map(ElemRef::Vertex)
        } else if mask.contains(ElemTypes::EDGE) {
            let dist = |e: EdgeId| {
                let edge = mesh.edge(e);
                segment_distance(&hit.p, mesh.co(edge.v1), mesh.co(edge.v2))
            };
            mesh.face_edges(hit.face)
                .min_by(|&a, &b| dist(a).total_cmp(&dist(b)))
                .map(ElemRef::Edge)
        } else {
            None
        };

        Ok(elem.map(|elem| FindNearestRet {
            elem,
            p2d: *screen,
            p3d: hit.p,
            dis: hit.dist,
        }))
    }
}
