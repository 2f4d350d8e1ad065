//! Parametric surface patches.
//!
//! A [`CubicPatch`] evaluates a smooth surface from a 4x4 control grid using
//! either the [`Basis::Bernstein`] or [`Basis::BSpline`] basis. A [`Patch4`]
//! stitches four patches into one `[0, 1]²` domain, one per quadrant, as
//! produced when a quad is split around its center.
//!
//! Every patch kind implements [`PatchBase`], which also provides tangent
//! frames for mapping local offsets onto the surface.
//!
//! # Orientation
//!
//! Normals are `normalize(cross(dv_v, dv_u))`: the v derivative crossed with
//! the u derivative. Tangent frames instead use `cross(dv_u, dv_v)` for their
//! third axis, so the two point opposite ways.

mod basis;
mod cubic;
mod patch4;

use nalgebra::{Matrix4, Point3, Vector3};

pub use basis::Basis;
pub use cubic::{CubicPatch, PatchFlags, EVAL_EPSILON, KTOT};
pub use patch4::Patch4;

use crate::error::{MeshError, Result};
use crate::mesh::LoopId;

/// Inward nudge applied before building a tangent frame.
const TANGENT_EPSILON: f64 = 1e-6;

/// Lower bound on the normal axis length of a tangent frame.
const MIN_FRAME_SCALE: f64 = 1e-4;

/// Position, first derivatives and normal at one `(u, v)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PatchSample {
    /// Surface point.
    pub p: Point3<f64>,
    /// Derivative along `u`.
    pub dv_u: Vector3<f64>,
    /// Derivative along `v`.
    pub dv_v: Vector3<f64>,
    /// `normalize(cross(dv_v, dv_u))`; zero where the derivatives are
    /// parallel or vanish.
    pub normal: Vector3<f64>,
}

impl PatchSample {
    /// Bundle a point and derivatives, computing the normal.
    pub fn new(p: Point3<f64>, dv_u: Vector3<f64>, dv_v: Vector3<f64>) -> Self {
        let normal = dv_v
            .cross(&dv_u)
            .try_normalize(f64::MIN_POSITIVE)
            .unwrap_or_else(Vector3::zeros);
        Self { p, dv_u, dv_v, normal }
    }
}

/// A surface parameterised over `[0, 1]²`.
pub trait PatchBase {
    /// Evaluate position, derivatives and normal at `(u, v)`.
    fn evaluate_full(&self, u: f64, v: f64) -> PatchSample;

    /// Surface point at `(u, v)`.
    fn evaluate(&self, u: f64, v: f64) -> Point3<f64> {
        self.evaluate_full(u, v).p
    }

    /// Derivative along `u`.
    fn derivative_u(&self, u: f64, v: f64) -> Vector3<f64> {
        self.evaluate_full(u, v).dv_u
    }

    /// Derivative along `v`.
    fn derivative_v(&self, u: f64, v: f64) -> Vector3<f64> {
        self.evaluate_full(u, v).dv_v
    }

    /// Unit normal, `normalize(cross(dv_v, dv_u))`.
    fn normal(&self, u: f64, v: f64) -> Vector3<f64> {
        self.evaluate_full(u, v).normal
    }

    /// Local frame at `(u, v)` as an affine matrix.
    ///
    /// The translation is the surface point. With `lu = |dv_u|` and
    /// `lv = |dv_v|`, the third column is the frame normal
    /// `cross(dv_u, dv_v)` scaled to `max((lu + lv) / 2, 1e-4)`; the second
    /// column is `cross(normal, dv_u)` scaled to `lu`; the first is
    /// `cross(second, normal)` scaled to `lv`. The frame is orthogonal and
    /// its axis lengths follow the local stretch of the surface.
    ///
    /// Fails with [`MeshError::DegenerateTangent`] when a derivative is zero
    /// or the two are parallel.
    fn try_build_tangent_matrix(&self, u: f64, v: f64) -> Result<Matrix4<f64>> {
        let u = TANGENT_EPSILON + u * (1.0 - TANGENT_EPSILON * 2.0);
        let v = TANGENT_EPSILON + v * (1.0 - TANGENT_EPSILON * 2.0);
        let s = self.evaluate_full(u, v);

        let lx = s.dv_u.norm();
        let ly = s.dv_v.norm();
        if lx == 0.0 || ly == 0.0 {
            return Err(MeshError::DegenerateTangent { u, v });
        }

        let scale = ((lx + ly) * 0.5).max(MIN_FRAME_SCALE);
        let vx = s.dv_u / lx;
        let vy = s.dv_v / ly;

        let n = vx
            .cross(&vy)
            .try_normalize(f64::MIN_POSITIVE)
            .ok_or(MeshError::DegenerateTangent { u, v })?
            * scale;
        let vy = n.cross(&vx).normalize() * lx;
        let vx = vy.cross(&n).normalize() * ly;

        let mut m = Matrix4::identity();
        m.fixed_view_mut::<3, 1>(0, 0).copy_from(&vx);
        m.fixed_view_mut::<3, 1>(0, 1).copy_from(&vy);
        m.fixed_view_mut::<3, 1>(0, 2).copy_from(&n);
        m.fixed_view_mut::<3, 1>(0, 3).copy_from(&s.p.coords);
        Ok(m)
    }

    /// [`PatchBase::try_build_tangent_matrix`], logging a warning and
    /// returning the identity matrix for degenerate frames.
    fn build_tangent_matrix(&self, u: f64, v: f64) -> Matrix4<f64> {
        self.try_build_tangent_matrix(u, v).unwrap_or_else(|err| {
            log::warn!("{}; using identity frame", err);
            Matrix4::identity()
        })
    }
}

/// A patch generated for one face corner.
#[derive(Debug, Clone, PartialEq)]
pub struct SsPatch<P = CubicPatch> {
    /// The surface.
    pub patch: P,
    /// Loop the patch was built for.
    pub l: LoopId,
}

impl<P: PatchBase> SsPatch<P> {
    /// Pair `patch` with `l`.
    pub fn new(patch: P, l: LoopId) -> Self {
        Self { patch, l }
    }
}

impl<P: PatchBase> PatchBase for SsPatch<P> {
    fn evaluate_full(&self, u: f64, v: f64) -> PatchSample {
        self.patch.evaluate_full(u, v)
    }
}
