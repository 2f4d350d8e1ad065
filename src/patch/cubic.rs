//! Bicubic patch over a 4x4 control grid.

use nalgebra::{Point3, Vector3};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use super::basis::Basis;
use super::{PatchBase, PatchSample};

/// Number of scalars in a control grid: 16 points of 3 components.
pub const KTOT: usize = 16 * 3;

/// Inward nudge applied to `u` and `v` before evaluation, keeping the
/// basis away from the exact domain boundary.
pub const EVAL_EPSILON: f64 = 5e-6;

bitflags::bitflags! {
    /// Patch state bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    #[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
    pub struct PatchFlags: u32 {
        /// Patch is selected.
        const SELECT = 1;
        /// Control points changed since the flag was last cleared.
        const UPDATE = 2;
    }
}

/// A bicubic patch: 16 control points weighted by a [`Basis`] in each
/// direction.
///
/// Control point `(x, y)` sits at flat offset `(y * 4 + x) * 3`; `x` runs
/// along `u` and `y` along `v`. The basis is fixed at construction.
///
/// Control points can be accumulated from several contributors with
/// [`CubicPatch::add_point`] and averaged by [`CubicPatch::finish_points`].
///
/// # Panics
///
/// Point accessors panic if `x` or `y` is not in `0..4`.
///
/// # Example
///
/// ```
/// use loopmesh::patch::{Basis, CubicPatch, PatchBase};
/// use nalgebra::Point3;
///
/// let patch = CubicPatch::from_fn(Basis::Bernstein, |x, y| {
///     Point3::new(x as f64, y as f64, 0.0)
/// });
/// let p = patch.evaluate(0.5, 0.5);
/// assert!((p - Point3::new(1.5, 1.5, 0.0)).norm() < 1e-9);
/// ```
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct CubicPatch {
    points: [[f64; 3]; 16],
    point_tots: [f64; 16],
    basis: Basis,
    /// State bits.
    pub flag: PatchFlags,
}

impl Default for CubicPatch {
    fn default() -> Self {
        Self::new(Basis::default())
    }
}

#[inline]
fn point_index(x: usize, y: usize) -> usize {
    assert!(x < 4 && y < 4, "control point ({}, {}) out of range", x, y);
    y * 4 + x
}

#[inline]
fn nudge(t: f64) -> f64 {
    EVAL_EPSILON + t * (1.0 - EVAL_EPSILON * 2.0)
}

impl CubicPatch {
    /// Create a patch with every control point at the origin.
    pub fn new(basis: Basis) -> Self {
        Self {
            points: [[0.0; 3]; 16],
            point_tots: [0.0; 16],
            basis,
            flag: PatchFlags::empty(),
        }
    }

    /// Create a patch with control point `(x, y)` at `f(x, y)`.
    pub fn from_fn(basis: Basis, mut f: impl FnMut(usize, usize) -> Point3<f64>) -> Self {
        let mut patch = Self::new(basis);
        for y in 0..4 {
            for x in 0..4 {
                patch.set_point(x, y, &f(x, y));
            }
        }
        patch
    }

    /// Create a patch from a flat `[x0, y0, z0, x1, ...]` array.
    pub fn from_flat(basis: Basis, flat: &[f64; KTOT]) -> Self {
        let mut patch = Self::new(basis);
        for (dst, src) in patch.points.iter_mut().zip(flat.chunks_exact(3)) {
            dst.copy_from_slice(src);
        }
        patch.point_tots = [1.0; 16];
        patch.flag |= PatchFlags::UPDATE;
        patch
    }

    /// The control grid as a flat array.
    pub fn to_flat(&self) -> [f64; KTOT] {
        let mut flat = [0.0; KTOT];
        for (dst, src) in flat.chunks_exact_mut(3).zip(&self.points) {
            dst.copy_from_slice(src);
        }
        flat
    }

    /// The basis this patch evaluates with.
    #[inline]
    pub fn basis(&self) -> Basis {
        self.basis
    }

    /// Control point `(x, y)`.
    #[inline]
    pub fn get_point(&self, x: usize, y: usize) -> Point3<f64> {
        let [px, py, pz] = self.points[point_index(x, y)];
        Point3::new(px, py, pz)
    }

    /// Set control point `(x, y)`, resetting its accumulated weight to one.
    pub fn set_point(&mut self, x: usize, y: usize, p: &Point3<f64>) -> &mut Self {
        let i = point_index(x, y);
        self.points[i] = [p.x, p.y, p.z];
        self.point_tots[i] = 1.0;
        self.flag |= PatchFlags::UPDATE;
        self
    }

    /// Accumulate `p * fac` into control point `(x, y)` and add `fac` to its
    /// weight.
    pub fn add_point(&mut self, x: usize, y: usize, p: &Point3<f64>, fac: f64) -> &mut Self {
        let i = point_index(x, y);
        for (c, v) in self.points[i].iter_mut().zip(p.coords.iter()) {
            *c += v * fac;
        }
        self.point_tots[i] += fac;
        self.flag |= PatchFlags::UPDATE;
        self
    }

    /// Divide every accumulated point by its total weight.
    ///
    /// Points with zero weight are left as they are. Finished points have
    /// weight one, so finishing twice changes nothing.
    pub fn finish_points(&mut self) {
        for i in 0..16 {
            let tot = self.point_tots[i];
            if tot != 0.0 {
                self.mul_scalar_point(i % 4, i / 4, 1.0 / tot);
                self.point_tots[i] = 1.0;
            }
        }
    }

    /// Scale control point `(x, y)` by `f`.
    pub fn mul_scalar_point(&mut self, x: usize, y: usize, f: f64) -> &mut Self {
        for c in self.points[point_index(x, y)].iter_mut() {
            *c *= f;
        }
        self.flag |= PatchFlags::UPDATE;
        self
    }

    /// Accumulated weight of control point `(x, y)`.
    #[inline]
    pub fn point_weight(&self, x: usize, y: usize) -> f64 {
        self.point_tots[point_index(x, y)]
    }

    /// Reset every control point and weight to zero.
    pub fn clear(&mut self) {
        self.points = [[0.0; 3]; 16];
        self.point_tots = [0.0; 16];
        self.flag |= PatchFlags::UPDATE;
    }
}

impl PatchBase for CubicPatch {
    fn evaluate_full(&self, u: f64, v: f64) -> PatchSample {
        let u = nudge(u);
        let v = nudge(v);

        let wu = self.basis.weights(u);
        let wv = self.basis.weights(v);
        let du = self.basis.derivatives(u);
        let dv = self.basis.derivatives(v);

        let mut p = Vector3::zeros();
        let mut dv_u = Vector3::zeros();
        let mut dv_v = Vector3::zeros();

        for j in 0..4 {
            for i in 0..4 {
                let c = Vector3::from(self.points[j * 4 + i]);
                p += c * (wu[i] * wv[j]);
                dv_u += c * (du[i] * wv[j]);
                dv_v += c * (wu[i] * dv[j]);
            }
        }

        PatchSample::new(Point3::from(p), dv_u, dv_v)
    }
}
