//! Four patches sharing one parameter domain.

use super::cubic::CubicPatch;
use super::{PatchBase, PatchSample};

/// Four sub-patches covering the quadrants of `[0, 1]²`.
///
/// Each sub-patch is parameterised from the domain center outwards, as
/// when a quad is split into four corner patches that meet at its center.
/// For sub-patch parameters `(a, b)`:
///
/// | quadrant             | patch | `a`      | `b`      |
/// |----------------------|-------|----------|----------|
/// | `u <= ½`, `v <= ½`   | 0     | `1 - 2u` | `1 - 2v` |
/// | `u <= ½`, `v >= ½`   | 1     | `2v - 1` | `1 - 2u` |
/// | `u >= ½`, `v >= ½`   | 2     | `2u - 1` | `2v - 1` |
/// | otherwise            | 3     | `1 - 2v` | `2u - 1` |
///
/// Derivatives are mapped back to `(u, v)` by the chain rule.
#[derive(Debug, Clone, PartialEq)]
pub struct Patch4<P = CubicPatch> {
    /// Sub-patches in quadrant order.
    pub patches: [P; 4],
}

impl<P: PatchBase> Patch4<P> {
    /// Combine four sub-patches.
    pub fn new(patches: [P; 4]) -> Self {
        Self { patches }
    }

    /// Quadrant index for `(u, v)`.
    pub fn quadrant(u: f64, v: f64) -> usize {
        if u <= 0.5 && v <= 0.5 {
            0
        } else if u <= 0.5 {
            1
        } else if v >= 0.5 {
            2
        } else {
            3
        }
    }
}

impl<P: PatchBase> PatchBase for Patch4<P> {
    fn evaluate_full(&self, u: f64, v: f64) -> PatchSample {
        let q = Self::quadrant(u, v);
        let (a, b) = match q {
            0 => (1.0 - 2.0 * u, 1.0 - 2.0 * v),
            1 => (2.0 * v - 1.0, 1.0 - 2.0 * u),
            2 => (2.0 * u - 1.0, 2.0 * v - 1.0),
            _ => (1.0 - 2.0 * v, 2.0 * u - 1.0),
        };

        let s = self.patches[q].evaluate_full(a, b);
        let (da, db) = (s.dv_u * 2.0, s.dv_v * 2.0);
        let (dv_u, dv_v) = match q {
            0 => (-da, -db),
            1 => (-db, da),
            2 => (da, db),
            _ => (db, -da),
        };

        PatchSample::new(s.p, dv_u, dv_v)
    }
}
