//! Cubic basis functions.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Cubic basis used to weight the 4 control points along one patch axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Basis {
    /// Bernstein polynomials. The patch interpolates its corner points.
    Bernstein,
    /// Uniform cubic B-spline segment. The patch approximates its control
    /// points and is C2 continuous with its neighbours.
    #[default]
    BSpline,
}

impl Basis {
    /// Weight of control point `i` (0..4) at parameter `t` in `[0, 1]`.
    ///
    /// # Panics
    ///
    /// Panics if `i >= 4`.
    #[inline]
    pub fn eval(self, i: usize, t: f64) -> f64 {
        self.weights(t)[i]
    }

    /// Derivative of [`Basis::eval`] with respect to `t`.
    ///
    /// # Panics
    ///
    /// Panics if `i >= 4`.
    #[inline]
    pub fn derivative(self, i: usize, t: f64) -> f64 {
        self.derivatives(t)[i]
    }

    /// All four weights at `t`. They sum to one.
    pub fn weights(self, t: f64) -> [f64; 4] {
        let s = 1.0 - t;
        match self {
            Basis::Bernstein => [s * s * s, 3.0 * t * s * s, 3.0 * t * t * s, t * t * t],
            Basis::BSpline => {
                let t2 = t * t;
                let t3 = t2 * t;
                [
                    s * s * s / 6.0,
                    (3.0 * t3 - 6.0 * t2 + 4.0) / 6.0,
                    (-3.0 * t3 + 3.0 * t2 + 3.0 * t + 1.0) / 6.0,
                    t3 / 6.0,
                ]
            }
        }
    }

    /// All four weight derivatives at `t`. They sum to zero.
    pub fn derivatives(self, t: f64) -> [f64; 4] {
        let s = 1.0 - t;
        match self {
            // n * (B[i-1, n-1] - B[i, n-1]) with n = 3
            Basis::Bernstein => [
                -3.0 * s * s,
                3.0 * s * s - 6.0 * t * s,
                6.0 * t * s - 3.0 * t * t,
                3.0 * t * t,
            ],
            Basis::BSpline => [
                -s * s / 2.0,
                (3.0 * t * t - 4.0 * t) / 2.0,
                (-3.0 * t * t + 2.0 * t + 1.0) / 2.0,
                t * t / 2.0,
            ],
        }
    }
}
