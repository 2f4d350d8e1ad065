//! Bounding volumes used by the BVH.

use nalgebra::{Point3, Vector3};

/// Axis-aligned bounding box.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb {
    /// Minimum corner.
    pub min: Point3<f64>,
    /// Maximum corner.
    pub max: Point3<f64>,
}

impl Default for Aabb {
    fn default() -> Self {
        Self::empty()
    }
}

impl Aabb {
    /// Create an empty (inverted) bounding box.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            min: Point3::new(f64::MAX, f64::MAX, f64::MAX),
            max: Point3::new(f64::MIN, f64::MIN, f64::MIN),
        }
    }

    /// Create a bounding box from a triangle.
    #[must_use]
    pub fn from_triangle(v0: &Point3<f64>, v1: &Point3<f64>, v2: &Point3<f64>) -> Self {
        Self {
            min: v0.inf(v1).inf(v2),
            max: v0.sup(v1).sup(v2),
        }
    }

    /// Create a bounding box from min and max points.
    #[must_use]
    pub fn from_min_max(min: Point3<f64>, max: Point3<f64>) -> Self {
        Self { min, max }
    }

    /// Expand this bounding box to include another.
    pub fn expand(&mut self, other: &Self) {
        self.min = self.min.inf(&other.min);
        self.max = self.max.sup(&other.max);
    }

    /// Expand this bounding box to include a point.
    pub fn expand_point(&mut self, point: &Point3<f64>) {
        self.min = self.min.inf(point);
        self.max = self.max.sup(point);
    }

    /// Check if this bounding box intersects another, with tolerance.
    #[must_use]
    pub fn intersects(&self, other: &Self, tolerance: f64) -> bool {
        !(self.max.x + tolerance < other.min.x
            || other.max.x + tolerance < self.min.x
            || self.max.y + tolerance < other.min.y
            || other.max.y + tolerance < self.min.y
            || self.max.z + tolerance < other.min.z
            || other.max.z + tolerance < self.min.z)
    }

    /// Check if `point` lies inside or on the box.
    #[must_use]
    pub fn contains_point(&self, point: &Point3<f64>) -> bool {
        (0..3).all(|i| point[i] >= self.min[i] && point[i] <= self.max[i])
    }

    /// Get the center of this bounding box.
    #[must_use]
    pub fn center(&self) -> Point3<f64> {
        nalgebra::center(&self.min, &self.max)
    }

    /// Get the index of the longest axis (0=X, 1=Y, 2=Z).
    #[must_use]
    pub fn longest_axis(&self) -> usize {
        let [dx, dy, dz] = self.extent();

        if dx >= dy && dx >= dz {
            0
        } else if dy >= dz {
            1
        } else {
            2
        }
    }

    /// Get the extent (size) along each axis.
    #[must_use]
    pub fn extent(&self) -> [f64; 3] {
        [
            self.max.x - self.min.x,
            self.max.y - self.min.y,
            self.max.z - self.min.z,
        ]
    }

    /// Half the length of the diagonal.
    #[must_use]
    pub fn radius(&self) -> f64 {
        (self.max - self.min).norm() * 0.5
    }

    /// Get the surface area of this bounding box.
    #[must_use]
    pub fn surface_area(&self) -> f64 {
        let [dx, dy, dz] = self.extent();
        2.0 * (dx * dy + dy * dz + dz * dx)
    }

    /// Check if this bounding box is valid (non-empty).
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.min.x <= self.max.x && self.min.y <= self.max.y && self.min.z <= self.max.z
    }

    /// Pad this bounding box by a given amount in all directions.
    #[must_use]
    pub fn padded(&self, padding: f64) -> Self {
        let pad = Vector3::repeat(padding);
        Self {
            min: self.min - pad,
            max: self.max + pad,
        }
    }

    /// Squared distance from `point` to the box; zero inside.
    #[must_use]
    pub fn distance_squared(&self, point: &Point3<f64>) -> f64 {
        let mut d = 0.0;
        for i in 0..3 {
            let v = point[i];
            if v < self.min[i] {
                d += (self.min[i] - v).powi(2);
            } else if v > self.max[i] {
                d += (v - self.max[i]).powi(2);
            }
        }
        d
    }

    /// Slab test. Returns the parametric entry distance of the ray
    /// `origin + t * inv_dir.recip()` if it meets the box within `[0, t_max]`.
    #[must_use]
    pub fn ray_entry(&self, origin: &Point3<f64>, inv_dir: &Vector3<f64>, t_max: f64) -> Option<f64> {
        let mut t0 = 0.0_f64;
        let mut t1 = t_max;

        for i in 0..3 {
            let mut near = (self.min[i] - origin[i]) * inv_dir[i];
            let mut far = (self.max[i] - origin[i]) * inv_dir[i];
            if near > far {
                std::mem::swap(&mut near, &mut far);
            }
            // NaN from 0 * inf means the ray runs inside this slab's plane
            if !near.is_nan() {
                t0 = t0.max(near);
            }
            if !far.is_nan() {
                t1 = t1.min(far);
            }
            if t0 > t1 {
                return None;
            }
        }
        Some(t0)
    }
}

/// A truncated cone: apex at `origin`, opening along `dir`, with radius
/// `r1` at the apex growing linearly to `r2` at distance `length`.
///
/// Used for screen-space picking, where a circle of pixels spans a larger
/// world radius the farther it is from the camera.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Cone {
    /// Apex.
    pub origin: Point3<f64>,
    /// Unit axis.
    pub dir: Vector3<f64>,
    /// Radius at the apex.
    pub r1: f64,
    /// Radius at `length`.
    pub r2: f64,
    /// Axial length.
    pub length: f64,
}

impl Cone {
    /// Create a cone. `dir` is normalised; a zero `dir` yields `None`.
    #[must_use]
    pub fn new(origin: Point3<f64>, dir: Vector3<f64>, r1: f64, r2: f64, length: f64) -> Option<Self> {
        let dir = dir.try_normalize(f64::EPSILON)?;
        Some(Self {
            origin,
            dir,
            r1,
            r2,
            length,
        })
    }

    /// Radius at axial distance `t`.
    #[inline]
    #[must_use]
    pub fn radius_at(&self, t: f64) -> f64 {
        let s = if self.length > 0.0 { t / self.length } else { 0.0 };
        self.r1 * (1.0 - s) + self.r2 * s
    }

    /// Check if `p` lies inside the cone.
    #[must_use]
    pub fn contains(&self, p: &Point3<f64>) -> bool {
        let d = p - self.origin;
        let t = d.dot(&self.dir);
        if t < 0.0 || t >= self.length {
            return false;
        }
        let r = self.radius_at(t);
        (d - self.dir * t).norm_squared() < r * r
    }

    /// Conservative overlap test against a box, via its bounding sphere.
    #[must_use]
    pub fn may_intersect(&self, bbox: &Aabb) -> bool {
        let c = bbox.center();
        let rad = bbox.radius();
        let d = c - self.origin;
        let t = d.dot(&self.dir);
        if t + rad < 0.0 || t - rad >= self.length {
            return false;
        }
        let r = self.radius_at(t.clamp(0.0, self.length)).max(self.r1).max(self.r2);
        (d - self.dir * t).norm() <= r + rad
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn unit() -> Aabb {
        Aabb::from_min_max(Point3::origin(), Point3::new(1.0, 1.0, 1.0))
    }

    #[test]
    fn test_expand_and_center() {
        let mut bbox = Aabb::empty();
        assert!(!bbox.is_valid());
        bbox.expand_point(&Point3::new(1.0, 2.0, 3.0));
        bbox.expand_point(&Point3::new(-1.0, 0.0, 1.0));
        assert!(bbox.is_valid());
        assert_eq!(bbox.center(), Point3::new(0.0, 1.0, 2.0));
        assert_eq!(bbox.longest_axis(), 0);
        assert_relative_eq!(bbox.surface_area(), 2.0 * (4.0 + 4.0 + 4.0));
    }

    #[test]
    fn test_distance_squared() {
        let bbox = unit();
        assert_eq!(bbox.distance_squared(&Point3::new(0.5, 0.5, 0.5)), 0.0);
        assert_relative_eq!(bbox.distance_squared(&Point3::new(2.0, 0.5, 0.5)), 1.0);
        assert_relative_eq!(bbox.distance_squared(&Point3::new(2.0, 2.0, 0.5)), 2.0);
    }

    #[test]
    fn test_ray_entry() {
        let bbox = unit();
        let origin = Point3::new(0.5, 0.5, -2.0);
        let inv = Vector3::new(0.0, 0.0, 1.0).map(|x: f64| x.recip());

        let t = bbox.ray_entry(&origin, &inv, f64::MAX).unwrap();
        assert_relative_eq!(t, 2.0);
        assert!(bbox.ray_entry(&origin, &inv, 1.0).is_none());

        let behind = Point3::new(0.5, 0.5, 3.0);
        assert!(bbox.ray_entry(&behind, &inv, f64::MAX).is_none());

        let inside = Point3::new(0.5, 0.5, 0.5);
        assert_eq!(bbox.ray_entry(&inside, &inv, f64::MAX), Some(0.0));
    }

    #[test]
    fn test_cone_contains() {
        let cone = Cone::new(Point3::origin(), Vector3::new(0.0, 0.0, 2.0), 1.0, 3.0, 10.0).unwrap();
        assert_relative_eq!(cone.dir.z, 1.0);
        assert_relative_eq!(cone.radius_at(5.0), 2.0);

        assert!(cone.contains(&Point3::new(1.9, 0.0, 5.0)));
        assert!(!cone.contains(&Point3::new(2.1, 0.0, 5.0)));
        assert!(!cone.contains(&Point3::new(0.0, 0.0, -0.1)));
        assert!(!cone.contains(&Point3::new(0.0, 0.0, 10.0)));
    }

    #[test]
    fn test_cone_box_overlap() {
        let cone = Cone::new(Point3::origin(), Vector3::z(), 0.1, 0.1, 10.0).unwrap();
        let on_axis = Aabb::from_min_max(Point3::new(-0.5, -0.5, 4.0), Point3::new(0.5, 0.5, 5.0));
        let far_off = Aabb::from_min_max(Point3::new(5.0, 5.0, 4.0), Point3::new(6.0, 6.0, 5.0));
        let behind = Aabb::from_min_max(Point3::new(-0.5, -0.5, -5.0), Point3::new(0.5, 0.5, -4.0));

        assert!(cone.may_intersect(&on_axis));
        assert!(!cone.may_intersect(&far_off));
        assert!(!cone.may_intersect(&behind));
        assert!(Cone::new(Point3::origin(), Vector3::zeros(), 1.0, 1.0, 1.0).is_none());
    }
}
