//! Per-element attribute values and their layer kinds.

use std::hash::{Hash, Hasher};

use nalgebra::{Vector2, Vector3, Vector4};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use super::CdFlags;
use crate::error::{MeshError, Result};
use crate::mesh::ElemTypes;

/// The closed set of attribute kinds a layer can hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum LayerKind {
    /// Texture coordinate, stored per loop.
    Uv,
    /// Generic 2D vector.
    Vec2,
    /// Generic 3D vector.
    Vec3,
    /// Generic 4D vector.
    Vec4,
    /// Generic scalar.
    Float,
    /// Generic integer.
    Int,
    /// Unit normal; renormalised after blending.
    Normal,
    /// RGBA color.
    Color,
    /// Sculpt mask, defaults to 1.
    Mask,
    /// Index of the source element this one was derived from. Never blended.
    OrigIndex,
}

impl LayerKind {
    /// Every kind, in declaration order.
    pub const ALL: [LayerKind; 10] = [
        LayerKind::Uv,
        LayerKind::Vec2,
        LayerKind::Vec3,
        LayerKind::Vec4,
        LayerKind::Float,
        LayerKind::Int,
        LayerKind::Normal,
        LayerKind::Color,
        LayerKind::Mask,
        LayerKind::OrigIndex,
    ];

    /// Registry key of the kind.
    pub fn type_name(self) -> &'static str {
        match self {
            LayerKind::Uv => "uv",
            LayerKind::Vec2 => "vec2",
            LayerKind::Vec3 => "vec3",
            LayerKind::Vec4 => "vec4",
            LayerKind::Float => "float",
            LayerKind::Int => "int",
            LayerKind::Normal => "normal",
            LayerKind::Color => "color",
            LayerKind::Mask => "mask",
            LayerKind::OrigIndex => "origindex",
        }
    }

    /// Name given to a new layer when the caller supplies none.
    pub fn default_name(self) -> &'static str {
        match self {
            LayerKind::Uv => "UV",
            LayerKind::Vec2 => "Vec2",
            LayerKind::Vec3 => "Vec3",
            LayerKind::Vec4 => "Vec4",
            LayerKind::Float => "Float",
            LayerKind::Int => "Int",
            LayerKind::Normal => "Normal",
            LayerKind::Color => "Color",
            LayerKind::Mask => "Mask",
            LayerKind::OrigIndex => "Original Index",
        }
    }

    /// Element types this kind may be attached to.
    pub fn elem_types(self) -> ElemTypes {
        match self {
            LayerKind::Uv => ElemTypes::LOOP,
            LayerKind::Mask => ElemTypes::VERTEX,
            LayerKind::Normal | LayerKind::Color => ElemTypes::VERTEX | ElemTypes::LOOP,
            _ => ElemTypes::all(),
        }
    }

    /// Flags new layers of this kind start with.
    pub fn default_flags(self) -> CdFlags {
        match self {
            LayerKind::OrigIndex => CdFlags::NO_INTERP_COPY_ONLY,
            LayerKind::Mask => CdFlags::SINGLE_LAYER,
            _ => CdFlags::empty(),
        }
    }

    /// A fresh instance with the kind's default value.
    pub fn default_elem(self) -> CustomDataElem {
        match self {
            LayerKind::Uv => CustomDataElem::Uv(Vector2::zeros()),
            LayerKind::Vec2 => CustomDataElem::Vec2(Vector2::zeros()),
            LayerKind::Vec3 => CustomDataElem::Vec3(Vector3::zeros()),
            LayerKind::Vec4 => CustomDataElem::Vec4(Vector4::zeros()),
            LayerKind::Float => CustomDataElem::Float(0.0),
            LayerKind::Int => CustomDataElem::Int(0),
            LayerKind::Normal => CustomDataElem::Normal(Vector3::z()),
            LayerKind::Color => CustomDataElem::Color(Vector4::new(1.0, 1.0, 1.0, 1.0)),
            LayerKind::Mask => CustomDataElem::Mask(1.0),
            LayerKind::OrigIndex => CustomDataElem::OrigIndex(-1),
        }
    }
}

/// One attribute value attached to one element.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum CustomDataElem {
    /// See [`LayerKind::Uv`].
    Uv(Vector2<f64>),
    /// See [`LayerKind::Vec2`].
    Vec2(Vector2<f64>),
    /// See [`LayerKind::Vec3`].
    Vec3(Vector3<f64>),
    /// See [`LayerKind::Vec4`].
    Vec4(Vector4<f64>),
    /// See [`LayerKind::Float`].
    Float(f64),
    /// See [`LayerKind::Int`].
    Int(i64),
    /// See [`LayerKind::Normal`].
    Normal(Vector3<f64>),
    /// See [`LayerKind::Color`].
    Color(Vector4<f64>),
    /// See [`LayerKind::Mask`].
    Mask(f64),
    /// See [`LayerKind::OrigIndex`].
    OrigIndex(i64),
}

/// Weighted sum of the payloads of `sources`, which must all be `$variant`.
macro_rules! blend {
    ($variant:ident, $zero:expr, $sources:expr, $weights:expr) => {{
        let mut acc = $zero;
        for (src, &w) in $sources.iter().zip($weights) {
            match src {
                CustomDataElem::$variant(value) => acc += *value * w,
                other => {
                    return Err(MeshError::LayerKindMismatch {
                        expected: LayerKind::$variant.type_name(),
                        found: other.kind().type_name(),
                    })
                }
            }
        }
        acc
    }};
}

impl CustomDataElem {
    /// Kind of this value.
    pub fn kind(&self) -> LayerKind {
        match self {
            CustomDataElem::Uv(_) => LayerKind::Uv,
            CustomDataElem::Vec2(_) => LayerKind::Vec2,
            CustomDataElem::Vec3(_) => LayerKind::Vec3,
            CustomDataElem::Vec4(_) => LayerKind::Vec4,
            CustomDataElem::Float(_) => LayerKind::Float,
            CustomDataElem::Int(_) => LayerKind::Int,
            CustomDataElem::Normal(_) => LayerKind::Normal,
            CustomDataElem::Color(_) => LayerKind::Color,
            CustomDataElem::Mask(_) => LayerKind::Mask,
            CustomDataElem::OrigIndex(_) => LayerKind::OrigIndex,
        }
    }

    /// Copy this value into `dest`, which must be of the same kind.
    pub fn copy_to(&self, dest: &mut CustomDataElem) -> Result<()> {
        if self.kind() != dest.kind() {
            return Err(MeshError::LayerKindMismatch {
                expected: dest.kind().type_name(),
                found: self.kind().type_name(),
            });
        }
        *dest = self.clone();
        Ok(())
    }

    /// Overwrite `self` with the weighted blend of `sources`.
    ///
    /// `OrigIndex` copies the first source. If the weights sum to zero the
    /// value is left unchanged and [`MeshError::ZeroWeight`] is returned.
    pub fn interp(&mut self, sources: &[&CustomDataElem], weights: &[f64]) -> Result<()> {
        if sources.is_empty() {
            return Ok(());
        }

        if self.kind() == LayerKind::OrigIndex {
            return sources[0].copy_to(self);
        }

        let total: f64 = weights.iter().take(sources.len()).sum();
        if total.abs() < f64::EPSILON {
            return Err(MeshError::ZeroWeight);
        }

        *self = match self.kind() {
            LayerKind::Uv => {
                CustomDataElem::Uv(blend!(Uv, Vector2::zeros(), sources, weights))
            }
            LayerKind::Vec2 => {
                CustomDataElem::Vec2(blend!(Vec2, Vector2::zeros(), sources, weights))
            }
            LayerKind::Vec3 => {
                CustomDataElem::Vec3(blend!(Vec3, Vector3::zeros(), sources, weights))
            }
            LayerKind::Vec4 => {
                CustomDataElem::Vec4(blend!(Vec4, Vector4::zeros(), sources, weights))
            }
            LayerKind::Float => CustomDataElem::Float(blend!(Float, 0.0, sources, weights)),
            LayerKind::Mask => CustomDataElem::Mask(blend!(Mask, 0.0, sources, weights)),
            LayerKind::Int => {
                let mut acc = 0.0;
                for (src, &w) in sources.iter().zip(weights) {
                    match src {
                        CustomDataElem::Int(value) => acc += *value as f64 * w,
                        other => {
                            return Err(MeshError::LayerKindMismatch {
                                expected: "int",
                                found: other.kind().type_name(),
                            })
                        }
                    }
                }
                CustomDataElem::Int((acc + 0.5).floor() as i64)
            }
            LayerKind::Normal => {
                let n = blend!(Normal, Vector3::zeros(), sources, weights);
                // zero-length blends stay zero
                CustomDataElem::Normal(n.try_normalize(f64::EPSILON).unwrap_or(n))
            }
            LayerKind::Color => {
                CustomDataElem::Color(blend!(Color, Vector4::zeros(), sources, weights))
            }
            LayerKind::OrigIndex => return sources[0].copy_to(self),
        };

        Ok(())
    }

    /// Contribution of this value to a structural hash.
    ///
    /// Components are snapped to multiples of `snap_limit` so values within
    /// the snap distance hash equally.
    pub fn calc_hash(&self, snap_limit: f64) -> u64 {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        self.kind().hash(&mut hasher);

        let snap = |x: f64| -> i64 {
            if snap_limit > 0.0 {
                (x / snap_limit).floor() as i64
            } else {
                x.to_bits() as i64
            }
        };

        match self {
            CustomDataElem::Uv(v) | CustomDataElem::Vec2(v) => {
                v.iter().for_each(|&x| snap(x).hash(&mut hasher))
            }
            CustomDataElem::Vec3(v) | CustomDataElem::Normal(v) => {
                v.iter().for_each(|&x| snap(x).hash(&mut hasher))
            }
            CustomDataElem::Vec4(v) | CustomDataElem::Color(v) => {
                v.iter().for_each(|&x| snap(x).hash(&mut hasher))
            }
            CustomDataElem::Float(x) | CustomDataElem::Mask(x) => snap(*x).hash(&mut hasher),
            CustomDataElem::Int(i) | CustomDataElem::OrigIndex(i) => i.hash(&mut hasher),
        }

        hasher.finish()
    }

    /// Scalar payload of `Float` and `Mask` values.
    pub fn as_float(&self) -> Option<f64> {
        match self {
            CustomDataElem::Float(x) | CustomDataElem::Mask(x) => Some(*x),
            _ => None,
        }
    }

    /// Integer payload of `Int` and `OrigIndex` values.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            CustomDataElem::Int(i) | CustomDataElem::OrigIndex(i) => Some(*i),
            _ => None,
        }
    }

    /// Payload of 2D values.
    pub fn as_vec2(&self) -> Option<Vector2<f64>> {
        match self {
            CustomDataElem::Uv(v) | CustomDataElem::Vec2(v) => Some(*v),
            _ => None,
        }
    }

    /// Payload of 3D values.
    pub fn as_vec3(&self) -> Option<Vector3<f64>> {
        match self {
            CustomDataElem::Vec3(v) | CustomDataElem::Normal(v) => Some(*v),
            _ => None,
        }
    }

    /// Payload of 4D values.
    pub fn as_vec4(&self) -> Option<Vector4<f64>> {
        match self {
            CustomDataElem::Vec4(v) | CustomDataElem::Color(v) => Some(*v),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_float_interp() {
        let a = CustomDataElem::Float(1.0);
        let b = CustomDataElem::Float(3.0);
        let mut dest = LayerKind::Float.default_elem();
        dest.interp(&[&a, &b], &[0.25, 0.75]).unwrap();
        assert_relative_eq!(dest.as_float().unwrap(), 2.5);
    }

    #[test]
    fn test_int_interp_rounds() {
        let a = CustomDataElem::Int(1);
        let b = CustomDataElem::Int(2);
        let mut dest = CustomDataElem::Int(0);
        dest.interp(&[&a, &b], &[0.5, 0.5]).unwrap();
        assert_eq!(dest.as_int(), Some(2));
    }

    #[test]
    fn test_normal_interp_renormalizes() {
        let a = CustomDataElem::Normal(Vector3::x());
        let b = CustomDataElem::Normal(Vector3::y());
        let mut dest = LayerKind::Normal.default_elem();
        dest.interp(&[&a, &b], &[0.5, 0.5]).unwrap();
        assert_relative_eq!(dest.as_vec3().unwrap().norm(), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_origindex_copies_first() {
        let a = CustomDataElem::OrigIndex(7);
        let b = CustomDataElem::OrigIndex(9);
        let mut dest = LayerKind::OrigIndex.default_elem();
        dest.interp(&[&a, &b], &[0.0, 1.0]).unwrap();
        assert_eq!(dest.as_int(), Some(7));
    }

    #[test]
    fn test_zero_weight_leaves_value() {
        let a = CustomDataElem::Float(5.0);
        let mut dest = CustomDataElem::Float(1.0);
        assert_eq!(dest.interp(&[&a], &[0.0]), Err(MeshError::ZeroWeight));
        assert_eq!(dest.as_float(), Some(1.0));
    }

    #[test]
    fn test_kind_mismatch() {
        let a = CustomDataElem::Int(1);
        let mut dest = CustomDataElem::Float(0.0);
        assert!(matches!(
            dest.interp(&[&a], &[1.0]),
            Err(MeshError::LayerKindMismatch { .. })
        ));
        assert!(a.copy_to(&mut dest).is_err());
    }

    #[test]
    fn test_hash_snaps() {
        let a = CustomDataElem::Uv(Vector2::new(0.101, 0.2));
        let b = CustomDataElem::Uv(Vector2::new(0.102, 0.2));
        let c = CustomDataElem::Uv(Vector2::new(0.5, 0.2));
        assert_eq!(a.calc_hash(0.01), b.calc_hash(0.01));
        assert_ne!(a.calc_hash(0.01), c.calc_hash(0.01));
    }

    #[test]
    fn test_default_elems_match_kind() {
        for kind in LayerKind::ALL {
            assert_eq!(kind.default_elem().kind(), kind);
        }
    }
}
