//! Bit flags carried by mesh elements and the mesh itself.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

bitflags::bitflags! {
    /// Per-element state bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    #[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
    pub struct MeshFlags: u32 {
        /// Element is selected.
        const SELECT = 1 << 0;
        /// Element is hidden.
        const HIDE = 1 << 1;
        /// Face is flat shaded.
        const FLAT = 1 << 2;
        /// Scratch bit for iterators.
        const ITER_TEMP1 = 1 << 3;
        /// Scratch bit for tools.
        const TEMP1 = 1 << 8;
        /// Scratch bit for tools.
        const TEMP2 = 1 << 9;
        /// Scratch bit for tools.
        const TEMP3 = 1 << 10;
        /// Geometry changed; consumed by tessellation, normals and BVH refits.
        const UPDATE = 1 << 11;
        /// Element lies on an open boundary.
        const BOUNDARY = 1 << 12;
        /// Vertex is mirrored across x.
        const MIRRORED_X = 1 << 14;
        /// Vertex is mirrored across y.
        const MIRRORED_Y = 1 << 15;
        /// Vertex is mirrored across z.
        const MIRRORED_Z = 1 << 16;
        /// Edge is a UV seam.
        const SEAM = 1 << 19;
        /// Scratch bit used while building faces.
        const MAKE_FACE_TEMP = 1 << 29;
    }
}

bitflags::bitflags! {
    /// Element type mask, used for selection flushing and picking.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    #[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
    pub struct ElemTypes: u32 {
        /// Vertices.
        const VERTEX = 1;
        /// Edges.
        const EDGE = 2;
        /// Faces.
        const FACE = 4;
        /// Face corners.
        const LOOP = 8;
    }
}

bitflags::bitflags! {
    /// Derived data that must be regenerated before it is next used.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    #[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
    pub struct RecalcFlags: u32 {
        /// Render buffers are stale.
        const RENDER = 1;
        /// Triangle cache is stale.
        const TESSELATE = 2;
        /// Only UPDATE-flagged elements changed.
        const PARTIAL = 4;
        /// Element draw buffers are stale.
        const ELEMENTS = 8;
        /// Face and vertex normals are stale.
        const NORMALS = 16;
        /// Cached BVH must be rebuilt.
        const BVH = 32;
    }
}

bitflags::bitflags! {
    /// Operations a mesh permits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    #[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
    pub struct MeshFeatures: u32 {
        /// Edges may be shared by more than two faces.
        const GREATER_TWO_VALENCE = 1 << 1;
        /// `split_edge`.
        const SPLIT_EDGE = 1 << 2;
        /// Edge joins.
        const JOIN_EDGE = 1 << 3;
        /// `split_face` and `connect_verts`.
        const SPLIT_FACE = 1 << 4;
        /// Face joins.
        const JOIN_FACE = 1 << 5;
        /// `make_vertex`.
        const MAKE_VERT = 1 << 6;
        /// `kill_vertex`.
        const KILL_VERT = 1 << 7;
        /// `make_edge`.
        const MAKE_EDGE = 1 << 8;
        /// `kill_edge`.
        const KILL_EDGE = 1 << 9;
        /// `make_face`.
        const MAKE_FACE = 1 << 10;
        /// `kill_face`.
        const KILL_FACE = 1 << 11;
        /// Spatial index support.
        const BVH = 1 << 15;

        /// Everything the kernel implements.
        const BASIC = Self::GREATER_TWO_VALENCE.bits()
            | Self::SPLIT_EDGE.bits()
            | Self::JOIN_EDGE.bits()
            | Self::SPLIT_FACE.bits()
            | Self::JOIN_FACE.bits()
            | Self::MAKE_VERT.bits()
            | Self::KILL_VERT.bits()
            | Self::MAKE_EDGE.bits()
            | Self::KILL_EDGE.bits()
            | Self::MAKE_FACE.bits()
            | Self::KILL_FACE.bits()
            | Self::BVH.bits();
    }
}

impl Default for MeshFeatures {
    fn default() -> Self {
        MeshFeatures::BASIC
    }
}

impl ElemTypes {
    /// Human readable name of a single-bit mask.
    pub fn name(self) -> &'static str {
        if self == ElemTypes::VERTEX {
            "vertex"
        } else if self == ElemTypes::EDGE {
            "edge"
        } else if self == ElemTypes::FACE {
            "face"
        } else if self == ElemTypes::LOOP {
            "loop"
        } else {
            "mixed"
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(feature = "serde")]
    #[test]
    fn test_serde_flags() {
        let flags = MeshFlags::SELECT | MeshFlags::UPDATE;
        let json = serde_json::to_string(&flags).unwrap();
        assert_eq!(serde_json::from_str::<MeshFlags>(&json).unwrap(), flags);

        let features = MeshFeatures::BASIC - MeshFeatures::BVH;
        let json = serde_json::to_string(&features).unwrap();
        assert_eq!(serde_json::from_str::<MeshFeatures>(&json).unwrap(), features);
    }

    #[test]
    fn test_flag_bits() {
        assert_eq!(MeshFlags::SELECT.bits(), 1);
        assert_eq!(MeshFlags::UPDATE.bits(), 2048);
        assert_eq!(ElemTypes::LOOP.bits(), 8);
    }

    #[test]
    fn test_basic_features() {
        let f = MeshFeatures::default();
        assert!(f.contains(MeshFeatures::MAKE_FACE | MeshFeatures::KILL_VERT));
    }

    #[test]
    fn test_elem_type_names() {
        assert_eq!(ElemTypes::EDGE.name(), "edge");
        assert_eq!((ElemTypes::EDGE | ElemTypes::FACE).name(), "mixed");
    }
}
