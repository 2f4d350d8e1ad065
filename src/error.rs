//! Error types for loopmesh.
//!
//! Every error carries a [`Severity`] tier. Programming errors come from
//! malformed requests (dead handles, disabled features), degenerate errors
//! from legitimate but extreme geometry, and integrity errors from broken
//! internal structure found by validation.

use thiserror::Error;

use crate::mesh::ElemTypes;

/// Result type alias using [`MeshError`].
pub type Result<T> = std::result::Result<T, MeshError>;

/// Severity tier of a [`MeshError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Severity {
    /// Malformed request from the caller. Not retried by the kernel.
    Programming,
    /// Degenerate input geometry. Fail-soft callers substitute a fallback.
    Degenerate,
    /// Broken internal structure. Logged, best-effort continuation.
    Integrity,
}

/// Errors that can occur during mesh operations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MeshError {
    /// A handle refers to a freed or never-allocated slot.
    #[error("{kind} handle {index} is dead")]
    DeadElement {
        /// Element kind name.
        kind: &'static str,
        /// Slot index of the handle.
        index: usize,
    },

    /// An edge was requested between a vertex and itself.
    #[error("cannot make an edge from vertex {0} to itself")]
    SameVertex(usize),

    /// A face was requested with a repeated vertex.
    #[error("face vertex list repeats vertex {0}")]
    DuplicateVertex(usize),

    /// A face was requested with fewer than three corners.
    #[error("face needs at least 3 vertices, got {0}")]
    TooFewVertices(usize),

    /// An element with this eid is already stored in the list.
    #[error("eid {0} is already present in the element list")]
    DuplicateEid(u64),

    /// The mesh was created without the feature an operation requires.
    #[error("mesh feature not supported: {0}")]
    FeatureNotSupported(&'static str),

    /// A custom-data layer kind cannot live on the requested element type.
    #[error("layer kind {kind} cannot be attached to {elem:?}")]
    LayerNotAllowed {
        /// Layer kind type name.
        kind: &'static str,
        /// Element type the layer was requested for.
        elem: ElemTypes,
    },

    /// A custom-data layer index is out of range.
    #[error("custom-data layer {0} does not exist")]
    NoSuchLayer(usize),

    /// Two custom-data instances of different kinds were mixed.
    #[error("custom-data kind mismatch: expected {expected}, found {found}")]
    LayerKindMismatch {
        /// Kind of the destination.
        expected: &'static str,
        /// Kind of the source.
        found: &'static str,
    },

    /// Two vertices are already joined by an edge.
    #[error("vertices {v1} and {v2} already share an edge")]
    EdgeExists {
        /// First vertex slot.
        v1: usize,
        /// Second vertex slot.
        v2: usize,
    },

    /// A split request names loops that cannot be connected.
    #[error("invalid split: {0}")]
    InvalidSplit(&'static str),

    /// A patch tangent frame has a zero-length partial derivative.
    #[error("degenerate tangent frame at ({u}, {v})")]
    DegenerateTangent {
        /// Patch u parameter.
        u: f64,
        /// Patch v parameter.
        v: f64,
    },

    /// Interpolation weights sum to zero.
    #[error("interpolation weights sum to zero")]
    ZeroWeight,

    /// A polygon could not be triangulated.
    #[error("failed to triangulate face {0}")]
    Triangulation(u64),

    /// The mesh has non-manifold topology where it is not allowed.
    #[error("mesh has non-manifold topology: {details}")]
    NonManifold {
        /// Description of the non-manifold condition.
        details: String,
    },

    /// Internal structure failed validation.
    #[error("integrity check failed: {0}")]
    Integrity(String),

    /// Invalid mesh state for the requested operation.
    #[error("invalid mesh state: {0}")]
    InvalidState(String),

    /// A face references an invalid vertex index while building.
    #[error("polygon {face} references invalid vertex index {vertex}")]
    InvalidVertexIndex {
        /// The polygon index.
        face: usize,
        /// The invalid vertex index.
        vertex: usize,
    },

    /// Invalid parameter value.
    #[error("invalid parameter: {name} = {value} ({reason})")]
    InvalidParameter {
        /// Parameter name.
        name: &'static str,
        /// The invalid value (as string).
        value: String,
        /// Reason the value is invalid.
        reason: &'static str,
    },
}

impl MeshError {
    /// Create an invalid parameter error.
    pub fn invalid_param<T: std::fmt::Display>(
        name: &'static str,
        value: T,
        reason: &'static str,
    ) -> Self {
        MeshError::InvalidParameter {
            name,
            value: value.to_string(),
            reason,
        }
    }

    /// Severity tier of this error.
    pub fn severity(&self) -> Severity {
        match self {
            MeshError::DegenerateTangent { .. }
            | MeshError::ZeroWeight
            | MeshError::Triangulation(_) => Severity::Degenerate,
            MeshError::NonManifold { .. } | MeshError::Integrity(_) => Severity::Integrity,
            _ => Severity::Programming,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_tiers() {
        assert_eq!(MeshError::SameVertex(1).severity(), Severity::Programming);
        assert_eq!(
            MeshError::DegenerateTangent { u: 0.0, v: 0.0 }.severity(),
            Severity::Degenerate
        );
        assert_eq!(
            MeshError::Integrity("x".into()).severity(),
            Severity::Integrity
        );
    }

    #[test]
    fn test_display() {
        let err = MeshError::DeadElement { kind: "vertex", index: 4 };
        assert_eq!(err.to_string(), "vertex handle 4 is dead");
        let err = MeshError::invalid_param("leaf_limit", 0, "must be positive");
        assert_eq!(
            err.to_string(),
            "invalid parameter: leaf_limit = 0 (must be positive)"
        );
    }
}
