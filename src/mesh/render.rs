//! Hand-off to an external renderer.

use super::flags::{ElemTypes, RecalcFlags};
use super::halfedge::Mesh;

/// Consumer of mesh draw data, such as a GPU buffer uploader.
///
/// Implementations read the mesh through its public accessors, typically
/// [`Mesh::loop_tris`] for faces and the element lists for vertex and edge
/// overlays.
pub trait MeshRenderer {
    /// Draw the mesh. `select_mask` names the element types whose selection
    /// state should be shown.
    fn draw_elements(&mut self, mesh: &Mesh, select_mask: ElemTypes);
}

impl Mesh {
    /// Bring derived data up to date and pass the mesh to `renderer`.
    ///
    /// The tessellation and normals are rebuilt if flagged; RENDER, ELEMENTS
    /// and PARTIAL are cleared afterwards.
    pub fn draw_elements<R: MeshRenderer + ?Sized>(&mut self, renderer: &mut R, select_mask: ElemTypes) {
        self.ensure_tessellation();
        if self.recalc.contains(RecalcFlags::NORMALS) {
            self.recalc_normals();
        }

        renderer.draw_elements(self, select_mask);
        self.recalc
            .remove(RecalcFlags::RENDER | RecalcFlags::ELEMENTS | RecalcFlags::PARTIAL);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::build_from_triangles;
    use nalgebra::Point3;

    #[derive(Default)]
    struct CountingRenderer {
        calls: usize,
        tris: usize,
        mask: ElemTypes,
    }

    impl MeshRenderer for CountingRenderer {
        fn draw_elements(&mut self, mesh: &Mesh, select_mask: ElemTypes) {
            self.calls += 1;
            self.tris = mesh.loop_tris().len();
            self.mask = select_mask;
        }
    }

    #[test]
    fn test_draw_refreshes_and_clears() {
        let points = [
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(1.0, 0.0, 0.0),
            Point3::new(1.0, 1.0, 0.0),
            Point3::new(0.0, 1.0, 0.0),
        ];
        let mut mesh = build_from_triangles(&points, &[[0, 1, 2], [0, 2, 3]]).unwrap();
        let mut renderer = CountingRenderer::default();

        mesh.draw_elements(&mut renderer, ElemTypes::VERTEX);
        assert_eq!(renderer.calls, 1);
        assert_eq!(renderer.tris, 2);
        assert_eq!(renderer.mask, ElemTypes::VERTEX);

        let flags = mesh.recalc_flags();
        assert!(!flags.intersects(RecalcFlags::RENDER | RecalcFlags::TESSELATE | RecalcFlags::NORMALS));
    }
}
