//! Bounding volume hierarchy over a mesh's loop triangles.
//!
//! The tree is built top-down from the mesh tessellation: triangles are
//! split at the median centroid along the longest axis of each node until a
//! node holds at most [`BvhOptions::leaf_limit`] triangles or the depth
//! reaches [`BvhOptions::depth_limit`].
//!
//! A [`Bvh`] does not track the mesh. After editing, call [`Bvh::update`]
//! (or [`Mesh::regen_bvh`] for the cached tree) before querying again;
//! many edits can be batched behind one refresh.
//!
//! # Example
//!
//! ```
//! use loopmesh::bvh::{Bvh, BvhOptions};
//! use loopmesh::mesh::build_from_quads;
//! use nalgebra::{Point3, Vector3};
//!
//! let points = vec![
//!     Point3::new(0.0, 0.0, 0.0),
//!     Point3::new(1.0, 0.0, 0.0),
//!     Point3::new(1.0, 1.0, 0.0),
//!     Point3::new(0.0, 1.0, 0.0),
//! ];
//! let mut mesh = build_from_quads(&points, &[[0, 1, 2, 3]]).unwrap();
//! mesh.ensure_tessellation();
//!
//! let bvh = Bvh::build(&mesh, &BvhOptions::default()).unwrap();
//! let hit = bvh
//!     .cast_ray(&Point3::new(0.25, 0.5, 1.0), &Vector3::new(0.0, 0.0, -1.0))
//!     .unwrap();
//! assert!((hit.dist - 1.0).abs() < 1e-12);
//! ```

mod aabb;
mod query;

use std::collections::HashMap;

use nalgebra::Point3;
use rayon::prelude::*;
use smallvec::SmallVec;

pub use aabb::{Aabb, Cone};
pub use query::BvhHit;

use crate::error::{MeshError, Result};
use crate::mesh::{FaceId, LoopId, Mesh, MeshFeatures, MeshFlags, RecalcFlags, VertId};

/// Subtrees with at least this many triangles are built on the rayon pool
/// when [`BvhOptions::parallel`] is set.
const PARALLEL_THRESHOLD: usize = 1024;

/// Options for building a [`Bvh`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BvhOptions {
    /// Maximum triangles per leaf. Default: 256.
    pub leaf_limit: usize,

    /// Maximum tree depth; deeper nodes become leaves regardless of size.
    /// Default: 18.
    pub depth_limit: usize,

    /// Build large subtrees in parallel. Default: false.
    pub parallel: bool,
}

impl Default for BvhOptions {
    fn default() -> Self {
        Self {
            leaf_limit: 256,
            depth_limit: 18,
            parallel: false,
        }
    }
}

impl BvhOptions {
    /// Create options with the given leaf limit.
    pub fn with_leaf_limit(mut self, limit: usize) -> Self {
        self.leaf_limit = limit;
        self
    }

    /// Create options with the given depth limit.
    pub fn with_depth_limit(mut self, limit: usize) -> Self {
        self.depth_limit = limit;
        self
    }

    /// Enable or disable parallel construction.
    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    fn validate(&self) -> Result<()> {
        if self.leaf_limit == 0 {
            return Err(MeshError::invalid_param("leaf_limit", self.leaf_limit, "must be positive"));
        }
        if self.depth_limit == 0 {
            return Err(MeshError::invalid_param("depth_limit", self.depth_limit, "must be positive"));
        }
        Ok(())
    }
}

/// One triangle of the tessellation, with its corner positions captured at
/// build or refit time.
#[derive(Debug, Clone, PartialEq)]
pub struct BvhTri {
    /// Owning face.
    pub face: FaceId,
    /// Index into the mesh tessellation.
    pub tri_idx: usize,
    /// Corner loops.
    pub loops: [LoopId; 3],
    /// Corner vertices.
    pub verts: [VertId; 3],
    /// Corner positions.
    pub points: [Point3<f64>; 3],
}

impl BvhTri {
    /// Bounding box of the captured corner positions.
    #[must_use]
    pub fn bbox(&self) -> Aabb {
        let [a, b, c] = &self.points;
        Aabb::from_triangle(a, b, c)
    }

    fn refresh(&mut self, mesh: &Mesh) {
        for (p, &v) in self.points.iter_mut().zip(&self.verts) {
            *p = *mesh.co(v);
        }
    }
}

/// BVH node containing either leaf triangles or child nodes.
#[derive(Debug, Clone)]
pub enum BvhNode {
    /// Leaf node containing triangle indices.
    Leaf {
        /// Bounding box of all triangles in this leaf.
        bbox: Aabb,
        /// Indices into [`Bvh::tris`].
        triangles: SmallVec<[u32; 8]>,
    },
    /// Internal node with two children.
    Internal {
        /// Bounding box of all triangles in this subtree.
        bbox: Aabb,
        /// Left child node.
        left: Box<Self>,
        /// Right child node.
        right: Box<Self>,
    },
}

impl BvhNode {
    /// Get the bounding box of this node.
    #[must_use]
    pub fn bbox(&self) -> &Aabb {
        match self {
            Self::Leaf { bbox, .. } | Self::Internal { bbox, .. } => bbox,
        }
    }

    /// Recompute bounds bottom-up from `tris`, dropping `removed` entries.
    fn refit(&mut self, tris: &[BvhTri], removed: &[bool]) -> Aabb {
        match self {
            Self::Leaf { bbox, triangles } => {
                triangles.retain(|t| !removed[*t as usize]);
                let mut b = Aabb::empty();
                for &t in triangles.iter() {
                    b.expand(&tris[t as usize].bbox());
                }
                *bbox = b;
                b
            }
            Self::Internal { bbox, left, right } => {
                let mut b = left.refit(tris, removed);
                b.expand(&right.refit(tris, removed));
                *bbox = b;
                b
            }
        }
    }
}

/// Outcome of [`Bvh::update`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BvhUpdate {
    /// No triangle touched an UPDATE vertex.
    Unchanged,
    /// Bounds were refit after moving this many triangles.
    Refit(usize),
    /// Topology changed and the tree was rebuilt.
    Rebuilt,
}

/// Statistics about a BVH.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BvhStats {
    /// Number of internal nodes.
    pub internal_nodes: usize,
    /// Number of leaves.
    pub leaves: usize,
    /// Deepest leaf depth; the root is depth 0.
    pub max_depth: usize,
    /// Largest leaf size.
    pub max_leaf_size: usize,
}

/// Bounding volume hierarchy over the triangles of a [`Mesh`].
#[derive(Debug, Clone)]
pub struct Bvh {
    root: Option<BvhNode>,
    tris: Vec<BvhTri>,
    removed: Vec<bool>,
    face_tris: HashMap<FaceId, SmallVec<[u32; 4]>>,
    opts: BvhOptions,
    topo_gen: u64,
}

impl Bvh {
    /// Build a BVH over the mesh's triangles.
    ///
    /// Uses the cached tessellation when it is fresh. Otherwise each face is
    /// triangulated on the fly and `tri_idx` counts triangles in face order.
    pub fn build(mesh: &Mesh, opts: &BvhOptions) -> Result<Self> {
        opts.validate()?;

        let tris = collect_tris(mesh);
        let bounds: Vec<Aabb> = if opts.parallel {
            tris.par_iter().map(BvhTri::bbox).collect()
        } else {
            tris.iter().map(BvhTri::bbox).collect()
        };

        let mut face_tris: HashMap<FaceId, SmallVec<[u32; 4]>> = HashMap::new();
        for (i, tri) in tris.iter().enumerate() {
            face_tris.entry(tri.face).or_default().push(i as u32);
        }

        let root = if tris.is_empty() {
            None
        } else {
            let indices: Vec<u32> = (0..tris.len() as u32).collect();
            Some(build_recursive(&bounds, indices, opts, 0))
        };

        log::debug!("built BVH over {} triangles", tris.len());
        Ok(Self {
            root,
            removed: vec![false; tris.len()],
            tris,
            face_tris,
            opts: *opts,
            topo_gen: mesh.topology_gen(),
        })
    }

    /// Number of live triangles.
    pub fn triangle_count(&self) -> usize {
        self.removed.iter().filter(|r| !**r).count()
    }

    /// Check if the BVH holds no triangles.
    pub fn is_empty(&self) -> bool {
        self.triangle_count() == 0
    }

    /// All triangles, including removed ones; see [`Bvh::is_removed`].
    pub fn tris(&self) -> &[BvhTri] {
        &self.tris
    }

    /// Whether triangle `i` was dropped by [`Bvh::remove_face`].
    pub fn is_removed(&self, i: usize) -> bool {
        self.removed.get(i).copied().unwrap_or(true)
    }

    /// Options this tree was built with.
    pub fn options(&self) -> &BvhOptions {
        &self.opts
    }

    /// Bounding box of the whole tree.
    pub fn root_bbox(&self) -> Option<&Aabb> {
        self.root.as_ref().map(BvhNode::bbox)
    }

    pub(crate) fn root(&self) -> Option<&BvhNode> {
        self.root.as_ref()
    }

    /// Bring the tree up to date with `mesh`.
    ///
    /// If the mesh topology changed since the tree was built, or a fresh
    /// tessellation split some face differently, it is rebuilt. Otherwise triangles touching UPDATE vertices take their new
    /// positions and every node's bounds are refit. UPDATE flags are left
    /// for the caller to clear.
    pub fn update(&mut self, mesh: &Mesh) -> Result<BvhUpdate> {
        if mesh.topology_gen() != self.topo_gen {
            *self = Self::build(mesh, &self.opts)?;
            return Ok(BvhUpdate::Rebuilt);
        }

        // A moved vertex can flip a quad diagonal or change an ear clip.
        if !mesh.recalc_flags().contains(RecalcFlags::TESSELATE) {
            let current = mesh.loop_tris();
            let resplit = current.len() != self.tris.len()
                || self
                    .tris
                    .iter()
                    .zip(&self.removed)
                    .any(|(t, &removed)| !removed && current.get(t.tri_idx) != Some(&t.loops));
            if resplit {
                *self = Self::build(mesh, &self.opts)?;
                return Ok(BvhUpdate::Rebuilt);
            }
        }

        let mut moved = 0;
        for (i, tri) in self.tris.iter_mut().enumerate() {
            if self.removed[i] {
                continue;
            }
            let dirty = tri.verts.iter().any(|&v| {
                mesh.verts()
                    .get(v)
                    .is_some_and(|vert| vert.flag.contains(MeshFlags::UPDATE))
            });
            if dirty {
                tri.refresh(mesh);
                moved += 1;
            }
        }

        if moved == 0 {
            return Ok(BvhUpdate::Unchanged);
        }
        if let Some(root) = self.root.as_mut() {
            root.refit(&self.tris, &self.removed);
        }
        log::debug!("refit BVH after moving {} triangles", moved);
        Ok(BvhUpdate::Refit(moved))
    }

    /// Drop every triangle of `face` from the tree and shrink bounds.
    ///
    /// Returns the number of triangles removed; zero if `face` is unknown.
    pub fn remove_face(&mut self, face: FaceId) -> usize {
        let Some(ids) = self.face_tris.remove(&face) else {
            log::warn!("BVH has no triangles for {:?}", face);
            return 0;
        };
        for &t in &ids {
            self.removed[t as usize] = true;
        }
        if let Some(root) = self.root.as_mut() {
            root.refit(&self.tris, &self.removed);
        }
        ids.len()
    }

    /// Tree shape statistics.
    pub fn stats(&self) -> BvhStats {
        let mut stats = BvhStats::default();
        let mut stack: Vec<(&BvhNode, usize)> = self.root.iter().map(|n| (n, 0)).collect();
        while let Some((node, depth)) = stack.pop() {
            match node {
                BvhNode::Leaf { triangles, .. } => {
                    stats.leaves += 1;
                    stats.max_depth = stats.max_depth.max(depth);
                    stats.max_leaf_size = stats.max_leaf_size.max(triangles.len());
                }
                BvhNode::Internal { left, right, .. } => {
                    stats.internal_nodes += 1;
                    stack.push((&**left, depth + 1));
                    stack.push((&**right, depth + 1));
                }
            }
        }
        stats
    }
}

fn collect_tris(mesh: &Mesh) -> Vec<BvhTri> {
    let make = |tri_idx: usize, loops: [LoopId; 3]| {
        let verts = loops.map(|l| mesh.lp(l).v);
        BvhTri {
            face: mesh.lp(loops[0]).f,
            tri_idx,
            loops,
            verts,
            points: verts.map(|v| *mesh.co(v)),
        }
    };

    if !mesh.recalc_flags().contains(RecalcFlags::TESSELATE) {
        return mesh
            .loop_tris()
            .iter()
            .enumerate()
            .map(|(i, &t)| make(i, t))
            .collect();
    }

    log::debug!("tessellation is stale; triangulating faces for the BVH");
    let mut tris = Vec::with_capacity(mesh.num_loops());
    for f in mesh.faces().handles() {
        for t in mesh.triangulate_face(f) {
            tris.push(make(tris.len(), t));
        }
    }
    tris
}

fn build_recursive(bounds: &[Aabb], indices: Vec<u32>, opts: &BvhOptions, depth: usize) -> BvhNode {
    let mut bbox = Aabb::empty();
    for &i in &indices {
        bbox.expand(&bounds[i as usize]);
    }

    if indices.len() <= opts.leaf_limit || depth >= opts.depth_limit {
        return BvhNode::Leaf {
            bbox,
            triangles: indices.into_iter().collect(),
        };
    }

    // Median split along the longest axis
    let axis = bbox.longest_axis();
    let mut sorted = indices;
    let mid = sorted.len() / 2;
    sorted.select_nth_unstable_by(mid, |&a, &b| {
        let ca = bounds[a as usize].center()[axis];
        let cb = bounds[b as usize].center()[axis];
        ca.partial_cmp(&cb).unwrap_or(std::cmp::Ordering::Equal)
    });
    let right_indices = sorted.split_off(mid);
    let left_indices = sorted;

    let (left, right) = if opts.parallel && right_indices.len() >= PARALLEL_THRESHOLD {
        rayon::join(
            || build_recursive(bounds, left_indices, opts, depth + 1),
            || build_recursive(bounds, right_indices, opts, depth + 1),
        )
    } else {
        (
            build_recursive(bounds, left_indices, opts, depth + 1),
            build_recursive(bounds, right_indices, opts, depth + 1),
        )
    };

    BvhNode::Internal {
        bbox,
        left: Box::new(left),
        right: Box::new(right),
    }
}

// ==================== Mesh Cache ====================

/// A BVH cached on its mesh, tagged with the update generation it last saw.
#[derive(Debug, Clone)]
pub(crate) struct BvhCache {
    bvh: Bvh,
    update_gen: u64,
}

impl Mesh {
    /// The mesh's cached BVH, built or refreshed as needed.
    ///
    /// The tessellation is brought up to date first. A cached tree is
    /// reused while the options match and the topology is unchanged; if
    /// [`Mesh::graph_update`] was called since the last request, triangles
    /// touching UPDATE vertices are refit. [`Mesh::regen_bvh`] and
    /// [`Mesh::apply_matrix`] force a rebuild.
    pub fn get_bvh(&mut self, opts: &BvhOptions) -> Result<&Bvh> {
        self.require(MeshFeatures::BVH, "get_bvh")?;
        self.ensure_tessellation();

        let stale = self.recalc.contains(RecalcFlags::BVH);
        let cache = match self.bvh.take() {
            Some(mut cache) if !stale && cache.bvh.opts == *opts && cache.bvh.topo_gen == self.topo_gen => {
                if cache.update_gen != self.update_gen {
                    cache.bvh.update(self)?;
                    cache.update_gen = self.update_gen;
                }
                cache
            }
            _ => BvhCache {
                bvh: Bvh::build(self, opts)?,
                update_gen: self.update_gen,
            },
        };

        self.recalc.remove(RecalcFlags::BVH);
        Ok(&self.bvh.insert(cache).bvh)
    }

    /// The cached BVH, if one exists.
    pub fn cached_bvh(&self) -> Option<&Bvh> {
        self.bvh.as_ref().map(|c| &c.bvh)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::mesh::build_from_quads;
    use approx::assert_relative_eq;

    pub(crate) fn grid(n: usize) -> Mesh {
        let row = n + 1;
        let mut points = Vec::with_capacity(row * row);
        for j in 0..=n {
            for i in 0..=n {
                points.push(Point3::new(i as f64, j as f64, 0.0));
            }
        }
        let mut quads = Vec::with_capacity(n * n);
        for j in 0..n {
            for i in 0..n {
                let a = j * row + i;
                quads.push([a, a + 1, a + row + 1, a + row]);
            }
        }
        let mut mesh = build_from_quads(&points, &quads).unwrap();
        mesh.ensure_tessellation();
        mesh
    }

    #[test]
    fn test_build_empty() {
        let bvh = Bvh::build(&Mesh::new(), &BvhOptions::default()).unwrap();
        assert!(bvh.is_empty());
        assert!(bvh.root_bbox().is_none());
        assert_eq!(bvh.stats(), BvhStats::default());
    }

    #[test]
    fn test_build_respects_limits() {
        let mesh = grid(8);
        let bvh = Bvh::build(&mesh, &BvhOptions::default().with_leaf_limit(4)).unwrap();
        assert_eq!(bvh.triangle_count(), 128);

        let stats = bvh.stats();
        assert!(stats.max_leaf_size <= 4);
        assert!(stats.leaves >= 32);
        assert_eq!(stats.internal_nodes + 1, stats.leaves);

        let shallow = Bvh::build(&mesh, &BvhOptions::default().with_leaf_limit(1).with_depth_limit(2)).unwrap();
        assert_eq!(shallow.stats().max_depth, 2);
        assert_eq!(shallow.stats().leaves, 4);

        let bbox = bvh.root_bbox().unwrap();
        assert_eq!(bbox.min, Point3::new(0.0, 0.0, 0.0));
        assert_eq!(bbox.max, Point3::new(8.0, 8.0, 0.0));
    }

    #[test]
    fn test_parallel_matches_serial() {
        let mesh = grid(32);
        let serial = Bvh::build(&mesh, &BvhOptions::default().with_leaf_limit(8)).unwrap();
        let parallel =
            Bvh::build(&mesh, &BvhOptions::default().with_leaf_limit(8).with_parallel(true)).unwrap();
        assert_eq!(serial.stats(), parallel.stats());
        assert_eq!(serial.root_bbox(), parallel.root_bbox());
    }

    #[test]
    fn test_invalid_options() {
        let mesh = grid(1);
        let err = Bvh::build(&mesh, &BvhOptions::default().with_leaf_limit(0)).unwrap_err();
        assert!(matches!(err, MeshError::InvalidParameter { name: "leaf_limit", .. }));
    }

    #[test]
    fn test_stale_tessellation_still_builds() {
        let mut mesh = grid(2);
        mesh.regen_tessellation();
        let bvh = Bvh::build(&mesh, &BvhOptions::default()).unwrap();
        assert_eq!(bvh.triangle_count(), 8);
    }

    #[test]
    fn test_update_refits_moved_vertices() {
        let mut mesh = grid(2);
        mesh.clear_update_flags(crate::mesh::ElemTypes::all());
        let mut bvh = Bvh::build(&mesh, &BvhOptions::default().with_leaf_limit(2)).unwrap();
        assert_eq!(bvh.update(&mesh).unwrap(), BvhUpdate::Unchanged);

        let corner = mesh.verts().handles().last().unwrap();
        mesh.set_vert_co(corner, Point3::new(2.0, 2.0, 5.0)).unwrap();
        assert!(matches!(bvh.update(&mesh).unwrap(), BvhUpdate::Refit(n) if n > 0));
        assert_relative_eq!(bvh.root_bbox().unwrap().max.z, 5.0);
    }

    #[test]
    fn test_update_rebuilds_on_topology_change() {
        let mut mesh = grid(2);
        let mut bvh = Bvh::build(&mesh, &BvhOptions::default()).unwrap();
        let f = mesh.faces().handles().next().unwrap();
        mesh.kill_face(f).unwrap();
        mesh.ensure_tessellation();

        assert_eq!(bvh.update(&mesh).unwrap(), BvhUpdate::Rebuilt);
        assert_eq!(bvh.triangle_count(), 6);
    }

    #[test]
    fn test_remove_face() {
        let mesh = grid(2);
        let mut bvh = Bvh::build(&mesh, &BvhOptions::default().with_leaf_limit(2)).unwrap();
        let f = mesh.faces().handles().next().unwrap();

        assert_eq!(bvh.remove_face(f), 2);
        assert_eq!(bvh.triangle_count(), 6);
        assert_eq!(bvh.remove_face(f), 0);
        assert!(bvh.tris().iter().enumerate().all(|(i, t)| t.face != f || bvh.is_removed(i)));
    }

    #[test]
    fn test_mesh_cache() {
        let mut mesh = grid(2);
        let opts = BvhOptions::default();
        assert_eq!(mesh.get_bvh(&opts).unwrap().triangle_count(), 8);
        assert!(mesh.cached_bvh().is_some());
        assert!(!mesh.recalc_flags().contains(RecalcFlags::BVH));

        mesh.regen_bvh();
        assert!(mesh.cached_bvh().is_none());

        let f = mesh.faces().handles().next().unwrap();
        mesh.get_bvh(&opts).unwrap();
        mesh.kill_face(f).unwrap();
        assert_eq!(mesh.get_bvh(&opts).unwrap().triangle_count(), 6);

        let v = mesh.verts().handles().last().unwrap();
        mesh.set_vert_co(v, Point3::new(2.0, 2.0, 3.0)).unwrap();
        mesh.graph_update();
        let bbox = *mesh.get_bvh(&opts).unwrap().root_bbox().unwrap();
        assert_relative_eq!(bbox.max.z, 3.0);
    }

    #[test]
    fn test_cache_follows_changed_quad_split() {
        let mut mesh = Mesh::new();
        let vs: Vec<_> = [(0.0, 0.0), (2.0, 0.0), (3.0, 3.0), (0.0, 2.0)]
            .iter()
            .map(|&(x, y)| mesh.make_vertex(Point3::new(x, y, 0.0)).unwrap())
            .collect();
        mesh.make_face(&vs).unwrap();
        let opts = BvhOptions::default();
        let down = nalgebra::Vector3::new(0.0, 0.0, -1.0);
        let spot = Point3::new(0.9, 0.9, 1.0);
        assert!(mesh.get_bvh(&opts).unwrap().cast_ray(&spot, &down).is_some());

        mesh.set_vert_co(vs[2], Point3::new(0.5, 0.8, 0.0)).unwrap();
        mesh.graph_update();
        let bvh = mesh.get_bvh(&opts).unwrap();
        assert!(bvh.cast_ray(&spot, &down).is_none());
        assert!(bvh.cast_ray(&Point3::new(1.0, 0.2, 1.0), &down).is_some());
    }

    #[test]
    fn test_cache_requires_feature() {
        let mut mesh = Mesh::with_features(MeshFeatures::BASIC - MeshFeatures::BVH);
        assert_eq!(
            mesh.get_bvh(&BvhOptions::default()).unwrap_err(),
            MeshError::FeatureNotSupported("get_bvh")
        );
    }
}
