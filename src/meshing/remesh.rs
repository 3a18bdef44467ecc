// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! Isotropic surface remeshing
//!
//! Incremental split / collapse / flip / relax iterations toward a target
//! edge length given by a sizing callback. Face borders and sharp edges are
//! kept as feature lines, triangles of frozen faces are never touched, and
//! relaxed vertices are projected back onto their own face of the input
//! surface.

use crate::error::{Error, Result};
use crate::geometry::mesh_utils::{edge_triangles, Edge};
use crate::geometry::{SurfaceLocator, SurfaceMesh};
use nalgebra::{Point3, Vector3};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info};

const FREE: u8 = 0;
const FEATURE: u8 = 1;
const CORNER: u8 = 2;

/// Normals closer than this are treated as one plane when merging face borders
const COPLANAR_DOT: f64 = 1.0 - 1e-6;

/// Remeshing parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemeshParams {
    pub iterations: usize,
    /// Dihedral angle in degrees above which an edge is a feature
    pub feature_angle: f64,
    /// Faces whose triangles are left exactly as they are
    pub frozen_faces: BTreeSet<i32>,
    /// Treat borders between coplanar faces as ordinary edges
    pub merge_coplanar_faces: bool,
    /// Split edges longer than `split_ratio` times the target
    pub split_ratio: f64,
    /// Collapse edges shorter than `collapse_ratio` times the target
    pub collapse_ratio: f64,
}

impl Default for RemeshParams {
    fn default() -> Self {
        Self {
            iterations: 10,
            feature_angle: 45.0,
            frozen_faces: BTreeSet::new(),
            merge_coplanar_faces: false,
            split_ratio: 4.0 / 3.0,
            collapse_ratio: 4.0 / 5.0,
        }
    }
}

impl RemeshParams {
    pub fn with_frozen_faces(mut self, faces: BTreeSet<i32>) -> Self {
        self.frozen_faces = faces;
        self
    }

    pub fn with_iterations(mut self, iterations: usize) -> Self {
        self.iterations = iterations;
        self
    }

    pub fn with_feature_angle(mut self, degrees: f64) -> Self {
        self.feature_angle = degrees;
        self
    }

    pub fn with_coplanar_merge(mut self, merge: bool) -> Self {
        self.merge_coplanar_faces = merge;
        self
    }
}

/// Operation counts of one remeshing run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RemeshStats {
    pub splits: usize,
    pub collapses: usize,
    pub flips: usize,
    pub relaxed: usize,
    pub degenerates_removed: usize,
}

#[derive(Debug, Clone)]
pub struct RemeshOutput {
    pub mesh: SurfaceMesh,
    pub stats: RemeshStats,
}

fn check_inputs<S>(mesh: &SurfaceMesh, size: &S, params: &RemeshParams) -> Result<()>
where
    S: Fn(&Point3<f64>, i32) -> f64 + Sync,
{
    if mesh.triangles.is_empty() {
        return Err(Error::invalid("cannot remesh an empty surface"));
    }
    if !(params.split_ratio > params.collapse_ratio && params.collapse_ratio > 0.0) {
        return Err(Error::invalid(format!(
            "collapse ratio {} must be positive and below split ratio {}",
            params.collapse_ratio, params.split_ratio
        )));
    }
    let faces = mesh.face_ids();
    for (t, tri) in mesh.triangles.iter().enumerate() {
        let face = faces.map_or(0, |f| f[t]);
        for &v in tri {
            let h = size(&mesh.points[v], face);
            if !(h.is_finite() && h > 0.0) {
                return Err(Error::invalid(format!("sizing function returned {} at point {}", h, v)));
            }
        }
    }
    Ok(())
}

/// Remesh `mesh` toward the edge length `size(point, face_id)`.
///
/// Face ids are carried onto the new triangles; other point and cell arrays
/// are dropped because the vertices they described no longer exist.
pub fn remesh<S>(mesh: &SurfaceMesh, size: S, params: &RemeshParams) -> Result<RemeshOutput>
where
    S: Fn(&Point3<f64>, i32) -> f64 + Sync,
{
    check_inputs(mesh, &size, params)?;
    let faces = mesh.face_ids().map(<[i32]>::to_vec);

    let mut remesher = Remesher::new(mesh, &size, params);
    for iteration in 0..params.iterations {
        remesher.split_long_edges();
        remesher.collapse_short_edges();
        remesher.equalize_valences();
        remesher.relax();
        debug!(
            "remesh iteration {}: {} live triangles",
            iteration,
            remesher.alive.iter().filter(|a| **a).count()
        );
    }
    remesher.remove_degenerates();

    let stats = remesher.stats.clone();
    let mesh = remesher.finish(faces.is_some());
    info!(
        "remeshed surface: {} triangles ({} splits, {} collapses, {} flips)",
        mesh.triangle_count(),
        stats.splits,
        stats.collapses,
        stats.flips
    );
    Ok(RemeshOutput { mesh, stats })
}

/// Split edges longer than the target until none remain. Existing vertices
/// keep their positions and no vertex is removed.
pub fn bisect<S>(mesh: &SurfaceMesh, size: S, params: &RemeshParams) -> Result<RemeshOutput>
where
    S: Fn(&Point3<f64>, i32) -> f64 + Sync,
{
    check_inputs(mesh, &size, params)?;
    let faces = mesh.face_ids().map(<[i32]>::to_vec);

    let mut remesher = Remesher::new(mesh, &size, params);
    for _ in 0..params.iterations {
        let before = remesher.stats.splits;
        remesher.split_long_edges();
        if remesher.stats.splits == before {
            break;
        }
    }
    let stats = remesher.stats.clone();
    let mesh = remesher.finish(faces.is_some());
    info!("bisected surface: {} triangles ({} splits)", mesh.triangle_count(), stats.splits);
    Ok(RemeshOutput { mesh, stats })
}

/// Uniform remeshing with edge lengths kept roughly within `[hmin, hmax]`
pub fn remesh_surface(mesh: &SurfaceMesh, hmin: f64, hmax: f64) -> Result<SurfaceMesh> {
    if !(hmin > 0.0 && hmax > hmin) {
        return Err(Error::invalid(format!("need 0 < hmin < hmax, got {} and {}", hmin, hmax)));
    }
    let defaults = RemeshParams::default();
    let target = hmax / defaults.split_ratio;
    let params = RemeshParams {
        collapse_ratio: defaults.collapse_ratio.max(hmin / target).min(0.95 * defaults.split_ratio),
        ..defaults
    };
    Ok(remesh(mesh, |_, _| target, &params)?.mesh)
}

/// Input triangles of one model face, the target of vertex projection
struct FaceReference<'a> {
    locator: SurfaceLocator<'a>,
    /// Point and unit normal when the whole face lies in one plane
    plane: Option<(Point3<f64>, Vector3<f64>)>,
}

impl<'a> FaceReference<'a> {
    fn new(mesh: &'a SurfaceMesh, triangles: &[usize]) -> Self {
        let normal: Vector3<f64> = triangles.iter().map(|&t| mesh.triangle_cross(t)).sum();
        let plane = normal.try_normalize(f64::MIN_POSITIVE).and_then(|n| {
            let origin = mesh.points[mesh.triangles[triangles[0]][0]];
            let scale = mesh.bounding_box().diagonal();
            let flat = triangles.iter().all(|&t| {
                mesh.triangle_normal(t).dot(&n) > COPLANAR_DOT
                    && mesh.triangles[t].iter().all(|&v| (mesh.points[v] - origin).dot(&n).abs() <= 1e-12 * scale)
            });
            flat.then_some((origin, n))
        });
        Self {
            locator: SurfaceLocator::subset(mesh, triangles.iter().copied()),
            plane,
        }
    }

    /// Closest point of the face; planar faces are hit exactly in f64
    fn project(&self, p: &Point3<f64>) -> Point3<f64> {
        let q = self.locator.project(p);
        match self.plane {
            Some((origin, n)) => q - n * (q - origin).dot(&n),
            None => q,
        }
    }
}

struct Remesher<'a, S> {
    points: Vec<Point3<f64>>,
    tris: Vec<[usize; 3]>,
    faces: Vec<i32>,
    alive: Vec<bool>,
    frozen: Vec<bool>,
    vtris: Vec<Vec<usize>>,
    features: BTreeSet<Edge>,
    rank: Vec<u8>,
    size: &'a S,
    params: &'a RemeshParams,
    references: BTreeMap<i32, FaceReference<'a>>,
    area_eps: f64,
    stats: RemeshStats,
}

fn cross(points: &[Point3<f64>], tri: &[usize; 3]) -> Vector3<f64> {
    (points[tri[1]] - points[tri[0]]).cross(&(points[tri[2]] - points[tri[0]]))
}

impl<'a, S> Remesher<'a, S>
where
    S: Fn(&Point3<f64>, i32) -> f64 + Sync,
{
    fn new(mesh: &'a SurfaceMesh, size: &'a S, params: &'a RemeshParams) -> Self {
        let n_tris = mesh.triangles.len();
        let faces = mesh.face_ids().map_or_else(|| vec![0; n_tris], <[i32]>::to_vec);
        let frozen: Vec<bool> = faces.iter().map(|f| params.frozen_faces.contains(f)).collect();
        let cos_feature = params.feature_angle.to_radians().cos();

        let mut features = BTreeSet::new();
        let mut rank = vec![FREE; mesh.points.len()];
        for (edge, tris) in edge_triangles(&mesh.triangles) {
            let sharp = match tris[..] {
                [t1, t2] => {
                    let (n1, n2) = (mesh.triangle_normal(t1), mesh.triangle_normal(t2));
                    let dot = n1.dot(&n2);
                    let border = faces[t1] != faces[t2] && !(params.merge_coplanar_faces && dot > COPLANAR_DOT);
                    border || dot < cos_feature
                }
                _ => {
                    if tris.len() > 2 {
                        rank[edge.v0] = CORNER;
                        rank[edge.v1] = CORNER;
                    }
                    true
                }
            };
            if sharp {
                features.insert(edge);
            }
        }

        let mut feature_count = vec![0usize; mesh.points.len()];
        for e in &features {
            feature_count[e.v0] += 1;
            feature_count[e.v1] += 1;
        }
        for (v, &count) in feature_count.iter().enumerate() {
            rank[v] = rank[v].max(match count {
                0 => FREE,
                2 => FEATURE,
                _ => CORNER,
            });
        }
        for (t, tri) in mesh.triangles.iter().enumerate() {
            if frozen[t] {
                for &v in tri {
                    rank[v] = CORNER;
                }
            }
        }

        let mut vtris = vec![Vec::new(); mesh.points.len()];
        for (t, tri) in mesh.triangles.iter().enumerate() {
            for &v in tri {
                vtris[v].push(t);
            }
        }

        let mut by_face: BTreeMap<i32, Vec<usize>> = BTreeMap::new();
        for (t, &face) in faces.iter().enumerate() {
            by_face.entry(face).or_default().push(t);
        }
        let references = by_face
            .into_iter()
            .map(|(face, triangles)| (face, FaceReference::new(mesh, &triangles)))
            .collect();
        let diagonal = mesh.bounding_box().diagonal().max(f64::MIN_POSITIVE);

        Self {
            points: mesh.points.clone(),
            tris: mesh.triangles.clone(),
            faces,
            alive: vec![true; n_tris],
            frozen,
            vtris,
            features,
            rank,
            size,
            params,
            references,
            area_eps: 1e-10 * diagonal * diagonal,
            stats: RemeshStats::default(),
        }
    }

    fn degenerate(&self, n: &Vector3<f64>) -> bool {
        n.norm() < 2.0 * self.area_eps
    }

    fn neighbors(&self, v: usize) -> Vec<usize> {
        let mut n: Vec<usize> = self.vtris[v]
            .iter()
            .flat_map(|&t| self.tris[t])
            .filter(|&u| u != v)
            .collect();
        n.sort_unstable();
        n.dedup();
        n
    }

    fn edge_tris(&self, a: usize, b: usize) -> Vec<usize> {
        self.vtris[a]
            .iter()
            .copied()
            .filter(|&t| self.tris[t].contains(&b))
            .collect()
    }

    fn length(&self, a: usize, b: usize) -> f64 {
        (self.points[a] - self.points[b]).norm()
    }

    /// Target length at the edge midpoint; the finest adjacent face wins
    fn target(&self, a: usize, b: usize) -> f64 {
        let mid = Point3::from((self.points[a].coords + self.points[b].coords) * 0.5);
        let h = self
            .edge_tris(a, b)
            .iter()
            .map(|&t| (self.size)(&mid, self.faces[t]))
            .fold(f64::INFINITY, f64::min);
        if h.is_finite() && h > 0.0 {
            h
        } else {
            (self.size)(&mid, 0)
        }
    }

    fn edges(&self) -> BTreeSet<Edge> {
        let mut edges = BTreeSet::new();
        for (t, tri) in self.tris.iter().enumerate() {
            if self.alive[t] {
                edges.insert(Edge::new(tri[0], tri[1]));
                edges.insert(Edge::new(tri[1], tri[2]));
                edges.insert(Edge::new(tri[2], tri[0]));
            }
        }
        edges
    }

    fn locked(&self, a: usize, b: usize) -> bool {
        self.edge_tris(a, b).iter().any(|&t| self.frozen[t])
    }

    fn kill(&mut self, t: usize) {
        self.alive[t] = false;
        for v in self.tris[t] {
            self.vtris[v].retain(|&x| x != t);
        }
    }

    fn split_long_edges(&mut self) {
        let split = self.params.split_ratio;
        let mut candidates: Vec<(f64, Edge)> = self
            .edges()
            .into_iter()
            .filter(|e| !self.locked(e.v0, e.v1))
            .filter_map(|e| {
                let ratio = self.length(e.v0, e.v1) / self.target(e.v0, e.v1);
                (ratio > split).then_some((ratio, e))
            })
            .collect();
        candidates.sort_by(|x, y| y.0.total_cmp(&x.0).then(x.1.cmp(&y.1)));

        for (_, e) in candidates {
            if self.length(e.v0, e.v1) > split * self.target(e.v0, e.v1) {
                self.split(e.v0, e.v1);
            }
        }
    }

    fn split(&mut self, a: usize, b: usize) {
        let shared = self.edge_tris(a, b);
        if shared.is_empty() {
            return;
        }
        let m = self.points.len();
        self.points
            .push(Point3::from((self.points[a].coords + self.points[b].coords) * 0.5));
        self.vtris.push(Vec::new());
        let on_feature = self.features.remove(&Edge::new(a, b));
        self.rank.push(if on_feature { FEATURE } else { FREE });
        if on_feature {
            self.features.insert(Edge::new(a, m));
            self.features.insert(Edge::new(m, b));
        }

        for t in shared {
            let tri = self.tris[t];
            let Some(i) = (0..3).find(|&i| {
                let (p, q) = (tri[i], tri[(i + 1) % 3]);
                (p == a && q == b) || (p == b && q == a)
            }) else {
                continue;
            };
            let (p, q, r) = (tri[i], tri[(i + 1) % 3], tri[(i + 2) % 3]);
            self.tris[t] = [p, m, r];
            let nt = self.tris.len();
            self.tris.push([m, q, r]);
            self.faces.push(self.faces[t]);
            self.alive.push(true);
            self.frozen.push(false);

            self.vtris[q].retain(|&x| x != t);
            self.vtris[q].push(nt);
            self.vtris[m].push(t);
            self.vtris[m].push(nt);
            self.vtris[r].push(nt);
        }
        self.stats.splits += 1;
    }

    fn collapse_short_edges(&mut self) {
        let collapse = self.params.collapse_ratio;
        let mut candidates: Vec<(f64, Edge)> = self
            .edges()
            .into_iter()
            .filter_map(|e| {
                let ratio = self.length(e.v0, e.v1) / self.target(e.v0, e.v1);
                (ratio < collapse).then_some((ratio, e))
            })
            .collect();
        candidates.sort_by(|x, y| x.0.total_cmp(&y.0).then(x.1.cmp(&y.1)));

        for (_, e) in candidates {
            let (a, b) = (e.v0, e.v1);
            if self.edge_tris(a, b).is_empty() || self.length(a, b) >= collapse * self.target(a, b) {
                continue;
            }
            let (remove, keep) = if self.rank[a] <= self.rank[b] { (a, b) } else { (b, a) };
            match self.rank[remove] {
                CORNER => continue,
                FEATURE if !self.features.contains(&e) => continue,
                _ => {}
            }
            self.collapse(remove, keep, true);
        }
    }

    /// Merge `remove` into `keep` if the result stays a valid, unfolded
    /// surface. With `check_lengths`, also refuse to create long edges.
    fn collapse(&mut self, remove: usize, keep: usize, check_lengths: bool) -> bool {
        let shared = self.edge_tris(remove, keep);
        if shared.is_empty() || shared.iter().any(|&t| self.frozen[t]) {
            return false;
        }

        // Link condition: the only common neighbors are the opposite vertices
        let around_remove = self.neighbors(remove);
        let around_keep = self.neighbors(keep);
        let common = around_remove
            .iter()
            .filter(|v| around_keep.binary_search(v).is_ok())
            .count();
        let opposite: BTreeSet<usize> = shared
            .iter()
            .flat_map(|&t| self.tris[t])
            .filter(|&v| v != remove && v != keep)
            .collect();
        if common != opposite.len() {
            return false;
        }
        if shared.len() == 2 && (self.vtris[remove].len() <= 3 || self.vtris[keep].len() <= 3) {
            return false;
        }

        let split_limit = self.params.split_ratio;
        for &t in &self.vtris[remove] {
            if shared.contains(&t) {
                continue;
            }
            if self.frozen[t] {
                return false;
            }
            let tri = self.tris[t];
            let moved = tri.map(|v| if v == remove { keep } else { v });
            let before = cross(&self.points, &tri);
            let after = cross(&self.points, &moved);
            if self.degenerate(&after) || (!self.degenerate(&before) && before.dot(&after) <= 0.0) {
                return false;
            }
            if check_lengths {
                for &v in &tri {
                    if v != remove && self.length(keep, v) > split_limit * self.target(keep, v) {
                        return false;
                    }
                }
            }
        }

        for &t in &shared {
            self.kill(t);
        }
        let moved = std::mem::take(&mut self.vtris[remove]);
        for &t in &moved {
            for v in self.tris[t].iter_mut() {
                if *v == remove {
                    *v = keep;
                }
            }
        }
        self.vtris[keep].extend(moved);

        for v in around_remove {
            if self.features.remove(&Edge::new(remove, v)) && v != keep {
                self.features.insert(Edge::new(keep, v));
            }
        }
        self.stats.collapses += 1;
        true
    }

    fn on_open_boundary(&self, v: usize) -> bool {
        self.neighbors(v)
            .into_iter()
            .any(|u| self.edge_tris(v, u).len() == 1)
    }

    fn valence_deviation(&self, v: usize, delta: i64) -> i64 {
        let target = if self.on_open_boundary(v) { 4 } else { 6 };
        let valence = self.neighbors(v).len() as i64 + delta;
        (valence - target).pow(2)
    }

    /// The two triangles on edge (a, b) as ([a, b, c], [b, a, d]), if the
    /// edge is interior and consistently wound
    fn flip_pair(&self, a: usize, b: usize) -> Option<(usize, usize, usize, usize)> {
        let shared = self.edge_tris(a, b);
        let [t1, t2] = shared[..] else {
            return None;
        };
        let has_directed = |t: usize, p: usize, q: usize| {
            let tri = self.tris[t];
            (0..3).any(|i| tri[i] == p && tri[(i + 1) % 3] == q)
        };
        let (t1, t2) = if has_directed(t1, a, b) { (t1, t2) } else { (t2, t1) };
        if !has_directed(t1, a, b) || !has_directed(t2, b, a) {
            return None;
        }
        let third = |t: usize| self.tris[t].into_iter().find(|&v| v != a && v != b);
        Some((t1, t2, third(t1)?, third(t2)?))
    }

    fn apply_flip(&mut self, a: usize, b: usize, t1: usize, t2: usize, c: usize, d: usize) {
        self.tris[t1] = [a, d, c];
        self.tris[t2] = [d, b, c];
        self.vtris[b].retain(|&x| x != t1);
        self.vtris[d].push(t1);
        self.vtris[a].retain(|&x| x != t2);
        self.vtris[c].push(t2);
        self.stats.flips += 1;
    }

    fn equalize_valences(&mut self) {
        let cos_feature = self.params.feature_angle.to_radians().cos();
        for e in self.edges() {
            let (a, b) = (e.v0, e.v1);
            if self.features.contains(&e) {
                continue;
            }
            let Some((t1, t2, c, d)) = self.flip_pair(a, b) else {
                continue;
            };
            if c == d || self.frozen[t1] || self.frozen[t2] || self.faces[t1] != self.faces[t2] {
                continue;
            }
            if self.neighbors(c).binary_search(&d).is_ok() {
                continue;
            }

            let before = self.valence_deviation(a, 0)
                + self.valence_deviation(b, 0)
                + self.valence_deviation(c, 0)
                + self.valence_deviation(d, 0);
            let after = self.valence_deviation(a, -1)
                + self.valence_deviation(b, -1)
                + self.valence_deviation(c, 1)
                + self.valence_deviation(d, 1);
            if after >= before {
                continue;
            }

            let old = cross(&self.points, &self.tris[t1]) + cross(&self.points, &self.tris[t2]);
            let n1 = cross(&self.points, &[a, d, c]);
            let n2 = cross(&self.points, &[d, b, c]);
            if self.degenerate(&n1) || self.degenerate(&n2) || n1.dot(&old) <= 0.0 || n2.dot(&old) <= 0.0 {
                continue;
            }
            if n1.normalize().dot(&n2.normalize()) < cos_feature {
                continue;
            }
            self.apply_flip(a, b, t1, t2, c, d);
        }
    }

    /// Closest point of `p` on the input faces around vertex `v`
    fn project(&self, v: usize, p: &Point3<f64>) -> Point3<f64> {
        let faces: BTreeSet<i32> = self.vtris[v].iter().map(|&t| self.faces[t]).collect();
        faces
            .iter()
            .filter_map(|face| self.references.get(face))
            .map(|reference| reference.project(p))
            .min_by(|a, b| (a - p).norm_squared().total_cmp(&(b - p).norm_squared()))
            .unwrap_or(*p)
    }

    /// Tangential smoothing of free vertices toward the area-weighted
    /// centroid of their one-ring, followed by projection
    fn relax(&mut self) {
        let candidates: Vec<Option<Point3<f64>>> = (0..self.points.len())
            .into_par_iter()
            .map(|v| {
                if self.rank[v] != FREE || self.vtris[v].is_empty() {
                    return None;
                }
                let mut weighted = Vector3::zeros();
                let mut normal = Vector3::zeros();
                let mut total = 0.0;
                for &t in &self.vtris[v] {
                    let tri = self.tris[t];
                    let n = cross(&self.points, &tri);
                    let area = n.norm() * 0.5;
                    let centroid = (self.points[tri[0]].coords + self.points[tri[1]].coords + self.points[tri[2]].coords) / 3.0;
                    weighted += centroid * area;
                    normal += n;
                    total += area;
                }
                if total <= self.area_eps || normal.norm() <= self.area_eps {
                    return None;
                }
                let normal = normal.normalize();
                let q = weighted / total;
                let p = self.points[v].coords;
                let tangential = Point3::from(q + normal * normal.dot(&(p - q)));
                let target = self.project(v, &tangential);

                for &t in &self.vtris[v] {
                    let tri = self.tris[t];
                    let before = cross(&self.points, &tri);
                    let mut moved = [self.points[tri[0]], self.points[tri[1]], self.points[tri[2]]];
                    for (slot, &u) in moved.iter_mut().zip(&tri) {
                        if u == v {
                            *slot = target;
                        }
                    }
                    let after = (moved[1] - moved[0]).cross(&(moved[2] - moved[0]));
                    if self.degenerate(&after) || before.dot(&after) <= 0.0 {
                        return None;
                    }
                }
                Some(target)
            })
            .collect();

        for (v, candidate) in candidates.into_iter().enumerate() {
            if let Some(p) = candidate {
                self.points[v] = p;
                self.stats.relaxed += 1;
            }
        }
    }

    /// Collapse or flip away triangles of negligible area
    fn remove_degenerates(&mut self) {
        for _ in 0..5 {
            let degenerate: Vec<usize> = (0..self.tris.len())
                .filter(|&t| self.alive[t] && !self.frozen[t] && self.degenerate(&cross(&self.points, &self.tris[t])))
                .collect();
            if degenerate.is_empty() {
                break;
            }
            for t in degenerate {
                if !self.alive[t] || !self.degenerate(&cross(&self.points, &self.tris[t])) {
                    continue;
                }
                let tri = self.tris[t];
                let mut edges: Vec<(usize, usize)> = vec![(tri[0], tri[1]), (tri[1], tri[2]), (tri[2], tri[0])];
                edges.sort_by(|x, y| self.length(x.0, x.1).total_cmp(&self.length(y.0, y.1)));

                let (a, b) = edges[0];
                let (remove, keep) = if self.rank[a] <= self.rank[b] { (a, b) } else { (b, a) };
                if self.collapse(remove, keep, false) {
                    self.stats.degenerates_removed += 1;
                    continue;
                }

                // Needle-free sliver: flip its longest edge onto the near-collinear vertex
                let (p, q) = edges[2];
                let Some((t1, t2, c, d)) = self.flip_pair(p, q) else {
                    continue;
                };
                if self.frozen[t1] || self.frozen[t2] || c == d || self.neighbors(c).binary_search(&d).is_ok() {
                    continue;
                }
                let n1 = cross(&self.points, &[p, d, c]);
                let n2 = cross(&self.points, &[d, q, c]);
                if self.degenerate(&n1) || self.degenerate(&n2) {
                    continue;
                }
                let feature = self.features.remove(&Edge::new(p, q));
                self.apply_flip(p, q, t1, t2, c, d);
                if feature {
                    let apex = if t1 == t { c } else { d };
                    self.features.insert(Edge::new(p, apex));
                    self.features.insert(Edge::new(apex, q));
                    self.rank[apex] = self.rank[apex].max(FEATURE);
                }
                self.stats.degenerates_removed += 1;
            }
        }
    }

    fn finish(self, keep_face_ids: bool) -> SurfaceMesh {
        let mut triangles = Vec::new();
        let mut ids = Vec::new();
        for (t, tri) in self.tris.iter().enumerate() {
            if self.alive[t] {
                triangles.push(*tri);
                ids.push(self.faces[t]);
            }
        }
        let mut mesh = SurfaceMesh::from_parts(self.points, triangles);
        if keep_face_ids {
            mesh.set_face_ids(ids);
        }
        mesh.remove_unused_points();
        mesh
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::mesh_utils::{is_closed, is_manifold};
    use crate::geometry::primitives::{box_surface, tessellate_revolved, Frame, Resolution, RevolvedProfile};

    fn cylinder() -> SurfaceMesh {
        tessellate_revolved(
            &RevolvedProfile::cylinder(1.0, 4.0),
            &Frame::from_axis(Point3::origin(), &Vector3::z()),
            Resolution::Fixed(24),
        )
    }

    fn edge_length_fraction(mesh: &SurfaceMesh, lo: f64, hi: f64) -> f64 {
        let lengths = mesh.edge_lengths();
        lengths.iter().filter(|&&l| l >= lo && l <= hi).count() as f64 / lengths.len() as f64
    }

    #[test]
    fn test_uniform_remesh_of_cylinder() {
        let input = cylinder();
        let output = remesh(&input, |_, _| 0.25, &RemeshParams::default()).unwrap();
        let mesh = output.mesh;

        assert!(is_manifold(&mesh));
        assert!(is_closed(&mesh));
        assert_eq!(mesh.face_id_set().into_iter().collect::<Vec<_>>(), vec![1, 2, 3]);
        assert!(output.stats.splits > 0);
        assert!(edge_length_fraction(&mesh, 0.125, 0.375) > 0.8);
        let relative = (mesh.signed_volume() - input.signed_volume()).abs() / input.signed_volume();
        assert!(relative < 0.02, "volume drift {}", relative);
    }

    #[test]
    fn test_frozen_faces_are_untouched() {
        let input = box_surface(Point3::origin(), Vector3::new(1.0, 1.0, 1.0));
        let frozen: BTreeSet<i32> = [1, 2, 3, 4, 5].into_iter().collect();
        let params = RemeshParams::default().with_frozen_faces(frozen);
        let mesh = remesh(&input, |_, _| 0.5, &params).unwrap().mesh;

        let count = |id: i32| mesh.face_ids().unwrap().iter().filter(|&&f| f == id).count();
        for id in 1..=5 {
            assert_eq!(count(id), 2);
        }
        assert!(count(6) > 2);
        assert!(is_closed(&mesh));
    }

    #[test]
    fn test_planar_faces_keep_their_area() {
        let input = box_surface(Point3::origin(), Vector3::new(1.0, 1.0, 1.0));
        for frozen in [BTreeSet::new(), [1, 2, 3, 4, 5].into_iter().collect()] {
            let params = RemeshParams::default().with_frozen_faces(frozen);
            let mesh = remesh(&input, |_, _| 0.3, &params).unwrap().mesh;
            assert!(mesh.triangle_count() > input.triangle_count());

            // Vertices never drift off the box, not even toward a neighboring face
            for p in &mesh.points {
                approx::assert_relative_eq!(p.coords.amax(), 1.0, epsilon = 1e-12);
            }
            let ids = mesh.face_ids().unwrap();
            for face in 1..=6 {
                let area: f64 = (0..mesh.triangle_count())
                    .filter(|&t| ids[t] == face)
                    .map(|t| mesh.triangle_area(t))
                    .sum();
                approx::assert_relative_eq!(area, 4.0, epsilon = 1e-9);
            }
        }
    }

    #[test]
    fn test_remesh_surface_bounds() {
        let mesh = remesh_surface(&cylinder(), 0.1, 0.3).unwrap();
        assert!(is_manifold(&mesh));
        assert!(edge_length_fraction(&mesh, 0.05, 0.4) > 0.9);
        assert!(remesh_surface(&cylinder(), 0.3, 0.1).is_err());
    }

    #[test]
    fn test_rejects_bad_sizing() {
        assert!(remesh(&cylinder(), |_, _| 0.0, &RemeshParams::default()).is_err());
        assert!(remesh(&SurfaceMesh::new(), |_, _| 1.0, &RemeshParams::default()).is_err());
    }

    #[test]
    fn test_bisect_keeps_original_vertices() {
        let input = box_surface(Point3::origin(), Vector3::new(1.0, 1.0, 1.0));
        let output = bisect(&input, |_, _| 0.5, &RemeshParams::default()).unwrap();
        let mesh = output.mesh;

        assert_eq!(output.stats.collapses, 0);
        assert_eq!(&mesh.points[..input.points.len()], &input.points[..]);
        assert!(mesh.edge_lengths().iter().all(|&l| l <= 0.5 * 4.0 / 3.0 + 1e-9));
        assert!(is_closed(&mesh));
        approx::assert_relative_eq!(mesh.signed_volume(), 8.0, epsilon = 1e-9);
    }
}
