// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! Tetrahedral volume meshing of a closed surface
//!
//! Interior points come from a size-adapted octree (leaf centers and
//! corners, a body-centered cubic pattern), are jittered from a seeded RNG
//! and kept only when well inside the surface. Surface and interior points
//! are Delaunay-tetrahedralized and poorly shaped tetrahedra are refined by
//! circumcenter insertion. Surface triangles missing from the triangulation
//! are recovered by splitting surface edges at their midpoints; the
//! tetrahedra enclosed by the recovered surface form the mesh.

use super::delaunay::{Delaunay, Insertion};
use super::sizing::SizingField;
use crate::error::{Error, Result};
use crate::geometry::mesh_utils::{is_closed, is_manifold, Edge};
use crate::geometry::{tet_signed_volume, BoundingBox, Cell, SurfaceLocator, SurfaceMesh, VolumeMesh};
use nalgebra::{Matrix3, Point3, Vector3};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use std::collections::{BTreeSet, HashMap, HashSet};
use tracing::{debug, info};

/// Octree leaves are this much larger than the requested edge length
const LEAF_FACTOR: f64 = 1.07;
const MAX_DEPTH: u32 = 12;
const MAX_LEAVES: usize = 4_000_000;
const JITTER: f64 = 1e-3;
/// Interior points closer to the surface than this fraction of the local size are dropped
const SURFACE_CLEARANCE: f64 = 0.5;
/// Refinement points keep at least this fraction of the local size from existing points
const REFINE_SPACING: f64 = 0.5;
const MAX_RECOVERY_ROUNDS: usize = 16;

#[derive(Debug, Clone)]
pub struct VolumeParams {
    /// Radius-edge bound; worse tetrahedra are refined
    pub quality_ratio: f64,
    /// Number of refinement passes
    pub passes: u32,
    /// Relative tolerance for coincident points
    pub epsilon: f64,
    pub seed: u64,
    pub parallel: bool,
}

impl Default for VolumeParams {
    fn default() -> Self {
        Self {
            quality_ratio: 1.4,
            passes: 3,
            epsilon: 1e-8,
            seed: 0x5eed,
            parallel: true,
        }
    }
}

/// A surface edge split at its midpoint while recovering the boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EdgeSplit {
    pub a: usize,
    pub b: usize,
    /// New point, numbered after all earlier points of the surface
    pub midpoint: usize,
}

#[derive(Debug, Clone)]
pub struct VolumeOutput {
    /// Tetrahedra over the recovered surface points (first, in order) and interior points
    pub mesh: VolumeMesh,
    /// Input surface with recovery splits applied; every triangle is a tetrahedron face
    pub surface: SurfaceMesh,
    /// Splits in the order they were made
    pub splits: Vec<EdgeSplit>,
    /// Fraction of surface triangles present as faces of the tetrahedra
    pub recovered_fraction: f64,
    /// Points added beyond the octree and the surface, refinement and recovery alike
    pub steiner_points: usize,
}

/// Shape measures of one tetrahedron
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TetQuality {
    pub radius_edge_ratio: f64,
    /// Smallest dihedral angle in degrees
    pub min_dihedral: f64,
    pub min_edge: f64,
    pub max_edge: f64,
}

/// Circumcenter and circumradius, or `None` for flat tetrahedra
pub fn circumsphere(p: &[Point3<f64>; 4]) -> Option<(Point3<f64>, f64)> {
    let (a, b, c) = (p[1] - p[0], p[2] - p[0], p[3] - p[0]);
    let m = Matrix3::from_rows(&[a.transpose(), b.transpose(), c.transpose()]);
    if m.determinant().abs() <= 1e-12 * a.norm() * b.norm() * c.norm() {
        return None;
    }
    let rhs = Vector3::new(a.norm_squared(), b.norm_squared(), c.norm_squared()) * 0.5;
    let x = m.lu().solve(&rhs)?;
    if !x.iter().all(|v| v.is_finite()) {
        return None;
    }
    Some((p[0] + x, x.norm()))
}

const TET_EDGES: [(usize, usize); 6] = [(0, 1), (0, 2), (0, 3), (1, 2), (1, 3), (2, 3)];

pub fn tet_quality(p: &[Point3<f64>; 4]) -> TetQuality {
    let lengths = TET_EDGES.map(|(i, j)| (p[i] - p[j]).norm());
    let min_edge = lengths.iter().copied().fold(f64::INFINITY, f64::min);
    let max_edge = lengths.iter().copied().fold(0.0, f64::max);
    let radius_edge_ratio = match circumsphere(p) {
        Some((_, r)) if min_edge > 0.0 => r / min_edge,
        _ => f64::INFINITY,
    };

    // Dihedral at edge (i, j) between the faces holding the other two vertices
    let min_dihedral = TET_EDGES
        .iter()
        .map(|&(i, j)| {
            let others: Vec<usize> = (0..4).filter(|&k| k != i && k != j).collect();
            let axis = p[j] - p[i];
            let project = |v: Vector3<f64>| v - axis * (v.dot(&axis) / axis.norm_squared().max(f64::MIN_POSITIVE));
            let u = project(p[others[0]] - p[i]);
            let w = project(p[others[1]] - p[i]);
            let denom = u.norm() * w.norm();
            if denom <= 0.0 {
                0.0
            } else {
                (u.dot(&w) / denom).clamp(-1.0, 1.0).acos().to_degrees()
            }
        })
        .fold(180.0, f64::min);

    TetQuality {
        radius_edge_ratio,
        min_dihedral,
        min_edge,
        max_edge,
    }
}

pub(crate) fn failure(reason: impl Into<String>, sizing: &SizingField<'_>) -> Error {
    Error::MeshGenerationFailure {
        reason: reason.into(),
        context: sizing.describe(),
    }
}

/// Triangulation errors become generation failures carrying the sizing summary
fn triangulation_failed(err: Error, sizing: &SizingField<'_>) -> Error {
    failure(err.to_string(), sizing)
}

struct Cube {
    origin: Point3<f64>,
    side: f64,
}

impl Cube {
    fn center(&self) -> Point3<f64> {
        self.origin + Vector3::repeat(self.side / 2.0)
    }

    fn corner(&self, i: usize) -> Point3<f64> {
        let offset = |bit: usize| if i & bit != 0 { self.side } else { 0.0 };
        self.origin + Vector3::new(offset(1), offset(2), offset(4))
    }

    fn children(&self) -> impl Iterator<Item = Cube> + '_ {
        let half = self.side / 2.0;
        (0..8).map(move |i| Cube {
            origin: self.origin
                + Vector3::new(
                    if i & 1 != 0 { half } else { 0.0 },
                    if i & 2 != 0 { half } else { 0.0 },
                    if i & 4 != 0 { half } else { 0.0 },
                ),
            side: half,
        })
    }
}

/// Leaf centers and corners of an octree refined until leaves match the sizing field
fn octree_points(bounds: &BoundingBox, sizing: &SizingField<'_>) -> Result<Vec<(Point3<f64>, f64)>> {
    let extent = bounds.size().max();
    let leaf = LEAF_FACTOR * sizing.global();
    let mut depth = 0;
    let mut side = leaf;
    while side < extent && depth < MAX_DEPTH {
        side *= 2.0;
        depth += 1;
    }
    let root = Cube {
        origin: bounds.center() - Vector3::repeat(side / 2.0),
        side,
    };
    let finest = side / f64::from(1u32 << MAX_DEPTH);
    let lattice_origin = root.origin;

    let mut leaves = Vec::new();
    let mut stack = vec![(root, 0u32)];
    while let Some((cube, level)) = stack.pop() {
        let probe_box = BoundingBox::new(cube.origin, cube.corner(7));
        if !probe_box.inflated(cube.side).intersects(bounds) {
            continue;
        }
        let h = (0..8)
            .map(|i| sizing.at(&cube.corner(i)))
            .fold(sizing.at(&cube.center()), f64::min);
        if cube.side > LEAF_FACTOR * h && level < MAX_DEPTH {
            stack.extend(cube.children().map(|c| (c, level + 1)));
        } else {
            leaves.push(cube);
            if leaves.len() > MAX_LEAVES {
                return Err(failure("sizing field requests too many elements", sizing));
            }
        }
    }

    // Dedupe shared corners on the finest lattice (doubled so centers are integral)
    let key = |p: &Point3<f64>| {
        let q = (p - lattice_origin) / finest * 2.0;
        (q.x.round() as i64, q.y.round() as i64, q.z.round() as i64)
    };
    let mut seen = BTreeSet::new();
    let mut points = Vec::new();
    for cube in &leaves {
        for p in std::iter::once(cube.center()).chain((0..8).map(|i| cube.corner(i))) {
            if bounds.contains(&p) && seen.insert(key(&p)) {
                points.push((p, cube.side));
            }
        }
    }
    Ok(points)
}

/// Tetrahedralize the region bounded by `surface`
pub fn tetrahedralize(surface: &SurfaceMesh, sizing: &SizingField<'_>, params: &VolumeParams) -> Result<VolumeOutput> {
    if surface.triangles.is_empty() || !is_manifold(surface) || !is_closed(surface) {
        return Err(failure("surface is not a closed manifold", sizing));
    }
    if !surface.points.iter().all(|p| p.iter().all(|c| c.is_finite())) {
        return Err(failure("surface has non-finite coordinates", sizing));
    }
    if surface.signed_volume() <= 0.0 {
        return Err(failure("surface encloses no volume or is inverted", sizing));
    }

    let locator = SurfaceLocator::new(surface);
    let bounds = surface.bounding_box();
    let tolerance = params.epsilon * bounds.diagonal();
    let to_failure = |err: Error| triangulation_failed(err, sizing);

    let mut rng = StdRng::seed_from_u64(params.seed);
    let candidates: Vec<Point3<f64>> = octree_points(&bounds, sizing)?
        .into_iter()
        .map(|(p, side)| {
            let jitter = Vector3::new(
                rng.gen_range(-1.0..1.0),
                rng.gen_range(-1.0..1.0),
                rng.gen_range(-1.0..1.0),
            );
            p + jitter * (JITTER * side)
        })
        .collect();
    let keep_interior = |p: &Point3<f64>| {
        locator.contains(p) && locator.distance(p) >= SURFACE_CLEARANCE * sizing.at(p)
    };
    let keep: Vec<bool> = if params.parallel {
        candidates.par_iter().map(keep_interior).collect()
    } else {
        candidates.iter().map(keep_interior).collect()
    };
    let interior: Vec<Point3<f64>> = candidates
        .iter()
        .zip(&keep)
        .filter(|(_, &k)| k)
        .map(|(p, _)| *p)
        .collect();
    debug!("volume: {} of {} octree points inside", interior.len(), candidates.len());

    let mut used = vec![false; surface.points.len()];
    for tri in &surface.triangles {
        for &v in tri {
            used[v] = true;
        }
    }
    let referenced: Vec<usize> = (0..surface.points.len()).filter(|&v| used[v]).collect();
    let referenced_points: Vec<Point3<f64>> = referenced.iter().map(|&v| surface.points[v]).collect();

    let mut dt = Delaunay::new(&bounds.inflated(bounds.diagonal() * 0.1), tolerance);
    let surface_dt = dt.insert_all(&referenced_points).map_err(to_failure)?;
    let mut dt_of: Vec<Option<usize>> = vec![None; surface.points.len()];
    let mut seen = BTreeSet::new();
    for (&v, &d) in referenced.iter().zip(&surface_dt) {
        if !seen.insert(d) {
            return Err(failure(format!("surface point {} duplicates another surface point", v), sizing));
        }
        dt_of[v] = Some(d);
    }
    dt.insert_all(&interior).map_err(to_failure)?;

    // Quality refinement by circumcenter insertion
    let mut steiner = 0;
    for pass in 0..params.passes {
        let tets = carve(&dt, &locator, params.parallel);
        let points = dt.points();
        let centers: Vec<Point3<f64>> = tets
            .iter()
            .filter_map(|t| {
                let p = t.map(|v| points[v]);
                let quality = tet_quality(&p);
                if quality.radius_edge_ratio <= params.quality_ratio {
                    return None;
                }
                circumsphere(&p).map(|(c, _)| c)
            })
            .collect();
        let admissible = |c: &Point3<f64>| {
            locator.contains(c) && locator.distance(c) >= SURFACE_CLEARANCE * sizing.at(c)
        };
        let accept: Vec<bool> = if params.parallel {
            centers.par_iter().map(admissible).collect()
        } else {
            centers.iter().map(admissible).collect()
        };

        let mut inserted = 0;
        for (c, _) in centers.iter().zip(&accept).filter(|(_, &a)| a) {
            // Points never come closer than a fraction of the local size
            match dt.nearest_corner(c) {
                Some(d) if d < REFINE_SPACING * sizing.at(c) => continue,
                _ => {}
            }
            if let Insertion::Inserted(_) = dt.insert(*c).map_err(to_failure)? {
                inserted += 1;
            }
        }
        debug!("volume refinement pass {}: {} circumcenters inserted", pass, inserted);
        steiner += inserted;
        if inserted == 0 {
            break;
        }
    }

    let mut recovered = surface.clone();
    let splits = recover_boundary(&mut dt, &mut recovered, &mut dt_of, sizing)?;
    steiner += splits.len();

    // The recovered surface walls off the interior exactly
    let faces: HashSet<[usize; 3]> = recovered
        .triangles
        .iter()
        .filter_map(|tri| sorted_face(tri.map(|v| dt_of[v])))
        .collect();
    let points = dt.points();
    let tets: Vec<[usize; 4]> = dt
        .enclosed(|face| faces.contains(face))
        .into_iter()
        .filter(|t| !is_flat(&t.map(|v| points[v])))
        .collect();

    // Output numbering: recovered surface points in order, then interior points
    let mut to_output: HashMap<usize, usize> = HashMap::new();
    for (v, d) in dt_of.iter().enumerate() {
        if let Some(d) = d {
            to_output.insert(*d, v);
        }
    }
    let mut mesh = VolumeMesh::new();
    mesh.points = recovered.points.clone();
    for tet in &tets {
        for &d in tet {
            if !to_output.contains_key(&d) {
                to_output.insert(d, mesh.points.len());
                mesh.points.push(points[d]);
            }
        }
    }
    for tet in &tets {
        let cell = tet.map(|d| to_output[&d]);
        mesh.cells.push(Cell::tetra(cell));
    }
    for cell in &mesh.cells {
        if mesh.tet_volume(cell) <= 0.0 {
            return Err(failure("inverted tetrahedron in output", sizing));
        }
    }

    let recovered_fraction = recovered_fraction(&recovered, &mesh);
    if recovered_fraction < 1.0 {
        return Err(failure(
            format!(
                "volume mesh does not conform to the surface: {:.1}% of surface triangles are tetrahedron faces",
                100.0 * recovered_fraction
            ),
            sizing,
        ));
    }
    info!(
        "volume: {} tetrahedra, {} points ({} steiner, {} on the boundary)",
        mesh.cell_count(),
        mesh.points.len(),
        steiner,
        splits.len()
    );
    Ok(VolumeOutput {
        mesh,
        surface: recovered,
        splits,
        recovered_fraction,
        steiner_points: steiner,
    })
}

fn sorted_face(corners: [Option<usize>; 3]) -> Option<[usize; 3]> {
    let mut face = [corners[0]?, corners[1]?, corners[2]?];
    face.sort_unstable();
    Some(face)
}

/// Faces and edges of the finite tetrahedra, as sorted point indices
fn faces_and_edges(dt: &Delaunay) -> (HashSet<[usize; 3]>, HashSet<(usize, usize)>) {
    let mut faces = HashSet::new();
    let mut edges = HashSet::new();
    for tet in dt.tetrahedra() {
        for skip in 0..4 {
            let mut face = [0; 3];
            let mut n = 0;
            for (k, &v) in tet.iter().enumerate() {
                if k != skip {
                    face[n] = v;
                    n += 1;
                }
            }
            face.sort_unstable();
            faces.insert(face);
        }
        for &(i, j) in &TET_EDGES {
            edges.insert((tet[i].min(tet[j]), tet[i].max(tet[j])));
        }
    }
    (faces, edges)
}

/// Split surface edges at their midpoints until every surface triangle is a
/// face of the triangulation. Each split is applied to `surface` and `dt`
/// alike; `dt_of` maps surface points to triangulation points.
fn recover_boundary(
    dt: &mut Delaunay,
    surface: &mut SurfaceMesh,
    dt_of: &mut Vec<Option<usize>>,
    sizing: &SizingField<'_>,
) -> Result<Vec<EdgeSplit>> {
    let mut splits = Vec::new();
    for round in 0..=MAX_RECOVERY_ROUNDS {
        let (faces, edges) = faces_and_edges(dt);
        let mut pending = BTreeSet::new();
        let mut missing = 0;
        for tri in &surface.triangles {
            let Some(face) = sorted_face(tri.map(|v| dt_of[v])) else {
                return Err(failure("surface point missing from the triangulation", sizing));
            };
            if faces.contains(&face) {
                continue;
            }
            missing += 1;
            let sides = [(tri[0], tri[1]), (tri[1], tri[2]), (tri[2], tri[0])];
            let length = |&(a, b): &(usize, usize)| (surface.points[a] - surface.points[b]).norm();
            let absent = |&(a, b): &(usize, usize)| match (dt_of[a], dt_of[b]) {
                (Some(x), Some(y)) => !edges.contains(&(x.min(y), x.max(y))),
                _ => true,
            };
            // An edge the triangulation lacks first, else the longest
            let longest = |x: &&(usize, usize), y: &&(usize, usize)| length(*x).total_cmp(&length(*y));
            let pick = sides
                .iter()
                .filter(|s| absent(*s))
                .max_by(longest)
                .or_else(|| sides.iter().max_by(longest));
            if let Some(&(a, b)) = pick {
                pending.insert(Edge::new(a, b));
            }
        }
        if missing == 0 {
            debug!("boundary recovery: {} edge splits in {} rounds", splits.len(), round);
            return Ok(splits);
        }
        if round == MAX_RECOVERY_ROUNDS {
            return Err(failure(
                format!(
                    "boundary recovery did not converge: {} of {} surface triangles missing after {} rounds",
                    missing,
                    surface.triangles.len(),
                    MAX_RECOVERY_ROUNDS
                ),
                sizing,
            ));
        }
        debug!("boundary recovery round {}: {} triangles missing, {} edges split", round, missing, pending.len());

        for edge in pending {
            let Some(m) = surface.split_edge(edge.v0, edge.v1) else {
                continue;
            };
            match dt.insert(surface.points[m]).map_err(|err| triangulation_failed(err, sizing))? {
                Insertion::Inserted(d) => dt_of.push(Some(d)),
                Insertion::Duplicate(_) => {
                    return Err(failure(
                        format!("midpoint of surface edge ({}, {}) coincides with an existing point", edge.v0, edge.v1),
                        sizing,
                    ))
                }
            }
            splits.push(EdgeSplit {
                a: edge.v0,
                b: edge.v1,
                midpoint: m,
            });
        }
    }
    Ok(splits)
}

fn is_flat(p: &[Point3<f64>; 4]) -> bool {
    let longest = TET_EDGES
        .iter()
        .map(|&(i, j)| (p[i] - p[j]).norm())
        .fold(0.0, f64::max);
    tet_signed_volume(&p[0], &p[1], &p[2], &p[3]) <= 1e-10 * longest.powi(3)
}

/// Tetrahedra whose centroids lie inside the surface, dropping flat ones
fn carve(dt: &Delaunay, locator: &SurfaceLocator<'_>, parallel: bool) -> Vec<[usize; 4]> {
    let points = dt.points();
    let tets = dt.tetrahedra();
    let inside = |t: &[usize; 4]| {
        let p = t.map(|v| points[v]);
        if is_flat(&p) {
            return false;
        }
        let centroid = Point3::from((p[0].coords + p[1].coords + p[2].coords + p[3].coords) / 4.0);
        locator.contains(&centroid)
    };
    let keep: Vec<bool> = if parallel {
        tets.par_iter().map(inside).collect()
    } else {
        tets.iter().map(inside).collect()
    };
    tets.into_iter().zip(keep).filter(|(_, k)| *k).map(|(t, _)| t).collect()
}

fn recovered_fraction(surface: &SurfaceMesh, mesh: &VolumeMesh) -> f64 {
    let mut faces = BTreeSet::new();
    for cell in &mesh.cells {
        let p = &cell.points;
        for skip in 0..4 {
            let mut face: Vec<usize> = (0..4).filter(|&k| k != skip).map(|k| p[k]).collect();
            face.sort_unstable();
            faces.insert((face[0], face[1], face[2]));
        }
    }
    let found = surface
        .triangles
        .iter()
        .filter(|t| {
            let mut f = **t;
            f.sort_unstable();
            faces.contains(&(f[0], f[1], f[2]))
        })
        .count();
    found as f64 / surface.triangles.len().max(1) as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::primitives::box_surface;
    use crate::meshing::remesh::{remesh, RemeshParams};
    use crate::meshing::sizing::RefinementRegion;
    use crate::meshing::MeshOptions;

    fn box_domain(h: f64) -> SurfaceMesh {
        let coarse = box_surface(Point3::origin(), Vector3::new(1.0, 1.0, 1.0));
        remesh(&coarse, |_, _| h, &RemeshParams::default()).unwrap().mesh
    }

    #[test]
    fn test_quality_of_regular_tet() {
        let p = [
            Point3::new(1.0, 1.0, 1.0),
            Point3::new(1.0, -1.0, -1.0),
            Point3::new(-1.0, 1.0, -1.0),
            Point3::new(-1.0, -1.0, 1.0),
        ];
        let q = tet_quality(&p);
        approx::assert_relative_eq!(q.radius_edge_ratio, (6.0f64).sqrt() / 4.0, epsilon = 1e-12);
        approx::assert_relative_eq!(q.min_dihedral, (1.0f64 / 3.0).acos().to_degrees(), epsilon = 1e-9);

        let flat = [p[0], p[1], p[2], Point3::from((p[0].coords + p[1].coords) / 2.0)];
        assert!(tet_quality(&flat).radius_edge_ratio.is_infinite());
    }

    #[test]
    fn test_box_volume_mesh() {
        let surface = box_domain(0.5);
        let sizing = SizingField::uniform(0.5).unwrap();
        let output = tetrahedralize(&surface, &sizing, &VolumeParams::default()).unwrap();
        let mesh = &output.mesh;

        assert!(mesh.cell_count() > 0);
        assert_eq!(&mesh.points[..surface.points.len()], &surface.points[..]);
        assert_eq!(&mesh.points[..output.surface.points.len()], &output.surface.points[..]);
        assert!(mesh.cells.iter().all(|c| mesh.tet_volume(c) > 0.0));
        assert_eq!(output.recovered_fraction, 1.0);
        approx::assert_relative_eq!(mesh.volume(), output.surface.signed_volume(), max_relative = 1e-9);
        approx::assert_relative_eq!(mesh.volume(), 8.0, max_relative = 1e-6);
    }

    #[test]
    fn test_coarse_faces_are_split_into_the_mesh() {
        // Each square face has two valid diagonals; the surface fixes one
        let surface = box_surface(Point3::origin(), Vector3::new(1.0, 1.0, 1.0));
        let sizing = SizingField::uniform(0.5).unwrap();
        let output = tetrahedralize(&surface, &sizing, &VolumeParams::default()).unwrap();

        assert_eq!(output.recovered_fraction, 1.0);
        assert_eq!(output.surface.triangle_count(), 12 + 2 * output.splits.len());
        assert_eq!(output.surface.points.len(), 8 + output.splits.len());
        for split in &output.splits {
            let mid = (surface_point(&output.surface, split.a) + surface_point(&output.surface, split.b)) * 0.5;
            assert_eq!(output.surface.points[split.midpoint].coords, mid);
        }
        assert!(is_closed(&output.surface) && is_manifold(&output.surface));
        approx::assert_relative_eq!(output.surface.area(), 24.0, max_relative = 1e-12);
        let ids = output.surface.face_ids().unwrap();
        assert_eq!(ids.len(), output.surface.triangle_count());
        approx::assert_relative_eq!(output.mesh.volume(), 8.0, max_relative = 1e-9);
    }

    fn surface_point(mesh: &SurfaceMesh, v: usize) -> Vector3<f64> {
        mesh.points[v].coords
    }

    #[test]
    fn test_octree_grades_toward_the_refined_region() {
        let surface = box_surface(Point3::origin(), Vector3::new(1.5, 1.5, 1.5));
        let mut options = MeshOptions::default();
        options.global_edge_size = Some(0.5);
        let regions = [RefinementRegion::sphere(0.15, 0.5, Point3::origin()).unwrap()];
        let sizing = SizingField::new(&surface, &options, &regions).unwrap();
        let points = octree_points(&surface.bounding_box(), &sizing).unwrap();

        let far: Vec<f64> = points.iter().filter(|(p, _)| p.coords.norm() > 1.5).map(|(_, s)| *s).collect();
        let near: Vec<f64> = points.iter().filter(|(p, _)| p.coords.norm() < 0.2).map(|(_, s)| *s).collect();
        assert!(!far.is_empty() && !near.is_empty());
        assert!(far.iter().all(|&s| (s - LEAF_FACTOR * 0.5).abs() < 1e-12), "{:?}", far);
        assert!(near.iter().all(|&s| s <= LEAF_FACTOR * 0.15));
    }

    #[test]
    fn test_refinement_stays_inside_its_region() {
        let coarse = box_surface(Point3::origin(), Vector3::new(1.5, 1.5, 1.5));
        let surface = remesh(&coarse, |_, _| 0.5, &RemeshParams::default()).unwrap().mesh;
        let mut options = MeshOptions::default();
        options.global_edge_size = Some(0.5);
        let regions = [RefinementRegion::sphere(0.15, 0.5, Point3::origin()).unwrap()];
        let sizing = SizingField::new(&surface, &options, &regions).unwrap();
        let output = tetrahedralize(&surface, &sizing, &VolumeParams::default()).unwrap();
        let mesh = &output.mesh;

        let mean_edge = |select: &dyn Fn(&Point3<f64>) -> bool| {
            let (mut total, mut count) = (0.0, 0usize);
            for cell in &mesh.cells {
                let p = [0, 1, 2, 3].map(|k| mesh.points[cell.points[k]]);
                let centroid = Point3::from((p[0].coords + p[1].coords + p[2].coords + p[3].coords) / 4.0);
                if select(&centroid) {
                    total += TET_EDGES.iter().map(|&(i, j)| (p[i] - p[j]).norm()).sum::<f64>();
                    count += 6;
                }
            }
            total / count.max(1) as f64
        };
        let inner = mean_edge(&|c: &Point3<f64>| c.coords.norm() < 0.3);
        let outer = mean_edge(&|c: &Point3<f64>| c.coords.norm() > 1.0);
        assert!(outer > 0.3, "outer {}", outer);
        assert!(inner < 0.6 * outer, "inner {} outer {}", inner, outer);
    }

    #[test]
    fn test_triangulation_errors_carry_sizing_context() {
        let sizing = SizingField::uniform(0.5).unwrap();
        let bounds = BoundingBox::new(Point3::origin(), Point3::new(1.0, 1.0, 1.0));
        let err = Delaunay::new(&bounds, 1e-9)
            .insert(Point3::new(f64::NAN, 0.0, 0.0))
            .map_err(|err| triangulation_failed(err, &sizing))
            .unwrap_err();
        match err {
            Error::MeshGenerationFailure { reason, context } => {
                assert!(reason.contains("non-finite"), "{}", reason);
                assert_eq!(context, sizing.describe());
            }
            other => panic!("unexpected error {:?}", other),
        }

        let mut surface = box_surface(Point3::origin(), Vector3::new(1.0, 1.0, 1.0));
        surface.points[0].x = f64::NAN;
        assert!(matches!(
            tetrahedralize(&surface, &sizing, &VolumeParams::default()),
            Err(Error::MeshGenerationFailure { .. })
        ));
    }

    #[test]
    fn test_same_seed_same_mesh() {
        let surface = box_domain(0.6);
        let sizing = SizingField::uniform(0.6).unwrap();
        let a = tetrahedralize(&surface, &sizing, &VolumeParams::default()).unwrap();
        let b = tetrahedralize(&surface, &sizing, &VolumeParams::default()).unwrap();
        assert_eq!(a.mesh, b.mesh);
    }

    #[test]
    fn test_open_surface_fails() {
        let mut surface = box_surface(Point3::origin(), Vector3::new(1.0, 1.0, 1.0));
        surface.triangles.pop();
        surface.cell_data.clear();
        let sizing = SizingField::uniform(0.5).unwrap();
        assert!(matches!(
            tetrahedralize(&surface, &sizing, &VolumeParams::default()),
            Err(Error::MeshGenerationFailure { .. })
        ));
    }
}
