// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! CSG (Constructive Solid Geometry) operations using BSP trees
//!
//! Polygons carry the face id and the operand they came from so that the
//! caller can re-tag the surviving boundary patches. Trees live in an arena
//! and every traversal is iterative, so deep (convex) inputs cannot exhaust
//! the stack.

use super::SurfaceMesh;
use nalgebra::{Point3, Vector3};
use std::collections::HashMap;
use tracing::debug;

/// Classification tolerance for points against a splitting plane
const EPSILON: f64 = 1e-5;

const COPLANAR: u8 = 0;
const FRONT: u8 = 1;
const BACK: u8 = 2;
const SPANNING: u8 = 3;

/// Boolean operation type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum BooleanOp {
    Union,
    Subtract,
    Intersect,
}

impl std::fmt::Display for BooleanOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BooleanOp::Union => write!(f, "union"),
            BooleanOp::Subtract => write!(f, "subtract"),
            BooleanOp::Intersect => write!(f, "intersect"),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Plane {
    normal: Vector3<f64>,
    w: f64,
}

impl Plane {
    fn from_points(a: &Point3<f64>, b: &Point3<f64>, c: &Point3<f64>) -> Option<Self> {
        let n = (b - a).cross(&(c - a));
        let len = n.norm();
        if len <= f64::MIN_POSITIVE {
            return None;
        }
        let normal = n / len;
        Some(Self {
            normal,
            w: normal.dot(&a.coords),
        })
    }

    fn flip(&mut self) {
        self.normal = -self.normal;
        self.w = -self.w;
    }
}

/// Convex polygon tagged with its operand (0 = A, 1 = B) and face id
#[derive(Debug, Clone)]
pub struct Polygon {
    pub vertices: Vec<Point3<f64>>,
    pub source: u8,
    pub face: i32,
    plane: Plane,
}

impl Polygon {
    fn new(vertices: Vec<Point3<f64>>, source: u8, face: i32) -> Option<Self> {
        let plane = Plane::from_points(&vertices[0], &vertices[1], &vertices[2])?;
        Some(Self {
            vertices,
            source,
            face,
            plane,
        })
    }

    fn with_vertices(&self, vertices: Vec<Point3<f64>>) -> Self {
        Self {
            vertices,
            source: self.source,
            face: self.face,
            plane: self.plane,
        }
    }

    fn flip(&mut self) {
        self.vertices.reverse();
        self.plane.flip();
    }

    pub fn area(&self) -> f64 {
        let v0 = self.vertices[0];
        self.vertices
            .windows(2)
            .skip(1)
            .map(|w| (w[0] - v0).cross(&(w[1] - v0)).norm() * 0.5)
            .sum()
    }
}

/// Split `polygon` by `plane` into the four csg.js buckets
fn split_polygon(
    plane: &Plane,
    polygon: &Polygon,
    coplanar_front: &mut Vec<Polygon>,
    coplanar_back: &mut Vec<Polygon>,
    front: &mut Vec<Polygon>,
    back: &mut Vec<Polygon>,
) {
    let mut polygon_type = COPLANAR;
    let types: Vec<u8> = polygon
        .vertices
        .iter()
        .map(|v| {
            let t = plane.normal.dot(&v.coords) - plane.w;
            let kind = if t < -EPSILON {
                BACK
            } else if t > EPSILON {
                FRONT
            } else {
                COPLANAR
            };
            polygon_type |= kind;
            kind
        })
        .collect();

    match polygon_type {
        COPLANAR => {
            if plane.normal.dot(&polygon.plane.normal) > 0.0 {
                coplanar_front.push(polygon.clone());
            } else {
                coplanar_back.push(polygon.clone());
            }
        }
        FRONT => front.push(polygon.clone()),
        BACK => back.push(polygon.clone()),
        _ => {
            let n = polygon.vertices.len();
            let mut f = Vec::with_capacity(n + 1);
            let mut b = Vec::with_capacity(n + 1);
            for i in 0..n {
                let j = (i + 1) % n;
                let (ti, tj) = (types[i], types[j]);
                let (vi, vj) = (polygon.vertices[i], polygon.vertices[j]);
                if ti != BACK {
                    f.push(vi);
                }
                if ti != FRONT {
                    b.push(vi);
                }
                if ti | tj == SPANNING {
                    let t = (plane.w - plane.normal.dot(&vi.coords)) / plane.normal.dot(&(vj - vi));
                    let v = vi + (vj - vi) * t;
                    f.push(v);
                    b.push(v);
                }
            }
            if f.len() >= 3 {
                front.push(polygon.with_vertices(f));
            }
            if b.len() >= 3 {
                back.push(polygon.with_vertices(b));
            }
        }
    }
}

#[derive(Debug, Clone, Default)]
struct Node {
    plane: Option<Plane>,
    front: Option<usize>,
    back: Option<usize>,
    polygons: Vec<Polygon>,
}

/// Arena-backed BSP tree
#[derive(Debug, Clone)]
struct BspTree {
    nodes: Vec<Node>,
}

impl BspTree {
    fn new(polygons: Vec<Polygon>) -> Self {
        let mut tree = Self {
            nodes: vec![Node::default()],
        };
        tree.build(0, polygons);
        tree
    }

    fn build(&mut self, root: usize, polygons: Vec<Polygon>) {
        let mut work = vec![(root, polygons)];
        while let Some((index, polygons)) = work.pop() {
            if polygons.is_empty() {
                continue;
            }
            let plane = match self.nodes[index].plane {
                Some(plane) => plane,
                None => {
                    let plane = polygons[0].plane;
                    self.nodes[index].plane = Some(plane);
                    plane
                }
            };

            let mut coplanar = Vec::new();
            let mut front = Vec::new();
            let mut back = Vec::new();
            for polygon in &polygons {
                let mut coplanar_back = Vec::new();
                split_polygon(&plane, polygon, &mut coplanar, &mut coplanar_back, &mut front, &mut back);
                coplanar.append(&mut coplanar_back);
            }
            self.nodes[index].polygons.append(&mut coplanar);

            if !front.is_empty() {
                let child = self.child(index, true);
                work.push((child, front));
            }
            if !back.is_empty() {
                let child = self.child(index, false);
                work.push((child, back));
            }
        }
    }

    fn child(&mut self, index: usize, front: bool) -> usize {
        let existing = if front {
            self.nodes[index].front
        } else {
            self.nodes[index].back
        };
        if let Some(child) = existing {
            return child;
        }
        let child = self.nodes.len();
        self.nodes.push(Node::default());
        if front {
            self.nodes[index].front = Some(child);
        } else {
            self.nodes[index].back = Some(child);
        }
        child
    }

    /// Remove the parts of `polygons` inside this tree's solid
    fn clip_polygons(&self, polygons: Vec<Polygon>) -> Vec<Polygon> {
        let mut result = Vec::new();
        let mut work = vec![(0usize, polygons)];
        while let Some((index, polygons)) = work.pop() {
            let node = &self.nodes[index];
            let Some(plane) = node.plane else {
                result.extend(polygons);
                continue;
            };
            let mut front = Vec::new();
            let mut back = Vec::new();
            for polygon in &polygons {
                let mut coplanar_front = Vec::new();
                let mut coplanar_back = Vec::new();
                split_polygon(&plane, polygon, &mut coplanar_front, &mut coplanar_back, &mut front, &mut back);
                front.append(&mut coplanar_front);
                back.append(&mut coplanar_back);
            }
            match node.front {
                Some(child) => work.push((child, front)),
                None => result.extend(front),
            }
            if let Some(child) = node.back {
                work.push((child, back));
            }
        }
        result
    }

    fn clip_to(&mut self, other: &BspTree) {
        for node in &mut self.nodes {
            let polygons = std::mem::take(&mut node.polygons);
            node.polygons = other.clip_polygons(polygons);
        }
    }

    fn invert(&mut self) {
        for node in &mut self.nodes {
            for polygon in &mut node.polygons {
                polygon.flip();
            }
            if let Some(plane) = &mut node.plane {
                plane.flip();
            }
            std::mem::swap(&mut node.front, &mut node.back);
        }
    }

    fn all_polygons(&self) -> Vec<Polygon> {
        self.nodes.iter().flat_map(|n| n.polygons.iter().cloned()).collect()
    }
}

/// Convert a tagged surface to polygons; untagged faces get id 0
fn surface_to_polygons(mesh: &SurfaceMesh, source: u8) -> Vec<Polygon> {
    let ids = mesh.face_ids();
    mesh.triangles
        .iter()
        .enumerate()
        .filter_map(|(t, tri)| {
            let face = ids.map(|ids| ids[t]).unwrap_or(0);
            Polygon::new(tri.iter().map(|&v| mesh.points[v]).collect(), source, face)
        })
        .collect()
}

/// Result of a BSP boolean before re-tagging
#[derive(Debug, Clone)]
pub struct CsgOutput {
    pub polygons: Vec<Polygon>,
    /// Fraction of each operand's surface area that survived clipping
    pub survived: [f64; 2],
}

impl CsgOutput {
    /// True when clipping changed neither operand's boundary partially,
    /// i.e. the surfaces never crossed.
    pub fn is_disjoint(&self) -> bool {
        const TOL: f64 = 1e-9;
        self.survived
            .iter()
            .all(|&s| s <= TOL || s >= 1.0 - TOL)
    }
}

/// Perform a BSP boolean between two closed, outward-oriented surfaces
pub fn csg_boolean(a: &SurfaceMesh, b: &SurfaceMesh, op: BooleanOp) -> CsgOutput {
    let polys_a = surface_to_polygons(a, 0);
    let polys_b = surface_to_polygons(b, 1);
    let area = |polys: &[Polygon]| polys.iter().map(|p| p.area()).sum::<f64>();
    let total = [area(&polys_a), area(&polys_b)];

    let mut tree_a = BspTree::new(polys_a);
    let mut tree_b = BspTree::new(polys_b);

    let polygons = match op {
        BooleanOp::Union => {
            tree_a.clip_to(&tree_b);
            tree_b.clip_to(&tree_a);
            tree_b.invert();
            tree_b.clip_to(&tree_a);
            tree_b.invert();
            let mut result = tree_a.all_polygons();
            result.extend(tree_b.all_polygons());
            result
        }
        BooleanOp::Subtract => {
            tree_a.invert();
            tree_a.clip_to(&tree_b);
            tree_b.clip_to(&tree_a);
            tree_b.invert();
            tree_b.clip_to(&tree_a);
            tree_b.invert();
            flipped(tree_a.all_polygons().into_iter().chain(tree_b.all_polygons()))
        }
        BooleanOp::Intersect => {
            tree_a.invert();
            tree_b.clip_to(&tree_a);
            tree_b.invert();
            tree_a.clip_to(&tree_b);
            tree_b.clip_to(&tree_a);
            flipped(tree_a.all_polygons().into_iter().chain(tree_b.all_polygons()))
        }
    };

    let mut kept = [0.0; 2];
    for polygon in &polygons {
        kept[polygon.source as usize] += polygon.area();
    }
    let survived = [
        if total[0] > 0.0 { kept[0] / total[0] } else { 0.0 },
        if total[1] > 0.0 { kept[1] / total[1] } else { 0.0 },
    ];
    debug!(
        "BSP {}: {} polygons, survived A={:.4} B={:.4}",
        op,
        polygons.len(),
        survived[0],
        survived[1]
    );
    CsgOutput { polygons, survived }
}

fn flipped(polygons: impl Iterator<Item = Polygon>) -> Vec<Polygon> {
    polygons
        .map(|mut p| {
            p.flip();
            p
        })
        .collect()
}

/// Triangulate polygons into a welded, T-junction free surface.
///
/// Returns the surface plus the (source, face) tag of every triangle.
pub fn polygons_to_surface(polygons: &[Polygon], weld_epsilon: f64) -> (SurfaceMesh, Vec<(u8, i32)>) {
    // Weld polygon corners through a hash grid
    let key = |p: &Point3<f64>| {
        (
            (p.x / weld_epsilon).round() as i64,
            (p.y / weld_epsilon).round() as i64,
            (p.z / weld_epsilon).round() as i64,
        )
    };
    let mut points: Vec<Point3<f64>> = Vec::new();
    let mut grid: HashMap<(i64, i64, i64), Vec<usize>> = HashMap::new();
    let mut index_of = |p: &Point3<f64>, points: &mut Vec<Point3<f64>>| -> usize {
        let (kx, ky, kz) = key(p);
        for dx in -1..=1 {
            for dy in -1..=1 {
                for dz in -1..=1 {
                    if let Some(bucket) = grid.get(&(kx + dx, ky + dy, kz + dz)) {
                        for &i in bucket {
                            if (points[i] - p).norm() <= weld_epsilon {
                                return i;
                            }
                        }
                    }
                }
            }
        }
        let i = points.len();
        points.push(*p);
        grid.entry((kx, ky, kz)).or_default().push(i);
        i
    };

    let mut loops: Vec<Vec<usize>> = Vec::with_capacity(polygons.len());
    let mut tags = Vec::with_capacity(polygons.len());
    for polygon in polygons {
        let mut ring: Vec<usize> = polygon
            .vertices
            .iter()
            .map(|v| index_of(v, &mut points))
            .collect();
        ring.dedup();
        while ring.len() > 1 && ring.first() == ring.last() {
            ring.pop();
        }
        if ring.len() >= 3 {
            loops.push(ring);
            tags.push((polygon.source, polygon.face));
        }
    }

    insert_t_junctions(&points, &mut loops, weld_epsilon);

    let mut mesh = SurfaceMesh::new();
    mesh.points = points;
    let mut triangle_tags = Vec::new();
    for (ring, tag) in loops.iter().zip(&tags) {
        let before = mesh.triangles.len();
        triangulate_convex(&mut mesh, ring, weld_epsilon);
        triangle_tags.extend(std::iter::repeat(*tag).take(mesh.triangles.len() - before));
    }
    mesh.remove_unused_points();
    (mesh, triangle_tags)
}

/// Insert vertices lying on the interior of polygon edges into those edges
fn insert_t_junctions(points: &[Point3<f64>], loops: &mut [Vec<usize>], epsilon: f64) {
    if points.is_empty() {
        return;
    }
    let bbox = super::BoundingBox::from_points(points);
    let cell = (bbox.diagonal() / (points.len() as f64).cbrt()).max(epsilon * 10.0);
    let key = |p: &Point3<f64>| {
        (
            ((p.x - bbox.min.x) / cell).floor() as i64,
            ((p.y - bbox.min.y) / cell).floor() as i64,
            ((p.z - bbox.min.z) / cell).floor() as i64,
        )
    };
    let mut grid: HashMap<(i64, i64, i64), Vec<usize>> = HashMap::new();
    for (i, p) in points.iter().enumerate() {
        grid.entry(key(p)).or_default().push(i);
    }

    for ring in loops.iter_mut() {
        let n = ring.len();
        let mut rebuilt = Vec::with_capacity(n);
        for k in 0..n {
            let (a, b) = (ring[k], ring[(k + 1) % n]);
            rebuilt.push(a);
            let (pa, pb) = (points[a], points[b]);
            let d = pb - pa;
            let len2 = d.norm_squared();
            if len2 <= epsilon * epsilon {
                continue;
            }
            let (lo, hi) = (key(&pa.inf(&pb)), key(&pa.sup(&pb)));
            let mut on_edge: Vec<(f64, usize)> = Vec::new();
            for x in lo.0 - 1..=hi.0 + 1 {
                for y in lo.1 - 1..=hi.1 + 1 {
                    for z in lo.2 - 1..=hi.2 + 1 {
                        let Some(bucket) = grid.get(&(x, y, z)) else {
                            continue;
                        };
                        for &i in bucket {
                            if i == a || i == b {
                                continue;
                            }
                            let t = (points[i] - pa).dot(&d) / len2;
                            if t <= 0.0 || t >= 1.0 {
                                continue;
                            }
                            let foot = pa + d * t;
                            if (points[i] - foot).norm() <= epsilon {
                                on_edge.push((t, i));
                            }
                        }
                    }
                }
            }
            on_edge.sort_by(|x, y| x.0.total_cmp(&y.0).then(x.1.cmp(&y.1)));
            on_edge.dedup_by_key(|e| e.1);
            rebuilt.extend(on_edge.into_iter().map(|(_, i)| i));
        }
        *ring = rebuilt;
    }
}

/// Fan from the first corner when every corner is strictly convex,
/// otherwise fan from an inserted centroid.
fn triangulate_convex(mesh: &mut SurfaceMesh, ring: &[usize], epsilon: f64) {
    let n = ring.len();
    let normal = (1..n - 1)
        .map(|k| (mesh.points[ring[k]] - mesh.points[ring[0]]).cross(&(mesh.points[ring[k + 1]] - mesh.points[ring[0]])))
        .fold(Vector3::zeros(), |acc, c| acc + c);
    let scale = normal.norm();
    if scale <= f64::MIN_POSITIVE {
        return;
    }
    let strictly_convex = (0..n).all(|k| {
        let (p, q, r) = (mesh.points[ring[(k + n - 1) % n]], mesh.points[ring[k]], mesh.points[ring[(k + 1) % n]]);
        let turn = (q - p).cross(&(r - q)).dot(&normal) / scale;
        turn > epsilon * (q - p).norm().max((r - q).norm())
    });

    if strictly_convex {
        for k in 1..n - 1 {
            mesh.triangles.push([ring[0], ring[k], ring[k + 1]]);
        }
    } else {
        let centroid = ring
            .iter()
            .fold(Vector3::zeros(), |acc, &v| acc + mesh.points[v].coords)
            / n as f64;
        let c = mesh.points.len();
        mesh.points.push(Point3::from(centroid));
        for k in 0..n {
            let (a, b) = (ring[k], ring[(k + 1) % n]);
            if a != b {
                mesh.triangles.push([c, a, b]);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::mesh_utils::validate_mesh;
    use crate::geometry::primitives::box_surface;
    use approx::assert_relative_eq;

    fn unit_box(center: [f64; 3]) -> SurfaceMesh {
        box_surface(Point3::new(center[0], center[1], center[2]), Vector3::new(1.0, 1.0, 1.0))
    }

    #[test]
    fn test_union_of_overlapping_boxes() {
        let a = unit_box([0.0, 0.0, 0.0]);
        let b = unit_box([1.0, 0.5, 0.25]);
        let out = csg_boolean(&a, &b, BooleanOp::Union);
        assert!(!out.is_disjoint());

        let (mesh, tags) = polygons_to_surface(&out.polygons, 1e-9);
        assert_eq!(tags.len(), mesh.triangle_count());
        let report = validate_mesh(&mesh);
        assert!(report.is_manifold && report.is_closed, "{:?}", report);
        // 8 + 8 - overlap (1 x 1.5 x 1.75)
        assert_relative_eq!(mesh.signed_volume(), 16.0 - 2.625, epsilon = 1e-9);
    }

    #[test]
    fn test_subtract_and_intersect_volumes() {
        let a = unit_box([0.0, 0.0, 0.0]);
        let b = unit_box([1.0, 1.0, 1.0]);

        let diff = csg_boolean(&a, &b, BooleanOp::Subtract);
        let (mesh, _) = polygons_to_surface(&diff.polygons, 1e-9);
        assert_relative_eq!(mesh.signed_volume(), 7.0, epsilon = 1e-9);

        let inter = csg_boolean(&a, &b, BooleanOp::Intersect);
        let (mesh, _) = polygons_to_surface(&inter.polygons, 1e-9);
        assert_relative_eq!(mesh.signed_volume(), 1.0, epsilon = 1e-9);
    }

    #[test]
    fn test_disjoint_operands_are_detected() {
        let a = unit_box([0.0, 0.0, 0.0]);
        let b = unit_box([5.0, 0.0, 0.0]);
        assert!(csg_boolean(&a, &b, BooleanOp::Union).is_disjoint());
        let diff = csg_boolean(&a, &b, BooleanOp::Subtract);
        assert!(diff.is_disjoint());
        assert!(csg_boolean(&a, &b, BooleanOp::Intersect).polygons.is_empty());
    }

    #[test]
    fn test_face_tags_survive() {
        let a = unit_box([0.0, 0.0, 0.0]);
        let b = unit_box([1.0, 1.0, 1.0]);
        let out = csg_boolean(&a, &b, BooleanOp::Subtract);
        assert!(out.polygons.iter().any(|p| p.source == 1));
        assert!(out.polygons.iter().all(|p| (1..=6).contains(&p.face)));
    }
}
