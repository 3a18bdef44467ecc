// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! Centerline extraction and distance-to-centerline fields
//!
//! Tubular models get a skeleton polyline between their cap faces. The
//! distance from each surface point to the skeleton approximates the local
//! vessel radius and is a natural sizing function.

use crate::error::{Error, Result};
use crate::geometry::faces::face_info;
use crate::geometry::mesh_utils::{vertex_neighbors, Edge};
use crate::geometry::{Association, DataArray, SurfaceLocator, SurfaceMesh};
use nalgebra::{Point3, Vector3};
use rayon::prelude::*;
use std::cmp::Ordering;
use std::collections::{BTreeMap, BinaryHeap};
use tracing::{debug, info};

/// Point array holding the inscribed sphere radius along centerlines
pub const RADIUS_ARRAY: &str = "MaximumInscribedSphereRadius";
/// Point array holding each surface point's distance to the centerlines
pub const DISTANCE_ARRAY: &str = "DistanceToCenterlines";

/// Skeleton extraction between source and target cap faces
pub trait CenterlineExtractor {
    /// One polyline per (source, target) pair, returned as the `lines` of a surface
    fn extract(&self, surface: &SurfaceMesh, sources: &[i32], targets: &[i32]) -> Result<SurfaceMesh>;
}

/// Centerlines found by centering a shortest surface path on cross-section rings
#[derive(Debug, Clone)]
pub struct MedialCenterlines {
    pub iterations: usize,
    /// Fraction of the way each node moves toward its ring center per iteration
    pub relaxation: f64,
}

impl Default for MedialCenterlines {
    fn default() -> Self {
        Self {
            iterations: 20,
            relaxation: 0.5,
        }
    }
}

#[derive(PartialEq)]
struct Visit(f64, usize);

impl Eq for Visit {}

impl PartialOrd for Visit {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Visit {
    // Reversed for a min-heap
    fn cmp(&self, other: &Self) -> Ordering {
        other.0.total_cmp(&self.0).then(other.1.cmp(&self.1))
    }
}

/// Shortest edge path between two vertices
fn shortest_path(surface: &SurfaceMesh, from: usize, to: usize) -> Option<Vec<usize>> {
    let neighbors = vertex_neighbors(surface.points.len(), &surface.triangles);
    let mut dist = vec![f64::INFINITY; surface.points.len()];
    let mut prev = vec![usize::MAX; surface.points.len()];
    let mut heap = BinaryHeap::new();
    dist[from] = 0.0;
    heap.push(Visit(0.0, from));
    while let Some(Visit(d, v)) = heap.pop() {
        if v == to {
            break;
        }
        if d > dist[v] {
            continue;
        }
        for &u in &neighbors[v] {
            let candidate = d + (surface.points[u] - surface.points[v]).norm();
            if candidate < dist[u] {
                dist[u] = candidate;
                prev[u] = v;
                heap.push(Visit(candidate, u));
            }
        }
    }
    if !dist[to].is_finite() {
        return None;
    }
    let mut path = vec![to];
    while let Some(&last) = path.last() {
        if last == from {
            break;
        }
        path.push(prev[last]);
    }
    path.reverse();
    Some(path)
}

fn nearest_vertex(surface: &SurfaceMesh, p: &Point3<f64>) -> Option<usize> {
    let mut used = vec![false; surface.points.len()];
    for tri in &surface.triangles {
        for &v in tri {
            used[v] = true;
        }
    }
    (0..surface.points.len())
        .filter(|&v| used[v])
        .min_by(|&a, &b| {
            (surface.points[a] - p)
                .norm_squared()
                .total_cmp(&(surface.points[b] - p).norm_squared())
        })
}

/// Resample a polyline at roughly uniform spacing
fn resample(points: &[Point3<f64>], spacing: f64) -> Vec<Point3<f64>> {
    let length: f64 = points.windows(2).map(|w| (w[1] - w[0]).norm()).sum();
    let segments = ((length / spacing).ceil() as usize).max(2);
    let step = length / segments as f64;
    let mut out = vec![points[0]];
    let mut walked = 0.0;
    let mut next = step;
    for w in points.windows(2) {
        let len = (w[1] - w[0]).norm();
        while next <= walked + len && out.len() < segments {
            let t = if len > 0.0 { (next - walked) / len } else { 0.0 };
            out.push(w[0] + (w[1] - w[0]) * t);
            next += step;
        }
        walked += len;
    }
    out.push(points[points.len() - 1]);
    out
}

/// Centroid of the plane cross-section loop nearest to `origin`
fn ring_center(surface: &SurfaceMesh, origin: &Point3<f64>, normal: &Vector3<f64>) -> Option<Point3<f64>> {
    let side: Vec<f64> = surface.points.iter().map(|p| (p - origin).dot(normal)).collect();
    let crossing = |e: Edge| {
        let (a, b) = (e.v0, e.v1);
        let t = side[a] / (side[a] - side[b]);
        surface.points[a] + (surface.points[b] - surface.points[a]) * t
    };

    // Each crossed triangle contributes a segment joining two crossed edges
    let mut parent: BTreeMap<Edge, Edge> = BTreeMap::new();
    fn root(parent: &BTreeMap<Edge, Edge>, mut e: Edge) -> Edge {
        while let Some(&p) = parent.get(&e) {
            if p == e {
                break;
            }
            e = p;
        }
        e
    }
    for tri in &surface.triangles {
        let crossed: Vec<Edge> = (0..3)
            .map(|k| Edge::new(tri[k], tri[(k + 1) % 3]))
            .filter(|e| (side[e.v0] > 0.0) != (side[e.v1] > 0.0))
            .collect();
        if let [e1, e2] = crossed[..] {
            parent.entry(e1).or_insert(e1);
            parent.entry(e2).or_insert(e2);
            let (r1, r2) = (root(&parent, e1), root(&parent, e2));
            if r1 != r2 {
                parent.insert(r1.max(r2), r1.min(r2));
            }
        }
    }

    let mut loops: BTreeMap<Edge, (Vector3<f64>, usize)> = BTreeMap::new();
    for &e in parent.keys() {
        let entry = loops.entry(root(&parent, e)).or_insert((Vector3::zeros(), 0));
        entry.0 += crossing(e).coords;
        entry.1 += 1;
    }
    loops
        .values()
        .map(|(sum, n)| Point3::from(sum / *n as f64))
        .min_by(|a, b| (a - origin).norm_squared().total_cmp(&(b - origin).norm_squared()))
}

impl MedialCenterlines {
    fn center_path(&self, surface: &SurfaceMesh, path: Vec<Point3<f64>>) -> Vec<Point3<f64>> {
        let mut nodes = path;
        let n = nodes.len();
        for _ in 0..self.iterations {
            let moved: Vec<Point3<f64>> = (1..n - 1)
                .into_par_iter()
                .map(|i| {
                    let tangent = nodes[i + 1] - nodes[i - 1];
                    let Some(tangent) = tangent.try_normalize(f64::MIN_POSITIVE) else {
                        return nodes[i];
                    };
                    match ring_center(surface, &nodes[i], &tangent) {
                        Some(c) => nodes[i] + (c - nodes[i]) * self.relaxation,
                        None => nodes[i],
                    }
                })
                .collect();
            nodes[1..n - 1].copy_from_slice(&moved);

            // Light Laplacian smoothing keeps the polyline from kinking
            let smoothed: Vec<Point3<f64>> = (1..n - 1)
                .map(|i| Point3::from((nodes[i - 1].coords + nodes[i].coords * 2.0 + nodes[i + 1].coords) / 4.0))
                .collect();
            nodes[1..n - 1].copy_from_slice(&smoothed);
        }
        nodes
    }
}

impl CenterlineExtractor for MedialCenterlines {
    fn extract(&self, surface: &SurfaceMesh, sources: &[i32], targets: &[i32]) -> Result<SurfaceMesh> {
        if sources.is_empty() || targets.is_empty() {
            return Err(Error::invalid("centerlines need at least one source and one target face"));
        }
        let faces: BTreeMap<i32, Point3<f64>> = face_info(surface)?
            .into_iter()
            .map(|f| (f.id, f.centroid))
            .collect();
        let centroid = |id: i32| faces.get(&id).copied().ok_or(Error::MissingFaceId(id));

        let lengths = surface.edge_lengths();
        let spacing = lengths.iter().sum::<f64>() / lengths.len().max(1) as f64;
        let locator = SurfaceLocator::new(surface);

        let mut skeleton = SurfaceMesh::new();
        let mut radii = Vec::new();
        for &source in sources {
            for &target in targets {
                let (start, end) = (centroid(source)?, centroid(target)?);
                let (a, b) = nearest_vertex(surface, &start)
                    .zip(nearest_vertex(surface, &end))
                    .ok_or_else(|| Error::invalid("surface has no triangles"))?;
                let vertices = shortest_path(surface, a, b).ok_or_else(|| {
                    Error::invalid(format!("faces {} and {} are not connected", source, target))
                })?;

                let mut polyline = vec![start];
                polyline.extend(vertices.iter().map(|&v| surface.points[v]));
                polyline.push(end);
                let nodes = self.center_path(surface, resample(&polyline, spacing));

                let offset = skeleton.points.len();
                radii.extend(nodes.iter().map(|p| locator.distance(p)));
                skeleton.lines.push((offset..offset + nodes.len()).collect());
                skeleton.points.extend(nodes);
                debug!("centerline {} -> {}: {} nodes", source, target, skeleton.points.len() - offset);
            }
        }
        skeleton.set_array(Association::Point, DataArray::scalars_f64(RADIUS_ARRAY, radii));
        info!("extracted {} centerlines", skeleton.lines.len());
        Ok(skeleton)
    }
}

fn segment_distance(p: &Point3<f64>, a: &Point3<f64>, b: &Point3<f64>) -> f64 {
    let ab = b - a;
    let t = if ab.norm_squared() > 0.0 {
        ((p - a).dot(&ab) / ab.norm_squared()).clamp(0.0, 1.0)
    } else {
        0.0
    };
    (p - (a + ab * t)).norm()
}

/// Copy of `surface` with the point array `DistanceToCenterlines`
pub fn distance_to_centerlines(surface: &SurfaceMesh, centerlines: &SurfaceMesh) -> Result<SurfaceMesh> {
    let segments: Vec<(Point3<f64>, Point3<f64>)> = centerlines
        .lines
        .iter()
        .flat_map(|line| line.windows(2).map(|w| (centerlines.points[w[0]], centerlines.points[w[1]])))
        .collect();
    if segments.is_empty() {
        return Err(Error::invalid("centerlines contain no segments"));
    }
    let distances: Vec<f64> = surface
        .points
        .par_iter()
        .map(|p| {
            segments
                .iter()
                .map(|(a, b)| segment_distance(p, a, b))
                .fold(f64::INFINITY, f64::min)
        })
        .collect();
    let mut out = surface.clone();
    out.set_array(Association::Point, DataArray::scalars_f64(DISTANCE_ARRAY, distances));
    Ok(out)
}
