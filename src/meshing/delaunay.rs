// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! Incremental Delaunay tetrahedralization
//!
//! Bowyer–Watson insertion inside an enclosing super-tetrahedron, with exact
//! orientation and in-sphere predicates. Tetrahedra are stored with positive
//! `orient3d` and handed out with positive VTK volume.

use crate::error::{Error, Result};
use crate::geometry::BoundingBox;
use nalgebra::Point3;
use robust::{insphere, orient3d, Coord3D};
use std::collections::{HashMap, VecDeque};
use tracing::debug;

const NONE: usize = usize::MAX;
const SUPER: usize = 4;
const MAX_WALK: usize = 100_000;

fn coord(p: &Point3<f64>) -> Coord3D<f64> {
    Coord3D { x: p.x, y: p.y, z: p.z }
}

/// Outcome of inserting one point
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Insertion {
    /// New vertex with this index
    Inserted(usize),
    /// The point coincides with an existing vertex
    Duplicate(usize),
}

impl Insertion {
    pub fn index(self) -> usize {
        match self {
            Insertion::Inserted(i) | Insertion::Duplicate(i) => i,
        }
    }
}

pub struct Delaunay {
    /// Super-tetrahedron corners first, then inserted points
    points: Vec<Point3<f64>>,
    tets: Vec<[usize; 4]>,
    /// Neighbor across the face opposite each vertex
    adjacent: Vec<[usize; 4]>,
    alive: Vec<bool>,
    free: Vec<usize>,
    last: usize,
    duplicate_tolerance: f64,
}

impl Delaunay {
    /// Empty triangulation able to hold points inside `bounds`
    pub fn new(bounds: &BoundingBox, duplicate_tolerance: f64) -> Self {
        let center = bounds.center();
        let k = 1000.0 * (bounds.diagonal() / 2.0).max(1e-9);
        let corner = |x: f64, y: f64, z: f64| Point3::new(center.x + k * x, center.y + k * y, center.z + k * z);
        let mut points = vec![
            corner(1.0, 1.0, 1.0),
            corner(1.0, -1.0, -1.0),
            corner(-1.0, 1.0, -1.0),
            corner(-1.0, -1.0, 1.0),
        ];
        if orient3d(coord(&points[0]), coord(&points[1]), coord(&points[2]), coord(&points[3])) < 0.0 {
            points.swap(0, 1);
        }
        Self {
            points,
            tets: vec![[0, 1, 2, 3]],
            adjacent: vec![[NONE; 4]],
            alive: vec![true],
            free: Vec::new(),
            last: 0,
            duplicate_tolerance,
        }
    }

    /// Inserted points, indexed as returned by [`Delaunay::insert`]
    pub fn points(&self) -> &[Point3<f64>] {
        &self.points[SUPER..]
    }

    pub fn point_count(&self) -> usize {
        self.points.len() - SUPER
    }

    fn orient(&self, a: usize, b: usize, c: usize, d: &Point3<f64>) -> f64 {
        orient3d(coord(&self.points[a]), coord(&self.points[b]), coord(&self.points[c]), coord(d))
    }

    /// Orientation of the tet with vertex `slot` replaced by `p`
    fn orient_replaced(&self, tet: usize, slot: usize, p: &Point3<f64>) -> f64 {
        let mut coords = self.tets[tet].map(|v| coord(&self.points[v]));
        coords[slot] = coord(p);
        let [a, b, c, d] = coords;
        orient3d(a, b, c, d)
    }

    fn in_sphere(&self, tet: usize, p: &Point3<f64>) -> f64 {
        let [a, b, c, d] = self.tets[tet].map(|v| coord(&self.points[v]));
        insphere(a, b, c, d, coord(p))
    }

    fn contains(&self, tet: usize, p: &Point3<f64>) -> bool {
        (0..4).all(|slot| self.orient_replaced(tet, slot, p) >= 0.0)
    }

    /// Tetrahedron containing `p`, by visibility walk from the last insertion
    fn locate(&self, p: &Point3<f64>) -> Option<usize> {
        let mut current = if self.alive.get(self.last).copied().unwrap_or(false) {
            self.last
        } else {
            self.alive.iter().position(|a| *a)?
        };
        'walk: for step in 0..MAX_WALK {
            for k in 0..4 {
                let slot = (k + step) % 4;
                if self.orient_replaced(current, slot, p) < 0.0 {
                    let next = self.adjacent[current][slot];
                    if next == NONE {
                        return None;
                    }
                    current = next;
                    continue 'walk;
                }
            }
            return Some(current);
        }
        (0..self.tets.len()).find(|&t| self.alive[t] && self.contains(t, p))
    }

    /// Insert `p`, returning its index among the inserted points
    pub fn insert(&mut self, p: Point3<f64>) -> Result<Insertion> {
        if !p.iter().all(|c| c.is_finite()) {
            return Err(Error::invalid("cannot triangulate a non-finite point"));
        }
        let start = self
            .locate(&p)
            .ok_or_else(|| Error::invalid(format!("point ({}, {}, {}) lies outside the triangulation", p.x, p.y, p.z)))?;
        for &v in &self.tets[start] {
            if v >= SUPER && (self.points[v] - p).norm() <= self.duplicate_tolerance {
                return Ok(Insertion::Duplicate(v - SUPER));
            }
        }

        let mut cavity = vec![start];
        let mut in_cavity: HashMap<usize, bool> = HashMap::from([(start, true)]);
        let mut queue = vec![start];
        while let Some(t) = queue.pop() {
            for &n in &self.adjacent[t] {
                if n == NONE || in_cavity.contains_key(&n) {
                    continue;
                }
                let inside = self.in_sphere(n, &p) > 0.0;
                in_cavity.insert(n, inside);
                if inside {
                    cavity.push(n);
                    queue.push(n);
                }
            }
        }

        // Grow the cavity until every boundary face sees `p` strictly in front
        let boundary = loop {
            let mut boundary = Vec::new();
            let mut grow = None;
            for &t in &cavity {
                for slot in 0..4 {
                    let n = self.adjacent[t][slot];
                    if n != NONE && in_cavity.get(&n).copied().unwrap_or(false) {
                        continue;
                    }
                    if self.orient_replaced(t, slot, &p) <= 0.0 {
                        grow = Some(n);
                        break;
                    }
                    boundary.push((t, slot, n));
                }
                if grow.is_some() {
                    break;
                }
            }
            match grow {
                None => break boundary,
                Some(NONE) => {
                    return Err(Error::invalid("point lies on the boundary of the super-tetrahedron"));
                }
                Some(n) => {
                    in_cavity.insert(n, true);
                    cavity.push(n);
                }
            }
        };

        // Face vertices and back pointers of outer neighbors, read before any
        // cavity slot is handed out again
        let faces: Vec<[usize; 4]> = boundary.iter().map(|&(t, _, _)| self.tets[t]).collect();
        let back: Vec<Option<(usize, usize)>> = boundary
            .iter()
            .map(|&(t, _, n)| {
                (n != NONE)
                    .then(|| self.adjacent[n].iter().position(|&x| x == t).map(|k| (n, k)))
                    .flatten()
            })
            .collect();

        let index = self.points.len();
        self.points.push(p);
        for &t in &cavity {
            self.alive[t] = false;
            self.free.push(t);
        }

        let mut created = Vec::with_capacity(boundary.len());
        let mut open_faces: HashMap<(usize, usize), (usize, usize)> = HashMap::new();
        for ((&(_, slot, n), back), &face) in boundary.iter().zip(&back).zip(&faces) {
            let mut verts = face;
            verts[slot] = index;
            let id = self.allocate(verts);
            self.adjacent[id][slot] = n;
            if let Some((outer, k)) = *back {
                self.adjacent[outer][k] = id;
            }
            created.push((id, verts, slot));
        }
        for &(id, verts, slot) in &created {
            for j in 0..4 {
                if j == slot {
                    continue;
                }
                let mut edge: Vec<usize> = (0..4).filter(|&k| k != j && k != slot).map(|k| verts[k]).collect();
                edge.sort_unstable();
                let key = (edge[0], edge[1]);
                match open_faces.remove(&key) {
                    Some((other, other_slot)) => {
                        self.adjacent[id][j] = other;
                        self.adjacent[other][other_slot] = id;
                    }
                    None => {
                        open_faces.insert(key, (id, j));
                    }
                }
            }
        }
        if !open_faces.is_empty() {
            return Err(Error::invalid("cavity retriangulation left unmatched faces"));
        }
        if let Some(&(id, _, _)) = created.first() {
            self.last = id;
        }
        Ok(Insertion::Inserted(index - SUPER))
    }

    fn allocate(&mut self, verts: [usize; 4]) -> usize {
        match self.free.pop() {
            Some(id) => {
                self.tets[id] = verts;
                self.adjacent[id] = [NONE; 4];
                self.alive[id] = true;
                id
            }
            None => {
                self.tets.push(verts);
                self.adjacent.push([NONE; 4]);
                self.alive.push(true);
                self.tets.len() - 1
            }
        }
    }

    /// Insert points in spatial (Morton) order; returns the index of each input point
    pub fn insert_all(&mut self, points: &[Point3<f64>]) -> Result<Vec<usize>> {
        let bounds = BoundingBox::from_points(points);
        let extent = bounds.size();
        let morton = |p: &Point3<f64>| {
            let quantize = |v: f64, lo: f64, span: f64| {
                if span > 0.0 {
                    (((v - lo) / span) * 1023.0).clamp(0.0, 1023.0) as u64
                } else {
                    0
                }
            };
            let (x, y, z) = (
                quantize(p.x, bounds.min.x, extent.x),
                quantize(p.y, bounds.min.y, extent.y),
                quantize(p.z, bounds.min.z, extent.z),
            );
            (0..10).fold(0u64, |code, bit| {
                code | ((x >> bit) & 1) << (3 * bit) | ((y >> bit) & 1) << (3 * bit + 1) | ((z >> bit) & 1) << (3 * bit + 2)
            })
        };
        let mut order: Vec<usize> = (0..points.len()).collect();
        order.sort_by_key(|&i| morton(&points[i]));

        let mut indices = vec![0; points.len()];
        let mut duplicates = 0;
        for i in order {
            let insertion = self.insert(points[i])?;
            if matches!(insertion, Insertion::Duplicate(_)) {
                duplicates += 1;
            }
            indices[i] = insertion.index();
        }
        if duplicates > 0 {
            debug!("delaunay: merged {} duplicate points", duplicates);
        }
        Ok(indices)
    }

    /// Tetrahedra not touching the super-tetrahedron, in storage order and
    /// with positive VTK volume
    pub fn tetrahedra(&self) -> Vec<[usize; 4]> {
        self.tets
            .iter()
            .zip(&self.alive)
            .filter(|(t, alive)| **alive && t.iter().all(|&v| v >= SUPER))
            .map(|(t, _)| [t[0] - SUPER, t[2] - SUPER, t[1] - SUPER, t[3] - SUPER])
            .collect()
    }

    /// Distance from `p` to the nearest inserted corner of the tetrahedron containing it
    pub fn nearest_corner(&self, p: &Point3<f64>) -> Option<f64> {
        let t = self.locate(p)?;
        self.tets[t]
            .iter()
            .filter(|&&v| v >= SUPER)
            .map(|&v| (self.points[v] - p).norm())
            .min_by(|a, b| a.total_cmp(b))
    }

    /// Tetrahedra enclosed by the faces for which `boundary` holds, oriented
    /// as [`Delaunay::tetrahedra`] returns them.
    ///
    /// Faces are given as sorted triples of inserted-point indices. A
    /// tetrahedron is enclosed when every path to the super-tetrahedron
    /// crosses an odd number of boundary faces.
    pub fn enclosed(&self, boundary: impl Fn(&[usize; 3]) -> bool) -> Vec<[usize; 4]> {
        let mut crossings: Vec<Option<usize>> = vec![None; self.tets.len()];
        let mut queue = VecDeque::new();
        for t in 0..self.tets.len() {
            if self.alive[t] && self.tets[t].iter().any(|&v| v < SUPER) {
                crossings[t] = Some(0);
                queue.push_back(t);
            }
        }
        // 0-1 breadth-first search: free faces cost nothing, boundary faces one crossing
        while let Some(t) = queue.pop_front() {
            let Some(depth) = crossings[t] else {
                continue;
            };
            for slot in 0..4 {
                let n = self.adjacent[t][slot];
                if n == NONE || !self.alive[n] {
                    continue;
                }
                let mut face: Vec<usize> = (0..4).filter(|&k| k != slot).map(|k| self.tets[t][k]).collect();
                face.sort_unstable();
                let blocked = face[0] >= SUPER && boundary(&[face[0] - SUPER, face[1] - SUPER, face[2] - SUPER]);
                let next = depth + usize::from(blocked);
                if crossings[n].map_or(true, |d| next < d) {
                    crossings[n] = Some(next);
                    if blocked {
                        queue.push_back(n);
                    } else {
                        queue.push_front(n);
                    }
                }
            }
        }
        (0..self.tets.len())
            .filter(|&t| self.alive[t] && crossings[t].map_or(false, |d| d % 2 == 1))
            .map(|t| {
                let v = self.tets[t];
                [v[0] - SUPER, v[2] - SUPER, v[1] - SUPER, v[3] - SUPER]
            })
            .collect()
    }

    /// Whether the stored orientation and adjacency are consistent
    pub fn is_consistent(&self) -> bool {
        (0..self.tets.len()).filter(|&t| self.alive[t]).all(|t| {
            let [a, b, c, d] = self.tets[t];
            if self.orient(a, b, c, &self.points[d]) <= 0.0 {
                return false;
            }
            (0..4).all(|slot| {
                let n = self.adjacent[t][slot];
                n == NONE || (self.alive[n] && self.adjacent[n].contains(&t))
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::tet_signed_volume;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn unit_bounds() -> BoundingBox {
        BoundingBox::new(Point3::new(0.0, 0.0, 0.0), Point3::new(1.0, 1.0, 1.0))
    }

    #[test]
    fn test_points_fill_their_hull() {
        let mut rng = StdRng::seed_from_u64(3);
        let mut points: Vec<Point3<f64>> = (0..8)
            .map(|i| Point3::new((i & 1) as f64, ((i >> 1) & 1) as f64, ((i >> 2) & 1) as f64))
            .collect();
        points.extend((0..100).map(|_| Point3::new(rng.gen::<f64>(), rng.gen::<f64>(), rng.gen::<f64>())));

        let mut dt = Delaunay::new(&unit_bounds(), 1e-12);
        dt.insert_all(&points).unwrap();
        assert!(dt.is_consistent());

        let p = dt.points();
        let volumes: Vec<f64> = dt
            .tetrahedra()
            .iter()
            .map(|t| tet_signed_volume(&p[t[0]], &p[t[1]], &p[t[2]], &p[t[3]]))
            .collect();
        assert!(volumes.iter().all(|&v| v >= 0.0));
        approx::assert_relative_eq!(volumes.iter().sum::<f64>(), 1.0, epsilon = 1e-6);
    }

    #[test]
    fn test_random_points_stay_delaunay() {
        let mut rng = StdRng::seed_from_u64(7);
        let points: Vec<Point3<f64>> = (0..300)
            .map(|_| Point3::new(rng.gen::<f64>(), rng.gen::<f64>(), rng.gen::<f64>()))
            .collect();
        let mut dt = Delaunay::new(&unit_bounds(), 1e-12);
        dt.insert_all(&points).unwrap();
        assert!(dt.is_consistent());
        assert_eq!(dt.point_count(), 300);

        // No inserted point lies strictly inside any circumsphere
        for t in (0..dt.tets.len()).filter(|&t| dt.alive[t]) {
            for p in dt.points().iter().step_by(7) {
                assert!(dt.in_sphere(t, p) <= 0.0);
            }
        }
    }

    #[test]
    fn test_lattice_points_stay_consistent() {
        // Grid corners plus cell centers: every cell is cospherical
        let mut points = Vec::new();
        for i in 0..=4 {
            for j in 0..=4 {
                for k in 0..=4 {
                    points.push(Point3::new(i as f64, j as f64, k as f64));
                    if i < 4 && j < 4 && k < 4 {
                        points.push(Point3::new(i as f64 + 0.5, j as f64 + 0.5, k as f64 + 0.5));
                    }
                }
            }
        }
        let bounds = BoundingBox::from_points(&points);
        let mut dt = Delaunay::new(&bounds, 1e-9);
        let indices = dt.insert_all(&points).unwrap();
        assert!(dt.is_consistent());
        assert_eq!(dt.point_count(), points.len());
        assert!(indices.iter().enumerate().all(|(i, &d)| dt.points()[d] == points[i]));

        let p = dt.points();
        let volume: f64 = dt
            .tetrahedra()
            .iter()
            .map(|t| tet_signed_volume(&p[t[0]], &p[t[1]], &p[t[2]], &p[t[3]]))
            .sum();
        approx::assert_relative_eq!(volume, 64.0, epsilon = 1e-9);
    }

    #[test]
    fn test_enclosed_by_boundary_faces() {
        let mut points: Vec<Point3<f64>> = (0..8)
            .map(|i| {
                let bit = |b: usize| if i & b != 0 { 2.0 } else { 0.0 };
                Point3::new(bit(1), bit(2), bit(4))
            })
            .collect();
        points.extend([
            Point3::new(1.0, 1.0, 1.0),
            Point3::new(1.1, 1.0, 1.0),
            Point3::new(1.0, 1.1, 1.0),
            Point3::new(1.0, 1.0, 1.1),
        ]);
        let mut dt = Delaunay::new(&BoundingBox::from_points(&points), 1e-9);
        let index = dt.insert_all(&points).unwrap();
        let small = [index[8], index[9], index[10], index[11]];
        let mut faces = Vec::new();
        for skip in 0..4 {
            let mut face: Vec<usize> = (0..4).filter(|&k| k != skip).map(|k| small[k]).collect();
            face.sort_unstable();
            faces.push([face[0], face[1], face[2]]);
        }

        let inside = dt.enclosed(|f| faces.contains(f));
        assert_eq!(inside.len(), 1);
        let mut corners = inside[0];
        corners.sort_unstable();
        let mut expected = small;
        expected.sort_unstable();
        assert_eq!(corners, expected);
        let p = inside[0].map(|v| dt.points()[v]);
        assert!(tet_signed_volume(&p[0], &p[1], &p[2], &p[3]) > 0.0);

        assert!(dt.enclosed(|_| false).is_empty());
        let near = dt.nearest_corner(&Point3::new(1.02, 1.02, 1.02)).unwrap();
        assert!(near < 0.1);
    }

    #[test]
    fn test_duplicates_are_merged() {
        let mut dt = Delaunay::new(&unit_bounds(), 1e-9);
        let a = dt.insert(Point3::new(0.2, 0.3, 0.4)).unwrap();
        let b = dt.insert(Point3::new(0.2, 0.3, 0.4)).unwrap();
        assert_eq!(a, Insertion::Inserted(0));
        assert_eq!(b, Insertion::Duplicate(0));
        assert!(dt.insert(Point3::new(f64::NAN, 0.0, 0.0)).is_err());
    }
}
