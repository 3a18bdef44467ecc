// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! Region-constrained surface smoothing
//!
//! A marker array selects the vertices that may move. A marked vertex moves
//! toward the centroid of its marked neighbors; a marked vertex without
//! marked neighbors and every unmarked vertex come out bit-identical. With
//! `max_solves == 0` each iteration is an explicit Laplacian step, otherwise
//! it is an implicit step solved by at most `max_solves` conjugate-gradient
//! iterations.

use crate::error::{Error, Result};
use crate::geometry::mesh_utils::{vertex_neighbors, vertex_triangles};
use crate::geometry::{Association, DataArray, SurfaceMesh};
use nalgebra::{Point3, Vector3};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, info};

/// How a marker moves between point and cell association
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConversionRule {
    /// Marked when any incident element is marked
    AnyTouching,
    /// Marked when more than half of the incident elements are marked
    Majority,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SmoothParams {
    pub iterations: usize,
    /// Fraction of the way toward the neighbor centroid, in (0, 1]
    pub relaxation: f64,
    /// Conjugate-gradient iterations per step; 0 selects explicit steps
    pub max_solves: usize,
}

impl Default for SmoothParams {
    fn default() -> Self {
        Self {
            iterations: 10,
            relaxation: 0.5,
            max_solves: 0,
        }
    }
}

/// 0/1 marker of the points (or triangle centroids) inside a sphere
pub fn mark_region(
    mesh: &SurfaceMesh,
    center: &Point3<f64>,
    radius: f64,
    name: &str,
    association: Association,
) -> Result<DataArray> {
    if !(radius.is_finite() && radius >= 0.0) {
        return Err(Error::invalid(format!("region radius {} is not valid", radius)));
    }
    if !center.iter().all(|c| c.is_finite()) {
        return Err(Error::invalid("region center has non-finite coordinates"));
    }
    let inside = |p: &Point3<f64>| i32::from((p - center).norm() <= radius);
    let values: Vec<i32> = match association {
        Association::Point => mesh.points.iter().map(inside).collect(),
        Association::Cell => (0..mesh.triangle_count())
            .map(|t| inside(&mesh.triangle_centroid(t)))
            .collect(),
    };
    debug!(
        "marked {} of {} {:?} elements",
        values.iter().filter(|&&v| v != 0).count(),
        values.len(),
        association
    );
    Ok(DataArray::scalars_i32(name, values))
}

fn marker_values(array: &DataArray, expected: usize) -> Result<Vec<bool>> {
    if array.components != 1 || array.len() != expected {
        return Err(Error::invalid(format!(
            "marker '{}' has {} tuples of {} components, expected {} scalars",
            array.name,
            array.len() / array.components.max(1),
            array.components,
            expected
        )));
    }
    Ok((0..expected).map(|i| array.value(i, 0) != 0.0).collect())
}

/// Derive the marker of the other association from `array`, which is
/// associated with `from`
pub fn convert_marker(
    mesh: &SurfaceMesh,
    array: &DataArray,
    from: Association,
    rule: ConversionRule,
    name: &str,
) -> Result<DataArray> {
    let decide = |marked: usize, total: usize| match rule {
        ConversionRule::AnyTouching => marked > 0,
        ConversionRule::Majority => 2 * marked > total,
    };
    let values: Vec<i32> = match from {
        Association::Cell => {
            let marked = marker_values(array, mesh.triangle_count())?;
            vertex_triangles(mesh.point_count(), &mesh.triangles)
                .iter()
                .map(|tris| {
                    let count = tris.iter().filter(|&&t| marked[t]).count();
                    i32::from(decide(count, tris.len()))
                })
                .collect()
        }
        Association::Point => {
            let marked = marker_values(array, mesh.point_count())?;
            mesh.triangles
                .iter()
                .map(|tri| {
                    let count = tri.iter().filter(|&&v| marked[v]).count();
                    i32::from(decide(count, 3))
                })
                .collect()
        }
    };
    Ok(DataArray::scalars_i32(name, values))
}

/// Vertices allowed to move: marked by the point array (when given) and
/// touching a marked triangle (when a cell array is given)
fn movable(mesh: &SurfaceMesh, point_array: Option<&str>, cell_array: Option<&str>) -> Result<Vec<bool>> {
    if point_array.is_none() && cell_array.is_none() {
        return Err(Error::invalid("smoothing needs a point or cell marker array"));
    }
    let mut movable = vec![true; mesh.point_count()];
    if let Some(name) = point_array {
        let array = mesh
            .point_array(name)
            .ok_or_else(|| Error::MissingArray(name.to_string()))?;
        for (m, marked) in movable.iter_mut().zip(marker_values(array, mesh.point_count())?) {
            *m &= marked;
        }
    }
    if let Some(name) = cell_array {
        let array = mesh
            .cell_array(name)
            .ok_or_else(|| Error::MissingArray(name.to_string()))?;
        let marked = marker_values(array, mesh.triangle_count())?;
        let mut touched = vec![false; mesh.point_count()];
        for (t, tri) in mesh.triangles.iter().enumerate() {
            if marked[t] {
                for &v in tri {
                    touched[v] = true;
                }
            }
        }
        for (m, t) in movable.iter_mut().zip(touched) {
            *m &= t;
        }
    }
    Ok(movable)
}

/// Smooth the marked region of `mesh`
pub fn smooth(
    mesh: &SurfaceMesh,
    params: &SmoothParams,
    point_array: Option<&str>,
    cell_array: Option<&str>,
) -> Result<SurfaceMesh> {
    if !(params.relaxation > 0.0 && params.relaxation <= 1.0) {
        return Err(Error::invalid(format!(
            "relaxation factor {} is outside (0, 1]",
            params.relaxation
        )));
    }
    let movable = movable(mesh, point_array, cell_array)?;
    let mut out = mesh.clone();
    if params.iterations == 0 {
        return Ok(out);
    }

    let neighbors: Vec<Vec<usize>> = vertex_neighbors(mesh.point_count(), &mesh.triangles)
        .into_iter()
        .map(|around| around.into_iter().filter(|&u| movable[u]).collect())
        .collect();
    let incident = vertex_triangles(mesh.point_count(), &mesh.triangles);
    let free: Vec<usize> = (0..mesh.point_count())
        .filter(|&v| movable[v] && !neighbors[v].is_empty())
        .collect();

    let mut reverted = 0;
    for iteration in 0..params.iterations {
        let proposed = if params.max_solves == 0 {
            explicit_step(&out.points, &neighbors, &free, params.relaxation)
        } else {
            implicit_step(&out.points, &neighbors, &free, params)
        };
        reverted += apply_untangled(&mut out, &incident, &free, &proposed);
        debug!("smoothing iteration {}: {} vertices", iteration, free.len());
    }
    info!(
        "smoothed {} vertices over {} iterations ({} moves rejected)",
        free.len(),
        params.iterations,
        reverted
    );
    Ok(out)
}

fn centroid(points: &[Point3<f64>], around: &[usize]) -> Point3<f64> {
    let sum: Vector3<f64> = around.iter().map(|&u| points[u].coords).sum();
    Point3::from(sum / around.len() as f64)
}

fn explicit_step(points: &[Point3<f64>], neighbors: &[Vec<usize>], free: &[usize], relaxation: f64) -> Vec<Point3<f64>> {
    free.iter()
        .map(|&v| {
            let c = centroid(points, &neighbors[v]);
            points[v] + (c - points[v]) * relaxation
        })
        .collect()
}

/// Backward Euler step `(1 + r) x_i - r mean(x_j) = x_i^old` over marked
/// neighbors, scaled by their count so the system is symmetric positive
/// definite.
fn implicit_step(
    points: &[Point3<f64>],
    neighbors: &[Vec<usize>],
    free: &[usize],
    params: &SmoothParams,
) -> Vec<Point3<f64>> {
    let r = params.relaxation;
    let mut slot = vec![usize::MAX; points.len()];
    for (i, &v) in free.iter().enumerate() {
        slot[v] = i;
    }
    let diagonal: Vec<f64> = free.iter().map(|&v| neighbors[v].len() as f64 * (1.0 + r)).collect();
    let apply = |x: &[f64]| -> Vec<f64> {
        free.iter()
            .enumerate()
            .map(|(i, &v)| {
                let coupled: f64 = neighbors[v]
                    .iter()
                    .filter(|&&u| slot[u] != usize::MAX)
                    .map(|&u| x[slot[u]])
                    .sum();
                diagonal[i] * x[i] - r * coupled
            })
            .collect()
    };

    let mut solved = vec![Vector3::zeros(); free.len()];
    for axis in 0..3 {
        let rhs: Vec<f64> = free
            .iter()
            .map(|&v| neighbors[v].len() as f64 * points[v][axis])
            .collect();
        let start: Vec<f64> = free.iter().map(|&v| points[v][axis]).collect();
        let x = conjugate_gradient(&apply, &rhs, start, params.max_solves);
        for (s, value) in solved.iter_mut().zip(x) {
            s[axis] = value;
        }
    }
    solved.into_iter().map(Point3::from).collect()
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

fn conjugate_gradient(apply: &dyn Fn(&[f64]) -> Vec<f64>, rhs: &[f64], mut x: Vec<f64>, max_iterations: usize) -> Vec<f64> {
    let ax = apply(&x);
    let mut residual: Vec<f64> = rhs.iter().zip(&ax).map(|(b, a)| b - a).collect();
    let mut direction = residual.clone();
    let mut rr = dot(&residual, &residual);
    let tolerance = 1e-24 * dot(rhs, rhs).max(f64::MIN_POSITIVE);
    for _ in 0..max_iterations {
        if rr <= tolerance {
            break;
        }
        let ad = apply(&direction);
        let denom = dot(&direction, &ad);
        if denom <= 0.0 {
            break;
        }
        let alpha = rr / denom;
        for (xi, di) in x.iter_mut().zip(&direction) {
            *xi += alpha * di;
        }
        for (ri, adi) in residual.iter_mut().zip(&ad) {
            *ri -= alpha * adi;
        }
        let next = dot(&residual, &residual);
        let beta = next / rr;
        rr = next;
        for (di, ri) in direction.iter_mut().zip(&residual) {
            *di = ri + beta * *di;
        }
    }
    x
}

/// Move free vertices to `proposed`, then put back every free vertex of a
/// triangle the move would flip or collapse. Returns the number put back.
fn apply_untangled(mesh: &mut SurfaceMesh, incident: &[Vec<usize>], free: &[usize], proposed: &[Point3<f64>]) -> usize {
    let scale = mesh.bounding_box().diagonal().max(f64::MIN_POSITIVE);
    let min_cross = 1e-12 * scale * scale;
    let before: BTreeMap<usize, Vector3<f64>> = free
        .iter()
        .flat_map(|&v| incident[v].iter().copied())
        .map(|t| (t, mesh.triangle_cross(t)))
        .collect();
    let index: HashMap<usize, usize> = free.iter().enumerate().map(|(i, &v)| (v, i)).collect();
    let old: Vec<Point3<f64>> = free.iter().map(|&v| mesh.points[v]).collect();
    for (&v, p) in free.iter().zip(proposed) {
        mesh.points[v] = *p;
    }

    let mut restored = vec![false; free.len()];
    loop {
        let mut changed = false;
        for (&t, previous) in &before {
            let n = mesh.triangle_cross(t);
            if n.dot(previous) > 0.0 && n.norm() > min_cross {
                continue;
            }
            let tri = mesh.triangles[t];
            for v in tri {
                if let Some(&i) = index.get(&v) {
                    if !restored[i] {
                        mesh.points[v] = old[i];
                        restored[i] = true;
                        changed = true;
                    }
                }
            }
        }
        if !changed {
            break;
        }
    }
    restored.iter().filter(|&&r| r).count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::primitives::{tessellate_revolved, Frame, Resolution, RevolvedProfile};

    fn sphere() -> SurfaceMesh {
        tessellate_revolved(
            &RevolvedProfile::sphere(1.0),
            &Frame::world(Point3::origin(), Vector3::new(1.0, 1.0, 1.0)),
            Resolution::Fixed(24),
        )
    }

    fn marked_sphere(radius: f64) -> SurfaceMesh {
        let mut mesh = sphere();
        let marker = mark_region(&mesh, &Point3::new(0.0, 0.0, 1.0), radius, "Marker", Association::Point).unwrap();
        mesh.set_array(Association::Point, marker);
        mesh
    }

    #[test]
    fn test_mark_region_is_monotone() {
        let mesh = sphere();
        let center = Point3::new(1.0, 0.0, 0.0);
        let small = mark_region(&mesh, &center, 0.5, "m", Association::Point).unwrap();
        let large = mark_region(&mesh, &center, 1.0, "m", Association::Point).unwrap();
        assert_eq!(small, mark_region(&mesh, &center, 0.5, "m", Association::Point).unwrap());

        let (s, l) = (small.as_i32().unwrap(), large.as_i32().unwrap());
        assert!(s.iter().zip(l).all(|(a, b)| a <= b));
        assert!(s.iter().sum::<i32>() > 0);
        assert!(l.iter().sum::<i32>() > s.iter().sum::<i32>());
        assert!(mark_region(&mesh, &center, -1.0, "m", Association::Point).is_err());
    }

    #[test]
    fn test_marker_conversion_rules() {
        let mesh = sphere();
        let cells = mark_region(&mesh, &Point3::new(0.0, 0.0, 1.0), 0.6, "c", Association::Cell).unwrap();
        let any = convert_marker(&mesh, &cells, Association::Cell, ConversionRule::AnyTouching, "p").unwrap();
        let majority = convert_marker(&mesh, &cells, Association::Cell, ConversionRule::Majority, "p").unwrap();
        let (a, m) = (any.as_i32().unwrap(), majority.as_i32().unwrap());
        assert_eq!(a.len(), mesh.point_count());
        assert!(m.iter().zip(a).all(|(m, a)| m <= a));
        assert!(m.iter().sum::<i32>() > 0);

        let back = convert_marker(&mesh, &any, Association::Point, ConversionRule::AnyTouching, "c2").unwrap();
        assert_eq!(back.len(), mesh.triangle_count());
        assert!(convert_marker(&mesh, &cells, Association::Point, ConversionRule::Majority, "x").is_err());
    }

    #[test]
    fn test_zero_iterations_is_identity() {
        let mesh = marked_sphere(0.8);
        let params = SmoothParams {
            iterations: 0,
            ..SmoothParams::default()
        };
        assert_eq!(smooth(&mesh, &params, Some("Marker"), None).unwrap(), mesh);
    }

    #[test]
    fn test_unmarked_vertices_are_fixed() {
        let mesh = marked_sphere(0.8);
        let marker = mesh.point_array("Marker").unwrap().as_i32().unwrap().to_vec();
        for max_solves in [0, 20] {
            let params = SmoothParams {
                iterations: 5,
                relaxation: 0.5,
                max_solves,
            };
            let out = smooth(&mesh, &params, Some("Marker"), None).unwrap();
            let mut moved = 0;
            for (v, (a, b)) in mesh.points.iter().zip(&out.points).enumerate() {
                if marker[v] == 0 {
                    assert_eq!(a, b);
                } else if a != b {
                    moved += 1;
                }
            }
            assert!(moved > 0);
            assert_eq!(out.triangles, mesh.triangles);
        }
    }

    /// Hexagonal fan around a raised center, with `marked` vertices movable
    fn fan(marked: &[usize]) -> SurfaceMesh {
        let mut points = vec![Point3::new(0.0, 0.0, 0.1)];
        for k in 0..6 {
            let angle = std::f64::consts::FRAC_PI_3 * k as f64;
            points.push(Point3::new(angle.cos(), angle.sin(), 0.0));
        }
        let triangles = (1..=6).map(|k| [0, k, k % 6 + 1]).collect();
        let mut mesh = SurfaceMesh::from_parts(points, triangles);
        let marker = (0..7).map(|v| i32::from(marked.contains(&v))).collect();
        mesh.set_array(Association::Point, DataArray::scalars_i32("Marker", marker));
        mesh
    }

    fn assert_near(actual: &Point3<f64>, expected: [f64; 3]) {
        assert!(
            (actual - Point3::from(expected)).norm() < 1e-12,
            "{:?} != {:?}",
            actual,
            expected
        );
    }

    #[test]
    fn test_explicit_step_uses_marked_neighbors() {
        let mesh = fan(&[0, 1, 2]);
        let params = SmoothParams {
            iterations: 1,
            relaxation: 0.5,
            max_solves: 0,
        };
        let out = smooth(&mesh, &params, Some("Marker"), None).unwrap();
        let h = 3f64.sqrt() / 2.0;
        assert_near(&out.points[0], [0.375, h / 4.0, 0.05]);
        assert_near(&out.points[1], [0.625, h / 4.0, 0.025]);
        assert_near(&out.points[2], [0.5, h / 2.0, 0.025]);
        assert_eq!(&out.points[3..], &mesh.points[3..]);

        // A marked vertex with no marked neighbor stays put
        let lone = fan(&[0]);
        assert_eq!(smooth(&lone, &params, Some("Marker"), None).unwrap(), lone);
    }

    #[test]
    fn test_implicit_step_uses_marked_neighbors() {
        let mesh = fan(&[0, 1]);
        let params = SmoothParams {
            iterations: 1,
            relaxation: 0.5,
            max_solves: 20,
        };
        let out = smooth(&mesh, &params, Some("Marker"), None).unwrap();
        // 1.5 x0 - 0.5 x1 = x0_old and 1.5 x1 - 0.5 x0 = x1_old
        assert_near(&out.points[0], [0.25, 0.0, 0.075]);
        assert_near(&out.points[1], [0.75, 0.0, 0.025]);
        assert_eq!(&out.points[2..], &mesh.points[2..]);
    }

    #[test]
    fn test_missing_marker() {
        let mesh = sphere();
        assert!(matches!(
            smooth(&mesh, &SmoothParams::default(), Some("Nope"), None),
            Err(Error::MissingArray(_))
        ));
        assert!(smooth(&mesh, &SmoothParams::default(), None, None).is_err());
    }
}
