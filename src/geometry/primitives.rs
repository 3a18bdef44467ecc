// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! Analytic primitive descriptions and their tessellation
//!
//! Round primitives are profiles in the (radial, axial) half-plane revolved
//! about the axis of a [`Frame`]. Every profile segment carries the id of the
//! face it bounds so tessellations come out pre-labelled.

use super::SurfaceMesh;
use nalgebra::{Point2, Point3, Vector2, Vector3};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::f64::consts::PI;

/// Minimum and maximum angular resolution for tolerance-driven tessellation
const MIN_SEGMENTS: usize = 8;
const MAX_SEGMENTS: usize = 512;

/// Orthonormal placement with a per-axis scale (non-unit only for ellipsoids)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub origin: Point3<f64>,
    pub u: Vector3<f64>,
    pub v: Vector3<f64>,
    pub w: Vector3<f64>,
    pub scale: Vector3<f64>,
}

impl Frame {
    /// Right-handed frame whose `w` is `axis`. The first in-plane direction is
    /// built from the coordinate axis least aligned with `axis`, so frames of
    /// axis-aligned primitives have exactly axis-aligned vectors.
    pub fn from_axis(origin: Point3<f64>, axis: &Vector3<f64>) -> Self {
        let w = axis.normalize();
        let helper = if w.x.abs() <= w.y.abs() && w.x.abs() <= w.z.abs() {
            Vector3::x()
        } else if w.y.abs() <= w.z.abs() {
            Vector3::y()
        } else {
            Vector3::z()
        };
        let u = helper.cross(&w).normalize();
        let v = w.cross(&u);
        Self {
            origin,
            u,
            v,
            w,
            scale: Vector3::new(1.0, 1.0, 1.0),
        }
    }

    /// World-aligned frame, optionally scaled per axis
    pub fn world(origin: Point3<f64>, scale: Vector3<f64>) -> Self {
        Self {
            origin,
            u: Vector3::x(),
            v: Vector3::y(),
            w: Vector3::z(),
            scale,
        }
    }

    /// Map a revolved profile point (r, z) at angle phi to world space
    pub fn revolve(&self, r: f64, z: f64, phi: f64) -> Point3<f64> {
        let (s, c) = phi.sin_cos();
        let local = Vector3::new(r * c * self.scale.x, r * s * self.scale.y, z * self.scale.z);
        self.origin + self.u * local.x + self.v * local.y + self.w * local.z
    }

    pub fn to_world(&self, local: &Vector3<f64>) -> Point3<f64> {
        self.origin
            + self.u * (local.x * self.scale.x)
            + self.v * (local.y * self.scale.y)
            + self.w * (local.z * self.scale.z)
    }

    pub fn max_scale(&self) -> f64 {
        self.scale.x.max(self.scale.y).max(self.scale.z)
    }
}

/// A profile segment in the (radial, axial) half-plane
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ProfileSegment {
    Line {
        from: Point2<f64>,
        to: Point2<f64>,
        face: i32,
    },
    Arc {
        center: Point2<f64>,
        radius: f64,
        start_angle: f64,
        sweep: f64,
        face: i32,
    },
}

impl ProfileSegment {
    pub fn face(&self) -> i32 {
        match self {
            ProfileSegment::Line { face, .. } | ProfileSegment::Arc { face, .. } => *face,
        }
    }

    pub fn start(&self) -> Point2<f64> {
        match self {
            ProfileSegment::Line { from, .. } => *from,
            ProfileSegment::Arc {
                center,
                radius,
                start_angle,
                ..
            } => center + Vector2::new(start_angle.cos(), start_angle.sin()) * *radius,
        }
    }

    pub fn end(&self) -> Point2<f64> {
        match self {
            ProfileSegment::Line { to, .. } => *to,
            ProfileSegment::Arc {
                center,
                radius,
                start_angle,
                sweep,
                ..
            } => {
                let a = start_angle + sweep;
                center + Vector2::new(a.cos(), a.sin()) * *radius
            }
        }
    }

    /// Sample points from start to end inclusive, `n` intervals
    fn sample(&self, n: usize) -> Vec<Point2<f64>> {
        match self {
            ProfileSegment::Line { from, to, .. } => (0..=n)
                .map(|i| from + (to - from) * (i as f64 / n as f64))
                .collect(),
            ProfileSegment::Arc {
                center,
                radius,
                start_angle,
                sweep,
                ..
            } => (0..=n)
                .map(|i| {
                    let a = start_angle + sweep * (i as f64 / n as f64);
                    center + Vector2::new(a.cos(), a.sin()) * *radius
                })
                .collect(),
        }
    }
}

/// Closed-by-revolution profile running from the axis back to the axis
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RevolvedProfile {
    pub segments: Vec<ProfileSegment>,
}

impl RevolvedProfile {
    /// Right cylinder centered at the frame origin: 1 wall, 2 top cap, 3 bottom cap
    pub fn cylinder(radius: f64, length: f64) -> Self {
        let h = length / 2.0;
        Self {
            segments: vec![
                ProfileSegment::Line {
                    from: Point2::new(0.0, -h),
                    to: Point2::new(radius, -h),
                    face: 3,
                },
                ProfileSegment::Line {
                    from: Point2::new(radius, -h),
                    to: Point2::new(radius, h),
                    face: 1,
                },
                ProfileSegment::Line {
                    from: Point2::new(radius, h),
                    to: Point2::new(0.0, h),
                    face: 2,
                },
            ],
        }
    }

    /// Sphere as a single half-circle arc from the south to the north pole
    pub fn sphere(radius: f64) -> Self {
        Self {
            segments: vec![ProfileSegment::Arc {
                center: Point2::origin(),
                radius,
                start_angle: -PI / 2.0,
                sweep: PI,
                face: 1,
            }],
        }
    }

    pub fn face_ids(&self) -> Vec<i32> {
        let mut ids: Vec<i32> = self.segments.iter().map(|s| s.face()).collect();
        ids.sort_unstable();
        ids.dedup();
        ids
    }

    pub fn max_radius(&self) -> f64 {
        self.segments
            .iter()
            .flat_map(|s| s.sample(8))
            .map(|p| p.x.abs())
            .fold(0.0, f64::max)
    }

    /// Round the corner between two adjacent line segments with an arc.
    ///
    /// Returns `None` when the faces are not adjacent lines or the radius
    /// does not fit on both segments.
    pub fn blend_corner(&self, face_a: i32, face_b: i32, radius: f64, new_face: i32) -> Option<Self> {
        let n = self.segments.len();
        let index = (0..n.saturating_sub(1)).find(|&i| {
            let (p, q) = (self.segments[i].face(), self.segments[i + 1].face());
            (p == face_a && q == face_b) || (p == face_b && q == face_a)
        })?;

        let (from1, corner, to2) = match (&self.segments[index], &self.segments[index + 1]) {
            (ProfileSegment::Line { from, to, .. }, ProfileSegment::Line { from: f2, to: t2, .. })
                if (to - f2).norm() < 1e-12 =>
            {
                (*from, *to, *t2)
            }
            _ => return None,
        };

        let len1 = (corner - from1).norm();
        let len2 = (to2 - corner).norm();
        let d1 = (corner - from1) / len1;
        let d2 = (to2 - corner) / len2;
        let turn = d1.x * d2.y - d1.y * d2.x;
        if turn.abs() < 1e-12 {
            return None;
        }
        let interior = (-d1).dot(&d2).clamp(-1.0, 1.0).acos();
        let tangent = radius / (interior / 2.0).tan();
        if tangent >= len1 || tangent >= len2 {
            return None;
        }

        let t1 = corner - d1 * tangent;
        let t2 = corner + d2 * tangent;
        let left = Vector2::new(-d1.y, d1.x);
        let center = t1 + left * radius * turn.signum();
        let start_angle = (t1.y - center.y).atan2(t1.x - center.x);
        let sweep = turn.signum() * (PI - interior);

        let mut segments = self.segments.clone();
        if let ProfileSegment::Line { to, .. } = &mut segments[index] {
            *to = t1;
        }
        if let ProfileSegment::Line { from, .. } = &mut segments[index + 1] {
            *from = t2;
        }
        segments.insert(
            index + 1,
            ProfileSegment::Arc {
                center,
                radius,
                start_angle,
                sweep,
                face: new_face,
            },
        );
        Some(Self { segments })
    }
}

/// Angular segment count needed to keep chord deviation under `tolerance`
pub fn segments_for_tolerance(radius: f64, tolerance: f64, sweep: f64) -> usize {
    if radius <= 0.0 || tolerance <= 0.0 {
        return MIN_SEGMENTS;
    }
    let ratio = (1.0 - tolerance / radius).clamp(-1.0, 1.0);
    let step = 2.0 * ratio.acos();
    if step <= 0.0 {
        return MAX_SEGMENTS;
    }
    ((sweep.abs() / step).ceil() as usize).clamp(MIN_SEGMENTS, MAX_SEGMENTS)
}

/// Tessellation density for a revolved profile
#[derive(Debug, Clone, Copy)]
pub enum Resolution {
    /// Fixed angular segment count around the axis
    Fixed(usize),
    /// Maximum chord deviation
    Tolerance(f64),
}

/// Tessellate a revolved profile into a closed, outward-oriented surface
/// whose `ModelFaceID` array holds the segment face ids. Triangles are
/// grouped by ascending face id.
pub fn tessellate_revolved(profile: &RevolvedProfile, frame: &Frame, resolution: Resolution) -> SurfaceMesh {
    let max_radius = profile.max_radius() * frame.max_scale();
    let angular = match resolution {
        Resolution::Fixed(n) => n.max(3),
        Resolution::Tolerance(tol) => segments_for_tolerance(max_radius, tol, 2.0 * PI),
    };

    // Profile polyline with the face id of each interval
    let mut polyline: Vec<Point2<f64>> = Vec::new();
    let mut interval_faces: Vec<i32> = Vec::new();
    for segment in &profile.segments {
        let n = match segment {
            ProfileSegment::Line { .. } => 1,
            ProfileSegment::Arc { radius, sweep, .. } => match resolution {
                Resolution::Fixed(_) => ((angular as f64 * sweep.abs() / (2.0 * PI)).ceil() as usize).max(2),
                Resolution::Tolerance(tol) => {
                    segments_for_tolerance(radius * frame.max_scale(), tol, *sweep).max(2)
                }
            },
        };
        let samples = segment.sample(n);
        if polyline.is_empty() {
            polyline.push(samples[0]);
        }
        for p in samples.into_iter().skip(1) {
            polyline.push(p);
            interval_faces.push(segment.face());
        }
    }

    let pole_tolerance = 1e-12 * max_radius.max(1.0);
    let mut mesh = SurfaceMesh::new();
    let mut rings: Vec<Vec<usize>> = Vec::with_capacity(polyline.len());
    for p in &polyline {
        if p.x.abs() <= pole_tolerance {
            rings.push(vec![mesh.points.len()]);
            mesh.points.push(frame.revolve(0.0, p.y, 0.0));
        } else {
            let ring = (0..angular)
                .map(|j| {
                    mesh.points.push(frame.revolve(p.x, p.y, 2.0 * PI * j as f64 / angular as f64));
                    mesh.points.len() - 1
                })
                .collect();
            rings.push(ring);
        }
    }

    let mut by_face: BTreeMap<i32, Vec<[usize; 3]>> = BTreeMap::new();
    for (i, &face) in interval_faces.iter().enumerate() {
        let (a, b) = (&rings[i], &rings[i + 1]);
        let bucket = by_face.entry(face).or_default();
        match (a.len(), b.len()) {
            (1, 1) => {}
            (1, _) => {
                for j in 0..angular {
                    bucket.push([a[0], b[(j + 1) % angular], b[j]]);
                }
            }
            (_, 1) => {
                for j in 0..angular {
                    bucket.push([a[j], a[(j + 1) % angular], b[0]]);
                }
            }
            _ => {
                for j in 0..angular {
                    let k = (j + 1) % angular;
                    bucket.push([a[j], a[k], b[k]]);
                    bucket.push([a[j], b[k], b[j]]);
                }
            }
        }
    }

    let mut ids = Vec::new();
    for (face, tris) in by_face {
        ids.extend(std::iter::repeat(face).take(tris.len()));
        mesh.triangles.extend(tris);
    }
    mesh.set_face_ids(ids);
    mesh
}

/// Axis-aligned box surface with faces ordered -x, +x, -y, +y, -z, +z (ids 1..6)
pub fn box_surface(center: Point3<f64>, half_extents: Vector3<f64>) -> SurfaceMesh {
    let h = half_extents;
    let corner = |i: usize| {
        Point3::new(
            center.x + if i & 1 == 1 { h.x } else { -h.x },
            center.y + if i & 2 == 2 { h.y } else { -h.y },
            center.z + if i & 4 == 4 { h.z } else { -h.z },
        )
    };
    let points: Vec<Point3<f64>> = (0..8).map(corner).collect();

    // Quads wound counter-clockwise seen from outside
    let quads: [[usize; 4]; 6] = [
        [0, 4, 6, 2],
        [1, 3, 7, 5],
        [0, 1, 5, 4],
        [2, 6, 7, 3],
        [0, 2, 3, 1],
        [4, 5, 7, 6],
    ];
    let mut triangles = Vec::with_capacity(12);
    let mut ids = Vec::with_capacity(12);
    for (face, q) in quads.iter().enumerate() {
        triangles.push([q[0], q[1], q[2]]);
        triangles.push([q[0], q[2], q[3]]);
        ids.extend([face as i32 + 1; 2]);
    }

    let mut mesh = SurfaceMesh::from_parts(points, triangles);
    mesh.set_face_ids(ids);
    mesh
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::mesh_utils::validate_mesh;
    use approx::assert_relative_eq;

    #[test]
    fn test_cylinder_tessellation_is_closed() {
        let frame = Frame::from_axis(Point3::origin(), &Vector3::z());
        let mesh = tessellate_revolved(&RevolvedProfile::cylinder(1.0, 4.0), &frame, Resolution::Fixed(36));
        let report = validate_mesh(&mesh);
        assert!(report.is_valid_shell(), "{:?}", report);
        assert_eq!(mesh.face_id_set().into_iter().collect::<Vec<_>>(), vec![1, 2, 3]);
        assert!(mesh.signed_volume() > 0.0);

        let bbox = mesh.bounding_box();
        assert_relative_eq!(bbox.min.z, -2.0, epsilon = 1e-12);
        assert_relative_eq!(bbox.max.z, 2.0, epsilon = 1e-12);
    }

    #[test]
    fn test_sphere_volume_converges() {
        let frame = Frame::world(Point3::origin(), Vector3::new(1.0, 1.0, 1.0));
        let mesh = tessellate_revolved(&RevolvedProfile::sphere(2.0), &frame, Resolution::Tolerance(1e-3));
        let expected = 4.0 / 3.0 * PI * 8.0;
        assert!((mesh.signed_volume() - expected).abs() / expected < 5e-3);
        assert!(validate_mesh(&mesh).is_valid_shell());
    }

    #[test]
    fn test_box_surface() {
        let mesh = box_surface(Point3::new(1.0, 0.0, 0.0), Vector3::new(1.0, 2.0, 3.0));
        assert_relative_eq!(mesh.signed_volume(), 48.0, epsilon = 1e-12);
        assert_relative_eq!(mesh.area(), 2.0 * (8.0 + 24.0 + 12.0), epsilon = 1e-12);
        assert!(validate_mesh(&mesh).is_valid_shell());
        // First face is -x
        assert_eq!(mesh.triangle_normal(0), Vector3::new(-1.0, 0.0, 0.0));
    }

    #[test]
    fn test_blend_corner() {
        let profile = RevolvedProfile::cylinder(1.0, 4.0);
        let blended = profile.blend_corner(1, 2, 0.2, 4).unwrap();
        assert_eq!(blended.segments.len(), 4);
        assert_eq!(blended.face_ids(), vec![1, 2, 3, 4]);
        for pair in blended.segments.windows(2) {
            assert!((pair[0].end() - pair[1].start()).norm() < 1e-12);
        }
        assert!(profile.blend_corner(1, 2, 5.0, 4).is_none());
        assert!(profile.blend_corner(2, 3, 0.1, 4).is_none());
    }

    #[test]
    fn test_tolerance_segments() {
        assert_eq!(segments_for_tolerance(1.0, 10.0, 2.0 * PI), MIN_SEGMENTS);
        let n = segments_for_tolerance(1.0, 1e-4, 2.0 * PI);
        assert!(n > 100 && n <= MAX_SEGMENTS);
    }
}
