// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! Point queries against a triangulated surface
//!
//! A thin layer over a parry3d `TriMesh` (QBVH-accelerated) that answers in
//! the f64 coordinates and triangle numbering of a [`SurfaceMesh`].
//! Inside/outside classification uses the angle-weighted pseudo-normals
//! parry computes for oriented meshes.

use super::{BoundingBox, SurfaceMesh};
use nalgebra::Point3;
use parry3d::query::{PointQuery, PointQueryWithLocation};
use parry3d::shape::{TriMesh, TriMeshFlags};

fn to_f32(p: &Point3<f64>) -> Point3<f32> {
    Point3::new(p.x as f32, p.y as f32, p.z as f32)
}

fn to_f64(p: &Point3<f32>) -> Point3<f64> {
    Point3::new(f64::from(p.x), f64::from(p.y), f64::from(p.z))
}

/// Closest-point, distance and containment queries against a surface
pub struct SurfaceLocator<'a> {
    mesh: &'a SurfaceMesh,
    /// `None` when there are no triangles to query
    shape: Option<TriMesh>,
    /// Triangle of `mesh` behind each triangle of `shape`
    triangles: Vec<usize>,
    bbox: BoundingBox,
}

impl<'a> SurfaceLocator<'a> {
    /// Locator over every triangle of `mesh`
    pub fn new(mesh: &'a SurfaceMesh) -> Self {
        Self::over(mesh, (0..mesh.triangles.len()).collect())
    }

    /// Locator over a subset of the triangles of `mesh`, e.g. one model face
    pub fn subset(mesh: &'a SurfaceMesh, triangles: impl IntoIterator<Item = usize>) -> Self {
        Self::over(mesh, triangles.into_iter().collect())
    }

    fn over(mesh: &'a SurfaceMesh, triangles: Vec<usize>) -> Self {
        let shape = (!triangles.is_empty()).then(|| {
            let vertices = mesh.points.iter().map(to_f32).collect();
            let indices = triangles
                .iter()
                .map(|&t| mesh.triangles[t].map(|v| v as u32))
                .collect();
            TriMesh::with_flags(vertices, indices, TriMeshFlags::ORIENTED)
        });
        let bbox = BoundingBox::from_points(
            triangles
                .iter()
                .flat_map(move |&t| mesh.triangles[t].iter().map(move |&v| &mesh.points[v])),
        );
        Self {
            mesh,
            shape,
            triangles,
            bbox,
        }
    }

    pub fn mesh(&self) -> &SurfaceMesh {
        self.mesh
    }

    /// Nearest triangle and the closest point on it
    pub fn closest(&self, point: &Point3<f64>) -> Option<(usize, Point3<f64>)> {
        let shape = self.shape.as_ref()?;
        let (projection, (part, _)) = shape.project_local_point_and_get_location(&to_f32(point), false);
        Some((self.triangles[part as usize], to_f64(&projection.point)))
    }

    /// Closest point on the surface, or `point` itself when there is no surface
    pub fn project(&self, point: &Point3<f64>) -> Point3<f64> {
        self.closest(point).map_or(*point, |(_, q)| q)
    }

    /// Unsigned distance from `point` to the surface
    pub fn distance(&self, point: &Point3<f64>) -> f64 {
        self.closest(point).map_or(f64::INFINITY, |(_, q)| (q - point).norm())
    }

    /// Whether `point` lies inside the closed, outward-oriented surface
    pub fn contains(&self, point: &Point3<f64>) -> bool {
        match &self.shape {
            Some(shape) if self.bbox.contains(point) => shape.contains_local_point(&to_f32(point)),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::primitives::box_surface;
    use nalgebra::Vector3;

    #[test]
    fn test_locator_inside_and_distance() {
        let mesh = box_surface(Point3::origin(), Vector3::new(1.0, 1.0, 1.0));
        let locator = SurfaceLocator::new(&mesh);
        assert!(locator.contains(&Point3::new(0.1, -0.2, 0.3)));
        assert!(locator.contains(&Point3::new(0.95, 0.95, -0.95)));
        assert!(!locator.contains(&Point3::new(1.5, 0.0, 0.0)));
        assert!(!locator.contains(&Point3::new(0.5, 0.5, 1.05)));
        assert!((locator.distance(&Point3::new(0.0, 0.0, 0.25)) - 0.75).abs() < 1e-6);
        assert!((locator.distance(&Point3::new(3.0, 0.0, 0.0)) - 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_subset_projects_onto_its_own_triangles() {
        let mesh = box_surface(Point3::origin(), Vector3::new(1.0, 1.0, 1.0));
        let ids = mesh.face_ids().unwrap().to_vec();
        let top: Vec<usize> = (0..mesh.triangle_count())
            .filter(|&t| mesh.triangle_centroid(t).z > 0.99)
            .collect();
        let locator = SurfaceLocator::subset(&mesh, top.iter().copied());

        // Closer to the side x = 1, yet lands on the top face
        let (t, q) = locator.closest(&Point3::new(1.2, 0.0, 0.9)).unwrap();
        assert!(top.contains(&t));
        assert_eq!(ids[t], ids[top[0]]);
        assert!((q - Point3::new(1.0, 0.0, 1.0)).norm() < 1e-6);

        let empty = SurfaceLocator::subset(&mesh, std::iter::empty());
        assert!(empty.closest(&Point3::origin()).is_none());
        assert!(!empty.contains(&Point3::origin()));
        assert_eq!(empty.project(&Point3::new(1.0, 2.0, 3.0)), Point3::new(1.0, 2.0, 3.0));
    }
}
