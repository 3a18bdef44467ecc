// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! Explicit polygon kernel: solids are closed triangle surfaces

use super::{boolean_surfaces, check_axis, check_point, check_positive, Body, Solid};
use crate::error::{Error, Result};
use crate::geometry::faces::{combine_faces, delete_faces, segment_faces};
use crate::geometry::primitives::{box_surface, tessellate_revolved, Frame, Resolution, RevolvedProfile};
use crate::geometry::{Association, BooleanOp, SurfaceMesh, FACE_ID_ARRAY};
use crate::io::vtk::{self, VtkEncoding};
use crate::kernel::{FaceMergePolicy, SolidKernel, SolidKernelKind};
use crate::meshing::remesh::{remesh, RemeshParams};
use nalgebra::{Point3, Vector3};
use std::path::Path;
use tracing::{debug, info};

/// Polygonal solid kernel with a fixed angular resolution for round primitives
#[derive(Debug, Clone)]
pub struct PolyDataKernel {
    resolution: usize,
}

impl PolyDataKernel {
    pub fn new(resolution: usize) -> Self {
        Self {
            resolution: resolution.max(3),
        }
    }

    fn surface<'a>(&self, solid: &'a Solid) -> Result<&'a SurfaceMesh> {
        match solid.body() {
            Body::Faceted(surface) if solid.kernel() == SolidKernelKind::PolyData => Ok(surface),
            _ => Err(Error::mismatch("polydata operation on a foreign solid", solid.kernel())),
        }
    }

    /// Primitives carry no face ids until boundary faces are extracted
    fn untagged(mut surface: SurfaceMesh) -> Solid {
        surface.remove_array(Association::Cell, FACE_ID_ARRAY);
        Solid::faceted(surface)
    }
}

impl SolidKernel for PolyDataKernel {
    fn kind(&self) -> SolidKernelKind {
        SolidKernelKind::PolyData
    }

    fn cylinder(&self, center: Point3<f64>, axis: Vector3<f64>, radius: f64, length: f64) -> Result<Solid> {
        check_point("center", &center)?;
        check_positive("radius", radius)?;
        check_positive("length", length)?;
        let axis = check_axis(&axis)?;
        let frame = Frame::from_axis(center, &axis);
        let surface = tessellate_revolved(
            &RevolvedProfile::cylinder(radius, length),
            &frame,
            Resolution::Fixed(self.resolution),
        );
        Ok(Self::untagged(surface))
    }

    fn sphere(&self, center: Point3<f64>, radius: f64) -> Result<Solid> {
        check_point("center", &center)?;
        check_positive("radius", radius)?;
        let frame = Frame::from_axis(center, &Vector3::z());
        let surface = tessellate_revolved(&RevolvedProfile::sphere(radius), &frame, Resolution::Fixed(self.resolution));
        Ok(Self::untagged(surface))
    }

    fn cuboid(&self, center: Point3<f64>, half_extents: Vector3<f64>) -> Result<Solid> {
        check_point("center", &center)?;
        for (label, value) in ["x", "y", "z"].iter().zip(half_extents.iter()) {
            check_positive(&format!("half extent {}", label), *value)?;
        }
        Ok(Self::untagged(box_surface(center, half_extents)))
    }

    fn ellipsoid(&self, center: Point3<f64>, semi_axes: Vector3<f64>) -> Result<Solid> {
        check_point("center", &center)?;
        for (label, value) in ["x", "y", "z"].iter().zip(semi_axes.iter()) {
            check_positive(&format!("semi-axis {}", label), *value)?;
        }
        let frame = Frame::world(center, semi_axes);
        let surface = tessellate_revolved(&RevolvedProfile::sphere(1.0), &frame, Resolution::Fixed(self.resolution));
        Ok(Self::untagged(surface))
    }

    fn boolean(&self, op: BooleanOp, a: &Solid, b: &Solid, policy: FaceMergePolicy) -> Result<Solid> {
        let (surface, _) = boolean_surfaces(op, self.surface(a)?, self.surface(b)?, policy)?;
        Ok(Solid::faceted(surface))
    }

    fn extract_boundary_faces(&self, solid: &Solid, feature_angle_deg: f64) -> Result<Solid> {
        if !(0.0..=180.0).contains(&feature_angle_deg) {
            return Err(Error::invalid(format!("feature angle {} outside [0, 180]", feature_angle_deg)));
        }
        let mut surface = self.surface(solid)?.clone();
        let labels = segment_faces(&surface, feature_angle_deg);
        let count = labels.iter().copied().max().unwrap_or(0);
        surface.set_face_ids(labels);
        info!("extracted {} boundary faces at {} degrees", count, feature_angle_deg);
        Ok(Solid::faceted(surface))
    }

    fn to_polydata(&self, solid: &Solid, _tolerance: f64) -> Result<SurfaceMesh> {
        Ok(self.surface(solid)?.clone())
    }

    fn face_ids(&self, solid: &Solid) -> Result<Vec<i32>> {
        let surface = self.surface(solid)?;
        if surface.face_ids().is_none() {
            return Err(Error::FacesNotExtracted);
        }
        Ok(surface.face_id_set().into_iter().collect())
    }

    fn combine_faces(&self, solid: &Solid, keep_id: i32, merge_id: i32) -> Result<Solid> {
        Ok(Solid::faceted(combine_faces(self.surface(solid)?, keep_id, merge_id)?))
    }

    fn delete_faces(&self, solid: &Solid, ids: &[i32]) -> Result<Solid> {
        Ok(Solid::faceted(delete_faces(self.surface(solid)?, ids)?))
    }

    fn remesh_faces(&self, solid: &Solid, ids: &[i32], edge_size: f64) -> Result<Solid> {
        check_positive("edge size", edge_size)?;
        let surface = self.surface(solid)?;
        let present = surface.face_id_set();
        if present.is_empty() {
            return Err(Error::FacesNotExtracted);
        }
        if let Some(&missing) = ids.iter().find(|id| !present.contains(id)) {
            return Err(Error::MissingFaceId(missing));
        }
        let frozen = present.into_iter().filter(|id| !ids.contains(id)).collect();
        let params = RemeshParams::default().with_frozen_faces(frozen);
        let output = remesh(surface, |_, _| edge_size, &params)?;
        debug!("remeshed faces {:?}: {} triangles", ids, output.mesh.triangle_count());
        Ok(Solid::faceted(output.mesh))
    }

    fn write_native(&self, solid: &Solid, path: &Path) -> Result<()> {
        vtk::write_polydata(self.surface(solid)?, path, VtkEncoding::Ascii)
    }

    fn read_native(&self, path: &Path) -> Result<Solid> {
        let surface = vtk::read_polydata(path)?;
        if surface.triangles.is_empty() {
            return Err(Error::IOFailure(format!("{} contains no polygons", path.display())));
        }
        Ok(Solid::faceted(surface))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_primitive_validation() {
        let kernel = PolyDataKernel::new(36);
        let origin = Point3::origin();
        assert!(kernel.cylinder(origin, Vector3::z(), 0.0, 1.0).is_err());
        assert!(kernel.cylinder(origin, Vector3::z(), 1.0, -1.0).is_err());
        assert!(kernel.cylinder(origin, Vector3::zeros(), 1.0, 1.0).is_err());
        assert!(kernel.sphere(origin, -2.0).is_err());
        assert!(kernel.ellipsoid(origin, Vector3::new(1.0, 0.0, 1.0)).is_err());
        assert!(kernel.cuboid(origin, Vector3::new(1.0, 1.0, 1.0)).is_ok());
    }

    #[test]
    fn test_face_ids_require_extraction() {
        let kernel = PolyDataKernel::new(36);
        let cylinder = kernel.cylinder(Point3::origin(), Vector3::z(), 1.0, 3.0).unwrap();
        assert!(!cylinder.has_face_ids());
        assert!(matches!(kernel.face_ids(&cylinder), Err(Error::FacesNotExtracted)));

        let extracted = kernel.extract_boundary_faces(&cylinder, 90.0).unwrap();
        assert_eq!(kernel.face_ids(&extracted).unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn test_remesh_faces_keeps_other_faces() {
        let kernel = PolyDataKernel::new(24);
        let cylinder = kernel.cylinder(Point3::origin(), Vector3::z(), 1.0, 3.0).unwrap();
        let extracted = kernel.extract_boundary_faces(&cylinder, 90.0).unwrap();
        let before = kernel.to_polydata(&extracted, 0.0).unwrap();
        let remeshed = kernel.remesh_faces(&extracted, &[1], 0.3).unwrap();
        let after = kernel.to_polydata(&remeshed, 0.0).unwrap();

        let cap_count = |mesh: &SurfaceMesh, id: i32| mesh.face_ids().unwrap().iter().filter(|&&f| f == id).count();
        assert_eq!(cap_count(&before, 2), cap_count(&after, 2));
        assert!(cap_count(&after, 1) > cap_count(&before, 1));
        assert!(matches!(kernel.remesh_faces(&extracted, &[8], 0.3), Err(Error::MissingFaceId(8))));
    }
}
