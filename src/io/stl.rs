// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! STL export and import
//!
//! STL stores single precision coordinates and no arrays, so this is a
//! lossy exchange format; use the VTK writer for round trips.

use crate::error::Result;
use crate::geometry::SurfaceMesh;
use anyhow::Context;
use nalgebra::Point3;
use std::fs::File;
use std::path::Path;
use stl_io::{Normal, Triangle as StlTriangle, Vertex as StlVertex};

/// Write a binary STL file
pub fn export_stl(mesh: &SurfaceMesh, path: &Path) -> Result<()> {
    let triangles: Vec<StlTriangle> = (0..mesh.triangle_count())
        .map(|t| {
            let n = mesh.triangle_normal(t);
            let [a, b, c] = mesh.triangle_points(t);
            let vertex = |p: Point3<f64>| StlVertex::new([p.x as f32, p.y as f32, p.z as f32]);
            StlTriangle {
                normal: Normal::new([n.x as f32, n.y as f32, n.z as f32]),
                vertices: [vertex(a), vertex(b), vertex(c)],
            }
        })
        .collect();

    let mut file = File::create(path).with_context(|| format!("Failed to create STL file: {:?}", path))?;
    stl_io::write_stl(&mut file, triangles.iter()).context("Failed to write STL file")?;
    Ok(())
}

/// Read an ASCII or binary STL file into an indexed surface
pub fn import_stl(path: &Path) -> Result<SurfaceMesh> {
    let mut file = File::open(path).with_context(|| format!("Failed to open STL file: {:?}", path))?;
    let stl = stl_io::read_stl(&mut file).context("Failed to read STL file")?;

    let points = stl
        .vertices
        .iter()
        .map(|v| Point3::new(v[0] as f64, v[1] as f64, v[2] as f64))
        .collect();
    let triangles = stl.faces.iter().map(|f| f.vertices).collect();
    Ok(SurfaceMesh::from_parts(points, triangles))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::primitives::box_surface;
    use nalgebra::Vector3;
    use tempfile::NamedTempFile;

    #[test]
    fn test_export_and_import_stl() -> anyhow::Result<()> {
        let mesh = box_surface(Point3::new(1.0, 2.0, 3.0), Vector3::new(0.5, 0.5, 0.5));
        let file = NamedTempFile::new()?;

        export_stl(&mesh, file.path())?;
        let back = import_stl(file.path())?;

        assert_eq!(back.triangle_count(), 12);
        assert_eq!(back.point_count(), 8);
        assert!((back.signed_volume() - 1.0).abs() < 1e-5);
        Ok(())
    }
}
