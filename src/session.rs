// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! Modeling session facade
//!
//! A [`Session`] owns the object store and the active kernels. Solid
//! operations read their operands from the store by name and bind their
//! results back. Switching the solid kernel affects every later call; solids
//! made under another kernel are rejected with a kernel mismatch.

use crate::config::SessionConfig;
use crate::error::{Error, Result};
use crate::geometry::faces::{face_info, face_surface};
use crate::geometry::{Association, BooleanOp, DataArray, FaceInfo, SurfaceMesh};
use crate::io::{self, VtkDataset, VtkEncoding};
use crate::kernel::{solid_kernel, FaceMergePolicy, MeshKernelKind, SolidKernel, SolidKernelKind};
use crate::meshing::centerlines::{distance_to_centerlines, CenterlineExtractor, MedialCenterlines};
use crate::meshing::{remesh_surface, MeshPipeline};
use crate::smooth::{self, ConversionRule, SmoothParams};
use crate::solid::Solid;
use crate::store::{Object, ObjectStore};
use nalgebra::{Point3, Vector3};
use std::path::Path;
use tracing::{info, warn};

pub struct Session {
    config: SessionConfig,
    store: ObjectStore,
    solid_kernel: Box<dyn SolidKernel>,
    mesh_kernel: MeshKernelKind,
}

impl Default for Session {
    fn default() -> Self {
        Self::new(SessionConfig::default())
    }
}

impl Session {
    pub fn new(config: SessionConfig) -> Self {
        info!(
            "session: solid kernel {}, mesh kernel {}",
            config.solid_kernel, config.mesh_kernel
        );
        Self {
            solid_kernel: solid_kernel(config.solid_kernel, &config),
            mesh_kernel: config.mesh_kernel,
            store: ObjectStore::new(),
            config,
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn store(&self) -> &ObjectStore {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut ObjectStore {
        &mut self.store
    }

    pub fn solid_kernel(&self) -> SolidKernelKind {
        self.solid_kernel.kind()
    }

    pub fn mesh_kernel(&self) -> MeshKernelKind {
        self.mesh_kernel
    }

    /// Switch the solid kernel for every subsequent call
    pub fn set_solid_kernel(&mut self, kind: SolidKernelKind) {
        if kind != self.solid_kernel.kind() {
            warn!(
                "solid kernel switched from {} to {}; existing solids become unusable",
                self.solid_kernel.kind(),
                kind
            );
            self.solid_kernel = solid_kernel(kind, &self.config);
            self.config.solid_kernel = kind;
        }
    }

    pub fn set_mesh_kernel(&mut self, kind: MeshKernelKind) {
        if kind != self.mesh_kernel {
            warn!("mesh kernel switched from {} to {}", self.mesh_kernel, kind);
            self.mesh_kernel = kind;
            self.config.mesh_kernel = kind;
        }
    }

    /// Look up a solid and check it belongs to the active kernel
    fn solid(&self, operation: &str, name: &str) -> Result<&Solid> {
        let solid = self.store.get_solid(name)?;
        if solid.kernel() != self.solid_kernel.kind() {
            return Err(Error::KernelMismatch {
                operation: operation.to_string(),
                kernel: format!("{} (solid '{}' was made by {})", self.solid_kernel.kind(), name, solid.kernel()),
            });
        }
        Ok(solid)
    }

    fn bind_solid(&mut self, name: &str, solid: Solid) -> Result<&Solid> {
        self.store.put(name, solid);
        self.store.get_solid(name)
    }

    pub fn make_cylinder(
        &mut self,
        name: &str,
        center: Point3<f64>,
        axis: Vector3<f64>,
        radius: f64,
        length: f64,
    ) -> Result<&Solid> {
        let solid = self.solid_kernel.cylinder(center, axis, radius, length)?;
        self.bind_solid(name, solid)
    }

    pub fn make_sphere(&mut self, name: &str, center: Point3<f64>, radius: f64) -> Result<&Solid> {
        let solid = self.solid_kernel.sphere(center, radius)?;
        self.bind_solid(name, solid)
    }

    pub fn make_box(&mut self, name: &str, center: Point3<f64>, half_extents: Vector3<f64>) -> Result<&Solid> {
        let solid = self.solid_kernel.cuboid(center, half_extents)?;
        self.bind_solid(name, solid)
    }

    pub fn make_ellipsoid(&mut self, name: &str, center: Point3<f64>, semi_axes: Vector3<f64>) -> Result<&Solid> {
        let solid = self.solid_kernel.ellipsoid(center, semi_axes)?;
        self.bind_solid(name, solid)
    }

    pub fn boolean(&mut self, name: &str, op: BooleanOp, a: &str, b: &str, policy: FaceMergePolicy) -> Result<&Solid> {
        let solid = self
            .solid_kernel
            .boolean(op, self.solid("boolean", a)?, self.solid("boolean", b)?, policy)?;
        self.bind_solid(name, solid)
    }

    /// Bind a copy of `src` to `dst`
    pub fn copy(&mut self, dst: &str, src: &str) -> Result<&Solid> {
        let solid = self.solid("copy", src)?.clone();
        self.bind_solid(dst, solid)
    }

    /// Segment the boundary of solid `name` into faces, in place
    pub fn extract_boundary_faces(&mut self, name: &str, feature_angle_deg: f64) -> Result<Vec<i32>> {
        let solid = self
            .solid_kernel
            .extract_boundary_faces(self.solid("extract_boundary_faces", name)?, feature_angle_deg)?;
        let ids = self.solid_kernel.face_ids(&solid)?;
        self.store.put(name, solid);
        Ok(ids)
    }

    pub fn get_boundary_faces(&mut self, name: &str, feature_angle_deg: f64) -> Result<Vec<i32>> {
        self.extract_boundary_faces(name, feature_angle_deg)
    }

    pub fn get_face_ids(&self, name: &str) -> Result<Vec<i32>> {
        self.solid_kernel.face_ids(self.solid("get_face_ids", name)?)
    }

    /// Surface of solid `name`, bound to `surface_name`
    pub fn to_polydata(&mut self, name: &str, surface_name: &str) -> Result<&SurfaceMesh> {
        let surface = self
            .solid_kernel
            .to_polydata(self.solid("to_polydata", name)?, self.config.tessellation_tolerance)?;
        self.store.put(surface_name, surface);
        self.store.get_surface(surface_name)
    }

    pub fn combine_faces(&mut self, name: &str, keep_id: i32, merge_id: i32) -> Result<Vec<i32>> {
        let solid = self
            .solid_kernel
            .combine_faces(self.solid("combine_faces", name)?, keep_id, merge_id)?;
        let ids = self.solid_kernel.face_ids(&solid)?;
        self.store.put(name, solid);
        Ok(ids)
    }

    pub fn delete_faces(&mut self, name: &str, ids: &[i32]) -> Result<Vec<i32>> {
        let solid = self.solid_kernel.delete_faces(self.solid("delete_faces", name)?, ids)?;
        let remaining = self.solid_kernel.face_ids(&solid)?;
        self.store.put(name, solid);
        Ok(remaining)
    }

    /// Remesh only the listed faces of solid `name` to `edge_size`
    pub fn remesh_faces(&mut self, name: &str, ids: &[i32], edge_size: f64) -> Result<&Solid> {
        let solid = self
            .solid_kernel
            .remesh_faces(self.solid("remesh_faces", name)?, ids, edge_size)?;
        self.bind_solid(name, solid)
    }

    pub fn create_edge_blend(&mut self, name: &str, face_a: i32, face_b: i32, radius: f64) -> Result<&Solid> {
        let solid = self
            .solid_kernel
            .create_edge_blend(self.solid("create_edge_blend", name)?, face_a, face_b, radius)?;
        self.bind_solid(name, solid)
    }

    pub fn get_face_attribute(&self, name: &str, key: &str, face: i32) -> Result<Option<String>> {
        self.solid_kernel
            .face_attribute(self.solid("get_face_attribute", name)?, key, face)
    }

    pub fn set_face_attribute(&mut self, name: &str, key: &str, value: &str, face: i32) -> Result<()> {
        let solid = self
            .solid_kernel
            .set_face_attribute(self.solid("set_face_attribute", name)?, key, value, face)?;
        self.store.put(name, solid);
        Ok(())
    }

    pub fn get_face_polydata(&self, name: &str, face: i32) -> Result<SurfaceMesh> {
        let solid = self.solid("get_face_polydata", name)?;
        let surface = self
            .solid_kernel
            .to_polydata(solid, self.config.tessellation_tolerance)?;
        face_surface(&surface, face)
    }

    pub fn model_face_info(&self, name: &str) -> Result<Vec<FaceInfo>> {
        let solid = self.solid("model_face_info", name)?;
        let surface = self
            .solid_kernel
            .to_polydata(solid, self.config.tessellation_tolerance)?;
        face_info(&surface)
    }

    pub fn write_native(&self, name: &str, path: &Path) -> Result<()> {
        self.solid_kernel.write_native(self.solid("write_native", name)?, path)
    }

    pub fn read_native(&mut self, name: &str, path: &Path) -> Result<&Solid> {
        let solid = self.solid_kernel.read_native(path)?;
        self.bind_solid(name, solid)
    }

    /// Surface of a stored surface or solid
    fn surface_of(&self, name: &str) -> Result<SurfaceMesh> {
        match self.store.get(name)? {
            Object::Surface(mesh) => Ok(mesh.clone()),
            Object::Solid(_) => self
                .solid_kernel
                .to_polydata(self.solid("surface", name)?, self.config.tessellation_tolerance),
            other => Err(Error::TypeMismatch {
                name: name.to_string(),
                expected: format!("surface or solid, found {}", other.kind()),
            }),
        }
    }

    pub fn export_stl(&self, name: &str, path: &Path) -> Result<()> {
        io::export_stl(&self.surface_of(name)?, path)
    }

    /// Write a stored surface or volume mesh as legacy VTK
    pub fn export_vtk(&self, name: &str, path: &Path, encoding: VtkEncoding) -> Result<()> {
        match self.store.get(name)? {
            Object::Volume(mesh) => io::write_unstructured_grid(mesh, path, encoding),
            _ => io::write_polydata(&self.surface_of(name)?, path, encoding),
        }
    }

    pub fn import_vtk(&mut self, name: &str, path: &Path) -> Result<()> {
        match io::read_dataset(path)? {
            VtkDataset::PolyData(mesh) => self.store.put(name, mesh),
            VtkDataset::UnstructuredGrid(mesh) => self.store.put(name, mesh),
        };
        Ok(())
    }

    /// New mesh pipeline on the active mesh kernel
    pub fn mesh_pipeline(&self) -> MeshPipeline {
        MeshPipeline::new(self.mesh_kernel, &self.config)
    }

    /// Bind a mesh pipeline to solid `name`
    pub fn mesh_solid(&self, name: &str) -> Result<MeshPipeline> {
        let mut pipeline = self.mesh_pipeline();
        pipeline.bind_solid(self.solid("mesh", name)?.clone())?;
        Ok(pipeline)
    }

    /// Uniformly remesh surface `src` into `dst`
    pub fn remesh_surface(&mut self, dst: &str, src: &str, hmin: f64, hmax: f64) -> Result<&SurfaceMesh> {
        let mesh = remesh_surface(&self.surface_of(src)?, hmin, hmax)?;
        self.store.put(dst, mesh);
        self.store.get_surface(dst)
    }

    /// Mark the elements of surface `surface` inside a sphere. The marker is
    /// attached to the surface and also bound to `array_name`.
    pub fn mark_region(
        &mut self,
        surface: &str,
        center: Point3<f64>,
        radius: f64,
        array_name: &str,
        association: Association,
    ) -> Result<&DataArray> {
        let mut mesh = self.store.get_surface(surface)?.clone();
        let marker = smooth::mark_region(&mesh, &center, radius, array_name, association)?;
        mesh.set_array(association, marker.clone());
        self.store.put(surface, mesh);
        self.store.put_array(array_name, association, marker);
        Ok(self.store.get_array(array_name)?.1)
    }

    /// Derive the other association of marker `array_name` on `surface`
    pub fn convert_marker(&mut self, surface: &str, array_name: &str, rule: ConversionRule, new_name: &str) -> Result<&DataArray> {
        let (association, array) = self.store.get_array(array_name)?;
        let mut mesh = self.store.get_surface(surface)?.clone();
        let converted = smooth::convert_marker(&mesh, array, association, rule, new_name)?;
        let target = match association {
            Association::Point => Association::Cell,
            Association::Cell => Association::Point,
        };
        mesh.set_array(target, converted.clone());
        self.store.put(surface, mesh);
        self.store.put_array(new_name, target, converted);
        Ok(self.store.get_array(new_name)?.1)
    }

    /// Smooth the marked region of surface `src` into `dst`
    pub fn smooth(
        &mut self,
        dst: &str,
        src: &str,
        params: &SmoothParams,
        point_array: Option<&str>,
        cell_array: Option<&str>,
    ) -> Result<&SurfaceMesh> {
        let mesh = smooth::smooth(self.store.get_surface(src)?, params, point_array, cell_array)?;
        self.store.put(dst, mesh);
        self.store.get_surface(dst)
    }

    /// Centerlines of surface `surface` between cap faces, bound to `name`
    pub fn centerlines(&mut self, name: &str, surface: &str, sources: &[i32], targets: &[i32]) -> Result<&SurfaceMesh> {
        let skeleton = MedialCenterlines::default().extract(&self.surface_of(surface)?, sources, targets)?;
        self.store.put(name, skeleton);
        self.store.get_surface(name)
    }

    /// Attach `DistanceToCenterlines` to surface `surface`
    pub fn distance_to_centerlines(&mut self, surface: &str, centerlines: &str) -> Result<&SurfaceMesh> {
        let mesh = distance_to_centerlines(self.store.get_surface(surface)?, self.store.get_surface(centerlines)?)?;
        self.store.put(surface, mesh);
        self.store.get_surface(surface)
    }

    pub fn exists(&self, name: &str) -> bool {
        self.store.exists(name)
    }

    /// Remove `name`; removing a missing name succeeds
    pub fn delete(&mut self, name: &str) {
        self.store.delete(name);
    }

    pub fn list_names(&self) -> Vec<String> {
        self.store.list_names()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kernel_switch_rejects_foreign_solids() {
        let mut session = Session::default();
        session
            .make_cylinder("cyl", Point3::origin(), Vector3::z(), 1.0, 2.0)
            .unwrap();
        session.set_solid_kernel(SolidKernelKind::BRep);
        assert!(matches!(
            session.extract_boundary_faces("cyl", 90.0),
            Err(Error::KernelMismatch { .. })
        ));
        session.set_solid_kernel(SolidKernelKind::PolyData);
        assert_eq!(session.extract_boundary_faces("cyl", 90.0).unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn test_copy_and_delete() {
        let mut session = Session::default();
        session
            .make_box("box", Point3::origin(), Vector3::new(1.0, 1.0, 1.0))
            .unwrap();
        session.copy("box2", "box").unwrap();
        assert_eq!(session.list_names(), vec!["box".to_string(), "box2".to_string()]);
        session.delete("box2");
        session.delete("box2");
        assert!(!session.exists("box2"));
        assert!(matches!(session.copy("x", "missing"), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_mark_region_binds_marker() {
        let mut session = Session::default();
        session
            .make_sphere("ball", Point3::origin(), 1.0)
            .unwrap();
        session.to_polydata("ball", "surface").unwrap();
        let marked = session
            .mark_region("surface", Point3::new(0.0, 0.0, 1.0), 0.5, "Marker", Association::Point)
            .unwrap()
            .clone();
        let surface = session.store().get_surface("surface").unwrap();
        assert_eq!(surface.point_array("Marker"), Some(&marked));

        let params = SmoothParams {
            iterations: 3,
            ..SmoothParams::default()
        };
        session
            .smooth("smoothed", "surface", &params, Some("Marker"), None)
            .unwrap();
        assert!(session.exists("smoothed"));
    }
}
