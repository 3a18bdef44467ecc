// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! Configuration-driven mesh generation
//!
//! A [`MeshPipeline`] walks one mesh object through
//! `Created -> ModelBound -> BoundaryExtracted -> Initialized -> Configured
//! -> Generated -> Exported`. Every call checks the current state and fails
//! with [`Error::InvalidState`] when it is out of order. Configuration
//! errors surface at the call that causes them, never at `generate`.

use super::boundary_layer::BoundaryLayerSpec;
use super::options::{MeshOptions, OptionValue};
use super::sizing::RefinementRegion;
use super::{MeshOutput, MeshReport, MeshRequest};
use crate::config::SessionConfig;
use crate::error::{Error, Result};
use crate::geometry::faces::{face_info, face_surface, segment_faces};
use crate::geometry::{CellType, FaceInfo, SurfaceMesh, VolumeMesh};
use crate::io::{read_polydata, read_unstructured_grid};
use crate::kernel::{solid_kernel, MeshKernel, MeshKernelKind};
use crate::solid::Solid;
use crate::store::ObjectStore;
use nalgebra::{Point3, Vector3};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::Path;
use tracing::{debug, info, warn};

/// Lifecycle of a mesh object
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MeshState {
    Created,
    ModelBound,
    BoundaryExtracted,
    Initialized,
    Configured,
    Generated,
    Exported,
}

impl fmt::Display for MeshState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MeshState::Created => "Created",
            MeshState::ModelBound => "ModelBound",
            MeshState::BoundaryExtracted => "BoundaryExtracted",
            MeshState::Initialized => "Initialized",
            MeshState::Configured => "Configured",
            MeshState::Generated => "Generated",
            MeshState::Exported => "Exported",
        };
        write!(f, "{}", name)
    }
}

/// One mesh object and its configuration
pub struct MeshPipeline {
    kernel: Box<dyn MeshKernel>,
    config: SessionConfig,
    state: MeshState,
    solid: Option<Solid>,
    model: Option<SurfaceMesh>,
    options: MeshOptions,
    regions: Vec<RefinementRegion>,
    walls: BTreeSet<i32>,
    boundary_layer: Option<BoundaryLayerSpec>,
    output: Option<MeshOutput>,
}

/// Outward boundary triangles of the tetrahedra in `mesh`
fn boundary_of(mesh: &VolumeMesh) -> SurfaceMesh {
    const OUTWARD: [[usize; 3]; 4] = [[0, 2, 1], [0, 1, 3], [0, 3, 2], [1, 2, 3]];
    let mut faces: BTreeMap<[usize; 3], ([usize; 3], usize)> = BTreeMap::new();
    for cell in mesh.cells.iter().filter(|c| c.kind == CellType::Tetra) {
        for local in OUTWARD {
            let tri = local.map(|k| cell.points[k]);
            let mut key = tri;
            key.sort_unstable();
            faces.entry(key).or_insert((tri, 0)).1 += 1;
        }
    }
    let triangles = faces
        .into_values()
        .filter(|(_, count)| *count == 1)
        .map(|(tri, _)| tri)
        .collect();
    let mut surface = SurfaceMesh::from_parts(mesh.points.clone(), triangles);
    surface.remove_unused_points();
    surface
}

impl MeshPipeline {
    /// A pipeline in the `Created` state using the `kind` backend
    pub fn new(kind: MeshKernelKind, config: &SessionConfig) -> Self {
        Self {
            kernel: super::backend(kind),
            config: config.clone(),
            state: MeshState::Created,
            solid: None,
            model: None,
            options: MeshOptions::default(),
            regions: Vec::new(),
            walls: BTreeSet::new(),
            boundary_layer: None,
            output: None,
        }
    }

    pub fn state(&self) -> MeshState {
        self.state
    }

    pub fn kernel_kind(&self) -> MeshKernelKind {
        self.kernel.kind()
    }

    pub fn options(&self) -> &MeshOptions {
        &self.options
    }

    fn require(&self, operation: &str, allowed: &[MeshState]) -> Result<()> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(Error::InvalidState {
                operation: operation.to_string(),
                state: self.state.to_string(),
            })
        }
    }

    fn require_configurable(&self, operation: &str) -> Result<()> {
        self.require(
            operation,
            &[
                MeshState::Initialized,
                MeshState::Configured,
                MeshState::Generated,
                MeshState::Exported,
            ],
        )
    }

    /// Configuration changed: the previous result no longer matches it
    fn configured(&mut self) {
        if self.output.take().is_some() {
            debug!("mesh configuration changed, previous result discarded");
        }
        self.state = MeshState::Configured;
    }

    fn model(&self) -> Result<&SurfaceMesh> {
        self.model.as_ref().ok_or_else(|| Error::NotFound("bound model".to_string()))
    }

    /// Bind a solid as the meshing domain
    pub fn bind_solid(&mut self, solid: Solid) -> Result<()> {
        self.require("bind a model", &[MeshState::Created])?;
        let kernel = solid_kernel(solid.kernel(), &self.config);
        let surface = kernel.to_polydata(&solid, self.config.tessellation_tolerance)?;
        info!(
            "mesh: bound {} solid ({} triangles)",
            solid.kernel(),
            surface.triangle_count()
        );
        self.model = Some(surface);
        self.solid = Some(solid);
        self.state = MeshState::ModelBound;
        Ok(())
    }

    /// Bind a closed surface as the meshing domain
    pub fn bind_surface(&mut self, surface: SurfaceMesh) -> Result<()> {
        self.require("bind a model", &[MeshState::Created])?;
        if surface.triangles.is_empty() {
            return Err(Error::invalid("cannot mesh an empty surface"));
        }
        info!("mesh: bound surface ({} triangles)", surface.triangle_count());
        self.model = Some(surface);
        self.state = MeshState::ModelBound;
        Ok(())
    }

    /// Bind a surface read from a VTK file
    pub fn load_model(&mut self, path: &Path) -> Result<()> {
        self.require("load a model", &[MeshState::Created])?;
        let surface = read_polydata(path)?;
        self.bind_surface(surface)
    }

    /// Adopt a volume mesh read from a VTK file as the generated result. Its
    /// tetrahedral boundary becomes the model.
    pub fn load_mesh(&mut self, path: &Path) -> Result<()> {
        self.require("load a mesh", &[MeshState::Created])?;
        let volume = read_unstructured_grid(path)?;
        let surface = boundary_of(&volume);
        if surface.triangles.is_empty() {
            return Err(Error::invalid(format!("{:?} holds no tetrahedra", path)));
        }
        let mut report = MeshReport::default();
        report.measure(&surface, Some(&volume), self.options.quality_ratio, self.config.parallel);
        self.model = Some(surface.clone());
        self.output = Some(MeshOutput {
            surface,
            volume: Some(volume),
            report,
        });
        self.state = MeshState::Generated;
        Ok(())
    }

    /// Segment the model boundary into faces. A model that already carries
    /// face ids keeps them.
    pub fn extract_boundary_faces(&mut self, feature_angle_deg: f64) -> Result<()> {
        self.require("extract boundary faces", &[MeshState::ModelBound])?;
        if !(feature_angle_deg.is_finite() && feature_angle_deg > 0.0) {
            return Err(Error::invalid(format!("feature angle {} is not positive", feature_angle_deg)));
        }
        let model = self.model()?;
        if model.face_ids().is_some() {
            debug!("mesh: model faces already extracted");
        } else if let Some(solid) = &self.solid {
            let kernel = solid_kernel(solid.kernel(), &self.config);
            let extracted = kernel.extract_boundary_faces(solid, feature_angle_deg)?;
            self.model = Some(kernel.to_polydata(&extracted, self.config.tessellation_tolerance)?);
            self.solid = Some(extracted);
        } else {
            let mut surface = model.clone();
            surface.set_face_ids(segment_faces(&surface, feature_angle_deg));
            self.model = Some(surface);
        }
        info!("mesh: {} boundary faces", self.model()?.face_id_set().len());
        self.state = MeshState::BoundaryExtracted;
        Ok(())
    }

    /// Reset the configuration to defaults
    pub fn initialize_mesh(&mut self) -> Result<()> {
        self.require(
            "initialize the mesh",
            &[
                MeshState::BoundaryExtracted,
                MeshState::Initialized,
                MeshState::Configured,
                MeshState::Generated,
                MeshState::Exported,
            ],
        )?;
        self.options = MeshOptions::default();
        self.regions.clear();
        self.walls.clear();
        self.boundary_layer = None;
        self.output = None;
        self.state = MeshState::Initialized;
        Ok(())
    }

    /// Set one named option, for example `("GlobalEdgeSize", [0.5.into()])`
    pub fn set_option(&mut self, key: &str, values: &[OptionValue]) -> Result<()> {
        self.require_configurable("set an option")?;
        let mut options = self.options.clone();
        options.set(key, values)?;
        for &(id, _) in &options.local_edge_size {
            self.check_face(id)?;
        }
        self.options = options;
        self.configured();
        Ok(())
    }

    /// Replace all options at once, e.g. from a TOML table
    pub fn set_options(&mut self, options: MeshOptions) -> Result<()> {
        self.require_configurable("set options")?;
        options.validate()?;
        for &(id, _) in &options.local_edge_size {
            self.check_face(id)?;
        }
        self.options = options;
        self.configured();
        Ok(())
    }

    fn check_face(&self, id: i32) -> Result<()> {
        if self.model()?.face_id_set().contains(&id) {
            Ok(())
        } else {
            Err(Error::MissingFaceId(id))
        }
    }

    pub fn add_sphere_refinement(&mut self, target_size: f64, radius: f64, center: Point3<f64>) -> Result<()> {
        self.require_configurable("add a sphere refinement")?;
        self.regions.push(RefinementRegion::sphere(target_size, radius, center)?);
        self.configured();
        Ok(())
    }

    pub fn add_cylinder_refinement(
        &mut self,
        target_size: f64,
        radius: f64,
        length: f64,
        center: Point3<f64>,
        axis: Vector3<f64>,
    ) -> Result<()> {
        self.require_configurable("add a cylinder refinement")?;
        self.regions
            .push(RefinementRegion::cylinder(target_size, radius, length, center, axis)?);
        self.configured();
        Ok(())
    }

    /// Scale sizes by the model point array `array`
    pub fn set_size_function_field(&mut self, target_size: f64, array: &str) -> Result<()> {
        self.require_configurable("set a size function")?;
        let region = RefinementRegion::distance_field(target_size, array)?;
        let model = self.model()?;
        match model.point_array(array) {
            Some(a) if a.components == 1 && a.as_f64().is_some() && a.len() == model.point_count() => {}
            _ => return Err(Error::MissingArray(array.to_string())),
        }
        self.regions
            .retain(|r| !matches!(r, RefinementRegion::DistanceField { .. }));
        self.regions.push(region);
        self.configured();
        Ok(())
    }

    /// Attach a point array to the bound model, typically a distance field
    pub fn add_model_array(&mut self, array: crate::geometry::DataArray) -> Result<()> {
        self.require_configurable("add a model array")?;
        let model = self.model.as_mut().ok_or_else(|| Error::NotFound("bound model".to_string()))?;
        if array.len() != model.point_count() {
            return Err(Error::invalid(format!(
                "array '{}' has {} values for {} points",
                array.name,
                array.len(),
                model.point_count()
            )));
        }
        model.set_array(crate::geometry::Association::Point, array);
        self.configured();
        Ok(())
    }

    pub fn mark_wall_faces(&mut self, ids: &[i32]) -> Result<()> {
        self.require_configurable("mark wall faces")?;
        for &id in ids {
            self.check_face(id)?;
        }
        self.walls.extend(ids.iter().copied());
        self.configured();
        Ok(())
    }

    pub fn set_boundary_layer(&mut self, spec: BoundaryLayerSpec) -> Result<()> {
        self.require_configurable("set a boundary layer")?;
        let unmarked: Vec<i32> = spec.wall_face_ids.difference(&self.walls).copied().collect();
        if !unmarked.is_empty() {
            return Err(Error::WallFacesRequired(unmarked));
        }
        self.boundary_layer = Some(spec);
        self.configured();
        Ok(())
    }

    /// Run the backend. A previous result is discarded first; on failure
    /// nothing is kept and the pipeline stays configured.
    ///
    /// At least one configuration call must follow `initialize_mesh`.
    pub fn generate(&mut self) -> Result<&MeshOutput> {
        self.require(
            "generate",
            &[MeshState::Configured, MeshState::Generated, MeshState::Exported],
        )?;
        if self.output.take().is_some() {
            debug!("mesh: discarding previous result");
        }
        self.state = MeshState::Configured;

        let model = self.model()?;
        let request = MeshRequest {
            surface: model,
            options: &self.options,
            regions: &self.regions,
            walls: &self.walls,
            boundary_layer: self.boundary_layer.as_ref(),
            seed: self.config.seed,
            parallel: self.config.parallel,
        };
        let output = match self.kernel.generate(&request) {
            Ok(output) => output,
            Err(err) => {
                warn!("mesh generation failed: {}", err);
                return Err(err);
            }
        };
        if output.report.poor_tetrahedra > 0 {
            info!(
                "mesh: {} tetrahedra exceed radius-edge ratio {}",
                output.report.poor_tetrahedra, self.options.quality_ratio
            );
        }
        self.state = MeshState::Generated;
        Ok(self.output.insert(output))
    }

    fn output(&self, operation: &str) -> Result<&MeshOutput> {
        self.require(operation, &[MeshState::Generated, MeshState::Exported])?;
        self.output
            .as_ref()
            .ok_or_else(|| Error::NotFound("generated mesh".to_string()))
    }

    /// Bind the generated surface to `name` in `store`
    pub fn export_surface(&mut self, store: &mut ObjectStore, name: &str) -> Result<()> {
        let surface = self.output("export the surface")?.surface.clone();
        store.put(name, surface);
        self.state = MeshState::Exported;
        Ok(())
    }

    /// Bind the generated volume to `name` in `store`
    pub fn export_volume(&mut self, store: &mut ObjectStore, name: &str) -> Result<()> {
        let volume = self
            .output("export the volume")?
            .volume
            .clone()
            .ok_or_else(|| Error::NotFound("volume mesh".to_string()))?;
        store.put(name, volume);
        self.state = MeshState::Exported;
        Ok(())
    }

    /// Generated surface, or the bound model before generation
    pub fn get_polydata(&self) -> Result<&SurfaceMesh> {
        match &self.output {
            Some(output) => Ok(&output.surface),
            None => self.model(),
        }
    }

    pub fn get_unstructured_grid(&self) -> Result<&VolumeMesh> {
        self.output("get the volume mesh")?
            .volume
            .as_ref()
            .ok_or_else(|| Error::NotFound("volume mesh".to_string()))
    }

    /// Triangles of one face of the current surface
    pub fn get_face_polydata(&self, face_id: i32) -> Result<SurfaceMesh> {
        face_surface(self.get_polydata()?, face_id)
    }

    pub fn get_model_face_info(&self) -> Result<Vec<FaceInfo>> {
        face_info(self.model()?)
    }

    pub fn get_solid(&self) -> Result<&Solid> {
        self.solid.as_ref().ok_or_else(|| Error::NotFound("bound solid".to_string()))
    }

    pub fn report(&self) -> Option<&MeshReport> {
        self.output.as_ref().map(|o| &o.report)
    }
}

impl fmt::Display for MeshPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "mesh kernel: {}", self.kernel.kind())?;
        writeln!(f, "state: {}", self.state)?;
        if let Some(model) = &self.model {
            writeln!(
                f,
                "model: {} points, {} triangles, faces {:?}",
                model.point_count(),
                model.triangle_count(),
                model.face_id_set()
            )?;
        }
        writeln!(f, "options: {}", self.options)?;
        for region in &self.regions {
            writeln!(f, "refinement: {}", region)?;
        }
        if !self.walls.is_empty() {
            writeln!(f, "walls: {:?}", self.walls)?;
        }
        if let Some(spec) = &self.boundary_layer {
            writeln!(
                f,
                "boundary layer: {} layers on {:?}, {:?} {:?}",
                spec.layer_count, spec.wall_face_ids, spec.layer_type, spec.insertion_side
            )?;
        }
        if let Some(output) = &self.output {
            writeln!(f, "{}", output.report)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::primitives::box_surface;
    use crate::meshing::{InsertionSide, LayerType};

    fn configured_box() -> MeshPipeline {
        let mut pipeline = MeshPipeline::new(MeshKernelKind::TetGen, &SessionConfig::default());
        pipeline
            .bind_surface(box_surface(Point3::origin(), Vector3::new(1.0, 1.0, 1.0)))
            .unwrap();
        pipeline.extract_boundary_faces(50.0).unwrap();
        pipeline.initialize_mesh().unwrap();
        pipeline.set_option("GlobalEdgeSize", &[0.5.into()]).unwrap();
        pipeline
    }

    #[test]
    fn test_out_of_order_calls() {
        let mut pipeline = MeshPipeline::new(MeshKernelKind::TetGen, &SessionConfig::default());
        assert!(matches!(
            pipeline.set_option("GlobalEdgeSize", &[0.5.into()]),
            Err(Error::InvalidState { .. })
        ));
        assert!(matches!(pipeline.generate(), Err(Error::InvalidState { .. })));

        pipeline
            .bind_surface(box_surface(Point3::origin(), Vector3::new(1.0, 1.0, 1.0)))
            .unwrap();
        assert!(matches!(pipeline.initialize_mesh(), Err(Error::InvalidState { .. })));
        assert_eq!(pipeline.state(), MeshState::ModelBound);
    }

    #[test]
    fn test_generate_needs_a_configuration_call() {
        let mut pipeline = MeshPipeline::new(MeshKernelKind::TetGen, &SessionConfig::default());
        pipeline
            .bind_surface(box_surface(Point3::origin(), Vector3::new(1.0, 1.0, 1.0)))
            .unwrap();
        pipeline.extract_boundary_faces(50.0).unwrap();
        pipeline.initialize_mesh().unwrap();
        assert!(matches!(
            pipeline.generate(),
            Err(Error::InvalidState { operation, state }) if operation == "generate" && state == "Initialized"
        ));
        assert_eq!(pipeline.state(), MeshState::Initialized);

        pipeline.set_option("GlobalEdgeSize", &[0.6.into()]).unwrap();
        assert_eq!(pipeline.state(), MeshState::Configured);
        pipeline.generate().unwrap();
        assert_eq!(pipeline.state(), MeshState::Generated);
    }

    #[test]
    fn test_configuration_errors_are_immediate() {
        let mut pipeline = configured_box();
        assert!(matches!(
            pipeline.set_option("GlobalEdgeSise", &[0.5.into()]),
            Err(Error::UnknownOption(key)) if key == "GlobalEdgeSise"
        ));
        assert!(matches!(
            pipeline.set_option("LocalEdgeSize", &[9.into(), 0.1.into()]),
            Err(Error::MissingFaceId(9))
        ));
        assert!(matches!(
            pipeline.set_size_function_field(1.0, "DistanceToCenterlines"),
            Err(Error::MissingArray(_))
        ));

        let spec = BoundaryLayerSpec::new([1], LayerType::Absolute, InsertionSide::Inward, 2, vec![0.05]).unwrap();
        assert!(matches!(
            pipeline.set_boundary_layer(spec.clone()),
            Err(Error::WallFacesRequired(ids)) if ids == vec![1]
        ));
        pipeline.mark_wall_faces(&[1]).unwrap();
        pipeline.set_boundary_layer(spec).unwrap();
        assert_eq!(pipeline.state(), MeshState::Configured);
    }

    #[test]
    fn test_generate_export_and_regenerate() {
        let mut pipeline = configured_box();
        let first = pipeline.generate().unwrap().volume.as_ref().unwrap().cell_count();
        assert_eq!(pipeline.state(), MeshState::Generated);

        let mut store = ObjectStore::new();
        pipeline.export_surface(&mut store, "surface").unwrap();
        pipeline.export_volume(&mut store, "volume").unwrap();
        assert_eq!(pipeline.state(), MeshState::Exported);
        assert_eq!(store.get_volume("volume").unwrap().cell_count(), first);

        // Identical configuration reproduces the same mesh
        let again = pipeline.generate().unwrap().volume.as_ref().unwrap().clone();
        assert_eq!(again.cell_count(), first);
        assert_eq!(&again, store.get_volume("volume").unwrap());
        assert!(pipeline.to_string().contains("Generated"));
    }

    #[test]
    fn test_failed_generation_keeps_nothing() {
        let mut pipeline = MeshPipeline::new(MeshKernelKind::SurfaceOnly, &SessionConfig::default());
        pipeline
            .bind_surface(box_surface(Point3::origin(), Vector3::new(1.0, 1.0, 1.0)))
            .unwrap();
        pipeline.extract_boundary_faces(50.0).unwrap();
        pipeline.initialize_mesh().unwrap();
        pipeline.set_option("GlobalEdgeSize", &[0.5.into()]).unwrap();
        assert!(matches!(pipeline.generate(), Err(Error::MeshGenerationFailure { .. })));
        assert_eq!(pipeline.state(), MeshState::Configured);
        assert!(pipeline.get_unstructured_grid().is_err());

        pipeline.set_option("VolumeMeshFlag", &[false.into()]).unwrap();
        assert!(pipeline.generate().unwrap().volume.is_none());
    }

    #[test]
    fn test_pre_extracted_faces_are_kept() {
        let mut pipeline = MeshPipeline::new(MeshKernelKind::TetGen, &SessionConfig::default());
        let mut surface = box_surface(Point3::origin(), Vector3::new(1.0, 1.0, 1.0));
        surface.set_face_ids(vec![7; 12]);
        pipeline.bind_surface(surface).unwrap();
        pipeline.extract_boundary_faces(30.0).unwrap();
        let info = pipeline.get_model_face_info().unwrap();
        assert_eq!(info.len(), 1);
        assert_eq!(info[0].id, 7);
    }
}
