// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! Meshing backends behind the [`MeshKernel`] capability set

use super::boundary_layer::{extrude_layers, InsertionSide};
use super::remesh::{bisect, remesh, RemeshParams};
use super::sizing::SizingField;
use super::volume::{failure, tetrahedralize, VolumeParams};
use super::{MeshOutput, MeshReport, MeshRequest};
use crate::error::{Error, Result};
use crate::geometry::{Cell, SurfaceMesh, VolumeMesh};
use crate::kernel::{MeshKernel, MeshKernelKind};
use nalgebra::Point3;
use std::collections::BTreeSet;
use tracing::{debug, info};

/// Surface remeshing followed by Delaunay tetrahedralization
#[derive(Debug, Default)]
pub struct TetGenBackend;

/// Surface remeshing only; volume requests are refused
#[derive(Debug, Default)]
pub struct SurfaceOnlyBackend;

fn check_walls(request: &MeshRequest<'_>) -> Result<()> {
    if let Some(spec) = request.boundary_layer {
        let unmarked: Vec<i32> = spec
            .wall_face_ids
            .iter()
            .filter(|id| !request.walls.contains(id))
            .copied()
            .collect();
        if !unmarked.is_empty() {
            return Err(Error::WallFacesRequired(unmarked));
        }
    }
    Ok(())
}

/// Remesh, bisect or pass through the bounding surface per the options
fn surface_stage(request: &MeshRequest<'_>, sizing: &SizingField<'_>) -> Result<SurfaceMesh> {
    let options = request.options;
    let surface = request.surface;
    let size = |p: &Point3<f64>, face: i32| sizing.size_on_face(p, face);
    let params = RemeshParams::default().with_coplanar_merge(!options.no_merge);
    let wrap = |err: Error| match err {
        Error::MeshGenerationFailure { .. } => err,
        other => failure(other.to_string(), sizing),
    };

    if !options.surface_mesh_flag {
        if options.no_bisect {
            return Ok(surface.clone());
        }
        return bisect(surface, size, &params).map(|o| o.mesh).map_err(wrap);
    }

    if options.mesh_wall_first && !request.walls.is_empty() {
        let others: BTreeSet<i32> = surface.face_id_set().difference(request.walls).copied().collect();
        let walls = remesh(surface, size, &params.clone().with_frozen_faces(others)).map_err(wrap)?;
        debug!("wall faces remeshed first: {} triangles", walls.mesh.triangle_count());
        let rest = remesh(&walls.mesh, size, &params.with_frozen_faces(request.walls.clone())).map_err(wrap)?;
        return Ok(rest.mesh);
    }
    remesh(surface, size, &params).map(|o| o.mesh).map_err(wrap)
}

/// Tetrahedra (and wedges when layers are requested) bounded by `surface`.
///
/// Returns the surface with boundary recovery splits applied alongside the
/// volume, so every output triangle matches the cells behind it.
fn volume_stage(
    request: &MeshRequest<'_>,
    surface: &SurfaceMesh,
    sizing: &SizingField<'_>,
    report: &mut MeshReport,
) -> Result<(SurfaceMesh, VolumeMesh)> {
    let options = request.options;
    let params = VolumeParams {
        quality_ratio: options.quality_ratio,
        passes: options.optimization,
        epsilon: options.epsilon,
        seed: request.seed,
        parallel: request.parallel,
    };

    let Some(spec) = request.boundary_layer else {
        let output = tetrahedralize(surface, sizing, &params)?;
        report.recovered_fraction = output.recovered_fraction;
        report.steiner_points = output.steiner_points;
        return Ok((output.surface, output.mesh));
    };

    let mut layers = extrude_layers(surface, spec, sizing)?;
    let output = tetrahedralize(&layers.inner, sizing, &params)?;
    report.recovered_fraction = output.recovered_fraction;
    report.steiner_points = output.steiner_points;

    // Tetrahedra number the layer points exactly as the extrusion does
    let mut mesh = output.mesh;
    if mesh.points.len() < layers.points.len() {
        return Err(failure("layer points were not carried into the volume mesh", sizing));
    }
    let mut walls = surface.clone();
    let split_walls = layers.conform(&output.splits, &mut walls, &mut mesh);
    if split_walls > 0 {
        debug!("boundary layer: {} wall edges split through every layer", split_walls);
    }
    mesh.cells.extend(layers.wedges.iter().map(|w| Cell::wedge(*w)));
    info!(
        "boundary layer: {} wedges {}",
        layers.wedges.len(),
        match spec.insertion_side {
            InsertionSide::Inward => "inside the wall",
            InsertionSide::Outward => "outside the wall",
        }
    );
    Ok((walls, mesh))
}

impl MeshKernel for TetGenBackend {
    fn kind(&self) -> MeshKernelKind {
        MeshKernelKind::TetGen
    }

    fn generate(&self, request: &MeshRequest<'_>) -> Result<MeshOutput> {
        request.options.validate()?;
        check_walls(request)?;
        let sizing = SizingField::new(request.surface, request.options, request.regions)?;
        info!("generating mesh: {}", sizing.describe());

        let surface = surface_stage(request, &sizing)?;
        let mut report = MeshReport::default();
        let (surface, volume) = if request.options.volume_mesh_flag {
            let (recovered, volume) = volume_stage(request, &surface, &sizing, &mut report)?;
            (recovered, Some(volume))
        } else {
            (surface, None)
        };
        report.measure(&surface, volume.as_ref(), request.options.quality_ratio, request.parallel);
        Ok(MeshOutput { surface, volume, report })
    }
}

impl MeshKernel for SurfaceOnlyBackend {
    fn kind(&self) -> MeshKernelKind {
        MeshKernelKind::SurfaceOnly
    }

    fn generate(&self, request: &MeshRequest<'_>) -> Result<MeshOutput> {
        request.options.validate()?;
        check_walls(request)?;
        let sizing = SizingField::new(request.surface, request.options, request.regions)?;
        if request.options.volume_mesh_flag || request.boundary_layer.is_some() {
            return Err(failure(
                format!("the {} kernel does not generate volume meshes", self.kind()),
                &sizing,
            ));
        }

        let surface = surface_stage(request, &sizing)?;
        let mut report = MeshReport::default();
        report.measure(&surface, None, request.options.quality_ratio, request.parallel);
        Ok(MeshOutput {
            surface,
            volume: None,
            report,
        })
    }
}
