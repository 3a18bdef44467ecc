// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! Meshing module - sizing, remeshing, tetrahedralization and the mesh pipeline

mod backend;
pub mod boundary_layer;
pub mod centerlines;
pub mod delaunay;
pub mod options;
pub mod pipeline;
pub mod remesh;
pub mod sizing;
pub mod volume;

pub use backend::{SurfaceOnlyBackend, TetGenBackend};
pub use boundary_layer::{BoundaryLayerSpec, InsertionSide, LayerType};
pub use centerlines::{distance_to_centerlines, CenterlineExtractor, MedialCenterlines};
pub use options::{MeshOptions, OptionValue};
pub use pipeline::{MeshPipeline, MeshState};
pub use remesh::{remesh_surface, RemeshParams};
pub use sizing::{RefinementRegion, SizingField};

use crate::geometry::{CellType, SurfaceMesh, VolumeMesh};
use crate::kernel::{MeshKernel, MeshKernelKind};
use nalgebra::Point3;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Everything a backend needs to mesh one domain
#[derive(Debug, Clone, Copy)]
pub struct MeshRequest<'a> {
    /// Closed bounding surface, with face ids when faces were extracted
    pub surface: &'a SurfaceMesh,
    pub options: &'a MeshOptions,
    pub regions: &'a [RefinementRegion],
    pub walls: &'a BTreeSet<i32>,
    pub boundary_layer: Option<&'a BoundaryLayerSpec>,
    pub seed: u64,
    pub parallel: bool,
}

/// Result of a successful generation
#[derive(Debug, Clone)]
pub struct MeshOutput {
    pub surface: SurfaceMesh,
    pub volume: Option<VolumeMesh>,
    pub report: MeshReport,
}

/// Quality metrics attached to every generated mesh
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MeshReport {
    pub surface_triangles: usize,
    pub tetrahedra: usize,
    pub wedges: usize,
    /// Smallest dihedral angle over all tetrahedra, in degrees
    pub min_dihedral: f64,
    pub mean_radius_edge: f64,
    pub max_radius_edge: f64,
    /// Tetrahedra whose radius-edge ratio exceeds the quality bound
    pub poor_tetrahedra: usize,
    pub min_edge: f64,
    pub mean_edge: f64,
    pub max_edge: f64,
    /// Fraction of boundary triangles present as tetrahedron faces
    pub recovered_fraction: f64,
    pub steiner_points: usize,
}

impl MeshReport {
    /// Fill the counts and shape statistics from the generated meshes
    pub fn measure(&mut self, surface: &SurfaceMesh, volume: Option<&VolumeMesh>, quality_ratio: f64, parallel: bool) {
        self.surface_triangles = surface.triangle_count();
        let lengths = match volume {
            Some(mesh) => mesh.edge_lengths(),
            None => surface.edge_lengths(),
        };
        if !lengths.is_empty() {
            self.min_edge = lengths.iter().copied().fold(f64::INFINITY, f64::min);
            self.max_edge = lengths.iter().copied().fold(0.0, f64::max);
            self.mean_edge = lengths.iter().sum::<f64>() / lengths.len() as f64;
        }

        let Some(mesh) = volume else {
            return;
        };
        self.tetrahedra = mesh.count_of(CellType::Tetra);
        self.wedges = mesh.count_of(CellType::Wedge);
        let corners: Vec<[Point3<f64>; 4]> = mesh
            .cells
            .iter()
            .filter(|c| c.kind == CellType::Tetra)
            .map(|c| [0, 1, 2, 3].map(|k| mesh.points[c.points[k]]))
            .collect();
        let qualities: Vec<volume::TetQuality> = if parallel {
            corners.par_iter().map(volume::tet_quality).collect()
        } else {
            corners.iter().map(volume::tet_quality).collect()
        };
        if qualities.is_empty() {
            return;
        }
        self.min_dihedral = qualities.iter().map(|q| q.min_dihedral).fold(180.0, f64::min);
        self.max_radius_edge = qualities.iter().map(|q| q.radius_edge_ratio).fold(0.0, f64::max);
        self.mean_radius_edge = qualities.iter().map(|q| q.radius_edge_ratio).sum::<f64>() / qualities.len() as f64;
        self.poor_tetrahedra = qualities.iter().filter(|q| q.radius_edge_ratio > quality_ratio).count();
    }
}

impl fmt::Display for MeshReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "surface triangles: {}", self.surface_triangles)?;
        writeln!(f, "tetrahedra: {} ({} poorly shaped)", self.tetrahedra, self.poor_tetrahedra)?;
        writeln!(f, "wedges: {}", self.wedges)?;
        writeln!(f, "min dihedral angle: {:.2} deg", self.min_dihedral)?;
        writeln!(
            f,
            "radius-edge ratio: mean {:.3}, max {:.3}",
            self.mean_radius_edge, self.max_radius_edge
        )?;
        write!(
            f,
            "edge length: min {:.4}, mean {:.4}, max {:.4}",
            self.min_edge, self.mean_edge, self.max_edge
        )
    }
}

/// Instantiate the backend for `kind`
pub fn backend(kind: MeshKernelKind) -> Box<dyn MeshKernel> {
    match kind {
        MeshKernelKind::TetGen => Box::new(TetGenBackend),
        MeshKernelKind::SurfaceOnly => Box::new(SurfaceOnlyBackend),
    }
}
