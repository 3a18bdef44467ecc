// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! Kernel capability sets
//!
//! A session selects one [`SolidKernel`] and one [`MeshKernel`]. The facade
//! and the mesh pipeline only talk to these traits; operations a backend
//! cannot perform fall through to the default methods, which report a
//! kernel mismatch.

use crate::config::SessionConfig;
use crate::error::{Error, Result};
use crate::geometry::{BooleanOp, SurfaceMesh};
use crate::meshing::{MeshOutput, MeshRequest};
use crate::solid::{BRepKernel, PolyDataKernel, Solid};
use nalgebra::{Point3, Vector3};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// Solid modeling backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SolidKernelKind {
    /// Explicit triangle surfaces
    PolyData,
    /// Analytic boundary representation
    #[serde(alias = "OpenCASCADE")]
    BRep,
}

impl fmt::Display for SolidKernelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SolidKernelKind::PolyData => write!(f, "PolyData"),
            SolidKernelKind::BRep => write!(f, "OpenCASCADE"),
        }
    }
}

impl FromStr for SolidKernelKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "PolyData" | "polydata" => Ok(SolidKernelKind::PolyData),
            "OpenCASCADE" | "BRep" | "brep" => Ok(SolidKernelKind::BRep),
            other => Err(Error::UnknownKernel(other.to_string())),
        }
    }
}

/// Meshing backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MeshKernelKind {
    /// Surface remeshing plus Delaunay tetrahedralization
    TetGen,
    /// Surface remeshing only
    SurfaceOnly,
}

impl fmt::Display for MeshKernelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MeshKernelKind::TetGen => write!(f, "TetGen"),
            MeshKernelKind::SurfaceOnly => write!(f, "SurfaceOnly"),
        }
    }
}

impl FromStr for MeshKernelKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "TetGen" | "tetgen" => Ok(MeshKernelKind::TetGen),
            "SurfaceOnly" | "surface" => Ok(MeshKernelKind::SurfaceOnly),
            other => Err(Error::UnknownKernel(other.to_string())),
        }
    }
}

/// How coincident faces of boolean operands are labelled in the result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FaceMergePolicy {
    /// Coplanar faces meeting across operands share one id
    #[default]
    All,
    /// Every input face keeps a distinct id
    None,
}

impl FromStr for FaceMergePolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "All" | "all" => Ok(FaceMergePolicy::All),
            "None" | "none" => Ok(FaceMergePolicy::None),
            other => Err(Error::invalid(format!("unknown face merge policy '{}'", other))),
        }
    }
}

/// Solid modeling capability set
pub trait SolidKernel: Send + Sync {
    fn kind(&self) -> SolidKernelKind;

    fn cylinder(&self, center: Point3<f64>, axis: Vector3<f64>, radius: f64, length: f64) -> Result<Solid>;
    fn sphere(&self, center: Point3<f64>, radius: f64) -> Result<Solid>;
    fn cuboid(&self, center: Point3<f64>, half_extents: Vector3<f64>) -> Result<Solid>;
    fn ellipsoid(&self, center: Point3<f64>, semi_axes: Vector3<f64>) -> Result<Solid>;

    fn boolean(&self, op: BooleanOp, a: &Solid, b: &Solid, policy: FaceMergePolicy) -> Result<Solid>;

    /// Segment the boundary into faces at the given feature angle
    fn extract_boundary_faces(&self, solid: &Solid, feature_angle_deg: f64) -> Result<Solid>;

    /// Triangle surface of the solid, tessellated to `tolerance` where applicable
    fn to_polydata(&self, solid: &Solid, tolerance: f64) -> Result<SurfaceMesh>;

    fn face_ids(&self, solid: &Solid) -> Result<Vec<i32>>;
    fn combine_faces(&self, solid: &Solid, keep_id: i32, merge_id: i32) -> Result<Solid>;
    fn delete_faces(&self, solid: &Solid, ids: &[i32]) -> Result<Solid>;

    fn remesh_faces(&self, _solid: &Solid, _ids: &[i32], _edge_size: f64) -> Result<Solid> {
        Err(Error::mismatch("remesh_faces", self.kind()))
    }

    fn create_edge_blend(&self, _solid: &Solid, _face_a: i32, _face_b: i32, _radius: f64) -> Result<Solid> {
        Err(Error::mismatch("create_edge_blend", self.kind()))
    }

    fn face_attribute(&self, _solid: &Solid, _key: &str, _face: i32) -> Result<Option<String>> {
        Err(Error::mismatch("face_attribute", self.kind()))
    }

    fn set_face_attribute(&self, _solid: &Solid, _key: &str, _value: &str, _face: i32) -> Result<Solid> {
        Err(Error::mismatch("set_face_attribute", self.kind()))
    }

    fn write_native(&self, solid: &Solid, path: &Path) -> Result<()>;
    fn read_native(&self, path: &Path) -> Result<Solid>;
}

/// Meshing capability set
pub trait MeshKernel: Send + Sync {
    fn kind(&self) -> MeshKernelKind;

    /// Mesh the bounded domain described by `request`, or report why not
    fn generate(&self, request: &MeshRequest<'_>) -> Result<MeshOutput>;
}

/// Instantiate the solid backend for `kind`
pub fn solid_kernel(kind: SolidKernelKind, config: &SessionConfig) -> Box<dyn SolidKernel> {
    match kind {
        SolidKernelKind::PolyData => Box::new(PolyDataKernel::new(config.polydata_resolution)),
        SolidKernelKind::BRep => Box::new(BRepKernel::new(config.tessellation_tolerance)),
    }
}

/// Instantiate the meshing backend for `kind`
pub fn mesh_kernel(kind: MeshKernelKind) -> Box<dyn MeshKernel> {
    crate::meshing::backend(kind)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kernel_names() {
        assert_eq!("PolyData".parse::<SolidKernelKind>().unwrap(), SolidKernelKind::PolyData);
        assert_eq!("OpenCASCADE".parse::<SolidKernelKind>().unwrap(), SolidKernelKind::BRep);
        assert!(matches!("Parasolid".parse::<SolidKernelKind>(), Err(Error::UnknownKernel(_))));
        assert_eq!("TetGen".parse::<MeshKernelKind>().unwrap(), MeshKernelKind::TetGen);
        assert_eq!(SolidKernelKind::BRep.to_string(), "OpenCASCADE");
    }

    #[test]
    fn test_merge_policy() {
        assert_eq!("All".parse::<FaceMergePolicy>().unwrap(), FaceMergePolicy::All);
        assert_eq!("None".parse::<FaceMergePolicy>().unwrap(), FaceMergePolicy::None);
        assert!("Some".parse::<FaceMergePolicy>().is_err());
    }

    #[test]
    fn test_polydata_rejects_brep_only_operations() {
        let kernel = solid_kernel(SolidKernelKind::PolyData, &SessionConfig::default());
        let solid = kernel
            .cylinder(Point3::origin(), Vector3::z(), 1.0, 2.0)
            .unwrap();
        assert!(matches!(
            kernel.create_edge_blend(&solid, 1, 2, 0.1),
            Err(Error::KernelMismatch { .. })
        ));
        assert!(matches!(
            kernel.face_attribute(&solid, "gdscname", 1),
            Err(Error::KernelMismatch { .. })
        ));
    }
}
