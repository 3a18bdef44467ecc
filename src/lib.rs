// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! Solidmesh
//!
//! Kernel-polymorphic solid modeling and mesh generation. Build solids under
//! an explicit-polygon or boundary-representation kernel, extract their
//! boundary faces, mesh them under composable sizing constraints and smooth
//! marked regions of the result.

pub mod config;
pub mod error;
pub mod geometry;
pub mod io;
pub mod kernel;
pub mod meshing;
pub mod session;
pub mod smooth;
pub mod solid;
pub mod store;

pub use config::SessionConfig;
pub use error::{Error, Result};
pub use geometry::{Association, BooleanOp, DataArray, SurfaceMesh, VolumeMesh};
pub use kernel::{FaceMergePolicy, MeshKernel, MeshKernelKind, SolidKernel, SolidKernelKind};
pub use meshing::{BoundaryLayerSpec, MeshOptions, MeshPipeline, MeshReport, MeshState, OptionValue, RefinementRegion};
pub use session::Session;
pub use smooth::{ConversionRule, SmoothParams};
pub use solid::Solid;
pub use store::{Object, ObjectStore};
