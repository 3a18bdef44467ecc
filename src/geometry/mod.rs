// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! Geometry module - mesh representation and operations

mod arrays;
mod bbox;
pub mod csg;
pub mod faces;
pub mod locator;
mod mesh;
pub mod mesh_utils;
pub mod primitives;

pub use arrays::{ArrayValues, Association, DataArray};
pub use bbox::BoundingBox;
pub use csg::BooleanOp;
pub use faces::FaceInfo;
pub use locator::SurfaceLocator;
pub use mesh::{tet_signed_volume, Cell, CellType, SurfaceMesh, VolumeMesh, FACE_ID_ARRAY};
pub use mesh_utils::{validate_mesh, MeshValidation};
