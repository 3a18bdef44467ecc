// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! I/O module - portable mesh files and STL exchange

mod stl;
pub mod vtk;

pub use stl::{export_stl, import_stl};
pub use vtk::{
    read_dataset, read_polydata, read_unstructured_grid, write_polydata, write_unstructured_grid, VtkDataset,
    VtkEncoding,
};
