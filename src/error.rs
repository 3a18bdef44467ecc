// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! Error taxonomy shared by the facade, the mesh pipeline and the smoothing operator

use thiserror::Error;

/// Errors reported by solid modeling and meshing operations
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid geometry: {0}")]
    InvalidGeometry(String),

    #[error("operation '{operation}' is not supported by the {kernel} kernel")]
    KernelMismatch { operation: String, kernel: String },

    #[error("boolean operation failed: {0}")]
    BooleanFailure(String),

    #[error("operation produced a non-manifold result: {0}")]
    NonManifoldResult(String),

    #[error("face id {0} does not exist")]
    MissingFaceId(i32),

    #[error("boundary faces have not been extracted")]
    FacesNotExtracted,

    #[error("unknown mesh option '{0}'")]
    UnknownOption(String),

    #[error("invalid value for option '{key}': {reason}")]
    InvalidOption { key: String, reason: String },

    #[error("boundary layer references faces not marked as walls: {0:?}")]
    WallFacesRequired(Vec<i32>),

    #[error("mesh generation failed: {reason} (active constraints: {context})")]
    MeshGenerationFailure { reason: String, context: String },

    #[error("I/O failure: {0}")]
    IOFailure(String),

    #[error("object '{0}' not found")]
    NotFound(String),

    #[error("unknown kernel '{0}'")]
    UnknownKernel(String),

    #[error("cannot {operation} while mesh is in state {state}")]
    InvalidState { operation: String, state: String },

    #[error("array '{0}' not found")]
    MissingArray(String),

    #[error("object '{name}' is not a {expected}")]
    TypeMismatch { name: String, expected: String },
}

impl Error {
    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        Error::InvalidGeometry(msg.into())
    }

    pub(crate) fn mismatch(operation: &str, kernel: impl std::fmt::Display) -> Self {
        Error::KernelMismatch {
            operation: operation.to_string(),
            kernel: kernel.to_string(),
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::IOFailure(err.to_string())
    }
}

impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Error::IOFailure(format!("{:#}", err))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::IOFailure(err.to_string())
    }
}

/// Result alias used across the crate
pub type Result<T> = std::result::Result<T, Error>;
