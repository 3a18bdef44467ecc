// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! Session configuration system

use crate::kernel::{MeshKernelKind, SolidKernelKind};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default configuration file looked up by [`SessionConfig::load`]
pub const CONFIG_FILE: &str = "solidmesh.toml";

/// Session configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Solid modeling kernel selected at session start
    pub solid_kernel: SolidKernelKind,
    /// Meshing kernel selected at session start
    pub mesh_kernel: MeshKernelKind,
    /// Chord tolerance used when tessellating analytic solids
    pub tessellation_tolerance: f64,
    /// Angular segment count of polygonal primitives
    pub polydata_resolution: usize,
    /// Feature angle used when none is given
    pub default_feature_angle: f64,
    /// Seed for interior point jitter in the volume mesher
    pub seed: u64,
    /// Run per-element work on the rayon pool
    pub parallel: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            solid_kernel: SolidKernelKind::PolyData,
            mesh_kernel: MeshKernelKind::TetGen,
            tessellation_tolerance: 1e-3,
            polydata_resolution: 36,
            default_feature_angle: 50.0,
            seed: 0x5eed,
            parallel: true,
        }
    }
}

impl SessionConfig {
    /// Load configuration from file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {:?}", path.as_ref()))?;
        let config: SessionConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path.as_ref()))?;
        Ok(config)
    }

    /// Load configuration with environment variable overrides
    pub fn load() -> Result<Self> {
        let mut config = if PathBuf::from(CONFIG_FILE).exists() {
            Self::from_file(CONFIG_FILE)?
        } else {
            Self::default()
        };
        config.apply_env()?;
        Ok(config)
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(kernel) = std::env::var("SOLIDMESH_SOLID_KERNEL") {
            self.solid_kernel = kernel
                .parse()
                .with_context(|| format!("Invalid SOLIDMESH_SOLID_KERNEL: {}", kernel))?;
        }

        if let Ok(kernel) = std::env::var("SOLIDMESH_MESH_KERNEL") {
            self.mesh_kernel = kernel
                .parse()
                .with_context(|| format!("Invalid SOLIDMESH_MESH_KERNEL: {}", kernel))?;
        }

        if let Ok(seed) = std::env::var("SOLIDMESH_SEED") {
            self.seed = seed
                .parse()
                .with_context(|| format!("Invalid SOLIDMESH_SEED: {}", seed))?;
        }

        Ok(())
    }

    /// Save configuration to file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(path.as_ref(), content)
            .with_context(|| format!("Failed to write config file: {:?}", path.as_ref()))?;
        Ok(())
    }
}
