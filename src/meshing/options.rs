// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! Typed mesh generation options
//!
//! Options are set one key at a time with [`MeshOptions::set`] or read as a
//! whole from a TOML table. Both paths reject unknown keys.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A single option value as passed to [`MeshOptions::set`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OptionValue {
    Bool(bool),
    Int(i64),
    Float(f64),
}

impl OptionValue {
    fn as_f64(self) -> f64 {
        match self {
            OptionValue::Bool(b) => f64::from(u8::from(b)),
            OptionValue::Int(i) => i as f64,
            OptionValue::Float(f) => f,
        }
    }
}

impl From<bool> for OptionValue {
    fn from(value: bool) -> Self {
        OptionValue::Bool(value)
    }
}

impl From<i64> for OptionValue {
    fn from(value: i64) -> Self {
        OptionValue::Int(value)
    }
}

impl From<i32> for OptionValue {
    fn from(value: i32) -> Self {
        OptionValue::Int(i64::from(value))
    }
}

impl From<f64> for OptionValue {
    fn from(value: f64) -> Self {
        OptionValue::Float(value)
    }
}

impl fmt::Display for OptionValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OptionValue::Bool(b) => write!(f, "{}", b),
            OptionValue::Int(i) => write!(f, "{}", i),
            OptionValue::Float(x) => write!(f, "{}", x),
        }
    }
}

/// Recognized option keys
pub const OPTION_KEYS: [&str; 10] = [
    "SurfaceMeshFlag",
    "VolumeMeshFlag",
    "GlobalEdgeSize",
    "LocalEdgeSize",
    "MeshWallFirst",
    "NoMerge",
    "NoBisect",
    "Epsilon",
    "Optimization",
    "QualityRatio",
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields, rename_all = "PascalCase")]
pub struct MeshOptions {
    /// Remesh the boundary surface
    pub surface_mesh_flag: bool,
    /// Fill the domain with tetrahedra
    pub volume_mesh_flag: bool,
    /// Background edge length; derived from the model size when unset
    pub global_edge_size: Option<f64>,
    /// Per-face edge lengths as (face id, size)
    pub local_edge_size: Vec<(i32, f64)>,
    /// Remesh wall faces before the remaining faces
    pub mesh_wall_first: bool,
    /// Keep every face border as a feature line, even between coplanar faces
    pub no_merge: bool,
    /// Leave the input surface untouched when it is not remeshed
    pub no_bisect: bool,
    /// Tolerance for coincident points and coplanarity
    pub epsilon: f64,
    /// Number of quality refinement passes
    pub optimization: u32,
    /// Radius-edge ratio bound for tetrahedra
    pub quality_ratio: f64,
}

impl Default for MeshOptions {
    fn default() -> Self {
        Self {
            surface_mesh_flag: true,
            volume_mesh_flag: true,
            global_edge_size: None,
            local_edge_size: Vec::new(),
            mesh_wall_first: false,
            no_merge: false,
            no_bisect: false,
            epsilon: 1e-8,
            optimization: 3,
            quality_ratio: 1.4,
        }
    }
}

fn invalid(key: &str, reason: impl Into<String>) -> Error {
    Error::InvalidOption {
        key: key.to_string(),
        reason: reason.into(),
    }
}

fn single(key: &str, values: &[OptionValue]) -> Result<OptionValue> {
    match values {
        [value] => Ok(*value),
        _ => Err(invalid(key, format!("expected one value, got {}", values.len()))),
    }
}

fn flag(key: &str, values: &[OptionValue]) -> Result<bool> {
    match single(key, values)? {
        OptionValue::Bool(b) => Ok(b),
        OptionValue::Int(0) => Ok(false),
        OptionValue::Int(1) => Ok(true),
        other => Err(invalid(key, format!("expected a flag, got {}", other))),
    }
}

fn positive(key: &str, values: &[OptionValue]) -> Result<f64> {
    let value = match single(key, values)? {
        OptionValue::Bool(_) => return Err(invalid(key, "expected a number, got a flag")),
        other => other.as_f64(),
    };
    if value.is_finite() && value > 0.0 {
        Ok(value)
    } else {
        Err(invalid(key, format!("must be positive, got {}", value)))
    }
}

fn face_id(key: &str, value: OptionValue) -> Result<i32> {
    match value {
        OptionValue::Int(id) if id > 0 && id <= i64::from(i32::MAX) => Ok(id as i32),
        OptionValue::Float(id) if id > 0.0 && id.fract() == 0.0 && id <= f64::from(i32::MAX) => Ok(id as i32),
        other => Err(invalid(key, format!("{} is not a face id", other))),
    }
}

impl MeshOptions {
    /// Set one option from its values
    pub fn set(&mut self, key: &str, values: &[OptionValue]) -> Result<()> {
        match key {
            "SurfaceMeshFlag" => self.surface_mesh_flag = flag(key, values)?,
            "VolumeMeshFlag" => self.volume_mesh_flag = flag(key, values)?,
            "MeshWallFirst" => self.mesh_wall_first = flag(key, values)?,
            "NoMerge" => self.no_merge = flag(key, values)?,
            "NoBisect" => self.no_bisect = flag(key, values)?,
            "GlobalEdgeSize" => self.global_edge_size = Some(positive(key, values)?),
            "Epsilon" => self.epsilon = positive(key, values)?,
            "QualityRatio" => {
                let ratio = positive(key, values)?;
                if ratio < 1.0 {
                    return Err(invalid(key, format!("radius-edge bound {} is below 1", ratio)));
                }
                self.quality_ratio = ratio;
            }
            "Optimization" => {
                self.optimization = match single(key, values)? {
                    OptionValue::Int(n) if (0..=100).contains(&n) => n as u32,
                    other => return Err(invalid(key, format!("expected a pass count in 0..=100, got {}", other))),
                }
            }
            "LocalEdgeSize" => {
                if values.is_empty() || values.len() % 2 != 0 {
                    return Err(invalid(key, "expected (face id, size) pairs"));
                }
                for pair in values.chunks(2) {
                    let id = face_id(key, pair[0])?;
                    let size = positive(key, &pair[1..])?;
                    match self.local_edge_size.iter_mut().find(|(existing, _)| *existing == id) {
                        Some(entry) => entry.1 = size,
                        None => self.local_edge_size.push((id, size)),
                    }
                }
            }
            other => return Err(Error::UnknownOption(other.to_string())),
        }
        Ok(())
    }

    /// Parse a TOML table of options
    pub fn from_toml(source: &str) -> Result<Self> {
        let options: MeshOptions = toml::from_str(source).map_err(|err| {
            let message = err.message().to_string();
            match message
                .strip_prefix("unknown field `")
                .and_then(|rest| rest.split('`').next())
            {
                Some(field) => Error::UnknownOption(field.to_string()),
                None => invalid("toml", message),
            }
        })?;
        options.validate()?;
        Ok(options)
    }

    /// Check value ranges of options that bypassed [`MeshOptions::set`]
    pub fn validate(&self) -> Result<()> {
        if let Some(size) = self.global_edge_size {
            positive("GlobalEdgeSize", &[OptionValue::Float(size)])?;
        }
        for &(id, size) in &self.local_edge_size {
            face_id("LocalEdgeSize", OptionValue::Int(i64::from(id)))?;
            positive("LocalEdgeSize", &[OptionValue::Float(size)])?;
        }
        positive("Epsilon", &[OptionValue::Float(self.epsilon)])?;
        if !(self.quality_ratio >= 1.0 && self.quality_ratio.is_finite()) {
            return Err(invalid("QualityRatio", format!("radius-edge bound {} is below 1", self.quality_ratio)));
        }
        Ok(())
    }

    /// Edge size requested for one face, if any
    pub fn local_size(&self, face: i32) -> Option<f64> {
        self.local_edge_size
            .iter()
            .find(|(id, _)| *id == face)
            .map(|(_, size)| *size)
    }
}

impl fmt::Display for MeshOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SurfaceMeshFlag={} VolumeMeshFlag={} GlobalEdgeSize={}",
            self.surface_mesh_flag,
            self.volume_mesh_flag,
            self.global_edge_size
                .map_or_else(|| "auto".to_string(), |s| s.to_string())
        )?;
        for (id, size) in &self.local_edge_size {
            write!(f, " LocalEdgeSize[{}]={}", id, size)?;
        }
        write!(
            f,
            " MeshWallFirst={} NoMerge={} NoBisect={} Epsilon={} Optimization={} QualityRatio={}",
            self.mesh_wall_first, self.no_merge, self.no_bisect, self.epsilon, self.optimization, self.quality_ratio
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = MeshOptions::default();
        assert!(options.surface_mesh_flag);
        assert!(options.volume_mesh_flag);
        assert_eq!(options.optimization, 3);
        assert_eq!(options.quality_ratio, 1.4);
        assert_eq!(options.epsilon, 1e-8);
    }

    #[test]
    fn test_set_known_keys() {
        let mut options = MeshOptions::default();
        options.set("GlobalEdgeSize", &[0.5.into()]).unwrap();
        options.set("VolumeMeshFlag", &[0.into()]).unwrap();
        options.set("NoBisect", &[true.into()]).unwrap();
        options.set("Optimization", &[5.into()]).unwrap();
        options
            .set("LocalEdgeSize", &[2.into(), 0.1.into(), 3.into(), 0.2.into()])
            .unwrap();
        options.set("LocalEdgeSize", &[2.into(), 0.05.into()]).unwrap();

        assert_eq!(options.global_edge_size, Some(0.5));
        assert!(!options.volume_mesh_flag);
        assert!(options.no_bisect);
        assert_eq!(options.optimization, 5);
        assert_eq!(options.local_size(2), Some(0.05));
        assert_eq!(options.local_size(3), Some(0.2));
        assert_eq!(options.local_size(4), None);
    }

    #[test]
    fn test_rejects_unknown_and_invalid() {
        let mut options = MeshOptions::default();
        assert!(matches!(
            options.set("GlobalEdgSize", &[0.5.into()]),
            Err(Error::UnknownOption(key)) if key == "GlobalEdgSize"
        ));
        assert!(matches!(
            options.set("GlobalEdgeSize", &[(-1.0).into()]),
            Err(Error::InvalidOption { .. })
        ));
        assert!(options.set("QualityRatio", &[0.5.into()]).is_err());
        assert!(options.set("LocalEdgeSize", &[1.into()]).is_err());
        assert!(options.set("LocalEdgeSize", &[0.into(), 0.1.into()]).is_err());
        assert!(options.set("SurfaceMeshFlag", &[2.into()]).is_err());
        assert_eq!(options, MeshOptions::default());
    }

    #[test]
    fn test_toml_table() {
        let options = MeshOptions::from_toml(
            "GlobalEdgeSize = 0.25\nLocalEdgeSize = [[1, 0.1]]\nMeshWallFirst = true\n",
        )
        .unwrap();
        assert_eq!(options.global_edge_size, Some(0.25));
        assert_eq!(options.local_size(1), Some(0.1));
        assert!(options.mesh_wall_first);

        assert!(matches!(
            MeshOptions::from_toml("GlobalEdgeSise = 0.25\n"),
            Err(Error::UnknownOption(key)) if key == "GlobalEdgeSise"
        ));
        assert!(MeshOptions::from_toml("Epsilon = -1.0\n").is_err());
    }
}
