// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! Sizing field assembly
//!
//! The requested edge length at a point is the minimum of the background
//! size, the target of every refinement region containing the point, every
//! distance-field source, and the local size of the face being meshed.

use super::options::MeshOptions;
use crate::error::{Error, Result};
use crate::geometry::{SurfaceLocator, SurfaceMesh};
use nalgebra::{Point3, Vector3};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Distance-field sizes never drop below this fraction of the background size
const FIELD_FLOOR: f64 = 0.02;

/// Background size used when no global edge size is configured
const DEFAULT_DIVISIONS: f64 = 20.0;

/// A region of space with its own target edge length
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RefinementRegion {
    Sphere {
        center: Point3<f64>,
        radius: f64,
        target_size: f64,
    },
    /// Finite cylinder centered at `center`, extending `length / 2` along `axis` both ways
    Cylinder {
        center: Point3<f64>,
        axis: Vector3<f64>,
        radius: f64,
        length: f64,
        target_size: f64,
    },
    /// Sizes scaled by a point array of the surface being meshed
    DistanceField { array: String, target_size: f64 },
}

fn positive(what: &str, value: f64) -> Result<f64> {
    if value.is_finite() && value > 0.0 {
        Ok(value)
    } else {
        Err(Error::invalid(format!("{} must be positive, got {}", what, value)))
    }
}

impl RefinementRegion {
    pub fn sphere(target_size: f64, radius: f64, center: Point3<f64>) -> Result<Self> {
        if !center.iter().all(|c| c.is_finite()) {
            return Err(Error::invalid("sphere refinement center is not finite"));
        }
        Ok(RefinementRegion::Sphere {
            center,
            radius: positive("refinement radius", radius)?,
            target_size: positive("refinement size", target_size)?,
        })
    }

    pub fn cylinder(target_size: f64, radius: f64, length: f64, center: Point3<f64>, axis: Vector3<f64>) -> Result<Self> {
        if !center.iter().all(|c| c.is_finite()) {
            return Err(Error::invalid("cylinder refinement center is not finite"));
        }
        let norm = axis.norm();
        if !norm.is_finite() || norm < 1e-12 {
            return Err(Error::invalid("cylinder refinement axis has near-zero length"));
        }
        Ok(RefinementRegion::Cylinder {
            center,
            axis: axis / norm,
            radius: positive("refinement radius", radius)?,
            length: positive("refinement length", length)?,
            target_size: positive("refinement size", target_size)?,
        })
    }

    pub fn distance_field(target_size: f64, array: impl Into<String>) -> Result<Self> {
        Ok(RefinementRegion::DistanceField {
            array: array.into(),
            target_size: positive("size function scale", target_size)?,
        })
    }

    pub fn target_size(&self) -> f64 {
        match self {
            RefinementRegion::Sphere { target_size, .. }
            | RefinementRegion::Cylinder { target_size, .. }
            | RefinementRegion::DistanceField { target_size, .. } => *target_size,
        }
    }

    /// Whether `p` lies in the region; distance fields cover everything
    pub fn contains(&self, p: &Point3<f64>) -> bool {
        match self {
            RefinementRegion::Sphere { center, radius, .. } => (p - center).norm_squared() <= radius * radius,
            RefinementRegion::Cylinder {
                center,
                axis,
                radius,
                length,
                ..
            } => {
                let d = p - center;
                let along = d.dot(axis);
                along.abs() <= length / 2.0 && (d - axis * along).norm_squared() <= radius * radius
            }
            RefinementRegion::DistanceField { .. } => true,
        }
    }
}

impl fmt::Display for RefinementRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RefinementRegion::Sphere {
                center,
                radius,
                target_size,
            } => write!(
                f,
                "sphere refinement r={} at ({}, {}, {}) size {}",
                radius, center.x, center.y, center.z, target_size
            ),
            RefinementRegion::Cylinder {
                center,
                radius,
                length,
                target_size,
                ..
            } => write!(
                f,
                "cylinder refinement r={} l={} at ({}, {}, {}) size {}",
                radius, length, center.x, center.y, center.z, target_size
            ),
            RefinementRegion::DistanceField { array, target_size } => {
                write!(f, "size function '{}' scaled by {}", array, target_size)
            }
        }
    }
}

/// Background size for a surface with no configured global edge size
pub fn default_global_size(surface: &SurfaceMesh) -> f64 {
    surface.bounding_box().diagonal() / DEFAULT_DIVISIONS
}

struct FieldSource<'a> {
    locator: SurfaceLocator<'a>,
    values: &'a [f64],
    scale: f64,
    floor: f64,
}

impl FieldSource<'_> {
    fn at(&self, p: &Point3<f64>) -> f64 {
        let Some((t, q)) = self.locator.closest(p) else {
            return f64::INFINITY;
        };
        let mesh = self.locator.mesh();
        let tri = mesh.triangles[t];
        let [a, b, c] = mesh.triangle_points(t);
        let w = barycentric(&q, &a, &b, &c);
        let value: f64 = (0..3).map(|k| w[k] * self.values[tri[k]]).sum();
        (self.scale * value).max(self.floor)
    }
}

/// Barycentric weights of `q` in triangle (a, b, c); equal weights when degenerate
fn barycentric(q: &Point3<f64>, a: &Point3<f64>, b: &Point3<f64>, c: &Point3<f64>) -> [f64; 3] {
    let (v0, v1, v2) = (b - a, c - a, q - a);
    let (d00, d01, d11) = (v0.dot(&v0), v0.dot(&v1), v1.dot(&v1));
    let (d20, d21) = (v2.dot(&v0), v2.dot(&v1));
    let denom = d00 * d11 - d01 * d01;
    if denom.abs() <= f64::EPSILON * d00 * d11 {
        return [1.0 / 3.0; 3];
    }
    let v = (d11 * d20 - d01 * d21) / denom;
    let w = (d00 * d21 - d01 * d20) / denom;
    [1.0 - v - w, v, w]
}

/// Pointwise minimum of all active sizing constraints
pub struct SizingField<'a> {
    global: f64,
    local: BTreeMap<i32, f64>,
    regions: Vec<RefinementRegion>,
    fields: Vec<FieldSource<'a>>,
}

impl<'a> SizingField<'a> {
    /// Uniform field of size `global`
    pub fn uniform(global: f64) -> Result<Self> {
        Ok(Self {
            global: positive("global edge size", global)?,
            local: BTreeMap::new(),
            regions: Vec::new(),
            fields: Vec::new(),
        })
    }

    /// Assemble the field for meshing `surface`. Distance fields read their
    /// point array from `surface`.
    pub fn new(surface: &'a SurfaceMesh, options: &MeshOptions, regions: &[RefinementRegion]) -> Result<Self> {
        let global = options
            .global_edge_size
            .unwrap_or_else(|| default_global_size(surface));
        let mut field = Self::uniform(global)?;
        field.local = options.local_edge_size.iter().copied().collect();

        for region in regions {
            match region {
                RefinementRegion::DistanceField { array, target_size } => {
                    let values = surface
                        .point_array(array)
                        .and_then(|a| if a.components == 1 { a.as_f64() } else { None })
                        .filter(|v| v.len() == surface.point_count())
                        .ok_or_else(|| Error::MissingArray(array.clone()))?;
                    field.fields.push(FieldSource {
                        locator: SurfaceLocator::new(surface),
                        values,
                        scale: *target_size,
                        floor: FIELD_FLOOR * global,
                    });
                    field.regions.push(region.clone());
                }
                _ => field.regions.push(region.clone()),
            }
        }
        Ok(field)
    }

    pub fn global(&self) -> f64 {
        self.global
    }

    /// Smallest size any constraint can request
    pub fn min_size(&self) -> f64 {
        self.regions
            .iter()
            .filter(|r| !matches!(r, RefinementRegion::DistanceField { .. }))
            .map(RefinementRegion::target_size)
            .chain(self.local.values().copied())
            .chain(self.fields.iter().map(|f| f.floor))
            .fold(self.global, f64::min)
    }

    /// Size requested at `p` in the volume
    pub fn at(&self, p: &Point3<f64>) -> f64 {
        let regional = self
            .regions
            .iter()
            .filter(|r| !matches!(r, RefinementRegion::DistanceField { .. }) && r.contains(p))
            .map(RefinementRegion::target_size)
            .fold(self.global, f64::min);
        self.fields.iter().map(|f| f.at(p)).fold(regional, f64::min)
    }

    /// Size requested at `p` on surface face `face`; face 0 means unlabelled
    pub fn size_on_face(&self, p: &Point3<f64>, face: i32) -> f64 {
        let h = self.at(p);
        match self.local.get(&face) {
            Some(&local) => h.min(local),
            None => h,
        }
    }

    /// Sizes at many points, in input order
    pub fn sample(&self, points: &[Point3<f64>]) -> Vec<f64> {
        points.par_iter().map(|p| self.at(p)).collect()
    }

    /// Human-readable list of active constraints for diagnostics
    pub fn describe(&self) -> String {
        let mut parts = vec![format!("global size {}", self.global)];
        parts.extend(self.local.iter().map(|(id, h)| format!("face {} size {}", id, h)));
        parts.extend(self.regions.iter().map(|r| r.to_string()));
        parts.join(", ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::primitives::box_surface;
    use crate::geometry::{Association, DataArray};

    #[test]
    fn test_finer_region_wins() {
        let mut field = SizingField::uniform(0.5).unwrap();
        field.regions.push(RefinementRegion::sphere(0.1, 1.0, Point3::origin()).unwrap());
        field.regions.push(RefinementRegion::sphere(0.2, 2.0, Point3::origin()).unwrap());

        assert_eq!(field.at(&Point3::new(0.5, 0.0, 0.0)), 0.1);
        assert_eq!(field.at(&Point3::new(1.5, 0.0, 0.0)), 0.2);
        assert_eq!(field.at(&Point3::new(3.0, 0.0, 0.0)), 0.5);
        assert_eq!(field.min_size(), 0.1);
    }

    #[test]
    fn test_cylinder_region_is_finite() {
        let region =
            RefinementRegion::cylinder(0.1, 0.5, 2.0, Point3::origin(), Vector3::new(0.0, 0.0, 3.0)).unwrap();
        assert!(region.contains(&Point3::new(0.4, 0.0, 0.9)));
        assert!(!region.contains(&Point3::new(0.4, 0.0, 1.1)));
        assert!(!region.contains(&Point3::new(0.6, 0.0, 0.0)));
        assert!(RefinementRegion::cylinder(0.1, 0.5, 2.0, Point3::origin(), Vector3::zeros()).is_err());
        assert!(RefinementRegion::sphere(-0.1, 0.5, Point3::origin()).is_err());
    }

    #[test]
    fn test_local_face_size() {
        let surface = box_surface(Point3::origin(), Vector3::new(1.0, 1.0, 1.0));
        let mut options = MeshOptions::default();
        options.global_edge_size = Some(0.5);
        options.local_edge_size = vec![(2, 0.25)];
        let field = SizingField::new(&surface, &options, &[]).unwrap();
        let p = Point3::new(1.0, 0.0, 0.0);
        assert_eq!(field.size_on_face(&p, 2), 0.25);
        assert_eq!(field.size_on_face(&p, 1), 0.5);
        assert_eq!(field.at(&p), 0.5);
    }

    #[test]
    fn test_distance_field_interpolates() {
        let mut surface = box_surface(Point3::origin(), Vector3::new(1.0, 1.0, 1.0));
        let values: Vec<f64> = surface.points.iter().map(|p| if p.z > 0.0 { 1.0 } else { 3.0 }).collect();
        surface.set_array(Association::Point, DataArray::scalars_f64("dist", values));

        let mut options = MeshOptions::default();
        options.global_edge_size = Some(1.0);
        let regions = vec![RefinementRegion::distance_field(0.1, "dist").unwrap()];
        let field = SizingField::new(&surface, &options, &regions).unwrap();

        approx::assert_relative_eq!(field.at(&Point3::new(0.0, 0.0, 1.0)), 0.1, epsilon = 1e-12);
        approx::assert_relative_eq!(field.at(&Point3::new(0.0, 0.0, -1.0)), 0.3, epsilon = 1e-12);

        let missing = vec![RefinementRegion::distance_field(0.1, "nope").unwrap()];
        assert!(matches!(
            SizingField::new(&surface, &options, &missing),
            Err(Error::MissingArray(name)) if name == "nope"
        ));
    }
}
