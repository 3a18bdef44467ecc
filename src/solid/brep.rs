// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! Boundary representation kernel
//!
//! Analytic solids keep their defining parameters and intrinsic face ids;
//! tessellation happens on demand. Booleans and face edits are evaluated on
//! a tolerance-driven tessellation and leave a faceted body behind.

use super::{boolean_surfaces, check_axis, check_point, check_positive, Body, Solid};
use crate::error::{Error, Result};
use crate::geometry::faces::{combine_faces, delete_faces};
use crate::geometry::primitives::{box_surface, tessellate_revolved, Frame, Resolution, RevolvedProfile};
use crate::geometry::{Association, BooleanOp, SurfaceMesh, FACE_ID_ARRAY};
use crate::kernel::{FaceMergePolicy, SolidKernel, SolidKernelKind};
use anyhow::Context;
use nalgebra::{Point3, Vector3};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use tracing::{debug, info};

const NATIVE_FORMAT: &str = "solidmesh-brep";
const NATIVE_VERSION: u32 = 1;

/// Reserved attribute holding the face id itself
const ID_ATTRIBUTE: &str = "id";

/// Geometry of a boundary representation body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum BRepShape {
    /// Profile revolved about the frame's `w` axis
    Revolved { frame: Frame, profile: RevolvedProfile },
    /// Axis-aligned box, faces -x, +x, -y, +y, -z, +z as ids 1..6
    Cuboid {
        center: Point3<f64>,
        half_extents: Vector3<f64>,
    },
    /// Result of an operation with no analytic closed form
    Faceted(SurfaceMesh),
}

/// Shape plus per-face string attributes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BRepBody {
    pub shape: BRepShape,
    pub attributes: BTreeMap<i32, BTreeMap<String, String>>,
    /// Face ids are addressable only once boundary faces were extracted
    #[serde(default)]
    pub extracted: bool,
}

impl BRepBody {
    fn new(shape: BRepShape) -> Self {
        Self {
            shape,
            attributes: BTreeMap::new(),
            extracted: false,
        }
    }

    pub fn face_ids(&self) -> BTreeSet<i32> {
        match &self.shape {
            BRepShape::Revolved { profile, .. } => profile.face_ids().into_iter().collect(),
            BRepShape::Cuboid { .. } => (1..=6).collect(),
            BRepShape::Faceted(surface) => surface.face_id_set(),
        }
    }

    pub fn tessellate(&self, tolerance: f64) -> SurfaceMesh {
        match &self.shape {
            BRepShape::Revolved { frame, profile } => tessellate_revolved(profile, frame, Resolution::Tolerance(tolerance)),
            BRepShape::Cuboid { center, half_extents } => box_surface(*center, *half_extents),
            BRepShape::Faceted(surface) => surface.clone(),
        }
    }

    /// Drop attributes of faces that no longer exist
    fn prune_attributes(&mut self) {
        let live = self.face_ids();
        self.attributes.retain(|id, _| live.contains(id));
    }
}

#[derive(Serialize, Deserialize)]
struct NativeFile {
    format: String,
    version: u32,
    body: BRepBody,
}

/// Analytic kernel tessellating to a chord tolerance
#[derive(Debug, Clone)]
pub struct BRepKernel {
    tolerance: f64,
}

impl BRepKernel {
    pub fn new(tolerance: f64) -> Self {
        Self {
            tolerance: if tolerance > 0.0 { tolerance } else { 1e-3 },
        }
    }

    fn body<'a>(&self, solid: &'a Solid) -> Result<&'a BRepBody> {
        match solid.body() {
            Body::BRep(body) => Ok(body),
            Body::Faceted(_) => Err(Error::mismatch("boundary representation operation on a foreign solid", solid.kernel())),
        }
    }

    /// Body whose face ids have been extracted
    fn extracted<'a>(&self, solid: &'a Solid) -> Result<&'a BRepBody> {
        let body = self.body(solid)?;
        if body.extracted {
            Ok(body)
        } else {
            Err(Error::FacesNotExtracted)
        }
    }

    fn require_face(body: &BRepBody, face: i32) -> Result<()> {
        if body.face_ids().contains(&face) {
            Ok(())
        } else {
            Err(Error::MissingFaceId(face))
        }
    }

    fn revolved(frame: Frame, profile: RevolvedProfile) -> Solid {
        Solid::brep(BRepBody::new(BRepShape::Revolved { frame, profile }))
    }

    /// Replace the shape by the result of a mesh-level face edit
    fn with_surface(body: &BRepBody, surface: SurfaceMesh) -> Solid {
        let mut edited = BRepBody {
            shape: BRepShape::Faceted(surface),
            attributes: body.attributes.clone(),
            extracted: body.extracted,
        };
        edited.prune_attributes();
        Solid::brep(edited)
    }
}

impl SolidKernel for BRepKernel {
    fn kind(&self) -> SolidKernelKind {
        SolidKernelKind::BRep
    }

    fn cylinder(&self, center: Point3<f64>, axis: Vector3<f64>, radius: f64, length: f64) -> Result<Solid> {
        check_point("center", &center)?;
        check_positive("radius", radius)?;
        check_positive("length", length)?;
        let axis = check_axis(&axis)?;
        Ok(Self::revolved(
            Frame::from_axis(center, &axis),
            RevolvedProfile::cylinder(radius, length),
        ))
    }

    fn sphere(&self, center: Point3<f64>, radius: f64) -> Result<Solid> {
        check_point("center", &center)?;
        check_positive("radius", radius)?;
        Ok(Self::revolved(
            Frame::from_axis(center, &Vector3::z()),
            RevolvedProfile::sphere(radius),
        ))
    }

    fn cuboid(&self, center: Point3<f64>, half_extents: Vector3<f64>) -> Result<Solid> {
        check_point("center", &center)?;
        for (label, value) in ["x", "y", "z"].iter().zip(half_extents.iter()) {
            check_positive(&format!("half extent {}", label), *value)?;
        }
        Ok(Solid::brep(BRepBody::new(BRepShape::Cuboid { center, half_extents })))
    }

    fn ellipsoid(&self, center: Point3<f64>, semi_axes: Vector3<f64>) -> Result<Solid> {
        check_point("center", &center)?;
        for (label, value) in ["x", "y", "z"].iter().zip(semi_axes.iter()) {
            check_positive(&format!("semi-axis {}", label), *value)?;
        }
        Ok(Self::revolved(Frame::world(center, semi_axes), RevolvedProfile::sphere(1.0)))
    }

    fn boolean(&self, op: BooleanOp, a: &Solid, b: &Solid, policy: FaceMergePolicy) -> Result<Solid> {
        let (body_a, body_b) = (self.body(a)?, self.body(b)?);
        let (surface, mapping) = boolean_surfaces(
            op,
            &body_a.tessellate(self.tolerance),
            &body_b.tessellate(self.tolerance),
            policy,
        )?;

        let mut result = BRepBody::new(BRepShape::Faceted(surface));
        result.extracted = body_a.extracted && body_b.extracted;
        for (&(source, face), &new_id) in &mapping {
            let from = if source == 0 { body_a } else { body_b };
            if let Some(attrs) = from.attributes.get(&face) {
                let target = result.attributes.entry(new_id).or_default();
                for (key, value) in attrs {
                    target.entry(key.clone()).or_insert_with(|| value.clone());
                }
            }
        }
        Ok(Solid::brep(result))
    }

    fn extract_boundary_faces(&self, solid: &Solid, _feature_angle_deg: f64) -> Result<Solid> {
        // Analytic faces carry their ids from construction; extraction exposes them
        let mut body = self.body(solid)?.clone();
        debug!("boundary faces of analytic body: {:?}", body.face_ids());
        body.extracted = true;
        Ok(Solid::brep(body))
    }

    fn to_polydata(&self, solid: &Solid, tolerance: f64) -> Result<SurfaceMesh> {
        let tolerance = if tolerance > 0.0 { tolerance } else { self.tolerance };
        let body = self.body(solid)?;
        let mut surface = body.tessellate(tolerance);
        if !body.extracted {
            surface.remove_array(Association::Cell, FACE_ID_ARRAY);
        }
        Ok(surface)
    }

    fn face_ids(&self, solid: &Solid) -> Result<Vec<i32>> {
        Ok(self.extracted(solid)?.face_ids().into_iter().collect())
    }

    fn combine_faces(&self, solid: &Solid, keep_id: i32, merge_id: i32) -> Result<Solid> {
        let body = self.extracted(solid)?;
        let surface = combine_faces(&body.tessellate(self.tolerance), keep_id, merge_id)?;
        Ok(Self::with_surface(body, surface))
    }

    fn delete_faces(&self, solid: &Solid, ids: &[i32]) -> Result<Solid> {
        let body = self.extracted(solid)?;
        let surface = delete_faces(&body.tessellate(self.tolerance), ids)?;
        Ok(Self::with_surface(body, surface))
    }

    fn create_edge_blend(&self, solid: &Solid, face_a: i32, face_b: i32, radius: f64) -> Result<Solid> {
        check_positive("blend radius", radius)?;
        let body = self.extracted(solid)?;
        Self::require_face(body, face_a)?;
        Self::require_face(body, face_b)?;

        let BRepShape::Revolved { frame, profile } = &body.shape else {
            return Err(Error::invalid("edge blends are only supported between faces of a revolved body"));
        };
        let new_face = body.face_ids().into_iter().max().unwrap_or(0) + 1;
        let blended = profile.blend_corner(face_a, face_b, radius, new_face).ok_or_else(|| {
            Error::invalid(format!(
                "faces {} and {} do not meet at a straight edge that admits radius {}",
                face_a, face_b, radius
            ))
        })?;
        info!("blended edge between faces {} and {} as face {}", face_a, face_b, new_face);
        Ok(Solid::brep(BRepBody {
            shape: BRepShape::Revolved {
                frame: *frame,
                profile: blended,
            },
            attributes: body.attributes.clone(),
            extracted: true,
        }))
    }

    fn face_attribute(&self, solid: &Solid, key: &str, face: i32) -> Result<Option<String>> {
        let body = self.extracted(solid)?;
        Self::require_face(body, face)?;
        if key == ID_ATTRIBUTE {
            return Ok(Some(face.to_string()));
        }
        Ok(body.attributes.get(&face).and_then(|attrs| attrs.get(key)).cloned())
    }

    fn set_face_attribute(&self, solid: &Solid, key: &str, value: &str, face: i32) -> Result<Solid> {
        let body = self.extracted(solid)?;
        Self::require_face(body, face)?;
        if key == ID_ATTRIBUTE {
            return Err(Error::invalid("face attribute 'id' is read-only"));
        }
        let mut updated = body.clone();
        updated
            .attributes
            .entry(face)
            .or_default()
            .insert(key.to_string(), value.to_string());
        Ok(Solid::brep(updated))
    }

    fn write_native(&self, solid: &Solid, path: &Path) -> Result<()> {
        let file = NativeFile {
            format: NATIVE_FORMAT.to_string(),
            version: NATIVE_VERSION,
            body: self.body(solid)?.clone(),
        };
        let json = serde_json::to_string_pretty(&file)?;
        std::fs::write(path, json).with_context(|| format!("Failed to write {:?}", path))?;
        Ok(())
    }

    fn read_native(&self, path: &Path) -> Result<Solid> {
        let content = std::fs::read_to_string(path).with_context(|| format!("Failed to read {:?}", path))?;
        let file: NativeFile = serde_json::from_str(&content)?;
        if file.format != NATIVE_FORMAT || file.version != NATIVE_VERSION {
            return Err(Error::IOFailure(format!(
                "{:?} is not a {} v{} file",
                path, NATIVE_FORMAT, NATIVE_VERSION
            )));
        }
        Ok(Solid::brep(file.body))
    }
}
