// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! Solids and the two solid modeling backends

mod brep;
mod polydata;

pub use brep::{BRepBody, BRepKernel, BRepShape};
pub use polydata::PolyDataKernel;

use crate::error::{Error, Result};
use crate::geometry::csg::{csg_boolean, polygons_to_surface};
use crate::geometry::mesh_utils::{edge_triangles, is_closed, is_manifold};
use crate::geometry::{BooleanOp, SurfaceMesh};
use crate::kernel::{FaceMergePolicy, SolidKernelKind};
use nalgebra::{Point3, Vector3};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{info, warn};

/// Backend-specific geometry of a solid
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Body {
    /// Closed triangle surface; face ids live in its `ModelFaceID` array
    Faceted(SurfaceMesh),
    BRep(BRepBody),
}

/// A solid tagged with the kernel that created it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Solid {
    kernel: SolidKernelKind,
    body: Body,
}

impl Solid {
    pub(crate) fn faceted(surface: SurfaceMesh) -> Self {
        Self {
            kernel: SolidKernelKind::PolyData,
            body: Body::Faceted(surface),
        }
    }

    pub(crate) fn brep(body: BRepBody) -> Self {
        Self {
            kernel: SolidKernelKind::BRep,
            body: Body::BRep(body),
        }
    }

    pub fn kernel(&self) -> SolidKernelKind {
        self.kernel
    }

    pub fn body(&self) -> &Body {
        &self.body
    }

    /// Whether face ids have been materialized
    pub fn has_face_ids(&self) -> bool {
        match &self.body {
            Body::Faceted(surface) => surface.face_ids().is_some(),
            Body::BRep(body) => body.extracted,
        }
    }
}

pub(crate) fn check_positive(what: &str, value: f64) -> Result<()> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(Error::invalid(format!("{} must be positive, got {}", what, value)))
    }
}

pub(crate) fn check_point(what: &str, point: &Point3<f64>) -> Result<()> {
    if point.iter().all(|c| c.is_finite()) {
        Ok(())
    } else {
        Err(Error::invalid(format!("{} has non-finite coordinates", what)))
    }
}

pub(crate) fn check_axis(axis: &Vector3<f64>) -> Result<Vector3<f64>> {
    let len = axis.norm();
    if !len.is_finite() || len < 1e-12 {
        return Err(Error::invalid("axis has near-zero length"));
    }
    Ok(axis / len)
}

/// Face id mapping from (operand, input face id) to result face id
pub(crate) type FaceMapping = BTreeMap<(u8, i32), i32>;

/// Boolean of two closed surfaces with face re-tagging.
///
/// When both operands carry face ids, operand A keeps its ids and operand B
/// is shifted past A's largest id. With [`FaceMergePolicy::All`], coplanar
/// faces that meet across operands collapse onto the smaller id.
pub(crate) fn boolean_surfaces(
    op: BooleanOp,
    a: &SurfaceMesh,
    b: &SurfaceMesh,
    policy: FaceMergePolicy,
) -> Result<(SurfaceMesh, FaceMapping)> {
    for (label, surface) in [("first", a), ("second", b)] {
        if !is_closed(surface) {
            return Err(Error::BooleanFailure(format!("{} operand is not a closed surface", label)));
        }
    }

    let out = csg_boolean(a, b, op);
    if out.polygons.is_empty() {
        return Err(Error::BooleanFailure(format!("{} produced an empty solid", op)));
    }
    if out.is_disjoint() {
        return Err(Error::BooleanFailure(format!(
            "operands of {} do not intersect (surviving area A={:.3}, B={:.3})",
            op, out.survived[0], out.survived[1]
        )));
    }

    let scale = a.bounding_box().union(&b.bounding_box()).diagonal().max(1.0);
    let (mut mesh, tags) = polygons_to_surface(&out.polygons, 1e-9 * scale);
    if !is_manifold(&mesh) {
        return Err(Error::BooleanFailure(format!("{} produced a non-manifold surface", op)));
    }
    if !is_closed(&mesh) {
        warn!("{} result has open boundary edges", op);
    }

    let mut mapping = FaceMapping::new();
    if let (Some(ids_a), Some(_)) = (a.face_ids(), b.face_ids()) {
        let offset = ids_a.iter().copied().max().unwrap_or(0);
        let mut ids: Vec<i32> = tags
            .iter()
            .map(|&(source, face)| if source == 0 { face } else { face + offset })
            .collect();

        if policy == FaceMergePolicy::All {
            let mut parent: BTreeMap<i32, i32> = ids.iter().map(|&i| (i, i)).collect();
            fn find(parent: &BTreeMap<i32, i32>, mut id: i32) -> i32 {
                while let Some(&p) = parent.get(&id) {
                    if p == id {
                        break;
                    }
                    id = p;
                }
                id
            }
            for tris in edge_triangles(&mesh.triangles).values() {
                if let [t1, t2] = tris[..] {
                    if tags[t1].0 == tags[t2].0 {
                        continue;
                    }
                    if mesh.triangle_normal(t1).dot(&mesh.triangle_normal(t2)) > 1.0 - 1e-9 {
                        let (r1, r2) = (find(&parent, ids[t1]), find(&parent, ids[t2]));
                        if r1 != r2 {
                            parent.insert(r1.max(r2), r1.min(r2));
                        }
                    }
                }
            }
            for id in ids.iter_mut() {
                *id = find(&parent, *id);
            }
        }

        for (t, &(source, face)) in tags.iter().enumerate() {
            mapping.entry((source, face)).or_insert(ids[t]);
        }
        mesh.set_face_ids(ids);
    }

    info!(
        "{}: {} triangles, {} faces",
        op,
        mesh.triangle_count(),
        mesh.face_id_set().len()
    );
    Ok((mesh, mapping))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::primitives::box_surface;

    #[test]
    fn test_validation_helpers() {
        assert!(check_positive("radius", 1.0).is_ok());
        assert!(matches!(check_positive("radius", 0.0), Err(Error::InvalidGeometry(_))));
        assert!(check_positive("radius", f64::NAN).is_err());
        assert!(check_axis(&Vector3::new(0.0, 0.0, 1e-15)).is_err());
        assert_eq!(check_axis(&Vector3::new(0.0, 0.0, 2.0)).unwrap(), Vector3::z());
    }

    #[test]
    fn test_boolean_face_merge_policies() {
        // Two boxes stacked along x share the y/z side planes
        let a = box_surface(Point3::new(0.0, 0.0, 0.0), Vector3::new(1.0, 1.0, 1.0));
        let b = box_surface(Point3::new(1.5, 0.0, 0.0), Vector3::new(1.0, 1.0, 1.0));

        let (merged, _) = boolean_surfaces(BooleanOp::Union, &a, &b, FaceMergePolicy::All).unwrap();
        let (distinct, mapping) = boolean_surfaces(BooleanOp::Union, &a, &b, FaceMergePolicy::None).unwrap();

        // -x of A and +x of B survive; the four side planes merge pairwise
        assert_eq!(merged.face_id_set().len(), 6);
        assert_eq!(distinct.face_id_set().len(), 10);
        assert_eq!(mapping.get(&(0, 1)), Some(&1));
        assert_eq!(mapping.get(&(1, 2)), Some(&8));
        assert!(!mapping.contains_key(&(0, 2)));
    }

    #[test]
    fn test_disjoint_boolean_is_reported() {
        let a = box_surface(Point3::origin(), Vector3::new(1.0, 1.0, 1.0));
        let b = box_surface(Point3::new(10.0, 0.0, 0.0), Vector3::new(1.0, 1.0, 1.0));
        for op in [BooleanOp::Union, BooleanOp::Subtract, BooleanOp::Intersect] {
            assert!(matches!(
                boolean_surfaces(op, &a, &b, FaceMergePolicy::All),
                Err(Error::BooleanFailure(_))
            ));
        }
    }
}
