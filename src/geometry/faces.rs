// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! Face identity on triangle surfaces: feature-angle segmentation and
//! face-level edits (combine, delete with re-capping, per-face extraction)

use super::mesh_utils::{boundary_loops, connected_components, edge_triangles, is_manifold};
use super::SurfaceMesh;
use crate::error::{Error, Result};
use nalgebra::{Point3, Vector3};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, VecDeque};

/// Slack applied to the angle test so that dihedrals equal to the
/// threshold always separate faces
const ANGLE_SLACK: f64 = 1e-9;

/// Label triangles into faces by connected components over edge adjacency,
/// joining neighbours whose normals differ by less than `feature_angle_deg`.
///
/// Labels start at 1 and follow breadth-first order from the lowest
/// unlabelled triangle index, so the result depends only on triangle order.
pub fn segment_faces(mesh: &SurfaceMesh, feature_angle_deg: f64) -> Vec<i32> {
    let cos_threshold = feature_angle_deg.to_radians().cos();
    let normals: Vec<Vector3<f64>> = (0..mesh.triangles.len())
        .map(|t| mesh.triangle_normal(t))
        .collect();

    let mut adjacency: Vec<Vec<usize>> = vec![Vec::new(); mesh.triangles.len()];
    for tris in edge_triangles(&mesh.triangles).values() {
        for (i, &a) in tris.iter().enumerate() {
            for &b in &tris[i + 1..] {
                let (na, nb) = (&normals[a], &normals[b]);
                let degenerate = na.norm_squared() == 0.0 || nb.norm_squared() == 0.0;
                if degenerate || na.dot(nb) > cos_threshold + ANGLE_SLACK {
                    adjacency[a].push(b);
                    adjacency[b].push(a);
                }
            }
        }
    }
    for list in &mut adjacency {
        list.sort_unstable();
        list.dedup();
    }

    let mut labels = vec![0i32; mesh.triangles.len()];
    let mut next = 1;
    for start in 0..mesh.triangles.len() {
        if labels[start] != 0 {
            continue;
        }
        labels[start] = next;
        let mut queue = VecDeque::from([start]);
        while let Some(t) = queue.pop_front() {
            for &n in &adjacency[t] {
                if labels[n] == 0 {
                    labels[n] = next;
                    queue.push_back(n);
                }
            }
        }
        next += 1;
    }
    labels
}

fn require_face_ids(mesh: &SurfaceMesh) -> Result<&[i32]> {
    mesh.face_ids().ok_or(Error::FacesNotExtracted)
}

fn require_face(present: &BTreeSet<i32>, id: i32) -> Result<()> {
    if present.contains(&id) {
        Ok(())
    } else {
        Err(Error::MissingFaceId(id))
    }
}

/// Relabel every triangle of `merge_id` as `keep_id`
pub fn combine_faces(mesh: &SurfaceMesh, keep_id: i32, merge_id: i32) -> Result<SurfaceMesh> {
    let ids = require_face_ids(mesh)?;
    let present: BTreeSet<i32> = ids.iter().copied().collect();
    require_face(&present, keep_id)?;
    require_face(&present, merge_id)?;

    let relabelled = ids
        .iter()
        .map(|&id| if id == merge_id { keep_id } else { id })
        .collect();
    let mut result = mesh.clone();
    result.set_face_ids(relabelled);
    Ok(result)
}

/// Remove the triangles of the given faces and close every resulting hole
/// with a centroid fan.
///
/// A cap takes the lowest id among the surviving faces bordering its hole;
/// surviving faces keep their ids and deleted ids are never reused.
pub fn delete_faces(mesh: &SurfaceMesh, delete: &[i32]) -> Result<SurfaceMesh> {
    let ids = require_face_ids(mesh)?;
    let present: BTreeSet<i32> = ids.iter().copied().collect();
    for &id in delete {
        require_face(&present, id)?;
    }
    let doomed: BTreeSet<i32> = delete.iter().copied().collect();
    let keep: Vec<bool> = ids.iter().map(|id| !doomed.contains(id)).collect();
    if !keep.iter().any(|&k| k) {
        return Err(Error::NonManifoldResult("no faces remain after deletion".to_string()));
    }

    let mut result = mesh.retain_triangles(&keep);
    if !is_manifold(&result) {
        return Err(Error::NonManifoldResult("remaining faces share an edge more than twice".to_string()));
    }
    if connected_components(&result.triangles) > connected_components(&mesh.triangles) {
        return Err(Error::NonManifoldResult(format!(
            "deleting faces {:?} disconnects the boundary",
            delete
        )));
    }
    let loops = boundary_loops(&result.triangles)
        .ok_or_else(|| Error::NonManifoldResult("hole boundary is pinched".to_string()))?;

    let edges = edge_triangles(&result.triangles);
    let mut face_ids = result.face_ids().map(|f| f.to_vec()).unwrap_or_default();
    for polygon in &loops {
        let n = polygon.len();
        let tag = (0..n)
            .filter_map(|k| {
                let edge = super::mesh_utils::Edge::new(polygon[k], polygon[(k + 1) % n]);
                edges.get(&edge).and_then(|t| t.first()).map(|&t| face_ids[t])
            })
            .min()
            .ok_or_else(|| Error::NonManifoldResult("hole without bordering faces".to_string()))?;

        if n == 3 {
            result.triangles.push([polygon[2], polygon[1], polygon[0]]);
            face_ids.push(tag);
            continue;
        }
        let centroid = polygon
            .iter()
            .fold(Vector3::zeros(), |acc, &v| acc + result.points[v].coords)
            / n as f64;
        let c = result.points.len();
        result.points.push(Point3::from(centroid));
        for k in 0..n {
            result.triangles.push([c, polygon[(k + 1) % n], polygon[k]]);
            face_ids.push(tag);
        }
    }

    // Cap centroids are new points; pad point arrays by repeating the first neighbour
    let added = result.points.len() - result.point_data.first().map(|a| a.len()).unwrap_or(result.points.len());
    if added > 0 && !result.point_data.is_empty() {
        let mut gather: Vec<usize> = (0..result.points.len() - added).collect();
        for polygon in &loops {
            if polygon.len() > 3 {
                gather.push(polygon[0]);
            }
        }
        result.point_data = result.point_data.iter().map(|a| a.gathered(&gather)).collect();
    }

    // Other cell arrays cannot be extended meaningfully
    result.cell_data.retain(|a| a.name == super::FACE_ID_ARRAY);
    result.set_face_ids(face_ids);
    Ok(result)
}

/// Triangles belonging to one face as a standalone surface
pub fn face_surface(mesh: &SurfaceMesh, face_id: i32) -> Result<SurfaceMesh> {
    let ids = require_face_ids(mesh)?;
    let keep: Vec<bool> = ids.iter().map(|&id| id == face_id).collect();
    if !keep.iter().any(|&k| k) {
        return Err(Error::MissingFaceId(face_id));
    }
    Ok(mesh.retain_triangles(&keep))
}

/// Summary of one face
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceInfo {
    pub id: i32,
    pub triangle_count: usize,
    pub area: f64,
    pub centroid: Point3<f64>,
}

/// Per-face triangle counts, areas and area-weighted centroids
pub fn face_info(mesh: &SurfaceMesh) -> Result<Vec<FaceInfo>> {
    let ids = require_face_ids(mesh)?;
    let mut acc: BTreeMap<i32, (usize, f64, Vector3<f64>)> = BTreeMap::new();
    for (t, &id) in ids.iter().enumerate() {
        let area = mesh.triangle_area(t);
        let entry = acc.entry(id).or_insert((0, 0.0, Vector3::zeros()));
        entry.0 += 1;
        entry.1 += area;
        entry.2 += mesh.triangle_centroid(t).coords * area;
    }
    Ok(acc
        .into_iter()
        .map(|(id, (count, area, weighted))| FaceInfo {
            id,
            triangle_count: count,
            area,
            centroid: Point3::from(if area > 0.0 { weighted / area } else { weighted }),
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::mesh_utils::validate_mesh;
    use crate::geometry::primitives::{tessellate_revolved, Frame, RevolvedProfile, Resolution};

    fn untagged_cylinder() -> SurfaceMesh {
        let frame = Frame::from_axis(Point3::origin(), &Vector3::new(0.0, 0.0, 1.0));
        let mut mesh = tessellate_revolved(&RevolvedProfile::cylinder(1.0, 4.0), &frame, Resolution::Fixed(24));
        mesh.cell_data.clear();
        mesh
    }

    #[test]
    fn test_cylinder_segments_into_three_faces() {
        let mut mesh = untagged_cylinder();
        let labels = segment_faces(&mesh, 90.0);
        mesh.set_face_ids(labels);
        assert_eq!(mesh.face_id_set().into_iter().collect::<Vec<_>>(), vec![1, 2, 3]);

        // A tilted axis behaves the same
        let frame = Frame::from_axis(Point3::new(1.0, 2.0, 3.0), &Vector3::new(1.0, 1.0, 0.3));
        let tilted = tessellate_revolved(&RevolvedProfile::cylinder(0.5, 2.0), &frame, Resolution::Fixed(24));
        let labels = segment_faces(&tilted, 90.0);
        assert_eq!(labels.iter().copied().max(), Some(3));
    }

    #[test]
    fn test_large_angle_merges_everything() {
        let mesh = untagged_cylinder();
        let labels = segment_faces(&mesh, 120.0);
        assert!(labels.iter().all(|&l| l == 1));
    }

    #[test]
    fn test_combine_then_delete() {
        let mut mesh = untagged_cylinder();
        mesh.set_face_ids(segment_faces(&mesh, 90.0));

        let combined = combine_faces(&mesh, 1, 2).unwrap();
        assert_eq!(combined.face_id_set().into_iter().collect::<Vec<_>>(), vec![1, 3]);

        let deleted = delete_faces(&combined, &[3]).unwrap();
        assert_eq!(deleted.face_id_set().into_iter().collect::<Vec<_>>(), vec![1]);
        assert!(validate_mesh(&deleted).is_valid_shell());
        assert!((deleted.signed_volume() - mesh.signed_volume()).abs() < 1e-9);
    }

    #[test]
    fn test_missing_ids_are_rejected() {
        let mut mesh = untagged_cylinder();
        assert!(matches!(combine_faces(&mesh, 1, 2), Err(Error::FacesNotExtracted)));
        mesh.set_face_ids(segment_faces(&mesh, 90.0));
        assert!(matches!(combine_faces(&mesh, 1, 7), Err(Error::MissingFaceId(7))));
        assert!(matches!(delete_faces(&mesh, &[9]), Err(Error::MissingFaceId(9))));
        assert!(matches!(delete_faces(&mesh, &[1, 2, 3]), Err(Error::NonManifoldResult(_))));
    }

    #[test]
    fn test_deleting_wall_disconnects() {
        let frame = Frame::from_axis(Point3::origin(), &Vector3::z());
        let mesh = tessellate_revolved(&RevolvedProfile::cylinder(1.0, 2.0), &frame, Resolution::Fixed(16));
        assert!(matches!(delete_faces(&mesh, &[1]), Err(Error::NonManifoldResult(_))));
        let capped = delete_faces(&mesh, &[2, 3]).unwrap();
        assert_eq!(capped.face_id_set().into_iter().collect::<Vec<_>>(), vec![1]);
    }

    #[test]
    fn test_face_info() {
        let frame = Frame::from_axis(Point3::origin(), &Vector3::z());
        let mesh = tessellate_revolved(&RevolvedProfile::cylinder(1.0, 2.0), &frame, Resolution::Fixed(64));
        let info = face_info(&mesh).unwrap();
        assert_eq!(info.len(), 3);
        assert!((info[1].centroid.z - 1.0).abs() < 1e-12);
        assert!((info[2].centroid.z + 1.0).abs() < 1e-12);
        let cap = face_surface(&mesh, 2).unwrap();
        assert_eq!(cap.triangle_count(), 64);
    }
}
