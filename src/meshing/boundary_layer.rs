// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! Prismatic boundary layers over wall faces

use super::sizing::SizingField;
use super::volume::EdgeSplit;
use crate::error::{Error, Result};
use crate::geometry::{Association, SurfaceMesh, VolumeMesh, FACE_ID_ARRAY};
use nalgebra::{Point3, Vector3};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::debug;

/// How layer thicknesses are interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LayerType {
    /// Thicknesses in model units
    Absolute,
    /// Thicknesses as fractions of the local edge size
    Relative,
}

impl TryFrom<i32> for LayerType {
    type Error = Error;

    fn try_from(value: i32) -> Result<Self> {
        match value {
            0 => Ok(LayerType::Absolute),
            1 => Ok(LayerType::Relative),
            other => Err(Error::InvalidOption {
                key: "boundary layer type".to_string(),
                reason: format!("unknown layer type {}", other),
            }),
        }
    }
}

/// Side of the wall the layers are grown on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InsertionSide {
    /// Into the meshed domain
    Inward,
    /// Away from the meshed domain
    Outward,
}

impl TryFrom<i32> for InsertionSide {
    type Error = Error;

    fn try_from(value: i32) -> Result<Self> {
        match value {
            0 => Ok(InsertionSide::Inward),
            1 => Ok(InsertionSide::Outward),
            other => Err(Error::InvalidOption {
                key: "boundary layer side".to_string(),
                reason: format!("unknown insertion side {}", other),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundaryLayerSpec {
    pub wall_face_ids: BTreeSet<i32>,
    pub layer_type: LayerType,
    pub insertion_side: InsertionSide,
    pub layer_count: usize,
    /// Thickness of each layer, innermost (at the wall) first
    pub thicknesses: Vec<f64>,
}

impl BoundaryLayerSpec {
    /// Validated spec. A single thickness is repeated for every layer.
    pub fn new(
        wall_face_ids: impl IntoIterator<Item = i32>,
        layer_type: LayerType,
        insertion_side: InsertionSide,
        layer_count: usize,
        thicknesses: Vec<f64>,
    ) -> Result<Self> {
        let invalid = |reason: String| Error::InvalidOption {
            key: "boundary layer".to_string(),
            reason,
        };
        let wall_face_ids: BTreeSet<i32> = wall_face_ids.into_iter().collect();
        if wall_face_ids.is_empty() {
            return Err(invalid("no wall faces given".to_string()));
        }
        if layer_count == 0 {
            return Err(invalid("layer count must be at least 1".to_string()));
        }
        let thicknesses = match thicknesses.len() {
            1 => vec![thicknesses[0]; layer_count],
            n if n == layer_count => thicknesses,
            n => return Err(invalid(format!("{} thicknesses for {} layers", n, layer_count))),
        };
        if let Some(t) = thicknesses.iter().find(|t| !(t.is_finite() && **t > 0.0)) {
            return Err(invalid(format!("thickness {} is not positive", t)));
        }
        Ok(Self {
            wall_face_ids,
            layer_type,
            insertion_side,
            layer_count,
            thicknesses,
        })
    }

    /// Distance of each layer surface from the wall
    pub fn offsets(&self, local_size: f64) -> Vec<f64> {
        let scale = match self.layer_type {
            LayerType::Absolute => 1.0,
            LayerType::Relative => local_size,
        };
        self.thicknesses
            .iter()
            .scan(0.0, |total, t| {
                *total += t * scale;
                Some(*total)
            })
            .collect()
    }

    pub fn total_thickness(&self, local_size: f64) -> f64 {
        self.offsets(local_size).last().copied().unwrap_or(0.0)
    }
}

/// Layer wedges and the surface bounding the remaining domain
#[derive(Debug, Clone)]
pub struct BoundaryLayerMesh {
    /// Surface points in their original order, then layer points
    pub points: Vec<Point3<f64>>,
    pub wedges: Vec<[usize; 6]>,
    /// Boundary of the region left for tetrahedra, over `points`
    pub inner: SurfaceMesh,
    /// Points stacked over each wall vertex, wall first, keyed by the one on `inner`
    pub columns: BTreeMap<usize, Vec<usize>>,
}

/// Wedge slots holding a point of column `a` and of column `b`
fn spans(wedge: &[usize; 6], a: &[usize], b: &[usize]) -> Option<(usize, usize)> {
    let i = (0..3).find(|&i| a.contains(&wedge[i]))?;
    let j = (0..3).find(|&j| b.contains(&wedge[j]))?;
    Some((i, j))
}

impl BoundaryLayerMesh {
    /// Replay edge splits made on `inner` through the layers.
    ///
    /// Splitting a wall edge splits the same edge on every layer, the wedges
    /// over it and the wall edge of `surface`. Any other split reaches
    /// `surface` only where it has the same edge. Layer midpoints are
    /// appended to `mesh`. Returns the number of wall edges split.
    pub fn conform(&mut self, splits: &[EdgeSplit], surface: &mut SurfaceMesh, mesh: &mut VolumeMesh) -> usize {
        let mut surface_of: HashMap<usize, usize> = (0..surface.points.len()).map(|v| (v, v)).collect();
        let mut walls = 0;
        for split in splits {
            let columns = match (self.columns.get(&split.a), self.columns.get(&split.b)) {
                (Some(a), Some(b)) if self.wedges.iter().any(|w| spans(w, a, b).is_some()) => Some((a.clone(), b.clone())),
                _ => None,
            };
            let Some((ca, cb)) = columns else {
                if let (Some(&sa), Some(&sb)) = (surface_of.get(&split.a), surface_of.get(&split.b)) {
                    if let Some(s) = surface.split_edge(sa, sb) {
                        surface_of.insert(split.midpoint, s);
                    }
                }
                continue;
            };

            let cm: Vec<usize> = ca
                .iter()
                .zip(&cb)
                .map(|(&x, &y)| {
                    if x == split.a {
                        split.midpoint
                    } else {
                        mesh.points.push(Point3::from((mesh.points[x].coords + mesh.points[y].coords) * 0.5));
                        mesh.points.len() - 1
                    }
                })
                .collect();
            let layer = |column: &[usize], v: usize| column.iter().position(|&c| c == v);

            let mut halves = Vec::new();
            for wedge in &mut self.wedges {
                let Some((i, j)) = spans(wedge, &ca, &cb) else {
                    continue;
                };
                let mut first = *wedge;
                let mut second = *wedge;
                for offset in [0, 3] {
                    if let (Some(ka), Some(kb)) = (layer(&ca, wedge[i + offset]), layer(&cb, wedge[j + offset])) {
                        first[j + offset] = cm[kb];
                        second[i + offset] = cm[ka];
                    }
                }
                *wedge = first;
                halves.push(second);
            }
            self.wedges.extend(halves);

            if let (Some(&sa), Some(&sb)) = (surface_of.get(&ca[0]), surface_of.get(&cb[0])) {
                if let Some(s) = surface.split_edge(sa, sb) {
                    surface_of.insert(cm[0], s);
                }
            }
            self.columns.insert(split.midpoint, cm);
            walls += 1;
        }
        walls
    }
}

/// Extrude `spec.layer_count` layers of wedges from the wall faces of `surface`
pub fn extrude_layers(surface: &SurfaceMesh, spec: &BoundaryLayerSpec, sizing: &SizingField<'_>) -> Result<BoundaryLayerMesh> {
    let ids = surface.face_ids().ok_or(Error::FacesNotExtracted)?;
    let present = surface.face_id_set();
    if let Some(&missing) = spec.wall_face_ids.iter().find(|id| !present.contains(id)) {
        return Err(Error::MissingFaceId(missing));
    }
    let failure = |reason: String| Error::MeshGenerationFailure {
        reason,
        context: format!("boundary layer on faces {:?}; {}", spec.wall_face_ids, sizing.describe()),
    };

    let is_wall: Vec<bool> = ids.iter().map(|id| spec.wall_face_ids.contains(id)).collect();
    let mut wall_normal: BTreeMap<usize, Vector3<f64>> = BTreeMap::new();
    let mut side_normal: BTreeMap<usize, Vector3<f64>> = BTreeMap::new();
    for (t, tri) in surface.triangles.iter().enumerate() {
        let n = surface.triangle_cross(t);
        let target = if is_wall[t] { &mut wall_normal } else { &mut side_normal };
        for &v in tri {
            *target.entry(v).or_insert_with(Vector3::zeros) += n;
        }
    }

    // Growth direction per wall vertex; rim vertices slide within the adjacent face
    let outward = match spec.insertion_side {
        InsertionSide::Inward => -1.0,
        InsertionSide::Outward => 1.0,
    };
    let mut directions: BTreeMap<usize, Vector3<f64>> = BTreeMap::new();
    for (&v, n) in &wall_normal {
        let n = n
            .try_normalize(f64::MIN_POSITIVE)
            .ok_or_else(|| failure(format!("wall vertex {} has no normal", v)))?;
        let d = match side_normal.get(&v).and_then(|m| m.try_normalize(f64::MIN_POSITIVE)) {
            Some(m) => (n - m * n.dot(&m)).try_normalize(1e-6).unwrap_or(n),
            None => n,
        };
        directions.insert(v, d * outward);
    }

    let wall_vertices: Vec<usize> = directions.keys().copied().collect();
    let mut points = surface.points.clone();
    let mut layer_index: Vec<BTreeMap<usize, usize>> = vec![wall_vertices.iter().map(|&v| (v, v)).collect()];
    let offsets: BTreeMap<usize, Vec<f64>> = wall_vertices
        .iter()
        .map(|&v| (v, spec.offsets(sizing.at(&surface.points[v]))))
        .collect();
    for k in 0..spec.layer_count {
        let mut index = BTreeMap::new();
        for &v in &wall_vertices {
            index.insert(v, points.len());
            points.push(surface.points[v] + directions[&v] * offsets[&v][k]);
        }
        layer_index.push(index);
    }

    let mut wedges = Vec::new();
    for (t, tri) in surface.triangles.iter().enumerate() {
        if !is_wall[t] {
            continue;
        }
        for k in 1..=spec.layer_count {
            let lower = tri.map(|v| layer_index[k - 1][&v]);
            let upper = tri.map(|v| layer_index[k][&v]);
            let (base, top) = match spec.insertion_side {
                InsertionSide::Inward => (lower, upper),
                InsertionSide::Outward => (upper, lower),
            };
            let wedge = [base[0], base[1], base[2], top[0], top[1], top[2]];
            let [a, b, c] = base.map(|v| points[v]);
            let normal = (b - a).cross(&(c - a));
            if top.iter().any(|&v| (points[v] - a).dot(&normal) >= 0.0) {
                return Err(failure(format!("layer {} folds over wall triangle {}", k, t)));
            }
            wedges.push(wedge);
        }
    }

    // Inward layers shrink the domain: wall and rim move to the innermost layer
    let mut inner = SurfaceMesh::from_parts(points.clone(), surface.triangles.clone());
    if spec.insertion_side == InsertionSide::Inward {
        let innermost = &layer_index[spec.layer_count];
        for (t, tri) in inner.triangles.iter_mut().enumerate() {
            let before = surface.triangle_cross(t);
            for v in tri.iter_mut() {
                if let Some(&moved) = innermost.get(v) {
                    *v = moved;
                }
            }
            let after = (points[tri[1]] - points[tri[0]]).cross(&(points[tri[2]] - points[tri[0]]));
            if !is_wall[t] && after.dot(&before) <= 0.0 {
                return Err(failure(format!(
                    "layers are thicker than the elements of face {} next to the wall",
                    ids[t]
                )));
            }
        }
    }
    if let Some(array) = surface.cell_array(FACE_ID_ARRAY) {
        inner.set_array(Association::Cell, array.clone());
    }

    let key = match spec.insertion_side {
        InsertionSide::Inward => spec.layer_count,
        InsertionSide::Outward => 0,
    };
    let columns = wall_vertices
        .iter()
        .map(|&v| (layer_index[key][&v], layer_index.iter().map(|layer| layer[&v]).collect()))
        .collect();

    debug!(
        "boundary layer: {} wedges over {} wall vertices",
        wedges.len(),
        wall_vertices.len()
    );
    Ok(BoundaryLayerMesh {
        points,
        wedges,
        inner,
        columns,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::primitives::{tessellate_revolved, Frame, Resolution, RevolvedProfile};
    use crate::geometry::tet_signed_volume;
    use crate::meshing::remesh::{remesh, RemeshParams};

    fn cylinder() -> SurfaceMesh {
        let coarse = tessellate_revolved(
            &RevolvedProfile::cylinder(1.0, 4.0),
            &Frame::from_axis(Point3::origin(), &Vector3::z()),
            Resolution::Fixed(24),
        );
        remesh(&coarse, |_, _| 0.3, &RemeshParams::default()).unwrap().mesh
    }

    #[test]
    fn test_spec_validation() {
        let spec = BoundaryLayerSpec::new([1], LayerType::Absolute, InsertionSide::Inward, 3, vec![0.1]).unwrap();
        assert_eq!(spec.thicknesses, vec![0.1; 3]);
        let offsets = spec.offsets(1.0);
        approx::assert_relative_eq!(offsets[2], 0.3, epsilon = 1e-12);

        assert!(BoundaryLayerSpec::new([1], LayerType::Absolute, InsertionSide::Inward, 2, vec![0.1, 0.2, 0.3]).is_err());
        assert!(BoundaryLayerSpec::new([1], LayerType::Absolute, InsertionSide::Inward, 0, vec![0.1]).is_err());
        assert!(BoundaryLayerSpec::new([1], LayerType::Absolute, InsertionSide::Inward, 1, vec![-0.1]).is_err());
        assert!(BoundaryLayerSpec::new(Vec::<i32>::new(), LayerType::Absolute, InsertionSide::Inward, 1, vec![0.1]).is_err());
        assert!(LayerType::try_from(2).is_err());
        assert_eq!(InsertionSide::try_from(1).unwrap(), InsertionSide::Outward);

        let relative = BoundaryLayerSpec::new([1], LayerType::Relative, InsertionSide::Inward, 2, vec![0.1, 0.3]).unwrap();
        approx::assert_relative_eq!(relative.total_thickness(0.5), 0.2, epsilon = 1e-12);
    }

    #[test]
    fn test_inward_layers_on_cylinder_wall() {
        let surface = cylinder();
        let spec = BoundaryLayerSpec::new([1], LayerType::Absolute, InsertionSide::Inward, 2, vec![0.05, 0.1]).unwrap();
        let sizing = SizingField::uniform(0.3).unwrap();
        let layers = extrude_layers(&surface, &spec, &sizing).unwrap();

        let wall_triangles = surface.face_ids().unwrap().iter().filter(|&&f| f == 1).count();
        assert_eq!(layers.wedges.len(), 2 * wall_triangles);
        assert_eq!(&layers.points[..surface.points.len()], &surface.points[..]);

        // Wall points moved radially inward by the total thickness
        for w in &layers.wedges {
            let top = layers.points[w[3]];
            let base = layers.points[w[0]];
            let radial = |p: Point3<f64>| (p.x * p.x + p.y * p.y).sqrt();
            assert!(radial(top) < radial(base));
            // Split-tet volume of every wedge is positive
            let p = |i: usize| &layers.points[w[i]];
            assert!(tet_signed_volume(p(0), p(1), p(2), p(5)).abs() > 0.0);
        }

        let inner = &layers.inner;
        assert!(crate::geometry::mesh_utils::is_closed(inner));
        let shrink = (1.0f64 - 0.15).powi(2);
        approx::assert_relative_eq!(inner.signed_volume() / surface.signed_volume(), shrink, max_relative = 0.02);
    }

    #[test]
    fn test_wall_split_runs_through_every_layer() {
        let surface = cylinder();
        let spec = BoundaryLayerSpec::new([1], LayerType::Absolute, InsertionSide::Inward, 2, vec![0.05, 0.1]).unwrap();
        let sizing = SizingField::uniform(0.3).unwrap();
        let mut layers = extrude_layers(&surface, &spec, &sizing).unwrap();

        let ids = layers.inner.face_ids().unwrap().to_vec();
        let wall: Vec<usize> = (0..ids.len()).filter(|&t| ids[t] == 1).collect();
        let shared = |a: usize, b: usize| {
            wall.iter()
                .filter(|&&t| layers.inner.triangles[t].contains(&a) && layers.inner.triangles[t].contains(&b))
                .count()
        };
        let tri = layers.inner.triangles[wall[0]];
        let (a, b) = (0..3)
            .map(|k| (tri[k], tri[(k + 1) % 3]))
            .find(|&(a, b)| shared(a, b) == 2)
            .unwrap();

        let mut inner = layers.inner.clone();
        let midpoint = inner.split_edge(a, b).unwrap();
        let mut mesh = VolumeMesh::new();
        mesh.points = inner.points.clone();
        let mut walls = surface.clone();
        let before = layers.wedges.len();
        let split = EdgeSplit { a, b, midpoint };
        assert_eq!(layers.conform(&[split], &mut walls, &mut mesh), 1);

        assert_eq!(layers.wedges.len(), before + 4);
        assert_eq!(mesh.points.len(), inner.points.len() + 2);
        let wall_triangles = walls.face_ids().unwrap().iter().filter(|&&f| f == 1).count();
        assert_eq!(layers.wedges.len(), 2 * wall_triangles);

        let column = &layers.columns[&midpoint];
        assert_eq!(column.len(), 3);
        assert_eq!(column[2], midpoint);
        let last = walls.points.len() - 1;
        assert!((mesh.points[column[0]] - walls.points[last]).norm() < 1e-12);
        for w in &layers.wedges {
            let p = |i: usize| &mesh.points[w[i]];
            assert!(tet_signed_volume(p(0), p(1), p(2), p(5)).abs() > 0.0);
        }
    }

    #[test]
    fn test_unknown_wall_face() {
        let surface = cylinder();
        let spec = BoundaryLayerSpec::new([7], LayerType::Absolute, InsertionSide::Inward, 1, vec![0.1]).unwrap();
        let sizing = SizingField::uniform(0.3).unwrap();
        assert!(matches!(extrude_layers(&surface, &spec, &sizing), Err(Error::MissingFaceId(7))));
    }
}
