// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! Surface and volume mesh representations

use super::{Association, BoundingBox, DataArray};
use nalgebra::{Point3, Vector3};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

/// Cell array holding the face id of every surface triangle
pub const FACE_ID_ARRAY: &str = "ModelFaceID";

/// Triangle surface with optional polylines and attached arrays.
///
/// Cell arrays index triangles. Polylines carry no cell data; they are
/// used for skeletons such as centerlines.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SurfaceMesh {
    pub points: Vec<Point3<f64>>,
    pub triangles: Vec<[usize; 3]>,
    pub lines: Vec<Vec<usize>>,
    pub point_data: Vec<DataArray>,
    pub cell_data: Vec<DataArray>,
}

impl SurfaceMesh {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_parts(points: Vec<Point3<f64>>, triangles: Vec<[usize; 3]>) -> Self {
        Self {
            points,
            triangles,
            ..Self::default()
        }
    }

    pub fn point_count(&self) -> usize {
        self.points.len()
    }

    pub fn triangle_count(&self) -> usize {
        self.triangles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.triangles.is_empty() && self.lines.is_empty()
    }

    pub fn bounding_box(&self) -> BoundingBox {
        BoundingBox::from_points(&self.points)
    }

    pub fn arrays(&self, association: Association) -> &[DataArray] {
        match association {
            Association::Point => &self.point_data,
            Association::Cell => &self.cell_data,
        }
    }

    pub fn array(&self, association: Association, name: &str) -> Option<&DataArray> {
        self.arrays(association).iter().find(|a| a.name == name)
    }

    pub fn point_array(&self, name: &str) -> Option<&DataArray> {
        self.array(Association::Point, name)
    }

    pub fn cell_array(&self, name: &str) -> Option<&DataArray> {
        self.array(Association::Cell, name)
    }

    /// Attach an array, replacing any array of the same name
    pub fn set_array(&mut self, association: Association, array: DataArray) {
        let arrays = match association {
            Association::Point => &mut self.point_data,
            Association::Cell => &mut self.cell_data,
        };
        match arrays.iter_mut().find(|a| a.name == array.name) {
            Some(slot) => *slot = array,
            None => arrays.push(array),
        }
    }

    pub fn remove_array(&mut self, association: Association, name: &str) -> Option<DataArray> {
        let arrays = match association {
            Association::Point => &mut self.point_data,
            Association::Cell => &mut self.cell_data,
        };
        let pos = arrays.iter().position(|a| a.name == name)?;
        Some(arrays.remove(pos))
    }

    /// Per-triangle face ids, if boundary faces have been extracted
    pub fn face_ids(&self) -> Option<&[i32]> {
        self.cell_array(FACE_ID_ARRAY).and_then(|a| a.as_i32())
    }

    pub fn set_face_ids(&mut self, ids: Vec<i32>) {
        self.set_array(Association::Cell, DataArray::scalars_i32(FACE_ID_ARRAY, ids));
    }

    /// Sorted set of distinct face ids
    pub fn face_id_set(&self) -> BTreeSet<i32> {
        self.face_ids()
            .map(|ids| ids.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn triangle_points(&self, tri: usize) -> [Point3<f64>; 3] {
        let [a, b, c] = self.triangles[tri];
        [self.points[a], self.points[b], self.points[c]]
    }

    /// Unnormalized normal, length equal to twice the triangle area
    pub fn triangle_cross(&self, tri: usize) -> Vector3<f64> {
        let [a, b, c] = self.triangle_points(tri);
        (b - a).cross(&(c - a))
    }

    pub fn triangle_normal(&self, tri: usize) -> Vector3<f64> {
        let n = self.triangle_cross(tri);
        let len = n.norm();
        if len > 0.0 {
            n / len
        } else {
            Vector3::zeros()
        }
    }

    pub fn triangle_area(&self, tri: usize) -> f64 {
        0.5 * self.triangle_cross(tri).norm()
    }

    pub fn triangle_centroid(&self, tri: usize) -> Point3<f64> {
        let [a, b, c] = self.triangle_points(tri);
        Point3::from((a.coords + b.coords + c.coords) / 3.0)
    }

    pub fn area(&self) -> f64 {
        (0..self.triangles.len()).map(|t| self.triangle_area(t)).sum()
    }

    /// Signed enclosed volume (positive for outward-oriented closed surfaces)
    pub fn signed_volume(&self) -> f64 {
        self.triangles
            .iter()
            .map(|&[a, b, c]| {
                let (p, q, r) = (self.points[a].coords, self.points[b].coords, self.points[c].coords);
                p.dot(&q.cross(&r)) / 6.0
            })
            .sum()
    }

    /// Area-weighted vertex normals
    pub fn vertex_normals(&self) -> Vec<Vector3<f64>> {
        let mut normals = vec![Vector3::zeros(); self.points.len()];
        for (t, tri) in self.triangles.iter().enumerate() {
            let n = self.triangle_cross(t);
            for &v in tri {
                normals[v] += n;
            }
        }
        for n in &mut normals {
            let len = n.norm();
            if len > 0.0 {
                *n /= len;
            }
        }
        normals
    }

    /// Lengths of all unique triangle edges
    pub fn edge_lengths(&self) -> Vec<f64> {
        let mut seen = BTreeSet::new();
        let mut lengths = Vec::new();
        for tri in &self.triangles {
            for k in 0..3 {
                let (a, b) = (tri[k], tri[(k + 1) % 3]);
                if seen.insert((a.min(b), a.max(b))) {
                    lengths.push((self.points[a] - self.points[b]).norm());
                }
            }
        }
        lengths
    }

    /// Keep only the triangles flagged in `keep`, carrying cell arrays along
    /// and dropping points no longer referenced.
    pub fn retain_triangles(&self, keep: &[bool]) -> SurfaceMesh {
        let mut mesh = SurfaceMesh {
            points: self.points.clone(),
            triangles: self
                .triangles
                .iter()
                .zip(keep)
                .filter(|(_, &k)| k)
                .map(|(t, _)| *t)
                .collect(),
            lines: Vec::new(),
            point_data: self.point_data.clone(),
            cell_data: self.cell_data.iter().map(|a| a.filtered(keep)).collect(),
        };
        mesh.remove_unused_points();
        mesh
    }

    /// Split edge (`a`, `b`) at its midpoint, halving every triangle on it.
    ///
    /// Returns the new point, or `None` when no triangle has the edge.
    /// Point arrays get the endpoint mean, cell arrays copy the split triangle.
    pub fn split_edge(&mut self, a: usize, b: usize) -> Option<usize> {
        let on_edge: Vec<(usize, usize)> = self
            .triangles
            .iter()
            .enumerate()
            .filter_map(|(t, tri)| {
                (0..3)
                    .find(|&k| {
                        let (p, q) = (tri[k], tri[(k + 1) % 3]);
                        (p == a && q == b) || (p == b && q == a)
                    })
                    .map(|k| (t, k))
            })
            .collect();
        if on_edge.is_empty() {
            return None;
        }

        let m = self.points.len();
        self.points.push(Point3::from((self.points[a].coords + self.points[b].coords) * 0.5));
        for array in &mut self.point_data {
            array.push_mean(a, b);
        }
        for (t, k) in on_edge {
            let tri = self.triangles[t];
            let mut first = tri;
            first[(k + 1) % 3] = m;
            let mut second = tri;
            second[k] = m;
            self.triangles[t] = first;
            self.triangles.push(second);
            for array in &mut self.cell_data {
                array.push_copy(t);
            }
        }
        Some(m)
    }

    /// Drop points that no triangle or line references, remapping indices and point arrays
    pub fn remove_unused_points(&mut self) -> usize {
        let mut used = vec![false; self.points.len()];
        for tri in &self.triangles {
            for &v in tri {
                used[v] = true;
            }
        }
        for line in &self.lines {
            for &v in line {
                used[v] = true;
            }
        }
        let removed = used.iter().filter(|u| !**u).count();
        if removed == 0 {
            return 0;
        }

        let mut remap = vec![usize::MAX; self.points.len()];
        let mut points = Vec::with_capacity(self.points.len() - removed);
        for (i, p) in self.points.iter().enumerate() {
            if used[i] {
                remap[i] = points.len();
                points.push(*p);
            }
        }
        for tri in &mut self.triangles {
            for v in tri.iter_mut() {
                *v = remap[*v];
            }
        }
        for line in &mut self.lines {
            for v in line.iter_mut() {
                *v = remap[*v];
            }
        }
        self.point_data = self.point_data.iter().map(|a| a.filtered(&used)).collect();
        self.points = points;
        removed
    }

    /// Merge points closer than `epsilon`, returning the number of points removed.
    ///
    /// Uses a hash grid with cell size `epsilon`; point arrays keep the value of
    /// the first point of each merged cluster.
    pub fn weld_points(&mut self, epsilon: f64) -> usize {
        if self.points.is_empty() || epsilon <= 0.0 {
            return 0;
        }
        let key = |p: &Point3<f64>| {
            (
                (p.x / epsilon).floor() as i64,
                (p.y / epsilon).floor() as i64,
                (p.z / epsilon).floor() as i64,
            )
        };

        let mut grid: HashMap<(i64, i64, i64), Vec<usize>> = HashMap::new();
        let mut remap = vec![0usize; self.points.len()];
        let mut kept: Vec<usize> = Vec::new();

        for (i, p) in self.points.iter().enumerate() {
            let (kx, ky, kz) = key(p);
            let mut found = None;
            'search: for dx in -1..=1 {
                for dy in -1..=1 {
                    for dz in -1..=1 {
                        if let Some(bucket) = grid.get(&(kx + dx, ky + dy, kz + dz)) {
                            for &j in bucket {
                                if (self.points[kept[j]] - p).norm() < epsilon {
                                    found = Some(j);
                                    break 'search;
                                }
                            }
                        }
                    }
                }
            }
            match found {
                Some(j) => remap[i] = j,
                None => {
                    remap[i] = kept.len();
                    grid.entry((kx, ky, kz)).or_default().push(kept.len());
                    kept.push(i);
                }
            }
        }

        let removed = self.points.len() - kept.len();
        if removed == 0 {
            return 0;
        }
        self.points = kept.iter().map(|&i| self.points[i]).collect();
        self.point_data = self.point_data.iter().map(|a| a.gathered(&kept)).collect();
        for tri in &mut self.triangles {
            for v in tri.iter_mut() {
                *v = remap[*v];
            }
        }
        for line in &mut self.lines {
            for v in line.iter_mut() {
                *v = remap[*v];
            }
        }

        // Drop triangles collapsed by the weld
        let keep: Vec<bool> = self
            .triangles
            .iter()
            .map(|t| t[0] != t[1] && t[1] != t[2] && t[0] != t[2])
            .collect();
        if keep.iter().any(|k| !k) {
            self.triangles = self
                .triangles
                .iter()
                .zip(&keep)
                .filter(|(_, &k)| k)
                .map(|(t, _)| *t)
                .collect();
            self.cell_data = self.cell_data.iter().map(|a| a.filtered(&keep)).collect();
        }
        removed
    }

    /// Append another surface, offsetting indices. Arrays present in both
    /// meshes are concatenated; arrays present in only one are dropped.
    pub fn append(&mut self, other: &SurfaceMesh) {
        let offset = self.points.len();
        self.points.extend_from_slice(&other.points);
        self.triangles
            .extend(other.triangles.iter().map(|t| [t[0] + offset, t[1] + offset, t[2] + offset]));
        self.lines
            .extend(other.lines.iter().map(|l| l.iter().map(|v| v + offset).collect()));
        self.point_data = concat_arrays(&self.point_data, &other.point_data);
        self.cell_data = concat_arrays(&self.cell_data, &other.cell_data);
    }
}

fn concat_arrays(a: &[DataArray], b: &[DataArray]) -> Vec<DataArray> {
    use super::ArrayValues;

    a.iter()
        .filter_map(|x| {
            let y = b.iter().find(|y| y.name == x.name && y.components == x.components)?;
            let values = match (&x.values, &y.values) {
                (ArrayValues::Float64(p), ArrayValues::Float64(q)) => {
                    ArrayValues::Float64(p.iter().chain(q).copied().collect())
                }
                (ArrayValues::Int32(p), ArrayValues::Int32(q)) => {
                    ArrayValues::Int32(p.iter().chain(q).copied().collect())
                }
                _ => return None,
            };
            Some(DataArray {
                name: x.name.clone(),
                components: x.components,
                values,
            })
        })
        .collect()
}

/// Volume cell kinds, numbered as in the legacy VTK format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CellType {
    Triangle,
    Tetra,
    Wedge,
}

impl CellType {
    pub fn vtk_id(self) -> i32 {
        match self {
            CellType::Triangle => 5,
            CellType::Tetra => 10,
            CellType::Wedge => 13,
        }
    }

    pub fn from_vtk_id(id: i32) -> Option<Self> {
        match id {
            5 => Some(CellType::Triangle),
            10 => Some(CellType::Tetra),
            13 => Some(CellType::Wedge),
            _ => None,
        }
    }

    pub fn point_count(self) -> usize {
        match self {
            CellType::Triangle => 3,
            CellType::Tetra => 4,
            CellType::Wedge => 6,
        }
    }
}

/// A single volume cell
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cell {
    pub kind: CellType,
    pub points: Vec<usize>,
}

impl Cell {
    pub fn tetra(points: [usize; 4]) -> Self {
        Self {
            kind: CellType::Tetra,
            points: points.to_vec(),
        }
    }

    pub fn wedge(points: [usize; 6]) -> Self {
        Self {
            kind: CellType::Wedge,
            points: points.to_vec(),
        }
    }
}

/// Unstructured volume mesh of tetrahedra and boundary-layer wedges
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VolumeMesh {
    pub points: Vec<Point3<f64>>,
    pub cells: Vec<Cell>,
    pub point_data: Vec<DataArray>,
    pub cell_data: Vec<DataArray>,
}

impl VolumeMesh {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cell_count(&self) -> usize {
        self.cells.len()
    }

    pub fn count_of(&self, kind: CellType) -> usize {
        self.cells.iter().filter(|c| c.kind == kind).count()
    }

    pub fn point_array(&self, name: &str) -> Option<&DataArray> {
        self.point_data.iter().find(|a| a.name == name)
    }

    pub fn cell_array(&self, name: &str) -> Option<&DataArray> {
        self.cell_data.iter().find(|a| a.name == name)
    }

    pub fn set_cell_array(&mut self, array: DataArray) {
        match self.cell_data.iter_mut().find(|a| a.name == array.name) {
            Some(slot) => *slot = array,
            None => self.cell_data.push(array),
        }
    }

    /// Signed volume of a tetrahedron cell; positive when correctly oriented
    pub fn tet_volume(&self, cell: &Cell) -> f64 {
        let p = &cell.points;
        tet_signed_volume(
            &self.points[p[0]],
            &self.points[p[1]],
            &self.points[p[2]],
            &self.points[p[3]],
        )
    }

    /// Total volume; wedges are split into three tetrahedra
    pub fn volume(&self) -> f64 {
        self.cells
            .iter()
            .map(|cell| {
                let p = &cell.points;
                match cell.kind {
                    CellType::Tetra => self.tet_volume(cell),
                    CellType::Wedge => {
                        let q = |i: usize| &self.points[p[i]];
                        tet_signed_volume(q(0), q(1), q(2), q(5)).abs()
                            + tet_signed_volume(q(0), q(1), q(5), q(4)).abs()
                            + tet_signed_volume(q(0), q(4), q(5), q(3)).abs()
                    }
                    CellType::Triangle => 0.0,
                }
            })
            .sum()
    }
}

impl CellType {
    /// Local vertex pairs forming the edges of this cell type
    pub fn edges(self) -> &'static [(usize, usize)] {
        match self {
            CellType::Triangle => &[(0, 1), (1, 2), (2, 0)],
            CellType::Tetra => &[(0, 1), (0, 2), (0, 3), (1, 2), (1, 3), (2, 3)],
            CellType::Wedge => &[(0, 1), (1, 2), (2, 0), (3, 4), (4, 5), (5, 3), (0, 3), (1, 4), (2, 5)],
        }
    }
}

impl VolumeMesh {
    /// Lengths of all unique cell edges
    pub fn edge_lengths(&self) -> Vec<f64> {
        let mut seen = BTreeSet::new();
        let mut lengths = Vec::new();
        for cell in &self.cells {
            for &(i, j) in cell.kind.edges() {
                let (a, b) = (cell.points[i], cell.points[j]);
                if seen.insert((a.min(b), a.max(b))) {
                    lengths.push((self.points[a] - self.points[b]).norm());
                }
            }
        }
        lengths
    }
}

/// Signed volume of tetrahedron (a, b, c, d), positive when d lies on the
/// side of the right-hand normal of triangle (a, b, c), the VTK convention.
pub fn tet_signed_volume(a: &Point3<f64>, b: &Point3<f64>, c: &Point3<f64>, d: &Point3<f64>) -> f64 {
    (b - a).cross(&(c - a)).dot(&(d - a)) / 6.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit_square() -> SurfaceMesh {
        SurfaceMesh::from_parts(
            vec![
                Point3::new(0.0, 0.0, 0.0),
                Point3::new(1.0, 0.0, 0.0),
                Point3::new(1.0, 1.0, 0.0),
                Point3::new(0.0, 1.0, 0.0),
            ],
            vec![[0, 1, 2], [0, 2, 3]],
        )
    }

    #[test]
    fn test_area_and_normals() {
        let mesh = unit_square();
        assert!((mesh.area() - 1.0).abs() < 1e-12);
        assert_eq!(mesh.triangle_normal(0), Vector3::new(0.0, 0.0, 1.0));
        assert_eq!(mesh.edge_lengths().len(), 5);
    }

    #[test]
    fn test_split_shared_edge() {
        let mut mesh = unit_square();
        mesh.set_face_ids(vec![2, 5]);
        mesh.set_array(
            Association::Point,
            DataArray::scalars_f64("Height", vec![0.0, 1.0, 2.0, 3.0]),
        );
        let m = mesh.split_edge(2, 0).unwrap();
        assert_eq!(m, 4);
        assert_eq!(mesh.points[m], Point3::new(0.5, 0.5, 0.0));
        assert_eq!(mesh.triangles, vec![[4, 1, 2], [0, 4, 3], [0, 1, 4], [4, 2, 3]]);
        assert_eq!(mesh.face_ids().unwrap(), &[2, 5, 2, 5]);
        assert_eq!(mesh.point_array("Height").unwrap().value(m, 0), 1.0);
        assert!((mesh.area() - 1.0).abs() < 1e-12);
        assert_eq!(mesh.split_edge(1, 3), None);
    }

    #[test]
    fn test_face_id_array() {
        let mut mesh = unit_square();
        assert!(mesh.face_ids().is_none());
        mesh.set_face_ids(vec![2, 5]);
        assert_eq!(mesh.face_id_set().into_iter().collect::<Vec<_>>(), vec![2, 5]);

        let half = mesh.retain_triangles(&[false, true]);
        assert_eq!(half.face_ids(), Some(&[5][..]));
        assert_eq!(half.point_count(), 3);
    }

    #[test]
    fn test_weld_points() {
        let mut mesh = unit_square();
        let mut other = unit_square();
        for p in &mut other.points {
            p.x += 1.0;
        }
        mesh.append(&other);
        assert_eq!(mesh.point_count(), 8);
        let removed = mesh.weld_points(1e-9);
        assert_eq!(removed, 2);
        assert_eq!(mesh.triangle_count(), 4);
    }

    #[test]
    fn test_tet_orientation() {
        let a = Point3::new(0.0, 0.0, 0.0);
        let b = Point3::new(1.0, 0.0, 0.0);
        let c = Point3::new(0.0, 1.0, 0.0);
        let d = Point3::new(0.0, 0.0, 1.0);
        assert!((tet_signed_volume(&a, &b, &c, &d) - 1.0 / 6.0).abs() < 1e-12);
        assert!(tet_signed_volume(&b, &a, &c, &d) < 0.0);
    }
}
