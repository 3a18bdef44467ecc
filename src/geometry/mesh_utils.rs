// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! Mesh validation and connectivity utilities

use super::SurfaceMesh;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Undirected edge with the smaller index first
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Edge {
    pub v0: usize,
    pub v1: usize,
}

impl Edge {
    pub fn new(v0: usize, v1: usize) -> Self {
        if v0 < v1 {
            Self { v0, v1 }
        } else {
            Self { v0: v1, v1: v0 }
        }
    }
}

/// The three edges of a triangle
pub fn triangle_edges(tri: &[usize; 3]) -> [Edge; 3] {
    [
        Edge::new(tri[0], tri[1]),
        Edge::new(tri[1], tri[2]),
        Edge::new(tri[2], tri[0]),
    ]
}

/// Map every edge to the triangles using it, in ascending triangle order
pub fn edge_triangles(triangles: &[[usize; 3]]) -> BTreeMap<Edge, Vec<usize>> {
    let mut map: BTreeMap<Edge, Vec<usize>> = BTreeMap::new();
    for (t, tri) in triangles.iter().enumerate() {
        for edge in triangle_edges(tri) {
            map.entry(edge).or_default().push(t);
        }
    }
    map
}

/// Triangles incident to each vertex
pub fn vertex_triangles(point_count: usize, triangles: &[[usize; 3]]) -> Vec<Vec<usize>> {
    let mut incidence = vec![Vec::new(); point_count];
    for (t, tri) in triangles.iter().enumerate() {
        for &v in tri {
            incidence[v].push(t);
        }
    }
    incidence
}

/// Sorted, deduplicated vertex neighbors derived from triangles
pub fn vertex_neighbors(point_count: usize, triangles: &[[usize; 3]]) -> Vec<Vec<usize>> {
    let mut neighbors = vec![Vec::new(); point_count];
    for tri in triangles {
        for k in 0..3 {
            let (a, b) = (tri[k], tri[(k + 1) % 3]);
            neighbors[a].push(b);
            neighbors[b].push(a);
        }
    }
    for list in &mut neighbors {
        list.sort_unstable();
        list.dedup();
    }
    neighbors
}

/// Check if mesh is manifold (each edge shared by at most 2 triangles)
pub fn is_manifold(mesh: &SurfaceMesh) -> bool {
    edge_triangles(&mesh.triangles).values().all(|t| t.len() <= 2)
}

/// Check if mesh is closed (each edge shared by exactly 2 triangles)
pub fn is_closed(mesh: &SurfaceMesh) -> bool {
    !mesh.triangles.is_empty() && edge_triangles(&mesh.triangles).values().all(|t| t.len() == 2)
}

/// Edges used by exactly one triangle
pub fn boundary_edges(triangles: &[[usize; 3]]) -> Vec<Edge> {
    edge_triangles(triangles)
        .into_iter()
        .filter(|(_, t)| t.len() == 1)
        .map(|(e, _)| e)
        .collect()
}

/// Ordered boundary loops, following the winding of the adjacent triangles.
///
/// Returns `None` when a boundary vertex has more than one outgoing boundary
/// edge (a pinched loop), which cannot be capped as a simple polygon.
pub fn boundary_loops(triangles: &[[usize; 3]]) -> Option<Vec<Vec<usize>>> {
    let edges = edge_triangles(triangles);
    // Directed boundary edge as it appears in its only triangle
    let mut next: BTreeMap<usize, usize> = BTreeMap::new();
    for (edge, tris) in &edges {
        if tris.len() != 1 {
            continue;
        }
        let tri = triangles[tris[0]];
        let (a, b) = (0..3)
            .map(|k| (tri[k], tri[(k + 1) % 3]))
            .find(|&(a, b)| Edge::new(a, b) == *edge)?;
        if next.insert(a, b).is_some() {
            return None;
        }
    }

    let mut loops = Vec::new();
    while let Some((&start, _)) = next.iter().next() {
        let mut polygon = vec![start];
        let mut current = start;
        loop {
            let n = next.remove(&current)?;
            if n == start {
                break;
            }
            polygon.push(n);
            current = n;
        }
        loops.push(polygon);
    }
    Some(loops)
}

/// Triangles with area below `tolerance`
pub fn degenerate_triangles(mesh: &SurfaceMesh, tolerance: f64) -> Vec<usize> {
    (0..mesh.triangles.len())
        .filter(|&t| {
            let tri = mesh.triangles[t];
            tri[0] == tri[1] || tri[1] == tri[2] || tri[0] == tri[2] || mesh.triangle_area(t) <= tolerance
        })
        .collect()
}

/// Check that every interior edge is traversed in opposite directions by its two triangles
pub fn is_consistently_oriented(triangles: &[[usize; 3]]) -> bool {
    let mut directed: HashMap<(usize, usize), u32> = HashMap::new();
    for tri in triangles {
        for k in 0..3 {
            *directed.entry((tri[k], tri[(k + 1) % 3])).or_insert(0) += 1;
        }
    }
    directed.values().all(|&c| c == 1)
}

/// Number of edge-connected triangle components
pub fn connected_components(triangles: &[[usize; 3]]) -> usize {
    let edges = edge_triangles(triangles);
    let mut adjacency = vec![Vec::new(); triangles.len()];
    for tris in edges.values() {
        for &a in tris {
            for &b in tris {
                if a != b {
                    adjacency[a].push(b);
                }
            }
        }
    }
    let mut seen = vec![false; triangles.len()];
    let mut components = 0;
    for start in 0..triangles.len() {
        if seen[start] {
            continue;
        }
        components += 1;
        seen[start] = true;
        let mut stack = vec![start];
        while let Some(t) = stack.pop() {
            for &n in &adjacency[t] {
                if !seen[n] {
                    seen[n] = true;
                    stack.push(n);
                }
            }
        }
    }
    components
}

/// Mesh validation report
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeshValidation {
    pub is_manifold: bool,
    pub is_closed: bool,
    pub is_oriented: bool,
    pub edge_count: usize,
    pub boundary_edge_count: usize,
    pub degenerate_triangle_count: usize,
    pub component_count: usize,
}

impl MeshValidation {
    pub fn is_valid_shell(&self) -> bool {
        self.is_manifold && self.is_closed && self.is_oriented && self.degenerate_triangle_count == 0
    }
}

/// Validate mesh connectivity and geometry
pub fn validate_mesh(mesh: &SurfaceMesh) -> MeshValidation {
    let edges = edge_triangles(&mesh.triangles);
    let scale = mesh.bounding_box().diagonal().max(1e-300);
    MeshValidation {
        is_manifold: edges.values().all(|t| t.len() <= 2),
        is_closed: !edges.is_empty() && edges.values().all(|t| t.len() == 2),
        is_oriented: is_consistently_oriented(&mesh.triangles),
        edge_count: edges.len(),
        boundary_edge_count: edges.values().filter(|t| t.len() == 1).count(),
        degenerate_triangle_count: degenerate_triangles(mesh, 1e-14 * scale * scale).len(),
        component_count: connected_components(&mesh.triangles),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Point3;

    fn tetrahedron() -> SurfaceMesh {
        SurfaceMesh::from_parts(
            vec![
                Point3::new(0.0, 0.0, 0.0),
                Point3::new(1.0, 0.0, 0.0),
                Point3::new(0.0, 1.0, 0.0),
                Point3::new(0.0, 0.0, 1.0),
            ],
            vec![[0, 2, 1], [0, 1, 3], [1, 2, 3], [0, 3, 2]],
        )
    }

    #[test]
    fn test_closed_tetrahedron() {
        let mesh = tetrahedron();
        let report = validate_mesh(&mesh);
        assert!(report.is_valid_shell());
        assert_eq!(report.edge_count, 6);
        assert_eq!(report.component_count, 1);
        assert!(mesh.signed_volume() > 0.0);
    }

    #[test]
    fn test_boundary_loop_of_open_mesh() {
        let mut mesh = tetrahedron();
        mesh.triangles.remove(0);
        assert!(!is_closed(&mesh));
        let loops = boundary_loops(&mesh.triangles).unwrap();
        assert_eq!(loops.len(), 1);
        assert_eq!(loops[0].len(), 3);
        // The loop runs opposite to the removed triangle's winding
        let removed = [0usize, 2, 1];
        let l = &loops[0];
        let pos = l.iter().position(|&v| v == 0).unwrap();
        let after = l[(pos + 1) % 3];
        let removed_after = removed[1];
        assert_ne!(after, removed_after);
    }
}
