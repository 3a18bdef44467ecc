// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! Mesh generation pipeline tests

use anyhow::Result;
use nalgebra::{Point3, Vector3};
use solidmesh::geometry::mesh_utils::{is_closed, is_manifold};
use solidmesh::geometry::CellType;
use solidmesh::io::VtkEncoding;
use solidmesh::meshing::{InsertionSide, LayerType};
use solidmesh::{
    BoundaryLayerSpec, Error, MeshKernelKind, MeshOptions, MeshPipeline, MeshState, OptionValue, Session, SessionConfig,
    SolidKernelKind, VolumeMesh,
};
use tempfile::tempdir;
use tracing_subscriber::EnvFilter;

/// Honor RUST_LOG when debugging a failing generation
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn session() -> Session {
    Session::new(SessionConfig {
        solid_kernel: SolidKernelKind::PolyData,
        mesh_kernel: MeshKernelKind::TetGen,
        ..SessionConfig::default()
    })
}

/// Pipeline bound to solid `name` with faces extracted and defaults set
fn prepared(session: &Session, name: &str, feature_angle: f64) -> Result<MeshPipeline> {
    init_tracing();
    let mut pipeline = session.mesh_solid(name)?;
    pipeline.extract_boundary_faces(feature_angle)?;
    pipeline.initialize_mesh()?;
    Ok(pipeline)
}

fn fraction_within(lengths: &[f64], low: f64, high: f64) -> f64 {
    let inside = lengths.iter().filter(|l| (low..=high).contains(*l)).count();
    inside as f64 / lengths.len() as f64
}

/// Mean edge length of tetrahedra whose centroid satisfies `select`
fn mean_tet_edge(volume: &VolumeMesh, select: impl Fn(&Point3<f64>) -> bool) -> f64 {
    let mut total = 0.0;
    let mut count = 0usize;
    for cell in volume.cells.iter().filter(|c| c.kind == CellType::Tetra) {
        let centroid = cell
            .points
            .iter()
            .fold(Vector3::zeros(), |acc, &v| acc + volume.points[v].coords)
            / 4.0;
        if !select(&Point3::from(centroid)) {
            continue;
        }
        for &(i, j) in CellType::Tetra.edges() {
            total += (volume.points[cell.points[i]] - volume.points[cell.points[j]]).norm();
            count += 1;
        }
    }
    assert!(count > 0, "no tetrahedra selected");
    total / count as f64
}

#[test]
fn test_global_edge_size_band() -> Result<()> {
    let mut session = session();
    session.make_box("box", Point3::origin(), Vector3::new(1.5, 1.5, 1.5))?;
    let mut pipeline = prepared(&session, "box", 45.0)?;
    pipeline.set_option("GlobalEdgeSize", &[OptionValue::Float(0.5)])?;
    let output = pipeline.generate()?;

    let surface_edges = output.surface.edge_lengths();
    assert!(fraction_within(&surface_edges, 0.25, 0.75) > 0.9);

    let volume = output.volume.as_ref().expect("volume requested by default");
    assert!(fraction_within(&volume.edge_lengths(), 0.25, 0.75) > 0.7);
    approx::assert_relative_eq!(volume.volume(), 27.0, max_relative = 0.05);

    let report = &output.report;
    assert!(report.tetrahedra > 0 && report.wedges == 0);
    assert!(report.mean_edge > 0.35 && report.mean_edge < 0.7, "{}", report);
    assert!(report.min_dihedral > 0.0);
    Ok(())
}

#[test]
fn test_sphere_refinement_shrinks_local_edges() -> Result<()> {
    let mut session = session();
    session.make_box("box", Point3::origin(), Vector3::new(1.5, 1.5, 1.5))?;
    let mut pipeline = prepared(&session, "box", 45.0)?;
    pipeline.set_option("GlobalEdgeSize", &[OptionValue::Float(0.5)])?;
    pipeline.add_sphere_refinement(0.15, 0.5, Point3::origin())?;
    pipeline.generate()?;

    let volume = pipeline.get_unstructured_grid()?;
    let inner = mean_tet_edge(volume, |c| c.coords.norm() < 0.3);
    let outer = mean_tet_edge(volume, |c| c.coords.norm() > 1.0);
    assert!(inner < 0.6 * outer, "inner {} outer {}", inner, outer);
    assert!(outer > 0.3 && outer < 0.75, "outer {}", outer);
    Ok(())
}

#[test]
fn test_cylinder_refinement_shrinks_edges_along_its_axis() -> Result<()> {
    let mut session = session();
    session.make_box("box", Point3::origin(), Vector3::new(1.5, 1.5, 1.5))?;
    let mut pipeline = prepared(&session, "box", 45.0)?;
    pipeline.set_option("GlobalEdgeSize", &[OptionValue::Float(0.5)])?;
    pipeline.add_cylinder_refinement(0.15, 0.4, 3.0, Point3::origin(), Vector3::z())?;
    let output = pipeline.generate()?;
    assert_eq!(output.report.recovered_fraction, 1.0);

    let volume = pipeline.get_unstructured_grid()?;
    let radial = |c: &Point3<f64>| c.x.hypot(c.y);
    let inner = mean_tet_edge(volume, |c| radial(c) < 0.25 && c.z.abs() < 1.0);
    let outer = mean_tet_edge(volume, |c| radial(c) > 1.1);
    assert!(inner < 0.6 * outer, "inner {} outer {}", inner, outer);
    approx::assert_relative_eq!(volume.volume(), 27.0, max_relative = 1e-6);
    Ok(())
}

#[test]
fn test_wall_faces_meshed_first() -> Result<()> {
    let mut session = session();
    session.make_cylinder("cyl", Point3::origin(), Vector3::z(), 1.0, 4.0)?;
    let mut pipeline = prepared(&session, "cyl", 90.0)?;
    pipeline.set_option("GlobalEdgeSize", &[OptionValue::Float(0.35)])?;
    pipeline.mark_wall_faces(&[1])?;
    pipeline.set_option("MeshWallFirst", &[OptionValue::Bool(true)])?;
    assert!(pipeline.options().mesh_wall_first);
    let output = pipeline.generate()?;

    let surface = &output.surface;
    assert!(is_manifold(surface) && is_closed(surface));
    assert_eq!(surface.face_id_set(), [1, 2, 3].into_iter().collect());
    let ids = surface.face_ids().expect("face ids survive meshing");
    let mut wall_edges = Vec::new();
    for (tri, corners) in surface.triangles.iter().enumerate() {
        if ids[tri] != 1 {
            continue;
        }
        for k in 0..3 {
            let p = surface.points[corners[k]];
            assert!(p.x.hypot(p.y) > 0.9, "wall vertex left the wall: {}", p);
            wall_edges.push((p - surface.points[corners[(k + 1) % 3]]).norm());
        }
    }
    assert!(fraction_within(&wall_edges, 0.175, 0.525) > 0.9);

    let volume = output.volume.as_ref().expect("volume mesh");
    assert_eq!(output.report.recovered_fraction, 1.0);
    approx::assert_relative_eq!(volume.volume(), surface.signed_volume(), max_relative = 1e-6);
    Ok(())
}

#[test]
fn test_boundary_layer_on_cylinder_wall() -> Result<()> {
    let mut session = session();
    session.make_cylinder("cyl", Point3::origin(), Vector3::z(), 1.0, 4.0)?;
    let mut pipeline = prepared(&session, "cyl", 90.0)?;
    pipeline.set_option("GlobalEdgeSize", &[OptionValue::Float(0.35)])?;
    pipeline.mark_wall_faces(&[1])?;
    pipeline.set_boundary_layer(BoundaryLayerSpec::new(
        [1],
        LayerType::Absolute,
        InsertionSide::Inward,
        2,
        vec![0.05],
    )?)?;
    let output = pipeline.generate()?;

    let ids = output.surface.face_ids().expect("face ids survive meshing");
    let wall_triangles = ids.iter().filter(|&&id| id == 1).count();
    assert!(wall_triangles > 0);
    assert_eq!(output.report.wedges, 2 * wall_triangles);

    let volume = output.volume.as_ref().expect("volume mesh");
    assert_eq!(volume.count_of(CellType::Wedge), output.report.wedges);
    approx::assert_relative_eq!(volume.volume(), output.surface.signed_volume(), max_relative = 0.05);
    Ok(())
}

#[test]
fn test_boundary_layer_needs_walls() -> Result<()> {
    let mut session = session();
    session.make_cylinder("cyl", Point3::origin(), Vector3::z(), 1.0, 4.0)?;
    let mut pipeline = prepared(&session, "cyl", 90.0)?;
    let spec = BoundaryLayerSpec::new([1], LayerType::Relative, InsertionSide::Inward, 1, vec![0.5])?;
    assert!(matches!(pipeline.set_boundary_layer(spec), Err(Error::WallFacesRequired(_))));
    Ok(())
}

#[test]
fn test_distance_field_sizing_from_centerlines() -> Result<()> {
    let mut session = session();
    session.make_cylinder("tube", Point3::origin(), Vector3::x(), 1.0, 6.0)?;
    session.extract_boundary_faces("tube", 90.0)?;
    session.to_polydata("tube", "surface")?;
    session.remesh_surface("surface", "surface", 0.2, 0.4)?;
    session.centerlines("lines", "surface", &[2], &[3])?;
    session.distance_to_centerlines("surface", "lines")?;

    init_tracing();
    let mut pipeline = session.mesh_pipeline();
    pipeline.bind_surface(session.store().get_surface("surface")?.clone())?;
    pipeline.extract_boundary_faces(90.0)?;
    pipeline.initialize_mesh()?;
    pipeline.set_option("GlobalEdgeSize", &[OptionValue::Float(1.0)])?;
    pipeline.set_option("VolumeMeshFlag", &[OptionValue::Bool(false)])?;
    pipeline.set_size_function_field(0.3, "DistanceToCenterlines")?;
    let output = pipeline.generate()?;

    assert!(output.volume.is_none());
    // Away from the caps the field is the tube radius
    let surface = &output.surface;
    let ids = surface.face_ids().expect("face ids survive meshing");
    let mut lengths = Vec::new();
    for (tri, corners) in surface.triangles.iter().enumerate() {
        if ids[tri] != 1 || surface.triangle_centroid(tri).x.abs() > 2.0 {
            continue;
        }
        for k in 0..3 {
            lengths.push((surface.points[corners[k]] - surface.points[corners[(k + 1) % 3]]).norm());
        }
    }
    let mean = lengths.iter().sum::<f64>() / lengths.len() as f64;
    assert!(mean > 0.2 && mean < 0.4, "mean wall edge {}", mean);
    Ok(())
}

#[test]
fn test_missing_size_field_array() -> Result<()> {
    let mut session = session();
    session.make_sphere("ball", Point3::origin(), 1.0)?;
    let mut pipeline = prepared(&session, "ball", 90.0)?;
    assert!(matches!(
        pipeline.set_size_function_field(0.2, "DistanceToCenterlines"),
        Err(Error::MissingArray(_))
    ));
    Ok(())
}

#[test]
fn test_options_from_toml() -> Result<()> {
    let options = MeshOptions::from_toml("GlobalEdgeSize = 0.4\nLocalEdgeSize = [[2, 0.1]]\nOptimization = 5\n")?;
    assert_eq!(options.global_edge_size, Some(0.4));
    assert_eq!(options.local_size(2), Some(0.1));
    assert_eq!(options.optimization, 5);
    assert!(options.surface_mesh_flag && options.volume_mesh_flag);

    assert!(matches!(
        MeshOptions::from_toml("GlobalEdgeSise = 0.4\n"),
        Err(Error::UnknownOption(_))
    ));

    let mut session = session();
    session.make_cylinder("cyl", Point3::origin(), Vector3::z(), 1.0, 2.0)?;
    let mut pipeline = prepared(&session, "cyl", 90.0)?;
    pipeline.set_options(options)?;
    assert_eq!(pipeline.state(), MeshState::Configured);
    assert_eq!(pipeline.options().global_edge_size, Some(0.4));
    Ok(())
}

#[test]
fn test_volume_vtk_round_trip_and_reload() -> Result<()> {
    let dir = tempdir()?;
    let mut session = session();
    session.make_sphere("ball", Point3::origin(), 1.0)?;
    let mut pipeline = prepared(&session, "ball", 90.0)?;
    pipeline.set_option("GlobalEdgeSize", &[OptionValue::Float(0.4)])?;
    pipeline.generate()?;
    pipeline.export_volume(session.store_mut(), "grid")?;
    assert_eq!(pipeline.state(), MeshState::Exported);

    let path = dir.path().join("grid.vtu");
    session.export_vtk("grid", &path, VtkEncoding::Ascii)?;
    session.import_vtk("grid_copy", &path)?;
    let original = session.store().get_volume("grid")?;
    let restored = session.store().get_volume("grid_copy")?;
    assert_eq!(original.cells, restored.cells);
    approx::assert_relative_eq!(original.volume(), restored.volume(), max_relative = 1e-9);

    let mut reloaded = session.mesh_pipeline();
    reloaded.load_mesh(&path)?;
    assert_eq!(reloaded.state(), MeshState::Generated);
    let boundary = reloaded.get_polydata()?;
    assert!(is_manifold(boundary) && is_closed(boundary));
    approx::assert_relative_eq!(boundary.signed_volume(), original.volume(), max_relative = 1e-6);
    Ok(())
}
