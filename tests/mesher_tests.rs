use bevy::prelude::*;
use bevy_heightmap_relief::{
    CacheKey, Error, GeometryStyle, MORPH_TARGET_COUNT, PixelBuffer, ReliefMeshBuilder, depth,
};

fn flat_map(w: u32, h: u32, level: u8) -> PixelBuffer {
    PixelBuffer::from_gray(w, h, &vec![level; (w * h) as usize]).unwrap()
}

fn ramp_map(w: u32, h: u32, step: u8) -> PixelBuffer {
    let levels: Vec<u8> = (0..h).flat_map(|_| (0..w).map(|x| x as u8 * step)).collect();
    PixelBuffer::from_gray(w, h, &levels).unwrap()
}

fn bump_map() -> PixelBuffer {
    PixelBuffer::from_gray(3, 3, &[0, 0, 0, 0, 255, 0, 0, 0, 0]).unwrap()
}

fn approx(a: Vec3, b: Vec3) -> bool {
    (a - b).length() < 1e-5
}

#[test]
fn depth_averages_rgb_and_ignores_alpha() {
    let pixels = PixelBuffer::new(1, 1, vec![30, 60, 90, 0]).unwrap();
    let d = depth(&pixels, 0, 255.0);
    assert!((d - 60.0).abs() < 1e-4, "expected 60, got {d}");
}

#[test]
fn depth_at_indexes_rows_by_width() {
    let pixels = PixelBuffer::from_gray(3, 2, &[0, 15, 30, 45, 60, 255]).unwrap();
    for (x, y, expected) in [(0, 1, 45.0), (2, 1, 255.0), (2, 0, 30.0)] {
        let d = pixels.depth_at(x, y, 255.0);
        assert!((d - expected).abs() < 1e-3, "texel ({x}, {y}): expected {expected}, got {d}");
    }
}

#[test]
fn pixel_buffer_rejects_wrong_length() {
    let err = PixelBuffer::new(2, 2, vec![0; 15]).unwrap_err();
    assert!(matches!(err, Error::InvalidPixelBuffer { len: 15, .. }));
}

#[test]
fn smooth_vertex_and_face_counts_match_dimensions() {
    let map = flat_map(5, 7, 0);
    let geometry = ReliefMeshBuilder::new(GeometryStyle::Smooth)
        .build(&[Some(&map)])
        .unwrap();
    assert_eq!(geometry.vertex_count(), 5 * 7);
    assert_eq!(geometry.face_count(), 2 * (5 - 1) * (7 - 1));
    assert_eq!(geometry.uvs.len(), geometry.face_count());
}

#[test]
fn smooth_fills_every_morph_target() {
    let a = flat_map(4, 3, 0);
    let b = ramp_map(4, 3, 40);
    let geometry = ReliefMeshBuilder::new(GeometryStyle::Smooth)
        .build(&[Some(&a), None, Some(&b)])
        .unwrap();
    assert_eq!(geometry.morph_targets.len(), MORPH_TARGET_COUNT);
    for target in &geometry.morph_targets {
        assert_eq!(target.vertices.len(), 4 * 3);
        assert_eq!(target.normals.len(), 4 * 3);
    }
    // Unpopulated slots reuse the primary vertices.
    assert_eq!(geometry.morph_targets[0].vertices, geometry.vertices);
    assert_eq!(geometry.morph_targets[1].vertices, geometry.vertices);
    assert_eq!(geometry.morph_targets[3].vertices, geometry.vertices);
}

#[test]
fn smooth_morph_target_only_changes_depth() {
    let a = flat_map(4, 4, 0);
    let b = ramp_map(4, 4, 50);
    let geometry = ReliefMeshBuilder::new(GeometryStyle::Smooth)
        .with_max_height(10.0)
        .build(&[Some(&a), Some(&b)])
        .unwrap();
    let target = &geometry.morph_targets[1];
    for (i, (base, morphed)) in geometry.vertices.iter().zip(&target.vertices).enumerate() {
        assert_eq!(base.x, morphed.x, "x of vertex {i}");
        assert_eq!(base.y, morphed.y, "y of vertex {i}");
    }
    // Vertex (x=3, y=0): level 150 → 150/255 * 10.
    let expected = 150.0 / 255.0 * 10.0;
    assert!((target.vertices[3].z - expected).abs() < 1e-4);
}

#[test]
fn positions_encode_depth() {
    let map = bump_map();
    let geometry = ReliefMeshBuilder::new(GeometryStyle::Smooth)
        .with_max_height(50.0)
        .build(&[Some(&map)])
        .unwrap();
    // Vertex at (x=1, y=1) is index y*w+x = 4
    let center = geometry.vertices[4];
    assert_eq!(center, Vec3::new(0.5, 0.5, 50.0));
}

#[test]
fn positions_span_the_unit_square() {
    let map = flat_map(4, 4, 0);
    let geometry = ReliefMeshBuilder::default().build(&[Some(&map)]).unwrap();
    assert_eq!(geometry.vertices[0], Vec3::new(0.0, 1.0, 0.0));
    assert_eq!(*geometry.vertices.last().unwrap(), Vec3::new(1.0, 0.0, 0.0));
}

#[test]
fn flat_normals_point_toward_viewer() {
    let map = flat_map(4, 4, 128);
    let geometry = ReliefMeshBuilder::default().build(&[Some(&map)]).unwrap();
    for n in &geometry.vertex_normals {
        assert!(n.z > 0.99, "flat relief normal z should be ~1.0, got {n:?}");
    }
    for n in &geometry.face_normals {
        assert!(approx(*n, Vec3::Z), "face normal {n:?}");
    }
}

#[test]
fn ramp_normals_have_x_component() {
    let map = ramp_map(8, 8, 30);
    let geometry = ReliefMeshBuilder::default()
        .with_max_height(1.0)
        .build(&[Some(&map)])
        .unwrap();
    let interior = geometry.vertex_normals[8 + 4];
    assert!(
        interior.x < -0.01,
        "ramp rising along +X should tilt normals toward -X, got {interior:?}"
    );
}

#[test]
fn smooth_rejects_single_row() {
    let map = flat_map(1, 1, 0);
    let err = ReliefMeshBuilder::new(GeometryStyle::Smooth)
        .build(&[Some(&map)])
        .unwrap_err();
    assert!(matches!(err, Error::HeightmapTooSmall { .. }));
}

#[test]
fn block_flat_map_has_only_front_faces() {
    let map = flat_map(5, 3, 200);
    let geometry = ReliefMeshBuilder::new(GeometryStyle::Block)
        .build(&[Some(&map)])
        .unwrap();
    assert_eq!(geometry.face_count(), 2 * 5 * 3);
    assert_eq!(geometry.vertex_count(), 4 * 5 * 3);
    assert_eq!(geometry.morph_targets.len(), 1);
}

#[test]
fn block_walls_only_face_lower_neighbors() {
    let map = bump_map();
    let geometry = ReliefMeshBuilder::new(GeometryStyle::Block)
        .build(&[Some(&map)])
        .unwrap();
    // 9 front quads plus 4 walls around the raised center.
    assert_eq!(geometry.face_count(), 2 * (9 + 4));

    for outward in [Vec3::X, Vec3::NEG_X, Vec3::Y, Vec3::NEG_Y] {
        let count = geometry
            .face_normals
            .iter()
            .filter(|n| approx(**n, outward))
            .count();
        assert_eq!(count, 2, "expected one wall quad facing {outward:?}");
    }
}

#[test]
fn block_rejects_multiple_heightmaps() {
    let a = flat_map(2, 2, 0);
    let b = flat_map(2, 2, 100);
    let err = ReliefMeshBuilder::new(GeometryStyle::Block)
        .build(&[Some(&a), Some(&b)])
        .unwrap_err();
    assert_eq!(
        err,
        Error::TopologyConflict {
            style: GeometryStyle::Block,
            populated: 2,
        }
    );
}

#[test]
fn float_topology_ignores_depths() {
    let flat = flat_map(4, 4, 0);
    let ramp = ramp_map(4, 4, 60);
    let builder = ReliefMeshBuilder::new(GeometryStyle::Float);
    let a = builder.build(&[Some(&flat)]).unwrap();
    let b = builder.build(&[Some(&ramp)]).unwrap();
    assert_eq!(a.vertex_count(), 4 * 16);
    assert_eq!(a.face_count(), 2 * 16);
    assert_eq!(a.vertex_count(), b.vertex_count());
    assert_eq!(a.faces, b.faces);
}

#[test]
fn float_quads_do_not_touch() {
    let map = flat_map(2, 1, 0);
    let geometry = ReliefMeshBuilder::new(GeometryStyle::Float)
        .build(&[Some(&map)])
        .unwrap();
    // Quad corners are [tl, tr, bl, br]; quad 1 starts at vertex 4.
    let right_edge_of_first = geometry.vertices[1].x;
    let left_edge_of_second = geometry.vertices[4].x;
    assert!(right_edge_of_first < 0.5);
    assert!(left_edge_of_second > 0.5);
}

#[test]
fn float_supports_morph_targets() {
    let a = flat_map(3, 3, 0);
    let b = flat_map(3, 3, 255);
    let geometry = ReliefMeshBuilder::new(GeometryStyle::Float)
        .with_max_height(2.0)
        .build(&[Some(&a), None, None, Some(&b)])
        .unwrap();
    assert_eq!(geometry.morph_targets.len(), MORPH_TARGET_COUNT);
    let raised = &geometry.morph_targets[3];
    assert_eq!(raised.vertices.len(), geometry.vertex_count());
    assert!(raised.vertices.iter().all(|v| (v.z - 2.0).abs() < 1e-5));
}

#[test]
fn builder_rejects_mismatched_dimensions() {
    let a = flat_map(3, 3, 0);
    let b = flat_map(4, 3, 0);
    let err = ReliefMeshBuilder::default()
        .build(&[Some(&a), Some(&b)])
        .unwrap_err();
    assert_eq!(
        err,
        Error::DimensionMismatch {
            index: 1,
            expected: (3, 3),
            found: (4, 3),
        }
    );
}

#[test]
fn builder_requires_primary_heightmap() {
    let b = flat_map(3, 3, 0);
    let err = ReliefMeshBuilder::default()
        .build(&[None, Some(&b)])
        .unwrap_err();
    assert_eq!(err, Error::MissingHeightmap { index: 0 });
}

#[test]
fn builder_rejects_negative_max_height() {
    let map = flat_map(2, 2, 0);
    let err = ReliefMeshBuilder::default()
        .with_max_height(-1.0)
        .build(&[Some(&map)])
        .unwrap_err();
    assert!(matches!(err, Error::InvalidMaxHeight(_)));
}

#[test]
fn identical_configurations_share_key_and_topology() {
    let map = ramp_map(6, 4, 20);
    let sources = ["hills.png", "", "", ""];
    let key_a = CacheKey::geometry(&sources, 200.0, GeometryStyle::Block);
    let key_b = CacheKey::geometry(&sources, 200.0, GeometryStyle::Block);
    assert_eq!(key_a, key_b);

    let builder = ReliefMeshBuilder::new(GeometryStyle::Block);
    let a = builder.build(&[Some(&map)]).unwrap();
    let b = builder.build(&[Some(&map)]).unwrap();
    assert_eq!(a.vertex_count(), b.vertex_count());
    assert_eq!(a.face_count(), b.face_count());
}

#[test]
fn blend_interpolates_relative_to_primary() {
    let a = flat_map(2, 2, 0);
    let b = flat_map(2, 2, 255);
    let geometry = ReliefMeshBuilder::default()
        .with_max_height(4.0)
        .build(&[Some(&a), Some(&b)])
        .unwrap();

    let rest = geometry.blend([1.0, 0.0, 0.0, 0.0]);
    assert_eq!(rest.positions, geometry.vertices);

    let full = geometry.blend([0.0, 1.0, 0.0, 0.0]);
    assert!(full.positions.iter().all(|p| (p.z - 4.0).abs() < 1e-5));

    let half = geometry.blend([0.5, 0.5, 0.0, 0.0]);
    assert!(half.positions.iter().all(|p| (p.z - 2.0).abs() < 1e-5));
    assert!(half.normals.iter().all(|n| (n.length() - 1.0).abs() < 1e-5));
}

#[test]
fn mesh_has_all_required_attributes() {
    let map = flat_map(4, 4, 0);
    let mesh = ReliefMeshBuilder::default()
        .build(&[Some(&map)])
        .unwrap()
        .to_mesh();
    assert_eq!(mesh.count_vertices(), 4 * 4);
    assert!(
        mesh.attribute(Mesh::ATTRIBUTE_POSITION).is_some(),
        "missing POSITION"
    );
    assert!(
        mesh.attribute(Mesh::ATTRIBUTE_NORMAL).is_some(),
        "missing NORMAL"
    );
    assert_eq!(
        mesh.attribute(Mesh::ATTRIBUTE_UV_0)
            .expect("mesh must have UV_0")
            .len(),
        4 * 4
    );
}

#[test]
fn mesh_index_count_matches_faces() {
    let map = bump_map();
    let geometry = ReliefMeshBuilder::new(GeometryStyle::Block)
        .build(&[Some(&map)])
        .unwrap();
    let mesh = geometry.to_mesh();
    assert_eq!(
        mesh.indices().expect("mesh must have indices").len(),
        geometry.face_count() * 3
    );
}

#[test]
fn style_names_parse() {
    assert_eq!("Block".parse::<GeometryStyle>().unwrap(), GeometryStyle::Block);
    assert_eq!(" float ".parse::<GeometryStyle>().unwrap(), GeometryStyle::Float);
    assert_eq!(
        "voxel".parse::<GeometryStyle>().unwrap_err(),
        Error::UnsupportedStyle("voxel".to_string())
    );
}
