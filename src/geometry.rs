//! Built relief geometry and its Bevy mesh form.

use bevy::asset::RenderAssetUsages;
use bevy::mesh::{Indices, PrimitiveTopology};
use bevy::prelude::*;

use crate::mesher::{GeometryStyle, Surface};

/// Alternate vertex positions (and their normals) for one morph target.
///
/// Index `i` corresponds to vertex `i` of the owning [`Geometry`].
#[derive(Debug, Clone, PartialEq)]
pub struct MorphTarget {
    /// Vertex positions.
    pub vertices: Vec<Vec3>,
    /// Area-weighted vertex normals over the shared faces.
    pub normals: Vec<Vec3>,
}

/// Immutable relief geometry, shared through the geometry cache.
///
/// Every morph target has exactly as many vertices as [`Geometry::vertices`].
/// Morphable styles carry four targets (target 0 is the primary surface);
/// Block geometry carries only target 0.
#[derive(Debug, Clone, PartialEq)]
pub struct Geometry {
    /// Style that produced this geometry.
    pub style: GeometryStyle,
    /// Source heightmap `(width, height)`.
    pub dimensions: (u32, u32),
    /// Primary vertex positions.
    pub vertices: Vec<Vec3>,
    /// Counter-clockwise triangles indexing into `vertices`.
    pub faces: Vec<[u32; 3]>,
    /// UVs of each face's three corners.
    pub uvs: Vec<[Vec2; 3]>,
    /// Unit normal of each face.
    pub face_normals: Vec<Vec3>,
    /// Area-weighted unit normal of each vertex.
    pub vertex_normals: Vec<Vec3>,
    /// Alternate vertex sets for blending.
    pub morph_targets: Vec<MorphTarget>,
}

/// Positions and normals after applying morph weights.
#[derive(Debug, Clone, PartialEq)]
pub struct BlendedVertices {
    /// Blended positions.
    pub positions: Vec<Vec3>,
    /// Blended, renormalized normals.
    pub normals: Vec<Vec3>,
}

impl Geometry {
    pub(crate) fn from_surface(
        style: GeometryStyle,
        dimensions: (u32, u32),
        surface: Surface,
        targets: Vec<Vec<Vec3>>,
    ) -> Self {
        let Surface {
            vertices,
            faces,
            uvs,
        } = surface;

        let face_normals = faces
            .iter()
            .map(|face| face_cross(&vertices, face).normalize_or(Vec3::Z))
            .collect();
        let vertex_normals = vertex_normals(&vertices, &faces);
        let morph_targets = targets
            .into_iter()
            .map(|target| {
                debug_assert_eq!(target.len(), vertices.len());
                // Target 0 is the primary surface; skip recomputing it.
                let normals = if target == vertices {
                    vertex_normals.clone()
                } else {
                    self::vertex_normals(&target, &faces)
                };
                MorphTarget {
                    vertices: target,
                    normals,
                }
            })
            .collect();

        Self {
            style,
            dimensions,
            vertices,
            faces,
            uvs,
            face_normals,
            vertex_normals,
            morph_targets,
        }
    }

    /// Number of primary vertices.
    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    /// Number of triangles.
    pub fn face_count(&self) -> usize {
        self.faces.len()
    }

    /// Applies morph `weights` relative to the primary surface:
    /// `base + Σ wᵢ·(targetᵢ − base)`.
    ///
    /// Weights are an arbitrary linear combination; they are not normalized.
    /// Weights for targets the geometry does not carry are ignored.
    pub fn blend(&self, weights: [f32; 4]) -> BlendedVertices {
        let mut positions = self.vertices.clone();
        let mut normals = self.vertex_normals.clone();

        for (target, &weight) in self.morph_targets.iter().zip(weights.iter()) {
            if weight == 0.0 {
                continue;
            }
            for (i, p) in positions.iter_mut().enumerate() {
                *p += (target.vertices[i] - self.vertices[i]) * weight;
            }
            for (i, n) in normals.iter_mut().enumerate() {
                *n += (target.normals[i] - self.vertex_normals[i]) * weight;
            }
        }

        for n in &mut normals {
            *n = n.normalize_or(Vec3::Z);
        }
        BlendedVertices { positions, normals }
    }

    /// Converts the primary surface into a Bevy [`Mesh`].
    ///
    /// Produces a `TriangleList` mesh with positions, normals, UV_0 and `u32`
    /// indices. Per-face UVs are scattered onto vertices; the style
    /// algorithms never give one vertex two different UVs.
    pub fn to_mesh(&self) -> Mesh {
        let positions: Vec<[f32; 3]> = self.vertices.iter().map(|&v| v.into()).collect();
        let normals: Vec<[f32; 3]> = self.vertex_normals.iter().map(|&n| n.into()).collect();

        let mut uvs = vec![[0.0_f32; 2]; self.vertices.len()];
        for (face, face_uvs) in self.faces.iter().zip(&self.uvs) {
            for (&index, &uv) in face.iter().zip(face_uvs) {
                uvs[index as usize] = uv.into();
            }
        }

        let indices: Vec<u32> = self.faces.iter().flatten().copied().collect();

        let mut mesh = Mesh::new(
            PrimitiveTopology::TriangleList,
            RenderAssetUsages::default(),
        );
        mesh.insert_attribute(Mesh::ATTRIBUTE_POSITION, positions);
        mesh.insert_attribute(Mesh::ATTRIBUTE_NORMAL, normals);
        mesh.insert_attribute(Mesh::ATTRIBUTE_UV_0, uvs);
        mesh.insert_indices(Indices::U32(indices));
        mesh
    }
}

/// Unnormalized face normal; its length is twice the triangle's area.
fn face_cross(vertices: &[Vec3], face: &[u32; 3]) -> Vec3 {
    let [p0, p1, p2] = face.map(|i| vertices[i as usize]);
    (p1 - p0).cross(p2 - p0)
}

/// Area-weighted vertex normals.
///
/// Each triangle's cross product is accumulated at its three vertices, so
/// larger triangles contribute more, then the sums are normalized. Vertices
/// with no contribution default to +Z.
fn vertex_normals(vertices: &[Vec3], faces: &[[u32; 3]]) -> Vec<Vec3> {
    let mut normals = vec![Vec3::ZERO; vertices.len()];
    for face in faces {
        let n = face_cross(vertices, face);
        for &i in face {
            normals[i as usize] += n;
        }
    }
    normals
        .into_iter()
        .map(|n| n.normalize_or(Vec3::Z))
        .collect()
}
