//! Relief geometry generation from heightmap pixels.
//!
//! [`ReliefMeshBuilder`] turns up to four equally sized [`PixelBuffer`]s into
//! a [`Geometry`]. Slot 0 supplies the displayed surface; slots 1-3 supply
//! morph targets with the same topology and different depths.
//!
//! Three styles share one depth function ([`crate::pixels::depth`]) and lay
//! the image out over the unit square in the XY plane with depth along +Z:
//!
//! - [`GeometryStyle::Smooth`]: one shared vertex per texel, two triangles
//!   per grid cell. Topology is fixed, so morph targets are supported.
//! - [`GeometryStyle::Block`]: one raised column per texel with side walls
//!   only toward strictly lower neighbors. Topology depends on the depths, so
//!   only a single heightmap is accepted.
//! - [`GeometryStyle::Float`]: one detached quad per texel, no walls. Topology
//!   is fixed, so morph targets are supported.
//!
//! All faces wind counter-clockwise seen from +Z.

use std::fmt;
use std::str::FromStr;

use bevy::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::geometry::Geometry;
use crate::pixels::PixelBuffer;

/// Number of heightmap slots, and of morph targets on morphable geometry.
pub const MORPH_TARGET_COUNT: usize = 4;

/// Default `max_height` of a relief.
pub const DEFAULT_MAX_HEIGHT: f32 = 200.0;

/// Fraction of its texel cell covered by a [`GeometryStyle::Float`] quad.
const FLOAT_QUAD_FILL: f32 = 0.8;

/// Geometry construction algorithm.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GeometryStyle {
    /// Continuous grid surface with shared vertices.
    #[default]
    Smooth,
    /// Raised per-texel columns with culled side walls.
    Block,
    /// Detached per-texel quads.
    Float,
}

impl GeometryStyle {
    /// Whether geometry of this style keeps the same topology for any depths,
    /// which is what makes vertex blending between heightmaps valid.
    pub fn supports_morph_targets(self) -> bool {
        !matches!(self, Self::Block)
    }

    fn algorithm(self) -> SurfaceFn {
        match self {
            Self::Smooth => smooth_surface,
            Self::Block => block_surface,
            Self::Float => float_surface,
        }
    }

    fn min_dimension(self) -> u32 {
        match self {
            Self::Smooth => 2,
            Self::Block | Self::Float => 1,
        }
    }
}

impl fmt::Display for GeometryStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Smooth => "smooth",
            Self::Block => "block",
            Self::Float => "float",
        })
    }
}

impl FromStr for GeometryStyle {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "smooth" => Ok(Self::Smooth),
            "block" => Ok(Self::Block),
            "float" => Ok(Self::Float),
            _ => Err(Error::UnsupportedStyle(s.to_string())),
        }
    }
}

/// Vertex, face and per-face UV buffers produced by one style algorithm.
#[derive(Debug, Default)]
pub(crate) struct Surface {
    pub vertices: Vec<Vec3>,
    pub faces: Vec<[u32; 3]>,
    pub uvs: Vec<[Vec2; 3]>,
}

impl Surface {
    /// Appends a quad given as `[top-left, top-right, bottom-left, bottom-right]`.
    fn push_quad(&mut self, corners: [Vec3; 4], uvs: [Vec2; 4], with_faces: bool) {
        let base = self.vertices.len() as u32;
        self.vertices.extend(corners);
        if with_faces {
            self.faces.push([base, base + 2, base + 1]);
            self.uvs.push([uvs[0], uvs[2], uvs[1]]);
            self.faces.push([base + 1, base + 2, base + 3]);
            self.uvs.push([uvs[1], uvs[2], uvs[3]]);
        }
    }
}

/// Style algorithm: `(pixels, max_height, with_faces) -> surface`.
///
/// With `with_faces == false` only vertices are emitted, in the same order.
type SurfaceFn = fn(&PixelBuffer, f32, bool) -> Surface;

/// Builds [`Geometry`] from heightmap pixels.
///
/// # Example
///
/// ```ignore
/// use bevy_heightmap_relief::{GeometryStyle, PixelBuffer, ReliefMeshBuilder};
///
/// let pixels = PixelBuffer::from_gray(2, 2, &[0, 64, 128, 255])?;
/// let geometry = ReliefMeshBuilder::new(GeometryStyle::Smooth)
///     .with_max_height(50.0)
///     .build(&[Some(&pixels)])?;
/// let mesh = geometry.to_mesh();
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReliefMeshBuilder {
    style: GeometryStyle,
    max_height: f32,
}

impl Default for ReliefMeshBuilder {
    fn default() -> Self {
        Self {
            style: GeometryStyle::default(),
            max_height: DEFAULT_MAX_HEIGHT,
        }
    }
}

impl ReliefMeshBuilder {
    /// Creates a builder for `style` with the default max height.
    pub fn new(style: GeometryStyle) -> Self {
        Self {
            style,
            ..Self::default()
        }
    }

    /// Sets the depth of a white texel. Validated by [`build`](Self::build).
    pub fn with_max_height(mut self, max_height: f32) -> Self {
        self.max_height = max_height;
        self
    }

    /// The configured style.
    pub fn style(&self) -> GeometryStyle {
        self.style
    }

    /// The configured max height.
    pub fn max_height(&self) -> f32 {
        self.max_height
    }

    /// Builds geometry from up to [`MORPH_TARGET_COUNT`] heightmap slots.
    ///
    /// Slot 0 is required. For morphable styles every morph target slot is
    /// filled: unpopulated slots (and slot 0) reuse the primary vertices,
    /// populated ones are rebuilt vertex-only from their own pixels. Block
    /// geometry carries only morph target 0.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidMaxHeight`] for a negative or non-finite max height.
    /// - [`Error::SlotIndexOutOfRange`] for more than four slots.
    /// - [`Error::MissingHeightmap`] if slot 0 is empty.
    /// - [`Error::DimensionMismatch`] if populated slots differ in size.
    /// - [`Error::TopologyConflict`] for Block style with several heightmaps.
    /// - [`Error::HeightmapTooSmall`] for a Smooth heightmap under 2x2.
    pub fn build(&self, heightmaps: &[Option<&PixelBuffer>]) -> Result<Geometry> {
        validate_max_height(self.max_height)?;
        if heightmaps.len() > MORPH_TARGET_COUNT {
            return Err(Error::SlotIndexOutOfRange {
                index: MORPH_TARGET_COUNT,
            });
        }
        let primary = heightmaps
            .first()
            .copied()
            .flatten()
            .ok_or(Error::MissingHeightmap { index: 0 })?;

        let expected = primary.dimensions();
        let mut populated = 0;
        for (index, pixels) in heightmaps.iter().enumerate() {
            let Some(pixels) = pixels else { continue };
            if pixels.dimensions() != expected {
                return Err(Error::DimensionMismatch {
                    index,
                    expected,
                    found: pixels.dimensions(),
                });
            }
            populated += 1;
        }

        if !self.style.supports_morph_targets() && populated > 1 {
            return Err(Error::TopologyConflict {
                style: self.style,
                populated,
            });
        }

        let (width, height) = expected;
        let min = self.style.min_dimension();
        if width < min || height < min {
            return Err(Error::HeightmapTooSmall {
                style: self.style,
                width,
                height,
            });
        }

        let algorithm = self.style.algorithm();
        let surface = algorithm(primary, self.max_height, true);

        let targets = if self.style.supports_morph_targets() {
            (0..MORPH_TARGET_COUNT)
                .map(|index| match heightmaps.get(index).copied().flatten() {
                    Some(pixels) if index > 0 => {
                        algorithm(pixels, self.max_height, false).vertices
                    }
                    _ => surface.vertices.clone(),
                })
                .collect()
        } else {
            vec![surface.vertices.clone()]
        };

        let geometry = Geometry::from_surface(self.style, expected, surface, targets);
        tracing::info!(
            style = %self.style,
            width,
            height,
            vertices = geometry.vertex_count(),
            faces = geometry.face_count(),
            morph_targets = geometry.morph_targets.len(),
            "built relief geometry"
        );
        Ok(geometry)
    }
}

/// Checks that `max_height` is finite and non-negative.
pub fn validate_max_height(max_height: f32) -> Result<()> {
    if max_height.is_finite() && max_height >= 0.0 {
        Ok(())
    } else {
        Err(Error::InvalidMaxHeight(max_height))
    }
}

/// Texel cell bounds in world space and UV space.
#[derive(Debug, Clone, Copy)]
struct TexelCell {
    x0: f32,
    x1: f32,
    /// Bottom edge (larger row index).
    y0: f32,
    /// Top edge.
    y1: f32,
    u0: f32,
    u1: f32,
    v0: f32,
    v1: f32,
}

impl TexelCell {
    fn new(col: u32, row: u32, width: u32, height: u32) -> Self {
        let (w, h) = (width as f32, height as f32);
        let (c, r) = (col as f32, row as f32);
        Self {
            x0: c / w,
            x1: (c + 1.0) / w,
            y0: 1.0 - (r + 1.0) / h,
            y1: 1.0 - r / h,
            u0: c / w,
            u1: (c + 1.0) / w,
            v0: r / h,
            v1: (r + 1.0) / h,
        }
    }

    /// The cell scaled about its center.
    fn shrunk(self, fill: f32) -> Self {
        let (cx, cy) = ((self.x0 + self.x1) * 0.5, (self.y0 + self.y1) * 0.5);
        let (hx, hy) = ((self.x1 - self.x0) * 0.5 * fill, (self.y1 - self.y0) * 0.5 * fill);
        Self {
            x0: cx - hx,
            x1: cx + hx,
            y0: cy - hy,
            y1: cy + hy,
            ..self
        }
    }

    fn corners(&self, z: f32) -> [Vec3; 4] {
        [
            Vec3::new(self.x0, self.y1, z),
            Vec3::new(self.x1, self.y1, z),
            Vec3::new(self.x0, self.y0, z),
            Vec3::new(self.x1, self.y0, z),
        ]
    }

    fn uvs(&self) -> [Vec2; 4] {
        [
            Vec2::new(self.u0, self.v0),
            Vec2::new(self.u1, self.v0),
            Vec2::new(self.u0, self.v1),
            Vec2::new(self.u1, self.v1),
        ]
    }

    fn center_uv(&self) -> Vec2 {
        Vec2::new((self.u0 + self.u1) * 0.5, (self.v0 + self.v1) * 0.5)
    }
}

fn smooth_surface(pixels: &PixelBuffer, max_height: f32, with_faces: bool) -> Surface {
    let (w, h) = pixels.dimensions();
    let (sx, sy) = ((w - 1) as f32, (h - 1) as f32);

    let mut surface = Surface {
        vertices: Vec::with_capacity(pixels.texel_count()),
        ..Surface::default()
    };
    for row in 0..h {
        for col in 0..w {
            surface.vertices.push(Vec3::new(
                col as f32 / sx,
                1.0 - row as f32 / sy,
                pixels.depth_at(col, row, max_height),
            ));
        }
    }
    if !with_faces {
        return surface;
    }

    // Each cell (col, row) -> (col+1, row+1) emits two triangles:
    //   tl──tr
    //   │╲  │     Triangle 1: tl, bl, tr
    //   │ ╲ │     Triangle 2: tr, bl, br
    //   bl──br
    let uv = |col: u32, row: u32| Vec2::new(col as f32 / sx, row as f32 / sy);
    let cells = (w as usize - 1) * (h as usize - 1);
    surface.faces.reserve(cells * 2);
    surface.uvs.reserve(cells * 2);
    for row in 0..h - 1 {
        for col in 0..w - 1 {
            let tl = row * w + col;
            let tr = tl + 1;
            let bl = tl + w;
            let br = bl + 1;

            surface.faces.push([tl, bl, tr]);
            surface
                .uvs
                .push([uv(col, row), uv(col, row + 1), uv(col + 1, row)]);
            surface.faces.push([tr, bl, br]);
            surface
                .uvs
                .push([uv(col + 1, row), uv(col, row + 1), uv(col + 1, row + 1)]);
        }
    }
    surface
}

fn float_surface(pixels: &PixelBuffer, max_height: f32, with_faces: bool) -> Surface {
    let (w, h) = pixels.dimensions();
    let mut surface = Surface::default();
    for row in 0..h {
        for col in 0..w {
            let cell = TexelCell::new(col, row, w, h);
            let z = pixels.depth_at(col, row, max_height);
            surface.push_quad(cell.shrunk(FLOAT_QUAD_FILL).corners(z), cell.uvs(), with_faces);
        }
    }
    surface
}

fn block_surface(pixels: &PixelBuffer, max_height: f32, with_faces: bool) -> Surface {
    let (w, h) = pixels.dimensions();
    let mut surface = Surface::default();
    for row in 0..h {
        for col in 0..w {
            let cell = TexelCell::new(col, row, w, h);
            let z = pixels.depth_at(col, row, max_height);
            surface.push_quad(cell.corners(z), cell.uvs(), with_faces);

            // Walls run from edge point `a` to `b`, ordered so the quad faces
            // away from the column. Neighbors outside the image get no wall.
            let walls = [
                (col > 0, (col.wrapping_sub(1), row), (cell.x0, cell.y1), (cell.x0, cell.y0)),
                (col + 1 < w, (col + 1, row), (cell.x1, cell.y0), (cell.x1, cell.y1)),
                (row > 0, (col, row.wrapping_sub(1)), (cell.x1, cell.y1), (cell.x0, cell.y1)),
                (row + 1 < h, (col, row + 1), (cell.x0, cell.y0), (cell.x1, cell.y0)),
            ];
            for (inside, (ncol, nrow), a, b) in walls {
                if !inside {
                    continue;
                }
                let nz = pixels.depth_at(ncol, nrow, max_height);
                if nz >= z {
                    continue;
                }
                let corners = [
                    Vec3::new(a.0, a.1, z),
                    Vec3::new(b.0, b.1, z),
                    Vec3::new(a.0, a.1, nz),
                    Vec3::new(b.0, b.1, nz),
                ];
                surface.push_quad(corners, [cell.center_uv(); 4], with_faces);
            }
        }
    }
    surface
}
