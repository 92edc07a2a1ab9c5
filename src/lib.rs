//! Heightmap relief meshes for Bevy.
//!
//! Turns grayscale/RGB heightmaps into 3D relief geometry, shares identical
//! geometry between entities through a refcounted content cache, and blends
//! between up to four heightmaps ("morph targets") over time.
//!
//! # Features
//!
//! - **Geometry styles**: [`GeometryStyle::Smooth`] grids,
//!   [`GeometryStyle::Block`] columns and [`GeometryStyle::Float`] tiles,
//!   built by [`ReliefMeshBuilder`] into a [`Geometry`] that converts to a
//!   Bevy [`Mesh`](bevy::prelude::Mesh).
//! - **Content cache**: [`ContentCache`] keyed by deterministic [`CacheKey`]s,
//!   used for both decoded heightmaps and built geometry.
//! - **Deduplicated loading**: [`HeightmapLoader`] starts one decode per
//!   source no matter how many reliefs ask for it; [`HeightmapSet`] tracks
//!   the four slots of one relief.
//! - **Morphing**: [`MorphAnimator`] interpolates blend weights with
//!   pause/resume.
//! - **Bevy plugin**: [`HeightmapReliefPlugin`] wires it all to the
//!   `AssetServer`, `Assets<Mesh>` and `Time`.
//!
//! # Example
//!
//! ```ignore
//! use bevy::prelude::*;
//! use bevy_heightmap_relief::{GeometryStyle, HeightmapRelief, HeightmapReliefPlugin};
//!
//! fn main() {
//!     App::new()
//!         .add_plugins((DefaultPlugins, HeightmapReliefPlugin))
//!         .add_systems(Startup, setup)
//!         .run();
//! }
//!
//! fn setup(mut commands: Commands) {
//!     commands.spawn(
//!         HeightmapRelief::new("maps/island.png")
//!             .with_max_height(0.2)
//!             .with_style(GeometryStyle::Block),
//!     );
//! }
//! ```

pub mod cache;
pub mod error;
pub mod geometry;
pub mod loader;
pub mod mesher;
pub mod morph;
pub mod pixels;
pub mod plugin;

pub use cache::{CacheKey, ContentCache};
pub use error::{Error, Result};
pub use geometry::{BlendedVertices, Geometry, MorphTarget};
pub use loader::{
    Delivery, HeightmapDecoder, HeightmapEntry, HeightmapLoader, HeightmapSet, HeightmapSlot,
    LoadStatus, SlotRequest, SlotState, Waiter,
};
pub use mesher::{
    DEFAULT_MAX_HEIGHT, GeometryStyle, MORPH_TARGET_COUNT, ReliefMeshBuilder, validate_max_height,
};
pub use morph::{MorphAnimator, MorphEvent, REST_WEIGHTS, one_hot};
pub use pixels::{PixelBuffer, depth};
pub use plugin::{
    HeightmapLoadFailed, HeightmapRelief, HeightmapReliefPlugin, MorphFinished, MorphStarted,
    ReliefCache, ReliefGeometry, ReliefGeometryChanged, ReliefImageChanged, ReliefSystems,
};
