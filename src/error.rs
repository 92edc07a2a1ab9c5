//! Error types for relief generation, caching and heightmap loading.

use thiserror::Error;

use crate::cache::CacheKey;
use crate::mesher::GeometryStyle;

/// Result type for relief operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by the relief engine.
///
/// None of these are recoverable by retrying the same call: they report a
/// caller bug (cache bookkeeping, bad slot index), an inconsistent
/// configuration (dimension mismatch, topology conflict) or a failed decode.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {
    /// `get`, `add_ref` or `release` on a key the cache does not hold.
    #[error("cache has no entry for key `{key}`")]
    CacheMiss {
        /// The missing key.
        key: CacheKey,
    },
    /// `set` on a key that is already present.
    #[error("cache already holds an entry for key `{key}`")]
    KeyCollision {
        /// The duplicated key.
        key: CacheKey,
    },
    /// Two populated heightmap slots have different dimensions.
    #[error("heightmap slot {index} has size {found:?} but the other slots are {expected:?}")]
    DimensionMismatch {
        /// The slot whose buffer conflicts.
        index: usize,
        /// Dimensions shared by the previously populated slots.
        expected: (u32, u32),
        /// Dimensions of the conflicting buffer.
        found: (u32, u32),
    },
    /// A style with content-dependent topology was given several heightmaps.
    #[error("{style} geometry supports a single heightmap, got {populated}")]
    TopologyConflict {
        /// The requested style.
        style: GeometryStyle,
        /// Number of populated heightmap slots.
        populated: usize,
    },
    /// A required heightmap buffer is absent.
    #[error("heightmap slot {index} has no pixel data")]
    MissingHeightmap {
        /// The empty slot.
        index: usize,
    },
    /// Slot or morph target index outside `0..4`.
    #[error("slot index {index} is out of range")]
    SlotIndexOutOfRange {
        /// The rejected index.
        index: usize,
    },
    /// `max_height` is negative or not finite.
    #[error("max height must be a finite non-negative number, got {0}")]
    InvalidMaxHeight(f32),
    /// Unknown geometry style name.
    #[error("unsupported geometry style `{0}`")]
    UnsupportedStyle(String),
    /// Pixel data length does not match `width * height * 4`.
    #[error("pixel buffer of {width}x{height} must hold 4 bytes per texel, got {len} bytes")]
    InvalidPixelBuffer {
        /// Declared width.
        width: u32,
        /// Declared height.
        height: u32,
        /// Actual byte length.
        len: usize,
    },
    /// The heightmap is too small for the requested style.
    #[error("{style} geometry needs a larger heightmap than {width}x{height}")]
    HeightmapTooSmall {
        /// The requested style.
        style: GeometryStyle,
        /// Heightmap width.
        width: u32,
        /// Heightmap height.
        height: u32,
    },
    /// Decoded image uses a texture format that cannot be read as RGBA8.
    #[error("cannot read heightmap pixels from format {0}")]
    UnsupportedImageFormat(String),
    /// The decode collaborator failed to produce pixels.
    #[error("failed to decode heightmap `{heightmap}`: {message}")]
    Decode {
        /// The heightmap source that failed.
        heightmap: String,
        /// The decoder's message.
        message: String,
    },
}
