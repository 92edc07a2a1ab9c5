//! Decoded heightmap pixels and depth sampling.
//!
//! A [`PixelBuffer`] is the RGBA8 texel data handed over by the image decoding
//! collaborator. It is immutable once built and shared through `Arc` by every
//! consumer that holds a cache reference on its source.

use bevy::prelude::*;
use bevy::render::render_resource::TextureFormat;

use crate::error::{Error, Result};

/// Bytes per RGBA8 texel.
pub const BYTES_PER_TEXEL: usize = 4;

/// Decoded RGBA8 heightmap texels, row-major with row 0 at the top.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PixelBuffer {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl PixelBuffer {
    /// Wraps raw RGBA8 bytes.
    ///
    /// Fails with [`Error::InvalidPixelBuffer`] if the buffer is empty or its
    /// length is not exactly `width * height * 4`.
    pub fn new(width: u32, height: u32, data: Vec<u8>) -> Result<Self> {
        let expected = width as usize * height as usize * BYTES_PER_TEXEL;
        if expected == 0 || data.len() != expected {
            return Err(Error::InvalidPixelBuffer {
                width,
                height,
                len: data.len(),
            });
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }

    /// Builds a buffer from one gray level per texel (R = G = B, opaque).
    pub fn from_gray(width: u32, height: u32, levels: &[u8]) -> Result<Self> {
        let data = levels.iter().flat_map(|&l| [l, l, l, 255]).collect();
        Self::new(width, height, data)
    }

    /// Reads the texels of a decoded Bevy [`Image`].
    ///
    /// `Rgba8Unorm` and `Rgba8UnormSrgb` images are copied as is; any other
    /// format goes through [`Image::convert`] and fails with
    /// [`Error::UnsupportedImageFormat`] if Bevy cannot convert it.
    pub fn from_image(image: &Image) -> Result<Self> {
        let format = image.texture_descriptor.format;
        let converted;
        let rgba = match format {
            TextureFormat::Rgba8Unorm | TextureFormat::Rgba8UnormSrgb => image,
            other => {
                converted = image
                    .convert(TextureFormat::Rgba8Unorm)
                    .ok_or_else(|| Error::UnsupportedImageFormat(format!("{other:?}")))?;
                &converted
            }
        };

        let data = rgba
            .data
            .clone()
            .ok_or_else(|| Error::UnsupportedImageFormat(format!("{format:?} without CPU data")))?;
        Self::new(rgba.width(), rgba.height(), data)
    }

    /// Width in texels.
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Height in texels.
    pub fn height(&self) -> u32 {
        self.height
    }

    /// `(width, height)` in texels.
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Number of texels.
    pub fn texel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Raw RGBA8 bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Depth of texel `(x, y)`; see [`depth`].
    #[inline]
    pub fn depth_at(&self, x: u32, y: u32, max_height: f32) -> f32 {
        depth(self, y as usize * self.width as usize + x as usize, max_height)
    }
}

/// Depth of the texel at `texel` (row-major index): the mean of R, G and B
/// scaled from `0..=255` to `0..=max_height`. Alpha is ignored.
///
/// This is the only depth function; every geometry style samples through it.
#[inline]
pub fn depth(buffer: &PixelBuffer, texel: usize, max_height: f32) -> f32 {
    let i = texel * BYTES_PER_TEXEL;
    let rgb = &buffer.data[i..i + 3];
    let sum = u16::from(rgb[0]) + u16::from(rgb[1]) + u16::from(rgb[2]);
    f32::from(sum) / 3.0 / 255.0 * max_height
}
