// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The pixel model every codec crate reads from or writes into.

use crate::errors::{argument_error, Result};
use crate::meta::Metadata;

/// The colour layout of a [`PixelImage`]'s packed buffer.
///
/// `CmykOpaque` only ever appears transiently inside the JPEG decoder; it is converted to
/// `Rgb24` before a `PixelImage` is handed back to a caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorKind {
    Gray8,
    Rgb24,
    Rgba32,
    CmykOpaque,
}

impl ColorKind {
    /// Number of interleaved channels per pixel for this colour kind.
    pub fn channels(self) -> usize {
        match self {
            ColorKind::Gray8 => 1,
            ColorKind::Rgb24 => 3,
            ColorKind::Rgba32 => 4,
            ColorKind::CmykOpaque => 4,
        }
    }
}

/// An immutable-after-construction pixel buffer plus its metadata bag.
///
/// The buffer is row-major, top-down, with channels interleaved in the natural order of
/// `color`. `buffer.len()` always equals `width * height * color.channels()`.
#[derive(Debug, Clone)]
pub struct PixelImage {
    width: u32,
    height: u32,
    color: ColorKind,
    buffer: Box<[u8]>,
    meta: Metadata,
}

impl PixelImage {
    /// Constructs a new `PixelImage`, validating the buffer-length invariant.
    ///
    /// Returns [`crate::errors::RasterError::Argument`] if `width` or `height` is zero, if the
    /// buffer length does not match `width * height * color.channels()`, or if that product
    /// overflows a `usize`.
    pub fn new(
        width: u32,
        height: u32,
        color: ColorKind,
        buffer: Box<[u8]>,
        meta: Metadata,
    ) -> Result<PixelImage> {
        if width == 0 || height == 0 {
            return argument_error("image dimensions must be positive");
        }

        let expected = (width as usize)
            .checked_mul(height as usize)
            .and_then(|px| px.checked_mul(color.channels()))
            .unwrap_or(usize::MAX);

        if expected == usize::MAX || buffer.len() != expected {
            return argument_error("pixel buffer length does not match width*height*channels");
        }

        Ok(PixelImage { width, height, color, buffer, meta })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn color(&self) -> ColorKind {
        self.color
    }

    pub fn buffer(&self) -> &[u8] {
        &self.buffer
    }

    pub fn into_buffer(self) -> Box<[u8]> {
        self.buffer
    }

    pub fn meta(&self) -> &Metadata {
        &self.meta
    }

    pub fn meta_mut(&mut self) -> &mut Metadata {
        &mut self.meta
    }

    /// Row stride, in bytes, of the packed buffer (no padding).
    pub fn stride(&self) -> usize {
        self.width as usize * self.color.channels()
    }

    pub fn row(&self, y: u32) -> &[u8] {
        let stride = self.stride();
        let start = y as usize * stride;
        &self.buffer[start..start + stride]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_mismatched_buffer_length() {
        let buf = vec![0u8; 10].into_boxed_slice();
        let err = PixelImage::new(2, 2, ColorKind::Rgb24, buf, Metadata::default());
        assert!(err.is_err());
    }

    #[test]
    fn accepts_matching_buffer_length() {
        let buf = vec![0u8; 2 * 2 * 3].into_boxed_slice();
        let img = PixelImage::new(2, 2, ColorKind::Rgb24, buf, Metadata::default()).unwrap();
        assert_eq!(img.stride(), 6);
        assert_eq!(img.row(1).len(), 6);
    }

    #[test]
    fn rejects_zero_dimensions() {
        let buf = vec![].into_boxed_slice();
        assert!(PixelImage::new(0, 4, ColorKind::Gray8, buf, Metadata::default()).is_err());
    }
}
