// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms)]

//! A pure, managed image codec library: JPEG, PNG, BMP, and GIF are decoded and encoded
//! entirely in this workspace; WebP is handled by [`raster_webp`], the one crate that talks to
//! an external native codec.
//!
//! This crate is a thin facade. It re-exports each format crate's decode/encode entry points
//! under a module of the same name, and adds exactly two things none of the leaf crates needs
//! on its own: a [`Format`] enum and [`probe::sniff`], the minimal byte-signature match a
//! caller uses to pick a decoder before it has any other information about the input.

pub mod bmp {
    pub use raster_bmp::*;
}
pub mod gif {
    pub use raster_gif::*;
}
pub mod jpeg {
    pub use raster_jpeg::*;
}
pub mod png {
    pub use raster_png::*;
}
pub mod webp {
    pub use raster_webp::*;
}

pub use raster_core::errors::{RasterError, Result};
pub use raster_core::{ColorKind, ExifOrientation, IccProfileKind, Metadata, PixelImage, Subsampling};

/// The container formats this crate recognises, in [`probe::sniff`] order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Jpeg,
    Png,
    Gif,
    Bmp,
    WebP,
}

pub mod probe {
    use super::Format;

    /// Matches the minimal leading-byte signature of each supported format. Not a pluggable
    /// registry: a fixed, closed match over the bytes the seed tests require (§8).
    pub fn sniff(bytes: &[u8]) -> Option<Format> {
        if bytes.len() >= 2 && bytes[0] == 0xFF && bytes[1] == 0xD8 {
            return Some(Format::Jpeg);
        }
        if bytes.len() >= 8 && bytes[..8] == [0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A] {
            return Some(Format::Png);
        }
        if bytes.len() >= 6 && &bytes[..3] == b"GIF" && (bytes[3..6] == *b"87a" || bytes[3..6] == *b"89a") {
            return Some(Format::Gif);
        }
        if bytes.len() >= 2 && &bytes[..2] == b"BM" {
            return Some(Format::Bmp);
        }
        if bytes.len() >= 12 && &bytes[..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
            return Some(Format::WebP);
        }
        None
    }
}

/// Decodes a single still image, dispatching on [`probe::sniff`].
///
/// GIF decodes to its first composited frame; use [`raster_gif::decode`] directly for the full
/// animation. WebP decodes to `Rgba32` via [`raster_webp::decode_rgba`].
pub fn decode(bytes: &[u8]) -> Result<PixelImage> {
    let format = probe::sniff(bytes);
    log::debug!("sniffed format: {format:?}");
    match format {
        Some(Format::Jpeg) => raster_jpeg::decode(bytes),
        Some(Format::Png) => raster_png::decode(bytes),
        Some(Format::Bmp) => raster_bmp::decode(bytes),
        Some(Format::WebP) => raster_webp::decode_rgba(bytes),
        Some(Format::Gif) => {
            let animated = raster_gif::decode(bytes)?;
            let mut frames = animated.frames.into_iter();
            match frames.next() {
                Some(first) => Ok(first.image),
                None => raster_core::errors::invalid_format_error("GIF stream has no frames"),
            }
        }
        None => raster_core::errors::invalid_format_error("input does not match a known format signature"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sniffs_jpeg_from_a_short_prefix() {
        assert_eq!(probe::sniff(&[0xFF, 0xD8, 0x00, 0x00]), Some(Format::Jpeg));
    }

    #[test]
    fn sniffs_png_from_its_eight_byte_signature() {
        let bytes = [0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0x00];
        assert_eq!(probe::sniff(&bytes), Some(Format::Png));
    }

    #[test]
    fn sniffs_gif_87a_and_89a() {
        assert_eq!(probe::sniff(b"GIF87a..."), Some(Format::Gif));
        assert_eq!(probe::sniff(b"GIF89a..."), Some(Format::Gif));
    }

    #[test]
    fn sniffs_bmp_and_webp() {
        assert_eq!(probe::sniff(b"BM...."), Some(Format::Bmp));
        let mut riff = b"RIFF".to_vec();
        riff.extend_from_slice(&[0, 0, 0, 0]);
        riff.extend_from_slice(b"WEBP");
        assert_eq!(probe::sniff(&riff), Some(Format::WebP));
    }

    #[test]
    fn rejects_an_unrecognised_prefix() {
        assert_eq!(probe::sniff(b"not an image"), None);
    }
}
