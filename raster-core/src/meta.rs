// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The metadata bag carried alongside a [`crate::image::PixelImage`].

/// EXIF orientation tag value, 1..=8. `Default` is the identity orientation, 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExifOrientation(u8);

impl ExifOrientation {
    /// Builds an `ExifOrientation` from a raw EXIF tag value. Values outside `1..=8` are clamped
    /// to the identity orientation, since a malformed orientation tag is not a reason to fail an
    /// otherwise-valid decode.
    pub fn from_tag(value: u16) -> ExifOrientation {
        match value {
            1..=8 => ExifOrientation(value as u8),
            _ => {
                log::debug!("clamping out-of-range EXIF orientation tag {value} to identity");
                ExifOrientation(1)
            }
        }
    }

    pub fn get(self) -> u8 {
        self.0
    }

    /// True for the four orientations that transpose the image, swapping width and height.
    pub fn swaps_dimensions(self) -> bool {
        matches!(self.0, 5..=8)
    }
}

impl Default for ExifOrientation {
    fn default() -> Self {
        ExifOrientation(1)
    }
}

/// JPEG chroma subsampling, recorded on decode as a hint and consulted by the encoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Subsampling {
    S444,
    S422,
    S420,
}

/// How an ICC profile, if any, should be treated.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum IccProfileKind {
    #[default]
    None,
    /// The image declares itself sRGB; no profile bytes are carried.
    SRgb,
    /// An embedded ICC profile is present and carried as opaque bytes.
    Embedded(Box<[u8]>),
}

/// Optional, format-agnostic metadata produced by decoders and consulted by encoders.
#[derive(Debug, Clone, Default)]
pub struct Metadata {
    pub orientation: ExifOrientation,
    pub icc: IccProfileKind,
    pub subsampling: Option<Subsampling>,
}

impl Metadata {
    pub fn is_srgb(&self) -> bool {
        matches!(self.icc, IccProfileKind::SRgb)
    }

    pub fn icc_profile_bytes(&self) -> Option<&[u8]> {
        match &self.icc {
            IccProfileKind::Embedded(bytes) => Some(bytes),
            _ => None,
        }
    }
}
