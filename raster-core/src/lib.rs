// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms)]

//! Shared pixel model, metadata bag, error taxonomy, buffer pool, and byte/bit readers for the
//! `raster` codec workspace. Every format crate (`raster-bmp`, `raster-gif`, `raster-png`,
//! `raster-jpeg`, `raster-webp`) depends on this crate and nothing else in the workspace, so
//! the pixel layout and the I/O primitives never drift between codecs.

pub mod errors;
pub mod image;
pub mod io;
pub mod meta;
pub mod pool;

pub use errors::{RasterError, Result};
pub use image::{ColorKind, PixelImage};
pub use meta::{ExifOrientation, IccProfileKind, Metadata, Subsampling};
