// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms)]

//! A pure Rust reader and writer for uncompressed BMP files.
//!
//! The decoder accepts `BI_RGB` (and `BI_BITFIELDS`, without remapping the channel order) at
//! 8, 24, or 32 bits per pixel and always produces a top-down `Rgb24` image. The encoder
//! writes either an 8-bpp file with an identity greyscale palette, or a 24-bpp file; both are
//! bottom-up with BGR byte order and rows padded to a 4-byte stride.

use raster_core::errors::{invalid_format_error, truncated_error, unsupported_error, Result};
use raster_core::io::{buffer_entire_source, ByteReader, ReadBytes};
use raster_core::{ColorKind, Metadata, PixelImage};

const FILE_HEADER_LEN: usize = 14;
const DIB_HEADER_LEN: u32 = 40;

const BI_RGB: u32 = 0;
const BI_BITFIELDS: u32 = 3;

/// Options accepted by [`decode`]. Reserved for a future caller-imposed dimension ceiling;
/// `Default` matches the unrestricted behaviour documented in §5 ("maximum dimensions are
/// bounded implicitly by overflow-checked multiplication").
#[derive(Debug, Clone, Copy, Default)]
pub struct BmpDecodeOptions {
    pub max_pixels: Option<u64>,
}

fn row_stride(width: u32, bpp: u16) -> usize {
    ((width as usize * bpp as usize + 31) / 32) * 4
}

/// Decodes a BMP file from an in-memory buffer into a top-down `Rgb24` [`PixelImage`].
pub fn decode(bytes: &[u8]) -> Result<PixelImage> {
    decode_with_options(bytes, BmpDecodeOptions::default())
}

pub fn decode_with_options(bytes: &[u8], opts: BmpDecodeOptions) -> Result<PixelImage> {
    let mut r = ByteReader::new(bytes);

    if r.remaining() < FILE_HEADER_LEN {
        return truncated_error("BMP file header is truncated");
    }

    let signature = r.read_exact_slice(2)?;
    if signature != b"BM" {
        return invalid_format_error("missing 'BM' signature");
    }

    let _file_size = r.read_u32_le()?;
    r.skip(4)?; // reserved
    let pixel_data_offset = r.read_u32_le()? as usize;

    let dib_size = r.read_u32_le()?;
    if dib_size < DIB_HEADER_LEN {
        return unsupported_error("unsupported BMP DIB header variant");
    }

    let width_raw = r.read_i32_le()?;
    let height_raw = r.read_i32_le()?;
    let _planes = r.read_u16_le()?;
    let bpp = r.read_u16_le()?;
    let compression = r.read_u32_le()?;
    if dib_size > DIB_HEADER_LEN {
        log::debug!("ignoring {} trailing DIB header bytes beyond BITMAPINFOHEADER", dib_size - DIB_HEADER_LEN);
    }
    r.skip(dib_size as usize - 16)?; // remainder of the DIB header

    if compression != BI_RGB && compression != BI_BITFIELDS {
        return unsupported_error("compressed BMP pixel data is not supported");
    }
    if !matches!(bpp, 8 | 24 | 32) {
        return unsupported_error("unsupported BMP bit depth");
    }
    if width_raw <= 0 {
        return invalid_format_error("non-positive BMP width");
    }

    let width = width_raw as u32;
    let top_down = height_raw < 0;
    let height = height_raw.unsigned_abs();
    if height == 0 {
        return invalid_format_error("zero BMP height");
    }

    if let Some(max) = opts.max_pixels {
        if (width as u64) * (height as u64) > max {
            return raster_core::errors::argument_error("BMP dimensions exceed caller ceiling");
        }
    }

    let mut palette = None;
    if bpp == 8 {
        let entries = r.read_exact_slice(256 * 4)?;
        palette = Some(entries);
    }

    if r.pos() > pixel_data_offset {
        return invalid_format_error("pixel data offset precedes header data");
    }
    r.skip(pixel_data_offset - r.pos())?;

    let stride = row_stride(width, bpp);
    let mut out = vec![0u8; width as usize * height as usize * 3];

    for file_row in 0..height {
        let row_bytes = r.read_exact_slice(stride)?;

        let out_row = if top_down { file_row } else { height - 1 - file_row };
        let out_start = out_row as usize * width as usize * 3;

        for x in 0..width as usize {
            let (r8, g8, b8) = match bpp {
                8 => {
                    let idx = row_bytes[x] as usize;
                    let pal = palette.expect("8bpp BMP always has a palette");
                    (pal[idx * 4 + 2], pal[idx * 4 + 1], pal[idx * 4])
                }
                24 => {
                    let p = x * 3;
                    (row_bytes[p + 2], row_bytes[p + 1], row_bytes[p])
                }
                32 => {
                    let p = x * 4;
                    (row_bytes[p + 2], row_bytes[p + 1], row_bytes[p])
                }
                _ => unreachable!(),
            };

            let o = out_start + x * 3;
            out[o] = r8;
            out[o + 1] = g8;
            out[o + 2] = b8;
        }
    }

    PixelImage::new(width, height, ColorKind::Rgb24, out.into_boxed_slice(), Metadata::default())
}

/// Decodes a BMP file from a non-seekable byte stream, buffering it first per §4.1/§9.
pub fn decode_stream<R: std::io::Read>(source: R) -> Result<PixelImage> {
    let bytes = buffer_entire_source(source)?;
    decode(&bytes)
}

/// Encodes an `Rgb24` image as a 24-bpp, bottom-up, BGR-ordered BMP.
pub fn encode_rgb24(image: &PixelImage, out: &mut Vec<u8>) -> Result<()> {
    if image.color() != ColorKind::Rgb24 {
        return raster_core::errors::argument_error("BMP 24-bpp encoder requires an Rgb24 image");
    }

    let width = image.width();
    let height = image.height();
    let stride = row_stride(width, 24);
    let pixel_data_offset = FILE_HEADER_LEN + DIB_HEADER_LEN as usize;
    let image_size = stride * height as usize;
    let file_size = pixel_data_offset + image_size;

    write_file_header(out, file_size as u32, pixel_data_offset as u32);
    write_dib_header(out, width, height, 24, image_size as u32, 0);

    for y in (0..height).rev() {
        let row = image.row(y);
        let row_start = out.len();
        for px in row.chunks_exact(3) {
            out.push(px[2]);
            out.push(px[1]);
            out.push(px[0]);
        }
        pad_row(out, out.len() - row_start, stride);
    }

    Ok(())
}

/// Encodes a `Gray8` image as an 8-bpp BMP with an identity greyscale palette, so the decoded
/// pixel at each position has `r == g == b == source`.
pub fn encode_gray8_indexed(image: &PixelImage, out: &mut Vec<u8>) -> Result<()> {
    if image.color() != ColorKind::Gray8 {
        return raster_core::errors::argument_error("BMP 8-bpp encoder requires a Gray8 image");
    }

    let width = image.width();
    let height = image.height();
    let stride = row_stride(width, 8);
    let palette_len = 256 * 4;
    let pixel_data_offset = FILE_HEADER_LEN + DIB_HEADER_LEN as usize + palette_len;
    let image_size = stride * height as usize;
    let file_size = pixel_data_offset + image_size;

    write_file_header(out, file_size as u32, pixel_data_offset as u32);
    write_dib_header(out, width, height, 8, image_size as u32, 256);

    for i in 0..256u32 {
        out.push(i as u8);
        out.push(i as u8);
        out.push(i as u8);
        out.push(0);
    }

    for y in (0..height).rev() {
        let row = image.row(y);
        let row_start = out.len();
        out.extend_from_slice(row);
        pad_row(out, out.len() - row_start, stride);
    }

    Ok(())
}

fn write_file_header(out: &mut Vec<u8>, file_size: u32, pixel_data_offset: u32) {
    out.extend_from_slice(b"BM");
    out.extend_from_slice(&file_size.to_le_bytes());
    out.extend_from_slice(&[0u8; 4]);
    out.extend_from_slice(&pixel_data_offset.to_le_bytes());
}

fn write_dib_header(out: &mut Vec<u8>, width: u32, height: u32, bpp: u16, image_size: u32, colors_used: u32) {
    out.extend_from_slice(&DIB_HEADER_LEN.to_le_bytes());
    out.extend_from_slice(&(width as i32).to_le_bytes());
    out.extend_from_slice(&(height as i32).to_le_bytes());
    out.extend_from_slice(&1u16.to_le_bytes()); // planes
    out.extend_from_slice(&bpp.to_le_bytes());
    out.extend_from_slice(&BI_RGB.to_le_bytes());
    out.extend_from_slice(&image_size.to_le_bytes());
    out.extend_from_slice(&2835i32.to_le_bytes()); // ~72 dpi
    out.extend_from_slice(&2835i32.to_le_bytes());
    out.extend_from_slice(&colors_used.to_le_bytes());
    out.extend_from_slice(&0u32.to_le_bytes()); // colors important
}

fn pad_row(out: &mut Vec<u8>, written: usize, stride: usize) {
    for _ in written..stride {
        out.push(0);
    }
}

/// Extension used only within this crate: a byte-array read that returns a borrowed slice.
trait ReadExactSlice<'a> {
    fn read_exact_slice(&mut self, len: usize) -> Result<&'a [u8]>;
}

impl<'a> ReadExactSlice<'a> for ByteReader<'a> {
    fn read_exact_slice(&mut self, len: usize) -> Result<&'a [u8]> {
        self.read_slice(len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn checker_2x2() -> PixelImage {
        // top-left red, top-right green, bottom-left green, bottom-right red.
        let buf: Vec<u8> = vec![255, 0, 0, 0, 255, 0, 0, 255, 0, 255, 0, 0];
        PixelImage::new(2, 2, ColorKind::Rgb24, buf.into_boxed_slice(), Metadata::default()).unwrap()
    }

    #[test]
    fn round_trips_24bpp_checker_pixel_exact() {
        let img = checker_2x2();
        let mut bytes = Vec::new();
        encode_rgb24(&img, &mut bytes).unwrap();

        let decoded = decode(&bytes).unwrap();
        assert_eq!(decoded.width(), 2);
        assert_eq!(decoded.height(), 2);
        assert_eq!(decoded.buffer(), img.buffer());
    }

    #[test]
    fn round_trips_8bpp_grey_ramp_with_identity_palette() {
        let width = 16u32;
        let mut buf = vec![0u8; width as usize];
        for (x, px) in buf.iter_mut().enumerate() {
            *px = (x * 16) as u8;
        }
        let img = PixelImage::new(width, 1, ColorKind::Gray8, buf.clone().into_boxed_slice(), Metadata::default())
            .unwrap();

        let mut bytes = Vec::new();
        encode_gray8_indexed(&img, &mut bytes).unwrap();
        let decoded = decode(&bytes).unwrap();

        for x in 0..width as usize {
            let px = &decoded.buffer()[x * 3..x * 3 + 3];
            assert_eq!(px[0], buf[x]);
            assert_eq!(px[1], buf[x]);
            assert_eq!(px[2], buf[x]);
        }
    }

    #[test]
    fn rejects_missing_signature() {
        let bytes = [0u8; 64];
        assert!(decode(&bytes).is_err());
    }

    #[test]
    fn rejects_compressed_bitmaps() {
        let img = checker_2x2();
        let mut bytes = Vec::new();
        encode_rgb24(&img, &mut bytes).unwrap();
        // Compression field lives at offset 14 + 16.
        bytes[14 + 16] = 1; // BI_RLE8
        assert!(decode(&bytes).is_err());
    }

    #[test]
    fn decode_stream_matches_decode_bytes_for_various_chunk_sizes() {
        let img = checker_2x2();
        let mut bytes = Vec::new();
        encode_rgb24(&img, &mut bytes).unwrap();

        let from_bytes = decode(&bytes).unwrap();
        let from_stream = decode_stream(std::io::Cursor::new(bytes)).unwrap();
        assert_eq!(from_bytes.buffer(), from_stream.buffer());
    }
}
