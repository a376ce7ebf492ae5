// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms)]

//! A pure Rust PNG decoder and encoder.
//!
//! The decoder handles every standard bit depth and colour type, both scanline orders (`None`
//! and `Adam7`), palette + `tRNS` transparency, and the `iCCP`/`sRGB` metadata chunks. The
//! encoder always writes 8-bit `Rgb24`/`Rgba32`, uninterlaced, `Up`-filtered, zlib-compressed.

mod adam7;
mod chunks;
mod filter;

use raster_core::errors::{integrity_error, invalid_format_error, unsupported_error, Result};
use raster_core::io::{buffer_entire_source, ByteReader};
use raster_core::pool::BufferPool;
use raster_core::{ColorKind, IccProfileKind, Metadata, PixelImage};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ColorType {
    Gray,
    Rgb,
    Indexed,
    GrayAlpha,
    RgbAlpha,
}

impl ColorType {
    fn from_byte(b: u8) -> Result<ColorType> {
        match b {
            0 => Ok(ColorType::Gray),
            2 => Ok(ColorType::Rgb),
            3 => Ok(ColorType::Indexed),
            4 => Ok(ColorType::GrayAlpha),
            6 => Ok(ColorType::RgbAlpha),
            _ => unsupported_error("unrecognised PNG colour type"),
        }
    }

    fn channels(self) -> usize {
        match self {
            ColorType::Gray | ColorType::Indexed => 1,
            ColorType::GrayAlpha => 2,
            ColorType::Rgb => 3,
            ColorType::RgbAlpha => 4,
        }
    }
}

struct Ihdr {
    width: u32,
    height: u32,
    bit_depth: u8,
    color_type: ColorType,
    interlace: u8,
}

fn valid_bit_depth(color_type: ColorType, bit_depth: u8) -> bool {
    match color_type {
        ColorType::Gray => matches!(bit_depth, 1 | 2 | 4 | 8 | 16),
        ColorType::Indexed => matches!(bit_depth, 1 | 2 | 4 | 8),
        ColorType::Rgb | ColorType::GrayAlpha | ColorType::RgbAlpha => matches!(bit_depth, 8 | 16),
    }
}

/// Options accepted by the PNG encoder. Reserved for future knobs; filter choice (`Up`) and
/// interlacing (`None`) are fixed, per §4.4, so there is nothing to configure today.
#[derive(Debug, Clone, Copy, Default)]
pub struct PngEncodeOptions {}

/// Decodes a PNG file from an in-memory buffer.
pub fn decode(bytes: &[u8]) -> Result<PixelImage> {
    let mut r = ByteReader::new(bytes);

    let signature = r.read_slice(8)?;
    if signature != chunks::SIGNATURE {
        return invalid_format_error("missing PNG signature");
    }

    let pool = BufferPool::new();

    let mut ihdr: Option<Ihdr> = None;
    let mut palette: Vec<[u8; 3]> = Vec::new();
    let mut trns: Vec<u8> = Vec::new();
    let mut idat = pool.checkout(0);
    let mut meta = Metadata::default();
    let mut seen_iend = false;

    loop {
        if seen_iend {
            break;
        }
        let chunk = chunks::read_chunk(&mut r)?;

        match &chunk.kind {
            b"IHDR" => {
                if ihdr.is_some() {
                    return invalid_format_error("duplicate IHDR chunk");
                }
                if chunk.data.len() != 13 {
                    return invalid_format_error("malformed IHDR chunk length");
                }
                let width = u32::from_be_bytes(chunk.data[0..4].try_into().unwrap());
                let height = u32::from_be_bytes(chunk.data[4..8].try_into().unwrap());
                let bit_depth = chunk.data[8];
                let color_type = ColorType::from_byte(chunk.data[9])?;
                let compression = chunk.data[10];
                let filter_method = chunk.data[11];
                let interlace = chunk.data[12];

                if width == 0 || height == 0 {
                    return invalid_format_error("zero PNG dimension");
                }
                if compression != 0 || filter_method != 0 {
                    return unsupported_error("unrecognised PNG compression or filter method");
                }
                if !matches!(interlace, 0 | 1) {
                    return unsupported_error("unrecognised PNG interlace method");
                }
                if !valid_bit_depth(color_type, bit_depth) {
                    return unsupported_error("unsupported PNG bit depth / colour type combination");
                }
                if (width as u64)
                    .checked_mul(height as u64)
                    .and_then(|px| px.checked_mul(4))
                    .is_none()
                {
                    return unsupported_error("PNG dimensions overflow");
                }

                ihdr = Some(Ihdr { width, height, bit_depth, color_type, interlace });
            }
            b"PLTE" => {
                if ihdr.is_none() {
                    return invalid_format_error("PLTE chunk before IHDR");
                }
                if chunk.data.len() % 3 != 0 || chunk.data.len() / 3 > 256 {
                    return invalid_format_error("malformed PLTE chunk");
                }
                palette = chunk.data.chunks_exact(3).map(|c| [c[0], c[1], c[2]]).collect();
            }
            b"tRNS" => {
                if ihdr.is_none() {
                    return invalid_format_error("tRNS chunk before IHDR");
                }
                trns = chunk.data.to_vec();
            }
            b"IDAT" => {
                if ihdr.is_none() {
                    return invalid_format_error("IDAT chunk before IHDR");
                }
                idat.extend_from_slice(chunk.data);
            }
            b"iCCP" => {
                if let Some(profile) = parse_iccp(chunk.data) {
                    meta.icc = IccProfileKind::Embedded(profile.into_boxed_slice());
                } else {
                    log::warn!("ignoring malformed iCCP chunk");
                }
            }
            b"sRGB" => {
                meta.icc = IccProfileKind::SRgb;
            }
            b"IEND" => {
                seen_iend = true;
            }
            other => {
                log::debug!("ignoring unrecognised PNG chunk {:?}", String::from_utf8_lossy(other));
            }
        }
    }

    decode_body(ihdr, palette, trns, &idat, &pool, meta)
}

fn decode_body(
    ihdr_opt: Option<Ihdr>,
    palette: Vec<[u8; 3]>,
    trns: Vec<u8>,
    idat: &[u8],
    pool: &BufferPool,
    meta: Metadata,
) -> Result<PixelImage> {
    let ihdr = match ihdr_opt {
        Some(h) => h,
        None => return invalid_format_error("missing IHDR chunk"),
    };
    if ihdr.color_type == ColorType::Indexed && palette.is_empty() {
        return invalid_format_error("indexed PNG is missing a PLTE chunk");
    }

    let inflated = match miniz_oxide::inflate::decompress_to_vec_zlib(idat) {
        Ok(v) => v,
        Err(_) => return integrity_error("PNG IDAT stream failed to inflate"),
    };

    let channels = ihdr.color_type.channels();
    let has_alpha_channel = matches!(ihdr.color_type, ColorType::GrayAlpha | ColorType::RgbAlpha);
    let output_has_alpha = has_alpha_channel || !trns.is_empty();
    let out_color = if output_has_alpha { ColorKind::Rgba32 } else { ColorKind::Rgb24 };
    let out_channels = out_color.channels();

    let mut canvas = vec![0u8; ihdr.width as usize * ihdr.height as usize * out_channels];

    let mut cursor = 0usize;
    if ihdr.interlace == 0 {
        decode_pass(
            &inflated,
            &mut cursor,
            ihdr.width,
            ihdr.height,
            0,
            0,
            1,
            1,
            ihdr.bit_depth,
            ihdr.color_type,
            channels,
            &palette,
            &trns,
            out_channels,
            output_has_alpha,
            &mut canvas,
            ihdr.width,
            pool,
        )?;
    } else {
        for pass in 0..7 {
            let (x0, y0, dx, dy) = adam7::PASSES[pass];
            let (pw, ph) = adam7::pass_dimensions(ihdr.width, ihdr.height, pass);
            if pw == 0 || ph == 0 {
                continue;
            }
            decode_pass(
                &inflated,
                &mut cursor,
                pw,
                ph,
                x0,
                y0,
                dx,
                dy,
                ihdr.bit_depth,
                ihdr.color_type,
                channels,
                &palette,
                &trns,
                out_channels,
                output_has_alpha,
                &mut canvas,
                ihdr.width,
                pool,
            )?;
        }
    }

    PixelImage::new(ihdr.width, ihdr.height, out_color, canvas.into_boxed_slice(), meta)
}

#[allow(clippy::too_many_arguments)]
fn decode_pass(
    inflated: &[u8],
    cursor: &mut usize,
    pass_width: u32,
    pass_height: u32,
    x0: u32,
    y0: u32,
    dx: u32,
    dy: u32,
    bit_depth: u8,
    color_type: ColorType,
    channels: usize,
    palette: &[[u8; 3]],
    trns: &[u8],
    out_channels: usize,
    output_has_alpha: bool,
    canvas: &mut [u8],
    canvas_width: u32,
    pool: &BufferPool,
) -> Result<()> {
    let row_bits = pass_width as usize * channels * bit_depth as usize;
    let row_stride = (row_bits + 7) / 8;
    let bpp = ((channels * bit_depth as usize) + 7) / 8;
    let bpp = bpp.max(1);

    let mut previous = pool.checkout(row_stride);
    let mut current = pool.checkout(row_stride);

    for row in 0..pass_height {
        if *cursor + 1 + row_stride > inflated.len() {
            return integrity_error("PNG scanline data is shorter than IHDR declares");
        }
        let filter_type = inflated[*cursor];
        *cursor += 1;
        current.copy_from_slice(&inflated[*cursor..*cursor + row_stride]);
        *cursor += row_stride;

        if filter::unfilter_scanline(filter_type, &mut current, &previous, bpp).is_err() {
            return integrity_error("bad PNG filter type byte");
        }

        let samples = extract_samples(&current, pass_width as usize, channels, bit_depth);

        let canvas_y = y0 + row * dy;
        for x in 0..pass_width {
            let canvas_x = x0 + x * dx;
            let out_pixel = convert_pixel(
                &samples[x as usize * channels..x as usize * channels + channels],
                bit_depth,
                color_type,
                palette,
                trns,
                output_has_alpha,
            )?;
            let o = (canvas_y as usize * canvas_width as usize + canvas_x as usize) * out_channels;
            canvas[o..o + out_channels].copy_from_slice(&out_pixel[..out_channels]);
        }

        std::mem::swap(&mut previous, &mut current);
    }

    Ok(())
}

/// Reads `width * channels` samples of `bit_depth` bits each, MSB-first, byte-aligned per row.
fn extract_samples(row: &[u8], width: usize, channels: usize, bit_depth: u8) -> Vec<u16> {
    let total = width * channels;
    let mut out = Vec::with_capacity(total);
    let mut bit_pos = 0usize;

    for _ in 0..total {
        let mut value: u16 = 0;
        for _ in 0..bit_depth {
            let byte_idx = bit_pos / 8;
            let bit_idx = 7 - (bit_pos % 8);
            let bit = (row[byte_idx] >> bit_idx) & 1;
            value = (value << 1) | bit as u16;
            bit_pos += 1;
        }
        out.push(value);
    }

    out
}

fn scale_sample(v: u16, bit_depth: u8) -> u8 {
    if bit_depth == 16 {
        (v >> 8) as u8
    } else if bit_depth == 8 {
        v as u8
    } else {
        let max = (1u16 << bit_depth) - 1;
        ((v as u32 * 255) / max as u32) as u8
    }
}

fn convert_pixel(
    samples: &[u16],
    bit_depth: u8,
    color_type: ColorType,
    palette: &[[u8; 3]],
    trns: &[u8],
    output_has_alpha: bool,
) -> Result<[u8; 4]> {
    match color_type {
        ColorType::Gray => {
            let g = scale_sample(samples[0], bit_depth);
            let alpha = if !trns.is_empty() && trns.len() >= 2 {
                let trns_value = u16::from_be_bytes([trns[0], trns[1]]);
                if samples[0] == trns_value { 0 } else { 255 }
            } else {
                255
            };
            Ok([g, g, g, if output_has_alpha { alpha } else { 255 }])
        }
        ColorType::GrayAlpha => {
            let g = scale_sample(samples[0], bit_depth);
            let a = scale_sample(samples[1], bit_depth);
            Ok([g, g, g, a])
        }
        ColorType::Rgb => {
            let r = scale_sample(samples[0], bit_depth);
            let g = scale_sample(samples[1], bit_depth);
            let b = scale_sample(samples[2], bit_depth);
            let alpha = if trns.len() >= 6 {
                let tr = u16::from_be_bytes([trns[0], trns[1]]);
                let tg = u16::from_be_bytes([trns[2], trns[3]]);
                let tb = u16::from_be_bytes([trns[4], trns[5]]);
                if samples[0] == tr && samples[1] == tg && samples[2] == tb { 0 } else { 255 }
            } else {
                255
            };
            Ok([r, g, b, if output_has_alpha { alpha } else { 255 }])
        }
        ColorType::RgbAlpha => {
            let r = scale_sample(samples[0], bit_depth);
            let g = scale_sample(samples[1], bit_depth);
            let b = scale_sample(samples[2], bit_depth);
            let a = scale_sample(samples[3], bit_depth);
            Ok([r, g, b, a])
        }
        ColorType::Indexed => {
            let idx = samples[0] as usize;
            let color = match palette.get(idx) {
                Some(c) => *c,
                None => return invalid_format_error("PNG palette index out of range"),
            };
            let a = trns.get(idx).copied().unwrap_or(255);
            Ok([color[0], color[1], color[2], a])
        }
    }
}

fn parse_iccp(data: &[u8]) -> Option<Vec<u8>> {
    let null_pos = data.iter().position(|&b| b == 0)?;
    let after_keyword = &data[null_pos + 1..];
    if after_keyword.is_empty() {
        return None;
    }
    let compression_method = after_keyword[0];
    if compression_method != 0 {
        return None;
    }
    miniz_oxide::inflate::decompress_to_vec_zlib(&after_keyword[1..]).ok()
}

/// Decodes a PNG from a non-seekable byte stream, buffering it first per §4.1/§9.
pub fn decode_stream<R: std::io::Read>(source: R) -> Result<PixelImage> {
    let bytes = buffer_entire_source(source)?;
    decode(&bytes)
}

/// Encodes an `Rgb24`/`Rgba32` image as an uninterlaced, `Up`-filtered, zlib-compressed PNG.
pub fn encode(image: &PixelImage, _opts: PngEncodeOptions) -> Result<Vec<u8>> {
    let (color_type_byte, channels) = match image.color() {
        ColorKind::Rgb24 => (2u8, 3usize),
        ColorKind::Rgba32 => (6u8, 4usize),
        _ => return raster_core::errors::argument_error("PNG encoder requires Rgb24 or Rgba32"),
    };

    let width = image.width();
    let height = image.height();
    let stride = width as usize * channels;

    let mut raw = Vec::with_capacity(height as usize * (stride + 1));
    let mut previous = vec![0u8; stride];
    for y in 0..height {
        let row = image.row(y);
        let filtered = filter::filter_up(row, &previous);
        raw.push(1); // filter type: Up
        raw.extend_from_slice(&filtered);
        previous = row.to_vec();
    }

    let compressed = miniz_oxide::deflate::compress_to_vec_zlib(&raw, 6);

    let mut out = Vec::new();
    out.extend_from_slice(&chunks::SIGNATURE);

    let mut ihdr_data = Vec::with_capacity(13);
    ihdr_data.extend_from_slice(&width.to_be_bytes());
    ihdr_data.extend_from_slice(&height.to_be_bytes());
    ihdr_data.push(8); // bit depth
    ihdr_data.push(color_type_byte);
    ihdr_data.push(0); // compression
    ihdr_data.push(0); // filter method
    ihdr_data.push(0); // interlace: none
    chunks::write_chunk(&mut out, b"IHDR", &ihdr_data);

    if image.meta().is_srgb() {
        chunks::write_chunk(&mut out, b"sRGB", &[0]);
    } else if let Some(profile) = image.meta().icc_profile_bytes() {
        let mut iccp_data = Vec::new();
        iccp_data.extend_from_slice(b"ICC");
        iccp_data.push(0); // null-terminated keyword
        iccp_data.push(0); // compression method: zlib
        iccp_data.extend_from_slice(&miniz_oxide::deflate::compress_to_vec_zlib(profile, 6));
        chunks::write_chunk(&mut out, b"iCCP", &iccp_data);
    }

    chunks::write_chunk(&mut out, b"IDAT", &compressed);
    chunks::write_chunk(&mut out, b"IEND", &[]);

    Ok(out)
}
