// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms)]

//! A pure Rust GIF decoder (LZW, local/global palettes, disposal, animation) and a
//! single-frame encoder (octree quantisation + LZW), per §4.3.

mod lzw;
mod octree;

use raster_core::errors::{invalid_format_error, truncated_error, unsupported_error, Result};
use raster_core::io::{buffer_entire_source, ByteReader, ReadBytes};
use raster_core::{ColorKind, Metadata, PixelImage};

/// A frame's disposal directive, read from the preceding graphic control extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposal {
    /// No disposal specified; treated the same as `Keep`.
    Unspecified,
    /// Leave the frame's rectangle as-is for the next frame.
    Keep,
    /// Clear the frame's rectangle to the background colour before the next frame.
    RestoreBackground,
    /// Restore the frame's rectangle to what it looked like before this frame was drawn.
    RestorePrevious,
}

impl Disposal {
    fn from_bits(bits: u8) -> Disposal {
        match bits {
            1 => Disposal::Keep,
            2 => Disposal::RestoreBackground,
            3 => Disposal::RestorePrevious,
            _ => Disposal::Unspecified,
        }
    }
}

/// One composited animation frame, already painted onto a full-canvas-sized `Rgb24` image.
pub struct GifFrame {
    pub image: PixelImage,
    pub delay_cs: u16,
}

/// A decoded GIF: its logical screen size, loop count, and composited frames.
pub struct AnimatedGif {
    pub width: u32,
    pub height: u32,
    pub loop_count: u16,
    pub frames: Vec<GifFrame>,
}

struct RawFrame {
    left: u16,
    top: u16,
    width: u16,
    height: u16,
    palette: Vec<[u8; 3]>,
    indices: Vec<u8>,
    disposal: Disposal,
    transparent_index: Option<u8>,
    delay_cs: u16,
}

fn read_color_table(r: &mut ByteReader<'_>, size_bits: u8) -> Result<Vec<[u8; 3]>> {
    let count = 1usize << (size_bits as usize + 1);
    let bytes = r.read_slice(count * 3)?;
    Ok(bytes.chunks_exact(3).map(|c| [c[0], c[1], c[2]]).collect())
}

fn read_sub_blocks(r: &mut ByteReader<'_>) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    loop {
        let len = r.read_u8()? as usize;
        if len == 0 {
            break;
        }
        out.extend_from_slice(r.read_slice(len)?);
    }
    Ok(out)
}

fn skip_sub_blocks(r: &mut ByteReader<'_>) -> Result<()> {
    loop {
        let len = r.read_u8()? as usize;
        if len == 0 {
            break;
        }
        r.skip(len)?;
    }
    Ok(())
}

/// Rearranges an interlaced frame's row-major index buffer into true row order, per the pass
/// table in §4.3: 0,8,16,..; 4,12,..; 2,6,..; 1,3,5,..
fn deinterlace(indices: &[u8], width: usize, height: usize) -> Vec<u8> {
    let passes = [(0usize, 8usize), (4, 8), (2, 4), (1, 2)];
    let mut out = vec![0u8; indices.len()];
    let mut src_row = 0usize;

    for (start, stride) in passes {
        let mut row = start;
        while row < height {
            out[row * width..(row + 1) * width]
                .copy_from_slice(&indices[src_row * width..(src_row + 1) * width]);
            src_row += 1;
            row += stride;
        }
    }

    out
}

/// Decodes a GIF from an in-memory buffer, compositing every frame onto a full canvas.
pub fn decode(bytes: &[u8]) -> Result<AnimatedGif> {
    let mut r = ByteReader::new(bytes);

    let signature = r.read_slice(6)?;
    if signature != b"GIF87a" && signature != b"GIF89a" {
        return invalid_format_error("missing GIF87a/89a signature");
    }

    let screen_width = r.read_u16_le()?;
    let screen_height = r.read_u16_le()?;
    if screen_width == 0 || screen_height == 0 {
        return invalid_format_error("zero-sized GIF logical screen");
    }
    let packed = r.read_u8()?;
    let background_index = r.read_u8()?;
    let _aspect = r.read_u8()?;

    let gct_flag = packed & 0x80 != 0;
    let gct_size_bits = packed & 0x07;
    let global_palette = if gct_flag { read_color_table(&mut r, gct_size_bits)? } else { Vec::new() };

    let mut loop_count: u16 = 1;
    let mut raw_frames = Vec::new();

    // Pending graphic control extension state, consumed by the next image descriptor.
    let mut pending_disposal = Disposal::Unspecified;
    let mut pending_transparent: Option<u8> = None;
    let mut pending_delay: u16 = 0;

    loop {
        let block = r.read_u8()?;

        match block {
            0x3B => break, // trailer
            0x21 => {
                let label = r.read_u8()?;
                match label {
                    0xF9 => {
                        let block_size = r.read_u8()?;
                        if block_size != 4 {
                            return invalid_format_error("malformed graphic control extension");
                        }
                        let gce_packed = r.read_u8()?;
                        pending_delay = r.read_u16_le()?;
                        let transparent_index = r.read_u8()?;
                        let terminator = r.read_u8()?;
                        if terminator != 0 {
                            return invalid_format_error("malformed graphic control extension terminator");
                        }
                        pending_disposal = Disposal::from_bits((gce_packed >> 2) & 0x07);
                        pending_transparent =
                            if gce_packed & 0x01 != 0 { Some(transparent_index) } else { None };
                    }
                    0xFF => {
                        let block_size = r.read_u8()? as usize;
                        let app_block = r.read_slice(block_size)?;
                        let is_netscape = app_block == b"NETSCAPE2.0";
                        let data = read_sub_blocks(&mut r)?;
                        if is_netscape && data.len() >= 3 && data[0] == 1 {
                            loop_count = u16::from_le_bytes([data[1], data[2]]);
                        }
                    }
                    _ => {
                        // Comment, plain text, or unknown extension: skip.
                        log::debug!("skipping GIF extension block with label {label:#04x}");
                        skip_sub_blocks(&mut r)?;
                    }
                }
            }
            0x2C => {
                let left = r.read_u16_le()?;
                let top = r.read_u16_le()?;
                let width = r.read_u16_le()?;
                let height = r.read_u16_le()?;
                let img_packed = r.read_u8()?;

                let lct_flag = img_packed & 0x80 != 0;
                let interlace_flag = img_packed & 0x40 != 0;
                let lct_size_bits = img_packed & 0x07;

                let palette = if lct_flag {
                    read_color_table(&mut r, lct_size_bits)?
                } else {
                    global_palette.clone()
                };

                let min_code_size = r.read_u8()?;
                let lzw_data = read_sub_blocks(&mut r)?;

                let expected_len = width as usize * height as usize;
                let mut indices = lzw::decode(min_code_size, &lzw_data)?;
                if indices.len() < expected_len {
                    return truncated_error("GIF frame LZW data decoded to fewer pixels than declared");
                }
                indices.truncate(expected_len);

                if interlace_flag {
                    indices = deinterlace(&indices, width as usize, height as usize);
                }

                raw_frames.push(RawFrame {
                    left,
                    top,
                    width,
                    height,
                    palette,
                    indices,
                    disposal: pending_disposal,
                    transparent_index: pending_transparent,
                    delay_cs: pending_delay,
                });

                pending_disposal = Disposal::Unspecified;
                pending_transparent = None;
                pending_delay = 0;
            }
            _ => return invalid_format_error("unrecognised GIF block introducer"),
        }
    }

    if raw_frames.is_empty() {
        return invalid_format_error("GIF contains no image frames");
    }
    if global_palette.is_empty() && raw_frames.iter().any(|f| f.palette.is_empty()) {
        return invalid_format_error("GIF frame has neither a local nor a global colour table");
    }

    let canvas_w = screen_width as usize;
    let canvas_h = screen_height as usize;
    let background_color = global_palette.get(background_index as usize).copied().unwrap_or([0, 0, 0]);

    let mut canvas = vec![0u8; canvas_w * canvas_h * 3];
    for px in canvas.chunks_exact_mut(3) {
        px.copy_from_slice(&background_color);
    }

    let mut frames = Vec::with_capacity(raw_frames.len());
    let mut saved_rect: Option<(u16, u16, u16, u16, Vec<u8>)> = None;
    let mut prev_disposal = Disposal::Unspecified;
    let mut prev_rect = (0u16, 0u16, 0u16, 0u16);

    for frame in &raw_frames {
        match prev_disposal {
            Disposal::RestoreBackground => {
                clear_rect(&mut canvas, canvas_w, prev_rect, background_color);
            }
            Disposal::RestorePrevious => {
                if let Some((left, top, width, height, snapshot)) = saved_rect.take() {
                    paint_rect(&mut canvas, canvas_w, (left, top, width, height), &snapshot, None, &[]);
                }
            }
            Disposal::Keep | Disposal::Unspecified => {}
        }

        if frame.disposal == Disposal::RestorePrevious {
            saved_rect = Some((
                frame.left,
                frame.top,
                frame.width,
                frame.height,
                snapshot_rect(&canvas, canvas_w, (frame.left, frame.top, frame.width, frame.height)),
            ));
        }

        paint_rect(
            &mut canvas,
            canvas_w,
            (frame.left, frame.top, frame.width, frame.height),
            &frame.indices,
            frame.transparent_index,
            &frame.palette,
        );

        let image = PixelImage::new(
            screen_width as u32,
            screen_height as u32,
            ColorKind::Rgb24,
            canvas.clone().into_boxed_slice(),
            Metadata::default(),
        )?;
        frames.push(GifFrame { image, delay_cs: frame.delay_cs });

        prev_disposal = frame.disposal;
        prev_rect = (frame.left, frame.top, frame.width, frame.height);
    }

    Ok(AnimatedGif { width: screen_width as u32, height: screen_height as u32, loop_count, frames })
}

fn clear_rect(canvas: &mut [u8], canvas_w: usize, rect: (u16, u16, u16, u16), color: [u8; 3]) {
    let (left, top, width, height) = rect;
    for y in 0..height as usize {
        for x in 0..width as usize {
            let cx = left as usize + x;
            let cy = top as usize + y;
            let o = (cy * canvas_w + cx) * 3;
            canvas[o..o + 3].copy_from_slice(&color);
        }
    }
}

fn snapshot_rect(canvas: &[u8], canvas_w: usize, rect: (u16, u16, u16, u16)) -> Vec<u8> {
    let (left, top, width, height) = rect;
    let mut out = Vec::with_capacity(width as usize * height as usize * 3);
    for y in 0..height as usize {
        let cy = top as usize + y;
        let row_start = (cy * canvas_w + left as usize) * 3;
        out.extend_from_slice(&canvas[row_start..row_start + width as usize * 3]);
    }
    out
}

/// Paints a frame's indices (or a raw RGB snapshot, when `palette` is empty) into the canvas,
/// skipping pixels equal to `transparent_index` when set.
fn paint_rect(
    canvas: &mut [u8],
    canvas_w: usize,
    rect: (u16, u16, u16, u16),
    data: &[u8],
    transparent_index: Option<u8>,
    palette: &[[u8; 3]],
) {
    let (left, top, width, height) = rect;

    if palette.is_empty() {
        // `data` is already RGB (a restore-previous snapshot).
        for y in 0..height as usize {
            let cy = top as usize + y;
            let row_start = (cy * canvas_w + left as usize) * 3;
            let src = &data[y * width as usize * 3..(y + 1) * width as usize * 3];
            canvas[row_start..row_start + width as usize * 3].copy_from_slice(src);
        }
        return;
    }

    for y in 0..height as usize {
        for x in 0..width as usize {
            let idx = data[y * width as usize + x];
            if Some(idx) == transparent_index {
                continue;
            }
            let color = palette.get(idx as usize).copied().unwrap_or([0, 0, 0]);
            let cx = left as usize + x;
            let cy = top as usize + y;
            let o = (cy * canvas_w + cx) * 3;
            canvas[o..o + 3].copy_from_slice(&color);
        }
    }
}

/// Decodes a GIF from a non-seekable byte stream, buffering it first per §4.1/§9.
pub fn decode_stream<R: std::io::Read>(source: R) -> Result<AnimatedGif> {
    let bytes = buffer_entire_source(source)?;
    decode(&bytes)
}

/// Encodes a single `Rgb24` frame as a GIF89a file: octree-quantised to at most 256 colours,
/// a global colour table, one image descriptor, LZW-compressed indices. Transparency and
/// animation metadata are not emitted, per §4.3.
pub fn encode_single_frame(image: &PixelImage) -> Result<Vec<u8>> {
    if image.color() != ColorKind::Rgb24 {
        return raster_core::errors::argument_error("GIF encoder requires an Rgb24 image");
    }
    if image.width() > u32::from(u16::MAX) || image.height() > u32::from(u16::MAX) {
        return unsupported_error("GIF dimensions must fit in 16 bits");
    }

    let (palette, indices) = octree::quantize(image.buffer(), 256);

    let palette_size_bits = {
        let mut bits = 0u8;
        while (1usize << (bits + 1)) < palette.len() {
            bits += 1;
        }
        bits
    };
    let table_entries = 1usize << (palette_size_bits as usize + 1);

    let mut out = Vec::new();
    out.extend_from_slice(b"GIF89a");
    out.extend_from_slice(&(image.width() as u16).to_le_bytes());
    out.extend_from_slice(&(image.height() as u16).to_le_bytes());
    out.push(0x80 | palette_size_bits); // global colour table present
    out.push(0); // background colour index
    out.push(0); // pixel aspect ratio

    for i in 0..table_entries {
        let color = palette.get(i).copied().unwrap_or([0, 0, 0]);
        out.extend_from_slice(&color);
    }

    out.push(0x2C); // image descriptor
    out.extend_from_slice(&0u16.to_le_bytes()); // left
    out.extend_from_slice(&0u16.to_le_bytes()); // top
    out.extend_from_slice(&(image.width() as u16).to_le_bytes());
    out.extend_from_slice(&(image.height() as u16).to_le_bytes());
    out.push(0); // no local colour table, no interlace

    let min_code_size = (palette_size_bits + 1).max(2);
    out.push(min_code_size);
    let compressed = lzw::encode(min_code_size, &indices);
    out.extend_from_slice(&lzw::into_sub_blocks(&compressed));

    out.push(0x3B); // trailer
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gce(disposal: u8, transparent: Option<u8>, delay: u16) -> Vec<u8> {
        let mut v = vec![0x21, 0xF9, 4];
        let packed = (disposal << 2) | if transparent.is_some() { 1 } else { 0 };
        v.push(packed);
        v.extend_from_slice(&delay.to_le_bytes());
        v.push(transparent.unwrap_or(0));
        v.push(0);
        v
    }

    fn image_descriptor(left: u16, top: u16, width: u16, height: u16, indices: &[u8], min_code_size: u8) -> Vec<u8> {
        let mut v = vec![0x2C];
        v.extend_from_slice(&left.to_le_bytes());
        v.extend_from_slice(&top.to_le_bytes());
        v.extend_from_slice(&width.to_le_bytes());
        v.extend_from_slice(&height.to_le_bytes());
        v.push(0);
        v.push(min_code_size);
        let compressed = lzw::encode(min_code_size, indices);
        v.extend_from_slice(&lzw::into_sub_blocks(&compressed));
        v
    }

    fn netscape_loop(count: u16) -> Vec<u8> {
        let mut v = vec![0x21, 0xFF, 11];
        v.extend_from_slice(b"NETSCAPE2.0");
        v.push(3);
        v.push(1);
        v.extend_from_slice(&count.to_le_bytes());
        v.push(0);
        v
    }

    #[test]
    fn decodes_two_frame_animated_gif_with_loop_extension() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(b"GIF89a");
        bytes.extend_from_slice(&1u16.to_le_bytes());
        bytes.extend_from_slice(&1u16.to_le_bytes());
        bytes.push(0x80); // global colour table, 2 entries
        bytes.push(0);
        bytes.push(0);
        bytes.extend_from_slice(&[255, 0, 0]); // index 0: red
        bytes.extend_from_slice(&[0, 255, 0]); // index 1: green

        bytes.extend_from_slice(&netscape_loop(0));
        bytes.extend_from_slice(&gce(0, None, 10));
        bytes.extend_from_slice(&image_descriptor(0, 0, 1, 1, &[0], 2));
        bytes.extend_from_slice(&gce(0, None, 10));
        bytes.extend_from_slice(&image_descriptor(0, 0, 1, 1, &[1], 2));
        bytes.push(0x3B);

        let gif = decode(&bytes).unwrap();
        assert_eq!(gif.frames.len(), 2);
        assert_eq!(gif.loop_count, 0);
        assert_eq!(gif.frames[0].image.buffer(), &[255, 0, 0]);
        assert_eq!(gif.frames[1].image.buffer(), &[0, 255, 0]);
    }

    #[test]
    fn single_frame_round_trips_through_encoder() {
        let mut buf = Vec::new();
        for y in 0..4u8 {
            for x in 0..4u8 {
                let shade = if (x + y) % 2 == 0 { [10u8, 20, 30] } else { [200, 210, 220] };
                buf.extend_from_slice(&shade);
            }
        }
        let image = PixelImage::new(4, 4, ColorKind::Rgb24, buf.into_boxed_slice(), Metadata::default()).unwrap();

        let encoded = encode_single_frame(&image).unwrap();
        let decoded = decode(&encoded).unwrap();
        assert_eq!(decoded.frames.len(), 1);
        assert_eq!(decoded.width, 4);
        assert_eq!(decoded.height, 4);
    }

    #[test]
    fn rejects_bad_signature() {
        let bytes = b"NOTAGIF3";
        assert!(decode(bytes).is_err());
    }
}
