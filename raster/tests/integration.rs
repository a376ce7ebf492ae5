// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Cross-crate round-trip and seed-scenario coverage for the facade.

use raster::{probe, ColorKind, Format, Metadata, PixelImage};

/// A `Read` adapter that returns at most `chunk` bytes per call, for exercising the
/// `ReadExactly`-over-a-slow-source path shared by every decoder's `decode_stream`.
struct ChunkedReader<'a> {
    data: &'a [u8],
    pos: usize,
    chunk: usize,
}

impl<'a> ChunkedReader<'a> {
    fn new(data: &'a [u8], chunk: usize) -> Self {
        ChunkedReader { data, pos: 0, chunk }
    }
}

impl std::io::Read for ChunkedReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let n = (self.data.len() - self.pos).min(self.chunk).min(buf.len());
        buf[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

fn checker_2x2() -> PixelImage {
    // Red / green checker.
    let buf = [255u8, 0, 0, /**/ 0, 255, 0, /**/ 0, 255, 0, /**/ 255, 0, 0];
    PixelImage::new(2, 2, ColorKind::Rgb24, buf.to_vec().into_boxed_slice(), Metadata::default()).unwrap()
}

fn checker_4x4() -> PixelImage {
    let mut buf = Vec::with_capacity(4 * 4 * 3);
    for y in 0..4u32 {
        for x in 0..4u32 {
            let shade = if (x + y) % 2 == 0 { [10u8, 20, 30] } else { [200, 210, 220] };
            buf.extend_from_slice(&shade);
        }
    }
    PixelImage::new(4, 4, ColorKind::Rgb24, buf.into_boxed_slice(), Metadata::default()).unwrap()
}

#[test]
fn seed_1_sniffs_jpeg_prefix() {
    assert_eq!(probe::sniff(&[0xFF, 0xD8, 0x00, 0x00]), Some(Format::Jpeg));
}

#[test]
fn seed_2_sniffs_png_prefix() {
    let bytes = [0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0x00];
    assert_eq!(probe::sniff(&bytes), Some(Format::Png));
}

#[test]
fn seed_3_bmp_checker_round_trips_pixel_exact() {
    let image = checker_2x2();
    let mut out = Vec::new();
    raster::bmp::encode_rgb24(&image, &mut out).unwrap();

    let decoded = raster::bmp::decode(&out).unwrap();
    assert_eq!(decoded.buffer(), image.buffer());
    assert_eq!((decoded.width(), decoded.height()), (2, 2));
}

#[test]
fn seed_4_png_checker_round_trips_with_srgb_metadata_and_no_icc() {
    let mut image = checker_4x4();
    image.meta_mut().icc = raster::IccProfileKind::SRgb;

    let encoded = raster::png::encode(&image, raster::png::PngEncodeOptions::default()).unwrap();
    let decoded = raster::png::decode(&encoded).unwrap();

    assert_eq!(decoded.buffer(), image.buffer());
    assert!(decoded.meta().is_srgb());
    assert!(decoded.meta().icc_profile_bytes().is_none());
}

#[test]
fn seed_5_grey_ramp_bmp_round_trips_to_equal_channels() {
    let width = 8u32;
    let height = 1u32;
    let buf: Vec<u8> = (0..width).map(|x| (x * 255 / (width - 1)) as u8).collect();
    let image = PixelImage::new(width, height, ColorKind::Gray8, buf.into_boxed_slice(), Metadata::default()).unwrap();

    let mut out = Vec::new();
    raster::bmp::encode_gray8_indexed(&image, &mut out).unwrap();
    let decoded = raster::bmp::decode(&out).unwrap();

    assert_eq!(decoded.color(), ColorKind::Rgb24);
    for px in decoded.buffer().chunks_exact(3) {
        assert_eq!(px[0], px[1]);
        assert_eq!(px[1], px[2]);
    }
}

#[test]
fn chunked_source_equivalence_across_bmp_png_and_jpeg() {
    let image = checker_4x4();

    let mut bmp_bytes = Vec::new();
    raster::bmp::encode_rgb24(&image, &mut bmp_bytes).unwrap();
    let png_bytes = raster::png::encode(&image, raster::png::PngEncodeOptions::default()).unwrap();
    let jpeg_bytes = raster::jpeg::encode(&image, raster::jpeg::JpegEncodeOptions { quality: 95, ..Default::default() }).unwrap();

    let whole_bmp = raster::bmp::decode(&bmp_bytes).unwrap();
    let whole_png = raster::png::decode(&png_bytes).unwrap();
    let whole_jpeg = raster::jpeg::decode(&jpeg_bytes).unwrap();

    for &k in &[1usize, 3, 5, 7, 11] {
        let chunked_bmp = raster::bmp::decode_stream(ChunkedReader::new(&bmp_bytes, k)).unwrap();
        assert_eq!(chunked_bmp.buffer(), whole_bmp.buffer());

        let chunked_png = raster::png::decode_stream(ChunkedReader::new(&png_bytes, k)).unwrap();
        assert_eq!(chunked_png.buffer(), whole_png.buffer());

        let chunked_jpeg = raster::jpeg::decode_stream(ChunkedReader::new(&jpeg_bytes, k)).unwrap();
        assert_eq!(chunked_jpeg.buffer(), whole_jpeg.buffer());
    }
}

#[test]
fn decode_dispatches_on_sniffed_format() {
    let image = checker_2x2();
    let mut bmp_bytes = Vec::new();
    raster::bmp::encode_rgb24(&image, &mut bmp_bytes).unwrap();

    let decoded = raster::decode(&bmp_bytes).unwrap();
    assert_eq!(decoded.buffer(), image.buffer());
}

#[test]
fn decode_rejects_input_with_no_known_signature() {
    assert!(raster::decode(b"definitely not an image").is_err());
}

#[test]
fn animated_gif_with_netscape_loop_decodes_to_two_frames_and_reencodes_to_animated_webp() {
    let mut bytes = Vec::new();
    bytes.extend_from_slice(b"GIF89a");
    bytes.extend_from_slice(&1u16.to_le_bytes());
    bytes.extend_from_slice(&1u16.to_le_bytes());
    bytes.push(0x80); // global colour table present, 2 entries
    bytes.push(0);
    bytes.push(0);
    bytes.extend_from_slice(&[255, 0, 0]); // index 0: red
    bytes.extend_from_slice(&[0, 255, 0]); // index 1: green

    // NETSCAPE2.0 application extension: loop forever.
    bytes.extend_from_slice(&[0x21, 0xFF, 11]);
    bytes.extend_from_slice(b"NETSCAPE2.0");
    bytes.push(3);
    bytes.push(1);
    bytes.extend_from_slice(&0u16.to_le_bytes());
    bytes.push(0);

    for index in [0u8, 1u8] {
        bytes.extend_from_slice(&[0x21, 0xF9, 4, 0]); // graphic control extension, no disposal/transparency
        bytes.extend_from_slice(&10u16.to_le_bytes()); // 100ms delay
        bytes.push(0);
        bytes.push(0);
        bytes.extend_from_slice(&[0x2C, 0, 0, 0, 0, 1, 0, 1, 0, 0]); // image descriptor, 1x1, no local table
        bytes.push(2); // LZW min code size
        let compressed = raster_gif_test_support::lzw_encode_single_index(index);
        bytes.extend_from_slice(&compressed);
    }
    bytes.push(0x3B);

    let animated = raster::gif::decode(&bytes).unwrap();
    assert!(animated.frames.len() >= 2);
    assert_eq!(animated.loop_count, 0);

    let frames: Vec<raster::webp::AnimatedFrame> = animated
        .frames
        .into_iter()
        .map(|f| {
            let rgba: Vec<u8> = f.image.buffer().chunks_exact(3).flat_map(|px| [px[0], px[1], px[2], 255]).collect();
            let image = PixelImage::new(f.image.width(), f.image.height(), ColorKind::Rgba32, rgba.into_boxed_slice(), Metadata::default()).unwrap();
            raster::webp::AnimatedFrame { image, duration_ms: f.delay_cs as u32 * 10 }
        })
        .collect();

    let webp_bytes = raster::webp::encode_animated(&frames, 0, raster::webp::WebpEncodeOptions::default()).unwrap();
    assert_eq!(&webp_bytes[0..4], b"RIFF");
    assert_eq!(&webp_bytes[8..12], b"WEBP");
    let has_anim = webp_bytes.windows(4).any(|w| w == b"ANIM");
    let has_anmf = webp_bytes.windows(4).any(|w| w == b"ANMF");
    assert!(has_anim && has_anmf);
}

/// Minimal standalone LZW encoder for a single-pixel, single-index frame, avoiding a dependency
/// on `raster-gif`'s private `lzw` module from an external test crate.
mod raster_gif_test_support {
    pub fn lzw_encode_single_index(index: u8) -> Vec<u8> {
        // One data sub-block: clear code, the literal index, end-of-information code, all at
        // min_code_size + 1 = 3 bits, LSB-first, followed by the GIF block terminator.
        let clear = 0b100u16; // code 4
        let eoi = 0b101u16; // code 5
        let mut bits: Vec<u8> = Vec::new();
        let mut push_code = |code: u16, width: u32| {
            for b in 0..width {
                bits.push(((code >> b) & 1) as u8);
            }
        };
        push_code(clear, 3);
        push_code(index as u16, 3);
        push_code(eoi, 3);
        while bits.len() % 8 != 0 {
            bits.push(0);
        }
        let data_bytes: Vec<u8> = bits.chunks(8).map(|c| c.iter().enumerate().fold(0u8, |acc, (i, &b)| acc | (b << i))).collect();
        let mut out = Vec::new();
        out.push(data_bytes.len() as u8);
        out.extend_from_slice(&data_bytes);
        out.push(0); // block terminator
        out
    }
}
