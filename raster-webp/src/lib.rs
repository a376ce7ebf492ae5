// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

#![warn(rust_2018_idioms)]

//! A thin boundary between the `raster` pixel model and the external `libwebp` native codec.
//!
//! Unlike the other format crates in this workspace, this one implements no codec of its own:
//! it marshals buffers across the FFI boundary and turns a non-ok native status into a
//! [`raster_core::errors::RasterError::ExternalFailure`]. It is the sole crate in the workspace
//! that does not `#![forbid(unsafe_code)]`.

use std::os::raw::c_int;
use std::sync::Mutex;

use libwebp_sys2 as ffi;
use raster_core::errors::{argument_error, external_error, Result};
use raster_core::pool::BufferPool;
use raster_core::{ColorKind, Metadata, PixelImage};

/// Serialises encode calls unless the caller opts into [`WebpConcurrency::Parallel`].
///
/// `libwebp`'s encoder is reentrant per the upstream documentation, but several vendored builds
/// in the wild are not (they share scratch state across calls); a single process-wide lock is
/// the cheapest way to stay correct everywhere without forcing every caller to audit their build.
static ENCODE_LOCK: Mutex<()> = Mutex::new(());

/// How an encode call should interact with [`ENCODE_LOCK`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebpConcurrency {
    /// Serialises, same as `Serial`. Kept as a distinct variant because callers in the wild use
    /// both names interchangeably; both behave identically here.
    Auto,
    /// Does not take `ENCODE_LOCK`; only safe when the caller's `libwebp` build is reentrant.
    Parallel,
    Serial,
}

impl Default for WebpConcurrency {
    fn default() -> Self {
        WebpConcurrency::Auto
    }
}

/// Options accepted by [`encode`] and [`encode_animated`].
#[derive(Debug, Clone, Copy)]
pub struct WebpEncodeOptions {
    pub quality: u8,
    pub concurrency: WebpConcurrency,
}

impl Default for WebpEncodeOptions {
    fn default() -> Self {
        WebpEncodeOptions { quality: 75, concurrency: WebpConcurrency::Auto }
    }
}

/// One frame of an animated encode: an RGBA (or RGB) image and its on-screen duration.
pub struct AnimatedFrame {
    pub image: PixelImage,
    pub duration_ms: u32,
}

const MIN_FRAME_DURATION_MS: u32 = 10;

fn with_concurrency<T>(concurrency: WebpConcurrency, f: impl FnOnce() -> Result<T>) -> Result<T> {
    if concurrency == WebpConcurrency::Parallel {
        return f();
    }
    let _guard = ENCODE_LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    f()
}

/// Decodes a still WebP image into an `Rgba32` [`PixelImage`].
pub fn decode_rgba(bytes: &[u8]) -> Result<PixelImage> {
    if bytes.is_empty() {
        return argument_error("empty WebP buffer");
    }

    let mut width: c_int = 0;
    let mut height: c_int = 0;

    // Safety: `bytes` outlives the call, `width`/`height` are valid out-params, and the returned
    // pointer (if non-null) was allocated by `libwebp` and is freed exactly once below via
    // `WebPFree`, whether decode succeeds or this function returns early.
    let ptr = unsafe { ffi::WebPDecodeRGBA(bytes.as_ptr(), bytes.len(), &mut width, &mut height) };

    if ptr.is_null() {
        return external_error("libwebp failed to decode RGBA buffer");
    }

    let len = width as usize * height as usize * 4;
    let pool = BufferPool::new();
    let buffer = unsafe {
        let slice = std::slice::from_raw_parts(ptr, len);
        let mut owned = pool.checkout(len);
        owned.copy_from_slice(slice);
        ffi::WebPFree(ptr as *mut std::os::raw::c_void);
        owned.into_inner()
    };

    PixelImage::new(width as u32, height as u32, ColorKind::Rgba32, buffer.into_boxed_slice(), Metadata::default())
}

/// Encodes an `Rgb24` or `Rgba32` [`PixelImage`] as a still lossy WebP.
pub fn encode(image: &PixelImage, options: WebpEncodeOptions) -> Result<Vec<u8>> {
    if !matches!(image.color(), ColorKind::Rgb24 | ColorKind::Rgba32) {
        return argument_error("WebP encoder accepts only Rgb24 or Rgba32 input");
    }
    if options.quality > 100 {
        return argument_error("WebP quality must be in 0..=100");
    }

    with_concurrency(options.concurrency, || encode_still(image, options.quality))
}

fn encode_still(image: &PixelImage, quality: u8) -> Result<Vec<u8>> {
    let width = image.width() as c_int;
    let height = image.height() as c_int;
    let stride = image.stride() as c_int;
    let quality_factor = quality as f32;

    let mut output: *mut u8 = std::ptr::null_mut();

    // Safety: `image.buffer()` has exactly `stride * height` bytes by the `PixelImage` length
    // invariant, matching what `libwebp` expects for the chosen call. `output` is allocated by
    // `libwebp` on success and freed exactly once below.
    let size = unsafe {
        match image.color() {
            ColorKind::Rgba32 => {
                ffi::WebPEncodeRGBA(image.buffer().as_ptr(), width, height, stride, quality_factor, &mut output)
            }
            ColorKind::Rgb24 => {
                ffi::WebPEncodeRGB(image.buffer().as_ptr(), width, height, stride, quality_factor, &mut output)
            }
            _ => unreachable!("caller already rejected non-RGB(A) colour kinds"),
        }
    };

    if size == 0 || output.is_null() {
        return external_error("libwebp failed to encode still image");
    }

    let pool = BufferPool::new();
    let bytes = unsafe {
        let slice = std::slice::from_raw_parts(output, size);
        let mut owned = pool.checkout(size);
        owned.copy_from_slice(slice);
        ffi::WebPFree(output as *mut std::os::raw::c_void);
        owned.into_inner()
    };

    Ok(bytes)
}

/// Assembles a sequence of RGBA frames into an animated WebP (`RIFF`/`WEBP` container with
/// `ANIM`/`ANMF` chunks).
///
/// Per-frame duration is clamped to a minimum of [`MIN_FRAME_DURATION_MS`]; a negative
/// `loop_count` maps to `0` (infinite looping, `libwebp`'s convention).
pub fn encode_animated(frames: &[AnimatedFrame], loop_count: i32, options: WebpEncodeOptions) -> Result<Vec<u8>> {
    if frames.is_empty() {
        return argument_error("animated WebP encode requires at least one frame");
    }
    for frame in frames {
        if !matches!(frame.image.color(), ColorKind::Rgb24 | ColorKind::Rgba32) {
            return argument_error("WebP encoder accepts only Rgb24 or Rgba32 frames");
        }
    }
    if options.quality > 100 {
        return argument_error("WebP quality must be in 0..=100");
    }

    let width = frames[0].image.width();
    let height = frames[0].image.height();
    if frames.iter().any(|f| f.image.width() != width || f.image.height() != height) {
        return argument_error("all animated WebP frames must share one canvas size");
    }

    let loop_count = loop_count.max(0) as u32;

    with_concurrency(options.concurrency, || encode_animated_locked(frames, width, height, loop_count, options.quality))
}

fn encode_animated_locked(frames: &[AnimatedFrame], width: u32, height: u32, loop_count: u32, quality: u8) -> Result<Vec<u8>> {
    let mut anim_options: ffi::WebPAnimEncoderOptions = unsafe { std::mem::zeroed() };
    // Safety: `anim_options` is a plain-old-data struct zero-initialised above; `Init` only
    // fills in default field values and returns a version-mismatch status, never writing
    // outside the struct.
    if unsafe { ffi::WebPAnimEncoderOptionsInit(&mut anim_options) } == 0 {
        return external_error("libwebp anim encoder options version mismatch");
    }
    anim_options.anim_params.loop_count = loop_count as c_int;

    // Safety: `width`/`height` are positive (checked by `PixelImage::new` on every frame), and
    // `anim_options` was just initialised above.
    let encoder = unsafe { ffi::WebPAnimEncoderNew(width as c_int, height as c_int, &anim_options) };
    if encoder.is_null() {
        return external_error("libwebp failed to create an animation encoder");
    }

    let result = (|| -> Result<Vec<u8>> {
        let mut config: ffi::WebPConfig = unsafe { std::mem::zeroed() };
        // Safety: same pattern as `anim_options` above.
        if unsafe { ffi::WebPConfigInit(&mut config) } == 0 {
            return external_error("libwebp config version mismatch");
        }
        config.quality = quality as f32;

        let mut timestamp_ms: i64 = 0;
        for frame in frames {
            let clamped = frame.duration_ms.max(MIN_FRAME_DURATION_MS);
            if clamped != frame.duration_ms {
                log::debug!("clamping animated WebP frame duration {}ms up to the {}ms minimum", frame.duration_ms, MIN_FRAME_DURATION_MS);
            }

            let mut picture: ffi::WebPPicture = unsafe { std::mem::zeroed() };
            // Safety: `picture` is zero-initialised above; `Init` only sets default fields.
            if unsafe { ffi::WebPPictureInit(&mut picture) } == 0 {
                return external_error("libwebp picture version mismatch");
            }
            picture.width = width as c_int;
            picture.height = height as c_int;
            picture.use_argb = 1;

            let stride = frame.image.stride() as c_int;
            // Safety: `picture` was just initialised, `frame.image.buffer()` has
            // `stride * height` bytes per the `PixelImage` length invariant, and
            // `WebPPictureImportRgba`/`WebPPictureImportRgb` allocate `picture`'s internal
            // buffers rather than aliasing the input, so it is freed once below regardless of
            // whether the import call this iteration used RGB or RGBA.
            let imported = unsafe {
                match frame.image.color() {
                    ColorKind::Rgba32 => ffi::WebPPictureImportRGBA(&mut picture, frame.image.buffer().as_ptr(), stride),
                    ColorKind::Rgb24 => ffi::WebPPictureImportRGB(&mut picture, frame.image.buffer().as_ptr(), stride),
                    _ => unreachable!("caller already rejected non-RGB(A) colour kinds"),
                }
            };
            if imported == 0 {
                unsafe { ffi::WebPPictureFree(&mut picture) };
                return external_error("libwebp failed to import a frame into the animation encoder");
            }

            // Safety: `encoder` is live for the duration of this closure, `picture` was just
            // imported, and `config` was initialised above.
            let added = unsafe { ffi::WebPAnimEncoderAdd(encoder, &mut picture, timestamp_ms as c_int, &config) };
            unsafe { ffi::WebPPictureFree(&mut picture) };
            if added == 0 {
                return external_error("libwebp rejected an animation frame");
            }

            timestamp_ms += clamped as i64;
        }

        // A final `Add(None, ...)` call marks the timestamp of the last frame's end.
        // Safety: `encoder` is live; a null frame pointer is `libwebp`'s documented way to
        // flush the final frame's duration with no new picture.
        if unsafe { ffi::WebPAnimEncoderAdd(encoder, std::ptr::null_mut(), timestamp_ms as c_int, std::ptr::null()) } == 0 {
            return external_error("libwebp failed to flush the final animation frame");
        }

        let mut webp_data: ffi::WebPData = unsafe { std::mem::zeroed() };
        // Safety: `encoder` is live and every frame above was accepted.
        if unsafe { ffi::WebPAnimEncoderAssemble(encoder, &mut webp_data) } == 0 {
            return external_error("libwebp failed to assemble the animation container");
        }

        let pool = BufferPool::new();
        let bytes = unsafe {
            let slice = std::slice::from_raw_parts(webp_data.bytes, webp_data.size);
            let mut owned = pool.checkout(webp_data.size);
            owned.copy_from_slice(slice);
            ffi::WebPDataClear(&mut webp_data);
            owned.into_inner()
        };
        Ok(bytes)
    })();

    // Safety: `encoder` was allocated by `WebPAnimEncoderNew` above and is released exactly
    // once here, on every exit path of the closure (success or error).
    unsafe { ffi::WebPAnimEncoderDelete(encoder) };

    result
}
