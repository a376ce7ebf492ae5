// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms)]

//! A pure Rust JPEG decoder (baseline and progressive Huffman) and baseline encoder.
//!
//! The decoder walks markers, decodes entropy-coded scans into a per-component coefficient
//! plane, then dequantises, inverse-DCTs, upsamples, colour-converts, and applies any EXIF
//! orientation in one pass at end of frame. The encoder is baseline sequential only.

mod color;
mod huffman;
mod idct;
mod tables;
mod upsample;

use huffman::HuffmanTable;
use raster_core::errors::{invalid_format_error, truncated_error, unsupported_error, Result};
use raster_core::io::{buffer_entire_source, BitReaderMsb, ByteReader, MarkerEvent, ReadBytes};
use raster_core::{ColorKind, ExifOrientation, IccProfileKind, Metadata, PixelImage, Subsampling};

const SOI: u8 = 0xD8;
const EOI: u8 = 0xD9;
const SOF0: u8 = 0xC0;
const SOF2: u8 = 0xC2;
const DHT: u8 = 0xC4;
const DQT: u8 = 0xDB;
const DRI: u8 = 0xDD;
const SOS: u8 = 0xDA;
const APP0: u8 = 0xE0;
const APP1: u8 = 0xE1;
const APP2: u8 = 0xE2;
const APP14: u8 = 0xEE;

/// Options accepted by [`decode`]. `force_slow_huffman` is used only by the
/// fast/slow-path-equivalence tests; the library always produces identical output either way.
#[derive(Debug, Clone, Copy, Default)]
pub struct JpegDecodeOptions {
    pub force_slow_huffman: bool,
}

/// Options accepted by the baseline encoder (§6).
#[derive(Debug, Clone, Copy)]
pub struct JpegEncodeOptions {
    pub quality: u8,
    pub subsampling: Subsampling,
    pub restart_interval: u16,
}

impl Default for JpegEncodeOptions {
    fn default() -> Self {
        JpegEncodeOptions { quality: 75, subsampling: Subsampling::S420, restart_interval: 0 }
    }
}

#[derive(Debug, Clone, Copy)]
struct Component {
    id: u8,
    h: u8,
    v: u8,
    tq: u8,
}

struct Frame {
    width: u32,
    height: u32,
    components: Vec<Component>,
    hmax: u8,
    vmax: u8,
    mcus_per_line: u32,
    mcus_per_col: u32,
}

impl Frame {
    fn blocks_w(&self, c: &Component) -> usize {
        self.mcus_per_line as usize * c.h as usize
    }

    fn blocks_h(&self, c: &Component) -> usize {
        self.mcus_per_col as usize * c.v as usize
    }
}

#[derive(Default)]
struct IccAccumulator {
    chunks: Vec<(u8, u8, Vec<u8>)>,
}

impl IccAccumulator {
    fn add(&mut self, seq: u8, total: u8, data: Vec<u8>) {
        self.chunks.push((seq, total, data));
    }

    fn assemble(mut self) -> Option<Vec<u8>> {
        if self.chunks.is_empty() {
            return None;
        }
        self.chunks.sort_by_key(|&(seq, _, _)| seq);
        let mut out = Vec::new();
        for (_, _, data) in self.chunks {
            out.extend_from_slice(&data);
        }
        Some(out)
    }
}

struct DecoderState {
    quant: [Option<[u16; 64]>; 4],
    dc_tables: [Option<HuffmanTable>; 4],
    ac_tables: [Option<HuffmanTable>; 4],
    restart_interval: u16,
    frame: Option<Frame>,
    progressive: bool,
    coeffs: Vec<Vec<i32>>,
    adobe_transform: Option<u8>,
    exif_orientation: ExifOrientation,
    icc: IccAccumulator,
    options: JpegDecodeOptions,
}

/// Decodes a JPEG file from an in-memory buffer into an `Rgb24` (3+ components) or `Gray8`
/// (1 component) [`PixelImage`], with EXIF orientation already applied.
pub fn decode(bytes: &[u8]) -> Result<PixelImage> {
    decode_with_options(bytes, JpegDecodeOptions::default())
}

pub fn decode_with_options(bytes: &[u8], options: JpegDecodeOptions) -> Result<PixelImage> {
    let mut r = ByteReader::new(bytes);

    let marker = read_marker(&mut r)?;
    if marker != Some(SOI) {
        return invalid_format_error("JPEG stream does not start with SOI");
    }

    let mut state = DecoderState {
        quant: [None; 4],
        dc_tables: [None, None, None, None],
        ac_tables: [None, None, None, None],
        restart_interval: 0,
        frame: None,
        progressive: false,
        coeffs: Vec::new(),
        adobe_transform: None,
        exif_orientation: ExifOrientation::default(),
        icc: IccAccumulator::default(),
        options,
    };

    loop {
        let marker = match read_marker(&mut r)? {
            Some(m) => m,
            None => return invalid_format_error("JPEG stream ended without EOI"),
        };

        match marker {
            EOI => break,
            DQT => parse_dqt(&mut r, &mut state)?,
            DHT => parse_dht(&mut r, &mut state)?,
            SOF0 => parse_sof(&mut r, &mut state, false)?,
            SOF2 => parse_sof(&mut r, &mut state, true)?,
            DRI => {
                let len = r.read_u16_be()?;
                if len != 4 {
                    return invalid_format_error("malformed DRI segment length");
                }
                state.restart_interval = r.read_u16_be()?;
            }
            SOS => decode_scan(&mut r, &mut state)?,
            APP0 => skip_segment(&mut r)?,
            APP1 => parse_app1(&mut r, &mut state)?,
            APP2 => parse_app2(&mut r, &mut state)?,
            APP14 => parse_app14(&mut r, &mut state)?,
            0xC1 | 0xC3 | 0xC5..=0xC7 | 0xC9..=0xCF => {
                return unsupported_error("only baseline and progressive Huffman JPEG are supported");
            }
            _ => {
                log::debug!("skipping JPEG segment with marker 0xFF{marker:02X}");
                skip_segment(&mut r)?
            }
        }
    }

    finish_decode(state)
}

/// Reads the next marker, skipping fill bytes (`0xFF` repeated) per the marker syntax. Returns
/// `Ok(None)` at end of stream.
fn read_marker(r: &mut ByteReader<'_>) -> Result<Option<u8>> {
    loop {
        if r.remaining() == 0 {
            return Ok(None);
        }
        let b = r.read_u8()?;
        if b != 0xFF {
            return invalid_format_error("expected 0xFF marker prefix");
        }
        loop {
            if r.remaining() == 0 {
                return Ok(None);
            }
            let next = r.read_u8()?;
            if next == 0xFF {
                continue; // fill byte
            }
            if next == 0x00 {
                return invalid_format_error("unexpected stuffed byte outside entropy-coded data");
            }
            return Ok(Some(next));
        }
    }
}

fn skip_segment(r: &mut ByteReader<'_>) -> Result<()> {
    let len = r.read_u16_be()? as usize;
    if len < 2 {
        return invalid_format_error("segment length is smaller than the length field itself");
    }
    r.skip(len - 2)
}

fn parse_dqt(r: &mut ByteReader<'_>, state: &mut DecoderState) -> Result<()> {
    let len = r.read_u16_be()? as usize;
    if len < 2 {
        return invalid_format_error("malformed DQT segment length");
    }
    let end = r.pos() + (len - 2);

    while r.pos() < end {
        let pq_tq = r.read_u8()?;
        let precision = pq_tq >> 4;
        let tq = (pq_tq & 0x0F) as usize;
        if tq >= 4 {
            return invalid_format_error("DQT table index out of range");
        }

        let mut table = [0u16; 64];
        for slot in table.iter_mut() {
            *slot = if precision == 0 { r.read_u8()? as u16 } else { r.read_u16_be()? };
        }
        state.quant[tq] = Some(table);
    }

    Ok(())
}

fn parse_dht(r: &mut ByteReader<'_>, state: &mut DecoderState) -> Result<()> {
    let len = r.read_u16_be()? as usize;
    if len < 2 {
        return invalid_format_error("malformed DHT segment length");
    }
    let end = r.pos() + (len - 2);

    while r.pos() < end {
        let tc_th = r.read_u8()?;
        let class = tc_th >> 4;
        let th = (tc_th & 0x0F) as usize;
        if th >= 4 {
            return invalid_format_error("DHT table index out of range");
        }

        let mut bits = [0u8; 16];
        for b in bits.iter_mut() {
            *b = r.read_u8()?;
        }
        let total: usize = bits.iter().map(|&b| b as usize).sum();
        let values = r.read_slice(total)?.to_vec();

        let table = HuffmanTable::build(&bits, &values)?;
        if class == 0 {
            state.dc_tables[th] = Some(table);
        } else {
            state.ac_tables[th] = Some(table);
        }
    }

    Ok(())
}

fn parse_sof(r: &mut ByteReader<'_>, state: &mut DecoderState, progressive: bool) -> Result<()> {
    if state.frame.is_some() {
        return unsupported_error("multiple SOF segments (hierarchical JPEG) are not supported");
    }

    let _len = r.read_u16_be()?;
    let precision = r.read_u8()?;
    if precision != 8 {
        return unsupported_error("only 8-bit sample precision is supported");
    }

    let height = r.read_u16_be()? as u32;
    let width = r.read_u16_be()? as u32;
    if width == 0 || height == 0 {
        return invalid_format_error("zero JPEG frame dimension");
    }

    let n = r.read_u8()? as usize;
    if !(1..=4).contains(&n) {
        return unsupported_error("unsupported JPEG component count");
    }

    let mut components = Vec::with_capacity(n);
    for _ in 0..n {
        let id = r.read_u8()?;
        let hv = r.read_u8()?;
        let tq = r.read_u8()?;
        components.push(Component { id, h: hv >> 4, v: hv & 0x0F, tq });
    }

    let hmax = components.iter().map(|c| c.h).max().unwrap_or(1);
    let vmax = components.iter().map(|c| c.v).max().unwrap_or(1);
    let mcus_per_line = (width + 8 * hmax as u32 - 1) / (8 * hmax as u32);
    let mcus_per_col = (height + 8 * vmax as u32 - 1) / (8 * vmax as u32);

    let frame = Frame { width, height, components: components.clone(), hmax, vmax, mcus_per_line, mcus_per_col };

    state.coeffs = components
        .iter()
        .map(|c| vec![0i32; frame.blocks_w(c) * frame.blocks_h(c) * 64])
        .collect();
    state.progressive = progressive;
    state.frame = Some(frame);

    Ok(())
}

struct ScanComponent {
    component_index: usize,
    dc_table: usize,
    ac_table: usize,
}

fn decode_scan(r: &mut ByteReader<'_>, state: &mut DecoderState) -> Result<()> {
    let frame = match &state.frame {
        Some(f) => f,
        None => return invalid_format_error("SOS encountered before SOF"),
    };

    let _len = r.read_u16_be()?;
    let ns = r.read_u8()? as usize;
    if !(1..=4).contains(&ns) {
        return invalid_format_error("invalid scan component count");
    }

    let mut scan_components = Vec::with_capacity(ns);
    for _ in 0..ns {
        let cs = r.read_u8()?;
        let td_ta = r.read_u8()?;
        let component_index = match frame.components.iter().position(|c| c.id == cs) {
            Some(i) => i,
            None => return invalid_format_error("scan references an undeclared component id"),
        };
        scan_components.push(ScanComponent {
            component_index,
            dc_table: (td_ta >> 4) as usize,
            ac_table: (td_ta & 0x0F) as usize,
        });
    }

    let ss = r.read_u8()? as usize;
    let se = r.read_u8()? as usize;
    let ah_al = r.read_u8()?;
    let ah = ah_al >> 4;
    let al = ah_al & 0x0F;

    if ss > 63 || se > 63 || ss > se {
        return invalid_format_error("invalid spectral selection range");
    }

    // The entropy-coded segment runs from here to the next marker that isn't a restart marker.
    let mut reader = BitReaderMsb::new(r.as_slice());

    if state.progressive {
        decode_progressive_scan(&mut reader, state, &scan_components, ss, se, ah, al)?;
    } else {
        decode_baseline_scan(&mut reader, state, &scan_components)?;
    }

    // `stream_pos` is relative to the slice the bit reader was built from, which began at `r`'s
    // current position, so it is exactly the number of bytes to advance `r` by.
    r.skip(reader.stream_pos())?;

    Ok(())
}

fn component_dims(frame: &Frame, idx: usize) -> (usize, usize) {
    let c = &frame.components[idx];
    (frame.blocks_w(c), frame.blocks_h(c))
}

fn decode_baseline_scan(
    reader: &mut BitReaderMsb<'_>,
    state: &mut DecoderState,
    scan_components: &[ScanComponent],
) -> Result<()> {
    let frame = state.frame.as_ref().unwrap();
    let mcus_per_line = frame.mcus_per_line;
    let mcus_per_col = frame.mcus_per_col;
    let restart_interval = state.restart_interval;

    let mut dc_pred = vec![0i32; scan_components.len()];
    let mut mcus_since_restart = 0u32;

    for mcu_row in 0..mcus_per_col {
        for mcu_col in 0..mcus_per_line {
            for (si, sc) in scan_components.iter().enumerate() {
                let comp = frame.components[sc.component_index];
                let (blocks_w, _blocks_h) = component_dims(frame, sc.component_index);

                let dc_table = match state.dc_tables[sc.dc_table].as_ref() {
                    Some(t) => t,
                    None => return invalid_format_error("scan references an undefined DC Huffman table"),
                };
                let ac_table = match state.ac_tables[sc.ac_table].as_ref() {
                    Some(t) => t,
                    None => return invalid_format_error("scan references an undefined AC Huffman table"),
                };

                for vy in 0..comp.v as u32 {
                    for hx in 0..comp.h as u32 {
                        let block_x = mcu_col * comp.h as u32 + hx;
                        let block_y = mcu_row * comp.v as u32 + vy;
                        let block_index = (block_y as usize * blocks_w + block_x as usize) * 64;

                        decode_block_baseline(
                            reader,
                            state.options.force_slow_huffman,
                            dc_table,
                            ac_table,
                            &mut dc_pred[si],
                            &mut state.coeffs[sc.component_index][block_index..block_index + 64],
                        )?;
                    }
                }
            }

            mcus_since_restart += 1;
            if restart_interval != 0 && mcus_since_restart == restart_interval as u32 {
                handle_restart(reader)?;
                mcus_since_restart = 0;
                for p in dc_pred.iter_mut() {
                    *p = 0;
                }
            }
        }
    }

    Ok(())
}

fn decode_block_baseline(
    reader: &mut BitReaderMsb<'_>,
    force_slow: bool,
    dc_table: &HuffmanTable,
    ac_table: &HuffmanTable,
    dc_pred: &mut i32,
    out: &mut [i32],
) -> Result<()> {
    for slot in out.iter_mut() {
        *slot = 0;
    }

    let category = if force_slow { dc_table.decode_slow(reader)? } else { dc_table.decode_fast(reader)? };
    let diff = huffman::receive_extend(reader, category)?;
    *dc_pred += diff;
    out[0] = *dc_pred;

    let mut k = 1usize;
    while k < 64 {
        let rs = if force_slow { ac_table.decode_slow(reader)? } else { ac_table.decode_fast(reader)? };
        let run = (rs >> 4) as usize;
        let size = rs & 0x0F;

        if size == 0 {
            if run == 15 {
                k += 16;
                continue;
            }
            break; // EOB
        }

        k += run;
        if k >= 64 {
            return invalid_format_error("AC coefficient run exceeds block size");
        }
        out[k] = huffman::receive_extend(reader, size)?;
        k += 1;
    }

    Ok(())
}

fn handle_restart(reader: &mut BitReaderMsb<'_>) -> Result<()> {
    reader.byte_align();
    match reader.pending_marker() {
        Some(MarkerEvent::Restart(_)) => {
            reader.consume_restart_marker()?;
            Ok(())
        }
        _ => truncated_error("expected a restart marker at the restart interval boundary"),
    }
}

#[allow(clippy::too_many_arguments)]
fn decode_progressive_scan(
    reader: &mut BitReaderMsb<'_>,
    state: &mut DecoderState,
    scan_components: &[ScanComponent],
    ss: usize,
    se: usize,
    ah: u8,
    al: u8,
) -> Result<()> {
    let frame = state.frame.as_ref().unwrap();
    let restart_interval = state.restart_interval;

    if ss == 0 {
        // DC scan: may be interleaved across multiple components, MCU order.
        let mcus_per_line = frame.mcus_per_line;
        let mcus_per_col = frame.mcus_per_col;
        let mut dc_pred = vec![0i32; scan_components.len()];
        let mut mcus_since_restart = 0u32;

        for mcu_row in 0..mcus_per_col {
            for mcu_col in 0..mcus_per_line {
                for (si, sc) in scan_components.iter().enumerate() {
                    let comp = frame.components[sc.component_index];
                    let (blocks_w, _) = component_dims(frame, sc.component_index);

                    for vy in 0..comp.v as u32 {
                        for hx in 0..comp.h as u32 {
                            let block_x = mcu_col * comp.h as u32 + hx;
                            let block_y = mcu_row * comp.v as u32 + vy;
                            let idx = (block_y as usize * blocks_w + block_x as usize) * 64;

                            if ah == 0 {
                                let dc_table = match state.dc_tables[sc.dc_table].as_ref() {
                                    Some(t) => t,
                                    None => return invalid_format_error("undefined DC Huffman table"),
                                };
                                let category = if state.options.force_slow_huffman {
                                    dc_table.decode_slow(reader)?
                                } else {
                                    dc_table.decode_fast(reader)?
                                };
                                let diff = huffman::receive_extend(reader, category)?;
                                dc_pred[si] += diff;
                                state.coeffs[sc.component_index][idx] = dc_pred[si] << al;
                            } else {
                                let bit = reader.consume_bit()?;
                                state.coeffs[sc.component_index][idx] |= (bit as i32) << al;
                            }
                        }
                    }
                }

                mcus_since_restart += 1;
                if restart_interval != 0 && mcus_since_restart == restart_interval as u32 {
                    handle_restart(reader)?;
                    mcus_since_restart = 0;
                    for p in dc_pred.iter_mut() {
                        *p = 0;
                    }
                }
            }
        }

        return Ok(());
    }

    // AC scan: non-interleaved, exactly one component, raster order over that component's blocks.
    if scan_components.len() != 1 {
        return invalid_format_error("progressive AC scans must be non-interleaved");
    }
    let sc = &scan_components[0];
    let (blocks_w, blocks_h) = component_dims(frame, sc.component_index);
    let mut eobrun = 0i32;
    let mut blocks_since_restart = 0u32;

    for by in 0..blocks_h {
        for bx in 0..blocks_w {
            let idx = (by * blocks_w + bx) * 64;
            let block = &mut state.coeffs[sc.component_index][idx..idx + 64];

            let force_slow = state.options.force_slow_huffman;
            if ah == 0 {
                decode_ac_first(reader, state.ac_tables[sc.ac_table].as_ref(), block, ss, se, al, &mut eobrun, force_slow)?;
            } else {
                decode_ac_refine(reader, state.ac_tables[sc.ac_table].as_ref(), block, ss, se, al, &mut eobrun, force_slow)?;
            }

            blocks_since_restart += 1;
            if restart_interval != 0 && blocks_since_restart == restart_interval as u32 {
                handle_restart(reader)?;
                blocks_since_restart = 0;
                eobrun = 0;
            }
        }
    }

    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn decode_ac_first(
    reader: &mut BitReaderMsb<'_>,
    ac_table: Option<&HuffmanTable>,
    block: &mut [i32],
    ss: usize,
    se: usize,
    al: u8,
    eobrun: &mut i32,
    force_slow: bool,
) -> Result<()> {
    let ac_table = match ac_table {
        Some(t) => t,
        None => return invalid_format_error("undefined AC Huffman table"),
    };

    if *eobrun > 0 {
        *eobrun -= 1;
        return Ok(());
    }

    let mut k = ss;
    while k <= se {
        let rs = if force_slow { ac_table.decode_slow(reader)? } else { ac_table.decode_fast(reader)? };
        let run = (rs >> 4) as usize;
        let size = rs & 0x0F;

        if size == 0 {
            if run < 15 {
                *eobrun = (1i32 << run) - 1;
                if run > 0 {
                    *eobrun += reader.consume_bits(run as u32)? as i32;
                }
                return Ok(());
            }
            k += 16; // ZRL
            continue;
        }

        k += run;
        if k > se {
            return invalid_format_error("progressive AC run exceeds spectral band");
        }
        block[k] = huffman::receive_extend(reader, size)? << al;
        k += 1;
    }

    Ok(())
}

fn refine_nonzero(reader: &mut BitReaderMsb<'_>, coeff: &mut i32, bit: i32) -> Result<()> {
    if reader.consume_bit()? != 0 && (*coeff & bit) == 0 {
        if *coeff > 0 {
            *coeff += bit;
        } else {
            *coeff -= bit;
        }
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn decode_ac_refine(
    reader: &mut BitReaderMsb<'_>,
    ac_table: Option<&HuffmanTable>,
    block: &mut [i32],
    ss: usize,
    se: usize,
    al: u8,
    eobrun: &mut i32,
    force_slow: bool,
) -> Result<()> {
    let ac_table = match ac_table {
        Some(t) => t,
        None => return invalid_format_error("undefined AC Huffman table"),
    };

    let bit = 1i32 << al;
    let mut k = ss;

    if *eobrun == 0 {
        while k <= se {
            let rs = if force_slow { ac_table.decode_slow(reader)? } else { ac_table.decode_fast(reader)? };
            let mut run = (rs >> 4) as i32;
            let size = rs & 0x0F;
            let mut new_value = 0i32;
            let mut inserting = false;

            if size == 0 {
                if run < 15 {
                    *eobrun = (1i32 << run) - 1;
                    if run > 0 {
                        *eobrun += reader.consume_bits(run as u32)? as i32;
                    }
                    run = -1; // signal: go straight to the trailing EOB correction pass below
                } else {
                    // ZRL: 16 zero-history coefficients, none of them newly nonzero. The skip
                    // loop below breaks as soon as it sees the `run`-th zero-history slot, so
                    // asking for 16 of them (not 15) is what makes it consume all 16.
                    run = 16;
                }
            } else {
                // size must be 1: a newly nonzero coefficient, sign from the next bit.
                inserting = true;
                new_value = if reader.consume_bit()? != 0 { bit } else { -bit };
            }

            if run < 0 {
                break;
            }

            while k <= se {
                if block[k] != 0 {
                    refine_nonzero(reader, &mut block[k], bit)?;
                } else {
                    if run == 0 {
                        if inserting {
                            block[k] = new_value;
                            k += 1;
                        }
                        break;
                    }
                    run -= 1;
                }
                k += 1;
            }
        }
    }

    if *eobrun > 0 {
        while k <= se {
            if block[k] != 0 {
                refine_nonzero(reader, &mut block[k], bit)?;
            }
            k += 1;
        }
        *eobrun -= 1;
    }

    Ok(())
}

fn parse_app1(r: &mut ByteReader<'_>, state: &mut DecoderState) -> Result<()> {
    let len = r.read_u16_be()? as usize;
    if len < 2 {
        return invalid_format_error("malformed APP1 segment length");
    }
    let data = r.read_slice(len - 2)?;

    if data.len() >= 6 && &data[0..6] == b"Exif\0\0" {
        if let Some(orientation) = parse_exif_orientation(&data[6..]) {
            state.exif_orientation = orientation;
        }
    }

    Ok(())
}

fn parse_exif_orientation(tiff: &[u8]) -> Option<ExifOrientation> {
    if tiff.len() < 8 {
        return None;
    }
    let little_endian = match &tiff[0..2] {
        b"II" => true,
        b"MM" => false,
        _ => return None,
    };

    let read_u16 = |b: &[u8]| -> u16 {
        if little_endian { u16::from_le_bytes([b[0], b[1]]) } else { u16::from_be_bytes([b[0], b[1]]) }
    };
    let read_u32 = |b: &[u8]| -> u32 {
        if little_endian {
            u32::from_le_bytes([b[0], b[1], b[2], b[3]])
        } else {
            u32::from_be_bytes([b[0], b[1], b[2], b[3]])
        }
    };

    let ifd_offset = read_u32(&tiff[4..8]) as usize;
    if ifd_offset + 2 > tiff.len() {
        return None;
    }
    let entry_count = read_u16(&tiff[ifd_offset..ifd_offset + 2]) as usize;

    for i in 0..entry_count {
        let entry_offset = ifd_offset + 2 + i * 12;
        if entry_offset + 12 > tiff.len() {
            break;
        }
        let tag = read_u16(&tiff[entry_offset..entry_offset + 2]);
        if tag == 0x0112 {
            let value = read_u16(&tiff[entry_offset + 8..entry_offset + 10]);
            return Some(ExifOrientation::from_tag(value));
        }
    }

    None
}

fn parse_app2(r: &mut ByteReader<'_>, state: &mut DecoderState) -> Result<()> {
    let len = r.read_u16_be()? as usize;
    if len < 2 {
        return invalid_format_error("malformed APP2 segment length");
    }
    let data = r.read_slice(len - 2)?;

    if data.len() >= 14 && &data[0..12] == b"ICC_PROFILE\0" {
        let seq = data[12];
        let total = data[13];
        state.icc.add(seq, total, data[14..].to_vec());
    }

    Ok(())
}

fn parse_app14(r: &mut ByteReader<'_>, state: &mut DecoderState) -> Result<()> {
    let len = r.read_u16_be()? as usize;
    if len < 2 {
        return invalid_format_error("malformed APP14 segment length");
    }
    let data = r.read_slice(len - 2)?;

    if data.len() >= 12 && &data[0..5] == b"Adobe" {
        state.adobe_transform = Some(data[11]);
    }

    Ok(())
}

fn finish_decode(state: DecoderState) -> Result<PixelImage> {
    let frame = match state.frame {
        Some(f) => f,
        None => return invalid_format_error("JPEG stream has no SOF segment"),
    };

    let mut planes: Vec<(Vec<u8>, usize, usize)> = Vec::with_capacity(frame.components.len());

    for (ci, comp) in frame.components.iter().enumerate() {
        let blocks_w = frame.blocks_w(comp);
        let blocks_h = frame.blocks_h(comp);
        let plane_w = blocks_w * 8;
        let plane_h = blocks_h * 8;
        let quant = match state.quant[comp.tq as usize] {
            Some(q) => q,
            None => return invalid_format_error("component references an undefined quantisation table"),
        };

        let mut plane = vec![0u8; plane_w * plane_h];
        for by in 0..blocks_h {
            for bx in 0..blocks_w {
                let idx = (by * blocks_w + bx) * 64;
                let zigzag_block = &state.coeffs[ci][idx..idx + 64];

                let mut natural = [0i32; 64];
                for (k, &coeff) in zigzag_block.iter().enumerate() {
                    natural[tables::ZIGZAG[k]] = coeff * quant[k] as i32;
                }

                let samples = idct::idct_float(&natural);
                for y in 0..8 {
                    for x in 0..8 {
                        plane[(by * 8 + y) * plane_w + (bx * 8 + x)] = samples[y * 8 + x];
                    }
                }
            }
        }

        let h_factor = (frame.hmax / comp.h) as usize;
        let v_factor = (frame.vmax / comp.v) as usize;
        let (upsampled, up_w, up_h) = upsample::upsample_nearest(&plane, plane_w, plane_h, h_factor, v_factor);
        planes.push((upsampled, up_w, up_h));
    }

    let width = frame.width as usize;
    let height = frame.height as usize;

    let (rgb, color_kind) = match frame.components.len() {
        1 => {
            let (plane, plane_w, _) = &planes[0];
            let mut out = vec![0u8; width * height];
            for y in 0..height {
                for x in 0..width {
                    out[y * width + x] = plane[y * plane_w + x];
                }
            }
            (out, ColorKind::Gray8)
        }
        3 => {
            let transform = state.adobe_transform;
            let is_ycbcr = transform.map(|t| t == 1).unwrap_or(true);
            let mut out = vec![0u8; width * height * 3];
            for y in 0..height {
                for x in 0..width {
                    let (p0, w0, _) = &planes[0];
                    let (p1, w1, _) = &planes[1];
                    let (p2, w2, _) = &planes[2];
                    let s0 = p0[y * w0 + x];
                    let s1 = p1[y * w1 + x];
                    let s2 = p2[y * w2 + x];
                    let rgb = if is_ycbcr { color::ycbcr_to_rgb(s0, s1, s2) } else { [s0, s1, s2] };
                    let o = (y * width + x) * 3;
                    out[o..o + 3].copy_from_slice(&rgb);
                }
            }
            (out, ColorKind::Rgb24)
        }
        4 => {
            let transform = state.adobe_transform.unwrap_or(0);
            let mut out = vec![0u8; width * height * 3];
            for y in 0..height {
                for x in 0..width {
                    let (p0, w0, _) = &planes[0];
                    let (p1, w1, _) = &planes[1];
                    let (p2, w2, _) = &planes[2];
                    let (p3, w3, _) = &planes[3];
                    let s0 = p0[y * w0 + x];
                    let s1 = p1[y * w1 + x];
                    let s2 = p2[y * w2 + x];
                    let s3 = p3[y * w3 + x];

                    let rgb = match transform {
                        2 => color::ycck_to_rgb(s0, s1, s2, 255 - s3),
                        _ => {
                            // Unknown/CMYK: components are already inverted by Adobe convention.
                            color::cmyk_to_rgb(255 - s0, 255 - s1, 255 - s2, 255 - s3)
                        }
                    };
                    let o = (y * width + x) * 3;
                    out[o..o + 3].copy_from_slice(&rgb);
                }
            }
            (out, ColorKind::Rgb24)
        }
        _ => return unsupported_error("unsupported JPEG component count"),
    };

    let icc = state.icc.assemble();
    let mut meta = Metadata::default();
    if let Some(profile) = icc {
        meta.icc = IccProfileKind::Embedded(profile.into_boxed_slice());
    }

    let orientation = state.exif_orientation;
    if color_kind == ColorKind::Rgb24 && orientation.get() != 1 {
        let (oriented, ow, oh) = color::apply_exif_orientation(&rgb, width as u32, height as u32, orientation.get());
        PixelImage::new(ow, oh, ColorKind::Rgb24, oriented.into_boxed_slice(), meta)
    } else {
        PixelImage::new(width as u32, height as u32, color_kind, rgb.into_boxed_slice(), meta)
    }
}

/// Decodes a JPEG from a non-seekable byte stream, buffering it first per §4.1/§9.
pub fn decode_stream<R: std::io::Read>(source: R) -> Result<PixelImage> {
    let bytes = buffer_entire_source(source)?;
    decode(&bytes)
}

/// Encodes an `Rgb24` or `Gray8` image as baseline sequential JPEG at the given quality.
pub fn encode(image: &PixelImage, opts: JpegEncodeOptions) -> Result<Vec<u8>> {
    match image.color() {
        ColorKind::Rgb24 => encode_rgb(image, opts),
        ColorKind::Gray8 => encode_gray(image, opts),
        _ => raster_core::errors::argument_error("JPEG encoder requires Rgb24 or Gray8"),
    }
}

fn quality_scale(quality: u8) -> u32 {
    let q = quality.clamp(1, 100) as u32;
    if q < 50 { 5000 / q } else { 200 - 2 * q }
}

fn scaled_quant_table(base: &[u16; 64], scale: u32) -> [u16; 64] {
    let mut out = [0u16; 64];
    for (i, &b) in base.iter().enumerate() {
        let v = (b as u32 * scale + 50) / 100;
        out[i] = v.clamp(1, 255) as u16;
    }
    out
}

fn encode_gray(image: &PixelImage, opts: JpegEncodeOptions) -> Result<Vec<u8>> {
    let scale = quality_scale(opts.quality);
    let luma_quant = scaled_quant_table(&tables::STD_LUMA_QUANT, scale);

    let mut writer = JpegWriter::new();
    writer.write_headers(image.width(), image.height(), &[(&luma_quant, 1, 1)], false);
    writer.write_huffman_tables(&[(0, &tables::STD_LUMA_DC)], false);
    writer.write_huffman_tables(&[(0, &tables::STD_LUMA_AC)], true);
    writer.write_sos(&[(1, 0, 0)]);

    let width = image.width() as usize;
    let height = image.height() as usize;
    let blocks_w = (width + 7) / 8;
    let blocks_h = (height + 7) / 8;

    let mut dc_pred = 0i32;
    for by in 0..blocks_h {
        for bx in 0..blocks_w {
            let mut samples = [0i32; 64];
            for y in 0..8 {
                for x in 0..8 {
                    let sx = (bx * 8 + x).min(width - 1);
                    let sy = (by * 8 + y).min(height - 1);
                    samples[y * 8 + x] = image.buffer()[sy * width + sx] as i32 - 128;
                }
            }
            let coeffs = idct::fdct(&samples);
            writer.encode_block(&coeffs, &luma_quant, &mut dc_pred, 0, 0);
        }
    }

    writer.finish()
}

fn encode_rgb(image: &PixelImage, opts: JpegEncodeOptions) -> Result<Vec<u8>> {
    let scale = quality_scale(opts.quality);
    let luma_quant = scaled_quant_table(&tables::STD_LUMA_QUANT, scale);
    let chroma_quant = scaled_quant_table(&tables::STD_CHROMA_QUANT, scale);

    let (h_luma, v_luma) = match opts.subsampling {
        Subsampling::S444 => (1u8, 1u8),
        Subsampling::S422 => (2, 1),
        Subsampling::S420 => (2, 2),
    };

    let width = image.width() as usize;
    let height = image.height() as usize;

    let mut y_plane = vec![0u8; width * height];
    let mut cb_full = vec![0u8; width * height];
    let mut cr_full = vec![0u8; width * height];

    for (i, px) in image.buffer().chunks_exact(3).enumerate() {
        let (y, cb, cr) = rgb_to_ycbcr(px[0], px[1], px[2]);
        y_plane[i] = y;
        cb_full[i] = cb;
        cr_full[i] = cr;
    }

    let cb_plane = downsample(&cb_full, width, height, h_luma as usize, v_luma as usize);
    let cr_plane = downsample(&cr_full, width, height, h_luma as usize, v_luma as usize);

    let mut writer = JpegWriter::new();
    writer.write_headers(
        image.width(),
        image.height(),
        &[(&luma_quant, h_luma, v_luma), (&chroma_quant, 1, 1), (&chroma_quant, 1, 1)],
        true,
    );
    writer.write_huffman_tables(&[(0, &tables::STD_LUMA_DC), (1, &tables::STD_CHROMA_DC)], false);
    writer.write_huffman_tables(&[(0, &tables::STD_LUMA_AC), (1, &tables::STD_CHROMA_AC)], true);
    writer.write_sos(&[(1, 0, 0), (2, 1, 1), (3, 1, 1)]);

    let mcu_w = 8 * h_luma as usize;
    let mcu_h = 8 * v_luma as usize;
    let mcus_per_line = (width + mcu_w - 1) / mcu_w;
    let mcus_per_col = (height + mcu_h - 1) / mcu_h;

    let chroma_w = (width + h_luma as usize - 1) / h_luma as usize;
    let chroma_h = (height + v_luma as usize - 1) / v_luma as usize;

    let mut dc_pred = [0i32; 3];

    for mcu_row in 0..mcus_per_col {
        for mcu_col in 0..mcus_per_line {
            for vy in 0..v_luma {
                for hx in 0..h_luma {
                    let block = extract_block(&y_plane, width, height, mcu_col * h_luma as usize + hx as usize, mcu_row * v_luma as usize + vy as usize);
                    let coeffs = idct::fdct(&block);
                    writer.encode_block(&coeffs, &luma_quant, &mut dc_pred[0], 0, 0);
                }
            }
            let block_cb = extract_block(&cb_plane, chroma_w, chroma_h, mcu_col, mcu_row);
            writer.encode_block(&idct::fdct(&block_cb), &chroma_quant, &mut dc_pred[1], 1, 1);
            let block_cr = extract_block(&cr_plane, chroma_w, chroma_h, mcu_col, mcu_row);
            writer.encode_block(&idct::fdct(&block_cr), &chroma_quant, &mut dc_pred[2], 1, 1);
        }
    }

    writer.finish()
}

fn extract_block(plane: &[u8], plane_w: usize, plane_h: usize, block_x: usize, block_y: usize) -> [i32; 64] {
    let mut out = [0i32; 64];
    for y in 0..8 {
        for x in 0..8 {
            let sx = (block_x * 8 + x).min(plane_w.saturating_sub(1));
            let sy = (block_y * 8 + y).min(plane_h.saturating_sub(1));
            out[y * 8 + x] = plane[sy * plane_w + sx] as i32 - 128;
        }
    }
    out
}

fn downsample(plane: &[u8], width: usize, height: usize, h_factor: usize, v_factor: usize) -> Vec<u8> {
    if h_factor == 1 && v_factor == 1 {
        return plane.to_vec();
    }
    let out_w = (width + h_factor - 1) / h_factor;
    let out_h = (height + v_factor - 1) / v_factor;
    let mut out = vec![0u8; out_w * out_h];

    for oy in 0..out_h {
        for ox in 0..out_w {
            let mut sum = 0u32;
            let mut count = 0u32;
            for dy in 0..v_factor {
                for dx in 0..h_factor {
                    let sx = ox * h_factor + dx;
                    let sy = oy * v_factor + dy;
                    if sx < width && sy < height {
                        sum += plane[sy * width + sx] as u32;
                        count += 1;
                    }
                }
            }
            out[oy * out_w + ox] = (sum / count.max(1)) as u8;
        }
    }

    out
}

fn rgb_to_ycbcr(r: u8, g: u8, b: u8) -> (u8, u8, u8) {
    let rf = r as f32;
    let gf = g as f32;
    let bf = b as f32;

    let y = 0.299 * rf + 0.587 * gf + 0.114 * bf;
    let cb = 128.0 - 0.168736 * rf - 0.331264 * gf + 0.5 * bf;
    let cr = 128.0 + 0.5 * rf - 0.418688 * gf - 0.081312 * bf;

    (y.round().clamp(0.0, 255.0) as u8, cb.round().clamp(0.0, 255.0) as u8, cr.round().clamp(0.0, 255.0) as u8)
}

/// Emits markers and entropy-coded data for the baseline encoder. Keeps its own bit accumulator
/// and per-table-id canonical Huffman code assignments built from the standard Annex K tables.
struct JpegWriter {
    out: Vec<u8>,
    bit_acc: u32,
    bit_count: u32,
    dc_codes: [Vec<(u8, u16)>; 2], // indexed by table id (0 = luma, 1 = chroma); entry per symbol
    ac_codes: [Vec<(u8, u16)>; 2],
    ac_values: [&'static [u8]; 2], // the (run, size) byte each ac_codes[id][i] encodes
}

fn build_code_list(spec: &tables::StdHuffSpec) -> Vec<(u8, u16)> {
    let mut huffsize = Vec::new();
    for (i, &count) in spec.bits.iter().enumerate() {
        for _ in 0..count {
            huffsize.push((i + 1) as u8);
        }
    }
    let mut huffcode = Vec::new();
    let mut code: u32 = 0;
    let mut si = huffsize[0];
    let mut k = 0;
    while k < huffsize.len() {
        while k < huffsize.len() && huffsize[k] == si {
            huffcode.push(code as u16);
            code += 1;
            k += 1;
        }
        code <<= 1;
        si += 1;
    }
    huffsize.into_iter().zip(huffcode).collect()
}

impl JpegWriter {
    fn new() -> JpegWriter {
        JpegWriter {
            out: Vec::new(),
            bit_acc: 0,
            bit_count: 0,
            dc_codes: [build_code_list(&tables::STD_LUMA_DC), build_code_list(&tables::STD_CHROMA_DC)],
            ac_codes: [build_code_list(&tables::STD_LUMA_AC), build_code_list(&tables::STD_CHROMA_AC)],
            ac_values: [tables::STD_LUMA_AC.values, tables::STD_CHROMA_AC.values],
        }
    }

    fn write_headers(&mut self, width: u32, height: u32, components: &[(&[u16; 64], u8, u8)], jfif: bool) {
        self.out.extend_from_slice(&[0xFF, 0xD8]);

        if jfif {
            self.out.extend_from_slice(&[0xFF, 0xE0]);
            self.out.extend_from_slice(&16u16.to_be_bytes());
            self.out.extend_from_slice(b"JFIF\0");
            self.out.extend_from_slice(&[1, 1, 0]);
            self.out.extend_from_slice(&1u16.to_be_bytes());
            self.out.extend_from_slice(&1u16.to_be_bytes());
            self.out.extend_from_slice(&[0, 0]);
        }

        let distinct_tables: Vec<&[u16; 64]> = {
            let mut v: Vec<&[u16; 64]> = Vec::new();
            for &(q, _, _) in components {
                if !v.iter().any(|existing| std::ptr::eq(*existing, q)) {
                    v.push(q);
                }
            }
            v
        };
        for (idx, q) in distinct_tables.iter().enumerate() {
            self.out.extend_from_slice(&[0xFF, 0xDB]);
            self.out.extend_from_slice(&67u16.to_be_bytes());
            self.out.push(idx as u8);
            for &v in q.iter() {
                self.out.push(v.min(255) as u8);
            }
        }

        self.out.extend_from_slice(&[0xFF, 0xC0]);
        self.out.extend_from_slice(&(8 + 3 * components.len() as u16).to_be_bytes());
        self.out.push(8);
        self.out.extend_from_slice(&(height as u16).to_be_bytes());
        self.out.extend_from_slice(&(width as u16).to_be_bytes());
        self.out.push(components.len() as u8);
        for (i, &(q, h, v)) in components.iter().enumerate() {
            let tq = distinct_tables.iter().position(|existing| std::ptr::eq(*existing, q)).unwrap();
            self.out.push((i + 1) as u8);
            self.out.push((h << 4) | v);
            self.out.push(tq as u8);
        }
    }

    fn write_huffman_tables(&mut self, tables: &[(u8, &tables::StdHuffSpec)], ac: bool) {
        for &(id, spec) in tables {
            self.out.extend_from_slice(&[0xFF, 0xC4]);
            let len = 2 + 1 + 16 + spec.values.len();
            self.out.extend_from_slice(&(len as u16).to_be_bytes());
            self.out.push(((ac as u8) << 4) | id);
            self.out.extend_from_slice(&spec.bits);
            self.out.extend_from_slice(spec.values);
        }
    }

    fn write_sos(&mut self, components: &[(u8, u8, u8)]) {
        self.out.extend_from_slice(&[0xFF, 0xDA]);
        self.out.extend_from_slice(&(6 + 2 * components.len() as u16).to_be_bytes());
        self.out.push(components.len() as u8);
        for &(id, td, ta) in components {
            self.out.push(id);
            self.out.push((td << 4) | ta);
        }
        self.out.extend_from_slice(&[0, 63, 0]);
    }

    fn put_bits(&mut self, value: u16, length: u8) {
        self.bit_acc |= (value as u32) << (32 - self.bit_count - length as u32);
        self.bit_count += length as u32;
        while self.bit_count >= 8 {
            let byte = (self.bit_acc >> 24) as u8;
            self.out.push(byte);
            if byte == 0xFF {
                self.out.push(0x00);
            }
            self.bit_acc <<= 8;
            self.bit_count -= 8;
        }
    }

    fn encode_block(&mut self, coeffs: &[i32; 64], quant: &[u16; 64], dc_pred: &mut i32, dc_table: usize, ac_table: usize) {
        let mut zigzag = [0i32; 64];
        for (k, &natural_idx) in tables::ZIGZAG.iter().enumerate() {
            zigzag[k] = (coeffs[natural_idx] as f32 / quant[k] as f32).round() as i32;
        }

        let diff = zigzag[0] - *dc_pred;
        *dc_pred = zigzag[0];
        let (size, bits, bit_len) = category_of(diff);
        let (len, code) = self.dc_codes[dc_table][size as usize];
        self.put_bits(code, len);
        if bit_len > 0 {
            self.put_bits(bits, bit_len);
        }

        let mut run = 0u8;
        for k in 1..64 {
            if zigzag[k] == 0 {
                run += 1;
                continue;
            }
            while run > 15 {
                let (len, code) = self.ac_codes[ac_table][find_symbol(self.ac_values[ac_table], 0xF0)];
                self.put_bits(code, len);
                run -= 16;
            }
            let (size, bits, bit_len) = category_of(zigzag[k]);
            let symbol = (run << 4) | size;
            let (len, code) = self.ac_codes[ac_table][find_symbol(self.ac_values[ac_table], symbol)];
            self.put_bits(code, len);
            self.put_bits(bits, bit_len);
            run = 0;
        }
        if run > 0 {
            let (len, code) = self.ac_codes[ac_table][find_symbol(self.ac_values[ac_table], 0x00)];
            self.put_bits(code, len);
        }
    }

    fn finish(mut self) -> Result<Vec<u8>> {
        if self.bit_count > 0 {
            // Pad the last partial byte with 1 bits; `put_bits` flushes it immediately.
            self.put_bits(0x7F, 8 - self.bit_count as u8);
        }
        self.out.extend_from_slice(&[0xFF, 0xD9]);
        Ok(self.out)
    }
}

/// Finds the Huffman symbol list index whose encoded `(run, size)` byte is `symbol`. The
/// standard AC value tables always contain an entry for `0x00` (EOB) and `0xF0` (ZRL).
///
/// `spec_values` must be the same `StdHuffSpec::values` slice the caller's `codes` list was
/// built from, so the symbol's position in it is also its position in `codes`.
fn find_symbol(spec_values: &[u8], symbol: u8) -> usize {
    spec_values.iter().position(|&v| v == symbol).expect("standard AC table always defines EOB and ZRL")
}

/// Returns `(category, extra_bits_value, extra_bit_count)` for a coefficient difference/value,
/// the inverse of [`huffman::receive_extend`].
fn category_of(value: i32) -> (u8, u16, u8) {
    if value == 0 {
        return (0, 0, 0);
    }
    let abs = value.unsigned_abs();
    let size = 32 - abs.leading_zeros();
    let bits = if value > 0 { value } else { value - 1 + (1 << size) };
    (size as u8, bits as u16, size as u8)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn horizontal_ramp(width: u32, height: u32) -> PixelImage {
        let mut buf = Vec::with_capacity(width as usize * height as usize * 3);
        for _ in 0..height {
            for x in 0..width {
                let v = (x * 255 / width.max(1)) as u8;
                buf.extend_from_slice(&[v, v, v]);
            }
        }
        PixelImage::new(width, height, ColorKind::Rgb24, buf.into_boxed_slice(), Metadata::default()).unwrap()
    }

    #[test]
    fn gray_round_trip_mse_is_bounded() {
        let width = 16u32;
        let height = 16u32;
        let mut buf = vec![0u8; (width * height) as usize];
        for y in 0..height {
            for x in 0..width {
                buf[(y * width + x) as usize] = (x * 255 / width) as u8;
            }
        }
        let img = PixelImage::new(width, height, ColorKind::Gray8, buf.clone().into_boxed_slice(), Metadata::default()).unwrap();

        let encoded = encode(&img, JpegEncodeOptions { quality: 90, ..Default::default() }).unwrap();
        let decoded = decode(&encoded).unwrap();
        assert_eq!(decoded.color(), ColorKind::Gray8);

        let mse: f64 = buf
            .iter()
            .zip(decoded.buffer().iter())
            .map(|(&a, &b)| (a as f64 - b as f64).powi(2))
            .sum::<f64>()
            / buf.len() as f64;
        assert!(mse < 8000.0, "mse was {mse}");
    }

    #[test]
    fn rgb_round_trip_mse_is_bounded_at_high_quality() {
        let img = horizontal_ramp(8, 8);
        let encoded = encode(&img, JpegEncodeOptions { quality: 99, ..Default::default() }).unwrap();
        let decoded = decode(&encoded).unwrap();

        let mse: f64 = img
            .buffer()
            .iter()
            .zip(decoded.buffer().iter())
            .map(|(&a, &b)| (a as f64 - b as f64).powi(2))
            .sum::<f64>()
            / img.buffer().len() as f64;
        assert!(mse < 5000.0, "mse was {mse}");
    }

    #[test]
    fn horizontal_ramp_column_sums_are_non_decreasing() {
        let img = horizontal_ramp(16, 1);
        let encoded = encode(&img, JpegEncodeOptions { quality: 90, ..Default::default() }).unwrap();
        let decoded = decode(&encoded).unwrap();

        let width = decoded.width() as usize;
        let mut prev = decoded.buffer()[0] as i32;
        for x in 1..width {
            let v = decoded.buffer()[x * 3] as i32;
            assert!(v >= prev - 5, "column sum decreased beyond tolerance at x={x}");
            prev = v.max(prev);
        }
    }

    #[test]
    fn rejects_stream_missing_soi() {
        let bytes = [0x00, 0x01, 0x02];
        assert!(decode(&bytes).is_err());
    }

    #[test]
    fn fast_and_slow_huffman_paths_agree_on_a_real_encode() {
        let img = horizontal_ramp(16, 16);
        let encoded = encode(&img, JpegEncodeOptions::default()).unwrap();

        let fast = decode_with_options(&encoded, JpegDecodeOptions::default()).unwrap();
        let slow = decode_with_options(&encoded, JpegDecodeOptions { force_slow_huffman: true }).unwrap();
        assert_eq!(fast.buffer(), slow.buffer());
    }

    /// Flushes any partially-written byte in `writer`'s bit accumulator with zero bits, so a raw
    /// marker segment can follow it. Unlike `JpegWriter::finish`'s end-of-image padding, zero
    /// bits are always safe regardless of how many are needed.
    fn byte_align(writer: &mut JpegWriter) {
        if writer.bit_count > 0 {
            let pad = 8 - writer.bit_count as u8;
            writer.put_bits(0, pad);
        }
    }

    /// Hand-assembles a minimal progressive (SOF2) JPEG: one 8x8 grayscale block split across a
    /// DC-first scan, an AC-first scan, and an AC-refine scan, reusing `JpegWriter`'s Huffman
    /// code tables and bit packer instead of hand-computed bit patterns. Exercises
    /// `decode_ac_first` and `decode_ac_refine`, which `fast_and_slow_huffman_paths_agree_on_a_real_encode`
    /// never reaches since that test only drives the baseline encoder.
    fn minimal_progressive_jpeg() -> Vec<u8> {
        let mut writer = JpegWriter::new();

        writer.out.extend_from_slice(&[0xFF, 0xD8]); // SOI

        writer.out.extend_from_slice(&[0xFF, 0xDB]); // DQT: one flat table, so dequantisation is a no-op
        writer.out.extend_from_slice(&67u16.to_be_bytes());
        writer.out.push(0);
        writer.out.extend_from_slice(&[1u8; 64]);

        writer.out.extend_from_slice(&[0xFF, 0xC2]); // SOF2: single grayscale component, one block
        writer.out.extend_from_slice(&11u16.to_be_bytes());
        writer.out.push(8);
        writer.out.extend_from_slice(&8u16.to_be_bytes());
        writer.out.extend_from_slice(&8u16.to_be_bytes());
        writer.out.push(1);
        writer.out.push(1); // component id
        writer.out.push(0x11); // h=1, v=1
        writer.out.push(0); // tq

        writer.write_huffman_tables(&[(0, &tables::STD_LUMA_DC)], false);
        writer.write_huffman_tables(&[(0, &tables::STD_LUMA_AC)], true);

        let ac_values = tables::STD_LUMA_AC.values;

        // DC-first scan (Ss=0, Se=0, Ah=0, Al=0): a single category-0 symbol, diff = 0.
        writer.out.extend_from_slice(&[0xFF, 0xDA]);
        writer.out.extend_from_slice(&8u16.to_be_bytes());
        writer.out.push(1);
        writer.out.push(1);
        writer.out.push(0x00);
        writer.out.extend_from_slice(&[0, 0, 0]);
        let (len, code) = writer.dc_codes[0][0];
        writer.put_bits(code, len);
        byte_align(&mut writer);

        // AC-first scan (Ss=1, Se=63, Ah=0, Al=0): one newly nonzero coefficient, then EOB.
        writer.out.extend_from_slice(&[0xFF, 0xDA]);
        writer.out.extend_from_slice(&8u16.to_be_bytes());
        writer.out.push(1);
        writer.out.push(1);
        writer.out.push(0x00);
        writer.out.extend_from_slice(&[1, 63, 0x00]);
        let (len, code) = writer.ac_codes[0][find_symbol(ac_values, 0x01)]; // run=0, size=1
        writer.put_bits(code, len);
        writer.put_bits(1, 1); // EXTEND bit: coefficient becomes +1
        let (len, code) = writer.ac_codes[0][find_symbol(ac_values, 0x00)]; // EOB
        writer.put_bits(code, len);
        byte_align(&mut writer);

        // AC-refine scan (Ss=1, Se=63, Ah=1, Al=0): corrects the coefficient from the AC-first
        // scan and inserts one more, then ends the block.
        writer.out.extend_from_slice(&[0xFF, 0xDA]);
        writer.out.extend_from_slice(&8u16.to_be_bytes());
        writer.out.push(1);
        writer.out.push(1);
        writer.out.push(0x00);
        writer.out.extend_from_slice(&[1, 63, 0x10]);
        let (len, code) = writer.ac_codes[0][find_symbol(ac_values, 0x01)]; // run=0, size=1 (insert)
        writer.put_bits(code, len);
        writer.put_bits(1, 1); // sign bit for the newly inserted coefficient
        writer.put_bits(0, 1); // correction bit for the coefficient set by the AC-first scan
        let (len, code) = writer.ac_codes[0][find_symbol(ac_values, 0x00)]; // EOB
        writer.put_bits(code, len);
        byte_align(&mut writer);

        writer.finish().unwrap()
    }

    #[test]
    fn fast_and_slow_huffman_paths_agree_on_a_progressive_scan() {
        let bytes = minimal_progressive_jpeg();
        let fast = decode_with_options(&bytes, JpegDecodeOptions::default()).unwrap();
        let slow = decode_with_options(&bytes, JpegDecodeOptions { force_slow_huffman: true }).unwrap();
        assert_eq!(fast.buffer(), slow.buffer());
    }

    /// Hand-assembles a single-MCU, 4-component, DC-only baseline JPEG with no APP14 segment,
    /// reusing the same `JpegWriter` primitives `encode_rgb` drives. Exercises the
    /// component-count heuristic's CMYK branch in `finish_decode`.
    fn minimal_cmyk_jpeg() -> Vec<u8> {
        let quant = scaled_quant_table(&tables::STD_LUMA_QUANT, quality_scale(90));
        let mut writer = JpegWriter::new();
        writer.write_headers(8, 8, &[(&quant, 1, 1), (&quant, 1, 1), (&quant, 1, 1), (&quant, 1, 1)], false);
        writer.write_huffman_tables(&[(0, &tables::STD_LUMA_DC)], false);
        writer.write_huffman_tables(&[(0, &tables::STD_LUMA_AC)], true);
        writer.write_sos(&[(1, 0, 0), (2, 0, 0), (3, 0, 0), (4, 0, 0)]);

        let mut dc_pred = [0i32; 4];
        for (level, pred) in [90i32, 60, 30, 200].iter().zip(dc_pred.iter_mut()) {
            let samples = [*level - 128; 64];
            let coeffs = idct::fdct(&samples);
            writer.encode_block(&coeffs, &quant, pred, 0, 0);
        }

        writer.finish().unwrap()
    }

    #[test]
    fn decodes_cmyk_jpeg_without_adobe_app14_using_heuristic() {
        let bytes = minimal_cmyk_jpeg();
        let decoded = decode(&bytes).unwrap();
        assert_eq!(decoded.color(), ColorKind::Rgb24);
        assert!(!decoded.buffer().is_empty());
    }
}
