// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! GIF's variable-width LZW, per §4.3: codes are read LSB-first, widths grow from
//! `min_code_size + 1` up to 12, a clear code resets the table, and an end-of-information code
//! terminates the stream.

use raster_core::errors::{invalid_format_error, Result};
use raster_core::io::BitReaderLsb;
use raster_core::pool::BufferPool;

const MAX_CODE_BITS: u32 = 12;

/// Resets the code table to its root entries (one per input colour index, plus a clear-code
/// and an end-of-information placeholder), appending the root bytes to `arena` and recording
/// each entry's `(offset, length)` into it in `entries`.
fn reset_table(arena: &mut Vec<u8>, entries: &mut Vec<(u32, u32)>, clear_code: u16) {
    arena.clear();
    entries.clear();
    for i in 0..clear_code {
        entries.push((arena.len() as u32, 1));
        arena.push(i as u8);
    }
    entries.push((0, 0)); // clear_code placeholder
    entries.push((0, 0)); // end_code placeholder
}

/// Decodes a sub-block-concatenated LZW stream into pixel indices.
///
/// The code table is stored as a single growable byte arena plus a `(offset, length)` index
/// per entry, rather than a `Vec<Vec<u8>>` of per-entry allocations -- the same contiguous-plane
/// preference the progressive JPEG coefficient storage uses over a per-MCU linked structure.
/// The arena and the decoded output buffer are both drawn from a [`BufferPool`].
pub fn decode(min_code_size: u8, data: &[u8]) -> Result<Vec<u8>> {
    if !(2..=8).contains(&min_code_size) {
        return invalid_format_error("GIF LZW minimum code size out of range");
    }

    let clear_code: u16 = 1 << min_code_size;
    let end_code: u16 = clear_code + 1;

    let pool = BufferPool::new();
    let mut arena = pool.checkout(0);
    let mut entries: Vec<(u32, u32)> = Vec::new();
    let mut code_size = min_code_size as u32 + 1;

    reset_table(&mut arena, &mut entries, clear_code);

    let mut reader = BitReaderLsb::new(data);
    let mut out = pool.checkout(0);
    let mut prev_code: Option<u16> = None;

    loop {
        let code = reader.consume_bits(code_size)?;

        if code == clear_code {
            reset_table(&mut arena, &mut entries, clear_code);
            code_size = min_code_size as u32 + 1;
            prev_code = None;
            continue;
        }

        if code == end_code {
            break;
        }

        let (entry_off, entry_len) = if (code as usize) < entries.len() && entries[code as usize].1 > 0 {
            entries[code as usize]
        } else if code as usize == entries.len() {
            match prev_code {
                Some(prev) => {
                    let (prev_off, prev_len) = entries[prev as usize];
                    let first = arena[prev_off as usize];
                    let new_off = arena.len() as u32;
                    arena.extend_from_within(prev_off as usize..(prev_off + prev_len) as usize);
                    arena.push(first);
                    (new_off, prev_len + 1)
                }
                None => return invalid_format_error("GIF LZW stream starts with an invalid code"),
            }
        } else {
            return invalid_format_error("GIF LZW stream contains an out-of-range code");
        };

        out.extend_from_slice(&arena[entry_off as usize..(entry_off + entry_len) as usize]);
        let entry_first = arena[entry_off as usize];

        if let Some(prev) = prev_code {
            if entries.len() < (1 << MAX_CODE_BITS) {
                let (prev_off, prev_len) = entries[prev as usize];
                let new_off = arena.len() as u32;
                arena.extend_from_within(prev_off as usize..(prev_off + prev_len) as usize);
                arena.push(entry_first);
                entries.push((new_off, prev_len + 1));

                if entries.len() == (1 << code_size) && code_size < MAX_CODE_BITS {
                    code_size += 1;
                }
            }
        }

        prev_code = Some(code);
    }

    Ok(out.into_inner())
}

/// A minimal LSB-first bit writer, used only by the encoder in this crate.
struct BitWriterLsb {
    out: Vec<u8>,
    acc: u32,
    acc_bits: u32,
}

impl BitWriterLsb {
    fn new() -> Self {
        BitWriterLsb { out: Vec::new(), acc: 0, acc_bits: 0 }
    }

    fn write(&mut self, value: u16, bits: u32) {
        self.acc |= (value as u32) << self.acc_bits;
        self.acc_bits += bits;
        while self.acc_bits >= 8 {
            self.out.push((self.acc & 0xFF) as u8);
            self.acc >>= 8;
            self.acc_bits -= 8;
        }
    }

    fn finish(mut self) -> Vec<u8> {
        if self.acc_bits > 0 {
            self.out.push((self.acc & 0xFF) as u8);
        }
        self.out
    }
}

/// Encodes pixel indices as LZW, returning the raw (not yet sub-block-packaged) byte stream.
pub fn encode(min_code_size: u8, indices: &[u8]) -> Vec<u8> {
    let clear_code: u16 = 1 << min_code_size;
    let end_code: u16 = clear_code + 1;

    let mut writer = BitWriterLsb::new();
    let mut code_size = min_code_size as u32 + 1;

    let mut dict: std::collections::HashMap<Vec<u8>, u16> = std::collections::HashMap::new();
    let reset_dict = |dict: &mut std::collections::HashMap<Vec<u8>, u16>| {
        dict.clear();
        for i in 0..clear_code {
            dict.insert(vec![i as u8], i);
        }
    };
    reset_dict(&mut dict);
    let mut next_code = end_code + 1;

    writer.write(clear_code, code_size);

    let mut w: Vec<u8> = Vec::new();

    for &c in indices {
        let mut wc = w.clone();
        wc.push(c);

        if dict.contains_key(&wc) {
            w = wc;
            continue;
        }

        if !w.is_empty() {
            writer.write(dict[&w], code_size);
        }

        if next_code < (1 << MAX_CODE_BITS) {
            dict.insert(wc, next_code);
            next_code += 1;

            if next_code == (1 << code_size) && code_size < MAX_CODE_BITS {
                code_size += 1;
            }
        } else {
            writer.write(clear_code, code_size);
            reset_dict(&mut dict);
            next_code = end_code + 1;
            code_size = min_code_size as u32 + 1;
        }

        w = vec![c];
    }

    if !w.is_empty() {
        writer.write(dict[&w], code_size);
    }

    writer.write(end_code, code_size);
    writer.finish()
}

/// Splits an LZW byte stream into GIF sub-blocks: a length byte followed by up to 255 bytes of
/// data, terminated by a zero-length block.
pub fn into_sub_blocks(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() + data.len() / 255 + 1);
    for chunk in data.chunks(255) {
        out.push(chunk.len() as u8);
        out.extend_from_slice(chunk);
    }
    out.push(0);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_simple_index_stream() {
        let min_code_size = 4u8; // 16-colour table
        let indices: Vec<u8> = (0..200).map(|i| (i % 12) as u8).collect();

        let encoded = encode(min_code_size, &indices);
        let decoded = decode(min_code_size, &encoded).unwrap();
        assert_eq!(decoded, indices);
    }

    #[test]
    fn round_trips_through_sub_block_packaging() {
        let min_code_size = 2u8;
        let indices: Vec<u8> = vec![0, 1, 2, 3, 0, 1, 2, 3, 0, 0, 0, 1];
        let encoded = encode(min_code_size, &indices);
        let packaged = into_sub_blocks(&encoded);

        // Unpack sub-blocks the way the GIF decoder does before calling `decode`.
        let mut unpacked = Vec::new();
        let mut pos = 0;
        loop {
            let len = packaged[pos] as usize;
            pos += 1;
            if len == 0 {
                break;
            }
            unpacked.extend_from_slice(&packaged[pos..pos + len]);
            pos += len;
        }

        let decoded = decode(min_code_size, &unpacked).unwrap();
        assert_eq!(decoded, indices);
    }

    #[test]
    fn rejects_out_of_range_code() {
        // A single code that's far beyond anything the dictionary could contain.
        let data = [0xFF, 0x0F];
        assert!(decode(2, &data).is_err());
    }
}
