// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! JPEG Huffman tables (ITU T.81 Annex C): canonical code assignment from a `bits`/`values`
//! pair, plus a fast 9-bit lookup table and a bit-by-bit slow path that must agree on every
//! input (§4.5, "Huffman-path equivalence").

use raster_core::errors::{invalid_format_error, truncated_error, Result};
use raster_core::io::BitReaderMsb;

const FAST_BITS: u32 = 9;
const FAST_SIZE: usize = 1 << FAST_BITS;

#[derive(Clone)]
pub struct HuffmanTable {
    /// `(code_length, code, symbol)`, used by the slow path and to build the fast table.
    codes: Vec<(u8, u16, u8)>,
    fast: Vec<Option<(u8, u8)>>,
}

impl HuffmanTable {
    /// Builds a table from the 16 bit-length counts and the flattened symbol list, in the order
    /// DHT segments encode them.
    pub fn build(bits: &[u8; 16], values: &[u8]) -> Result<HuffmanTable> {
        let total: usize = bits.iter().map(|&b| b as usize).sum();
        if total != values.len() {
            return invalid_format_error("DHT bit-count/value-list length mismatch");
        }

        let mut huffsize = Vec::with_capacity(total);
        for (len_minus_one, &count) in bits.iter().enumerate() {
            for _ in 0..count {
                huffsize.push((len_minus_one + 1) as u8);
            }
        }

        let mut huffcode = Vec::with_capacity(total);
        let mut code: u32 = 0;
        let mut si = huffsize.first().copied().unwrap_or(0);
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

        let mut codes = Vec::with_capacity(total);
        let mut fast = vec![None; FAST_SIZE];

        for i in 0..total {
            let length = huffsize[i];
            let symbol_code = huffcode[i];
            let symbol = values[i];
            codes.push((length, symbol_code, symbol));

            if length as u32 <= FAST_BITS {
                let shift = FAST_BITS - length as u32;
                let base = (symbol_code as usize) << shift;
                let span = 1usize << shift;
                for entry in fast.iter_mut().skip(base).take(span) {
                    *entry = Some((length, symbol));
                }
            }
        }

        Ok(HuffmanTable { codes, fast })
    }

    /// Decodes one symbol using the fast 9-bit table, falling back to [`Self::decode_slow`] for
    /// codes longer than 9 bits.
    pub fn decode_fast(&self, reader: &mut BitReaderMsb<'_>) -> Result<u8> {
        let peek = reader.peek_bits(FAST_BITS) as usize;
        if let Some((length, symbol)) = self.fast[peek] {
            reader.consume_bits(length as u32)?;
            return Ok(symbol);
        }
        self.decode_slow(reader)
    }

    /// Decodes one symbol by accumulating bits one at a time and checking the canonical code
    /// list after each bit, per ITU T.81 Figure F.17. Always agrees with [`Self::decode_fast`].
    pub fn decode_slow(&self, reader: &mut BitReaderMsb<'_>) -> Result<u8> {
        let mut code: u16 = 0;
        for length in 1..=16u8 {
            code = (code << 1) | reader.consume_bit()? as u16;
            if let Some(&(_, _, symbol)) = self.codes.iter().find(|&&(l, c, _)| l == length && c == code) {
                return Ok(symbol);
            }
        }
        invalid_format_error("Huffman code did not match any table entry")
    }
}

/// Decodes the signed value for a category `s` using the EXTEND procedure of ITU T.81 §F.2.2.1:
/// `s` raw bits are read; if the high bit is 0, the value is negative.
pub fn receive_extend(reader: &mut BitReaderMsb<'_>, s: u8) -> Result<i32> {
    if s == 0 {
        return Ok(0);
    }
    if s > 16 {
        return truncated_error("Huffman category exceeds maximum extra-bit count");
    }
    let v = reader.consume_bits(s as u32)? as i32;
    let half = 1i32 << (s - 1);
    if v < half {
        Ok(v - (1 << s) + 1)
    } else {
        Ok(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tables::STD_LUMA_DC;

    fn build_luma_dc() -> HuffmanTable {
        HuffmanTable::build(&STD_LUMA_DC.bits, STD_LUMA_DC.values).unwrap()
    }

    /// Hand-packs raw MSB-first bits from a slice of bit strings (each a `&str` of `'0'`/`'1'`)
    /// into bytes, for constructing bitstream fixtures.
    fn pack_bits(bit_strs: &[&str]) -> Vec<u8> {
        let mut bits: Vec<u8> = Vec::new();
        for s in bit_strs {
            bits.extend(s.bytes().map(|b| b - b'0'));
        }
        while bits.len() % 8 != 0 {
            bits.push(0);
        }
        bits.chunks(8).map(|c| c.iter().fold(0u8, |acc, &b| (acc << 1) | b)).collect()
    }

    #[test]
    fn fast_and_slow_paths_agree_on_every_standard_luma_dc_symbol() {
        let table = build_luma_dc();

        // Rebuild the canonical (length, code) assignment the same way `build` does, so we can
        // drive both decode paths over every defined codeword.
        let mut huffsize = Vec::new();
        for (i, &count) in STD_LUMA_DC.bits.iter().enumerate() {
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

        for i in 0..huffsize.len() {
            let length = huffsize[i];
            let code_val = huffcode[i];
            let bit_string: String = (0..length).map(|b| ((code_val >> (length - 1 - b)) & 1).to_string()).collect();
            let bytes = pack_bits(&[&bit_string]);

            let mut r1 = BitReaderMsb::new(&bytes);
            let mut r2 = BitReaderMsb::new(&bytes);
            let fast_symbol = table.decode_fast(&mut r1).unwrap();
            let slow_symbol = table.decode_slow(&mut r2).unwrap();
            assert_eq!(fast_symbol, slow_symbol);
            assert_eq!(fast_symbol, STD_LUMA_DC.values[i]);
        }
    }

    #[test]
    fn extend_decodes_negative_and_positive_categories() {
        let bytes = pack_bits(&["0"]); // category 1, bit 0 => value -1
        let mut r = BitReaderMsb::new(&bytes);
        assert_eq!(receive_extend(&mut r, 1).unwrap(), -1);

        let bytes = pack_bits(&["1"]); // category 1, bit 1 => value 1
        let mut r = BitReaderMsb::new(&bytes);
        assert_eq!(receive_extend(&mut r, 1).unwrap(), 1);

        let bytes = pack_bits(&["00"]); // category 0 reads nothing
        let mut r = BitReaderMsb::new(&bytes);
        assert_eq!(receive_extend(&mut r, 0).unwrap(), 0);
    }
}
