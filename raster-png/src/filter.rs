// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The five PNG scanline filters (§4.4): reconstruction on decode, `Up` on encode.

/// Reconstructs a filtered scanline in place. `current` holds the filtered bytes on entry and
/// the reconstructed bytes on return; `previous` is the already-reconstructed row above (all
/// zero for the first row of a pass); `bpp` is bytes per complete pixel, rounded up, minimum 1.
pub fn unfilter_scanline(filter_type: u8, current: &mut [u8], previous: &[u8], bpp: usize) -> Result<(), &'static str> {
    match filter_type {
        0 => {}
        1 => {
            for i in 0..current.len() {
                let a = if i >= bpp { current[i - bpp] } else { 0 };
                current[i] = current[i].wrapping_add(a);
            }
        }
        2 => {
            for i in 0..current.len() {
                let b = previous[i];
                current[i] = current[i].wrapping_add(b);
            }
        }
        3 => {
            for i in 0..current.len() {
                let a = if i >= bpp { current[i - bpp] as u16 } else { 0 };
                let b = previous[i] as u16;
                current[i] = current[i].wrapping_add(((a + b) / 2) as u8);
            }
        }
        4 => {
            for i in 0..current.len() {
                let a = if i >= bpp { current[i - bpp] } else { 0 };
                let b = previous[i];
                let c = if i >= bpp { previous[i - bpp] } else { 0 };
                current[i] = current[i].wrapping_add(paeth_predictor(a, b, c));
            }
        }
        _ => return Err("unrecognised PNG filter type byte"),
    }
    Ok(())
}

/// Filters a scanline with the `Up` filter (§4.4 encoder policy): each byte is the difference
/// from the same byte in the row above.
pub fn filter_up(current: &[u8], previous: &[u8]) -> Vec<u8> {
    current.iter().zip(previous.iter()).map(|(&c, &p)| c.wrapping_sub(p)).collect()
}

/// `p = a + b - c`; returns whichever of `a, b, c` is closest to `p`, breaking ties `a`, `b`, `c`.
fn paeth_predictor(a: u8, b: u8, c: u8) -> u8 {
    let p = a as i32 + b as i32 - c as i32;
    let pa = (p - a as i32).abs();
    let pb = (p - b as i32).abs();
    let pc = (p - c as i32).abs();

    if pa <= pb && pa <= pc {
        a
    } else if pb <= pc {
        b
    } else {
        c
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sub_filter_reconstructs_from_left_neighbour() {
        let mut row = vec![10u8, 5, 5, 5];
        let previous = vec![0u8; 4];
        unfilter_scanline(1, &mut row, &previous, 1).unwrap();
        assert_eq!(row, vec![10, 15, 20, 25]);
    }

    #[test]
    fn up_filter_reconstructs_from_row_above() {
        let mut row = vec![1u8, 2, 3];
        let previous = vec![10u8, 20, 30];
        unfilter_scanline(2, &mut row, &previous, 1).unwrap();
        assert_eq!(row, vec![11, 22, 33]);
    }

    #[test]
    fn paeth_predictor_prefers_a_on_ties() {
        assert_eq!(paeth_predictor(5, 5, 5), 5);
        assert_eq!(paeth_predictor(10, 10, 0), 10);
    }

    #[test]
    fn none_filter_leaves_bytes_unchanged() {
        let mut row = vec![1u8, 2, 3];
        let previous = vec![9u8, 9, 9];
        unfilter_scanline(0, &mut row, &previous, 1).unwrap();
        assert_eq!(row, vec![1, 2, 3]);
    }
}
