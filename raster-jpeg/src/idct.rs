// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The separable 8x8 DCT/IDCT (ITU T.81 Annex A). Two inverse implementations are provided per
//! §4.5: a full-precision floating-point path, and an "integer" path that rounds the
//! intermediate row pass to whole samples the way a fixed-point implementation would. Both must
//! agree with a reference transform within ±1 on every sample.

use std::f64::consts::PI;

fn cos_table() -> [[f64; 8]; 8] {
    let mut t = [[0.0f64; 8]; 8];
    for (x, row) in t.iter_mut().enumerate() {
        for (u, cell) in row.iter_mut().enumerate() {
            *cell = (((2 * x + 1) as f64) * u as f64 * PI / 16.0).cos();
        }
    }
    t
}

fn c(u: usize) -> f64 {
    if u == 0 {
        1.0 / std::f64::consts::SQRT_2
    } else {
        1.0
    }
}

/// One 1D inverse DCT pass: `out[x] = sum_u C(u) * input[u] * cos[x][u]`.
fn idct_1d(input: [f64; 8], cos: &[[f64; 8]; 8]) -> [f64; 8] {
    let mut out = [0.0f64; 8];
    for (x, slot) in out.iter_mut().enumerate() {
        let mut sum = 0.0;
        for u in 0..8 {
            sum += c(u) * input[u] * cos[x][u];
        }
        *slot = sum;
    }
    out
}

/// One 1D forward DCT pass: `out[u] = C(u) * sum_x input[x] * cos[x][u]`.
fn fdct_1d(input: [f64; 8], cos: &[[f64; 8]; 8]) -> [f64; 8] {
    let mut out = [0.0f64; 8];
    for (u, slot) in out.iter_mut().enumerate() {
        let mut sum = 0.0;
        for (x, &value) in input.iter().enumerate() {
            sum += value * cos[x][u];
        }
        *slot = c(u) * sum;
    }
    out
}

fn row_of(block: &[i32; 64], row: usize) -> [f64; 8] {
    core::array::from_fn(|col| block[row * 8 + col] as f64)
}

/// Full-precision reference inverse DCT: dequantised coefficients to level-shifted, clamped
/// 8-bit samples.
pub fn idct_float(block: &[i32; 64]) -> [u8; 64] {
    let cos = cos_table();

    let mut inter = [[0.0f64; 8]; 8];
    for row in 0..8 {
        inter[row] = idct_1d(row_of(block, row), &cos);
    }

    let mut out = [0u8; 64];
    for col in 0..8 {
        let input: [f64; 8] = core::array::from_fn(|row| inter[row][col]);
        let column = idct_1d(input, &cos);
        for (y, &value) in column.iter().enumerate() {
            out[y * 8 + col] = level_shift(value * 0.25);
        }
    }
    out
}

/// Inverse DCT whose row pass is rounded to an integer intermediate, mirroring the precision
/// loss of a fixed-point implementation. Must agree with [`idct_float`] within ±1.
pub fn idct_integer(block: &[i32; 64]) -> [u8; 64] {
    let cos = cos_table();

    let mut inter = [[0i32; 8]; 8];
    for row in 0..8 {
        let pass = idct_1d(row_of(block, row), &cos);
        for (col, &value) in pass.iter().enumerate() {
            inter[row][col] = value.round() as i32;
        }
    }

    let mut out = [0u8; 64];
    for col in 0..8 {
        let input: [f64; 8] = core::array::from_fn(|row| inter[row][col] as f64);
        let column = idct_1d(input, &cos);
        for (y, &value) in column.iter().enumerate() {
            out[y * 8 + col] = level_shift(value * 0.25);
        }
    }
    out
}

fn level_shift(value: f64) -> u8 {
    (value + 128.0).round().clamp(0.0, 255.0) as u8
}

/// Forward DCT used by the encoder: level-shifted samples (`sample - 128`) to coefficients.
pub fn fdct(samples: &[i32; 64]) -> [i32; 64] {
    let cos = cos_table();

    let mut inter = [[0.0f64; 8]; 8];
    for row in 0..8 {
        let input: [f64; 8] = core::array::from_fn(|col| samples[row * 8 + col] as f64);
        inter[row] = fdct_1d(input, &cos);
    }

    let mut out = [0i32; 64];
    for u in 0..8 {
        let input: [f64; 8] = core::array::from_fn(|row| inter[row][u]);
        let column = fdct_1d(input, &cos);
        for (v, &value) in column.iter().enumerate() {
            out[v * 8 + u] = (value * 0.25).round() as i32;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dc_only_block_produces_a_flat_output() {
        let mut block = [0i32; 64];
        block[0] = 8; // DC coefficient; AC all zero
        let out = idct_float(&block);
        // DC-only: every sample should equal the same level-shifted value.
        let first = out[0];
        assert!(out.iter().all(|&s| (s as i32 - first as i32).abs() <= 1));
    }

    #[test]
    fn float_and_integer_paths_agree_within_one() {
        let mut block = [0i32; 64];
        block[0] = 40;
        block[1] = -12;
        block[8] = 6;
        block[9] = 3;

        let float_out = idct_float(&block);
        let int_out = idct_integer(&block);
        for i in 0..64 {
            let diff = (float_out[i] as i32 - int_out[i] as i32).abs();
            assert!(diff <= 1, "sample {i} differs by {diff}");
        }
    }

    #[test]
    fn forward_then_inverse_round_trips_a_flat_block() {
        let samples = [0i32; 64]; // mid-grey after level shift
        let coeffs = fdct(&samples);
        let back = idct_float(&coeffs);
        assert!(back.iter().all(|&s| (s as i32 - 128).abs() <= 1));
    }
}
