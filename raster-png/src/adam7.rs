// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The Adam7 interlacing geometry (§4.4): seven passes, each a regular sub-grid of the full
//! image, independently filtered and assembled into the final grid.

/// `(x0, y0, dx, dy)` for each of the seven passes, in pass order.
pub const PASSES: [(u32, u32, u32, u32); 7] = [
    (0, 0, 8, 8),
    (4, 0, 8, 8),
    (0, 4, 4, 8),
    (2, 0, 4, 4),
    (0, 2, 2, 4),
    (1, 0, 2, 2),
    (0, 1, 1, 2),
];

/// Width and height, in pixels, of a given pass over a full image of `width` x `height`.
pub fn pass_dimensions(width: u32, height: u32, pass: usize) -> (u32, u32) {
    let (x0, y0, dx, dy) = PASSES[pass];
    let pw = if width > x0 { (width - x0 + dx - 1) / dx } else { 0 };
    let ph = if height > y0 { (height - y0 + dy - 1) / dy } else { 0 };
    (pw, ph)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pass_dimensions_match_known_8x8_case() {
        // An 8x8 image: pass 1 has exactly one pixel (0,0); pass 7 has a 4x1 row.
        assert_eq!(pass_dimensions(8, 8, 0), (1, 1));
        assert_eq!(pass_dimensions(8, 8, 6), (4, 1));
    }

    #[test]
    fn sum_of_pass_pixel_counts_covers_the_whole_image() {
        let width = 13u32;
        let height = 9u32;
        let total: u64 = (0..7)
            .map(|p| {
                let (pw, ph) = pass_dimensions(width, height, p);
                pw as u64 * ph as u64
            })
            .sum();
        assert_eq!(total, width as u64 * height as u64);
    }
}
