// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Nearest-neighbour chroma upsampling (§4.5): a subsampled component plane is expanded by
//! replication according to `Hmax/Hi`, `Vmax/Vi` before colour conversion.

/// Replicates `plane` (`plane_w` x `plane_h`) by `h_factor` horizontally and `v_factor`
/// vertically, returning the expanded plane and its new dimensions.
pub fn upsample_nearest(plane: &[u8], plane_w: usize, plane_h: usize, h_factor: usize, v_factor: usize) -> (Vec<u8>, usize, usize) {
    if h_factor == 1 && v_factor == 1 {
        return (plane.to_vec(), plane_w, plane_h);
    }

    let out_w = plane_w * h_factor;
    let out_h = plane_h * v_factor;
    let mut out = vec![0u8; out_w * out_h];

    for y in 0..out_h {
        let src_y = y / v_factor;
        for x in 0..out_w {
            let src_x = x / h_factor;
            out[y * out_w + x] = plane[src_y * plane_w + src_x];
        }
    }

    (out, out_w, out_h)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upsamples_4_2_0_chroma_by_replication() {
        let plane = [10u8, 20, 30, 40]; // 2x2
        let (out, w, h) = upsample_nearest(&plane, 2, 2, 2, 2);
        assert_eq!((w, h), (4, 4));
        // Top-left 2x2 block replicates sample 10.
        assert_eq!(out[0], 10);
        assert_eq!(out[1], 10);
        assert_eq!(out[w], 10);
        assert_eq!(out[w + 1], 10);
        // Top-right 2x2 block replicates sample 20.
        assert_eq!(out[2], 20);
        assert_eq!(out[w + 3], 20);
    }

    #[test]
    fn identity_when_factors_are_one() {
        let plane = [1u8, 2, 3, 4];
        let (out, w, h) = upsample_nearest(&plane, 2, 2, 1, 1);
        assert_eq!((w, h), (2, 2));
        assert_eq!(out, plane);
    }
}
