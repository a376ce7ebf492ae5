// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! An octree colour quantiser that reduces an `Rgb24` image to at most 256 colours for the
//! single-frame GIF encoder (§4.3). The tree is a safe, index-based arena rather than a
//! pointer tree, since every crate in this workspace forbids `unsafe`.

const MAX_DEPTH: u8 = 7;

struct Node {
    children: [Option<usize>; 8],
    is_leaf: bool,
    pixel_count: u64,
    r_sum: u64,
    g_sum: u64,
    b_sum: u64,
    palette_index: Option<usize>,
}

impl Node {
    fn new() -> Node {
        Node {
            children: [None; 8],
            is_leaf: false,
            pixel_count: 0,
            r_sum: 0,
            g_sum: 0,
            b_sum: 0,
            palette_index: None,
        }
    }
}

fn octant(r: u8, g: u8, b: u8, level: u8) -> usize {
    let shift = 7 - level;
    (((r >> shift) & 1) << 2 | ((g >> shift) & 1) << 1 | ((b >> shift) & 1)) as usize
}

struct Octree {
    arena: Vec<Node>,
    root: usize,
    reducible: Vec<Vec<usize>>,
    leaf_count: usize,
}

impl Octree {
    fn new() -> Octree {
        let mut arena = Vec::new();
        arena.push(Node::new());
        Octree { arena, root: 0, reducible: vec![Vec::new(); MAX_DEPTH as usize], leaf_count: 0 }
    }

    fn insert(&mut self, r: u8, g: u8, b: u8) {
        let mut node_idx = self.root;
        let mut level = 0u8;

        loop {
            if level == MAX_DEPTH {
                if !self.arena[node_idx].is_leaf {
                    self.arena[node_idx].is_leaf = true;
                    self.leaf_count += 1;
                }
                let node = &mut self.arena[node_idx];
                node.pixel_count += 1;
                node.r_sum += r as u64;
                node.g_sum += g as u64;
                node.b_sum += b as u64;
                return;
            }

            let oct = octant(r, g, b, level);
            let child = self.arena[node_idx].children[oct];

            let child_idx = match child {
                Some(idx) => idx,
                None => {
                    self.arena.push(Node::new());
                    let idx = self.arena.len() - 1;
                    self.arena[node_idx].children[oct] = Some(idx);
                    self.reducible[level as usize].push(idx);
                    idx
                }
            };

            node_idx = child_idx;
            level += 1;
        }
    }

    /// Merges all children of the deepest reducible nodes into their parent until at most
    /// `target` leaves remain.
    fn reduce_to(&mut self, target: usize) {
        while self.leaf_count > target {
            let mut level = MAX_DEPTH as usize;
            while level > 0 && self.reducible[level - 1].is_empty() {
                level -= 1;
            }
            if level == 0 {
                break;
            }

            let node_idx = match self.reducible[level - 1].pop() {
                Some(idx) => idx,
                None => break,
            };

            let mut r_sum = 0u64;
            let mut g_sum = 0u64;
            let mut b_sum = 0u64;
            let mut pixel_count = 0u64;
            let mut merged = 0usize;

            for child in self.arena[node_idx].children {
                if let Some(child_idx) = child {
                    let c = &self.arena[child_idx];
                    r_sum += c.r_sum;
                    g_sum += c.g_sum;
                    b_sum += c.b_sum;
                    pixel_count += c.pixel_count;
                    if c.is_leaf {
                        merged += 1;
                    }
                }
            }

            self.arena[node_idx].children = [None; 8];
            self.arena[node_idx].is_leaf = true;
            self.arena[node_idx].r_sum = r_sum;
            self.arena[node_idx].g_sum = g_sum;
            self.arena[node_idx].b_sum = b_sum;
            self.arena[node_idx].pixel_count = pixel_count;

            self.leaf_count = self.leaf_count + 1 - merged;
        }
    }

    /// Walks every leaf, assigning palette indices and collecting the averaged colour.
    fn build_palette(&mut self) -> Vec<[u8; 3]> {
        let mut palette = Vec::new();
        let mut stack = vec![self.root];

        while let Some(idx) = stack.pop() {
            if self.arena[idx].is_leaf {
                let n = &self.arena[idx];
                let count = n.pixel_count.max(1);
                let color = [(n.r_sum / count) as u8, (n.g_sum / count) as u8, (n.b_sum / count) as u8];
                self.arena[idx].palette_index = Some(palette.len());
                palette.push(color);
            } else {
                for child in self.arena[idx].children.into_iter().flatten() {
                    stack.push(child);
                }
            }
        }

        palette
    }

    fn lookup(&self, r: u8, g: u8, b: u8) -> usize {
        let mut node_idx = self.root;
        let mut level = 0u8;

        loop {
            let node = &self.arena[node_idx];
            if node.is_leaf {
                return node.palette_index.expect("palette built before lookup");
            }
            let oct = octant(r, g, b, level);
            node_idx = node.children[oct].expect("non-leaf node always has at least one child");
            level += 1;
        }
    }
}

/// Quantises an interleaved `Rgb24` buffer to at most `max_colors` (<= 256) colours, returning
/// the palette and a parallel array of palette indices, one per pixel.
pub fn quantize(rgb: &[u8], max_colors: usize) -> (Vec<[u8; 3]>, Vec<u8>) {
    let mut tree = Octree::new();

    for px in rgb.chunks_exact(3) {
        tree.insert(px[0], px[1], px[2]);
    }

    tree.reduce_to(max_colors.min(256));
    let palette = tree.build_palette();

    let mut indices = Vec::with_capacity(rgb.len() / 3);
    for px in rgb.chunks_exact(3) {
        indices.push(tree.lookup(px[0], px[1], px[2]) as u8);
    }

    (palette, indices)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quantizes_to_at_most_requested_colors() {
        let mut rgb = Vec::new();
        for r in 0..8u32 {
            for g in 0..8u32 {
                rgb.extend_from_slice(&[(r * 32) as u8, (g * 32) as u8, 0]);
            }
        }
        let (palette, indices) = quantize(&rgb, 16);
        assert!(palette.len() <= 16);
        assert_eq!(indices.len(), rgb.len() / 3);
        for &idx in &indices {
            assert!((idx as usize) < palette.len());
        }
    }

    #[test]
    fn small_distinct_palette_is_preserved_under_256() {
        let rgb = [255, 0, 0, 0, 255, 0, 0, 0, 255, 255, 255, 255];
        let (palette, indices) = quantize(&rgb, 256);
        assert!(palette.len() <= 4);
        assert_eq!(indices.len(), 4);
    }
}
