//! Tag trees: the monotone quadtree structure packet headers use to
//! signal per-code-block inclusion and zero-bit-plane counts without
//! repeating a full value every time a child's value turns out equal to
//! one already known for an ancestor.
//!
//! Grounded on the classic leaf-to-root/root-to-leaf traversal (each node
//! tracks `parent`, `low`, `value`, `known`), reimplemented with owned
//! `Vec` storage addressed by index instead of raw pointers.

#[derive(Debug, Clone, Copy)]
struct Node {
    parent: Option<usize>,
    value: i32,
    low: i32,
    known: bool,
}

/// One level of the quadtree: `width * height` nodes, each parenting a
/// 2x2 group of nodes in the level below.
struct Level {
    width: u32,
    height: u32,
    base: usize,
}

/// A tag tree over a `width x height` grid of leaves (one per
/// code-block in a subband-component-precinct).
pub struct TagTree {
    nodes: Vec<Node>,
    levels: Vec<Level>,
    leaf_width: u32,
}

impl TagTree {
    pub fn new(width: u32, height: u32) -> Self {
        let mut levels = Vec::new();
        let mut nodes = Vec::new();
        let (mut w, mut h) = (width.max(1), height.max(1));
        loop {
            let base = nodes.len();
            for _ in 0..(w * h) {
                nodes.push(Node {
                    parent: None,
                    value: i32::MAX,
                    low: 0,
                    known: false,
                });
            }
            levels.push(Level { width: w, height: h, base });
            if w == 1 && h == 1 {
                break;
            }
            w = (w + 1) / 2;
            h = (h + 1) / 2;
        }

        for level_idx in 0..levels.len() - 1 {
            let (w, h, base) = {
                let l = &levels[level_idx];
                (l.width, l.height, l.base)
            };
            let parent_base = levels[level_idx + 1].base;
            let parent_w = levels[level_idx + 1].width;
            for y in 0..h {
                for x in 0..w {
                    let idx = base + (y * w + x) as usize;
                    let parent_idx = parent_base + ((y / 2) * parent_w + (x / 2)) as usize;
                    nodes[idx].parent = Some(parent_idx);
                }
            }
        }

        Self {
            nodes,
            levels,
            leaf_width: width.max(1),
        }
    }

    fn leaf_index(&self, x: u32, y: u32) -> usize {
        self.levels[0].base + (y * self.leaf_width + x) as usize
    }

    pub fn reset(&mut self) {
        for node in &mut self.nodes {
            node.value = i32::MAX;
            node.low = 0;
            node.known = false;
        }
    }

    pub fn set_value(&mut self, x: u32, y: u32, value: i32) {
        let mut idx = self.leaf_index(x, y);
        self.nodes[idx].value = value;
        while let Some(parent) = self.nodes[idx].parent {
            if self.nodes[parent].value > self.nodes[idx].value {
                self.nodes[parent].value = self.nodes[idx].value;
            } else {
                break;
            }
            idx = parent;
        }
    }

    /// Chain of node indices from the leaf at `(x, y)` up to the root.
    fn path_to_root(&self, x: u32, y: u32) -> Vec<usize> {
        let mut path = vec![self.leaf_index(x, y)];
        while let Some(parent) = self.nodes[*path.last().unwrap()].parent {
            path.push(parent);
        }
        path
    }

    /// Encodes whether the leaf's value is `<= threshold`, emitting one
    /// bit per still-undetermined node from the root down to the leaf.
    /// Returns `(bits, known)` where `known` is false if the threshold
    /// was insufficient to resolve the leaf (caller should raise the
    /// threshold and call again).
    pub fn encode(&mut self, x: u32, y: u32, threshold: i32) -> (Vec<u32>, bool) {
        let path = self.path_to_root(x, y);
        let mut bits = Vec::new();
        for &idx in path.iter().rev() {
            if self.nodes[idx].known {
                continue;
            }
            let parent_low = self.nodes[idx].parent.map(|p| self.nodes[p].low).unwrap_or(0);
            if self.nodes[idx].low < parent_low {
                self.nodes[idx].low = parent_low;
            }
            while self.nodes[idx].low < threshold && self.nodes[idx].low < self.nodes[idx].value {
                self.nodes[idx].low += 1;
                bits.push(0);
            }
            if self.nodes[idx].value <= threshold {
                bits.push(1);
                self.nodes[idx].known = true;
            } else {
                bits.push(0);
                self.nodes[idx].low = threshold;
            }
        }
        let known = self.nodes[*path.first().unwrap()].known;
        (bits, known)
    }

    /// Decodes one leaf's value against `threshold`, reading bits from
    /// `read_bit`. Returns `Some(value)` once the leaf's exact value is
    /// known, `None` if more bits at a higher threshold are still
    /// needed.
    pub fn decode(
        &mut self,
        x: u32,
        y: u32,
        threshold: i32,
        mut read_bit: impl FnMut() -> u32,
    ) -> Option<i32> {
        let path = self.path_to_root(x, y);
        for &idx in path.iter().rev() {
            if self.nodes[idx].known {
                continue;
            }
            let parent_low = self.nodes[idx].parent.map(|p| self.nodes[p].low).unwrap_or(0);
            if self.nodes[idx].low < parent_low {
                self.nodes[idx].low = parent_low;
            }
            while self.nodes[idx].low < threshold {
                if read_bit() == 1 {
                    self.nodes[idx].value = self.nodes[idx].low;
                    self.nodes[idx].known = true;
                    break;
                }
                self.nodes[idx].low += 1;
            }
        }
        let leaf = path[0];
        if self.nodes[leaf].known {
            Some(self.nodes[leaf].value)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_leaf_tree_resolves_immediately() {
        let mut tree = TagTree::new(1, 1);
        tree.set_value(0, 0, 3);
        let (bits, known) = tree.encode(0, 0, 3);
        assert!(known);
        assert!(!bits.is_empty());
    }

    #[test]
    fn encode_decode_inclusion_roundtrip() {
        let width = 4;
        let height = 3;
        let mut values = vec![0i32; (width * height) as usize];
        for (i, v) in values.iter_mut().enumerate() {
            *v = (i % 5) as i32;
        }

        let mut enc_tree = TagTree::new(width, height);
        for y in 0..height {
            for x in 0..width {
                enc_tree.set_value(x, y, values[(y * width + x) as usize]);
            }
        }

        let mut dec_tree = TagTree::new(width, height);
        for y in 0..height {
            for x in 0..width {
                let expected = values[(y * width + x) as usize];
                let mut threshold = 0;
                loop {
                    let (bits, known) = enc_tree.encode(x, y, threshold);
                    let mut iter = bits.into_iter();
                    let result = dec_tree.decode(x, y, threshold, || iter.next().unwrap());
                    if known {
                        assert_eq!(result, Some(expected));
                        break;
                    }
                    threshold += 1;
                    assert!(threshold < 100, "tag tree failed to converge");
                }
            }
        }
    }

    #[test]
    fn reset_clears_known_state() {
        let mut tree = TagTree::new(2, 2);
        tree.set_value(0, 0, 1);
        let _ = tree.encode(0, 0, 1);
        tree.reset();
        assert!(!tree.nodes[tree.leaf_index(0, 0)].known);
    }
}
