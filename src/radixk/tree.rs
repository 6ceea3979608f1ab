//! The pairwise composite tree (§4.2.1): as pieces from `k` partners
//! arrive, fold them together two at a time rather than against a single
//! accumulator, so the merge stays balanced regardless of arrival order.

use crate::error::{ComposeError, Result};
use crate::image::{self, CompositeMode, ImageFormat, SparseImage};

/// One partner slot's state, per §9's tagged-variant design.
enum Slot {
    /// No piece has arrived yet for this partner.
    Pending,
    /// A piece has arrived and reached composite-tree level `level`
    /// without yet finding a same-level sibling to merge with.
    Arrived { level: u8, image: SparseImage },
    /// This slot has been folded into another and no longer holds a piece.
    Done,
}

/// Drives the promotion loop over a flat array of `k` partner slots.
///
/// Exactly one of the `k` partners is "self": its piece is handed to
/// [`CompositeTree::new`] pre-arrived at level 0, matching "self-piece
/// starts at L=0" (§4.2.1).
pub struct CompositeTree {
    slots: Vec<Slot>,
    mode: CompositeMode,
    format: ImageFormat,
}

impl CompositeTree {
    /// Start a tree for `k` partners with the caller's own piece already in
    /// slot `self_index` at level 0.
    ///
    /// # Errors
    ///
    /// Propagates a [`ComposeError`] from an immediate promotion, though in
    /// practice none is possible before any other partner has arrived.
    pub fn new(
        k: usize,
        self_index: usize,
        self_piece: SparseImage,
        mode: CompositeMode,
        format: ImageFormat,
    ) -> Result<Self> {
        let mut slots = Vec::with_capacity(k);
        for _ in 0..k {
            slots.push(Slot::Pending);
        }
        slots[self_index] = Slot::Arrived {
            level: 0,
            image: self_piece,
        };
        let mut tree = Self { slots, mode, format };
        tree.promote_from(self_index)?;
        Ok(tree)
    }

    /// Feed a newly-arrived piece for partner `index` into the tree and run
    /// the promotion loop from it.
    ///
    /// # Errors
    ///
    /// Propagates a [`ComposeError`] if compositing two pieces of mismatched
    /// pixel count is attempted (a sanity-check failure, §7).
    pub fn arrive(&mut self, index: usize, piece: SparseImage) -> Result<()> {
        self.slots[index] = Slot::Arrived { level: 0, image: piece };
        self.promote_from(index)
    }

    /// Whether every partner has been folded into a single surviving node
    /// (the tree is complete, per §4.2.1's "v=0 and sibling out of range").
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.slots.iter().filter(|s| !matches!(s, Slot::Done)).count() <= 1
    }

    /// Take the final composited result once [`CompositeTree::is_complete`]
    /// holds.
    ///
    /// # Errors
    ///
    /// Returns [`ComposeError::SanityCheck`] if called before completion.
    pub fn take_result(mut self) -> Result<SparseImage> {
        let surviving = self
            .slots
            .iter()
            .position(|s| matches!(s, Slot::Arrived { .. }));
        let Some(index) = surviving else {
            return Err(ComposeError::sanity("composite tree has no surviving node"));
        };
        match std::mem::replace(&mut self.slots[index], Slot::Done) {
            Slot::Arrived { image, .. } => Ok(image),
            _ => unreachable!(),
        }
    }

    /// Run the promotion loop starting from node `v` (§4.2.1): find `v`'s
    /// sibling at distance `2^level`, and if it has arrived at the same
    /// level, composite the two and continue promoting from the front
    /// (lower-index) survivor.
    fn promote_from(&mut self, mut v: usize) -> Result<()> {
        loop {
            let level = match &self.slots[v] {
                Slot::Arrived { level, .. } => *level,
                _ => return Ok(()),
            };
            let stride = 1usize << level;
            let subtree_start = (v / (stride * 2)) * (stride * 2);
            let sibling = if v == subtree_start { v + stride } else { v - stride };

            if sibling >= self.slots.len() {
                if v == 0 {
                    // Tree complete: no sibling to pair with at the root.
                    return Ok(());
                }
                self.promote_level(v, level + 1);
                continue;
            }

            let sibling_level = match &self.slots[sibling] {
                Slot::Arrived { level, .. } => Some(*level),
                _ => None,
            };
            let Some(sibling_level) = sibling_level else {
                // Sibling hasn't arrived yet, or already merged away: stop,
                // wait for more arrivals.
                return Ok(());
            };
            if sibling_level != level {
                return Ok(());
            }

            let (front, back) = if v < sibling { (v, sibling) } else { (sibling, v) };
            let front_image = match std::mem::replace(&mut self.slots[front], Slot::Done) {
                Slot::Arrived { image, .. } => image,
                _ => unreachable!(),
            };
            let back_image = match std::mem::replace(&mut self.slots[back], Slot::Done) {
                Slot::Arrived { image, .. } => image,
                _ => unreachable!(),
            };
            let merged = image::composite(&front_image, &back_image, self.mode)?;
            self.slots[front] = Slot::Arrived {
                level: level + 1,
                image: merged,
            };
            v = front;
        }
    }

    fn promote_level(&mut self, v: usize, new_level: u8) {
        if let Slot::Arrived { level, .. } = &mut self.slots[v] {
            *level = new_level;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::{ColorFormat, DepthFormat};

    fn piece(format: ImageFormat, value: f32, n: u32) -> SparseImage {
        use crate::image::{ColorPlane, DenseImage};
        let dense = DenseImage::new(n, 1, ColorPlane::None, Some(vec![value; n as usize]));
        image::compress(&dense, CompositeMode::ZBuffer)
    }

    fn depth_format() -> ImageFormat {
        ImageFormat { color: ColorFormat::None, depth: DepthFormat::Float }
    }

    #[test]
    fn four_way_tree_completes_regardless_of_arrival_order() {
        let format = depth_format();
        let pieces: Vec<SparseImage> = [0.4, 0.1, 0.3, 0.2]
            .iter()
            .map(|&v| piece(format, v, 4))
            .collect();

        // self = index 0, arrivals in order 2, 3, 1
        let mut tree =
            CompositeTree::new(4, 0, pieces[0].clone(), CompositeMode::ZBuffer, format).unwrap();
        assert!(!tree.is_complete());
        tree.arrive(2, pieces[2].clone()).unwrap();
        assert!(!tree.is_complete());
        tree.arrive(3, pieces[3].clone()).unwrap();
        assert!(!tree.is_complete());
        tree.arrive(1, pieces[1].clone()).unwrap();
        assert!(tree.is_complete());

        let result = tree.take_result().unwrap();
        assert!(result.decode_all().iter().all(|s| s.and_then(|s| s.depth) == Some(0.1)));
    }
}
