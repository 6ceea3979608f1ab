//! The scratch-buffer allocator collaborator (§6, §9): "a named, reusable
//! typed byte region" addressed by symbolic name, reset or overwritten
//! without freeing between composes.
//!
//! This is the "dynamically-typed state bag" from §9: a mapping from a
//! compact enum tag to a growable byte region. Sparse-image handles are
//! non-owning `(region_id, byte_offset, format, N)` views over these
//! regions (§9), so the backing region must outlive the handle for the
//! duration of one compose — there is no reentrancy (§5): acquiring a name
//! again invalidates the previous view.

use std::collections::HashMap;

/// Symbolic names for the scratch regions the core acquires during a
/// compose. Kept as a compact enum rather than a free-form string, per §9.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScratchSlot {
    /// The working image for the current Radix-k round.
    WorkingImage,
    /// A receive buffer for one partner's piece.
    RecvPiece(u8),
    /// A send buffer for one partner's piece.
    SendPiece(u8),
    /// The scratch image used to hold an in-progress composite-tree result.
    TreeScratch,
    /// The final output buffer handed back to the caller.
    Output,
    /// Scratch space used by `interlace`.
    InterlaceScratch,
}

/// A process-local, stateful allocator of named byte regions.
///
/// Matches the "state buffer" collaborator's `get_state_buffer(name, bytes)`
/// contract (§6): acquiring a name with a different size simply resizes (and
/// logically invalidates any previously issued view into) that region.
#[derive(Debug, Default)]
pub struct ScratchBuffers {
    regions: HashMap<ScratchSlot, Vec<u8>>,
}

impl ScratchBuffers {
    /// Create an empty allocator.
    #[must_use]
    pub fn new() -> Self {
        Self {
            regions: HashMap::new(),
        }
    }

    /// Acquire (creating or resizing as needed) the region named `slot`,
    /// sized to at least `bytes`. Existing contents are preserved only if
    /// the region didn't need to grow; composing code must not assume
    /// carryover across calls to this method with a different size.
    pub fn get(&mut self, slot: ScratchSlot, bytes: usize) -> &mut [u8] {
        let region = self.regions.entry(slot).or_default();
        if region.len() < bytes {
            region.resize(bytes, 0);
        }
        &mut region[..bytes]
    }

    /// Drop all regions. Composes never need this themselves (scratch is
    /// reused across composes), but it's useful for tests and for hosts
    /// that want to reclaim memory between sessions.
    pub fn clear(&mut self) {
        self.regions.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_grows_but_does_not_shrink() {
        let mut scratch = ScratchBuffers::new();
        {
            let region = scratch.get(ScratchSlot::WorkingImage, 16);
            region.fill(0xAB);
        }
        let region = scratch.get(ScratchSlot::WorkingImage, 8);
        assert_eq!(region.len(), 8);
        assert!(region.iter().all(|&b| b == 0xAB));
    }

    #[test]
    fn distinct_slots_are_independent() {
        let mut scratch = ScratchBuffers::new();
        scratch.get(ScratchSlot::RecvPiece(0), 4).fill(1);
        scratch.get(ScratchSlot::RecvPiece(1), 4).fill(2);
        assert_eq!(scratch.get(ScratchSlot::RecvPiece(0), 4), &[1, 1, 1, 1]);
        assert_eq!(scratch.get(ScratchSlot::RecvPiece(1), 4), &[2, 2, 2, 2]);
    }
}
