//! The "pivot-for" index idiom (§9): visit a range outward from a pivot
//! index, alternating below/above, so that a scan over partners or
//! partitions tends to touch nearby indices first.

/// An iterator over `0..len` that starts at `pivot` and then alternates
/// `pivot - 1, pivot + 1, pivot - 2, pivot + 2, ...`, clipped to the valid
/// range. Used by the composite tree (§4.2.1) to search for a partner's
/// arrival starting from the most likely candidate.
pub struct PivotFor {
    pivot: i64,
    len: i64,
    radius: i64,
    emitted_pivot: bool,
    /// `true` once the `pivot - radius` side has been emitted for the
    /// current radius, so `next` knows to try the `+radius` side next.
    below_done: bool,
}

/// Build a [`PivotFor`] iterator over `0..len` centered at `pivot`.
///
/// # Panics
///
/// Panics if `pivot >= len`.
#[must_use]
pub fn pivot_for(pivot: u32, len: u32) -> PivotFor {
    assert!(pivot < len, "pivot {pivot} out of range 0..{len}");
    PivotFor {
        pivot: i64::from(pivot),
        len: i64::from(len),
        radius: 1,
        emitted_pivot: false,
        below_done: false,
    }
}

impl Iterator for PivotFor {
    type Item = u32;

    fn next(&mut self) -> Option<u32> {
        if !self.emitted_pivot {
            self.emitted_pivot = true;
            return Some(self.pivot as u32);
        }
        while self.radius <= self.pivot.max(self.len - 1 - self.pivot) {
            if !self.below_done {
                self.below_done = true;
                let below = self.pivot - self.radius;
                if below >= 0 {
                    return Some(below as u32);
                }
                continue;
            }
            let above = self.pivot + self.radius;
            self.below_done = false;
            self.radius += 1;
            if above < self.len {
                return Some(above as u32);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_at_pivot() {
        let mut it = pivot_for(5, 10);
        assert_eq!(it.next(), Some(5));
    }

    #[test]
    fn visits_every_index_exactly_once() {
        for len in [1u32, 2, 3, 7, 16] {
            for pivot in 0..len {
                let mut seen: Vec<u32> = pivot_for(pivot, len).collect();
                seen.sort_unstable();
                let expected: Vec<u32> = (0..len).collect();
                assert_eq!(seen, expected, "pivot={pivot} len={len}");
            }
        }
    }
}
