/// Alignment unit in bytes. Every payload size the heap tracks and every
/// pointer it hands out is a multiple of this.
pub const ALIGNMENT: usize = 8;

/// Rounds `size` up to the next multiple of [`ALIGNMENT`].
///
/// ```text
/// align_up(1)  == 8
/// align_up(8)  == 8
/// align_up(13) == 16
/// ```
#[inline]
pub fn align_up(size: usize) -> usize {
    (size + ALIGNMENT - 1) & !(ALIGNMENT - 1)
}

/// Whether `value` (a size or an arena offset) sits on an alignment boundary.
#[inline]
pub fn is_aligned(value: usize) -> bool {
    value & (ALIGNMENT - 1) == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn align_up_covers_every_residue() {
        // (1..=8) -> 8, (9..=16) -> 16, (17..=24) -> 24 and so on.
        for i in 0..10 {
            let sizes = (ALIGNMENT * i + 1)..=(ALIGNMENT * (i + 1));
            let expected = ALIGNMENT * (i + 1);

            for size in sizes {
                assert_eq!(expected, align_up(size));
            }
        }
    }

    #[test]
    fn zero_stays_zero() {
        assert_eq!(align_up(0), 0);
    }

    #[test]
    fn aligned_values_are_detected() {
        assert!(is_aligned(0));
        assert!(is_aligned(64));
        assert!(!is_aligned(63));
        assert!(!is_aligned(ALIGNMENT / 2));
    }
}
