/// Helpers for the FAST segment test

/// Bit `i` of the mask is set when circle pixel `i` passed the test.
/// Returns true when at least `min_count` set bits are contiguous on the circle.
pub fn has_consecutive_bits(mask: u16, min_count: usize) -> bool {
    if min_count == 0 || min_count > 16 {
        return false;
    }
    if mask == u16::MAX {
        return true;
    }

    // AND the mask with its rotations: a surviving bit starts a run of `min_count`
    let mut run = mask;
    for i in 1..min_count as u32 {
        run &= mask.rotate_right(i);
        if run == 0 {
            return false;
        }
    }
    run != 0
}
