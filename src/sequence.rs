//! Sequence numbers are 16 bit and wrap around, so they are ordered relative to each other rather
//!  than numerically: a sequence number is 'more recent' than another if it is ahead of it by at
//!  most half the sequence space.

pub const HALF_RANGE: u16 = 32768;

/// `true` iff `s1` is more recent than `s2` in the circular 16 bit sequence space
pub fn sequence_greater_than(s1: u16, s2: u16) -> bool {
    (s1 > s2 && s1 - s2 <= HALF_RANGE) ||
        (s1 < s2 && s2 - s1 > HALF_RANGE)
}

pub fn sequence_less_than(s1: u16, s2: u16) -> bool {
    sequence_greater_than(s2, s1)
}
