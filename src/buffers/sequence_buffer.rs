//! A fixed-capacity ring buffer indexed by 16 bit sequence numbers.
//!
//! Slots are assigned round robin in the order of sequence numbers, continuing across the wrap
//!  from 65535 to 0: the buffer counts sequence numbers without wrapping internally, and slot
//!  `n % capacity` holds the entry for the `n`th sequence number. So any `capacity` consecutive
//!  sequence numbers occupy distinct slots, whether the capacity divides 2^16 or not. A separate
//!  array of tags records which sequence number (if any) currently owns each slot. This
//!  distinguishes an empty slot from one holding data for a different sequence number that maps
//!  to the same index.
//!
//! The buffer tracks the sequence number *after* the most recent one inserted. Inserting a more
//!  recent sequence number moves this cursor forward, evicting every slot that falls out of the
//!  window on the way. Sequence numbers older than `cursor - capacity` are stale and rejected.
//!
//! Entry types that own secondary resources can pass a cleanup function to the `_with_cleanup`
//!  variants; it is called for every entry that is evicted, overwritten or removed.

use crate::safe_converter::{PrecheckedCast, SafeCast};
use crate::sequence::{sequence_greater_than, sequence_less_than, HALF_RANGE};
use std::fmt::{Debug, Formatter};

/// Capacities of half the sequence space or more would make the window overlap itself
pub const MAX_CAPACITY: usize = HALF_RANGE as usize - 1;

/// the initial value of the unwrapped sequence counter, leaving room for sequence numbers
///  behind the cursor
const INITIAL_UNWRAPPED_SEQUENCE: u64 = 1 << 16;

pub struct SequenceBuffer<T> {
    /// the sequence number after the most recent one that was inserted
    sequence: u16,
    /// `sequence` counted without wrapping around
    unwrapped_sequence: u64,
    entry_sequence: Vec<Option<u16>>,
    entry_data: Vec<T>,
}

impl<T: Default> SequenceBuffer<T> {
    pub fn new(capacity: usize) -> SequenceBuffer<T> {
        assert!(capacity > 0, "sequence buffer capacity must be positive");
        assert!(capacity <= MAX_CAPACITY, "sequence buffer capacity must be at most {}, is {}", MAX_CAPACITY, capacity);

        SequenceBuffer {
            sequence: 0,
            unwrapped_sequence: INITIAL_UNWRAPPED_SEQUENCE,
            entry_sequence: vec![None; capacity],
            entry_data: (0..capacity).map(|_| T::default()).collect(),
        }
    }
}

impl<T> SequenceBuffer<T> {
    pub fn capacity(&self) -> usize {
        self.entry_sequence.len()
    }

    /// The sequence number after the most recently inserted one, i.e. the start of the part of
    ///  the sequence space that was not seen yet
    pub fn sequence(&self) -> u16 {
        self.sequence
    }

    fn slot(&self, unwrapped_sequence: u64) -> usize {
        let capacity: u64 = self.capacity().safe_cast();
        (unwrapped_sequence % capacity).prechecked_cast()
    }

    fn index(&self, sequence: u16) -> usize {
        // the distance to the cursor as a signed number, i.e. negative for older sequence numbers
        let distance = i16::from_le_bytes(sequence.wrapping_sub(self.sequence).to_le_bytes());
        self.slot(self.unwrapped_sequence.wrapping_add_signed(i64::from(distance)))
    }

    /// the oldest sequence number that is still inside the window
    pub fn window_start(&self) -> u16 {
        self.sequence.wrapping_sub(self.capacity().prechecked_cast())
    }

    /// Clears all entries without touching their data. NB: Entries owning resources must be
    ///  cleaned up by the caller, e.g. through [SequenceBuffer::at_index_mut].
    pub fn reset(&mut self) {
        self.sequence = 0;
        self.unwrapped_sequence = INITIAL_UNWRAPPED_SEQUENCE;
        self.entry_sequence.fill(None);
    }

    /// `false` iff the sequence number is too old to be stored in the buffer
    pub fn test_insert(&self, sequence: u16) -> bool {
        !sequence_less_than(sequence, self.window_start())
    }

    pub fn insert(&mut self, sequence: u16) -> Option<&mut T> {
        if sequence_less_than(sequence, self.window_start()) {
            return None;
        }
        self.move_window(sequence, &mut |_| {});

        let index = self.index(sequence);
        self.entry_sequence[index] = Some(sequence);
        Some(&mut self.entry_data[index])
    }

    /// Like [SequenceBuffer::insert], calling `cleanup` on every entry that is evicted from the
    ///  window or overwritten by the new entry.
    pub fn insert_with_cleanup(&mut self, sequence: u16, mut cleanup: impl FnMut(&mut T)) -> Option<&mut T> {
        if sequence_greater_than(sequence.wrapping_add(1), self.sequence) {
            self.move_window(sequence, &mut cleanup);
        }
        else if sequence_less_than(sequence, self.window_start()) {
            return None;
        }

        let index = self.index(sequence);
        if self.entry_sequence[index].is_some() {
            cleanup(&mut self.entry_data[index]);
        }
        self.entry_sequence[index] = Some(sequence);
        Some(&mut self.entry_data[index])
    }

    /// Moves the window so that `sequence` is the most recent sequence number without storing
    ///  an entry for it. This marks everything up to `sequence` as 'seen'.
    pub fn advance(&mut self, sequence: u16) {
        self.move_window(sequence, &mut |_| {});
    }

    pub fn advance_with_cleanup(&mut self, sequence: u16, mut cleanup: impl FnMut(&mut T)) {
        self.move_window(sequence, &mut cleanup);
    }

    fn move_window(&mut self, sequence: u16, cleanup: &mut dyn FnMut(&mut T)) {
        let new_sequence = sequence.wrapping_add(1);
        if sequence_greater_than(new_sequence, self.sequence) {
            let distance: u64 = new_sequence.wrapping_sub(self.sequence).safe_cast();
            self.remove_entries(self.unwrapped_sequence, distance, cleanup);
            self.sequence = new_sequence;
            self.unwrapped_sequence += distance;
        }
    }

    /// Evicts the entries for `count` sequence numbers starting at `start`. If that spans at
    ///  least the whole buffer, all slots are swept once instead.
    fn remove_entries(&mut self, start: u64, count: u64, cleanup: &mut dyn FnMut(&mut T)) {
        let capacity = self.capacity();
        let capacity_u64: u64 = capacity.safe_cast();
        let num_slots: usize = if count < capacity_u64 {
            count.prechecked_cast()
        }
        else {
            capacity
        };

        let first_slot = self.slot(start);
        for i in 0..num_slots {
            let index = (first_slot + i) % capacity;
            if self.entry_sequence[index].is_some() {
                cleanup(&mut self.entry_data[index]);
            }
            self.entry_sequence[index] = None;
        }
    }

    pub fn remove(&mut self, sequence: u16) {
        let index = self.index(sequence);
        self.entry_sequence[index] = None;
    }

    pub fn remove_with_cleanup(&mut self, sequence: u16, mut cleanup: impl FnMut(&mut T)) {
        let index = self.index(sequence);
        if self.entry_sequence[index].take().is_some() {
            cleanup(&mut self.entry_data[index]);
        }
    }

    /// `true` iff the slot for `sequence` is not occupied by any sequence number
    pub fn available(&self, sequence: u16) -> bool {
        self.entry_sequence[self.index(sequence)].is_none()
    }

    pub fn exists(&self, sequence: u16) -> bool {
        self.entry_sequence[self.index(sequence)] == Some(sequence)
    }

    pub fn find(&self, sequence: u16) -> Option<&T> {
        let index = self.index(sequence);
        if self.entry_sequence[index] == Some(sequence) {
            Some(&self.entry_data[index])
        }
        else {
            None
        }
    }

    pub fn find_mut(&mut self, sequence: u16) -> Option<&mut T> {
        let index = self.index(sequence);
        if self.entry_sequence[index] == Some(sequence) {
            Some(&mut self.entry_data[index])
        }
        else {
            None
        }
    }

    /// raw access to an occupied slot, used for sweeping the buffer
    pub fn at_index(&self, index: usize) -> Option<&T> {
        match self.entry_sequence[index] {
            Some(_) => Some(&self.entry_data[index]),
            None => None,
        }
    }

    pub fn at_index_mut(&mut self, index: usize) -> Option<&mut T> {
        match self.entry_sequence[index] {
            Some(_) => Some(&mut self.entry_data[index]),
            None => None,
        }
    }

    /// Returns the most recent sequence number together with a bit field of the 32 sequence
    ///  numbers up to and including it: bit `i` is set iff `ack - i` is stored in the buffer.
    pub fn generate_ack_bits(&self) -> (u16, u32) {
        let ack = self.sequence.wrapping_sub(1);
        let mut ack_bits = 0u32;
        for i in 0..32u16 {
            if self.exists(ack.wrapping_sub(i)) {
                ack_bits |= 1 << i;
            }
        }
        (ack, ack_bits)
    }
}

impl<T> Debug for SequenceBuffer<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let num_entries = self.entry_sequence.iter()
            .filter(|s| s.is_some())
            .count();
        write!(f, "SEQBUF{{@{}:{}/{}}}", self.sequence, num_entries, self.capacity())
    }
}
