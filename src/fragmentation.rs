//! Splitting of packets that exceed the fragmentation threshold, and their reassembly on the
//!  receiving side.
//!
//! Reassembly state is kept per sequence number in a [SequenceBuffer], so partially received
//!  packets are discarded when the window moves past them. A packet's accumulation buffer is
//!  laid out with room for the largest possible packet header in front of the payload:
//!
//! ```ascii
//! 0                  9-h              9                  9+s                9+2s
//! | (unused)         | packet header  | fragment 0       | fragment 1       | ...
//! ```
//!
//! The packet header is re-encoded from the first fragment and right-aligned to the payload, so
//!  the reassembled packet is a contiguous slice that looks exactly like an unfragmented packet.

use crate::buffers::sequence_buffer::SequenceBuffer;
use crate::fragment_header::FragmentHeader;
use crate::packet_header::PacketHeader;
use crate::safe_converter::{PrecheckedCast, SafeCast};
use anyhow::bail;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use tracing::{debug, error, trace};

pub fn num_fragments(payload_len: usize, fragment_size: usize) -> usize {
    payload_len.div_ceil(fragment_size)
}

/// Splits a payload into fragments and passes each of them to `transmit`. The first fragment
///  carries the packet header. Returns the number of fragments.
///
/// NB: The caller is responsible for ensuring that the number of fragments does not exceed 256
pub fn send_fragments(packet_header: &PacketHeader, payload: &[u8], fragment_size: usize, mut transmit: impl FnMut(&[u8])) -> usize {
    let num_fragments = num_fragments(payload.len(), fragment_size);

    let mut buf = BytesMut::with_capacity(FragmentHeader::SERIALIZED_LEN + PacketHeader::MAX_SERIALIZED_LEN + fragment_size);
    for (fragment_id, chunk) in payload.chunks(fragment_size).enumerate() {
        buf.clear();
        FragmentHeader::new(packet_header.sequence, fragment_id.prechecked_cast(), num_fragments)
            .ser(&mut buf);
        if fragment_id == 0 {
            packet_header.ser(&mut buf);
        }
        buf.put_slice(chunk);

        transmit(&buf);
    }
    num_fragments
}

/// A fragment as received from the wire, validated against the local fragmentation config
#[derive(Debug)]
pub struct Fragment<'a> {
    pub header: FragmentHeader,
    /// present in the first fragment of a packet only
    pub packet_header: Option<PacketHeader>,
    pub payload: &'a [u8],
}

impl <'a> Fragment<'a> {
    pub fn deser(mut buf: &'a [u8], max_fragments: usize, fragment_size: usize) -> anyhow::Result<Fragment<'a>> {
        let header = FragmentHeader::deser(&mut buf, max_fragments)?;

        let packet_header = if header.fragment_id == 0 {
            let packet_header = PacketHeader::deser(&mut buf)?;
            if packet_header.sequence != header.sequence {
                bail!("packet sequence {} in first fragment does not match fragment sequence {}", packet_header.sequence, header.sequence);
            }
            Some(packet_header)
        }
        else {
            None
        };

        if buf.len() > fragment_size {
            bail!("fragment has {} bytes, exceeding the fragment size of {}", buf.len(), fragment_size);
        }
        if !header.is_last() && buf.len() != fragment_size {
            bail!("fragment {} has {} bytes, but only the last fragment may be shorter than the fragment size of {}", header.fragment_id, buf.len(), fragment_size);
        }

        Ok(Fragment {
            header,
            packet_header,
            payload: buf,
        })
    }
}

#[derive(Debug, Eq, PartialEq)]
pub enum ReassemblyOutcome {
    /// the fragment is stale or inconsistent with fragments received earlier
    Invalid,
    /// the fragment was received before, and the copy was discarded
    Duplicate,
    Incomplete,
    /// all fragments were received: header and payload of the reassembled packet
    Complete(Bytes),
}

#[derive(Default)]
struct ReassemblyRecord {
    num_fragments_received: usize,
    num_fragments_total: usize,
    fragment_received: Vec<bool>,
    packet_header_len: usize,
    packet_len: usize,
    packet_data: BytesMut,
}

impl ReassemblyRecord {
    fn init(&mut self, num_fragments: usize, fragment_size: usize) {
        self.num_fragments_received = 0;
        self.num_fragments_total = num_fragments;
        self.fragment_received = vec![false; num_fragments];
        self.packet_header_len = 0;
        self.packet_len = 0;
        self.packet_data = BytesMut::zeroed(PacketHeader::MAX_SERIALIZED_LEN + num_fragments * fragment_size);
    }

    fn release(&mut self) {
        self.fragment_received = Vec::new();
        self.packet_data = BytesMut::new();
    }

    fn is_complete(&self) -> bool {
        self.num_fragments_received == self.num_fragments_total
    }

    fn store(&mut self, fragment: &Fragment, fragment_size: usize) {
        let fragment_id: usize = fragment.header.fragment_id.safe_cast();

        self.num_fragments_received += 1;
        self.fragment_received[fragment_id] = true;

        if let Some(packet_header) = &fragment.packet_header {
            self.packet_header_len = packet_header.serialized_len();
            let mut header_slot = &mut self.packet_data[PacketHeader::MAX_SERIALIZED_LEN - self.packet_header_len..PacketHeader::MAX_SERIALIZED_LEN];
            packet_header.ser(&mut header_slot);
        }

        if fragment_id + 1 == self.num_fragments_total {
            self.packet_len = (self.num_fragments_total - 1) * fragment_size + fragment.payload.len();
        }

        let offset = PacketHeader::MAX_SERIALIZED_LEN + fragment_id * fragment_size;
        self.packet_data[offset..offset + fragment.payload.len()].copy_from_slice(fragment.payload);
    }

    /// moves the reassembled packet out of the record, leaving it without a buffer
    fn take_packet(&mut self) -> Bytes {
        let mut data = std::mem::take(&mut self.packet_data);
        data.advance(PacketHeader::MAX_SERIALIZED_LEN - self.packet_header_len);
        data.truncate(self.packet_header_len + self.packet_len);
        data.freeze()
    }
}

pub struct FragmentReassembler {
    name: String,
    fragment_size: usize,
    buffer: SequenceBuffer<ReassemblyRecord>,
}

impl FragmentReassembler {
    pub fn new(name: &str, capacity: usize, fragment_size: usize) -> FragmentReassembler {
        FragmentReassembler {
            name: name.to_string(),
            fragment_size,
            buffer: SequenceBuffer::new(capacity),
        }
    }

    /// Stores a fragment, returning the reassembled packet if this was the last missing
    ///  fragment. `on_new_packet` is called when the first fragment of a packet arrives.
    pub fn on_fragment(&mut self, fragment: &Fragment, on_new_packet: impl FnOnce(u16)) -> ReassemblyOutcome {
        let sequence = fragment.header.sequence;

        let Some((record, is_new)) = Self::find_or_insert(&mut self.buffer, &fragment.header, self.fragment_size) else {
            error!("[{}] ignoring invalid fragment: could not insert packet {} into the reassembly buffer (stale)", self.name, sequence);
            return ReassemblyOutcome::Invalid;
        };
        if is_new {
            on_new_packet(sequence);
        }

        if fragment.header.num_fragments != record.num_fragments_total {
            error!("[{}] ignoring invalid fragment: fragment count mismatch, expected {}, got {}", self.name, record.num_fragments_total, fragment.header.num_fragments);
            return ReassemblyOutcome::Invalid;
        }

        if record.fragment_received[usize::from(fragment.header.fragment_id)] {
            debug!("[{}] ignoring fragment {} of packet {}: fragment already received", self.name, fragment.header.fragment_id, sequence);
            return ReassemblyOutcome::Duplicate;
        }

        trace!("[{}] received fragment {} of packet {} ({}/{})", self.name, fragment.header.fragment_id, sequence, record.num_fragments_received + 1, record.num_fragments_total);
        record.store(fragment, self.fragment_size);

        if !record.is_complete() {
            return ReassemblyOutcome::Incomplete;
        }

        debug!("[{}] completed reassembly of packet {}", self.name, sequence);
        let packet = record.take_packet();
        self.buffer.remove_with_cleanup(sequence, ReassemblyRecord::release);
        ReassemblyOutcome::Complete(packet)
    }

    fn find_or_insert<'b>(buffer: &'b mut SequenceBuffer<ReassemblyRecord>, header: &FragmentHeader, fragment_size: usize) -> Option<(&'b mut ReassemblyRecord, bool)> {
        if buffer.exists(header.sequence) {
            return buffer.find_mut(header.sequence)
                .map(|record| (record, false));
        }

        let record = buffer.insert_with_cleanup(header.sequence, ReassemblyRecord::release)?;
        record.init(header.num_fragments, fragment_size);
        Some((record, true))
    }

    /// Marks everything up to `sequence` as seen, discarding partially reassembled packets that
    ///  fall out of the window
    pub fn advance(&mut self, sequence: u16) {
        self.buffer.advance_with_cleanup(sequence, ReassemblyRecord::release);
    }

    pub fn reset(&mut self) {
        for index in 0..self.buffer.capacity() {
            if let Some(record) = self.buffer.at_index_mut(index) {
                record.release();
            }
        }
        self.buffer.reset();
    }

    /// the number of packets for which some, but not all fragments were received
    pub fn num_pending_packets(&self) -> usize {
        (0..self.buffer.capacity())
            .filter(|&index| self.buffer.at_index(index).is_some())
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    const FRAGMENT_SIZE: usize = 16;

    fn payload(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    fn fragments_of(sequence: u16, payload: &[u8]) -> Vec<Vec<u8>> {
        let mut result = Vec::new();
        let header = PacketHeader::new(sequence, sequence.wrapping_sub(1), 0xFFFF_FFFF);
        send_fragments(&header, payload, FRAGMENT_SIZE, |f| result.push(f.to_vec()));
        result
    }

    fn reassemble(reassembler: &mut FragmentReassembler, raw: &[u8]) -> ReassemblyOutcome {
        let fragment = Fragment::deser(raw, 16, FRAGMENT_SIZE).unwrap();
        reassembler.on_fragment(&fragment, |_| {})
    }

    #[rstest]
    #[case::one(1, 1)]
    #[case::exact(FRAGMENT_SIZE, 1)]
    #[case::one_more(FRAGMENT_SIZE + 1, 2)]
    #[case::many(10 * FRAGMENT_SIZE, 10)]
    #[case::many_and_a_bit(10 * FRAGMENT_SIZE + 3, 11)]
    fn test_send_fragments(#[case] payload_len: usize, #[case] expected_num_fragments: usize) {
        let payload = payload(payload_len);
        let fragments = fragments_of(1234, &payload);

        assert_eq!(fragments.len(), expected_num_fragments);
        assert_eq!(num_fragments(payload_len, FRAGMENT_SIZE), expected_num_fragments);

        let mut reassembled_payload = Vec::new();
        for (i, raw) in fragments.iter().enumerate() {
            let fragment = Fragment::deser(raw, 16, FRAGMENT_SIZE).unwrap();
            assert_eq!(fragment.header, FragmentHeader::new(1234, i as u8, expected_num_fragments));
            assert_eq!(fragment.packet_header.is_some(), i == 0);
            reassembled_payload.extend_from_slice(fragment.payload);
        }
        assert_eq!(reassembled_payload, payload);
    }

    #[test]
    fn test_fragment_deser_sequence_mismatch() {
        let mut raw = Vec::new();
        FragmentHeader::new(5, 0, 2).ser(&mut raw);
        PacketHeader::new(6, 0, 0xFFFF_FFFF).ser(&mut raw);
        raw.extend_from_slice(&payload(FRAGMENT_SIZE));

        assert!(Fragment::deser(&raw, 16, FRAGMENT_SIZE).is_err());
    }

    #[test]
    fn test_fragment_deser_first_without_packet_header() {
        let mut raw = Vec::new();
        FragmentHeader::new(5, 0, 2).ser(&mut raw);
        assert!(Fragment::deser(&raw, 16, FRAGMENT_SIZE).is_err());
    }

    #[rstest]
    #[case::last_may_be_short(1, 2, 3, true)]
    #[case::last_may_be_empty(1, 2, 0, true)]
    #[case::last_full(1, 2, FRAGMENT_SIZE, true)]
    #[case::last_too_long(1, 2, FRAGMENT_SIZE + 1, false)]
    #[case::middle_full(1, 3, FRAGMENT_SIZE, true)]
    #[case::middle_short(1, 3, FRAGMENT_SIZE - 1, false)]
    #[case::middle_too_long(1, 3, FRAGMENT_SIZE + 1, false)]
    fn test_fragment_deser_payload_size(#[case] fragment_id: u8, #[case] num_fragments: usize, #[case] payload_len: usize, #[case] expected_valid: bool) {
        let mut raw = Vec::new();
        FragmentHeader::new(5, fragment_id, num_fragments).ser(&mut raw);
        raw.extend_from_slice(&payload(payload_len));

        assert_eq!(Fragment::deser(&raw, 16, FRAGMENT_SIZE).is_ok(), expected_valid);
    }

    #[rstest]
    #[case::in_order(vec![0, 1, 2, 3])]
    #[case::reverse(vec![3, 2, 1, 0])]
    #[case::shuffled(vec![2, 0, 3, 1])]
    fn test_reassemble(#[case] order: Vec<usize>) {
        let payload = payload(3 * FRAGMENT_SIZE + 5);
        let fragments = fragments_of(77, &payload);
        let mut reassembler = FragmentReassembler::new("test", 8, FRAGMENT_SIZE);

        let mut expected = Vec::new();
        PacketHeader::new(77, 76, 0xFFFF_FFFF).ser(&mut expected);
        expected.extend_from_slice(&payload);

        for (i, &fragment_id) in order.iter().enumerate() {
            let outcome = reassemble(&mut reassembler, &fragments[fragment_id]);
            if i == order.len() - 1 {
                assert_eq!(outcome, ReassemblyOutcome::Complete(Bytes::from(expected.clone())));
            }
            else {
                assert_eq!(outcome, ReassemblyOutcome::Incomplete);
                assert_eq!(reassembler.num_pending_packets(), 1);
            }
        }
        assert_eq!(reassembler.num_pending_packets(), 0);
    }

    #[test]
    fn test_reassemble_single_fragment() {
        let fragments = fragments_of(3, &payload(5));
        let mut reassembler = FragmentReassembler::new("test", 8, FRAGMENT_SIZE);

        match reassemble(&mut reassembler, &fragments[0]) {
            ReassemblyOutcome::Complete(packet) => {
                let mut b: &[u8] = &packet;
                assert_eq!(PacketHeader::deser(&mut b).unwrap().sequence, 3);
                assert_eq!(b, payload(5).as_slice());
            }
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[test]
    fn test_reassemble_duplicate() {
        let fragments = fragments_of(77, &payload(2 * FRAGMENT_SIZE));
        let mut reassembler = FragmentReassembler::new("test", 8, FRAGMENT_SIZE);

        assert_eq!(reassemble(&mut reassembler, &fragments[1]), ReassemblyOutcome::Incomplete);
        assert_eq!(reassemble(&mut reassembler, &fragments[1]), ReassemblyOutcome::Duplicate);
        assert!(matches!(reassemble(&mut reassembler, &fragments[0]), ReassemblyOutcome::Complete(_)));
    }

    #[test]
    fn test_reassemble_count_mismatch() {
        let fragments = fragments_of(77, &payload(2 * FRAGMENT_SIZE));
        let mut reassembler = FragmentReassembler::new("test", 8, FRAGMENT_SIZE);

        let mut other = Vec::new();
        FragmentHeader::new(77, 2, 3).ser(&mut other);
        other.extend_from_slice(&payload(3));

        assert_eq!(reassemble(&mut reassembler, &fragments[0]), ReassemblyOutcome::Incomplete);
        assert_eq!(reassemble(&mut reassembler, &other), ReassemblyOutcome::Invalid);
        assert!(matches!(reassemble(&mut reassembler, &fragments[1]), ReassemblyOutcome::Complete(_)));
    }

    #[test]
    fn test_on_new_packet() {
        let fragments = fragments_of(77, &payload(2 * FRAGMENT_SIZE));
        let mut reassembler = FragmentReassembler::new("test", 8, FRAGMENT_SIZE);

        let mut new_packets = Vec::new();
        for raw in &fragments {
            let fragment = Fragment::deser(raw, 16, FRAGMENT_SIZE).unwrap();
            reassembler.on_fragment(&fragment, |s| new_packets.push(s));
        }
        assert_eq!(new_packets, vec![77]);
    }

    #[test]
    fn test_reassemble_stale() {
        let mut reassembler = FragmentReassembler::new("test", 4, FRAGMENT_SIZE);

        let newer = fragments_of(100, &payload(2 * FRAGMENT_SIZE));
        let older = fragments_of(90, &payload(2 * FRAGMENT_SIZE));

        assert_eq!(reassemble(&mut reassembler, &newer[0]), ReassemblyOutcome::Incomplete);
        assert_eq!(reassemble(&mut reassembler, &older[0]), ReassemblyOutcome::Invalid);
        assert_eq!(reassembler.num_pending_packets(), 1);
    }

    #[test]
    fn test_eviction_discards_partial_packet() {
        let mut reassembler = FragmentReassembler::new("test", 4, FRAGMENT_SIZE);

        let evicted = fragments_of(1, &payload(2 * FRAGMENT_SIZE));
        let newer = fragments_of(10, &payload(2 * FRAGMENT_SIZE));

        assert_eq!(reassemble(&mut reassembler, &evicted[0]), ReassemblyOutcome::Incomplete);
        assert_eq!(reassemble(&mut reassembler, &newer[0]), ReassemblyOutcome::Incomplete);
        assert_eq!(reassembler.num_pending_packets(), 1);

        assert_eq!(reassemble(&mut reassembler, &evicted[1]), ReassemblyOutcome::Invalid);
    }

    #[test]
    fn test_advance() {
        let mut reassembler = FragmentReassembler::new("test", 4, FRAGMENT_SIZE);
        let fragments = fragments_of(1, &payload(2 * FRAGMENT_SIZE));

        assert_eq!(reassemble(&mut reassembler, &fragments[0]), ReassemblyOutcome::Incomplete);
        reassembler.advance(1);
        assert_eq!(reassembler.num_pending_packets(), 1);

        reassembler.advance(5);
        assert_eq!(reassembler.num_pending_packets(), 0);
        assert_eq!(reassemble(&mut reassembler, &fragments[1]), ReassemblyOutcome::Invalid);
    }

    #[test]
    fn test_reset() {
        let mut reassembler = FragmentReassembler::new("test", 4, FRAGMENT_SIZE);
        let fragments = fragments_of(1, &payload(2 * FRAGMENT_SIZE));

        assert_eq!(reassemble(&mut reassembler, &fragments[0]), ReassemblyOutcome::Incomplete);
        reassembler.reset();
        assert_eq!(reassembler.num_pending_packets(), 0);

        assert_eq!(reassemble(&mut reassembler, &fragments[1]), ReassemblyOutcome::Incomplete);
        assert!(matches!(reassemble(&mut reassembler, &fragments[0]), ReassemblyOutcome::Complete(_)));
    }
}
