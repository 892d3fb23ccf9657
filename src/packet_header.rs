use bitflags::bitflags;
use bytes::{Buf, BufMut};
use std::fmt::Debug;

bitflags! {
    #[derive(PartialEq, Eq, Copy, Clone)]
    struct Flags: u8 {
        const FRAGMENT = 0b0000_0001;

        const ACK_BITS_0 = 0b0000_0010;
        const ACK_BITS_1 = 0b0000_0100;
        const ACK_BITS_2 = 0b0000_1000;
        const ACK_BITS_3 = 0b0001_0000;

        const ACK_DELTA = 0b0010_0000;
    }
}

impl Flags {
    /// the flag marking byte `i` of the ack bits as explicitly present in the header
    fn ack_bits_byte(i: usize) -> Flags {
        Flags::from_bits_truncate(Flags::ACK_BITS_0.bits() << i)
    }
}

/// The header of a regular (i.e. non-fragment) packet. The length is variable, ranging from
///  4 to [PacketHeader::MAX_SERIALIZED_LEN] bytes:
///
/// ```ascii
/// 0: prefix byte
///    * bit 0: always 0 for regular packets, 1 is a fragment (see [crate::fragment_header])
///    * bits 1-4: byte i of the ack bits is written explicitly (otherwise it is 0xFF)
///    * bit 5: ack is written as a single-byte delta to the sequence number
/// 1: sequence number (u16 LE)
/// 3: sequence - ack (u8) if bit 5 is set, ack (u16 LE) otherwise
/// *: bytes of ack bits that are not all ones, lowest first
/// ```
#[derive(Clone, Copy, Eq, PartialEq)]
pub struct PacketHeader {
    pub sequence: u16,
    /// the most recent sequence number received from the peer
    pub ack: u16,
    /// bit i is set iff `ack - i` was received from the peer
    pub ack_bits: u32,
}
impl Debug for PacketHeader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PCKT{{{}:ACK{}/{:08x}}}", self.sequence, self.ack, self.ack_bits)
    }
}

impl PacketHeader {
    pub const MIN_SERIALIZED_LEN: usize = 3;
    pub const MAX_SERIALIZED_LEN: usize = 9;

    pub fn new(sequence: u16, ack: u16, ack_bits: u32) -> PacketHeader {
        PacketHeader {
            sequence,
            ack,
            ack_bits,
        }
    }

    fn flags(&self) -> Flags {
        let mut flags = Flags::empty();
        for (i, b) in self.ack_bits.to_le_bytes().iter().enumerate() {
            if *b != 0xFF {
                flags |= Flags::ack_bits_byte(i);
            }
        }
        if self.ack_delta().is_some() {
            flags |= Flags::ACK_DELTA;
        }
        flags
    }

    fn ack_delta(&self) -> Option<u8> {
        self.sequence.wrapping_sub(self.ack)
            .try_into()
            .ok()
    }

    pub fn serialized_len(&self) -> usize {
        let ack_len = match self.ack_delta() {
            Some(_) => size_of::<u8>(),
            None => size_of::<u16>(),
        };
        let num_ack_bytes = self.ack_bits.to_le_bytes().iter()
            .filter(|&&b| b != 0xFF)
            .count();

        size_of::<u8>()           // prefix
            + size_of::<u16>()    // sequence
            + ack_len
            + num_ack_bytes
    }

    pub fn ser(&self, buf: &mut impl BufMut) {
        buf.put_u8(self.flags().bits());
        buf.put_u16_le(self.sequence);

        match self.ack_delta() {
            Some(delta) => buf.put_u8(delta),
            None => buf.put_u16_le(self.ack),
        }

        for b in self.ack_bits.to_le_bytes() {
            if b != 0xFF {
                buf.put_u8(b);
            }
        }
    }

    pub fn deser(buf: &mut impl Buf) -> anyhow::Result<PacketHeader> {
        if buf.remaining() < Self::MIN_SERIALIZED_LEN {
            return Err(anyhow::anyhow!("packet is too small for a packet header: {} bytes", buf.remaining()));
        }

        let flags = Flags::from_bits_truncate(buf.try_get_u8()?);
        if flags.contains(Flags::FRAGMENT) {
            return Err(anyhow::anyhow!("prefix byte does not indicate a regular packet"));
        }

        let sequence = buf.try_get_u16_le()?;
        let ack = if flags.contains(Flags::ACK_DELTA) {
            sequence.wrapping_sub(buf.try_get_u8()? as u16)
        }
        else {
            buf.try_get_u16_le()?
        };

        let mut ack_bytes = [0xFFu8; 4];
        for (i, b) in ack_bytes.iter_mut().enumerate() {
            if flags.contains(Flags::ack_bits_byte(i)) {
                *b = buf.try_get_u8()?;
            }
        }

        Ok(PacketHeader {
            sequence,
            ack,
            ack_bits: u32::from_le_bytes(ack_bytes),
        })
    }
}
