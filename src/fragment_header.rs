use crate::safe_converter::{PrecheckedCast, SafeCast};
use bytes::{Buf, BufMut};
use std::fmt::Debug;

/// The fixed-size header of a fragment of a packet that exceeded the fragmentation threshold.
///  The first fragment of a packet carries the packet's regular header immediately after the
///  fragment header.
///
/// ```ascii
/// 0: prefix byte, always 1
/// 1: sequence number of the fragmented packet (u16 LE)
/// 3: fragment id (u8)
/// 4: number of fragments - 1 (u8)
/// ```
#[derive(Clone, Copy, Eq, PartialEq)]
pub struct FragmentHeader {
    pub sequence: u16,
    pub fragment_id: u8,
    /// 1..=256
    pub num_fragments: usize,
}
impl Debug for FragmentHeader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "FRAG{{{}:{}/{}}}", self.sequence, self.fragment_id, self.num_fragments)
    }
}

impl FragmentHeader {
    pub const SERIALIZED_LEN: usize = 5;
    pub const PREFIX: u8 = 1;

    pub fn new(sequence: u16, fragment_id: u8, num_fragments: usize) -> FragmentHeader {
        FragmentHeader {
            sequence,
            fragment_id,
            num_fragments,
        }
    }

    pub fn is_last(&self) -> bool {
        usize::from(self.fragment_id) + 1 == self.num_fragments
    }

    /// NB: The caller is responsible for ensuring that `num_fragments` is in 1..=256
    pub fn ser(&self, buf: &mut impl BufMut) {
        buf.put_u8(Self::PREFIX);
        buf.put_u16_le(self.sequence);
        buf.put_u8(self.fragment_id);
        buf.put_u8((self.num_fragments - 1).prechecked_cast());
    }

    pub fn deser(buf: &mut impl Buf, max_fragments: usize) -> anyhow::Result<FragmentHeader> {
        if buf.remaining() < Self::SERIALIZED_LEN {
            return Err(anyhow::anyhow!("packet is too small for a fragment header: {} bytes", buf.remaining()));
        }

        let prefix = buf.try_get_u8()?;
        if prefix != Self::PREFIX {
            return Err(anyhow::anyhow!("prefix byte {:x} does not indicate a fragment", prefix));
        }

        let sequence = buf.try_get_u16_le()?;
        let fragment_id = buf.try_get_u8()?;
        let num_fragments: usize = buf.try_get_u8()?.safe_cast();
        let num_fragments = num_fragments + 1;

        if num_fragments > max_fragments {
            return Err(anyhow::anyhow!("{} fragments exceed the maximum of {}", num_fragments, max_fragments));
        }
        if usize::from(fragment_id) >= num_fragments {
            return Err(anyhow::anyhow!("fragment id {} is outside of the range of {} fragments", fragment_id, num_fragments));
        }

        Ok(FragmentHeader {
            sequence,
            fragment_id,
            num_fragments,
        })
    }
}
