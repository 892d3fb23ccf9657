//! A reliability and fragmentation layer for unreliable datagram transports like UDP.
//!
//! There is no I/O and no connection handling here: an [end_point::Endpoint] is a pure state
//!  machine that application code feeds with received datagrams, and that hands outgoing
//!  datagrams to a transmit callback. Time is passed in explicitly.
//!
//! ## What it does
//!
//! * Every packet gets a 16 bit sequence number, wrapping around after 65535
//! * Every packet acknowledges the most recently received packet and the 32 packets before it,
//!    so acks are highly redundant and survive the loss of individual packets
//! * The endpoint reports which of its own packets were acked by the peer. There is no
//!    retransmission: it is up to application code what to do about packets that were lost
//! * Packets above a configurable size are split into fragments and reassembled on the
//!    receiving side. A packet is delivered only when all of its fragments arrived
//! * Round trip time, packet loss and bandwidth are estimated continuously
//!
//! ## Wire format
//!
//! All multi-byte numbers are little endian.
//!
//! Regular packet:
//! ```ascii
//! 0: prefix byte
//!    * bit 0: 0 for a regular packet (1 marks a fragment)
//!    * bits 1-4: ack bits byte i is present (i.e. not 0xFF)
//!    * bit 5: ack is encoded as a one-byte delta to the sequence number
//!    * bits 6-7: unused, should be 0
//! 1: sequence number (u16)
//! 3: ack (u16), or the difference 'sequence - ack' (u8) if bit 5 is set
//! *: ack bits bytes 0 to 3 (one u8 each), omitting those that are 0xFF
//! *: payload
//! ```
//!
//! The header size ranges from 4 bytes (ack delta, all acks present) to 9 bytes.
//!
//! Fragment of a large packet:
//! ```ascii
//! 0: prefix byte, always 1
//! 1: sequence number of the packet (u16)
//! 3: fragment id (u8)
//! 4: number of fragments - 1 (u8)
//! 5: for fragment 0: the packet's regular header
//! *: fragment payload, `fragment_size` bytes for all but the last fragment
//! ```

pub mod buffers;
pub mod config;
pub mod end_point;
pub mod fragment_header;
pub mod fragmentation;
pub mod packet_callbacks;
pub mod packet_header;
pub mod safe_converter;
pub mod sequence;
pub mod stats;

#[cfg(test)] mod test_util;

#[cfg(test)]
mod test {
    use tracing::Level;

    #[ctor::ctor]
    fn init_test_logging() {
        tracing_subscriber::fmt()
            .with_max_level(Level::TRACE)
            .with_test_writer()
            .try_init()
            .ok();
    }
}
