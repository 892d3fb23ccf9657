use crate::buffers::sequence_buffer::MAX_CAPACITY;
use crate::fragmentation::num_fragments;
use anyhow::bail;

#[derive(Clone, Debug)]
pub struct EndpointConfig {
    /// prefix for log output, to tell several endpoints in the same process apart
    pub name: String,
    /// passed through to the packet callbacks unchanged, e.g. to identify the peer
    pub index: usize,

    /// This is the largest payload that can be sent or received. Payloads above `fragment_above`
    ///  are split into fragments of `fragment_size` bytes, so this must not require more than
    ///  `max_fragments` fragments.
    pub max_packet_size: usize,
    pub fragment_above: usize,
    /// at most 256 since the number of fragments is sent as a single byte
    pub max_fragments: usize,
    pub fragment_size: usize,

    /// This is the maximum number of acks that are collected between calls to
    ///  `Endpoint::clear_acks()`. Acks in excess of this are dropped, and the corresponding packets
    ///  are acked again when the peer repeats them in a later packet's ack bits.
    pub ack_buffer_size: usize,
    /// Sizes of the sequence buffers must be less than half the sequence space (i.e. at most
    ///  32767), but need not be powers of two.
    pub sent_packets_buffer_size: usize,
    pub received_packets_buffer_size: usize,
    /// the number of packets that can be in the process of being reassembled at the same time
    pub fragment_reassembly_buffer_size: usize,

    pub rtt_smoothing_factor: f32,
    pub packet_loss_smoothing_factor: f32,
    pub bandwidth_smoothing_factor: f32,

    /// Per-packet overhead of the underlying transport that is added to a packet's size for
    ///  bandwidth calculations. The default of 28 is the size of IPV4 and UDP headers.
    pub packet_header_size: usize,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        EndpointConfig {
            name: "endpoint".to_string(),
            index: 0,
            max_packet_size: 16 * 1024,
            fragment_above: 1024,
            max_fragments: 16,
            fragment_size: 1024,
            ack_buffer_size: 256,
            sent_packets_buffer_size: 256,
            received_packets_buffer_size: 256,
            fragment_reassembly_buffer_size: 64,
            rtt_smoothing_factor: 0.0025,
            packet_loss_smoothing_factor: 0.1,
            bandwidth_smoothing_factor: 0.1,
            packet_header_size: 28,
        }
    }
}

impl EndpointConfig {
    pub fn with_name(name: &str) -> EndpointConfig {
        EndpointConfig {
            name: name.to_string(),
            ..Default::default()
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.max_packet_size == 0 {
            bail!("max packet size must be positive");
        }
        if self.fragment_above == 0 {
            bail!("fragmentation threshold must be positive");
        }
        if self.fragment_size == 0 {
            bail!("fragment size must be positive");
        }
        if self.max_fragments == 0 || self.max_fragments > 256 {
            bail!("max fragments must be in 1..=256, is {}", self.max_fragments);
        }
        if self.ack_buffer_size == 0 {
            bail!("ack buffer size must be positive");
        }
        if self.sent_packets_buffer_size == 0 || self.received_packets_buffer_size == 0 || self.fragment_reassembly_buffer_size == 0 {
            bail!("sequence buffer sizes must be positive");
        }
        for (name, size) in [
            ("sent packets", self.sent_packets_buffer_size),
            ("received packets", self.received_packets_buffer_size),
            ("fragment reassembly", self.fragment_reassembly_buffer_size),
        ] {
            if size > MAX_CAPACITY {
                bail!("{} buffer size must be at most {}, is {}", name, MAX_CAPACITY, size);
            }
        }

        for (name, factor) in [
            ("rtt", self.rtt_smoothing_factor),
            ("packet loss", self.packet_loss_smoothing_factor),
            ("bandwidth", self.bandwidth_smoothing_factor),
        ] {
            if !(0.0..=1.0).contains(&factor) {
                bail!("{} smoothing factor must be in [0, 1], is {}", name, factor);
            }
        }

        if self.max_packet_size > self.fragment_above {
            let required = num_fragments(self.max_packet_size, self.fragment_size);
            if required > self.max_fragments {
                bail!("max packet size {} requires {} fragments of {} bytes, but max fragments is {}", self.max_packet_size, required, self.fragment_size, self.max_fragments);
            }
        }

        Ok(())
    }
}
