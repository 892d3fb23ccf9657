use crate::buffers::sequence_buffer::SequenceBuffer;
use crate::config::EndpointConfig;
use crate::fragmentation::{send_fragments, Fragment, FragmentReassembler, ReassemblyOutcome};
use crate::packet_callbacks::{PacketProcessor, PacketTransmitter};
use crate::packet_header::PacketHeader;
use crate::safe_converter::SafeCast;
use crate::stats::{Bandwidth, LinkStatistics, ReceivedPacketData, SentPacketData};
use bytes::{BufMut, Bytes, BytesMut};
use tracing::{debug, error, trace};

/// Lifetime totals, never reset
#[derive(Debug, Default, Clone, Eq, PartialEq)]
pub struct EndpointCounters {
    pub packets_sent: u64,
    pub packets_received: u64,
    pub packets_acked: u64,
    pub packets_stale: u64,
    pub packets_invalid: u64,
    pub packets_too_large_to_send: u64,
    pub packets_too_large_to_receive: u64,
    pub fragments_sent: u64,
    pub fragments_received: u64,
    pub fragments_invalid: u64,
}

/// An Endpoint is one side of a connection between two peers. It numbers outgoing packets,
///  acknowledges incoming packets in the headers of outgoing packets, fragments and reassembles
///  large packets, and tracks statistics about the link.
///
/// It does no I/O of its own: application code passes received datagrams to
///  [Endpoint::receive_packet], and the endpoint sends datagrams through its [PacketTransmitter].
///  Payloads of received packets are passed to the [PacketProcessor].
///
/// There is no retransmission: the endpoint reports which of its packets were acked by the
///  peer (see [Endpoint::acks]), and it is up to application code to react to missing acks.
pub struct Endpoint<T: PacketTransmitter, P: PacketProcessor> {
    config: EndpointConfig,
    time: f64,
    /// the sequence number of the next outgoing packet
    sequence: u16,
    acks: Vec<u16>,
    sent_packets: SequenceBuffer<SentPacketData>,
    received_packets: SequenceBuffer<ReceivedPacketData>,
    reassembler: FragmentReassembler,
    statistics: LinkStatistics,
    counters: EndpointCounters,
    transmitter: T,
    processor: P,
}

impl <T: PacketTransmitter, P: PacketProcessor> Endpoint<T, P> {
    pub fn new(config: EndpointConfig, time: f64, transmitter: T, processor: P) -> anyhow::Result<Endpoint<T, P>> {
        config.validate()?;

        debug!("[{}] creating endpoint", config.name);
        Ok(Endpoint {
            time,
            sequence: 0,
            acks: Vec::with_capacity(config.ack_buffer_size),
            sent_packets: SequenceBuffer::new(config.sent_packets_buffer_size),
            received_packets: SequenceBuffer::new(config.received_packets_buffer_size),
            reassembler: FragmentReassembler::new(&config.name, config.fragment_reassembly_buffer_size, config.fragment_size),
            statistics: LinkStatistics::default(),
            counters: EndpointCounters::default(),
            transmitter,
            processor,
            config,
        })
    }

    pub fn config(&self) -> &EndpointConfig {
        &self.config
    }

    pub fn time(&self) -> f64 {
        self.time
    }

    pub fn transmitter(&self) -> &T {
        &self.transmitter
    }

    pub fn transmitter_mut(&mut self) -> &mut T {
        &mut self.transmitter
    }

    pub fn processor(&self) -> &P {
        &self.processor
    }

    pub fn processor_mut(&mut self) -> &mut P {
        &mut self.processor
    }

    /// the sequence number that the next call to [Endpoint::send_packet] will use
    pub fn next_packet_sequence(&self) -> u16 {
        self.sequence
    }

    pub fn send_packet(&mut self, payload: &[u8]) {
        if payload.len() > self.config.max_packet_size {
            error!("[{}] packet too large to send: packet is {} bytes, maximum is {}", self.config.name, payload.len(), self.config.max_packet_size);
            self.counters.packets_too_large_to_send += 1;
            return;
        }

        let sequence = self.sequence;
        self.sequence = self.sequence.wrapping_add(1);

        let (ack, ack_bits) = self.received_packets.generate_ack_bits();
        let header = PacketHeader::new(sequence, ack, ack_bits);

        if let Some(sent_packet) = self.sent_packets.insert(sequence) {
            *sent_packet = SentPacketData {
                time: self.time,
                acked: false,
                packet_bytes: self.config.packet_header_size + payload.len(),
            };
        }

        let index = self.config.index;
        let transmitter = &mut self.transmitter;

        if payload.len() <= self.config.fragment_above {
            debug!("[{}] sending packet {} without fragmentation", self.config.name, sequence);

            let mut buf = BytesMut::with_capacity(PacketHeader::MAX_SERIALIZED_LEN + payload.len());
            header.ser(&mut buf);
            buf.put_slice(payload);
            transmitter.transmit_packet(index, sequence, &buf);
        }
        else {
            let num_fragments = send_fragments(&header, payload, self.config.fragment_size, |fragment| {
                transmitter.transmit_packet(index, sequence, fragment);
            });
            debug!("[{}] sent packet {} as {} fragments", self.config.name, sequence, num_fragments);

            let num_fragments: u64 = num_fragments.safe_cast();
            self.counters.fragments_sent += num_fragments;
        }

        self.counters.packets_sent += 1;
    }

    /// Handles a datagram received from the peer: either a regular packet which is passed to the
    ///  [PacketProcessor], or a fragment which is passed on only when it completes a packet.
    pub fn receive_packet(&mut self, packet: &[u8]) {
        let mut reassembled = self.on_datagram(packet);
        while let Some(packet) = reassembled {
            reassembled = self.on_datagram(&packet);
        }
    }

    /// returns a reassembled packet if `packet` was the last missing fragment
    fn on_datagram(&mut self, packet: &[u8]) -> Option<Bytes> {
        if packet.len() > self.config.max_packet_size {
            error!("[{}] packet too large to receive: packet is {} bytes, maximum is {}", self.config.name, packet.len(), self.config.max_packet_size);
            self.counters.packets_too_large_to_receive += 1;
            return None;
        }

        match packet.first() {
            Some(prefix) if prefix & 1 != 0 => self.on_fragment(packet),
            _ => {
                self.on_regular_packet(packet);
                None
            }
        }
    }

    fn on_regular_packet(&mut self, packet: &[u8]) {
        self.counters.packets_received += 1;

        let mut payload = packet;
        let header = match PacketHeader::deser(&mut payload) {
            Ok(header) => header,
            Err(e) => {
                error!("[{}] ignoring invalid packet: {}", self.config.name, e);
                self.counters.packets_invalid += 1;
                return;
            }
        };

        if !self.received_packets.test_insert(header.sequence) {
            debug!("[{}] ignoring stale packet {}", self.config.name, header.sequence);
            self.counters.packets_stale += 1;
            return;
        }

        debug!("[{}] processing packet {}", self.config.name, header.sequence);
        if !self.processor.process_packet(self.config.index, header.sequence, payload) {
            error!("[{}] processing packet {} failed", self.config.name, header.sequence);
            return;
        }
        trace!("[{}] processed packet {} successfully", self.config.name, header.sequence);

        if let Some(received_packet) = self.received_packets.insert(header.sequence) {
            *received_packet = ReceivedPacketData {
                time: self.time,
                packet_bytes: self.config.packet_header_size + packet.len(),
            };
        }

        // late fragments of this packet are stale now
        self.reassembler.advance(header.sequence);

        self.on_acks(header.ack, header.ack_bits);
    }

    fn on_acks(&mut self, ack: u16, ack_bits: u32) {
        for i in 0..32u16 {
            if ack_bits & (1u32 << i) == 0 {
                continue;
            }
            if self.acks.len() >= self.config.ack_buffer_size {
                break;
            }

            let ack_sequence = ack.wrapping_sub(i);
            let Some(sent_packet) = self.sent_packets.find_mut(ack_sequence) else {
                continue;
            };
            if sent_packet.acked {
                continue;
            }

            debug!("[{}] acked packet {}", self.config.name, ack_sequence);
            sent_packet.acked = true;
            self.acks.push(ack_sequence);
            self.counters.packets_acked += 1;

            let rtt_millis = ((self.time - sent_packet.time) * 1000.0) as f32;
            self.statistics.on_rtt_sample(rtt_millis, self.config.rtt_smoothing_factor);
        }
    }

    fn on_fragment(&mut self, packet: &[u8]) -> Option<Bytes> {
        let fragment = match Fragment::deser(packet, self.config.max_fragments, self.config.fragment_size) {
            Ok(fragment) => fragment,
            Err(e) => {
                error!("[{}] ignoring invalid fragment: {}", self.config.name, e);
                self.counters.fragments_invalid += 1;
                return None;
            }
        };

        let received_packets = &mut self.received_packets;
        match self.reassembler.on_fragment(&fragment, |sequence| received_packets.advance(sequence)) {
            ReassemblyOutcome::Invalid => {
                self.counters.fragments_invalid += 1;
                None
            }
            ReassemblyOutcome::Duplicate => None,
            ReassemblyOutcome::Incomplete => {
                self.counters.fragments_received += 1;
                None
            }
            ReassemblyOutcome::Complete(reassembled) => {
                self.counters.fragments_received += 1;
                Some(reassembled)
            }
        }
    }

    /// Sets the current time and recalculates link statistics
    pub fn update(&mut self, time: f64) {
        self.time = time;
        self.statistics.update(
            &self.sent_packets,
            &self.received_packets,
            self.config.packet_loss_smoothing_factor,
            self.config.bandwidth_smoothing_factor,
        );
    }

    /// Starts over with sequence number 0, forgetting all sent and received packets. Counters and
    ///  statistics are kept.
    pub fn reset(&mut self) {
        debug!("[{}] reset", self.config.name);

        self.acks.clear();
        self.sequence = 0;

        self.reassembler.reset();
        self.sent_packets.reset();
        self.received_packets.reset();
    }

    /// the sequence numbers of packets that were acked by the peer since the last call to
    ///  [Endpoint::clear_acks]
    pub fn acks(&self) -> &[u16] {
        &self.acks
    }

    pub fn clear_acks(&mut self) {
        self.acks.clear();
    }

    /// smoothed round trip time in milliseconds
    pub fn rtt(&self) -> f32 {
        self.statistics.rtt()
    }

    /// smoothed packet loss in percent
    pub fn packet_loss(&self) -> f32 {
        self.statistics.packet_loss()
    }

    pub fn bandwidth(&self) -> Bandwidth {
        self.statistics.bandwidth()
    }

    pub fn counters(&self) -> &EndpointCounters {
        &self.counters
    }
}
