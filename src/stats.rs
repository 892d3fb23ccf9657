//! Link quality estimates that are updated continuously from the endpoint's sequence buffers.
//!
//! All estimates sample the *older* half of a buffer's window only: packets in the newer half
//!  may still be in flight, and counting them would inflate packet loss.

use crate::buffers::sequence_buffer::SequenceBuffer;
use crate::safe_converter::{PrecheckedCast, SafeCast};

#[derive(Default, Debug, Clone)]
pub struct SentPacketData {
    pub time: f64,
    pub acked: bool,
    pub packet_bytes: usize,
}

#[derive(Default, Debug, Clone)]
pub struct ReceivedPacketData {
    pub time: f64,
    pub packet_bytes: usize,
}

/// in kilobits per second
#[derive(Default, Debug, Clone, Copy, PartialEq)]
pub struct Bandwidth {
    pub sent: f32,
    pub received: f32,
    pub acked: f32,
}

/// Exponential smoothing of an estimate. The estimate jumps to the sample if it was zero before
///  or if the two are (almost) equal.
pub fn smooth(estimate: f32, sample: f32, factor: f32) -> f32 {
    if (estimate == 0.0 && sample != 0.0) || (estimate - sample).abs() < 0.00001 {
        sample
    }
    else {
        estimate + (sample - estimate) * factor
    }
}

/// the entries for the older half of the buffer's window, `None` for missing entries
fn sample_window<T>(buffer: &SequenceBuffer<T>) -> impl Iterator<Item = Option<&T>> {
    let base_sequence = buffer.window_start();
    (0..buffer.capacity() / 2)
        .map(move |i: usize| buffer.find(base_sequence.wrapping_add(i.prechecked_cast())))
}

/// percentage of sampled sent packets that were not acked
pub fn packet_loss_sample(sent_packets: &SequenceBuffer<SentPacketData>) -> Option<f32> {
    let num_samples = sent_packets.capacity() / 2;
    if num_samples == 0 {
        return None;
    }

    let num_dropped = sample_window(sent_packets)
        .flatten()
        .filter(|p| !p.acked)
        .count();
    Some(num_dropped as f32 / num_samples as f32 * 100.0)
}

/// kilobits per second for `(time, bytes)` samples, `None` if there are no samples or they
///  do not span a period of time
pub fn bandwidth_sample(samples: impl Iterator<Item = (f64, usize)>) -> Option<f32> {
    let mut total_bytes: u64 = 0;
    let mut start_time = f64::MAX;
    let mut finish_time = f64::MIN;

    for (time, packet_bytes) in samples {
        let packet_bytes: u64 = packet_bytes.safe_cast();
        total_bytes += packet_bytes;
        start_time = start_time.min(time);
        finish_time = finish_time.max(time);
    }

    if finish_time <= start_time {
        return None;
    }
    Some((total_bytes as f64 / (finish_time - start_time) * 8.0 / 1000.0) as f32)
}

#[derive(Debug, Default)]
pub struct LinkStatistics {
    /// milliseconds
    rtt: f32,
    /// percent
    packet_loss: f32,
    bandwidth: Bandwidth,
}

impl LinkStatistics {
    pub fn rtt(&self) -> f32 {
        self.rtt
    }

    pub fn packet_loss(&self) -> f32 {
        self.packet_loss
    }

    pub fn bandwidth(&self) -> Bandwidth {
        self.bandwidth
    }

    pub fn on_rtt_sample(&mut self, rtt_millis: f32, smoothing_factor: f32) {
        self.rtt = smooth(self.rtt, rtt_millis, smoothing_factor);
    }

    pub fn update(
        &mut self,
        sent_packets: &SequenceBuffer<SentPacketData>,
        received_packets: &SequenceBuffer<ReceivedPacketData>,
        packet_loss_smoothing_factor: f32,
        bandwidth_smoothing_factor: f32,
    ) {
        if let Some(sample) = packet_loss_sample(sent_packets) {
            self.packet_loss = smooth(self.packet_loss, sample, packet_loss_smoothing_factor);
        }

        let sent = sample_window(sent_packets)
            .flatten()
            .map(|p| (p.time, p.packet_bytes));
        if let Some(sample) = bandwidth_sample(sent) {
            self.bandwidth.sent = smooth(self.bandwidth.sent, sample, bandwidth_smoothing_factor);
        }

        let received = sample_window(received_packets)
            .flatten()
            .map(|p| (p.time, p.packet_bytes));
        if let Some(sample) = bandwidth_sample(received) {
            self.bandwidth.received = smooth(self.bandwidth.received, sample, bandwidth_smoothing_factor);
        }

        let acked = sample_window(sent_packets)
            .flatten()
            .filter(|p| p.acked)
            .map(|p| (p.time, p.packet_bytes));
        if let Some(sample) = bandwidth_sample(acked) {
            self.bandwidth.acked = smooth(self.bandwidth.acked, sample, bandwidth_smoothing_factor);
        }
    }
}
