use crate::config::EndpointConfig;
use crate::end_point::Endpoint;
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;

pub type BoxedTransmitter = Box<dyn FnMut(usize, u16, &[u8])>;
pub type BoxedProcessor = Box<dyn FnMut(usize, u16, &[u8]) -> bool>;
pub type TestEndpoint = Endpoint<BoxedTransmitter, BoxedProcessor>;

type PacketQueue = Rc<RefCell<VecDeque<Vec<u8>>>>;

pub fn accept_all() -> BoxedProcessor {
    Box::new(|_: usize, _: u16, _: &[u8]| true)
}

fn queueing_transmitter(queue: PacketQueue, drop_packets: Rc<Cell<bool>>) -> BoxedTransmitter {
    Box::new(move |_: usize, _: u16, packet: &[u8]| {
        if !drop_packets.get() {
            queue.borrow_mut().push_back(packet.to_vec());
        }
    })
}

/// Two endpoints connected by in-memory queues. Transmitted packets are buffered until
///  [LoopbackLink::deliver] is called, so an endpoint never calls into its peer while it is
///  sending.
pub struct LoopbackLink {
    pub sender: TestEndpoint,
    pub receiver: TestEndpoint,
    to_receiver: PacketQueue,
    to_sender: PacketQueue,
    /// packets transmitted while this is set are lost
    pub drop_packets: Rc<Cell<bool>>,
}

impl LoopbackLink {
    pub fn new(
        sender_config: EndpointConfig,
        receiver_config: EndpointConfig,
        time: f64,
        sender_processor: BoxedProcessor,
        receiver_processor: BoxedProcessor,
    ) -> LoopbackLink {
        let to_receiver = PacketQueue::default();
        let to_sender = PacketQueue::default();
        let drop_packets = Rc::new(Cell::new(false));

        let sender = Endpoint::new(
            sender_config,
            time,
            queueing_transmitter(to_receiver.clone(), drop_packets.clone()),
            sender_processor,
        ).unwrap();
        let receiver = Endpoint::new(
            receiver_config,
            time,
            queueing_transmitter(to_sender.clone(), drop_packets.clone()),
            receiver_processor,
        ).unwrap();

        LoopbackLink {
            sender,
            receiver,
            to_receiver,
            to_sender,
            drop_packets,
        }
    }

    pub fn with_defaults(time: f64) -> LoopbackLink {
        let config = |name: &str, index: usize| EndpointConfig {
            index,
            ..EndpointConfig::with_name(name)
        };
        LoopbackLink::new(config("sender", 0), config("receiver", 1), time, accept_all(), accept_all())
    }

    /// passes all buffered packets to their destination, including packets that are sent
    ///  while delivering
    pub fn deliver(&mut self) {
        loop {
            let next = self.to_receiver.borrow_mut().pop_front();
            if let Some(packet) = next {
                self.receiver.receive_packet(&packet);
                continue;
            }

            let next = self.to_sender.borrow_mut().pop_front();
            match next {
                Some(packet) => self.sender.receive_packet(&packet),
                None => break,
            }
        }
    }

    pub fn update(&mut self, time: f64) {
        self.sender.update(time);
        self.receiver.update(time);
    }
}
