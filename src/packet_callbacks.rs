#[cfg(test)] use mockall::automock;

/// The endpoint's way of putting packets on the wire. Implementations are expected to return
///  quickly and must not call back into the sending endpoint.
#[cfg_attr(test, automock)]
pub trait PacketTransmitter {
    fn transmit_packet(&mut self, index: usize, sequence: u16, packet: &[u8]);
}

impl <F> PacketTransmitter for F
where F: FnMut(usize, u16, &[u8])
{
    fn transmit_packet(&mut self, index: usize, sequence: u16, packet: &[u8]) {
        self(index, sequence, packet)
    }
}

/// Application logic for received packets. Returning `false` rejects the packet: it is not
///  acknowledged, so the peer's statistics treat it as lost.
#[cfg_attr(test, automock)]
pub trait PacketProcessor {
    fn process_packet(&mut self, index: usize, sequence: u16, packet: &[u8]) -> bool;
}

impl <F> PacketProcessor for F
where F: FnMut(usize, u16, &[u8]) -> bool
{
    fn process_packet(&mut self, index: usize, sequence: u16, packet: &[u8]) -> bool {
        self(index, sequence, packet)
    }
}
