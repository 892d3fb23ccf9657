use clap::Parser;
use clap_derive::Parser;
use reliable::config::EndpointConfig;
use reliable::end_point::Endpoint;
use reliable::packet_callbacks::{PacketProcessor, PacketTransmitter};
use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use tracing::{info, Level};

/// Runs two endpoints against each other over a simulated link that loses every fifth packet,
///  logging counters and link statistics.
#[derive(Parser)]
struct Args {
    #[clap(short, long, default_value_t = 1000)]
    iterations: u32,

    /// seconds between ticks
    #[clap(long, default_value_t = 0.01)]
    delta_time: f64,

    #[clap(short, long, default_value_t = false)]
    verbose: bool,
}

type PacketQueue = Rc<RefCell<VecDeque<Vec<u8>>>>;

fn lossy_transmitter(queue: PacketQueue) -> impl FnMut(usize, u16, &[u8]) {
    move |_: usize, sequence: u16, packet: &[u8]| {
        if sequence % 5 != 0 {
            queue.borrow_mut().push_back(packet.to_vec());
        }
    }
}

fn deliver<T, P>(queue: &PacketQueue, endpoint: &mut Endpoint<T, P>)
where
    T: PacketTransmitter,
    P: PacketProcessor,
{
    loop {
        let next = queue.borrow_mut().pop_front();
        match next {
            Some(packet) => endpoint.receive_packet(&packet),
            None => break,
        }
    }
}

fn log_stats<T, P>(endpoint: &Endpoint<T, P>, iteration: u32)
where
    T: PacketTransmitter,
    P: PacketProcessor,
{
    let counters = endpoint.counters();
    let bandwidth = endpoint.bandwidth();
    info!(
        "[{}] #{}: sent {}, received {}, acked {} | rtt {:.1}ms, loss {:.1}%, bandwidth sent {:.1} / received {:.1} / acked {:.1} kbps",
        endpoint.config().name,
        iteration,
        counters.packets_sent,
        counters.packets_received,
        counters.packets_acked,
        endpoint.rtt(),
        endpoint.packet_loss(),
        bandwidth.sent,
        bandwidth.received,
        bandwidth.acked,
    );
}

pub fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let level = if args.verbose { Level::DEBUG } else { Level::INFO };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .try_init()
        .ok();

    let to_server = PacketQueue::default();
    let to_client = PacketQueue::default();

    let mut client = Endpoint::new(
        EndpointConfig::with_name("client"),
        0.0,
        lossy_transmitter(to_server.clone()),
        |_: usize, _: u16, _: &[u8]| true,
    )?;
    let mut server = Endpoint::new(
        EndpointConfig { index: 1, ..EndpointConfig::with_name("server") },
        0.0,
        lossy_transmitter(to_client.clone()),
        |_: usize, _: u16, _: &[u8]| true,
    )?;

    let mut time = 0.0;
    for i in 0..args.iterations {
        // a mix of small and fragmented packets
        let payload = vec![0u8; (i as usize * 389) % 3000];

        client.send_packet(&payload);
        server.send_packet(&payload);
        deliver(&to_server, &mut server);
        deliver(&to_client, &mut client);

        time += args.delta_time;
        client.update(time);
        server.update(time);
        client.clear_acks();
        server.clear_acks();

        log_stats(&client, i);
        log_stats(&server, i);
    }

    Ok(())
}
