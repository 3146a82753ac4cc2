use anyhow::Result;
use crossbeam::channel;
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use um_lat::{
    flight::FlightTracker,
    histogram::Histogram,
    metrics::ReceiveStats,
    pacer::{Pacer, SendPlan, SendScheduler},
    ping::PingReceiver,
    pong::PongReflector,
    transport::{TransportSend, UdpConfig, UdpTransport},
    MonotonicClock,
};

fn udp(bind: &str, dest: SocketAddr) -> Result<UdpTransport> {
    Ok(UdpTransport::open(&UdpConfig {
        bind: bind.parse()?,
        dest,
        interface: None,
        join_group: None,
        multicast_ttl: 1,
    })?)
}

/// Ping and pong wired together over localhost UDP sockets.
#[test]
fn udp_ping_pong_round_trip() -> Result<()> {
    let clock = MonotonicClock::new();
    let placeholder: SocketAddr = "127.0.0.1:9".parse()?;

    // Ping's receive socket, so pong knows where to echo.
    let ping_rcv = udp("127.0.0.1:0", placeholder)?;
    let ping_rcv_addr = ping_rcv.local_addr()?;

    // Pong receives on its own socket and echoes from a second one.
    let pong_rcv = udp("127.0.0.1:0", placeholder)?;
    let pong_addr = pong_rcv.local_addr()?;
    let pong_send = udp("127.0.0.1:0", ping_rcv_addr)?.into_sender();

    let (notify_tx, _notify_rx) = channel::unbounded();
    let (_, pong_receiver) = pong_rcv.split()?;
    let pong_handle = pong_receiver.spawn(
        PongReflector::new(
            pong_send,
            Arc::new(ReceiveStats::new()),
            notify_tx,
            Box::new(std::io::sink()),
        ),
        clock,
    )?;

    let histogram = Arc::new(Mutex::new(Histogram::new(10_000, 1000)?));
    let flight = Arc::new(FlightTracker::new());
    let stats = Arc::new(ReceiveStats::new());
    let (_, ping_receiver) = ping_rcv.split()?;
    let ping_handle = ping_receiver.spawn(
        PingReceiver::new(
            Arc::clone(&histogram),
            Arc::clone(&flight),
            Arc::clone(&stats),
            Box::new(std::io::sink()),
        ),
        clock,
    )?;

    let mut ping_send = udp("127.0.0.1:0", pong_addr)?.into_sender();
    let mut pacer = Pacer::new(clock, Arc::clone(&flight), 64)?;
    let sent = pacer.run(
        &mut ping_send,
        SendPlan {
            count: 200,
            rate: 2000,
            timestamp: true,
        },
    )?;
    assert_eq!(sent, 200);

    // Localhost UDP can still drop under load; wait for echoes to settle.
    for _ in 0..40 {
        if flight.outstanding() == 0 {
            break;
        }
        std::thread::sleep(Duration::from_millis(50));
    }
    ping_send.close()?;

    ping_handle.shutdown()?;
    pong_handle.shutdown()?;

    let received = stats.snapshot().num_rcv_msgs;
    assert!(received > 0, "no echoes received");
    assert_eq!(histogram.lock().sample_count(), received);
    assert_eq!(flight.outstanding(), 200 - received as i64);
    assert!(histogram.lock().summary().min_ns.is_some());
    Ok(())
}

/// Two reflectors answering the same send must not unbalance the flight size.
#[test]
fn udp_duplicate_echoes_are_ignored() -> Result<()> {
    use um_lat::clock::Clock;
    use um_lat::message::{self, PerfHeader, FLAG_TIMESTAMP};

    let clock = MonotonicClock::new();
    let placeholder: SocketAddr = "127.0.0.1:9".parse()?;

    let ping_rcv = udp("127.0.0.1:0", placeholder)?;
    let ping_rcv_addr = ping_rcv.local_addr()?;

    let histogram = Arc::new(Mutex::new(Histogram::new(1000, 1000)?));
    let flight = Arc::new(FlightTracker::new());
    let stats = Arc::new(ReceiveStats::new());
    let (_, ping_receiver) = ping_rcv.split()?;
    let handle = ping_receiver.spawn(
        PingReceiver::new(
            Arc::clone(&histogram),
            Arc::clone(&flight),
            Arc::clone(&stats),
            Box::new(std::io::sink()),
        ),
        clock,
    )?;

    let mut echo = vec![0u8; 32];
    PerfHeader {
        msg_num: flight.next_msg_num(),
        send_ts_ns: 0,
        flags: FLAG_TIMESTAMP,
    }
    .encode_into(&mut echo)?;
    flight.sent();
    message::stamp_send_ts(&mut echo, clock.now_ns());

    let mut first = udp("127.0.0.1:0", ping_rcv_addr)?.into_sender();
    let mut second = udp("127.0.0.1:0", ping_rcv_addr)?.into_sender();
    first.send(&echo)?;
    second.send(&echo)?;

    for _ in 0..40 {
        if stats.snapshot().num_ignored_echoes > 0 {
            break;
        }
        std::thread::sleep(Duration::from_millis(25));
    }
    handle.shutdown()?;

    let counts = stats.snapshot();
    assert_eq!(counts.num_rcv_msgs, 1);
    assert_eq!(counts.num_ignored_echoes, 1);
    assert_eq!(flight.outstanding(), 0);
    assert_eq!(histogram.lock().sample_count(), 1);
    Ok(())
}
