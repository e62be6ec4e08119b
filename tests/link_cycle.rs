//! End-to-end link cycles over the loopback simulation

use std::sync::Arc;

use mlrs_tx::config::LinkConfig;
use mlrs_tx::link::sim::{lock_air, SharedAir, SimAir, SimFrameCodec, SimRadio};
use mlrs_tx::link::{
    Antenna, AntennaConfig, ConnectState, FifoTunnel, IrqMailbox, LinkScheduler, RadioPort,
    SerialTunnel, WindowedLqTracker,
};
use mlrs_tx::mbridge::protocol::{MBRIDGE_STX1, MBRIDGE_STX2};
use mlrs_tx::mbridge::MBridgeFramer;

const SYNC_WORD: u16 = 0x4D4C;

struct Bench {
    sched: LinkScheduler<SimRadio, SimFrameCodec>,
    air: SharedAir,
}

fn bench(antenna: AntennaConfig) -> Bench {
    let config = LinkConfig {
        frame_rate_ms: 2,
        connect_sync_cnt: 2,
        connect_tmo_ms: 10,
        send_frame_tmo_ms: 1,
        lq_averaging_period_ms: 20,
        frame_sync_word: SYNC_WORD,
        fhss_num: 12,
        fhss_seed: 42,
        antenna,
    };
    let air = SimAir::shared(SYNC_WORD);
    let port = |antenna: Antenna| {
        let irq = Arc::new(IrqMailbox::new());
        Some(RadioPort::new(SimRadio::new(antenna, air.clone(), irq.clone()), irq))
    };
    let sched = LinkScheduler::new(
        &config,
        SimFrameCodec::new(SYNC_WORD),
        Box::new(WindowedLqTracker::new(20, 2)),
        port(Antenna::Antenna1),
        port(Antenna::Antenna2),
    )
    .unwrap();
    Bench { sched, air }
}

/// Run `ms` system ticks with a few main-loop passes each
fn run_ms<T: SerialTunnel>(b: &mut Bench, ms: u32, tunnel: &mut T) {
    for _ in 0..ms {
        b.sched.tick_ms();
        for _ in 0..4 {
            b.sched.poll(Some(&mut *tunnel)).unwrap();
        }
    }
}

#[test]
fn test_connects_over_sim() {
    let mut b = bench(AntennaConfig::Antenna1);
    let mut tunnel = FifoTunnel::<256>::new();

    run_ms(&mut b, 20, &mut tunnel);
    assert_eq!(b.sched.connect_state(), ConnectState::Connected);
    assert!(lock_air(&b.air).frames_heard() >= 5);
    assert_eq!(b.sched.stats().received_lq, 100);
}

#[test]
fn test_tunnel_echo() {
    let mut b = bench(AntennaConfig::Antenna1);
    let mut tunnel = FifoTunnel::<256>::new();
    run_ms(&mut b, 20, &mut tunnel);
    assert!(b.sched.connected());

    tunnel.push_inbound(b"hello mlrs");
    run_ms(&mut b, 4, &mut tunnel);

    assert_eq!(tunnel.drain_outbound(), b"hello mlrs".to_vec());
    let heard = lock_air(&b.air).last_heard().cloned();
    assert!(heard.is_some());
}

#[test]
fn test_large_write_spans_frames() {
    let mut b = bench(AntennaConfig::Antenna1);
    let mut tunnel = FifoTunnel::<512>::new();
    run_ms(&mut b, 20, &mut tunnel);

    let data: Vec<u8> = (0..200u32).map(|i| i as u8).collect();
    tunnel.push_inbound(&data);
    run_ms(&mut b, 20, &mut tunnel);

    assert_eq!(tunnel.drain_outbound(), data);
}

#[test]
fn test_link_loss_drops_connection() {
    let mut b = bench(AntennaConfig::Antenna1);
    let mut tunnel = FifoTunnel::<256>::new();
    run_ms(&mut b, 20, &mut tunnel);
    assert!(b.sched.connected());

    lock_air(&b.air).set_link_up(false);
    run_ms(&mut b, 6, &mut tunnel);
    assert!(b.sched.connected(), "fade shorter than the timeout");

    run_ms(&mut b, 10, &mut tunnel);
    assert_eq!(b.sched.connect_state(), ConnectState::Listen);
    assert_eq!(b.sched.stats().received_lq, 0);

    lock_air(&b.air).set_link_up(true);
    run_ms(&mut b, 20, &mut tunnel);
    assert!(b.sched.connected());
}

#[test]
fn test_diversity_switches_to_working_antenna() {
    let mut b = bench(AntennaConfig::Diversity);
    let mut tunnel = FifoTunnel::<256>::new();
    {
        let mut air = lock_air(&b.air);
        air.antenna_mut(Antenna::Antenna1).rssi = -90;
        air.antenna_mut(Antenna::Antenna2).rssi = -50;
    }
    run_ms(&mut b, 20, &mut tunnel);
    assert!(b.sched.connected());
    assert_eq!(b.sched.stats().last_rx_antenna, Antenna::Antenna2);
    assert_eq!(b.sched.stats().last_tx_antenna, Antenna::Antenna2);

    // stronger antenna now garbles, the weaker one carries the link
    lock_air(&b.air).antenna_mut(Antenna::Antenna2).corrupt = true;
    run_ms(&mut b, 20, &mut tunnel);
    assert!(b.sched.connected());
    assert_eq!(b.sched.stats().last_rx_antenna, Antenna::Antenna1);
    assert_eq!(b.sched.stats().rx_valid, [true, false]);

    let ls = b.sched.link_stats();
    assert!(ls.diversity);
    assert_eq!(ls.receive_antenna, 0);
}

#[test]
fn test_mbridge_serial_round_trip() {
    let mut b = bench(AntennaConfig::Antenna1);
    let mut framer = MBridgeFramer::new();
    run_ms(&mut b, 20, &mut framer);
    assert!(b.sched.connected());

    // radio sends serial bytes, the module has nothing to answer yet
    let mut t = 0u16;
    let mut response = None;
    for &c in &[MBRIDGE_STX1, MBRIDGE_STX2, 3, b'a', b'b', b'c'] {
        response = framer.uart_rx_callback(c, t).map(<[u8]>::to_vec);
        t = t.wrapping_add(20);
    }
    assert!(response.is_none());

    run_ms(&mut b, 4, &mut framer);

    // echoed bytes go back to the radio on its next poll
    let mut response = None;
    for &c in &[MBRIDGE_STX1, MBRIDGE_STX2, 0] {
        t = t.wrapping_add(20);
        response = framer.uart_rx_callback(c, t).map(<[u8]>::to_vec);
    }
    assert_eq!(response, Some(vec![0x00, b'a', b'b', b'c']));
    framer.on_transmit_complete();
}
