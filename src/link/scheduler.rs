//! # Link Scheduler
//!
//! Per-cycle RF orchestration: hop, transmit, wait, receive, wait, and the
//! pre-transmit step that evaluates what was received.
//!
//! ## Cycle
//!
//! ```text
//! Transmit -> TransmitWait --TX done--> Receive -> ReceiveWait --RX done (all)--> ReceiveDone
//!                 |                                    |
//!                 +---------- timeout ----> Idle <-----+
//! ```
//!
//! The pre-transmit step runs every `frame_rate_ms` system ticks, whatever
//! state the cycle got to, and restarts it at `Transmit`.
//!
//! Nothing here blocks. [`LinkScheduler::poll`] is called from the main loop
//! as often as possible and [`LinkScheduler::tick_ms`] once per millisecond.

use std::sync::Arc;

use tracing::{debug, error, trace};

use crate::config::LinkConfig;
use crate::error::{Result, TxError};
use crate::mbridge::commands::{LinkStats, RSSI_INVALID, SNR_INVALID};
use crate::mbridge::protocol::{RcData, RC_CHANNEL_VALUE_CENTER, RC_NUM_CHANNELS};

use super::connection::{ConnectState, ConnectionSupervisor};
use super::diversity::{Antenna, AntennaConfig, AntennaOutcome, DiversitySelector};
use super::fhss::{Fhss, FrequencyHopper};
use super::frame::{
    CheckError, FrameBuf, FrameCodec, FrameStats, RxFrame, FRAME_TX_PAYLOAD_LEN, FRAME_TX_RX_LEN,
};
use super::radio::{IrqMailbox, Radio, IRQ_RX_DONE, IRQ_RX_TX_TIMEOUT, IRQ_TX_DONE};
use super::stats::{LinkQualityTracker, Stats, SEQ_NO_INVALID};
use super::tunnel::SerialTunnel;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Idle,
    Transmit,
    TransmitWait,
    Receive,
    ReceiveWait,
    ReceiveDone,
}

/// A radio together with the mailbox its DIO interrupt posts to
pub struct RadioPort<R> {
    pub radio: R,
    pub irq: Arc<IrqMailbox>,
}

impl<R> RadioPort<R> {
    pub fn new(radio: R, irq: Arc<IrqMailbox>) -> Self {
        Self { radio, irq }
    }
}

/// Per-antenna receive state of the current cycle
#[derive(Debug, Clone, Default)]
struct RxSlot {
    outcome: AntennaOutcome,
    reported: bool,
    frame: Option<RxFrame>,
}

/// Countdown that reaches zero once every `period` calls
fn dec_cyclic(cnt: &mut u16, period: u16) -> bool {
    if *cnt == 0 {
        *cnt = period.max(1);
    }
    *cnt -= 1;
    *cnt == 0
}

/// RF link state machine
pub struct LinkScheduler<R: Radio, C: FrameCodec> {
    link_state: LinkState,
    radios: [Option<RadioPort<R>>; 2],
    rx: [RxSlot; 2],
    codec: C,
    fhss: Fhss,
    diversity: DiversitySelector,
    connection: ConnectionSupervisor,
    stats: Stats,
    tracker: Box<dyn LinkQualityTracker>,
    rc_data: RcData,

    frame_rate_ms: u16,
    frame_rate_hz: u16,
    send_frame_tmo_ms: u16,
    tx_tick: u16,
    tick_1hz_commensurate: u16,
    do_pre_transmit: bool,
}

impl<R: Radio, C: FrameCodec> LinkScheduler<R, C> {
    /// Create the scheduler
    ///
    /// # Arguments
    ///
    /// * `config` - Link timing and antenna setup
    /// * `codec` - Frame codec
    /// * `tracker` - Link quality counters
    /// * `radio1` / `radio2` - Radios on antenna 1 and 2
    ///
    /// # Errors
    ///
    /// Returns error if a radio required by the antenna setup is missing
    pub fn new(
        config: &LinkConfig,
        codec: C,
        tracker: Box<dyn LinkQualityTracker>,
        radio1: Option<RadioPort<R>>,
        radio2: Option<RadioPort<R>>,
    ) -> Result<Self> {
        let radios = [radio1, radio2];
        for antenna in config.antenna.antennas() {
            if radios[antenna.index()].is_none() {
                return Err(TxError::Radio(format!(
                    "{:?} configured but no radio attached",
                    antenna
                )));
            }
        }

        let mut fhss = Fhss::new(config.fhss_num, config.fhss_seed);
        fhss.start_tx();

        let mut scheduler = Self {
            link_state: LinkState::Idle,
            radios,
            rx: Default::default(),
            codec,
            fhss,
            diversity: DiversitySelector::new(config.antenna),
            connection: ConnectionSupervisor::new(config.connect_sync_cnt, config.connect_tmo_ms),
            stats: Stats::default(),
            tracker,
            rc_data: [RC_CHANNEL_VALUE_CENTER; RC_NUM_CHANNELS],
            frame_rate_ms: config.frame_rate_ms,
            frame_rate_hz: (1000 / config.frame_rate_ms.max(1)).max(1),
            send_frame_tmo_ms: config.send_frame_tmo_ms,
            tx_tick: 0,
            tick_1hz_commensurate: 0,
            do_pre_transmit: false,
        };

        let freq = scheduler.fhss.curr_freq();
        for port in scheduler.radios.iter_mut().flatten() {
            port.radio.set_rf_frequency(freq);
        }
        if let AntennaConfig::Antenna2 = config.antenna {
            scheduler.stats.last_rx_antenna = Antenna::Antenna2;
            scheduler.stats.last_tx_antenna = Antenna::Antenna2;
        }

        Ok(scheduler)
    }

    pub fn link_state(&self) -> LinkState {
        self.link_state
    }

    pub fn connect_state(&self) -> ConnectState {
        self.connection.state()
    }

    pub fn connected(&self) -> bool {
        self.connection.connected()
    }

    pub fn stats(&self) -> &Stats {
        &self.stats
    }

    pub fn fhss(&self) -> &Fhss {
        &self.fhss
    }

    pub fn radio(&self, antenna: Antenna) -> Option<&R> {
        self.radios[antenna.index()].as_ref().map(|p| &p.radio)
    }

    pub fn radio_mut(&mut self, antenna: Antenna) -> Option<&mut R> {
        self.radios[antenna.index()].as_mut().map(|p| &mut p.radio)
    }

    /// Channels for the next frames
    pub fn set_rc_data(&mut self, rc: RcData) {
        self.rc_data = rc;
    }

    /// 1 ms system tick
    pub fn tick_ms(&mut self) {
        self.connection.tick_ms();

        if dec_cyclic(&mut self.tx_tick, self.frame_rate_ms) {
            self.do_pre_transmit = true;
        }
    }

    /// One main-loop pass
    ///
    /// # Arguments
    ///
    /// * `tunnel` - Serial backend carried over the link, if any
    ///
    /// # Errors
    ///
    /// Returns error on link logic faults: a received frame with a foreign
    /// sync word, or a radio completion the cycle did not ask for. Both
    /// mean the setup is broken and the link must not continue.
    pub fn poll(&mut self, mut tunnel: Option<&mut (dyn SerialTunnel + '_)>) -> Result<()> {
        match self.link_state {
            LinkState::Transmit => {
                self.fhss.hop_to_next();
                let freq = self.fhss.curr_freq();
                for port in self.radios.iter_mut().flatten() {
                    port.radio.set_rf_frequency(freq);
                    port.irq.clear();
                }
                let antenna = self.tx_antenna();
                self.do_transmit(antenna, tunnel.as_deref_mut());
                self.link_state = LinkState::TransmitWait;
            }
            LinkState::Receive => {
                for antenna in self.diversity.config().antennas() {
                    if let Some(port) = self.radios[antenna.index()].as_mut() {
                        port.irq.clear();
                        port.radio.set_to_rx();
                    }
                }
                self.link_state = LinkState::ReceiveWait;
            }
            LinkState::Idle
            | LinkState::TransmitWait
            | LinkState::ReceiveWait
            | LinkState::ReceiveDone => {}
        }

        for antenna in self.diversity.config().antennas() {
            self.handle_irq(antenna)?;
        }

        if self.do_pre_transmit {
            self.do_pre_transmit = false;
            self.pre_transmit(tunnel);
        }

        Ok(())
    }

    /// Antenna to transmit on: the last one received on in diversity mode
    fn tx_antenna(&self) -> Antenna {
        match self.diversity.config() {
            AntennaConfig::Antenna1 => Antenna::Antenna1,
            AntennaConfig::Antenna2 => Antenna::Antenna2,
            AntennaConfig::Diversity => self.stats.last_rx_antenna,
        }
    }

    fn handle_irq(&mut self, antenna: Antenna) -> Result<()> {
        let mut status = match self.radios[antenna.index()].as_ref() {
            Some(port) => port.irq.take(),
            None => return Ok(()),
        };
        if status == 0 {
            return Ok(());
        }

        match self.link_state {
            LinkState::TransmitWait if status & IRQ_TX_DONE != 0 => {
                status &= !IRQ_TX_DONE;
                self.link_state = LinkState::Receive;
                trace!("TX done on {:?}", antenna);
            }
            LinkState::ReceiveWait if status & IRQ_RX_DONE != 0 => {
                status &= !IRQ_RX_DONE;
                let outcome = self.do_receive(antenna)?;
                let slot = &mut self.rx[antenna.index()];
                slot.outcome = outcome;
                slot.reported = true;
                trace!("RX done on {:?}: {:?}", antenna, outcome);

                let all_reported = self
                    .diversity
                    .config()
                    .antennas()
                    .all(|a| self.rx[a.index()].reported);
                if all_reported {
                    self.link_state = LinkState::ReceiveDone;
                }
            }
            _ => {}
        }

        if status & IRQ_RX_TX_TIMEOUT != 0 {
            status &= !IRQ_RX_TX_TIMEOUT;
            debug!("Radio timeout on {:?} in {:?}", antenna, self.link_state);
            self.link_state = LinkState::Idle;
            for slot in self.rx.iter_mut() {
                slot.outcome = AntennaOutcome::None;
            }
        }

        if status & (IRQ_RX_DONE | IRQ_TX_DONE) != 0 {
            error!(
                "Unexpected radio IRQ 0x{:04X} on {:?} in {:?}",
                status, antenna, self.link_state
            );
            return Err(TxError::UnexpectedIrq { antenna, status });
        }

        Ok(())
    }

    fn do_transmit(&mut self, antenna: Antenna, tunnel: Option<&mut (dyn SerialTunnel + '_)>) {
        self.stats.transmit_seq_no = self.stats.transmit_seq_no.wrapping_add(1);

        let mut payload = [0u8; FRAME_TX_PAYLOAD_LEN];
        let mut payload_len = 0;

        if self.connected() {
            if let Some(tunnel) = tunnel {
                while payload_len < FRAME_TX_PAYLOAD_LEN {
                    match tunnel.getc() {
                        Some(c) => {
                            payload[payload_len] = c;
                            payload_len += 1;
                        }
                        None => break,
                    }
                }
            }
            self.stats.bytes_transmitted += payload_len as u32;
            self.stats.fresh_serial_data_transmitted += 1;
        } else if let Some(tunnel) = tunnel {
            tunnel.flush();
        }

        self.stats.last_tx_antenna = antenna;

        let frame_stats = FrameStats {
            seq_no: self.stats.transmit_seq_no,
            ack: 1,
            antenna: self.stats.last_rx_antenna.as_u8(),
            transmit_antenna: antenna.as_u8(),
            rssi: self.stats.last_rx_rssi(),
            lq: self.tracker.lq(),
            lq_serial_data: self.tracker.lq_serial_data(),
        };
        let frame = self
            .codec
            .pack_tx_frame(&frame_stats, &self.rc_data, &payload[..payload_len]);

        if let Some(port) = self.radios[antenna.index()].as_mut() {
            port.radio.send_frame(&frame, self.send_frame_tmo_ms);
        }
    }

    fn do_receive(&mut self, antenna: Antenna) -> Result<AntennaOutcome> {
        let Some(port) = self.radios[antenna.index()].as_mut() else {
            return Ok(AntennaOutcome::None);
        };

        let mut raw: FrameBuf = [0; FRAME_TX_RX_LEN];
        port.radio.read_frame(&mut raw);

        let outcome = match self.codec.check_rx_frame(&raw) {
            Ok(frame) => {
                self.rx[antenna.index()].frame = Some(frame);
                AntennaOutcome::Valid
            }
            Err(CheckError::SyncWord) => {
                error!("Frame with foreign sync word on {:?}", antenna);
                return Err(TxError::SyncWord(antenna));
            }
            Err(e) => {
                debug!("Invalid frame on {:?}: {}", antenna, e);
                AntennaOutcome::Invalid
            }
        };

        // also wanted for bad frames
        let (rssi, snr) = port.radio.packet_status();
        self.stats.last_rx_rssi[antenna.index()] = rssi;
        self.stats.last_rx_snr[antenna.index()] = snr;

        Ok(outcome)
    }

    /// Evaluate the cycle and start the next one
    fn pre_transmit(&mut self, tunnel: Option<&mut (dyn SerialTunnel + '_)>) {
        let outcomes = [self.rx[0].outcome, self.rx[1].outcome];
        let selection = self.diversity.select(outcomes, self.stats.last_rx_rssi);

        match selection.antenna {
            Some(antenna) => self.handle_receive(antenna, tunnel),
            None => self.handle_receive_none(),
        }

        self.stats.fhss_curr_i = self.fhss.curr_i();
        self.stats.rx_valid = outcomes.map(|o| o == AntennaOutcome::Valid);

        self.connection.update(selection.valid_frame_received);

        self.link_state = LinkState::Transmit;
        self.rx = Default::default();

        if dec_cyclic(&mut self.tick_1hz_commensurate, self.frame_rate_hz) {
            self.tracker.update_1hz();
            self.stats.update_1hz();
        }

        if !self.connected() {
            self.stats.clear();
        }
        self.tracker.next();
    }

    fn handle_receive(&mut self, antenna: Antenna, tunnel: Option<&mut (dyn SerialTunnel + '_)>) {
        let slot = &mut self.rx[antenna.index()];

        match (slot.outcome, slot.frame.take()) {
            (AntennaOutcome::Valid, Some(frame)) => {
                let status = frame.status;
                self.stats.received_antenna = status.antenna;
                self.stats.received_transmit_antenna = status.transmit_antenna;
                self.stats.received_rssi = status.rssi;
                self.stats.received_lq = status.lq;
                self.stats.received_lq_serial_data = status.lq_serial_data;

                if let Some(tunnel) = tunnel {
                    for &c in frame.payload() {
                        tunnel.putc(c);
                    }
                }
                self.stats.bytes_received += frame.payload().len() as u32;
                self.stats.fresh_serial_data_received += 1;

                self.tracker.valid_frame_received();

                self.stats.received_seq_no_last = status.seq_no;
                self.stats.received_ack_last = status.ack;
            }
            _ => {
                self.stats.received_seq_no_last = SEQ_NO_INVALID;
                self.stats.received_ack_last = 0;
            }
        }

        self.stats.last_rx_antenna = antenna;
        self.tracker.frame_received();
    }

    fn handle_receive_none(&mut self) {
        self.stats.received_seq_no_last = SEQ_NO_INVALID;
        self.stats.received_ack_last = 0;
    }

    /// Link statistics for the MBridge TX_LINK_STATS push
    pub fn link_stats(&self) -> LinkStats {
        let max_bytes_per_sec = (FRAME_TX_PAYLOAD_LEN as u32 * self.frame_rate_hz as u32).max(1);
        let usage = |bps: u32| ((bps * 100) / max_bytes_per_sec).min(u8::MAX as u32) as u8;

        LinkStats {
            lq: self.tracker.lq(),
            rssi1_instantaneous: self.stats.last_rx_rssi[0],
            rssi2_instantaneous: self.stats.last_rx_rssi[1],
            snr_instantaneous: self.stats.last_rx_snr(),
            receive_antenna: self.stats.last_rx_antenna.as_u8(),
            transmit_antenna: self.stats.last_tx_antenna.as_u8(),
            diversity: self.diversity.config() == AntennaConfig::Diversity,
            rx1_valid: self.stats.rx_valid[0],
            rx2_valid: self.stats.rx_valid[1],
            rssi1_filtered: RSSI_INVALID,
            rssi2_filtered: RSSI_INVALID,
            snr_filtered: SNR_INVALID,
            receiver_lq: self.stats.received_lq,
            receiver_lq_serial: self.stats.received_lq_serial_data,
            receiver_rssi_instantaneous: self.stats.received_rssi,
            receiver_receive_antenna: self.stats.received_antenna,
            receiver_transmit_antenna: self.stats.received_transmit_antenna,
            receiver_diversity: false,
            receiver_rssi_filtered: RSSI_INVALID,
            lq_fresh_serial_packets_transmitted: self.tracker.lq_serial_data(),
            bytes_per_sec_transmitted: usage(self.stats.bytes_per_sec_transmitted),
            lq_valid_received: self.tracker.lq(),
            lq_fresh_serial_packets_received: self.tracker.lq_serial_data(),
            bytes_per_sec_received: usage(self.stats.bytes_per_sec_received),
            lq_received: self.tracker.lq_frames_received(),
            fhss_curr_i: self.stats.fhss_curr_i,
            fhss_cnt: self.fhss.cnt(),
            // no MAVLink vehicle state here
            vehicle_state: 3,
        }
    }
}
