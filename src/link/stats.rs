//! # Link Statistics
//!
//! Per-cycle bookkeeping of the link ([`Stats`]) and the rolling link
//! quality counters ([`LinkQualityTracker`]).

use heapless::Deque;

use crate::mbridge::commands::{RSSI_INVALID, SNR_INVALID};

use super::diversity::Antenna;

/// Received sequence number when nothing valid arrived
pub const SEQ_NO_INVALID: u8 = u8::MAX;

/// Link bookkeeping, owned by the scheduler
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stats {
    pub transmit_seq_no: u8,
    pub last_tx_antenna: Antenna,
    pub last_rx_antenna: Antenna,
    pub last_rx_rssi: [i8; 2],
    pub last_rx_snr: [i8; 2],
    /// Which antennas got a valid frame last cycle
    pub rx_valid: [bool; 2],
    pub fhss_curr_i: u8,

    // from the receiver's frame status
    pub received_seq_no_last: u8,
    pub received_ack_last: u8,
    pub received_antenna: u8,
    pub received_transmit_antenna: u8,
    pub received_rssi: i8,
    pub received_lq: u8,
    pub received_lq_serial_data: u8,

    pub bytes_transmitted: u32,
    pub bytes_received: u32,
    pub fresh_serial_data_transmitted: u32,
    pub fresh_serial_data_received: u32,

    /// Latched once per second
    pub bytes_per_sec_transmitted: u32,
    pub bytes_per_sec_received: u32,
}

impl Default for Stats {
    fn default() -> Self {
        Self {
            transmit_seq_no: 0,
            last_tx_antenna: Antenna::Antenna1,
            last_rx_antenna: Antenna::Antenna1,
            last_rx_rssi: [RSSI_INVALID; 2],
            last_rx_snr: [SNR_INVALID; 2],
            rx_valid: [false; 2],
            fhss_curr_i: 0,
            received_seq_no_last: SEQ_NO_INVALID,
            received_ack_last: 0,
            received_antenna: 0,
            received_transmit_antenna: 0,
            received_rssi: RSSI_INVALID,
            received_lq: 0,
            received_lq_serial_data: 0,
            bytes_transmitted: 0,
            bytes_received: 0,
            fresh_serial_data_transmitted: 0,
            fresh_serial_data_received: 0,
            bytes_per_sec_transmitted: 0,
            bytes_per_sec_received: 0,
        }
    }
}

impl Stats {
    /// Reset everything learned from the far end
    ///
    /// Sequence number and antenna bookkeeping keep running.
    pub fn clear(&mut self) {
        *self = Self {
            transmit_seq_no: self.transmit_seq_no,
            last_tx_antenna: self.last_tx_antenna,
            last_rx_antenna: self.last_rx_antenna,
            fhss_curr_i: self.fhss_curr_i,
            ..Self::default()
        };
    }

    /// RSSI of the antenna last received on
    pub fn last_rx_rssi(&self) -> i8 {
        self.last_rx_rssi[self.last_rx_antenna.index()]
    }

    pub fn last_rx_snr(&self) -> i8 {
        self.last_rx_snr[self.last_rx_antenna.index()]
    }

    /// Latch the byte counters into per second rates
    pub fn update_1hz(&mut self) {
        self.bytes_per_sec_transmitted = self.bytes_transmitted;
        self.bytes_per_sec_received = self.bytes_received;
        self.bytes_transmitted = 0;
        self.bytes_received = 0;
    }
}

/// Rolling link quality counters
#[cfg_attr(test, mockall::automock)]
pub trait LinkQualityTracker {
    /// A frame arrived this cycle, valid or not
    fn frame_received(&mut self);

    /// A valid frame arrived this cycle
    fn valid_frame_received(&mut self);

    /// Close the current cycle
    fn next(&mut self);

    /// Once per second
    fn update_1hz(&mut self);

    /// Valid frames received, percent
    fn lq(&self) -> u8;

    /// Frames with usable serial data received, percent
    fn lq_serial_data(&self) -> u8;

    /// Frames received at all, percent
    fn lq_frames_received(&self) -> u8;
}

/// Longest window in cycles, one second at 1 ms frames
pub const LQ_WINDOW_MAX: usize = 1000;

/// Link quality over a sliding window of cycles, published once per second
#[derive(Debug, Clone)]
pub struct WindowedLqTracker {
    window: Deque<(bool, bool), LQ_WINDOW_MAX>,
    window_len: usize,
    current: (bool, bool),
    lq: u8,
    lq_frames: u8,
}

impl WindowedLqTracker {
    /// # Arguments
    ///
    /// * `averaging_period_ms` - Length of the window
    /// * `frame_rate_ms` - Cycle period
    ///
    /// The window is capped at [`LQ_WINDOW_MAX`] cycles.
    pub fn new(averaging_period_ms: u16, frame_rate_ms: u16) -> Self {
        let window_len = ((averaging_period_ms / frame_rate_ms.max(1)).max(1) as usize)
            .min(LQ_WINDOW_MAX);
        Self {
            window: Deque::new(),
            window_len,
            current: (false, false),
            lq: 0,
            lq_frames: 0,
        }
    }

    fn percent(&self, count: usize) -> u8 {
        ((count * 100) / self.window_len).min(100) as u8
    }
}

impl LinkQualityTracker for WindowedLqTracker {
    fn frame_received(&mut self) {
        self.current.0 = true;
    }

    fn valid_frame_received(&mut self) {
        self.current.1 = true;
    }

    fn next(&mut self) {
        if self.window.len() == self.window_len {
            self.window.pop_front();
        }
        // room was made above
        let _ = self.window.push_back(self.current);
        self.current = (false, false);
    }

    fn update_1hz(&mut self) {
        let frames = self.window.iter().filter(|(received, _)| *received).count();
        let valid = self.window.iter().filter(|(_, valid)| *valid).count();
        self.lq_frames = self.percent(frames);
        self.lq = self.percent(valid);
    }

    fn lq(&self) -> u8 {
        self.lq
    }

    fn lq_serial_data(&self) -> u8 {
        self.lq
    }

    fn lq_frames_received(&self) -> u8 {
        self.lq_frames
    }
}
