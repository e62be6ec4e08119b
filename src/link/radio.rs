//! # Radio Interface
//!
//! Narrow view of the SX12xx driver used by the link scheduler, plus the
//! single-slot mailbox that hands the radio's IRQ status from the DIO
//! interrupt to the main loop.

use std::sync::atomic::{AtomicU16, Ordering};

/// IRQ status bits reported by the radio
pub const IRQ_TX_DONE: u16 = 0x0001;
pub const IRQ_RX_DONE: u16 = 0x0002;
pub const IRQ_RX_TX_TIMEOUT: u16 = 0x4000;

/// Operations the link needs from a radio
pub trait Radio {
    /// Tune to `freq_hz`
    fn set_rf_frequency(&mut self, freq_hz: u32);

    /// Start transmitting `frame`; TX done or timeout is signalled via IRQ
    fn send_frame(&mut self, frame: &[u8], tmo_ms: u16);

    /// Arm single receive; RX done is signalled via IRQ
    fn set_to_rx(&mut self);

    /// Copy the last received frame into `buf`
    fn read_frame(&mut self, buf: &mut [u8]);

    /// RSSI and SNR of the last received packet
    fn packet_status(&mut self) -> (i8, i8);
}

/// IRQ status hand-off between the DIO interrupt and the main loop
///
/// The interrupt stores the status word; the main loop takes it, which
/// clears the slot.
#[derive(Debug, Default)]
pub struct IrqMailbox {
    status: AtomicU16,
}

impl IrqMailbox {
    pub const fn new() -> Self {
        Self {
            status: AtomicU16::new(0),
        }
    }

    /// Interrupt side: store a status word as is
    pub fn post(&self, status: u16) {
        self.status.store(status, Ordering::Release);
    }

    /// Interrupt side: store a status word, dropping frames not meant for us
    ///
    /// On RX done the first two bytes of the radio buffer are compared with
    /// the link's frame sync word. `read_sync_word` is only called then.
    pub fn post_irq<F>(&self, status: u16, read_sync_word: F, frame_sync_word: u16)
    where
        F: FnOnce() -> u16,
    {
        let status = if status & IRQ_RX_DONE != 0 && read_sync_word() != frame_sync_word {
            0
        } else {
            status
        };
        self.post(status);
    }

    /// Main loop side: consume the pending status, zero if none
    pub fn take(&self) -> u16 {
        self.status.swap(0, Ordering::AcqRel)
    }

    pub fn clear(&self) {
        self.status.store(0, Ordering::Release);
    }

    pub fn is_pending(&self) -> bool {
        self.status.load(Ordering::Acquire) != 0
    }
}
