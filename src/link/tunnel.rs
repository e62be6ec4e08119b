//! # Serial Tunnel
//!
//! Serial stream carried over the RF link. Which backend feeds it (the
//! MBridge or a separate serial port) is chosen by configuration.

use heapless::Deque;

use crate::mbridge::MBridgeFramer;

/// Serial backend as seen by the link
///
/// `getc` yields bytes to send to the receiver, `putc` takes bytes that
/// came from the receiver.
#[cfg_attr(test, mockall::automock)]
pub trait SerialTunnel {
    fn available(&self) -> bool;

    fn getc(&mut self) -> Option<u8>;

    fn putc(&mut self, c: u8);

    /// Drop everything waiting to be sent over the link
    fn flush(&mut self);
}

impl SerialTunnel for MBridgeFramer {
    fn available(&self) -> bool {
        MBridgeFramer::available(self)
    }

    fn getc(&mut self) -> Option<u8> {
        MBridgeFramer::getc(self)
    }

    fn putc(&mut self, c: u8) {
        MBridgeFramer::putc(self, c)
    }

    fn flush(&mut self) {
        MBridgeFramer::flush(self)
    }
}

/// Bounded byte FIFOs of `N` bytes each, for a serial port bridged by the
/// host runner
#[derive(Debug, Clone)]
pub struct FifoTunnel<const N: usize> {
    /// Host port -> link
    inbound: Deque<u8, N>,
    /// Link -> host port
    outbound: Deque<u8, N>,
}

impl<const N: usize> FifoTunnel<N> {
    pub fn new() -> Self {
        Self {
            inbound: Deque::new(),
            outbound: Deque::new(),
        }
    }

    /// Bytes read from the host port; excess beyond capacity is dropped
    pub fn push_inbound(&mut self, data: &[u8]) {
        for &c in data {
            if self.inbound.push_back(c).is_err() {
                break;
            }
        }
    }

    /// Bytes to write to the host port
    pub fn drain_outbound(&mut self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.outbound.len());
        while let Some(c) = self.outbound.pop_front() {
            out.push(c);
        }
        out
    }
}

impl<const N: usize> Default for FifoTunnel<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> SerialTunnel for FifoTunnel<N> {
    fn available(&self) -> bool {
        !self.inbound.is_empty()
    }

    fn getc(&mut self) -> Option<u8> {
        self.inbound.pop_front()
    }

    fn putc(&mut self, c: u8) {
        // full means the host port is not keeping up, drop
        let _ = self.outbound.push_back(c);
    }

    fn flush(&mut self) {
        self.inbound.clear();
    }
}
