//! # RF Frames
//!
//! Interface to the over-the-air frame codec. The frame layout itself is
//! owned by the codec; the link only hands it statistics, channels and
//! payload, and gets back a classified received frame.

use thiserror::Error;

use crate::mbridge::protocol::RcData;

/// Length of a frame on air, both directions
pub const FRAME_TX_RX_LEN: usize = 91;

/// Serial payload carried by a transmitter frame
pub const FRAME_TX_PAYLOAD_LEN: usize = 64;

/// Serial payload carried by a receiver frame
pub const FRAME_RX_PAYLOAD_LEN: usize = 64;

/// Raw frame buffer
pub type FrameBuf = [u8; FRAME_TX_RX_LEN];

/// Link status transmitted with every frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameStats {
    pub seq_no: u8,
    pub ack: u8,
    /// Antenna the last frame was received on
    pub antenna: u8,
    /// Antenna this frame goes out on
    pub transmit_antenna: u8,
    pub rssi: i8,
    pub lq: u8,
    pub lq_serial_data: u8,
}

/// Status part of a received frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RxFrameStatus {
    pub seq_no: u8,
    pub ack: u8,
    pub antenna: u8,
    pub transmit_antenna: u8,
    pub rssi: i8,
    pub lq: u8,
    pub lq_serial_data: u8,
    pub payload_len: u8,
}

/// Received and validated frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RxFrame {
    pub status: RxFrameStatus,
    pub payload: [u8; FRAME_RX_PAYLOAD_LEN],
}

impl RxFrame {
    /// Serial bytes carried by the frame
    pub fn payload(&self) -> &[u8] {
        let len = (self.status.payload_len as usize).min(FRAME_RX_PAYLOAD_LEN);
        &self.payload[..len]
    }
}

/// Why a received frame was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CheckError {
    /// Frame carries another link's sync word. The IRQ filter drops these,
    /// so seeing one here means the two ends disagree on the setup.
    #[error("sync word mismatch")]
    SyncWord,

    #[error("crc mismatch")]
    Crc,

    #[error("invalid frame content")]
    Invalid,
}

/// Builds and validates frames on air
pub trait FrameCodec {
    /// Build a transmitter frame
    fn pack_tx_frame(&self, stats: &FrameStats, rc: &RcData, payload: &[u8]) -> FrameBuf;

    /// Validate and decode a receiver frame
    fn check_rx_frame(&self, raw: &FrameBuf) -> Result<RxFrame, CheckError>;
}
