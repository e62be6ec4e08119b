//! # Simulated Air Link
//!
//! Host-side stand-ins for the radio hardware: a concrete frame codec, a
//! simulated far end (the receiver) and radios that talk to it. Used by the
//! host runner and the tests.
//!
//! ## Frame Layout
//!
//! ```text
//! [0..2]   sync word, little endian
//! [2]      seq_no        [3] ack
//! [4]      antenna       [5] transmit_antenna
//! [6]      rssi          [7] lq          [8] lq_serial_data
//! [9]      payload_len
//! [10..74] payload, zero padded
//! [74..82] first four RC channels, little endian (transmitter frames)
//! [82..89] reserved
//! [89..91] CRC-16/CCITT over [0..89], little endian
//! ```

use std::sync::{Arc, Mutex, MutexGuard};

use tracing::trace;

use crate::mbridge::protocol::RcData;

use super::crc::crc16_ccitt;
use super::diversity::Antenna;
use super::frame::{
    CheckError, FrameBuf, FrameCodec, FrameStats, RxFrame, RxFrameStatus, FRAME_RX_PAYLOAD_LEN,
    FRAME_TX_PAYLOAD_LEN, FRAME_TX_RX_LEN,
};
use super::radio::{IrqMailbox, Radio, IRQ_RX_DONE, IRQ_TX_DONE};

const OFS_SEQ_NO: usize = 2;
const OFS_PAYLOAD_LEN: usize = 9;
const OFS_PAYLOAD: usize = 10;
const OFS_CHANNELS: usize = OFS_PAYLOAD + FRAME_TX_PAYLOAD_LEN;
const OFS_CRC: usize = FRAME_TX_RX_LEN - 2;

/// RC channels carried by a simulated transmitter frame
pub const SIM_RC_CHANNELS: usize = 4;

/// Sync word in the first two bytes of a raw frame
pub fn frame_sync_word(raw: &[u8]) -> u16 {
    match raw {
        [lo, hi, ..] => u16::from_le_bytes([*lo, *hi]),
        _ => 0,
    }
}

/// Decoded transmitter frame, as the simulated receiver sees it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimTxFrame {
    pub stats: FrameStats,
    pub channels: [u16; SIM_RC_CHANNELS],
    pub payload: Vec<u8>,
}

/// Frame codec with a fixed, documented layout
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimFrameCodec {
    sync_word: u16,
}

impl SimFrameCodec {
    pub fn new(sync_word: u16) -> Self {
        Self { sync_word }
    }

    pub fn sync_word(&self) -> u16 {
        self.sync_word
    }

    fn pack(&self, header: [u8; 7], payload: &[u8], channels: &[u16]) -> FrameBuf {
        let mut frame: FrameBuf = [0; FRAME_TX_RX_LEN];
        frame[..2].copy_from_slice(&self.sync_word.to_le_bytes());
        frame[OFS_SEQ_NO..OFS_PAYLOAD_LEN].copy_from_slice(&header);

        let len = payload.len().min(FRAME_TX_PAYLOAD_LEN);
        frame[OFS_PAYLOAD_LEN] = len as u8;
        frame[OFS_PAYLOAD..OFS_PAYLOAD + len].copy_from_slice(&payload[..len]);

        for (i, ch) in channels.iter().take(SIM_RC_CHANNELS).enumerate() {
            let ofs = OFS_CHANNELS + 2 * i;
            frame[ofs..ofs + 2].copy_from_slice(&ch.to_le_bytes());
        }

        let crc = crc16_ccitt(&frame[..OFS_CRC]);
        frame[OFS_CRC..].copy_from_slice(&crc.to_le_bytes());
        frame
    }

    /// Sync word, then CRC, then content
    fn check(&self, raw: &FrameBuf) -> Result<usize, CheckError> {
        if frame_sync_word(raw) != self.sync_word {
            return Err(CheckError::SyncWord);
        }
        let crc = u16::from_le_bytes([raw[OFS_CRC], raw[OFS_CRC + 1]]);
        if crc != crc16_ccitt(&raw[..OFS_CRC]) {
            return Err(CheckError::Crc);
        }
        let len = raw[OFS_PAYLOAD_LEN] as usize;
        if len > FRAME_RX_PAYLOAD_LEN {
            return Err(CheckError::Invalid);
        }
        Ok(len)
    }

    /// Build a receiver frame, the far end's side of the codec
    pub fn pack_rx_frame(
        &self,
        status: &RxFrameStatus,
        payload: &[u8; FRAME_RX_PAYLOAD_LEN],
    ) -> FrameBuf {
        let len = (status.payload_len as usize).min(FRAME_RX_PAYLOAD_LEN);
        let header = [
            status.seq_no,
            status.ack,
            status.antenna,
            status.transmit_antenna,
            status.rssi as u8,
            status.lq,
            status.lq_serial_data,
        ];
        self.pack(header, &payload[..len], &[])
    }

    /// Validate and decode a transmitter frame
    pub fn unpack_tx_frame(&self, raw: &FrameBuf) -> Result<SimTxFrame, CheckError> {
        let len = self.check(raw)?;
        let mut channels = [0u16; SIM_RC_CHANNELS];
        for (i, ch) in channels.iter_mut().enumerate() {
            let ofs = OFS_CHANNELS + 2 * i;
            *ch = u16::from_le_bytes([raw[ofs], raw[ofs + 1]]);
        }
        Ok(SimTxFrame {
            stats: FrameStats {
                seq_no: raw[2],
                ack: raw[3],
                antenna: raw[4],
                transmit_antenna: raw[5],
                rssi: raw[6] as i8,
                lq: raw[7],
                lq_serial_data: raw[8],
            },
            channels,
            payload: raw[OFS_PAYLOAD..OFS_PAYLOAD + len].to_vec(),
        })
    }
}

impl FrameCodec for SimFrameCodec {
    fn pack_tx_frame(&self, stats: &FrameStats, rc: &RcData, payload: &[u8]) -> FrameBuf {
        let header = [
            stats.seq_no,
            stats.ack,
            stats.antenna,
            stats.transmit_antenna,
            stats.rssi as u8,
            stats.lq,
            stats.lq_serial_data,
        ];
        self.pack(header, payload, rc)
    }

    fn check_rx_frame(&self, raw: &FrameBuf) -> Result<RxFrame, CheckError> {
        let len = self.check(raw)?;
        let mut payload = [0u8; FRAME_RX_PAYLOAD_LEN];
        payload[..len].copy_from_slice(&raw[OFS_PAYLOAD..OFS_PAYLOAD + len]);
        Ok(RxFrame {
            status: RxFrameStatus {
                seq_no: raw[2],
                ack: raw[3],
                antenna: raw[4],
                transmit_antenna: raw[5],
                rssi: raw[6] as i8,
                lq: raw[7],
                lq_serial_data: raw[8],
                payload_len: len as u8,
            },
            payload,
        })
    }
}

/// Propagation conditions seen by one antenna
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimAntenna {
    /// Frames reach this antenna at all
    pub reachable: bool,
    /// Frames arrive with a flipped byte
    pub corrupt: bool,
    pub rssi: i8,
    pub snr: i8,
}

impl Default for SimAntenna {
    fn default() -> Self {
        Self {
            reachable: true,
            corrupt: false,
            rssi: -60,
            snr: 8,
        }
    }
}

/// The simulated receiver and the path to it
///
/// The receiver answers every transmitter frame it hears and echoes the
/// serial payload back.
#[derive(Debug)]
pub struct SimAir {
    codec: SimFrameCodec,
    link_up: bool,
    antennas: [SimAntenna; 2],
    receiver_lq: u8,
    receiver_seq_no: u8,
    reply: Option<FrameBuf>,
    frames_heard: u32,
    last_heard: Option<SimTxFrame>,
}

/// Air shared by the radios of both antennas
pub type SharedAir = Arc<Mutex<SimAir>>;

impl SimAir {
    pub fn new(sync_word: u16) -> Self {
        Self {
            codec: SimFrameCodec::new(sync_word),
            link_up: true,
            antennas: [SimAntenna::default(); 2],
            receiver_lq: 100,
            receiver_seq_no: 0,
            reply: None,
            frames_heard: 0,
            last_heard: None,
        }
    }

    pub fn shared(sync_word: u16) -> SharedAir {
        Arc::new(Mutex::new(Self::new(sync_word)))
    }

    /// Receiver powered and in range
    pub fn set_link_up(&mut self, up: bool) {
        self.link_up = up;
        if !up {
            self.reply = None;
        }
    }

    pub fn antenna(&self, antenna: Antenna) -> &SimAntenna {
        &self.antennas[antenna.index()]
    }

    pub fn antenna_mut(&mut self, antenna: Antenna) -> &mut SimAntenna {
        &mut self.antennas[antenna.index()]
    }

    /// LQ the receiver reports back
    pub fn set_receiver_lq(&mut self, lq: u8) {
        self.receiver_lq = lq;
    }

    /// Transmitter frames the receiver decoded
    pub fn frames_heard(&self) -> u32 {
        self.frames_heard
    }

    pub fn last_heard(&self) -> Option<&SimTxFrame> {
        self.last_heard.as_ref()
    }

    fn on_transmit(&mut self, antenna: Antenna, raw: &[u8]) {
        self.reply = None;
        if !self.link_up || !self.antennas[antenna.index()].reachable {
            return;
        }
        let Ok(raw) = <&FrameBuf>::try_from(raw) else {
            trace!("Sim receiver: {} byte frame ignored", raw.len());
            return;
        };
        let frame = match self.codec.unpack_tx_frame(raw) {
            Ok(frame) => frame,
            Err(e) => {
                trace!("Sim receiver: frame dropped, {}", e);
                return;
            }
        };

        self.frames_heard += 1;
        self.receiver_seq_no = self.receiver_seq_no.wrapping_add(1);

        let mut payload = [0u8; FRAME_RX_PAYLOAD_LEN];
        let len = frame.payload.len().min(FRAME_RX_PAYLOAD_LEN);
        payload[..len].copy_from_slice(&frame.payload[..len]);
        let status = RxFrameStatus {
            seq_no: self.receiver_seq_no,
            ack: 1,
            antenna: 0,
            transmit_antenna: 0,
            rssi: self.antennas[antenna.index()].rssi,
            lq: self.receiver_lq,
            lq_serial_data: self.receiver_lq,
            payload_len: len as u8,
        };
        self.reply = Some(self.codec.pack_rx_frame(&status, &payload));
        self.last_heard = Some(frame);
    }

    /// What `antenna` hears of the pending reply
    fn receive(&self, antenna: Antenna) -> Option<FrameBuf> {
        let conditions = &self.antennas[antenna.index()];
        if !conditions.reachable {
            return None;
        }
        let mut frame = self.reply?;
        if conditions.corrupt {
            frame[OFS_PAYLOAD] ^= 0xFF;
        }
        Some(frame)
    }
}

/// Lock the shared air; a poisoned lock is still usable
pub fn lock_air(air: &Mutex<SimAir>) -> MutexGuard<'_, SimAir> {
    air.lock().unwrap_or_else(|e| e.into_inner())
}

/// Radio on one antenna, completing operations immediately
pub struct SimRadio {
    antenna: Antenna,
    air: SharedAir,
    irq: Arc<IrqMailbox>,
    freq_hz: u32,
    rx_buf: FrameBuf,
}

impl SimRadio {
    pub fn new(antenna: Antenna, air: SharedAir, irq: Arc<IrqMailbox>) -> Self {
        Self {
            antenna,
            air,
            irq,
            freq_hz: 0,
            rx_buf: [0; FRAME_TX_RX_LEN],
        }
    }

    pub fn freq_hz(&self) -> u32 {
        self.freq_hz
    }
}

impl Radio for SimRadio {
    fn set_rf_frequency(&mut self, freq_hz: u32) {
        self.freq_hz = freq_hz;
    }

    fn send_frame(&mut self, frame: &[u8], _tmo_ms: u16) {
        lock_air(&self.air).on_transmit(self.antenna, frame);
        self.irq.post(IRQ_TX_DONE);
    }

    fn set_to_rx(&mut self) {
        let (heard, sync_word) = {
            let air = lock_air(&self.air);
            (air.receive(self.antenna), air.codec.sync_word())
        };
        // nothing heard, the cycle ends without RX done
        if let Some(frame) = heard {
            self.rx_buf = frame;
            let rx_buf = &self.rx_buf;
            self.irq
                .post_irq(IRQ_RX_DONE, || frame_sync_word(rx_buf), sync_word);
        }
    }

    fn read_frame(&mut self, buf: &mut [u8]) {
        let n = buf.len().min(FRAME_TX_RX_LEN);
        buf[..n].copy_from_slice(&self.rx_buf[..n]);
    }

    fn packet_status(&mut self) -> (i8, i8) {
        let air = lock_air(&self.air);
        let conditions = air.antenna(self.antenna);
        (conditions.rssi, conditions.snr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mbridge::protocol::{RC_CHANNEL_VALUE_CENTER, RC_NUM_CHANNELS};

    const SYNC: u16 = 0x4D4C;

    fn tx_frame(codec: &SimFrameCodec, payload: &[u8]) -> FrameBuf {
        let mut rc = [RC_CHANNEL_VALUE_CENTER; RC_NUM_CHANNELS];
        rc[0] = 1500;
        let stats = FrameStats {
            seq_no: 3,
            ack: 1,
            rssi: -70,
            ..Default::default()
        };
        codec.pack_tx_frame(&stats, &rc, payload)
    }

    #[test]
    fn test_rx_frame_decodes() {
        let codec = SimFrameCodec::new(SYNC);
        let mut payload = [0u8; FRAME_RX_PAYLOAD_LEN];
        payload[..3].copy_from_slice(b"abc");
        let status = RxFrameStatus {
            seq_no: 5,
            rssi: -88,
            lq: 77,
            payload_len: 3,
            ..Default::default()
        };

        let frame = codec.check_rx_frame(&codec.pack_rx_frame(&status, &payload)).unwrap();
        assert_eq!(frame.status, status);
        assert_eq!(frame.payload(), b"abc");
    }

    #[test]
    fn test_tx_frame_carries_channels() {
        let codec = SimFrameCodec::new(SYNC);
        let frame = codec.unpack_tx_frame(&tx_frame(&codec, b"hi")).unwrap();
        assert_eq!(frame.stats.seq_no, 3);
        assert_eq!(frame.stats.rssi, -70);
        assert_eq!(frame.channels[0], 1500);
        assert_eq!(frame.channels[1], RC_CHANNEL_VALUE_CENTER);
        assert_eq!(frame.payload, b"hi".to_vec());
    }

    #[test]
    fn test_check_order() {
        let codec = SimFrameCodec::new(SYNC);
        let good = tx_frame(&codec, &[]);

        let mut bad_crc = good;
        bad_crc[40] ^= 0x01;
        assert_eq!(codec.check_rx_frame(&bad_crc), Err(CheckError::Crc));

        // foreign sync word wins over the broken CRC
        let mut foreign = bad_crc;
        foreign[0] ^= 0xFF;
        assert_eq!(codec.check_rx_frame(&foreign), Err(CheckError::SyncWord));

        let mut too_long = good;
        too_long[OFS_PAYLOAD_LEN] = 65;
        let crc = crc16_ccitt(&too_long[..OFS_CRC]);
        too_long[OFS_CRC..].copy_from_slice(&crc.to_le_bytes());
        assert_eq!(codec.check_rx_frame(&too_long), Err(CheckError::Invalid));
    }

    #[test]
    fn test_radio_echoes_payload() {
        let air = SimAir::shared(SYNC);
        let irq = Arc::new(IrqMailbox::new());
        let mut radio = SimRadio::new(Antenna::Antenna1, air.clone(), irq.clone());
        let codec = SimFrameCodec::new(SYNC);

        radio.send_frame(&tx_frame(&codec, b"ping"), 10);
        assert_eq!(irq.take(), IRQ_TX_DONE);
        assert_eq!(lock_air(&air).frames_heard(), 1);

        radio.set_to_rx();
        assert_eq!(irq.take(), IRQ_RX_DONE);
        let mut buf = [0u8; FRAME_TX_RX_LEN];
        radio.read_frame(&mut buf);
        let frame = codec.check_rx_frame(&buf).unwrap();
        assert_eq!(frame.payload(), b"ping");
        assert_eq!(frame.status.lq, 100);
    }

    #[test]
    fn test_link_down_no_reply() {
        let air = SimAir::shared(SYNC);
        lock_air(&air).set_link_up(false);
        let irq = Arc::new(IrqMailbox::new());
        let mut radio = SimRadio::new(Antenna::Antenna1, air, irq.clone());

        radio.send_frame(&tx_frame(&SimFrameCodec::new(SYNC), &[]), 10);
        assert_eq!(irq.take(), IRQ_TX_DONE);
        radio.set_to_rx();
        assert!(!irq.is_pending());
    }

    #[test]
    fn test_foreign_frame_not_answered() {
        let air = SimAir::shared(SYNC);
        let irq = Arc::new(IrqMailbox::new());
        let mut radio = SimRadio::new(Antenna::Antenna1, air, irq.clone());

        // receiver does not decode frames of another link
        radio.send_frame(&tx_frame(&SimFrameCodec::new(!SYNC), &[]), 10);
        irq.take();
        radio.set_to_rx();
        assert!(!irq.is_pending());
    }

    #[test]
    fn test_corrupt_antenna() {
        let air = SimAir::shared(SYNC);
        lock_air(&air).antenna_mut(Antenna::Antenna2).corrupt = true;
        let irq1 = Arc::new(IrqMailbox::new());
        let irq2 = Arc::new(IrqMailbox::new());
        let mut radio1 = SimRadio::new(Antenna::Antenna1, air.clone(), irq1.clone());
        let mut radio2 = SimRadio::new(Antenna::Antenna2, air, irq2.clone());
        let codec = SimFrameCodec::new(SYNC);

        radio1.send_frame(&tx_frame(&codec, &[]), 10);
        radio1.set_to_rx();
        radio2.set_to_rx();
        assert_eq!(irq2.take(), IRQ_RX_DONE);

        let mut buf = [0u8; FRAME_TX_RX_LEN];
        radio1.read_frame(&mut buf);
        assert!(codec.check_rx_frame(&buf).is_ok());
        radio2.read_frame(&mut buf);
        assert_eq!(codec.check_rx_frame(&buf), Err(CheckError::Crc));
    }
}
