//! # MBridge Framer
//!
//! Byte-at-a-time parser for frames coming from the radio, and the response
//! side of the half-duplex turn.
//!
//! The framer is driven from the UART receive interrupt: every byte goes
//! through [`MBridgeFramer::uart_rx_callback`], which parses it and, once a
//! frame is complete, builds the response within the same call. The caller
//! starts transmitting the returned bytes immediately; the radio expects the
//! reply within a short turnaround window. When the UART reports transmit
//! complete, [`MBridgeFramer::on_transmit_complete`] ends the turn.
//!
//! ## Frame Grammar
//!
//! ```text
//! STX1 STX2 0x00                      empty
//! STX1 STX2 len  <len bytes>          serial passthrough, len 1..=24
//! STX1 STX2 0xFF <23 bytes>           channel packet
//! STX1 STX2 0x80|id <payload>         command, payload length from the id
//! ```
//!
//! Framing errors (bad sync, over-length serial byte, inter-byte gap above
//! 250 µs) silently return the parser to `Idle`.

use heapless::{Deque, Vec as HVec};

use super::protocol::*;

/// Outbound serial buffer (module -> radio)
pub const TX_MBRIDGE_TXBUFSIZE: usize = 512;

/// Inbound serial buffer (radio -> module), generous since ground stations burst
pub const TX_MBRIDGE_RXBUFSIZE: usize = 2048;

/// Largest single response: type byte + serial payload, or a command frame
const PIN5_TX_BUF_SIZE: usize = MBRIDGE_M2R_COMMAND_FRAME_LEN_MAX;

/// Parser state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParserState {
    Idle,
    AwaitSecondSync,
    AwaitLengthOrType,
    InSerialPayload,
    InChannelPayload,
    InCommandPayload,
    /// Inbound frame complete, response not yet built
    ReadyToRespond,
    /// Response handed to the UART, waiting for transmit complete
    Responding,
}

impl ParserState {
    fn is_turn(self) -> bool {
        matches!(self, Self::ReadyToRespond | Self::Responding)
    }
}

/// Kind of the last parsed frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketType {
    None,
    Serial,
    Channel,
    Command,
}

/// Command frame received from the radio
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedCommand {
    /// 7-bit command id
    pub id: u8,
    pub payload: HVec<u8, MBRIDGE_R2M_COMMAND_PAYLOAD_LEN_MAX>,
}

impl ReceivedCommand {
    /// Catalog entry, `None` for ids this module does not know
    pub fn cmd(&self) -> Option<MBridgeCmd> {
        MBridgeCmd::from_id(self.id)
    }
}

/// MBridge frame parser and responder
#[derive(Debug)]
pub struct MBridgeFramer {
    state: ParserState,
    packet_type: PacketType,
    len: usize,
    cnt: usize,
    tlast_us: u16,

    channels_received: bool,
    channel_buf: [u8; MBRIDGE_CHANNELPACKET_SIZE],

    cmd_received: bool,
    cmd_r2m_frame: [u8; MBRIDGE_R2M_COMMAND_FRAME_LEN_MAX],

    cmd_m2r_available: usize,
    cmd_m2r_frame: [u8; MBRIDGE_M2R_COMMAND_FRAME_LEN_MAX],

    tx_fifo: Deque<u8, TX_MBRIDGE_TXBUFSIZE>,
    rx_fifo: Deque<u8, TX_MBRIDGE_RXBUFSIZE>,

    pin5_tx_buf: HVec<u8, PIN5_TX_BUF_SIZE>,
}

impl Default for MBridgeFramer {
    fn default() -> Self {
        Self::new()
    }
}

impl MBridgeFramer {
    pub fn new() -> Self {
        Self {
            state: ParserState::Idle,
            packet_type: PacketType::None,
            len: 0,
            cnt: 0,
            tlast_us: 0,
            channels_received: false,
            channel_buf: [0; MBRIDGE_CHANNELPACKET_SIZE],
            cmd_received: false,
            cmd_r2m_frame: [0; MBRIDGE_R2M_COMMAND_FRAME_LEN_MAX],
            cmd_m2r_available: 0,
            cmd_m2r_frame: [0; MBRIDGE_M2R_COMMAND_FRAME_LEN_MAX],
            tx_fifo: Deque::new(),
            rx_fifo: Deque::new(),
            pin5_tx_buf: HVec::new(),
        }
    }

    pub fn state(&self) -> ParserState {
        self.state
    }

    pub fn packet_type(&self) -> PacketType {
        self.packet_type
    }

    //-- interrupt side

    /// UART byte received
    ///
    /// Parses the byte and, if it completed a frame, returns the response to
    /// transmit. `None` means nothing is sent this turn.
    pub fn uart_rx_callback(&mut self, c: u8, tnow_us: u16) -> Option<&[u8]> {
        // a byte while responding means transmit complete got lost
        if self.state.is_turn() {
            self.state = ParserState::Idle;
        }

        self.feed(c, tnow_us);

        if self.prepare_response() {
            Some(self.pin5_tx_buf.as_slice())
        } else {
            None
        }
    }

    /// UART transmit complete, ends the turn
    pub fn on_transmit_complete(&mut self) {
        self.pin5_tx_buf.clear();
        self.state = ParserState::Idle;
    }

    /// Advance the parser by one byte
    pub fn feed(&mut self, c: u8, tnow_us: u16) {
        if self.state != ParserState::Idle {
            let dt = tnow_us.wrapping_sub(self.tlast_us);
            if dt > MBRIDGE_TMO_US {
                self.state = ParserState::Idle;
            }
        }
        self.tlast_us = tnow_us;

        match self.state {
            ParserState::Idle => {
                if c == MBRIDGE_STX1 {
                    self.state = ParserState::AwaitSecondSync;
                }
            }
            ParserState::AwaitSecondSync => {
                self.state = if c == MBRIDGE_STX2 {
                    ParserState::AwaitLengthOrType
                } else {
                    ParserState::Idle
                };
            }
            ParserState::AwaitLengthOrType => self.parse_discriminator(c),
            ParserState::InSerialPayload => {
                self.serial_putc(c);
                self.cnt += 1;
                if self.cnt >= self.len {
                    self.state = ParserState::ReadyToRespond;
                }
            }
            ParserState::InChannelPayload => {
                self.channel_buf[self.cnt] = c;
                self.cnt += 1;
                if self.cnt >= self.len {
                    self.on_channel_packet_complete();
                }
            }
            ParserState::InCommandPayload => {
                self.cmd_r2m_frame[self.cnt] = c;
                self.cnt += 1;
                if self.cnt >= self.len + 1 {
                    self.on_command_packet_complete();
                }
            }
            ParserState::ReadyToRespond | ParserState::Responding => {}
        }
    }

    fn parse_discriminator(&mut self, c: u8) {
        self.cnt = 0;

        if c == MBRIDGE_CHANNELPACKET_STX {
            self.len = MBRIDGE_CHANNELPACKET_SIZE;
            self.packet_type = PacketType::Channel;
            self.state = ParserState::InChannelPayload;
        } else if c >= MBRIDGE_COMMANDPACKET_STX {
            let id = c & !MBRIDGE_COMMANDPACKET_MASK;
            self.cmd_r2m_frame[0] = id;
            self.cnt = 1;
            self.len = mbridge_cmd_payload_len(id);
            self.packet_type = PacketType::Command;
            if self.len == 0 {
                self.on_command_packet_complete();
            } else {
                self.state = ParserState::InCommandPayload;
            }
        } else if c as usize > MBRIDGE_R2M_SERIAL_PAYLOAD_LEN_MAX {
            self.state = ParserState::Idle;
        } else if c > 0 {
            self.len = c as usize;
            self.packet_type = PacketType::Serial;
            self.state = ParserState::InSerialPayload;
        } else {
            self.packet_type = PacketType::None;
            self.state = ParserState::ReadyToRespond;
        }
    }

    fn on_channel_packet_complete(&mut self) {
        self.channels_received = true;
        self.state = ParserState::ReadyToRespond;
    }

    fn on_command_packet_complete(&mut self) {
        self.cmd_received = true;
        self.state = ParserState::ReadyToRespond;
    }

    /// Build the response for a completed inbound frame
    ///
    /// A queued command frame takes priority and is sent wholesale; otherwise
    /// up to 16 bytes of outbound serial data are sent behind a 0x00 type
    /// byte. Returns whether there is anything to transmit.
    pub fn prepare_response(&mut self) -> bool {
        match self.state {
            ParserState::ReadyToRespond => {}
            ParserState::Responding => {
                self.state = ParserState::Idle;
                return false;
            }
            _ => return false,
        }

        self.pin5_tx_buf.clear();

        let available = if self.cmd_m2r_available > 0 {
            let n = self.cmd_m2r_available;
            // capacity equals the frame size
            let _ = self.pin5_tx_buf.extend_from_slice(&self.cmd_m2r_frame[..n]);
            self.cmd_m2r_available = 0;
            n
        } else {
            self.send_serial()
        };

        if available == 0 {
            self.state = ParserState::Idle;
            return false;
        }

        self.state = ParserState::Responding;
        true
    }

    fn send_serial(&mut self) -> usize {
        let mut payload: HVec<u8, MBRIDGE_M2R_SERIAL_PAYLOAD_LEN_MAX> = HVec::new();
        while !payload.is_full() {
            match self.tx_fifo.pop_front() {
                Some(c) => {
                    let _ = payload.push(c);
                }
                None => break,
            }
        }

        if !payload.is_empty() {
            // anything which is not a command works, 0x00 is easy to recognize
            let _ = self.pin5_tx_buf.push(0x00);
            let _ = self.pin5_tx_buf.extend_from_slice(&payload);
        }
        payload.len()
    }

    fn serial_putc(&mut self, c: u8) {
        // full means the consumer is not keeping up, drop
        let _ = self.rx_fifo.push_back(c);
    }

    //-- main loop side

    /// Take the last channel packet, if a new one arrived
    pub fn channels_updated(&mut self) -> Option<ChannelPacket> {
        if !self.channels_received {
            return None;
        }
        self.channels_received = false;
        Some(ChannelPacket::from_bytes(&self.channel_buf))
    }

    /// Take the last command frame, if a new one arrived
    pub fn command_received(&mut self) -> Option<ReceivedCommand> {
        if !self.cmd_received {
            return None;
        }
        self.cmd_received = false;

        let id = self.cmd_r2m_frame[0] & !MBRIDGE_COMMANDPACKET_MASK;
        let len = mbridge_cmd_payload_len(id);
        let mut payload = HVec::new();
        let _ = payload.extend_from_slice(&self.cmd_r2m_frame[1..1 + len]);
        Some(ReceivedCommand { id, payload })
    }

    /// Queue a command frame for the next turn, replacing any unsent one
    ///
    /// The payload is truncated or zero padded to the command's length.
    pub fn send_command(&mut self, cmd: MBridgeCmd, payload: &[u8]) {
        self.cmd_m2r_frame = [0; MBRIDGE_M2R_COMMAND_FRAME_LEN_MAX];

        let len = cmd.payload_len();
        let n = payload.len().min(len);
        self.cmd_m2r_frame[0] = MBRIDGE_COMMANDPACKET_STX | cmd.id();
        self.cmd_m2r_frame[1..1 + n].copy_from_slice(&payload[..n]);

        self.cmd_m2r_available = len + 1;
    }

    /// A command frame is waiting for its turn
    pub fn command_pending(&self) -> bool {
        self.cmd_m2r_available > 0
    }

    /// Queue serial data for the radio
    pub fn putc(&mut self, c: u8) {
        let _ = self.tx_fifo.push_back(c);
    }

    pub fn putbuf(&mut self, buf: &[u8]) {
        for &c in buf {
            self.putc(c);
        }
    }

    /// Serial data received from the radio is waiting
    pub fn available(&self) -> bool {
        !self.rx_fifo.is_empty()
    }

    pub fn getc(&mut self) -> Option<u8> {
        self.rx_fifo.pop_front()
    }

    /// Drop serial data received from the radio
    pub fn flush(&mut self) {
        self.rx_fifo.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Feed bytes 10 µs apart, returning the response of the last byte
    fn feed_all(framer: &mut MBridgeFramer, bytes: &[u8], t0: u16) -> Option<Vec<u8>> {
        let mut response = None;
        for (i, &c) in bytes.iter().enumerate() {
            response = framer
                .uart_rx_callback(c, t0.wrapping_add(10 * i as u16))
                .map(|r| r.to_vec());
        }
        response
    }

    fn serial_frame(payload: &[u8]) -> Vec<u8> {
        let mut frame = vec![MBRIDGE_STX1, MBRIDGE_STX2, payload.len() as u8];
        frame.extend_from_slice(payload);
        frame
    }

    fn channel_frame(packet: &ChannelPacket) -> Vec<u8> {
        let mut frame = vec![MBRIDGE_STX1, MBRIDGE_STX2, MBRIDGE_CHANNELPACKET_STX];
        frame.extend_from_slice(&packet.to_bytes());
        frame
    }

    #[test]
    fn test_empty_frame_nothing_queued() {
        let mut framer = MBridgeFramer::new();

        framer.feed(MBRIDGE_STX1, 0);
        framer.feed(MBRIDGE_STX2, 10);
        framer.feed(0x00, 20);
        assert_eq!(framer.state(), ParserState::ReadyToRespond);
        assert_eq!(framer.packet_type(), PacketType::None);

        assert!(!framer.prepare_response());
        assert_eq!(framer.state(), ParserState::Idle);
    }

    #[test]
    fn test_empty_frame_via_callback_sends_nothing() {
        let mut framer = MBridgeFramer::new();
        let response = feed_all(&mut framer, &[MBRIDGE_STX1, MBRIDGE_STX2, 0x00], 0);
        assert!(response.is_none());
        assert_eq!(framer.state(), ParserState::Idle);
    }

    #[test]
    fn test_serial_frame_all_lengths() {
        for len in 1..=MBRIDGE_R2M_SERIAL_PAYLOAD_LEN_MAX {
            let mut framer = MBridgeFramer::new();
            let payload: Vec<u8> = (0..len as u8).map(|b| b.wrapping_mul(7)).collect();

            let response = feed_all(&mut framer, &serial_frame(&payload), 100);
            assert!(response.is_none());
            assert_eq!(framer.packet_type(), PacketType::Serial);
            assert_eq!(framer.state(), ParserState::Idle);

            let mut received = Vec::new();
            while let Some(c) = framer.getc() {
                received.push(c);
            }
            assert_eq!(received, payload, "length {}", len);
        }
    }

    #[test]
    fn test_serial_overlength_resyncs() {
        let mut framer = MBridgeFramer::new();
        let too_long = MBRIDGE_R2M_SERIAL_PAYLOAD_LEN_MAX as u8 + 1;

        feed_all(&mut framer, &[MBRIDGE_STX1, MBRIDGE_STX2, too_long, 1, 2, 3], 0);
        assert_eq!(framer.state(), ParserState::Idle);
        assert!(!framer.available());
    }

    #[test]
    fn test_bad_second_sync_resyncs() {
        let mut framer = MBridgeFramer::new();
        framer.feed(MBRIDGE_STX1, 0);
        framer.feed(0x00, 10);
        assert_eq!(framer.state(), ParserState::Idle);

        // a following good frame parses
        feed_all(&mut framer, &serial_frame(&[0xAA]), 20);
        assert_eq!(framer.getc(), Some(0xAA));
    }

    #[test]
    fn test_channel_packet_decoded() {
        let mut framer = MBridgeFramer::new();
        let mut packet = ChannelPacket::default();
        for (n, ch) in packet.analog.iter_mut().enumerate() {
            *ch = 100 + (n as u16) * 120;
        }
        packet.binary = [false, true];

        feed_all(&mut framer, &channel_frame(&packet), 0);
        assert_eq!(framer.packet_type(), PacketType::Channel);

        assert_eq!(framer.channels_updated(), Some(packet));
        assert_eq!(framer.channels_updated(), None, "channels-ready is one-shot");
    }

    #[test]
    fn test_second_channel_packet_overwrites() {
        let mut framer = MBridgeFramer::new();
        let first = ChannelPacket::default();
        let mut second = ChannelPacket::default();
        second.analog[0] = 2000;

        feed_all(&mut framer, &channel_frame(&first), 0);
        feed_all(&mut framer, &channel_frame(&second), 1000);

        assert_eq!(framer.channels_updated(), Some(second));
        assert_eq!(framer.channels_updated(), None);
    }

    #[test]
    fn test_inter_byte_timeout_forces_idle() {
        let mut framer = MBridgeFramer::new();
        framer.feed(MBRIDGE_STX1, 0);
        framer.feed(MBRIDGE_STX2, 10);
        framer.feed(5, 20);
        framer.feed(0x11, 30);
        assert_eq!(framer.state(), ParserState::InSerialPayload);

        // gap above 250 µs: the byte is treated as idle-line data
        framer.feed(0x22, 30 + MBRIDGE_TMO_US + 1);
        assert_eq!(framer.state(), ParserState::Idle);

        // no leakage into the next frame
        feed_all(&mut framer, &serial_frame(&[0x33]), 1000);
        framer.getc(); // 0x11 from the aborted frame was already queued
        assert_eq!(framer.getc(), Some(0x33));
        assert_eq!(framer.getc(), None);
    }

    #[test]
    fn test_gap_exactly_timeout_is_tolerated() {
        let mut framer = MBridgeFramer::new();
        framer.feed(MBRIDGE_STX1, 0);
        framer.feed(MBRIDGE_STX2, MBRIDGE_TMO_US);
        assert_eq!(framer.state(), ParserState::AwaitLengthOrType);
    }

    #[test]
    fn test_timeout_across_clock_wrap() {
        let mut framer = MBridgeFramer::new();
        framer.feed(MBRIDGE_STX1, u16::MAX - 5);
        framer.feed(MBRIDGE_STX2, 4);
        assert_eq!(framer.state(), ParserState::AwaitLengthOrType);

        framer.feed(0x01, 4 + 400);
        assert_eq!(framer.state(), ParserState::Idle);
    }

    #[test]
    fn test_command_without_payload() {
        let mut framer = MBridgeFramer::new();
        let disc = MBRIDGE_COMMANDPACKET_STX | MBridgeCmd::ParamRequestList.id();
        feed_all(&mut framer, &[MBRIDGE_STX1, MBRIDGE_STX2, disc], 0);

        let cmd = framer.command_received().unwrap();
        assert_eq!(cmd.cmd(), Some(MBridgeCmd::ParamRequestList));
        assert!(cmd.payload.is_empty());
        assert!(framer.command_received().is_none());
    }

    #[test]
    fn test_command_with_payload() {
        let mut framer = MBridgeFramer::new();
        let mut frame = vec![
            MBRIDGE_STX1,
            MBRIDGE_STX2,
            MBRIDGE_COMMANDPACKET_STX | MBridgeCmd::ParamSet.id(),
        ];
        frame.extend_from_slice(&[3, 1, 2, 3, 4, 5, 6]);

        feed_all(&mut framer, &frame, 0);
        let cmd = framer.command_received().unwrap();
        assert_eq!(cmd.id, MBridgeCmd::ParamSet.id());
        assert_eq!(cmd.payload.as_slice(), &[3, 1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn test_queued_command_takes_priority_over_serial() {
        let mut framer = MBridgeFramer::new();
        framer.putbuf(&[1, 2, 3]);
        framer.send_command(MBridgeCmd::Info, &[0xAB]);
        assert!(framer.command_pending());

        let response = feed_all(&mut framer, &[MBRIDGE_STX1, MBRIDGE_STX2, 0x00], 0).unwrap();
        assert_eq!(response.len(), 1 + MBridgeCmd::Info.payload_len());
        assert_eq!(response[0], MBRIDGE_COMMANDPACKET_STX | MBridgeCmd::Info.id());
        assert_eq!(response[1], 0xAB);
        assert!(response[2..].iter().all(|&b| b == 0));
        assert!(!framer.command_pending());
        assert_eq!(framer.state(), ParserState::Responding);

        framer.on_transmit_complete();
        assert_eq!(framer.state(), ParserState::Idle);

        // serial goes out on the following turn
        let response = feed_all(&mut framer, &[MBRIDGE_STX1, MBRIDGE_STX2, 0x00], 1000).unwrap();
        assert_eq!(response, vec![0x00, 1, 2, 3]);
    }

    #[test]
    fn test_serial_response_limited_per_turn() {
        let mut framer = MBridgeFramer::new();
        let data: Vec<u8> = (1..=40).collect();
        framer.putbuf(&data);

        let response = feed_all(&mut framer, &[MBRIDGE_STX1, MBRIDGE_STX2, 0x00], 0).unwrap();
        assert_eq!(response.len(), 1 + MBRIDGE_M2R_SERIAL_PAYLOAD_LEN_MAX);
        assert_eq!(&response[1..], &data[..MBRIDGE_M2R_SERIAL_PAYLOAD_LEN_MAX]);
    }

    #[test]
    fn test_byte_while_responding_recovers() {
        let mut framer = MBridgeFramer::new();
        framer.putbuf(&[9]);
        feed_all(&mut framer, &[MBRIDGE_STX1, MBRIDGE_STX2, 0x00], 0).unwrap();
        assert_eq!(framer.state(), ParserState::Responding);

        // transmit complete lost, next frame must still parse
        feed_all(&mut framer, &serial_frame(&[0x42]), 500);
        assert_eq!(framer.getc(), Some(0x42));
        assert_eq!(framer.state(), ParserState::Idle);
    }

    #[test]
    fn test_one_response_per_frame() {
        let mut framer = MBridgeFramer::new();
        framer.putbuf(&[1; 40]);
        feed_all(&mut framer, &[MBRIDGE_STX1, MBRIDGE_STX2, 0x00], 0).unwrap();

        assert!(!framer.prepare_response(), "second response for the same frame");
        assert_eq!(framer.state(), ParserState::Idle);
    }

    #[test]
    fn test_send_command_truncates_payload() {
        let mut framer = MBridgeFramer::new();
        framer.send_command(MBridgeCmd::ParamSet, &[0xEE; 30]);

        let response = feed_all(&mut framer, &[MBRIDGE_STX1, MBRIDGE_STX2, 0x00], 0).unwrap();
        assert_eq!(response.len(), 1 + 7);
    }

    #[test]
    fn test_flush_drops_inbound_serial() {
        let mut framer = MBridgeFramer::new();
        feed_all(&mut framer, &serial_frame(&[1, 2, 3]), 0);
        assert!(framer.available());
        framer.flush();
        assert!(!framer.available());
    }
}
