//! # MBridge Protocol Constants and Types
//!
//! Core definitions for the MBridge half-duplex byte protocol spoken between
//! the radio (JR bay pin 5) and the transmitter module.
//!
//! Every radio-to-module frame starts with the two sync bytes and a
//! discriminator byte:
//!
//! | Discriminator | Frame |
//! |---------------|-------|
//! | `0x00` | empty, no payload |
//! | `0x01..=24` | serial passthrough, payload length = discriminator |
//! | `0x80..=0xFE` | command, id = discriminator & 0x7F |
//! | `0xFF` | channel packet, fixed 23 byte payload |

/// First sync byte ('O')
pub const MBRIDGE_STX1: u8 = 0x4F;

/// Second sync byte ('W')
pub const MBRIDGE_STX2: u8 = 0x57;

/// Discriminator of a channel packet
pub const MBRIDGE_CHANNELPACKET_STX: u8 = 0xFF;

/// Discriminators at or above this value are command frames
pub const MBRIDGE_COMMANDPACKET_STX: u8 = 0x80;

/// Marker bits stripped off the discriminator to obtain the command id
pub const MBRIDGE_COMMANDPACKET_MASK: u8 = 0x80;

/// Maximum serial payload received from the radio
pub const MBRIDGE_R2M_SERIAL_PAYLOAD_LEN_MAX: usize = 24;

/// Maximum serial payload sent to the radio
pub const MBRIDGE_M2R_SERIAL_PAYLOAD_LEN_MAX: usize = 16;

/// Channel packet payload size (16 × 11 bit + 2 × 1 bit = 178 bits)
pub const MBRIDGE_CHANNELPACKET_SIZE: usize = 23;

/// Maximum command payload received from the radio
pub const MBRIDGE_R2M_COMMAND_PAYLOAD_LEN_MAX: usize = 24;

/// Maximum command payload sent to the radio
pub const MBRIDGE_M2R_COMMAND_PAYLOAD_LEN_MAX: usize = 24;

/// Command frame (id byte + payload) received from the radio
pub const MBRIDGE_R2M_COMMAND_FRAME_LEN_MAX: usize = MBRIDGE_R2M_COMMAND_PAYLOAD_LEN_MAX + 1;

/// Command frame (id byte + payload) sent to the radio
pub const MBRIDGE_M2R_COMMAND_FRAME_LEN_MAX: usize = MBRIDGE_M2R_COMMAND_PAYLOAD_LEN_MAX + 1;

/// Inter-byte gap after which a partially received frame is dropped
pub const MBRIDGE_TMO_US: u16 = 250;

/// Number of analog channels in a channel packet
pub const MBRIDGE_NUM_ANALOG_CHANNELS: usize = 16;

/// Number of binary channels in a channel packet
pub const MBRIDGE_NUM_BINARY_CHANNELS: usize = 2;

/// Total number of channels delivered to the link
pub const RC_NUM_CHANNELS: usize = MBRIDGE_NUM_ANALOG_CHANNELS + MBRIDGE_NUM_BINARY_CHANNELS;

/// Channel value range (11-bit, 1 .. 1024 .. 2047 for ±120%)
pub const RC_CHANNEL_VALUE_MIN: u16 = 1;
pub const RC_CHANNEL_VALUE_MAX: u16 = 2047;
pub const RC_CHANNEL_VALUE_CENTER: u16 = 1024;

/// Binary channel mapped to ±100%
pub const RC_CHANNEL_BINARY_ON: u16 = 1876;
pub const RC_CHANNEL_BINARY_OFF: u16 = 172;

/// RC channels handed to the RF link
pub type RcData = [u16; RC_NUM_CHANNELS];

/// MBridge command catalog
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MBridgeCmd {
    TxLinkStats = 0x02,
    RequestInfo = 0x03,
    DeviceItemTx = 0x04,
    DeviceItemRx = 0x05,
    ParamRequestList = 0x06,
    ParamItem = 0x07,
    ParamItem2 = 0x08,
    ParamItem3 = 0x09,
    RequestCmd = 0x0A,
    Info = 0x0B,
    ParamSet = 0x0C,
    ParamStore = 0x0D,
    BindStart = 0x0E,
    BindStop = 0x0F,
    ModelIdSet = 0x10,
    SystemBootloader = 0x11,
}

impl MBridgeCmd {
    /// Look up a command by its 7-bit id
    pub fn from_id(id: u8) -> Option<Self> {
        let cmd = match id & !MBRIDGE_COMMANDPACKET_MASK {
            0x02 => Self::TxLinkStats,
            0x03 => Self::RequestInfo,
            0x04 => Self::DeviceItemTx,
            0x05 => Self::DeviceItemRx,
            0x06 => Self::ParamRequestList,
            0x07 => Self::ParamItem,
            0x08 => Self::ParamItem2,
            0x09 => Self::ParamItem3,
            0x0A => Self::RequestCmd,
            0x0B => Self::Info,
            0x0C => Self::ParamSet,
            0x0D => Self::ParamStore,
            0x0E => Self::BindStart,
            0x0F => Self::BindStop,
            0x10 => Self::ModelIdSet,
            0x11 => Self::SystemBootloader,
            _ => return None,
        };
        Some(cmd)
    }

    /// 7-bit command id
    pub fn id(self) -> u8 {
        self as u8
    }

    /// Payload length carried by this command
    pub fn payload_len(self) -> usize {
        match self {
            Self::TxLinkStats => 22,
            Self::DeviceItemTx | Self::DeviceItemRx => 24,
            Self::ParamItem | Self::ParamItem2 | Self::ParamItem3 => 24,
            Self::RequestCmd => 18,
            Self::Info => 24,
            Self::ParamSet => 7,
            Self::ModelIdSet => 3,
            Self::RequestInfo
            | Self::ParamRequestList
            | Self::ParamStore
            | Self::BindStart
            | Self::BindStop
            | Self::SystemBootloader => 0,
        }
    }
}

/// Payload length of a command id; unknown ids carry no payload
pub fn mbridge_cmd_payload_len(id: u8) -> usize {
    MBridgeCmd::from_id(id).map_or(0, MBridgeCmd::payload_len)
}

/// Decoded channel packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelPacket {
    /// Analog channels (11-bit)
    pub analog: [u16; MBRIDGE_NUM_ANALOG_CHANNELS],

    /// Binary channels (1-bit)
    pub binary: [bool; MBRIDGE_NUM_BINARY_CHANNELS],
}

impl Default for ChannelPacket {
    fn default() -> Self {
        Self {
            analog: [RC_CHANNEL_VALUE_CENTER; MBRIDGE_NUM_ANALOG_CHANNELS],
            binary: [false; MBRIDGE_NUM_BINARY_CHANNELS],
        }
    }
}

impl ChannelPacket {
    /// Unpack a channel packet payload
    ///
    /// The payload is a continuous LSB-first bitstream: 16 fields of 11 bits
    /// followed by 2 fields of 1 bit.
    ///
    /// ```text
    /// Byte 0: Ch0[0:7]
    /// Byte 1: Ch0[8:10] | Ch1[0:4]
    /// Byte 2: Ch1[5:10] | Ch2[0:1]
    /// ...
    /// Byte 22: Ch16 (bit 0) | Ch17 (bit 1)
    /// ```
    pub fn from_bytes(buf: &[u8; MBRIDGE_CHANNELPACKET_SIZE]) -> Self {
        let mut packet = Self::default();
        let mut bit_index = 0;

        for channel in packet.analog.iter_mut() {
            let mut value = 0u16;
            for bit in 0..11 {
                if (buf[bit_index / 8] >> (bit_index % 8)) & 1 == 1 {
                    value |= 1 << bit;
                }
                bit_index += 1;
            }
            *channel = value;
        }

        for flag in packet.binary.iter_mut() {
            *flag = (buf[bit_index / 8] >> (bit_index % 8)) & 1 == 1;
            bit_index += 1;
        }

        packet
    }

    /// Pack into the wire payload, analog values are clamped to 11 bits
    pub fn to_bytes(&self) -> [u8; MBRIDGE_CHANNELPACKET_SIZE] {
        let mut buf = [0u8; MBRIDGE_CHANNELPACKET_SIZE];
        let mut bit_index = 0;

        for &channel in self.analog.iter() {
            let value = channel.min(RC_CHANNEL_VALUE_MAX);
            for bit in 0..11 {
                if (value >> bit) & 1 == 1 {
                    buf[bit_index / 8] |= 1 << (bit_index % 8);
                }
                bit_index += 1;
            }
        }

        for &flag in self.binary.iter() {
            if flag {
                buf[bit_index / 8] |= 1 << (bit_index % 8);
            }
            bit_index += 1;
        }

        buf
    }

    /// Convert to link channel values
    ///
    /// Analog channels are passed through, binary channels map to ±100%.
    pub fn to_rc_data(&self) -> RcData {
        let mut rc = [RC_CHANNEL_VALUE_CENTER; RC_NUM_CHANNELS];
        rc[..MBRIDGE_NUM_ANALOG_CHANNELS].copy_from_slice(&self.analog);
        for (n, &flag) in self.binary.iter().enumerate() {
            rc[MBRIDGE_NUM_ANALOG_CHANNELS + n] = if flag {
                RC_CHANNEL_BINARY_ON
            } else {
                RC_CHANNEL_BINARY_OFF
            };
        }
        rc
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_constants() {
        assert_eq!(MBRIDGE_STX1, b'O');
        assert_eq!(MBRIDGE_STX2, b'W');
        assert_eq!(MBRIDGE_CHANNELPACKET_STX, 0xFF);
        assert_eq!(MBRIDGE_R2M_COMMAND_FRAME_LEN_MAX, 25);
        assert_eq!(MBRIDGE_M2R_COMMAND_FRAME_LEN_MAX, 25);
        // Serial lengths must never collide with command discriminators
        assert!((MBRIDGE_R2M_SERIAL_PAYLOAD_LEN_MAX as u8) < MBRIDGE_COMMANDPACKET_STX);
    }

    #[test]
    fn test_channel_packet_size_fits_bits() {
        let bits = MBRIDGE_NUM_ANALOG_CHANNELS * 11 + MBRIDGE_NUM_BINARY_CHANNELS;
        assert_eq!((bits + 7) / 8, MBRIDGE_CHANNELPACKET_SIZE);
    }

    #[test]
    fn test_cmd_payload_len_table() {
        assert_eq!(mbridge_cmd_payload_len(MBridgeCmd::TxLinkStats.id()), 22);
        assert_eq!(mbridge_cmd_payload_len(MBridgeCmd::RequestInfo.id()), 0);
        assert_eq!(mbridge_cmd_payload_len(MBridgeCmd::ParamItem3.id()), 24);
        assert_eq!(mbridge_cmd_payload_len(MBridgeCmd::RequestCmd.id()), 18);
        assert_eq!(mbridge_cmd_payload_len(MBridgeCmd::ParamSet.id()), 7);
        assert_eq!(mbridge_cmd_payload_len(0x7E), 0, "unknown ids carry no payload");
    }

    #[test]
    fn test_cmd_payloads_fit_frames() {
        for id in 0..=0x7Fu8 {
            assert!(mbridge_cmd_payload_len(id) <= MBRIDGE_R2M_COMMAND_PAYLOAD_LEN_MAX);
        }
    }

    #[test]
    fn test_cmd_from_id_strips_marker() {
        assert_eq!(MBridgeCmd::from_id(0x80 | 0x06), Some(MBridgeCmd::ParamRequestList));
        assert_eq!(MBridgeCmd::from_id(0x00), None);
    }

    #[test]
    fn test_channel_packet_single_channel_bits() {
        let mut packet = ChannelPacket::default();
        packet.analog = [0; MBRIDGE_NUM_ANALOG_CHANNELS];
        packet.analog[0] = 0x7FF;

        let buf = packet.to_bytes();
        assert_eq!(buf[0], 0xFF);
        assert_eq!(buf[1], 0x07);
        assert!(buf[2..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_channel_packet_binary_bits_location() {
        let mut packet = ChannelPacket::default();
        packet.analog = [0; MBRIDGE_NUM_ANALOG_CHANNELS];
        packet.binary = [true, true];

        let buf = packet.to_bytes();
        // 176 analog bits end exactly at byte 22
        assert_eq!(buf[22], 0x03);
    }

    #[test]
    fn test_channel_packet_decode_matches_bits() {
        let mut packet = ChannelPacket::default();
        for (n, ch) in packet.analog.iter_mut().enumerate() {
            *ch = 1 + (n as u16) * 127;
        }
        packet.binary = [true, false];

        let decoded = ChannelPacket::from_bytes(&packet.to_bytes());
        assert_eq!(decoded, packet);
    }

    #[test]
    fn test_to_rc_data_binary_mapping() {
        let mut packet = ChannelPacket::default();
        packet.binary = [true, false];

        let rc = packet.to_rc_data();
        assert_eq!(rc[0], RC_CHANNEL_VALUE_CENTER);
        assert_eq!(rc[16], RC_CHANNEL_BINARY_ON);
        assert_eq!(rc[17], RC_CHANNEL_BINARY_OFF);
    }
}
