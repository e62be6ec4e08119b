//! # MBridge Command Payloads
//!
//! Field-by-field encoding of the command payloads exchanged over MBridge.
//! All multi-byte fields are little-endian, bit fields are packed LSB first,
//! and every payload is zero padded to the length listed in the command table.

use super::params::ParamValue;
use super::protocol::MBridgeCmd;
use crate::error::{Result, TxError};

/// Invalid marker for RSSI fields
pub const RSSI_INVALID: i8 = 127;

/// Invalid marker for SNR fields
pub const SNR_INVALID: i8 = -128;

/// Parameter type tags as sent in PARAM_ITEM
pub const MBRIDGE_PARAM_TYPE_UINT8: u8 = 0;
pub const MBRIDGE_PARAM_TYPE_INT8: u8 = 1;
pub const MBRIDGE_PARAM_TYPE_UINT16: u8 = 2;
pub const MBRIDGE_PARAM_TYPE_INT16: u8 = 3;
pub const MBRIDGE_PARAM_TYPE_LIST: u8 = 4;
pub const MBRIDGE_PARAM_TYPE_STR6: u8 = 5;

/// Copy a string into a fixed, zero padded field (truncating)
pub fn strbuf<const N: usize>(s: &str) -> [u8; N] {
    let mut buf = [0u8; N];
    let bytes = s.as_bytes();
    let n = bytes.len().min(N);
    buf[..n].copy_from_slice(&bytes[..n]);
    buf
}

/// Read a zero terminated (or full length) string field
pub fn strbuf_to_string(buf: &[u8]) -> String {
    let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    String::from_utf8_lossy(&buf[..end]).into_owned()
}

fn ensure_len(cmd: MBridgeCmd, payload: &[u8]) -> Result<()> {
    if payload.len() < cmd.payload_len() {
        return Err(TxError::MBridgeProtocol(format!(
            "{:?} payload too short: {} bytes",
            cmd,
            payload.len()
        )));
    }
    Ok(())
}

/// Link statistics pushed to the radio after every channel packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkStats {
    // transmitter side
    pub lq: u8,
    pub rssi1_instantaneous: i8,
    pub rssi2_instantaneous: i8,
    pub snr_instantaneous: i8,
    pub receive_antenna: u8,
    pub transmit_antenna: u8,
    pub diversity: bool,
    pub rx1_valid: bool,
    pub rx2_valid: bool,
    pub rssi1_filtered: i8,
    pub rssi2_filtered: i8,
    pub snr_filtered: i8,

    // receiver side, as reported in the downlink
    pub receiver_lq: u8,
    pub receiver_lq_serial: u8,
    pub receiver_rssi_instantaneous: i8,
    pub receiver_receive_antenna: u8,
    pub receiver_transmit_antenna: u8,
    pub receiver_diversity: bool,
    pub receiver_rssi_filtered: i8,

    // further stats acquired on transmitter side
    pub lq_fresh_serial_packets_transmitted: u8,
    pub bytes_per_sec_transmitted: u8,
    pub lq_valid_received: u8,
    pub lq_fresh_serial_packets_received: u8,
    pub bytes_per_sec_received: u8,
    pub lq_received: u8,
    pub fhss_curr_i: u8,
    pub fhss_cnt: u8,
    pub vehicle_state: u8,
}

impl Default for LinkStats {
    fn default() -> Self {
        Self {
            lq: 0,
            rssi1_instantaneous: RSSI_INVALID,
            rssi2_instantaneous: RSSI_INVALID,
            snr_instantaneous: SNR_INVALID,
            receive_antenna: 0,
            transmit_antenna: 0,
            diversity: false,
            rx1_valid: false,
            rx2_valid: false,
            rssi1_filtered: RSSI_INVALID,
            rssi2_filtered: RSSI_INVALID,
            snr_filtered: SNR_INVALID,
            receiver_lq: 0,
            receiver_lq_serial: 0,
            receiver_rssi_instantaneous: RSSI_INVALID,
            receiver_receive_antenna: 0,
            receiver_transmit_antenna: 0,
            receiver_diversity: false,
            receiver_rssi_filtered: RSSI_INVALID,
            lq_fresh_serial_packets_transmitted: 0,
            bytes_per_sec_transmitted: 0,
            lq_valid_received: 0,
            lq_fresh_serial_packets_received: 0,
            bytes_per_sec_received: 0,
            lq_received: 0,
            fhss_curr_i: 0,
            fhss_cnt: 0,
            // 3 = unknown
            vehicle_state: 3,
        }
    }
}

impl LinkStats {
    pub fn to_payload(&self) -> [u8; 22] {
        let mut p = [0u8; 22];
        p[0] = self.lq;
        p[1] = self.rssi1_instantaneous as u8;
        p[2] = self.rssi2_instantaneous as u8;
        p[3] = self.snr_instantaneous as u8;
        p[4] = (self.receive_antenna & 0x01)
            | (self.transmit_antenna & 0x01) << 1
            | (self.diversity as u8) << 2
            | (self.rx1_valid as u8) << 3
            | (self.rx2_valid as u8) << 4;
        p[5] = self.rssi1_filtered as u8;
        p[6] = self.rssi2_filtered as u8;
        p[7] = self.snr_filtered as u8;
        p[8] = self.receiver_lq;
        p[9] = self.receiver_lq_serial;
        p[10] = self.receiver_rssi_instantaneous as u8;
        p[11] = (self.receiver_receive_antenna & 0x01)
            | (self.receiver_transmit_antenna & 0x01) << 1
            | (self.receiver_diversity as u8) << 2;
        p[12] = self.receiver_rssi_filtered as u8;
        p[13] = self.lq_fresh_serial_packets_transmitted;
        p[14] = self.bytes_per_sec_transmitted;
        p[15] = self.lq_valid_received;
        p[16] = self.lq_fresh_serial_packets_received;
        p[17] = self.bytes_per_sec_received;
        p[18] = self.lq_received;
        p[19] = self.fhss_curr_i;
        p[20] = self.fhss_cnt;
        p[21] = self.vehicle_state & 0x03;
        p
    }
}

/// Device identity, sent once for the module and once for the receiver
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DeviceItem {
    pub firmware_version: u16,
    pub setup_layout: u16,
    pub device_name: String,
}

impl DeviceItem {
    pub fn to_payload(&self) -> [u8; 24] {
        let mut p = [0u8; 24];
        p[0..2].copy_from_slice(&self.firmware_version.to_le_bytes());
        p[2..4].copy_from_slice(&self.setup_layout.to_le_bytes());
        p[4..24].copy_from_slice(&strbuf::<20>(&self.device_name));
        p
    }
}

/// Pack a dotted version "major.minor.patch" into the u16 wire format
///
/// `major` takes bits 15..14 (capped), `minor` bits 13..6 and `patch` bits 5..0.
pub fn version_to_u16(major: u8, minor: u8, patch: u8) -> u16 {
    ((major.min(3) as u16) << 14) | ((minor as u16) << 6) | (patch.min(63) as u16)
}

/// Capability exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Info {
    pub receiver_sensitivity: i16,
    pub tx_actual_power_dbm: i8,
    /// 0 = diversity, 1 = antenna 1, 2 = antenna 2, 3 = invalid
    pub tx_actual_diversity: u8,
    pub rx_available: bool,
    pub rx_actual_power_dbm: i8,
    pub rx_actual_diversity: u8,
}

impl Info {
    pub fn to_payload(&self) -> [u8; 24] {
        let mut p = [0u8; 24];
        p[0..2].copy_from_slice(&self.receiver_sensitivity.to_le_bytes());
        p[2] = self.tx_actual_power_dbm as u8;
        p[3] = self.tx_actual_diversity;
        p[4] = self.rx_available as u8;
        p[5] = self.rx_actual_power_dbm as u8;
        p[6] = self.rx_actual_diversity;
        p
    }
}

/// First parameter sub-message: index, type, current value and name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamItem {
    pub index: u8,
    pub param_type: u8,
    pub value: [u8; 6],
    pub name: String,
}

impl ParamItem {
    /// Sentinel item terminating a parameter list download
    pub fn end_of_list() -> Self {
        Self {
            index: u8::MAX,
            param_type: 0,
            value: [0; 6],
            name: String::new(),
        }
    }

    pub fn to_payload(&self) -> [u8; 24] {
        let mut p = [0u8; 24];
        p[0] = self.index;
        p[1] = self.param_type;
        p[2..8].copy_from_slice(&self.value);
        p[8..24].copy_from_slice(&strbuf::<16>(&self.name));
        p
    }
}

/// Second parameter sub-message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamItem2 {
    /// Scalar parameters: default, min, max and unit
    Scalar {
        index: u8,
        dflt: [u8; 2],
        min: [u8; 2],
        max: [u8; 2],
        unit: String,
    },
    /// List parameters: allowed option mask and the first 21 option chars
    List {
        index: u8,
        allowed_mask: u16,
        options: [u8; 21],
    },
}

impl ParamItem2 {
    pub fn to_payload(&self) -> [u8; 24] {
        let mut p = [0u8; 24];
        match self {
            Self::Scalar { index, dflt, min, max, unit } => {
                p[0] = *index;
                p[1..3].copy_from_slice(dflt);
                p[3..5].copy_from_slice(min);
                p[5..7].copy_from_slice(max);
                p[7..13].copy_from_slice(&strbuf::<6>(unit));
            }
            Self::List { index, allowed_mask, options } => {
                p[0] = *index;
                p[1..3].copy_from_slice(&allowed_mask.to_le_bytes());
                p[3..24].copy_from_slice(options);
            }
        }
        p
    }
}

/// Third parameter sub-message: option string overflow
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamItem3 {
    pub index: u8,
    pub options2: [u8; 23],
}

impl ParamItem3 {
    pub fn to_payload(&self) -> [u8; 24] {
        let mut p = [0u8; 24];
        p[0] = self.index;
        p[1..24].copy_from_slice(&self.options2);
        p
    }
}

/// Request from the radio for a specific command to be sent back
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestCmd {
    pub requested_cmd: u8,
    pub index: u8,
    pub name: String,
}

impl RequestCmd {
    pub fn from_payload(payload: &[u8]) -> Result<Self> {
        ensure_len(MBridgeCmd::RequestCmd, payload)?;
        Ok(Self {
            requested_cmd: payload[0],
            index: payload[1],
            name: strbuf_to_string(&payload[2..18]),
        })
    }
}

/// Parameter write from the radio
///
/// The 6 value bytes are interpreted according to the target parameter's
/// type, so the raw union is kept until the parameter is known.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParamSet {
    pub index: u8,
    pub value: [u8; 6],
}

impl ParamSet {
    pub fn from_payload(payload: &[u8]) -> Result<Self> {
        ensure_len(MBridgeCmd::ParamSet, payload)?;
        let mut value = [0u8; 6];
        value.copy_from_slice(&payload[1..7]);
        Ok(Self { index: payload[0], value })
    }

    pub fn to_payload(&self) -> [u8; 7] {
        let mut p = [0u8; 7];
        p[0] = self.index;
        p[1..7].copy_from_slice(&self.value);
        p
    }
}

/// Wire type tag of a parameter value
pub fn param_type_tag(value: &ParamValue) -> u8 {
    match value {
        ParamValue::U8(_) => MBRIDGE_PARAM_TYPE_UINT8,
        ParamValue::I8(_) => MBRIDGE_PARAM_TYPE_INT8,
        ParamValue::U16(_) => MBRIDGE_PARAM_TYPE_UINT16,
        ParamValue::I16(_) => MBRIDGE_PARAM_TYPE_INT16,
        ParamValue::List(_) => MBRIDGE_PARAM_TYPE_LIST,
        ParamValue::Str6(_) => MBRIDGE_PARAM_TYPE_STR6,
    }
}
