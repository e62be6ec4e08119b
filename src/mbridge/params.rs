//! # Setup Parameters
//!
//! Parameter table access for the MBridge parameter protocol.
//!
//! The persistent setup storage lives outside of this crate; it is reached
//! through the [`ParameterTable`] trait. [`SetupParameters`] is a plain
//! in-memory table used by the host runner and the tests.
//!
//! ## Parameter list download
//!
//! Every parameter needs two or three PARAM_ITEM messages. The radio only
//! accepts one command per protocol turn, so [`ParamListStreamer`] hands out
//! one sub-message per call and tells the caller whether to queue itself
//! again:
//!
//! ```text
//! PARAM_ITEM  (index, type, value, name)
//! PARAM_ITEM2 (default/min/max/unit, or allowed mask + options[0..21])
//! PARAM_ITEM3 (options[21..44])         only if the options do not fit
//! ...
//! PARAM_ITEM  (index = 255)             end of list, not re-queued
//! ```

use tracing::{debug, warn};

use super::commands::{
    param_type_tag, strbuf, ParamItem, ParamItem2, ParamItem3, ParamSet,
};
use super::protocol::MBridgeCmd;
use crate::error::{Result, TxError};

/// Option characters carried inline by PARAM_ITEM2
pub const PARAM_OPTIONS_INLINE_LEN: usize = 21;

/// Option characters carried by PARAM_ITEM3
pub const PARAM_OPTIONS_OVERFLOW_LEN: usize = 23;

/// Tagged parameter value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamValue {
    U8(u8),
    I8(i8),
    U16(u16),
    I16(i16),
    /// Index into the parameter's option list
    List(u8),
    Str6([u8; 6]),
}

impl ParamValue {
    /// Encode into the 6 byte value union used on the wire
    pub fn to_union(&self) -> [u8; 6] {
        let mut buf = [0u8; 6];
        match *self {
            Self::U8(v) | Self::List(v) => buf[0] = v,
            Self::I8(v) => buf[0] = v as u8,
            Self::U16(v) => buf[..2].copy_from_slice(&v.to_le_bytes()),
            Self::I16(v) => buf[..2].copy_from_slice(&v.to_le_bytes()),
            Self::Str6(s) => buf = s,
        }
        buf
    }

    /// 2 byte scalar union used by PARAM_ITEM2 default/min/max fields
    fn to_scalar_union(self) -> [u8; 2] {
        let u = self.to_union();
        [u[0], u[1]]
    }

    /// Reinterpret a wire union with the same variant as `self`
    pub fn with_union(&self, raw: &[u8; 6]) -> Self {
        match self {
            Self::U8(_) => Self::U8(raw[0]),
            Self::I8(_) => Self::I8(raw[0] as i8),
            Self::U16(_) => Self::U16(u16::from_le_bytes([raw[0], raw[1]])),
            Self::I16(_) => Self::I16(i16::from_le_bytes([raw[0], raw[1]])),
            Self::List(_) => Self::List(raw[0]),
            Self::Str6(_) => Self::Str6(*raw),
        }
    }
}

/// Static description of a parameter
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamKind {
    U8 { dflt: u8, min: u8, max: u8, unit: String },
    I8 { dflt: i8, min: i8, max: i8, unit: String },
    U16 { dflt: u16, min: u16, max: u16, unit: String },
    I16 { dflt: i16, min: i16, max: i16, unit: String },
    /// Comma separated option list, `allowed_mask` restricts selectable options
    List { dflt: u8, options: String, allowed_mask: Option<u16> },
    Str6 { dflt: String },
}

impl ParamKind {
    /// Default value of this parameter
    pub fn default_value(&self) -> ParamValue {
        match self {
            Self::U8 { dflt, .. } => ParamValue::U8(*dflt),
            Self::I8 { dflt, .. } => ParamValue::I8(*dflt),
            Self::U16 { dflt, .. } => ParamValue::U16(*dflt),
            Self::I16 { dflt, .. } => ParamValue::I16(*dflt),
            Self::List { dflt, .. } => ParamValue::List(*dflt),
            Self::Str6 { dflt } => ParamValue::Str6(strbuf::<6>(dflt)),
        }
    }
}

/// Named parameter with its description
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamDescriptor {
    pub name: String,
    pub kind: ParamKind,
}

impl ParamDescriptor {
    pub fn new(name: &str, kind: ParamKind) -> Self {
        Self { name: name.to_string(), kind }
    }

    /// Parameter belongs to the receiver and must be sent over the link when changed
    pub fn is_rx_param(&self) -> bool {
        self.name.starts_with("Rx ")
    }
}

/// Access to the setup parameter storage
pub trait ParameterTable {
    /// Number of parameters
    fn len(&self) -> usize;

    /// Whether the table holds no parameters
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Description of parameter `index`
    fn descriptor(&self, index: usize) -> Option<&ParamDescriptor>;

    /// Current value of parameter `index`
    fn value(&self, index: usize) -> Option<ParamValue>;

    /// Store a new value
    ///
    /// Returns whether a receiver-side parameter changed.
    fn set_value(&mut self, index: usize, value: ParamValue) -> Result<bool>;
}

/// In-memory parameter table
#[derive(Debug, Clone, Default)]
pub struct SetupParameters {
    entries: Vec<(ParamDescriptor, ParamValue)>,
}

impl SetupParameters {
    /// Build a table with every parameter at its default
    pub fn new(descriptors: Vec<ParamDescriptor>) -> Self {
        let entries = descriptors
            .into_iter()
            .map(|d| {
                let value = d.kind.default_value();
                (d, value)
            })
            .collect();
        Self { entries }
    }

    /// The transmitter's standard parameter set
    pub fn standard() -> Self {
        fn list(dflt: u8, options: &str) -> ParamKind {
            ParamKind::List { dflt, options: options.to_string(), allowed_mask: None }
        }

        Self::new(vec![
            ParamDescriptor::new("Bind Phrase", ParamKind::Str6 { dflt: "mlrs.0".to_string() }),
            ParamDescriptor::new(
                "Mode",
                ParamKind::List {
                    dflt: 0,
                    options: "50 Hz,31 Hz,19 Hz".to_string(),
                    allowed_mask: Some(0b111),
                },
            ),
            ParamDescriptor::new("Tx Power", list(2, "min,10 mW,50 mW,100 mW")),
            ParamDescriptor::new("Tx Diversity", list(0, "enabled,antenna1,antenna2")),
            ParamDescriptor::new("Tx Ch Source", list(1, "none,mbridge,in,crsf")),
            ParamDescriptor::new("Tx Ch Order", list(0, "AETR,TAER,ETAR")),
            ParamDescriptor::new("Tx Ser Dest", list(1, "serial,mbridge")),
            ParamDescriptor::new("Tx Ser Baudrate", list(4, "9600,19200,38400,57600,115200")),
            ParamDescriptor::new("Tx Ser Link Mode", list(0, "transp.,mavlink")),
            ParamDescriptor::new("Rx Power", list(2, "min,10 mW,50 mW,100 mW")),
            ParamDescriptor::new("Rx Diversity", list(0, "enabled,antenna1,antenna2")),
            ParamDescriptor::new("Rx Out Mode", list(0, "sbus,crsf,sbus inv")),
            ParamDescriptor::new(
                "Rx FailSafe Mode",
                list(0, "no sig,low thr,by cnf,low thr cnt,ch1-4 cnt"),
            ),
            ParamDescriptor::new("Rx Ser Baudrate", list(4, "9600,19200,38400,57600,115200")),
            ParamDescriptor::new(
                "Rx FS Ch1",
                ParamKind::I16 { dflt: 0, min: -120, max: 120, unit: "%".to_string() },
            ),
        ])
    }
}

impl ParameterTable for SetupParameters {
    fn len(&self) -> usize {
        self.entries.len()
    }

    fn descriptor(&self, index: usize) -> Option<&ParamDescriptor> {
        self.entries.get(index).map(|(d, _)| d)
    }

    fn value(&self, index: usize) -> Option<ParamValue> {
        self.entries.get(index).map(|(_, v)| *v)
    }

    fn set_value(&mut self, index: usize, value: ParamValue) -> Result<bool> {
        let (descriptor, current) = self
            .entries
            .get_mut(index)
            .ok_or(TxError::ParamIndex(index.min(u8::MAX as usize) as u8))?;

        let reject = |reason: &str| TxError::ParamRejected {
            name: descriptor.name.clone(),
            reason: reason.to_string(),
        };

        match (&descriptor.kind, value) {
            (ParamKind::U8 { min, max, .. }, ParamValue::U8(v)) if !(*min..=*max).contains(&v) => {
                return Err(reject("out of range"));
            }
            (ParamKind::I8 { min, max, .. }, ParamValue::I8(v)) if !(*min..=*max).contains(&v) => {
                return Err(reject("out of range"));
            }
            (ParamKind::U16 { min, max, .. }, ParamValue::U16(v)) if !(*min..=*max).contains(&v) => {
                return Err(reject("out of range"));
            }
            (ParamKind::I16 { min, max, .. }, ParamValue::I16(v)) if !(*min..=*max).contains(&v) => {
                return Err(reject("out of range"));
            }
            (ParamKind::List { options, allowed_mask, .. }, ParamValue::List(v)) => {
                let count = options.split(',').count();
                if v as usize >= count {
                    return Err(reject("option out of range"));
                }
                if let Some(mask) = allowed_mask {
                    if v >= 16 || mask & (1 << v) == 0 {
                        return Err(reject("option not allowed"));
                    }
                }
            }
            (ParamKind::U8 { .. }, ParamValue::U8(_))
            | (ParamKind::I8 { .. }, ParamValue::I8(_))
            | (ParamKind::U16 { .. }, ParamValue::U16(_))
            | (ParamKind::I16 { .. }, ParamValue::I16(_))
            | (ParamKind::Str6 { .. }, ParamValue::Str6(_)) => {}
            _ => return Err(reject("type mismatch")),
        }

        let changed = *current != value;
        *current = value;
        Ok(changed && descriptor.is_rx_param())
    }
}

/// One message produced by the parameter list download
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamStreamStep {
    pub cmd: MBridgeCmd,
    pub payload: [u8; 24],
    /// The PARAM_ITEM token has to be queued again
    pub more: bool,
}

/// Paginated parameter list download
#[derive(Debug, Clone, Default)]
pub struct ParamListStreamer {
    param_idx: usize,
    itemtype_cnt: u8,
}

impl ParamListStreamer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Restart the download at the first parameter
    pub fn start(&mut self) {
        self.param_idx = 0;
        self.itemtype_cnt = 0;
    }

    /// A parameter's continuation messages are still to come
    pub fn in_item(&self) -> bool {
        self.itemtype_cnt != 0
    }

    /// Produce the next sub-message
    pub fn next_step<T: ParameterTable + ?Sized>(&mut self, table: &T) -> ParamStreamStep {
        let (descriptor, value) = match (
            table.descriptor(self.param_idx),
            table.value(self.param_idx),
        ) {
            (Some(d), Some(v)) if self.param_idx < u8::MAX as usize => (d, v),
            _ => {
                debug!("Parameter list complete ({} parameters)", self.param_idx);
                return ParamStreamStep {
                    cmd: MBridgeCmd::ParamItem,
                    payload: ParamItem::end_of_list().to_payload(),
                    more: false,
                };
            }
        };
        let index = self.param_idx as u8;

        let (cmd, payload) = match self.itemtype_cnt {
            0 => {
                let item = ParamItem {
                    index,
                    param_type: param_type_tag(&value),
                    value: value.to_union(),
                    name: descriptor.name.clone(),
                };
                self.itemtype_cnt = 1;
                (MBridgeCmd::ParamItem, item.to_payload())
            }
            1 => {
                let mut item3_needed = false;
                let item2 = match &descriptor.kind {
                    ParamKind::U8 { dflt, min, max, unit } => ParamItem2::Scalar {
                        index,
                        dflt: ParamValue::U8(*dflt).to_scalar_union(),
                        min: ParamValue::U8(*min).to_scalar_union(),
                        max: ParamValue::U8(*max).to_scalar_union(),
                        unit: unit.clone(),
                    },
                    ParamKind::I8 { dflt, min, max, unit } => ParamItem2::Scalar {
                        index,
                        dflt: ParamValue::I8(*dflt).to_scalar_union(),
                        min: ParamValue::I8(*min).to_scalar_union(),
                        max: ParamValue::I8(*max).to_scalar_union(),
                        unit: unit.clone(),
                    },
                    ParamKind::U16 { dflt, min, max, unit } => ParamItem2::Scalar {
                        index,
                        dflt: ParamValue::U16(*dflt).to_scalar_union(),
                        min: ParamValue::U16(*min).to_scalar_union(),
                        max: ParamValue::U16(*max).to_scalar_union(),
                        unit: unit.clone(),
                    },
                    ParamKind::I16 { dflt, min, max, unit } => ParamItem2::Scalar {
                        index,
                        dflt: ParamValue::I16(*dflt).to_scalar_union(),
                        min: ParamValue::I16(*min).to_scalar_union(),
                        max: ParamValue::I16(*max).to_scalar_union(),
                        unit: unit.clone(),
                    },
                    ParamKind::List { options, allowed_mask, .. } => {
                        item3_needed = options.len() >= PARAM_OPTIONS_INLINE_LEN;
                        ParamItem2::List {
                            index,
                            allowed_mask: allowed_mask.unwrap_or(u16::MAX),
                            options: strbuf::<PARAM_OPTIONS_INLINE_LEN>(options),
                        }
                    }
                    // nothing beyond the value for strings
                    ParamKind::Str6 { .. } => ParamItem2::Scalar {
                        index,
                        dflt: [0; 2],
                        min: [0; 2],
                        max: [0; 2],
                        unit: String::new(),
                    },
                };

                if item3_needed {
                    self.itemtype_cnt = 2;
                } else {
                    self.itemtype_cnt = 0;
                    self.param_idx += 1;
                }
                (MBridgeCmd::ParamItem2, item2.to_payload())
            }
            _ => {
                let overflow = match &descriptor.kind {
                    ParamKind::List { options, .. } => options
                        .get(PARAM_OPTIONS_INLINE_LEN..)
                        .unwrap_or(""),
                    _ => "",
                };
                let item3 = ParamItem3 {
                    index,
                    options2: strbuf::<PARAM_OPTIONS_OVERFLOW_LEN>(overflow),
                };
                self.itemtype_cnt = 0;
                self.param_idx += 1;
                (MBridgeCmd::ParamItem3, item3.to_payload())
            }
        };

        ParamStreamStep { cmd, payload, more: true }
    }
}

/// Apply a PARAM_SET request
///
/// Returns whether a receiver-side parameter changed. An out of range index or
/// a value the table refuses leaves the table untouched.
pub fn do_param_set<T: ParameterTable + ?Sized>(table: &mut T, set: &ParamSet) -> Result<bool> {
    let index = set.index as usize;
    let current = match table.value(index) {
        Some(v) => v,
        None => {
            warn!("PARAM_SET for unknown index {}", set.index);
            return Err(TxError::ParamIndex(set.index));
        }
    };

    let value = current.with_union(&set.value);
    table.set_value(index, value).map_err(|e| {
        warn!("PARAM_SET rejected: {}", e);
        e
    })
}
