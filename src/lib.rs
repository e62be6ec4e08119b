//! # mLRS Tx Library
//!
//! Transmitter-side core of a long-range RC link.
//!
//! The radio talks to the module over the MBridge, a half-duplex serial
//! protocol carrying RC channels, a transparent serial stream and commands.
//! The module runs the RF link to the receiver: one frame out and one frame
//! back per cycle, hopping frequency every cycle, optionally receiving on
//! two antennas.

pub mod config;
pub mod error;
pub mod link;
pub mod mbridge;
pub mod serial;
