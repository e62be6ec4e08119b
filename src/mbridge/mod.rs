//! # MBridge Module
//!
//! Half-duplex serial protocol between the radio's JR bay and this module.
//!
//! The radio polls with a frame every few milliseconds; the module answers
//! each frame with at most one frame of its own. Besides RC channels the
//! protocol carries a serial tunnel in both directions and a command channel
//! for device info, link statistics and the parameter protocol.

pub mod command_channel;
pub mod commands;
pub mod framer;
pub mod params;
pub mod protocol;
pub mod service;

pub use command_channel::CommandChannel;
pub use framer::{MBridgeFramer, ParserState};
pub use params::{ParameterTable, SetupParameters};
pub use service::{ChannelOrder, MBridgeEvent, MBridgeService};
