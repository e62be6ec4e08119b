//! # Link Module
//!
//! RF side of the transmitter: the per-cycle scheduler, antenna diversity,
//! connection supervision and the pieces they drive.

pub mod connection;
pub mod crc;
pub mod diversity;
pub mod fhss;
pub mod frame;
pub mod radio;
pub mod scheduler;
pub mod sim;
pub mod stats;
pub mod tunnel;

pub use connection::{ConnectState, ConnectionSupervisor};
pub use diversity::{Antenna, AntennaConfig, DiversitySelector};
pub use radio::{IrqMailbox, Radio};
pub use scheduler::{LinkScheduler, LinkState, RadioPort};
pub use stats::{LinkQualityTracker, Stats, WindowedLqTracker};
pub use tunnel::{FifoTunnel, SerialTunnel};
