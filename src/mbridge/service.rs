//! # MBridge Service
//!
//! Main-loop side of the MBridge: consumes what the framer parsed, answers
//! requests, and feeds the framer one outbound command per protocol turn.
//!
//! The framer holds a single outbound command slot. A command is only
//! produced when that slot is free, so nothing queued is ever overwritten.

use serde::Deserialize;
use tracing::{debug, info, warn};

use super::command_channel::CommandChannel;
use super::commands::{DeviceItem, Info, LinkStats, ParamSet, RequestCmd};
use super::framer::{MBridgeFramer, ReceivedCommand};
use super::params::{do_param_set, ParamListStreamer, ParameterTable};
use super::protocol::{MBridgeCmd, RcData};

/// Stick order of the first four channels delivered by the radio
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelOrder {
    #[default]
    Aetr,
    Taer,
    Etar,
}

impl ChannelOrder {
    /// Source index for each of the first four output channels
    fn channel_map(self) -> [usize; 4] {
        match self {
            Self::Aetr => [0, 1, 2, 3],
            Self::Taer => [1, 2, 0, 3],
            Self::Etar => [2, 0, 1, 3],
        }
    }

    /// Reorder the first four channels into AETR
    pub fn apply(self, rc: &mut RcData) {
        let ch = [rc[0], rc[1], rc[2], rc[3]];
        for (n, &src) in self.channel_map().iter().enumerate() {
            rc[n] = ch[src];
        }
    }
}

/// Identity and RF setup of this transmitter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxDeviceInfo {
    pub device: DeviceItem,
    pub receiver_sensitivity_dbm: i16,
    pub actual_power_dbm: i8,
    /// 0 = diversity, 1 = antenna 1, 2 = antenna 2
    pub actual_diversity: u8,
}

/// What is known about the receiver, reported by it over the link
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiverInfo {
    pub device: DeviceItem,
    pub actual_power_dbm: i8,
    pub actual_diversity: u8,
}

/// Command from the radio that has to be acted upon outside the MBridge
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MBridgeEvent {
    /// A parameter was changed, `rx_param_changed` if the receiver has to follow
    ParamChanged { index: u8, rx_param_changed: bool },
    ParamStore,
    BindStart,
    BindStop,
    ModelIdSet(u8),
    SystemBootloader,
}

/// Main-loop MBridge handler
pub struct MBridgeService<P: ParameterTable> {
    commands: CommandChannel,
    streamer: ParamListStreamer,
    params: P,
    tx_info: TxDeviceInfo,
    receiver: Option<ReceiverInfo>,
    channel_order: ChannelOrder,
    rc_data: Option<RcData>,
}

impl<P: ParameterTable> MBridgeService<P> {
    pub fn new(params: P, tx_info: TxDeviceInfo, channel_order: ChannelOrder) -> Self {
        Self {
            commands: CommandChannel::new(),
            streamer: ParamListStreamer::new(),
            params,
            tx_info,
            receiver: None,
            channel_order,
            rc_data: None,
        }
    }

    pub fn params(&self) -> &P {
        &self.params
    }

    pub fn commands(&self) -> &CommandChannel {
        &self.commands
    }

    pub fn set_receiver(&mut self, receiver: Option<ReceiverInfo>) {
        self.receiver = receiver;
    }

    pub fn set_channel_order(&mut self, order: ChannelOrder) {
        self.channel_order = order;
    }

    /// Take the latest channels received from the radio
    pub fn take_rc_data(&mut self) -> Option<RcData> {
        self.rc_data.take()
    }

    /// One main-loop pass
    ///
    /// # Arguments
    ///
    /// * `framer` - The framer shared with the UART interrupt
    /// * `link_stats` - Current link statistics, pushed when channels arrive
    ///   and no command is waiting
    ///
    /// # Returns
    ///
    /// * `Option<MBridgeEvent>` - A received command that needs handling elsewhere
    pub fn poll(&mut self, framer: &mut MBridgeFramer, link_stats: &LinkStats) -> Option<MBridgeEvent> {
        let channels_received = match framer.channels_updated() {
            Some(packet) => {
                let mut rc = packet.to_rc_data();
                self.channel_order.apply(&mut rc);
                self.rc_data = Some(rc);
                true
            }
            None => false,
        };

        let event = framer
            .command_received()
            .and_then(|cmd| self.handle_command(&cmd));

        if !framer.command_pending() {
            self.send_next(framer);
        }

        // stats only fill a turn no queued or locked command wants
        if channels_received && !framer.command_pending() {
            framer.send_command(MBridgeCmd::TxLinkStats, &link_stats.to_payload());
        }

        event
    }

    fn handle_command(&mut self, cmd: &ReceivedCommand) -> Option<MBridgeEvent> {
        let Some(kind) = cmd.cmd() else {
            warn!("Unknown MBridge command 0x{:02X}", cmd.id);
            return None;
        };
        debug!("MBridge command {:?}", kind);

        match kind {
            MBridgeCmd::RequestCmd => match RequestCmd::from_payload(&cmd.payload) {
                Ok(request) => self.handle_request(request.requested_cmd),
                Err(e) => warn!("Bad REQUEST_CMD: {}", e),
            },
            MBridgeCmd::RequestInfo | MBridgeCmd::ParamRequestList => self.handle_request(kind.id()),
            MBridgeCmd::ParamSet => {
                let set = match ParamSet::from_payload(&cmd.payload) {
                    Ok(set) => set,
                    Err(e) => {
                        warn!("Bad PARAM_SET: {}", e);
                        return None;
                    }
                };
                return match do_param_set(&mut self.params, &set) {
                    Ok(rx_param_changed) => Some(MBridgeEvent::ParamChanged {
                        index: set.index,
                        rx_param_changed,
                    }),
                    Err(_) => None,
                };
            }
            MBridgeCmd::ParamStore => return Some(MBridgeEvent::ParamStore),
            MBridgeCmd::BindStart => return Some(MBridgeEvent::BindStart),
            MBridgeCmd::BindStop => return Some(MBridgeEvent::BindStop),
            MBridgeCmd::ModelIdSet => {
                let model_id = cmd.payload.first().copied().unwrap_or(0);
                return Some(MBridgeEvent::ModelIdSet(model_id));
            }
            MBridgeCmd::SystemBootloader => return Some(MBridgeEvent::SystemBootloader),
            _ => warn!("Unexpected MBridge command {:?} from radio", kind),
        }
        None
    }

    /// Queue the responses to a request
    fn handle_request(&mut self, requested: u8) {
        match MBridgeCmd::from_id(requested) {
            Some(cmd @ (MBridgeCmd::DeviceItemTx | MBridgeCmd::DeviceItemRx | MBridgeCmd::Info)) => {
                self.commands.enqueue(cmd);
            }
            Some(MBridgeCmd::RequestInfo) => {
                self.commands.enqueue(MBridgeCmd::DeviceItemTx);
                self.commands.enqueue(MBridgeCmd::DeviceItemRx);
                self.commands.enqueue(MBridgeCmd::Info);
            }
            Some(MBridgeCmd::ParamRequestList) => {
                info!("Parameter list requested ({} parameters)", self.params.len());
                self.streamer.start();
                self.commands.enqueue(MBridgeCmd::ParamItem);
            }
            // single parameter by index is not supported, the radio falls back to the list
            Some(MBridgeCmd::ParamItem) => {}
            _ => warn!("Unsupported request 0x{:02X}", requested),
        }
    }

    /// Produce the next outbound command, framer slot must be free
    fn send_next(&mut self, framer: &mut MBridgeFramer) {
        // a locked command continues before anything else is dequeued
        let cmd = match self.commands.locked_by() {
            Some(cmd) => cmd,
            None => match self.commands.dequeue_next() {
                Some(cmd) => cmd,
                None => return,
            },
        };

        match cmd {
            MBridgeCmd::DeviceItemTx => {
                framer.send_command(cmd, &self.tx_info.device.to_payload());
            }
            MBridgeCmd::DeviceItemRx => {
                let item = self
                    .receiver
                    .as_ref()
                    .map(|r| r.device.clone())
                    .unwrap_or_default();
                framer.send_command(cmd, &item.to_payload());
            }
            MBridgeCmd::Info => {
                framer.send_command(cmd, &self.info().to_payload());
            }
            MBridgeCmd::ParamItem => {
                let step = self.streamer.next_step(&self.params);
                framer.send_command(step.cmd, &step.payload);

                if self.streamer.in_item() {
                    self.commands.lock(MBridgeCmd::ParamItem);
                } else {
                    self.commands.unlock();
                    if step.more {
                        self.commands.enqueue(MBridgeCmd::ParamItem);
                    }
                }
            }
            _ => warn!("No handler for queued command {:?}", cmd),
        }
    }

    fn info(&self) -> Info {
        let (rx_available, rx_actual_power_dbm, rx_actual_diversity) = match &self.receiver {
            Some(r) => (true, r.actual_power_dbm, r.actual_diversity),
            None => (false, i8::MAX, 3),
        };
        Info {
            receiver_sensitivity: self.tx_info.receiver_sensitivity_dbm,
            tx_actual_power_dbm: self.tx_info.actual_power_dbm,
            tx_actual_diversity: self.tx_info.actual_diversity,
            rx_available,
            rx_actual_power_dbm,
            rx_actual_diversity,
        }
    }
}
