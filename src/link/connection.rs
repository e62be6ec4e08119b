//! # Connection Supervisor
//!
//! Decides whether the link is up from the per-cycle "valid frame received"
//! verdict.
//!
//! ```text
//! Listen --valid--> Sync --N more valid--> Connected
//!   ^                                          |
//!   +------- no valid frame for connect_tmo ---+
//! ```
//!
//! The timeout counts system ticks (1 ms), not cycles, so a connected link
//! survives transient fades of up to `connect_tmo` milliseconds.

use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectState {
    Listen,
    Sync,
    Connected,
}

/// Link-up state machine
#[derive(Debug, Clone)]
pub struct ConnectionSupervisor {
    state: ConnectState,
    sync_cnt: u8,
    tmo_cnt: u16,
    sync_threshold: u8,
    tmo_systicks: u16,
}

impl ConnectionSupervisor {
    /// # Arguments
    ///
    /// * `sync_threshold` - Valid cycles in Sync needed to connect
    /// * `tmo_systicks` - Ticks without a valid frame before the link drops
    pub fn new(sync_threshold: u8, tmo_systicks: u16) -> Self {
        Self {
            state: ConnectState::Listen,
            sync_cnt: 0,
            tmo_cnt: 0,
            sync_threshold,
            tmo_systicks,
        }
    }

    pub fn state(&self) -> ConnectState {
        self.state
    }

    pub fn connected(&self) -> bool {
        self.state == ConnectState::Connected
    }

    pub fn sync_cnt(&self) -> u8 {
        self.sync_cnt
    }

    /// 1 ms system tick
    pub fn tick_ms(&mut self) {
        self.tmo_cnt = self.tmo_cnt.saturating_sub(1);
    }

    /// Feed one cycle's verdict
    ///
    /// # Returns
    ///
    /// * `ConnectState` - State after this cycle
    pub fn update(&mut self, valid_frame_received: bool) -> ConnectState {
        let prev = self.state;

        if valid_frame_received {
            match self.state {
                ConnectState::Listen => {
                    self.state = ConnectState::Sync;
                    self.sync_cnt = 0;
                }
                ConnectState::Sync => {
                    self.sync_cnt = self.sync_cnt.saturating_add(1);
                    if self.sync_cnt >= self.sync_threshold {
                        self.state = ConnectState::Connected;
                    }
                }
                ConnectState::Connected => {}
            }
            self.tmo_cnt = self.tmo_systicks;
        }

        if self.connected() && self.tmo_cnt == 0 {
            self.state = ConnectState::Listen;
        }

        // only reachable while connected, a miss in Sync keeps the count
        if self.connected() && !valid_frame_received {
            self.sync_cnt = 0;
        }

        if self.state != prev {
            info!("Connection {:?} -> {:?}", prev, self.state);
        }
        self.state
    }
}
