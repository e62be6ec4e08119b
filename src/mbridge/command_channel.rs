//! # Command Channel
//!
//! Bounded queue of outbound MBridge commands waiting for a protocol turn.
//!
//! A lock serializes multi-message exchanges: while a command is in process
//! nothing is dequeued, whatever the queue holds.

use heapless::Deque;
use tracing::warn;

use super::protocol::MBridgeCmd;

/// Queue capacity
pub const COMMAND_FIFO_SIZE: usize = 128;

/// Pending outbound commands plus the in-process lock
#[derive(Debug, Default)]
pub struct CommandChannel {
    fifo: Deque<MBridgeCmd, COMMAND_FIFO_SIZE>,
    in_process: Option<MBridgeCmd>,
}

impl CommandChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a command
    ///
    /// Returns `false` if the queue is full and the command was dropped.
    pub fn enqueue(&mut self, cmd: MBridgeCmd) -> bool {
        if self.fifo.push_back(cmd).is_err() {
            warn!("Command queue full, dropping {:?}", cmd);
            return false;
        }
        true
    }

    /// Next queued command, unless locked or empty
    pub fn dequeue_next(&mut self) -> Option<MBridgeCmd> {
        if self.in_process.is_some() {
            return None;
        }
        self.fifo.pop_front()
    }

    /// Block dequeuing until [`unlock`](Self::unlock)
    pub fn lock(&mut self, cmd: MBridgeCmd) {
        self.in_process = Some(cmd);
    }

    pub fn unlock(&mut self) {
        self.in_process = None;
    }

    /// Command currently holding the lock
    pub fn locked_by(&self) -> Option<MBridgeCmd> {
        self.in_process
    }

    pub fn len(&self) -> usize {
        self.fifo.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fifo.is_empty()
    }

    /// Drop everything queued and release the lock
    pub fn clear(&mut self) {
        self.fifo.clear();
        self.in_process = None;
    }
}
