//! # Serial Communication Module
//!
//! Host serial ports of the transmitter.
//!
//! This module handles:
//! - Opening the JR bay port the radio speaks MBridge on
//! - Opening an optional second port for the serial tunnel
//! - Feeding received bytes through the MBridge framer and writing back
//!   the response of each completed frame

pub mod port_trait;

use std::time::Instant;

use crate::error::{Result, TxError};
use crate::mbridge::MBridgeFramer;
use port_trait::{SerialPortIO, TokioSerialPort};
use tokio_serial::SerialPortBuilderExt;
use tracing::{debug, info, warn};

/// Device paths to try when the configured one cannot be opened
pub const FALLBACK_DEVICE_PATHS: &[&str] = &[
    "/dev/ttyUSB0", // USB-to-serial adapters
    "/dev/ttyACM0", // USB CDC devices
];

/// Wrapping microsecond clock for the framer's inter-byte timeout
#[derive(Debug, Clone, Copy)]
pub struct MicrosClock {
    start: Instant,
}

impl MicrosClock {
    pub fn new() -> Self {
        Self { start: Instant::now() }
    }

    /// Microseconds since start, wrapping at 16 bits
    pub fn now_us(&self) -> u16 {
        (self.start.elapsed().as_micros() & 0xFFFF) as u16
    }
}

impl Default for MicrosClock {
    fn default() -> Self {
        Self::new()
    }
}

/// Serial port opened on the host
pub struct HostSerial {
    /// Serial port handle
    port: Box<dyn SerialPortIO>,
    /// Device path (e.g., /dev/ttyUSB0)
    device_path: String,
}

impl std::fmt::Debug for HostSerial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostSerial")
            .field("device_path", &self.device_path)
            .finish_non_exhaustive()
    }
}

impl HostSerial {
    /// Open the first device that works, in the given order
    ///
    /// # Arguments
    ///
    /// * `paths` - Device paths to try (e.g., &["/dev/ttyUSB0"])
    /// * `baud_rate` - Line speed
    ///
    /// # Returns
    ///
    /// * `Result<HostSerial>` - Opened serial port or error
    ///
    /// # Errors
    ///
    /// Returns error if none of the paths can be opened
    pub fn open_with_paths(paths: &[&str], baud_rate: u32) -> Result<Self> {
        for path in paths {
            debug!("Trying to open serial port: {}", path);

            match Self::open_port(path, baud_rate) {
                Ok(port) => {
                    info!("Opened {} at {} baud", path, baud_rate);
                    return Ok(Self {
                        port: Box::new(TokioSerialPort::new(port)),
                        device_path: path.to_string(),
                    });
                }
                Err(e) => {
                    warn!("Failed to open {}: {}", path, e);
                    continue;
                }
            }
        }

        Err(TxError::SerialPortNotFound(paths.join(", ")))
    }

    /// Wrap an already opened port
    pub fn from_port(port: Box<dyn SerialPortIO>, device_path: &str) -> Self {
        Self {
            port,
            device_path: device_path.to_string(),
        }
    }

    /// Open a specific serial port, 8N1 without flow control
    fn open_port(path: &str, baud_rate: u32) -> Result<tokio_serial::SerialStream> {
        let port = tokio_serial::new(path, baud_rate)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .flow_control(tokio_serial::FlowControl::None)
            .open_native_async()
            .map_err(|e| TxError::Serial(format!("Failed to open {}: {}", path, e)))?;

        Ok(port)
    }

    /// Read what the port has, waiting for at least one byte
    pub async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.port
            .read(buf)
            .await
            .map_err(|e| TxError::Serial(format!("Failed to read: {}", e)))
    }

    /// Write and flush
    pub async fn send(&mut self, data: &[u8]) -> Result<()> {
        self.port
            .write_all(data)
            .await
            .map_err(|e| TxError::Serial(format!("Failed to write: {}", e)))?;

        self.port
            .flush()
            .await
            .map_err(|e| TxError::Serial(format!("Failed to flush serial port: {}", e)))?;

        Ok(())
    }

    /// Run received MBridge bytes through the framer
    ///
    /// Every frame the radio completes is answered right away. The framer
    /// turn ends once the answer has been written.
    ///
    /// # Returns
    ///
    /// * `Result<usize>` - Number of responses sent
    pub async fn feed_mbridge(
        &mut self,
        data: &[u8],
        framer: &mut MBridgeFramer,
        clock: &MicrosClock,
    ) -> Result<usize> {
        let mut responses = 0;
        for &c in data {
            let response = framer.uart_rx_callback(c, clock.now_us()).map(<[u8]>::to_vec);
            if let Some(response) = response {
                let sent = self.send(&response).await;
                framer.on_transmit_complete();
                sent?;
                debug!("MBridge response ({} bytes)", response.len());
                responses += 1;
            }
        }
        Ok(responses)
    }

    /// Get the device path of the opened serial port
    pub fn device_path(&self) -> &str {
        &self.device_path
    }
}

#[cfg(test)]
mod tests {
    use super::port_trait::mocks::MockSerialPort;
    use super::*;
    use crate::mbridge::protocol::{MBridgeCmd, MBRIDGE_STX1, MBRIDGE_STX2};

    fn mock_serial() -> (HostSerial, MockSerialPort) {
        let mock = MockSerialPort::new();
        (HostSerial::from_port(Box::new(mock.clone()), "/dev/mock"), mock)
    }

    #[test]
    fn test_open_with_invalid_paths_returns_error() {
        let invalid_paths = &["/dev/nonexistent0", "/dev/nonexistent1"];
        let result = HostSerial::open_with_paths(invalid_paths, 400_000);

        match result.unwrap_err() {
            TxError::SerialPortNotFound(msg) => {
                assert!(msg.contains("/dev/nonexistent0"));
                assert!(msg.contains("/dev/nonexistent1"));
            }
            other => panic!("Expected SerialPortNotFound error, got: {:?}", other),
        }
    }

    #[test]
    fn test_open_with_empty_paths_returns_error() {
        let empty_paths: &[&str] = &[];
        let result = HostSerial::open_with_paths(empty_paths, 400_000);
        assert!(matches!(result, Err(TxError::SerialPortNotFound(_))));
    }

    #[test]
    fn test_open_port_with_invalid_path_returns_error() {
        let result = HostSerial::open_port("/dev/nonexistent_serial_device_12345", 400_000);

        match result.unwrap_err() {
            TxError::Serial(msg) => {
                assert!(msg.contains("/dev/nonexistent_serial_device_12345"));
                assert!(msg.contains("Failed to open"));
            }
            other => panic!("Expected Serial error, got: {:?}", other),
        }
    }

    #[test]
    fn test_clock_wraps_at_16_bits() {
        let clock = MicrosClock::new();
        let a = clock.now_us();
        let b = clock.now_us();
        // monotonic modulo 2^16
        assert!(b.wrapping_sub(a) < u16::MAX / 2);
    }

    #[tokio::test]
    async fn test_feed_mbridge_answers_with_serial() {
        let (mut serial, mock) = mock_serial();
        let mut framer = MBridgeFramer::new();
        framer.putbuf(b"abc");

        let sent = serial
            .feed_mbridge(&[MBRIDGE_STX1, MBRIDGE_STX2, 0x00], &mut framer, &MicrosClock::new())
            .await
            .unwrap();

        assert_eq!(sent, 1);
        assert_eq!(mock.get_written_data(), vec![vec![0x00, b'a', b'b', b'c']]);
        assert_eq!(framer.state(), crate::mbridge::ParserState::Idle);
    }

    #[tokio::test]
    async fn test_feed_mbridge_command_first() {
        let (mut serial, mock) = mock_serial();
        let mut framer = MBridgeFramer::new();
        framer.putbuf(b"abc");
        framer.send_command(MBridgeCmd::ParamStore, &[]);

        let clock = MicrosClock::new();
        let frame = [MBRIDGE_STX1, MBRIDGE_STX2, 0x00];
        serial.feed_mbridge(&frame, &mut framer, &clock).await.unwrap();
        serial.feed_mbridge(&frame, &mut framer, &clock).await.unwrap();

        let written = mock.get_written_data();
        assert_eq!(written.len(), 2);
        assert_eq!(written[0][0], 0x80 | MBridgeCmd::ParamStore.id());
        assert_eq!(written[1], vec![0x00, b'a', b'b', b'c']);
    }

    #[tokio::test]
    async fn test_feed_mbridge_nothing_to_send() {
        let (mut serial, mock) = mock_serial();
        let mut framer = MBridgeFramer::new();

        let sent = serial
            .feed_mbridge(&[MBRIDGE_STX1, MBRIDGE_STX2, 0x00], &mut framer, &MicrosClock::new())
            .await
            .unwrap();
        assert_eq!(sent, 0);
        assert!(mock.get_written_data().is_empty());
    }

    #[tokio::test]
    async fn test_write_error_still_ends_turn() {
        let (mut serial, mock) = mock_serial();
        mock.set_write_error(std::io::ErrorKind::BrokenPipe);
        let mut framer = MBridgeFramer::new();
        framer.putbuf(b"x");

        let result = serial
            .feed_mbridge(&[MBRIDGE_STX1, MBRIDGE_STX2, 0x00], &mut framer, &MicrosClock::new())
            .await;
        assert!(matches!(result, Err(TxError::Serial(_))));
        assert_eq!(framer.state(), crate::mbridge::ParserState::Idle);
    }

    #[tokio::test]
    async fn test_flush_error() {
        let (mut serial, mock) = mock_serial();
        mock.set_flush_error(std::io::ErrorKind::TimedOut);
        assert!(serial.send(b"x").await.is_err());
    }

    #[test]
    fn test_send_writes_once() {
        let (mut serial, mock) = mock_serial();
        tokio_test::block_on(serial.send(&[0x00, 0x42])).unwrap();
        assert_eq!(mock.get_written_data(), vec![vec![0x00, 0x42]]);
    }

    #[tokio::test]
    async fn test_read_from_port() {
        let (mut serial, mock) = mock_serial();
        mock.push_read(&[1, 2, 3]);
        let mut buf = [0u8; 8];
        assert_eq!(serial.read(&mut buf).await.unwrap(), 3);
        assert_eq!(&buf[..3], &[1, 2, 3]);
        assert_eq!(serial.device_path(), "/dev/mock");
    }
}
