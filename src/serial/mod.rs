//! # Serial Communication Module
//!
//! Handles the UART link to the VTX module.
//!
//! This module handles:
//! - Opening the serial port at the backend's baud rate (SmartAudio 4800,
//!   Tramp 9600)
//! - Non-blocking byte-level access for the protocol tick
//! - Runtime baud rate changes (SmartAudio autobauding)
//!
//! The protocol backends never block on the link: reads drain only bytes that
//! are already buffered, and all waiting is expressed as backend state plus a
//! recorded timestamp.

use crate::error::{Result, VtxBridgeError};
use std::io::{Read, Write};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Byte-oriented, non-blocking serial transport.
///
/// The link is assumed reliable in byte order but not in content; framing and
/// checksum validation live in the protocol backends.
pub trait SerialIo: Send {
    /// Number of received bytes currently buffered
    fn bytes_available(&mut self) -> usize;

    /// Read one buffered byte; `None` if nothing is buffered
    fn read_byte(&mut self) -> Option<u8>;

    /// Write bytes to the port. Transport failures are logged, not surfaced;
    /// the protocol layer recovers through its own timeout/retransmit path.
    fn write_bytes(&mut self, data: &[u8]);

    /// Change the working baud rate (used by SmartAudio autobauding)
    fn set_baud_rate(&mut self, baud: u32);
}

/// A physical UART backed by `tokio-serial`'s blocking port handle.
///
/// All reads are guarded by `bytes_to_read`, so no call here ever waits for
/// data; the short port timeout is a safety net only.
pub struct UartPort {
    port: Box<dyn tokio_serial::SerialPort>,
    device_path: String,
}

impl std::fmt::Debug for UartPort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UartPort")
            .field("device_path", &self.device_path)
            .finish_non_exhaustive()
    }
}

impl UartPort {
    /// Open a serial port with VTX link settings (8 data bits, no parity).
    ///
    /// # Arguments
    ///
    /// * `path` - Device path (e.g., "/dev/ttyUSB0")
    /// * `baud_rate` - Initial baud rate
    /// * `stop_bits` - 1 or 2 (SmartAudio installations sometimes need 2)
    ///
    /// # Errors
    ///
    /// Returns [`VtxBridgeError::SerialPortNotFound`] if the port cannot be
    /// opened.
    pub fn open(path: &str, baud_rate: u32, stop_bits: u8) -> Result<Self> {
        debug!("Opening serial port {} at {} baud", path, baud_rate);

        let stop_bits = if stop_bits == 2 {
            tokio_serial::StopBits::Two
        } else {
            tokio_serial::StopBits::One
        };

        let port = tokio_serial::new(path, baud_rate)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(stop_bits)
            .flow_control(tokio_serial::FlowControl::None)
            .timeout(Duration::from_millis(10))
            .open()
            .map_err(|e| {
                VtxBridgeError::SerialPortNotFound(format!("{}: {}", path, e))
            })?;

        info!("Opened VTX serial port at {}", path);

        Ok(Self {
            port,
            device_path: path.to_string(),
        })
    }

    /// Get the device path of the opened serial port
    pub fn device_path(&self) -> &str {
        &self.device_path
    }
}

impl SerialIo for UartPort {
    fn bytes_available(&mut self) -> usize {
        self.port.bytes_to_read().map(|n| n as usize).unwrap_or(0)
    }

    fn read_byte(&mut self) -> Option<u8> {
        if self.bytes_available() == 0 {
            return None;
        }

        let mut byte = [0u8; 1];
        match self.port.read(&mut byte) {
            Ok(1) => Some(byte[0]),
            Ok(_) => None,
            Err(e) => {
                warn!("Serial read failed on {}: {}", self.device_path, e);
                None
            }
        }
    }

    fn write_bytes(&mut self, data: &[u8]) {
        if let Err(e) = self.port.write_all(data).and_then(|_| self.port.flush()) {
            warn!("Serial write failed on {}: {}", self.device_path, e);
        }
    }

    fn set_baud_rate(&mut self, baud: u32) {
        if let Err(e) = self.port.set_baud_rate(baud) {
            warn!("Failed to set baud rate {} on {}: {}", baud, self.device_path, e);
        }
    }
}

#[cfg(test)]
pub mod mocks {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    /// Mock serial port for testing.
    ///
    /// Clonable handle over shared buffers so a test can keep inspecting the
    /// port after handing a boxed clone to a backend.
    #[derive(Clone)]
    pub struct MockSerialPort {
        pub written: Arc<Mutex<Vec<Vec<u8>>>>,
        pub rx: Arc<Mutex<VecDeque<u8>>>,
        pub baud_changes: Arc<Mutex<Vec<u32>>>,
    }

    impl MockSerialPort {
        pub fn new() -> Self {
            Self {
                written: Arc::new(Mutex::new(Vec::new())),
                rx: Arc::new(Mutex::new(VecDeque::new())),
                baud_changes: Arc::new(Mutex::new(Vec::new())),
            }
        }

        /// Queue inbound bytes for the backend to read
        pub fn push_rx(&self, bytes: &[u8]) {
            self.rx.lock().unwrap().extend(bytes.iter().copied());
        }

        /// All `write_bytes` calls, in order
        pub fn written_calls(&self) -> Vec<Vec<u8>> {
            self.written.lock().unwrap().clone()
        }

        /// Written calls excluding single-byte line-pull leaders (0x00)
        pub fn written_frames(&self) -> Vec<Vec<u8>> {
            self.written_calls()
                .into_iter()
                .filter(|w| w.as_slice() != [0x00])
                .collect()
        }

        pub fn clear_written(&self) {
            self.written.lock().unwrap().clear();
        }

        pub fn baud_history(&self) -> Vec<u32> {
            self.baud_changes.lock().unwrap().clone()
        }
    }

    impl SerialIo for MockSerialPort {
        fn bytes_available(&mut self) -> usize {
            self.rx.lock().unwrap().len()
        }

        fn read_byte(&mut self) -> Option<u8> {
            self.rx.lock().unwrap().pop_front()
        }

        fn write_bytes(&mut self, data: &[u8]) {
            self.written.lock().unwrap().push(data.to_vec());
        }

        fn set_baud_rate(&mut self, baud: u32) {
            self.baud_changes.lock().unwrap().push(baud);
        }
    }
}
