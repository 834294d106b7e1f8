/* Serial transport: a single exclusively-owned byte-oriented link to the
 * display. All hardware I/O goes through this seam so the protocol engine
 * and stream controller never touch a concrete serial-port implementation
 * directly, which is what makes the state machine testable without
 * hardware attached. */
use std::io::{Read, Write};
use std::time::Duration;

use tracing::debug;

use crate::error::{EngineError, Result};
use crate::models::SerialDeviceInfo;

const DEFAULT_BAUD: u32 = 115_200;
const DEFAULT_TIMEOUT_MS: u64 = 500;

/// USB VID/PID for the Rev-A display family.
pub const DEVICE_VID: u16 = 0x1A86;
pub const DEVICE_PID: u16 = 0x5722;

/// Hardware-ID substring matched when VID/PID enumeration is unavailable
/// (some platforms report a composite device without exposing VID/PID).
pub const DEVICE_HWID_FALLBACK: &str = "USB35INCHIPSV2";

/// Connection parameters for opening a serial transport.
#[derive(Debug, Clone)]
pub struct SerialConfig {
    pub port: String,
    pub baud: u32,
    pub timeout_ms: u64,
    pub rtscts: bool,
}

impl SerialConfig {
    pub fn new(port: impl Into<String>) -> Self {
        Self {
            port: port.into(),
            baud: DEFAULT_BAUD,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            rtscts: true,
        }
    }
}

/// The transport seam. Every public method operates on bytes; framing and
/// command semantics live entirely in the protocol engine above it.
pub trait Transport: Send {
    fn is_open(&self) -> bool;
    fn open(&mut self, config: &SerialConfig) -> Result<()>;
    fn close(&mut self);
    fn write(&mut self, payload: &[u8]) -> Result<usize>;
    fn read(&mut self, max_len: usize, timeout_ms: Option<u64>) -> Result<Vec<u8>>;
    fn flush_input(&mut self) -> Result<()>;
    fn flush_output(&mut self) -> Result<()>;
    fn port_name(&self) -> Option<&str>;

    /// Enumerate candidate serial devices on the host.
    fn discover(&self) -> Result<Vec<SerialDeviceInfo>>;
}

/// Production transport backed by the `serialport` crate.
pub struct SerialTransport {
    port: Option<Box<dyn serialport::SerialPort>>,
    config: Option<SerialConfig>,
}

impl SerialTransport {
    pub fn new() -> Self {
        Self {
            port: None,
            config: None,
        }
    }
}

impl Default for SerialTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for SerialTransport {
    fn is_open(&self) -> bool {
        self.port.is_some()
    }

    /// Idempotent if already open — mirrors how the original transport
    /// treats a second `open()` call as a no-op rather than re-validating
    /// that the requested settings still match the live connection.
    fn open(&mut self, config: &SerialConfig) -> Result<()> {
        if self.is_open() {
            return Ok(());
        }

        let flow = if config.rtscts {
            serialport::FlowControl::Hardware
        } else {
            serialport::FlowControl::None
        };

        let port = serialport::new(&config.port, config.baud)
            .timeout(Duration::from_millis(config.timeout_ms))
            .flow_control(flow)
            .open()
            .map_err(|e| EngineError::Transport {
                port: config.port.clone(),
                source: std::io::Error::new(std::io::ErrorKind::Other, e),
            })?;

        debug!(port = %config.port, baud = config.baud, "serial port opened");
        self.port = Some(port);
        self.config = Some(config.clone());
        Ok(())
    }

    fn close(&mut self) {
        if self.port.take().is_some() {
            debug!("serial port closed");
        }
        self.config = None;
    }

    fn write(&mut self, payload: &[u8]) -> Result<usize> {
        let port = self.port.as_mut().ok_or(EngineError::TransportClosed)?;
        let n = port.write(payload).map_err(|e| EngineError::Transport {
            port: self.config.as_ref().map(|c| c.port.clone()).unwrap_or_default(),
            source: e,
        })?;
        debug!(bytes = n, "TX");
        Ok(n)
    }

    fn read(&mut self, max_len: usize, timeout_ms: Option<u64>) -> Result<Vec<u8>> {
        let port = self.port.as_mut().ok_or(EngineError::TransportClosed)?;
        if let Some(ms) = timeout_ms {
            port.set_timeout(Duration::from_millis(ms))
                .map_err(|e| EngineError::Transport {
                    port: String::new(),
                    source: std::io::Error::new(std::io::ErrorKind::Other, e),
                })?;
        }

        let mut buf = vec![0u8; max_len];
        match port.read(&mut buf) {
            Ok(n) => {
                buf.truncate(n);
                debug!(bytes = n, "RX");
                Ok(buf)
            }
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => Ok(Vec::new()),
            Err(e) => Err(EngineError::Transport {
                port: String::new(),
                source: e,
            }),
        }
    }

    fn flush_input(&mut self) -> Result<()> {
        let port = self.port.as_mut().ok_or(EngineError::TransportClosed)?;
        port.clear(serialport::ClearBuffer::Input)
            .map_err(|e| EngineError::Transport {
                port: String::new(),
                source: std::io::Error::new(std::io::ErrorKind::Other, e),
            })
    }

    fn flush_output(&mut self) -> Result<()> {
        let port = self.port.as_mut().ok_or(EngineError::TransportClosed)?;
        port.clear(serialport::ClearBuffer::Output)
            .map_err(|e| EngineError::Transport {
                port: String::new(),
                source: std::io::Error::new(std::io::ErrorKind::Other, e),
            })
    }

    fn port_name(&self) -> Option<&str> {
        self.config.as_ref().map(|c| c.port.as_str())
    }

    fn discover(&self) -> Result<Vec<SerialDeviceInfo>> {
        let ports = serialport::available_ports().map_err(|e| EngineError::Transport {
            port: String::new(),
            source: std::io::Error::new(std::io::ErrorKind::Other, e),
        })?;

        Ok(ports
            .into_iter()
            .map(|p| {
                let (hwid, vid, pid) = match &p.port_type {
                    serialport::SerialPortType::UsbPort(info) => (
                        info.serial_number.clone().unwrap_or_default(),
                        Some(info.vid),
                        Some(info.pid),
                    ),
                    _ => (String::new(), None, None),
                };
                SerialDeviceInfo {
                    device: p.port_name,
                    description: String::new(),
                    hwid,
                    vid,
                    pid,
                }
            })
            .collect())
    }
}

/// Pick the best candidate from a device list: exact VID/PID match first,
/// else a hardware-ID substring match, else `None`.
pub fn auto_select_device(devices: &[SerialDeviceInfo]) -> Option<&SerialDeviceInfo> {
    devices
        .iter()
        .find(|d| d.vid == Some(DEVICE_VID) && d.pid == Some(DEVICE_PID))
        .or_else(|| devices.iter().find(|d| d.hwid.contains(DEVICE_HWID_FALLBACK)))
}

#[cfg(test)]
pub mod fake {
    use super::*;
    use std::collections::VecDeque;

    /// In-memory transport double for exercising the protocol engine and
    /// stream controller without real hardware.
    pub struct FakeTransport {
        pub open: bool,
        pub config: Option<SerialConfig>,
        pub written: Vec<Vec<u8>>,
        pub to_read: VecDeque<Vec<u8>>,
        pub fail_next_write: bool,
        pub devices: Vec<SerialDeviceInfo>,
    }

    impl FakeTransport {
        pub fn new() -> Self {
            Self {
                open: false,
                config: None,
                written: Vec::new(),
                to_read: VecDeque::new(),
                fail_next_write: false,
                devices: Vec::new(),
            }
        }

        pub fn queue_read(&mut self, bytes: Vec<u8>) {
            self.to_read.push_back(bytes);
        }
    }

    impl Default for FakeTransport {
        fn default() -> Self {
            Self::new()
        }
    }

    impl Transport for FakeTransport {
        fn is_open(&self) -> bool {
            self.open
        }

        fn open(&mut self, config: &SerialConfig) -> Result<()> {
            self.open = true;
            self.config = Some(config.clone());
            Ok(())
        }

        fn close(&mut self) {
            self.open = false;
            self.config = None;
        }

        fn write(&mut self, payload: &[u8]) -> Result<usize> {
            if !self.open {
                return Err(EngineError::TransportClosed);
            }
            if self.fail_next_write {
                self.fail_next_write = false;
                return Err(EngineError::Transport {
                    port: "fake".into(),
                    source: std::io::Error::new(std::io::ErrorKind::BrokenPipe, "injected failure"),
                });
            }
            self.written.push(payload.to_vec());
            Ok(payload.len())
        }

        fn read(&mut self, max_len: usize, _timeout_ms: Option<u64>) -> Result<Vec<u8>> {
            if !self.open {
                return Err(EngineError::TransportClosed);
            }
            let mut chunk = self.to_read.pop_front().unwrap_or_default();
            chunk.truncate(max_len);
            Ok(chunk)
        }

        fn flush_input(&mut self) -> Result<()> {
            Ok(())
        }

        fn flush_output(&mut self) -> Result<()> {
            Ok(())
        }

        fn port_name(&self) -> Option<&str> {
            self.config.as_ref().map(|c| c.port.as_str())
        }

        fn discover(&self) -> Result<Vec<SerialDeviceInfo>> {
            Ok(self.devices.clone())
        }
    }
}
