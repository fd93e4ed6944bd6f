//! Handshake probe that positively identifies the sensor board.
//!
//! The board answers a single `v` query with one line of the form
//! `v 1 2 3 4` (one integer per sensor). Anything else on the wire -
//! noise from an unrelated device, a timeout, a failed open - is a
//! negative result for that port, never an error.

use std::io::{Read, Write};
use std::time::Duration;

use regex::Regex;
use tracing::{debug, warn};

use super::catalog::PortDescriptor;
use super::DeviceMatch;

/// Longest response line the probe will read before giving up on a port.
/// Keeps a chattering device from stalling the scan.
const MAX_RESPONSE_BYTES: usize = 256;

/// Handshake parameters. The defaults match the board firmware; both values
/// are configuration, not part of the protocol itself.
#[derive(Debug, Clone)]
pub struct ProbeConfig {
    /// Serial baud rate.
    pub baud_rate: u32,

    /// Read timeout for the response line.
    pub read_timeout: Duration,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            baud_rate: 115_200,
            read_timeout: Duration::from_secs(1),
        }
    }
}

/// Runs the handshake against a single port. Implemented by [`DeviceProbe`]
/// for real hardware and by fakes in tests.
pub trait DeviceProber {
    /// `Some(match)` when the port answered the handshake, `None` otherwise.
    fn probe(&self, port: &PortDescriptor) -> Option<DeviceMatch>;
}

/// Serial handshake probe.
pub struct DeviceProbe {
    config: ProbeConfig,
    response: Regex,
}

impl DeviceProbe {
    /// Query byte sent to each candidate port.
    pub const QUERY: u8 = b'v';

    pub fn new(config: ProbeConfig) -> Self {
        Self {
            config,
            // Literal `v` followed by one or more whitespace-separated
            // unsigned integers.
            response: Regex::new(r"^v(\s\d+)+$").expect("valid handshake regex"),
        }
    }

    /// Parse a response line; the sensor count is the number of integers.
    /// No semantic validation of the values themselves.
    pub fn parse_response(&self, line: &str) -> Option<usize> {
        let line = line.trim();
        if !self.response.is_match(line) {
            return None;
        }
        Some(line.split_whitespace().count() - 1)
    }

    /// Write the query and read one newline-terminated response line.
    fn exchange(&self, port: &mut Box<dyn serialport::SerialPort>) -> std::io::Result<String> {
        port.write_all(&[Self::QUERY])?;

        let mut line = Vec::with_capacity(64);
        let mut byte = [0u8; 1];
        while line.len() < MAX_RESPONSE_BYTES {
            port.read_exact(&mut byte)?;
            if byte[0] == b'\n' {
                break;
            }
            line.push(byte[0]);
        }
        Ok(String::from_utf8_lossy(&line).into_owned())
    }
}

impl Default for DeviceProbe {
    fn default() -> Self {
        Self::new(ProbeConfig::default())
    }
}

impl DeviceProber for DeviceProbe {
    fn probe(&self, port: &PortDescriptor) -> Option<DeviceMatch> {
        // Scoped acquisition: the handle drops (closing the port) on every
        // exit path below, including read/write errors.
        let mut handle = match serialport::new(&port.name, self.config.baud_rate)
            .timeout(self.config.read_timeout)
            .open()
        {
            Ok(handle) => handle,
            Err(err) => {
                debug!(port = %port.name, error = %err, "probe open failed");
                return None;
            }
        };

        let line = match self.exchange(&mut handle) {
            Ok(line) => line,
            Err(err) => {
                warn!(port = %port.name, error = %err, "probe exchange failed");
                return None;
            }
        };

        match self.parse_response(&line) {
            Some(sensor_count) => Some(DeviceMatch {
                port: port.clone(),
                sensor_count,
            }),
            None => {
                debug!(port = %port.name, response = %line.trim(), "response did not match handshake");
                None
            }
        }
    }
}
