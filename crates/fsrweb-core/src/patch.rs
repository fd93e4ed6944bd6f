//! Server-config patching.
//!
//! The web UI server source carries two assignments the installer owns:
//! a quoted serial port and an integer sensor count. Patching rewrites
//! exactly those two lines and passes everything else through untouched,
//! byte for byte, in the original order.

use std::io;
use std::path::{Path, PathBuf};

use regex::Regex;
use thiserror::Error;
use tracing::{info, warn};

use crate::discovery::DeviceMatch;

/// Errors produced while applying a device match to the server config.
#[derive(Debug, Error)]
pub enum PatchError {
    /// The target could not be read.
    #[error("failed to read {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The rewritten content could not be written back.
    #[error("failed to write {path:?}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// At least one of the two expected assignment lines was not found.
    /// Whatever did match has been rewritten; this is still a failure,
    /// distinct from full success.
    #[error("config patch incomplete (serial port: {port_patched}, sensor count: {sensors_patched})")]
    Partial {
        port_patched: bool,
        sensors_patched: bool,
    },
}

/// Rewrites the serial-port and sensor-count assignments in the server
/// source. Applying the same match twice yields identical content.
pub struct ConfigPatcher {
    port_line: Regex,
    sensor_line: Regex,
}

impl Default for ConfigPatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigPatcher {
    pub fn new() -> Self {
        Self {
            port_line: Regex::new(r"^SERIAL_PORT = .*$").expect("valid port-line regex"),
            sensor_line: Regex::new(r"^num_sensors = \d+$").expect("valid sensor-line regex"),
        }
    }

    /// Apply the discovered port and sensor count to `target`.
    pub fn apply(&self, device: &DeviceMatch, target: &Path) -> Result<(), PatchError> {
        let content = std::fs::read_to_string(target).map_err(|source| PatchError::Read {
            path: target.to_path_buf(),
            source,
        })?;

        let (patched, port_patched, sensors_patched) = self.rewrite(&content, device);

        std::fs::write(target, patched).map_err(|source| PatchError::Write {
            path: target.to_path_buf(),
            source,
        })?;

        if port_patched && sensors_patched {
            info!(
                port = %device.port.name,
                sensors = device.sensor_count,
                path = %target.display(),
                "patched server config"
            );
            Ok(())
        } else {
            warn!(port_patched, sensors_patched, "config patch incomplete");
            Err(PatchError::Partial {
                port_patched,
                sensors_patched,
            })
        }
    }

    /// Rewrite the two owned lines, preserving every other byte and each
    /// line's original terminator.
    fn rewrite(&self, content: &str, device: &DeviceMatch) -> (String, bool, bool) {
        let mut out = String::with_capacity(content.len());
        let mut port_patched = false;
        let mut sensors_patched = false;

        for raw in content.split_inclusive('\n') {
            let (line, terminator) = split_terminator(raw);

            if self.port_line.is_match(line) {
                out.push_str(&format!("SERIAL_PORT = \"{}\"", device.port.name));
                out.push_str(terminator);
                port_patched = true;
            } else if self.sensor_line.is_match(line) {
                out.push_str(&format!("num_sensors = {}", device.sensor_count));
                out.push_str(terminator);
                sensors_patched = true;
            } else {
                out.push_str(raw);
            }
        }

        (out, port_patched, sensors_patched)
    }
}

/// Split a line into content and its `\n` / `\r\n` terminator (if any).
fn split_terminator(raw: &str) -> (&str, &str) {
    if let Some(stripped) = raw.strip_suffix("\r\n") {
        (stripped, "\r\n")
    } else if let Some(stripped) = raw.strip_suffix('\n') {
        (stripped, "\n")
    } else {
        (raw, "")
    }
}
