//! Serial device discovery.
//!
//! Enumerates every serial port, skips the ones another process already
//! holds, and runs the handshake probe until a port answers. The first
//! acceptable match wins; remaining ports are not probed. One call is one
//! scan - a caller that wants another attempt (say, after the operator
//! plugs the board in) invokes discovery again.

pub mod catalog;
pub mod probe;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use catalog::{PortCatalog, PortDescriptor, PortScanner, PortStatus};
use probe::{DeviceProbe, DeviceProber};

/// A positively identified sensor board.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceMatch {
    /// The port that answered the handshake.
    pub port: PortDescriptor,

    /// Number of sensors the board reported (always >= 1).
    pub sensor_count: usize,
}

/// Terminal result of one discovery scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryResult {
    /// A board answered the handshake on this port.
    Found(DeviceMatch),

    /// Every port was exhausted without a positive match.
    NotFound,
}

impl DiscoveryResult {
    pub fn is_found(&self) -> bool {
        matches!(self, DiscoveryResult::Found(_))
    }
}

/// Drives a [`PortScanner`] and a [`DeviceProber`] over all candidates.
pub struct Discoverer<S, P> {
    scanner: S,
    prober: P,
}

impl<S: PortScanner, P: DeviceProber> Discoverer<S, P> {
    pub fn new(scanner: S, prober: P) -> Self {
        Self { scanner, prober }
    }

    /// Scan once, first acceptable match wins.
    pub fn discover(&self) -> DiscoveryResult {
        let ports = self.scanner.enumerate();
        info!(count = ports.len(), "scanning serial ports");

        for port in &ports {
            if self.scanner.status(port) == PortStatus::Busy {
                warn!(port = %port.name, "skipping port: already in use");
                continue;
            }

            if let Some(device) = self.prober.probe(port) {
                info!(
                    port = %device.port.name,
                    sensors = device.sensor_count,
                    "found sensor board"
                );
                return DiscoveryResult::Found(device);
            }
        }

        warn!("no sensor board answered on any port");
        DiscoveryResult::NotFound
    }
}

/// One discovery scan with the real catalog and the default handshake
/// parameters. Blocking serial I/O; callers on an async runtime should wrap
/// this in `spawn_blocking`.
pub fn discover_device() -> DiscoveryResult {
    Discoverer::new(PortCatalog::new(), DeviceProbe::default()).discover()
}
