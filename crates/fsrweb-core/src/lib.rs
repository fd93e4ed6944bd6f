//! FSRWEB Core - device discovery for the FSR pad web UI
//!
//! Provides the two leaf subsystems the installer builds on:
//! - Serial discovery: scan every serial port, skip the busy ones, and run
//!   the `v` handshake until the sensor board answers
//! - Config patching: write the discovered port and sensor count into the
//!   web UI server source

pub mod discovery;
pub mod patch;

// Re-export key types
pub use discovery::catalog::{PortCatalog, PortDescriptor, PortScanner, PortStatus};
pub use discovery::probe::{DeviceProbe, DeviceProber, ProbeConfig};
pub use discovery::{discover_device, DeviceMatch, Discoverer, DiscoveryResult};
pub use patch::{ConfigPatcher, PatchError};

/// FSRWEB version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
