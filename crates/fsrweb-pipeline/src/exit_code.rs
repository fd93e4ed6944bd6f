//! Process exit codes.
//!
//! The launcher distinguishes its terminal states through the exit code so
//! wrapping scripts can react without parsing log output.

/// Everything requested completed.
pub const SUCCESS: i32 = 0;

/// A pipeline step, spawn, or patch failed.
pub const PIPELINE_FAILED: i32 = 1;

/// The pipeline completed but no sensor device was found on any port.
pub const DEVICE_NOT_FOUND: i32 = 2;

/// Interrupted by SIGINT or SIGTERM. 128 + SIGINT, the conventional
/// shell encoding.
pub const INTERRUPTED: i32 = 130;
