//! FSRWEB Pipeline - external-process orchestration for the installer
//!
//! Provides the machinery that drives the install/build/run chain:
//! - Spawns every external command through a single supervisor that tracks
//!   live processes in a guarded registry
//! - Polls a started server until it answers (or a bounded deadline passes)
//! - Tears every tracked process tree down exactly once on shutdown,
//!   whether triggered by success, failure, or an interrupt

pub mod error;
pub mod exit_code;
pub mod pipeline;
pub mod readiness;
pub mod shutdown;
pub mod step;
pub mod supervisor;
pub mod telemetry;

// Re-export key types
pub use error::PipelineError;
pub use readiness::{wait_ready, HttpProbe, Readiness, ReadinessProbe};
pub use shutdown::ShutdownCoordinator;
pub use step::PipelineStep;
pub use supervisor::{ProcessRecord, ProcessSupervisor, ServerHandle, StepOutput};
pub use telemetry::init_tracing;

/// FSRWEB version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
