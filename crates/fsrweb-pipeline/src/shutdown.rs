//! Shutdown coordination.
//!
//! Invoked from every terminal path: completion, fatal pipeline error, or
//! an interrupt signal. Whichever path gets here first performs the sweep;
//! every later (or concurrent) call returns immediately. For each tracked
//! process the sweep kills live descendants first, then the process
//! itself; a process that already exited is logged and skipped.

use std::sync::atomic::{AtomicBool, Ordering};

use sysinfo::{Pid, System};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::supervisor::{lock_registry, ProcessRegistry};

/// Tears every tracked process tree down exactly once.
///
/// State machine: Running -> ShuttingDown -> Terminated. The ShuttingDown
/// transition is guarded by an atomic swap, so it is entered at most once
/// in effect no matter how many paths request it.
pub struct ShutdownCoordinator {
    registry: ProcessRegistry,
    cancel: CancellationToken,
    entered: AtomicBool,
}

impl ShutdownCoordinator {
    pub fn new(registry: ProcessRegistry, cancel: CancellationToken) -> Self {
        Self {
            registry,
            cancel,
            entered: AtomicBool::new(false),
        }
    }

    /// The cancellation token every long-running wait observes.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Whether shutdown has been entered.
    pub fn is_shutting_down(&self) -> bool {
        self.entered.load(Ordering::SeqCst)
    }

    /// Terminate every tracked process tree. Idempotent and safe to call
    /// concurrently with itself; losers of the entry race return at once.
    pub fn shutdown(&self) {
        if self.entered.swap(true, Ordering::SeqCst) {
            debug!("shutdown already in progress");
            return;
        }

        // Wake every poller and wait loop first so nothing keeps running
        // against processes about to die.
        self.cancel.cancel();

        info!("shutting down all supervised processes");

        let mut sys = System::new();
        sys.refresh_processes();

        // Holding the lock for the whole sweep serialises against any
        // in-flight spawn.
        let mut registry = lock_registry(&self.registry);
        for (pid, record) in registry.drain() {
            debug!(pid, command = %record.command, "terminating process tree");
            kill_tree(&sys, Pid::from_u32(pid));
        }

        info!("all supervised processes stopped");
    }
}

/// Kill `pid` and its live descendants, children first.
fn kill_tree(sys: &System, pid: Pid) {
    let children: Vec<Pid> = sys
        .processes()
        .iter()
        .filter(|(_, process)| process.parent() == Some(pid))
        .map(|(child_pid, _)| *child_pid)
        .collect();

    for child in children {
        kill_tree(sys, child);
    }

    match sys.process(pid) {
        Some(process) => {
            info!(pid = pid.as_u32(), "killing process");
            process.kill();
        }
        None => {
            // Already exited between registration and the sweep.
            debug!(pid = pid.as_u32(), "process already terminated");
        }
    }
}
