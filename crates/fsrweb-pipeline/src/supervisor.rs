//! Process spawning and tracking.
//!
//! Every external process the installer starts goes through one
//! [`ProcessSupervisor`], which owns the registry of live pids. The registry
//! is the single piece of shared mutable state in the system: spawns insert
//! under the lock, confirmed exits remove under the lock, and the shutdown
//! sweep drains it under the same lock, so a spawn can never race a kill.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tracing::{debug, info};

use crate::error::PipelineError;
use crate::step::PipelineStep;

/// Shared pid -> record map, guarded by a single mutex.
pub type ProcessRegistry = Arc<Mutex<HashMap<u32, ProcessRecord>>>;

pub(crate) fn lock_registry(
    registry: &Mutex<HashMap<u32, ProcessRecord>>,
) -> MutexGuard<'_, HashMap<u32, ProcessRecord>> {
    registry.lock().unwrap_or_else(PoisonError::into_inner)
}

/// One tracked process. Lives in the registry from spawn until its exit is
/// confirmed or a kill has been attempted; never silently dropped.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessRecord {
    /// OS process id.
    pub pid: u32,

    /// Pid of the spawning process (this program).
    pub parent_pid: Option<u32>,

    /// The command line, for logs and errors.
    pub command: String,

    /// When the process was spawned.
    pub started_at: DateTime<Utc>,
}

/// Captured result of a completed step.
#[derive(Debug, Clone)]
pub struct StepOutput {
    /// Exit code (matches the step's expected code).
    pub exit_code: i32,

    /// Captured stdout lines.
    pub stdout: Vec<String>,

    /// Captured stderr lines.
    pub stderr: Vec<String>,

    /// Wall-clock duration in milliseconds.
    pub duration_ms: u64,
}

/// A long-running server process. Stays in the registry until the shutdown
/// sweep confirms termination.
pub struct ServerHandle {
    /// Registry record for the server process.
    pub record: ProcessRecord,
    child: Child,
}

impl ServerHandle {
    pub fn pid(&self) -> u32 {
        self.record.pid
    }

    /// Whether the server has already exited on its own.
    pub fn has_exited(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(Some(_)))
    }

    /// Wait for the server process to exit.
    pub async fn wait(&mut self) -> std::io::Result<std::process::ExitStatus> {
        self.child.wait().await
    }
}

/// Spawns and tracks every external process of the pipeline.
#[derive(Clone, Default)]
pub struct ProcessSupervisor {
    registry: ProcessRegistry,
}

impl ProcessSupervisor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle to the shared registry, for the shutdown coordinator.
    pub fn registry(&self) -> ProcessRegistry {
        Arc::clone(&self.registry)
    }

    /// Number of processes currently tracked.
    pub fn tracked(&self) -> usize {
        lock_registry(&self.registry).len()
    }

    /// Spawn the step's command with piped stdio and register it before
    /// returning.
    fn spawn(&self, step: &PipelineStep) -> Result<(Child, ProcessRecord), PipelineError> {
        let exe = step
            .command
            .first()
            .ok_or_else(|| PipelineError::EmptyCommand {
                name: step.name.clone(),
            })?;

        let mut command = Command::new(exe);
        command
            .args(&step.command[1..])
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(cwd) = &step.cwd {
            command.current_dir(cwd);
        }

        let child = command.spawn().map_err(|source| PipelineError::Spawn {
            command: step.display_command(),
            source,
        })?;

        // A missing id means the child is already gone; registering it
        // (necessarily under a bogus key) would let records collide.
        let pid = match child.id() {
            Some(pid) => pid,
            None => {
                return Err(PipelineError::Spawn {
                    command: step.display_command(),
                    source: std::io::Error::new(
                        std::io::ErrorKind::Other,
                        "spawned process has no pid",
                    ),
                })
            }
        };
        let record = ProcessRecord {
            pid,
            parent_pid: Some(std::process::id()),
            command: step.display_command(),
            started_at: Utc::now(),
        };
        lock_registry(&self.registry).insert(pid, record.clone());
        info!(step = %step.name, pid, "spawned process");

        Ok((child, record))
    }

    /// Remove a record once the process is confirmed dead (or a kill has
    /// been attempted for it).
    fn deregister(&self, pid: u32) {
        if lock_registry(&self.registry).remove(&pid).is_some() {
            debug!(pid, "deregistered process");
        }
    }

    /// Run a step to completion and capture its output.
    ///
    /// Stdout and stderr are drained concurrently by two background
    /// readers, so neither stream can fill its pipe and stall the child
    /// (or the other stream). A non-matching exit code is a fatal
    /// [`PipelineError::StepFailed`], never retried.
    pub async fn run_to_completion(
        &self,
        step: &PipelineStep,
    ) -> Result<StepOutput, PipelineError> {
        let start = Instant::now();
        let (mut child, record) = self.spawn(step)?;

        let out_task = child.stdout.take().map(|r| tokio::spawn(drain_lines(r)));
        let err_task = child.stderr.take().map(|r| tokio::spawn(drain_lines(r)));

        let waited = if step.timeout_secs > 0 {
            match tokio::time::timeout(Duration::from_secs(step.timeout_secs), child.wait()).await
            {
                Ok(waited) => waited,
                Err(_elapsed) => {
                    // Deadline passed: request the kill, confirm, then drop
                    // the record.
                    let _ = child.start_kill();
                    let _ = child.wait().await;
                    self.deregister(record.pid);
                    return Err(PipelineError::Timeout {
                        command: step.display_command(),
                        timeout_secs: step.timeout_secs,
                    });
                }
            }
        } else {
            child.wait().await
        };

        let status = match waited {
            Ok(status) => status,
            Err(source) => {
                self.deregister(record.pid);
                return Err(PipelineError::Spawn {
                    command: step.display_command(),
                    source,
                });
            }
        };

        let stdout = match out_task {
            Some(task) => task.await.unwrap_or_default(),
            None => Vec::new(),
        };
        let stderr = match err_task {
            Some(task) => task.await.unwrap_or_default(),
            None => Vec::new(),
        };

        // Exit is confirmed; the record may leave the registry.
        self.deregister(record.pid);

        let exit_code = status.code().unwrap_or(-1);
        let duration_ms = start.elapsed().as_millis() as u64;

        if exit_code != step.expected_exit_code {
            return Err(PipelineError::StepFailed {
                command: step.display_command(),
                exit_code,
                stderr: stderr.join("\n"),
            });
        }

        debug!(step = %step.name, exit_code, duration_ms, "step completed");
        Ok(StepOutput {
            exit_code,
            stdout,
            stderr,
            duration_ms,
        })
    }

    /// Start a long-running server process. The record stays in the
    /// registry until shutdown; both output streams are drained to the log
    /// in the background so the server can never block on a full pipe.
    pub fn spawn_server(&self, step: &PipelineStep) -> Result<ServerHandle, PipelineError> {
        let (mut child, record) = self.spawn(step)?;

        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(log_lines(step.name.clone(), "stdout", stdout));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(log_lines(step.name.clone(), "stderr", stderr));
        }

        Ok(ServerHandle { record, child })
    }
}

/// Collect every line of a stream until EOF or a read error.
async fn drain_lines<R>(reader: R) -> Vec<String>
where
    R: AsyncRead + Unpin + Send,
{
    let mut lines = BufReader::new(reader).lines();
    let mut out = Vec::new();
    while let Ok(Some(line)) = lines.next_line().await {
        out.push(line);
    }
    out
}

/// Forward every line of a server stream to the log.
async fn log_lines<R>(step: String, stream: &'static str, reader: R)
where
    R: AsyncRead + Unpin + Send,
{
    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        debug!(step = %step, stream, line = %line);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sh(name: &str, script: &str) -> PipelineStep {
        PipelineStep::custom(
            name,
            vec!["sh".to_string(), "-c".to_string(), script.to_string()],
            60,
        )
    }

    #[tokio::test]
    async fn test_successful_step_captures_stdout() {
        let supervisor = ProcessSupervisor::new();
        let step = PipelineStep::custom(
            "echo_test",
            vec!["echo".to_string(), "hello".to_string()],
            60,
        );

        let output = supervisor.run_to_completion(&step).await.expect("run failed");
        assert_eq!(output.exit_code, 0);
        assert_eq!(output.stdout, vec!["hello".to_string()]);
        assert!(output.stderr.is_empty());
    }

    #[tokio::test]
    async fn test_failing_step_is_step_failed() {
        let supervisor = ProcessSupervisor::new();
        let step = PipelineStep::custom("false_test", vec!["false".to_string()], 60);

        let err = supervisor.run_to_completion(&step).await.unwrap_err();
        match err {
            PipelineError::StepFailed { exit_code, .. } => assert_eq!(exit_code, 1),
            other => panic!("expected StepFailed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_both_streams_are_captured() {
        let supervisor = ProcessSupervisor::new();
        let step = sh("mixed_output", "echo out1; echo err1 >&2; echo out2");

        let output = supervisor.run_to_completion(&step).await.expect("run failed");
        assert_eq!(output.stdout, vec!["out1".to_string(), "out2".to_string()]);
        assert_eq!(output.stderr, vec!["err1".to_string()]);
    }

    #[tokio::test]
    async fn test_failed_step_carries_stderr() {
        let supervisor = ProcessSupervisor::new();
        let step = sh("fail_with_stderr", "echo boom >&2; exit 3");

        let err = supervisor.run_to_completion(&step).await.unwrap_err();
        match err {
            PipelineError::StepFailed {
                exit_code, stderr, ..
            } => {
                assert_eq!(exit_code, 3);
                assert!(stderr.contains("boom"));
            }
            other => panic!("expected StepFailed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_registry_is_empty_after_completion() {
        let supervisor = ProcessSupervisor::new();
        let step = PipelineStep::custom("echo_test", vec!["echo".to_string(), "x".to_string()], 60);

        supervisor.run_to_completion(&step).await.expect("run failed");
        assert_eq!(supervisor.tracked(), 0);
    }

    #[tokio::test]
    async fn test_empty_command_is_rejected() {
        let supervisor = ProcessSupervisor::new();
        let step = PipelineStep::custom("empty", vec![], 60);

        let err = supervisor.run_to_completion(&step).await.unwrap_err();
        assert!(matches!(err, PipelineError::EmptyCommand { .. }));
    }

    #[tokio::test]
    async fn test_missing_executable_is_spawn_error() {
        let supervisor = ProcessSupervisor::new();
        let step = PipelineStep::custom(
            "missing",
            vec!["fsrweb-no-such-binary".to_string()],
            60,
        );

        let err = supervisor.run_to_completion(&step).await.unwrap_err();
        assert!(matches!(err, PipelineError::Spawn { .. }));
    }

    #[tokio::test]
    async fn test_timeout_kills_and_deregisters() {
        let supervisor = ProcessSupervisor::new();
        let step = PipelineStep::custom(
            "sleepy",
            vec!["sleep".to_string(), "30".to_string()],
            1,
        );

        let err = supervisor.run_to_completion(&step).await.unwrap_err();
        assert!(matches!(err, PipelineError::Timeout { .. }));
        assert_eq!(supervisor.tracked(), 0);
    }

    #[tokio::test]
    async fn test_registry_key_is_the_real_pid() {
        let supervisor = ProcessSupervisor::new();
        let step = PipelineStep::custom(
            "pid_check",
            vec!["sleep".to_string(), "30".to_string()],
            0,
        );

        let mut handle = supervisor.spawn_server(&step).expect("spawn failed");
        assert!(handle.pid() > 0, "pid 0 must never be registered");
        let registry = supervisor.registry();
        assert!(lock_registry(&registry).contains_key(&handle.pid()));

        let _ = handle.child.start_kill();
        let _ = handle.child.wait().await;
        lock_registry(&registry).clear();
    }

    #[tokio::test]
    async fn test_server_spawn_registers_until_shutdown() {
        let supervisor = ProcessSupervisor::new();
        let step = PipelineStep::custom(
            "fake_server",
            vec!["sleep".to_string(), "30".to_string()],
            0,
        );

        let mut handle = supervisor.spawn_server(&step).expect("spawn failed");
        assert_eq!(supervisor.tracked(), 1);
        assert!(!handle.has_exited());
        assert!(handle.pid() > 0);

        // Cleanup without the coordinator: kill directly.
        let _ = handle.child.start_kill();
        let _ = handle.child.wait().await;
        let registry = supervisor.registry();
        lock_registry(&registry).clear();
    }
}
