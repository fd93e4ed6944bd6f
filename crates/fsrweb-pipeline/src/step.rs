//! Pipeline step definitions.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// One stage of the install/build/run chain. Ephemeral configuration,
/// consumed by the supervisor; not persisted anywhere.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineStep {
    /// Human-readable step name.
    pub name: String,

    /// Command to execute (first element is the executable).
    pub command: Vec<String>,

    /// Exit code that counts as success.
    pub expected_exit_code: i32,

    /// Timeout in seconds; 0 means no timeout.
    pub timeout_secs: u64,

    /// Working directory for the command, if not the current one.
    pub cwd: Option<PathBuf>,
}

impl PipelineStep {
    /// Create a step that expects exit code 0.
    pub fn custom(name: impl Into<String>, command: Vec<String>, timeout_secs: u64) -> Self {
        Self {
            name: name.into(),
            command,
            expected_exit_code: 0,
            timeout_secs,
            cwd: None,
        }
    }

    /// Run the step in the given working directory.
    pub fn in_dir(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    /// The command as one display string, for logs and errors.
    pub fn display_command(&self) -> String {
        self.command.join(" ")
    }
}
