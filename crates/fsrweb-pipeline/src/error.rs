//! Error types for pipeline execution.

use thiserror::Error;

/// Errors produced while running the install/build/run chain. All of these
/// are fatal to the pipeline and trigger shutdown; per-port discovery
/// negatives never reach this layer.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// A step exited with an unexpected code. Not retried.
    #[error("step '{command}' exited with code {exit_code}\n{stderr}")]
    StepFailed {
        command: String,
        exit_code: i32,
        stderr: String,
    },

    /// The step's process could not be started at all.
    #[error("failed to spawn '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// The step's process did not exit within its deadline. A kill was
    /// requested before this error was returned.
    #[error("step '{command}' timed out after {timeout_secs}s")]
    Timeout { command: String, timeout_secs: u64 },

    /// The started server never answered the readiness probe.
    #[error("server did not become ready within {attempts} attempts")]
    NeverReady { attempts: u32 },

    /// Shutdown was requested while the pipeline was still running.
    #[error("cancelled by shutdown request")]
    Cancelled,

    /// A step was configured with an empty command vector.
    #[error("step '{name}' has an empty command")]
    EmptyCommand { name: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_failed_displays_command_and_code() {
        let err = PipelineError::StepFailed {
            command: "yarn build".to_string(),
            exit_code: 1,
            stderr: "out of memory".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("yarn build"));
        assert!(msg.contains("code 1"));
        assert!(msg.contains("out of memory"));
    }

    #[test]
    fn test_timeout_displays_deadline() {
        let err = PipelineError::Timeout {
            command: "yarn install".to_string(),
            timeout_secs: 600,
        };
        assert!(err.to_string().contains("600s"));
    }
}
