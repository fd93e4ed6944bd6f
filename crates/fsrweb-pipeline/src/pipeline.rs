//! Sequential step execution.
//!
//! Steps run strictly in order and the chain halts on the first failure;
//! later steps are never attempted once an earlier one has failed.

use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::error::PipelineError;
use crate::step::PipelineStep;
use crate::supervisor::{ProcessSupervisor, StepOutput};

/// Run `steps` in order through `supervisor`, failing fast.
///
/// Cancellation is observed between steps: a shutdown request stops the
/// chain before the next spawn with [`PipelineError::Cancelled`]. A step
/// already running is handled by the shutdown sweep, not interrupted here.
pub async fn run(
    supervisor: &ProcessSupervisor,
    steps: &[PipelineStep],
    cancel: &CancellationToken,
) -> Result<Vec<StepOutput>, PipelineError> {
    let mut outputs = Vec::with_capacity(steps.len());

    for (index, step) in steps.iter().enumerate() {
        if cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }

        info!(
            step = %step.name,
            command = %step.display_command(),
            progress = format!("{}/{}", index + 1, steps.len()),
            "running pipeline step"
        );

        let output = match supervisor.run_to_completion(step).await {
            Ok(output) => output,
            // A shutdown sweep kills the running child, which then reports
            // an unexpected exit; that is a cancellation, not a failure of
            // the step itself.
            Err(_) if cancel.is_cancelled() => return Err(PipelineError::Cancelled),
            Err(err) => return Err(err),
        };
        outputs.push(output);
    }

    Ok(outputs)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn echo(name: &str, text: &str) -> PipelineStep {
        PipelineStep::custom(
            name,
            vec!["echo".to_string(), text.to_string()],
            60,
        )
    }

    #[tokio::test]
    async fn test_steps_run_in_order() {
        let supervisor = ProcessSupervisor::new();
        let steps = vec![echo("first", "one"), echo("second", "two")];

        let outputs = run(&supervisor, &steps, &CancellationToken::new())
            .await
            .expect("pipeline failed");

        assert_eq!(outputs.len(), 2);
        assert_eq!(outputs[0].stdout, vec!["one".to_string()]);
        assert_eq!(outputs[1].stdout, vec!["two".to_string()]);
    }

    #[tokio::test]
    async fn test_failure_halts_the_chain() {
        let supervisor = ProcessSupervisor::new();
        let dir = tempfile::tempdir().expect("tempdir");
        let marker = dir.path().join("after-failure");

        let steps = vec![
            echo("ok", "fine"),
            PipelineStep::custom("boom", vec!["false".to_string()], 60),
            PipelineStep::custom(
                "never_runs",
                vec![
                    "touch".to_string(),
                    marker.to_string_lossy().into_owned(),
                ],
                60,
            ),
        ];

        let err = run(&supervisor, &steps, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::StepFailed { .. }));
        assert!(!marker.exists(), "step after the failure must not run");
    }

    #[tokio::test]
    async fn test_cancellation_stops_before_next_step() {
        let supervisor = ProcessSupervisor::new();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = run(&supervisor, &[echo("never", "x")], &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Cancelled));
    }

    #[tokio::test]
    async fn test_interrupt_during_running_step_is_cancelled() {
        use crate::shutdown::ShutdownCoordinator;
        use std::time::Duration;

        let supervisor = ProcessSupervisor::new();
        let cancel = CancellationToken::new();
        let coordinator = ShutdownCoordinator::new(supervisor.registry(), cancel.clone());

        let runner = {
            let supervisor = supervisor.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                let steps = vec![PipelineStep::custom(
                    "long_step",
                    vec!["sleep".to_string(), "30".to_string()],
                    0,
                )];
                run(&supervisor, &steps, &cancel).await
            })
        };

        // Let the step start, then interrupt it mid-flight. The killed
        // child must surface as Cancelled, never as StepFailed.
        tokio::time::sleep(Duration::from_millis(300)).await;
        coordinator.shutdown();

        let err = runner.await.expect("runner panicked").unwrap_err();
        assert!(matches!(err, PipelineError::Cancelled));
        assert_eq!(supervisor.tracked(), 0);
    }

    #[tokio::test]
    async fn test_empty_pipeline_succeeds() {
        let supervisor = ProcessSupervisor::new();
        let outputs = run(&supervisor, &[], &CancellationToken::new())
            .await
            .expect("empty pipeline failed");
        assert!(outputs.is_empty());
    }
}
