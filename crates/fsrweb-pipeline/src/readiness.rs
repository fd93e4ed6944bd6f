//! Bounded readiness polling for a freshly started server.
//!
//! A connection refused and a not-yet-ready answer are the same thing
//! here: keep polling. Only exhausting the attempt budget produces
//! [`Readiness::TimedOut`]; a shutdown request aborts the wait early with
//! [`Readiness::Cancelled`] instead of polling into a dying process.

use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Outcome of one readiness wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    /// The probe answered positively.
    Ready,

    /// Every attempt was used without a positive answer.
    TimedOut,

    /// Shutdown began while waiting.
    Cancelled,
}

/// A single success/failure check against the started service.
#[async_trait]
pub trait ReadinessProbe: Send + Sync {
    async fn check(&self) -> bool;
}

/// Poll `probe` at fixed intervals until it answers, the attempt budget is
/// exhausted, or `cancel` fires. Makes exactly `max_attempts` probe calls
/// before giving up.
pub async fn wait_ready(
    probe: &dyn ReadinessProbe,
    interval: Duration,
    max_attempts: u32,
    cancel: &CancellationToken,
) -> Readiness {
    for attempt in 1..=max_attempts {
        if cancel.is_cancelled() {
            debug!(attempt, "readiness wait cancelled");
            return Readiness::Cancelled;
        }

        if probe.check().await {
            info!(attempt, "service is ready");
            return Readiness::Ready;
        }
        debug!(attempt, max_attempts, "service not ready yet");

        // No sleep after the final attempt.
        if attempt < max_attempts {
            tokio::select! {
                _ = cancel.cancelled() => return Readiness::Cancelled,
                _ = tokio::time::sleep(interval) => {}
            }
        }
    }

    Readiness::TimedOut
}

/// HTTP readiness probe: ready when the endpoint answers with the expected
/// status and (optionally) the expected substring in the body. The exact
/// parameters are configuration, not protocol.
pub struct HttpProbe {
    url: String,
    expected_status: u16,
    expected_substring: Option<String>,
    client: reqwest::Client,
}

impl HttpProbe {
    pub fn new(url: impl Into<String>, expected_status: u16, expected_substring: Option<String>) -> Self {
        let client = reqwest::Client::builder()
            .user_agent(concat!("fsrweb/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(5))
            .build()
            .expect("failed to create HTTP client");

        Self {
            url: url.into(),
            expected_status,
            expected_substring,
            client,
        }
    }
}

#[async_trait]
impl ReadinessProbe for HttpProbe {
    async fn check(&self) -> bool {
        let response = match self.client.get(&self.url).send().await {
            Ok(response) => response,
            // Connection refused, reset, DNS failure: identical to not
            // ready.
            Err(err) => {
                debug!(url = %self.url, error = %err, "probe request failed");
                return false;
            }
        };

        if response.status().as_u16() != self.expected_status {
            debug!(url = %self.url, status = %response.status(), "unexpected status");
            return false;
        }

        match &self.expected_substring {
            None => true,
            Some(marker) => match response.text().await {
                Ok(body) => body.contains(marker),
                Err(_) => false,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Probe that becomes ready after a scripted number of failures.
    struct ScriptedProbe {
        calls: AtomicU32,
        ready_after: u32,
    }

    impl ScriptedProbe {
        fn new(ready_after: u32) -> Self {
            Self {
                calls: AtomicU32::new(0),
                ready_after,
            }
        }

        fn never() -> Self {
            Self::new(u32::MAX)
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ReadinessProbe for ScriptedProbe {
        async fn check(&self) -> bool {
            let seen = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            seen > self.ready_after
        }
    }

    #[tokio::test]
    async fn test_exhaustion_makes_exactly_max_attempts() {
        let probe = ScriptedProbe::never();
        let cancel = CancellationToken::new();

        let outcome = wait_ready(&probe, Duration::from_millis(1), 3, &cancel).await;

        assert_eq!(outcome, Readiness::TimedOut);
        assert_eq!(probe.calls(), 3, "not fewer, not more");
    }

    #[tokio::test]
    async fn test_ready_on_later_attempt() {
        let probe = ScriptedProbe::new(2);
        let cancel = CancellationToken::new();

        let outcome = wait_ready(&probe, Duration::from_millis(1), 10, &cancel).await;

        assert_eq!(outcome, Readiness::Ready);
        assert_eq!(probe.calls(), 3);
    }

    #[tokio::test]
    async fn test_cancelled_before_start_makes_no_attempts() {
        let probe = ScriptedProbe::never();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let outcome = wait_ready(&probe, Duration::from_millis(1), 5, &cancel).await;

        assert_eq!(outcome, Readiness::Cancelled);
        assert_eq!(probe.calls(), 0);
    }

    #[tokio::test]
    async fn test_cancellation_interrupts_the_sleep() {
        let cancel = CancellationToken::new();

        let waiter = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                // Long interval: only cancellation can end this quickly.
                let probe = ScriptedProbe::never();
                wait_ready(&probe, Duration::from_secs(60), 100, &cancel).await
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();

        let outcome = waiter.await.expect("waiter panicked");
        assert_eq!(outcome, Readiness::Cancelled);
    }

    #[tokio::test]
    async fn test_refused_connection_counts_as_not_ready() {
        // Nothing listens on this port; the probe must return false, not
        // error out.
        let probe = HttpProbe::new("http://127.0.0.1:1", 200, None);
        assert!(!probe.check().await);
    }
}
