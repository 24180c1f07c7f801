//! Deadline-bounded polling of provider jobs

use rand::Rng;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::GenerationConfig;
use crate::provider::{GenerationProvider, JobStatus};

/// Sleep between polls: `interval` plus or minus up to `jitter`.
#[derive(Debug, Clone, Copy)]
pub struct PollCadence {
    pub interval: Duration,
    pub jitter: Duration,
}

impl PollCadence {
    pub fn from_config(config: &GenerationConfig) -> Self {
        Self {
            interval: Duration::from_millis(config.poll_interval_ms),
            jitter: Duration::from_millis(config.poll_jitter_ms),
        }
    }

    pub fn next_delay(&self) -> Duration {
        let jitter = self.jitter.as_secs_f64();
        if jitter <= 0.0 {
            return self.interval;
        }
        let offset = rand::thread_rng().gen_range(-jitter..=jitter);
        Duration::from_secs_f64((self.interval.as_secs_f64() + offset).max(0.0))
    }
}

/// What to do when the provider reports `completed` with no outputs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmptyCompletion {
    /// Stop and report [`PollOutcome::NoOutputs`]
    Settle,
    /// Treat it as not settled and keep polling until the deadline
    KeepPolling,
}

/// How a poll loop ended
#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    Completed { output_url: String, polls: u32 },
    /// Provider reported failure
    Failed(String),
    /// Provider reported completion without any output
    NoOutputs { polls: u32 },
    TimedOut { polls: u32 },
    /// Shutdown signal observed
    Interrupted,
}

/// Poll `request_id` until it settles, `deadline` passes, or shutdown is signalled.
pub async fn poll_until(
    provider: &dyn GenerationProvider,
    request_id: &str,
    deadline: Instant,
    cadence: PollCadence,
    on_empty: EmptyCompletion,
    shutdown: &mut watch::Receiver<bool>,
) -> PollOutcome {
    let mut polls = 0u32;

    loop {
        if *shutdown.borrow() {
            return PollOutcome::Interrupted;
        }
        if Instant::now() >= deadline {
            return PollOutcome::TimedOut { polls };
        }

        let result = match tokio::time::timeout_at(deadline, provider.poll_result(request_id)).await {
            Ok(result) => result,
            Err(_) => return PollOutcome::TimedOut { polls },
        };
        polls += 1;

        match result.status {
            JobStatus::Completed => match (result.first_output(), on_empty) {
                (Some(url), _) => {
                    return PollOutcome::Completed {
                        output_url: url.to_string(),
                        polls,
                    }
                }
                (None, EmptyCompletion::Settle) => {
                    warn!(request_id, polls, "Provider job completed without outputs");
                    return PollOutcome::NoOutputs { polls };
                }
                (None, EmptyCompletion::KeepPolling) => {
                    warn!(request_id, polls, "Provider job completed without outputs, still polling");
                }
            },
            JobStatus::Failed => {
                return PollOutcome::Failed(
                    result
                        .error
                        .unwrap_or_else(|| "provider reported failure".to_string()),
                );
            }
            status => debug!(request_id, ?status, polls, "Provider job not settled"),
        }

        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return PollOutcome::TimedOut { polls };
        }

        tokio::select! {
            _ = tokio::time::sleep(cadence.next_delay().min(remaining)) => {}
            changed = shutdown.changed() => {
                if changed.is_err() {
                    return PollOutcome::Interrupted;
                }
            }
        }
    }
}
