//! Periodic retention sweep for tasks and audit sessions

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::audit::AuditTrail;
use crate::store::TaskStore;

/// Rows removed by one sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub tasks: usize,
    pub audit_sessions: usize,
}

/// Deletes expired terminal tasks and expired audit sessions.
pub struct RetentionSweeper {
    tasks: Arc<dyn TaskStore>,
    audit: AuditTrail,
    sweep_task: Mutex<Option<JoinHandle<()>>>,
}

impl RetentionSweeper {
    pub fn new(tasks: Arc<dyn TaskStore>, audit: AuditTrail) -> Self {
        Self {
            tasks,
            audit,
            sweep_task: Mutex::new(None),
        }
    }

    /// One idempotent sweep against `now`.
    pub async fn run_once(&self, now: DateTime<Utc>) -> SweepReport {
        let tasks = match self.tasks.sweep_expired(now).await {
            Ok(deleted) => deleted,
            Err(e) => {
                warn!(error = %e, "Task retention sweep failed");
                0
            }
        };
        let audit_sessions = self.audit.sweep_expired(now).await;

        let report = SweepReport {
            tasks,
            audit_sessions,
        };
        if tasks + audit_sessions > 0 {
            info!(tasks, audit_sessions, "Retention sweep removed expired records");
        } else {
            debug!("Retention sweep found nothing to remove");
        }
        report
    }

    /// Start sweeping every `interval`, replacing any running loop.
    pub fn start(self: &Arc<Self>, interval: Duration) {
        let sweeper = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                sweeper.run_once(Utc::now()).await;
            }
        });

        if let Some(previous) = self.sweep_task.lock().replace(handle) {
            previous.abort();
        }
        info!(interval_secs = interval.as_secs(), "Retention sweeper started");
    }

    /// Stop the background loop
    pub fn stop(&self) {
        if let Some(handle) = self.sweep_task.lock().take() {
            handle.abort();
            info!("Retention sweeper stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.sweep_task
            .lock()
            .as_ref()
            .map_or(false, |handle| !handle.is_finished())
    }
}
