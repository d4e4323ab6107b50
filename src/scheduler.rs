//! Periodic execution of configured checks.

use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{error, info};

use crate::check::{CheckRegistry, CheckTarget, IPERF_CHECK_TYPE};
use crate::settings::CheckSettings;

/// A check bound to a device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduledCheck {
    pub check_type: String,
    pub target: CheckTarget,
    pub is_active: bool,
}

impl ScheduledCheck {
    pub fn iperf(target: CheckTarget) -> Self {
        Self {
            check_type: IPERF_CHECK_TYPE.to_string(),
            target,
            is_active: true,
        }
    }
}

/// One active iperf check per target when `auto_iperf` is on.
pub fn auto_create_checks(settings: &CheckSettings, targets: &[CheckTarget]) -> Vec<ScheduledCheck> {
    if !settings.auto_iperf {
        return Vec::new();
    }
    targets.iter().cloned().map(ScheduledCheck::iperf).collect()
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub recorded: usize,
    pub no_result: usize,
    pub failed: usize,
}

enum RunStatus {
    Recorded,
    NoResult,
    Failed,
}

#[derive(Clone)]
pub struct CheckScheduler {
    registry: CheckRegistry,
    concurrency: usize,
}

impl CheckScheduler {
    pub fn new(registry: CheckRegistry, concurrency: usize) -> Self {
        Self {
            registry,
            concurrency: concurrency.max(1),
        }
    }

    /// Runs every active check once. A failing check never stops the others.
    pub async fn run_once(&self, checks: &[ScheduledCheck], store: bool) -> RunSummary {
        let pending: Vec<_> = checks
            .iter()
            .filter(|c| c.is_active)
            .map(|scheduled| self.run_check(scheduled, store))
            .collect();
        let statuses: Vec<RunStatus> = stream::iter(pending)
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        let mut summary = RunSummary::default();
        for status in statuses {
            match status {
                RunStatus::Recorded => summary.recorded += 1,
                RunStatus::NoResult => summary.no_result += 1,
                RunStatus::Failed => summary.failed += 1,
            }
        }
        summary
    }

    async fn run_check(&self, scheduled: &ScheduledCheck, store: bool) -> RunStatus {
        let check = match self.registry.resolve(&scheduled.check_type) {
            Ok(check) => check,
            Err(e) => {
                error!(device_id = %scheduled.target.device_id, error = %e, "Cannot run check.");
                return RunStatus::Failed;
            }
        };
        match check.perform(&scheduled.target, store).await {
            Ok(Some(_)) => RunStatus::Recorded,
            Ok(None) => RunStatus::NoResult,
            Err(e) => {
                error!(
                    device_id = %scheduled.target.device_id,
                    check_type = %scheduled.check_type,
                    error = %e,
                    "Check failed."
                );
                RunStatus::Failed
            }
        }
    }

    /// Calls [`run_once`](Self::run_once) every `every` until `shutdown_rx`
    /// fires or its sender is dropped. A round in progress is finished first.
    pub async fn run_loop(
        &self,
        checks: Vec<ScheduledCheck>,
        every: Duration,
        store: bool,
        mut shutdown_rx: watch::Receiver<()>,
    ) {
        let mut interval = tokio::time::interval(every);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                _ = shutdown_rx.changed() => {
                    info!("Shutdown signal received, stopping check scheduler.");
                    break;
                }

                _ = interval.tick() => {
                    let summary = self.run_once(&checks, store).await;
                    info!(
                        recorded = summary.recorded,
                        no_result = summary.no_result,
                        failed = summary.failed,
                        "Check round finished."
                    );
                }
            }
        }
    }
}
