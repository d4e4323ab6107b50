//! Bandwidth check: runs `iperf3` on the device and records the result.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::iperf_result::{self, CheckOutcome};
use super::{Check, CheckError, CheckTarget, IPERF_CHECK_TYPE};
use crate::connection::{ConnectionError, ConnectionRegistry};
use crate::monitoring::{ChartDefinition, Metric, MetricDefinition, MetricStore};
use crate::settings::{CheckSettings, is_valid_server_address};

pub const IPERF_METRIC: MetricDefinition = MetricDefinition {
    name: "Iperf",
    key: "iperf",
    configuration: "iperf",
    field_name: "iperf_result",
};

/// Bump when the chart set below changes.
pub const IPERF_CHART_SET_VERSION: i32 = 1;

pub const IPERF_CHARTS: [ChartDefinition; 3] = [
    ChartDefinition {
        configuration: "bps",
        title: "Bandwidth",
        unit: "Gbps",
        fields: &["sum_sent_bps", "sum_rec_bps"],
        version: IPERF_CHART_SET_VERSION,
    },
    ChartDefinition {
        configuration: "transfer",
        title: "Transfer",
        unit: "GB",
        fields: &["sum_sent_bytes", "sum_rec_bytes"],
        version: IPERF_CHART_SET_VERSION,
    },
    ChartDefinition {
        configuration: "retransmits",
        title: "Retransmits",
        unit: "",
        fields: &["sum_sent_retransmits"],
        version: IPERF_CHART_SET_VERSION,
    },
];

pub struct IperfCheck {
    settings: Arc<CheckSettings>,
    connections: Arc<dyn ConnectionRegistry>,
    metrics: Arc<dyn MetricStore>,
}

impl IperfCheck {
    pub fn new(
        settings: Arc<CheckSettings>,
        connections: Arc<dyn ConnectionRegistry>,
        metrics: Arc<dyn MetricStore>,
    ) -> Self {
        Self {
            settings,
            connections,
            metrics,
        }
    }

    /// The only command this check ever sends. `run` checks `server` with
    /// [`is_valid_server_address`] first.
    pub fn command_for(server: &str) -> String {
        format!("iperf3 -c {server} -J")
    }

    /// Runs one bandwidth test against `target`.
    ///
    /// Returns `Ok(None)` when the device has no usable connection (nothing
    /// is stored) and when iperf3 exits non-zero (the failed record is stored
    /// if `store` is set). Configuration, transport, parse and store errors
    /// are returned to the caller.
    pub async fn run(
        &self,
        target: &CheckTarget,
        store: bool,
    ) -> Result<Option<CheckOutcome>, CheckError> {
        iperf_result::ensure_supported(self.settings.iperf_mode)?;

        let server = self
            .settings
            .iperf_server_for(&target.organization_id)
            .ok_or(CheckError::NoServerConfigured(target.organization_id))?;
        if !is_valid_server_address(server) {
            return Err(CheckError::InvalidServerAddress(server.to_string()));
        }

        let connection = match self.connections.find_connection(target.device_id).await {
            Ok(connection) => connection,
            Err(ConnectionError::NotFound(_)) => {
                debug!(device_id = %target.device_id, "Device has no active connection, iperf skipped.");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        if !connection.enabled() || !connection.is_working() {
            debug!(
                device_id = %target.device_id,
                enabled = connection.enabled(),
                is_working = connection.is_working(),
                "Connection not usable, iperf skipped."
            );
            return Ok(None);
        }

        connection.connect().await?;
        let command = Self::command_for(server);
        let output = connection.exec_command(&command, false).await?;

        if !output.success() {
            warn!(
                device_id = %target.device_id,
                server = %server,
                exit_code = output.exit_code,
                stderr = %output.stderr.trim(),
                "Iperf command failed."
            );
            if store {
                self.store_result(target, &CheckOutcome::failed()).await?;
            }
            return Ok(None);
        }

        let outcome = iperf_result::parse_with_mode(&output.stdout, self.settings.iperf_mode)?;
        info!(
            device_id = %target.device_id,
            server = %server,
            sent_gbps = outcome.sent_throughput_gbps,
            received_gbps = outcome.received_throughput_gbps,
            retransmits = outcome.retransmits,
            "Iperf check completed."
        );
        if store {
            self.store_result(target, &outcome).await?;
        }
        Ok(Some(outcome))
    }

    /// Gets or creates the iperf series for the device. The chart set is
    /// registered in the same store operation that creates the series.
    pub async fn get_or_create_metric(
        &self,
        target: &CheckTarget,
    ) -> Result<(Metric, bool), CheckError> {
        let (metric, created) = self
            .metrics
            .get_or_create_with_charts(target.device_id, &IPERF_METRIC, &IPERF_CHARTS)
            .await?;
        if created {
            debug!(metric_id = metric.id, device_id = %target.device_id, "Created iperf metric and charts.");
        }
        Ok((metric, created))
    }

    /// Writes one point: `iperf_result` plus the throughput fields.
    pub async fn store_result(
        &self,
        target: &CheckTarget,
        outcome: &CheckOutcome,
    ) -> Result<(), CheckError> {
        let (metric, _) = self.get_or_create_metric(target).await?;
        self.metrics
            .write(&metric, outcome.primary_value(), outcome.extra_values())
            .await?;
        Ok(())
    }
}

#[async_trait]
impl Check for IperfCheck {
    fn check_type(&self) -> &'static str {
        IPERF_CHECK_TYPE
    }

    async fn perform(
        &self,
        target: &CheckTarget,
        store: bool,
    ) -> Result<Option<CheckOutcome>, CheckError> {
        self.run(target, store).await
    }
}
