#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use nodenexus_checks::check::CheckTarget;
use nodenexus_checks::connection::{
    ConnectionError, ConnectionRegistry, DeviceConnection, RemoteOutput,
};
use nodenexus_checks::monitoring::memory::InMemoryMetricStore;
use nodenexus_checks::monitoring::{Chart, ChartDefinition, Metric, MetricDefinition, MetricStore, StoreError};
use nodenexus_checks::settings::CheckSettings;

pub const SERVER: &str = "192.168.5.109";

pub fn organization() -> Uuid {
    Uuid::from_u128(0x0b1f6a7e_2d4c_4d3b_8a61_8a5b0f2c9e21)
}

pub fn target() -> CheckTarget {
    CheckTarget {
        device_id: Uuid::new_v4(),
        organization_id: organization(),
        name: "edge-router".to_string(),
    }
}

pub fn settings() -> Arc<CheckSettings> {
    let mut settings = CheckSettings::default();
    settings
        .iperf_servers
        .insert(organization(), vec![SERVER.to_string(), "10.0.0.2".to_string()]);
    Arc::new(settings)
}

pub fn iperf_report(
    sent_bps: u64,
    sent_bytes: u64,
    retransmits: u64,
    rec_bps: u64,
    rec_bytes: u64,
) -> String {
    serde_json::json!({
        "start": {"test_start": {"protocol": "TCP", "num_streams": 1}},
        "end": {
            "sum_sent": {
                "bytes": sent_bytes,
                "bits_per_second": sent_bps,
                "retransmits": retransmits
            },
            "sum_received": {
                "bytes": rec_bytes,
                "bits_per_second": rec_bps
            }
        }
    })
    .to_string()
}

pub struct FakeConnection {
    pub enabled: bool,
    pub working: bool,
    pub output: RemoteOutput,
    pub connects: AtomicUsize,
    pub commands: Mutex<Vec<String>>,
}

impl FakeConnection {
    pub fn returning(exit_code: i32, stdout: &str) -> Self {
        Self {
            enabled: true,
            working: true,
            output: RemoteOutput {
                stdout: stdout.to_string(),
                stderr: if exit_code == 0 {
                    String::new()
                } else {
                    "iperf3: error - unable to connect to server".to_string()
                },
                exit_code,
            },
            connects: AtomicUsize::new(0),
            commands: Mutex::new(Vec::new()),
        }
    }

    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }
}

#[async_trait]
impl DeviceConnection for FakeConnection {
    fn enabled(&self) -> bool {
        self.enabled
    }

    fn is_working(&self) -> bool {
        self.working
    }

    async fn connect(&self) -> Result<(), ConnectionError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn exec_command(
        &self,
        command: &str,
        raise_on_nonzero: bool,
    ) -> Result<RemoteOutput, ConnectionError> {
        self.commands.lock().unwrap().push(command.to_string());
        if raise_on_nonzero && !self.output.success() {
            return Err(ConnectionError::NonZeroExit {
                exit_code: self.output.exit_code,
                output: self.output.stderr.clone(),
            });
        }
        Ok(self.output.clone())
    }
}

#[derive(Default)]
pub struct FakeRegistry {
    connections: HashMap<Uuid, Arc<FakeConnection>>,
    pub lookups: AtomicUsize,
}

impl FakeRegistry {
    pub fn with(device_id: Uuid, connection: Arc<FakeConnection>) -> Self {
        let mut connections = HashMap::new();
        connections.insert(device_id, connection);
        Self {
            connections,
            lookups: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl ConnectionRegistry for FakeRegistry {
    async fn find_connection(
        &self,
        device_id: Uuid,
    ) -> Result<Arc<dyn DeviceConnection>, ConnectionError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        self.connections
            .get(&device_id)
            .map(|c| Arc::clone(c) as Arc<dyn DeviceConnection>)
            .ok_or(ConnectionError::NotFound(device_id))
    }
}

/// In-memory store that counts every call made to it.
///
/// With `reject_next_provisioning` set, the next metric-with-charts request
/// fails before anything is created, the way a rolled-back transaction does.
#[derive(Default)]
pub struct SpyStore {
    pub inner: InMemoryMetricStore,
    pub get_or_create_calls: AtomicUsize,
    pub provision_calls: AtomicUsize,
    pub write_calls: AtomicUsize,
    pub chart_calls: AtomicUsize,
    pub reject_next_provisioning: AtomicBool,
}

impl SpyStore {
    pub fn total_calls(&self) -> usize {
        self.get_or_create_calls.load(Ordering::SeqCst)
            + self.provision_calls.load(Ordering::SeqCst)
            + self.write_calls.load(Ordering::SeqCst)
            + self.chart_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MetricStore for SpyStore {
    async fn get_or_create(
        &self,
        object_id: Uuid,
        definition: &MetricDefinition,
    ) -> Result<(Metric, bool), StoreError> {
        self.get_or_create_calls.fetch_add(1, Ordering::SeqCst);
        self.inner.get_or_create(object_id, definition).await
    }

    async fn get_or_create_with_charts(
        &self,
        object_id: Uuid,
        definition: &MetricDefinition,
        charts: &[ChartDefinition],
    ) -> Result<(Metric, bool), StoreError> {
        self.provision_calls.fetch_add(1, Ordering::SeqCst);
        if self.reject_next_provisioning.swap(false, Ordering::SeqCst) {
            return Err(StoreError::DuplicateChart {
                metric_key: definition.key.to_string(),
                configuration: charts[1].configuration.to_string(),
            });
        }
        self.inner
            .get_or_create_with_charts(object_id, definition, charts)
            .await
    }

    async fn write(
        &self,
        metric: &Metric,
        value: f64,
        extra_values: Map<String, Value>,
    ) -> Result<(), StoreError> {
        self.write_calls.fetch_add(1, Ordering::SeqCst);
        self.inner.write(metric, value, extra_values).await
    }

    async fn create_chart(
        &self,
        metric: &Metric,
        chart: &ChartDefinition,
    ) -> Result<Chart, StoreError> {
        self.chart_calls.fetch_add(1, Ordering::SeqCst);
        self.inner.create_chart(metric, chart).await
    }
}
