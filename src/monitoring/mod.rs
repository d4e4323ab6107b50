//! Metric series and chart provisioning.
//!
//! Checks write through [`MetricStore`]; the time-series engine behind it is
//! not part of this crate. `memory` keeps everything in process, and
//! `crate::db` persists through sea-orm.

pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sea_orm::DbErr),
    #[error("Metric {0} does not exist")]
    MetricNotFound(i32),
    #[error("Chart {configuration:?} listed twice for metric {metric_key:?}")]
    DuplicateChart {
        metric_key: String,
        configuration: String,
    },
}

/// Static description of a metric kind, e.g. the iperf series.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricDefinition {
    pub name: &'static str,
    pub key: &'static str,
    pub configuration: &'static str,
    pub field_name: &'static str,
}

/// Static description of a chart bound to a metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChartDefinition {
    pub configuration: &'static str,
    pub title: &'static str,
    pub unit: &'static str,
    pub fields: &'static [&'static str],
    pub version: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Metric {
    pub id: i32,
    pub object_id: Uuid,
    pub name: String,
    pub key: String,
    pub configuration: String,
    pub field_name: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chart {
    pub id: i32,
    pub metric_id: i32,
    pub configuration: String,
    pub version: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricPoint {
    pub metric_id: i32,
    pub time: DateTime<Utc>,
    pub value: f64,
    pub extra_values: Map<String, Value>,
}

#[async_trait]
pub trait MetricStore: Send + Sync {
    /// Returns the series for `(object_id, definition.key)`, creating it if
    /// needed. The flag is true only for the call that created it.
    async fn get_or_create(
        &self,
        object_id: Uuid,
        definition: &MetricDefinition,
    ) -> Result<(Metric, bool), StoreError>;

    /// Like [`get_or_create`](Self::get_or_create), but the series and its
    /// charts are created together: if any chart cannot be registered, the
    /// series is not created either.
    async fn get_or_create_with_charts(
        &self,
        object_id: Uuid,
        definition: &MetricDefinition,
        charts: &[ChartDefinition],
    ) -> Result<(Metric, bool), StoreError>;

    /// Appends one point to the series.
    async fn write(
        &self,
        metric: &Metric,
        value: f64,
        extra_values: Map<String, Value>,
    ) -> Result<(), StoreError>;

    /// Registers a chart. Registering the same configuration twice returns
    /// the existing chart.
    async fn create_chart(
        &self,
        metric: &Metric,
        chart: &ChartDefinition,
    ) -> Result<Chart, StoreError>;
}
