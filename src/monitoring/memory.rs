use async_trait::async_trait;
use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::{DashMap, DashSet};
use serde_json::{Map, Value};
use std::sync::atomic::{AtomicI32, Ordering};
use tracing::debug;
use uuid::Uuid;

use super::{Chart, ChartDefinition, Metric, MetricDefinition, MetricPoint, MetricStore, StoreError};

/// Process-local metric store, used when no database is configured.
#[derive(Debug, Default)]
pub struct InMemoryMetricStore {
    next_id: AtomicI32,
    metrics: DashMap<(Uuid, String), Metric>,
    metric_ids: DashSet<i32>,
    charts: DashMap<i32, Vec<Chart>>,
    points: DashMap<i32, Vec<MetricPoint>>,
}

impl InMemoryMetricStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn allocate_id(&self) -> i32 {
        self.next_id.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn contains_metric(&self, metric_id: i32) -> bool {
        self.metric_ids.contains(&metric_id)
    }

    fn new_metric(&self, object_id: Uuid, definition: &MetricDefinition) -> Metric {
        Metric {
            id: self.allocate_id(),
            object_id,
            name: definition.name.to_string(),
            key: definition.key.to_string(),
            configuration: definition.configuration.to_string(),
            field_name: definition.field_name.to_string(),
            created_at: Utc::now(),
        }
    }

    pub fn metric_for(&self, object_id: Uuid, key: &str) -> Option<Metric> {
        self.metrics
            .get(&(object_id, key.to_string()))
            .map(|entry| entry.value().clone())
    }

    pub fn metric_count(&self) -> usize {
        self.metrics.len()
    }

    pub fn charts(&self, metric_id: i32) -> Vec<Chart> {
        self.charts
            .get(&metric_id)
            .map(|entry| entry.value().clone())
            .unwrap_or_default()
    }

    pub fn points(&self, metric_id: i32) -> Vec<MetricPoint> {
        self.points
            .get(&metric_id)
            .map(|entry| entry.value().clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl MetricStore for InMemoryMetricStore {
    async fn get_or_create(
        &self,
        object_id: Uuid,
        definition: &MetricDefinition,
    ) -> Result<(Metric, bool), StoreError> {
        match self.metrics.entry((object_id, definition.key.to_string())) {
            Entry::Occupied(entry) => Ok((entry.get().clone(), false)),
            Entry::Vacant(entry) => {
                let metric = self.new_metric(object_id, definition);
                self.metric_ids.insert(metric.id);
                entry.insert(metric.clone());
                debug!(metric_id = metric.id, object_id = %object_id, "Created metric.");
                Ok((metric, true))
            }
        }
    }

    async fn get_or_create_with_charts(
        &self,
        object_id: Uuid,
        definition: &MetricDefinition,
        charts: &[ChartDefinition],
    ) -> Result<(Metric, bool), StoreError> {
        match self.metrics.entry((object_id, definition.key.to_string())) {
            Entry::Occupied(entry) => Ok((entry.get().clone(), false)),
            Entry::Vacant(entry) => {
                // Everything is checked before the entry is filled, so a
                // rejected chart set leaves no series behind.
                for (i, chart) in charts.iter().enumerate() {
                    if charts[..i].iter().any(|c| c.configuration == chart.configuration) {
                        return Err(StoreError::DuplicateChart {
                            metric_key: definition.key.to_string(),
                            configuration: chart.configuration.to_string(),
                        });
                    }
                }

                let metric = self.new_metric(object_id, definition);
                let created: Vec<Chart> = charts
                    .iter()
                    .map(|chart| Chart {
                        id: self.allocate_id(),
                        metric_id: metric.id,
                        configuration: chart.configuration.to_string(),
                        version: chart.version,
                    })
                    .collect();
                self.charts.insert(metric.id, created);
                self.metric_ids.insert(metric.id);
                entry.insert(metric.clone());
                debug!(metric_id = metric.id, object_id = %object_id, charts = charts.len(), "Created metric with charts.");
                Ok((metric, true))
            }
        }
    }

    async fn write(
        &self,
        metric: &Metric,
        value: f64,
        extra_values: Map<String, Value>,
    ) -> Result<(), StoreError> {
        if !self.contains_metric(metric.id) {
            return Err(StoreError::MetricNotFound(metric.id));
        }
        self.points.entry(metric.id).or_default().push(MetricPoint {
            metric_id: metric.id,
            time: Utc::now(),
            value,
            extra_values,
        });
        Ok(())
    }

    async fn create_chart(
        &self,
        metric: &Metric,
        chart: &ChartDefinition,
    ) -> Result<Chart, StoreError> {
        if !self.contains_metric(metric.id) {
            return Err(StoreError::MetricNotFound(metric.id));
        }
        let mut charts = self.charts.entry(metric.id).or_default();
        if let Some(existing) = charts.iter().find(|c| c.configuration == chart.configuration) {
            return Ok(existing.clone());
        }
        let created = Chart {
            id: self.allocate_id(),
            metric_id: metric.id,
            configuration: chart.configuration.to_string(),
            version: chart.version,
        };
        charts.push(created.clone());
        Ok(created)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DEFINITION: MetricDefinition = MetricDefinition {
        name: "Iperf",
        key: "iperf",
        configuration: "iperf",
        field_name: "iperf_result",
    };

    const BPS: ChartDefinition = ChartDefinition {
        configuration: "bps",
        title: "Bandwidth",
        unit: "Gbps",
        fields: &["sum_sent_bps", "sum_rec_bps"],
        version: 1,
    };

    const TRANSFER: ChartDefinition = ChartDefinition {
        configuration: "transfer",
        title: "Transfer",
        unit: "GB",
        fields: &["sum_sent_bytes", "sum_rec_bytes"],
        version: 1,
    };

    #[tokio::test]
    async fn test_get_or_create_once_per_key() {
        let store = InMemoryMetricStore::new();
        let device = Uuid::new_v4();

        let (first, created) = store.get_or_create(device, &DEFINITION).await.unwrap();
        assert!(created);
        let (second, created) = store.get_or_create(device, &DEFINITION).await.unwrap();
        assert!(!created);
        assert_eq!(first, second);

        let (other, created) = store.get_or_create(Uuid::new_v4(), &DEFINITION).await.unwrap();
        assert!(created);
        assert_ne!(other.id, first.id);
        assert_eq!(store.metric_count(), 2);
    }

    #[tokio::test]
    async fn test_create_chart_is_idempotent() {
        let store = InMemoryMetricStore::new();
        let (metric, _) = store.get_or_create(Uuid::new_v4(), &DEFINITION).await.unwrap();

        let a = store.create_chart(&metric, &BPS).await.unwrap();
        let b = store.create_chart(&metric, &BPS).await.unwrap();
        assert_eq!(a, b);
        assert_eq!(store.charts(metric.id).len(), 1);
    }

    #[tokio::test]
    async fn test_write_appends_points() {
        let store = InMemoryMetricStore::new();
        let (metric, _) = store.get_or_create(Uuid::new_v4(), &DEFINITION).await.unwrap();

        let mut extra = Map::new();
        extra.insert("sum_sent_bps".into(), Value::from(0.95));
        store.write(&metric, 1.0, extra).await.unwrap();
        store.write(&metric, 0.0, Map::new()).await.unwrap();

        let points = store.points(metric.id);
        assert_eq!(points.len(), 2);
        assert_eq!(points[0].value, 1.0);
        assert_eq!(points[0].extra_values["sum_sent_bps"], Value::from(0.95));
        assert_eq!(points[1].value, 0.0);
    }

    #[tokio::test]
    async fn test_metric_and_charts_created_together() {
        let store = InMemoryMetricStore::new();
        let device = Uuid::new_v4();

        let (metric, created) = store
            .get_or_create_with_charts(device, &DEFINITION, &[BPS, TRANSFER])
            .await
            .unwrap();
        assert!(created);
        let charts: Vec<String> = store.charts(metric.id).into_iter().map(|c| c.configuration).collect();
        assert_eq!(charts, vec!["bps", "transfer"]);

        let (again, created) = store
            .get_or_create_with_charts(device, &DEFINITION, &[BPS, TRANSFER])
            .await
            .unwrap();
        assert!(!created);
        assert_eq!(again.id, metric.id);
        assert_eq!(store.charts(metric.id).len(), 2);
    }

    #[tokio::test]
    async fn test_rejected_chart_set_leaves_no_metric() {
        let store = InMemoryMetricStore::new();
        let device = Uuid::new_v4();

        let err = store
            .get_or_create_with_charts(device, &DEFINITION, &[BPS, TRANSFER, BPS])
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::DuplicateChart { ref configuration, .. } if configuration == "bps"));
        assert_eq!(store.metric_count(), 0);
        assert!(store.metric_for(device, "iperf").is_none());

        // A later attempt provisions the full set.
        let (metric, created) = store
            .get_or_create_with_charts(device, &DEFINITION, &[BPS, TRANSFER])
            .await
            .unwrap();
        assert!(created);
        assert_eq!(store.charts(metric.id).len(), 2);
    }

    #[tokio::test]
    async fn test_unknown_metric_rejected() {
        let store = InMemoryMetricStore::new();
        let (mut metric, _) = store.get_or_create(Uuid::new_v4(), &DEFINITION).await.unwrap();
        metric.id = 999;
        assert!(matches!(
            store.write(&metric, 1.0, Map::new()).await,
            Err(StoreError::MetricNotFound(999))
        ));
    }
}
