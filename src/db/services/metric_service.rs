//! sea-orm implementation of [`MetricStore`].

use async_trait::async_trait;
use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, DbErr, EntityTrait,
    QueryFilter, QueryOrder, Set, TransactionTrait,
};
use serde_json::{Map, Value};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::db::entities::{chart, metric, metric_point};
use crate::monitoring::{
    Chart, ChartDefinition, Metric, MetricDefinition, MetricStore, StoreError,
};

impl From<metric::Model> for Metric {
    fn from(model: metric::Model) -> Self {
        Metric {
            id: model.id,
            object_id: model.object_id,
            name: model.name,
            key: model.key,
            configuration: model.configuration,
            field_name: model.field_name,
            created_at: model.created_at,
        }
    }
}

impl From<chart::Model> for Chart {
    fn from(model: chart::Model) -> Self {
        Chart {
            id: model.id,
            metric_id: model.metric_id,
            configuration: model.configuration,
            version: model.version,
        }
    }
}

pub async fn find_metric<C: ConnectionTrait>(
    db: &C,
    object_id: Uuid,
    key: &str,
) -> Result<Option<metric::Model>, DbErr> {
    metric::Entity::find()
        .filter(metric::Column::ObjectId.eq(object_id))
        .filter(metric::Column::Key.eq(key))
        .one(db)
        .await
}

pub async fn find_chart<C: ConnectionTrait>(
    db: &C,
    metric_id: i32,
    configuration: &str,
) -> Result<Option<chart::Model>, DbErr> {
    chart::Entity::find()
        .filter(chart::Column::MetricId.eq(metric_id))
        .filter(chart::Column::Configuration.eq(configuration))
        .one(db)
        .await
}

pub async fn get_charts_for_metric(
    db: &DatabaseConnection,
    metric_id: i32,
) -> Result<Vec<chart::Model>, DbErr> {
    chart::Entity::find()
        .filter(chart::Column::MetricId.eq(metric_id))
        .order_by_asc(chart::Column::Id)
        .all(db)
        .await
}

/// Points of one series in insertion order.
pub async fn get_points_for_metric(
    db: &DatabaseConnection,
    metric_id: i32,
) -> Result<Vec<metric_point::Model>, DbErr> {
    metric_point::Entity::find()
        .filter(metric_point::Column::MetricId.eq(metric_id))
        .order_by_asc(metric_point::Column::Id)
        .all(db)
        .await
}

async fn insert_metric<C: ConnectionTrait>(
    db: &C,
    object_id: Uuid,
    definition: &MetricDefinition,
) -> Result<metric::Model, DbErr> {
    metric::ActiveModel {
        object_id: Set(object_id),
        name: Set(definition.name.to_string()),
        key: Set(definition.key.to_string()),
        configuration: Set(definition.configuration.to_string()),
        field_name: Set(definition.field_name.to_string()),
        created_at: Set(Utc::now()),
        ..Default::default()
    }
    .insert(db)
    .await
}

async fn insert_chart<C: ConnectionTrait>(
    db: &C,
    metric_id: i32,
    chart: &ChartDefinition,
) -> Result<chart::Model, DbErr> {
    chart::ActiveModel {
        metric_id: Set(metric_id),
        configuration: Set(chart.configuration.to_string()),
        version: Set(chart.version),
        created_at: Set(Utc::now()),
        ..Default::default()
    }
    .insert(db)
    .await
}

#[derive(Clone, Debug)]
pub struct DbMetricStore {
    db: DatabaseConnection,
}

impl DbMetricStore {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    pub fn connection(&self) -> &DatabaseConnection {
        &self.db
    }

    /// After a failed metric insert: a concurrent writer may have created the
    /// same series first.
    async fn reuse_concurrent(
        &self,
        object_id: Uuid,
        definition: &MetricDefinition,
        insert_error: DbErr,
    ) -> Result<(Metric, bool), StoreError> {
        match find_metric(&self.db, object_id, definition.key).await? {
            Some(existing) => {
                warn!(object_id = %object_id, error = %insert_error, "Metric created concurrently, reusing it.");
                Ok((existing.into(), false))
            }
            None => Err(insert_error.into()),
        }
    }
}

#[async_trait]
impl MetricStore for DbMetricStore {
    async fn get_or_create(
        &self,
        object_id: Uuid,
        definition: &MetricDefinition,
    ) -> Result<(Metric, bool), StoreError> {
        if let Some(existing) = find_metric(&self.db, object_id, definition.key).await? {
            return Ok((existing.into(), false));
        }

        match insert_metric(&self.db, object_id, definition).await {
            Ok(model) => {
                debug!(metric_id = model.id, object_id = %object_id, "Created metric.");
                Ok((model.into(), true))
            }
            Err(e) => self.reuse_concurrent(object_id, definition, e).await,
        }
    }

    async fn get_or_create_with_charts(
        &self,
        object_id: Uuid,
        definition: &MetricDefinition,
        charts: &[ChartDefinition],
    ) -> Result<(Metric, bool), StoreError> {
        if let Some(existing) = find_metric(&self.db, object_id, definition.key).await? {
            return Ok((existing.into(), false));
        }

        let txn = self.db.begin().await?;
        let model = match insert_metric(&txn, object_id, definition).await {
            Ok(model) => model,
            Err(e) => {
                txn.rollback().await?;
                return self.reuse_concurrent(object_id, definition, e).await;
            }
        };
        for chart in charts {
            if let Err(e) = insert_chart(&txn, model.id, chart).await {
                txn.rollback().await?;
                warn!(object_id = %object_id, chart = chart.configuration, error = %e, "Chart insert failed, metric rolled back.");
                return Err(e.into());
            }
        }
        txn.commit().await?;

        debug!(metric_id = model.id, object_id = %object_id, charts = charts.len(), "Created metric with charts.");
        Ok((model.into(), true))
    }

    async fn write(
        &self,
        metric: &Metric,
        value: f64,
        extra_values: Map<String, Value>,
    ) -> Result<(), StoreError> {
        let point = metric_point::ActiveModel {
            metric_id: Set(metric.id),
            time: Set(Utc::now()),
            value: Set(value),
            extra_values: Set(Value::Object(extra_values)),
            ..Default::default()
        };
        point.insert(&self.db).await?;
        Ok(())
    }

    async fn create_chart(
        &self,
        metric: &Metric,
        chart: &ChartDefinition,
    ) -> Result<Chart, StoreError> {
        if let Some(existing) = find_chart(&self.db, metric.id, chart.configuration).await? {
            return Ok(existing.into());
        }
        let saved = insert_chart(&self.db, metric.id, chart).await?;
        Ok(saved.into())
    }
}
