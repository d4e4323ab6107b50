pub mod entities;
pub mod services;

use sea_orm::sea_query::Index;
use sea_orm::{ConnectionTrait, DatabaseConnection, DbErr, Schema};
use tracing::info;

use self::entities::{chart, metric, metric_point};

/// Creates the metric tables if they do not exist yet.
pub async fn create_schema(db: &DatabaseConnection) -> Result<(), DbErr> {
    let backend = db.get_database_backend();
    let schema = Schema::new(backend);

    let mut tables = [
        schema.create_table_from_entity(metric::Entity),
        schema.create_table_from_entity(chart::Entity),
        schema.create_table_from_entity(metric_point::Entity),
    ];
    for table in tables.iter_mut() {
        table.if_not_exists();
        db.execute(backend.build(&*table)).await?;
    }

    let indexes = [
        Index::create()
            .name("idx_metrics_object_key")
            .table(metric::Entity)
            .col(metric::Column::ObjectId)
            .col(metric::Column::Key)
            .unique()
            .if_not_exists()
            .to_owned(),
        Index::create()
            .name("idx_charts_metric_configuration")
            .table(chart::Entity)
            .col(chart::Column::MetricId)
            .col(chart::Column::Configuration)
            .unique()
            .if_not_exists()
            .to_owned(),
        Index::create()
            .name("idx_metric_points_metric_time")
            .table(metric_point::Entity)
            .col(metric_point::Column::MetricId)
            .col(metric_point::Column::Time)
            .if_not_exists()
            .to_owned(),
    ];
    for index in &indexes {
        db.execute(backend.build(index)).await?;
    }

    info!("Metric schema is ready.");
    Ok(())
}
