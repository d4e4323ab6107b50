use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "metric_points")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub metric_id: i32,
    pub time: ChronoDateTimeUtc,
    pub value: f64,
    // sum_sent_bps, sum_rec_bps, ... for iperf
    #[sea_orm(column_type = "Json")]
    pub extra_values: Json,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::metric::Entity",
        from = "Column::MetricId",
        to = "super::metric::Column::Id",
        on_delete = "Cascade"
    )]
    Metric,
}

impl Related<super::metric::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Metric.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
