use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "metrics")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub object_id: Uuid,
    pub name: String,
    pub key: String,
    pub configuration: String,
    pub field_name: String,
    pub created_at: ChronoDateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::chart::Entity")]
    Chart,
    #[sea_orm(has_many = "super::metric_point::Entity")]
    MetricPoint,
}

impl Related<super::chart::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Chart.def()
    }
}

impl Related<super::metric_point::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::MetricPoint.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
