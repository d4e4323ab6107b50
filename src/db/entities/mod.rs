//! SeaORM entities for metric series, their charts and their points.

pub mod chart;
pub mod metric;
pub mod metric_point;

pub mod prelude {
    pub use super::chart::Entity as Chart;
    pub use super::chart::Model as ChartModel;
    pub use super::metric::Entity as Metric;
    pub use super::metric::Model as MetricModel;
    pub use super::metric_point::Entity as MetricPoint;
    pub use super::metric_point::Model as MetricPointModel;
}
