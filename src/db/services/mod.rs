pub mod metric_service;

pub use metric_service::DbMetricStore;
