//! Device checks for NodeNexus.
//!
//! Runs iperf3 against monitored devices over their configured remote
//! connection and records normalized bandwidth metrics.

pub mod check;
pub mod connection;
pub mod db;
pub mod monitoring;
pub mod scheduler;
pub mod settings;
