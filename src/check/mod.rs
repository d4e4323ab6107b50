//! Check classes and the registry that maps check types to them.

pub mod error;
pub mod iperf;
pub mod iperf_result;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

use crate::settings::CheckSettings;

pub use error::CheckError;
pub use iperf::IperfCheck;
pub use iperf_result::CheckOutcome;

pub const IPERF_CHECK_TYPE: &str = "iperf";

/// The device a check runs against.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CheckTarget {
    pub device_id: Uuid,
    pub organization_id: Uuid,
    pub name: String,
}

impl fmt::Display for CheckTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.device_id)
    }
}

#[async_trait]
pub trait Check: Send + Sync {
    fn check_type(&self) -> &'static str;

    /// Runs the check once. `Ok(None)` means nothing was measured.
    async fn perform(
        &self,
        target: &CheckTarget,
        store: bool,
    ) -> Result<Option<CheckOutcome>, CheckError>;
}

/// Check implementations available to the scheduler, keyed by check type.
#[derive(Clone, Default)]
pub struct CheckRegistry {
    checks: HashMap<String, Arc<dyn Check>>,
}

impl CheckRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs an implementation. Its type must appear in the check-class table.
    pub fn register(
        &mut self,
        settings: &CheckSettings,
        check: Arc<dyn Check>,
    ) -> Result<(), CheckError> {
        let check_type = check.check_type();
        if !settings.is_registered(check_type) {
            return Err(CheckError::UnknownCheckType(check_type.to_string()));
        }
        self.checks.insert(check_type.to_string(), check);
        Ok(())
    }

    pub fn resolve(&self, check_type: &str) -> Result<Arc<dyn Check>, CheckError> {
        self.checks
            .get(check_type)
            .cloned()
            .ok_or_else(|| CheckError::UnknownCheckType(check_type.to_string()))
    }
}
