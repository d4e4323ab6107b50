use thiserror::Error;
use uuid::Uuid;

use crate::connection::ConnectionError;
use crate::monitoring::StoreError;

#[derive(Error, Debug)]
pub enum CheckError {
    #[error("No iperf server configured for organization {0}")]
    NoServerConfigured(Uuid),
    #[error("Refusing to use iperf server address {0:?}")]
    InvalidServerAddress(String),
    #[error("Malformed iperf output: {0}")]
    MalformedOutput(String),
    #[error("Unsupported iperf mode: {0}")]
    UnsupportedMode(String),
    #[error("Unknown check type: {0}")]
    UnknownCheckType(String),
    #[error(transparent)]
    Connection(#[from] ConnectionError),
    #[error(transparent)]
    Store(#[from] StoreError),
}
