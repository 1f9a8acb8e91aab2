//! Capabilities the update core consumes: a firmware transport and a clock
//!
//! Concrete transports (REST, SSH/SFTP, vendor tools) live outside this crate
//! and implement [`FirmwareTransport`]. Time is reached through [`Clock`] so
//! polling and retry delays can run against simulated time in tests.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::time::{Duration, Instant};
use thiserror::Error;

use crate::bank::{Bank, UpdateTarget};

/// Transport operation that failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransportOperation {
    /// Pushing an image to the device side
    PushImage,
    /// Starting the update of a bank
    InitiateUpdate,
    /// Reading device status
    QueryStatus,
}

impl fmt::Display for TransportOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportOperation::PushImage => write!(f, "push image"),
            TransportOperation::InitiateUpdate => write!(f, "initiate update"),
            TransportOperation::QueryStatus => write!(f, "query status"),
        }
    }
}

/// Failure at the transport boundary, passed through uninterpreted
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{operation} failed: {message}")]
pub struct TransportError {
    /// Operation that failed
    pub operation: TransportOperation,
    /// Transport-specific description
    pub message: String,
}

impl TransportError {
    /// Create a transport error
    pub fn new(operation: TransportOperation, message: impl Into<String>) -> Self {
        Self {
            operation,
            message: message.into(),
        }
    }
}

/// Coarse device state as reported by the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum DeviceState {
    /// Device is up and serving from its active bank
    Enabled,
    /// Device is flashing or rebooting
    Updating,
    /// State could not be determined
    #[default]
    Unknown,
}

impl DeviceState {
    /// Whether polling may stop on this state
    pub fn is_settled(self) -> bool {
        matches!(self, DeviceState::Enabled)
    }
}

impl fmt::Display for DeviceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceState::Enabled => write!(f, "Enabled"),
            DeviceState::Updating => write!(f, "Updating"),
            DeviceState::Unknown => write!(f, "Unknown"),
        }
    }
}

/// Per-bank portion of a status report
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BankStatus {
    /// Bank this entry describes
    pub bank: Bank,
    /// Whether the device reports this bank as running
    pub active: bool,
    /// Raw version tokens, `None` when the bank holds no image
    pub raw_version: Option<Vec<String>>,
}

/// Status snapshot returned by [`FirmwareTransport::query_status`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceStatus {
    /// Device state
    pub state: DeviceState,
    /// One entry per bank
    pub banks: Vec<BankStatus>,
}

/// Device-side operations needed to update a dual-bank target
#[async_trait::async_trait]
pub trait FirmwareTransport: Send + Sync {
    /// Copy an image to `destination` on the device side
    async fn push_image(&self, path: &Path, destination: &str) -> Result<(), TransportError>;

    /// Start flashing `image_ref` into `bank` of `target`
    async fn initiate_update(
        &self,
        target: &UpdateTarget,
        bank: Bank,
        image_ref: &str,
    ) -> Result<(), TransportError>;

    /// Read the current device state and per-bank versions
    async fn query_status(&self, target: &UpdateTarget) -> Result<DeviceStatus, TransportError>;
}

/// Time source for deadlines and delays
#[async_trait::async_trait]
pub trait Clock: Send + Sync {
    /// Current monotonic time
    fn now(&self) -> Instant;

    /// Wait for `duration`
    async fn sleep(&self, duration: Duration);
}

/// Wall-clock implementation backed by the tokio timer
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioClock;

#[async_trait::async_trait]
impl Clock for TokioClock {
    fn now(&self) -> Instant {
        tokio::time::Instant::now().into_std()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}
