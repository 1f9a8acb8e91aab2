//! Convenience re-exports for common dual-bank update types

pub use crate::bank::{Bank, BankPair, DeviceClass, FirmwareBank, UpdateTarget};
pub use crate::campaign::{
    CampaignPlan, CampaignReport, CampaignStep, RoundReport, UpdateCampaign, run_parallel,
};
pub use crate::compare::{Expectation, VersionOrdering, compare};
pub use crate::config::UpdateConfig;
pub use crate::error::{BankError, UpdateError};
pub use crate::orchestrator::{
    AttemptState, CancelHandle, CancelToken, UpdateOrchestrator, UpdateOutcome, UpdateReport,
    UpdateRequest,
};
pub use crate::transport::{
    Clock, DeviceState, DeviceStatus, FirmwareTransport, TokioClock, TransportError,
    TransportOperation,
};
pub use crate::version::{DecodeError, StructuredVersion, VersionLayout};
