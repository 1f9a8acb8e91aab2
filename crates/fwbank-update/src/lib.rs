//! Dual-bank firmware updates with structured version checks
//!
//! Devices such as power supplies, management controllers and expanders keep
//! two firmware banks and run from one of them. An update flashes the inactive
//! bank, waits for the device to switch over, and then checks that the newly
//! active bank reports the version the operator expected.
//!
//! This crate provides:
//! - Decoding of raw register/byte version tokens into a comparable version
//! - A/B bank state with strict active-bank detection
//! - A single-attempt orchestrator with push retries and deadline-bounded polling
//! - Multi-round campaigns that alternate banks and track version history
//! - An in-memory device and clock for running all of the above without hardware
//!
//! # Architecture
//!
//! - [`version`]: Version layout table, decoder and canonical formatting
//! - [`compare`]: Version ordering and expectations
//! - [`bank`]: Banks, bank pairs and status refresh
//! - [`transport`]: Device transport and clock capabilities
//! - [`orchestrator`]: One update attempt from push to verification
//! - [`campaign`]: Repeated alternating updates and parallel campaigns
//! - [`config`]: Retry, polling and deadline settings
//! - [`sim`]: Simulated devices and time
//! - [`error`]: Error types
//!
//! # Example
//!
//! ```ignore
//! use fwbank_update::prelude::*;
//! use std::sync::Arc;
//!
//! # async fn example(transport: Arc<dyn FirmwareTransport>) -> Result<(), UpdateError> {
//! let orchestrator = Arc::new(UpdateOrchestrator::new(
//!     transport,
//!     Arc::new(TokioClock),
//!     UpdateConfig::default(),
//! )?);
//!
//! let target = UpdateTarget::new("PSU 1", DeviceClass::Psu);
//! let pair = orchestrator.refresh(&target).await?;
//! let request = UpdateRequest::new(pair, "psu-fw.bin", "/tmp/psu-fw.bin", Expectation::Newer);
//!
//! let report = orchestrator.run(request).await?;
//! println!("{}: {}", target, report.outcome);
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_op_in_unsafe_fn, clippy::unwrap_used)]
#![warn(missing_docs, rust_2018_idioms)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod bank;
pub mod campaign;
pub mod compare;
pub mod config;
pub mod error;
pub mod orchestrator;
pub mod prelude;
pub mod sim;
pub mod transport;
pub mod version;

pub use bank::{Bank, BankNaming, BankPair, DeviceClass, FirmwareBank, UpdateTarget, refresh};
pub use campaign::{
    CampaignPlan, CampaignReport, CampaignStep, RoundReport, UpdateCampaign, VersionHistory,
    run_parallel,
};
pub use compare::{Expectation, VersionOrdering, compare};
pub use config::{DeadlineConfig, UpdateConfig};
pub use error::{BankError, UpdateError};
pub use orchestrator::{
    AttemptEvent, AttemptState, CancelHandle, CancelToken, UpdateAttempt, UpdateOrchestrator,
    UpdateOutcome, UpdateReport, UpdateRequest,
};
pub use sim::{ManualClock, ReportedActive, SimulatedDevice, SimulatedTarget};
pub use transport::{
    BankStatus, Clock, DeviceState, DeviceStatus, FirmwareTransport, TokioClock, TransportError,
    TransportOperation,
};
pub use version::{
    DecodeError, EncodeError, FieldRule, FieldSpec, ParseVersionError, StructuredVersion,
    VersionLayout,
};
