//! Error types for dual-bank update operations

use thiserror::Error;

use crate::bank::Bank;
use crate::compare::Expectation;
use crate::transport::TransportError;
use crate::version::DecodeError;

/// Errors raised while reading or interpreting bank state
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BankError {
    /// Zero or two banks report active
    #[error("Active bank of {target} is indeterminate: {active_count} banks report active")]
    AmbiguousActive {
        /// Target name
        target: String,
        /// Number of banks reporting active
        active_count: usize,
    },

    /// The status report has no entry for a bank
    #[error("Status of {target} has no entry for bank {bank}")]
    MissingBank {
        /// Target name
        target: String,
        /// Missing bank
        bank: Bank,
    },

    /// The status report lists a bank more than once
    #[error("Status of {target} lists bank {bank} more than once")]
    DuplicateBank {
        /// Target name
        target: String,
        /// Duplicated bank
        bank: Bank,
    },

    /// A bank reported an undecodable version
    #[error("Bank {bank} of {target} reported an undecodable version: {source}")]
    Decode {
        /// Target name
        target: String,
        /// Bank whose version failed to decode
        bank: Bank,
        /// Decoder failure
        #[source]
        source: DecodeError,
    },

    /// Status query failed
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Errors that abort an update attempt or campaign
///
/// Stage failures that a caller is expected to handle per round
/// (push exhaustion, timeout, version mismatch, cancellation) are reported as
/// [`crate::orchestrator::UpdateOutcome`] values instead.
#[derive(Error, Debug)]
pub enum UpdateError {
    /// Bank state could not be determined
    #[error(transparent)]
    Bank(#[from] BankError),

    /// The update command was rejected by the transport
    #[error("Failed to initiate update of bank {bank} on {target}: {source}")]
    Initiate {
        /// Target name
        target: String,
        /// Bank the update was aimed at
        bank: Bank,
        /// Transport failure
        #[source]
        source: TransportError,
    },

    /// The caller asked to flash the running bank
    #[error("Refusing to update bank {bank} of {target}: it is the active bank")]
    TargetBankActive {
        /// Target name
        target: String,
        /// Requested bank
        bank: Bank,
    },

    /// A directional expectation has no version to compare against
    #[error("Cannot check for a {expectation} version: active bank has no known version")]
    MissingBaseline {
        /// Expectation that could not be evaluated
        expectation: Expectation,
    },

    /// Configuration values are unusable
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// I/O error while loading configuration
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration could not be (de)serialized
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// A campaign task panicked or was aborted
    #[error("Campaign task for {target} failed: {message}")]
    Task {
        /// Target name
        target: String,
        /// Join failure description
        message: String,
    },
}

impl From<serde_json::Error> for UpdateError {
    fn from(e: serde_json::Error) -> Self {
        UpdateError::Serialization(e.to_string())
    }
}

impl From<serde_yaml::Error> for UpdateError {
    fn from(e: serde_yaml::Error) -> Self {
        UpdateError::Serialization(e.to_string())
    }
}
