//! Error types for fwbankctl

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CliError {
    #[error("Invalid version: {0}")]
    InvalidVersion(String),

    #[error("Invalid scenario: {0}")]
    InvalidScenario(String),

    #[error("{failed} of {total} campaigns were not fully verified")]
    NotVerified { failed: usize, total: usize },

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error(transparent)]
    Update(#[from] fwbank_update::UpdateError),
}
