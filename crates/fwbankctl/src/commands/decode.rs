//! Raw version token decoding

use anyhow::Result;
use fwbank_update::VersionLayout;

use crate::error::CliError;
use crate::output;

/// Decode `tokens` with the PSU layout and print the result
pub fn execute(tokens: &[String], json: bool) -> Result<()> {
    let layout = VersionLayout::PSU;
    let version = layout
        .decode(tokens)
        .map_err(|e| CliError::InvalidVersion(e.to_string()))?;

    output::print_decoded(&layout, &version, json)
}
