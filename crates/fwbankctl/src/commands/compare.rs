//! Canonical version comparison

use anyhow::Result;
use fwbank_update::{StructuredVersion, compare};

use crate::error::CliError;
use crate::output;

/// Compare `a` against `b` and print `Newer`, `Equal` or `Older`
pub fn execute(a: &str, b: &str, json: bool) -> Result<()> {
    let left = parse(a)?;
    let right = parse(b)?;
    let ordering = compare(&left, &right);

    output::print_comparison(&left, &right, ordering, json)
}

fn parse(text: &str) -> Result<StructuredVersion, CliError> {
    text.parse()
        .map_err(|e| CliError::InvalidVersion(format!("{text}: {e}")))
}
