//! Output formatting for CLI responses

use anyhow::{Error, Result};
use colored::*;
use fwbank_update::{
    AttemptState, CampaignReport, StructuredVersion, VersionLayout, VersionOrdering,
};
use serde_json::json;
use std::time::Duration;

use crate::error::CliError;

/// Print error in JSON format
pub fn print_error_json(error: &Error) {
    let error_json = json!({
        "success": false,
        "error": {
            "message": error.to_string(),
            "type": error_type_name(error)
        }
    });
    match serde_json::to_string_pretty(&error_json) {
        Ok(s) => println!("{}", s),
        Err(e) => eprintln!("Failed to format error as JSON: {}", e),
    }
}

/// Print error in human-readable format
pub fn print_error_human(error: &Error) {
    eprintln!("{} {}", "Error:".red().bold(), error);

    let mut source = error.source();
    while let Some(err) = source {
        eprintln!("  {} {}", "Caused by:".yellow(), err);
        source = err.source();
    }
}

fn error_type_name(error: &Error) -> &'static str {
    match error.downcast_ref::<CliError>() {
        Some(CliError::InvalidVersion(_)) => "invalid_version",
        Some(CliError::InvalidScenario(_)) => "invalid_scenario",
        Some(CliError::NotVerified { .. }) => "not_verified",
        Some(CliError::IoError(_)) => "io",
        Some(CliError::JsonError(_)) | Some(CliError::YamlError(_)) => "parse",
        Some(CliError::Update(_)) => "update",
        None => "unknown",
    }
}

/// Print a decoded version with its individual fields
pub fn print_decoded(
    layout: &VersionLayout,
    version: &StructuredVersion,
    json: bool,
) -> Result<()> {
    let fields: Vec<(&'static str, u32)> = layout
        .fields()
        .iter()
        .map(|spec| spec.name)
        .zip(version.fields())
        .collect();

    if json {
        let field_map: serde_json::Map<String, serde_json::Value> = fields
            .iter()
            .map(|(name, value)| ((*name).to_string(), json!(value)))
            .collect();
        let output = json!({
            "success": true,
            "version": layout.display(version),
            "fields": field_map,
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        println!("{}", layout.display(version).bold());
        for (name, value) in fields {
            println!("  {:<18} {}", name, value);
        }
    }
    Ok(())
}

/// Print the result of comparing two versions
pub fn print_comparison(
    a: &StructuredVersion,
    b: &StructuredVersion,
    ordering: VersionOrdering,
    json: bool,
) -> Result<()> {
    if json {
        let output = json!({
            "success": true,
            "a": a,
            "b": b,
            "ordering": ordering,
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        let word = match ordering {
            VersionOrdering::Newer => "Newer".green(),
            VersionOrdering::Equal => "Equal".normal(),
            VersionOrdering::Older => "Older".yellow(),
        };
        println!("{}", word);
    }
    Ok(())
}

/// Print per-round results of every campaign
pub fn print_campaigns(reports: &[CampaignReport], simulated: Duration, json: bool) -> Result<()> {
    if json {
        let output = json!({
            "success": reports.iter().all(CampaignReport::all_verified),
            "simulated_secs": simulated.as_secs(),
            "campaigns": reports,
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    for report in reports {
        let status = if report.all_verified() {
            "verified".green()
        } else {
            "FAILED".red().bold()
        };
        println!(
            "{} ({}) {}/{} rounds verified: {}",
            report.target.name.bold(),
            report.target.class,
            report.verified_rounds(),
            report.planned_rounds,
            status
        );

        for round in &report.rounds {
            let state = match round.outcome_state {
                AttemptState::Verified if round.direction_ok => "✓".green(),
                AttemptState::Verified => "!".yellow(),
                _ => "✗".red(),
            };
            let current = round
                .current
                .map_or_else(|| "-".to_string(), |v| v.to_string());
            let bank_after = round
                .bank_after
                .map_or("?", |bank| report.target.bank_label(bank));
            println!(
                "  {} round {:>3}: {} -> {}  now {}  {}",
                state,
                round.round,
                report.target.bank_label(round.bank_before),
                bank_after,
                current,
                round.detail.dimmed()
            );
        }
        if let Some(reason) = &report.aborted {
            println!("  {} {}", "aborted:".red(), reason);
        }
        println!("  final: {}", report.final_pair);
    }
    println!(
        "{}",
        format!("Simulated time: {}s", simulated.as_secs()).dimmed()
    );
    Ok(())
}
