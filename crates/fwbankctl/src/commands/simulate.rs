//! Campaign rehearsal against simulated devices

use anyhow::{Context, Result};
use fwbank_update::config::is_json;
use fwbank_update::sim::{ManualClock, SimulatedDevice, SimulatedTarget};
use fwbank_update::{
    Bank, CampaignPlan, DeviceClass, StructuredVersion, UpdateConfig, UpdateOrchestrator,
    UpdateTarget, run_parallel,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::error::CliError;
use crate::output;

/// A simulated target and its starting bank contents
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScenarioTarget {
    /// Target name
    pub name: String,
    /// Device class
    pub class: DeviceClass,
    /// Version in bank A, absent when empty
    #[serde(default)]
    pub bank_a: Option<StructuredVersion>,
    /// Version in bank B, absent when empty
    #[serde(default)]
    pub bank_b: Option<StructuredVersion>,
    /// Running bank
    #[serde(default = "default_active")]
    pub active: Bank,
    /// Seconds from update command to the device settling
    #[serde(default = "default_update_secs")]
    pub update_secs: u64,
    /// Never settle once an update starts
    #[serde(default)]
    pub stuck: bool,
    /// Flash without switching the active bank
    #[serde(default)]
    pub no_swap: bool,
}

fn default_active() -> Bank {
    Bank::A
}

fn default_update_secs() -> u64 {
    60
}

/// Faults applied to the whole simulation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScenarioFaults {
    /// Number of image pushes that fail before pushes succeed
    pub push_failures: u32,
    /// Number of status queries that fail before queries succeed
    pub query_failures: u32,
}

/// A complete simulation: devices, images, plan and faults
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulationScenario {
    /// Orchestrator settings
    #[serde(default)]
    pub config: UpdateConfig,
    /// Devices to update, each running its own campaign
    pub targets: Vec<ScenarioTarget>,
    /// Image path to the version it installs
    pub images: BTreeMap<PathBuf, StructuredVersion>,
    /// Rounds and steps shared by every campaign
    pub plan: CampaignPlan,
    /// Injected faults
    #[serde(default)]
    pub faults: ScenarioFaults,
}

impl SimulationScenario {
    /// Parse a scenario, JSON if `path` ends in `.json`, YAML otherwise
    pub fn parse(path: &Path, content: &str) -> Result<Self, CliError> {
        let scenario: Self = if is_json(path) {
            serde_json::from_str(content)?
        } else {
            serde_yaml::from_str(content)?
        };
        scenario.validate()?;
        Ok(scenario)
    }

    /// Reject scenarios that cannot run
    pub fn validate(&self) -> Result<(), CliError> {
        if self.targets.is_empty() {
            return Err(CliError::InvalidScenario("no targets".to_string()));
        }
        if self.plan.rounds > 0 && self.plan.steps.is_empty() {
            return Err(CliError::InvalidScenario("plan has no steps".to_string()));
        }
        for step in &self.plan.steps {
            if !self.images.contains_key(&step.image_path) {
                return Err(CliError::InvalidScenario(format!(
                    "step image {} is not in the image catalog",
                    step.image_path.display()
                )));
            }
        }
        let mut names: Vec<&str> = self.targets.iter().map(|t| t.name.as_str()).collect();
        names.sort_unstable();
        if let Some(pair) = names.windows(2).find(|w| w.first() == w.get(1)) {
            return Err(CliError::InvalidScenario(format!(
                "duplicate target {}",
                pair.first().copied().unwrap_or_default()
            )));
        }
        self.config.validate()?;
        Ok(())
    }

    /// Build the simulated device for this scenario on `clock`
    pub fn build_device(&self, clock: Arc<ManualClock>) -> SimulatedDevice {
        let device = SimulatedDevice::new(clock);
        for (path, version) in &self.images {
            device.add_image(path.clone(), *version);
        }
        for target in &self.targets {
            device.add_target(
                target.name.clone(),
                SimulatedTarget {
                    bank_a: target.bank_a,
                    bank_b: target.bank_b,
                    active: target.active,
                    update_duration: Duration::from_secs(target.update_secs),
                },
            );
            device.set_stuck(&target.name, target.stuck);
            device.set_swap_on_update(&target.name, !target.no_swap);
        }
        device.fail_next_pushes(self.faults.push_failures);
        device.fail_next_queries(self.faults.query_failures);
        device
    }

    /// Update targets in scenario order
    pub fn update_targets(&self) -> Vec<UpdateTarget> {
        self.targets
            .iter()
            .map(|t| UpdateTarget::new(t.name.clone(), t.class))
            .collect()
    }
}

/// Load `path`, run every campaign in parallel and print the reports
pub async fn execute(path: &Path, rounds: Option<u32>, json: bool) -> Result<()> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read scenario {}", path.display()))?;
    let mut scenario = SimulationScenario::parse(path, &content)?;
    if let Some(rounds) = rounds {
        scenario.plan.rounds = rounds;
    }

    let clock = Arc::new(ManualClock::new());
    let device = Arc::new(scenario.build_device(clock.clone()));
    let orchestrator = Arc::new(
        UpdateOrchestrator::new(device, clock.clone(), scenario.config.clone())
            .map_err(CliError::from)?,
    );

    info!(
        targets = scenario.targets.len(),
        rounds = scenario.plan.rounds,
        "Running simulated campaigns"
    );
    let results = run_parallel(
        orchestrator,
        scenario.update_targets(),
        scenario.plan.clone(),
    )
    .await;

    let mut reports = Vec::with_capacity(results.len());
    for result in results {
        reports.push(result.map_err(CliError::from)?);
    }

    output::print_campaigns(&reports, clock.elapsed(), json)?;

    let failed = reports.iter().filter(|r| !r.all_verified()).count();
    if failed > 0 {
        return Err(CliError::NotVerified {
            failed,
            total: reports.len(),
        }
        .into());
    }
    Ok(())
}
