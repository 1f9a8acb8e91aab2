//! Multi-round update campaigns
//!
//! A campaign flashes the inactive bank of one target round after round,
//! alternating A and B, and tracks the last two verified versions so each
//! round can be checked against the direction the operator asked for
//! (upgrade, downgrade, reinstall). Independent targets run their campaigns
//! concurrently with [`run_parallel`].

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::bank::{Bank, BankPair, UpdateTarget};
use crate::compare::{Expectation, VersionOrdering, compare};
use crate::error::UpdateError;
use crate::orchestrator::{AttemptState, UpdateOrchestrator, UpdateOutcome, UpdateRequest};
use crate::version::StructuredVersion;

/// One image of a campaign plan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CampaignStep {
    /// Local image to push
    pub image_path: PathBuf,
    /// Device-side destination
    pub destination: String,
    /// Version the flashed bank must report
    pub expectation: Expectation,
}

/// Rounds to run and the images to cycle through
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CampaignPlan {
    /// Number of rounds
    pub rounds: u32,
    /// Round `i` uses `steps[i % steps.len()]`
    pub steps: Vec<CampaignStep>,
    /// End the campaign at the first round that is not verified
    #[serde(default)]
    pub stop_on_failure: bool,
}

impl CampaignPlan {
    /// Step used by a round
    pub fn step(&self, round: u32) -> Option<&CampaignStep> {
        let len = self.steps.len();
        if len == 0 {
            return None;
        }
        let index = usize::try_from(round).ok()? % len;
        self.steps.get(index)
    }

    fn validate(&self) -> Result<(), UpdateError> {
        if self.rounds > 0 && self.steps.is_empty() {
            return Err(UpdateError::InvalidConfig(
                "campaign plan has rounds but no steps".to_string(),
            ));
        }
        Ok(())
    }
}

/// The last two verified versions of a target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct VersionHistory {
    /// Version running now
    pub current: Option<StructuredVersion>,
    /// Version that ran before the last verified update
    pub previous: Option<StructuredVersion>,
}

impl VersionHistory {
    /// Start from the version found on the device
    pub fn new(current: Option<StructuredVersion>) -> Self {
        Self {
            current,
            previous: None,
        }
    }

    /// Record a verified update
    pub fn advance(&mut self, version: StructuredVersion) {
        self.previous = self.current;
        self.current = Some(version);
    }

    /// How the current version relates to the previous one
    pub fn relation(&self) -> Option<VersionOrdering> {
        match (&self.current, &self.previous) {
            (Some(current), Some(previous)) => Some(compare(current, previous)),
            _ => None,
        }
    }
}

/// Result of one campaign round
#[derive(Debug, Clone, Serialize)]
pub struct RoundReport {
    /// Zero-based round number
    pub round: u32,
    /// Active bank before the round
    pub bank_before: Bank,
    /// Active bank after the round, `None` when the device reported no
    /// single active bank
    pub bank_after: Option<Bank>,
    /// Terminal state of the attempt
    pub outcome_state: AttemptState,
    /// History after the round
    pub previous: Option<StructuredVersion>,
    /// History after the round
    pub current: Option<StructuredVersion>,
    /// `compare(current, previous)` when the round was verified
    pub relation: Option<VersionOrdering>,
    /// Whether a verified round moved in the requested direction
    pub direction_ok: bool,
    /// Push attempts made
    pub push_attempts: u32,
    /// Time the attempt took
    pub elapsed: Duration,
    /// Outcome description
    pub detail: String,
}

impl RoundReport {
    /// Whether the round was verified
    pub fn is_verified(&self) -> bool {
        self.outcome_state == AttemptState::Verified
    }
}

/// Result of a whole campaign
#[derive(Debug, Clone, Serialize)]
pub struct CampaignReport {
    /// Target the campaign ran against
    pub target: UpdateTarget,
    /// Rounds the plan asked for
    pub planned_rounds: u32,
    /// Rounds that ran, in order
    pub rounds: Vec<RoundReport>,
    /// History at the end of the campaign
    pub history: VersionHistory,
    /// Last bank snapshot
    pub final_pair: BankPair,
    /// Error that ended the campaign before the plan completed
    pub aborted: Option<String>,
}

impl CampaignReport {
    /// Whether every planned round ran and was verified in the requested
    /// direction
    pub fn all_verified(&self) -> bool {
        let ran_all = usize::try_from(self.planned_rounds)
            .is_ok_and(|planned| planned == self.rounds.len());
        self.aborted.is_none()
            && ran_all
            && self.rounds.iter().all(|r| r.is_verified() && r.direction_ok)
    }

    /// Number of verified rounds
    pub fn verified_rounds(&self) -> usize {
        self.rounds.iter().filter(|r| r.is_verified()).count()
    }
}

/// Repeated A/B updates of one target
pub struct UpdateCampaign {
    orchestrator: Arc<UpdateOrchestrator>,
    target: UpdateTarget,
}

impl UpdateCampaign {
    /// Create a campaign for `target`
    pub fn new(orchestrator: Arc<UpdateOrchestrator>, target: UpdateTarget) -> Self {
        Self {
            orchestrator,
            target,
        }
    }

    /// Target this campaign updates
    pub fn target(&self) -> &UpdateTarget {
        &self.target
    }

    /// Run every round of `plan`
    ///
    /// Round outcomes other than `Verified` are recorded, not returned as
    /// errors. An error before the first round (invalid plan, unreadable
    /// bank state) is returned; a later one ends the campaign and is kept in
    /// [`CampaignReport::aborted`] next to the rounds that already ran.
    pub async fn run(&self, plan: &CampaignPlan) -> Result<CampaignReport, UpdateError> {
        plan.validate()?;

        let mut pair = self.orchestrator.refresh(&self.target).await?;
        let mut history = VersionHistory::new(pair.active_version()?);
        let mut rounds = Vec::new();
        let mut aborted = None;

        info!(
            target_name = %self.target,
            rounds = plan.rounds,
            start = %pair,
            "Starting update campaign"
        );

        for round in 0..plan.rounds {
            let Some(step) = plan.step(round) else {
                break;
            };
            let round_report = match self.run_round(round, step, &mut pair, &mut history).await {
                Ok(round_report) => round_report,
                Err(e) => {
                    error!(
                        target_name = %self.target,
                        round,
                        error = %e,
                        "Campaign aborted"
                    );
                    aborted = Some(e.to_string());
                    break;
                }
            };
            let verified = round_report.is_verified();
            rounds.push(round_report);

            if !verified && plan.stop_on_failure {
                warn!(target_name = %self.target, round, "Stopping campaign after failed round");
                break;
            }
        }

        let report = CampaignReport {
            target: self.target.clone(),
            planned_rounds: plan.rounds,
            rounds,
            history,
            final_pair: pair,
            aborted,
        };

        info!(
            target_name = %self.target,
            verified = report.verified_rounds(),
            planned = plan.rounds,
            "Campaign finished"
        );

        Ok(report)
    }

    async fn run_round(
        &self,
        round: u32,
        step: &CampaignStep,
        pair: &mut BankPair,
        history: &mut VersionHistory,
    ) -> Result<RoundReport, UpdateError> {
        let bank_before = pair.active_bank()?.bank;

        let mut request = UpdateRequest::new(
            pair.clone(),
            step.image_path.clone(),
            step.destination.clone(),
            step.expectation,
        );
        if let Some(current) = history.current {
            request = request.with_baseline(current);
        }
        let report = self.orchestrator.run(request).await?;

        match report.outcome.refreshed_pair() {
            Some(refreshed) => *pair = refreshed.clone(),
            None => match self.orchestrator.refresh(&self.target).await {
                Ok(refreshed) => *pair = refreshed,
                Err(e) => warn!(
                    target_name = %self.target,
                    round,
                    error = %e,
                    "Could not re-read banks after failed round, keeping previous snapshot"
                ),
            },
        }

        let (relation, direction_ok) = match &report.outcome {
            UpdateOutcome::Verified { version, .. } => {
                history.advance(*version);
                let relation = history.relation();
                let direction_ok = match step.expectation.direction() {
                    Some(direction) => relation.is_none_or(|r| r == direction),
                    None => true,
                };
                (relation, direction_ok)
            }
            _ => (None, false),
        };

        let round_report = RoundReport {
            round,
            bank_before,
            bank_after: pair.active_bank().ok().map(|active| active.bank),
            outcome_state: report.outcome.state(),
            previous: history.previous,
            current: history.current,
            relation,
            direction_ok,
            push_attempts: report.push_attempts,
            elapsed: report.elapsed,
            detail: report.outcome.to_string(),
        };

        if round_report.is_verified() {
            info!(
                target_name = %self.target,
                round,
                bank = ?round_report.bank_after.map(|bank| self.target.bank_label(bank)),
                relation = ?round_report.relation,
                "Round verified"
            );
        } else {
            warn!(
                target_name = %self.target,
                round,
                outcome = %round_report.detail,
                "Round not verified"
            );
        }

        Ok(round_report)
    }
}

/// Run one campaign per target concurrently
///
/// Results are returned in the order of `targets`. A failing or panicking
/// campaign does not affect the others.
pub async fn run_parallel(
    orchestrator: Arc<UpdateOrchestrator>,
    targets: Vec<UpdateTarget>,
    plan: CampaignPlan,
) -> Vec<Result<CampaignReport, UpdateError>> {
    let plan = Arc::new(plan);
    let mut set = JoinSet::new();
    let mut task_ids = Vec::with_capacity(targets.len());

    for target in &targets {
        let campaign = UpdateCampaign::new(Arc::clone(&orchestrator), target.clone());
        let plan = Arc::clone(&plan);
        let handle = set.spawn(async move { campaign.run(&plan).await });
        task_ids.push(handle.id());
    }

    let mut results: Vec<Option<Result<CampaignReport, UpdateError>>> =
        targets.iter().map(|_| None).collect();

    while let Some(joined) = set.join_next_with_id().await {
        let (id, result) = match joined {
            Ok((id, result)) => (id, result),
            Err(e) => {
                let id = e.id();
                let index = task_ids.iter().position(|t| *t == id);
                let name = index
                    .and_then(|i| targets.get(i))
                    .map_or_else(String::new, |t| t.name.clone());
                warn!(target_name = %name, error = %e, "Campaign task failed");
                (
                    id,
                    Err(UpdateError::Task {
                        target: name,
                        message: e.to_string(),
                    }),
                )
            }
        };
        if let Some(slot) = task_ids
            .iter()
            .position(|t| *t == id)
            .and_then(|i| results.get_mut(i))
        {
            *slot = Some(result);
        }
    }

    results
        .into_iter()
        .zip(targets)
        .map(|(result, target)| {
            result.unwrap_or_else(|| {
                Err(UpdateError::Task {
                    target: target.name,
                    message: "task did not report".to_string(),
                })
            })
        })
        .collect()
}
