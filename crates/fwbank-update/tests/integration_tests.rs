//! Integration tests for update attempts and campaigns against simulated devices

use anyhow::Result;
use fwbank_update::prelude::*;
use fwbank_update::sim::{ManualClock, ReportedActive, SimulatedDevice, SimulatedTarget};
use std::sync::Arc;
use std::time::Duration;

const UPDATE_TIME: Duration = Duration::from_secs(60);

fn v(minor: u32) -> StructuredVersion {
    StructuredVersion::new(1, minor, 0, 0, 0, 0)
}

struct Harness {
    clock: Arc<ManualClock>,
    device: Arc<SimulatedDevice>,
    orchestrator: Arc<UpdateOrchestrator>,
}

impl Harness {
    fn new() -> Result<Self> {
        Self::with_config(UpdateConfig::default())
    }

    fn with_config(config: UpdateConfig) -> Result<Self> {
        let clock = Arc::new(ManualClock::new());
        let device = Arc::new(SimulatedDevice::new(clock.clone()));
        device.add_image("fw-1.0.bin", v(0));
        device.add_image("fw-1.1.bin", v(1));
        device.add_image("fw-1.2.bin", v(2));
        let orchestrator = Arc::new(UpdateOrchestrator::new(
            device.clone(),
            clock.clone(),
            config,
        )?);
        Ok(Self {
            clock,
            device,
            orchestrator,
        })
    }

    fn psu(&self, name: &str) -> UpdateTarget {
        self.device
            .add_target(name, SimulatedTarget::new(v(0), UPDATE_TIME));
        UpdateTarget::new(name, DeviceClass::Psu)
    }

    async fn request(
        &self,
        target: &UpdateTarget,
        image: &str,
        expectation: Expectation,
    ) -> Result<UpdateRequest> {
        let pair = self.orchestrator.refresh(target).await?;
        Ok(UpdateRequest::new(
            pair,
            image,
            format!("/tmp/{image}"),
            expectation,
        ))
    }
}

fn step(image: &str, expectation: Expectation) -> CampaignStep {
    CampaignStep {
        image_path: image.into(),
        destination: format!("/tmp/{image}"),
        expectation,
    }
}

#[tokio::test]
async fn test_update_verifies_inactive_bank() -> Result<()> {
    let h = Harness::new()?;
    let target = h.psu("PSU 1");

    let request = h.request(&target, "fw-1.1.bin", Expectation::Newer).await?;
    let report = h.orchestrator.run(request).await?;

    assert!(report.outcome.is_verified(), "outcome: {}", report.outcome);
    assert_eq!(report.attempt.bank_before, Bank::A);
    assert_eq!(report.attempt.bank_targeted, Bank::B);
    assert_eq!(report.attempt.version_before, Some(v(0)));
    assert_eq!(report.push_attempts, 1);
    assert_eq!(
        report.transitions,
        vec![
            AttemptState::Idle,
            AttemptState::ImagePushed,
            AttemptState::UpdateInitiated,
            AttemptState::Polling,
            AttemptState::Verified,
        ]
    );

    let pair = report.outcome.refreshed_pair().cloned();
    let pair = pair.ok_or_else(|| anyhow::anyhow!("verified outcome without snapshot"))?;
    assert_eq!(pair.active_bank()?.bank, Bank::B);
    assert_eq!(pair.active_version()?, Some(v(1)));
    assert_eq!(pair.bank(Bank::A).version, Some(v(0)));
    assert_eq!(h.device.initiated_updates(), vec![("PSU 1".to_string(), Bank::B)]);
    assert!(report.elapsed >= UPDATE_TIME);
    Ok(())
}

#[tokio::test]
async fn test_campaign_alternates_banks() -> Result<()> {
    let h = Harness::new()?;
    let target = h.psu("PSU 1");
    let plan = CampaignPlan {
        rounds: 4,
        steps: vec![
            step("fw-1.1.bin", Expectation::Newer),
            step("fw-1.0.bin", Expectation::Older),
        ],
        stop_on_failure: true,
    };

    let report = UpdateCampaign::new(h.orchestrator.clone(), target)
        .run(&plan)
        .await?;

    assert!(report.all_verified());
    let banks: Vec<(Bank, Option<Bank>)> = report
        .rounds
        .iter()
        .map(|r| (r.bank_before, r.bank_after))
        .collect();
    assert_eq!(
        banks,
        vec![
            (Bank::A, Some(Bank::B)),
            (Bank::B, Some(Bank::A)),
            (Bank::A, Some(Bank::B)),
            (Bank::B, Some(Bank::A)),
        ]
    );

    let relations: Vec<Option<VersionOrdering>> =
        report.rounds.iter().map(|r| r.relation).collect();
    assert_eq!(
        relations,
        vec![
            Some(VersionOrdering::Newer),
            Some(VersionOrdering::Older),
            Some(VersionOrdering::Newer),
            Some(VersionOrdering::Older),
        ]
    );
    assert_eq!(report.history.current, Some(v(0)));
    assert_eq!(report.history.previous, Some(v(1)));

    let flashed: Vec<Bank> = h
        .device
        .initiated_updates()
        .into_iter()
        .map(|(_, bank)| bank)
        .collect();
    assert_eq!(flashed, vec![Bank::B, Bank::A, Bank::B, Bank::A]);
    Ok(())
}

#[tokio::test]
async fn test_push_retries_then_succeeds() -> Result<()> {
    let h = Harness::new()?;
    let target = h.psu("PSU 1");
    h.device.fail_next_pushes(2);

    let request = h.request(&target, "fw-1.1.bin", Expectation::Newer).await?;
    let report = h.orchestrator.run(request).await?;

    assert!(report.outcome.is_verified());
    assert_eq!(report.push_attempts, 3);
    assert_eq!(h.device.push_calls(), 3);
    assert!(report.elapsed >= Duration::from_secs(10) + UPDATE_TIME);
    Ok(())
}

#[tokio::test]
async fn test_push_exhaustion_leaves_banks_untouched() -> Result<()> {
    let h = Harness::new()?;
    let target = h.psu("PSU 1");
    h.device.fail_next_pushes(10);

    let request = h.request(&target, "fw-1.1.bin", Expectation::Newer).await?;
    let report = h.orchestrator.run(request).await?;

    match &report.outcome {
        UpdateOutcome::PushFailed { attempts, .. } => assert_eq!(*attempts, 3),
        other => anyhow::bail!("expected PushFailed, got {other}"),
    }
    assert!(report.outcome.refreshed_pair().is_none());
    assert!(h.device.initiated_updates().is_empty());
    assert_eq!(h.device.active_bank("PSU 1"), Some(Bank::A));
    assert_eq!(h.device.version("PSU 1", Bank::B), None);
    Ok(())
}

#[tokio::test]
async fn test_stuck_device_times_out_at_deadline() -> Result<()> {
    let h = Harness::new()?;
    let target = h.psu("PSU 1");
    h.device.set_stuck("PSU 1", true);

    let request = h.request(&target, "fw-1.1.bin", Expectation::Newer).await?;
    let report = h.orchestrator.run(request).await?;

    match &report.outcome {
        UpdateOutcome::TimedOut {
            waited, last_state, ..
        } => {
            assert_eq!(*waited, Duration::from_secs(600));
            assert_eq!(*last_state, Some(DeviceState::Updating));
        }
        other => anyhow::bail!("expected TimedOut, got {other}"),
    }
    assert!(report.elapsed >= Duration::from_secs(600));
    assert!(h.clock.elapsed() < Duration::from_secs(610));
    Ok(())
}

#[tokio::test]
async fn test_request_deadline_overrides_class_default() -> Result<()> {
    let h = Harness::new()?;
    let target = h.psu("PSU 1");
    h.device.set_stuck("PSU 1", true);

    let request = h
        .request(&target, "fw-1.1.bin", Expectation::Newer)
        .await?
        .with_deadline(Duration::from_secs(45));
    let report = h.orchestrator.run(request).await?;

    assert_eq!(report.outcome.state(), AttemptState::TimedOut);
    assert_eq!(report.attempt.deadline, Duration::from_secs(45));
    assert!(h.clock.elapsed() <= Duration::from_secs(45));
    Ok(())
}

#[tokio::test]
async fn test_query_failures_while_polling_are_tolerated() -> Result<()> {
    let h = Harness::new()?;
    let target = h.psu("PSU 1");
    let request = h.request(&target, "fw-1.1.bin", Expectation::Newer).await?;
    h.device.fail_next_queries(3);

    let report = h.orchestrator.run(request).await?;
    assert!(report.outcome.is_verified(), "outcome: {}", report.outcome);
    Ok(())
}

#[tokio::test]
async fn test_unanswered_status_query_times_out_at_deadline() -> Result<()> {
    let h = Harness::new()?;
    let target = h.psu("PSU 1");
    let request = h.request(&target, "fw-1.1.bin", Expectation::Newer).await?;
    h.device.set_unanswered(TransportOperation::QueryStatus, true);

    let report = h.orchestrator.run(request).await?;

    match &report.outcome {
        UpdateOutcome::TimedOut {
            waited,
            last_state,
            last_error,
        } => {
            assert_eq!(*waited, Duration::from_secs(600));
            assert_eq!(*last_state, None);
            assert_eq!(
                last_error.as_ref().map(|e| e.operation),
                Some(TransportOperation::QueryStatus)
            );
        }
        other => anyhow::bail!("expected TimedOut, got {other}"),
    }
    assert!(h.clock.elapsed() <= Duration::from_secs(600));
    Ok(())
}

#[tokio::test]
async fn test_unanswered_push_counts_as_failed_attempt() -> Result<()> {
    let h = Harness::new()?;
    let target = h.psu("PSU 1");
    let request = h.request(&target, "fw-1.1.bin", Expectation::Newer).await?;
    h.device.set_unanswered(TransportOperation::PushImage, true);

    let report = h.orchestrator.run(request).await?;

    match &report.outcome {
        UpdateOutcome::PushFailed {
            attempts,
            last_error,
        } => {
            assert_eq!(*attempts, 3);
            assert_eq!(last_error.operation, TransportOperation::PushImage);
            assert!(last_error.message.contains("no answer"));
        }
        other => anyhow::bail!("expected PushFailed, got {other}"),
    }
    assert!(h.device.initiated_updates().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_unanswered_update_command_is_error() -> Result<()> {
    let h = Harness::new()?;
    let target = h.psu("PSU 1");
    let request = h.request(&target, "fw-1.1.bin", Expectation::Newer).await?;
    h.device.set_unanswered(TransportOperation::InitiateUpdate, true);

    let result = h.orchestrator.run(request).await;

    match result {
        Err(UpdateError::Initiate { bank, source, .. }) => {
            assert_eq!(bank, Bank::B);
            assert_eq!(source.operation, TransportOperation::InitiateUpdate);
        }
        other => anyhow::bail!("expected Initiate error, got {other:?}"),
    }
    assert_eq!(h.clock.elapsed(), Duration::from_secs(300));
    Ok(())
}

#[tokio::test]
async fn test_bank_not_switched_is_version_mismatch() -> Result<()> {
    let h = Harness::new()?;
    let target = h.psu("PSU 1");
    h.device.set_swap_on_update("PSU 1", false);

    let request = h.request(&target, "fw-1.1.bin", Expectation::Newer).await?;
    let report = h.orchestrator.run(request).await?;

    match &report.outcome {
        UpdateOutcome::VersionMismatch {
            expected_bank,
            active_bank,
            actual,
            ..
        } => {
            assert_eq!(*expected_bank, Bank::B);
            assert_eq!(*active_bank, Bank::A);
            assert_eq!(*actual, Some(v(0)));
        }
        other => anyhow::bail!("expected VersionMismatch, got {other}"),
    }
    assert_eq!(h.device.version("PSU 1", Bank::B), Some(v(1)));
    Ok(())
}

#[tokio::test]
async fn test_wrong_direction_is_version_mismatch() -> Result<()> {
    let h = Harness::new()?;
    let target = h.psu("PSU 1");

    let request = h.request(&target, "fw-1.0.bin", Expectation::Newer).await?;
    let report = h.orchestrator.run(request).await?;

    assert_eq!(report.outcome.state(), AttemptState::VersionMismatch);
    let pair = report
        .outcome
        .refreshed_pair()
        .ok_or_else(|| anyhow::anyhow!("mismatch without snapshot"))?;
    assert_eq!(pair.active_bank()?.bank, Bank::B);
    Ok(())
}

#[tokio::test]
async fn test_exact_expectation() -> Result<()> {
    let h = Harness::new()?;
    let target = h.psu("PSU 1");

    let request = h
        .request(&target, "fw-1.2.bin", Expectation::Exactly(v(2)))
        .await?;
    let report = h.orchestrator.run(request).await?;
    assert!(report.outcome.is_verified());

    let request = h
        .request(&target, "fw-1.1.bin", Expectation::Exactly(v(2)))
        .await?;
    let report = h.orchestrator.run(request).await?;
    assert_eq!(report.outcome.state(), AttemptState::VersionMismatch);
    Ok(())
}

#[tokio::test]
async fn test_both_banks_active_is_rejected() -> Result<()> {
    let h = Harness::new()?;
    let target = h.psu("PSU 1");
    h.device.set_reported_active("PSU 1", ReportedActive::Both);

    let result = h.orchestrator.refresh(&target).await;
    assert!(matches!(
        result,
        Err(BankError::AmbiguousActive {
            active_count: 2,
            ..
        })
    ));
    Ok(())
}

#[tokio::test]
async fn test_no_active_bank_aborts_campaign() -> Result<()> {
    let h = Harness::new()?;
    let target = h.psu("PSU 1");
    h.device.set_reported_active("PSU 1", ReportedActive::Neither);

    let plan = CampaignPlan {
        rounds: 2,
        steps: vec![step("fw-1.1.bin", Expectation::Newer)],
        stop_on_failure: false,
    };
    let result = UpdateCampaign::new(h.orchestrator.clone(), target)
        .run(&plan)
        .await;

    assert!(matches!(
        result,
        Err(UpdateError::Bank(BankError::AmbiguousActive {
            active_count: 0,
            ..
        }))
    ));
    assert_eq!(h.device.push_calls(), 0);
    Ok(())
}

#[tokio::test]
async fn test_undecodable_version_is_reported() -> Result<()> {
    let h = Harness::new()?;
    let target = h.psu("PSU 1");
    h.device.set_raw_version(
        "PSU 1",
        Bank::A,
        vec!["31".to_string(), "30".to_string(), "30".to_string()],
    );

    let result = h.orchestrator.refresh(&target).await;
    assert!(matches!(
        result,
        Err(BankError::Decode {
            bank: Bank::A,
            source: DecodeError::TooShort {
                required: 8,
                actual: 3
            },
            ..
        })
    ));
    Ok(())
}

#[tokio::test]
async fn test_flashing_active_bank_is_refused() -> Result<()> {
    let h = Harness::new()?;
    let target = h.psu("PSU 1");

    let request = h
        .request(&target, "fw-1.1.bin", Expectation::Newer)
        .await?
        .with_bank(Bank::A);
    let result = h.orchestrator.run(request).await;

    assert!(matches!(
        result,
        Err(UpdateError::TargetBankActive { bank: Bank::A, .. })
    ));
    assert_eq!(h.device.push_calls(), 0);
    Ok(())
}

#[tokio::test]
async fn test_directional_expectation_needs_baseline() -> Result<()> {
    let h = Harness::new()?;
    h.device.add_target(
        "PSU 9",
        SimulatedTarget {
            bank_a: None,
            bank_b: None,
            active: Bank::A,
            update_duration: UPDATE_TIME,
        },
    );
    let target = UpdateTarget::new("PSU 9", DeviceClass::Psu);

    let request = h.request(&target, "fw-1.1.bin", Expectation::Newer).await?;
    let result = h.orchestrator.run(request).await;
    assert!(matches!(result, Err(UpdateError::MissingBaseline { .. })));

    let request = h
        .request(&target, "fw-1.1.bin", Expectation::Exactly(v(1)))
        .await?;
    let report = h.orchestrator.run(request).await?;
    assert!(report.outcome.is_verified());
    Ok(())
}

#[tokio::test]
async fn test_rejected_update_command_is_error() -> Result<()> {
    let h = Harness::new()?;
    let target = h.psu("PSU 1");

    let request = h.request(&target, "missing.bin", Expectation::Newer).await?;
    let report = h.orchestrator.run(request).await?;
    assert_eq!(report.outcome.state(), AttemptState::PushFailed);

    h.device.add_target(
        "PSU 2",
        SimulatedTarget::new(v(0), UPDATE_TIME),
    );
    let target = UpdateTarget::new("PSU 2", DeviceClass::Psu);
    h.device.set_stuck("PSU 2", true);
    let request = h
        .request(&target, "fw-1.1.bin", Expectation::Newer)
        .await?
        .with_deadline(Duration::from_secs(20));
    let first = h.orchestrator.run(request.clone()).await?;
    assert_eq!(first.outcome.state(), AttemptState::TimedOut);

    let result = h.orchestrator.run(request).await;
    assert!(matches!(result, Err(UpdateError::Initiate { bank: Bank::B, .. })));
    Ok(())
}

#[tokio::test]
async fn test_cancel_before_push() -> Result<()> {
    let h = Harness::new()?;
    let target = h.psu("PSU 1");
    let request = h.request(&target, "fw-1.1.bin", Expectation::Newer).await?;

    let (handle, token) = CancelToken::pair();
    handle.cancel();
    let report = h.orchestrator.run_with_cancel(request, token).await?;

    assert!(matches!(
        report.outcome,
        UpdateOutcome::Cancelled {
            during: AttemptState::Idle
        }
    ));
    assert_eq!(h.device.push_calls(), 0);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_cancel_while_polling() -> Result<()> {
    let clock = Arc::new(TokioClock);
    let device = Arc::new(SimulatedDevice::new(clock.clone()));
    device.add_image("fw-1.1.bin", v(1));
    device.add_target("PSU 1", SimulatedTarget::new(v(0), UPDATE_TIME));
    device.set_stuck("PSU 1", true);
    let orchestrator = UpdateOrchestrator::new(device.clone(), clock, UpdateConfig::default())?;

    let target = UpdateTarget::new("PSU 1", DeviceClass::Psu);
    let pair = orchestrator.refresh(&target).await?;
    let request = UpdateRequest::new(pair, "fw-1.1.bin", "/tmp/fw.bin", Expectation::Newer);

    let (handle, token) = CancelToken::pair();
    let task = tokio::spawn(async move { orchestrator.run_with_cancel(request, token).await });

    tokio::time::sleep(Duration::from_secs(25)).await;
    handle.cancel();
    let report = task.await??;

    assert!(matches!(
        report.outcome,
        UpdateOutcome::Cancelled {
            during: AttemptState::Polling
        }
    ));
    assert!(report.elapsed < Duration::from_secs(600));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_cancel_while_status_query_hangs() -> Result<()> {
    let clock = Arc::new(TokioClock);
    let device = Arc::new(SimulatedDevice::new(clock.clone()));
    device.add_image("fw-1.1.bin", v(1));
    device.add_target("PSU 1", SimulatedTarget::new(v(0), UPDATE_TIME));
    let orchestrator = UpdateOrchestrator::new(device.clone(), clock, UpdateConfig::default())?;

    let target = UpdateTarget::new("PSU 1", DeviceClass::Psu);
    let pair = orchestrator.refresh(&target).await?;
    let request = UpdateRequest::new(pair, "fw-1.1.bin", "/tmp/fw.bin", Expectation::Newer);
    device.set_unanswered(TransportOperation::QueryStatus, true);

    let (handle, token) = CancelToken::pair();
    let task = tokio::spawn(async move { orchestrator.run_with_cancel(request, token).await });

    tokio::time::sleep(Duration::from_secs(30)).await;
    handle.cancel();
    let report = task.await??;

    assert!(matches!(
        report.outcome,
        UpdateOutcome::Cancelled {
            during: AttemptState::Polling
        }
    ));
    assert!(report.elapsed < Duration::from_secs(60));
    Ok(())
}

#[tokio::test]
async fn test_failed_round_keeps_history() -> Result<()> {
    let h = Harness::new()?;
    let target = h.psu("PSU 1");
    let plan = CampaignPlan {
        rounds: 3,
        steps: vec![step("fw-1.1.bin", Expectation::Newer)],
        stop_on_failure: false,
    };

    let report = UpdateCampaign::new(h.orchestrator.clone(), target)
        .run(&plan)
        .await?;

    assert!(!report.all_verified());
    assert_eq!(report.rounds.len(), 3);

    let first = report
        .rounds
        .first()
        .ok_or_else(|| anyhow::anyhow!("no rounds"))?;
    assert!(first.is_verified());
    assert!(first.direction_ok);

    let second = report
        .rounds
        .get(1)
        .ok_or_else(|| anyhow::anyhow!("missing round 1"))?;
    assert_eq!(second.outcome_state, AttemptState::VersionMismatch);
    assert_eq!(second.relation, None);
    assert!(!second.direction_ok);
    assert_eq!(second.current, Some(v(1)));
    assert_eq!(second.previous, Some(v(0)));

    assert_eq!(report.history.current, Some(v(1)));
    assert_eq!(report.history.previous, Some(v(0)));
    Ok(())
}

#[tokio::test]
async fn test_round_after_mismatch_is_judged_against_history() -> Result<()> {
    let h = Harness::new()?;
    let target = h.psu("PSU 1");
    let plan = CampaignPlan {
        rounds: 2,
        steps: vec![
            step("fw-1.2.bin", Expectation::Older),
            step("fw-1.1.bin", Expectation::Newer),
        ],
        stop_on_failure: false,
    };

    let report = UpdateCampaign::new(h.orchestrator.clone(), target)
        .run(&plan)
        .await?;

    let [first, second] = report.rounds.as_slice() else {
        anyhow::bail!("expected two rounds, got {}", report.rounds.len());
    };
    assert_eq!(first.outcome_state, AttemptState::VersionMismatch);
    assert_eq!(first.bank_after, Some(Bank::B));
    assert_eq!(first.current, Some(v(0)));

    assert!(second.is_verified(), "round 1: {}", second.detail);
    assert!(second.direction_ok);
    assert_eq!(second.relation, Some(VersionOrdering::Newer));
    assert_eq!(report.history.previous, Some(v(0)));
    assert_eq!(report.history.current, Some(v(1)));
    Ok(())
}

#[tokio::test]
async fn test_indeterminate_banks_after_failed_round_keep_reports() -> Result<()> {
    let h = Harness::new()?;
    let target = h.psu("PSU 1");
    h.device
        .set_reported_active("PSU 1", ReportedActive::NeitherWhileUpdating);
    let mut events = h.orchestrator.subscribe();
    let plan = CampaignPlan {
        rounds: 3,
        steps: vec![
            step("fw-1.1.bin", Expectation::Newer),
            step("fw-1.0.bin", Expectation::Older),
        ],
        stop_on_failure: false,
    };

    let campaign = UpdateCampaign::new(h.orchestrator.clone(), target);
    let stick_after_first_verify = async {
        while let Ok(event) = events.recv().await {
            if event.state == AttemptState::Verified {
                h.device.set_stuck("PSU 1", true);
                break;
            }
        }
    };
    let (report, ()) = tokio::join!(campaign.run(&plan), stick_after_first_verify);
    let report = report?;

    let [first, second] = report.rounds.as_slice() else {
        anyhow::bail!("expected two rounds, got {}", report.rounds.len());
    };
    assert!(first.is_verified());
    assert_eq!(first.bank_after, Some(Bank::B));
    assert_eq!(second.outcome_state, AttemptState::TimedOut);
    assert_eq!(second.bank_before, Bank::B);
    assert_eq!(second.bank_after, None);

    let aborted = report
        .aborted
        .as_deref()
        .ok_or_else(|| anyhow::anyhow!("campaign was not aborted"))?;
    assert!(aborted.contains("indeterminate"), "aborted: {aborted}");
    assert!(!report.all_verified());
    assert_eq!(report.history.current, Some(v(1)));
    Ok(())
}

#[tokio::test]
async fn test_stop_on_failure_ends_campaign() -> Result<()> {
    let h = Harness::new()?;
    let target = h.psu("PSU 1");
    let plan = CampaignPlan {
        rounds: 5,
        steps: vec![step("fw-1.1.bin", Expectation::Newer)],
        stop_on_failure: true,
    };

    let report = UpdateCampaign::new(h.orchestrator.clone(), target)
        .run(&plan)
        .await?;

    assert_eq!(report.rounds.len(), 2);
    assert_eq!(report.verified_rounds(), 1);
    assert!(!report.all_verified());
    Ok(())
}

#[tokio::test]
async fn test_parallel_campaigns_are_independent() -> Result<()> {
    let h = Harness::new()?;
    let psu1 = h.psu("PSU 1");
    let psu2 = h.psu("PSU 2");
    h.device
        .add_target("BMC", SimulatedTarget::new(v(0), Duration::from_secs(300)));
    let bmc = UpdateTarget::new("BMC", DeviceClass::Bmc);
    h.device.set_stuck("PSU 2", true);

    let plan = CampaignPlan {
        rounds: 2,
        steps: vec![
            step("fw-1.2.bin", Expectation::Newer),
            step("fw-1.0.bin", Expectation::Older),
        ],
        stop_on_failure: true,
    };

    let results = run_parallel(h.orchestrator.clone(), vec![psu1, psu2, bmc], plan).await;
    assert_eq!(results.len(), 3);

    let mut reports = Vec::new();
    for result in results {
        reports.push(result?);
    }
    let names: Vec<&str> = reports.iter().map(|r| r.target.name.as_str()).collect();
    assert_eq!(names, vec!["PSU 1", "PSU 2", "BMC"]);

    let [psu1, psu2, bmc] = reports.as_slice() else {
        anyhow::bail!("expected three reports");
    };
    assert!(psu1.all_verified());
    assert!(bmc.all_verified());
    assert_eq!(bmc.final_pair.active_bank()?.bank, Bank::A);

    assert!(!psu2.all_verified());
    assert_eq!(psu2.rounds.len(), 1);
    assert!(
        psu2.rounds
            .iter()
            .all(|r| r.outcome_state == AttemptState::TimedOut)
    );
    assert_eq!(psu2.history.current, Some(v(0)));
    assert_eq!(h.device.active_bank("PSU 2"), Some(Bank::A));
    Ok(())
}

#[tokio::test]
async fn test_subscribers_see_every_transition() -> Result<()> {
    let h = Harness::new()?;
    let target = h.psu("PSU 1");
    let mut events = h.orchestrator.subscribe();

    let request = h.request(&target, "fw-1.1.bin", Expectation::Newer).await?;
    let report = h.orchestrator.run(request).await?;

    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        assert_eq!(event.target, "PSU 1");
        seen.push(event.state);
    }
    let expected: Vec<AttemptState> = report.transitions.iter().skip(1).copied().collect();
    assert_eq!(seen, expected);
    Ok(())
}

#[tokio::test]
async fn test_bmc_uses_class_deadline() -> Result<()> {
    let mut config = UpdateConfig::default();
    config.deadlines.bmc = Duration::from_secs(120);
    let h = Harness::with_config(config)?;
    h.device
        .add_target("BMC", SimulatedTarget::new(v(0), Duration::from_secs(300)));
    let target = UpdateTarget::new("BMC", DeviceClass::Bmc);

    let request = h.request(&target, "fw-1.1.bin", Expectation::Newer).await?;
    let report = h.orchestrator.run(request).await?;

    assert_eq!(report.attempt.deadline, Duration::from_secs(120));
    assert_eq!(report.outcome.state(), AttemptState::TimedOut);
    assert_eq!(target.bank_label(report.attempt.bank_targeted), "Secondary");
    Ok(())
}
