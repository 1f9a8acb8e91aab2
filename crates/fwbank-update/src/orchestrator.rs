//! Single update attempt against the inactive bank of one target
//!
//! An attempt walks `Idle → ImagePushed → UpdateInitiated → Polling` and ends
//! in one terminal state: `Verified`, `VersionMismatch`, `TimedOut`,
//! `PushFailed` or `Cancelled`. Terminal stage failures are reported as an
//! [`UpdateOutcome`]; only conditions that make the attempt meaningless
//! (indeterminate bank state, undecodable versions, a rejected update command,
//! flashing the active bank) are returned as [`UpdateError`].

use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, watch};
use tracing::{debug, error, info, warn};

use crate::bank::{self, Bank, BankPair, UpdateTarget};
use crate::compare::Expectation;
use crate::config::UpdateConfig;
use crate::error::{BankError, UpdateError};
use crate::transport::{Clock, DeviceState, FirmwareTransport, TransportError, TransportOperation};
use crate::version::{StructuredVersion, VersionLayout};

/// Update attempt state machine states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Default)]
pub enum AttemptState {
    /// Nothing sent to the device yet
    #[default]
    Idle,
    /// Image copied to the device side
    ImagePushed,
    /// Update command accepted
    UpdateInitiated,
    /// Waiting for the device to settle
    Polling,
    /// Device settled on the expected version in the expected bank
    Verified,
    /// Device never settled before the deadline
    TimedOut,
    /// Device settled but on the wrong version or bank
    VersionMismatch,
    /// Image push kept failing
    PushFailed,
    /// Attempt was cancelled by the caller
    Cancelled,
}

impl AttemptState {
    /// Whether the attempt has finished
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AttemptState::Verified
                | AttemptState::TimedOut
                | AttemptState::VersionMismatch
                | AttemptState::PushFailed
                | AttemptState::Cancelled
        )
    }

    /// Whether the device may be mid-update in this state
    pub fn is_in_progress(&self) -> bool {
        matches!(
            self,
            AttemptState::UpdateInitiated | AttemptState::Polling
        )
    }
}

impl fmt::Display for AttemptState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// State change broadcast to subscribers of an orchestrator
#[derive(Debug, Clone, Serialize)]
pub struct AttemptEvent {
    /// Target name
    pub target: String,
    /// New state
    pub state: AttemptState,
    /// Human-readable detail
    pub message: String,
}

/// Parameters for one update attempt
#[derive(Debug, Clone)]
pub struct UpdateRequest {
    /// Latest bank snapshot of the target
    pub pair: BankPair,
    /// Local image to push
    pub image_path: PathBuf,
    /// Device-side destination, also used as the image reference for the
    /// update command
    pub destination: String,
    /// Bank to flash; must be the inactive one when given
    pub bank: Option<Bank>,
    /// Version the flashed bank must report afterwards
    pub expectation: Expectation,
    /// Polling budget overriding the per-class default
    pub deadline: Option<Duration>,
    /// Version to check the expectation against instead of the snapshot's
    /// active version
    pub baseline: Option<StructuredVersion>,
}

impl UpdateRequest {
    /// Create a request that flashes whichever bank is inactive in `pair`
    pub fn new(
        pair: BankPair,
        image_path: impl Into<PathBuf>,
        destination: impl Into<String>,
        expectation: Expectation,
    ) -> Self {
        Self {
            pair,
            image_path: image_path.into(),
            destination: destination.into(),
            bank: None,
            expectation,
            deadline: None,
            baseline: None,
        }
    }

    /// Name the bank explicitly
    pub fn with_bank(mut self, bank: Bank) -> Self {
        self.bank = Some(bank);
        self
    }

    /// Override the polling deadline
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Judge the flashed version against `baseline`
    pub fn with_baseline(mut self, baseline: StructuredVersion) -> Self {
        self.baseline = Some(baseline);
        self
    }
}

/// Record of one orchestration run
#[derive(Debug, Clone, Serialize)]
pub struct UpdateAttempt {
    /// Target being updated
    pub target: UpdateTarget,
    /// Bank that was active before the attempt
    pub bank_before: Bank,
    /// Bank that was flashed
    pub bank_targeted: Bank,
    /// Version of the active bank before the attempt
    pub version_before: Option<StructuredVersion>,
    /// Version the expectation is checked against
    pub baseline: Option<StructuredVersion>,
    /// Image that was pushed
    pub image_path: PathBuf,
    /// When the attempt started
    #[serde(skip)]
    pub started_at: Instant,
    /// Polling budget
    pub deadline: Duration,
    /// Latest state
    pub state: AttemptState,
}

/// Terminal result of an attempt
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum UpdateOutcome {
    /// Flashed bank is active and reports the expected version
    Verified {
        /// Version now running
        version: StructuredVersion,
        /// Snapshot read after the update
        pair: BankPair,
    },

    /// Push retries exhausted
    PushFailed {
        /// Push attempts made
        attempts: u32,
        /// Error from the final attempt
        last_error: TransportError,
    },

    /// Device did not settle before the deadline
    TimedOut {
        /// Time spent polling
        waited: Duration,
        /// Last state the device reported, if any query succeeded
        last_state: Option<DeviceState>,
        /// Last query failure, if any
        last_error: Option<TransportError>,
    },

    /// Device settled but not as expected
    VersionMismatch {
        /// What was expected
        expectation: Expectation,
        /// Version before the update
        baseline: Option<StructuredVersion>,
        /// Version of the now-active bank
        actual: Option<StructuredVersion>,
        /// Bank that was flashed
        expected_bank: Bank,
        /// Bank that is active now
        active_bank: Bank,
        /// Snapshot read after the update
        pair: BankPair,
    },

    /// Caller cancelled the attempt
    Cancelled {
        /// State the attempt was in when cancelled
        during: AttemptState,
    },
}

impl UpdateOutcome {
    /// Terminal state corresponding to this outcome
    pub fn state(&self) -> AttemptState {
        match self {
            UpdateOutcome::Verified { .. } => AttemptState::Verified,
            UpdateOutcome::PushFailed { .. } => AttemptState::PushFailed,
            UpdateOutcome::TimedOut { .. } => AttemptState::TimedOut,
            UpdateOutcome::VersionMismatch { .. } => AttemptState::VersionMismatch,
            UpdateOutcome::Cancelled { .. } => AttemptState::Cancelled,
        }
    }

    /// Whether the update was verified
    pub fn is_verified(&self) -> bool {
        matches!(self, UpdateOutcome::Verified { .. })
    }

    /// Snapshot read after the device settled
    ///
    /// Only settled outcomes carry one; after a timeout, push failure or
    /// cancellation the caller's previous snapshot stays current.
    pub fn refreshed_pair(&self) -> Option<&BankPair> {
        match self {
            UpdateOutcome::Verified { pair, .. } | UpdateOutcome::VersionMismatch { pair, .. } => {
                Some(pair)
            }
            _ => None,
        }
    }
}

impl fmt::Display for UpdateOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpdateOutcome::Verified { version, .. } => write!(f, "verified at {version}"),
            UpdateOutcome::PushFailed {
                attempts,
                last_error,
            } => write!(f, "push failed after {attempts} attempts: {last_error}"),
            UpdateOutcome::TimedOut {
                waited, last_state, ..
            } => match last_state {
                Some(state) => write!(f, "timed out after {waited:?} (last state {state})"),
                None => write!(f, "timed out after {waited:?} (no status received)"),
            },
            UpdateOutcome::VersionMismatch {
                expectation,
                actual,
                expected_bank,
                active_bank,
                ..
            } => {
                let actual = actual.map_or_else(|| "no version".to_string(), |v| v.to_string());
                write!(
                    f,
                    "version mismatch: expected {expectation} in bank {expected_bank}, \
                     bank {active_bank} active with {actual}"
                )
            }
            UpdateOutcome::Cancelled { during } => write!(f, "cancelled during {during}"),
        }
    }
}

/// Full report of one attempt
#[derive(Debug, Clone, Serialize)]
pub struct UpdateReport {
    /// Attempt record
    pub attempt: UpdateAttempt,
    /// Terminal outcome
    pub outcome: UpdateOutcome,
    /// Push attempts made
    pub push_attempts: u32,
    /// Total time spent
    pub elapsed: Duration,
    /// Every state the attempt passed through, in order
    pub transitions: Vec<AttemptState>,
}

/// Sending half of a cancellation pair
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    /// Cancel every attempt holding a token from this handle
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }
}

/// Receiving half of a cancellation pair
#[derive(Debug, Clone)]
pub struct CancelToken {
    rx: watch::Receiver<bool>,
}

impl CancelToken {
    /// Create a linked handle and token
    pub fn pair() -> (CancelHandle, CancelToken) {
        let (tx, rx) = watch::channel(false);
        (CancelHandle { tx }, CancelToken { rx })
    }

    /// A token that is never cancelled
    pub fn never() -> Self {
        Self::pair().1
    }

    /// Whether cancellation was requested
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve once cancellation is requested; pends forever if the handle
    /// was dropped without cancelling
    pub async fn cancelled(&mut self) {
        if self.rx.wait_for(|cancelled| *cancelled).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Drives update attempts through a [`FirmwareTransport`]
pub struct UpdateOrchestrator {
    transport: Arc<dyn FirmwareTransport>,
    clock: Arc<dyn Clock>,
    config: UpdateConfig,
    layout: VersionLayout,
    events_tx: broadcast::Sender<AttemptEvent>,
}

impl fmt::Debug for UpdateOrchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpdateOrchestrator")
            .field("config", &self.config)
            .field("layout", &self.layout)
            .finish_non_exhaustive()
    }
}

impl UpdateOrchestrator {
    /// Create an orchestrator using the PSU version layout
    pub fn new(
        transport: Arc<dyn FirmwareTransport>,
        clock: Arc<dyn Clock>,
        config: UpdateConfig,
    ) -> Result<Self, UpdateError> {
        config.validate()?;
        let (events_tx, _) = broadcast::channel(256);

        Ok(Self {
            transport,
            clock,
            config,
            layout: VersionLayout::PSU,
            events_tx,
        })
    }

    /// Decode device versions with a different layout
    pub fn with_layout(mut self, layout: VersionLayout) -> Self {
        self.layout = layout;
        self
    }

    /// Active configuration
    pub fn config(&self) -> &UpdateConfig {
        &self.config
    }

    /// Version layout used to decode bank versions
    pub fn layout(&self) -> &VersionLayout {
        &self.layout
    }

    /// Subscribe to attempt state changes
    pub fn subscribe(&self) -> broadcast::Receiver<AttemptEvent> {
        self.events_tx.subscribe()
    }

    /// Read a fresh bank snapshot for `target`
    pub async fn refresh(&self, target: &UpdateTarget) -> Result<BankPair, BankError> {
        bank::refresh(self.transport.as_ref(), target, &self.layout).await
    }

    /// Run one attempt to completion
    pub async fn run(&self, request: UpdateRequest) -> Result<UpdateReport, UpdateError> {
        self.run_with_cancel(request, CancelToken::never()).await
    }

    /// Run one attempt, stopping early if `cancel` fires
    pub async fn run_with_cancel(
        &self,
        request: UpdateRequest,
        mut cancel: CancelToken,
    ) -> Result<UpdateReport, UpdateError> {
        let target = request.pair.target().clone();
        let active = request.pair.active_bank()?;
        let bank_before = active.bank;
        let version_before = active.version;
        let bank_targeted = bank_before.other();
        let baseline = request.baseline.or(version_before);

        if request.bank == Some(bank_before) {
            return Err(UpdateError::TargetBankActive {
                target: target.name,
                bank: bank_before,
            });
        }
        if baseline.is_none() && request.expectation.direction().is_some() {
            return Err(UpdateError::MissingBaseline {
                expectation: request.expectation,
            });
        }

        let mut run = AttemptRun {
            attempt: UpdateAttempt {
                target: target.clone(),
                bank_before,
                bank_targeted,
                version_before,
                baseline,
                image_path: request.image_path.clone(),
                started_at: self.clock.now(),
                deadline: request
                    .deadline
                    .unwrap_or_else(|| self.config.deadline_for(target.class)),
                state: AttemptState::Idle,
            },
            transitions: vec![AttemptState::Idle],
            push_attempts: 0,
        };

        info!(
            "Starting firmware update of {} bank {} ({}) with {}",
            target,
            bank_targeted,
            target.bank_label(bank_targeted),
            request.image_path.display()
        );

        let outcome = self.drive(&request, &mut run, &mut cancel).await?;
        Ok(self.finish(run, outcome))
    }

    async fn drive(
        &self,
        request: &UpdateRequest,
        run: &mut AttemptRun,
        cancel: &mut CancelToken,
    ) -> Result<UpdateOutcome, UpdateError> {
        if let Some(outcome) = self.push_with_retry(request, run, cancel).await {
            return Ok(outcome);
        }
        self.transition(run, AttemptState::ImagePushed, "image pushed");

        let target = run.attempt.target.clone();
        let bank = run.attempt.bank_targeted;
        let limit = self.config.command_timeout;
        let initiated = self
            .bounded(
                self.transport
                    .initiate_update(&target, bank, &request.destination),
                limit,
                cancel,
            )
            .await;
        let answer = match initiated {
            Bounded::Answered(answer) => answer,
            Bounded::Expired => Err(no_answer(TransportOperation::InitiateUpdate, limit)),
            Bounded::Cancelled => return Ok(self.cancelled(run)),
        };
        answer.map_err(|source| UpdateError::Initiate {
            target: target.name.clone(),
            bank,
            source,
        })?;
        self.transition(
            run,
            AttemptState::UpdateInitiated,
            &format!("update of {} initiated", target.bank_label(bank)),
        );

        self.transition(run, AttemptState::Polling, "waiting for device to settle");
        if let Some(outcome) = self.poll_until_settled(run, cancel).await {
            return Ok(outcome);
        }

        self.verify(request, run, cancel).await
    }

    async fn push_with_retry(
        &self,
        request: &UpdateRequest,
        run: &mut AttemptRun,
        cancel: &mut CancelToken,
    ) -> Option<UpdateOutcome> {
        let max_attempts = self.config.push_attempts;
        let limit = self.config.command_timeout;

        loop {
            let pushed = self
                .bounded(
                    self.transport
                        .push_image(&request.image_path, &request.destination),
                    limit,
                    cancel,
                )
                .await;
            let answer = match pushed {
                Bounded::Answered(answer) => answer,
                Bounded::Expired => Err(no_answer(TransportOperation::PushImage, limit)),
                Bounded::Cancelled => return Some(self.cancelled(run)),
            };
            run.push_attempts = run.push_attempts.saturating_add(1);
            let Err(err) = answer else {
                return None;
            };

            if run.push_attempts >= max_attempts {
                error!(
                    "Image push to {} failed after {} attempts: {}",
                    run.attempt.target, run.push_attempts, err
                );
                return Some(UpdateOutcome::PushFailed {
                    attempts: run.push_attempts,
                    last_error: err,
                });
            }

            warn!(
                "Image push attempt {}/{} failed: {}, retrying in {:?}",
                run.push_attempts, max_attempts, err, self.config.push_retry_delay
            );
            if self.pause(self.config.push_retry_delay, cancel).await {
                return Some(self.cancelled(run));
            }
        }
    }

    /// Poll until the device settles, the deadline passes or `cancel` fires
    ///
    /// Sleeps and queries are clipped to the remaining budget, so the final
    /// query happens at the deadline and the loop always ends. A query still
    /// unanswered at the deadline counts as failed.
    async fn poll_until_settled(
        &self,
        run: &mut AttemptRun,
        cancel: &mut CancelToken,
    ) -> Option<UpdateOutcome> {
        let target = run.attempt.target.clone();
        let poll_start = self.clock.now();
        let budget = run.attempt.deadline;
        let mut delay = self.config.initial_poll_delay;
        let mut last_state = None;
        let mut last_error = None;
        let mut polls = 0u32;

        loop {
            let remaining = budget.saturating_sub(self.clock.now().duration_since(poll_start));
            if self.pause(delay.min(remaining), cancel).await {
                return Some(self.cancelled(run));
            }

            polls = polls.saturating_add(1);
            let remaining = budget.saturating_sub(self.clock.now().duration_since(poll_start));
            let queried = self
                .bounded(self.transport.query_status(&target), remaining, cancel)
                .await;
            let answer = match queried {
                Bounded::Answered(answer) => answer,
                Bounded::Expired => Err(no_answer(TransportOperation::QueryStatus, remaining)),
                Bounded::Cancelled => return Some(self.cancelled(run)),
            };
            match answer {
                Ok(status) => {
                    debug!(
                        "Poll {} of {}: device state {}",
                        polls, target, status.state
                    );
                    last_state = Some(status.state);
                    if status.state.is_settled() {
                        info!(
                            "{} settled after {:?}",
                            target,
                            self.clock.now().duration_since(poll_start)
                        );
                        return None;
                    }
                }
                Err(err) => {
                    warn!("Status query {} of {} failed: {}", polls, target, err);
                    last_error = Some(err);
                }
            }

            let waited = self.clock.now().duration_since(poll_start);
            if waited >= budget {
                error!(
                    "{} did not settle within {:?} ({} polls)",
                    target, budget, polls
                );
                return Some(UpdateOutcome::TimedOut {
                    waited,
                    last_state,
                    last_error,
                });
            }
            delay = self.config.poll_interval;
        }
    }

    async fn verify(
        &self,
        request: &UpdateRequest,
        run: &mut AttemptRun,
        cancel: &mut CancelToken,
    ) -> Result<UpdateOutcome, UpdateError> {
        let limit = self.config.command_timeout;
        let refreshed = self
            .bounded(self.refresh(&run.attempt.target), limit, cancel)
            .await;
        let pair = match refreshed {
            Bounded::Answered(pair) => pair?,
            Bounded::Expired => {
                let err = no_answer(TransportOperation::QueryStatus, limit);
                return Err(BankError::Transport(err).into());
            }
            Bounded::Cancelled => return Ok(self.cancelled(run)),
        };
        let active = pair.active_bank()?;
        let active_bank = active.bank;
        let actual = active.version;
        let baseline = run.attempt.baseline;

        let version_ok = match &actual {
            Some(version) => request.expectation.check(baseline.as_ref(), version)?,
            None => false,
        };

        match actual {
            Some(version) if version_ok && active_bank == run.attempt.bank_targeted => {
                Ok(UpdateOutcome::Verified { version, pair })
            }
            _ => Ok(UpdateOutcome::VersionMismatch {
                expectation: request.expectation,
                baseline,
                actual,
                expected_bank: run.attempt.bank_targeted,
                active_bank,
                pair,
            }),
        }
    }

    /// Await a transport call for at most `limit` on the clock
    ///
    /// The call is polled before the timer, so an answer that is already
    /// available when the limit is reached still counts.
    async fn bounded<T>(
        &self,
        call: impl Future<Output = T>,
        limit: Duration,
        cancel: &mut CancelToken,
    ) -> Bounded<T> {
        tokio::select! {
            biased;
            () = cancel.cancelled() => Bounded::Cancelled,
            answer = call => Bounded::Answered(answer),
            () = self.clock.sleep(limit) => Bounded::Expired,
        }
    }

    fn cancelled(&self, run: &AttemptRun) -> UpdateOutcome {
        let during = run.attempt.state;
        if during.is_in_progress() {
            warn!(
                "Cancelled {} during {}; bank {} may still be updating",
                run.attempt.target, during, run.attempt.bank_targeted
            );
        }
        UpdateOutcome::Cancelled { during }
    }

    /// Sleep on the clock; returns `true` if cancelled first
    async fn pause(&self, duration: Duration, cancel: &mut CancelToken) -> bool {
        tokio::select! {
            biased;
            () = cancel.cancelled() => true,
            () = self.clock.sleep(duration) => false,
        }
    }

    fn transition(&self, run: &mut AttemptRun, state: AttemptState, message: &str) {
        debug!(
            "{}: {} -> {} ({})",
            run.attempt.target, run.attempt.state, state, message
        );
        run.attempt.state = state;
        run.transitions.push(state);

        let event = AttemptEvent {
            target: run.attempt.target.name.clone(),
            state,
            message: message.to_string(),
        };
        if let Err(broadcast::error::SendError(event)) = self.events_tx.send(event) {
            debug!("No subscribers for {} event", event.state);
        }
    }

    fn finish(&self, mut run: AttemptRun, outcome: UpdateOutcome) -> UpdateReport {
        let message = outcome.to_string();
        self.transition(&mut run, outcome.state(), &message);

        if outcome.is_verified() {
            info!("Firmware update of {} {}", run.attempt.target, message);
        } else {
            error!("Firmware update of {} failed: {}", run.attempt.target, message);
        }

        UpdateReport {
            elapsed: self.clock.now().duration_since(run.attempt.started_at),
            push_attempts: run.push_attempts,
            transitions: run.transitions,
            attempt: run.attempt,
            outcome,
        }
    }
}

/// How a transport call raced against cancellation and a time limit ended
enum Bounded<T> {
    Answered(T),
    Expired,
    Cancelled,
}

fn no_answer(operation: TransportOperation, limit: Duration) -> TransportError {
    TransportError::new(operation, format!("no answer within {limit:?}"))
}

struct AttemptRun {
    attempt: UpdateAttempt,
    transitions: Vec<AttemptState>,
    push_attempts: u32,
}
