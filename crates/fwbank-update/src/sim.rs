//! In-memory dual-bank devices and simulated time
//!
//! [`SimulatedDevice`] implements [`FirmwareTransport`] for any number of
//! targets, flashing the inactive bank after a configurable delay measured on
//! a [`Clock`]. Combined with [`ManualClock`] it runs full update campaigns
//! without real hardware or real waiting. Faults (push failures, query
//! failures, devices that never settle, ambiguous or corrupt status) can be
//! injected per target.

use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::bank::{Bank, UpdateTarget};
use crate::transport::{
    BankStatus, Clock, DeviceState, DeviceStatus, FirmwareTransport, TransportError,
    TransportOperation,
};
use crate::version::{StructuredVersion, VersionLayout};

/// Clock whose time only moves when something sleeps on it
///
/// Every `sleep` advances the shared time by the requested duration and
/// yields, so concurrent sleepers each push time forward.
#[derive(Debug)]
pub struct ManualClock {
    origin: Instant,
    offset: Mutex<Duration>,
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl ManualClock {
    /// Create a clock at offset zero
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            offset: Mutex::new(Duration::ZERO),
        }
    }

    /// Move time forward
    pub fn advance(&self, duration: Duration) {
        let mut offset = self.offset.lock();
        *offset = offset.saturating_add(duration);
    }

    /// Simulated time since creation
    pub fn elapsed(&self) -> Duration {
        *self.offset.lock()
    }
}

#[async_trait::async_trait]
impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.origin + self.elapsed()
    }

    async fn sleep(&self, duration: Duration) {
        self.advance(duration);
        tokio::task::yield_now().await;
    }
}

/// Which banks a simulated target claims are active
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReportedActive {
    /// Report the real active bank
    #[default]
    Actual,
    /// Report no bank as active
    Neither,
    /// Report both banks as active
    Both,
    /// Report no bank as active while an update is in flight
    NeitherWhileUpdating,
}

/// Initial state of a simulated target
#[derive(Debug, Clone)]
pub struct SimulatedTarget {
    /// Version in bank A
    pub bank_a: Option<StructuredVersion>,
    /// Version in bank B
    pub bank_b: Option<StructuredVersion>,
    /// Running bank
    pub active: Bank,
    /// Time from update command to the device settling
    pub update_duration: Duration,
}

impl SimulatedTarget {
    /// Target running `version` from bank A with an empty bank B
    pub fn new(version: StructuredVersion, update_duration: Duration) -> Self {
        Self {
            bank_a: Some(version),
            bank_b: None,
            active: Bank::A,
            update_duration,
        }
    }
}

#[derive(Debug)]
struct PendingUpdate {
    bank: Bank,
    version: StructuredVersion,
    completes_at: Instant,
}

#[derive(Debug)]
struct TargetState {
    a: Option<StructuredVersion>,
    b: Option<StructuredVersion>,
    active: Bank,
    update_duration: Duration,
    pending: Option<PendingUpdate>,
    stuck: bool,
    swap_on_update: bool,
    reported_active: ReportedActive,
    raw_overrides: HashMap<Bank, Vec<String>>,
}

impl TargetState {
    fn version_slot(&mut self, bank: Bank) -> &mut Option<StructuredVersion> {
        match bank {
            Bank::A => &mut self.a,
            Bank::B => &mut self.b,
        }
    }

    fn version(&self, bank: Bank) -> Option<StructuredVersion> {
        match bank {
            Bank::A => self.a,
            Bank::B => self.b,
        }
    }

    fn settle(&mut self, now: Instant) {
        if self.stuck {
            return;
        }
        let due = self
            .pending
            .as_ref()
            .is_some_and(|pending| now >= pending.completes_at);
        if !due {
            return;
        }
        if let Some(pending) = self.pending.take() {
            *self.version_slot(pending.bank) = Some(pending.version);
            if self.swap_on_update {
                self.active = pending.bank;
            }
        }
    }

    fn reports_active(&self, bank: Bank) -> bool {
        match self.reported_active {
            ReportedActive::Actual => self.active == bank,
            ReportedActive::Neither => false,
            ReportedActive::Both => true,
            ReportedActive::NeitherWhileUpdating => {
                self.pending.is_none() && self.active == bank
            }
        }
    }
}

#[derive(Debug, Default)]
struct SimState {
    targets: HashMap<String, TargetState>,
    images: HashMap<PathBuf, StructuredVersion>,
    staged: HashMap<String, StructuredVersion>,
    push_failures: u32,
    query_failures: u32,
    push_calls: u32,
    initiated: Vec<(String, Bank)>,
    unanswered: HashSet<TransportOperation>,
}

/// Simulated transport hosting any number of dual-bank targets
pub struct SimulatedDevice {
    clock: Arc<dyn Clock>,
    layout: VersionLayout,
    state: Mutex<SimState>,
}

impl std::fmt::Debug for SimulatedDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimulatedDevice")
            .field("layout", &self.layout)
            .field("state", &*self.state.lock())
            .finish_non_exhaustive()
    }
}

impl SimulatedDevice {
    /// Create an empty simulation on `clock`
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            layout: VersionLayout::PSU,
            state: Mutex::new(SimState::default()),
        }
    }

    /// Report versions using `layout`
    pub fn with_layout(mut self, layout: VersionLayout) -> Self {
        self.layout = layout;
        self
    }

    /// Add or replace a target
    pub fn add_target(&self, name: impl Into<String>, target: SimulatedTarget) {
        self.state.lock().targets.insert(
            name.into(),
            TargetState {
                a: target.bank_a,
                b: target.bank_b,
                active: target.active,
                update_duration: target.update_duration,
                pending: None,
                stuck: false,
                swap_on_update: true,
                reported_active: ReportedActive::Actual,
                raw_overrides: HashMap::new(),
            },
        );
    }

    /// Register an image file and the version it installs
    pub fn add_image(&self, path: impl Into<PathBuf>, version: StructuredVersion) {
        self.state.lock().images.insert(path.into(), version);
    }

    /// Fail the next `count` pushes
    pub fn fail_next_pushes(&self, count: u32) {
        self.state.lock().push_failures = count;
    }

    /// Fail the next `count` status queries
    pub fn fail_next_queries(&self, count: u32) {
        self.state.lock().query_failures = count;
    }

    /// Never answer `operation` again, or answer it normally once more
    pub fn set_unanswered(&self, operation: TransportOperation, unanswered: bool) {
        let mut state = self.state.lock();
        if unanswered {
            state.unanswered.insert(operation);
        } else {
            state.unanswered.remove(&operation);
        }
    }

    /// Keep `target` in `Updating` forever once an update starts
    pub fn set_stuck(&self, target: &str, stuck: bool) {
        self.with_target(target, |t| t.stuck = stuck);
    }

    /// Whether a finished update switches the active bank
    pub fn set_swap_on_update(&self, target: &str, swap: bool) {
        self.with_target(target, |t| t.swap_on_update = swap);
    }

    /// Override which banks the status report marks active
    pub fn set_reported_active(&self, target: &str, reported: ReportedActive) {
        self.with_target(target, |t| t.reported_active = reported);
    }

    /// Report `raw` instead of the encoded version of `bank`
    pub fn set_raw_version(&self, target: &str, bank: Bank, raw: Vec<String>) {
        self.with_target(target, |t| {
            t.raw_overrides.insert(bank, raw);
        });
    }

    /// Currently running bank of `target`
    pub fn active_bank(&self, target: &str) -> Option<Bank> {
        self.state.lock().targets.get(target).map(|t| t.active)
    }

    /// Version stored in `bank` of `target`
    pub fn version(&self, target: &str, bank: Bank) -> Option<StructuredVersion> {
        self.state
            .lock()
            .targets
            .get(target)
            .and_then(|t| t.version(bank))
    }

    /// Number of push calls received, successful or not
    pub fn push_calls(&self) -> u32 {
        self.state.lock().push_calls
    }

    /// Every accepted update command, in order
    pub fn initiated_updates(&self) -> Vec<(String, Bank)> {
        self.state.lock().initiated.clone()
    }

    async fn answer(&self, operation: TransportOperation) {
        if self.state.lock().unanswered.contains(&operation) {
            std::future::pending::<()>().await;
        }
    }

    fn with_target(&self, target: &str, f: impl FnOnce(&mut TargetState)) {
        if let Some(t) = self.state.lock().targets.get_mut(target) {
            f(t);
        }
    }
}

#[async_trait::async_trait]
impl FirmwareTransport for SimulatedDevice {
    async fn push_image(&self, path: &Path, destination: &str) -> Result<(), TransportError> {
        self.answer(TransportOperation::PushImage).await;
        let mut state = self.state.lock();
        state.push_calls = state.push_calls.saturating_add(1);

        if state.push_failures > 0 {
            state.push_failures -= 1;
            return Err(TransportError::new(
                TransportOperation::PushImage,
                "simulated transfer interrupted",
            ));
        }

        let version = *state.images.get(path).ok_or_else(|| {
            TransportError::new(
                TransportOperation::PushImage,
                format!("no such image: {}", path.display()),
            )
        })?;
        state.staged.insert(destination.to_string(), version);
        Ok(())
    }

    async fn initiate_update(
        &self,
        target: &UpdateTarget,
        bank: Bank,
        image_ref: &str,
    ) -> Result<(), TransportError> {
        self.answer(TransportOperation::InitiateUpdate).await;
        let now = self.clock.now();
        let mut state = self.state.lock();
        let fail =
            |message: String| TransportError::new(TransportOperation::InitiateUpdate, message);

        let version = *state
            .staged
            .get(image_ref)
            .ok_or_else(|| fail(format!("nothing staged at {image_ref}")))?;
        let device = state
            .targets
            .get_mut(&target.name)
            .ok_or_else(|| fail(format!("unknown target {}", target.name)))?;

        device.settle(now);
        if device.pending.is_some() {
            return Err(fail(format!("{} is already updating", target.name)));
        }
        if device.active == bank {
            return Err(fail(format!(
                "{} is running from {}",
                target.name,
                target.bank_label(bank)
            )));
        }

        device.pending = Some(PendingUpdate {
            bank,
            version,
            completes_at: now + device.update_duration,
        });
        state.initiated.push((target.name.clone(), bank));
        Ok(())
    }

    async fn query_status(&self, target: &UpdateTarget) -> Result<DeviceStatus, TransportError> {
        self.answer(TransportOperation::QueryStatus).await;
        let now = self.clock.now();
        let mut state = self.state.lock();
        let fail = |message: String| TransportError::new(TransportOperation::QueryStatus, message);

        if state.query_failures > 0 {
            state.query_failures -= 1;
            return Err(fail("simulated connection refused".to_string()));
        }

        let device = state
            .targets
            .get_mut(&target.name)
            .ok_or_else(|| fail(format!("unknown target {}", target.name)))?;
        device.settle(now);

        let mut banks = Vec::with_capacity(2);
        for bank in [Bank::A, Bank::B] {
            let raw_version = match device.raw_overrides.get(&bank) {
                Some(raw) => Some(raw.clone()),
                None => device
                    .version(bank)
                    .map(|v| self.layout.encode_raw(&v))
                    .transpose()
                    .map_err(|e| fail(e.to_string()))?,
            };
            banks.push(BankStatus {
                bank,
                active: device.reports_active(bank),
                raw_version,
            });
        }

        Ok(DeviceStatus {
            state: if device.pending.is_some() {
                DeviceState::Updating
            } else {
                DeviceState::Enabled
            },
            banks,
        })
    }
}
