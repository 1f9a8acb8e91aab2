//! Dual-bank state for update targets
//!
//! Every target carries two firmware banks. Exactly one of them runs at a
//! time; the other is the one eligible for the next update. A [`BankPair`] is
//! an immutable snapshot of both banks, re-read with [`refresh`] instead of
//! being mutated in place.

use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

use crate::error::BankError;
use crate::transport::{BankStatus, FirmwareTransport};
use crate::version::{StructuredVersion, VersionLayout};

/// Firmware bank identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Bank {
    /// Bank A (image A / primary)
    A,
    /// Bank B (image B / secondary)
    B,
}

impl Bank {
    /// Get the other bank
    pub fn other(self) -> Self {
        match self {
            Bank::A => Bank::B,
            Bank::B => Bank::A,
        }
    }

    /// Device-facing label for this bank
    pub fn label(self, naming: BankNaming) -> &'static str {
        match (naming, self) {
            (BankNaming::ImageAB, Bank::A) => "ImageA",
            (BankNaming::ImageAB, Bank::B) => "ImageB",
            (BankNaming::PrimarySecondary, Bank::A) => "Primary",
            (BankNaming::PrimarySecondary, Bank::B) => "Secondary",
        }
    }
}

impl fmt::Display for Bank {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Bank::A => write!(f, "A"),
            Bank::B => write!(f, "B"),
        }
    }
}

/// How a device family names its two banks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BankNaming {
    /// `ImageA` / `ImageB`
    ImageAB,
    /// `Primary` / `Secondary`
    PrimarySecondary,
}

/// Class of device being updated
///
/// Flash and reboot times differ by orders of magnitude between classes, so
/// each class has its own polling deadline in [`crate::config::UpdateConfig`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceClass {
    /// Power supply unit
    Psu,
    /// Baseboard management controller
    Bmc,
    /// SAS/PCIe expander
    Expander,
}

impl DeviceClass {
    /// Bank naming used by this class
    pub fn naming(self) -> BankNaming {
        match self {
            DeviceClass::Psu => BankNaming::ImageAB,
            DeviceClass::Bmc | DeviceClass::Expander => BankNaming::PrimarySecondary,
        }
    }
}

impl fmt::Display for DeviceClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceClass::Psu => write!(f, "PSU"),
            DeviceClass::Bmc => write!(f, "BMC"),
            DeviceClass::Expander => write!(f, "expander"),
        }
    }
}

/// A logical update target such as "PSU 1" or "BMC"
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UpdateTarget {
    /// Target name as known to the transport
    pub name: String,
    /// Device class
    pub class: DeviceClass,
}

impl UpdateTarget {
    /// Create a new target
    pub fn new(name: impl Into<String>, class: DeviceClass) -> Self {
        Self {
            name: name.into(),
            class,
        }
    }

    /// Label the transport uses for `bank` on this target
    pub fn bank_label(&self, bank: Bank) -> &'static str {
        bank.label(self.class.naming())
    }
}

impl fmt::Display for UpdateTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Last-known state of one bank
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FirmwareBank {
    /// Bank identifier
    pub bank: Bank,

    /// Whether this bank is currently running
    pub active: bool,

    /// Firmware version in this bank; `None` if the device reports no image
    pub version: Option<StructuredVersion>,
}

impl FirmwareBank {
    /// Create a bank record
    pub fn new(bank: Bank, active: bool, version: Option<StructuredVersion>) -> Self {
        Self {
            bank,
            active,
            version,
        }
    }
}

/// Snapshot of both banks of one target
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BankPair {
    target: UpdateTarget,
    a: FirmwareBank,
    b: FirmwareBank,
}

impl BankPair {
    /// Build a snapshot from the two bank records
    ///
    /// Fails if the records are not one A and one B, or if both claim to be
    /// active.
    pub fn new(target: UpdateTarget, a: FirmwareBank, b: FirmwareBank) -> Result<Self, BankError> {
        if a.bank != Bank::A {
            return Err(BankError::MissingBank {
                target: target.name,
                bank: Bank::A,
            });
        }
        if b.bank != Bank::B {
            return Err(BankError::MissingBank {
                target: target.name,
                bank: Bank::B,
            });
        }
        if a.active && b.active {
            return Err(BankError::AmbiguousActive {
                target: target.name,
                active_count: 2,
            });
        }
        Ok(Self { target, a, b })
    }

    /// Target this snapshot belongs to
    pub fn target(&self) -> &UpdateTarget {
        &self.target
    }

    /// Record for a specific bank
    pub fn bank(&self, bank: Bank) -> &FirmwareBank {
        match bank {
            Bank::A => &self.a,
            Bank::B => &self.b,
        }
    }

    /// Both bank records, A first
    pub fn banks(&self) -> [&FirmwareBank; 2] {
        [&self.a, &self.b]
    }

    /// The bank currently running
    ///
    /// A snapshot where neither bank reports active is indeterminate and
    /// yields [`BankError::AmbiguousActive`]; no bank is assumed.
    pub fn active_bank(&self) -> Result<&FirmwareBank, BankError> {
        match (self.a.active, self.b.active) {
            (true, false) => Ok(&self.a),
            (false, true) => Ok(&self.b),
            (a, b) => Err(BankError::AmbiguousActive {
                target: self.target.name.clone(),
                active_count: usize::from(a) + usize::from(b),
            }),
        }
    }

    /// The bank eligible for the next update
    pub fn inactive_bank(&self) -> Result<&FirmwareBank, BankError> {
        let active = self.active_bank()?;
        Ok(self.bank(active.bank.other()))
    }

    /// Version of the running bank
    pub fn active_version(&self) -> Result<Option<StructuredVersion>, BankError> {
        Ok(self.active_bank()?.version)
    }
}

impl fmt::Display for BankPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:", self.target)?;
        for bank in self.banks() {
            let marker = if bank.active { "*" } else { "" };
            match &bank.version {
                Some(v) => write!(f, " {}{}={}", self.target.bank_label(bank.bank), marker, v)?,
                None => write!(f, " {}{}=empty", self.target.bank_label(bank.bank), marker)?,
            }
        }
        Ok(())
    }
}

/// Re-read both banks of `target` and return a fresh snapshot
///
/// Transport failures, undecodable versions and ambiguous activity are all
/// returned as errors; nothing is defaulted.
pub async fn refresh(
    transport: &dyn FirmwareTransport,
    target: &UpdateTarget,
    layout: &VersionLayout,
) -> Result<BankPair, BankError> {
    let status = transport.query_status(target).await?;

    let a = take_bank(&status.banks, Bank::A, target, layout)?;
    let b = take_bank(&status.banks, Bank::B, target, layout)?;
    let pair = BankPair::new(target.clone(), a, b)?;

    debug!("Refreshed banks: {}", pair);
    Ok(pair)
}

fn take_bank(
    reports: &[BankStatus],
    bank: Bank,
    target: &UpdateTarget,
    layout: &VersionLayout,
) -> Result<FirmwareBank, BankError> {
    let mut matching = reports.iter().filter(|r| r.bank == bank);
    let report = matching.next().ok_or_else(|| BankError::MissingBank {
        target: target.name.clone(),
        bank,
    })?;
    if matching.next().is_some() {
        return Err(BankError::DuplicateBank {
            target: target.name.clone(),
            bank,
        });
    }

    let version = report
        .raw_version
        .as_deref()
        .map(|raw| layout.decode(raw))
        .transpose()
        .map_err(|source| BankError::Decode {
            target: target.name.clone(),
            bank,
            source,
        })?;

    Ok(FirmwareBank::new(bank, report.active, version))
}
