//! Version ordering and expected-transition checks

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

use crate::error::UpdateError;
use crate::version::StructuredVersion;

/// Result of comparing one version against another
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VersionOrdering {
    /// Left-hand version is strictly greater
    Newer,
    /// Versions are identical in every field
    Equal,
    /// Left-hand version is strictly smaller
    Older,
}

impl VersionOrdering {
    /// The ordering seen from the other side of the comparison
    pub fn reverse(self) -> Self {
        match self {
            VersionOrdering::Newer => VersionOrdering::Older,
            VersionOrdering::Equal => VersionOrdering::Equal,
            VersionOrdering::Older => VersionOrdering::Newer,
        }
    }
}

impl From<Ordering> for VersionOrdering {
    fn from(ordering: Ordering) -> Self {
        match ordering {
            Ordering::Greater => VersionOrdering::Newer,
            Ordering::Equal => VersionOrdering::Equal,
            Ordering::Less => VersionOrdering::Older,
        }
    }
}

impl fmt::Display for VersionOrdering {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VersionOrdering::Newer => write!(f, "Newer"),
            VersionOrdering::Equal => write!(f, "Equal"),
            VersionOrdering::Older => write!(f, "Older"),
        }
    }
}

/// Compare `a` against `b` field by field in precedence order
///
/// The first differing field decides; `Equal` only when all fields match.
pub fn compare(a: &StructuredVersion, b: &StructuredVersion) -> VersionOrdering {
    a.fields()
        .iter()
        .zip(b.fields().iter())
        .map(|(x, y)| x.cmp(y))
        .find(|o| o.is_ne())
        .unwrap_or(Ordering::Equal)
        .into()
}

/// What version a bank should report after an update
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Expectation {
    /// Strictly newer than the baseline
    Newer,
    /// Strictly older than the baseline
    Older,
    /// Identical to the baseline
    Equal,
    /// Exactly this version, regardless of baseline
    Exactly(StructuredVersion),
}

impl Expectation {
    /// Check `actual` against the expectation relative to `baseline`
    ///
    /// Directional expectations need a baseline; without one the check
    /// fails with [`UpdateError::MissingBaseline`] rather than guessing.
    pub fn check(
        &self,
        baseline: Option<&StructuredVersion>,
        actual: &StructuredVersion,
    ) -> Result<bool, UpdateError> {
        let wanted = match self {
            Expectation::Exactly(expected) => return Ok(expected == actual),
            Expectation::Newer => VersionOrdering::Newer,
            Expectation::Older => VersionOrdering::Older,
            Expectation::Equal => VersionOrdering::Equal,
        };
        let baseline = baseline.ok_or(UpdateError::MissingBaseline { expectation: *self })?;
        Ok(compare(actual, baseline) == wanted)
    }

    /// Direction implied by this expectation, if any
    pub fn direction(&self) -> Option<VersionOrdering> {
        match self {
            Expectation::Newer => Some(VersionOrdering::Newer),
            Expectation::Older => Some(VersionOrdering::Older),
            Expectation::Equal => Some(VersionOrdering::Equal),
            Expectation::Exactly(_) => None,
        }
    }
}

impl fmt::Display for Expectation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expectation::Newer => write!(f, "newer"),
            Expectation::Older => write!(f, "older"),
            Expectation::Equal => write!(f, "equal"),
            Expectation::Exactly(v) => write!(f, "exactly {v}"),
        }
    }
}
