use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Identifier of a document in the catalog.
///
/// Assigned by the catalog from a monotonically increasing sequence and never
/// reused. Displayed as `#<n>`; parsing accepts both `#12` and `12`.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
)]
#[serde(transparent)]
pub struct DocumentId(u64);

impl DocumentId {
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// The numeric ID used as the key in redb tables.
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl From<u64> for DocumentId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl FromStr for DocumentId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let digits = trimmed.strip_prefix('#').unwrap_or(trimmed);
        digits.parse::<u64>().map(Self).map_err(|_| {
            Error::Validation(format!("invalid document reference: {s:?}"))
        })
    }
}
