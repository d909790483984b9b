//! Clinical risk level.

use core::fmt;

/// Risk level on the 1 (lowest concern) to 5 (highest) scale.
///
/// A value outside that range cannot be constructed. Intervals whose risk
/// could not be determined carry `Option<RiskLevel>::None` instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(try_from = "u8", into = "u8"))]
pub struct RiskLevel(u8);

impl RiskLevel {
    pub const MIN: RiskLevel = RiskLevel(1);
    pub const MAX: RiskLevel = RiskLevel(5);

    /// Create a risk level, returning `None` outside 1..=5.
    pub fn new(value: i64) -> Option<Self> {
        if (1..=5).contains(&value) {
            Some(Self(value as u8))
        } else {
            None
        }
    }

    pub const fn get(&self) -> u8 {
        self.0
    }
}

impl TryFrom<u8> for RiskLevel {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        RiskLevel::new(i64::from(value)).ok_or_else(|| format!("risk level out of range: {}", value))
    }
}

impl From<RiskLevel> for u8 {
    fn from(r: RiskLevel) -> Self {
        r.0
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
