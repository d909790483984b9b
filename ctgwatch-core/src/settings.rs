//! Alert policy constants.

use std::time::Duration;

use ctgwatch_types::RiskLevel;
use serde::{Deserialize, Serialize};

/// Thresholds and windows governing alert surfacing.
///
/// Built once at startup and passed by reference to the workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertSettings {
    /// Minimum risk for a computed event to raise an alert.
    pub risk_threshold: RiskLevel,
    /// How far back the unread query looks when nothing has been seen.
    pub backing_window: Duration,
    /// Client polling cadence.
    pub execution_interval: Duration,
    /// Length of a silence window.
    pub silence_duration: Duration,
    /// A measurement must have produced data this recently to alert.
    pub measurement_recency: Duration,
}

impl Default for AlertSettings {
    fn default() -> Self {
        Self {
            risk_threshold: RiskLevel::new(3).unwrap_or(RiskLevel::MIN),
            backing_window: Duration::from_secs(60 * 60),
            execution_interval: Duration::from_secs(30),
            silence_duration: Duration::from_secs(5 * 60),
            measurement_recency: Duration::from_secs(5 * 60),
        }
    }
}

impl AlertSettings {
    /// Whether an annotation of this risk ends an active silence.
    pub fn is_alerting(&self, risk: RiskLevel) -> bool {
        risk >= self.risk_threshold
    }
}

pub(crate) fn chrono_duration(d: Duration) -> chrono::Duration {
    chrono::Duration::from_std(d).unwrap_or(chrono::Duration::MAX)
}
