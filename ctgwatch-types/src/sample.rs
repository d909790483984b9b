//! Waveform samples.

use chrono::{DateTime, Utc};

/// One of the three parallel channels recorded per measurement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum Channel {
    /// Primary fetal heart rate (FHR1).
    HeartRate,
    /// Secondary fetal heart rate (FHR2), e.g. the second twin.
    SecondaryHeartRate,
    /// Uterine activity (TOCO).
    UterineActivity,
}

impl Channel {
    pub const ALL: [Channel; 3] = [
        Channel::HeartRate,
        Channel::SecondaryHeartRate,
        Channel::UterineActivity,
    ];

    /// Whether a zero reading means "no signal" on this channel.
    ///
    /// A heart rate of 0 bpm is a dropout; a uterine pressure of 0 is a
    /// legitimate resting value.
    pub const fn zero_is_missing(&self) -> bool {
        !matches!(self, Channel::UterineActivity)
    }
}

/// A single integer reading at a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Sample {
    pub value: i32,
    pub observed_at: DateTime<Utc>,
}

impl Sample {
    pub fn new(value: i32, observed_at: DateTime<Utc>) -> Self {
        Self { value, observed_at }
    }
}
