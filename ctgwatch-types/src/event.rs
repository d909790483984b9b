//! CTG event vocabulary.
//!
//! Each category is a closed enum whose declaration order is significant:
//! the risk tables are indexed by [`BaselineType::index`] and
//! [`DecelerationType::index`].

use core::fmt;

/// Baseline classification of the fetal heart rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum BaselineType {
    Normal,
    Acceleration,
    Deceleration,
    HiDeceleration,
}

impl BaselineType {
    /// All baseline types, in table order.
    pub const ALL: [BaselineType; 4] = [
        BaselineType::Normal,
        BaselineType::Acceleration,
        BaselineType::Deceleration,
        BaselineType::HiDeceleration,
    ];

    /// The parameter name used in diagnosis parameter maps.
    pub const fn name(&self) -> &'static str {
        match self {
            BaselineType::Normal => "Baseline-NORMAL",
            BaselineType::Acceleration => "Baseline-ACCELERATION",
            BaselineType::Deceleration => "Baseline-DECELERATION",
            BaselineType::HiDeceleration => "Baseline-HiDECELERATION",
        }
    }

    /// Row index in the risk matrices.
    pub const fn index(&self) -> usize {
        *self as usize
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.name() == name)
    }
}

/// Short-term variability of the baseline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum VariabilityType {
    Normal,
    Decrease,
    Increase,
    Lost,
    Sinusoidal,
}

impl VariabilityType {
    pub const ALL: [VariabilityType; 5] = [
        VariabilityType::Normal,
        VariabilityType::Decrease,
        VariabilityType::Increase,
        VariabilityType::Lost,
        VariabilityType::Sinusoidal,
    ];

    pub const fn name(&self) -> &'static str {
        match self {
            VariabilityType::Normal => "BaselineVariability-NORMAL",
            VariabilityType::Decrease => "BaselineVariability-DECREASE",
            VariabilityType::Increase => "BaselineVariability-INCREASE",
            VariabilityType::Lost => "BaselineVariability-LOST",
            VariabilityType::Sinusoidal => "BaselineVariability-SINUSOIDAL",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.name() == name)
    }
}

/// Deceleration sub-type. `None` is the explicit "no deceleration" column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum DecelerationType {
    None,
    Early,
    LowLate,
    HiLate,
    LowProlonged,
    HiProlonged,
    LowVariable,
    HiVariable,
}

impl DecelerationType {
    /// All deceleration types, in table order.
    pub const ALL: [DecelerationType; 8] = [
        DecelerationType::None,
        DecelerationType::Early,
        DecelerationType::LowLate,
        DecelerationType::HiLate,
        DecelerationType::LowProlonged,
        DecelerationType::HiProlonged,
        DecelerationType::LowVariable,
        DecelerationType::HiVariable,
    ];

    pub const fn name(&self) -> &'static str {
        match self {
            DecelerationType::None => "Deceleration-None",
            DecelerationType::Early => "Deceleration-ED",
            DecelerationType::LowLate => "Deceleration-LOW_LD",
            DecelerationType::HiLate => "Deceleration-HI_LD",
            DecelerationType::LowProlonged => "Deceleration-LOW_PD",
            DecelerationType::HiProlonged => "Deceleration-HI_PD",
            DecelerationType::LowVariable => "Deceleration-LOW_VD",
            DecelerationType::HiVariable => "Deceleration-HI_VD",
        }
    }

    /// Column index in the risk matrices and vectors.
    pub const fn index(&self) -> usize {
        *self as usize
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.name() == name)
    }
}

/// Acceleration sub-type. Only one kind is currently reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum AccelerationType {
    Acceleration,
}

impl AccelerationType {
    pub const ALL: [AccelerationType; 1] = [AccelerationType::Acceleration];

    pub const fn name(&self) -> &'static str {
        match self {
            AccelerationType::Acceleration => "Acceleration",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.name() == name)
    }
}

/// Variability attached to a baseline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Variability {
    pub kind: VariabilityType,
    pub value: i64,
}

/// A baseline observation, optionally carrying its variability.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Baseline {
    pub kind: BaselineType,
    /// Baseline heart rate in beats per minute.
    pub bpm: i64,
    pub variability: Option<Variability>,
}

/// A classified CTG event.
///
/// Variability never appears on its own: it is only meaningful as part of
/// a [`Baseline`], so it lives there as a nested field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(tag = "event", rename_all = "snake_case"))]
pub enum CtgEvent {
    Baseline(Baseline),
    Deceleration { kind: DecelerationType },
    Acceleration { kind: AccelerationType },
}

impl CtgEvent {
    /// The parameter name of the top-level event.
    pub fn name(&self) -> &'static str {
        match self {
            CtgEvent::Baseline(b) => b.kind.name(),
            CtgEvent::Deceleration { kind } => kind.name(),
            CtgEvent::Acceleration { kind } => kind.name(),
        }
    }

    pub fn as_baseline(&self) -> Option<&Baseline> {
        match self {
            CtgEvent::Baseline(b) => Some(b),
            _ => None,
        }
    }
}

impl fmt::Display for CtgEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
