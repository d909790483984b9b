//! Clinical risk lookup.
//!
//! Rows are indexed by [`BaselineType::index`], columns by
//! [`DecelerationType::index`]. A zero cell is a combination with no
//! clinical definition.

use ctgwatch_types::{BaselineType, DecelerationType, RiskLevel, VariabilityType};

const UNDEFINED: u8 = 0;

const NORMAL: [[u8; 8]; 4] = [
    [1, 2, 2, 3, 3, 3, 3, 4],
    [2, 2, 3, 3, 3, 4, 3, 4],
    [3, 3, 3, 4, 4, 4, 4, 4],
    [4, 4, UNDEFINED, 4, 4, 4, UNDEFINED, UNDEFINED],
];

const DECREASE: [[u8; 8]; 4] = [
    [2, 3, 3, 4, 3, 4, 4, 5],
    [3, 3, 4, 4, 4, 5, 4, 5],
    [4, 4, 4, 5, 5, 5, 5, 5],
    [5, 5, UNDEFINED, 5, 5, 5, UNDEFINED, UNDEFINED],
];

const LOST: [u8; 8] = [4, 5, 5, 5, 5, 5, 5, 5];
const INCREASE: [u8; 8] = [2, 2, 3, 3, 3, 4, 3, 4];
const SINUSOIDAL: [u8; 8] = [4, 4, 4, 4, 5, 5, 5, 5];

/// Risk of a baseline/variability/deceleration combination, or `None`
/// when the combination is not clinically defined.
pub fn risk(
    baseline: BaselineType,
    variability: VariabilityType,
    deceleration: DecelerationType,
) -> Option<RiskLevel> {
    let (bi, di) = (baseline.index(), deceleration.index());
    let cell = match variability {
        VariabilityType::Normal => NORMAL[bi][di],
        VariabilityType::Decrease => DECREASE[bi][di],
        VariabilityType::Lost => LOST[di],
        VariabilityType::Increase => INCREASE[di],
        VariabilityType::Sinusoidal => SINUSOIDAL[di],
    };
    RiskLevel::new(i64::from(cell))
}

/// Like [`risk`], keyed by parameter names. Unknown names yield `None`.
pub fn risk_by_name(baseline: &str, variability: &str, deceleration: &str) -> Option<RiskLevel> {
    risk(
        BaselineType::from_name(baseline)?,
        VariabilityType::from_name(variability)?,
        DecelerationType::from_name(deceleration)?,
    )
}
