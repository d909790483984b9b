//! Classification of parameter maps into CTG events.
//!
//! Baseline and variability parameters only count when they carry a
//! numeric value. Deceleration and acceleration parameters count whenever
//! the name is present, even with a null value.

use ctgwatch_types::{
    AccelerationType, Baseline, BaselineType, CtgEvent, DecelerationType, Parameters,
    Variability, VariabilityType,
};

use crate::error::{CoreError, Result};

/// Classify one interval's parameters.
///
/// Returns `Ok(None)` when no recognized event is present. A lone
/// variability parameter is not an event by itself.
pub fn classify(params: &Parameters) -> Result<Option<CtgEvent>> {
    let baseline = single(
        "baselines",
        BaselineType::ALL
            .into_iter()
            .filter_map(|t| params.int(t.name()).map(|v| (t, v))),
    )?;
    let variability = single(
        "baseline variabilities",
        VariabilityType::ALL
            .into_iter()
            .filter_map(|t| params.int(t.name()).map(|v| (t, v))),
    )?;
    let deceleration = single(
        "decelerations",
        DecelerationType::ALL
            .into_iter()
            .filter(|t| params.contains(t.name())),
    )?;
    let acceleration = single(
        "accelerations",
        AccelerationType::ALL
            .into_iter()
            .filter(|t| params.contains(t.name())),
    )?;

    match (baseline, deceleration, acceleration) {
        (Some(_), Some(_), _) => Err(CoreError::ConflictingEvents("Baseline", "deceleration")),
        (Some(_), _, Some(_)) => Err(CoreError::ConflictingEvents("Baseline", "acceleration")),
        (Some((kind, bpm)), None, None) => Ok(Some(CtgEvent::Baseline(Baseline {
            kind,
            bpm,
            variability: variability.map(|(kind, value)| Variability { kind, value }),
        }))),
        (None, Some(_), Some(_)) => {
            Err(CoreError::ConflictingEvents("Deceleration", "acceleration"))
        }
        (None, Some(kind), None) => Ok(Some(CtgEvent::Deceleration { kind })),
        (None, None, Some(kind)) => Ok(Some(CtgEvent::Acceleration { kind })),
        (None, None, None) => Ok(None),
    }
}

/// Whether the parameters name any baseline type, whatever its value.
pub fn mentions_baseline(params: &Parameters) -> bool {
    BaselineType::ALL.iter().any(|t| params.contains(t.name()))
}

fn single<T>(category: &'static str, mut found: impl Iterator<Item = T>) -> Result<Option<T>> {
    let first = found.next();
    if found.next().is_some() {
        return Err(CoreError::MultipleEvents(category));
    }
    Ok(first)
}
