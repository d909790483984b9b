//! Diagnosis composition.
//!
//! A diagnosis batch is a list of intervals, each with a raw parameter map.
//! Composing scores every interval against the risk table, carrying the
//! current baseline across intervals (and across batches, seeded from the
//! measurement's earlier contents), and aggregates the batch into one
//! [`Diagnosis`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use ctgwatch_types::{
    Baseline, ClinicianId, CtgEvent, DecelerationType, Diagnosis, DiagnosisContent, DiagnosisId,
    MeasurementId, ParamValue, Parameters, RiskLevel,
};

use crate::classify::{classify, mentions_baseline};
use crate::error::{CoreError, Result};
use crate::risk::risk;
use crate::store::{Store, Transaction};
use crate::timeline::{self, MergeSummary};

/// Parameter through which an algorithm may report a risk directly.
pub const RISK_PARAMETER: &str = "Risk";

/// One interval submitted for diagnosis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentItem {
    pub range_from: DateTime<Utc>,
    pub range_until: DateTime<Utc>,
    #[serde(default)]
    pub parameters: Parameters,
    #[serde(default)]
    pub memo: String,
}

/// Who produced a diagnosis batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Author {
    Clinician(ClinicianId),
    /// An assessment algorithm, identified as `name:version`.
    Algorithm(String),
}

/// A diagnosis batch awaiting registration.
#[derive(Debug, Clone)]
pub struct DiagnosisRequest {
    pub measurement_id: MeasurementId,
    pub author: Author,
    pub memo: String,
    pub items: Vec<ContentItem>,
}

/// The outcome of folding a batch, before persistence.
#[derive(Debug, Clone, PartialEq)]
pub struct Composition {
    pub baseline_bpm: Option<i64>,
    pub maximum_risk: Option<RiskLevel>,
    pub range_from: DateTime<Utc>,
    pub range_until: DateTime<Utc>,
    /// Scored contents in range order, not yet attached to a diagnosis.
    pub contents: Vec<DiagnosisContent>,
    /// Running baseline after the last interval.
    pub baseline: Option<Baseline>,
}

/// A persisted diagnosis with its contents and the timeline changes it made.
#[derive(Debug, Clone, PartialEq)]
pub struct RegisteredDiagnosis {
    pub diagnosis: Diagnosis,
    pub contents: Vec<DiagnosisContent>,
    pub merge: MergeSummary,
}

/// Fold a batch into a [`Composition`].
///
/// `seed` is the baseline in effect before the batch. When
/// `reported_risk` is set, an integer [`RISK_PARAMETER`] in 1..=5 overrides
/// the table score of its interval.
pub fn compose(
    seed: Option<Baseline>,
    mut items: Vec<ContentItem>,
    reported_risk: bool,
) -> Result<Composition> {
    items.sort_by_key(|item| item.range_from);

    let (Some(first), Some(last)) = (items.first(), items.last()) else {
        return Err(CoreError::EmptyDiagnosis);
    };
    let (range_from, range_until) = (first.range_from, last.range_until);

    let mut current = seed.filter(|b| b.variability.is_some());
    let mut baseline_bpm = None;
    let mut maximum_risk = None;
    let mut contents = Vec::with_capacity(items.len());
    let mut previous_until: Option<DateTime<Utc>> = None;

    for item in items {
        if item.range_until < item.range_from {
            return Err(CoreError::InvalidRange {
                from: item.range_from,
                until: item.range_until,
            });
        }
        if previous_until.is_some_and(|until| item.range_from < until) {
            return Err(CoreError::ContentsOverlap(item.range_from));
        }
        previous_until = Some(item.range_until);

        let mut score = match classify(&item.parameters)? {
            Some(CtgEvent::Baseline(b)) => {
                baseline_bpm = Some(b.bpm);
                b.variability.and_then(|v| {
                    current = Some(b);
                    risk(b.kind, v.kind, DecelerationType::None)
                })
            }
            Some(CtgEvent::Deceleration { kind }) => {
                current.and_then(|b| b.variability.and_then(|v| risk(b.kind, v.kind, kind)))
            }
            Some(CtgEvent::Acceleration { .. }) | None => None,
        };

        if reported_risk {
            if let Some(&ParamValue::Int(reported)) = item.parameters.get(RISK_PARAMETER) {
                score = RiskLevel::new(reported).or(score);
            }
        }

        maximum_risk = maximum_risk.max(score);

        contents.push(DiagnosisContent {
            id: Default::default(),
            diagnosis_id: DiagnosisId::default(),
            risk: score,
            range_from: item.range_from,
            range_until: item.range_until,
            parameters: item.parameters,
            memo: item.memo,
        });
    }

    Ok(Composition {
        baseline_bpm,
        maximum_risk,
        range_from,
        range_until,
        contents,
        baseline: current,
    })
}

/// The baseline in effect just before `before`, from the measurement's
/// most recent earlier content that mentions a baseline.
pub fn seed_baseline(
    tx: &dyn Transaction,
    measurement: MeasurementId,
    before: DateTime<Utc>,
) -> Result<Option<Baseline>> {
    let Some(content) = tx
        .contents_before(measurement, before)?
        .into_iter()
        .find(|c| mentions_baseline(&c.parameters))
    else {
        return Ok(None);
    };

    match classify(&content.parameters) {
        Ok(Some(CtgEvent::Baseline(b))) if b.variability.is_some() => Ok(Some(b)),
        Ok(Some(CtgEvent::Baseline(_))) => {
            warn!(
                content = %content.id,
                "Content has a baseline parameter but no variability"
            );
            Ok(None)
        }
        Ok(_) => {
            warn!(
                content = %content.id,
                "Content has a baseline parameter but does not represent a baseline"
            );
            Ok(None)
        }
        Err(e) => {
            warn!(content = %content.id, error = %e, "Unexpected parameters in content");
            Ok(None)
        }
    }
}

/// Compose and persist a diagnosis, then merge it into the timeline.
///
/// Runs in one transaction holding the measurement's row lock, so two
/// batches for the same measurement never merge concurrently.
pub fn register_diagnosis(
    store: &dyn Store,
    request: DiagnosisRequest,
    now: DateTime<Utc>,
) -> Result<RegisteredDiagnosis> {
    let first_from = request
        .items
        .iter()
        .map(|item| item.range_from)
        .min()
        .ok_or(CoreError::EmptyDiagnosis)?;

    let mut tx = store.begin()?;
    tx.lock_measurement(request.measurement_id)?;

    let seed = seed_baseline(tx.as_ref(), request.measurement_id, first_from)?;
    let reported_risk = matches!(request.author, Author::Algorithm(_));
    let composition = compose(seed, request.items, reported_risk)?;

    let (clinician_id, algorithm) = match request.author {
        Author::Clinician(id) => (Some(id), None),
        Author::Algorithm(name) => (None, Some(name)),
    };

    let diagnosis = tx.insert_diagnosis(Diagnosis {
        id: DiagnosisId::default(),
        measurement_id: request.measurement_id,
        clinician_id,
        algorithm,
        baseline_bpm: composition.baseline_bpm,
        maximum_risk: composition.maximum_risk,
        range_from: composition.range_from,
        range_until: composition.range_until,
        memo: request.memo,
        created_at: now,
        modified_at: now,
    })?;

    let mut contents = Vec::with_capacity(composition.contents.len());
    for mut content in composition.contents {
        content.diagnosis_id = diagnosis.id;
        contents.push(tx.insert_content(content)?);
    }

    let merge = timeline::merge(tx.as_mut(), request.measurement_id, &contents, now)?;
    tx.commit()?;

    debug!(
        diagnosis = %diagnosis.id,
        measurement = %diagnosis.measurement_id,
        contents = contents.len(),
        maximum_risk = ?diagnosis.maximum_risk.map(|r| r.get()),
        "Registered diagnosis"
    );

    Ok(RegisteredDiagnosis {
        diagnosis,
        contents,
        merge,
    })
}

/// Replace a diagnosis memo. The memo is the only mutable field.
pub fn update_diagnosis_memo(
    store: &dyn Store,
    id: DiagnosisId,
    memo: impl Into<String>,
    now: DateTime<Utc>,
) -> Result<Diagnosis> {
    let mut tx = store.begin()?;
    let mut diagnosis = tx
        .diagnosis(id)?
        .ok_or_else(|| CoreError::NotFound(format!("Diagnosis {}", id)))?;
    diagnosis.memo = memo.into();
    diagnosis.modified_at = now;
    tx.update_diagnosis(&diagnosis)?;
    tx.commit()?;
    Ok(diagnosis)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use chrono::{Duration, TimeZone};
    use ctgwatch_types::{BaselineType, HospitalId, Measurement, Variability, VariabilityType};

    fn at(min: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2021, 12, 1, 16, 0, 0).unwrap() + Duration::minutes(min)
    }

    fn item(from: i64, until: i64, parameters: Parameters) -> ContentItem {
        ContentItem {
            range_from: at(from),
            range_until: at(until),
            parameters,
            memo: String::new(),
        }
    }

    fn baseline(bpm: i64, variability: Option<(&str, i64)>) -> Parameters {
        let params = Parameters::new().with("Baseline-NORMAL", bpm);
        match variability {
            Some((name, value)) => params.with(name, value),
            None => params,
        }
    }

    fn decel(name: &str) -> Parameters {
        Parameters::new().with(name, ParamValue::Null)
    }

    fn level(v: i64) -> Option<RiskLevel> {
        RiskLevel::new(v)
    }

    #[test]
    fn test_empty_batch() {
        assert!(matches!(
            compose(None, vec![], false),
            Err(CoreError::EmptyDiagnosis)
        ));
    }

    #[test]
    fn test_sorts_and_scores() {
        let items = vec![
            item(5, 10, decel("Deceleration-HI_LD")),
            item(0, 5, baseline(140, Some(("BaselineVariability-NORMAL", 8)))),
        ];

        let c = compose(None, items, false).unwrap();
        assert_eq!(c.range_from, at(0));
        assert_eq!(c.range_until, at(10));
        assert_eq!(c.contents[0].risk, level(1));
        assert_eq!(c.contents[1].risk, level(3));
        assert_eq!(c.maximum_risk, level(3));
        assert_eq!(c.baseline_bpm, Some(140));
    }

    #[test]
    fn test_overlap_is_rejected_from_the_second_item() {
        let items = vec![
            item(0, 5, baseline(140, None)),
            item(4, 8, decel("Deceleration-ED")),
        ];
        assert!(matches!(
            compose(None, items, false),
            Err(CoreError::ContentsOverlap(_))
        ));

        let items = vec![
            item(0, 5, baseline(140, None)),
            item(5, 8, decel("Deceleration-ED")),
            item(7, 9, decel("Deceleration-ED")),
        ];
        assert!(matches!(
            compose(None, items, false),
            Err(CoreError::ContentsOverlap(_))
        ));
    }

    #[test]
    fn test_touching_items_are_accepted() {
        let items = vec![item(0, 5, Parameters::new()), item(5, 10, Parameters::new())];
        assert!(compose(None, items, false).is_ok());
    }

    #[test]
    fn test_inverted_range() {
        let items = vec![item(5, 4, Parameters::new())];
        assert!(matches!(
            compose(None, items, false),
            Err(CoreError::InvalidRange { .. })
        ));
    }

    #[test]
    fn test_classification_error_propagates() {
        let params = Parameters::new()
            .with("Baseline-NORMAL", 140)
            .with("Acceleration", ParamValue::Null);
        assert!(matches!(
            compose(None, vec![item(0, 5, params)], false),
            Err(CoreError::ConflictingEvents(..))
        ));
    }

    #[test]
    fn test_deceleration_without_baseline_is_unscored() {
        let c = compose(None, vec![item(0, 5, decel("Deceleration-HI_VD"))], false).unwrap();
        assert_eq!(c.contents[0].risk, None);
        assert_eq!(c.maximum_risk, None);
    }

    #[test]
    fn test_seed_baseline_scores_first_deceleration() {
        let seed = Baseline {
            kind: BaselineType::Deceleration,
            bpm: 105,
            variability: Some(Variability {
                kind: VariabilityType::Decrease,
                value: 3,
            }),
        };
        let c = compose(Some(seed), vec![item(0, 5, decel("Deceleration-HI_LD"))], false)
            .unwrap();
        assert_eq!(c.contents[0].risk, level(5));
        // Seed bpm is not this batch's observation.
        assert_eq!(c.baseline_bpm, None);
    }

    #[test]
    fn test_baseline_without_variability_keeps_state() {
        let items = vec![
            item(0, 5, baseline(140, Some(("BaselineVariability-LOST", 1)))),
            item(5, 10, baseline(150, None)),
            item(10, 15, decel("Deceleration-None")),
        ];
        let c = compose(None, items, false).unwrap();
        assert_eq!(c.contents[0].risk, level(4));
        assert_eq!(c.contents[1].risk, None);
        assert_eq!(c.contents[2].risk, level(4));
        assert_eq!(c.baseline_bpm, Some(150));
        assert_eq!(c.baseline.map(|b| b.bpm), Some(140));
    }

    #[test]
    fn test_reported_risk_overrides_table() {
        let params = baseline(140, Some(("BaselineVariability-NORMAL", 8))).with("Risk", 4);
        let c = compose(None, vec![item(0, 5, params.clone())], true).unwrap();
        assert_eq!(c.contents[0].risk, level(4));

        let c = compose(None, vec![item(0, 5, params)], false).unwrap();
        assert_eq!(c.contents[0].risk, level(1));

        let out_of_range = Parameters::new().with("Risk", 9);
        let c = compose(None, vec![item(0, 5, out_of_range)], true).unwrap();
        assert_eq!(c.contents[0].risk, None);
    }

    fn measurement(store: &MemoryStore) -> MeasurementId {
        let mut tx = store.begin().unwrap();
        let m = tx
            .insert_measurement(Measurement::new(HospitalId(1), "2112011616", at(0)))
            .unwrap();
        tx.commit().unwrap();
        m.id
    }

    fn request(m: MeasurementId, items: Vec<ContentItem>) -> DiagnosisRequest {
        DiagnosisRequest {
            measurement_id: m,
            author: Author::Clinician(ClinicianId(7)),
            memo: "checked".to_string(),
            items,
        }
    }

    #[test]
    fn test_register_persists_diagnosis_and_contents() {
        let store = MemoryStore::new();
        let m = measurement(&store);

        let registered = register_diagnosis(
            &store,
            request(
                m,
                vec![item(0, 5, baseline(140, Some(("BaselineVariability-NORMAL", 8))))],
            ),
            at(6),
        )
        .unwrap();

        assert_eq!(registered.diagnosis.clinician_id, Some(ClinicianId(7)));
        assert_eq!(registered.merge.inserted, 1);

        let tx = store.begin().unwrap();
        let stored = tx.diagnosis(registered.diagnosis.id).unwrap().unwrap();
        assert_eq!(stored.maximum_risk, level(1));
        assert_eq!(tx.contents(stored.id).unwrap(), registered.contents);
        assert_eq!(tx.computed_events(m).unwrap().len(), 1);
    }

    #[test]
    fn test_register_seeds_from_previous_batch() {
        let store = MemoryStore::new();
        let m = measurement(&store);

        register_diagnosis(
            &store,
            request(
                m,
                vec![item(0, 5, baseline(140, Some(("BaselineVariability-DECREASE", 3))))],
            ),
            at(6),
        )
        .unwrap();

        let second = register_diagnosis(
            &store,
            request(m, vec![item(6, 8, decel("Deceleration-ED"))]),
            at(9),
        )
        .unwrap();
        assert_eq!(second.contents[0].risk, level(3));
    }

    #[test]
    fn test_seed_without_variability_is_ignored() {
        let store = MemoryStore::new();
        let m = measurement(&store);

        register_diagnosis(&store, request(m, vec![item(0, 5, baseline(140, None))]), at(6))
            .unwrap();
        let tx = store.begin().unwrap();
        assert_eq!(seed_baseline(tx.as_ref(), m, at(6)).unwrap(), None);
        // A content ending exactly at the boundary is not "before".
        assert_eq!(seed_baseline(tx.as_ref(), m, at(5)).unwrap(), None);
    }

    #[test]
    fn test_register_failure_leaves_no_trace() {
        let store = MemoryStore::new();
        let m = measurement(&store);

        let result = register_diagnosis(
            &store,
            request(
                m,
                vec![item(0, 5, Parameters::new()), item(3, 8, Parameters::new())],
            ),
            at(9),
        );
        assert!(result.is_err());

        let tx = store.begin().unwrap();
        assert!(tx.diagnoses(m).unwrap().is_empty());
        assert!(tx.computed_events(m).unwrap().is_empty());
    }

    #[test]
    fn test_register_unknown_measurement() {
        let store = MemoryStore::new();
        let err = register_diagnosis(
            &store,
            request(MeasurementId(42), vec![item(0, 5, Parameters::new())]),
            at(6),
        )
        .unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::NotFound);
    }

    #[test]
    fn test_update_memo() {
        let store = MemoryStore::new();
        let m = measurement(&store);
        let registered =
            register_diagnosis(&store, request(m, vec![item(0, 5, Parameters::new())]), at(6))
                .unwrap();

        let updated =
            update_diagnosis_memo(&store, registered.diagnosis.id, "revised", at(7)).unwrap();
        assert_eq!(updated.memo, "revised");
        assert_eq!(updated.modified_at, at(7));
        assert_eq!(updated.range_from, registered.diagnosis.range_from);

        assert!(update_diagnosis_memo(&store, DiagnosisId(999), "x", at(7)).is_err());
    }
}
