//! Persisted records of a measurement's diagnosis timeline.
//!
//! Identifiers are assigned by the store on insert; a record built in
//! memory carries the default (zero) id until then.

use core::fmt;

use chrono::{DateTime, Utc};

use crate::{Parameters, RiskLevel};

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
        #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
        #[cfg_attr(feature = "serde", serde(transparent))]
        pub struct $name(pub u64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "#{}", self.0)
            }
        }

        impl From<u64> for $name {
            fn from(v: u64) -> Self {
                Self(v)
            }
        }
    };
}

id_type!(HospitalId);
id_type!(
    /// Clinician (doctor or annotator) acting on a record.
    ClinicianId
);
id_type!(MeasurementId);
id_type!(DiagnosisId);
id_type!(ContentId);
id_type!(ComputedEventId);
id_type!(AnnotatedEventId);
id_type!(AlertId);

/// One monitoring session of one patient.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Measurement {
    pub id: MeasurementId,
    pub hospital_id: HospitalId,
    /// Device-side identifier, e.g. the patient id of a TRC export.
    pub code: String,
    /// Timestamp of the oldest recorded sample.
    pub first_time: Option<DateTime<Utc>>,
    /// Timestamp of the newest recorded sample.
    pub last_time: Option<DateTime<Utc>>,
    pub is_closed: bool,
    pub closing_memo: Option<String>,
    pub closed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Measurement {
    pub fn new(hospital_id: HospitalId, code: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: MeasurementId::default(),
            hospital_id,
            code: code.into(),
            first_time: None,
            last_time: None,
            is_closed: false,
            closing_memo: None,
            closed_at: None,
            created_at: now,
        }
    }

    /// Widen the recorded data range to include `t`.
    pub fn observe(&mut self, t: DateTime<Utc>) {
        self.first_time = Some(self.first_time.map_or(t, |f| f.min(t)));
        self.last_time = Some(self.last_time.map_or(t, |l| l.max(t)));
    }
}

/// The aggregate of one diagnosis run over a measurement.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Diagnosis {
    pub id: DiagnosisId,
    pub measurement_id: MeasurementId,
    /// Clinician who submitted the batch, if any.
    pub clinician_id: Option<ClinicianId>,
    /// `name:version` of the algorithm that produced the batch, if any.
    pub algorithm: Option<String>,
    /// Most recently seen baseline bpm in the batch.
    pub baseline_bpm: Option<i64>,
    /// Maximum scored risk over the contents.
    pub maximum_risk: Option<RiskLevel>,
    pub range_from: DateTime<Utc>,
    pub range_until: DateTime<Utc>,
    pub memo: String,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
}

/// One scored interval of a diagnosis.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DiagnosisContent {
    pub id: ContentId,
    pub diagnosis_id: DiagnosisId,
    pub risk: Option<RiskLevel>,
    pub range_from: DateTime<Utc>,
    pub range_until: DateTime<Utc>,
    pub parameters: Parameters,
    pub memo: String,
}

/// A coalesced entry of a measurement's event timeline.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ComputedEvent {
    pub id: ComputedEventId,
    pub measurement_id: MeasurementId,
    pub risk: Option<RiskLevel>,
    pub parameters: Parameters,
    pub range_from: DateTime<Utc>,
    pub range_until: DateTime<Utc>,
    pub is_hidden: bool,
    pub is_suspended: bool,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
}

impl ComputedEvent {
    /// A fresh, visible, active timeline entry built from a scored content.
    pub fn from_content(
        measurement_id: MeasurementId,
        content: &DiagnosisContent,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: ComputedEventId::default(),
            measurement_id,
            risk: content.risk,
            parameters: content.parameters.clone(),
            range_from: content.range_from,
            range_until: content.range_until,
            is_hidden: false,
            is_suspended: false,
            created_at: now,
            modified_at: now,
        }
    }
}

/// A clinician-authored observation.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AnnotatedEvent {
    pub id: AnnotatedEventId,
    pub measurement_id: MeasurementId,
    pub clinician_id: Option<ClinicianId>,
    /// Timeline entry this annotation comments on, if any.
    pub computed_event_id: Option<ComputedEventId>,
    pub risk: RiskLevel,
    pub memo: String,
    pub range_from: DateTime<Utc>,
    pub range_until: DateTime<Utc>,
    pub is_closed: bool,
    pub closing_memo: Option<String>,
    pub closed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
}

/// A silence window during which a measurement's alerts are suppressed.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MeasurementAlert {
    pub id: AlertId,
    pub measurement_id: MeasurementId,
    pub silent_from: DateTime<Utc>,
    pub silent_until: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
}

impl MeasurementAlert {
    /// Inclusive on both ends.
    pub fn covers(&self, t: DateTime<Utc>) -> bool {
        self.silent_from <= t && t <= self.silent_until
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn t(min: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2021, 12, 1, 16, 0, 0).unwrap() + Duration::minutes(min)
    }

    #[test]
    fn test_observe_widens_range() {
        let mut m = Measurement::new(HospitalId(1), "2112011616", t(0));
        m.observe(t(5));
        m.observe(t(2));
        m.observe(t(9));
        assert_eq!(m.first_time, Some(t(2)));
        assert_eq!(m.last_time, Some(t(9)));
    }

    #[test]
    fn test_silence_window_is_inclusive() {
        let alert = MeasurementAlert {
            id: AlertId(1),
            measurement_id: MeasurementId(1),
            silent_from: t(0),
            silent_until: t(5),
            created_at: t(0),
            modified_at: t(0),
        };
        assert!(alert.covers(t(0)));
        assert!(alert.covers(t(5)));
        assert!(!alert.covers(t(6)));
        assert!(!alert.covers(t(-1)));
    }

    #[test]
    fn id_display() {
        assert_eq!(MeasurementId(42).to_string(), "#42");
    }
}
