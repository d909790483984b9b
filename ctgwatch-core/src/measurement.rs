//! Measurement lifecycle: sample ingestion, closing, and selection of
//! measurements due for an automated assessment.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use ctgwatch_adapters::TrcData;
use ctgwatch_types::{Channel, HospitalId, Measurement, MeasurementId, Sample};

use crate::error::{CoreError, Result};
use crate::settings::chrono_duration;
use crate::store::{SeriesStore, Store};

/// Prefix of measurement codes created from TRC exports.
pub const TRC_CODE_PREFIX: &str = "TRC";

/// What to do when a measurement with the same code already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OnExisting {
    /// Write into the existing measurement. Samples at timestamps already
    /// stored replace the old readings.
    #[default]
    Merge,
    /// Refuse with a conflict.
    Abort,
}

/// Write channel samples for the measurement coded `code`, creating the
/// measurement if the hospital has none with that code.
///
/// Zero readings are dropped on channels where zero means no signal.
pub fn record_samples(
    store: &dyn Store,
    series: &dyn SeriesStore,
    hospital: HospitalId,
    code: &str,
    channels: &[(Channel, Vec<Sample>)],
    on_existing: OnExisting,
    now: DateTime<Utc>,
) -> Result<Measurement> {
    let mut tx = store.begin()?;

    let mut measurement = match tx.lock_code(hospital, code)? {
        Some(_) if on_existing == OnExisting::Abort => {
            return Err(CoreError::Conflict(format!(
                "Measurement code '{}' already exists in hospital {}",
                code, hospital
            )));
        }
        Some(m) => tx.lock_measurement(m.id)?,
        None => tx.insert_measurement(Measurement::new(hospital, code, now))?,
    };

    let mut kept = Vec::with_capacity(channels.len());
    for (channel, samples) in channels {
        for s in samples {
            measurement.observe(s.observed_at);
        }
        let values: Vec<Sample> = samples
            .iter()
            .filter(|s| !(channel.zero_is_missing() && s.value == 0))
            .copied()
            .collect();
        kept.push((*channel, values));
    }

    tx.update_measurement(&measurement)?;
    tx.commit()?;

    let mut written = 0;
    for (channel, samples) in &kept {
        series.insert(measurement.id, *channel, samples)?;
        written += samples.len();
    }

    debug!(
        measurement = %measurement.id,
        code = %measurement.code,
        samples = written,
        "Recorded samples"
    );
    Ok(measurement)
}

/// Store a decoded TRC recording under the code `TRC-<patient id>`.
pub fn ingest_trc(
    store: &dyn Store,
    series: &dyn SeriesStore,
    hospital: HospitalId,
    data: &TrcData,
    on_existing: OnExisting,
    now: DateTime<Utc>,
) -> Result<Measurement> {
    let code = format!("{}-{}", TRC_CODE_PREFIX, data.patient_id);
    let channels: Vec<_> = Channel::ALL
        .into_iter()
        .map(|c| (c, data.samples(c).collect()))
        .collect();

    let measurement = record_samples(store, series, hospital, &code, &channels, on_existing, now)?;
    info!(
        measurement = %measurement.id,
        code = %code,
        samples = data.len(),
        "Imported TRC recording"
    );
    Ok(measurement)
}

/// Mark a measurement finished. Closing twice is a conflict.
pub fn close_measurement(
    store: &dyn Store,
    id: MeasurementId,
    memo: impl Into<String>,
    now: DateTime<Utc>,
) -> Result<Measurement> {
    let mut tx = store.begin()?;
    let mut measurement = tx.lock_measurement(id)?;
    if measurement.is_closed {
        return Err(CoreError::Conflict(format!("Measurement {} is already closed", id)));
    }

    measurement.is_closed = true;
    measurement.closing_memo = Some(memo.into());
    measurement.closed_at = Some(now);
    tx.update_measurement(&measurement)?;
    tx.commit()?;
    Ok(measurement)
}

/// The data window of one assessment run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AssessmentWindow {
    pub diagnosis_time: DateTime<Utc>,
    /// Start of the sample window, including the leading cutoff.
    pub from: DateTime<Utc>,
    /// End of the sample window, including the trailing cutoff.
    pub until: DateTime<Utc>,
    /// Minimum spacing between two assessments of one measurement.
    pub interval: chrono::Duration,
}

impl AssessmentWindow {
    /// The window ending `delay` before `diagnosis_time` and spanning
    /// `duration` plus a `cutoff` margin on either side.
    pub fn new(
        diagnosis_time: DateTime<Utc>,
        duration: Duration,
        cutoff: Duration,
        delay: Duration,
        interval: Duration,
    ) -> Self {
        let until = diagnosis_time - chrono_duration(delay);
        let from = until - chrono_duration(duration) - chrono_duration(cutoff) * 2;
        Self {
            diagnosis_time,
            from,
            until,
            interval: chrono_duration(interval),
        }
    }

    pub fn seconds(&self) -> i64 {
        (self.until - self.from).num_seconds()
    }
}

/// A measurement due for assessment with its samples over the window.
#[derive(Debug, Clone, PartialEq)]
pub struct AssessmentCandidate {
    pub measurement: Measurement,
    /// Baseline bpm of the latest diagnosis, if any.
    pub baseline_bpm: Option<i64>,
    pub heart_rates: Vec<Sample>,
    pub tocos: Vec<Sample>,
}

/// Open measurements whose recording covers the window start and that
/// have not been diagnosed within the last interval.
pub fn collect_for_assessment(
    store: &dyn Store,
    series: &dyn SeriesStore,
    window: &AssessmentWindow,
) -> Result<Vec<AssessmentCandidate>> {
    let tx = store.begin()?;
    let recent = window.diagnosis_time - window.interval;

    let mut candidates = Vec::new();
    for m in tx.measurements()? {
        if m.is_closed {
            continue;
        }
        let (Some(first), Some(last)) = (m.first_time, m.last_time) else {
            continue;
        };
        if !(first <= window.from && window.from <= last) {
            continue;
        }

        let latest = tx.diagnoses(m.id)?.into_iter().next();
        if let Some(d) = &latest {
            if d.range_until > recent || d.range_until >= last {
                continue;
            }
        }

        let heart_rates = series.range(m.id, Channel::HeartRate, window.from, window.until)?;
        let tocos = series.range(m.id, Channel::UterineActivity, window.from, window.until)?;
        candidates.push(AssessmentCandidate {
            baseline_bpm: latest.and_then(|d| d.baseline_bpm),
            measurement: m,
            heart_rates,
            tocos,
        });
    }

    debug!(
        from = %window.from,
        until = %window.until,
        candidates = candidates.len(),
        "Collected measurements for assessment"
    );
    Ok(candidates)
}
