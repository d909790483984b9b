//! One scheduled assessment run.
//!
//! Collects the measurements due for assessment, runs the external
//! executable over each under the worker pool, and registers every result
//! as an algorithm diagnosis merged into the measurement's timeline.

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use ctgwatch_adapters::assessment::{
    has_enough_data, trim_cutoff, AssessmentInput, AssessmentItem, AssessmentRunner,
};
use ctgwatch_core::compose::register_diagnosis;
use ctgwatch_core::measurement::collect_for_assessment;
use ctgwatch_core::store::{SeriesStore, Store};
use ctgwatch_core::{Author, ContentItem, CoreError, DiagnosisRequest, RegisteredDiagnosis};
use ctgwatch_types::MeasurementId;

use crate::config::AssessmentConfig;

/// Outcome of an assessment run.
#[derive(Debug, Default)]
pub struct AssessmentReport {
    pub registered: Vec<RegisteredDiagnosis>,
    /// Measurements without enough samples in the window.
    pub insufficient: Vec<MeasurementId>,
    /// Measurements for which the executable reported nothing usable.
    pub empty: Vec<MeasurementId>,
    pub failed: Vec<(MeasurementId, CoreError)>,
}

impl AssessmentReport {
    pub fn attempted(&self) -> usize {
        self.registered.len() + self.empty.len() + self.failed.len()
    }
}

fn content_item(item: AssessmentItem) -> ContentItem {
    ContentItem {
        range_from: item.range_from,
        range_until: item.range_until,
        parameters: item.parameters,
        memo: String::new(),
    }
}

/// Run one assessment pass at `now`.
///
/// Per-measurement failures are collected in the report; only a failure to
/// read the store aborts the run.
pub async fn run_assessment(
    store: &dyn Store,
    series: &dyn SeriesStore,
    config: &AssessmentConfig,
    runner: &AssessmentRunner,
    now: DateTime<Utc>,
) -> Result<AssessmentReport, CoreError> {
    let window = config.window(now);
    let mut report = AssessmentReport::default();

    let mut inputs = Vec::new();
    for candidate in collect_for_assessment(store, series, &window)? {
        let id = candidate.measurement.id;
        if !has_enough_data(candidate.heart_rates.len(), window.seconds(), config.minimum_data_ratio)
            || !has_enough_data(candidate.tocos.len(), window.seconds(), config.minimum_data_ratio)
        {
            info!(
                measurement = %id,
                heart_rates = candidate.heart_rates.len(),
                tocos = candidate.tocos.len(),
                "Not enough data to assess"
            );
            report.insufficient.push(id);
            continue;
        }
        inputs.push(AssessmentInput {
            measurement_id: id,
            heart_rates: candidate.heart_rates,
            tocos: candidate.tocos,
            baseline_bpm: candidate.baseline_bpm,
        });
    }

    debug!(inputs = inputs.len(), "Starting assessment");
    let cutoff = chrono::Duration::from_std(config.cutoff).unwrap_or_else(|_| chrono::Duration::zero());

    for (id, result) in runner.run_all(inputs, now).await {
        let items = match result {
            Ok(items) => trim_cutoff(items, window.from, window.until, cutoff),
            Err(e) => {
                warn!(measurement = %id, error = %e, "Assessment failed");
                report.failed.push((id, e.into()));
                continue;
            }
        };
        if items.is_empty() {
            debug!(measurement = %id, "Assessment produced no events");
            report.empty.push(id);
            continue;
        }

        let request = DiagnosisRequest {
            measurement_id: id,
            author: Author::Algorithm(config.algorithm_id()),
            memo: String::new(),
            items: items.into_iter().map(content_item).collect(),
        };
        match register_diagnosis(store, request, now) {
            Ok(registered) => report.registered.push(registered),
            Err(e) => {
                warn!(measurement = %id, error = %e, "Failed to register assessment");
                report.failed.push((id, e));
            }
        }
    }

    info!(
        registered = report.registered.len(),
        insufficient = report.insufficient.len(),
        empty = report.empty.len(),
        failed = report.failed.len(),
        "Assessment finished"
    );
    Ok(report)
}
