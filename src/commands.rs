//! CLI subcommands.
//!
//! Every command runs against the JSON state file; commands that change
//! state write it back only when they succeed. Results are printed to
//! stdout as JSON.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use clap::{ArgAction, Subcommand};
use serde::Serialize;
use serde_json::json;

use ctgwatch_adapters::trc;
use ctgwatch_core::compose::{register_diagnosis, update_diagnosis_memo};
use ctgwatch_core::measurement::{close_measurement, ingest_trc, OnExisting};
use ctgwatch_core::timeline::{annotated_events_in_range, computed_event, computed_events_in_range};
use ctgwatch_core::{
    AlertSettings, AlertWorkflow, Author, ContentItem, DiagnosisRequest, NewAnnotation,
};
use ctgwatch_types::{
    AnnotatedEventId, ClinicianId, ComputedEventId, DiagnosisId, HospitalId, MeasurementId,
    RiskLevel,
};

use crate::assess::run_assessment;
use crate::config::Settings;
use crate::duration::format_duration;
use crate::state::State;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Decode a TRC file and print its summary
    Decode {
        file: PathBuf,
    },

    /// Import a TRC file as a measurement
    Import {
        file: PathBuf,
        #[arg(long)]
        hospital: u64,
        /// Fail if the hospital already has a measurement for this patient
        #[arg(long)]
        abort_if_exists: bool,
    },

    /// Close a measurement
    Close {
        #[arg(long)]
        measurement: u64,
        #[arg(long, default_value = "")]
        memo: String,
    },

    /// Register a diagnosis from a JSON array of items
    Diagnose {
        #[arg(long)]
        measurement: u64,
        /// JSON file of `{range_from, range_until, parameters, memo}` items
        #[arg(long)]
        items: PathBuf,
        #[arg(long)]
        clinician: u64,
        #[arg(long, default_value = "")]
        memo: String,
    },

    /// Replace a diagnosis memo
    Memo {
        #[arg(long)]
        diagnosis: u64,
        memo: String,
    },

    /// Run the assessment executable over measurements that are due
    Assess,

    /// Annotate a measurement or one of its computed events
    Annotate {
        #[arg(long)]
        measurement: u64,
        #[arg(long)]
        risk: u8,
        #[arg(long, value_parser = parse_time)]
        from: DateTime<Utc>,
        #[arg(long, value_parser = parse_time)]
        until: DateTime<Utc>,
        #[arg(long)]
        event: Option<u64>,
        #[arg(long)]
        clinician: Option<u64>,
        #[arg(long, default_value = "")]
        memo: String,
    },

    /// Change an annotation's risk and memo
    UpdateAnnotation {
        id: u64,
        #[arg(long)]
        risk: u8,
        #[arg(long, default_value = "")]
        memo: String,
        #[arg(long)]
        clinician: Option<u64>,
    },

    DeleteAnnotation {
        id: u64,
    },

    CloseAnnotation {
        id: u64,
        #[arg(long, default_value = "")]
        memo: String,
    },

    /// Silence a measurement's alerts, or end or inspect the silence
    Silence {
        #[arg(long)]
        measurement: u64,
        #[arg(long, conflicts_with = "status")]
        end: bool,
        #[arg(long)]
        status: bool,
    },

    /// Remove a computed event from the unread feed for good
    Suspend {
        event: u64,
    },

    /// Show or hide a computed event
    Visibility {
        event: u64,
        #[arg(long, action = ArgAction::Set)]
        visible: bool,
    },

    /// Unread alerting events of a hospital
    Unread {
        #[arg(long)]
        hospital: u64,
        /// Last event already shown to the client
        #[arg(long)]
        seen: Option<u64>,
    },

    /// Latest open annotations of the given measurements
    Alerts {
        #[arg(long, value_delimiter = ',', required = true)]
        measurements: Vec<u64>,
    },

    /// Alerting annotations of a hospital
    AnnotationAlerts {
        #[arg(long)]
        hospital: u64,
    },

    /// Computed events and annotations of a measurement
    Timeline {
        #[arg(long)]
        measurement: u64,
        #[arg(long, value_parser = parse_time)]
        from: Option<DateTime<Utc>>,
        #[arg(long, value_parser = parse_time)]
        until: Option<DateTime<Utc>>,
        #[arg(long)]
        include_hidden: bool,
    },

    /// A single computed event
    Event {
        id: u64,
        #[arg(long)]
        include_hidden: bool,
    },

    /// Print the effective configuration
    Config,
}

/// Parse an RFC 3339 timestamp or a compact UTC `YYYYMMDDhhmmss`.
pub fn parse_time(s: &str) -> Result<DateTime<Utc>, String> {
    if let Ok(t) = DateTime::parse_from_rfc3339(s) {
        return Ok(t.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(s, "%Y%m%d%H%M%S")
        .map(|t| t.and_utc())
        .map_err(|_| format!("Expected RFC 3339 or YYYYMMDDhhmmss, got '{}'", s))
}

fn risk_level(value: u8) -> Result<RiskLevel> {
    match RiskLevel::new(i64::from(value)) {
        Some(risk) => Ok(risk),
        None => bail!("Risk must be between 1 and 5, got {}", value),
    }
}

fn print<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Run one command.
pub fn run(command: Command, settings: &Settings, state_path: &Path, now: DateTime<Utc>) -> Result<()> {
    match command {
        Command::Decode { file } => decode(&file),
        Command::Config => print(settings),
        command => {
            let state = State::load(state_path)?;
            let changed = execute(command, settings, &state, now)?;
            if changed {
                state.save()?;
            }
            Ok(())
        }
    }
}

fn decode(file: &Path) -> Result<()> {
    let data = trc::decode_file(file).with_context(|| format!("Failed to decode {}", file.display()))?;
    print(&json!({
        "format": format!("{:?}", data.format),
        "patient_id": data.patient_id,
        "start_time": data.start_time,
        "sampling_interval": format_duration(data.sampling_interval),
        "samples": data.len(),
    }))
}

/// Returns whether the state changed.
fn execute(command: Command, settings: &Settings, state: &State, now: DateTime<Utc>) -> Result<bool> {
    let store = &state.store;
    let alert_settings = AlertSettings::from(&settings.alert);
    let workflow = AlertWorkflow::new(store, &alert_settings);

    match command {
        Command::Decode { .. } | Command::Config => Ok(false),

        Command::Import {
            file,
            hospital,
            abort_if_exists,
        } => {
            let data = trc::decode_file(&file)
                .with_context(|| format!("Failed to decode {}", file.display()))?;
            let on_existing = if abort_if_exists {
                OnExisting::Abort
            } else {
                OnExisting::Merge
            };
            let measurement = ingest_trc(store, &state.series, HospitalId(hospital), &data, on_existing, now)?;
            print(&measurement)?;
            Ok(true)
        }

        Command::Close { measurement, memo } => {
            print(&close_measurement(store, MeasurementId(measurement), memo, now)?)?;
            Ok(true)
        }

        Command::Diagnose {
            measurement,
            items,
            clinician,
            memo,
        } => {
            let content = std::fs::read_to_string(&items)
                .with_context(|| format!("Failed to read {}", items.display()))?;
            let items: Vec<ContentItem> = serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse {}", items.display()))?;

            let registered = register_diagnosis(
                store,
                DiagnosisRequest {
                    measurement_id: MeasurementId(measurement),
                    author: Author::Clinician(ClinicianId(clinician)),
                    memo,
                    items,
                },
                now,
            )?;
            print(&json!({
                "diagnosis": registered.diagnosis,
                "contents": registered.contents,
                "timeline": {
                    "dropped": registered.merge.dropped,
                    "merged": registered.merge.merged,
                    "inserted": registered.merge.inserted,
                },
            }))?;
            Ok(true)
        }

        Command::Memo { diagnosis, memo } => {
            print(&update_diagnosis_memo(store, DiagnosisId(diagnosis), memo, now)?)?;
            Ok(true)
        }

        Command::Assess => {
            let runtime = tokio::runtime::Runtime::new()?;
            let runner = settings.assessment.runner();
            let report = runtime.block_on(run_assessment(
                store,
                &state.series,
                &settings.assessment,
                &runner,
                now,
            ))?;

            print(&json!({
                "registered": report
                    .registered
                    .iter()
                    .map(|r| json!({
                        "measurement_id": r.diagnosis.measurement_id,
                        "diagnosis_id": r.diagnosis.id,
                        "maximum_risk": r.diagnosis.maximum_risk,
                    }))
                    .collect::<Vec<_>>(),
                "insufficient": report.insufficient,
                "empty": report.empty,
                "failed": report
                    .failed
                    .iter()
                    .map(|(id, e)| json!({ "measurement_id": id, "error": e.to_string() }))
                    .collect::<Vec<_>>(),
            }))?;
            Ok(!report.registered.is_empty())
        }

        Command::Annotate {
            measurement,
            risk,
            from,
            until,
            event,
            clinician,
            memo,
        } => {
            let annotation = workflow.register_annotation(
                NewAnnotation {
                    measurement_id: MeasurementId(measurement),
                    clinician_id: clinician.map(ClinicianId),
                    computed_event_id: event.map(ComputedEventId),
                    risk: risk_level(risk)?,
                    memo,
                    range_from: from,
                    range_until: until,
                },
                now,
            )?;
            print(&annotation)?;
            Ok(true)
        }

        Command::UpdateAnnotation {
            id,
            risk,
            memo,
            clinician,
        } => {
            let annotation = workflow.update_annotation(
                AnnotatedEventId(id),
                clinician.map(ClinicianId),
                risk_level(risk)?,
                memo,
                now,
            )?;
            print(&annotation)?;
            Ok(true)
        }

        Command::DeleteAnnotation { id } => {
            workflow.delete_annotation(AnnotatedEventId(id))?;
            print(&json!({ "deleted": id }))?;
            Ok(true)
        }

        Command::CloseAnnotation { id, memo } => {
            print(&workflow.close_annotation(AnnotatedEventId(id), memo, now)?)?;
            Ok(true)
        }

        Command::Silence {
            measurement,
            end,
            status,
        } => {
            let id = MeasurementId(measurement);
            if status {
                print(&workflow.silence_state(id, now)?)?;
                Ok(false)
            } else if end {
                let ended = workflow.end_silence(id, now)?;
                print(&json!({ "ended": ended }))?;
                Ok(ended > 0)
            } else {
                print(&workflow.silence(id, now)?)?;
                Ok(true)
            }
        }

        Command::Suspend { event } => {
            print(&workflow.suspend(ComputedEventId(event), now)?)?;
            Ok(true)
        }

        Command::Visibility { event, visible } => {
            print(&workflow.set_visibility(ComputedEventId(event), visible, now)?)?;
            Ok(true)
        }

        Command::Unread { hospital, seen } => {
            print(&workflow.unread(HospitalId(hospital), seen.map(ComputedEventId), now)?)?;
            Ok(false)
        }

        Command::Alerts { measurements } => {
            let ids: Vec<_> = measurements.into_iter().map(MeasurementId).collect();
            print(&workflow.alerts_for(&ids, now)?)?;
            Ok(false)
        }

        Command::AnnotationAlerts { hospital } => {
            print(&workflow.annotation_alerts(HospitalId(hospital), now)?)?;
            Ok(false)
        }

        Command::Timeline {
            measurement,
            from,
            until,
            include_hidden,
        } => {
            let id = MeasurementId(measurement);
            let from = from.unwrap_or(DateTime::<Utc>::MIN_UTC);
            let until = until.unwrap_or(DateTime::<Utc>::MAX_UTC);
            print(&json!({
                "computed_events": computed_events_in_range(store, id, from, until, include_hidden)?,
                "annotated_events": annotated_events_in_range(store, id, from, until)?,
            }))?;
            Ok(false)
        }

        Command::Event { id, include_hidden } => {
            print(&computed_event(store, ComputedEventId(id), include_hidden)?)?;
            Ok(false)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_parse_time() {
        let expected = Utc.with_ymd_and_hms(2021, 12, 1, 16, 30, 0).unwrap();
        assert_eq!(parse_time("20211201163000").unwrap(), expected);
        assert_eq!(parse_time("2021-12-01T16:30:00Z").unwrap(), expected);
        assert_eq!(parse_time("2021-12-02T01:30:00+09:00").unwrap(), expected);
        assert!(parse_time("yesterday").is_err());
    }

    #[test]
    fn test_risk_level() {
        assert_eq!(risk_level(3).unwrap().get(), 3);
        assert!(risk_level(0).is_err());
        assert!(risk_level(6).is_err());
    }

    #[test]
    fn test_mutations_persist_and_failures_do_not() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        let settings = Settings::default();
        let now = Utc.with_ymd_and_hms(2021, 12, 1, 16, 30, 0).unwrap();

        let err = run(
            Command::Close {
                measurement: 1,
                memo: String::new(),
            },
            &settings,
            &path,
            now,
        );
        assert!(err.is_err());
        assert!(!path.exists());

        run(Command::Unread { hospital: 1, seen: None }, &settings, &path, now).unwrap();
        assert!(!path.exists());
    }
}
