//! # ctgwatch-core
//!
//! The signal-to-alert engine for cardiotocography (CTG) monitoring.
//!
//! Diagnosis batches, submitted by clinicians or produced by an assessment
//! algorithm, are classified into CTG events, scored against the clinical
//! risk table, and folded into each measurement's event timeline. Alerting
//! events surface through [`AlertWorkflow`] until a clinician annotates,
//! suspends or silences them.
//!
//! ## Quick Start
//!
//! ```rust
//! use chrono::{TimeZone, Utc};
//! use ctgwatch_core::compose::{register_diagnosis, Author, ContentItem, DiagnosisRequest};
//! use ctgwatch_core::store::{MemoryStore, Store};
//! use ctgwatch_types::{ClinicianId, HospitalId, Measurement, Parameters};
//!
//! let store = MemoryStore::new();
//! let now = Utc.with_ymd_and_hms(2021, 12, 1, 16, 30, 0).unwrap();
//!
//! let mut tx = store.begin()?;
//! let measurement = tx.insert_measurement(Measurement::new(HospitalId(1), "TRC-P01", now))?;
//! tx.commit()?;
//!
//! let registered = register_diagnosis(
//!     &store,
//!     DiagnosisRequest {
//!         measurement_id: measurement.id,
//!         author: Author::Clinician(ClinicianId(1)),
//!         memo: String::new(),
//!         items: vec![ContentItem {
//!             range_from: now - chrono::Duration::minutes(10),
//!             range_until: now,
//!             parameters: Parameters::new()
//!                 .with("Baseline-NORMAL", 140)
//!                 .with("BaselineVariability-NORMAL", 10),
//!             memo: String::new(),
//!         }],
//!     },
//!     now,
//! )?;
//! assert_eq!(registered.diagnosis.maximum_risk.map(|r| r.get()), Some(1));
//! # Ok::<(), ctgwatch_core::CoreError>(())
//! ```
//!
//! ## Concurrency
//!
//! Every mutation of a measurement's timeline runs inside one store
//! transaction holding that measurement's row lock, so concurrent
//! diagnosis batches and clinician actions on one measurement serialize
//! while different measurements proceed in parallel.

mod error;

pub mod alert;
pub mod classify;
pub mod compose;
pub mod measurement;
pub mod risk;
pub mod settings;
pub mod store;
pub mod timeline;

pub use alert::{AlertWorkflow, NewAnnotation};
pub use compose::{Author, ContentItem, DiagnosisRequest, RegisteredDiagnosis};
pub use error::{CoreError, ErrorKind, Result, StoreError};
pub use settings::AlertSettings;
pub use timeline::MergeSummary;
