//! Storage seams.
//!
//! [`Store`] is the relational side: transactional access to measurements,
//! diagnoses and the event timeline, plus the per-measurement row lock the
//! timeline merge needs. [`SeriesStore`] holds the raw sample channels.
//!
//! Both come with in-memory implementations used by the CLI and tests.

mod memory;
mod series;

pub use memory::{MemoryStore, Tables};
pub use series::{MemorySeries, SeriesRecord};

use chrono::{DateTime, Utc};

use ctgwatch_types::{
    AnnotatedEvent, AnnotatedEventId, Channel, ComputedEvent, ComputedEventId, Diagnosis,
    DiagnosisContent, DiagnosisId, HospitalId, Measurement, MeasurementAlert, MeasurementId,
    Sample,
};

use crate::error::StoreError;

/// A relational store.
pub trait Store: Send + Sync {
    /// Start a transaction. Dropping it without [`Transaction::commit`]
    /// discards its writes.
    fn begin(&self) -> Result<Box<dyn Transaction + '_>, StoreError>;
}

/// One unit of work against a [`Store`].
///
/// Reads observe the transaction's own uncommitted writes.
pub trait Transaction {
    /// Lock the measurement row until the transaction ends and return it.
    fn lock_measurement(&mut self, id: MeasurementId) -> Result<Measurement, StoreError>;

    /// Lock a hospital's measurement code until the transaction ends and
    /// return the measurement holding it, if any. Serializes the
    /// find-or-create of measurements by code.
    fn lock_code(
        &mut self,
        hospital: HospitalId,
        code: &str,
    ) -> Result<Option<Measurement>, StoreError>;

    fn measurement(&self, id: MeasurementId) -> Result<Option<Measurement>, StoreError>;
    fn measurements(&self) -> Result<Vec<Measurement>, StoreError>;
    fn insert_measurement(&mut self, measurement: Measurement) -> Result<Measurement, StoreError>;
    fn update_measurement(&mut self, measurement: &Measurement) -> Result<(), StoreError>;

    fn diagnosis(&self, id: DiagnosisId) -> Result<Option<Diagnosis>, StoreError>;
    /// Diagnoses of a measurement, newest `range_until` first.
    fn diagnoses(&self, measurement: MeasurementId) -> Result<Vec<Diagnosis>, StoreError>;
    fn insert_diagnosis(&mut self, diagnosis: Diagnosis) -> Result<Diagnosis, StoreError>;
    fn update_diagnosis(&mut self, diagnosis: &Diagnosis) -> Result<(), StoreError>;

    fn contents(&self, diagnosis: DiagnosisId) -> Result<Vec<DiagnosisContent>, StoreError>;
    /// Contents of a measurement ending strictly before `before`, latest
    /// `range_until` first.
    fn contents_before(
        &self,
        measurement: MeasurementId,
        before: DateTime<Utc>,
    ) -> Result<Vec<DiagnosisContent>, StoreError>;
    fn insert_content(&mut self, content: DiagnosisContent)
        -> Result<DiagnosisContent, StoreError>;

    fn computed_event(&self, id: ComputedEventId) -> Result<Option<ComputedEvent>, StoreError>;
    /// Timeline of a measurement ordered by `range_from`.
    fn computed_events(&self, measurement: MeasurementId)
        -> Result<Vec<ComputedEvent>, StoreError>;
    fn insert_computed_event(&mut self, event: ComputedEvent)
        -> Result<ComputedEvent, StoreError>;
    fn update_computed_event(&mut self, event: &ComputedEvent) -> Result<(), StoreError>;

    fn annotated_event(&self, id: AnnotatedEventId) -> Result<Option<AnnotatedEvent>, StoreError>;
    fn annotated_events(&self, measurement: MeasurementId)
        -> Result<Vec<AnnotatedEvent>, StoreError>;
    /// Annotations linked to a computed event.
    fn annotations_of(&self, event: ComputedEventId) -> Result<Vec<AnnotatedEvent>, StoreError>;
    fn insert_annotated_event(
        &mut self,
        event: AnnotatedEvent,
    ) -> Result<AnnotatedEvent, StoreError>;
    fn update_annotated_event(&mut self, event: &AnnotatedEvent) -> Result<(), StoreError>;
    fn delete_annotated_event(&mut self, id: AnnotatedEventId) -> Result<(), StoreError>;

    fn alerts(&self, measurement: MeasurementId) -> Result<Vec<MeasurementAlert>, StoreError>;
    fn insert_alert(&mut self, alert: MeasurementAlert) -> Result<MeasurementAlert, StoreError>;
    fn update_alert(&mut self, alert: &MeasurementAlert) -> Result<(), StoreError>;

    fn commit(self: Box<Self>) -> Result<(), StoreError>;
}

/// A time-series store for the sample channels.
pub trait SeriesStore: Send + Sync {
    /// Write samples; a sample at an existing timestamp replaces it.
    fn insert(
        &self,
        measurement: MeasurementId,
        channel: Channel,
        samples: &[Sample],
    ) -> Result<(), StoreError>;

    /// Samples with `from <= observed_at <= until`, oldest first.
    fn range(
        &self,
        measurement: MeasurementId,
        channel: Channel,
        from: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<Sample>, StoreError>;
}
