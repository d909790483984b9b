//! In-memory relational store.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use lock_api::ArcMutexGuard;
use parking_lot::{Mutex, RawMutex, RwLock};
use serde::{Deserialize, Serialize};

use ctgwatch_types::{
    AlertId, AnnotatedEvent, AnnotatedEventId, ComputedEvent, ComputedEventId, ContentId,
    Diagnosis, DiagnosisContent, DiagnosisId, HospitalId, Measurement, MeasurementAlert,
    MeasurementId,
};

use super::{Store, Transaction};
use crate::error::StoreError;

/// All rows of a [`MemoryStore`], keyed by id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Tables {
    pub measurements: BTreeMap<u64, Measurement>,
    pub diagnoses: BTreeMap<u64, Diagnosis>,
    pub contents: BTreeMap<u64, DiagnosisContent>,
    pub computed_events: BTreeMap<u64, ComputedEvent>,
    pub annotated_events: BTreeMap<u64, AnnotatedEvent>,
    pub alerts: BTreeMap<u64, MeasurementAlert>,
    /// Last id handed out.
    #[serde(default)]
    pub last_id: u64,
}

impl Tables {
    fn max_id(&self) -> u64 {
        [
            self.measurements.keys().next_back(),
            self.diagnoses.keys().next_back(),
            self.contents.keys().next_back(),
            self.computed_events.keys().next_back(),
            self.annotated_events.keys().next_back(),
            self.alerts.keys().next_back(),
        ]
        .into_iter()
        .flatten()
        .copied()
        .max()
        .unwrap_or(0)
    }
}

/// Named locks, created on first use.
#[derive(Debug)]
struct RowLocks<K> {
    locks: RwLock<BTreeMap<K, Arc<Mutex<()>>>>,
}

impl<K> Default for RowLocks<K> {
    fn default() -> Self {
        Self {
            locks: RwLock::new(BTreeMap::new()),
        }
    }
}

impl<K: Ord + Clone> RowLocks<K> {
    fn get_or_create(&self, key: &K) -> Arc<Mutex<()>> {
        // Fast path
        {
            let locks = self.locks.read();
            if let Some(lock) = locks.get(key) {
                return lock.clone();
            }
        }

        // Slow path
        let mut locks = self.locks.write();
        locks.entry(key.clone()).or_default().clone()
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.locks.read().len()
    }
}

/// A [`Store`] holding every table in memory.
///
/// Transactions buffer their writes and publish them atomically on commit.
/// Row locks taken with [`Transaction::lock_measurement`] are held until the
/// transaction commits or is dropped.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
    last_id: AtomicU64,
    locks: RowLocks<MeasurementId>,
    codes: RowLocks<(HospitalId, String)>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Restore a store from previously exported tables.
    pub fn from_tables(tables: Tables) -> Self {
        let last_id = tables.last_id.max(tables.max_id());
        Self {
            tables: RwLock::new(tables),
            last_id: AtomicU64::new(last_id),
            locks: RowLocks::default(),
            codes: RowLocks::default(),
        }
    }

    /// Copy of all committed rows.
    pub fn snapshot(&self) -> Tables {
        let mut tables = self.tables.read().clone();
        tables.last_id = self.last_id.load(Ordering::SeqCst);
        tables
    }

    fn next_id(&self) -> u64 {
        self.last_id.fetch_add(1, Ordering::SeqCst) + 1
    }
}

impl Store for MemoryStore {
    fn begin(&self) -> Result<Box<dyn Transaction + '_>, StoreError> {
        Ok(Box::new(MemoryTransaction {
            store: self,
            measurements: Overlay::default(),
            diagnoses: Overlay::default(),
            contents: Overlay::default(),
            computed_events: Overlay::default(),
            annotated_events: Overlay::default(),
            alerts: Overlay::default(),
            locked: BTreeSet::new(),
            locked_codes: BTreeSet::new(),
            guards: Vec::new(),
        }))
    }
}

/// Uncommitted writes to one table. `None` marks a deletion.
struct Overlay<T> {
    rows: BTreeMap<u64, Option<T>>,
}

impl<T> Default for Overlay<T> {
    fn default() -> Self {
        Self {
            rows: BTreeMap::new(),
        }
    }
}

impl<T: Clone> Overlay<T> {
    fn get(&self, base: &BTreeMap<u64, T>, id: u64) -> Option<T> {
        match self.rows.get(&id) {
            Some(row) => row.clone(),
            None => base.get(&id).cloned(),
        }
    }

    fn exists(&self, base: &BTreeMap<u64, T>, id: u64) -> bool {
        match self.rows.get(&id) {
            Some(row) => row.is_some(),
            None => base.contains_key(&id),
        }
    }

    /// Merged rows matching `pred`, in id order.
    fn select(&self, base: &BTreeMap<u64, T>, mut pred: impl FnMut(&T) -> bool) -> Vec<T> {
        let mut merged: BTreeMap<u64, &T> = base
            .iter()
            .filter(|(id, _)| !self.rows.contains_key(id))
            .map(|(id, row)| (*id, row))
            .collect();
        for (id, row) in &self.rows {
            if let Some(row) = row {
                merged.insert(*id, row);
            }
        }
        merged
            .into_values()
            .filter(|row| pred(row))
            .cloned()
            .collect()
    }

    fn put(&mut self, id: u64, row: T) {
        self.rows.insert(id, Some(row));
    }

    fn delete(&mut self, id: u64) {
        self.rows.insert(id, None);
    }

    fn apply(self, base: &mut BTreeMap<u64, T>) {
        for (id, row) in self.rows {
            match row {
                Some(row) => {
                    base.insert(id, row);
                }
                None => {
                    base.remove(&id);
                }
            }
        }
    }
}

struct MemoryTransaction<'a> {
    store: &'a MemoryStore,
    measurements: Overlay<Measurement>,
    diagnoses: Overlay<Diagnosis>,
    contents: Overlay<DiagnosisContent>,
    computed_events: Overlay<ComputedEvent>,
    annotated_events: Overlay<AnnotatedEvent>,
    alerts: Overlay<MeasurementAlert>,
    locked: BTreeSet<MeasurementId>,
    locked_codes: BTreeSet<(HospitalId, String)>,
    guards: Vec<ArcMutexGuard<RawMutex, ()>>,
}

fn not_found(what: &str, id: u64) -> StoreError {
    StoreError::NotFound(format!("{} #{}", what, id))
}

impl MemoryTransaction<'_> {
    fn diagnosis_ids(&self, measurement: MeasurementId) -> BTreeSet<DiagnosisId> {
        let tables = self.store.tables.read();
        self.diagnoses
            .select(&tables.diagnoses, |d| d.measurement_id == measurement)
            .into_iter()
            .map(|d| d.id)
            .collect()
    }
}

impl Transaction for MemoryTransaction<'_> {
    fn lock_measurement(&mut self, id: MeasurementId) -> Result<Measurement, StoreError> {
        if !self.locked.contains(&id) {
            // Measurements are never deleted, so a row seen once stays valid.
            if self.measurement(id)?.is_none() {
                return Err(not_found("Measurement", id.0));
            }
            let lock = self.store.locks.get_or_create(&id);
            self.guards.push(lock.lock_arc());
            self.locked.insert(id);
        }
        self.measurement(id)?
            .ok_or_else(|| not_found("Measurement", id.0))
    }

    fn lock_code(
        &mut self,
        hospital: HospitalId,
        code: &str,
    ) -> Result<Option<Measurement>, StoreError> {
        let key = (hospital, code.to_string());
        if !self.locked_codes.contains(&key) {
            let lock = self.store.codes.get_or_create(&key);
            self.guards.push(lock.lock_arc());
            self.locked_codes.insert(key);
        }
        let tables = self.store.tables.read();
        Ok(self
            .measurements
            .select(&tables.measurements, |m| m.hospital_id == hospital && m.code == code)
            .into_iter()
            .next())
    }

    fn measurement(&self, id: MeasurementId) -> Result<Option<Measurement>, StoreError> {
        let tables = self.store.tables.read();
        Ok(self.measurements.get(&tables.measurements, id.0))
    }

    fn measurements(&self) -> Result<Vec<Measurement>, StoreError> {
        let tables = self.store.tables.read();
        Ok(self.measurements.select(&tables.measurements, |_| true))
    }

    fn insert_measurement(
        &mut self,
        mut measurement: Measurement,
    ) -> Result<Measurement, StoreError> {
        measurement.id = MeasurementId(self.store.next_id());
        self.measurements.put(measurement.id.0, measurement.clone());
        Ok(measurement)
    }

    fn update_measurement(&mut self, measurement: &Measurement) -> Result<(), StoreError> {
        let id = measurement.id.0;
        if !self.measurements.exists(&self.store.tables.read().measurements, id) {
            return Err(not_found("Measurement", id));
        }
        self.measurements.put(id, measurement.clone());
        Ok(())
    }

    fn diagnosis(&self, id: DiagnosisId) -> Result<Option<Diagnosis>, StoreError> {
        let tables = self.store.tables.read();
        Ok(self.diagnoses.get(&tables.diagnoses, id.0))
    }

    fn diagnoses(&self, measurement: MeasurementId) -> Result<Vec<Diagnosis>, StoreError> {
        let tables = self.store.tables.read();
        let mut rows = self
            .diagnoses
            .select(&tables.diagnoses, |d| d.measurement_id == measurement);
        rows.sort_by(|a, b| (b.range_until, b.id).cmp(&(a.range_until, a.id)));
        Ok(rows)
    }

    fn insert_diagnosis(&mut self, mut diagnosis: Diagnosis) -> Result<Diagnosis, StoreError> {
        diagnosis.id = DiagnosisId(self.store.next_id());
        self.diagnoses.put(diagnosis.id.0, diagnosis.clone());
        Ok(diagnosis)
    }

    fn update_diagnosis(&mut self, diagnosis: &Diagnosis) -> Result<(), StoreError> {
        let id = diagnosis.id.0;
        if !self.diagnoses.exists(&self.store.tables.read().diagnoses, id) {
            return Err(not_found("Diagnosis", id));
        }
        self.diagnoses.put(id, diagnosis.clone());
        Ok(())
    }

    fn contents(&self, diagnosis: DiagnosisId) -> Result<Vec<DiagnosisContent>, StoreError> {
        let tables = self.store.tables.read();
        let mut rows = self
            .contents
            .select(&tables.contents, |c| c.diagnosis_id == diagnosis);
        rows.sort_by_key(|c| (c.range_from, c.id));
        Ok(rows)
    }

    fn contents_before(
        &self,
        measurement: MeasurementId,
        before: DateTime<Utc>,
    ) -> Result<Vec<DiagnosisContent>, StoreError> {
        let diagnoses = self.diagnosis_ids(measurement);
        let tables = self.store.tables.read();
        let mut rows = self.contents.select(&tables.contents, |c| {
            diagnoses.contains(&c.diagnosis_id) && c.range_until < before
        });
        rows.sort_by(|a, b| (b.range_until, b.id).cmp(&(a.range_until, a.id)));
        Ok(rows)
    }

    fn insert_content(
        &mut self,
        mut content: DiagnosisContent,
    ) -> Result<DiagnosisContent, StoreError> {
        content.id = ContentId(self.store.next_id());
        self.contents.put(content.id.0, content.clone());
        Ok(content)
    }

    fn computed_event(&self, id: ComputedEventId) -> Result<Option<ComputedEvent>, StoreError> {
        let tables = self.store.tables.read();
        Ok(self.computed_events.get(&tables.computed_events, id.0))
    }

    fn computed_events(
        &self,
        measurement: MeasurementId,
    ) -> Result<Vec<ComputedEvent>, StoreError> {
        let tables = self.store.tables.read();
        let mut rows = self
            .computed_events
            .select(&tables.computed_events, |e| e.measurement_id == measurement);
        rows.sort_by_key(|e| (e.range_from, e.id));
        Ok(rows)
    }

    fn insert_computed_event(
        &mut self,
        mut event: ComputedEvent,
    ) -> Result<ComputedEvent, StoreError> {
        event.id = ComputedEventId(self.store.next_id());
        self.computed_events.put(event.id.0, event.clone());
        Ok(event)
    }

    fn update_computed_event(&mut self, event: &ComputedEvent) -> Result<(), StoreError> {
        let id = event.id.0;
        if !self
            .computed_events
            .exists(&self.store.tables.read().computed_events, id)
        {
            return Err(not_found("Computed event", id));
        }
        self.computed_events.put(id, event.clone());
        Ok(())
    }

    fn annotated_event(&self, id: AnnotatedEventId) -> Result<Option<AnnotatedEvent>, StoreError> {
        let tables = self.store.tables.read();
        Ok(self.annotated_events.get(&tables.annotated_events, id.0))
    }

    fn annotated_events(
        &self,
        measurement: MeasurementId,
    ) -> Result<Vec<AnnotatedEvent>, StoreError> {
        let tables = self.store.tables.read();
        let mut rows = self
            .annotated_events
            .select(&tables.annotated_events, |e| e.measurement_id == measurement);
        rows.sort_by_key(|e| (e.created_at, e.id));
        Ok(rows)
    }

    fn annotations_of(&self, event: ComputedEventId) -> Result<Vec<AnnotatedEvent>, StoreError> {
        let tables = self.store.tables.read();
        Ok(self
            .annotated_events
            .select(&tables.annotated_events, |e| e.computed_event_id == Some(event)))
    }

    fn insert_annotated_event(
        &mut self,
        mut event: AnnotatedEvent,
    ) -> Result<AnnotatedEvent, StoreError> {
        event.id = AnnotatedEventId(self.store.next_id());
        self.annotated_events.put(event.id.0, event.clone());
        Ok(event)
    }

    fn update_annotated_event(&mut self, event: &AnnotatedEvent) -> Result<(), StoreError> {
        let id = event.id.0;
        if !self
            .annotated_events
            .exists(&self.store.tables.read().annotated_events, id)
        {
            return Err(not_found("Annotation", id));
        }
        self.annotated_events.put(id, event.clone());
        Ok(())
    }

    fn delete_annotated_event(&mut self, id: AnnotatedEventId) -> Result<(), StoreError> {
        if !self
            .annotated_events
            .exists(&self.store.tables.read().annotated_events, id.0)
        {
            return Err(not_found("Annotation", id.0));
        }
        self.annotated_events.delete(id.0);
        Ok(())
    }

    fn alerts(&self, measurement: MeasurementId) -> Result<Vec<MeasurementAlert>, StoreError> {
        let tables = self.store.tables.read();
        let mut rows = self
            .alerts
            .select(&tables.alerts, |a| a.measurement_id == measurement);
        rows.sort_by_key(|a| (a.silent_from, a.id));
        Ok(rows)
    }

    fn insert_alert(&mut self, mut alert: MeasurementAlert) -> Result<MeasurementAlert, StoreError> {
        alert.id = AlertId(self.store.next_id());
        self.alerts.put(alert.id.0, alert.clone());
        Ok(alert)
    }

    fn update_alert(&mut self, alert: &MeasurementAlert) -> Result<(), StoreError> {
        let id = alert.id.0;
        if !self.alerts.exists(&self.store.tables.read().alerts, id) {
            return Err(not_found("Measurement alert", id));
        }
        self.alerts.put(id, alert.clone());
        Ok(())
    }

    fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let this = *self;
        {
            let mut tables = this.store.tables.write();
            this.measurements.apply(&mut tables.measurements);
            this.diagnoses.apply(&mut tables.diagnoses);
            this.contents.apply(&mut tables.contents);
            this.computed_events.apply(&mut tables.computed_events);
            this.annotated_events.apply(&mut tables.annotated_events);
            this.alerts.apply(&mut tables.alerts);
        }
        // Row locks are released only after the writes are visible.
        drop(this.guards);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use ctgwatch_types::HospitalId;
    use std::sync::atomic::AtomicBool;
    use std::time::Duration;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2021, 12, 1, 16, 0, 0).unwrap()
    }

    fn seeded() -> (MemoryStore, MeasurementId) {
        let store = MemoryStore::new();
        let mut tx = store.begin().unwrap();
        let m = tx
            .insert_measurement(Measurement::new(HospitalId(1), "A", now()))
            .unwrap();
        tx.commit().unwrap();
        (store, m.id)
    }

    #[test]
    fn test_reads_see_own_writes() {
        let (store, id) = seeded();
        let mut tx = store.begin().unwrap();
        let mut m = tx.measurement(id).unwrap().unwrap();
        m.code = "B".to_string();
        tx.update_measurement(&m).unwrap();

        assert_eq!(tx.measurement(id).unwrap().unwrap().code, "B");

        let other = store.begin().unwrap();
        assert_eq!(other.measurement(id).unwrap().unwrap().code, "A");
    }

    #[test]
    fn test_drop_rolls_back() {
        let (store, id) = seeded();
        {
            let mut tx = store.begin().unwrap();
            let mut m = tx.measurement(id).unwrap().unwrap();
            m.is_closed = true;
            tx.update_measurement(&m).unwrap();
        }
        let tx = store.begin().unwrap();
        assert!(!tx.measurement(id).unwrap().unwrap().is_closed);
    }

    #[test]
    fn test_ids_are_unique_across_tables() {
        let (store, m) = seeded();
        let mut tx = store.begin().unwrap();
        let alert = tx
            .insert_alert(MeasurementAlert {
                id: AlertId::default(),
                measurement_id: m,
                silent_from: now(),
                silent_until: now(),
                created_at: now(),
                modified_at: now(),
            })
            .unwrap();
        assert_ne!(alert.id.0, m.0);
        assert!(alert.id.0 > 0);
    }

    #[test]
    fn test_update_missing_row() {
        let store = MemoryStore::new();
        let mut tx = store.begin().unwrap();
        let ghost = Measurement::new(HospitalId(1), "ghost", now());
        assert!(matches!(
            tx.update_measurement(&ghost),
            Err(StoreError::NotFound(_))
        ));
        assert!(matches!(
            tx.lock_measurement(MeasurementId(99)),
            Err(StoreError::NotFound(_))
        ));
    }

    #[test]
    fn test_delete_annotation() {
        let (store, m) = seeded();
        let mut tx = store.begin().unwrap();
        let a = tx
            .insert_annotated_event(AnnotatedEvent {
                id: AnnotatedEventId::default(),
                measurement_id: m,
                clinician_id: None,
                computed_event_id: None,
                risk: ctgwatch_types::RiskLevel::MIN,
                memo: String::new(),
                range_from: now(),
                range_until: now(),
                is_closed: false,
                closing_memo: None,
                closed_at: None,
                created_at: now(),
                modified_at: now(),
            })
            .unwrap();
        tx.commit().unwrap();

        let mut tx = store.begin().unwrap();
        tx.delete_annotated_event(a.id).unwrap();
        assert!(tx.annotated_event(a.id).unwrap().is_none());
        assert!(tx.annotated_events(m).unwrap().is_empty());
        tx.commit().unwrap();

        let mut tx = store.begin().unwrap();
        assert!(tx.delete_annotated_event(a.id).is_err());
    }

    #[test]
    fn test_snapshot_round_trip_keeps_ids() {
        let (store, _) = seeded();
        let restored = MemoryStore::from_tables(store.snapshot());
        assert_eq!(restored.snapshot(), store.snapshot());

        let mut tx = restored.begin().unwrap();
        let m = tx
            .insert_measurement(Measurement::new(HospitalId(1), "C", now()))
            .unwrap();
        assert_eq!(m.id, MeasurementId(2));
    }

    #[test]
    fn test_lock_missing_measurement_creates_no_lock() {
        let (store, id) = seeded();
        {
            let mut tx = store.begin().unwrap();
            assert!(matches!(
                tx.lock_measurement(MeasurementId(999)),
                Err(StoreError::NotFound(_))
            ));
        }
        assert_eq!(store.locks.len(), 0);

        let mut tx = store.begin().unwrap();
        tx.lock_measurement(id).unwrap();
        tx.commit().unwrap();
        assert_eq!(store.locks.len(), 1);
    }

    #[test]
    fn test_lock_code_finds_measurement() {
        let (store, id) = seeded();
        let mut tx = store.begin().unwrap();
        assert_eq!(tx.lock_code(HospitalId(1), "A").unwrap().map(|m| m.id), Some(id));
        // Re-locking in the same transaction does not deadlock.
        assert!(tx.lock_code(HospitalId(1), "A").unwrap().is_some());
        assert!(tx.lock_code(HospitalId(2), "A").unwrap().is_none());

        let created = tx
            .insert_measurement(Measurement::new(HospitalId(1), "B", now()))
            .unwrap();
        assert_eq!(tx.lock_code(HospitalId(1), "B").unwrap().map(|m| m.id), Some(created.id));
    }

    #[test]
    fn test_lock_measurement_serializes_transactions() {
        let (store, id) = seeded();
        let store = Arc::new(store);
        let released = Arc::new(AtomicBool::new(false));

        let mut tx = store.begin().unwrap();
        tx.lock_measurement(id).unwrap();
        // Re-locking in the same transaction does not deadlock.
        tx.lock_measurement(id).unwrap();

        let handle = {
            let store = store.clone();
            let released = released.clone();
            std::thread::spawn(move || {
                let mut tx = store.begin().unwrap();
                tx.lock_measurement(id).unwrap();
                released.load(Ordering::SeqCst)
            })
        };

        std::thread::sleep(Duration::from_millis(50));
        released.store(true, Ordering::SeqCst);
        tx.commit().unwrap();

        assert!(handle.join().unwrap());
    }
}
