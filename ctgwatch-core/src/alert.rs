//! Alert surfacing and clinician actions on the timeline.
//!
//! Alerts come from two places: computed events at or above the risk
//! threshold that nobody has annotated yet (the "unread" feed), and open
//! annotations. A measurement can be silenced for a fixed window; an
//! alerting annotation ends the silence early.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use ctgwatch_types::{
    AlertId, AnnotatedEvent, AnnotatedEventId, ClinicianId, ComputedEvent, ComputedEventId,
    HospitalId, MeasurementAlert, MeasurementId, RiskLevel,
};

use crate::error::{CoreError, Result};
use crate::settings::{chrono_duration, AlertSettings};
use crate::store::{Store, Transaction};

/// A clinician annotation to register.
#[derive(Debug, Clone, PartialEq)]
pub struct NewAnnotation {
    pub measurement_id: MeasurementId,
    pub clinician_id: Option<ClinicianId>,
    pub computed_event_id: Option<ComputedEventId>,
    pub risk: RiskLevel,
    pub memo: String,
    pub range_from: DateTime<Utc>,
    pub range_until: DateTime<Utc>,
}

/// Alert queries and clinician actions against one store.
pub struct AlertWorkflow<'a> {
    store: &'a dyn Store,
    settings: &'a AlertSettings,
}

impl<'a> AlertWorkflow<'a> {
    pub fn new(store: &'a dyn Store, settings: &'a AlertSettings) -> Self {
        Self { store, settings }
    }

    pub fn settings(&self) -> &AlertSettings {
        self.settings
    }

    fn alerting(&self, risk: Option<RiskLevel>) -> bool {
        risk.is_some_and(|r| self.settings.is_alerting(r))
    }

    /// Unannotated, unsuspended alerting events of a hospital's live
    /// measurements, oldest first.
    ///
    /// With `seen`, only events starting at or after the end of that event
    /// are returned; otherwise the backing window bounds the lookback.
    pub fn unread(
        &self,
        hospital: HospitalId,
        seen: Option<ComputedEventId>,
        now: DateTime<Utc>,
    ) -> Result<Vec<ComputedEvent>> {
        let tx = self.store.begin()?;

        let seen_until = match seen {
            Some(id) => tx.computed_event(id)?.map(|e| e.range_until),
            None => None,
        };
        let begin = seen_until.unwrap_or(now - chrono_duration(self.settings.backing_window));
        let active_since = now - chrono_duration(self.settings.measurement_recency);

        let mut unread = Vec::new();
        for m in tx.measurements()? {
            if m.hospital_id != hospital || !m.last_time.is_some_and(|t| t >= active_since) {
                continue;
            }
            for event in tx.computed_events(m.id)? {
                if event.is_suspended
                    || event.range_from < begin
                    || !self.alerting(event.risk)
                    || !tx.annotations_of(event.id)?.is_empty()
                {
                    continue;
                }
                unread.push(event);
            }
        }
        unread.sort_by_key(|e| (e.range_from, e.id));
        Ok(unread)
    }

    /// For each open, unsilenced measurement, its latest annotation if that
    /// annotation is still open.
    pub fn alerts_for(
        &self,
        measurements: &[MeasurementId],
        now: DateTime<Utc>,
    ) -> Result<Vec<AnnotatedEvent>> {
        let tx = self.store.begin()?;
        let ids: BTreeSet<_> = measurements.iter().copied().collect();

        let mut alerts = Vec::new();
        for id in ids {
            let Some(m) = tx.measurement(id)? else {
                continue;
            };
            if m.is_closed || active_silence(tx.as_ref(), id, now)?.is_some() {
                continue;
            }
            let latest = tx
                .annotated_events(id)?
                .into_iter()
                .max_by_key(|a| (a.created_at, a.id));
            if let Some(a) = latest.filter(|a| !a.is_closed) {
                alerts.push(a);
            }
        }
        alerts.sort_by_key(|a| (a.range_from, a.id));
        Ok(alerts)
    }

    /// Open alerting annotations of a hospital within the backing window.
    ///
    /// Several annotations on one computed event count once, through the
    /// most recently created.
    pub fn annotation_alerts(
        &self,
        hospital: HospitalId,
        now: DateTime<Utc>,
    ) -> Result<Vec<AnnotatedEvent>> {
        let tx = self.store.begin()?;
        let begin = now - chrono_duration(self.settings.backing_window);

        let mut alerts = Vec::new();
        for m in tx.measurements()? {
            if m.hospital_id != hospital || active_silence(tx.as_ref(), m.id, now)?.is_some() {
                continue;
            }
            let mut linked: BTreeMap<ComputedEventId, AnnotatedEvent> = BTreeMap::new();
            for a in tx.annotated_events(m.id)? {
                // annotated_events is ordered by creation, so later ones win
                match a.computed_event_id {
                    Some(event) => {
                        linked.insert(event, a);
                    }
                    None => alerts.push(a),
                }
            }
            alerts.extend(linked.into_values());
        }
        alerts.retain(|a| {
            !a.is_closed && a.range_until >= begin && self.settings.is_alerting(a.risk)
        });
        alerts.sort_by_key(|a| (a.range_from, a.id));
        Ok(alerts)
    }

    /// Record an annotation. An alerting annotation ends any active silence
    /// on its measurement.
    pub fn register_annotation(
        &self,
        new: NewAnnotation,
        now: DateTime<Utc>,
    ) -> Result<AnnotatedEvent> {
        if new.range_until < new.range_from {
            return Err(CoreError::InvalidRange {
                from: new.range_from,
                until: new.range_until,
            });
        }

        let mut tx = self.store.begin()?;
        tx.lock_measurement(new.measurement_id)?;

        if let Some(event_id) = new.computed_event_id {
            match tx.computed_event(event_id)? {
                Some(event) if event.measurement_id == new.measurement_id => {}
                Some(_) => {
                    return Err(CoreError::Referential(format!(
                        "Computed event {} does not belong to measurement {}",
                        event_id, new.measurement_id
                    )))
                }
                None => {
                    return Err(CoreError::Referential(format!(
                        "Computed event {} does not exist",
                        event_id
                    )))
                }
            }
        }

        let annotation = tx.insert_annotated_event(AnnotatedEvent {
            id: AnnotatedEventId::default(),
            measurement_id: new.measurement_id,
            clinician_id: new.clinician_id,
            computed_event_id: new.computed_event_id,
            risk: new.risk,
            memo: new.memo,
            range_from: new.range_from,
            range_until: new.range_until,
            is_closed: false,
            closing_memo: None,
            closed_at: None,
            created_at: now,
            modified_at: now,
        })?;

        if self.settings.is_alerting(annotation.risk) {
            end_silence_in(tx.as_mut(), annotation.measurement_id, now)?;
        }
        tx.commit()?;

        debug!(
            annotation = %annotation.id,
            measurement = %annotation.measurement_id,
            risk = annotation.risk.get(),
            "Registered annotation"
        );
        Ok(annotation)
    }

    /// Change an annotation's risk and memo. Raising it to an alerting risk
    /// ends any active silence.
    pub fn update_annotation(
        &self,
        id: AnnotatedEventId,
        clinician: Option<ClinicianId>,
        risk: RiskLevel,
        memo: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<AnnotatedEvent> {
        let mut tx = self.store.begin()?;
        let mut annotation = locked_annotation(tx.as_mut(), id)?;

        if clinician.is_some() {
            annotation.clinician_id = clinician;
        }
        annotation.risk = risk;
        annotation.memo = memo.into();
        annotation.modified_at = now;
        tx.update_annotated_event(&annotation)?;

        if self.settings.is_alerting(risk) {
            end_silence_in(tx.as_mut(), annotation.measurement_id, now)?;
        }
        tx.commit()?;
        Ok(annotation)
    }

    pub fn delete_annotation(&self, id: AnnotatedEventId) -> Result<()> {
        let mut tx = self.store.begin()?;
        locked_annotation(tx.as_mut(), id)?;
        tx.delete_annotated_event(id)?;
        tx.commit()?;
        Ok(())
    }

    /// Mark an annotation handled. Closing twice is a conflict.
    pub fn close_annotation(
        &self,
        id: AnnotatedEventId,
        memo: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<AnnotatedEvent> {
        let mut tx = self.store.begin()?;
        let mut annotation = locked_annotation(tx.as_mut(), id)?;
        if annotation.is_closed {
            return Err(CoreError::Conflict(format!("Annotation {} is already closed", id)));
        }

        annotation.is_closed = true;
        annotation.closing_memo = Some(memo.into());
        annotation.closed_at = Some(now);
        annotation.modified_at = now;
        tx.update_annotated_event(&annotation)?;
        tx.commit()?;
        Ok(annotation)
    }

    /// Show or hide a computed event.
    pub fn set_visibility(
        &self,
        id: ComputedEventId,
        visible: bool,
        now: DateTime<Utc>,
    ) -> Result<ComputedEvent> {
        self.modify_event(id, now, |e| e.is_hidden = !visible)
    }

    /// Exclude a computed event from the unread feed. Suspension cannot be
    /// undone.
    pub fn suspend(&self, id: ComputedEventId, now: DateTime<Utc>) -> Result<ComputedEvent> {
        self.modify_event(id, now, |e| e.is_suspended = true)
    }

    fn modify_event(
        &self,
        id: ComputedEventId,
        now: DateTime<Utc>,
        change: impl FnOnce(&mut ComputedEvent),
    ) -> Result<ComputedEvent> {
        let mut tx = self.store.begin()?;
        let measurement = tx
            .computed_event(id)?
            .ok_or_else(|| CoreError::NotFound(format!("Computed event {}", id)))?
            .measurement_id;
        tx.lock_measurement(measurement)?;

        // Re-read under the lock; a merge may have extended the event.
        let mut event = tx
            .computed_event(id)?
            .ok_or_else(|| CoreError::NotFound(format!("Computed event {}", id)))?;
        let before = event.clone();
        change(&mut event);
        if event != before {
            event.modified_at = now;
            tx.update_computed_event(&event)?;
            tx.commit()?;
        }
        Ok(event)
    }

    /// Open a silence window of the configured length starting now.
    pub fn silence(
        &self,
        measurement: MeasurementId,
        now: DateTime<Utc>,
    ) -> Result<MeasurementAlert> {
        let mut tx = self.store.begin()?;
        tx.lock_measurement(measurement)?;

        if let Some(active) = active_silence(tx.as_ref(), measurement, now)? {
            return Err(CoreError::Conflict(format!(
                "Measurement {} is silenced until {}",
                measurement, active.silent_until
            )));
        }

        let alert = tx.insert_alert(MeasurementAlert {
            id: AlertId::default(),
            measurement_id: measurement,
            silent_from: now,
            silent_until: now + chrono_duration(self.settings.silence_duration),
            created_at: now,
            modified_at: now,
        })?;
        tx.commit()?;

        info!(
            measurement = %measurement,
            until = %alert.silent_until,
            "Measurement silenced"
        );
        Ok(alert)
    }

    /// The silence window covering `now`, if any.
    pub fn silence_state(
        &self,
        measurement: MeasurementId,
        now: DateTime<Utc>,
    ) -> Result<Option<MeasurementAlert>> {
        let tx = self.store.begin()?;
        if tx.measurement(measurement)?.is_none() {
            return Err(CoreError::NotFound(format!("Measurement {}", measurement)));
        }
        active_silence(tx.as_ref(), measurement, now)
    }

    /// End every silence window covering `now`. Returns how many ended.
    pub fn end_silence(&self, measurement: MeasurementId, now: DateTime<Utc>) -> Result<usize> {
        let mut tx = self.store.begin()?;
        tx.lock_measurement(measurement)?;
        let ended = end_silence_in(tx.as_mut(), measurement, now)?;
        tx.commit()?;
        Ok(ended)
    }
}

fn active_silence(
    tx: &(dyn Transaction + '_),
    measurement: MeasurementId,
    now: DateTime<Utc>,
) -> Result<Option<MeasurementAlert>> {
    Ok(tx
        .alerts(measurement)?
        .into_iter()
        .filter(|a| a.covers(now))
        .max_by_key(|a| (a.silent_until, a.id)))
}

fn end_silence_in(
    tx: &mut (dyn Transaction + '_),
    measurement: MeasurementId,
    now: DateTime<Utc>,
) -> Result<usize> {
    let mut ended = 0;
    for mut alert in tx.alerts(measurement)? {
        if alert.covers(now) {
            alert.silent_until = now;
            alert.modified_at = now;
            tx.update_alert(&alert)?;
            ended += 1;
        }
    }
    if ended > 0 {
        info!(measurement = %measurement, windows = ended, "Silence ended");
    }
    Ok(ended)
}

fn locked_annotation(
    tx: &mut (dyn Transaction + '_),
    id: AnnotatedEventId,
) -> Result<AnnotatedEvent> {
    let not_found = || CoreError::NotFound(format!("Annotation {}", id));
    let measurement = tx.annotated_event(id)?.ok_or_else(not_found)?.measurement_id;
    tx.lock_measurement(measurement)?;
    tx.annotated_event(id)?.ok_or_else(not_found)
}
