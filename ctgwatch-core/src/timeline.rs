//! The per-measurement event timeline.
//!
//! Every diagnosis batch is folded into the measurement's computed events:
//! intervals that fall wholly before the latest event are dropped, those
//! overlapping it extend and overwrite it, and the rest are appended.
//! Replaying a batch leaves the timeline unchanged.

use chrono::{DateTime, Utc};
use tracing::debug;

use ctgwatch_types::{
    AnnotatedEvent, ComputedEvent, ComputedEventId, DiagnosisContent, MeasurementId,
};

use crate::error::{CoreError, Result};
use crate::store::{Store, Transaction};

/// What a merge did to the timeline.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeSummary {
    /// Contents ending at or before the latest event's start.
    pub dropped: usize,
    /// Contents folded into the latest event.
    pub merged: usize,
    /// Contents appended as new events.
    pub inserted: usize,
}

/// Merge scored contents, sorted by `range_from`, into the timeline.
///
/// The caller is expected to hold the measurement's row lock.
pub fn merge(
    tx: &mut (dyn Transaction + '_),
    measurement: MeasurementId,
    contents: &[DiagnosisContent],
    now: DateTime<Utc>,
) -> Result<MergeSummary> {
    let mut summary = MergeSummary::default();
    let Some(first) = contents.first() else {
        return Ok(summary);
    };

    let latest = tx
        .computed_events(measurement)?
        .into_iter()
        .filter(|e| e.range_until >= first.range_from)
        .last();

    let mut rest = contents;
    if let Some(mut latest) = latest {
        summary.dropped = rest
            .iter()
            .take_while(|c| c.range_until <= latest.range_from)
            .count();
        rest = &rest[summary.dropped..];

        summary.merged = rest
            .iter()
            .take_while(|c| c.range_from < latest.range_until)
            .count();
        let (merged, appended) = rest.split_at(summary.merged);
        rest = appended;

        for content in merged {
            latest.risk = content.risk;
            latest.parameters = content.parameters.clone();
            latest.range_until = latest.range_until.max(content.range_until);
        }
        if !merged.is_empty() {
            latest.modified_at = now;
            tx.update_computed_event(&latest)?;
            debug!(
                event = %latest.id,
                until = %latest.range_until,
                risk = ?latest.risk.map(|r| r.get()),
                "Extended latest computed event"
            );
        }
    }

    for content in rest {
        let event = tx.insert_computed_event(ComputedEvent::from_content(measurement, content, now))?;
        debug!(event = %event.id, from = %event.range_from, "Appended computed event");
    }
    summary.inserted = rest.len();

    debug!(
        measurement = %measurement,
        dropped = summary.dropped,
        merged = summary.merged,
        inserted = summary.inserted,
        "Merged diagnosis into timeline"
    );
    Ok(summary)
}

fn overlaps(
    from: DateTime<Utc>,
    until: DateTime<Utc>,
    begin: DateTime<Utc>,
    end: DateTime<Utc>,
) -> bool {
    from <= end && until >= begin
}

/// Computed events overlapping `[begin, end]`, latest `range_until` first.
pub fn computed_events_in_range(
    store: &dyn Store,
    measurement: MeasurementId,
    begin: DateTime<Utc>,
    end: DateTime<Utc>,
    include_hidden: bool,
) -> Result<Vec<ComputedEvent>> {
    let tx = store.begin()?;
    let mut events: Vec<_> = tx
        .computed_events(measurement)?
        .into_iter()
        .filter(|e| include_hidden || !e.is_hidden)
        .filter(|e| overlaps(e.range_from, e.range_until, begin, end))
        .collect();
    events.sort_by(|a, b| (b.range_until, b.id).cmp(&(a.range_until, a.id)));
    Ok(events)
}

/// Annotations overlapping `[begin, end]`, latest `range_until` first.
pub fn annotated_events_in_range(
    store: &dyn Store,
    measurement: MeasurementId,
    begin: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Result<Vec<AnnotatedEvent>> {
    let tx = store.begin()?;
    let mut events: Vec<_> = tx
        .annotated_events(measurement)?
        .into_iter()
        .filter(|e| overlaps(e.range_from, e.range_until, begin, end))
        .collect();
    events.sort_by(|a, b| (b.range_until, b.id).cmp(&(a.range_until, a.id)));
    Ok(events)
}

/// A single computed event. Hidden events are reported as not found
/// unless `include_hidden` is set.
pub fn computed_event(
    store: &dyn Store,
    id: ComputedEventId,
    include_hidden: bool,
) -> Result<ComputedEvent> {
    let tx = store.begin()?;
    tx.computed_event(id)?
        .filter(|e| include_hidden || !e.is_hidden)
        .ok_or_else(|| CoreError::NotFound(format!("Computed event {}", id)))
}
