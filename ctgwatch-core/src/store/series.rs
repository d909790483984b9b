//! In-memory sample channels.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use ctgwatch_types::{Channel, MeasurementId, Sample};

use super::SeriesStore;
use crate::error::StoreError;

/// Exported samples of one channel of one measurement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesRecord {
    pub measurement_id: MeasurementId,
    pub channel: Channel,
    pub samples: Vec<Sample>,
}

type Key = (MeasurementId, Channel);

/// A [`SeriesStore`] backed by ordered maps.
#[derive(Debug, Default)]
pub struct MemorySeries {
    channels: RwLock<BTreeMap<Key, BTreeMap<DateTime<Utc>, i32>>>,
}

impl MemorySeries {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_records(records: Vec<SeriesRecord>) -> Self {
        let series = Self::new();
        {
            let mut channels = series.channels.write();
            for record in records {
                channels
                    .entry((record.measurement_id, record.channel))
                    .or_default()
                    .extend(record.samples.iter().map(|s| (s.observed_at, s.value)));
            }
        }
        series
    }

    pub fn records(&self) -> Vec<SeriesRecord> {
        self.channels
            .read()
            .iter()
            .map(|(&(measurement_id, channel), values)| SeriesRecord {
                measurement_id,
                channel,
                samples: values.iter().map(|(&t, &v)| Sample::new(v, t)).collect(),
            })
            .collect()
    }

    /// Number of stored samples in one channel.
    pub fn len(&self, measurement: MeasurementId, channel: Channel) -> usize {
        self.channels
            .read()
            .get(&(measurement, channel))
            .map_or(0, BTreeMap::len)
    }
}

impl SeriesStore for MemorySeries {
    fn insert(
        &self,
        measurement: MeasurementId,
        channel: Channel,
        samples: &[Sample],
    ) -> Result<(), StoreError> {
        let mut channels = self.channels.write();
        channels
            .entry((measurement, channel))
            .or_default()
            .extend(samples.iter().map(|s| (s.observed_at, s.value)));
        Ok(())
    }

    fn range(
        &self,
        measurement: MeasurementId,
        channel: Channel,
        from: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<Sample>, StoreError> {
        if until < from {
            return Ok(Vec::new());
        }
        let channels = self.channels.read();
        Ok(channels
            .get(&(measurement, channel))
            .map(|values| {
                values
                    .range(from..=until)
                    .map(|(&t, &v)| Sample::new(v, t))
                    .collect()
            })
            .unwrap_or_default())
    }
}
