//! Decoder for TRC monitor export files.
//!
//! A TRC file is a fixed-offset header followed by three byte-per-sample
//! channel arrays. Two header layouts exist, told apart by the value of the
//! data-index field at offset 0x04:
//!
//! | Marker   | Start time encoding                                  |
//! |----------|------------------------------------------------------|
//! | `0x1000` | `f64` LE day count since 1899-12-30 00:00:00 UTC      |
//! | `0x0400` | `[00, sec, min, hour, day, month, year_lo, year_hi]`  |
//!
//! The time block sits `0x64` bytes after a run of twelve `0xFF` bytes
//! found by scanning forward from `0x74`. It is written twice; the sample
//! count follows the second copy. Samples start at the data index, one
//! channel after another, and a raw `0xFF` means "no reading".
//!
//! ## Example
//!
//! ```rust,no_run
//! use ctgwatch_adapters::trc;
//!
//! let data = trc::decode_file("20211201161653.trc")?;
//! println!("{} samples for {}", data.len(), data.patient_id);
//! # Ok::<(), ctgwatch_adapters::AdapterError>(())
//! ```

use std::path::Path;
use std::time::Duration;

use byteorder::{ByteOrder, LittleEndian};
use chrono::{DateTime, TimeZone, Utc};
use tracing::debug;

use ctgwatch_types::{Channel, Sample};

use crate::AdapterError;

const DATA_INDEX_OFFSET: usize = 0x04;
const PATIENT_ID_RANGE: std::ops::Range<usize> = 0x60..0x74;
const MARKER_SEARCH_START: usize = 0x74;
const MARKER_LEN: usize = 12;
const TIME_BLOCK_GAP: usize = 0x64;
const SAMPLE_COUNT_GAP: usize = 0x10;
const NO_READING: u8 = 0xFF;
const MS_PER_DAY: f64 = 86_400_000.0;

/// The two recognized header layouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrcFormat {
    /// Floating-point day-count timestamp.
    Days,
    /// Packed calendar-field timestamp.
    Packed,
}

impl TrcFormat {
    /// The data-index value identifying this layout.
    pub const fn marker(&self) -> u32 {
        match self {
            TrcFormat::Days => 0x1000,
            TrcFormat::Packed => 0x0400,
        }
    }

    pub fn from_marker(marker: u32) -> Option<Self> {
        match marker {
            0x1000 => Some(TrcFormat::Days),
            0x0400 => Some(TrcFormat::Packed),
            _ => None,
        }
    }
}

/// A decoded TRC file.
#[derive(Debug, Clone, PartialEq)]
pub struct TrcData {
    pub format: TrcFormat,
    pub patient_id: String,
    pub start_time: DateTime<Utc>,
    pub sampling_interval: Duration,
    pub fhr1: Vec<i32>,
    pub fhr2: Vec<i32>,
    pub toco: Vec<i32>,
}

impl TrcData {
    /// Samples per channel.
    pub fn len(&self) -> usize {
        self.fhr1.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fhr1.is_empty()
    }

    pub fn channel(&self, channel: Channel) -> &[i32] {
        match channel {
            Channel::HeartRate => &self.fhr1,
            Channel::SecondaryHeartRate => &self.fhr2,
            Channel::UterineActivity => &self.toco,
        }
    }

    /// Timestamp of the sample at `index`, or `None` past the representable
    /// range.
    pub fn time_at(&self, index: usize) -> Option<DateTime<Utc>> {
        let step = chrono::Duration::from_std(self.sampling_interval).ok()?;
        let offset = step.checked_mul(i32::try_from(index).ok()?)?;
        self.start_time.checked_add_signed(offset)
    }

    /// Timestamped samples of one channel.
    ///
    /// Stops at the first sample whose timestamp cannot be represented;
    /// [`decode`] never produces such data.
    pub fn samples(&self, channel: Channel) -> impl Iterator<Item = Sample> + '_ {
        self.channel(channel)
            .iter()
            .enumerate()
            .map_while(move |(i, &v)| Some(Sample::new(v, self.time_at(i)?)))
    }
}

/// Read and decode a TRC file from disk.
pub fn decode_file(path: impl AsRef<Path>) -> Result<TrcData, AdapterError> {
    let bytes = std::fs::read(path)?;
    decode(&bytes)
}

/// Decode a TRC buffer. Any structural problem rejects the whole buffer.
pub fn decode(data: &[u8]) -> Result<TrcData, AdapterError> {
    let marker = LittleEndian::read_u32(field(data, DATA_INDEX_OFFSET, 4)?);
    let format = TrcFormat::from_marker(marker).ok_or(AdapterError::UnrecognizedFormat(marker))?;
    let data_index = marker as usize;

    // Devices interleave the id with zero bytes in either order.
    let patient_id: String = field(data, PATIENT_ID_RANGE.start, PATIENT_ID_RANGE.len())?
        .iter()
        .filter(|&&b| b != 0)
        .map(|&b| char::from(b))
        .collect();

    let marker_pos = find_time_marker(field(
        data,
        MARKER_SEARCH_START,
        data.len().saturating_sub(MARKER_SEARCH_START),
    )?)
    .ok_or(AdapterError::MissingTimeMarker)?;
    let time_index = MARKER_SEARCH_START + marker_pos + MARKER_LEN + TIME_BLOCK_GAP;

    let time_bytes = field(data, time_index, 8)?;
    let start_time = match format {
        TrcFormat::Days => decode_days(LittleEndian::read_f64(time_bytes))?,
        TrcFormat::Packed => decode_packed(time_bytes)?,
    };

    let count = LittleEndian::read_u32(field(data, time_index + SAMPLE_COUNT_GAP, 4)?) as usize;
    let total = count.checked_mul(3).ok_or(AdapterError::Truncated {
        offset: data_index,
        needed: usize::MAX,
        len: data.len(),
    })?;
    let samples = field(data, data_index, total)?;

    let (fhr1, rest) = samples.split_at(count);
    let (fhr2, toco) = rest.split_at(count);

    let decoded = TrcData {
        format,
        patient_id,
        start_time,
        sampling_interval: Duration::from_secs(1),
        fhr1: channel_values(fhr1),
        fhr2: channel_values(fhr2),
        toco: channel_values(toco),
    };
    if decoded.time_at(count.saturating_sub(1)).is_none() {
        return Err(AdapterError::InvalidTimestamp);
    }

    debug!(
        patient_id = %decoded.patient_id,
        format = ?decoded.format,
        start = %decoded.start_time,
        samples = count,
        "Decoded TRC buffer"
    );

    Ok(decoded)
}

/// Bounds-checked sub-slice.
fn field(data: &[u8], offset: usize, len: usize) -> Result<&[u8], AdapterError> {
    offset
        .checked_add(len)
        .and_then(|end| data.get(offset..end))
        .ok_or(AdapterError::Truncated {
            offset,
            needed: len,
            len: data.len(),
        })
}

fn find_time_marker(data: &[u8]) -> Option<usize> {
    data.windows(MARKER_LEN)
        .position(|w| w.iter().all(|&b| b == NO_READING))
}

fn channel_values(raw: &[u8]) -> Vec<i32> {
    raw.iter()
        .map(|&b| if b == NO_READING { 0 } else { i32::from(b) })
        .collect()
}

fn trc_epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(1899, 12, 30, 0, 0, 0)
        .single()
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

fn decode_days(days: f64) -> Result<DateTime<Utc>, AdapterError> {
    let ms = (days * MS_PER_DAY).round();
    if !ms.is_finite() || ms.abs() > i64::MAX as f64 {
        return Err(AdapterError::InvalidTimestamp);
    }
    chrono::Duration::try_milliseconds(ms as i64)
        .and_then(|offset| trc_epoch().checked_add_signed(offset))
        .ok_or(AdapterError::InvalidTimestamp)
}

fn decode_packed(b: &[u8]) -> Result<DateTime<Utc>, AdapterError> {
    let year = LittleEndian::read_u16(&b[6..8]);
    Utc.with_ymd_and_hms(
        i32::from(year),
        u32::from(b[5]),
        u32::from(b[4]),
        u32::from(b[3]),
        u32::from(b[2]),
        u32::from(b[1]),
    )
    .single()
    .ok_or(AdapterError::InvalidTimestamp)
}


#[cfg(test)]
mod tests {
    use super::testing::TrcBuilder;
    use super::*;
    use proptest::prelude::*;

    fn expected_start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2021, 12, 1, 16, 16, 53).unwrap()
    }

    #[test]
    fn test_decode_days_format() {
        let buf = TrcBuilder::new(TrcFormat::Days).build();
        let data = decode(&buf).unwrap();

        assert_eq!(data.format, TrcFormat::Days);
        assert_eq!(data.patient_id, "2112011616");
        assert_eq!(data.start_time, expected_start());
        assert_eq!(data.sampling_interval, Duration::from_secs(1));
        assert_eq!(data.fhr1.len(), data.fhr2.len());
        assert_eq!(data.fhr2.len(), data.toco.len());
    }

    #[test]
    fn test_samples_past_max_time_are_rejected() {
        let mut builder = TrcBuilder::new(TrcFormat::Days);
        builder.start = DateTime::<Utc>::MAX_UTC - chrono::Duration::seconds(1);
        assert!(matches!(
            decode(&builder.build()),
            Err(AdapterError::InvalidTimestamp)
        ));

        builder.channels = [vec![140], vec![0], vec![12]];
        let data = decode(&builder.build()).unwrap();
        assert_eq!(data.samples(Channel::HeartRate).count(), 1);
    }

    #[test]
    fn test_time_at_is_checked() {
        let mut data = decode(&TrcBuilder::new(TrcFormat::Days).build()).unwrap();
        assert_eq!(
            data.time_at(2),
            Some(expected_start() + chrono::Duration::seconds(2))
        );
        data.start_time = DateTime::<Utc>::MAX_UTC;
        assert_eq!(data.time_at(1), None);
        assert_eq!(data.samples(Channel::UterineActivity).count(), 1);
    }

    #[test]
    fn test_decode_packed_format() {
        let buf = TrcBuilder::new(TrcFormat::Packed).build();
        let data = decode(&buf).unwrap();

        assert_eq!(data.format, TrcFormat::Packed);
        assert_eq!(data.start_time, expected_start());
        assert_eq!(data.len(), 3);
    }

    #[test]
    fn test_no_reading_decodes_to_zero() {
        let buf = TrcBuilder::new(TrcFormat::Packed).build();
        let data = decode(&buf).unwrap();

        assert_eq!(data.fhr1, vec![140, 141, 0]);
        assert_eq!(data.fhr2, vec![0, 0, 0]);
        assert_eq!(data.toco, vec![12, 0, 14]);
    }

    #[test]
    fn test_patient_id_either_interleaving() {
        let mut buf = TrcBuilder::new(TrcFormat::Packed).build();
        // Shift to [xx 00 xx 00 ...]
        buf.copy_within(0x61..0x74, 0x60);
        buf[0x73] = 0;
        assert_eq!(decode(&buf).unwrap().patient_id, "2112011616");
    }

    #[test]
    fn test_marker_is_scanned_forward() {
        let mut builder = TrcBuilder::new(TrcFormat::Packed);
        builder.marker_offset = 37;
        let data = decode(&builder.build()).unwrap();
        assert_eq!(data.start_time, expected_start());
    }

    #[test]
    fn test_samples_are_timestamped() {
        let data = decode(&TrcBuilder::new(TrcFormat::Days).build()).unwrap();
        let samples: Vec<_> = data.samples(Channel::UterineActivity).collect();

        assert_eq!(samples.len(), 3);
        assert_eq!(samples[2].value, 14);
        assert_eq!(
            samples[2].observed_at,
            expected_start() + chrono::Duration::seconds(2)
        );
    }

    #[test]
    fn test_unrecognized_format() {
        let mut buf = TrcBuilder::new(TrcFormat::Packed).build();
        LittleEndian::write_u32(&mut buf[4..8], 0x0800);
        assert!(matches!(
            decode(&buf),
            Err(AdapterError::UnrecognizedFormat(0x0800))
        ));
    }

    #[test]
    fn test_missing_time_marker() {
        let mut buf = TrcBuilder::new(TrcFormat::Packed).build();
        buf[0x74 + 5] = 0x00;
        assert!(matches!(decode(&buf), Err(AdapterError::MissingTimeMarker)));
    }

    #[test]
    fn test_truncated_samples() {
        let mut buf = TrcBuilder::new(TrcFormat::Packed).build();
        buf.truncate(buf.len() - 1);
        assert!(matches!(decode(&buf), Err(AdapterError::Truncated { .. })));
    }

    #[test]
    fn test_truncated_header() {
        assert!(matches!(
            decode(&[0u8; 3]),
            Err(AdapterError::Truncated { offset: 4, .. })
        ));
        let mut short = vec![0u8; 0x50];
        LittleEndian::write_u32(&mut short[4..8], 0x0400);
        assert!(matches!(decode(&short), Err(AdapterError::Truncated { .. })));
    }

    #[test]
    fn test_invalid_packed_date() {
        let mut buf = TrcBuilder::new(TrcFormat::Packed).build();
        let time_index = 0x74 + 12 + 0x64;
        buf[time_index + 5] = 13;
        assert!(matches!(decode(&buf), Err(AdapterError::InvalidTimestamp)));
    }

    #[test]
    fn test_day_count_rounds_to_millisecond() {
        let almost = (expected_start() - trc_epoch()).num_milliseconds() as f64 - 0.4;
        assert_eq!(decode_days(almost / MS_PER_DAY).unwrap(), expected_start());
        assert!(decode_days(f64::NAN).is_err());
    }

    #[test]
    fn test_decode_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sample.trc");
        std::fs::write(&path, TrcBuilder::new(TrcFormat::Days).build()).unwrap();
        assert_eq!(decode_file(&path).unwrap().patient_id, "2112011616");
    }

    proptest! {
        #[test]
        fn prop_decode_is_deterministic_with_equal_channels(
            days in proptest::bool::ANY,
            fhr1 in proptest::collection::vec(any::<u8>(), 0..200),
            seed in any::<u8>(),
        ) {
            let format = if days { TrcFormat::Days } else { TrcFormat::Packed };
            let mut builder = TrcBuilder::new(format);
            let n = fhr1.len();
            builder.channels = [
                fhr1,
                vec![seed; n],
                (0..n).map(|i| (i as u8).wrapping_add(seed)).collect(),
            ];
            let buf = builder.build();

            let a = decode(&buf).unwrap();
            let b = decode(&buf).unwrap();
            prop_assert_eq!(&a, &b);
            prop_assert_eq!(a.fhr1.len(), n);
            prop_assert_eq!(a.fhr2.len(), n);
            prop_assert_eq!(a.toco.len(), n);
            for channel in Channel::ALL {
                prop_assert!(a.channel(channel).iter().all(|&v| (0..0xFF).contains(&v)));
            }
        }

        #[test]
        fn prop_arbitrary_bytes_never_panic(buf in proptest::collection::vec(any::<u8>(), 0..600)) {
            let _ = decode(&buf);
        }
    }
}
