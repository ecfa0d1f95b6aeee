//! Common types used across WDP
//!
//! Records move through the pipeline in one direction and are never edited in
//! place:
//!
//! ```text
//! RawItem --append--> StagedRecord --transform--> TransformedRecord --load--> sink row
//! ```

use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::atomic::{AtomicI64, Ordering};

use crate::error::{Result, WdpError};

// ============================================================================
// Subjects and batches
// ============================================================================

/// Name of one thing to observe, e.g. a city.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Subject(String);

impl Subject {
    /// Create a subject, trimming surrounding whitespace.
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        let trimmed = name.trim();
        if trimmed.is_empty() {
            return Err(WdpError::InvalidSubject("subject name cannot be blank".to_string()));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Subject {
    type Error = WdpError;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<Subject> for String {
    fn from(subject: Subject) -> Self {
        subject.0
    }
}

impl std::fmt::Display for Subject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Last handle issued by [`BatchHandle::now`], in epoch microseconds.
static LAST_MINTED_MICROS: AtomicI64 = AtomicI64::new(i64::MIN);

/// Correlation key minted once per extraction.
///
/// Every record produced by one extraction carries the same handle, and the
/// staging store is queried by exact equality on it. Handles are truncated to
/// microseconds so they survive a round trip through a `TIMESTAMPTZ` column
/// unchanged.
///
/// Within one process, [`BatchHandle::now`] never returns the same handle
/// twice, even when called twice in the same microsecond.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BatchHandle(DateTime<Utc>);

impl BatchHandle {
    /// Mint a handle from the current wall-clock time.
    ///
    /// Each call returns a handle strictly later than the previous one; if
    /// the clock has not advanced, the handle is bumped 1µs past the last.
    pub fn now() -> Self {
        let wall = Utc::now().timestamp_micros();
        let previous = LAST_MINTED_MICROS
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
                Some(wall.max(last.saturating_add(1)))
            })
            .unwrap_or(wall);
        let micros = wall.max(previous.saturating_add(1));

        DateTime::from_timestamp_micros(micros)
            .map(Self)
            .unwrap_or_else(|| Self::from_datetime(Utc::now()))
    }

    pub fn from_datetime(at: DateTime<Utc>) -> Self {
        Self(at.trunc_subsecs(6))
    }

    pub fn as_datetime(&self) -> DateTime<Utc> {
        self.0
    }
}

impl std::fmt::Display for BatchHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0.to_rfc3339_opts(SecondsFormat::Micros, true))
    }
}

impl FromStr for BatchHandle {
    type Err = WdpError;

    fn from_str(s: &str) -> Result<Self> {
        DateTime::parse_from_rfc3339(s.trim())
            .map(|at| Self::from_datetime(at.with_timezone(&Utc)))
            .map_err(|e| WdpError::InvalidBatchHandle {
                value: s.to_string(),
                reason: e.to_string(),
            })
    }
}

// ============================================================================
// Pipeline records
// ============================================================================

/// One successful fetch for one subject.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawItem {
    pub subject: Subject,
    /// Degrees Celsius
    pub temperature: f64,
    pub feels_like: f64,
    /// Relative humidity, percent
    pub humidity: f64,
    /// hPa
    pub pressure: f64,
    pub description: String,
    /// Metres per second
    pub wind_speed: f64,
    /// Wall-clock time the fetch completed
    pub fetch_time: DateTime<Utc>,
    /// Observation time reported by the source, epoch seconds
    pub event_time_epoch: i64,
}

/// A raw item as persisted in the staging store.
///
/// Measurement columns are optional because the store is an external system
/// and may hold rows with missing values; the transformer rejects those.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StagedRecord {
    pub subject: String,
    pub temperature: Option<f64>,
    pub feels_like: Option<f64>,
    pub humidity: Option<f64>,
    pub pressure: Option<f64>,
    pub description: Option<String>,
    pub wind_speed: Option<f64>,
    pub fetch_time: Option<DateTime<Utc>>,
    pub event_time_epoch: Option<i64>,
    pub batch_handle: BatchHandle,
}

impl StagedRecord {
    /// Stage a raw item under `batch`.
    pub fn from_raw(item: &RawItem, batch: BatchHandle) -> Self {
        Self {
            subject: item.subject.to_string(),
            temperature: Some(item.temperature),
            feels_like: Some(item.feels_like),
            humidity: Some(item.humidity),
            pressure: Some(item.pressure),
            description: Some(item.description.clone()),
            wind_speed: Some(item.wind_speed),
            fetch_time: Some(item.fetch_time),
            event_time_epoch: Some(item.event_time_epoch),
            batch_handle: batch,
        }
    }
}

/// Temperature bucket.
///
/// Boundaries sit at 0, 15 and 25 °C; a reading exactly on a boundary belongs
/// to the warmer bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum TempCategory {
    Cold,
    Cool,
    Moderate,
    Hot,
}

impl TempCategory {
    pub fn from_celsius(celsius: f64) -> Self {
        if celsius < 0.0 {
            TempCategory::Cold
        } else if celsius < 15.0 {
            TempCategory::Cool
        } else if celsius < 25.0 {
            TempCategory::Moderate
        } else {
            TempCategory::Hot
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TempCategory::Cold => "Cold",
            TempCategory::Cool => "Cool",
            TempCategory::Moderate => "Moderate",
            TempCategory::Hot => "Hot",
        }
    }
}

impl std::fmt::Display for TempCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A staged record enriched with derived fields.
///
/// Field declaration order is the sink column order and must match
/// [`TransformedRecord::COLUMNS`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformedRecord {
    pub subject: String,
    pub event_time: DateTime<Utc>,
    pub fetch_time: DateTime<Utc>,
    /// `fetch_time - event_time`, in seconds
    pub data_lag: f64,
    pub temperature: f64,
    pub temperature_fahrenheit: f64,
    pub feels_like: f64,
    pub humidity: f64,
    pub pressure: f64,
    pub wind_speed: f64,
    pub wind_speed_mph: f64,
    pub description: String,
    pub temp_category: TempCategory,
    pub is_daytime: bool,
    pub weather_severity: f64,
    pub hour: u32,
    pub day_of_week: String,
}

impl TransformedRecord {
    pub const COLUMNS: [&'static str; 17] = [
        "subject",
        "event_time",
        "fetch_time",
        "data_lag",
        "temperature",
        "temperature_fahrenheit",
        "feels_like",
        "humidity",
        "pressure",
        "wind_speed",
        "wind_speed_mph",
        "description",
        "temp_category",
        "is_daytime",
        "weather_severity",
        "hour",
        "day_of_week",
    ];
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;

    #[test]
    fn test_subject_trims_and_rejects_blank() {
        assert_eq!(Subject::new("  Paris ").unwrap().as_str(), "Paris");
        assert!(Subject::new("   ").is_err());
        assert!(serde_json::from_str::<Subject>("\"\"").is_err());
    }

    #[test]
    fn test_batch_handle_truncates_to_micros() {
        let at = Utc.timestamp_opt(1_706_616_000, 123_456_789).unwrap();
        let handle = BatchHandle::from_datetime(at);
        assert_eq!(handle.as_datetime().timestamp_subsec_nanos(), 123_456_000);
        assert_eq!(handle.to_string(), "2024-01-30T12:00:00.123456Z");
    }

    #[test]
    fn test_batch_handles_minted_back_to_back_are_distinct() {
        let handles: Vec<BatchHandle> = (0..1000).map(|_| BatchHandle::now()).collect();
        for pair in handles.windows(2) {
            assert!(pair[0] < pair[1], "{} !< {}", pair[0], pair[1]);
        }
        assert_eq!(handles[0].as_datetime().timestamp_subsec_nanos() % 1000, 0);
    }

    #[test]
    fn test_batch_handle_parses_display_output() {
        let handle = BatchHandle::now();
        let parsed: BatchHandle = handle.to_string().parse().unwrap();
        assert_eq!(parsed, handle);
        assert!("yesterday".parse::<BatchHandle>().is_err());
    }

    #[test]
    fn test_batch_handle_parses_offset_timestamps() {
        let parsed: BatchHandle = "2024-01-30T14:00:00+02:00".parse().unwrap();
        assert_eq!(parsed.to_string(), "2024-01-30T12:00:00.000000Z");
    }

    #[test]
    fn test_temp_category_boundaries_belong_to_warmer_bucket() {
        assert_eq!(TempCategory::from_celsius(-0.1), TempCategory::Cold);
        assert_eq!(TempCategory::from_celsius(0.0), TempCategory::Cool);
        assert_eq!(TempCategory::from_celsius(14.9), TempCategory::Cool);
        assert_eq!(TempCategory::from_celsius(15.0), TempCategory::Moderate);
        assert_eq!(TempCategory::from_celsius(25.0), TempCategory::Hot);
        assert_eq!(TempCategory::from_celsius(-40.0), TempCategory::Cold);
    }

    #[test]
    fn test_staged_record_from_raw_copies_every_field() {
        let fetched = Utc.timestamp_opt(1_706_616_300, 0).unwrap();
        let item = RawItem {
            subject: Subject::new("Paris").unwrap(),
            temperature: 10.0,
            feels_like: 8.5,
            humidity: 50.0,
            pressure: 1012.0,
            description: "light rain".to_string(),
            wind_speed: 3.0,
            fetch_time: fetched,
            event_time_epoch: 1_706_616_000,
        };
        let batch = BatchHandle::from_datetime(fetched);
        let staged = StagedRecord::from_raw(&item, batch);

        assert_eq!(staged.subject, "Paris");
        assert_eq!(staged.description.as_deref(), Some("light rain"));
        assert_eq!(staged.event_time_epoch, Some(1_706_616_000));
        assert_eq!(staged.batch_handle, batch);
    }

    proptest! {
        #[test]
        fn prop_temp_category_is_monotonic(a in -80.0f64..80.0, b in -80.0f64..80.0) {
            let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
            prop_assert!(TempCategory::from_celsius(lo) <= TempCategory::from_celsius(hi));
        }
    }
}
