//! Transformation stage
//!
//! Reads exactly one batch from the staging store and derives the analytic
//! columns of [`TransformedRecord`]. Each derived value depends only on the
//! record it belongs to. A batch transforms atomically: one unusable record
//! fails the whole batch and nothing is returned.

use chrono::{DateTime, Timelike, Utc};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use wdp_common::types::{BatchHandle, StagedRecord, TempCategory, TransformedRecord};

use crate::error::{PipelineError, Result, Stage};
use crate::staging::StagingStore;

/// First and last hour (inclusive, UTC) counted as daytime.
pub const DAYTIME_HOURS: (u32, u32) = (6, 18);

/// Miles per hour in one metre per second, as used by the sink.
pub const MPH_PER_MPS: f64 = 2.237;

pub fn celsius_to_fahrenheit(celsius: f64) -> f64 {
    celsius * 9.0 / 5.0 + 32.0
}

pub fn mps_to_mph(mps: f64) -> f64 {
    mps * MPH_PER_MPS
}

pub fn is_daytime(hour: u32) -> bool {
    (DAYTIME_HOURS.0..=DAYTIME_HOURS.1).contains(&hour)
}

/// Weighted composite of temperature, wind and humidity.
///
/// Nominal inputs land in `[0, 1]`, but nothing is clamped: a 80 °C reading or
/// a 50 m/s wind pushes the score above 1.
pub fn weather_severity(temperature: f64, wind_speed: f64, humidity: f64) -> f64 {
    0.4 * (temperature.abs() / 40.0) + 0.3 * (wind_speed / 20.0) + 0.3 * (humidity / 100.0)
}

/// Upper-case the first letter of every word and lower-case the rest.
///
/// A word starts at any letter that does not follow another letter, so
/// "o'clock" becomes "O'Clock".
pub fn title_case(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut prev_is_letter = false;

    for c in text.chars() {
        if c.is_alphabetic() {
            if prev_is_letter {
                out.extend(c.to_lowercase());
            } else {
                out.extend(c.to_uppercase());
            }
            prev_is_letter = true;
        } else {
            out.push(c);
            prev_is_letter = false;
        }
    }

    out
}

fn require<T>(value: Option<T>, field: &str) -> std::result::Result<T, String> {
    value.ok_or_else(|| format!("missing field '{field}'"))
}

fn require_finite(value: Option<f64>, field: &str) -> std::result::Result<f64, String> {
    let value = require(value, field)?;
    if value.is_finite() {
        Ok(value)
    } else {
        Err(format!("field '{field}' is not a finite number: {value}"))
    }
}

/// Derive the transformed row for one staged record.
pub fn derive(record: &StagedRecord) -> std::result::Result<TransformedRecord, String> {
    let temperature = require_finite(record.temperature, "temperature")?;
    let feels_like = require_finite(record.feels_like, "feels_like")?;
    let humidity = require_finite(record.humidity, "humidity")?;
    let pressure = require_finite(record.pressure, "pressure")?;
    let wind_speed = require_finite(record.wind_speed, "wind_speed")?;
    let description = require(record.description.as_deref(), "description")?;
    let fetch_time = require(record.fetch_time, "fetch_time")?;
    let epoch = require(record.event_time_epoch, "event_time_epoch")?;

    let event_time: DateTime<Utc> = DateTime::from_timestamp(epoch, 0)
        .ok_or_else(|| format!("event_time_epoch {epoch} is out of range"))?;

    let data_lag = (fetch_time - event_time).num_milliseconds() as f64 / 1000.0;
    let hour = event_time.hour();

    Ok(TransformedRecord {
        subject: record.subject.clone(),
        event_time,
        fetch_time,
        data_lag,
        temperature,
        temperature_fahrenheit: celsius_to_fahrenheit(temperature),
        feels_like,
        humidity,
        pressure,
        wind_speed,
        wind_speed_mph: mps_to_mph(wind_speed),
        description: title_case(description),
        temp_category: TempCategory::from_celsius(temperature),
        is_daytime: is_daytime(hour),
        weather_severity: weather_severity(temperature, wind_speed, humidity),
        hour,
        day_of_week: event_time.format("%A").to_string(),
    })
}

/// Transform every staged record of a batch.
///
/// Rows come back sorted by subject, then event time.
pub fn transform_records(
    batch: BatchHandle,
    records: &[StagedRecord],
) -> Result<Vec<TransformedRecord>> {
    let mut rows = records
        .iter()
        .map(|record| {
            derive(record).map_err(|reason| {
                PipelineError::validation(
                    Stage::Transform,
                    Some(batch),
                    format!("record for subject '{}': {}", record.subject, reason),
                )
            })
        })
        .collect::<Result<Vec<_>>>()?;

    rows.sort_by(|a, b| {
        a.subject
            .cmp(&b.subject)
            .then_with(|| a.event_time.cmp(&b.event_time))
    });

    Ok(rows)
}

pub struct Transformer {
    store: Arc<dyn StagingStore>,
}

impl Transformer {
    pub fn new(store: Arc<dyn StagingStore>) -> Self {
        Self { store }
    }

    /// Read `batch` from staging and transform it.
    ///
    /// An empty batch yields an empty result.
    #[instrument(skip_all, fields(%batch))]
    pub async fn transform(&self, batch: BatchHandle) -> Result<Vec<TransformedRecord>> {
        let staged = self.store.query(batch).await?;
        info!(records = staged.len(), "Retrieved staged records for transformation");

        if staged.is_empty() {
            warn!("Batch is empty, nothing to transform");
            return Ok(Vec::new());
        }

        let rows = transform_records(batch, &staged)?;
        info!(rows = rows.len(), "Transformation complete");
        Ok(rows)
    }
}
