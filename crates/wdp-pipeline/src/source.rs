//! External weather source
//!
//! [`WeatherSource`] is the seam between the extractor and the network. The
//! production implementation, [`OpenWeatherClient`], issues one HTTP request
//! per subject:
//!
//! ```text
//! GET {url}?q=<subject>&appid=<api_key>&units=metric
//! ```
//!
//! and reads `main.temp`, `main.feels_like`, `main.humidity`, `main.pressure`,
//! `weather[0].description`, `wind.speed` and `dt` from the JSON body.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use thiserror::Error;
use wdp_common::types::Subject;

use crate::config::SourceConfig;

/// Failure to fetch one subject. Recovered by the extractor.
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("request timed out")]
    Timeout,

    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("source returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("malformed response: {0}")]
    Malformed(String),
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            FetchError::Timeout
        } else if err.is_decode() {
            FetchError::Malformed(err.to_string())
        } else {
            FetchError::Http(err.to_string())
        }
    }
}

/// One observation as reported by the source.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub temperature: f64,
    pub feels_like: f64,
    pub humidity: f64,
    pub pressure: f64,
    pub description: String,
    pub wind_speed: f64,
    /// Observation time, epoch seconds
    pub event_time_epoch: i64,
}

/// Something that can produce an observation for a subject.
#[async_trait]
pub trait WeatherSource: Send + Sync {
    async fn fetch(&self, subject: &Subject) -> Result<Observation, FetchError>;
}

// ============================================================================
// OpenWeather-style HTTP client
// ============================================================================

#[derive(Debug, Deserialize)]
struct WeatherResponse {
    main: MainSection,
    weather: Vec<ConditionSection>,
    wind: WindSection,
    dt: i64,
}

#[derive(Debug, Deserialize)]
struct MainSection {
    temp: f64,
    feels_like: f64,
    humidity: f64,
    pressure: f64,
}

#[derive(Debug, Deserialize)]
struct ConditionSection {
    description: String,
}

#[derive(Debug, Deserialize)]
struct WindSection {
    speed: f64,
}

impl TryFrom<WeatherResponse> for Observation {
    type Error = FetchError;

    fn try_from(response: WeatherResponse) -> Result<Self, FetchError> {
        let description = response
            .weather
            .into_iter()
            .next()
            .map(|c| c.description)
            .ok_or_else(|| FetchError::Malformed("weather array is empty".to_string()))?;

        Ok(Observation {
            temperature: response.main.temp,
            feels_like: response.main.feels_like,
            humidity: response.main.humidity,
            pressure: response.main.pressure,
            description,
            wind_speed: response.wind.speed,
            event_time_epoch: response.dt,
        })
    }
}

/// HTTP client for an OpenWeather-compatible current-weather endpoint
pub struct OpenWeatherClient {
    client: Client,
    url: String,
    api_key: String,
    units: String,
}

impl OpenWeatherClient {
    /// Create a client from source configuration
    pub fn new(config: &SourceConfig) -> Result<Self, FetchError> {
        let client = Client::builder().timeout(config.timeout()).build()?;

        Ok(Self {
            client,
            url: config.url.clone(),
            api_key: config.api_key.clone(),
            units: config.units.clone(),
        })
    }
}

#[async_trait]
impl WeatherSource for OpenWeatherClient {
    async fn fetch(&self, subject: &Subject) -> Result<Observation, FetchError> {
        let response = self
            .client
            .get(&self.url)
            .query(&[
                ("q", subject.as_str()),
                ("appid", self.api_key.as_str()),
                ("units", self.units.as_str()),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(FetchError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let body = response.text().await?;
        let parsed: WeatherResponse =
            serde_json::from_str(&body).map_err(|e| FetchError::Malformed(e.to_string()))?;

        parsed.try_into()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;
    use wiremock::{
        matchers::{method, path, query_param},
        Mock, MockServer, ResponseTemplate,
    };

    fn source_config(server: &MockServer) -> SourceConfig {
        SourceConfig {
            url: format!("{}/data/2.5/weather", server.uri()),
            api_key: "test-key".to_string(),
            units: "metric".to_string(),
            timeout_secs: 1,
        }
    }

    fn paris_body() -> serde_json::Value {
        json!({
            "main": { "temp": 10.0, "feels_like": 8.2, "humidity": 50, "pressure": 1013 },
            "weather": [{ "description": "scattered clouds" }],
            "wind": { "speed": 3.0 },
            "dt": 1706616000
        })
    }

    #[tokio::test]
    async fn test_fetch_sends_query_and_parses_observation() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/data/2.5/weather"))
            .and(query_param("q", "Paris"))
            .and(query_param("appid", "test-key"))
            .and(query_param("units", "metric"))
            .respond_with(ResponseTemplate::new(200).set_body_json(paris_body()))
            .expect(1)
            .mount(&server)
            .await;

        let client = OpenWeatherClient::new(&source_config(&server)).unwrap();
        let obs = client.fetch(&Subject::new("Paris").unwrap()).await.unwrap();

        assert_eq!(obs.temperature, 10.0);
        assert_eq!(obs.humidity, 50.0);
        assert_eq!(obs.description, "scattered clouds");
        assert_eq!(obs.event_time_epoch, 1_706_616_000);
    }

    #[tokio::test]
    async fn test_fetch_maps_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404).set_body_string("city not found"))
            .mount(&server)
            .await;

        let client = OpenWeatherClient::new(&source_config(&server)).unwrap();
        let err = client.fetch(&Subject::new("Atlantis").unwrap()).await.unwrap_err();

        match err {
            FetchError::Status { status, body } => {
                assert_eq!(status, 404);
                assert_eq!(body, "city not found");
            },
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_fetch_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(paris_body())
                    .set_delay(Duration::from_secs(3)),
            )
            .mount(&server)
            .await;

        let client = OpenWeatherClient::new(&source_config(&server)).unwrap();
        let err = client.fetch(&Subject::new("Cairo").unwrap()).await.unwrap_err();
        assert!(matches!(err, FetchError::Timeout), "got {err:?}");
    }

    #[tokio::test]
    async fn test_fetch_rejects_missing_fields() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "main": { "temp": 10.0 },
                "weather": [],
                "wind": { "speed": 3.0 },
                "dt": 1706616000
            })))
            .mount(&server)
            .await;

        let client = OpenWeatherClient::new(&source_config(&server)).unwrap();
        let err = client.fetch(&Subject::new("Paris").unwrap()).await.unwrap_err();
        assert!(matches!(err, FetchError::Malformed(_)));
    }

    #[test]
    fn test_empty_weather_array_is_malformed() {
        let response: WeatherResponse = serde_json::from_value(json!({
            "main": { "temp": 1.0, "feels_like": 0.0, "humidity": 80, "pressure": 1000 },
            "weather": [],
            "wind": { "speed": 1.0 },
            "dt": 0
        }))
        .unwrap();
        assert!(matches!(Observation::try_from(response), Err(FetchError::Malformed(_))));
    }
}
