//! Extraction stage
//!
//! Fetches every configured subject in order, tolerating per-subject
//! failures, and appends the successful observations to the staging store as
//! one batch.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, instrument, warn};
use wdp_common::types::{BatchHandle, RawItem, Subject};

use crate::error::Result;
use crate::source::WeatherSource;
use crate::staging::StagingStore;

/// Outcome of one extraction
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractSummary {
    pub batch: BatchHandle,
    /// Subjects fetched and staged
    pub staged: Vec<Subject>,
    /// Subjects whose fetch failed and were skipped
    pub skipped: Vec<Subject>,
}

pub struct Extractor {
    source: Arc<dyn WeatherSource>,
    store: Arc<dyn StagingStore>,
    rate_limit_delay: Duration,
}

impl Extractor {
    pub fn new(
        source: Arc<dyn WeatherSource>,
        store: Arc<dyn StagingStore>,
        rate_limit_delay: Duration,
    ) -> Self {
        Self {
            source,
            store,
            rate_limit_delay,
        }
    }

    /// Extract one batch and return its handle.
    ///
    /// Only a failed staging append is an error; subjects that cannot be
    /// fetched are logged and left out of the batch. A batch in which every
    /// subject failed is still appended (empty) and its handle returned.
    pub async fn extract(&self, subjects: &[Subject]) -> Result<BatchHandle> {
        self.extract_batch(subjects).await.map(|summary| summary.batch)
    }

    /// Same as [`extract`](Self::extract), reporting which subjects made it.
    #[instrument(skip_all, fields(subjects = subjects.len()))]
    pub async fn extract_batch(&self, subjects: &[Subject]) -> Result<ExtractSummary> {
        let batch = BatchHandle::now();
        info!(%batch, "Starting extraction");

        let mut items = Vec::with_capacity(subjects.len());
        let mut staged = Vec::new();
        let mut skipped = Vec::new();

        for (index, subject) in subjects.iter().enumerate() {
            if index > 0 && !self.rate_limit_delay.is_zero() {
                tokio::time::sleep(self.rate_limit_delay).await;
            }

            match self.source.fetch(subject).await {
                Ok(observation) => {
                    items.push(RawItem {
                        subject: subject.clone(),
                        temperature: observation.temperature,
                        feels_like: observation.feels_like,
                        humidity: observation.humidity,
                        pressure: observation.pressure,
                        description: observation.description,
                        wind_speed: observation.wind_speed,
                        fetch_time: Utc::now(),
                        event_time_epoch: observation.event_time_epoch,
                    });
                    staged.push(subject.clone());
                    info!(%subject, %batch, "Fetched observation");
                },
                Err(e) => {
                    warn!(%subject, %batch, error = %e, "Fetch failed, skipping subject");
                    skipped.push(subject.clone());
                },
            }
        }

        if let Err(e) = self.store.append(&items, batch).await {
            error!(%batch, records = items.len(), error = %e, "Failed to append batch to staging store");
            return Err(e.with_batch(batch));
        }

        info!(
            %batch,
            staged = staged.len(),
            skipped = skipped.len(),
            "Extraction complete"
        );

        Ok(ExtractSummary {
            batch,
            staged,
            skipped,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::error::PipelineError;
    use crate::source::{FetchError, Observation};
    use crate::staging::MemoryStagingStore;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Canned source: subjects missing from the map fail with a timeout.
    struct StubSource {
        observations: HashMap<String, Observation>,
        calls: Mutex<Vec<String>>,
    }

    impl StubSource {
        fn new(known: &[(&str, f64)]) -> Self {
            let observations = known
                .iter()
                .map(|(name, temp)| {
                    (
                        name.to_string(),
                        Observation {
                            temperature: *temp,
                            feels_like: *temp - 1.0,
                            humidity: 50.0,
                            pressure: 1013.0,
                            description: "clear sky".to_string(),
                            wind_speed: 3.0,
                            event_time_epoch: 1_706_616_000,
                        },
                    )
                })
                .collect();
            Self {
                observations,
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl WeatherSource for StubSource {
        async fn fetch(&self, subject: &Subject) -> std::result::Result<Observation, FetchError> {
            self.calls.lock().unwrap().push(subject.to_string());
            self.observations
                .get(subject.as_str())
                .cloned()
                .ok_or(FetchError::Timeout)
        }
    }

    fn subjects(names: &[&str]) -> Vec<Subject> {
        names.iter().map(|n| Subject::new(*n).unwrap()).collect()
    }

    #[tokio::test]
    async fn test_failed_subjects_are_skipped_not_fatal() {
        let source = Arc::new(StubSource::new(&[("Paris", 10.0), ("Lima", 19.0)]));
        let store = Arc::new(MemoryStagingStore::new());
        let extractor = Extractor::new(source.clone(), store.clone(), Duration::ZERO);

        let summary = extractor
            .extract_batch(&subjects(&["Paris", "Cairo", "Lima"]))
            .await
            .unwrap();

        assert_eq!(summary.staged, subjects(&["Paris", "Lima"]));
        assert_eq!(summary.skipped, subjects(&["Cairo"]));
        assert_eq!(*source.calls.lock().unwrap(), vec!["Paris", "Cairo", "Lima"]);

        let staged = store.query(summary.batch).await.unwrap();
        assert_eq!(staged.len(), 2);
        assert!(staged.iter().all(|r| r.batch_handle == summary.batch));
    }

    #[tokio::test]
    async fn test_all_failures_yield_empty_batch() {
        let source = Arc::new(StubSource::new(&[]));
        let store = Arc::new(MemoryStagingStore::new());
        let extractor = Extractor::new(source, store.clone(), Duration::ZERO);

        let batch = extractor.extract(&subjects(&["Cairo", "Oslo"])).await.unwrap();
        assert!(store.query(batch).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_append_failure_propagates_with_batch() {
        let source = Arc::new(StubSource::new(&[("Paris", 10.0)]));
        let store = Arc::new(MemoryStagingStore::new());
        store.fail_appends(true);
        let extractor = Extractor::new(source, store, Duration::ZERO);

        let err = extractor.extract(&subjects(&["Paris"])).await.unwrap_err();
        assert!(matches!(err, PipelineError::Persist { .. }));
        assert!(err.batch().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_delay_applies_between_fetches_only() {
        let source = Arc::new(StubSource::new(&[("Paris", 10.0), ("Lima", 19.0), ("Oslo", -3.0)]));
        let store = Arc::new(MemoryStagingStore::new());
        let extractor = Extractor::new(source, store, Duration::from_secs(1));

        let started = tokio::time::Instant::now();
        extractor
            .extract(&subjects(&["Paris", "Lima", "Oslo"]))
            .await
            .unwrap();

        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(2), "elapsed {elapsed:?}");
        assert!(elapsed < Duration::from_secs(3), "elapsed {elapsed:?}");
    }

    #[tokio::test]
    async fn test_consecutive_batches_do_not_share_rows() {
        let source = Arc::new(StubSource::new(&[("Paris", 10.0)]));
        let store = Arc::new(MemoryStagingStore::new());
        let extractor = Extractor::new(source, store.clone(), Duration::ZERO);

        let first = extractor.extract(&subjects(&["Paris"])).await.unwrap();
        let second = extractor.extract(&subjects(&["Paris"])).await.unwrap();

        assert_ne!(first, second);
        assert_eq!(store.query(first).await.unwrap().len(), 1);
        assert_eq!(store.query(second).await.unwrap().len(), 1);
        assert_eq!(store.len(), 2);
    }
}
