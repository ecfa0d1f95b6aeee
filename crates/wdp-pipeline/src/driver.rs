//! Pipeline driver
//!
//! Runs extract, transform and load once per trigger, passing the batch
//! handle between stages explicitly:
//!
//! ```text
//! Idle -> Extracting -> Transforming -> Loading -> Idle
//! ```
//!
//! A fatal error in any stage returns the driver to `Idle` and is handed back
//! to the caller with its stage and batch. Nothing is rolled back: rows
//! already staged stay staged. Scheduling, retries and preventing overlapping
//! runs are the caller's responsibility.

use std::sync::{Arc, Mutex};
use tracing::{error, info, info_span, Instrument, Span};
use uuid::Uuid;
use wdp_common::types::{BatchHandle, Subject};

use crate::error::{PipelineError, Result, Stage};
use crate::extract::Extractor;
use crate::load::{CsvSink, LoadReport};
use crate::source::WeatherSource;
use crate::staging::StagingStore;
use crate::transform::Transformer;

/// Where the driver currently is in a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Extracting,
    Transforming,
    Loading,
}

/// Summary of one successful run
#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    pub run_id: Uuid,
    pub batch: BatchHandle,
    /// Subjects staged; empty for a replay
    pub staged: Vec<Subject>,
    /// Subjects whose fetch failed; empty for a replay
    pub skipped: Vec<Subject>,
    pub rows_transformed: usize,
    pub load: LoadReport,
}

pub struct PipelineDriver {
    subjects: Vec<Subject>,
    extractor: Extractor,
    transformer: Transformer,
    sink: CsvSink,
    state: Mutex<PipelineState>,
}

impl PipelineDriver {
    pub fn new(
        subjects: Vec<Subject>,
        source: Arc<dyn WeatherSource>,
        store: Arc<dyn StagingStore>,
        sink: CsvSink,
        rate_limit_delay: std::time::Duration,
    ) -> Self {
        Self {
            subjects,
            extractor: Extractor::new(source, store.clone(), rate_limit_delay),
            transformer: Transformer::new(store),
            sink,
            state: Mutex::new(PipelineState::Idle),
        }
    }

    pub fn state(&self) -> PipelineState {
        self.state.lock().map(|s| *s).unwrap_or(PipelineState::Idle)
    }

    fn enter(&self, next: PipelineState) {
        if let Ok(mut state) = self.state.lock() {
            *state = next;
        }
    }

    /// Extract a fresh batch, transform it, and load it.
    pub async fn run_once(&self) -> Result<RunReport> {
        let run_id = Uuid::new_v4();
        let span = info_span!("pipeline_run", %run_id);

        let result = async {
            self.enter(PipelineState::Extracting);
            let summary = self.extractor.extract_batch(&self.subjects).await?;
            let mut report = self.finish(run_id, summary.batch).await?;
            report.staged = summary.staged;
            report.skipped = summary.skipped;
            Ok::<_, PipelineError>(report)
        }
        .instrument(span)
        .await;

        self.settle(run_id, result)
    }

    /// Transform and load a batch that is already staged.
    ///
    /// Useful when a run extracted successfully but failed later: the staged
    /// rows are still there and can be finished without fetching again.
    pub async fn replay(&self, batch: BatchHandle) -> Result<RunReport> {
        let run_id = Uuid::new_v4();
        let span = info_span!("pipeline_replay", %run_id, %batch);

        let result = self.finish(run_id, batch).instrument(span).await;
        self.settle(run_id, result)
    }

    async fn finish(&self, run_id: Uuid, batch: BatchHandle) -> Result<RunReport> {
        self.enter(PipelineState::Transforming);
        let rows = self
            .transformer
            .transform(batch)
            .await
            .map_err(|e| e.with_batch(batch))?;

        self.enter(PipelineState::Loading);
        let rows_transformed = rows.len();
        let load = tokio::task::spawn_blocking({
            let sink = self.sink.clone();
            let span = Span::current();
            move || span.in_scope(|| sink.load(&rows))
        })
        .await
        .map_err(|e| {
            PipelineError::persist(Stage::Load, Some(batch), format!("load task failed: {e}"))
        })?
        .map_err(|e| e.with_batch(batch))?;

        Ok(RunReport {
            run_id,
            batch,
            staged: Vec::new(),
            skipped: Vec::new(),
            rows_transformed,
            load,
        })
    }

    fn settle(&self, run_id: Uuid, result: Result<RunReport>) -> Result<RunReport> {
        let failed_in = self.state();
        self.enter(PipelineState::Idle);

        match &result {
            Ok(report) => info!(
                %run_id,
                batch = %report.batch,
                rows = report.rows_transformed,
                skipped = report.skipped.len(),
                "Pipeline run succeeded"
            ),
            Err(e) => error!(
                %run_id,
                state = ?failed_in,
                stage = e.stage().map(|s| s.as_str()).unwrap_or("unknown"),
                batch = ?e.batch().map(|b| b.to_string()),
                error = %e,
                "Pipeline run failed"
            ),
        }

        result
    }
}
