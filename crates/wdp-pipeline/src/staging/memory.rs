//! In-process staging store
//!
//! Backs tests and `--dry-run` invocations. Holds every staged row in a
//! vector guarded by a mutex; the lock is never held across an await.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};
use tracing::debug;
use wdp_common::types::{BatchHandle, RawItem, StagedRecord};

use super::StagingStore;
use crate::error::{PipelineError, Result, Stage};

#[derive(Debug, Default)]
pub struct MemoryStagingStore {
    rows: Mutex<Vec<StagedRecord>>,
    fail_appends: AtomicBool,
}

impl MemoryStagingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `append` fail, as an unreachable database would.
    pub fn fail_appends(&self, fail: bool) {
        self.fail_appends.store(fail, Ordering::SeqCst);
    }

    /// Insert an already-staged row directly, bypassing `append`.
    ///
    /// Lets callers seed rows an external writer might have produced, such as
    /// rows with missing measurements.
    pub fn insert_staged(&self, record: StagedRecord) -> Result<()> {
        self.lock(Stage::Extract, Some(record.batch_handle))?.push(record);
        Ok(())
    }

    /// Total number of staged rows across all batches
    pub fn len(&self) -> usize {
        self.rows.lock().map(|rows| rows.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(
        &self,
        stage: Stage,
        batch: Option<BatchHandle>,
    ) -> Result<MutexGuard<'_, Vec<StagedRecord>>> {
        self.rows
            .lock()
            .map_err(|_| PipelineError::persist(stage, batch, "staging store lock poisoned"))
    }
}

#[async_trait]
impl StagingStore for MemoryStagingStore {
    async fn append(&self, items: &[RawItem], batch: BatchHandle) -> Result<()> {
        if self.fail_appends.load(Ordering::SeqCst) {
            return Err(PipelineError::persist(
                Stage::Extract,
                Some(batch),
                "staging store rejected the append",
            ));
        }

        let mut rows = self.lock(Stage::Extract, Some(batch))?;
        rows.extend(items.iter().map(|item| StagedRecord::from_raw(item, batch)));
        debug!(%batch, records = items.len(), "Appended batch to memory staging store");
        Ok(())
    }

    async fn query(&self, batch: BatchHandle) -> Result<Vec<StagedRecord>> {
        let rows = self.lock(Stage::Transform, Some(batch))?;
        Ok(rows
            .iter()
            .filter(|row| row.batch_handle == batch)
            .cloned()
            .collect())
    }
}
