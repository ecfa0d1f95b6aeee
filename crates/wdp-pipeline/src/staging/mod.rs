//! Staging store
//!
//! Append-only store of raw observations, queryable by batch handle. The
//! extractor is the only writer and the transformer the only reader.
//!
//! Implementations must guarantee that `query(h)` returns exactly the records
//! appended under `h`: nothing from another batch and nothing missing.

use async_trait::async_trait;
use wdp_common::types::{BatchHandle, RawItem, StagedRecord};

use crate::error::Result;

pub mod memory;
pub mod postgres;

pub use memory::MemoryStagingStore;
pub use postgres::PgStagingStore;

#[async_trait]
pub trait StagingStore: Send + Sync {
    /// Persist `items` under `batch` as one unit.
    ///
    /// Fails with [`PipelineError::Persist`](crate::error::PipelineError::Persist)
    /// if the store cannot take the write; in that case none of the items are
    /// visible to `query`.
    async fn append(&self, items: &[RawItem], batch: BatchHandle) -> Result<()>;

    /// Every record appended under `batch`, in no particular order.
    async fn query(&self, batch: BatchHandle) -> Result<Vec<StagedRecord>>;
}
